//! 加密模块
//!
//! - [`aead`]：PSK XChaCha20-Poly1305 引擎（单钥模式 + 可选会话模式）
//! - [`kex`]：HELLO 随机数 -> HKDF 会话密钥派生

pub mod aead;
pub mod kex;
