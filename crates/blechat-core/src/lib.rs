//! Blechat Core Library
//!
//! BLE 近场文字消息的核心实现库，包含：
//! - 分片/重组协议（12 字节头 + 最多 100 字节负载）
//! - PSK XChaCha20-Poly1305 加密与 HKDF 会话密钥派生
//! - HELLO 控制协议（用户 ID / 能力位 / 32 字节随机数）
//! - BLE GATT 传输（central / peripheral，经 BlueZ D-Bus）

pub mod ble;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod logging;
pub mod proto;
pub mod transport;

pub use ble::{RX_CHAR_UUID, SERVICE_UUID, TX_CHAR_UUID};
pub use chat::ChatService;
pub use config::{Config, Role, TransportKind};
pub use crypto::aead::AeadEngine;
pub use transport::Transport;
