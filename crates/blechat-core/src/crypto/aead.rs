//! AEAD 引擎 - XChaCha20-Poly1305
//!
//! 线上帧格式固定为 `nonce(24) || ciphertext || tag(16)`，每次 seal
//! 用 CSPRNG 取全新 24 字节 nonce（XChaCha20 的 nonce 空间允许随机选取）。
//!
//! # 两种模式
//!
//! - **单钥**：进程启动时从环境变量读 PSK，双向共用。
//! - **会话**：HELLO 交换完成后经 HKDF 派生的方向密钥对，`seal` 用
//!   本端 TX 钥，`open` 先试 RX 钥、失败再回退单钥。回退窗口允许
//!   对端尚未切换会话时的短暂互通。
//!
//! 未配置 PSK 时引擎退化为 Noop：保持同样的帧格式（全零 nonce/tag）
//! 以便两端明文互通。

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use std::sync::RwLock;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

/// 用户文本的关联数据，两端必须逐字节一致
pub const AAD_TEXT: &[u8; 3] = b"BC1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AeadError {
    #[error("aead seal failed")]
    Seal,

    #[error("aead auth failed")]
    Auth,
}

/// 已按本端方向排好的会话密钥
///
/// `tx_*` 是本端发送方向。nonce base 当前保留不用（seal 仍用随机
/// nonce），但随会话一起安装、一起销毁。
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionSecrets {
    pub tx_key: [u8; KEY_SIZE],
    pub rx_key: [u8; KEY_SIZE],
    pub tx_nonce_base: [u8; NONCE_SIZE],
    pub rx_nonce_base: [u8; NONCE_SIZE],
}

enum Mode {
    /// 无 PSK：保持帧格式的明文直通
    Noop,
    Psk {
        key: Zeroizing<[u8; KEY_SIZE]>,
        session: RwLock<Option<SessionSecrets>>,
    },
}

/// AEAD 引擎
///
/// 聊天服务持有唯一实例；`set_session` 与 `seal`/`open` 可能来自
/// 不同任务，会话槽用读写锁保护。
pub struct AeadEngine {
    mode: Mode,
}

impl AeadEngine {
    /// 明文直通引擎
    pub fn noop() -> Self {
        Self { mode: Mode::Noop }
    }

    /// 单钥引擎
    pub fn with_psk(key: [u8; KEY_SIZE]) -> Self {
        Self {
            mode: Mode::Psk {
                key: Zeroizing::new(key),
                session: RwLock::new(None),
            },
        }
    }

    /// 从环境变量构建：有合法 PSK 用加密引擎，否则 Noop
    pub fn from_env(name: &str) -> Self {
        match load_psk_from_env(name) {
            Some(key) => {
                log::debug!("AEAD enabled ({} set)", name);
                Self::with_psk(*key)
            }
            None => {
                log::debug!("AEAD disabled (no usable {})", name);
                Self::noop()
            }
        }
    }

    pub fn has_psk(&self) -> bool {
        matches!(self.mode, Mode::Psk { .. })
    }

    /// 安装或清除会话密钥；旧材料随 drop 清零
    pub fn set_session(&self, secrets: Option<SessionSecrets>) {
        if let Mode::Psk { session, .. } = &self.mode {
            let mut slot = session.write().expect("session lock poisoned");
            *slot = secrets;
        }
    }

    pub fn session_installed(&self) -> bool {
        match &self.mode {
            Mode::Noop => false,
            Mode::Psk { session, .. } => {
                session.read().expect("session lock poisoned").is_some()
            }
        }
    }

    /// 加密：输出 `nonce || ciphertext || tag`
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
        match &self.mode {
            Mode::Noop => {
                let mut out = vec![0u8; NONCE_SIZE + plaintext.len() + TAG_SIZE];
                out[NONCE_SIZE..NONCE_SIZE + plaintext.len()].copy_from_slice(plaintext);
                Ok(out)
            }
            Mode::Psk { key, session } => {
                let mut nonce = [0u8; NONCE_SIZE];
                OsRng.fill_bytes(&mut nonce);

                let slot = session.read().expect("session lock poisoned");
                let k: &[u8; KEY_SIZE] = match slot.as_ref() {
                    Some(s) => &s.tx_key,
                    None => key,
                };
                let ct = seal_raw(k, &nonce, plaintext, aad)?;
                drop(slot);

                let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&ct);
                Ok(out)
            }
        }
    }

    /// 解密：先试会话 RX 钥，再回退单钥
    pub fn open(&self, frame: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
        if frame.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AeadError::Auth);
        }
        match &self.mode {
            Mode::Noop => Ok(frame[NONCE_SIZE..frame.len() - TAG_SIZE].to_vec()),
            Mode::Psk { key, session } => {
                let (nonce, ct) = frame.split_at(NONCE_SIZE);

                let slot = session.read().expect("session lock poisoned");
                if let Some(s) = slot.as_ref() {
                    if let Ok(pt) = open_raw(&s.rx_key, nonce, ct, aad) {
                        return Ok(pt);
                    }
                }
                drop(slot);

                open_raw(key, nonce, ct, aad)
            }
        }
    }
}

fn seal_raw(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| AeadError::Seal)?;
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| AeadError::Seal)
}

fn open_raw(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    ct: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| AeadError::Auth)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ct, aad })
        .map_err(|_| AeadError::Auth)
}

/// 从环境变量解析 32 字节 PSK
///
/// 接受 64 个十六进制字符（大小写均可）或标准 Base64（非 URL-safe
/// 变体）；首尾空白忽略。缺失或无法解出恰好 32 字节时返回 None。
pub fn load_psk_from_env(name: &str) -> Option<Zeroizing<[u8; KEY_SIZE]>> {
    let raw = std::env::var(name).ok()?;
    parse_psk(&raw)
}

pub(crate) fn parse_psk(raw: &str) -> Option<Zeroizing<[u8; KEY_SIZE]>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() == KEY_SIZE * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            key[i] = ((hi << 4) | lo) as u8;
        }
        return Some(key);
    }

    let mut decoded = general_purpose::STANDARD.decode(s).ok()?;
    if decoded.len() != KEY_SIZE {
        decoded.zeroize();
        log::warn!("PSK decodes to {} bytes, expected {}", decoded.len(), KEY_SIZE);
        return None;
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&decoded);
    decoded.zeroize();
    Some(key)
}
