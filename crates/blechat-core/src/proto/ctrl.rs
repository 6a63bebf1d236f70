//! HELLO 控制帧 - TLV 编码
//!
//! 链路建立后双方互发一次 HELLO，交换用户 ID、能力位和 32 字节
//! 随机数（用于会话密钥派生）。
//!
//! # 帧格式
//!
//! `0x01 (HELLO) | 0x01 (版本) | TLV...`
//!
//! TLV 为 `tag(1) | length(2, 大端) | value`。caps 字段的 value
//! 本身按小端 u32 编码（历史格式，保持兼容）。未知 tag 跳过；
//! TLV 流必须恰好消费完输入，否则整帧拒收。

use super::ProtoError;

/// HELLO 消息类型字节
pub const MSG_CTRL_HELLO: u8 = 0x01;
/// HELLO 版本
pub const HELLO_VER: u8 = 0x01;

pub const T_USER_ID: u8 = 0x01;
pub const T_CAPS: u8 = 0x02;
pub const T_NA32: u8 = 0x12;

/// 能力位：支持 PSK AEAD
pub const CAP_AEAD_PSK_SUPPORTED: u32 = 1 << 0;

/// 用户 ID 上限（字节）
pub const MAX_USER_ID: usize = 64;

/// 解析后的 HELLO
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
    pub user_id: String,
    pub caps: Option<u32>,
    pub na32: Option<[u8; 32]>,
}

impl Hello {
    pub fn has_psk_cap(&self) -> bool {
        self.caps
            .map(|c| c & CAP_AEAD_PSK_SUPPORTED != 0)
            .unwrap_or(false)
    }
}

/// 判断一帧是否像 HELLO（类型 + 版本两个前导字节）
pub fn looks_like_hello(frame: &[u8]) -> bool {
    frame.len() >= 2 && frame[0] == MSG_CTRL_HELLO && frame[1] == HELLO_VER
}

/// 编码 HELLO
///
/// 空 user_id 省略 T_USER_ID；T_CAPS 恒出现；提供 nonce 时追加 T_NA32。
pub fn encode_hello(user_id: &str, caps: u32, na32: Option<&[u8; 32]>) -> Vec<u8> {
    let user = &user_id.as_bytes()[..user_id.len().min(MAX_USER_ID)];
    let mut out = Vec::with_capacity(2 + 3 + user.len() + 3 + 4 + 3 + 32);
    out.push(MSG_CTRL_HELLO);
    out.push(HELLO_VER);

    if !user.is_empty() {
        out.push(T_USER_ID);
        out.extend_from_slice(&(user.len() as u16).to_be_bytes());
        out.extend_from_slice(user);
    }

    out.push(T_CAPS);
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&caps.to_le_bytes());

    if let Some(na) = na32 {
        out.push(T_NA32);
        out.extend_from_slice(&32u16.to_be_bytes());
        out.extend_from_slice(na);
    }
    out
}

/// 解析 HELLO
///
/// 仅当 TLV 流恰好消费完输入时接受；长度越界或定长字段长度不符
/// 都按 [`ProtoError::MalformedHello`] 拒收。
pub fn parse_hello(frame: &[u8]) -> Result<Hello, ProtoError> {
    if !looks_like_hello(frame) {
        return Err(ProtoError::MalformedHello);
    }

    let mut h = Hello::default();
    let mut i = 2usize;
    while i < frame.len() {
        if i + 3 > frame.len() {
            // 残余不足一个 TLV 头
            return Err(ProtoError::MalformedHello);
        }
        let tag = frame[i];
        let len = usize::from(u16::from_be_bytes([frame[i + 1], frame[i + 2]]));
        i += 3;
        if i + len > frame.len() {
            return Err(ProtoError::MalformedHello);
        }
        let value = &frame[i..i + len];
        i += len;

        match tag {
            T_USER_ID => {
                if len == 0 || len > MAX_USER_ID {
                    return Err(ProtoError::MalformedHello);
                }
                h.user_id = String::from_utf8_lossy(value).into_owned();
            }
            T_CAPS => {
                if len != 4 {
                    return Err(ProtoError::MalformedHello);
                }
                h.caps = Some(u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
            }
            T_NA32 => {
                if len != 32 {
                    return Err(ProtoError::MalformedHello);
                }
                let mut na = [0u8; 32];
                na.copy_from_slice(value);
                h.na32 = Some(na);
            }
            _ => {} // 未知 TLV 跳过
        }
    }
    Ok(h)
}
