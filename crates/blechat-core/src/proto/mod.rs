//! 链路层协议
//!
//! - [`frag`]：分片/重组（发送侧切块，接收侧按 `msg_id` 重组）
//! - [`ctrl`]：HELLO 控制帧（TLV 编码）

pub mod ctrl;
pub mod frag;

use thiserror::Error;

/// 协议层错误
///
/// 接收路径上这些错误只会丢帧加日志，不会向上传播。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("malformed header")]
    MalformedHeader,

    #[error("malformed fragment")]
    MalformedFragment,

    #[error("mtu_payload {0} out of range [1, 100]")]
    BadMtu(usize),

    #[error("payload needs {0} fragments, exceeds 65535")]
    TooLarge(usize),

    #[error("payload length {got} does not match header len {expect}")]
    SizeMismatch { expect: usize, got: usize },

    #[error("malformed hello frame")]
    MalformedHello,
}
