//! 传输抽象
//!
//! 聊天服务消费的统一接口：`start / send / stop / link_ready / name`。
//! 实现按标签分发（避免跨角色的动态分发）：
//!
//! - [`Transport::Loopback`]：进程内回环，测试/开发用
//! - [`Transport::Ble`]：BlueZ GATT，内部再按 central / peripheral 分角色
//!
//! `send` 的入参是单个链路帧（一次 BLE 写的大小），调用方负责先分片。

pub mod loopback;

use std::sync::Arc;

use crate::ble::peers::PeerInfo;
use crate::ble::{BleConfig, BleTransport};
use crate::config::{Config, TransportKind};
use loopback::LoopbackTransport;

/// 接收回调：每收到一个链路帧调用一次，来自传输内部任务
pub type OnFrame = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// 启动参数
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// 每片帧预算（头 + 负载）；0 = 不限制
    pub mtu_payload: usize,
}

/// 角色无关的传输句柄
pub enum Transport {
    Loopback(LoopbackTransport),
    Ble(BleTransport),
}

impl Transport {
    /// 按进程配置选择实现
    pub fn from_config(cfg: &Config) -> Self {
        match cfg.transport {
            TransportKind::Loopback => Transport::Loopback(LoopbackTransport::new()),
            TransportKind::Bluez => Transport::Ble(BleTransport::new(BleConfig::from_config(cfg))),
        }
    }

    /// 启动；重复 start（未经 stop）是幂等 no-op
    pub async fn start(&self, settings: Settings, on_frame: OnFrame) -> anyhow::Result<()> {
        match self {
            Transport::Loopback(t) => t.start(settings, on_frame),
            Transport::Ble(t) => t.start(settings, on_frame).await,
        }
    }

    /// 发送一帧；未启动、链路未就绪或超过 MTU 时返回 false
    pub async fn send(&self, frame: &[u8]) -> bool {
        match self {
            Transport::Loopback(t) => t.send(frame),
            Transport::Ble(t) => t.send(frame).await,
        }
    }

    pub async fn stop(&self) {
        match self {
            Transport::Loopback(t) => t.stop(),
            Transport::Ble(t) => t.stop().await,
        }
    }

    pub fn link_ready(&self) -> bool {
        match self {
            Transport::Loopback(t) => t.link_ready(),
            Transport::Ble(t) => t.link_ready(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Loopback(_) => "loopback",
            Transport::Ble(_) => "bluez",
        }
    }

    /// 切换对端（仅 central 有意义；None = 断开并清空目标）
    pub async fn handover_to(&self, peer: Option<String>) -> bool {
        match self {
            Transport::Loopback(_) => false,
            Transport::Ble(t) => t.handover_to(peer).await,
        }
    }

    /// 附近节点快照（仅 central 非空）
    pub fn peers(&self, keep_zero_rssi: bool) -> Vec<PeerInfo> {
        match self {
            Transport::Loopback(_) => Vec::new(),
            Transport::Ble(t) => t.peers(keep_zero_rssi),
        }
    }
}
