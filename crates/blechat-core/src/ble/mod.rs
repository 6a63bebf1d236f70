//! BLE GATT 传输（经 BlueZ D-Bus）
//!
//! 角色在启动时选定、进程生命周期内固定：
//!
//! - [`peripheral`]：导出 GATT 服务 + LE 广播，经 notify 发、经 write 收
//! - [`central`]：扫描 / 连接 / 解析服务 / 订阅 notify，经 write 发
//!
//! 对象管理器和属性信号的底层协议由 bluer 承担；本模块只负责
//! 角色状态机本身（采纳、连接退避、订阅、节点缓存、对端切换）。

pub mod central;
pub mod peers;
pub mod peripheral;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{Config, Role};
use crate::transport::{OnFrame, Settings};
use central::CentralEngine;
use peers::PeerInfo;
use peripheral::PeripheralEngine;

/// 主服务 UUID（固定）
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x7e0f8f20_cc0b_4c6e_8a3e_5d21b2f8a9c4);
/// TX 特征：peripheral -> central，notify
pub const TX_CHAR_UUID: Uuid = Uuid::from_u128(0x7e0f8f21_cc0b_4c6e_8a3e_5d21b2f8a9c4);
/// RX 特征：central -> peripheral，write（带响应）
pub const RX_CHAR_UUID: Uuid = Uuid::from_u128(0x7e0f8f22_cc0b_4c6e_8a3e_5d21b2f8a9c4);

/// 每次成功写后的片间停顿（central 发送路径）
pub const TX_PAUSE: Duration = Duration::from_millis(100);

/// 角色配置
#[derive(Debug, Clone)]
pub struct BleConfig {
    pub role: Role,
    pub adapter: String,
    pub service_uuid: Uuid,
    pub tx_uuid: Uuid,
    pub rx_uuid: Uuid,
    /// 目标 MAC（大写冒号形式）；central 可不配，采纳首个同服务设备
    pub peer: Option<String>,
    /// 广播里的 LocalName（peripheral）
    pub local_name: String,
}

impl BleConfig {
    /// 从进程配置构建，UUID 取固定值
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            role: cfg.role,
            adapter: cfg.adapter.clone(),
            service_uuid: SERVICE_UUID,
            tx_uuid: TX_CHAR_UUID,
            rx_uuid: RX_CHAR_UUID,
            peer: cfg.peer.clone(),
            local_name: default_local_name(),
        }
    }
}

fn default_local_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "blechat".to_string())
}

enum RoleEngine {
    Central(Arc<CentralEngine>),
    Peripheral(Arc<PeripheralEngine>),
}

/// BLE 传输句柄（角色标签分发）
pub struct BleTransport {
    engine: RoleEngine,
}

impl BleTransport {
    pub fn new(cfg: BleConfig) -> Self {
        let engine = match cfg.role {
            Role::Central => RoleEngine::Central(CentralEngine::new(cfg)),
            Role::Peripheral => RoleEngine::Peripheral(PeripheralEngine::new(cfg)),
        };
        Self { engine }
    }

    pub async fn start(&self, settings: Settings, on_frame: OnFrame) -> anyhow::Result<()> {
        match &self.engine {
            RoleEngine::Central(e) => e.start(settings, on_frame).await,
            RoleEngine::Peripheral(e) => e.start(settings, on_frame).await,
        }
    }

    pub async fn send(&self, frame: &[u8]) -> bool {
        match &self.engine {
            RoleEngine::Central(e) => e.send(frame).await,
            RoleEngine::Peripheral(e) => e.send(frame).await,
        }
    }

    pub async fn stop(&self) {
        match &self.engine {
            RoleEngine::Central(e) => e.stop().await,
            RoleEngine::Peripheral(e) => e.stop().await,
        }
    }

    pub fn link_ready(&self) -> bool {
        match &self.engine {
            RoleEngine::Central(e) => e.link_ready(),
            RoleEngine::Peripheral(e) => e.link_ready(),
        }
    }

    pub async fn handover_to(&self, peer: Option<String>) -> bool {
        match &self.engine {
            RoleEngine::Central(e) => e.handover_to(peer),
            RoleEngine::Peripheral(_) => {
                log::warn!("handover is a central-only operation");
                false
            }
        }
    }

    pub fn peers(&self, keep_zero_rssi: bool) -> Vec<PeerInfo> {
        match &self.engine {
            RoleEngine::Central(e) => e.peers(keep_zero_rssi),
            RoleEngine::Peripheral(_) => Vec::new(),
        }
    }
}
