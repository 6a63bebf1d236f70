//! Blechat Daemon
//!
//! 后台守护进程，负责：
//! - 按环境变量装配传输（loopback / bluez central / bluez peripheral）
//! - 持有聊天服务（加密、分片、HELLO 握手）
//! - 通过 Unix Socket 接收控制命令

mod ipc;
mod service;

use std::sync::Arc;

use anyhow::Context;

use blechat_core::chat::PSK_ENV;
use blechat_core::crypto::aead::AeadEngine;
use blechat_core::{logging, ChatService, Config, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    logging::init(cfg.log_level);

    log::info!(
        "blechatd starting: transport={} role={} adapter={} mtu_payload={}",
        match cfg.transport {
            blechat_core::TransportKind::Loopback => "loopback",
            blechat_core::TransportKind::Bluez => "bluez",
        },
        cfg.role.name(),
        cfg.adapter,
        cfg.mtu_payload
    );

    let aead = AeadEngine::from_env(PSK_ENV);
    let psk_present = std::env::var(PSK_ENV)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    if psk_present && !aead.has_psk() {
        anyhow::bail!("PSK is set but not a valid 32-byte key (64 hex chars or standard base64)");
    }

    let transport = Transport::from_config(&cfg);
    let chat = Arc::new(ChatService::new(transport, aead, &cfg));

    chat.start().await.context("transport start failed")?;

    // 控制套接字收到 QUIT 前一直服务
    let result = ipc::run_server(&cfg.ctl_sock, chat.clone(), cfg.keep_zero_rssi).await;

    chat.stop().await;
    log::info!("blechatd exiting");
    result
}
