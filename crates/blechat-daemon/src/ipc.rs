//! IPC Server - Unix Domain Socket 控制面
//!
//! 行式协议：每个连接恰好承载一条以换行结尾的 ASCII 命令，
//! 服务端调用一次处理函数后关闭连接、继续 accept。
//! 收到 `QUIT` 后退出循环并清掉套接字文件。

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use blechat_core::{log_system, ChatService};

use crate::service;

pub async fn run_server(path: &Path, chat: Arc<ChatService>, keep_zero_rssi: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating socket dir {}", parent.display()))?;
    }
    // 上次异常退出可能留下旧文件
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    log_system!("Listening on {}", path.display());

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };
        // 协议是一连接一命令，串行处理即可
        if !handle_client(stream, &chat, keep_zero_rssi).await {
            break;
        }
    }

    let _ = std::fs::remove_file(path);
    Ok(())
}

/// 处理一个连接；返回 false 表示收到 QUIT
async fn handle_client(stream: UnixStream, chat: &ChatService, keep_zero_rssi: bool) -> bool {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => return true, // 空连接
        Ok(_) => {}
        Err(e) => {
            log::warn!("recv failed: {}", e);
            return true;
        }
    }

    let line = line.trim_end_matches(['\n', '\r']);
    log::debug!("ctl line: {:?}", line);
    service::handle_line(chat, keep_zero_rssi, line).await
}
