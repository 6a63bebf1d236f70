//! IPC Client - 与守护进程通信
//!
//! 一次连接送一条以换行结尾的命令，随后立即关闭（协议无响应体，
//! 结果看守护进程日志）。

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

pub async fn send_line(sock: &Path, line: &str) -> Result<()> {
    let mut stream = UnixStream::connect(sock)
        .await
        .with_context(|| format!("cannot reach daemon at {}", sock.display()))?;

    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;
    Ok(())
}
