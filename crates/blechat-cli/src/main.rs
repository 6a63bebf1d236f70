//! Blechat CLI
//!
//! 命令行客户端，把控制命令送到守护进程的 Unix Socket。
//!
//! 退出码：0 成功；1 守护进程不可达；2 参数错误。

mod client;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use blechat_core::config::{default_ctl_sock, expand_user};

const EXIT_NO_SERVER: u8 = 1;
const EXIT_BAD_ARGS: u8 = 2;

#[derive(Parser)]
#[command(name = "blechatctl", version, about = "blechat 控制客户端")]
struct Cli {
    /// 控制套接字路径（默认取 CTL_SOCK 或 ~/.cache/blechat/ctl.sock）
    #[arg(long)]
    sock: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 发送一条文本
    Send {
        /// 文本内容（多个参数以空格拼接）
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// 开关接收输出
    Tail { state: TailState },
    /// 列出附近节点（输出在守护进程日志）
    Peers,
    /// 切换对端；不带地址 = 断开并清空目标
    Connect {
        /// 目标 MAC（AA:BB:CC:DD:EE:FF）
        address: Option<String>,
    },
    /// 断开并清空目标
    Disconnect,
    /// 停止守护进程
    Quit,
}

#[derive(Clone, Copy, ValueEnum)]
enum TailState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let sock: PathBuf = match &cli.sock {
        Some(p) => expand_user(p),
        None => match std::env::var("CTL_SOCK") {
            Ok(p) if !p.is_empty() => expand_user(&p),
            _ => default_ctl_sock(),
        },
    };

    let line = match build_line(&cli.command) {
        Ok(l) => l,
        Err(msg) => {
            eprintln!("error: {}", msg);
            return ExitCode::from(EXIT_BAD_ARGS);
        }
    };

    match client::send_line(&sock, &line).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_NO_SERVER)
        }
    }
}

fn build_line(cmd: &Commands) -> Result<String, String> {
    let line = match cmd {
        Commands::Send { text } => {
            let joined = text.join(" ");
            if joined.is_empty() {
                return Err("empty message".into());
            }
            if joined.contains('\n') {
                return Err("message must not contain newlines".into());
            }
            format!("SEND {}", joined)
        }
        Commands::Tail { state } => match state {
            TailState::On => "TAIL on".to_string(),
            TailState::Off => "TAIL off".to_string(),
        },
        Commands::Peers => "PEERS".to_string(),
        Commands::Connect { address } => match address {
            Some(addr) => format!("CONNECT {}", addr),
            None => "CONNECT".to_string(),
        },
        Commands::Disconnect => "DISCONNECT".to_string(),
        Commands::Quit => "QUIT".to_string(),
    };
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_line_send_joins_args() {
        let cmd = Commands::Send {
            text: vec!["hello".into(), "world".into()],
        };
        assert_eq!(build_line(&cmd).unwrap(), "SEND hello world");
    }

    #[test]
    fn test_build_line_rejects_newline() {
        let cmd = Commands::Send {
            text: vec!["evil\ninjection".into()],
        };
        assert!(build_line(&cmd).is_err());
    }

    #[test]
    fn test_build_line_connect() {
        let cmd = Commands::Connect {
            address: Some("aa:bb:cc:dd:ee:ff".into()),
        };
        assert_eq!(build_line(&cmd).unwrap(), "CONNECT aa:bb:cc:dd:ee:ff");
        let cmd = Commands::Connect { address: None };
        assert_eq!(build_line(&cmd).unwrap(), "CONNECT");
    }
}
