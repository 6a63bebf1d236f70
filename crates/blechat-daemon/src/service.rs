//! 控制命令的解析与执行
//!
//! 命令集（ASCII 单行）：
//!
//! | 命令             | 动作                                   |
//! | ---------------- | -------------------------------------- |
//! | `SEND <text>`    | 发送一条文本                           |
//! | `TAIL on\|off`   | 开关接收输出                           |
//! | `PEERS`          | 列出附近节点（走 system 日志）         |
//! | `CONNECT <MAC>`  | 切换对端；空地址 = 断开并清空目标      |
//! | `DISCONNECT`     | 断开并清空目标                         |
//! | `QUIT`           | 停止守护进程                           |

use blechat_core::config::normalize_mac;
use blechat_core::{log_system, ChatService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Tail(bool),
    Peers,
    /// None = 空地址（断开并清空目标）
    Connect(Option<String>),
    Disconnect,
    Quit,
}

/// 解析一行命令；不认识的返回 None
pub fn parse_line(line: &str) -> Option<Command> {
    if let Some(text) = line.strip_prefix("SEND ") {
        return Some(Command::Send(text.to_string()));
    }
    match line {
        "TAIL on" => return Some(Command::Tail(true)),
        "TAIL off" => return Some(Command::Tail(false)),
        "PEERS" => return Some(Command::Peers),
        "DISCONNECT" => return Some(Command::Disconnect),
        "QUIT" => return Some(Command::Quit),
        "CONNECT" => return Some(Command::Connect(None)),
        _ => {}
    }
    if let Some(addr) = line.strip_prefix("CONNECT ") {
        let addr = addr.trim();
        return Some(if addr.is_empty() {
            Command::Connect(None)
        } else {
            Command::Connect(Some(addr.to_string()))
        });
    }
    None
}

/// 执行一条命令；返回 false 表示该退出（QUIT）
pub async fn handle_line(chat: &ChatService, keep_zero_rssi: bool, line: &str) -> bool {
    let Some(cmd) = parse_line(line) else {
        log::warn!("unknown control command: {:?}", line);
        return true;
    };

    match cmd {
        Command::Send(text) => {
            if !chat.send_text(&text).await {
                log::error!("SEND failed (link not ready?)");
            }
        }
        Command::Tail(on) => {
            chat.set_tail(on);
            log::info!("TAIL {}", if on { "enabled" } else { "disabled" });
        }
        Command::Peers => {
            let peers = chat.peers(keep_zero_rssi);
            log_system!("PEERS: {} candidate(s)", peers.len());
            for p in peers {
                if p.rssi != 0 {
                    log_system!("  {} rssi={} age={}ms", p.address, p.rssi, p.age_ms);
                } else {
                    log_system!("  {} rssi=? age={}ms", p.address, p.age_ms);
                }
            }
        }
        Command::Connect(Some(raw)) => match normalize_mac(&raw) {
            Some(mac) => {
                if !chat.handover_to(Some(mac)).await {
                    log::warn!("CONNECT rejected (central role only)");
                }
            }
            None => log::warn!("CONNECT: '{}' is not a valid MAC", raw),
        },
        Command::Connect(None) | Command::Disconnect => {
            if !chat.handover_to(None).await {
                log::warn!("DISCONNECT rejected (central role only)");
            }
        }
        Command::Quit => {
            log::info!("received QUIT, shutting down");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_keeps_payload_verbatim() {
        assert_eq!(
            parse_line("SEND hello world  "),
            Some(Command::Send("hello world  ".into()))
        );
        // 裸 SEND 不是合法命令
        assert_eq!(parse_line("SEND"), None);
    }

    #[test]
    fn test_parse_tail() {
        assert_eq!(parse_line("TAIL on"), Some(Command::Tail(true)));
        assert_eq!(parse_line("TAIL off"), Some(Command::Tail(false)));
        assert_eq!(parse_line("TAIL maybe"), None);
    }

    #[test]
    fn test_parse_connect_variants() {
        assert_eq!(
            parse_line("CONNECT AA:BB:CC:DD:EE:FF"),
            Some(Command::Connect(Some("AA:BB:CC:DD:EE:FF".into())))
        );
        assert_eq!(parse_line("CONNECT"), Some(Command::Connect(None)));
        assert_eq!(parse_line("CONNECT   "), Some(Command::Connect(None)));
        assert_eq!(parse_line("DISCONNECT"), Some(Command::Disconnect));
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse_line("PEERS"), Some(Command::Peers));
        assert_eq!(parse_line("QUIT"), Some(Command::Quit));
        assert_eq!(parse_line("peers"), None); // 大小写敏感
        assert_eq!(parse_line(""), None);
    }
}
