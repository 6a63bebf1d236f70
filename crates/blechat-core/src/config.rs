//! 进程配置
//!
//! 全部来自环境变量（无持久化配置文件）：
//!
//! | 变量            | 含义                                             |
//! | --------------- | ------------------------------------------------ |
//! | `TRANSPORT`     | `loopback`（默认）或 `bluez`                     |
//! | `ROLE`          | `central` / `peripheral`（默认 peripheral）      |
//! | `ADAPTER`       | BLE 适配器名（默认 `hci0`）                      |
//! | `PEER`          | 目标 MAC，大小写不敏感，规范化为大写             |
//! | `PSK`           | 32 字节密钥（64 hex 或标准 Base64），缺省则明文  |
//! | `MTU_PAYLOAD`   | 每片帧预算，`[20, 244]`，非法则警告并保持 100    |
//! | `USER_ID`       | HELLO 携带的用户 ID，超 64 字节截断              |
//! | `LOG_LEVEL`     | `DEBUG/INFO/WARN/ERROR/SYSTEM`                   |
//! | `CTL_SOCK`      | 控制套接字路径，`~/` 按 `HOME` 展开              |
//! | `KEEP_ZERO_RSSI`| `1` 时列出 RSSI 未知的节点                       |
//! | `CTRL_HELLO`    | `0` 关闭 BLE 的 HELLO；loopback 默认关闭         |

use std::path::PathBuf;
use std::str::FromStr;

use crate::logging::LogLevel;

/// 默认每片帧预算（12 字节头 + 88 字节负载）
pub const DEFAULT_MTU_PAYLOAD: usize = 100;
pub const MTU_MIN: usize = 20;
pub const MTU_MAX: usize = 244;

/// BLE 角色，启动时选定，进程生命周期内不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Central => "central",
            Role::Peripheral => "peripheral",
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "central" => Ok(Role::Central),
            "peripheral" => Ok(Role::Peripheral),
            _ => Err(()),
        }
    }
}

/// 传输实现选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Loopback,
    Bluez,
}

/// 汇总后的进程配置
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub role: Role,
    pub adapter: String,
    pub peer: Option<String>,
    pub mtu_payload: usize,
    pub user_id: String,
    pub log_level: LogLevel,
    pub ctl_sock: PathBuf,
    pub keep_zero_rssi: bool,
    /// None = 按传输类型取默认（bluez 开、loopback 关）
    pub ctrl_hello: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Loopback,
            role: Role::Peripheral,
            adapter: "hci0".to_string(),
            peer: None,
            mtu_payload: DEFAULT_MTU_PAYLOAD,
            user_id: String::new(),
            log_level: LogLevel::Info,
            ctl_sock: default_ctl_sock(),
            keep_zero_rssi: false,
            ctrl_hello: None,
        }
    }
}

impl Config {
    /// 读取环境变量并汇总
    ///
    /// 非法值一律记警告后退回默认，不让进程因配置小错起不来
    /// （PSK 例外：由 AEAD 引擎单独处理）。
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("TRANSPORT") {
            match v.to_ascii_lowercase().as_str() {
                "loopback" => cfg.transport = TransportKind::Loopback,
                "bluez" => cfg.transport = TransportKind::Bluez,
                other => log::warn!("unknown TRANSPORT '{}', keeping loopback", other),
            }
        }

        if let Ok(v) = std::env::var("ROLE") {
            match v.parse() {
                Ok(role) => cfg.role = role,
                Err(_) => log::warn!("unknown ROLE '{}', keeping peripheral", v),
            }
        }

        if let Ok(v) = std::env::var("ADAPTER") {
            if !v.is_empty() {
                cfg.adapter = v;
            }
        }

        if let Ok(v) = std::env::var("PEER") {
            match normalize_mac(&v) {
                Some(mac) => cfg.peer = Some(mac),
                None => {
                    if !v.is_empty() {
                        log::warn!("PEER '{}' is not a valid MAC, ignoring", v);
                    }
                }
            }
        }

        if let Ok(v) = std::env::var("MTU_PAYLOAD") {
            match parse_mtu(&v) {
                Some(mtu) => cfg.mtu_payload = mtu,
                None => log::warn!(
                    "MTU_PAYLOAD '{}' out of range [{}, {}], keeping {}",
                    v,
                    MTU_MIN,
                    MTU_MAX,
                    DEFAULT_MTU_PAYLOAD
                ),
            }
        }

        if let Ok(v) = std::env::var("USER_ID") {
            cfg.user_id = truncate_utf8(&v, 64);
        }

        if let Ok(v) = std::env::var("LOG_LEVEL") {
            match v.parse() {
                Ok(level) => cfg.log_level = level,
                Err(_) => log::warn!("unknown LOG_LEVEL '{}', keeping INFO", v),
            }
        }

        if let Ok(v) = std::env::var("CTL_SOCK") {
            if !v.is_empty() {
                cfg.ctl_sock = expand_user(&v);
            }
        }

        cfg.keep_zero_rssi = std::env::var("KEEP_ZERO_RSSI").as_deref() == Ok("1");

        if let Ok(v) = std::env::var("CTRL_HELLO") {
            cfg.ctrl_hello = Some(v != "0");
        }

        cfg
    }

    /// HELLO 是否启用：显式设置优先，否则只有 bluez 开
    pub fn hello_enabled(&self) -> bool {
        self.ctrl_hello
            .unwrap_or(self.transport == TransportKind::Bluez)
    }
}

/// 默认控制套接字：`~/.cache/blechat/ctl.sock`
pub fn default_ctl_sock() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("blechat")
        .join("ctl.sock")
}

/// 展开路径开头的 `~` / `~/`（按 `HOME`）
pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if !home.is_empty() {
                if path == "~" {
                    return PathBuf::from(home);
                }
                return PathBuf::from(home).join(&path[2..]);
            }
        }
    }
    PathBuf::from(path)
}

/// 校验并规范化 MAC 为大写冒号形式
pub fn normalize_mac(raw: &str) -> Option<String> {
    let s = raw.trim();
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    for p in &parts {
        if p.len() != 2 || !p.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
    }
    Some(s.to_ascii_uppercase())
}

fn parse_mtu(raw: &str) -> Option<usize> {
    let v: usize = raw.trim().parse().ok()?;
    (MTU_MIN..=MTU_MAX).contains(&v).then_some(v)
}

/// 按 UTF-8 边界截断到最多 `max` 字节
fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("aa:bb:cc:dd:ee:ff"),
            Some("AA:BB:CC:DD:EE:FF".to_string())
        );
        assert_eq!(
            normalize_mac(" AA:BB:CC:DD:EE:0F "),
            Some("AA:BB:CC:DD:EE:0F".to_string())
        );
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
        assert_eq!(normalize_mac("aabbccddeeff"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:fg"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:f"), None);
    }

    #[test]
    fn test_parse_mtu_bounds() {
        assert_eq!(parse_mtu("20"), Some(20));
        assert_eq!(parse_mtu("244"), Some(244));
        assert_eq!(parse_mtu("100"), Some(100));
        assert_eq!(parse_mtu("19"), None);
        assert_eq!(parse_mtu("245"), None);
        assert_eq!(parse_mtu("abc"), None);
        assert_eq!(parse_mtu("-1"), None);
    }

    #[test]
    fn test_truncate_utf8_respects_boundaries() {
        assert_eq!(truncate_utf8("short", 64), "short");
        let s = "ab你好"; // '你' 在字节 2..5
        assert_eq!(truncate_utf8(s, 4), "ab");
        assert_eq!(truncate_utf8(s, 5), "ab你");
    }

    #[test]
    fn test_expand_user() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_user("~/x.sock"), PathBuf::from("/home/tester/x.sock"));
        assert_eq!(expand_user("~"), PathBuf::from("/home/tester"));
        assert_eq!(expand_user("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_user("rel/~path"), PathBuf::from("rel/~path"));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Central".parse(), Ok(Role::Central));
        assert_eq!("PERIPHERAL".parse(), Ok(Role::Peripheral));
        assert!("observer".parse::<Role>().is_err());
    }

    #[test]
    fn test_hello_default_by_transport() {
        let mut cfg = Config::default();
        assert!(!cfg.hello_enabled());
        cfg.transport = TransportKind::Bluez;
        assert!(cfg.hello_enabled());
        cfg.ctrl_hello = Some(false);
        assert!(!cfg.hello_enabled());
        cfg.transport = TransportKind::Loopback;
        cfg.ctrl_hello = Some(true);
        assert!(cfg.hello_enabled());
    }
}
