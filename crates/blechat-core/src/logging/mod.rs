//! 日志模块
//!
//! 提供统一的日志级别定义和初始化入口。
//!
//! 级别在 `log` 的四级之外增加了 `System`：链路里程碑事件
//! （广播注册、设备连接、密钥协商完成等）走独立的 `system` target，
//! 无论全局级别如何都会输出；`LOG_LEVEL=SYSTEM` 时只输出这些事件。

use std::fmt;

/// `system` target 名，供 [`log_system!`] 与过滤器共用。
pub const SYSTEM_TARGET: &str = "system";

/// 日志级别
///
/// 实现了 `FromStr` 以便从 `LOG_LEVEL` 环境变量解析（大小写不敏感）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    System = 4,
}

impl LogLevel {
    /// 获取显示名称
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::System => "SYSTEM",
        }
    }

    /// 映射到 `log` 的全局过滤级别
    ///
    /// `System` 关闭普通日志，仅保留 `system` target（由 [`init`] 单独放行）。
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::System => log::LevelFilter::Off,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "SYSTEM" => Ok(LogLevel::System),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 里程碑事件日志
///
/// 经 `system` target 以 info 级别输出，不受 `LOG_LEVEL` 降级影响。
#[macro_export]
macro_rules! log_system {
    ($($arg:tt)*) => {
        log::info!(target: $crate::logging::SYSTEM_TARGET, $($arg)*)
    };
}

/// 按配置初始化 env_logger
///
/// 由二进制入口调用一次；重复调用会被 env_logger 拒绝，忽略即可。
pub fn init(level: LogLevel) {
    let _ = env_logger::Builder::new()
        .filter_level(level.to_filter())
        .filter_module(SYSTEM_TARGET, log::LevelFilter::Info)
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("System".parse::<LogLevel>(), Ok(LogLevel::System));
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_system_turns_off_regular_logs() {
        assert_eq!(LogLevel::System.to_filter(), log::LevelFilter::Off);
        assert_eq!(LogLevel::Warn.to_filter(), log::LevelFilter::Warn);
    }
}
