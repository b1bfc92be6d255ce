//! 日志初始化
//!
//! 所有模块都通过 `tracing` 宏记录结构化日志；二进制入口或测试在启动时调用
//! [`init_tracing`] 安装订阅者。

use tracing_subscriber::{EnvFilter, fmt};

/// 安装全局 `fmt` 订阅者。
///
/// 优先使用 `RUST_LOG`，否则回退到 `default_level`（例如 `"info"` 或
/// `"seal_chat=debug"`）。重复调用是安全的：已安装订阅者时返回 `false`。
pub fn init_tracing(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}
