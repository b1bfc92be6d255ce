//! 通用模块，包含配置、日志与共享的工具函数

pub mod config;
pub mod logging;
pub mod utils;

pub use self::config::{ConfigFile, CryptoConfig, IdentityPolicy, RelayConfig};
pub use self::utils::ZeroizingVec;
