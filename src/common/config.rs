//!
//! # 通用配置模块
//!
//! 包含证书签发、消息认证与会话历史所使用的配置结构。
//! 配置可以从 JSON 文件加载，并由 `SEAL_CHAT_*` 环境变量覆盖。
//!
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// 允许的最小 RSA 模数位数
pub const MIN_RSA_KEY_BITS: usize = 1024;

/// 证书有效期上限（天）
pub const MAX_CERT_VALIDITY_DAYS: u32 = 36_500;

/// 配置来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// 内存默认值
    Default,
    /// 文件
    File,
    /// 环境变量（覆盖在默认值或文件之上）
    Environment,
}

/// 加密配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CryptoConfig {
    /// 每个身份以及 CA 的 RSA 密钥长度
    pub rsa_key_bits: usize,
    /// 认证消息是否同时使用收件人公钥加密载荷
    pub confidentiality: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: 2048,
            confidentiality: true,
        }
    }
}

/// 证书签发策略
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentityPolicy {
    /// 新证书的有效天数
    pub certificate_validity_days: u32,
    /// 写入证书 `issued_by` 字段的签发者标识
    pub issuer_id: String,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            certificate_validity_days: 365,
            issuer_id: "Secure Messaging App".to_string(),
        }
    }
}

impl IdentityPolicy {
    pub fn validity_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.certificate_validity_days as i64)
    }
}

/// 存储配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    /// 会话历史的 JSON Lines 文件；为空时仅保存在内存中
    pub history_path: Option<PathBuf>,
}

/// 中继配置
///
/// 拦截（篡改演示）会让任意会话读取并改写全部流量，默认关闭。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// 是否允许 `set_tampering_mode` / `request_intercept` / `tampered_message`
    pub interception_enabled: bool,
    /// 拦截日志最多保留的消息数，超出时丢弃最旧的
    pub intercept_log_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interception_enabled: false,
            intercept_log_limit: 256,
        }
    }
}

/// 日志配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `RUST_LOG` 未设置时使用的过滤级别
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 完整配置文件
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub identity: IdentityPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// 从 JSON 文件加载配置并校验
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("解析配置文件失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 以默认值为基础，叠加环境变量
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// 使用 `SEAL_CHAT_*` 环境变量覆盖当前配置，返回是否有任何值被覆盖。
    ///
    /// 无法解析的值会被忽略并保留原值。
    pub fn apply_env(&mut self) -> bool {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut changed = false;

        if let Some(bits) = lookup("SEAL_CHAT_RSA_BITS").and_then(|v| v.parse::<usize>().ok()) {
            self.crypto.rsa_key_bits = bits;
            changed = true;
        }
        if let Some(value) = lookup("SEAL_CHAT_CONFIDENTIALITY") {
            match value.to_lowercase().as_str() {
                "true" | "1" => {
                    self.crypto.confidentiality = true;
                    changed = true;
                }
                "false" | "0" => {
                    self.crypto.confidentiality = false;
                    changed = true;
                }
                _ => {}
            }
        }
        if let Some(days) =
            lookup("SEAL_CHAT_CERT_VALIDITY_DAYS").and_then(|v| v.parse::<u32>().ok())
        {
            self.identity.certificate_validity_days = days;
            changed = true;
        }
        if let Some(issuer) = lookup("SEAL_CHAT_ISSUER_ID").filter(|v| !v.is_empty()) {
            self.identity.issuer_id = issuer;
            changed = true;
        }
        if let Some(path) = lookup("SEAL_CHAT_HISTORY_PATH").filter(|v| !v.is_empty()) {
            self.storage.history_path = Some(PathBuf::from(path));
            changed = true;
        }
        if let Some(value) = lookup("SEAL_CHAT_INTERCEPTION") {
            match value.to_lowercase().as_str() {
                "true" | "1" => {
                    self.relay.interception_enabled = true;
                    changed = true;
                }
                "false" | "0" => {
                    self.relay.interception_enabled = false;
                    changed = true;
                }
                _ => {}
            }
        }
        if let Some(level) = lookup("SEAL_CHAT_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.logging.level = level;
            changed = true;
        }

        changed
    }

    /// 从文件加载（若提供）并叠加环境变量，同时返回最终配置的来源
    pub fn load(path: Option<&Path>) -> Result<(Self, ConfigSource), Error> {
        let (mut config, mut source) = match path {
            Some(path) => (Self::from_file(path)?, ConfigSource::File),
            None => (Self::default(), ConfigSource::Default),
        };
        if config.apply_env() {
            source = ConfigSource::Environment;
        }
        config.validate()?;
        Ok((config, source))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.crypto.rsa_key_bits < MIN_RSA_KEY_BITS {
            return Err(Error::Configuration(format!(
                "rsa_key_bits must be at least {}, got {}",
                MIN_RSA_KEY_BITS, self.crypto.rsa_key_bits
            )));
        }
        if self.identity.certificate_validity_days == 0 {
            return Err(Error::Configuration(
                "certificate_validity_days must be positive".to_string(),
            ));
        }
        if self.identity.certificate_validity_days > MAX_CERT_VALIDITY_DAYS {
            return Err(Error::Configuration(format!(
                "certificate_validity_days must be at most {}, got {}",
                MAX_CERT_VALIDITY_DAYS, self.identity.certificate_validity_days
            )));
        }
        if self.identity.issuer_id.is_empty() {
            return Err(Error::Configuration("issuer_id must not be empty".to_string()));
        }
        Ok(())
    }
}
