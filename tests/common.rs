//!
//! 集成测试的通用辅助函数
//!
#![allow(dead_code)]

use seal_chat::authority::CertificateAuthority;
use seal_chat::common::{ConfigFile, CryptoConfig, IdentityPolicy, RelayConfig};
use seal_chat::registry::IdentityRegistry;
use std::sync::Arc;

/// 测试使用 1024 位密钥，加快密钥生成
pub fn test_crypto_config() -> CryptoConfig {
    CryptoConfig {
        rsa_key_bits: 1024,
        confidentiality: true,
    }
}

pub fn test_config() -> ConfigFile {
    ConfigFile {
        crypto: test_crypto_config(),
        ..ConfigFile::default()
    }
}

/// 开启中继拦截的配置，拦截日志只保留少量消息
pub fn interception_config() -> ConfigFile {
    ConfigFile {
        relay: RelayConfig {
            interception_enabled: true,
            intercept_log_limit: 4,
        },
        ..test_config()
    }
}

pub fn setup_registry() -> IdentityRegistry {
    let ca = CertificateAuthority::new(&test_crypto_config(), "Secure Messaging App").unwrap();
    IdentityRegistry::new(Arc::new(ca), test_crypto_config(), IdentityPolicy::default())
}
