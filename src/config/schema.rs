//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the wallet
//! service. All types derive Serde traits for deserialization from config
//! files. Secrets (master password, database URL, provider API keys) are
//! read from environment variables, never from the config file.

use serde::{Deserialize, Serialize};

/// Environment variable holding the Postgres connection URL.
pub const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";

/// Environment variable holding the custody master password.
pub const MASTER_PASSWORD_ENV_VAR: &str = "HOTWALLET_MASTER_PASSWORD";

/// Environment variable holding the subscription provider API key.
pub const SUBSCRIPTION_API_KEY_ENV_VAR: &str = "HOTWALLET_SUBSCRIPTION_API_KEY";

/// Root configuration for the wallet service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WalletConfig {
    /// Database pool settings.
    pub database: DatabaseConfig,

    /// Key custody settings (secrets file, cache, audit log).
    pub custody: CustodyConfig,

    /// Blockchain RPC settings.
    pub chain: ChainConfig,

    /// Withdrawal limits and execution settings.
    pub withdrawal: WithdrawalConfig,

    /// Deposit-address consolidation settings.
    pub consolidation: ConsolidationConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Database pool configuration. The connection URL itself comes from
/// `DATABASE_URL`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum pool connections.
    pub max_connections: u32,

    /// Connection acquire timeout in seconds.
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Key custody configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Path to the encrypted secrets file.
    pub secrets_path: String,

    /// Path to the append-only access log (JSON lines).
    pub audit_log_path: String,

    /// Decrypted-secret cache TTL in seconds.
    pub cache_ttl_secs: u64,

    /// Maximum number of cached secrets before eviction.
    pub cache_max_entries: usize,

    /// Number of audit entries buffered before a flush.
    pub audit_batch_size: usize,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            secrets_path: "secrets.json".to_string(),
            audit_log_path: "secret_access.log".to_string(),
            cache_ttl_secs: 300,
            cache_max_entries: 64,
            audit_batch_size: 16,
        }
    }
}

/// Blockchain RPC configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of block confirmations required for finality.
    pub confirmation_blocks: u32,

    /// Gas price multiplier (1.0 = estimated, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// Base URL of the provider's address-subscription REST API.
    /// Empty disables subscription registration.
    pub subscription_url: String,

    /// Callback URL handed to the provider when subscribing an address.
    pub deposit_callback_url: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            confirmation_blocks: 3,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 500,
            subscription_url: String::new(),
            deposit_callback_url: String::new(),
        }
    }
}

/// Withdrawal limits and execution configuration. All amounts are in the
/// asset's base unit.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WithdrawalConfig {
    /// Network label requests must carry (e.g., "mainnet", "sepolia").
    pub network: String,

    /// Minimum withdrawal amount.
    pub min_amount: i64,

    /// Maximum single withdrawal amount.
    pub max_amount: i64,

    /// Flat fee charged per withdrawal.
    pub fee: i64,

    /// Cumulative pending+completed amount allowed per account per
    /// calendar day.
    pub daily_limit: i64,

    /// Execution queue depth (backpressure bound).
    pub queue_depth: usize,

    /// Age after which an unbroadcast pending request is rolled back.
    pub pending_timeout_secs: u64,

    /// Reconciliation sweep interval in seconds.
    pub reconcile_interval_secs: u64,

    /// Maximum retry attempts on an account row-lock conflict.
    pub lock_retry_attempts: u32,

    /// Base delay for lock-conflict backoff in milliseconds.
    pub lock_retry_base_ms: u64,

    /// Maximum delay for lock-conflict backoff in milliseconds.
    pub lock_retry_max_ms: u64,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            min_amount: 1,
            max_amount: 1_000_000_000,
            fee: 0,
            daily_limit: 50_000,
            queue_depth: 256,
            pending_timeout_secs: 900,
            reconcile_interval_secs: 60,
            lock_retry_attempts: 3,
            lock_retry_base_ms: 50,
            lock_retry_max_ms: 1000,
        }
    }
}

/// Consolidation (deposit-address sweep) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Enable the scheduled sweep loop.
    pub enabled: bool,

    /// Sweep interval in seconds.
    pub interval_secs: u64,

    /// Minimum on-chain balance for an address to be swept.
    pub min_sweep: i64,

    /// Amount left behind to cover the transfer's network fee.
    pub fee_reserve: i64,

    /// Delay between consecutive sweep broadcasts in milliseconds.
    pub broadcast_delay_ms: u64,

    /// Treasury address sweeps are sent to.
    pub treasury_address: String,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
            min_sweep: 1000,
            fee_reserve: 100,
            broadcast_delay_ms: 500,
            treasury_address: String::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.custody.cache_ttl_secs, 300);
        assert_eq!(config.chain.confirmation_blocks, 3);
        assert_eq!(config.withdrawal.daily_limit, 50_000);
        assert!(!config.consolidation.enabled);
    }

    #[test]
    fn test_minimal_toml() {
        // All fields have defaults, so a sparse config must parse.
        let config: WalletConfig = toml::from_str(
            r#"
            [withdrawal]
            network = "sepolia"
            fee = 5

            [consolidation]
            enabled = true
            treasury_address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
            "#,
        )
        .unwrap();
        assert_eq!(config.withdrawal.network, "sepolia");
        assert_eq!(config.withdrawal.fee, 5);
        assert!(config.consolidation.enabled);
        assert_eq!(config.database.max_connections, 10);
    }
}
