//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits ordered)
//! - Check addresses parse for the configured chain
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WalletConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::WalletConfig;

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &WalletConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.chain.rpc_url.parse::<url::Url>().is_err() {
        errors.push(err("chain.rpc_url", "not a valid URL"));
    }
    for (i, u) in config.chain.failover_urls.iter().enumerate() {
        if u.parse::<url::Url>().is_err() {
            errors.push(err(
                &format!("chain.failover_urls[{}]", i),
                "not a valid URL",
            ));
        }
    }
    if config.chain.rpc_timeout_secs == 0 {
        errors.push(err("chain.rpc_timeout_secs", "must be greater than zero"));
    }
    if config.chain.gas_price_multiplier < 1.0 {
        errors.push(err(
            "chain.gas_price_multiplier",
            "must be at least 1.0",
        ));
    }

    if config.withdrawal.network.is_empty() {
        errors.push(err("withdrawal.network", "must not be empty"));
    }
    if config.withdrawal.min_amount <= 0 {
        errors.push(err("withdrawal.min_amount", "must be greater than zero"));
    }
    if config.withdrawal.max_amount < config.withdrawal.min_amount {
        errors.push(err(
            "withdrawal.max_amount",
            "must be at least withdrawal.min_amount",
        ));
    }
    if config.withdrawal.fee < 0 {
        errors.push(err("withdrawal.fee", "must not be negative"));
    }
    if config.withdrawal.daily_limit <= 0 {
        errors.push(err("withdrawal.daily_limit", "must be greater than zero"));
    }
    if config.withdrawal.queue_depth == 0 {
        errors.push(err("withdrawal.queue_depth", "must be greater than zero"));
    }
    if config.withdrawal.pending_timeout_secs == 0 {
        errors.push(err(
            "withdrawal.pending_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.consolidation.enabled {
        if config.consolidation.treasury_address.is_empty() {
            errors.push(err(
                "consolidation.treasury_address",
                "required when consolidation is enabled",
            ));
        } else if config
            .consolidation
            .treasury_address
            .parse::<alloy::primitives::Address>()
            .is_err()
        {
            errors.push(err(
                "consolidation.treasury_address",
                "not a valid address",
            ));
        }
        if config.consolidation.min_sweep <= 0 {
            errors.push(err(
                "consolidation.min_sweep",
                "must be greater than zero",
            ));
        }
        if config.consolidation.fee_reserve < 0 {
            errors.push(err(
                "consolidation.fee_reserve",
                "must not be negative",
            ));
        }
    }

    if config.custody.cache_ttl_secs == 0 {
        errors.push(err("custody.cache_ttl_secs", "must be greater than zero"));
    }
    if config.custody.cache_max_entries == 0 {
        errors.push(err(
            "custody.cache_max_entries",
            "must be greater than zero",
        ));
    }
    if config.custody.secrets_path.is_empty() {
        errors.push(err("custody.secrets_path", "must not be empty"));
    }

    if config.database.max_connections == 0 {
        errors.push(err("database.max_connections", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
