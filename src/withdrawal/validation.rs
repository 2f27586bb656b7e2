//! Pure request validation for the withdrawal boundary.
//!
//! Everything here runs before any ledger mutation; a rejected request
//! has no side effects. Funds and daily-limit checks live inside the
//! reservation transaction, not here, so they read under the row lock.

use alloy::primitives::Address;

use crate::config::WithdrawalConfig;
use crate::withdrawal::types::{NewWithdrawal, WithdrawalError};

/// Validate a request against configured bounds, returning the parsed
/// destination address.
pub fn validate(
    request: &NewWithdrawal,
    config: &WithdrawalConfig,
) -> Result<Address, WithdrawalError> {
    if request.amount <= 0 {
        return Err(WithdrawalError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    if request.amount < config.min_amount {
        return Err(WithdrawalError::Validation(format!(
            "amount {} below minimum {}",
            request.amount, config.min_amount
        )));
    }
    if request.amount > config.max_amount {
        return Err(WithdrawalError::Validation(format!(
            "amount {} above maximum {}",
            request.amount, config.max_amount
        )));
    }
    if request.network != config.network {
        return Err(WithdrawalError::Validation(format!(
            "unsupported network '{}', expected '{}'",
            request.network, config.network
        )));
    }

    request
        .to_address
        .parse::<Address>()
        .map_err(|e| WithdrawalError::Validation(format!("invalid destination address: {}", e)))
}
