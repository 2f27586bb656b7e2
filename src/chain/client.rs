//! Blockchain RPC client with timeout, failover, and broadcast support.
//!
//! # Responsibilities
//! - Connect to JSON-RPC endpoint (primary + failovers)
//! - Query chain state (block number, balances, receipts)
//! - Build, sign, and broadcast simple transfers
//! - Register address-activity subscriptions with the provider's REST API

use std::sync::Arc;
use std::time::Duration;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::time::timeout;

use crate::chain::types::{ChainError, ChainResult, TxStatus};
use crate::chain::ChainClient;
use crate::config::schema::{ChainConfig, SUBSCRIPTION_API_KEY_ENV_VAR};

/// Gas units for a plain value transfer.
const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Blockchain RPC client wrapper with failover support.
#[derive(Clone)]
pub struct EvmChainClient {
    /// List of providers (primary + failovers).
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    /// HTTP client for the provider's subscription REST surface.
    http: reqwest::Client,
    /// Configuration.
    config: ChainConfig,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl EvmChainClient {
    /// Create a new chain client.
    pub async fn new(config: ChainConfig) -> ChainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            ChainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(
            Arc::new(ProviderBuilder::new().connect_http(primary_url))
                as Arc<dyn Provider + Send + Sync>,
        );

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url))
                    as Arc<dyn Provider + Send + Sync>);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let http = reqwest::Client::builder()
            .timeout(timeout_duration)
            .build()
            .map_err(|e| ChainError::Rpc(format!("HTTP client init failed: {}", e)))?;

        let client = Self {
            providers,
            http,
            config: config.clone(),
            timeout_duration,
        };

        // Verify chain ID matches configuration
        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    "Chain client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Chain client initialized but chain verification failed"
                );
                // Don't fail initialization - allow graceful degradation
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> ChainResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id != self.config.chain_id {
            return Err(ChainError::Rpc(format!(
                "chain ID mismatch: expected {}, got {}",
                self.config.chain_id, chain_id
            )));
        }
        Ok(())
    }

    /// Get the chain ID from the RPC.
    pub async fn get_chain_id(&self) -> ChainResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_chain_id();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                }
            }
        }
        Err(ChainError::Rpc("All RPC providers failed".to_string()))
    }

    /// Get the latest block number.
    pub async fn get_block_number(&self) -> ChainResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_block_number();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc(
            "All providers failed to get block number".to_string(),
        ))
    }

    /// Get the transaction count (nonce) for an address.
    async fn get_transaction_count(&self, address: Address) -> ChainResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_transaction_count(address);
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc(
            "All providers failed to get transaction count".to_string(),
        ))
    }

    /// Get current gas price in wei.
    async fn get_gas_price(&self) -> ChainResult<u128> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_gas_price();
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc(
            "All providers failed to get gas price".to_string(),
        ))
    }

    /// Pick a gas price, enforcing the configured ceiling and multiplier.
    async fn effective_gas_price(&self) -> ChainResult<u128> {
        let gas_price = self.get_gas_price().await?;
        let gas_price_gwei = gas_price / 1_000_000_000;

        if gas_price_gwei > self.config.max_gas_price_gwei as u128 {
            return Err(ChainError::GasPriceTooHigh {
                current_gwei: gas_price_gwei as u64,
                max_gwei: self.config.max_gas_price_gwei,
            });
        }

        Ok((gas_price as f64 * self.config.gas_price_multiplier) as u128)
    }

    /// Check if the blockchain is reachable.
    pub async fn is_healthy(&self) -> bool {
        self.get_block_number().await.is_ok()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn get_balance(&self, address: Address) -> ChainResult<U256> {
        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.get_balance(address);
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(ChainError::Rpc(
            "All providers failed to get balance".to_string(),
        ))
    }

    async fn send_asset(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        amount: U256,
    ) -> ChainResult<TxHash> {
        let nonce = self.get_transaction_count(signer.address()).await?;
        let gas_price = self.effective_gas_price().await?;

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_value(amount)
            .with_nonce(nonce)
            .with_gas_price(gas_price)
            .with_chain_id(self.config.chain_id)
            .with_gas_limit(TRANSFER_GAS_LIMIT);

        let wallet = EthereumWallet::from(signer.clone());
        let envelope = tx
            .build(&wallet)
            .await
            .map_err(|e| ChainError::Broadcast(format!("signing failed: {}", e)))?;
        let encoded = envelope.encoded_2718();

        for (i, provider) in self.providers.iter().enumerate() {
            let fut = provider.send_raw_transaction(&encoded);
            match timeout(self.timeout_duration, fut).await {
                Ok(Ok(pending)) => {
                    let tx_hash = *pending.tx_hash();
                    tracing::info!(
                        tx_hash = %tx_hash,
                        to = %to,
                        amount = %amount,
                        "transaction broadcast"
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "broadcast error, trying next provider")
                }
                Err(_) => tracing::warn!(provider_idx = i, "broadcast timeout"),
            }
        }
        Err(ChainError::Broadcast(
            "All providers failed to broadcast".to_string(),
        ))
    }

    async fn get_transaction_status(&self, tx_hash: TxHash) -> ChainResult<TxStatus> {
        let receipt = {
            let mut found = None;
            let mut failed = 0usize;
            for (i, provider) in self.providers.iter().enumerate() {
                let fut = provider.get_transaction_receipt(tx_hash);
                match timeout(self.timeout_duration, fut).await {
                    Ok(Ok(result)) => {
                        found = Some(result);
                        break;
                    }
                    Ok(Err(e)) => {
                        failed += 1;
                        tracing::warn!(provider_idx = i, error = %e, "RPC error")
                    }
                    Err(_) => {
                        failed += 1;
                        tracing::warn!(provider_idx = i, "RPC timeout")
                    }
                }
            }
            match found {
                Some(r) => r,
                None if failed == self.providers.len() => {
                    return Err(ChainError::Rpc(
                        "All providers failed to get receipt".to_string(),
                    ))
                }
                None => None,
            }
        };

        let receipt = match receipt {
            Some(r) => r,
            None => return Ok(TxStatus::Pending),
        };

        if !receipt.status() {
            return Ok(TxStatus::Failed("transaction reverted".to_string()));
        }

        let current_block = self.get_block_number().await?;
        let tx_block = receipt.block_number.unwrap_or(current_block);
        let confirmations = current_block.saturating_sub(tx_block) as u32;

        if confirmations >= self.config.confirmation_blocks {
            Ok(TxStatus::Confirmed {
                block_number: tx_block,
            })
        } else {
            Ok(TxStatus::Confirming {
                current: confirmations,
                required: self.config.confirmation_blocks,
            })
        }
    }

    async fn subscribe(&self, address: Address, callback_url: &str) -> ChainResult<String> {
        if self.config.subscription_url.is_empty() {
            return Err(ChainError::NotAvailable(
                "subscription endpoint not configured".to_string(),
            ));
        }

        let mut request = self.http.post(&self.config.subscription_url).json(
            &serde_json::json!({
                "type": "ADDRESS_TRANSACTION",
                "attr": {
                    "address": address.to_string(),
                    "chain": self.config.chain_id,
                    "url": callback_url,
                }
            }),
        );
        if let Ok(api_key) = std::env::var(SUBSCRIPTION_API_KEY_ENV_VAR) {
            request = request.header("x-api-key", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChainError::Subscription(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Subscription(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::Subscription(e.to_string()))?;

        body.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ChainError::Subscription("provider response missing subscription id".to_string())
            })
    }
}

impl std::fmt::Debug for EvmChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmChainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ChainConfig {
        ChainConfig {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 31337, // Anvil default
            rpc_timeout_secs: 5,
            confirmation_blocks: 1,
            gas_price_multiplier: 1.0,
            max_gas_price_gwei: 100,
            subscription_url: String::new(),
            deposit_callback_url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        // Client creation should succeed even if the RPC is unreachable.
        let config = test_config();
        let result = EvmChainClient::new(config).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rpc_failover_exhaustion() {
        let mut config = test_config();
        config.failover_urls.push("http://invalid:8545".to_string());

        let client = EvmChainClient::new(config).await.unwrap();

        let result = client.get_chain_id().await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("All RPC providers failed"));
    }

    #[tokio::test]
    async fn test_subscribe_requires_endpoint() {
        let client = EvmChainClient::new(test_config()).await.unwrap();
        let result = client
            .subscribe(Address::ZERO, "http://localhost/callback")
            .await;
        assert!(matches!(result, Err(ChainError::NotAvailable(_))));
    }
}
