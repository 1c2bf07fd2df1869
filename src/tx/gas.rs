//! Gas limit and fee estimation for legacy and fee-market transactions

use super::types::{PricedTransaction, Pricing, TransactionRequest};
use crate::chain::ChainClient;
use crate::config::FeeConfig;
use crate::error::{GatewayError, GatewayResult};

use ethers::types::{Address, U256};
use tracing::{debug, info, warn};

const BASIS_POINTS: u64 = 10_000;
/// Median reward percentile always requested alongside the target one
const MEDIAN_PERCENTILE: f64 = 50.0;

/// Integer gas multiplier, stored in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasMultiplier {
    basis_points: u64,
}

impl GasMultiplier {
    /// Convert a decimal factor such as `1.2` once, at the edge
    pub fn from_factor(factor: f64) -> GatewayResult<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(GatewayError::InvalidRequest(format!(
                "gas multiplier must be a positive number, got {factor}"
            )));
        }
        let basis_points = (factor * BASIS_POINTS as f64).round() as u64;
        if basis_points == 0 {
            return Err(GatewayError::InvalidRequest(format!(
                "gas multiplier {factor} is too small"
            )));
        }
        Ok(Self { basis_points })
    }

    /// Multiply with floor division
    pub fn apply(&self, gas: U256) -> U256 {
        gas.saturating_mul(U256::from(self.basis_points)) / U256::from(BASIS_POINTS)
    }
}

/// Pricing shape chosen for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxShape {
    Legacy,
    FeeMarket,
}

/// Turns logical requests into priced, gas-bounded transactions
pub struct FeeEstimator {
    config: FeeConfig,
    default_multiplier: GasMultiplier,
}

impl FeeEstimator {
    /// Create a new fee estimator
    pub fn new(config: FeeConfig) -> GatewayResult<Self> {
        let default_multiplier = GasMultiplier::from_factor(config.gas_multiplier)
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self {
            config,
            default_multiplier,
        })
    }

    /// Price a request for the given sender and nonce
    pub async fn price(
        &self,
        chain: &dyn ChainClient,
        request: &TransactionRequest,
        from: Address,
        nonce: u64,
    ) -> GatewayResult<PricedTransaction> {
        let chain_id = chain.chain_id().await?;
        let pricing = match self.select_shape(request) {
            TxShape::Legacy => self.legacy_price(chain, request).await?,
            TxShape::FeeMarket => self.fee_market_price(chain, request).await?,
        };

        let draft = PricedTransaction {
            from,
            to: request.to,
            value: request.value,
            data: request.data.clone(),
            nonce,
            chain_id,
            gas: None,
            pricing,
        };

        let gas = self.gas_limit(chain, request, &draft).await?;
        let priced = draft.with_gas(gas);

        debug!(
            nonce,
            tx_type = priced.tx_type(),
            gas = %gas,
            gas_price = ?priced.pricing.gas_price(),
            max_fee_per_gas = ?priced.pricing.max_fee_per_gas(),
            "Priced transaction"
        );
        Ok(priced)
    }

    pub fn select_shape(&self, request: &TransactionRequest) -> TxShape {
        if request.names_fee_market()
            || (self.config.default_fee_market && request.gas_price.is_none())
        {
            TxShape::FeeMarket
        } else {
            TxShape::Legacy
        }
    }

    /// `eth_gasPrice` raised by the configured increment percent
    pub async fn avg_gas_price(&self, chain: &dyn ChainClient) -> GatewayResult<U256> {
        let price = chain.gas_price().await?;
        Ok(price.saturating_mul(U256::from(100 + self.config.avg_gas_price_inc_percent))
            / U256::from(100))
    }

    async fn legacy_price(
        &self,
        chain: &dyn ChainClient,
        request: &TransactionRequest,
    ) -> GatewayResult<Pricing> {
        let gas_price = match request.gas_price {
            Some(price) => price,
            None => self.avg_gas_price(chain).await?,
        };
        Ok(Pricing::Legacy { gas_price })
    }

    async fn fee_market_price(
        &self,
        chain: &dyn ChainClient,
        request: &TransactionRequest,
    ) -> GatewayResult<Pricing> {
        if let (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) =
            (request.max_fee_per_gas, request.max_priority_fee_per_gas)
        {
            return Ok(Pricing::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            });
        }

        let history = chain
            .fee_history(&[MEDIAN_PERCENTILE, self.config.target_reward_percentile])
            .await?;

        let tip = match request.max_priority_fee_per_gas {
            Some(tip) => tip,
            // Index 1 is the target percentile
            None => history.rewards.get(1).copied().ok_or_else(|| {
                GatewayError::provider("eth_feeHistory", "no reward percentiles")
            })?,
        };
        let max_fee = match request.max_fee_per_gas {
            Some(fee) => fee,
            None => self.cap_max_fee(
                history
                    .base_fee
                    .saturating_mul(U256::from(2))
                    .saturating_add(tip),
            ),
        };

        Ok(Pricing::FeeMarket {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: tip.min(max_fee),
        })
    }

    fn cap_max_fee(&self, max_fee: U256) -> U256 {
        match self.config.max_fee_per_gas_gwei {
            Some(gwei) => {
                let cap = U256::from(gwei).saturating_mul(U256::exp10(9));
                if max_fee > cap {
                    warn!("Max fee {} above configured cap, using {}", max_fee, cap);
                    cap
                } else {
                    max_fee
                }
            }
            None => max_fee,
        }
    }

    /// Resolve the gas limit for a draft transaction
    pub async fn gas_limit(
        &self,
        chain: &dyn ChainClient,
        request: &TransactionRequest,
        draft: &PricedTransaction,
    ) -> GatewayResult<U256> {
        if let Some(gas) = request.gas {
            return Ok(gas);
        }

        let multiplier = match request.multiplier {
            Some(factor) => GasMultiplier::from_factor(factor)?,
            None => self.default_multiplier,
        };

        if self.config.disable_gas_estimation {
            return Ok(multiplier.apply(U256::from(self.config.fallback_gas_limit)));
        }

        info!("Estimating gas for nonce {} to {:?}", draft.nonce, draft.to);
        let estimated = chain.estimate_gas(draft).await?;
        info!("eth_estimateGas returned: {} of gas", estimated);

        let gas = multiplier.apply(estimated);
        let block_gas_limit = chain.block_gas_limit().await?;
        if gas > block_gas_limit {
            warn!(
                "Estimated gas {} is too high. Defaulting to block gas limit {}",
                gas, block_gas_limit
            );
            return Ok(block_gas_limit);
        }

        Ok(gas)
    }
}
