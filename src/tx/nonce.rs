//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking so concurrent callers never share a nonce
//! - Holding the account section across sign and submit
//! - Drift detection and resync against the chain's transaction count

use crate::chain::ChainClient;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::Address;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoncePhase {
    Uninitialized,
    Synced,
    Drifted,
}

/// Per-account nonce state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountNonceState {
    /// Next nonce to hand out
    pub assigned: u64,
    /// Transaction count last reported by the chain
    pub confirmed: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub phase: NoncePhase,
}

impl Default for AccountNonceState {
    fn default() -> Self {
        Self {
            assigned: 0,
            confirmed: 0,
            last_synced_at: None,
            phase: NoncePhase::Uninitialized,
        }
    }
}

/// Manages nonces for every managed account
pub struct NonceManager {
    /// Per-account nonce state, each behind its own lock
    accounts: DashMap<Address, Arc<Mutex<AccountNonceState>>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Set the baseline for an account from the chain's transaction count
    pub async fn initialize(
        &self,
        address: Address,
        chain: &dyn ChainClient,
    ) -> GatewayResult<u64> {
        let cell = self
            .accounts
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(AccountNonceState::default())))
            .value()
            .clone();

        let mut state = cell.lock().await;
        let network_nonce = chain.transaction_count(address).await?;

        *state = AccountNonceState {
            assigned: network_nonce,
            confirmed: network_nonce,
            last_synced_at: Some(Utc::now()),
            phase: NoncePhase::Synced,
        };
        metrics::record_nonce_assigned(&address, network_nonce);

        info!("Initialized nonce for {:?}: {}", address, network_nonce);
        Ok(network_nonce)
    }

    /// Enter the account's section. At most one slot per account exists at a time.
    pub async fn acquire(&self, address: Address) -> GatewayResult<NonceSlot> {
        let cell = self
            .accounts
            .get(&address)
            .map(|entry| entry.value().clone())
            .ok_or(GatewayError::NonceNotInitialized { address })?;

        let state = cell.lock_owned().await;
        if state.phase == NoncePhase::Uninitialized {
            return Err(GatewayError::NonceNotInitialized { address });
        }

        Ok(NonceSlot { address, state })
    }

    /// Current value of `assigned`, without reserving it
    pub async fn current(&self, address: Address) -> GatewayResult<u64> {
        Ok(self.acquire(address).await?.next())
    }

    pub async fn snapshot(&self, address: Address) -> GatewayResult<AccountNonceState> {
        Ok(self.acquire(address).await?.snapshot())
    }

    /// Re-read the chain's transaction count and reconcile
    pub async fn resync(
        &self,
        address: Address,
        chain: &dyn ChainClient,
    ) -> GatewayResult<AccountNonceState> {
        let mut slot = self.acquire(address).await?;
        slot.resync(chain).await?;
        Ok(slot.snapshot())
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one account's nonce; the section ends when dropped
pub struct NonceSlot {
    address: Address,
    state: OwnedMutexGuard<AccountNonceState>,
}

impl NonceSlot {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Nonce for the transaction being assembled
    pub fn next(&self) -> u64 {
        self.state.assigned
    }

    /// Advance after the network accepted the transaction
    pub fn commit(&mut self) -> u64 {
        self.state.assigned += 1;
        metrics::record_nonce_assigned(&self.address, self.state.assigned);
        debug!(
            "Committed nonce {} for {:?}",
            self.state.assigned - 1,
            self.address
        );
        self.state.assigned
    }

    /// Reconcile with the chain. Returns the network's transaction count.
    pub async fn resync(&mut self, chain: &dyn ChainClient) -> GatewayResult<u64> {
        let network_nonce = chain.transaction_count(self.address).await?;
        metrics::record_nonce_resync(&self.address);

        if network_nonce > self.state.assigned {
            // Externally sent transactions or lost local state
            self.state.phase = NoncePhase::Drifted;
            warn!(
                "Nonce drift detected for {:?}: local {}, network {}",
                self.address, self.state.assigned, network_nonce
            );
            self.state.assigned = network_nonce;
            self.state.confirmed = network_nonce;
            metrics::record_nonce_assigned(&self.address, network_nonce);
        } else {
            // Anything between network and assigned is still in flight
            self.state.confirmed = self.state.confirmed.max(network_nonce);
            debug!(
                "Nonce for {:?} in sync: local {}, network {}",
                self.address, self.state.assigned, network_nonce
            );
        }

        self.state.phase = NoncePhase::Synced;
        self.state.last_synced_at = Some(Utc::now());
        Ok(network_nonce)
    }

    pub fn snapshot(&self) -> AccountNonceState {
        self.state.clone()
    }
}
