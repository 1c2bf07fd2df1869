//! Transaction executor: assemble, sign, submit and classify
//!
//! The account section is held from nonce lookup until the node has answered
//! the submission, so a nonce is never visible to two transactions at once.

use super::gas::FeeEstimator;
use super::nonce::{AccountNonceState, NonceManager, NonceSlot};
use super::signer::TxSigner;
use super::types::{PricedTransaction, SignedHash, SignedTransaction, TransactionRequest};
use crate::chain::ChainClient;
use crate::error::{GatewayError, GatewayResult, SubmissionFailure};
use crate::metrics;

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub hash: H256,
    pub nonce: u64,
}

/// Orchestrates the assign → price → sign → submit → commit sequence
pub struct TransactionExecutor {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn TxSigner>,
    nonces: Arc<NonceManager>,
    estimator: FeeEstimator,
}

impl TransactionExecutor {
    /// Create a new transaction executor
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn TxSigner>,
        nonces: Arc<NonceManager>,
        estimator: FeeEstimator,
    ) -> Self {
        Self {
            chain,
            signer,
            nonces,
            estimator,
        }
    }

    /// Sign and send a transaction from the managed account
    pub async fn submit(&self, request: &TransactionRequest) -> GatewayResult<Submission> {
        let mut slot = self.nonces.acquire(self.signer.address()).await?;
        let result = self.submit_locked(&mut slot, request).await;
        drop(slot);

        match &result {
            Ok(submission) => {
                metrics::record_tx_submitted();
                info!(
                    "Transaction sent - tx: {:?}, nonce: {}",
                    submission.hash, submission.nonce
                );
            }
            Err(e) => {
                metrics::record_tx_failed(e.kind());
                error!(action = ?e.action(), "Transaction not sent: {}", e);
            }
        }
        result
    }

    async fn submit_locked(
        &self,
        slot: &mut NonceSlot,
        request: &TransactionRequest,
    ) -> GatewayResult<Submission> {
        let nonce = slot.next();
        let priced = self
            .estimator
            .price(self.chain.as_ref(), request, slot.address(), nonce)
            .await?;

        let signed = self.sign_priced(&priced).await?;

        match self.chain.send_raw(signed.raw.clone()).await {
            Ok(hash) => {
                if hash != signed.hash {
                    warn!(
                        "Node reported hash {:?}, locally computed {:?}",
                        hash, signed.hash
                    );
                }
                slot.commit();
                Ok(Submission { hash, nonce })
            }
            Err(GatewayError::Submission {
                reason: SubmissionFailure::NonceTooLow,
                message,
            }) => {
                warn!("Nonce {} rejected ({}), resyncing", nonce, message);
                let network_nonce = slot.resync(self.chain.as_ref()).await?;
                Err(GatewayError::StaleNonce {
                    nonce,
                    network_nonce,
                })
            }
            Err(GatewayError::Submission {
                reason: SubmissionFailure::ReplacementUnderpriced,
                message,
            }) => {
                warn!("Replacement for nonce {} underpriced: {}", nonce, message);
                Err(GatewayError::Underpriced { nonce })
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_priced(&self, priced: &PricedTransaction) -> GatewayResult<SignedTransaction> {
        self.signer
            .sign_transaction(priced)
            .await
            .map_err(|e| match e {
                GatewayError::Signing(_) => e,
                other => GatewayError::Signing(other.to_string()),
            })
    }

    /// Price and sign without sending. The sequencer is peeked, never advanced.
    pub async fn sign(&self, request: &TransactionRequest) -> GatewayResult<SignedTransaction> {
        let address = self.signer.address();
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.nonces.current(address).await?,
        };

        let priced = self
            .estimator
            .price(self.chain.as_ref(), request, address, nonce)
            .await?;
        let signed = self.sign_priced(&priced).await?;

        debug!("Transaction signed - hash: {:?}, nonce: {}", signed.hash, nonce);
        Ok(signed)
    }

    pub async fn sign_hash(&self, hash: H256) -> GatewayResult<SignedHash> {
        let signed = self.signer.sign_hash(hash).await?;
        debug!("Hash signed - message hash: {:?}", signed.message_hash);
        Ok(signed)
    }

    /// Managed account address
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn public_key(&self) -> String {
        self.signer.public_key()
    }

    /// Get the managed account's balance in wei
    pub async fn balance(&self) -> GatewayResult<U256> {
        self.chain.balance(self.signer.address()).await
    }

    pub async fn nonce_state(&self) -> GatewayResult<AccountNonceState> {
        self.nonces.snapshot(self.signer.address()).await
    }

    /// Force a resync of the managed account against the chain
    pub async fn resync_nonce(&self) -> GatewayResult<AccountNonceState> {
        self.nonces
            .resync(self.signer.address(), self.chain.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::config::FeeConfig;
    use crate::tx::signer::MockTxSigner;
    use crate::tx::types::Pricing;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn account() -> Address {
        Address::repeat_byte(0x11)
    }

    fn fee_config() -> FeeConfig {
        FeeConfig {
            gas_multiplier: 1.0,
            avg_gas_price_inc_percent: 10,
            ..FeeConfig::default()
        }
    }

    fn request() -> TransactionRequest {
        TransactionRequest {
            to: Some(Address::repeat_byte(0xab)),
            value: U256::from(100),
            ..Default::default()
        }
    }

    /// Chain mock with a fixed price and the given transaction counts
    fn chain(counts: Vec<u64>) -> MockChainClient {
        let mut chain = MockChainClient::new();
        let mut counts = counts.into_iter();
        chain.expect_chain_id().returning(|| Ok(1337));
        chain.expect_gas_price().returning(|| Ok(U256::from(10)));
        chain
            .expect_estimate_gas()
            .returning(|_| Ok(U256::from(21_000)));
        chain
            .expect_block_gas_limit()
            .returning(|| Ok(U256::from(30_000_000)));
        chain
            .expect_transaction_count()
            .returning(move |_| Ok(counts.next().expect("unexpected transaction_count call")));
        chain
    }

    /// Signer that records every transaction it signs and encodes the nonce as raw bytes
    fn recording_signer(signed: Arc<Mutex<Vec<PricedTransaction>>>) -> MockTxSigner {
        let mut signer = MockTxSigner::new();
        signer.expect_address().return_const(account());
        signer.expect_sign_transaction().returning(move |tx| {
            signed.lock().unwrap().push(tx.clone());
            Ok(SignedTransaction {
                raw: tx.nonce.to_be_bytes().to_vec().into(),
                hash: H256::from_low_u64_be(tx.nonce),
                r: U256::one(),
                s: U256::one(),
                v: 27,
            })
        });
        signer
    }

    fn nonce_of(raw: &ethers::types::Bytes) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw.as_ref());
        u64::from_be_bytes(buf)
    }

    async fn executor(
        chain: MockChainClient,
        signer: MockTxSigner,
    ) -> (TransactionExecutor, Arc<NonceManager>, Arc<dyn ChainClient>) {
        let chain: Arc<dyn ChainClient> = Arc::new(chain);
        let nonces = Arc::new(NonceManager::new());
        nonces.initialize(account(), chain.as_ref()).await.unwrap();
        let executor = TransactionExecutor::new(
            chain.clone(),
            Arc::new(signer),
            nonces.clone(),
            FeeEstimator::new(fee_config()).unwrap(),
        );
        (executor, nonces, chain)
    }

    #[tokio::test]
    async fn test_legacy_happy_path() {
        let mut chain = chain(vec![5]);
        chain
            .expect_send_raw()
            .times(1)
            .returning(|raw| Ok(H256::from_low_u64_be(nonce_of(&raw))));
        let signed = Arc::new(Mutex::new(Vec::new()));
        let (executor, nonces, _) = executor(chain, recording_signer(signed.clone())).await;

        let submission = executor.submit(&request()).await.unwrap();
        assert_eq!(submission.nonce, 5);
        assert_eq!(submission.hash, H256::from_low_u64_be(5));

        let priced = signed.lock().unwrap()[0].clone();
        assert_eq!(priced.nonce, 5);
        assert_eq!(priced.tx_type(), 1);
        assert_eq!(priced.pricing, Pricing::Legacy { gas_price: U256::from(11) });
        assert_eq!(priced.from, account());

        assert_eq!(nonces.snapshot(account()).await.unwrap().assigned, 6);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_unique_nonces() {
        const N: u64 = 25;
        let mut chain = chain(vec![40]);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_by_chain = sent.clone();
        chain.expect_send_raw().returning(move |raw| {
            let nonce = nonce_of(&raw);
            sent_by_chain.lock().unwrap().push(nonce);
            Ok(H256::from_low_u64_be(nonce))
        });
        let (executor, nonces, _) =
            executor(chain, recording_signer(Arc::new(Mutex::new(Vec::new())))).await;
        let executor = Arc::new(executor);

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move { executor.submit(&request()).await })
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        let committed: HashSet<u64> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().nonce)
            .collect();
        let expected: HashSet<u64> = (40..40 + N).collect();
        assert_eq!(committed, expected);
        assert_eq!(sent.lock().unwrap().len() as u64, N);
        assert_eq!(nonces.snapshot(account()).await.unwrap().assigned, 40 + N);
    }

    #[tokio::test]
    async fn test_stale_nonce_triggers_resync() {
        let mut chain = chain(vec![5, 7]);
        chain.expect_send_raw().times(1).returning(|_| {
            Err(GatewayError::Submission {
                reason: SubmissionFailure::NonceTooLow,
                message: "nonce too low".into(),
            })
        });
        let (executor, nonces, _) =
            executor(chain, recording_signer(Arc::new(Mutex::new(Vec::new())))).await;

        let err = executor.submit(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::StaleNonce {
                nonce: 5,
                network_nonce: 7
            }
        ));
        assert!(err.is_retryable());

        let state = nonces.snapshot(account()).await.unwrap();
        assert_eq!((state.assigned, state.confirmed), (7, 7));
    }

    #[tokio::test]
    async fn test_underpriced_replacement_keeps_nonce() {
        let mut chain = chain(vec![5]);
        chain.expect_send_raw().times(1).returning(|_| {
            Err(GatewayError::Submission {
                reason: SubmissionFailure::ReplacementUnderpriced,
                message: "replacement transaction underpriced".into(),
            })
        });
        let (executor, nonces, _) =
            executor(chain, recording_signer(Arc::new(Mutex::new(Vec::new())))).await;

        let req = TransactionRequest {
            gas_price: Some(U256::from(1)),
            ..request()
        };
        let err = executor.submit(&req).await.unwrap_err();
        assert!(matches!(err, GatewayError::Underpriced { nonce: 5 }));
        assert_eq!(
            err.action(),
            crate::error::ErrorAction::RetryWithHigherPrice
        );
        assert_eq!(nonces.snapshot(account()).await.unwrap().assigned, 5);
    }

    #[tokio::test]
    async fn test_signing_failure_sends_nothing() {
        let mut chain = chain(vec![5]);
        chain.expect_send_raw().never();
        let mut signer = MockTxSigner::new();
        signer.expect_address().return_const(account());
        signer
            .expect_sign_transaction()
            .returning(|_| Err(GatewayError::Signing("hsm unavailable".into())));
        let (executor, nonces, _) = executor(chain, signer).await;

        let err = executor.submit(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Signing(_)));
        assert_eq!(nonces.snapshot(account()).await.unwrap().assigned, 5);
    }

    #[tokio::test]
    async fn test_other_rejection_is_fatal_and_uncommitted() {
        let mut chain = chain(vec![5]);
        chain.expect_send_raw().returning(|_| {
            Err(GatewayError::Submission {
                reason: SubmissionFailure::Other,
                message: "insufficient funds for gas * price + value".into(),
            })
        });
        let (executor, nonces, _) =
            executor(chain, recording_signer(Arc::new(Mutex::new(Vec::new())))).await;

        let err = executor.submit(&request()).await.unwrap_err();
        assert_eq!(err.action(), crate::error::ErrorAction::Fatal);
        assert_eq!(nonces.snapshot(account()).await.unwrap().assigned, 5);
    }

    #[tokio::test]
    async fn test_sign_peeks_without_committing() {
        let mut chain = chain(vec![9]);
        chain.expect_send_raw().never();
        let signed = Arc::new(Mutex::new(Vec::new()));
        let (executor, nonces, _) = executor(chain, recording_signer(signed.clone())).await;

        executor.sign(&request()).await.unwrap();
        let explicit = TransactionRequest {
            nonce: Some(3),
            ..request()
        };
        executor.sign(&explicit).await.unwrap();

        let nonces_signed: Vec<u64> = signed.lock().unwrap().iter().map(|t| t.nonce).collect();
        assert_eq!(nonces_signed, vec![9, 3]);
        assert_eq!(nonces.snapshot(account()).await.unwrap().assigned, 9);
    }

    #[tokio::test]
    async fn test_forced_resync_adopts_external_sends() {
        let chain = chain(vec![5, 8]);
        let (executor, _, _) =
            executor(chain, recording_signer(Arc::new(Mutex::new(Vec::new())))).await;

        let state = executor.resync_nonce().await.unwrap();
        assert_eq!((state.assigned, state.confirmed), (8, 8));
    }
}
