//! Transaction lifecycle: nonce sequencing, fee estimation, signing, submission
//! and confirmation tracking

mod confirm;
mod executor;
mod gas;
mod nonce;
mod signer;
mod types;

pub use confirm::{ConfirmationOutcome, ConfirmationTracker};
pub use executor::TransactionExecutor;
pub use gas::FeeEstimator;
pub use nonce::NonceManager;
pub use signer::{LocalSigner, TxSigner};
pub use types::{PricedTransaction, TransactionRequest};
