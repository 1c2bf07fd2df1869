//! Error types for the transaction manager

use ethers::types::{Address, H256};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why the node refused a raw transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFailure {
    NonceTooLow,
    ReplacementUnderpriced,
    Other,
}

impl SubmissionFailure {
    /// Classify the message of a `eth_sendRawTransaction` error response
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("replacement") && msg.contains("underpriced") {
            SubmissionFailure::ReplacementUnderpriced
        } else if msg.contains("nonce") && !msg.contains("too high") {
            SubmissionFailure::NonceTooLow
        } else {
            SubmissionFailure::Other
        }
    }
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionFailure::NonceTooLow => write!(f, "nonce too low"),
            SubmissionFailure::ReplacementUnderpriced => write!(f, "replacement underpriced"),
            SubmissionFailure::Other => write!(f, "rejected"),
        }
    }
}

/// What a caller should do about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// The sequencer was resynced; submitting again picks a fresh nonce
    RetryWithResync,
    /// Resubmit with a higher fee multiplier
    RetryWithHigherPrice,
    /// The transaction may still mine; the wait budget ran out
    BoundedWaitExceeded,
    Fatal,
}

/// Main error type for the transaction manager
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error during {operation}: {message}")]
    Provider { operation: String, message: String },

    #[error("Gas estimation failed: {0}")]
    Estimation(String),

    #[error("Transaction rejected ({reason}): {message}")]
    Submission {
        reason: SubmissionFailure,
        message: String,
    },

    #[error("Nonce {nonce} is stale, network expects at least {network_nonce}")]
    StaleNonce { nonce: u64, network_nonce: u64 },

    #[error("Replacement transaction underpriced for nonce {nonce}, retry with a higher multiplier")]
    Underpriced { nonce: u64 },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("{requested} blocks have not been mined within {elapsed:?}")]
    BlockTimeout { requested: u64, elapsed: Duration },

    #[error("No receipt for {hash:?} after {elapsed:?}")]
    ReceiptTimeout { hash: H256, elapsed: Duration },

    #[error("Nonce sequencer not initialized for {address:?}")]
    NonceNotInitialized { address: Address },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn provider(operation: &str, err: impl fmt::Display) -> Self {
        GatewayError::Provider {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    /// Map the error onto the single action the caller should take
    pub fn action(&self) -> ErrorAction {
        match self {
            GatewayError::StaleNonce { .. } => ErrorAction::RetryWithResync,
            GatewayError::Underpriced { .. } => ErrorAction::RetryWithHigherPrice,
            GatewayError::BlockTimeout { .. } | GatewayError::ReceiptTimeout { .. } => {
                ErrorAction::BoundedWaitExceeded
            }
            _ => ErrorAction::Fatal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.action(),
            ErrorAction::RetryWithResync | ErrorAction::RetryWithHigherPrice
        ) || matches!(self, GatewayError::Provider { .. })
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Provider { .. } => "provider",
            GatewayError::Estimation(_) => "estimation",
            GatewayError::Submission { .. } => "submission",
            GatewayError::StaleNonce { .. } => "stale_nonce",
            GatewayError::Underpriced { .. } => "underpriced",
            GatewayError::Signing(_) => "signing",
            GatewayError::BlockTimeout { .. } => "block_timeout",
            GatewayError::ReceiptTimeout { .. } => "receipt_timeout",
            GatewayError::NonceNotInitialized { .. } => "nonce_not_initialized",
            GatewayError::Io(_) => "io",
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
