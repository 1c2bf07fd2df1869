//! Signing collaborator: turns priced transactions and hashes into signatures

use super::types::{PricedTransaction, SignedHash, SignedTransaction};
use crate::config::WalletConfig;
use crate::error::{GatewayError, GatewayResult};

use async_trait::async_trait;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::{hash_message, keccak256};
use tracing::info;

/// Holds the managed account's key and signs on its behalf
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Uncompressed public key, hex encoded without the 0x04 prefix
    fn public_key(&self) -> String;

    async fn sign_transaction(&self, tx: &PricedTransaction) -> GatewayResult<SignedTransaction>;

    /// Sign a 32-byte hash as an EIP-191 personal message
    async fn sign_hash(&self, hash: H256) -> GatewayResult<SignedHash>;
}

/// In-process signer backed by a private key
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn new(wallet: LocalWallet, chain_id: u64) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
        }
    }

    /// Load wallet from the environment variable named in the config
    pub fn from_env(config: &WalletConfig, chain_id: u64) -> GatewayResult<Self> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            GatewayError::Config(format!(
                "No wallet configured. Set {}",
                config.private_key_env
            ))
        })?;

        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| GatewayError::Config(format!("Invalid private key: {}", e)))?;

        let signer = Self::new(wallet, chain_id);
        info!("Signer initialized with wallet: {:?}", signer.address());
        Ok(signer)
    }
}

#[async_trait]
impl TxSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn public_key(&self) -> String {
        let point = self.wallet.signer().verifying_key().to_encoded_point(false);
        format!("0x{}", hex::encode(&point.as_bytes()[1..]))
    }

    async fn sign_transaction(&self, tx: &PricedTransaction) -> GatewayResult<SignedTransaction> {
        if tx.from != self.wallet.address() {
            return Err(GatewayError::Signing(format!(
                "transaction sender {:?} is not the managed account",
                tx.from
            )));
        }

        let typed = tx.to_typed();
        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| GatewayError::Signing(e.to_string()))?;

        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));

        // Typed envelopes carry the y-parity, not the EIP-155 value
        let y_parity = signature
            .recovery_id()
            .map_err(|e| GatewayError::Signing(e.to_string()))?
            .to_byte();

        Ok(SignedTransaction {
            raw,
            hash,
            r: signature.r,
            s: signature.s,
            v: u64::from(y_parity),
        })
    }

    async fn sign_hash(&self, hash: H256) -> GatewayResult<SignedHash> {
        let signature = self
            .wallet
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| GatewayError::Signing(e.to_string()))?;

        Ok(SignedHash {
            message_hash: hash_message(hash.as_bytes()),
            r: signature.r,
            s: signature.s,
            v: signature.v,
            signature: Bytes::from(signature.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::types::Pricing;
    use ethers::types::U256;
    use ethers::utils::rlp::Rlp;
    use ethers::types::transaction::eip2718::TypedTransaction;

    // Well-known development key (anvil account #0)
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn signer() -> LocalSigner {
        LocalSigner::new(DEV_KEY.parse().unwrap(), 1337)
    }

    fn priced(from: Address) -> PricedTransaction {
        PricedTransaction {
            from,
            to: Some(Address::repeat_byte(0xab)),
            value: U256::from(100),
            data: None,
            nonce: 5,
            chain_id: 1337,
            gas: Some(U256::from(21_000)),
            pricing: Pricing::Legacy {
                gas_price: U256::from(11),
            },
        }
    }

    #[test]
    fn test_identity() {
        let signer = signer();
        assert_eq!(
            format!("{:?}", signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        // 64 bytes of key material plus the 0x prefix
        assert_eq!(signer.public_key().len(), 2 + 128);
    }

    #[tokio::test]
    async fn test_sign_transaction_round_trips_sender() {
        let signer = signer();
        let signed = signer
            .sign_transaction(&priced(signer.address()))
            .await
            .unwrap();

        assert_eq!(signed.hash, H256::from(keccak256(&signed.raw)));
        // Typed envelope: first byte is the type tag
        assert_eq!(signed.raw[0], 1);

        let (decoded, signature) =
            TypedTransaction::decode_signed(&Rlp::new(&signed.raw)).unwrap();
        assert_eq!(decoded.nonce(), Some(&U256::from(5)));
        assert_eq!(signature.recover(decoded.sighash()).unwrap(), signer.address());
    }

    #[tokio::test]
    async fn test_reported_v_is_y_parity() {
        let signer = signer();
        let signed = signer
            .sign_transaction(&priced(signer.address()))
            .await
            .unwrap();
        assert!(signed.v <= 1, "v = {}", signed.v);

        // r, s and the reported v rebuild a signature over the same sighash
        let (decoded, _) = TypedTransaction::decode_signed(&Rlp::new(&signed.raw)).unwrap();
        let rebuilt = ethers::types::Signature {
            r: signed.r,
            s: signed.s,
            v: signed.v,
        };
        assert_eq!(rebuilt.recover(decoded.sighash()).unwrap(), signer.address());
    }

    #[tokio::test]
    async fn test_refuses_foreign_sender() {
        let signer = signer();
        let err = signer
            .sign_transaction(&priced(Address::repeat_byte(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Signing(_)));
    }

    #[tokio::test]
    async fn test_sign_hash_recovers() {
        let signer = signer();
        let hash = H256::repeat_byte(0x42);
        let signed = signer.sign_hash(hash).await.unwrap();

        assert_eq!(signed.signature.len(), 65);
        assert_eq!(signed.message_hash, hash_message(hash.as_bytes()));

        let signature = ethers::types::Signature::try_from(signed.signature.as_ref()).unwrap();
        assert_eq!(
            signature.recover(signed.message_hash).unwrap(),
            signer.address()
        );
    }
}
