//! Transaction data model: caller requests, priced transactions and signatures

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::AccessList;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, TransactionRequest as LegacyRequest, H256, U256,
};
use serde::Deserialize;

/// Logical transaction as submitted by a caller. The sender is always the
/// managed account; `from` and `chainId` in the payload are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    /// Recipient, `None` for contract creation
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default, deserialize_with = "quantity::deserialize")]
    pub value: U256,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default, deserialize_with = "quantity::deserialize_opt")]
    pub gas: Option<U256>,
    #[serde(default, deserialize_with = "quantity::deserialize_opt")]
    pub gas_price: Option<U256>,
    #[serde(default, deserialize_with = "quantity::deserialize_opt")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, deserialize_with = "quantity::deserialize_opt")]
    pub max_priority_fee_per_gas: Option<U256>,
    /// Honored only when signing without submission
    #[serde(default, deserialize_with = "quantity::deserialize_opt_u64")]
    pub nonce: Option<u64>,
    /// Gas limit multiplier override
    #[serde(default)]
    pub multiplier: Option<f64>,
}

impl TransactionRequest {
    pub fn names_fee_market(&self) -> bool {
        self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some()
    }
}

/// Price attached to a transaction. Exactly one shape per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pricing {
    Legacy {
        gas_price: U256,
    },
    FeeMarket {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl Pricing {
    /// Envelope type tag used on the wire
    pub fn tx_type(&self) -> u8 {
        match self {
            Pricing::Legacy { .. } => 1,
            Pricing::FeeMarket { .. } => 2,
        }
    }

    pub fn gas_price(&self) -> Option<U256> {
        match self {
            Pricing::Legacy { gas_price } => Some(*gas_price),
            Pricing::FeeMarket { .. } => None,
        }
    }

    pub fn max_fee_per_gas(&self) -> Option<U256> {
        match self {
            Pricing::Legacy { .. } => None,
            Pricing::FeeMarket {
                max_fee_per_gas, ..
            } => Some(*max_fee_per_gas),
        }
    }
}

/// A fully priced transaction, ready to be signed
#[derive(Debug, Clone, PartialEq)]
pub struct PricedTransaction {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Option<Bytes>,
    pub nonce: u64,
    pub chain_id: u64,
    /// Unset only on the draft handed to gas estimation
    pub gas: Option<U256>,
    pub pricing: Pricing,
}

impl PricedTransaction {
    /// Copy of this transaction with the given gas limit
    pub fn with_gas(&self, gas: U256) -> Self {
        Self {
            gas: Some(gas),
            ..self.clone()
        }
    }

    pub fn tx_type(&self) -> u8 {
        self.pricing.tx_type()
    }

    /// Build the ethers request. Unset optional fields are left out entirely.
    pub fn to_typed(&self) -> TypedTransaction {
        match self.pricing {
            Pricing::Legacy { gas_price } => {
                let mut tx = LegacyRequest::new()
                    .from(self.from)
                    .value(self.value)
                    .nonce(self.nonce)
                    .chain_id(self.chain_id)
                    .gas_price(gas_price);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(gas) = self.gas {
                    tx = tx.gas(gas);
                }
                if let Some(data) = &self.data {
                    tx = tx.data(data.clone());
                }
                // Type 1 envelope with an empty access list carries a single gas price
                TypedTransaction::Eip2930(tx.with_access_list(AccessList::default()))
            }
            Pricing::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(self.from)
                    .value(self.value)
                    .nonce(self.nonce)
                    .chain_id(self.chain_id)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(gas) = self.gas {
                    tx = tx.gas(gas);
                }
                if let Some(data) = &self.data {
                    tx = tx.data(data.clone());
                }
                TypedTransaction::Eip1559(tx)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: H256,
    pub r: U256,
    pub s: U256,
    pub v: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedHash {
    pub message_hash: H256,
    pub r: U256,
    pub s: U256,
    pub v: u64,
    pub signature: Bytes,
}

/// Numeric fields arrive as JSON numbers of any size, decimal strings or
/// 0x-prefixed hex. Numbers keep their digits through `arbitrary_precision`.
mod quantity {
    use ethers::types::U256;
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    fn into_u256(value: Value) -> Result<U256, String> {
        match value {
            Value::Number(n) => {
                let digits = n.to_string();
                U256::from_dec_str(&digits)
                    .map_err(|e| format!("invalid integer quantity {digits}: {e}"))
            }
            Value::String(s) => {
                let s = s.trim();
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => U256::from_str_radix(hex, 16)
                        .map_err(|e| format!("invalid hex quantity {s:?}: {e}")),
                    None => U256::from_dec_str(s)
                        .map_err(|e| format!("invalid decimal quantity {s:?}: {e}")),
                }
            }
            other => Err(format!("expected a number or string quantity, got {other}")),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        into_u256(Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<U256>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            value => into_u256(value).map(Some).map_err(D::Error::custom),
        }
    }

    pub fn deserialize_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match deserialize_opt(d)? {
            Some(v) if v > U256::from(u64::MAX) => {
                Err(D::Error::custom(format!("quantity {v} does not fit in u64")))
            }
            Some(v) => Ok(Some(v.as_u64())),
            None => Ok(None),
        }
    }
}
