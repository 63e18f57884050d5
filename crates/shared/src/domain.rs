use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{error::CounterError, protocol::CounterCommand};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

macro_rules! base58_newtype {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new_from_array(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CounterError> {
                let array: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| CounterError::InvalidAddress {
                            input: bs58::encode(bytes).into_string(),
                            reason: format!("expected {} bytes, got {}", $len, bytes.len()),
                        })?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(&self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = CounterError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                let bytes = bs58::decode(trimmed)
                    .into_vec()
                    .map_err(|err| CounterError::InvalidAddress {
                        input: trimmed.to_string(),
                        reason: err.to_string(),
                    })?;
                let array: [u8; $len] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| CounterError::InvalidAddress {
                            input: trimmed.to_string(),
                            reason: format!("expected {} bytes, got {}", $len, bytes.len()),
                        })?;
                Ok(Self(array))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

base58_newtype!(Address, 32);
base58_newtype!(TransactionSignature, 64);

/// A connected wallet's public address.
pub type Identity = Address;

/// The native system program, base58 `11111111111111111111111111111111`.
pub const SYSTEM_PROGRAM_ID: Address = Address::new_from_array([0u8; 32]);

impl Address {
    /// Whether the bytes decompress to an ed25519 point. Derived addresses
    /// never do, so no private key can sign for them.
    pub fn is_on_curve(&self) -> bool {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Lamports(pub u64);

impl Lamports {
    pub fn as_sol(self) -> f64 {
        self.0 as f64 / LAMPORTS_PER_SOL as f64
    }
}

impl fmt::Display for Lamports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} SOL", self.as_sol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum CounterState {
    Absent,
    Value(u64),
}

impl CounterState {
    pub fn value(self) -> Option<u64> {
        match self {
            Self::Absent => None,
            Self::Value(count) => Some(count),
        }
    }
}

impl fmt::Display for CounterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("not initialized"),
            Self::Value(count) => write!(f, "{count}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown commitment level '{other}'")),
        }
    }
}

/// The most recent accepted submission, kept for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub command: CounterCommand,
    pub signature: TransactionSignature,
    pub submitted_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn explorer_url(&self, cluster: &str) -> String {
        explorer_tx_url(&self.signature, cluster)
    }
}

pub fn explorer_tx_url(signature: &TransactionSignature, cluster: &str) -> String {
    format!("https://explorer.solana.com/tx/{signature}?cluster={cluster}")
}
