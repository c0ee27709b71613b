use std::{fmt, io, path::PathBuf};

use alloy::{hex::FromHexError, transports::TransportError};
use thiserror::Error;

/// Every failure that aborts a run. Nothing is recovered internally.
#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("invalid contract address `{input}`")]
    InvalidAddress {
        input: String,
        #[source]
        source: FromHexError,
    },
    #[error("failed to load {}", .path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    /// A contract query failed while walking the buyer array
    #[error("{query} query failed at buyer index {cursor}")]
    ContractRead {
        cursor: u64,
        query: BuyerQuery,
        #[source]
        source: CallError,
    },
    /// The contract kept returning non-zero addresses past the configured limit
    #[error("buyer list did not terminate within {limit} entries")]
    EnumerationOverflow { limit: u64 },
    #[error("failed to resolve the block to read at")]
    ChainQuery {
        #[source]
        source: TransportError,
    },
    #[error("failed to write {}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GenesisError {
    pub fn config(path: impl Into<PathBuf>, source: impl Into<LoadError>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Figment(#[from] figment::Error),
    #[error("contract interface: {0}")]
    Interface(String),
    #[error("genesis root is not a JSON object")]
    NotAnObject,
    #[error("rpc endpoint: {0}")]
    Endpoint(String),
    #[error("network selection: {0}")]
    Selection(String),
}

/// Which of the two buyer queries was in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyerQuery {
    Address,
    Value,
}

impl fmt::Display for BuyerQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuyerQuery::Address => write!(f, "getBuyerAddress"),
            BuyerQuery::Value => write!(f, "getBuyerValue"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Abi(#[from] alloy::dyn_abi::Error),
    #[error("unexpected output from {function}: {found}")]
    UnexpectedOutput { function: String, found: String },
}
