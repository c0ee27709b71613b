use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use alloy::primitives::{Address, U256};
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use tracing::{info, instrument};

use crate::{
    buyers::BuyerRecord,
    error::{GenesisError, LoadError},
};

const ALLOC: &str = "alloc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    balance: String,
}

impl From<U256> for AccountBalance {
    fn from(value: U256) -> Self {
        Self {
            balance: encode_balance(value),
        }
    }
}

impl From<AccountBalance> for Value {
    fn from(account: AccountBalance) -> Self {
        json!({ "balance": account.balance })
    }
}

/// A genesis file kept as raw json. Only `alloc` is ever touched, every other field
/// passes through as it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisDocument {
    fields: Map<String, Value>,
}

impl GenesisDocument {
    #[instrument(name = "load_genesis", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let raw = fs::read_to_string(path).map_err(|e| GenesisError::config(path, e))?;
        let value = serde_json::from_str(&raw).map_err(|e| GenesisError::config(path, e))?;
        Self::from_value(value).map_err(|e| GenesisError::config(path, e))
    }

    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(LoadError::NotAnObject),
        }
    }

    #[cfg(test)]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Copy of this document with `alloc` replaced by one entry per buyer.
    ///
    /// Entries keep enumeration order. A buyer appearing twice keeps the later value.
    pub fn with_alloc(&self, buyers: &[BuyerRecord]) -> Self {
        let mut alloc = Map::new();
        for buyer in buyers {
            alloc.insert(
                alloc_key(&buyer.address),
                AccountBalance::from(buyer.value).into(),
            );
        }

        let mut fields = self.fields.clone();
        fields.insert(ALLOC.to_string(), Value::Object(alloc));
        Self { fields }
    }

    /// Write the document as pretty json.
    ///
    /// The content goes to a uniquely named temporary file next to `path` and is only
    /// published once flushed, so a failed write never leaves a truncated genesis behind.
    /// With `no_clobber` the publish itself refuses an existing `path`.
    #[instrument(name = "write_genesis", skip_all, fields(path = %path.display(), no_clobber = no_clobber))]
    pub fn write(&self, path: &Path, no_clobber: bool) -> Result<(), GenesisError> {
        let write_err = |source| GenesisError::OutputWrite {
            path: path.to_path_buf(),
            source,
        };

        if no_clobber && path.exists() {
            return Err(write_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "output already exists and no_clobber is set",
            )));
        }

        let json = serde_json::to_string_pretty(&self.fields).map_err(|e| write_err(e.into()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        // the temporary file is removed on drop when publishing fails
        let published = if no_clobber {
            tmp.persist_noclobber(path)
        } else {
            tmp.persist(path)
        };
        published.map_err(|e| write_err(e.error))?;

        info!("genesis written");
        Ok(())
    }
}

/// Alloc key for an account: the EIP-55 checksummed address without `0x`
pub fn alloc_key(address: &Address) -> String {
    let checksummed = address.to_checksum(None);
    checksummed
        .strip_prefix("0x")
        .unwrap_or(&checksummed)
        .to_string()
}

/// `0x` prefixed lower case hex without leading zeros, zero being `0x0`
pub fn encode_balance(value: U256) -> String {
    if value.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{value:x}")
    }
}
