use std::{fs, path::Path, str::FromStr};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    eips::{BlockId, BlockNumberOrTag},
    json_abi::{Function, JsonAbi},
    primitives::{Address, Bytes, B256, U256, U64},
    rpc::{
        client::{BuiltInConnectionString, ClientBuilder, RpcClient},
        types::eth::{TransactionInput, TransactionRequest},
    },
    transports::{BoxTransport, TransportErrorKind},
};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::{CallError, GenesisError, LoadError};

const GET_BUYER_ADDRESS: &str = "getBuyerAddress";
const GET_BUYER_VALUE: &str = "getBuyerValue";

/// Yellow paper limit on a header's `extraData`
const MAX_EXTRA_DATA: usize = 32;
/// Clique style seal appended to the vanity bytes
const POA_SEAL: usize = 65;

/// Read-only access to a deployed contract.
///
/// This is the only thing the buyer enumeration needs from the network, which lets
/// tests swap in a deterministic stub.
pub trait ContractReader {
    async fn call(
        &self,
        contract: Address,
        function: &Function,
        args: &[DynSolValue],
        block: BlockId,
    ) -> Result<Vec<DynSolValue>, CallError>;
}

/// [`ContractReader`] backed by `eth_call` over a json-rpc client
#[derive(Debug, Clone)]
pub struct RpcReader {
    client: RpcClient<BoxTransport>,
}

impl RpcReader {
    pub fn new(client: RpcClient<BoxTransport>) -> Self {
        Self { client }
    }
}

impl ContractReader for RpcReader {
    async fn call(
        &self,
        contract: Address,
        function: &Function,
        args: &[DynSolValue],
        block: BlockId,
    ) -> Result<Vec<DynSolValue>, CallError> {
        let tx = call_request(contract, function, args)?;
        let output: Bytes = self.client.request("eth_call", (tx, block)).await?;
        Ok(function.abi_decode_output(&output, true)?)
    }
}

/// `eth_call` request carrying the ABI-encoded input for `function`
fn call_request(
    contract: Address,
    function: &Function,
    args: &[DynSolValue],
) -> Result<TransactionRequest, CallError> {
    let data = function.abi_encode_input(args)?;
    Ok(TransactionRequest::default()
        .to(contract)
        .input(TransactionInput::both(data.into())))
}

/// The two view functions of the presale contract, resolved from its ABI
#[derive(Debug, Clone)]
pub struct BuyerInterface {
    get_address: Function,
    index_bits: usize,
    get_value: Function,
}

impl BuyerInterface {
    /// Load the interface from a json ABI, either a bare array or a build artifact with
    /// an `abi` field.
    pub fn load(path: &Path) -> Result<Self, GenesisError> {
        let raw = fs::read_to_string(path).map_err(|e| GenesisError::config(path, e))?;
        let mut value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| GenesisError::config(path, e))?;
        if let Some(abi) = value.get_mut("abi") {
            value = abi.take();
        }
        let abi: JsonAbi =
            serde_json::from_value(value).map_err(|e| GenesisError::config(path, e))?;
        Self::from_abi(&abi).map_err(|e| GenesisError::config(path, e))
    }

    pub fn from_abi(abi: &JsonAbi) -> Result<Self, LoadError> {
        let get_address = find_function(abi, GET_BUYER_ADDRESS, |f| {
            f.inputs.len() == 1
                && uint_bits(&f.inputs[0].ty).is_some()
                && f.outputs.len() == 1
                && f.outputs[0].ty == "address"
        })?;
        let get_value = find_function(abi, GET_BUYER_VALUE, |f| {
            f.inputs.len() == 1
                && f.inputs[0].ty == "address"
                && f.outputs.len() == 1
                && uint_bits(&f.outputs[0].ty).is_some()
        })?;
        let index_bits = uint_bits(&get_address.inputs[0].ty).unwrap_or(256);

        Ok(Self {
            get_address,
            index_bits,
            get_value,
        })
    }
}

fn find_function(
    abi: &JsonAbi,
    name: &str,
    shape: impl Fn(&Function) -> bool,
) -> Result<Function, LoadError> {
    let overloads = abi
        .function(name)
        .ok_or_else(|| LoadError::Interface(format!("`{name}` is missing")))?;
    overloads
        .iter()
        .find(|&f| shape(f))
        .cloned()
        .ok_or_else(|| LoadError::Interface(format!("`{name}` has an unexpected signature")))
}

/// Width of a `uintN` type, `uint` alone being 256
fn uint_bits(ty: &str) -> Option<usize> {
    match ty.strip_prefix("uint")? {
        "" => Some(256),
        bits => bits
            .parse::<usize>()
            .ok()
            .filter(|b| *b > 0 && *b <= 256 && b % 8 == 0),
    }
}

/// Contract handle bound to one address, one interface and one block
#[derive(Debug)]
pub struct BuyerContract<R> {
    address: Address,
    interface: BuyerInterface,
    block: BlockId,
    reader: R,
}

impl<R> BuyerContract<R> {
    pub fn new(address: Address, interface: BuyerInterface, block: BlockId, reader: R) -> Self {
        Self {
            address,
            interface,
            block,
            reader,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    #[cfg(test)]
    pub fn reader(&self) -> &R {
        &self.reader
    }
}

impl<R: ContractReader> BuyerContract<R> {
    /// `getBuyerAddress(index)`, the zero address marks the end of the list
    pub async fn buyer_address(&self, index: u64) -> Result<Address, CallError> {
        let function = &self.interface.get_address;
        let args = [DynSolValue::Uint(U256::from(index), self.interface.index_bits)];
        let output = self.call(function, &args).await?;
        output
            .as_address()
            .ok_or_else(|| unexpected(function, &output))
    }

    /// `getBuyerValue(buyer)`
    pub async fn buyer_value(&self, buyer: Address) -> Result<U256, CallError> {
        let function = &self.interface.get_value;
        let output = self.call(function, &[DynSolValue::Address(buyer)]).await?;
        output
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| unexpected(function, &output))
    }

    async fn call(&self, function: &Function, args: &[DynSolValue]) -> Result<DynSolValue, CallError> {
        let mut output = self
            .reader
            .call(self.address, function, args, self.block)
            .await?;
        if output.len() != 1 {
            return Err(CallError::UnexpectedOutput {
                function: function.signature(),
                found: format!("{} values", output.len()),
            });
        }
        Ok(output.remove(0))
    }
}

fn unexpected(function: &Function, output: &DynSolValue) -> CallError {
    CallError::UnexpectedOutput {
        function: function.signature(),
        found: format!("{output:?}"),
    }
}

/// How block headers from the node are interpreted.
///
/// Proof-of-authority chains store the signer seal in `extraData`, which then exceeds
/// the 32 bytes a standard header allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCompat {
    Standard,
    ProofOfAuthority,
}

impl HeaderCompat {
    pub fn new(poa: bool) -> Self {
        if poa {
            HeaderCompat::ProofOfAuthority
        } else {
            HeaderCompat::Standard
        }
    }

    fn check_extra_data(&self, extra_data: &[u8]) -> Result<(), String> {
        match self {
            HeaderCompat::Standard if extra_data.len() > MAX_EXTRA_DATA => Err(format!(
                "extraData is {} bytes, above the {MAX_EXTRA_DATA} byte limit; enable proof-of-authority compatibility",
                extra_data.len()
            )),
            HeaderCompat::Standard => Ok(()),
            HeaderCompat::ProofOfAuthority => {
                if extra_data.len() >= MAX_EXTRA_DATA + POA_SEAL {
                    let (vanity, rest) = extra_data.split_at(MAX_EXTRA_DATA);
                    let seal = &rest[rest.len() - POA_SEAL..];
                    debug!(
                        vanity = %alloy::hex::encode(vanity),
                        seal = %alloy::hex::encode(seal),
                        "poa header"
                    );
                }
                Ok(())
            }
        }
    }
}

/// Only the header fields needed to pin reads to a block
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeaderFields {
    number: U64,
    hash: B256,
    #[serde(default)]
    extra_data: Bytes,
}

/// Connection and interface parameters for [`bind`]
#[derive(Debug, Clone)]
pub struct BindOptions<'a> {
    pub rpc_url: &'a str,
    pub contract_address: &'a str,
    pub abi: &'a Path,
    pub compat: HeaderCompat,
    pub block: Option<u64>,
}

/// Parse an address in any casing
pub fn parse_address(input: &str) -> Result<Address, GenesisError> {
    Address::from_str(input.trim()).map_err(|source| GenesisError::InvalidAddress {
        input: input.to_string(),
        source,
    })
}

/// Resolve the contract handle used for enumeration.
///
/// The ABI and address are validated before the endpoint is contacted.
#[instrument(name = "bind", skip_all, fields(contract = %options.contract_address))]
pub async fn bind(options: &BindOptions<'_>) -> Result<BuyerContract<RpcReader>, GenesisError> {
    let interface = BuyerInterface::load(options.abi)?;
    let address = parse_address(options.contract_address)?;

    let connect: BuiltInConnectionString = options
        .rpc_url
        .parse()
        .map_err(|e: alloy::transports::TransportError| GenesisError::config(options.rpc_url, LoadError::Endpoint(e.to_string())))?;
    let client = ClientBuilder::default()
        .connect_boxed(connect)
        .await
        .map_err(|e| GenesisError::config(options.rpc_url, LoadError::Endpoint(e.to_string())))?;

    let block = match options.block {
        Some(number) => BlockId::number(number),
        None => latest_block(&client, options.compat).await?,
    };

    info!(
        "bound contract {} at block {:?}",
        address.to_checksum(None),
        block
    );
    Ok(BuyerContract::new(
        address,
        interface,
        block,
        RpcReader::new(client),
    ))
}

async fn latest_block(
    client: &RpcClient<BoxTransport>,
    compat: HeaderCompat,
) -> Result<BlockId, GenesisError> {
    let header: Option<HeaderFields> = client
        .request("eth_getBlockByNumber", (BlockNumberOrTag::Latest, false))
        .await
        .map_err(|source| GenesisError::ChainQuery { source })?;
    pin_header(header, compat)
}

/// Block to pin reads to, once the header passes the compatibility check
fn pin_header(header: Option<HeaderFields>, compat: HeaderCompat) -> Result<BlockId, GenesisError> {
    let header = header.ok_or_else(|| GenesisError::ChainQuery {
        source: TransportErrorKind::custom_str("node returned no latest block"),
    })?;
    compat
        .check_extra_data(&header.extra_data)
        .map_err(|e| GenesisError::ChainQuery {
            source: TransportErrorKind::custom_str(&e),
        })?;

    debug!(number = header.number.to::<u64>(), hash = %header.hash, "pinned latest block");
    Ok(BlockId::number(header.number.to::<u64>()))
}
