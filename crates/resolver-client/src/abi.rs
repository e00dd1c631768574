//! Contract ABI for the resolving contract and the off-chain lookup round trip

use std::fmt;

use alloy_primitives::{Bytes, FixedBytes, B256};
use alloy_sol_types::{sol, sol_data, SolCall, SolType, SolValue};
use resolver_core::{dns_encode, namehash, RecordKind};

use crate::error::{ClientError, Result};

sol! {
    function resolve(bytes name, bytes data) external view returns (bytes);

    function addr(bytes32 node, uint256 coinType) external view returns (bytes);
    function text(bytes32 node, string key) external view returns (string);
    function contenthash(bytes32 node) external view returns (bytes);
    function pubkey(bytes32 node) external view returns (bytes32 x, bytes32 y);

    error OffchainLookup(address sender, string[] urls, bytes callData, bytes4 callbackFunction, bytes extraData);

    struct GatewayRequest {
        bytes ops;
        bytes[] inputs;
    }

    function proveRequest(bytes context, GatewayRequest req) external view returns (bytes);
}

/// Parameters of the follow-up call: `(bytes[] outputs, uint8 exitCode, bytes carry)`
pub type CallbackParams = (
    sol_data::Array<sol_data::Bytes>,
    sol_data::Uint<8>,
    sol_data::Bytes,
);

/// A decoded record value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    Bytes(Bytes),
    Text(String),
}

impl RecordValue {
    /// Interpret raw record storage for the given record kind
    pub fn from_raw(record: &RecordKind, raw: Bytes) -> Self {
        match record {
            RecordKind::Text(_) => RecordValue::Text(String::from_utf8_lossy(&raw).into_owned()),
            _ => RecordValue::Bytes(raw),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RecordValue::Bytes(b) => b.is_empty(),
            RecordValue::Text(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            RecordValue::Text(s) => f.write_str(s),
        }
    }
}

/// Calldata of the record query itself, e.g. `text(node, key)`
pub fn query_calldata(node: B256, record: &RecordKind) -> Bytes {
    let data = match record {
        RecordKind::Addr(coin_type) => addrCall {
            node,
            coinType: *coin_type,
        }
        .abi_encode(),
        RecordKind::Text(key) => textCall {
            node,
            key: key.clone(),
        }
        .abi_encode(),
        RecordKind::Contenthash => contenthashCall { node }.abi_encode(),
        RecordKind::Pubkey => pubkeyCall { node }.abi_encode(),
    };
    Bytes::from(data)
}

/// `resolve(dnsEncode(name), query)` calldata for the resolving contract
pub fn resolve_calldata(name: &str, record: &RecordKind) -> Result<Bytes> {
    let call = resolveCall {
        name: Bytes::from(dns_encode(name)?),
        data: query_calldata(namehash(name), record),
    };
    Ok(Bytes::from(call.abi_encode()))
}

/// Decode the follow-up call's return data per the query's return type
pub fn decode_answer(record: &RecordKind, data: &[u8]) -> Result<RecordValue> {
    let value = match record {
        RecordKind::Text(_) => <String as SolValue>::abi_decode(data).map(RecordValue::Text),
        RecordKind::Pubkey => <(B256, B256)>::abi_decode_params(data).map(|(x, y)| {
            // an unset pubkey answers (0, 0)
            if x.is_zero() && y.is_zero() {
                RecordValue::Bytes(Bytes::new())
            } else {
                RecordValue::Bytes(Bytes::from([x.as_slice(), y.as_slice()].concat()))
            }
        }),
        _ => <Bytes as SolValue>::abi_decode(data).map(RecordValue::Bytes),
    };
    value.map_err(|e| ClientError::DecodeFailure(format!("{} answer: {}", record, e)))
}

/// `selector || abi.encode(bytes[] outputs, uint8 exitCode, bytes carry)`
pub fn callback_calldata(
    selector: FixedBytes<4>,
    outputs: Vec<Bytes>,
    exit_code: u8,
    carry: Bytes,
) -> Bytes {
    let mut data = selector.to_vec();
    data.extend_from_slice(&CallbackParams::abi_encode_params(&(outputs, exit_code, carry)));
    Bytes::from(data)
}
