//! Multicall3 read batching
//!
//! Reads (balances, decimals, allowances, pool state, positions) are grouped into
//! one `aggregate3` eth_call. When the aggregator is missing or its answer cannot
//! be decoded, the same calls are issued individually and concurrently.

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use futures::future::join_all;
use tracing::{debug, warn};

use super::abi::{allowance_call, balance_of_call, decode_uint};
use super::{encode_call, ChainAccess};
use crate::error::{LadderError, Result};

/// Canonical Multicall3 deployment, identical on every supported chain
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// One read in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: Address,
    pub calldata: Bytes,
    /// A failed read yields `success == false` instead of failing the batch
    pub allow_failure: bool,
}

impl Call {
    pub fn new(target: Address, calldata: Bytes) -> Self {
        Self {
            target,
            calldata,
            allow_failure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub success: bool,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct Multicall {
    address: Address,
}

impl Default for Multicall {
    fn default() -> Self {
        Self {
            address: canonical_address(),
        }
    }
}

fn canonical_address() -> Address {
    MULTICALL3_ADDRESS.parse().unwrap_or_else(|_| Address::zero())
}

impl Multicall {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Run `calls` as one `aggregate3`, falling back to individual calls
    pub async fn aggregate(
        &self,
        chain: &dyn ChainAccess,
        calls: &[Call],
    ) -> Result<Vec<CallResult>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        match chain.call(self.address, encode_aggregate3(calls)).await {
            Ok(data) => match decode_aggregate3(&data) {
                Ok(results) if results.len() == calls.len() => {
                    debug!("Multicall3 returned {} results", results.len());
                    for (call, result) in calls.iter().zip(&results) {
                        if !result.success && !call.allow_failure {
                            return Err(LadderError::rpc(format!(
                                "required read against {:?} failed",
                                call.target
                            )));
                        }
                    }
                    return Ok(results);
                }
                Ok(results) => warn!(
                    "Multicall3 returned {} results for {} calls, falling back",
                    results.len(),
                    calls.len()
                ),
                Err(e) => warn!("Multicall3 response undecodable: {}, falling back", e),
            },
            Err(e) => warn!("Multicall3 unavailable: {}, falling back to individual calls", e),
        }

        self.individual(chain, calls).await
    }

    async fn individual(
        &self,
        chain: &dyn ChainAccess,
        calls: &[Call],
    ) -> Result<Vec<CallResult>> {
        let responses = join_all(
            calls
                .iter()
                .map(|call| chain.call(call.target, call.calldata.clone())),
        )
        .await;

        calls
            .iter()
            .zip(responses)
            .map(|(call, response)| match response {
                Ok(data) => Ok(CallResult {
                    success: true,
                    data,
                }),
                Err(_) if call.allow_failure => Ok(CallResult {
                    success: false,
                    data: Bytes::default(),
                }),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// ERC20 balances of `owner`; failed reads are `None`
    pub async fn balances(
        &self,
        chain: &dyn ChainAccess,
        tokens: &[Address],
        owner: Address,
    ) -> Result<Vec<Option<U256>>> {
        let calls: Vec<Call> = tokens
            .iter()
            .map(|token| Call::new(*token, balance_of_call(owner)))
            .collect();
        Ok(decode_uints(self.aggregate(chain, &calls).await?))
    }

    /// ERC20 allowances granted by `owner` to `spender`; failed reads are `None`
    pub async fn allowances(
        &self,
        chain: &dyn ChainAccess,
        tokens: &[Address],
        owner: Address,
        spender: Address,
    ) -> Result<Vec<Option<U256>>> {
        let calls: Vec<Call> = tokens
            .iter()
            .map(|token| Call::new(*token, allowance_call(owner, spender)))
            .collect();
        Ok(decode_uints(self.aggregate(chain, &calls).await?))
    }
}

fn decode_uints(results: Vec<CallResult>) -> Vec<Option<U256>> {
    results
        .into_iter()
        .map(|r| r.success.then(|| decode_uint(&r.data).ok()).flatten())
        .collect()
}

pub fn encode_aggregate3(calls: &[Call]) -> Bytes {
    let entries = calls
        .iter()
        .map(|call| {
            Token::Tuple(vec![
                Token::Address(call.target),
                Token::Bool(call.allow_failure),
                Token::Bytes(call.calldata.to_vec()),
            ])
        })
        .collect();
    encode_call("aggregate3((address,bool,bytes)[])", &[Token::Array(entries)])
}

pub fn decode_aggregate3(data: &[u8]) -> Result<Vec<CallResult>> {
    let result_type = ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Bool,
        ParamType::Bytes,
    ])));
    let mut tokens = ethers::abi::decode(&[result_type], data)?;
    let entries = match tokens.pop() {
        Some(Token::Array(entries)) => entries,
        _ => return Err(LadderError::abi("aggregate3 did not return an array")),
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::Bool(success), Token::Bytes(data)] => Ok(CallResult {
                    success: *success,
                    data: Bytes::from(data.clone()),
                }),
                _ => Err(LadderError::abi("malformed aggregate3 entry")),
            },
            _ => Err(LadderError::abi("malformed aggregate3 entry")),
        })
        .collect()
}

/// Encode results as Multicall3 would, for in-memory chains
pub fn encode_aggregate3_results(results: &[CallResult]) -> Bytes {
    let entries = results
        .iter()
        .map(|r| Token::Tuple(vec![Token::Bool(r.success), Token::Bytes(r.data.to_vec())]))
        .collect();
    ethers::abi::encode(&[Token::Array(entries)]).into()
}

/// Calls packed into an `aggregate3` payload, for in-memory chains
pub fn decode_aggregate3_calls(calldata: &[u8]) -> Result<Vec<Call>> {
    if calldata.len() < 4 {
        return Err(LadderError::abi("calldata shorter than a selector"));
    }
    let call_type = ParamType::Array(Box::new(ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Bool,
        ParamType::Bytes,
    ])));
    let mut tokens = ethers::abi::decode(&[call_type], &calldata[4..])?;
    let entries = match tokens.pop() {
        Some(Token::Array(entries)) => entries,
        _ => return Err(LadderError::abi("aggregate3 calldata is not an array")),
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Token::Tuple(fields) => match fields.as_slice() {
                [Token::Address(target), Token::Bool(allow_failure), Token::Bytes(data)] => {
                    Ok(Call {
                        target: *target,
                        calldata: Bytes::from(data.clone()),
                        allow_failure: *allow_failure,
                    })
                }
                _ => Err(LadderError::abi("malformed aggregate3 call")),
            },
            _ => Err(LadderError::abi("malformed aggregate3 call")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_address_parses() {
        assert_ne!(Multicall::default().address(), Address::zero());
    }

    #[test]
    fn test_aggregate3_selector() {
        let data = encode_aggregate3(&[Call::new(Address::zero(), Bytes::default())]);
        assert_eq!(hex::encode(&data[..4]), "82ad56cb");
    }

    #[test]
    fn test_calls_survive_encoding() {
        let calls = vec![
            Call::new(Address::repeat_byte(1), Bytes::from(vec![1, 2, 3])),
            Call {
                target: Address::repeat_byte(2),
                calldata: Bytes::from(vec![4]),
                allow_failure: false,
            },
        ];
        assert_eq!(decode_aggregate3_calls(&encode_aggregate3(&calls)).unwrap(), calls);
    }

    #[test]
    fn test_results_survive_encoding() {
        let results = vec![
            CallResult {
                success: true,
                data: Bytes::from(vec![0u8; 32]),
            },
            CallResult {
                success: false,
                data: Bytes::default(),
            },
        ];
        assert_eq!(
            decode_aggregate3(&encode_aggregate3_results(&results)).unwrap(),
            results
        );
    }
}
