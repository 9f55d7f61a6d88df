//! Swap quotes with ordered fallback
//!
//! Quotes only inform the operator (how much of the quote token a budget buys);
//! nothing here submits a swap. [`QuoteRouter`] asks each source in turn and
//! takes the first non-zero answer.

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::{encode_call, ChainAccess};
use crate::error::{LadderError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub to_amount: U256,
    /// Token path the amount was quoted along
    pub route: Vec<Address>,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    async fn get_quote(&self, from: Address, to: Address, amount: U256) -> Result<Quote>;
}

/// Sources tried in order until one gives a non-zero amount
#[derive(Default)]
pub struct QuoteRouter {
    sources: Vec<Arc<dyn QuoteSource>>,
}

impl QuoteRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub async fn get_quote(&self, from: Address, to: Address, amount: U256) -> Result<Quote> {
        for source in &self.sources {
            match source.get_quote(from, to, amount).await {
                Ok(quote) if !quote.to_amount.is_zero() => {
                    debug!("{} quoted {} via {:?}", source.name(), quote.to_amount, quote.route);
                    return Ok(quote);
                }
                Ok(_) => debug!("{} has no liquidity for {:?} -> {:?}", source.name(), from, to),
                Err(e) => warn!("Quote source {} failed: {}", source.name(), e),
            }
        }
        Err(LadderError::rpc(format!(
            "no quote for {:?} -> {:?} from {} sources",
            from,
            to,
            self.sources.len()
        )))
    }
}

/// `getAmountsOut` on a V2-style router, direct then through the wrapped native token
pub struct V2RouterQuote {
    chain: Arc<dyn ChainAccess>,
    router: Address,
    wrapped_native: Option<Address>,
}

impl V2RouterQuote {
    pub fn new(chain: Arc<dyn ChainAccess>, router: Address, wrapped_native: Option<Address>) -> Self {
        Self {
            chain,
            router,
            wrapped_native,
        }
    }

    fn paths(&self, from: Address, to: Address) -> Vec<Vec<Address>> {
        let mut paths = vec![vec![from, to]];
        if let Some(native) = self.wrapped_native {
            if native != from && native != to {
                paths.push(vec![from, native, to]);
            }
        }
        paths
    }

    async fn amounts_out(&self, amount: U256, path: &[Address]) -> Result<U256> {
        let data = encode_call(
            "getAmountsOut(uint256,address[])",
            &[
                Token::Uint(amount),
                Token::Array(path.iter().map(|a| Token::Address(*a)).collect()),
            ],
        );
        let raw = self.chain.call(self.router, data).await?;
        let decoded = ethers::abi::decode(&[ParamType::Array(Box::new(ParamType::Uint(256)))], &raw)?;
        decoded
            .into_iter()
            .next()
            .and_then(|t| t.into_array())
            .and_then(|amounts| amounts.into_iter().last())
            .and_then(|t| t.into_uint())
            .ok_or_else(|| LadderError::abi("getAmountsOut returned no amounts"))
    }
}

#[async_trait]
impl QuoteSource for V2RouterQuote {
    fn name(&self) -> &str {
        "v2-router"
    }

    async fn get_quote(&self, from: Address, to: Address, amount: U256) -> Result<Quote> {
        let mut last_error = None;
        for path in self.paths(from, to) {
            match self.amounts_out(amount, &path).await {
                Ok(to_amount) if !to_amount.is_zero() => {
                    return Ok(Quote {
                        to_amount,
                        route: path,
                    })
                }
                Ok(_) => {}
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(Quote {
                to_amount: U256::zero(),
                route: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryChain;

    struct Fixed(&'static str, Option<u64>);

    #[async_trait]
    impl QuoteSource for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn get_quote(&self, from: Address, to: Address, _amount: U256) -> Result<Quote> {
            match self.1 {
                Some(amount) => Ok(Quote {
                    to_amount: U256::from(amount),
                    route: vec![from, to],
                }),
                None => Err(LadderError::rpc("down")),
            }
        }
    }

    #[tokio::test]
    async fn test_router_skips_failures_and_zero() {
        let router = QuoteRouter::new()
            .with_source(Arc::new(Fixed("broken", None)))
            .with_source(Arc::new(Fixed("empty", Some(0))))
            .with_source(Arc::new(Fixed("good", Some(42))));
        let quote = router
            .get_quote(Address::repeat_byte(1), Address::repeat_byte(2), U256::one())
            .await
            .unwrap();
        assert_eq!(quote.to_amount, U256::from(42));
    }

    #[tokio::test]
    async fn test_router_without_answer_is_error() {
        let router = QuoteRouter::new().with_source(Arc::new(Fixed("empty", Some(0))));
        assert!(router
            .get_quote(Address::zero(), Address::zero(), U256::one())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_v2_router_decodes_last_amount() {
        let router = Address::repeat_byte(0x20);
        let chain = Arc::new(InMemoryChain::new(56, Address::repeat_byte(5)));
        let selector: [u8; 4] = ethers::utils::id("getAmountsOut(uint256,address[])");
        chain.set_response(
            router,
            selector,
            ethers::abi::encode(&[Token::Array(vec![
                Token::Uint(U256::from(1_000)),
                Token::Uint(U256::from(2_500)),
            ])]),
        );
        let source = V2RouterQuote::new(chain, router, Some(Address::repeat_byte(0xbb)));
        let quote = source
            .get_quote(Address::repeat_byte(1), Address::repeat_byte(2), U256::from(1_000))
            .await
            .unwrap();
        assert_eq!(quote.to_amount, U256::from(2_500));
        assert_eq!(quote.route.len(), 2);
    }

    #[test]
    fn test_paths_skip_native_hop_for_native_pairs() {
        let chain = Arc::new(InMemoryChain::new(56, Address::zero()));
        let native = Address::repeat_byte(0xbb);
        let source = V2RouterQuote::new(chain, Address::zero(), Some(native));
        assert_eq!(source.paths(native, Address::repeat_byte(2)).len(), 1);
        assert_eq!(source.paths(Address::repeat_byte(1), Address::repeat_byte(2)).len(), 2);
    }
}
