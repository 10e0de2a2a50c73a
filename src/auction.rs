use crate::{
    address::AccountId,
    cell::{CellBuilder, CellError},
    chain::{
        AccountState, ChainClient, ChainError, ContractImage, ErrorClass, GetMethodOutput,
        StackValue, with_timeout,
    },
};
use num_bigint::BigUint;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

const GET_AUCTION_INFO: &str = "get_auction_info";
const GET_NFT_ADDRESS_BY_INDEX: &str = "get_nft_address_by_index";

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{method} failed with exit code {exit_code}")]
    ExecutionFailed { method: &'static str, exit_code: i32 },
    #[error("invalid {method} result: {reason}")]
    InvalidResult { method: &'static str, reason: String },
    #[error("auction not available")]
    AuctionUnavailable,
    #[error("empty {0} address")]
    EmptyAddress(&'static str),
    #[error("cannot hash domain name: {0}")]
    NameEncoding(#[from] CellError),
}

impl AuctionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AuctionError::Chain(err) => err.class(),
            AuctionError::AuctionUnavailable => ErrorClass::AuctionUnavailable,
            _ => ErrorClass::Decode,
        }
    }
}

/// Snapshot of an auction contract at read time. Never reused across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Auction {
    pub max_bid_address: AccountId,
    pub max_bid_amount: u64,
    pub end_time: i64,
}

impl Auction {
    pub fn has_ended(&self, now: i64) -> bool {
        now > self.end_time
    }
}

/// Collection contract image fetched once at startup, used to resolve each
/// domain's item address.
#[derive(Clone)]
pub struct DnsCollection {
    client: Arc<dyn ChainClient>,
    address: AccountId,
    image: ContractImage,
    timeout: Duration,
}

impl DnsCollection {
    pub async fn load(
        client: Arc<dyn ChainClient>,
        address: AccountId,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let state = with_timeout(timeout, client.account_state(&address)).await?;
        Ok(Self {
            client,
            address,
            image: state.image,
            timeout,
        })
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn is_deployed(&self) -> bool {
        self.image.is_deployed()
    }

    pub async fn resolve_item(&self, name: &str) -> Result<AccountId, AuctionError> {
        let args = vec![StackValue::from(name_index(name)?)];
        let output = with_timeout(
            self.timeout,
            self.client
                .run_get_method(&self.image, &self.address, GET_NFT_ADDRESS_BY_INDEX, args),
        )
        .await?;
        decode_item_address(&output)
    }
}

/// Item index of a domain: the hash of a cell holding the raw name bytes.
pub fn name_index(name: &str) -> Result<BigUint, CellError> {
    let cell = CellBuilder::new().store_bytes(name.as_bytes())?.build();
    Ok(BigUint::from_bytes_be(&cell.hash()))
}

pub fn decode_item_address(output: &GetMethodOutput) -> Result<AccountId, AuctionError> {
    let method = GET_NFT_ADDRESS_BY_INDEX;
    if !output.succeeded() {
        return Err(AuctionError::ExecutionFailed {
            method,
            exit_code: output.exit_code,
        });
    }
    let [entry] = output.stack.as_slice() else {
        return Err(AuctionError::InvalidResult {
            method,
            reason: format!("expected 1 stack entry, got {}", output.stack.len()),
        });
    };
    if !entry.is_slice() {
        return Err(AuctionError::InvalidResult {
            method,
            reason: format!("expected slice, got {}", entry.kind()),
        });
    }
    entry
        .as_address()
        .map_err(|err| AuctionError::InvalidResult {
            method,
            reason: err.to_string(),
        })?
        .ok_or(AuctionError::EmptyAddress("domain"))
}

/// Runs `get_auction_info` against a freshly read account state.
pub async fn read_auction(
    client: &dyn ChainClient,
    state: &AccountState,
    address: &AccountId,
    timeout: Duration,
) -> Result<Auction, AuctionError> {
    if !state.image.is_deployed() {
        return Err(AuctionError::AuctionUnavailable);
    }
    let output = with_timeout(
        timeout,
        client.run_get_method(&state.image, address, GET_AUCTION_INFO, Vec::new()),
    )
    .await?;
    decode_auction_info(&output)
}

pub fn decode_auction_info(output: &GetMethodOutput) -> Result<Auction, AuctionError> {
    let method = GET_AUCTION_INFO;
    let invalid = |reason: String| AuctionError::InvalidResult { method, reason };

    if !output.succeeded() {
        return Err(AuctionError::ExecutionFailed {
            method,
            exit_code: output.exit_code,
        });
    }
    let [bidder, amount, end_time] = output.stack.as_slice() else {
        return Err(invalid(format!(
            "expected 3 stack entries, got {}",
            output.stack.len()
        )));
    };
    if bidder.is_null() {
        return Err(AuctionError::AuctionUnavailable);
    }

    let max_bid_address = bidder
        .as_address()
        .map_err(|err| invalid(err.to_string()))?
        .ok_or(AuctionError::EmptyAddress("max bid"))?;
    let amount = amount.as_i64().map_err(|err| invalid(err.to_string()))?;
    let max_bid_amount =
        u64::try_from(amount).map_err(|_| invalid(format!("negative bid amount {amount}")))?;
    let end_time = end_time.as_i64().map_err(|err| invalid(err.to_string()))?;

    Ok(Auction {
        max_bid_address,
        max_bid_amount,
        end_time,
    })
}
