use crate::{
    address::AccountId,
    cell::CellError,
    wallet::{Transfer, Wallet},
};
use std::time::Duration;

const BID_COMMENT: &str = "bid";
/// Forwarding fees are paid from the wallet balance on top of the
/// transferred value.
const MODE_PAY_FEES_SEPARATELY: u8 = 1;
const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct TxConfig {
    pub comment: String,
    pub bounce: bool,
    pub mode: u8,
    pub ttl: Duration,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            comment: BID_COMMENT.to_owned(),
            bounce: true,
            mode: MODE_PAY_FEES_SEPARATELY,
            ttl: DEFAULT_MESSAGE_TTL,
        }
    }
}

impl TxConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

pub struct TxBuilder<'a> {
    wallet: &'a Wallet,
    config: &'a TxConfig,
}

impl<'a> TxBuilder<'a> {
    pub fn new(wallet: &'a Wallet, config: &'a TxConfig) -> Self {
        Self { wallet, config }
    }

    pub fn bid_transfer(&self, recipient: AccountId, amount: u64) -> Transfer {
        Transfer {
            recipient,
            amount,
            comment: self.config.comment.clone(),
            bounce: self.config.bounce,
            mode: self.config.mode,
        }
    }

    /// Signed external message for a single bid, valid for the configured TTL
    /// counted from `now` (unix seconds).
    pub fn build_bid_message(
        &self,
        recipient: AccountId,
        amount: u64,
        seqno: u32,
        now: u64,
    ) -> Result<Vec<u8>, CellError> {
        let valid_until = now
            .saturating_add(self.config.ttl.as_secs())
            .min(u32::MAX as u64) as u32;
        let transfer = self.bid_transfer(recipient, amount);
        self.wallet
            .transfer_message(seqno, valid_until, std::slice::from_ref(&transfer))
    }
}
