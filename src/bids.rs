use crate::{
    address::AccountId,
    auction::Auction,
    cell::CellError,
    chain::{ChainClient, ChainError, ErrorClass, with_timeout},
    pricing::{format_ton, next_bid},
    registry::Domain,
    transaction::{TxBuilder, TxConfig},
    wallet::Wallet,
};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};
use tracing::{debug, info};

const SEQNO_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SEQNO_WAIT_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BidError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("not enough coins for bid: balance {balance}, bid {bid}")]
    InsufficientFunds { balance: u64, bid: u64 },
    #[error("bid limit reached: bid {bid} exceeds max_bid {max_bid}")]
    BidLimitExceeded { bid: u64, max_bid: u64 },
    #[error("next bid does not fit in 64 bits")]
    AmountOverflow,
    #[error("wallet seqno {seqno} has not advanced past {last}")]
    SeqnoStale { seqno: u32, last: u32 },
    #[error("unable to build transfer message: {0}")]
    Message(#[from] CellError),
}

impl BidError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BidError::Chain(err) => err.class(),
            BidError::InsufficientFunds { .. } => ErrorClass::InsufficientFunds,
            BidError::BidLimitExceeded { .. } => ErrorClass::BidLimitExceeded,
            BidError::SeqnoStale { .. } => ErrorClass::TransientNetwork,
            BidError::AmountOverflow | BidError::Message(_) => ErrorClass::Decode,
        }
    }
}

/// Serialises "read seqno, sign, submit" for one wallet across all workers.
#[derive(Debug)]
pub struct WalletSequencer {
    last_submitted: Mutex<Option<Submitted>>,
    poll_interval: Duration,
    wait_limit: Duration,
}

/// A transfer the node accepted that may still land until `expires_at`.
#[derive(Debug, Clone, Copy)]
struct Submitted {
    seqno: u32,
    expires_at: Instant,
}

impl Default for WalletSequencer {
    fn default() -> Self {
        Self::new(SEQNO_POLL_INTERVAL, SEQNO_WAIT_LIMIT)
    }
}

impl WalletSequencer {
    pub fn new(poll_interval: Duration, wait_limit: Duration) -> Self {
        Self {
            last_submitted: Mutex::new(None),
            poll_interval,
            wait_limit,
        }
    }

    /// Holds the lock while a fresh seqno is read, `build` signs a message
    /// for it and the message is submitted. Returns the seqno used.
    ///
    /// `valid_for` is the lifetime of the signed message. Once it has passed
    /// the previous transfer can no longer land and its seqno is reusable.
    pub async fn submit<F>(
        &self,
        client: &dyn ChainClient,
        wallet: &AccountId,
        timeout: Duration,
        valid_for: Duration,
        build: F,
    ) -> Result<u32, BidError>
    where
        F: FnOnce(u32) -> Result<Vec<u8>, CellError>,
    {
        let mut last = self.last_submitted.lock().await;
        if last.is_some_and(|submitted| Instant::now() > submitted.expires_at) {
            debug!("previous transfer expired, releasing its seqno");
            *last = None;
        }

        let pending = last.map(|submitted| submitted.seqno);
        let seqno = match self.fresh_seqno(client, wallet, timeout, pending).await {
            Ok(seqno) => seqno,
            Err(err @ BidError::SeqnoStale { .. }) => {
                // Next attempt signs for whatever seqno the chain reports.
                *last = None;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let boc = build(seqno)?;
        with_timeout(timeout, client.send_message(boc)).await?;
        *last = Some(Submitted {
            seqno,
            expires_at: Instant::now() + valid_for,
        });
        Ok(seqno)
    }

    async fn fresh_seqno(
        &self,
        client: &dyn ChainClient,
        wallet: &AccountId,
        timeout: Duration,
        pending: Option<u32>,
    ) -> Result<u32, BidError> {
        let deadline = Instant::now() + self.wait_limit;
        loop {
            let seqno = with_timeout(timeout, client.seqno(wallet)).await?;
            let Some(last) = pending.filter(|last| seqno <= *last) else {
                return Ok(seqno);
            };
            if Instant::now() + self.poll_interval > deadline {
                return Err(BidError::SeqnoStale { seqno, last });
            }
            debug!(seqno, last, "waiting for previous transfer to land");
            sleep(self.poll_interval).await;
        }
    }
}

pub struct BidEngine {
    client: Arc<dyn ChainClient>,
    wallet: Arc<Wallet>,
    sequencer: Arc<WalletSequencer>,
    tx: TxConfig,
    timeout: Duration,
}

impl BidEngine {
    pub fn new(
        client: Arc<dyn ChainClient>,
        wallet: Arc<Wallet>,
        sequencer: Arc<WalletSequencer>,
        tx: TxConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            wallet,
            sequencer,
            tx,
            timeout,
        }
    }

    pub fn wallet_address(&self) -> &AccountId {
        self.wallet.address()
    }

    /// Outbids `auction` on `domain`. Submits at most one transfer and
    /// returns the committed amount once the node accepts it.
    pub async fn place_bid(&self, domain: &Domain, auction: &Auction) -> Result<u64, BidError> {
        let amount = next_bid(auction.max_bid_amount).ok_or(BidError::AmountOverflow)?;

        let state = with_timeout(
            self.timeout,
            self.client.account_state(self.wallet.address()),
        )
        .await?;
        if state.balance < amount {
            return Err(BidError::InsufficientFunds {
                balance: state.balance,
                bid: amount,
            });
        }
        if amount > domain.max_bid {
            return Err(BidError::BidLimitExceeded {
                bid: amount,
                max_bid: domain.max_bid,
            });
        }

        let builder = TxBuilder::new(&self.wallet, &self.tx);
        let now = unix_now();
        let seqno = self
            .sequencer
            .submit(
                self.client.as_ref(),
                self.wallet.address(),
                self.timeout,
                self.tx.ttl,
                |seqno| builder.build_bid_message(domain.address, amount, seqno, now),
            )
            .await?;

        info!(
            amount,
            ton = %format_ton(amount),
            seqno,
            "bid placed"
        );
        Ok(amount)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
