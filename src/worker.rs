use crate::{
    auction::{AuctionError, read_auction},
    bids::{BidEngine, BidError},
    chain::{ChainClient, ChainError, ErrorClass, with_timeout},
    config::{BidLimitPolicy, Settings},
    pricing::format_ton,
    registry::{BidTracker, Domain, DomainSummary, FinishReason},
};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Polling,
    Deciding,
    Bidding,
    Idle,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Polling => write!(f, "Polling"),
            Phase::Deciding => write!(f, "Deciding"),
            Phase::Bidding => write!(f, "Bidding"),
            Phase::Idle => write!(f, "Idle"),
            Phase::Finished => write!(f, "Finished"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseTracker {
    current: Phase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: Phase::Polling,
        }
    }
}

impl PhaseTracker {
    pub fn phase(&self) -> Phase {
        self.current
    }

    pub fn advance(&mut self, next: Phase) {
        if self.current != next {
            info!(phase = %self.current, next = %next, "phase advanced");
            self.current = next;
        }
    }
}

/// Failure of one poll cycle. Contained within the worker that hit it.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("account state read failed: {0}")]
    AccountState(#[source] ChainError),
    #[error("auction read failed: {0}")]
    Auction(#[from] AuctionError),
    #[error("bid failed: {0}")]
    Bid(#[from] BidError),
}

impl WorkerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::AccountState(err) => err.class(),
            WorkerError::Auction(err) => err.class(),
            WorkerError::Bid(err) => err.class(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub rpc_timeout: Duration,
    pub bid_limit_policy: BidLimitPolicy,
}

impl From<&Settings> for WorkerSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            retry_backoff: settings.retry_backoff(),
            rpc_timeout: settings.rpc_timeout(),
            bid_limit_policy: settings.bid_limit_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Wait(Duration),
    Finished(FinishReason),
}

pub struct DomainWorker {
    domain: Domain,
    client: Arc<dyn ChainClient>,
    engine: Arc<BidEngine>,
    settings: WorkerSettings,
    phase: PhaseTracker,
    tracker: BidTracker,
}

impl DomainWorker {
    pub fn new(
        domain: Domain,
        client: Arc<dyn ChainClient>,
        engine: Arc<BidEngine>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            domain,
            client,
            engine,
            settings,
            phase: PhaseTracker::default(),
            tracker: BidTracker::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.domain.name
    }

    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    /// Polls until the auction ends or the domain is abandoned.
    pub async fn run(mut self) -> DomainSummary {
        info!(
            contract = %self.domain.address,
            max_bid = self.domain.max_bid,
            max_bid_ton = %format_ton(self.domain.max_bid),
            "worker started"
        );
        loop {
            match self.step().await {
                Cycle::Wait(delay) => sleep(delay).await,
                Cycle::Finished(reason) => {
                    return self.tracker.summary(&self.domain.name, reason);
                }
            }
        }
    }

    /// One read, decide, act cycle.
    pub async fn step(&mut self) -> Cycle {
        self.phase.advance(Phase::Polling);

        let state = match with_timeout(
            self.settings.rpc_timeout,
            self.client.account_state(&self.domain.address),
        )
        .await
        {
            Ok(state) => state,
            Err(err) => return self.fail(WorkerError::AccountState(err)),
        };

        let auction = match read_auction(
            self.client.as_ref(),
            &state,
            &self.domain.address,
            self.settings.rpc_timeout,
        )
        .await
        {
            Ok(auction) => auction,
            Err(err) => return self.fail(err.into()),
        };

        self.phase.advance(Phase::Deciding);
        let winning = auction.max_bid_address == *self.engine.wallet_address();

        if auction.has_ended(unix_now()) {
            self.phase.advance(Phase::Finished);
            info!(
                winning,
                amount = auction.max_bid_amount,
                ton = %format_ton(auction.max_bid_amount),
                "auction finished"
            );
            return Cycle::Finished(FinishReason::AuctionEnded { winning });
        }

        if winning {
            self.phase.advance(Phase::Idle);
            info!(
                amount = auction.max_bid_amount,
                ton = %format_ton(auction.max_bid_amount),
                "wallet holds the highest bid"
            );
            return Cycle::Wait(self.settings.poll_interval);
        }

        self.phase.advance(Phase::Bidding);
        match self.engine.place_bid(&self.domain, &auction).await {
            Ok(amount) => {
                self.tracker.record_bid(amount);
                self.phase.advance(Phase::Idle);
                Cycle::Wait(self.settings.poll_interval)
            }
            Err(err @ BidError::BidLimitExceeded { .. })
                if self.settings.bid_limit_policy == BidLimitPolicy::AbandonDomain =>
            {
                self.tracker.record_failure(err.to_string());
                self.phase.advance(Phase::Finished);
                warn!(error = %err, "bid limit reached, abandoning domain");
                Cycle::Finished(FinishReason::BidLimitReached)
            }
            Err(err) => {
                self.phase.advance(Phase::Idle);
                self.fail(err.into())
            }
        }
    }

    /// Every failed cycle, bid refusals included, retries after the backoff.
    fn fail(&mut self, err: WorkerError) -> Cycle {
        let class = err.class();
        let delay = self.settings.retry_backoff;
        let failures = self.tracker.record_failure(err.to_string());
        warn!(
            phase = %self.phase.phase(),
            error = %err,
            class = ?class,
            failures,
            retry_in = ?delay,
            "cycle failed"
        );
        Cycle::Wait(delay)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
