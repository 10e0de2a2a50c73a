use crate::{
    pricing::format_ton,
    registry::{DomainSummary, FinishReason},
};
use eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_logging() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dns_auction_bidder=info".parse()?),
        )
        .init();
    Ok(())
}

pub fn log_summary(summary: &DomainSummary) {
    let last_bid_ton = summary.last_bid.map(format_ton);
    match summary.reason {
        FinishReason::AuctionEnded { winning: true } => info!(
            domain = %summary.name,
            bids_placed = summary.bids_placed,
            last_bid = ?summary.last_bid,
            last_bid_ton = ?last_bid_ton,
            failures = summary.failures,
            "domain summary (auction won)"
        ),
        FinishReason::AuctionEnded { winning: false } => warn!(
            domain = %summary.name,
            bids_placed = summary.bids_placed,
            last_bid = ?summary.last_bid,
            last_bid_ton = ?last_bid_ton,
            failures = summary.failures,
            "domain summary (auction lost)"
        ),
        FinishReason::BidLimitReached => warn!(
            domain = %summary.name,
            bids_placed = summary.bids_placed,
            last_bid = ?summary.last_bid,
            last_bid_ton = ?last_bid_ton,
            failures = summary.failures,
            "domain summary (bid limit reached, domain abandoned)"
        ),
    }
}
