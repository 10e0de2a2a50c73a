use crate::{
    address::AccountId,
    auction::{AuctionError, DnsCollection},
    config::DomainSpec,
};
use tracing::info;

/// A configured domain resolved to its auction contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub address: AccountId,
    pub max_bid: u64,
}

#[derive(Debug)]
pub struct DomainRegistry {
    domains: Vec<Domain>,
}

impl DomainRegistry {
    /// Resolves every configured domain through the collection. The first
    /// failure aborts resolution.
    pub async fn resolve(
        collection: &DnsCollection,
        specs: &[DomainSpec],
    ) -> Result<Self, ResolveError> {
        let mut domains = Vec::with_capacity(specs.len());
        for spec in specs {
            let address = collection
                .resolve_item(&spec.name)
                .await
                .map_err(|source| ResolveError {
                    name: spec.name.clone(),
                    source,
                })?;
            info!(domain = %spec.name, contract = %address, "domain contract resolved");
            domains.push(Domain {
                name: spec.name.clone(),
                address,
                max_bid: spec.max_bid,
            });
        }
        Ok(Self { domains })
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn into_domains(self) -> Vec<Domain> {
        self.domains
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unable to resolve domain {name:?}: {source}")]
pub struct ResolveError {
    pub name: String,
    #[source]
    pub source: AuctionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    AuctionEnded { winning: bool },
    BidLimitReached,
}

/// Outcome of one domain worker, logged when it stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSummary {
    pub name: String,
    pub reason: FinishReason,
    pub bids_placed: u32,
    pub last_bid: Option<u64>,
    pub failures: u32,
}

/// Running counters a worker keeps while it polls.
#[derive(Debug, Default, Clone)]
pub struct BidTracker {
    bids_placed: u32,
    last_bid: Option<u64>,
    failures: u32,
    last_error: Option<String>,
}

impl BidTracker {
    pub fn record_bid(&mut self, amount: u64) {
        self.bids_placed = self.bids_placed.saturating_add(1);
        self.last_bid = Some(amount);
        self.last_error = None;
    }

    pub fn record_failure(&mut self, error: String) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.last_error = Some(error);
        self.failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn summary(&self, name: &str, reason: FinishReason) -> DomainSummary {
        DomainSummary {
            name: name.to_owned(),
            reason,
            bids_placed: self.bids_placed,
            last_bid: self.last_bid,
            failures: self.failures,
        }
    }
}
