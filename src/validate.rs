use crate::config::DomainSpec;
use eyre::{Result, eyre};
use std::collections::HashSet;

pub struct PreflightValidator<'a> {
    domains: &'a [DomainSpec],
}

impl<'a> PreflightValidator<'a> {
    pub fn new(domains: &'a [DomainSpec]) -> Self {
        Self { domains }
    }

    pub fn run(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(eyre!("no domains configured"));
        }
        for (idx, domain) in self.domains.iter().enumerate() {
            self.ensure_name_valid(idx, domain)?;
            self.ensure_max_bid_positive(idx, domain)?;
        }
        self.ensure_unique_names()?;
        Ok(())
    }

    fn ensure_name_valid(&self, idx: usize, domain: &DomainSpec) -> Result<()> {
        let domain_no = idx + 1;
        if domain.name.is_empty() {
            return Err(eyre!("domain #{domain_no} has an empty name"));
        }
        if domain.name.contains('.') || domain.name.chars().any(char::is_whitespace) {
            return Err(eyre!(
                "domain #{domain_no} ({:?}) must be a bare name without dots or whitespace",
                domain.name
            ));
        }
        Ok(())
    }

    fn ensure_max_bid_positive(&self, idx: usize, domain: &DomainSpec) -> Result<()> {
        if domain.max_bid == 0 {
            let domain_no = idx + 1;
            return Err(eyre!(
                "domain #{domain_no} ({}) max_bid must be greater than zero",
                domain.name
            ));
        }
        Ok(())
    }

    fn ensure_unique_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (idx, domain) in self.domains.iter().enumerate() {
            if !seen.insert(domain.name.as_str()) {
                let domain_no = idx + 1;
                return Err(eyre!(
                    "domain #{domain_no} ({}) is configured more than once",
                    domain.name
                ));
            }
        }
        Ok(())
    }
}
