use crate::{
    address::AccountId,
    toncenter::DEFAULT_ENDPOINT,
    wallet::{DEFAULT_SUBWALLET_ID, WalletVersion},
};
use eyre::{Result, WrapErr, eyre};
use reqwest::Url;
use serde::Deserialize;
use std::{env::VarError, fmt, fs, path::PathBuf, time::Duration};

const DEFAULT_DOMAINS_FILE: &str = "domains.toml";

#[derive(Debug)]
pub struct Config {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub seed_phrase: SeedPhrase,
    pub collection_address: AccountId,
    pub domains: Vec<DomainSpec>,
    pub settings: Settings,
}

/// Mnemonic kept out of `Debug` output.
pub struct SeedPhrase(String);

impl SeedPhrase {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for SeedPhrase {
    fn from(phrase: String) -> Self {
        Self(phrase)
    }
}

impl fmt::Debug for SeedPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeedPhrase(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec {
    pub name: String,
    /// Highest bid amount in nanotons. Transfer fees are paid on top, so the
    /// wallet can spend slightly more than this per bid.
    pub max_bid: u64,
}

/// What a worker does once a bid would exceed its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BidLimitPolicy {
    #[default]
    Retry,
    AbandonDomain,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll_interval_secs: u64,
    pub retry_backoff_secs: u64,
    pub rpc_timeout_secs: u64,
    pub start_stagger_secs: u64,
    pub message_ttl_secs: u64,
    pub bid_limit_policy: BidLimitPolicy,
    pub wallet_version: WalletVersion,
    pub subwallet_id: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            retry_backoff_secs: 60,
            rpc_timeout_secs: 10,
            start_stagger_secs: 60,
            message_ttl_secs: 120,
            bid_limit_policy: BidLimitPolicy::Retry,
            wallet_version: WalletVersion::V3R2,
            subwallet_id: DEFAULT_SUBWALLET_ID,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::from_secs(self.start_stagger_secs)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let endpoint = match optional_env("TONCENTER_ENDPOINT", |value| {
            Url::parse(value).map_err(|err| eyre!("TONCENTER_ENDPOINT is not a valid URL: {err}"))
        })? {
            Some(url) => url,
            None => Url::parse(DEFAULT_ENDPOINT)?,
        };

        let api_key = optional_env("TONCENTER_API_KEY", |value| Ok(value.to_owned()))?;

        let seed_phrase = parse_env("SEED_PHRASE", "wallet mnemonic", |value| {
            Ok(SeedPhrase::from(value.to_owned()))
        })?;

        let path = optional_env("DOMAINS_FILE", |value| Ok(PathBuf::from(value)))?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOMAINS_FILE));
        let contents = fs::read_to_string(&path)
            .wrap_err(format!("failed to read domains config at {}", path.display()))?;
        let file = parse_domain_file(&contents)?;

        Ok(Self {
            endpoint: ensure_trailing_slash(endpoint),
            api_key,
            seed_phrase,
            collection_address: file.collection_address,
            domains: file.domains,
            settings: file.settings,
        })
    }
}

#[derive(Debug)]
pub struct DomainFile {
    pub collection_address: AccountId,
    pub domains: Vec<DomainSpec>,
    pub settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDomainFile {
    collection_address: String,
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    domains: Vec<RawDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDomain {
    name: String,
    max_bid: Amount,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Amount {
    Integer(u64),
    Text(String),
}

impl RawDomain {
    fn into_spec(self) -> Result<DomainSpec> {
        let max_bid = match self.max_bid {
            Amount::Integer(value) => value,
            Amount::Text(raw) => raw.trim().replace('_', "").parse::<u64>().map_err(|_| {
                eyre!(
                    "domain {} max_bid is not a valid nanoton amount: {raw}",
                    self.name
                )
            })?,
        };
        Ok(DomainSpec {
            name: self.name.trim().to_owned(),
            max_bid,
        })
    }
}

pub fn parse_domain_file(contents: &str) -> Result<DomainFile> {
    let raw: RawDomainFile = toml::from_str(contents)
        .wrap_err("failed to parse domains config (expected TOML format)")?;

    let collection_address = raw.collection_address.parse::<AccountId>().map_err(|err| {
        eyre!(
            "collection_address is not a valid address ({err}): {}",
            raw.collection_address
        )
    })?;

    let domains = raw
        .domains
        .into_iter()
        .map(RawDomain::into_spec)
        .collect::<Result<Vec<_>>>()?;

    Ok(DomainFile {
        collection_address,
        domains,
        settings: raw.settings,
    })
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_env<T, F>(key: &str, desc: &str, parser: F) -> Result<T>
where
    F: FnOnce(&str) -> Result<T>,
{
    let raw = dotenvy::var(key).wrap_err(format!("missing {key} ({desc})"))?;
    let value = raw.trim();
    if value.is_empty() {
        return Err(eyre!("{key} cannot be empty ({desc})"));
    }

    parser(value)
}

fn optional_env<T, F>(key: &str, parser: F) -> Result<Option<T>>
where
    F: FnOnce(&str) -> Result<T>,
{
    match dotenvy::var(key) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                parser(value).map(Some)
            }
        }
        Err(dotenvy::Error::EnvVar(VarError::NotPresent)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = "EQC3dNlesgVD8YbAazcauIrXBPfiVhMMr5YYk2in0Mtsz0Bz";

    #[test]
    fn parses_minimal_file_with_defaults() {
        let file = parse_domain_file(&format!(
            r#"
            collection_address = "{COLLECTION}"

            [[domains]]
            name = "alpha"
            max_bid = "25_000_000_000"

            [[domains]]
            name = "beta"
            max_bid = 3000000000
            "#
        ))
        .unwrap();

        assert_eq!(file.collection_address, COLLECTION.parse().unwrap());
        assert_eq!(
            file.domains,
            vec![
                DomainSpec {
                    name: "alpha".to_owned(),
                    max_bid: 25_000_000_000,
                },
                DomainSpec {
                    name: "beta".to_owned(),
                    max_bid: 3_000_000_000,
                },
            ]
        );
        assert_eq!(file.settings.poll_interval(), Duration::from_secs(300));
        assert_eq!(file.settings.retry_backoff(), Duration::from_secs(60));
        assert_eq!(file.settings.rpc_timeout(), Duration::from_secs(10));
        assert_eq!(file.settings.start_stagger(), Duration::from_secs(60));
        assert_eq!(file.settings.bid_limit_policy, BidLimitPolicy::Retry);
        assert_eq!(file.settings.wallet_version, WalletVersion::V3R2);
    }

    #[test]
    fn parses_settings_overrides() {
        let file = parse_domain_file(&format!(
            r#"
            collection_address = "{COLLECTION}"

            [settings]
            poll_interval_secs = 120
            bid_limit_policy = "abandon-domain"
            wallet_version = "v3r2"
            "#
        ))
        .unwrap();
        assert_eq!(file.settings.poll_interval_secs, 120);
        assert_eq!(file.settings.retry_backoff_secs, 60);
        assert_eq!(file.settings.bid_limit_policy, BidLimitPolicy::AbandonDomain);
        assert!(file.domains.is_empty());
    }

    #[test]
    fn rejects_bad_amounts_and_addresses() {
        let bad_amount = format!(
            r#"
            collection_address = "{COLLECTION}"
            [[domains]]
            name = "alpha"
            max_bid = "lots"
            "#
        );
        assert!(parse_domain_file(&bad_amount).is_err());

        let bad_address = r#"
            collection_address = "not-an-address"
            "#;
        assert!(parse_domain_file(bad_address).is_err());

        let unknown_policy = format!(
            r#"
            collection_address = "{COLLECTION}"
            [settings]
            bid_limit_policy = "panic"
            "#
        );
        assert!(parse_domain_file(&unknown_policy).is_err());
    }

    #[test]
    fn seed_phrase_is_redacted() {
        let phrase = SeedPhrase::from("secret words".to_owned());
        assert_eq!(format!("{phrase:?}"), "SeedPhrase(<redacted>)");
        assert_eq!(phrase.expose(), "secret words");
    }

    #[test]
    fn endpoint_gets_trailing_slash() {
        let url = ensure_trailing_slash(Url::parse("https://example.com/api/v2").unwrap());
        assert_eq!(url.as_str(), "https://example.com/api/v2/");
    }
}
