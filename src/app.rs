use crate::{
    auction::DnsCollection,
    bids::{BidEngine, WalletSequencer},
    chain::ChainClient,
    config::Config,
    logging::log_summary,
    registry::{DomainRegistry, DomainSummary},
    seed::derive_private_key,
    transaction::TxConfig,
    validate::PreflightValidator,
    wallet::Wallet,
    worker::{DomainWorker, WorkerSettings},
};
use eyre::{Result, WrapErr, eyre};
use std::{pin::pin, sync::Arc, time::Duration};
use tokio::{
    signal,
    sync::mpsc::{self, UnboundedReceiver},
    time::sleep,
};
use tracing::{Instrument, info, info_span, instrument};

pub struct AuctionBot {
    workers: Vec<DomainWorker>,
    start_stagger: Duration,
}

impl AuctionBot {
    pub async fn build_with_client(client: Arc<dyn ChainClient>, config: Config) -> Result<Self> {
        info!(
            domains = config.domains.len(),
            endpoint = %config.endpoint,
            "configuration loaded"
        );
        let settings = &config.settings;

        let key = derive_private_key(config.seed_phrase.expose())
            .wrap_err("failed to derive wallet key from SEED_PHRASE")?;
        let wallet = Wallet::new(key, settings.wallet_version, settings.subwallet_id)
            .wrap_err("failed to build wallet")?;
        info!(
            wallet = %wallet.address(),
            public_key = %hex::encode(wallet.public_key()),
            version = %wallet.version(),
            "wallet loaded"
        );

        let collection = DnsCollection::load(
            client.clone(),
            config.collection_address,
            settings.rpc_timeout(),
        )
        .await
        .wrap_err("failed to fetch collection state")?;
        if !collection.is_deployed() {
            return Err(eyre!(
                "collection {} is not deployed",
                collection.address()
            ));
        }

        PreflightValidator::new(&config.domains).run()?;

        let registry = DomainRegistry::resolve(&collection, &config.domains).await?;
        info!(domains = registry.len(), "domains resolved");

        let engine = Arc::new(BidEngine::new(
            client.clone(),
            Arc::new(wallet),
            Arc::new(WalletSequencer::default()),
            TxConfig::default().with_ttl(settings.message_ttl()),
            settings.rpc_timeout(),
        ));
        let worker_settings = WorkerSettings::from(settings);
        let workers = registry
            .into_domains()
            .into_iter()
            .map(|domain| {
                DomainWorker::new(domain, client.clone(), engine.clone(), worker_settings)
            })
            .collect();

        Ok(Self {
            workers,
            start_stagger: settings.start_stagger(),
        })
    }

    /// Launches the workers and logs each summary as it arrives. Returns on
    /// Ctrl-C; finished workers are not restarted.
    #[instrument(skip_all)]
    pub async fn run(self) -> Result<()> {
        let mut summaries = launch(self.workers, self.start_stagger);
        let mut shutdown = pin!(signal::ctrl_c());

        loop {
            tokio::select! {
                summary = summaries.recv() => match summary {
                    Some(summary) => log_summary(&summary),
                    None => {
                        info!("all domain workers finished");
                        break;
                    }
                },
                result = &mut shutdown => {
                    result.wrap_err("failed to listen for shutdown signal")?;
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }

        shutdown
            .await
            .wrap_err("failed to listen for shutdown signal")?;
        info!("shutdown requested");
        Ok(())
    }
}

/// Starts one task per worker, `stagger` apart, from a scheduler task so the
/// caller is never blocked. The receiver closes once every worker is done.
fn launch(workers: Vec<DomainWorker>, stagger: Duration) -> UnboundedReceiver<DomainSummary> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        for (idx, worker) in workers.into_iter().enumerate() {
            if idx > 0 {
                sleep(stagger).await;
            }
            let span = info_span!("domain", name = %worker.name());
            let tx = tx.clone();
            tokio::spawn(
                async move {
                    let summary = worker.run().await;
                    let _ = tx.send(summary);
                }
                .instrument(span),
            );
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::AccountId,
        cell::CellBuilder,
        chain::{
            AccountState, AccountStatus, ContractImage, GetMethodOutput, MockChainClient,
            StackValue,
        },
        config::{DomainSpec, SeedPhrase, Settings},
        registry::{Domain, FinishReason},
    };
    use tokio::time::Instant;

    const PHRASE: &str = "act actor across account ability about above action about about actor able actor abuse across act acquire absent access abstract act able acquire about";

    fn deployed(balance: u64) -> AccountState {
        AccountState {
            balance,
            status: AccountStatus::Active,
            image: ContractImage {
                code: vec![1],
                data: vec![1],
            },
        }
    }

    fn address_output(address: AccountId) -> GetMethodOutput {
        let slice = CellBuilder::new()
            .store_address(Some(&address))
            .unwrap()
            .build();
        GetMethodOutput {
            exit_code: 0,
            stack: vec![StackValue::Slice(slice)],
        }
    }

    fn ended_auction_output() -> GetMethodOutput {
        let bidder = CellBuilder::new()
            .store_address(Some(&AccountId::new(0, [0xbb; 32])))
            .unwrap()
            .build();
        GetMethodOutput {
            exit_code: 0,
            stack: vec![
                StackValue::Slice(bidder),
                StackValue::from(1_000_000_000),
                StackValue::from(1),
            ],
        }
    }

    fn config(domains: Vec<DomainSpec>) -> Config {
        Config {
            endpoint: "https://toncenter.com/api/v2/".parse().unwrap(),
            api_key: None,
            seed_phrase: SeedPhrase::from(PHRASE.to_owned()),
            collection_address: AccountId::new(0, [0xcc; 32]),
            domains,
            settings: Settings::default(),
        }
    }

    fn spec(name: &str) -> DomainSpec {
        DomainSpec {
            name: name.to_owned(),
            max_bid: 5_000_000_000,
        }
    }

    #[tokio::test]
    async fn builds_one_worker_per_domain() {
        let mut client = MockChainClient::new();
        client
            .expect_account_state()
            .times(1)
            .returning(|_| Ok(deployed(0)));
        client
            .expect_run_get_method()
            .times(2)
            .returning(|_, _, _, _| Ok(address_output(AccountId::new(0, [0x11; 32]))));

        let bot = AuctionBot::build_with_client(
            Arc::new(client),
            config(vec![spec("alpha"), spec("beta")]),
        )
        .await
        .unwrap();
        assert_eq!(bot.workers.len(), 2);
        assert_eq!(bot.start_stagger, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn undeployed_collection_is_fatal() {
        let mut client = MockChainClient::new();
        client.expect_account_state().returning(|_| {
            Ok(AccountState {
                image: ContractImage::default(),
                ..deployed(0)
            })
        });
        client.expect_run_get_method().never();

        let result =
            AuctionBot::build_with_client(Arc::new(client), config(vec![spec("alpha")])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_seed_is_fatal_before_any_read() {
        let mut client = MockChainClient::new();
        client.expect_account_state().never();

        let mut config = config(vec![spec("alpha")]);
        config.seed_phrase = SeedPhrase::from("too few words".to_owned());
        let result = AuctionBot::build_with_client(Arc::new(client), config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_domain_list_is_fatal() {
        let mut client = MockChainClient::new();
        client
            .expect_account_state()
            .returning(|_| Ok(deployed(0)));
        client.expect_run_get_method().never();

        let result = AuctionBot::build_with_client(
            Arc::new(client),
            config(vec![spec("alpha"), spec("alpha")]),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn launches_workers_staggered() {
        let mut client = MockChainClient::new();
        client
            .expect_account_state()
            .times(2)
            .returning(|_| Ok(deployed(0)));
        client
            .expect_run_get_method()
            .times(2)
            .returning(|_, _, _, _| Ok(ended_auction_output()));
        let client: Arc<dyn ChainClient> = Arc::new(client);

        let wallet = Wallet::new([5u8; 32], Default::default(), 0).unwrap();
        let engine = Arc::new(BidEngine::new(
            client.clone(),
            Arc::new(wallet),
            Arc::new(WalletSequencer::default()),
            TxConfig::default(),
            Duration::from_secs(10),
        ));
        let settings = WorkerSettings::from(&Settings::default());
        let workers = ["alpha", "beta"]
            .into_iter()
            .map(|name| {
                DomainWorker::new(
                    Domain {
                        name: name.to_owned(),
                        address: AccountId::new(0, [0x11; 32]),
                        max_bid: 1,
                    },
                    client.clone(),
                    engine.clone(),
                    settings,
                )
            })
            .collect();

        let started = Instant::now();
        let mut summaries = launch(workers, Duration::from_secs(60));

        let first = summaries.recv().await.unwrap();
        assert_eq!(first.name, "alpha");
        let second = summaries.recv().await.unwrap();
        assert_eq!(second.name, "beta");
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(
            second.reason,
            FinishReason::AuctionEnded { winning: false }
        );
        assert!(summaries.recv().await.is_none());
    }
}
