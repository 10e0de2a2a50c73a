mod address;
mod app;
mod auction;
mod bids;
mod cell;
mod chain;
mod config;
mod logging;
mod pricing;
mod registry;
mod seed;
mod toncenter;
mod transaction;
mod validate;
mod wallet;
mod worker;

use crate::{app::AuctionBot, config::Config, logging::init_logging, toncenter::ToncenterClient};
use eyre::Result;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let config = Config::from_env()?;
    let client = ToncenterClient::new(
        config.endpoint.clone(),
        config.api_key.clone(),
        config.settings.rpc_timeout(),
    )?;
    AuctionBot::build_with_client(Arc::new(client), config)
        .await?
        .run()
        .await
}
