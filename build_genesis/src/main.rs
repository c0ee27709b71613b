use dotenv::dotenv;
use eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    buyers::{read_buyers, BuyerRecord},
    cli::GenesisConfig,
    genesis::GenesisDocument,
};

pub mod buyers;
pub mod cli;
pub mod contract;
pub mod error;
pub mod genesis;

/// Base genesis, contract binding, buyer enumeration, merge, write. Any failure aborts
/// the run before the output is touched.
async fn execute(config: &GenesisConfig) -> Result<()> {
    let global = config.get_global();

    let base = GenesisDocument::load(&global.base_genesis).wrap_err("loading base genesis")?;
    let buyers = fetch_buyers(config).await?;

    let genesis = base.with_alloc(&buyers);
    info!("merged {} buyers into alloc", buyers.len());
    genesis
        .write(&global.output, global.no_clobber)
        .wrap_err("writing genesis")?;

    info!(
        "✅  {} written with {} funded buyers",
        global.output.display(),
        buyers.len()
    );
    Ok(())
}

/// Bind the contract and read every buyer. The contract and its client are dropped on
/// return, before the genesis is written.
async fn fetch_buyers(config: &GenesisConfig) -> Result<Vec<BuyerRecord>> {
    let contract = contract::bind(&config.bind_options())
        .await
        .wrap_err("binding contract")?;
    info!(
        rpc_url = %config.get_network().rpc_url,
        contract = %contract.address(),
        block = ?contract.block(),
        "reading buyers"
    );

    read_buyers(&contract, config.get_global().max_buyers)
        .await
        .wrap_err("enumerating buyers")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GenesisConfig::load().wrap_err("loading configuration")?;
    execute(&config).await
}
