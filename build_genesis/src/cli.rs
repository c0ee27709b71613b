use clap::{Args, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tracing::{info, instrument};

use crate::{
    contract::{BindOptions, HeaderCompat},
    error::{GenesisError, LoadError},
};

const DEFAULT_CONFIG_FILE: &str = "build_genesis.toml";
const ENV_PREFIX: &str = "BUILD_GENESIS_";

/// Resolved run configuration: defaults, env, config file and cli, in that order
#[derive(Debug, Clone)]
pub struct GenesisConfig {
    global: GlobalOptions,
    network: Network,
    contract_address: String,
}

impl GenesisConfig {
    pub fn load() -> Result<Self, GenesisError> {
        Self::from_cli(GenesisCli::parse())
    }

    #[instrument(name = "config_load", skip_all)]
    pub fn from_cli(cli: GenesisCli) -> Result<Self, GenesisError> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config_file: GenesisConfigFile = Figment::new()
            .merge(Serialized::defaults(GenesisConfigFile::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Toml::file(&config_path))
            .merge(Serialized::defaults(&cli))
            .extract()
            .map_err(|e| GenesisError::config(&config_path, e))?;

        let selection_err = |msg: String| GenesisError::config(&config_path, LoadError::Selection(msg));

        let network = if let Some(name) = &cli.network {
            config_file
                .networks
                .remove(name)
                .ok_or_else(|| selection_err(format!("network {name} not found")))?
        } else if let Some(url) = &cli.rpc_url {
            Network {
                rpc_url: url.clone(),
                contract_address: None,
                poa: true,
                default: false,
            }
        } else if config_file.networks.len() == 1 {
            config_file
                .networks
                .into_values()
                .next()
                .ok_or_else(|| selection_err("no network configured".to_string()))?
        } else {
            config_file
                .networks
                .into_values()
                .find(|network| network.default)
                .ok_or_else(|| {
                    selection_err("please specify a network, no default network found".to_string())
                })?
        };
        let network = Network {
            poa: network.poa && !cli.no_poa,
            ..network
        };

        let contract_address = cli
            .contract
            .clone()
            .or_else(|| network.contract_address.clone())
            .ok_or_else(|| selection_err("no contract address given".to_string()))?;

        info!(
            "loaded config, globals={:?}, network={:?}, contract={}",
            config_file.global, network, contract_address
        );

        Ok(Self {
            global: config_file.global,
            network,
            contract_address,
        })
    }

    pub fn get_global(&self) -> &GlobalOptions {
        &self.global
    }

    pub fn get_network(&self) -> &Network {
        &self.network
    }

    pub fn bind_options(&self) -> BindOptions<'_> {
        BindOptions {
            rpc_url: &self.network.rpc_url,
            contract_address: &self.contract_address,
            abi: &self.global.abi,
            compat: HeaderCompat::new(self.network.poa),
            block: self.global.block,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct GenesisConfigFile {
    #[serde(flatten)]
    global: GlobalOptions,
    #[serde(default)]
    networks: HashMap<String, Network>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalOptions {
    /// Genesis template whose `alloc` gets replaced
    pub base_genesis: PathBuf,
    pub output: PathBuf,
    /// ABI of the presale contract
    pub abi: PathBuf,
    /// Upper bound on buyers read before giving up on the contract
    pub max_buyers: u64,
    /// Block to read at, latest when unset
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block: Option<u64>,
    #[serde(default)]
    pub no_clobber: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            base_genesis: PathBuf::from("genesis_base.json"),
            output: PathBuf::from("custom_genesis.json"),
            abi: PathBuf::from("abi.json"),
            max_buyers: 1_000_000,
            block: None,
            no_clobber: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub rpc_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contract_address: Option<String>,
    /// Proof-of-authority header compatibility
    #[serde(default = "default_poa")]
    pub poa: bool,
    #[serde(default)]
    default: bool,
}

fn default_poa() -> bool {
    true
}

///
/// CLI
///

#[derive(Debug, Parser, Serialize)]
#[command(version, about, long_about = None)]
pub struct GenesisCli {
    #[serde(skip)]
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    // both mutually exclusive
    #[serde(skip)]
    #[arg(short, long, conflicts_with = "network", value_hint = clap::ValueHint::Url)]
    rpc_url: Option<String>,
    #[serde(skip)]
    #[arg(short, long)]
    network: Option<String>,

    /// Presale contract address, any casing
    #[serde(skip)]
    #[arg(long)]
    contract: Option<String>,
    /// Disable proof-of-authority header compatibility
    #[serde(skip)]
    #[arg(long)]
    no_poa: bool,

    #[command(flatten)]
    #[serde(flatten)]
    global: GlobalArgs,
}

#[derive(Debug, Serialize, Deserialize, Args)]
struct GlobalArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    base_genesis: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    abi: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_buyers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    block: Option<u64>,
    /// Fail instead of replacing an existing output file
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    no_clobber: bool,
}

#[cfg(test)]
mod test {
    use figment::Jail;

    use super::*;

    const CONFIG: &str = r#"
        abi = "artifacts/Presale.json"
        max_buyers = 500

        [networks.fuji]
        rpc_url = "https://api.avax-test.network/ext/bc/C/rpc"
        contract_address = "0x5e820f290c65ecaeb580daf1bb03acebf58ed3fc"
        default = true

        [networks.local]
        rpc_url = "http://127.0.0.1:8545"
        poa = false
    "#;

    fn parse(args: &[&str]) -> GenesisCli {
        GenesisCli::try_parse_from(std::iter::once("build_genesis").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_with_rpc_url() {
        Jail::expect_with(|_| {
            let config =
                GenesisConfig::from_cli(parse(&["--rpc-url", "http://localhost:9650", "--contract", "0x01"]))
                    .unwrap();
            let global = config.get_global();
            assert_eq!(global.base_genesis, PathBuf::from("genesis_base.json"));
            assert_eq!(global.output, PathBuf::from("custom_genesis.json"));
            assert_eq!(global.abi, PathBuf::from("abi.json"));
            assert_eq!(global.max_buyers, 1_000_000);
            assert_eq!(global.block, None);
            assert!(!global.no_clobber);
            assert_eq!(config.get_network().rpc_url, "http://localhost:9650");
            assert!(config.get_network().poa);
            assert_eq!(config.bind_options().contract_address, "0x01");
            Ok(())
        });
    }

    #[test]
    fn file_env_and_cli_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, CONFIG)?;
            jail.set_env("BUILD_GENESIS_OUTPUT", "from_env.json");
            jail.set_env("BUILD_GENESIS_MAX_BUYERS", "7");

            let config = GenesisConfig::from_cli(parse(&["--block", "1200", "--no-clobber"])).unwrap();
            let global = config.get_global();
            // file beats env, cli beats file
            assert_eq!(global.max_buyers, 500);
            assert_eq!(global.output, PathBuf::from("from_env.json"));
            assert_eq!(global.abi, PathBuf::from("artifacts/Presale.json"));
            assert_eq!(global.block, Some(1200));
            assert!(global.no_clobber);

            // default network is picked
            let options = config.bind_options();
            assert_eq!(options.rpc_url, "https://api.avax-test.network/ext/bc/C/rpc");
            assert_eq!(options.contract_address, "0x5e820f290c65ecaeb580daf1bb03acebf58ed3fc");
            assert_eq!(options.compat, HeaderCompat::ProofOfAuthority);

            let config =
                GenesisConfig::from_cli(parse(&["--max-buyers", "3", "--output", "cli.json"])).unwrap();
            assert_eq!(config.get_global().max_buyers, 3);
            assert_eq!(config.get_global().output, PathBuf::from("cli.json"));
            Ok(())
        });
    }

    #[test]
    fn named_network_and_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", CONFIG)?;

            let config = GenesisConfig::from_cli(parse(&[
                "--config",
                "custom.toml",
                "--network",
                "local",
                "--contract",
                "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            ]))
            .unwrap();
            let options = config.bind_options();
            assert_eq!(options.rpc_url, "http://127.0.0.1:8545");
            assert_eq!(options.contract_address, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
            assert_eq!(options.compat, HeaderCompat::Standard);

            let config = GenesisConfig::from_cli(parse(&[
                "--config",
                "custom.toml",
                "--network",
                "fuji",
                "--no-poa",
            ]))
            .unwrap();
            assert_eq!(config.bind_options().compat, HeaderCompat::Standard);
            Ok(())
        });
    }

    #[test]
    fn selection_errors() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, CONFIG)?;

            let err = GenesisConfig::from_cli(parse(&["--network", "mainnet"])).unwrap_err();
            assert!(matches!(
                err,
                GenesisError::ConfigLoad {
                    source: LoadError::Selection(_),
                    ..
                }
            ));

            // local has no contract address
            let err = GenesisConfig::from_cli(parse(&["--network", "local"])).unwrap_err();
            assert!(matches!(
                err,
                GenesisError::ConfigLoad {
                    source: LoadError::Selection(_),
                    ..
                }
            ));
            Ok(())
        });
    }

    #[test]
    fn rpc_url_and_network_conflict() {
        assert!(GenesisCli::try_parse_from([
            "build_genesis",
            "--rpc-url",
            "http://localhost:8545",
            "--network",
            "fuji"
        ])
        .is_err());
    }
}
