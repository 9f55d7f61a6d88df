//! Ladder engine command line

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use ethers::signers::LocalWallet;
use ethers::types::{Address, U256};
use ladder_amm::{BigDecimal, Decimal, FeeSpec, LadderSpec, PriceRange, WeightingScheme};
use ladder_config::{load_config, EngineConfig, ProtocolConfig};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use ladder_engine::chain::client::ClientConfig;
use ladder_engine::logging::init_tracing;
use ladder_engine::resources::secret;
use ladder_engine::session::load_wallet;
use ladder_engine::{
    log_error, log_success, ChainClient, LadderContext, LadderResult, LadderTask,
    LiquidityProvider, Provider, QuoteRouter, Session, TaskEvent, V2RouterQuote,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/engine.toml")]
    config: PathBuf,

    /// Environment overlay (environments/<env>.toml next to the base file)
    #[arg(short, long)]
    env: Option<String>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the ladder at the pool's current price without sending anything
    Preview(LadderArgs),
    /// Mint the ladder
    Create(LadderArgs),
    /// Close positions by token id
    Close {
        #[arg(required = true)]
        token_ids: Vec<String>,
    },
    /// Encrypt a private key read from stdin into the configured key file
    ImportKey {
        /// Generate the password instead of reading it from the environment
        #[arg(long)]
        generate_password: bool,
    },
    /// Quote a swap through the configured V2 router
    Quote {
        from: String,
        to: String,
        /// Raw input amount
        amount: String,
    },
}

#[derive(Args, Debug)]
struct LadderArgs {
    /// Base (priced) token
    #[arg(long)]
    base: String,

    /// Quote token the budget is denominated in
    #[arg(long)]
    quote: String,

    /// Reference price, quote per base
    #[arg(long)]
    upper: BigDecimal,

    /// Far end of the ladder
    #[arg(long)]
    lower: BigDecimal,

    #[arg(short = 'n', long, default_value_t = 5)]
    positions: u32,

    /// Total budget in USD
    #[arg(long)]
    budget: Decimal,

    #[arg(long, default_value = "linear")]
    weighting: WeightingScheme,

    /// V3 fee tier in hundredths of a basis point
    #[arg(long)]
    fee: Option<u32>,

    /// V4 fee as a percentage
    #[arg(long)]
    fee_percent: Option<Decimal>,

    /// Tick spacing; derived from the fee when omitted
    #[arg(long)]
    tick_spacing: Option<i32>,

    /// The quote token is a USD stablecoin
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    stable_quote: bool,
}

impl LadderArgs {
    fn fee_spec(&self, config: &EngineConfig) -> anyhow::Result<FeeSpec> {
        match (&config.protocol, self.fee, self.fee_percent) {
            (ProtocolConfig::V3(_), Some(fee), _) => Ok(FeeSpec::Tier {
                fee,
                custom_spacing: self.tick_spacing,
            }),
            (ProtocolConfig::V4(_), _, Some(fee_percent)) => {
                ladder_amm::fee::validate_fee_percent(fee_percent)?;
                Ok(FeeSpec::Percent {
                    fee_percent,
                    tick_spacing: self
                        .tick_spacing
                        .unwrap_or_else(|| ladder_amm::suggest_tick_spacing(fee_percent)),
                })
            }
            (ProtocolConfig::V3(_), None, _) => bail!("V3 ladders need --fee"),
            (ProtocolConfig::V4(_), _, None) => bail!("V4 ladders need --fee-percent"),
        }
    }

    async fn ladder_spec(&self, session: &Session, config: &EngineConfig) -> anyhow::Result<LadderSpec> {
        let base = parse_address(&self.base)?;
        let quote = parse_address(&self.quote)?;
        let pair = session
            .decimals()
            .token_pair(base, quote)
            .await
            .context("reading token decimals")?;
        Ok(LadderSpec {
            range: PriceRange {
                upper: self.upper.clone(),
                lower: self.lower.clone(),
            },
            pair,
            fee: self.fee_spec(config)?,
            position_count: self.positions,
            weighting: self.weighting,
            total_budget_usd: self.budget,
            quote_token_is_stable: self.stable_quote,
        })
    }
}

fn parse_address(value: &str) -> anyhow::Result<Address> {
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid address '{}': {}", value, e))
}

fn connect(config: &EngineConfig, wallet: LocalWallet) -> anyhow::Result<Arc<Session>> {
    let client = ChainClient::new(ClientConfig::from(config), wallet)?;
    Ok(Arc::new(Session::connect(Arc::new(client), config)))
}

fn report(result: &LadderResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&result.summary())?);
        return Ok(());
    }
    for batch in &result.batches {
        match &batch.error {
            None => log_success!(
                "Batch {} positions {:?}: tx {:?}, ids {:?}",
                batch.batch_index,
                batch.position_indices,
                batch.tx_hash,
                batch.token_ids
            ),
            Some(e) => log_error!(
                "Batch {} positions {:?}: {}",
                batch.batch_index,
                batch.position_indices,
                e
            ),
        }
    }
    info!(
        "Token ids: {:?} | gas used: {} | success: {}",
        result.token_ids, result.gas_used, result.success
    );
    Ok(())
}

async fn run_task(mut task: LadderTask, timeout: Duration, json: bool) -> anyhow::Result<()> {
    let waited = tokio::time::timeout(timeout, async {
        let mut outcome = None;
        while let Some(event) = task.next_event().await {
            match event {
                TaskEvent::Progress(p) => info!(
                    "Progress: batch {}/{} ({}/{} operations)",
                    p.batch_index + 1,
                    p.total_batches,
                    p.completed_ops,
                    p.total_ops
                ),
                TaskEvent::Result(result) => outcome = Some(result),
                TaskEvent::Finished => break,
            }
        }
        outcome
    })
    .await;

    match waited {
        Ok(Some(Ok(result))) => {
            report(&result, json)?;
            if !result.success {
                bail!("{} batches failed", result.failed_batches().count());
            }
            Ok(())
        }
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(None) => bail!("task ended without a result"),
        Err(_) => {
            task.cancel();
            bail!("operation exceeded {:?}", timeout)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.env.as_deref())
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&config.logging.level, config.logging.json)?;
    info!("Ladder engine {} on chain {}", env!("CARGO_PKG_VERSION"), config.chain.chain_id);

    let join_timeout = Duration::from_secs(config.execution.join_timeout_secs);
    match cli.command {
        Command::Preview(args) => {
            // reads only; the throwaway key never signs
            let session = connect(&config, LocalWallet::new(&mut rand::thread_rng()))?;
            let provider = Provider::from_config(&config)?;
            let spec = args.ladder_spec(&session, &config).await?;
            let ctx = LadderContext::new(session.clone());
            let state = provider.pool_state(&spec, &ctx).await?;
            let positions = provider.preview_ladder(&spec, &state)?;
            let totals = ladder_amm::total_amounts(&positions);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&positions)?);
            }
            info!(
                "Pool tick {}: {} positions need amount0 {} and amount1 {}",
                state.tick,
                positions.len(),
                totals.amount0,
                totals.amount1
            );
        }
        Command::Create(args) => {
            let session = connect(&config, load_wallet(&config.wallet)?)?;
            let provider: Arc<dyn LiquidityProvider> = Arc::new(Provider::from_config(&config)?);
            let spec = args.ladder_spec(&session, &config).await?;
            let task = LadderTask::spawn_create(session, provider, spec);
            run_task(task, join_timeout, cli.json).await?;
        }
        Command::Close { token_ids } => {
            let ids = token_ids
                .iter()
                .map(|id| U256::from_dec_str(id).with_context(|| format!("token id '{}'", id)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let session = connect(&config, load_wallet(&config.wallet)?)?;
            let provider: Arc<dyn LiquidityProvider> = Arc::new(Provider::from_config(&config)?);
            let task = LadderTask::spawn_close(session, provider, ids);
            run_task(task, join_timeout, cli.json).await?;
        }
        Command::ImportKey { generate_password } => {
            let path = config
                .wallet
                .encrypted_key_path
                .as_ref()
                .context("wallet.encrypted_key_path is not set")?;
            let password = if generate_password {
                let password = secret::generate_strong_password(24);
                eprintln!("Generated password (store it in {}): {}", config.wallet.password_env, password);
                zeroize::Zeroizing::new(password)
            } else {
                zeroize::Zeroizing::new(
                    std::env::var(&config.wallet.password_env)
                        .with_context(|| format!("{} is not set", config.wallet.password_env))?,
                )
            };
            let mut line = zeroize::Zeroizing::new(String::new());
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("reading private key from stdin")?;
            secret::write_key_file(path, line.trim(), &password)?;
            log_success!("Encrypted key written to {}", path.display());
        }
        Command::Quote { from, to, amount } => {
            let router = config
                .chain
                .v2_router
                .as_deref()
                .context("chain.v2_router is not set")?;
            let wrapped_native = config
                .chain
                .wrapped_native
                .as_deref()
                .map(parse_address)
                .transpose()?;
            let session = connect(&config, LocalWallet::new(&mut rand::thread_rng()))?;
            let quotes = QuoteRouter::new().with_source(Arc::new(V2RouterQuote::new(
                session.chain().clone(),
                parse_address(router)?,
                wrapped_native,
            )));
            let amount = U256::from_dec_str(&amount).context("amount")?;
            let quote = quotes
                .get_quote(parse_address(&from)?, parse_address(&to)?, amount)
                .await?;
            info!("Quote: {} via {:?}", quote.to_amount, quote.route);
        }
    }
    Ok(())
}
