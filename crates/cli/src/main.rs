mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cryptobot_brokers_binance::models::{decode, parse_trade_tick, AccountInformation};
use cryptobot_brokers_binance::stream::{topic, StreamClient};
use cryptobot_brokers_binance::{BinanceClient, Credentials};
use cryptobot_brokers_bitfinex::{BitfinexClient, BitfinexCredentials};
use cryptobot_core::{OrderRequest, Side};
use cryptobot_engine::Bot;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{resolve_credentials, ConfigError, FileConfig};

#[derive(Parser)]
#[command(name = "cryptobot")]
#[command(about = "Crypto trading bot: follow the day's growers, forecast, trade")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TOML config file
    #[arg(short, long, default_value = "cryptobot.toml")]
    config: PathBuf,

    /// JSON keys file with API_KEY and SECRET_KEY
    #[arg(short, long)]
    keys: Option<PathBuf>,

    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "BINANCE_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading bot until Ctrl-C
    Run,

    /// Check connectivity, server time and the request weight limit
    Ping,

    /// Show the exchange system status and non-zero balances
    Status,

    /// Print live trades
    Stream {
        /// Comma separated pairs (e.g. "ETHBTC,XRPBTC")
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// How long to listen
        #[arg(long, default_value = "30")]
        seconds: u64,
    },

    /// Validate a market order on the test endpoint
    TestOrder {
        #[arg(long)]
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: Side,

        #[arg(long)]
        quantity: Decimal,
    },

    /// Show Bitfinex platform status and tickers
    BitfinexStatus {
        /// Trading pairs (e.g. "tBTCUSD,tETHUSD")
        #[arg(short, long, value_delimiter = ',', default_value = "tBTCUSD")]
        symbols: Vec<String>,

        /// JSON keys file for the authenticated wallets listing
        #[arg(long)]
        keys: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = FileConfig::load(&cli.config)?;
    let credentials = resolve_credentials(
        cli.keys.as_deref(),
        cli.api_key.as_deref(),
        cli.secret_key.as_deref(),
    )?;

    match cli.command {
        Commands::Run => run_bot(config, credentials).await?,
        Commands::Ping => ping(config, credentials).await?,
        Commands::Status => status(config, credentials).await?,
        Commands::Stream { symbols, seconds } => stream(config, symbols, seconds).await?,
        Commands::TestOrder {
            symbol,
            side,
            quantity,
        } => test_order(config, credentials, symbol, side, quantity).await?,
        Commands::BitfinexStatus { symbols, keys } => bitfinex_status(config, symbols, keys).await?,
    }

    Ok(())
}

fn require(credentials: Option<Credentials>) -> Result<Credentials, ConfigError> {
    credentials.ok_or(ConfigError::NoCredentials)
}

async fn run_bot(config: FileConfig, credentials: Option<Credentials>) -> Result<()> {
    let credentials = require(credentials)?;
    let client = Arc::new(BinanceClient::new(config.binance, Some(credentials))?);
    let mut bot = Bot::new(config.bot, client)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    bot.run(shutdown).await?;
    Ok(())
}

async fn ping(config: FileConfig, credentials: Option<Credentials>) -> Result<()> {
    let client = BinanceClient::new(config.binance, credentials)?;

    let resp = client.market_data.test_connectivity().await?;
    println!("Connectivity: HTTP {}", resp.status);

    let resp = client.market_data.check_server_time().await?;
    let server_time = resp
        .body
        .get("serverTime")
        .and_then(|v| v.as_i64())
        .and_then(chrono::DateTime::from_timestamp_millis);
    match server_time {
        Some(t) => println!("Server time:  {}", t.format("%Y-%m-%d %H:%M:%S%.3f UTC")),
        None => println!("Server time:  unknown ({})", resp.body),
    }

    match client.refresh_rate_limits().await? {
        Some(limit) => println!("Weight limit: {} per minute", limit),
        None => println!("Weight limit: not reported"),
    }
    Ok(())
}

async fn status(config: FileConfig, credentials: Option<Credentials>) -> Result<()> {
    let credentials = require(credentials)?;
    let client = BinanceClient::new(config.binance, Some(credentials))?;

    let resp = client.wallet.system_status().await?;
    println!("System status: {}", resp.body);

    let resp = client.spot_account_trade.account_information().await?;
    let account: AccountInformation = decode(&resp).context("reading account information")?;
    println!("{:<10} {:>20} {:>20}", "ASSET", "FREE", "LOCKED");
    for balance in account.balances.iter().filter(|b| !b.is_empty()) {
        println!("{:<10} {:>20} {:>20}", balance.asset, balance.free, balance.locked);
    }
    Ok(())
}

async fn stream(config: FileConfig, symbols: Vec<String>, seconds: u64) -> Result<()> {
    let topics: Vec<String> = symbols.iter().map(|s| topic(s, "trade")).collect();
    let mut client = StreamClient::new(config.binance.ws_base());
    let mut events = client
        .take_receiver()
        .context("stream receiver already taken")?;
    client.start(topics).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match parse_trade_tick(&event) {
                    Ok(tick) => println!(
                        "{} {:<10} price={} qty={}",
                        tick.event_time.format("%H:%M:%S%.3f"),
                        tick.symbol,
                        tick.price,
                        tick.quantity
                    ),
                    Err(_) => println!("{}", event),
                }
            }
        }
    }

    client.stop().await;
    Ok(())
}

async fn test_order(
    config: FileConfig,
    credentials: Option<Credentials>,
    symbol: String,
    side: Side,
    quantity: Decimal,
) -> Result<()> {
    let credentials = require(credentials)?;
    let client = BinanceClient::new(config.binance, Some(credentials))?;

    let order = OrderRequest::market(&symbol.to_uppercase(), side, quantity);
    let resp = client.spot_account_trade.test_new_order(&order).await?;
    if resp.is_success() {
        println!("Order accepted by the test endpoint");
    } else {
        anyhow::bail!("Order rejected (HTTP {}): {}", resp.status, resp.body);
    }
    Ok(())
}

async fn bitfinex_status(config: FileConfig, symbols: Vec<String>, keys: Option<PathBuf>) -> Result<()> {
    let credentials = keys
        .as_deref()
        .map(BitfinexCredentials::from_json_file)
        .transpose()?;
    let authenticated = credentials.is_some();
    let client = BitfinexClient::new(config.bitfinex, credentials)?;

    println!("Platform: {:?}", client.platform_status().await?);

    let symbols: Vec<&str> = symbols.iter().map(String::as_str).collect();
    for ticker in client.tickers(&symbols).await? {
        println!(
            "{:<10} last={} bid={} ask={} change={:.2}%",
            ticker.symbol,
            ticker.last_price,
            ticker.bid,
            ticker.ask,
            ticker.daily_change_relative * 100.0
        );
    }

    if authenticated {
        for wallet in client.wallets().await? {
            println!("{:<10} {:<6} {}", wallet.wallet_type, wallet.currency, wallet.balance);
        }
    }
    Ok(())
}
