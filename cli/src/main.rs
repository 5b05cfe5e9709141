//! Ratebank CLI
//!
//! Resolves exchange rates from the command line using the environment
//! configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ratebank_common::{Currency, Money};
use ratebank_fx::{RateResolver, ResolverConfig};
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ratebank CLI
#[derive(Parser, Debug)]
#[command(name = "ratebank")]
#[command(about = "Resolve currency exchange rates")]
struct Args {
    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Upstream converter endpoint
    #[arg(long, env = "RATEBANK_ENDPOINT")]
    endpoint: Option<String>,

    /// Maximum attempts per upstream request
    #[arg(long)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one or more pairs, given as FROM:TO
    Resolve {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Convert an amount into another currency
    Exchange {
        amount: Decimal,
        from: String,
        to: String,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    // Load configuration
    let mut config = ResolverConfig::from_env();
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = max_attempts;
    }

    info!(
        endpoint = %config.endpoint,
        ttl_secs = ?config.ttl.map(|t| t.as_secs()),
        max_attempts = config.retry.max_attempts,
        worst_case_secs = config.retry.worst_case(config.request_timeout).as_secs(),
        "Starting ratebank"
    );

    let resolver = RateResolver::with_http(config).context("failed to build resolver")?;

    match args.command {
        Command::Resolve { pairs } => {
            let mut failed = 0;
            for arg in &pairs {
                let (from, to) = arg
                    .split_once(':')
                    .with_context(|| format!("expected FROM:TO, got {:?}", arg))?;

                match resolver.resolve(from, to) {
                    Ok(rate) => println!("{} {}", arg.to_uppercase(), rate),
                    Err(e) => {
                        failed += 1;
                        error!(pair = %arg, code = e.error_code(), error = %e, "Resolution failed");
                    }
                }
            }

            let stats = resolver.stats();
            info!(
                resolved = pairs.len() - failed,
                failed,
                fetches = stats.fetches,
                fallbacks = stats.fallbacks,
                "Done"
            );

            if failed > 0 {
                anyhow::bail!("{} of {} pair(s) failed", failed, pairs.len());
            }
        }
        Command::Exchange { amount, from, to } => {
            let money = Money::new(amount, Currency::parse(&from)?);
            let converted = resolver.exchange(&money, &to)?;
            println!("{} = {}", money, converted);
        }
    }

    Ok(())
}
