//! dice-auth - certificate DN authentication server

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use dice_auth::{
    cli::{Cli, Command},
    config::{Config, DiceConfig},
    dice::{DiceStrategy, IdentityQuery},
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.take() {
        Some(Command::Canonicalize { dns }) => run_canonicalize(&config, &dns),
        Some(Command::Lookup { dn, issuer }) => run_lookup(config, &dn, issuer.as_deref()).await,
        Some(Command::Serve) | None => run_server(cli, config).await,
    }
}

/// Print canonical DNs, one per line
fn run_canonicalize(config: &Config, dns: &[String]) -> ExitCode {
    let options = &config.dice.dn;
    if let Err(e) = options.validate() {
        eprintln!("❌ Invalid dn options: {e}");
        return ExitCode::FAILURE;
    }

    let mut status = ExitCode::SUCCESS;
    for raw in dns {
        match dice_core::canonicalize(raw, options) {
            Ok(canonical) => println!("{canonical}"),
            Err(e) => {
                eprintln!("❌ {raw}: {e}");
                status = ExitCode::FAILURE;
            }
        }
    }
    status
}

/// Query the directory once and print the identity record
async fn run_lookup(config: Config, dn: &str, issuer: Option<&str>) -> ExitCode {
    let strategy = match DiceConfig::from_options(config.dice).and_then(DiceStrategy::new) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create strategy: {e}");
            return ExitCode::FAILURE;
        }
    };

    let query = match build_query(&strategy, dn, issuer) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(user_dn = %query.user_dn, issuer_dn = ?query.issuer_dn, "Looking up identity");

    match strategy.lookup(&query).await {
        Ok(record) => match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize identity: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("❌ Lookup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_query(
    strategy: &DiceStrategy,
    dn: &str,
    issuer: Option<&str>,
) -> dice_auth::Result<IdentityQuery> {
    let mut query = IdentityQuery::new(strategy.canonicalize(dn)?);
    if let Some(issuer) = issuer {
        query = query.with_issuer(strategy.canonicalize(issuer)?);
    }
    Ok(query)
}

async fn run_server(cli: Cli, mut config: Config) -> ExitCode {
    // Apply CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting dice-auth"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
