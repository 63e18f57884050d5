use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    identity_from_seed, ClientEvent, CounterClient, Guarded, JsonRpcLedger, LedgerClient,
    LocalLedger, LocalWallet, ReadOnlyWallet, SubmissionReport,
};
use shared::{
    domain::{Identity, LAMPORTS_PER_SOL},
    pda,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
#[command(name = "counter-cli", about = "Client for the on-chain counter program")]
struct Cli {
    /// JSON-RPC endpoint; overrides counter.toml and the environment.
    #[arg(long, global = true)]
    rpc_url: Option<String>,
    #[arg(long, global = true)]
    program_id: Option<String>,
    /// processed, confirmed or finalized
    #[arg(long, global = true)]
    commitment: Option<String>,
    /// Cluster name used in explorer links.
    #[arg(long, global = true)]
    cluster: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counter address derived for a wallet.
    Pda {
        #[arg(long)]
        identity: Identity,
    },
    /// Fetch the counter and balance of a wallet over JSON-RPC.
    Status {
        #[arg(long)]
        identity: Identity,
    },
    /// Print the SOL balance of a wallet.
    Balance {
        #[arg(long)]
        identity: Identity,
    },
    /// Run initialize, increment and decrement against an in-process ledger.
    Demo {
        /// Byte used to build the demo wallet's secret seed.
        #[arg(long, default_value_t = 7)]
        seed: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = config::load_settings()?;
    if let Some(v) = cli.rpc_url {
        settings.rpc_url = v;
    }
    if let Some(v) = cli.program_id {
        settings.program_id = v;
    }
    if let Some(v) = cli.commitment {
        settings.commitment = v;
    }
    if let Some(v) = cli.cluster {
        settings.cluster = v;
    }
    let settings = settings.resolve()?;
    debug!(
        rpc_url = %settings.rpc_url,
        program_id = %settings.program_id,
        commitment = settings.commitment.as_str(),
        "loaded settings"
    );

    match cli.command {
        Command::Pda { identity } => {
            let derived = pda::counter_address(&identity, &settings.program_id)?;
            println!("counter address: {}", derived.address);
            println!("bump: {}", derived.bump);
        }
        Command::Status { identity } => {
            let ledger = Arc::new(JsonRpcLedger::new(
                settings.rpc_url.as_str(),
                settings.commitment,
            ));
            let client = CounterClient::new(
                settings.program_id,
                ledger,
                Arc::new(ReadOnlyWallet::new(Some(identity))),
            );
            client
                .sync_session()
                .await
                .with_context(|| format!("failed to read counter from {}", settings.rpc_url))?;

            if let Some(session) = client.session().await {
                println!("counter address: {}", session.counter_address());
            }
            match client.counter_state().await {
                Some(state) => println!("counter: {state}"),
                None => println!("counter: not yet synced"),
            }
            let balance = client.balance().await.context("failed to read balance")?;
            println!("balance: {balance}");
        }
        Command::Balance { identity } => {
            let ledger = JsonRpcLedger::new(settings.rpc_url.as_str(), settings.commitment);
            let balance = ledger
                .get_balance(&identity)
                .await
                .with_context(|| format!("failed to read balance from {}", settings.rpc_url))?;
            println!("balance: {balance}");
        }
        Command::Demo { seed } => run_demo(settings.program_id, &settings.cluster, seed).await?,
    }

    Ok(())
}

async fn run_demo(program_id: shared::domain::Address, cluster: &str, seed: u8) -> Result<()> {
    let ledger = LocalLedger::new(program_id);
    let identity = identity_from_seed([seed; 32]);
    ledger.airdrop(&identity, LAMPORTS_PER_SOL).await;

    let wallet = LocalWallet::new(ledger.clone());
    let client = CounterClient::new(program_id, ledger, wallet.clone());

    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::Error(message) => info!(%message, "client reported an error"),
                other => debug!(event = ?other, "client event"),
            }
        }
    });

    wallet.connect(identity).await;
    client.sync_session().await?;
    println!("wallet: {identity}");
    if let Some(session) = client.session().await {
        println!(
            "counter address: {} (bump {})",
            session.counter_address(),
            session.counter.bump
        );
    }
    if let Some(state) = client.counter_state().await {
        println!("counter: {state}");
    }

    print_report(client.initialize().await?, cluster)?;
    print_report(client.increment().await?, cluster)?;
    print_report(client.decrement().await?, cluster)?;

    println!("balance: {}", client.balance().await?);
    Ok(())
}

fn print_report(outcome: Guarded<SubmissionReport>, cluster: &str) -> Result<()> {
    let Guarded::Completed(report) = outcome else {
        bail!("another operation was still outstanding");
    };
    println!(
        "{} -> {}",
        report.transaction.command,
        report.transaction.explorer_url(cluster)
    );
    match (report.counter, report.refresh_error) {
        (_, Some(err)) => println!("counter: refresh failed ({err})"),
        (Some(state), None) => println!("counter: {state}"),
        (None, None) => println!("counter: not yet synced"),
    }
    Ok(())
}
