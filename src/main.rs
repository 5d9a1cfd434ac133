use clap::Parser;
use tokio::sync::watch;

use sentryscan::cli::{Cli, Commands, PolicyArgs, ScanArgs};
use sentryscan::policy::{apply, TemplateCache};
use sentryscan::scan::{ScanConfig, ScanRunner};
use sentryscan::tracing::{init_tracing, shutdown_tracing};
use sentryscan::EventFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let otlp = std::env::var("SENTRYSCAN_OTLP_ENDPOINT").ok();
    if let Err(e) = init_tracing("sentryscan", otlp.as_deref()) {
        eprintln!("failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    let result = match &cli.command {
        Commands::Scan(args) => run_scan(&cli.grpc, args).await,
        Commands::Policy(args) => run_policy(&cli.grpc, args).await,
    };

    shutdown_tracing();

    if let Err(e) = result {
        eprintln!("sentryscan: {}", e);
        std::process::exit(1);
    }
}

async fn run_scan(grpc: &str, args: &ScanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ScanConfig {
        agent_addr: grpc.to_string(),
        filter: EventFilter::from_flags(args.all, args.system),
        output_dir: args.out.clone(),
        stats: args.stats,
        ..ScanConfig::default()
    };

    let runner = ScanRunner::connect(config).await?;

    // SIGINT flips the cancellation signal; the collectors observe it
    // cooperatively and the consumer drains what is already in flight.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping collectors");
            let _ = cancel_tx.send(true);
        }
    });

    runner.run(cancel_rx).await?;
    Ok(())
}

async fn run_policy(grpc: &str, args: &PolicyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cache = TemplateCache::fetch(&args.branch).await?;
    let hostname = apply::local_hostname()?;
    println!("fetched {} host policy template(s)", cache.len());

    if args.dryrun {
        // Dry run never touches the agent; no connection is needed.
        print!("{}", apply::render_dry_run(&cache, args.action, &hostname)?);
        return Ok(());
    }

    let client = sentryscan::AgentClient::connect(grpc).await?;
    let options = apply::ApplyOptions {
        action: args.action,
        event: args.event,
        max_concurrency: args.max_concurrency,
    };
    let applied = apply::apply_templates(&client, &cache, &hostname, &options).await?;
    println!("applied {} polic{} as {}", applied, if applied == 1 { "y" } else { "ies" }, args.action.as_str());
    Ok(())
}
