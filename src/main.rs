use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use proxy_pool::{
    config::Config,
    logging::init_logging,
    manager::{AddOutcome, Engine, ProxyManager, Sweeper},
    proxy::{Collector, HttpCollector, ProxyChecker, ProxyParser, ProxyType},
    store::{Backend, MemoryBackend, ProxyStore, RedisBackend},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A self-maintaining pool of verified HTTP proxies
#[derive(Parser)]
#[command(name = "proxy-pool")]
#[command(about = "A self-maintaining pool of verified HTTP proxies backed by Redis")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep the pool in process memory instead of Redis
    #[arg(long, global = true)]
    memory: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run collectors, validation workers and the revalidation sweeper
    Run,
    /// Check proxies from a file without touching the pool
    Check {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for working proxies
        #[arg(short, long)]
        good: Option<PathBuf>,
        /// Proxy type for lines without a scheme (http, https, socks5)
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: ProxyType,
    },
    /// Validate proxies from a file and add the live ones to the pool
    Import {
        /// Input file containing proxies
        input: PathBuf,
        /// Proxy type for lines without a scheme (http, https, socks5)
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: ProxyType,
    },
    /// Run one revalidation sweep over the pool
    Sweep,
    /// Print the number of stored proxies
    Count,
    /// Print one random proxy
    Random {
        /// Only pick proxies of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Write every stored proxy to a file
    Export {
        /// Output file
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let command = cli.command.unwrap_or(Commands::Run);

    if cli.memory {
        info!("Using in-memory store");
        execute(command, &config, MemoryBackend::new()).await
    } else {
        info!(url = %config.redis.url, key = %config.redis.key, "Using Redis store");
        execute(command, &config, RedisBackend::open(&config.redis.url)?).await
    }
}

async fn execute<B: Backend>(command: Commands, config: &Config, backend: B) -> Result<()> {
    let store = Arc::new(ProxyStore::new(backend, config.redis.key.as_str(), &config.pool)?);
    let checker = Arc::new(ProxyChecker::with_config(config.validator.clone()));
    let manager = Arc::new(ProxyManager::new(Arc::clone(&store), checker));

    match command {
        Commands::Run => run(config, manager).await?,
        Commands::Check {
            input,
            good,
            proxy_type,
        } => check_file(config, input, good, proxy_type).await?,
        Commands::Import { input, proxy_type } => {
            let candidates = ProxyParser::parse_file(&input, proxy_type)?;
            println!("Validating {} proxies from {:?}", candidates.len(), input);

            let outcomes = stream::iter(candidates)
                .map(|candidate| {
                    let manager = Arc::clone(&manager);
                    async move { manager.check_and_add(candidate).await }
                })
                .buffer_unordered(config.validator.concurrency.max(1))
                .collect::<Vec<_>>()
                .await;

            let mut added = 0;
            for outcome in outcomes {
                match outcome {
                    Ok(AddOutcome::Added) => added += 1,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Failed to store proxy"),
                }
            }
            println!("Added {} proxies, pool now holds {}", added, manager.count().await);
        }
        Commands::Sweep => {
            let sweeper = Sweeper::new(
                Arc::clone(&store),
                Arc::clone(manager.probe()),
                config.sweeper.clone(),
            );
            let outcome = sweeper.run_cycle().await?;
            println!(
                "Checked {} proxies: {} evicted, {} failed deletes, {} remaining",
                outcome.checked, outcome.evicted, outcome.failed_deletes, outcome.after
            );
        }
        Commands::Count => println!("{}", manager.count().await),
        Commands::Random { kind } => {
            let record = match kind {
                Some(kind) => manager.find_by_kind(&kind).await?,
                None => manager.random().await?,
            };
            println!("{}", record);
        }
        Commands::Export { output } => {
            let records = store.list_all().await?;
            ProxyParser::save_to_file(&records, &output)?;
            println!("Saved {} proxies to {:?}", records.len(), output);
        }
    }

    Ok(())
}

async fn run<B: Backend>(config: &Config, manager: Arc<ProxyManager<B>>) -> Result<()> {
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    for source in &config.collectors.sources {
        let collector = HttpCollector::with_timeout(source.clone(), config.collectors.timeout())?;
        collectors.push(Arc::new(collector));
    }

    let shutdown = CancellationToken::new();
    let handle = Engine::start(config, manager, collectors, shutdown)?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    handle.shutdown().await;
    Ok(())
}

async fn check_file(
    config: &Config,
    input: PathBuf,
    good: Option<PathBuf>,
    proxy_type: ProxyType,
) -> Result<()> {
    let proxies = ProxyParser::parse_file(&input, proxy_type)?;

    println!("Loaded {} proxies from {:?}", proxies.len(), input);
    println!(
        "Checking with concurrency {}, timeout: {}s",
        config.validator.concurrency, config.validator.timeout_secs
    );
    println!("Test URL: {}", config.validator.test_url);
    println!();

    let checker = ProxyChecker::with_config(config.validator.clone());
    let (good_results, bad_results) = checker.check_and_separate(proxies).await;

    println!(
        "Results: {} good, {} bad",
        good_results.len(),
        bad_results.len()
    );

    if let Some(good_path) = good {
        let good_proxies: Vec<_> = good_results.iter().map(|r| r.proxy.clone()).collect();
        ProxyParser::save_to_file(&good_proxies, &good_path)?;
        println!("Saved {} good proxies to {:?}", good_proxies.len(), good_path);
    }

    if !good_results.is_empty() {
        println!("\nWorking proxies:");
        for result in &good_results {
            if let Some(time) = result.response_time_ms {
                println!("  {} ({}ms)", result.proxy, time);
            }
        }
    }

    Ok(())
}
