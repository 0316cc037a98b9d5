use std::{path::PathBuf, sync::Arc, time::Duration};

use chainbook_index::{
    chain::{run_notify_listener, CoinRegistry},
    config::CoinConfig,
    fiat::{CoinGeckoProvider, FiatIngester},
    mempool::Mempool,
    model::SyncStatus,
    query::QueryService,
    storage::Store,
    sync::ChainFollower,
    Error, Result,
};
use clap::Parser;
use log::{error, info, warn};
use parking_lot::RwLock;
use tokio::{signal, sync::watch, task::JoinHandle};

const STATUS_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(version, about = "Indexes a UTXO chain and serves address queries")]
struct Cli {
    /// Data directory of the index database
    #[arg(long, value_name = "DATADIR", env = "CHAINBOOK_DATADIR")]
    datadir: PathBuf,

    /// Coin configuration file
    #[arg(long, value_name = "FILE", env = "CHAINBOOK_BLOCKCHAINCFG")]
    blockchaincfg: PathBuf,

    /// Follow the chain (the default)
    #[arg(long, overrides_with = "no_sync")]
    sync: bool,

    /// Only run the mempool and fiat rates
    #[arg(long, overrides_with = "sync")]
    no_sync: bool,

    /// Overrides `sync_workers` from the coin configuration
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// RocksDB block cache in megabytes
    #[arg(long, value_name = "MB", default_value = "512")]
    dbcache: usize,

    /// Logs the size of every column family at startup
    #[arg(long)]
    log_table_sizes: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("chainbook stopped: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = CoinConfig::load(&cli.blockchaincfg)?;
    config.apply_env_overrides();
    if let Some(workers) = cli.workers {
        config.sync_workers = workers;
    }
    config.validate()?;

    let (parser, backend) = CoinRegistry::with_defaults().resolve(&config)?;
    let store = Arc::new(Store::open(
        &cli.datadir,
        &config.coin_name,
        config.start_height,
        cli.dbcache,
    )?);
    info!(
        "{} index at {} with tip {:?}",
        config.coin_name,
        cli.datadir.display(),
        store.best_block()
    );
    if cli.log_table_sizes {
        store.dump_table_sizes()?;
    }

    let status = Arc::new(RwLock::new(SyncStatus::default()));
    let (stop, shutdown) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<Result<()>>> = Vec::new();

    if let (Some(sender), Some(endpoint)) = (backend.notifier(), config.notify_endpoint.clone()) {
        tasks.push(tokio::spawn(run_notify_listener(
            endpoint,
            sender,
            shutdown.clone(),
        )));
    }

    let mempool = Arc::new(Mempool::new(
        Arc::clone(&store),
        Arc::clone(&backend),
        Arc::clone(&parser),
        &config,
    ));
    {
        let mempool = Arc::clone(&mempool);
        let notifications = backend.subscribe();
        let interval = Duration::from_secs(config.mempool_refresh_secs.max(1));
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            mempool.run(notifications, interval, shutdown).await;
            Ok(())
        }));
    }

    if let Some(fiat_config) = &config.fiat_rates {
        let provider = Arc::new(CoinGeckoProvider::new(fiat_config)?);
        let ingester = Arc::new(FiatIngester::new(
            Arc::clone(&store),
            provider,
            Arc::clone(&status),
            fiat_config,
        )?);
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            ingester.run(shutdown).await;
            Ok(())
        }));
    }

    let query = QueryService::new(
        Arc::clone(&store),
        Arc::clone(&backend),
        Arc::clone(&parser),
        Some(Arc::clone(&mempool)),
        Arc::clone(&status),
        &config,
    );

    let mut follower = (!cli.no_sync).then(|| {
        let follower = Arc::new(ChainFollower::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&parser),
            Some(Arc::clone(&mempool)),
            Arc::clone(&status),
            &config,
        ));
        tokio::spawn(follower.run(shutdown.clone()))
    });

    let reason = wait_for_shutdown(follower.as_mut(), &query).await;
    let _ = stop.send(true);
    let result = match (reason, follower) {
        (Stop::Follower(result), _) => result,
        (Stop::Signal, Some(handle)) => join(handle).await,
        (Stop::Signal, None) => Ok(()),
    };

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("task ended with {e}"),
            Err(e) => warn!("task panicked: {e}"),
        }
    }
    // the follower closes the store itself
    if cli.no_sync {
        store.close()?;
    }
    info!("shutdown complete");
    result
}

enum Stop {
    Signal,
    Follower(Result<()>),
}

async fn join(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::from(e.to_string())),
    }
}

/// Logs a status line every minute until ctrl-c or until the follower ends.
async fn wait_for_shutdown(
    follower: Option<&mut JoinHandle<Result<()>>>,
    query: &QueryService,
) -> Stop {
    let mut status_timer = tokio::time::interval(STATUS_PERIOD);
    let follower = async move {
        match follower {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::from(e.to_string())),
            },
            None => std::future::pending::<Result<()>>().await,
        }
    };
    tokio::pin!(follower);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                return Stop::Signal;
            }
            result = &mut follower => return Stop::Follower(result),
            _ = status_timer.tick() => {
                let status = query.status();
                info!(
                    "tip {:?} of {:?}, {:?}, mempool {} txs{}",
                    status.best_height,
                    status.backend_height,
                    status.state,
                    status.mempool_size,
                    if status.mempool_healthy { "" } else { " (unhealthy)" }
                );
            }
        }
    }
}
