use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use workpool::thread_pool::{RayonThreadPool, SharedQueueThreadPool, ThreadPool};
use workpool::{PoolConfig, WorkerPool};

#[derive(Parser, Debug, Clone)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Number of workers, overrides the config file and WORKPOOL_SIZE
    #[arg(long, global = true)]
    size: Option<usize>,

    /// JSON pool configuration. The rayon bench backend only reads `size`
    /// and `thread_name` from it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Square the numbers 0..tasks on the pool and print the results
    Squares {
        #[arg(long, default_value_t = 10)]
        tasks: u64,
    },
    /// Time a batch of sleeping jobs on a thread pool backend
    Bench {
        #[arg(long, value_enum, default_value_t = Backend::Shared)]
        backend: Backend,
        #[arg(long, default_value_t = 100)]
        tasks: u32,
        #[arg(long, default_value_t = 5)]
        sleep_ms: u64,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Shared,
    Rayon,
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("could not load config from {}", path.display()))?,
        None => PoolConfig::from_env().context("invalid WORKPOOL_* environment")?,
    };
    if let Some(size) = cli.size {
        config.size = size;
    }

    match cli.cmd {
        Command::Squares { tasks } => squares(config, tasks),
        Command::Bench {
            backend,
            tasks,
            sleep_ms,
        } => {
            let threads = config.size;
            let elapsed = match backend {
                Backend::Shared => {
                    bench(SharedQueueThreadPool::with_config(config)?, tasks, sleep_ms)?
                }
                Backend::Rayon => bench(RayonThreadPool::with_config(&config)?, tasks, sleep_ms)?,
            };
            println!(
                "{:?}: {} jobs on {} threads in {} ms",
                backend,
                tasks,
                threads,
                elapsed.as_millis()
            );
            Ok(())
        }
    }
}

fn squares(config: PoolConfig, tasks: u64) -> anyhow::Result<()> {
    let pool = WorkerPool::with_config(config)?;
    let results = pool.results();
    let consumer = thread::spawn(move || {
        let mut values = Vec::new();
        for result in results {
            match result.outcome {
                Ok(value) => {
                    info!("{} on {} => {}", result.task, result.worker, value);
                    values.push(value);
                }
                Err(e) => warn!("{}: {}", result.task, e),
            }
        }
        values
    });

    for n in 0..tasks {
        pool.submit(move |_| Ok(n * n))?;
    }
    pool.shutdown()?;

    let mut values = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("result consumer panicked"))?;
    values.sort_unstable();
    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    println!("results: {}", values.join(" "));
    Ok(())
}

fn bench<P: ThreadPool>(pool: P, tasks: u32, sleep_ms: u64) -> anyhow::Result<Duration> {
    let start = Instant::now();
    for _ in 0..tasks {
        pool.spawn(move || thread::sleep(Duration::from_millis(sleep_ms)))?;
    }
    pool.shutdown()?;
    Ok(start.elapsed())
}
