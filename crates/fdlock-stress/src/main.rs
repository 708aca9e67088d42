use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use fdlock::{NotifyFlags, Registry, RegistryConfig};
use log::{debug, info};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Hammer the descriptor lock registry from many threads
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Common {
    /// Worker threads
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Distinct descriptors to spread work over
    #[arg(long, default_value_t = 4)]
    descriptors: i32,

    /// Iterations per worker
    #[arg(long, default_value_t = 10_000)]
    iterations: usize,

    /// Registry partitions
    #[arg(long, default_value_t = RegistryConfig::DEFAULT_PARTITIONS)]
    partitions: usize,

    /// Leave the signal mask alone while locked
    #[arg(long)]
    no_mask: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Long-lived handles contending for the descriptor locks
    Contend {
        #[command(flatten)]
        common: Common,
    },
    /// Resolve, lock and release on every iteration
    Churn {
        #[command(flatten)]
        common: Common,

        /// Cap on live records; resolve failures are counted, not fatal
        #[arg(long)]
        max_records: Option<usize>,
    },
}

impl Common {
    fn config(&self) -> RegistryConfig {
        RegistryConfig::new()
            .with_partitions(self.partitions)
            .with_signal_masking(!self.no_mask)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.threads > 0, "--threads must be positive");
        ensure!(self.descriptors > 0, "--descriptors must be positive");
        Ok(())
    }
}

/// Per-descriptor occupancy counters used to detect overlapping holders.
struct Occupancy(Vec<AtomicUsize>);

impl Occupancy {
    fn new(descriptors: i32) -> Self {
        Self((0..descriptors).map(|_| AtomicUsize::new(0)).collect())
    }

    fn enter(&self, fd: i32) -> Result<()> {
        let prev = self.0[fd as usize].fetch_add(1, Ordering::SeqCst);
        if prev != 0 {
            bail!("fd {}: {} other holder(s) inside the critical section", fd, prev);
        }
        Ok(())
    }

    fn leave(&self, fd: i32) {
        self.0[fd as usize].fetch_sub(1, Ordering::SeqCst);
    }
}

fn contend(common: &Common) -> Result<Registry> {
    let registry = Registry::new(common.config());
    let occupancy = Arc::new(Occupancy::new(common.descriptors));
    let start = Arc::new(Barrier::new(common.threads));

    let workers: Vec<_> = (0..common.threads)
        .map(|id| {
            let registry = registry.clone();
            let occupancy = Arc::clone(&occupancy);
            let start = Arc::clone(&start);
            let common = common.clone();
            thread::spawn(move || -> Result<()> {
                let conns = (0..common.descriptors)
                    .map(|fd| registry.resolve(fd))
                    .collect::<fdlock::Result<Vec<_>>>()?;
                start.wait();

                let mut rng = rand::thread_rng();
                for _ in 0..common.iterations {
                    let conn = &conns[rng.gen_range(0..conns.len())];
                    let token = conn.lock();
                    let entered = occupancy.enter(conn.fd());
                    occupancy.leave(conn.fd());
                    conn.unlock(token);
                    entered?;
                    if rng.gen_ratio(1, 64) {
                        conn.notify(NotifyFlags::LOCK);
                    }
                }
                debug!("worker {} finished", id);
                Ok(())
            })
        })
        .collect();

    join_all(workers)?;
    Ok(registry)
}

fn churn(common: &Common, max_records: Option<usize>) -> Result<Registry> {
    let mut config = common.config();
    config.max_records = max_records;
    let registry = Registry::new(config);
    let occupancy = Arc::new(Occupancy::new(common.descriptors));
    let refused = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..common.threads)
        .map(|_| {
            let registry = registry.clone();
            let occupancy = Arc::clone(&occupancy);
            let refused = Arc::clone(&refused);
            let common = common.clone();
            thread::spawn(move || -> Result<()> {
                let mut rng = rand::thread_rng();
                for _ in 0..common.iterations {
                    let fd = rng.gen_range(0..common.descriptors);
                    let conn = match registry.resolve(fd) {
                        Ok(conn) => conn,
                        Err(fdlock::FdLockError::Exhausted { .. }) => {
                            refused.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if rng.gen_bool(0.5) {
                        conn.wait_timeout(Duration::from_micros(50));
                    }
                    let guard = conn.guard();
                    let entered = occupancy.enter(fd);
                    occupancy.leave(fd);
                    drop(guard);
                    entered?;
                    conn.release();
                }
                Ok(())
            })
        })
        .collect();

    join_all(workers)?;
    info!("{} resolve(s) refused at capacity", refused.load(Ordering::Relaxed));
    Ok(registry)
}

fn join_all(workers: Vec<thread::JoinHandle<Result<()>>>) -> Result<()> {
    for (id, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(result) => result.with_context(|| format!("worker {} failed", id))?,
            Err(_) => bail!("worker {} panicked", id),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let started = Instant::now();

    let (registry, common) = match &cli.command {
        Commands::Contend { common } => {
            common.validate()?;
            (contend(common)?, common)
        }
        Commands::Churn {
            common,
            max_records,
        } => {
            common.validate()?;
            (churn(common, *max_records)?, common)
        }
    };

    let drained = registry.shutdown_all();
    if matches!(cli.command, Commands::Churn { .. }) {
        ensure!(drained == 0, "{} record(s) leaked by churn", drained);
    }

    println!(
        "{} threads x {} iterations over {} descriptor(s): ok in {:?}",
        common.threads,
        common.iterations,
        common.descriptors,
        started.elapsed()
    );
    Ok(())
}
