//! Memento CLI
//!
//! Command-line demonstrations of the memento memoizer: cache hits, TTL
//! expiry, deduplication of concurrent calls and pluggable backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::future::{BoxFuture, FutureExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memento::{
    BackendOptions, BackendRegistry, CacheBackend, CacheSettings, FileBackend, MemoError, Memoizer,
    MetricsSnapshot,
};
use memento_core::constants::FILE_BACKEND;

/// Memento - single-flight memoization with TTL caching
#[derive(Parser)]
#[command(name = "memento")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage backend (defaults to MEMENTO_BACKEND or "memory")
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Directory used by the file backend
    #[arg(long, global = true, default_value = ".memento-cache")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repeated lookups of one key, showing misses turning into hits
    Demo {
        /// Number of lookups
        #[arg(short, long, default_value = "3")]
        rounds: usize,
        /// Simulated cost of the computation in milliseconds
        #[arg(long, default_value = "500")]
        work_ms: u64,
    },

    /// Show a value being recomputed after its TTL expires
    Ttl {
        /// Lifetime of cached values in milliseconds
        #[arg(long, default_value = "1000")]
        ttl_ms: u64,
    },

    /// Many concurrent callers of one key sharing a single computation
    Dedup {
        /// Number of concurrent callers
        #[arg(short, long, default_value = "100")]
        callers: usize,
    },

    /// Memoized recursive fibonacci over overlapping concurrent inputs
    Fib {
        /// Largest input
        #[arg(short, long, default_value = "35")]
        n: u64,
    },

    /// List the registered storage backends
    Backends,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "memento=debug,memento_backends=debug,info"
    } else {
        "memento=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = CacheSettings::from_env().context("Failed to load settings")?;
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    settings.metrics_enabled = true;

    let ctx = CliContext {
        settings,
        dir: cli.dir,
    };

    match cli.command {
        Commands::Demo { rounds, work_ms } => cmd_demo(&ctx, rounds, work_ms).await,
        Commands::Ttl { ttl_ms } => cmd_ttl(&ctx, ttl_ms).await,
        Commands::Dedup { callers } => cmd_dedup(&ctx, callers).await,
        Commands::Fib { n } => cmd_fib(&ctx, n).await,
        Commands::Backends => cmd_backends(&ctx),
    }
}

/// Settings shared by every command.
struct CliContext {
    settings: CacheSettings,
    dir: PathBuf,
}

impl CliContext {
    /// Builds a memoizer on the selected backend, optionally overriding the TTL.
    async fn memoizer<V>(&self, ttl: Option<Duration>) -> Result<Memoizer<V>>
    where
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let mut settings = self.settings.clone();
        if let Some(ttl) = ttl {
            settings.ttl_ms = ttl.as_millis() as u64;
        }

        if settings.backend == FILE_BACKEND {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("Failed to create cache directory {}", self.dir.display()))?;
        }

        let backend_name = settings.backend.clone();
        let registry = registry::<V>(&self.dir)?;
        let config = settings
            .into_config(&registry)
            .with_context(|| format!("Cannot use backend '{}'", backend_name))?;

        Memoizer::new(config).context("Invalid memoizer configuration")
    }
}

/// Registry holding the built-in backends.
fn registry<V>(dir: &Path) -> Result<BackendRegistry<V>>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let registry = BackendRegistry::with_defaults();
    let dir = dir.to_path_buf();
    registry
        .register(FILE_BACKEND, move |_options: &BackendOptions| {
            Arc::new(FileBackend::<V>::at(dir.clone())) as Arc<dyn CacheBackend<V>>
        })
        .context("Failed to register file backend")?;
    Ok(registry)
}

/// Repeated lookups of one key
async fn cmd_demo(ctx: &CliContext, rounds: usize, work_ms: u64) -> Result<()> {
    println!("{}", "🧠 Cache demo".cyan().bold());
    let memo: Memoizer<String> = ctx.memoizer(None).await?;
    println!("   {} {}", "Backend:".dimmed(), memo.backend().name());

    for round in 0..rounds {
        let hits_before = memo.metrics().hits();
        let start = Instant::now();
        let value = memo
            .get("demo-key", move || async move {
                tokio::time::sleep(Duration::from_millis(work_ms)).await;
                Ok::<_, MemoError>("computed value".to_string())
            })
            .await?;

        let label = if memo.metrics().hits() > hits_before {
            "HIT ".green()
        } else {
            "MISS".yellow()
        };
        println!("   [{}] {} {} (after {:?})", round, label, value, start.elapsed());
    }

    println!("\n{}", "👤 Memoized lookup".cyan().bold());
    let lookup = memo
        .memoize_fn(move |id: u32| async move {
            tokio::time::sleep(Duration::from_millis(work_ms / 2)).await;
            ["Alice", "Bob", "Charlie"]
                .get(id as usize)
                .map(|name| name.to_string())
                .ok_or_else(|| anyhow!("no user with id {}", id))
        })
        .with_namespace("user");

    for id in [0, 1, 0, 1, 7] {
        let start = Instant::now();
        match lookup.call(id).await {
            Ok(name) => println!("   user {} → {} (after {:?})", id, name, start.elapsed()),
            Err(e) => println!("   user {} → {} {}", id, "error:".red(), e),
        }
    }

    print_metrics(&memo.metrics().snapshot());
    memo.shutdown();
    Ok(())
}

/// Recomputation after expiry
async fn cmd_ttl(ctx: &CliContext, ttl_ms: u64) -> Result<()> {
    let ttl = Duration::from_millis(ttl_ms);
    println!("{} {:?}", "⏳ TTL demo with a lifetime of".cyan().bold(), ttl);

    let memo: Memoizer<String> = ctx.memoizer(Some(ttl)).await?;
    memo.delete("ttl-key").await;
    let computations = Arc::new(AtomicUsize::new(0));

    let lookup = |step: &'static str| {
        let memo = memo.clone();
        let computations = Arc::clone(&computations);
        async move {
            let start = Instant::now();
            let value = memo
                .get("ttl-key", move || async move {
                    let n = computations.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, MemoError>(format!("computation #{}", n))
                })
                .await?;
            println!("   {:<14} {} (after {:?})", step.dimmed(), value, start.elapsed());
            Ok::<_, anyhow::Error>(())
        }
    };

    lookup("first").await?;
    lookup("cached").await?;

    let wait = ttl + ttl / 2;
    println!("   Waiting {:?} for the entry to expire...", wait);
    tokio::time::sleep(wait).await;

    lookup("after expiry").await?;

    println!(
        "\n   {} {} computations, {} evictions",
        "✓".green(),
        computations.load(Ordering::SeqCst),
        memo.metrics().evictions()
    );
    print_metrics(&memo.metrics().snapshot());
    memo.shutdown();
    Ok(())
}

/// Concurrent callers sharing one computation
async fn cmd_dedup(ctx: &CliContext, callers: usize) -> Result<()> {
    println!("{} {} concurrent callers", "🔀 Deduplicating".cyan().bold(), callers);

    let memo: Memoizer<String> = ctx.memoizer(None).await?;
    memo.delete("dedup-key").await;
    let executions = Arc::new(AtomicUsize::new(0));

    let pb = ProgressBar::new(callers as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for _ in 0..callers {
        let memo = memo.clone();
        let executions = Arc::clone(&executions);
        tasks.spawn(async move {
            memo.get("dedup-key", move || async move {
                executions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, MemoError>("shared result".to_string())
            })
            .await
        });
    }

    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.context("Caller task failed")?.is_err() {
            failures += 1;
        }
        pb.inc(1);
    }
    pb.finish();

    let executions = executions.load(Ordering::SeqCst);
    println!("\n{}", "📈 Results:".green().bold());
    println!("   Callers:      {}", callers);
    println!("   Executions:   {}", executions);
    println!("   Failures:     {}", failures);
    println!("   Elapsed:      {:?}", start.elapsed());

    if executions <= 1 && failures == 0 {
        println!("   {} Every caller shared one computation", "✅".green());
    } else {
        println!("   {} Expected at most one execution", "❌".red());
    }

    print_metrics(&memo.metrics().snapshot());
    memo.shutdown();
    Ok(())
}

/// Recursive fibonacci where every sub-result is memoized.
fn fib(memo: Memoizer<u64>, n: u64) -> BoxFuture<'static, memento::Result<u64>> {
    async move {
        let inner = memo.clone();
        memo.get(&format!("fib-{}", n), move || async move {
            if n <= 1 {
                return Ok::<_, MemoError>(n);
            }
            let (a, b) = tokio::try_join!(fib(inner.clone(), n - 1), fib(inner, n - 2))?;
            Ok(a.wrapping_add(b))
        })
        .await
    }
    .boxed()
}

/// Overlapping concurrent fibonacci computations
async fn cmd_fib(ctx: &CliContext, n: u64) -> Result<()> {
    println!("{} fib({}..={})", "🌀 Computing".cyan().bold(), n.saturating_sub(4), n);

    let memo: Memoizer<u64> = ctx.memoizer(Some(Duration::from_secs(600))).await?;
    let start = Instant::now();

    let mut tasks = JoinSet::new();
    for input in (n.saturating_sub(4)..=n).rev() {
        let memo = memo.clone();
        tasks.spawn(async move { (input, fib(memo, input).await) });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (input, result) = joined.context("Fibonacci task failed")?;
        results.push((input, result.with_context(|| format!("fib({}) failed", input))?));
    }
    results.sort_unstable();

    for (input, value) in &results {
        println!("   fib({}) = {}", input, value);
    }
    println!("   {} Finished in {:?}", "✓".green(), start.elapsed());

    print_metrics(&memo.metrics().snapshot());
    memo.shutdown();
    Ok(())
}

/// List registered backends
fn cmd_backends(ctx: &CliContext) -> Result<()> {
    println!("{}", "🗄️  Registered backends".cyan().bold());

    let registry = registry::<String>(&ctx.dir)?;
    for name in registry.names() {
        if name == ctx.settings.backend {
            println!("   {} {}", "●".green(), name.bold());
        } else {
            println!("   {} {}", "○".dimmed(), name);
        }
    }

    if !registry.contains(&ctx.settings.backend) {
        println!(
            "\n   {} selected backend '{}' is not registered",
            "⚠".yellow(),
            ctx.settings.backend
        );
    }
    Ok(())
}

fn print_metrics(snapshot: &MetricsSnapshot) {
    println!("\n{}", "📊 Metrics:".green().bold());
    println!("   Requests:     {}", snapshot.requests);
    println!("   Hits:         {}", snapshot.hits);
    println!("   Misses:       {}", snapshot.misses);
    println!("   Evictions:    {}", snapshot.evictions);
    println!("   Hit ratio:    {:.2}%", snapshot.hit_ratio() * 100.0);
    println!("   Avg latency:  {:?}", snapshot.avg_latency());
    println!("   Max latency:  {:?}", snapshot.max_latency());
}
