use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repovault::health::HealthCheck;
use repovault::lock::LockError;
use repovault::{BackupRun, Config, GitHubLister, RepoLister};

#[derive(Parser)]
#[command(name = "repovault")]
#[command(about = "Incremental backup of remote git repositories to removable storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup: update mirrors and replicate changed repositories
    Run,

    /// List repositories a run would back up
    List,

    /// System health check and diagnostics
    Doctor,

    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    info!("Starting RepoVault v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Run => cmd_run(&config).await,
        Commands::List => cmd_list(&config).await,
        Commands::Doctor => cmd_doctor(&config),
        Commands::Init => cmd_init(),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Run a full backup
async fn cmd_run(config: &Config) -> Result<()> {
    if let Err(e) = config.validate() {
        eprintln!("❌ Invalid configuration: {}", e);
        std::process::exit(2);
    }

    let health = HealthCheck::run(config);
    if !health.all_passed() {
        print_health_report(&health);
        eprintln!("❌ Cannot run backup - fix the errors above first");
        std::process::exit(3);
    }

    // Show warnings (unplugged drives, missing credential) but continue
    for warning in health.warnings() {
        println!("⚠️  {}", warning.message);
        if let Some(details) = &warning.details {
            println!("   {}", details);
        }
    }

    let lister = GitHubLister::new(config);
    let run = BackupRun::new(config.clone(), Box::new(lister));

    // Ctrl+C finishes the in-flight repository, then cleans up and releases
    // the lock.
    let stop = run.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current repository");
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let stats = match run.execute().await {
        Ok(stats) => stats,
        Err(e) => {
            if e.downcast_ref::<LockError>().is_some() {
                eprintln!("❌ {}", e);
                std::process::exit(4);
            }
            return Err(e);
        }
    };

    println!("\n🎉 Backup run complete!");
    println!("   📊 Total repositories: {}", stats.total);
    println!("   🔄 Replicated: {}", stats.replicated);
    println!("   ⏭️  Unchanged (skipped): {}", stats.skipped_unchanged);
    println!("   ❌ Failed: {}", stats.failed);
    println!("   ⏱️  Duration: {:.2}s", stats.duration.as_secs_f64());
    println!("   💾 Master store: {}", stats.master_root.display());
    for target in &stats.targets {
        println!("   🎯 Target: {}", target.display());
    }

    if stats.total == 0 {
        eprintln!("⚠️  Account has no repositories");
        std::process::exit(5);
    }

    Ok(())
}

/// List repositories that would be backed up
async fn cmd_list(config: &Config) -> Result<()> {
    if let Err(e) = config.validate() {
        eprintln!("❌ Invalid configuration: {}", e);
        std::process::exit(2);
    }

    let lister = GitHubLister::new(config);
    let repos = lister.list().await?;

    println!("Repositories ({}):", repos.len());
    for repo in repos {
        println!("  📁 {} ({})", repo.name, repo.clone_url);
    }

    Ok(())
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);

    if !health.all_passed() {
        std::process::exit(3);
    }
    Ok(())
}

/// Write a default configuration file
fn cmd_init() -> Result<()> {
    let config_path = Config::default_config_path()?;

    if config_path.exists() {
        println!("Configuration already exists: {:?}", config_path);
        return Ok(());
    }

    Config::load_or_default()?;
    println!("✅ Default configuration written: {:?}", config_path);
    println!("   Set github.account and storage.targets, then run 'repovault run'");

    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    println!("🔍 RepoVault System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("{}:", name);
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
        println!();
    }

    if health.all_passed() {
        println!("✅ All required checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
