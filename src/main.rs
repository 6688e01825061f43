//! Bidhouse — auction engine with automated bidders.
//!
//! Usage:
//!   bidhouse init             Write a default market.toml and sweeper.yml
//!   bidhouse run              Run agent scheduler + expiry sweeper
//!   bidhouse status           Show auctions and agents
//!   bidhouse bid ...          Place a bid as a human bidder
//!   bidhouse buy-now ...      Buy an auction outright
//!   bidhouse auction ...      Create or inspect auctions
//!   bidhouse agent ...        Manage automated bidding agents

use anyhow::{bail, Context, Result};
use bidhouse::bots::{AgentRegistry, AgentScheduler, AgentSettings};
use bidhouse::config::{self, MarketConfig};
use bidhouse::error::MarketError;
use bidhouse::market::{
    AuctionRepository, BidDesk, BroadcastSink, FanoutSink, NotificationSink, OutboxSink,
};
use bidhouse::state::{Database, SqliteStore};
use bidhouse::sweeper::{daemon::default_sweep_entries, SweepDaemon};
use bidhouse::types::*;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "bidhouse")]
#[command(version = "0.1.0")]
#[command(about = "Live auctions with automated bidding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to bidhouse home directory (defaults to ~/.bidhouse).
    #[arg(long)]
    home: Option<String>,

    /// Log level (debug, info, warn, error). Overrides `log_level` in market.toml.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write default configuration files.
    Init,

    /// Run the agent scheduler and expiry sweeper until Ctrl+C.
    Run,

    /// Show auctions, agents and sweeper state.
    Status,

    /// Place a bid.
    Bid {
        auction_id: String,
        #[arg(long)]
        bidder: String,
        /// Name shown in the bid log (defaults to the bidder id).
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        amount: u64,
    },

    /// Buy an auction at its buy-now price.
    BuyNow {
        auction_id: String,
        #[arg(long)]
        bidder: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Create or inspect auctions.
    #[command(subcommand)]
    Auction(AuctionCommand),

    /// Manage automated bidding agents.
    #[command(subcommand)]
    Agent(AgentCommand),
}

#[derive(Subcommand, Debug)]
enum AuctionCommand {
    /// List a new auction.
    Create {
        #[arg(long)]
        seller: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "image")]
        images: Vec<String>,
        #[arg(long)]
        starting_price: u64,
        #[arg(long)]
        buy_now: Option<u64>,
        /// Minutes until the auction ends.
        #[arg(long, default_value_t = 60)]
        duration_mins: i64,
    },

    /// Show one auction with its bid log.
    Show { auction_id: String },
}

#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// Register a new agent (active immediately).
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        balance: u64,
        #[arg(long)]
        ceiling: u64,
        /// Minimum seconds between wake-ups.
        #[arg(long, default_value_t = 10)]
        interval_min: u64,
        /// Maximum seconds between wake-ups.
        #[arg(long, default_value_t = 60)]
        interval_max: u64,
        /// Restrict to these auctions (repeatable).
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// List agents.
    List,

    /// Change an agent's limits or timing.
    Update {
        agent_id: String,
        #[arg(long)]
        balance: Option<u64>,
        #[arg(long)]
        ceiling: Option<u64>,
        #[arg(long)]
        interval_min: Option<u64>,
        #[arg(long)]
        interval_max: Option<u64>,
    },

    Activate { agent_id: String },

    Deactivate { agent_id: String },

    Remove { agent_id: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve home directory
    let home_dir = cli
        .home
        .as_deref()
        .map(|h| PathBuf::from(shellexpand::tilde(h).into_owned()))
        .unwrap_or_else(config::default_home_dir);

    // Initialize logging
    let log_level = cli.log_level.clone().unwrap_or_else(|| {
        config::load_config(&home_dir.join("market.toml"))
            .map(|c| c.log_level)
            .unwrap_or_else(|_| "info".into())
    });
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => cmd_init(&home_dir),
        Commands::Run => cmd_run(&home_dir).await,
        Commands::Status => cmd_status(&home_dir).await,
        Commands::Bid {
            auction_id,
            bidder,
            name,
            amount,
        } => cmd_bid(&home_dir, &auction_id, &bidder, name, amount).await,
        Commands::BuyNow {
            auction_id,
            bidder,
            name,
        } => cmd_buy_now(&home_dir, &auction_id, &bidder, name).await,
        Commands::Auction(cmd) => cmd_auction(&home_dir, cmd).await,
        Commands::Agent(cmd) => cmd_agent(&home_dir, cmd).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_init(home_dir: &Path) -> Result<()> {
    let config_path = home_dir.join("market.toml");
    if config_path.exists() {
        bail!("Config already exists at {}", config_path.display());
    }

    let cfg = MarketConfig {
        db_path: home_dir.join("state.db").display().to_string(),
        sweeper_config_path: home_dir.join("sweeper.yml").display().to_string(),
        ..MarketConfig::default()
    };
    config::save_config(&cfg, &config_path)?;

    let sweeper_path = home_dir.join("sweeper.yml");
    if !sweeper_path.exists() {
        let yaml = serde_yaml::to_string(&default_sweep_entries())
            .context("Failed to serialize sweeper defaults")?;
        std::fs::write(&sweeper_path, yaml).context("Failed to write sweeper.yml")?;
    }

    println!("{} Wrote {}", ">>>".green().bold(), config_path.display());
    Ok(())
}

async fn cmd_run(home_dir: &Path) -> Result<()> {
    let live = BroadcastSink::new(256);
    let mut events = live.subscribe();
    let (cfg, store, desk) = bootstrap(home_dir, Some(live))?;

    println!(
        "{} Starting market '{}' (increment {}, max retries {})",
        ">>>".green().bold(),
        cfg.name,
        cfg.increment,
        cfg.max_retries,
    );

    // Create a cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn the sweep daemon (token is checked inside the loop)
    let sweep_cancel = cancel.clone();
    let mut sweeper = SweepDaemon::new(&cfg, desk.clone(), store.clone())?;
    let sweep_handle = tokio::spawn(async move {
        if let Err(e) = sweeper.run(sweep_cancel).await {
            error!("Sweep daemon error: {}", e);
        }
    });

    // Spawn the agent scheduler. Edits from other processes arrive through
    // version polling; the in-process registry covers everything else.
    let registry = AgentRegistry::new(Arc::new(store.clone()));
    let changes = registry.subscribe();
    let mut scheduler = AgentScheduler::new(
        desk.clone(),
        registry.store(),
        Duration::from_secs(cfg.roster_poll_secs),
        Duration::from_secs(cfg.shutdown_timeout_secs),
    );
    let scheduler_cancel = cancel.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(changes, scheduler_cancel).await {
            error!("Agent scheduler error: {}", e);
        }
    });

    // Echo domain events as they happen
    let events_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    "[{}] {}",
                    event.kind(),
                    serde_json::to_string(&event).unwrap_or_default()
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event log lagged, skipped {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!("\n{} Shutting down gracefully...", "<<<".red().bold());

    // Signal cancellation to all spawned tasks
    cancel.cancel();

    // Wait for tasks to finish (with a timeout to avoid hanging forever)
    let shutdown_timeout = Duration::from_secs(cfg.shutdown_timeout_secs + 1);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        if let Err(e) = sweep_handle.await {
            warn!("Sweep task join error: {}", e);
        }
        if let Err(e) = scheduler_handle.await {
            warn!("Scheduler task join error: {}", e);
        }
    })
    .await;

    drop(registry);
    events_handle.abort();
    info!("Market shutdown complete");
    Ok(())
}

async fn cmd_status(home_dir: &Path) -> Result<()> {
    let (cfg, store, _desk) = bootstrap(home_dir, None)?;

    let auctions = store.list_auctions().await?;
    let agents = AgentRegistry::new(Arc::new(store.clone())).list().await?;
    let last_sweep = store
        .with_db(|db| db.kv_get("last_sweep"))
        .await?
        .unwrap_or_else(|| "never".into());

    let now = Utc::now();
    println!();
    println!("{}", format!("=== {} ===", cfg.name).bold());
    println!();
    println!("  {}:", "Auctions".bold());
    if auctions.is_empty() {
        println!("    (none)");
    }
    for a in &auctions {
        let remaining = a.end_time - now;
        let left = if remaining.num_seconds() > 0 {
            format!("{}m left", remaining.num_minutes())
        } else {
            "closed".to_string()
        };
        println!(
            "    {}  {:<24} {} price {:>8}  bids {:>3}  buy-now {:>8}  {}",
            a.id.dimmed(),
            a.title,
            colorize_status(a.status),
            a.current_price,
            a.bid_count,
            a.buy_now_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into()),
            left,
        );
    }
    println!();
    println!("  {}:", "Agents".bold());
    if agents.is_empty() {
        println!("    (none)");
    }
    for agent in &agents {
        print_agent(agent);
    }
    println!();
    println!("  {}: {}", "Last sweep".bold(), last_sweep);
    println!();

    Ok(())
}

async fn cmd_bid(
    home_dir: &Path,
    auction_id: &str,
    bidder: &str,
    name: Option<String>,
    amount: u64,
) -> Result<()> {
    let (_cfg, _store, desk) = bootstrap(home_dir, None)?;
    let name = name.unwrap_or_else(|| bidder.to_string());

    match desk.place_bid(auction_id, bidder, &name, amount, false).await {
        Ok(applied) => {
            println!(
                "{} Bid {} accepted; current price {}",
                ">>>".green().bold(),
                applied.bid.amount,
                applied.current_price
            );
            if applied.sold() {
                println!(
                    "{} Buy-now price reached: auction sold to {}",
                    ">>>".green().bold(),
                    bidder
                );
            }
            Ok(())
        }
        Err(e) => report_rejection(e),
    }
}

async fn cmd_buy_now(
    home_dir: &Path,
    auction_id: &str,
    bidder: &str,
    name: Option<String>,
) -> Result<()> {
    let (_cfg, _store, desk) = bootstrap(home_dir, None)?;
    let name = name.unwrap_or_else(|| bidder.to_string());

    match desk.buy_now(auction_id, bidder, &name).await {
        Ok(sold) => {
            println!(
                "{} Auction {} sold to {} at {}",
                ">>>".green().bold(),
                sold.auction_id,
                sold.winner_id,
                sold.price
            );
            Ok(())
        }
        Err(e) => report_rejection(e),
    }
}

async fn cmd_auction(home_dir: &Path, cmd: AuctionCommand) -> Result<()> {
    let (cfg, store, _desk) = bootstrap(home_dir, None)?;

    match cmd {
        AuctionCommand::Create {
            seller,
            title,
            description,
            images,
            starting_price,
            buy_now,
            duration_mins,
        } => {
            let auction = store
                .create_auction(NewAuction {
                    seller_id: seller,
                    title,
                    description,
                    images,
                    starting_price,
                    buy_now_price: buy_now,
                    end_time: Utc::now() + chrono::Duration::minutes(duration_mins),
                }, cfg.increment)
                .await?;
            println!("{} Created auction {}", ">>>".green().bold(), auction.id);
        }
        AuctionCommand::Show { auction_id } => {
            let auction = store
                .read(&auction_id)
                .await?
                .with_context(|| format!("No auction with id {}", auction_id))?;
            let history = store.bid_history(&auction_id).await?;

            println!();
            println!("{}", auction.title.bold());
            println!("  Status:   {}", colorize_status(auction.status));
            println!("  Seller:   {}", auction.seller_id);
            println!("  Price:    {} (start {})", auction.current_price, auction.starting_price);
            if let Some(p) = auction.buy_now_price {
                println!("  Buy-now:  {}", p);
            }
            println!("  Ends:     {}", auction.end_time.to_rfc3339());
            if let Some(w) = &auction.winner_id {
                println!("  Winner:   {}", w.green());
            }
            println!();
            for bid in &history {
                println!(
                    "  {}  {:>8}  {}{}",
                    bid.timestamp.format("%H:%M:%S"),
                    bid.amount,
                    bid.display_name,
                    if bid.is_automated { " (bot)".dimmed().to_string() } else { String::new() },
                );
            }
            println!();
        }
    }

    Ok(())
}

async fn cmd_agent(home_dir: &Path, cmd: AgentCommand) -> Result<()> {
    let (_cfg, store, _desk) = bootstrap(home_dir, None)?;
    let registry = AgentRegistry::new(Arc::new(store));

    match cmd {
        AgentCommand::Add {
            name,
            balance,
            ceiling,
            interval_min,
            interval_max,
            targets,
        } => {
            let agent = registry
                .create(AgentSettings {
                    name,
                    balance,
                    bid_ceiling: ceiling,
                    interval_min,
                    interval_max,
                    target_auction_ids: targets,
                })
                .await?;
            println!("{} Created agent {}", ">>>".green().bold(), agent.id);
        }
        AgentCommand::List => {
            for agent in registry.list().await? {
                print_agent(&agent);
            }
        }
        AgentCommand::Update {
            agent_id,
            balance,
            ceiling,
            interval_min,
            interval_max,
        } => {
            let mut agent = registry
                .get(&agent_id)
                .await?
                .with_context(|| format!("No agent with id {}", agent_id))?;
            if let Some(v) = balance {
                agent.balance = v;
            }
            if let Some(v) = ceiling {
                agent.bid_ceiling = v;
            }
            if let Some(v) = interval_min {
                agent.interval_min = v;
            }
            if let Some(v) = interval_max {
                agent.interval_max = v;
            }
            registry.update(agent).await?;
            println!("{} Updated agent {}", ">>>".green().bold(), agent_id);
        }
        AgentCommand::Activate { agent_id } => {
            registry.set_active(&agent_id, true).await?;
            println!("{} Activated agent {}", ">>>".green().bold(), agent_id);
        }
        AgentCommand::Deactivate { agent_id } => {
            registry.set_active(&agent_id, false).await?;
            println!("{} Deactivated agent {}", ">>>".green().bold(), agent_id);
        }
        AgentCommand::Remove { agent_id } => {
            if !registry.delete(&agent_id).await? {
                bail!("No agent with id {}", agent_id);
            }
            println!("{} Removed agent {}", ">>>".green().bold(), agent_id);
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bootstrap the runtime: load config, open the database, build the desk.
/// Events always land in the outbox; `live` adds an in-process feed.
fn bootstrap(
    home_dir: &Path,
    live: Option<BroadcastSink>,
) -> Result<(MarketConfig, SqliteStore, BidDesk)> {
    let config_path = home_dir.join("market.toml");

    if !config_path.exists() {
        eprintln!(
            "{} No config found at {:?}. Run `bidhouse init` first.",
            "Error:".red().bold(),
            config_path
        );
        std::process::exit(1);
    }

    let cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = cfg.resolved_db_path();
    let db_path = Path::new(&db_path);
    let db = Database::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let store = SqliteStore::new(Arc::new(Mutex::new(db)));
    let outbox: Arc<dyn NotificationSink> = Arc::new(OutboxSink::new(store.clone()));
    let sink: Arc<dyn NotificationSink> = match live {
        Some(live) => Arc::new(FanoutSink::new(vec![outbox, Arc::new(live)])),
        None => outbox,
    };
    let desk = BidDesk::new(Arc::new(store.clone()), sink, cfg.increment, cfg.max_retries);

    Ok((cfg, store, desk))
}

fn report_rejection(e: MarketError) -> Result<()> {
    if let Some(rejection) = e.rejection() {
        if rejection.is_retryable() {
            eprintln!(
                "{} {} (re-check the price and try again)",
                "Busy:".yellow().bold(),
                rejection
            );
        } else {
            eprintln!("{} {} [{}]", "Rejected:".red().bold(), rejection, rejection.code());
        }
        std::process::exit(2);
    }
    Err(e.into())
}

fn print_agent(agent: &AutomatedBidAgent) {
    let state = if agent.is_eligible() {
        "scheduled".green()
    } else if agent.active {
        "no balance".yellow()
    } else {
        "inactive".dimmed()
    };
    println!(
        "    {}  {:<16} {}  balance {:>8}  ceiling {:>8}  every {}-{}s{}",
        agent.id.dimmed(),
        agent.name,
        state,
        agent.balance,
        agent.bid_ceiling,
        agent.interval_min,
        agent.interval_max,
        if agent.target_auction_ids.is_empty() {
            String::new()
        } else {
            format!("  targets {}", agent.target_auction_ids.join(","))
        },
    );
}

fn colorize_status(status: AuctionStatus) -> String {
    match status {
        AuctionStatus::Active => "active".green().to_string(),
        AuctionStatus::Ended => "ended".yellow().to_string(),
        AuctionStatus::Sold => "sold".red().bold().to_string(),
    }
}
