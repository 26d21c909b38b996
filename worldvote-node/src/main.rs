//! Worldvote Node
//!
//! Interactive poll client: keeps a local vote cache in sync with a shared
//! counter store and exposes the tally as a table, map colors and stats.

use clap::Parser;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use worldvote_core::render::{self, SortKey, SortOrder};
use worldvote_core::{
    compute_stats, percentage, run_sync_loop, EngineEvent, FileStore, MergeDecision, Reconciler,
    SyncConfig, VoteError, VoteKind, COUNTRIES,
};

/// Worldvote poll client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory for the local vote cache
    #[arg(short, long, default_value = "./worldvote-data")]
    data_dir: String,

    /// Remote store URL (http(s):// for REST polling, ws(s):// for live)
    #[arg(short, long)]
    remote_url: Option<String>,

    /// Poll interval for the REST strategy, in milliseconds
    #[arg(long, default_value = "2000")]
    poll_ms: u64,

    /// Start with the admin role active
    #[arg(long)]
    admin: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug)]
enum NodeCommand {
    Vote { code: String, kind: VoteKind },
    Table { key: Option<SortKey> },
    Map,
    Stats,
    Status,
    Reset,
    Logout,
    Simulate { count: u32 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Worldvote node starting (data dir {})", args.data_dir);

    // Remote strategy from the CLI flags
    let mut config = SyncConfig::default().with_poll_interval(Duration::from_millis(args.poll_ms));
    if let Some(url) = &args.remote_url {
        config = config.with_url(url);
    }
    let remote = config.build_remote();
    let remote_kind = remote.kind();

    // Engine over the persistent store
    let store = FileStore::open(&args.data_dir)?;
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let mut reconciler = Reconciler::open(store, args.admin, cmd_tx);
    if args.admin {
        // The asserted role is stored until an explicit logout.
        reconciler.set_admin(true)?;
    }
    let engine = Arc::new(RwLock::new(reconciler));

    let mut events = engine.read().await.subscribe_events();
    tokio::spawn(run_sync_loop(engine.clone(), remote, cmd_rx));

    // Stdin handler feeding the command channel
    let (command_tx, mut command_rx) = mpsc::channel::<NodeCommand>(16);
    std::thread::spawn(move || {
        print_menu();

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            let parts: Vec<&str> = line.trim().split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }

            match parts[0] {
                "vote" if parts.len() >= 2 => {
                    let _ = command_tx.blocking_send(NodeCommand::Vote {
                        code: parts[1].to_uppercase(),
                        kind: VoteKind::For,
                    });
                }
                "unsure" if parts.len() >= 2 => {
                    let _ = command_tx.blocking_send(NodeCommand::Vote {
                        code: parts[1].to_uppercase(),
                        kind: VoteKind::Unknown,
                    });
                }
                "table" => {
                    let key = parts.get(1).and_then(|name| parse_sort_key(name));
                    if parts.len() >= 2 && key.is_none() {
                        println!("Unknown column. Try: table [name|votes|percent|unknown]");
                    } else {
                        let _ = command_tx.blocking_send(NodeCommand::Table { key });
                    }
                }
                "map" => {
                    let _ = command_tx.blocking_send(NodeCommand::Map);
                }
                "stats" => {
                    let _ = command_tx.blocking_send(NodeCommand::Stats);
                }
                "status" => {
                    let _ = command_tx.blocking_send(NodeCommand::Status);
                }
                "reset" => {
                    let _ = command_tx.blocking_send(NodeCommand::Reset);
                }
                "logout" => {
                    let _ = command_tx.blocking_send(NodeCommand::Logout);
                }
                "simulate" if parts.len() >= 2 => match parts[1].parse::<u32>() {
                    Ok(count) => {
                        let _ = command_tx.blocking_send(NodeCommand::Simulate { count });
                    }
                    Err(_) => println!("Invalid count (must be a number)"),
                },
                "quit" | "exit" => {
                    std::process::exit(0);
                }
                _ => {
                    println!("Unknown command. Try: vote <CODE>");
                }
            }
        }
    });

    let mut sort: Option<SortOrder> = None;

    // Main event loop
    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                handle_command(&engine, command, remote_kind, &args.data_dir, &mut sort).await;
            }

            event = events.recv() => {
                match event {
                    Ok(EngineEvent::RemoteUpdate { decision: MergeDecision::ResetApplied }) => {
                        println!("Votes were reset, everyone can vote again");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        info!("Dropped {} engine events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

async fn handle_command(
    engine: &Arc<RwLock<Reconciler<FileStore>>>,
    command: NodeCommand,
    remote_kind: &str,
    data_dir: &str,
    sort: &mut Option<SortOrder>,
) {
    match command {
        NodeCommand::Vote { code, kind } => {
            let mut engine = engine.write().await;
            match engine.cast_vote(&code, kind) {
                Ok(receipt) => {
                    let count = receipt.tally.count(&code, kind);
                    let share = percentage(
                        receipt.tally.count(&code, VoteKind::For),
                        receipt.stats.total_for,
                    );
                    println!(
                        "Vote recorded: {} now has {} ({:.1}% of FOR votes)",
                        code, count, share
                    );
                }
                Err(VoteError::AlreadyVoted { code }) => {
                    println!("Already voted for {}", code);
                }
                Err(VoteError::UnknownCountry(code)) => {
                    println!("Unknown country code: {} (see 'table' for codes)", code);
                }
                Err(VoteError::Store(e)) => {
                    println!("Failed to save the vote: {}", e);
                }
            }
        }

        NodeCommand::Table { key } => {
            if let Some(key) = key {
                *sort = Some(match *sort {
                    Some(order) => order.toggled(key),
                    None => SortOrder::new(key),
                });
            }
            let engine = engine.read().await;
            print_table(&engine, *sort);
        }

        NodeCommand::Map => {
            let engine = engine.read().await;
            let colors = render::map_colors(engine.tally());
            for country in &COUNTRIES {
                println!("  {}  {}  {}", country.code, colors[country.code], country.name);
            }
        }

        NodeCommand::Stats => {
            let engine = engine.read().await;
            let stats = engine.stats();
            println!("Total votes:      {}", stats.total);
            println!("FOR votes:        {}", stats.total_for);
            match (stats.max_for, stats.min_positive_for) {
                (Some(max), Some(min)) => {
                    println!("Leader count:     {}", max);
                    println!("Smallest nonzero: {}", min);
                }
                _ => println!("No FOR votes yet"),
            }
        }

        NodeCommand::Status => {
            let engine = engine.read().await;
            println!("Data dir:   {}", data_dir);
            println!("Remote:     {}", remote_kind);
            println!("Admin role: {}", if engine.is_admin() { "active" } else { "off" });
            match engine.epoch() {
                Some(epoch) => match chrono::DateTime::from_timestamp_millis(epoch as i64) {
                    Some(at) => println!(
                        "Last reset: {} (epoch {})",
                        at.format("%Y-%m-%d %H:%M:%S UTC"),
                        epoch
                    ),
                    None => println!("Last reset: epoch {}", epoch),
                },
                None => println!("Last reset: never observed"),
            }
        }

        NodeCommand::Reset => {
            let mut engine = engine.write().await;
            if !engine.is_admin() {
                println!("Reset requires the admin role (restart with --admin)");
                return;
            }
            match engine.admin_reset() {
                Ok(epoch) => println!("All votes reset (epoch {})", epoch),
                Err(e) => println!("Reset failed: {}", e),
            }
        }

        NodeCommand::Logout => {
            let mut engine = engine.write().await;
            match engine.set_admin(false) {
                Ok(()) => println!("Admin role dropped"),
                Err(e) => println!("Failed to persist the admin flag: {}", e),
            }
        }

        NodeCommand::Simulate { count } => {
            let picks = random_picks(count);
            let mut engine = engine.write().await;
            let mut accepted = 0u32;
            let mut rejected = 0u32;
            for (index, kind) in picks {
                match engine.cast_vote(COUNTRIES[index].code, kind) {
                    Ok(_) => accepted += 1,
                    Err(_) => rejected += 1,
                }
            }
            println!("Simulated {} casts: {} accepted, {} rejected", count, accepted, rejected);
        }
    }
}

/// Random (country, kind) picks, drawn up front so the RNG never crosses
/// an await point.
fn random_picks(count: u32) -> Vec<(usize, VoteKind)> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let index = rng.gen_range(0..COUNTRIES.len());
            let kind = if rng.gen_bool(0.25) {
                VoteKind::Unknown
            } else {
                VoteKind::For
            };
            (index, kind)
        })
        .collect()
}

fn parse_sort_key(name: &str) -> Option<SortKey> {
    match name {
        "name" => Some(SortKey::Name),
        "votes" => Some(SortKey::Votes),
        "percent" => Some(SortKey::Percent),
        "unknown" => Some(SortKey::Unknown),
        _ => None,
    }
}

fn print_table(engine: &Reconciler<FileStore>, sort: Option<SortOrder>) {
    let rows = render::build_table(engine.tally(), sort);
    let stats = compute_stats(engine.tally());

    println!("Total votes: {}", stats.total);
    println!("{:<5} {:<16} {:>6} {:>8} {:>8}", "CODE", "COUNTRY", "FOR", "UNSURE", "%");
    for row in rows {
        let marker = if engine.has_ballot(row.code) { "*" } else { " " };
        println!(
            "{:<5} {:<16} {:>6} {:>8} {:>7.1}% {}",
            row.code, row.name, row.votes_for, row.votes_unknown, row.percent, marker
        );
    }
}

fn print_menu() {
    println!("\nCommands:");
    println!("  vote <CODE>      - Vote for a country (one ballot per country)");
    println!("  unsure <CODE>    - Record a \"don't know\" for a country");
    println!("  table [column]   - Show the tally (sort by name|votes|percent|unknown)");
    println!("  map              - Show map fill colors");
    println!("  stats            - Show tally statistics");
    println!("  status           - Show node status");
    println!("  reset            - Reset all votes (admin only)");
    println!("  logout           - Drop the admin role");
    println!("  simulate <n>     - Cast n random votes");
    println!("  quit             - Exit\n");
}
