//! Queue Tester CLI Tool
//!
//! Runs several in-process queue instances against one shared store and tick
//! lock, the same way separate service processes share Redis, and reports
//! what the ticks did.
//!
//! Usage:
//!   cargo run --bin queue-tester -- --help
//!   cargo run --bin queue-tester simulate --instances 4 --players 40 --rounds 3
//!   cargo run --bin queue-tester run-scenario --scenario rejoin
//!   cargo run --bin queue-tester run-all-scenarios

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use queue_warden::amqp::NullEventPublisher;
use queue_warden::lock::InMemoryTickLock;
use queue_warden::matchmaking::{
    RecordingMatchCreation, SchedulerConfig, TickOutcome, TickScheduler,
};
use queue_warden::players::InMemoryPlayerDirectory;
use queue_warden::queue::{CoordinatorConfig, InMemoryQueueStore, QueueCoordinator};
use queue_warden::types::{JoinRequest, PlayerProfile};
use queue_warden::utils::ManualClock;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "queue-tester")]
#[command(about = "Multi-instance simulation tool for the queue-warden matchmaking queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Players per team
    #[arg(long, default_value = "5")]
    team_size: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the queue and let several instances tick concurrently
    Simulate {
        /// Number of service instances sharing the store
        #[arg(short, long, default_value = "3")]
        instances: usize,
        /// Players to queue before ticking
        #[arg(short, long, default_value = "30")]
        players: usize,
        /// Tick rounds; every instance ticks once per round
        #[arg(short, long, default_value = "3")]
        rounds: usize,
        /// How long each match handoff takes, in milliseconds
        #[arg(long, default_value = "50")]
        handoff_delay_ms: u64,
        /// How long a tick waits for the lock, in milliseconds
        #[arg(long, default_value = "10")]
        lock_wait_ms: u64,
    },
    /// Run a predefined scenario
    RunScenario {
        /// Scenario name (below-threshold, exact-threshold, rejoin, expiry, handoff-failure)
        #[arg(short, long)]
        scenario: String,
    },
    /// Run all predefined scenarios
    RunAllScenarios,
}

/// One simulated service instance
struct Instance {
    coordinator: Arc<QueueCoordinator>,
    scheduler: Arc<TickScheduler>,
}

/// Instances wired to one store, lock, player directory and match recorder
struct Cluster {
    instances: Vec<Instance>,
    store: Arc<InMemoryQueueStore>,
    matches: Arc<RecordingMatchCreation>,
    clock: Arc<ManualClock>,
}

impl Cluster {
    fn new(
        instances: usize,
        players: usize,
        team_size: usize,
        handoff_delay: Duration,
        lock_wait: Duration,
    ) -> Self {
        let store = Arc::new(InMemoryQueueStore::default());
        let lock = Arc::new(InMemoryTickLock::new());
        let directory = Arc::new(InMemoryPlayerDirectory::with_profiles(
            (1..=players).map(|i| PlayerProfile::new(player_id(i), format!("Player {}", i))),
        ));
        let matches = Arc::new(RecordingMatchCreation::with_delay(handoff_delay));
        let clock = Arc::new(ManualClock::default());

        let coordinator_config = CoordinatorConfig {
            team_size,
            ..CoordinatorConfig::default()
        };
        let scheduler_config = SchedulerConfig {
            team_size,
            lock_wait_bound: lock_wait,
            ..SchedulerConfig::default()
        };

        let instances = (0..instances.max(1))
            .map(|_| {
                let coordinator = Arc::new(
                    QueueCoordinator::new(
                        store.clone(),
                        directory.clone(),
                        Arc::new(NullEventPublisher),
                        coordinator_config.clone(),
                    )
                    .with_clock(clock.clone()),
                );
                let scheduler = Arc::new(TickScheduler::new(
                    coordinator.clone(),
                    lock.clone(),
                    matches.clone(),
                    scheduler_config.clone(),
                ));
                Instance {
                    coordinator,
                    scheduler,
                }
            })
            .collect();

        Self {
            instances,
            store,
            matches,
            clock,
        }
    }

    fn coordinator(&self, index: usize) -> Arc<QueueCoordinator> {
        self.instances[index % self.instances.len()]
            .coordinator
            .clone()
    }

    /// Join players `1..=count`, spreading requests over the instances
    async fn join_players(&self, count: usize) -> Result<()> {
        for i in 1..=count {
            self.coordinator(i).join(join_request(&player_id(i))).await?;
            // Distinct join times keep seniority readable in reports
            self.clock.advance(chrono::Duration::milliseconds(1));
        }
        Ok(())
    }

    /// Every instance ticks at once; returns the outcome labels
    async fn tick_round(&self) -> Vec<String> {
        let mut ticks = JoinSet::new();
        for instance in &self.instances {
            let scheduler = instance.scheduler.clone();
            ticks.spawn(async move { scheduler.run_tick().await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = ticks.join_next().await {
            let label = match joined {
                Ok(Ok(outcome)) => outcome.label().to_string(),
                Ok(Err(e)) => format!("error: {}", e),
                Err(e) => format!("panicked: {}", e),
            };
            outcomes.push(label);
        }
        outcomes
    }

    async fn active(&self) -> Result<usize> {
        Ok(self.coordinator(0).status(None).await?.count)
    }

    /// No identity may appear in more than one match
    fn duplicate_assignments(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for recorded in self.matches.matches() {
            for player in recorded.teams.team_a.iter().chain(&recorded.teams.team_b) {
                if !seen.insert(player.identity.clone()) {
                    duplicates.push(player.identity.clone());
                }
            }
        }
        duplicates
    }
}

fn player_id(i: usize) -> String {
    format!("player-{:03}", i)
}

fn join_request(identity: &str) -> JoinRequest {
    JoinRequest {
        identity: identity.to_string(),
        region: "euw".to_string(),
        skill_value: 1500.0,
        primary_role: None,
        secondary_role: None,
    }
}

async fn simulate(
    team_size: usize,
    instances: usize,
    players: usize,
    rounds: usize,
    handoff_delay: Duration,
    lock_wait: Duration,
) -> Result<()> {
    let cluster = Cluster::new(instances, players, team_size, handoff_delay, lock_wait);

    println!(
        "🧪 Simulating {} instances, {} players, team size {}",
        cluster.instances.len(),
        players,
        team_size
    );
    cluster.join_players(players).await?;
    println!("  Queued: {}", cluster.active().await?);

    for round in 1..=rounds {
        let outcomes = cluster.tick_round().await;
        println!("  Round {}: {:?}", round, outcomes);
        println!(
            "    Matches so far: {}, still queued: {}",
            cluster.matches.match_count(),
            cluster.active().await?
        );
    }

    let duplicates = cluster.duplicate_assignments();
    println!("\n📊 Simulation results:");
    println!("  Matches formed: {}", cluster.matches.match_count());
    println!("  Players left in queue: {}", cluster.active().await?);
    println!("  Stored entries: {}", cluster.store.stored_count());
    if duplicates.is_empty() {
        println!("  ✅ No player was assigned to more than one match");
        Ok(())
    } else {
        bail!("players assigned twice: {:?}", duplicates)
    }
}

async fn run_scenario(name: &str, team_size: usize) -> Result<()> {
    let needed = team_size * 2;
    let cluster = Cluster::new(
        2,
        needed * 2,
        team_size,
        Duration::from_millis(0),
        Duration::from_millis(10),
    );

    match name {
        "below-threshold" => {
            cluster.join_players(needed - 1).await?;
            let outcomes = cluster.tick_round().await;
            if cluster.matches.match_count() != 0 || cluster.active().await? != needed - 1 {
                bail!("queue changed below threshold: {:?}", outcomes);
            }
        }
        "exact-threshold" => {
            cluster.join_players(needed).await?;
            cluster.tick_round().await;
            let matches = cluster.matches.matches();
            if matches.len() != 1 || cluster.active().await? != 0 {
                bail!("expected exactly one match and an empty queue");
            }
            let team_a: Vec<_> = matches[0]
                .teams
                .team_a
                .iter()
                .map(|p| p.identity.clone())
                .collect();
            let expected: Vec<_> = (1..=needed).step_by(2).map(player_id).collect();
            if team_a != expected {
                bail!("team A {:?} is not the alternating split", team_a);
            }
        }
        "rejoin" => {
            cluster.join_players(3).await?;
            let coordinator = cluster.coordinator(0);
            coordinator.leave(&player_id(1)).await?;
            let response = coordinator.join(join_request(&player_id(1))).await?;
            if response.entry.position != 1 {
                bail!(
                    "rejoined player lost seniority (position {})",
                    response.entry.position
                );
            }
        }
        "expiry" => {
            cluster.join_players(3).await?;
            cluster.clock.advance(chrono::Duration::seconds(601));
            let expired = cluster.instances[0].scheduler.run_sweep().await?;
            if expired != 3 || cluster.active().await? != 0 {
                bail!("expected 3 expired entries, sweep removed {}", expired);
            }
        }
        "handoff-failure" => {
            cluster.join_players(needed).await?;
            cluster.matches.set_failing(true);
            let report = match cluster.instances[0].scheduler.run_tick().await? {
                TickOutcome::Matched(report) => report,
                other => bail!("tick did not select players: {}", other.label()),
            };
            if report.match_handle.is_some() || cluster.active().await? != 0 {
                bail!("failed handoff must still remove the selected entries");
            }
        }
        other => bail!(
            "Unknown scenario '{}'. Available: below-threshold, exact-threshold, rejoin, expiry, handoff-failure",
            other
        ),
    }

    Ok(())
}

const SCENARIOS: [&str; 5] = [
    "below-threshold",
    "exact-threshold",
    "rejoin",
    "expiry",
    "handoff-failure",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.team_size == 0 {
        bail!("team size must be at least 1");
    }

    match cli.command {
        Commands::Simulate {
            instances,
            players,
            rounds,
            handoff_delay_ms,
            lock_wait_ms,
        } => {
            if let Err(e) = simulate(
                cli.team_size,
                instances,
                players,
                rounds,
                Duration::from_millis(handoff_delay_ms),
                Duration::from_millis(lock_wait_ms),
            )
            .await
            {
                eprintln!("❌ Simulation failed: {}", e);
                std::process::exit(1);
            }
        }

        Commands::RunScenario { scenario } => {
            println!("🧪 Running scenario: {}", scenario);
            match run_scenario(&scenario.to_lowercase(), cli.team_size).await {
                Ok(()) => println!("✅ Scenario completed successfully!"),
                Err(e) => {
                    eprintln!("❌ Scenario failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::RunAllScenarios => {
            let mut passed = 0;
            let mut failed = 0;

            println!("🧪 Running all test scenarios...\n");

            for name in SCENARIOS {
                print!("Running '{}' scenario... ", name);
                match run_scenario(name, cli.team_size).await {
                    Ok(()) => {
                        println!("✅ PASSED");
                        passed += 1;
                    }
                    Err(e) => {
                        println!("❌ FAILED ({})", e);
                        failed += 1;
                    }
                }
            }

            println!("\n📊 Results: {} passed, {} failed", passed, failed);
            if failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
