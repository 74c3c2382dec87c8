//! In-process Handel cluster simulation.
//!
//! Spins up N BLS-signing nodes over the local router, runs the aggregation
//! protocol until every live node holds a final aggregate meeting the
//! threshold, and reports per-node results. Faulty nodes are silenced in the
//! router: they receive but never transmit.
//!
//! Usage: `handel-simulator [config.json]` — without an argument the
//! defaults below apply.

use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{error, info, warn};

use handel_aggregator::{Config, Handel};
use handel_core::{Identity, Registry};
use handel_crypto::{BlsConstructor, BlsPublicKey, BlsSecretKey};
use handel_network::{LocalRouter, Network};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimulatorConfig {
    /// Number of participants.
    nodes: u32,
    /// Percentage of contributions a final aggregate must reach.
    contributions_percentage: usize,
    /// Dissemination ticker period in milliseconds.
    update_period_ms: u64,
    /// Peers contacted per level on improvements.
    candidate_count: usize,
    /// Overall run deadline in seconds.
    run_timeout_secs: u64,
    /// The string whose SHA-256 digest every node signs.
    message: String,
    /// Node IDs that never transmit.
    faulty: Vec<u32>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            nodes: 16,
            contributions_percentage: 51,
            update_period_ms: 50,
            candidate_count: 10,
            run_timeout_secs: 30,
            message: "handel simulation".to_string(),
            faulty: Vec::new(),
        }
    }
}

fn load_config() -> Result<SimulatorConfig, String> {
    match env::args().nth(1) {
        Some(path) => {
            let content =
                fs::read_to_string(&path).map_err(|e| format!("reading {path}: {e}"))?;
            serde_json::from_str(&content).map_err(|e| format!("parsing {path}: {e}"))
        }
        None => Ok(SimulatorConfig::default()),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let sim = match load_config() {
        Ok(sim) => sim,
        Err(err) => {
            error!(%err, "could not load the simulator config");
            return ExitCode::FAILURE;
        }
    };
    if sim.nodes == 0 {
        error!("a simulation needs at least one node");
        return ExitCode::FAILURE;
    }
    run(sim).await
}

async fn run(sim: SimulatorConfig) -> ExitCode {
    let n = sim.nodes;
    let msg = Sha256::digest(sim.message.as_bytes()).to_vec();

    let secrets: Vec<BlsSecretKey> = (0..n).map(|_| BlsSecretKey::generate(&mut OsRng)).collect();
    let keys: Vec<BlsPublicKey> = secrets.iter().map(BlsSecretKey::public_key).collect();
    let constructor = Arc::new(BlsConstructor::new(keys));

    let identities: Vec<Identity> = (0..n).map(|i| Identity::new(i, format!("local-{i}"))).collect();
    let registry = match Registry::new(identities) {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!(%err, "could not build the registry");
            return ExitCode::FAILURE;
        }
    };

    let router = LocalRouter::new();
    let config = Config {
        update_period_ms: sim.update_period_ms,
        candidate_count: sim.candidate_count,
        contributions_percentage: sim.contributions_percentage,
        ..Config::default()
    };

    let mut engines = Vec::new();
    let mut waiters = Vec::new();
    let started = Instant::now();
    for i in 0..n {
        let network: Arc<dyn Network> = Arc::new(router.network(i));
        let engine = match Handel::new(
            network,
            Arc::clone(&registry),
            registry.identity(i).expect("registry is dense").clone(),
            Arc::clone(&constructor),
            msg.clone(),
            secrets[i as usize].sign(&msg),
            config.clone(),
        ) {
            Ok(engine) => engine,
            Err(err) => {
                error!(node = i, %err, "could not build the engine");
                return ExitCode::FAILURE;
            }
        };

        if sim.faulty.contains(&i) {
            router.silence(i);
            // drop the output receiver so the silenced node's emitter never
            // blocks on a channel nobody reads
            drop(engine.final_signatures());
            warn!(node = i, "silenced, will receive but never transmit");
        } else if let Some(mut output) = engine.final_signatures() {
            let threshold = engine.threshold();
            waiters.push(tokio::spawn(async move {
                loop {
                    match output.recv().await {
                        Some(ms) if ms.cardinality() >= threshold => {
                            return Some((i, ms.cardinality(), started.elapsed()));
                        }
                        Some(_) => continue,
                        None => return None,
                    }
                }
            }));
        }
        engines.push(engine);
    }

    info!(
        nodes = n,
        faulty = sim.faulty.len(),
        threshold = config.threshold(n as usize),
        "starting simulation"
    );
    for engine in &engines {
        engine.clone().start().await;
    }

    let deadline = Duration::from_secs(sim.run_timeout_secs);
    let outcome = timeout(deadline, async {
        let mut reached = 0usize;
        for waiter in waiters {
            match waiter.await {
                Ok(Some((node, contributions, elapsed))) => {
                    info!(node, contributions, elapsed_ms = elapsed.as_millis() as u64, "threshold reached");
                    reached += 1;
                }
                Ok(None) => warn!("a node's output closed before reaching the threshold"),
                Err(err) => warn!(%err, "waiter task failed"),
            }
        }
        reached
    })
    .await;

    for engine in &engines {
        engine.stop().await;
    }

    match outcome {
        Ok(reached) => {
            info!(
                reached,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "simulation complete"
            );
            ExitCode::SUCCESS
        }
        Err(_) => {
            error!(timeout_secs = sim.run_timeout_secs, "simulation timed out");
            ExitCode::FAILURE
        }
    }
}
