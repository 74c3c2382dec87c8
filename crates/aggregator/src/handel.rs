//! The aggregation engine.
//!
//! Owns the level state machine, the replace store, and the verification
//! pipeline. Four tasks cooperate once started: an ingress pump feeding
//! packets into parsing, the verification worker, a verified-sink consumer
//! that stores aggregates and reacts to them, and a periodic ticker that
//! re-disseminates the current best per level.
//!
//! Level indexing: store level 0 is this node's own contribution; store
//! level `k` mirrors peer level `k`; the level array is 0-indexed, so peer
//! level `k` lives at `levels[k - 1]`.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use handel_core::{
    BitSet, Constructor, HandelError, Identity, MultiSignature, Packet, Registry, SigOf, Signature,
};
use handel_network::Network;

use crate::config::Config;
use crate::level::Level;
use crate::partitioner::BinomialPartitioner;
use crate::processing::{Contribution, FifoVerifier};
use crate::store::ReplaceStore;
use crate::AggregatorError;

/// State guarded by the engine-wide lock: the level array, the level
/// cursor, the best emitted aggregate, and the shutdown flag.
struct Inner<S: Signature> {
    curr_level: u8,
    levels: Vec<Level>,
    best: Option<MultiSignature<S>>,
    done: bool,
    out_tx: Option<mpsc::Sender<MultiSignature<S>>>,
}

/// Pieces handed to the background tasks on `start`.
struct Boot<C: Constructor> {
    verifier: FifoVerifier<C>,
    verified_rx: mpsc::Receiver<Contribution<SigOf<C>>>,
    packet_rx: mpsc::Receiver<Packet>,
}

/// A node's aggregation engine. Thread-safe; share via `Arc`.
pub struct Handel<C: Constructor> {
    config: Config,
    network: Arc<dyn Network>,
    registry: Arc<Registry>,
    constructor: Arc<C>,
    id: Identity,
    threshold: usize,
    max_level: u8,
    store: StdMutex<ReplaceStore<SigOf<C>>>,
    inner: Mutex<Inner<SigOf<C>>>,
    pending_tx: mpsc::Sender<Contribution<SigOf<C>>>,
    boot: StdMutex<Option<Boot<C>>>,
    out_rx: StdMutex<Option<mpsc::Receiver<MultiSignature<SigOf<C>>>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C: Constructor> Handel<C> {
    /// Build an engine for `identity`, contributing `own_signature` over
    /// `msg`. Registers a listener channel on the network; nothing runs
    /// until [`Handel::start`].
    pub fn new(
        network: Arc<dyn Network>,
        registry: Arc<Registry>,
        identity: Identity,
        constructor: Arc<C>,
        msg: Vec<u8>,
        own_signature: SigOf<C>,
        config: Config,
    ) -> Result<Arc<Self>, AggregatorError> {
        let config = config.merge_with_default();
        let n = registry.size();
        let partitioner = BinomialPartitioner::new(identity.id(), Arc::clone(&registry))?;
        let max_level = partitioner.max_level();
        let levels: Vec<Level> = (1..=max_level)
            .map(|l| Level::new(l, partitioner.pick_next_at(l, n).unwrap_or_default()))
            .collect();

        let mut own_bits = BitSet::new(n);
        own_bits.set(identity.id() as usize)?;
        let own = MultiSignature::new(own_bits, own_signature);

        let (pending_tx, pending_rx) = mpsc::channel(config.pending_capacity);
        let (verified_tx, verified_rx) = mpsc::channel(config.verified_capacity);
        let (out_tx, out_rx) = mpsc::channel(config.output_capacity);
        let (packet_tx, packet_rx) = mpsc::channel(config.pending_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        network.register_listener(packet_tx);

        let verifier = FifoVerifier::new(
            Arc::clone(&constructor),
            Arc::from(msg),
            pending_rx,
            verified_tx,
            shutdown_rx.clone(),
        );

        let threshold = config.threshold(n);
        Ok(Arc::new(Self {
            config,
            network,
            registry,
            constructor,
            id: identity,
            threshold,
            max_level,
            store: StdMutex::new(ReplaceStore::new(max_level, own)),
            inner: Mutex::new(Inner {
                curr_level: 0,
                levels,
                best: None,
                done: false,
                out_tx: Some(out_tx),
            }),
            pending_tx,
            boot: StdMutex::new(Some(Boot {
                verifier,
                verified_rx,
                packet_rx,
            })),
            out_rx: StdMutex::new(Some(out_rx)),
            shutdown_tx,
            shutdown_rx,
        }))
    }

    /// Contribution count a final aggregate must reach before emission.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    /// Take the channel of final aggregates. Emissions are strictly
    /// increasing in cardinality and each meets the threshold; the channel
    /// closes on stop. `None` after the first call.
    pub fn final_signatures(&self) -> Option<mpsc::Receiver<MultiSignature<SigOf<C>>>> {
        self.out_rx.lock().expect("output lock poisoned").take()
    }

    /// Spawn the background tasks and open the first level. Idempotent.
    pub async fn start(self: Arc<Self>) {
        let boot = self.boot.lock().expect("boot lock poisoned").take();
        let Some(boot) = boot else {
            debug!(node = self.id.id(), "already started");
            return;
        };

        tokio::spawn(boot.verifier.run());
        tokio::spawn(Arc::clone(&self).run_verified_sink(boot.verified_rx));
        tokio::spawn(Arc::clone(&self).run_ingress(boot.packet_rx));
        tokio::spawn(Arc::clone(&self).run_ticker());

        let mut inner = self.inner.lock().await;
        info!(
            node = self.id.id(),
            participants = self.registry.size(),
            levels = self.max_level,
            threshold = self.threshold,
            "starting aggregation"
        );
        if let Err(err) = self.start_next_level(&mut inner) {
            self.halt(&mut inner, &err);
            return;
        }
        // our own contribution alone may already satisfy the threshold
        if let Err(err) = self.check_final_signature(&mut inner).await {
            self.halt(&mut inner, &err);
        }
    }

    /// Stop the engine: close the output channel and wind down the ticker,
    /// verifier, and sink. Idempotent; packets arriving afterwards are
    /// dropped.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.done {
            return;
        }
        inner.done = true;
        inner.out_tx = None;
        let _ = self.shutdown_tx.send(true);
        info!(node = self.id.id(), "stopped");
    }

    /// Entry point from the network: validate the packet and queue its
    /// aggregate for verification. Malformed or out-of-range packets are
    /// logged and dropped.
    pub async fn new_packet(&self, packet: Packet) {
        let inner = self.inner.lock().await;
        if inner.done {
            return;
        }
        match self.parse_packet(&packet) {
            Ok(contribution) => {
                debug!(
                    node = self.id.id(),
                    origin = contribution.origin,
                    level = contribution.level,
                    contributions = contribution.ms.cardinality(),
                    "received aggregate"
                );
                if self.pending_tx.try_send(contribution).is_err() {
                    warn!(node = self.id.id(), "verification queue full, packet dropped");
                }
            }
            Err(err) => warn!(
                node = self.id.id(),
                origin = packet.origin,
                level = packet.level,
                %err,
                "invalid packet dropped"
            ),
        }
    }

    fn parse_packet(&self, packet: &Packet) -> Result<Contribution<SigOf<C>>, AggregatorError> {
        let n = self.registry.size();
        if packet.origin as usize >= n {
            return Err(AggregatorError::OriginOutOfRange(packet.origin));
        }
        if packet.level == 0 || packet.level > self.max_level {
            return Err(AggregatorError::LevelOutOfRange {
                got: packet.level,
                max: self.max_level,
            });
        }
        let ms = MultiSignature::from_bytes(&packet.multi_sig, self.constructor.as_ref())?;
        if ms.bits.capacity() != n {
            return Err(HandelError::CapacityMismatch(ms.bits.capacity(), n).into());
        }
        Ok(Contribution {
            origin: packet.origin,
            level: packet.level,
            ms,
        })
    }

    async fn run_ingress(self: Arc<Self>, mut packet_rx: mpsc::Receiver<Packet>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                packet = packet_rx.recv() => {
                    let Some(packet) = packet else { break };
                    self.new_packet(packet).await;
                }
            }
        }
    }

    /// Consume verified aggregates: store them, then react under the
    /// engine-wide lock, in arrival order.
    async fn run_verified_sink(self: Arc<Self>, mut verified_rx: mpsc::Receiver<Contribution<SigOf<C>>>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                item = verified_rx.recv() => {
                    let Some(contribution) = item else { break };
                    self.on_verified(contribution).await;
                }
            }
        }
    }

    async fn on_verified(&self, contribution: Contribution<SigOf<C>>) {
        debug!(
            node = self.id.id(),
            origin = contribution.origin,
            level = contribution.level,
            contributions = contribution.ms.cardinality(),
            "verified aggregate"
        );
        {
            let mut store = self.store.lock().expect("store lock poisoned");
            if let Err(err) = store.store(contribution.level, contribution.ms.clone()) {
                error!(node = self.id.id(), %err, "store rejected verified aggregate");
                return;
            }
        }

        let mut inner = self.inner.lock().await;
        if inner.done {
            return;
        }
        if let Err(err) = self.check_completed_level(&mut inner, &contribution) {
            self.halt(&mut inner, &err);
            return;
        }
        if let Err(err) = self.check_final_signature(&mut inner).await {
            self.halt(&mut inner, &err);
        }
    }

    /// If the stored best for this contribution's level just became a full
    /// aggregate, open the next level — or, for a level we already moved
    /// past, push the completed aggregate further up the tree.
    fn check_completed_level(
        &self,
        inner: &mut Inner<SigOf<C>>,
        contribution: &Contribution<SigOf<C>>,
    ) -> Result<(), AggregatorError> {
        let idx = (contribution.level - 1) as usize;
        if inner.levels[idx].completed() {
            return Ok(());
        }

        let best_cardinality = {
            let store = self.store.lock().expect("store lock poisoned");
            store
                .best(contribution.level)
                .map(MultiSignature::cardinality)
                .ok_or(AggregatorError::MissingAggregate(contribution.level))?
        };
        if !inner.levels[idx].update_best(best_cardinality)? {
            return Ok(());
        }
        info!(
            node = self.id.id(),
            level = contribution.level,
            contributions = best_cardinality,
            "level completed"
        );

        if contribution.level == inner.curr_level {
            return self.start_next_level(inner);
        }
        if contribution.level < self.max_level {
            self.send_best_up_to(inner, contribution.level)?;
        }
        Ok(())
    }

    /// Emit on the output channel when the full aggregate reaches the
    /// threshold and strictly improves on the previous emission.
    async fn check_final_signature(&self, inner: &mut Inner<SigOf<C>>) -> Result<(), AggregatorError> {
        let full = {
            let store = self.store.lock().expect("store lock poisoned");
            store.full_signature()?
        };
        if full.cardinality() < self.threshold {
            return Ok(());
        }
        let improved = inner
            .best
            .as_ref()
            .map_or(true, |best| full.cardinality() > best.cardinality());
        if !improved {
            return Ok(());
        }

        info!(
            node = self.id.id(),
            contributions = full.cardinality(),
            threshold = self.threshold,
            "new best final aggregate"
        );
        inner.best = Some(full.clone());
        if let Some(out) = &inner.out_tx {
            // blocks when the consumer lags: backpressure over dropped output
            if out.send(full).await.is_err() {
                debug!(node = self.id.id(), "final signature receiver dropped");
            }
        }
        Ok(())
    }

    /// Open the level above the cursor and dispatch our combined best to it.
    fn start_next_level(&self, inner: &mut Inner<SigOf<C>>) -> Result<(), AggregatorError> {
        if inner.curr_level >= self.max_level {
            debug!(node = self.id.id(), "protocol finished, no level left to start");
            return Ok(());
        }
        let from = inner.curr_level;
        self.send_best_up_to(inner, from)?;
        inner.curr_level += 1;
        debug!(
            node = self.id.id(),
            from,
            to = inner.curr_level,
            "moved to next level"
        );
        Ok(())
    }

    /// Dispatch `combined(level)` to the nearest non-empty level above
    /// `level`, marking it started.
    fn send_best_up_to(&self, inner: &mut Inner<SigOf<C>>, level: u8) -> Result<(), AggregatorError> {
        let target = self.find_next_level(inner, level)?;
        inner.levels[(target - 1) as usize].start();
        self.send_update(inner, target, self.config.candidate_count)
    }

    /// Smallest non-empty level strictly above `level`.
    fn find_next_level(&self, inner: &Inner<SigOf<C>>, level: u8) -> Result<u8, AggregatorError> {
        for l in level + 1..=self.max_level {
            if !inner.levels[(l - 1) as usize].is_empty() {
                return Ok(l);
            }
        }
        Err(AggregatorError::NoHigherLevel(level))
    }

    /// Send the merged best of everything below `level` to its next `count`
    /// candidates. No-op for levels that are not started or have no pending
    /// work.
    fn send_update(
        &self,
        inner: &mut Inner<SigOf<C>>,
        level: u8,
        count: usize,
    ) -> Result<(), AggregatorError> {
        let idx = (level - 1) as usize;
        if !inner.levels[idx].started() || inner.levels[idx].finished() {
            return Ok(());
        }
        let combined = {
            let store = self.store.lock().expect("store lock poisoned");
            store.combined(level - 1)?
        };
        let targets = inner.levels[idx].pick_next(count);
        if targets.is_empty() {
            return Ok(());
        }
        debug!(
            node = self.id.id(),
            level,
            contributions = combined.cardinality(),
            peers = targets.len(),
            "dispatching aggregate"
        );
        let packet = Packet {
            origin: self.id.id(),
            level,
            multi_sig: combined.to_bytes(),
        };
        self.network.send(&targets, packet);
        Ok(())
    }

    /// One tick: gossip the current best at every active level to one more
    /// candidate, overcoming packet loss without flooding.
    async fn periodic_update(&self) {
        let mut inner = self.inner.lock().await;
        if inner.done {
            return;
        }
        for level in 1..=self.max_level {
            if let Err(err) = self.send_update(&mut inner, level, 1) {
                self.halt(&mut inner, &err);
                return;
            }
        }
    }

    async fn run_ticker(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut ticker = tokio::time::interval(self.config.update_period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.periodic_update().await,
            }
        }
    }

    /// Invariant violations are not recoverable: stop everything.
    fn halt(&self, inner: &mut Inner<SigOf<C>>, err: &AggregatorError) {
        error!(node = self.id.id(), %err, "invariant violated, halting");
        inner.done = true;
        inner.out_tx = None;
        let _ = self.shutdown_tx.send(true);
    }
}
