//! FIFO verification pipeline.
//!
//! Decouples cryptographic verification from the network and aggregation
//! paths: a single worker drains the pending queue, verifies each aggregate
//! against the verification key derived from its bitset, and forwards the
//! survivors in arrival order. Invalid aggregates are dropped with a log
//! line; there is no retry.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use handel_core::{Constructor, MultiSignature, PublicKey, SigOf, Signature};

use crate::AggregatorError;

/// An aggregate received from `origin`, addressed to `level`.
#[derive(Debug, Clone)]
pub struct Contribution<S: Signature> {
    pub origin: u32,
    pub level: u8,
    pub ms: MultiSignature<S>,
}

pub(crate) struct FifoVerifier<C: Constructor> {
    constructor: Arc<C>,
    msg: Arc<[u8]>,
    pending_rx: mpsc::Receiver<Contribution<SigOf<C>>>,
    verified_tx: mpsc::Sender<Contribution<SigOf<C>>>,
    shutdown: watch::Receiver<bool>,
}

impl<C: Constructor> FifoVerifier<C> {
    pub(crate) fn new(
        constructor: Arc<C>,
        msg: Arc<[u8]>,
        pending_rx: mpsc::Receiver<Contribution<SigOf<C>>>,
        verified_tx: mpsc::Sender<Contribution<SigOf<C>>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            constructor,
            msg,
            pending_rx,
            verified_tx,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                item = self.pending_rx.recv() => {
                    let Some(contribution) = item else { break };
                    match self.verify(&contribution) {
                        Ok(()) => {
                            if self.verified_tx.send(contribution).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(
                            origin = contribution.origin,
                            level = contribution.level,
                            %err,
                            "dropping unverifiable aggregate"
                        ),
                    }
                }
            }
        }
        debug!("verification pipeline stopped");
    }

    /// One aggregate-verify call against the key derived from the bitset.
    fn verify(&self, contribution: &Contribution<SigOf<C>>) -> Result<(), AggregatorError> {
        let key = self.constructor.aggregate_public_key(&contribution.ms.bits)?;
        if !key.verify(&self.msg, &contribution.ms.sig) {
            return Err(AggregatorError::InvalidAggregate {
                origin: contribution.origin,
                level: contribution.level,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::scheme::{CountingConstructor, CountingSignature};
    use handel_core::BitSet;

    fn contribution(capacity: usize, ids: &[u32], level: u8) -> Contribution<CountingSignature> {
        let mut bits = BitSet::new(capacity);
        for id in ids {
            bits.set(*id as usize).unwrap();
        }
        Contribution {
            origin: ids[0],
            level,
            ms: MultiSignature::new(bits, CountingSignature::of(ids)),
        }
    }

    #[tokio::test]
    async fn passes_valid_aggregates_in_order() {
        let (pending_tx, pending_rx) = mpsc::channel(8);
        let (verified_tx, mut verified_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let verifier = FifoVerifier::new(
            Arc::new(CountingConstructor),
            Arc::from(b"msg".to_vec()),
            pending_rx,
            verified_tx,
            shutdown_rx,
        );
        tokio::spawn(verifier.run());

        pending_tx.send(contribution(4, &[1], 1)).await.unwrap();
        pending_tx.send(contribution(4, &[2, 3], 2)).await.unwrap();

        assert_eq!(verified_rx.recv().await.unwrap().origin, 1);
        assert_eq!(verified_rx.recv().await.unwrap().origin, 2);
    }

    #[tokio::test]
    async fn drops_aggregates_that_fail_verification() {
        let (pending_tx, pending_rx) = mpsc::channel(8);
        let (verified_tx, mut verified_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let verifier = FifoVerifier::new(
            Arc::new(CountingConstructor),
            Arc::from(b"msg".to_vec()),
            pending_rx,
            verified_tx,
            shutdown_rx,
        );
        tokio::spawn(verifier.run());

        // signature claims {2,3} but the bitset only admits {2}
        let mut forged = contribution(4, &[2, 3], 2);
        forged.ms.bits.clear(3).unwrap();
        pending_tx.send(forged).await.unwrap();
        pending_tx.send(contribution(4, &[1], 1)).await.unwrap();

        let passed = verified_rx.recv().await.unwrap();
        assert_eq!(passed.origin, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker() {
        let (pending_tx, pending_rx) = mpsc::channel(8);
        let (verified_tx, mut verified_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let verifier = FifoVerifier::new(
            Arc::new(CountingConstructor),
            Arc::from(b"msg".to_vec()),
            pending_rx,
            verified_tx,
            shutdown_rx,
        );
        let handle = tokio::spawn(verifier.run());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        drop(pending_tx);
        assert!(verified_rx.recv().await.is_none());
    }
}
