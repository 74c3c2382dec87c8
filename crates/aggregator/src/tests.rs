//! Multi-node protocol tests over the in-process router.
//!
//! Protocol behavior is exercised with a deterministic counting scheme so
//! runs stay fast and exact; real BLS material is covered in
//! `handel-crypto`'s own tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use handel_core::{BitSet, Identity, MultiSignature, Packet, Registry};
use handel_network::{LocalRouter, Network};

use self::scheme::{CountingConstructor, CountingSignature};
use crate::config::Config;
use crate::handel::Handel;

/// Deterministic stand-in scheme: a "signature" is the set of contributor
/// IDs, aggregation is set union, and verification checks the set matches
/// the claimed bitset exactly.
pub(crate) mod scheme {
    use std::collections::BTreeSet;

    use handel_core::{BitSet, Constructor, HandelError, PublicKey, Signature};

    #[derive(Debug, Clone, PartialEq)]
    pub struct CountingSignature {
        signers: BTreeSet<u32>,
    }

    impl CountingSignature {
        pub fn single(id: u32) -> Self {
            Self {
                signers: BTreeSet::from([id]),
            }
        }

        pub fn of(ids: &[u32]) -> Self {
            Self {
                signers: ids.iter().copied().collect(),
            }
        }
    }

    impl Signature for CountingSignature {
        fn to_bytes(&self) -> Vec<u8> {
            self.signers.iter().flat_map(|id| id.to_be_bytes()).collect()
        }

        fn combine(&self, other: &Self) -> Self {
            Self {
                signers: self.signers.union(&other.signers).copied().collect(),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct CountingPublicKey {
        expected: BTreeSet<u32>,
    }

    impl PublicKey for CountingPublicKey {
        type Sig = CountingSignature;

        fn verify(&self, _msg: &[u8], sig: &Self::Sig) -> bool {
            sig.signers == self.expected
        }

        fn combine(&self, other: &Self) -> Self {
            Self {
                expected: self.expected.union(&other.expected).copied().collect(),
            }
        }
    }

    pub struct CountingConstructor;

    impl Constructor for CountingConstructor {
        type Pub = CountingPublicKey;

        fn signature_from_bytes(&self, bytes: &[u8]) -> Result<CountingSignature, HandelError> {
            if bytes.len() % 4 != 0 {
                return Err(HandelError::InvalidSignatureBytes(format!(
                    "length {} is not a multiple of 4",
                    bytes.len()
                )));
            }
            Ok(CountingSignature {
                signers: bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            })
        }

        fn aggregate_public_key(&self, bits: &BitSet) -> Result<CountingPublicKey, HandelError> {
            if bits.is_empty() {
                return Err(HandelError::EmptyAggregation);
            }
            Ok(CountingPublicKey {
                expected: bits.iter_set().map(|i| i as u32).collect(),
            })
        }
    }
}

const MSG: &[u8] = b"common message";

struct TestNode {
    handel: Arc<Handel<CountingConstructor>>,
    output: mpsc::Receiver<MultiSignature<CountingSignature>>,
}

fn build_cluster(n: u32, percentage: usize) -> (LocalRouter, Vec<TestNode>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let identities: Vec<Identity> = (0..n).map(|i| Identity::new(i, format!("local-{i}"))).collect();
    let registry = Arc::new(Registry::new(identities).unwrap());
    let router = LocalRouter::new();
    let mut nodes = Vec::new();
    for i in 0..n {
        let config = Config {
            update_period_ms: 10,
            contributions_percentage: percentage,
            ..Config::default()
        };
        let network: Arc<dyn Network> = Arc::new(router.network(i));
        let handel = Handel::new(
            network,
            Arc::clone(&registry),
            registry.identity(i).unwrap().clone(),
            Arc::new(CountingConstructor),
            MSG.to_vec(),
            CountingSignature::single(i),
            config,
        )
        .unwrap();
        let output = handel.final_signatures().unwrap();
        nodes.push(TestNode { handel, output });
    }
    (router, nodes)
}

async fn start_all(nodes: &[TestNode]) {
    for node in nodes {
        node.handel.clone().start().await;
    }
}

/// Read emissions until one reaches `min` contributions, checking along the
/// way that every emission meets the threshold and strictly improves.
async fn await_cardinality(node: &mut TestNode, min: usize) -> MultiSignature<CountingSignature> {
    let threshold = node.handel.threshold();
    timeout(Duration::from_secs(20), async {
        let mut last = 0usize;
        loop {
            let ms = node
                .output
                .recv()
                .await
                .expect("output closed before reaching the target cardinality");
            assert!(ms.cardinality() >= threshold, "emission below threshold");
            assert!(ms.cardinality() > last, "emissions must strictly improve");
            last = ms.cardinality();
            if last >= min {
                return ms;
            }
        }
    })
    .await
    .expect("timed out waiting for a final aggregate")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_aggregation_with_four_nodes() {
    let (_router, mut nodes) = build_cluster(4, 100);
    start_all(&nodes).await;
    for node in nodes.iter_mut() {
        let ms = await_cardinality(node, 4).await;
        assert!(ms.bits.all_set());
    }
    for node in &nodes {
        node.handel.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn faulty_node_does_not_block_the_threshold() {
    let (router, mut nodes) = build_cluster(8, 75);
    router.silence(7);
    start_all(&nodes).await;
    for node in nodes.iter_mut().take(7) {
        let ms = await_cardinality(node, 6).await;
        assert!(!ms.bits.get(7), "silent node must not appear in the aggregate");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_packet_is_stored_once() {
    let (_router, mut nodes) = build_cluster(2, 100);
    nodes[0].handel.clone().start().await;

    let mut bits = BitSet::new(2);
    bits.set(1).unwrap();
    let ms = MultiSignature::new(bits, CountingSignature::single(1));
    let packet = Packet {
        origin: 1,
        level: 1,
        multi_sig: ms.to_bytes(),
    };
    nodes[0].handel.new_packet(packet.clone()).await;
    nodes[0].handel.new_packet(packet).await;

    let full = await_cardinality(&mut nodes[0], 2).await;
    assert!(full.bits.all_set());
    sleep(Duration::from_millis(100)).await;
    assert!(
        nodes[0].output.try_recv().is_err(),
        "a replayed packet must not re-emit"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_range_packets_are_dropped() {
    let (_router, mut nodes) = build_cluster(4, 100);
    start_all(&nodes).await;

    let mut bits = BitSet::new(4);
    bits.set(1).unwrap();
    let ms = MultiSignature::new(bits, CountingSignature::single(1));
    // level above L = 2
    nodes[0]
        .handel
        .new_packet(Packet {
            origin: 1,
            level: 3,
            multi_sig: ms.to_bytes(),
        })
        .await;
    // origin beyond the registry
    nodes[0]
        .handel
        .new_packet(Packet {
            origin: 9,
            level: 1,
            multi_sig: ms.to_bytes(),
        })
        .await;
    // malformed payload
    nodes[0]
        .handel
        .new_packet(Packet {
            origin: 1,
            level: 1,
            multi_sig: vec![0xFF],
        })
        .await;

    // the protocol still terminates
    let ms = await_cardinality(&mut nodes[0], 4).await;
    assert!(ms.bits.all_set());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn six_nodes_aggregate_across_empty_levels() {
    let (_router, mut nodes) = build_cluster(6, 100);
    start_all(&nodes).await;
    for node in nodes.iter_mut() {
        let ms = await_cardinality(node, 6).await;
        assert!(ms.bits.all_set());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn threshold_one_emits_own_contribution_immediately() {
    let (_router, mut nodes) = build_cluster(2, 1);
    nodes[0].handel.clone().start().await;

    let first = await_cardinality(&mut nodes[0], 1).await;
    assert_eq!(first.cardinality(), 1);
    assert!(first.bits.get(0));

    // nothing grows while the peer stays down
    sleep(Duration::from_millis(100)).await;
    assert!(nodes[0].output.try_recv().is_err());

    nodes[1].handel.clone().start().await;
    let second = await_cardinality(&mut nodes[0], 2).await;
    assert_eq!(second.cardinality(), 2);
}

#[tokio::test]
async fn single_node_runs_the_degenerate_protocol() {
    let (_router, mut nodes) = build_cluster(1, 100);
    assert_eq!(nodes[0].handel.max_level(), 0);
    nodes[0].handel.clone().start().await;
    let ms = await_cardinality(&mut nodes[0], 1).await;
    assert!(ms.bits.all_set());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_closes_the_output() {
    let (_router, nodes) = build_cluster(2, 100);
    start_all(&nodes).await;
    nodes[0].handel.stop().await;
    nodes[0].handel.stop().await;

    let mut nodes = nodes;
    timeout(Duration::from_secs(5), async {
        while nodes[0].output.recv().await.is_some() {}
    })
    .await
    .expect("output channel must close after stop");
}

#[tokio::test]
async fn final_signatures_can_only_be_taken_once() {
    let (_router, nodes) = build_cluster(2, 100);
    assert!(nodes[0].handel.final_signatures().is_none());
}
