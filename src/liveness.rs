//! Retry driver layered above the consensus core.
//!
//! The core never retries on its own: a round that stalls because its
//! messages were lost simply sits in `Preparing` or `Accepting` until a
//! higher round supersedes it. That keeps the engine deterministic, but a
//! real deployment needs something to generate those higher rounds. The
//! [`Liveness`] driver is that something: a thread that, until a decision
//! is observed, abandons the stalled round and re-proposes on an interval.
//! Every retry uses a strictly higher round, so competing drivers converge
//! instead of livelocking forever under reasonable timing.

use crate::{Node, ProposeResult, Transport};
use bytes::Bytes;
use log::debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Drives repeated proposal rounds for one node until its learner reports
/// a decision or the driver is stopped.
pub struct Liveness {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Liveness {
    /// Spawns a driver that proposes `value` from `node` every `interval`
    /// until the node observes a decision.
    pub fn spawn<T>(node: Arc<Node<T>>, value: Bytes, interval: Duration) -> Liveness
    where
        T: Transport + Send + Sync + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();

        let handle = thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if node.decided().is_some() {
                    debug!("Node {} decided, retry driver exiting", node.id());
                    break;
                }

                // supersede our own stalled round before proposing again;
                // the fresh round is strictly higher
                node.abandon_round();
                match node.propose(value.clone()) {
                    ProposeResult::AlreadyDecided => break,
                    outcome => {
                        debug!("Node {} retry proposal: {:?}", node.id(), outcome);
                    }
                }

                thread::sleep(interval);
            }
        });

        Liveness {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signals the driver to stop and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Waits for the driver to exit on its own (decision observed).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Configuration, Message, NodeId, ProposalNumber, Receiver};
    use std::net::SocketAddr;
    use std::sync::Mutex;

    /// Discards everything; the driver only needs `propose` to go through.
    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&self, _: NodeId, _: Message) -> bool {
            false
        }

        fn broadcast(&self, _: Message) -> usize {
            0
        }
    }

    /// Counts PREPARE broadcasts; cloneable so the test can watch from
    /// outside the node.
    #[derive(Default, Clone)]
    struct CountingTransport {
        prepares: Arc<Mutex<Vec<ProposalNumber>>>,
    }

    impl Transport for CountingTransport {
        fn send(&self, _: NodeId, _: Message) -> bool {
            true
        }

        fn broadcast(&self, msg: Message) -> usize {
            if let Message::Prepare { proposal, .. } = msg {
                self.prepares.lock().unwrap().push(proposal);
            }
            2
        }
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn config() -> Configuration {
        Configuration::new(1, (1..=3u32).map(|n| (n, addr(9000 + n as u16))))
    }

    #[test]
    fn driver_exits_once_decided() {
        let node = Arc::new(Node::new(config(), NullTransport));
        node.receive(Message::Learn {
            sender: 2,
            proposal: ProposalNumber(1, 2),
            value: "M5".into(),
        });

        let driver = Liveness::spawn(node, "M5".into(), Duration::from_millis(1));
        driver.join();
    }

    #[test]
    fn driver_retries_with_increasing_rounds() {
        let transport = CountingTransport::default();
        let prepares = transport.prepares.clone();
        let node = Arc::new(Node::new(config(), transport));
        let driver = Liveness::spawn(node, "M5".into(), Duration::from_millis(1));

        // wait until a few retries have happened
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while prepares.lock().unwrap().len() < 3 {
            assert!(std::time::Instant::now() < deadline, "no retries observed");
            thread::sleep(Duration::from_millis(2));
        }
        driver.stop();

        let prepares = prepares.lock().unwrap();
        for pair in prepares.windows(2) {
            assert!(pair[0] < pair[1], "rounds must strictly increase");
        }
    }
}
