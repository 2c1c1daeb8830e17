use crate::{
    Acceptor, Configuration, Learner, Message, NodeId, Phase, ProposalNumber, ProposeError,
    Proposer, Receiver, Transport,
};
use bytes::Bytes;
use log::{trace, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// Outcome of a `propose` call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[must_use]
pub enum ProposeResult {
    /// A new round was started and the PREPARE broadcast was issued.
    Initiated,
    /// A round from this node is already in flight.
    Busy,
    /// Consensus has already been reached.
    AlreadyDecided,
    /// The node is in the simulated-crashed state.
    Crashed,
}

/// A member of the cluster, owning one instance of each protocol role and
/// dispatching inbound messages to them.
///
/// `Node` is safe to share across threads. Each role serializes its own
/// state transitions under its own lock, and the three locks are
/// independent: a node handling its own PREPARE as an acceptor never
/// contends with itself handling PROMISE replies as a proposer. Replies are
/// computed under the role lock and handed to the transport after the lock
/// is released.
///
/// The transport's broadcast excludes the local node, so every message a
/// proposer broadcasts is also dispatched locally. The node's own acceptor
/// is a full participant in its rounds, which is what lets a five-node
/// majority out of nine decide: four peer votes plus its own.
pub struct Node<T> {
    config: Configuration,
    transport: T,
    proposer: Mutex<Proposer>,
    acceptor: Mutex<Acceptor>,
    learner: Mutex<Learner>,
    /// Simulated-crash flag, read on every handler entry. Test-only.
    crashed: AtomicBool,
    on_decided: Mutex<Option<Box<dyn FnOnce(Bytes) + Send>>>,
}

impl<T: Transport> Node<T> {
    /// Node creation from a transport and starting configuration.
    pub fn new(config: Configuration, transport: T) -> Node<T> {
        let current = config.current();
        let quorum = config.quorum_size();
        Node {
            config,
            transport,
            proposer: Mutex::new(Proposer::new(current, quorum)),
            acceptor: Mutex::new(Acceptor::new(current)),
            learner: Mutex::new(Learner::new(current)),
            crashed: AtomicBool::new(false),
            on_decided: Mutex::new(None),
        }
    }

    /// Identifier of this node.
    pub fn id(&self) -> NodeId {
        self.config.current()
    }

    /// Cluster membership this node was started with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Proposes `value` for consensus. Starts a fresh round and broadcasts
    /// the PREPARE message, unless a guard rejects the call.
    pub fn propose(&self, value: Bytes) -> ProposeResult {
        if self.crashed.load(Ordering::Relaxed) {
            return ProposeResult::Crashed;
        }
        if self.decided().is_some() {
            return ProposeResult::AlreadyDecided;
        }

        let prepare = {
            let mut proposer = self.proposer.lock().unwrap();
            proposer.propose(value)
        };

        match prepare {
            Ok(msg) => {
                self.outbound(msg);
                ProposeResult::Initiated
            }
            Err(ProposeError::Busy) => ProposeResult::Busy,
            Err(ProposeError::AlreadyDecided) => ProposeResult::AlreadyDecided,
        }
    }

    /// Non-blocking observation of the learner.
    pub fn decided(&self) -> Option<Bytes> {
        self.learner.lock().unwrap().decided_value()
    }

    /// Registers a callback fired exactly once when the learner transitions
    /// to decided. If the decision already happened, the callback fires
    /// immediately.
    pub fn on_decided<F>(&self, f: F)
    where
        F: FnOnce(Bytes) + Send + 'static,
    {
        match self.decided() {
            Some(value) => f(value),
            None => {
                *self.on_decided.lock().unwrap() = Some(Box::new(f));
            }
        }
    }

    /// Phase of the proposer, for observation by drivers and tests.
    pub fn phase(&self) -> Phase {
        self.proposer.lock().unwrap().phase()
    }

    /// Abandons this node's in-flight proposal round, if any. The next
    /// `propose` uses a strictly higher round. Hook for retry drivers; see
    /// [`liveness`](crate::liveness).
    pub fn abandon_round(&self) {
        self.proposer.lock().unwrap().abandon();
    }

    /// Puts the node into the simulated-crashed state: every inbound
    /// message is dropped and `propose` refuses. Test-only.
    pub fn simulate_crash(&self) {
        warn!("Node {} simulating crash", self.id());
        self.crashed.store(true, Ordering::Relaxed);
    }

    /// Clears the simulated-crashed state. Role state survived the crash;
    /// reboot-with-loss is out of scope.
    pub fn recover(&self) {
        warn!("Node {} recovering from simulated crash", self.id());
        self.crashed.store(false, Ordering::Relaxed);
    }

    /// Resets all role state and the crash flag. Test-only.
    pub fn reset(&self) {
        self.proposer.lock().unwrap().reset();
        self.acceptor.lock().unwrap().reset();
        self.learner.lock().unwrap().reset();
        *self.on_decided.lock().unwrap() = None;
        self.crashed.store(false, Ordering::Relaxed);
    }

    /// Sends a proposer-originated message to every peer and dispatches it
    /// to the local roles as well.
    fn outbound(&self, msg: Message) {
        self.transport.broadcast(msg.clone());
        self.handle(msg);
    }

    /// Hands a reply to the transport, or loops it back when this node is
    /// replying to itself.
    fn reply(&self, to: NodeId, msg: Message) {
        if to == self.id() {
            self.handle(msg);
        } else {
            self.transport.send(to, msg);
        }
    }

    /// Routes a message to the role that owns it. Replies and follow-up
    /// broadcasts are issued after the role lock is released.
    fn handle(&self, msg: Message) {
        match msg {
            Message::Prepare { sender, proposal } => {
                let reply = {
                    let mut acceptor = self.acceptor.lock().unwrap();
                    acceptor.receive_prepare(proposal)
                };
                if let Some(reply) = reply {
                    self.reply(sender, reply);
                }
            }
            Message::Promise {
                sender,
                proposal,
                last_accepted,
            } => {
                let accept = {
                    let mut proposer = self.proposer.lock().unwrap();
                    proposer.receive_promise(sender, proposal, last_accepted)
                };
                if let Some(accept) = accept {
                    self.outbound(accept);
                }
            }
            Message::AcceptRequest {
                sender,
                proposal,
                value,
            } => {
                let reply = {
                    let mut acceptor = self.acceptor.lock().unwrap();
                    acceptor.receive_accept(proposal, value)
                };
                if let Some(reply) = reply {
                    self.reply(sender, reply);
                }
            }
            Message::Accepted {
                sender, proposal, ..
            } => {
                let learn = {
                    let mut proposer = self.proposer.lock().unwrap();
                    proposer.receive_accepted(sender, proposal)
                };
                if let Some(learn) = learn {
                    self.outbound(learn);
                }
            }
            Message::Learn {
                proposal, value, ..
            } => {
                self.learn(proposal, value);
            }
        }
    }

    /// Absorbs a decision into the local learner and fires the decision
    /// callback on the first transition.
    fn learn(&self, proposal: ProposalNumber, value: Bytes) {
        let transitioned = {
            let mut learner = self.learner.lock().unwrap();
            learner.receive_learn(proposal, value.clone())
        };

        if transitioned {
            let callback = self.on_decided.lock().unwrap().take();
            if let Some(callback) = callback {
                callback(value);
            }
        }
    }
}

impl<T: Transport> Receiver for Node<T> {
    /// Entry point for inbound messages from the transport. Crashed nodes
    /// drop everything on the floor.
    fn receive(&self, msg: Message) {
        if self.crashed.load(Ordering::Relaxed) {
            trace!("Node {} dropping message while crashed", self.id());
            return;
        }

        self.handle(msg);
    }
}
