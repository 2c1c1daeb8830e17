//! Rust implementation of single-decree Paxos.
//!
//! A cluster of peer nodes agrees on exactly one value despite message loss,
//! arbitrary delay and re-ordering, and node crashes. Every [`Node`] plays
//! all three protocol roles: it proposes values, votes on proposals from
//! other nodes, and learns the decided value.
//!
//! The crate contains only the protocol engine. Delivery of messages between
//! nodes is behind the [`Transport`] trait; anything that can move a
//! [`Message`] from one node to another (UDP, TCP, an in-memory queue) can
//! drive a cluster.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use decree::{Configuration, Node, Transport};
//! # fn run<T: Transport>(transport: T) {
//! let config = Configuration::new(
//!     0,
//!     vec![
//!         (0, "127.0.0.1:9000".parse().unwrap()),
//!         (1, "127.0.0.1:9001".parse().unwrap()),
//!         (2, "127.0.0.1:9002".parse().unwrap()),
//!     ],
//! );
//!
//! let node = Node::new(config, transport);
//! node.propose("value".into());
//! # }
//! ```

mod acceptor;
mod commands;
mod config;
mod learner;
pub mod liveness;
mod messages;
mod node;
mod proposer;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub use acceptor::Acceptor;
pub use commands::{Receiver, Transport};
pub use config::{ConfigError, Configuration, QuorumSet};
pub use learner::Learner;
pub use messages::{DeserializeError, Message};
pub use node::{Node, ProposeResult};
pub use proposer::{Phase, ProposeError, Proposer};

/// A `NodeId` is a unique value that identifies a node
/// within the configuration.
pub type NodeId = u32;

/// Proposal numbering is an increasing number in order to order proposals
/// across multiple nodes. Numbers are unique between nodes and
/// algorithmically increasing per node.
#[derive(PartialEq, Hash, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProposalNumber(pub u32, pub NodeId);

impl ProposalNumber {
    /// Round numeral of the proposal.
    pub fn round(&self) -> u32 {
        self.0
    }

    /// Node that generated the proposal.
    pub fn node(&self) -> NodeId {
        self.1
    }
}

impl PartialOrd for ProposalNumber {
    fn partial_cmp(&self, other: &ProposalNumber) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProposalNumber {
    fn cmp(&self, other: &ProposalNumber) -> Ordering {
        match self.0.cmp(&other.0) {
            Ordering::Equal => self.1.cmp(&other.1),
            o => o,
        }
    }
}

impl fmt::Display for ProposalNumber {
    /// Wire form of a proposal number: `<round>.<node>`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

impl FromStr for ProposalNumber {
    type Err = ();

    fn from_str(s: &str) -> Result<ProposalNumber, ()> {
        let (round, node) = s.split_once('.').ok_or(())?;
        let round = round.parse::<u32>().map_err(|_| ())?;
        let node = config::parse_member_id(node).ok_or(())?;
        Ok(ProposalNumber(round, node))
    }
}
