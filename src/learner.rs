use crate::{NodeId, ProposalNumber};
use bytes::Bytes;
use log::{error, info};

/// Encoding of the Learner role: absorbs the first LEARN announcement and
/// holds the decided value for the life of the node.
pub struct Learner {
    current: NodeId,
    decided: Option<(ProposalNumber, Bytes)>,
}

impl Learner {
    /// Creates learner state for a node.
    pub fn new(current: NodeId) -> Learner {
        Learner {
            current,
            decided: None,
        }
    }

    /// Handler for a LEARN message. The first announcement wins; returns
    /// `true` on that transition. A later LEARN with a different value is a
    /// protocol violation in the cluster: it is logged and never overwrites
    /// the decision.
    pub fn receive_learn(&mut self, proposal: ProposalNumber, value: Bytes) -> bool {
        match self.decided {
            None => {
                info!(
                    "Node {} learned consensus value from proposal {}",
                    self.current, proposal
                );
                self.decided = Some((proposal, value));
                true
            }
            Some((decided_proposal, ref decided_value)) => {
                if *decided_value != value {
                    error!(
                        "Node {} received conflicting LEARN: decided {} from {}, got conflicting value from {}",
                        self.current,
                        String::from_utf8_lossy(decided_value),
                        decided_proposal,
                        proposal
                    );
                }
                false
            }
        }
    }

    /// Decided pair, if consensus has been observed.
    pub fn decided(&self) -> Option<(ProposalNumber, Bytes)> {
        self.decided.clone()
    }

    /// Decided value, if consensus has been observed.
    pub fn decided_value(&self) -> Option<Bytes> {
        self.decided.as_ref().map(|(_, v)| v.clone())
    }

    /// Clears the decision. Test-only escape hatch.
    pub fn reset(&mut self) {
        self.decided = None;
    }
}
