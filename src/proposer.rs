use crate::{config::QuorumSet, Message, NodeId, ProposalNumber};
use bytes::Bytes;
use log::{debug, info, trace};
use thiserror::Error;

/// The proposer coordinates a single round of the protocol: it numbers the
/// proposal, collects promises, and once a quorum is reached drives the
/// accept phase with either its own value or the value adopted from the
/// highest-numbered promise (the rule that makes Paxos safe).
pub struct Proposer {
    /// State of the proposer state machine
    state: ProposerState,
    /// Round counter; incremented before every proposal so no two live
    /// proposals from this node share a round
    counter: u32,
    /// Node ID of the current node (used to construct proposal numbers)
    current: NodeId,
    /// Number of nodes for quorum
    quorum: usize,
}

/// Encoding of the proposer's phase state machine.
enum ProposerState {
    /// No round in flight.
    Idle,
    /// PREPARE broadcast sent; collecting PROMISE messages.
    Preparing {
        /// The number sent out with the PREPARE message
        proposal: ProposalNumber,
        /// Value that will be sent with the ACCEPT_REQUEST. Starts as the
        /// value this node wants decided and is overwritten by the value
        /// of the highest-numbered accepted pair seen in promises.
        chosen_value: Bytes,
        /// Highest accepted number among received promises
        highest_accepted: Option<ProposalNumber>,
        /// Tracking the PROMISE messages received from acceptors
        promises: QuorumSet,
    },
    /// ACCEPT_REQUEST broadcast sent; collecting ACCEPTED messages.
    /// `chosen_value` is frozen from this point on.
    Accepting {
        proposal: ProposalNumber,
        chosen_value: Bytes,
        /// Tracking the ACCEPTED messages received from acceptors
        accepts: QuorumSet,
    },
    /// A quorum of ACCEPTED messages was observed for this round.
    Decided {
        proposal: ProposalNumber,
        chosen_value: Bytes,
    },
}

/// Externally visible phase of the proposer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    Idle,
    Preparing,
    Accepting,
    Decided,
}

/// Rejection of a `propose` call by the proposer's guards.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProposeError {
    /// A round is already in flight; one active round per proposer.
    #[error("a proposal round is already in progress")]
    Busy,
    /// This proposer already drove a round to decision.
    #[error("consensus already reached")]
    AlreadyDecided,
}

impl Proposer {
    /// Creates proposer state with the node identifier and quorum size.
    pub fn new(current: NodeId, quorum: usize) -> Proposer {
        Proposer {
            state: ProposerState::Idle,
            counter: 0,
            current,
            quorum,
        }
    }

    /// Current phase of the proposer.
    pub fn phase(&self) -> Phase {
        match self.state {
            ProposerState::Idle => Phase::Idle,
            ProposerState::Preparing { .. } => Phase::Preparing,
            ProposerState::Accepting { .. } => Phase::Accepting,
            ProposerState::Decided { .. } => Phase::Decided,
        }
    }

    /// Starts a new round for `value`. Returns the PREPARE message to
    /// broadcast. Fails fast when a round is already active; a later,
    /// higher-round proposal from some node is what supersedes a stuck
    /// round, never an implicit restart.
    pub fn propose(&mut self, value: Bytes) -> Result<Message, ProposeError> {
        match self.state {
            ProposerState::Idle => {}
            ProposerState::Decided { .. } => return Err(ProposeError::AlreadyDecided),
            _ => return Err(ProposeError::Busy),
        }

        self.counter += 1;
        let proposal = ProposalNumber(self.counter, self.current);

        self.state = ProposerState::Preparing {
            proposal,
            chosen_value: value,
            highest_accepted: None,
            promises: QuorumSet::with_size(self.quorum),
        };

        debug!("Node {} starting prepare with {}", self.current, proposal);

        Ok(Message::Prepare {
            sender: self.current,
            proposal,
        })
    }

    /// Note a promise from a peer. The ACCEPT_REQUEST broadcast is returned
    /// once quorum is first reached. Promises for stale or foreign rounds
    /// are dropped.
    pub fn receive_promise(
        &mut self,
        peer: NodeId,
        proposal: ProposalNumber,
        last_accepted: Option<(ProposalNumber, Bytes)>,
    ) -> Option<Message> {
        match self.state {
            ProposerState::Preparing {
                proposal: current_proposal,
                ref mut chosen_value,
                ref mut highest_accepted,
                ref mut promises,
                ..
            } if current_proposal == proposal => {
                trace!(
                    "Node {} received promise for {} from peer {}",
                    self.current,
                    proposal,
                    peer
                );
                promises.insert(peer);

                // adopt the value of the highest-numbered accepted pair
                // reported by any promise; this is what prevents two
                // rounds from deciding different values
                if let Some((accepted, value)) = last_accepted {
                    let adopt = match *highest_accepted {
                        Some(h) => accepted > h,
                        None => true,
                    };
                    if adopt {
                        debug!(
                            "Node {} adopting value from accepted proposal {}",
                            self.current, accepted
                        );
                        *highest_accepted = Some(accepted);
                        *chosen_value = value;
                    }
                }

                if !promises.has_quorum() {
                    return None;
                }
            }
            _ => return None,
        }

        debug!(
            "Node {} reached promise quorum for {}",
            self.current, proposal
        );

        // quorum reached: freeze the chosen value and move to the accept
        // phase. Later promises are ignored by the phase match above.
        let chosen_value = match self.state {
            ProposerState::Preparing {
                ref chosen_value, ..
            } => chosen_value.clone(),
            _ => unreachable!("quorum observed outside of Preparing"),
        };

        self.state = ProposerState::Accepting {
            proposal,
            chosen_value: chosen_value.clone(),
            accepts: QuorumSet::with_size(self.quorum),
        };

        Some(Message::AcceptRequest {
            sender: self.current,
            proposal,
            value: chosen_value,
        })
    }

    /// Note an ACCEPTED message from a peer. The LEARN broadcast is returned
    /// once quorum is first reached.
    pub fn receive_accepted(&mut self, peer: NodeId, proposal: ProposalNumber) -> Option<Message> {
        match self.state {
            ProposerState::Accepting {
                proposal: current_proposal,
                ref mut accepts,
                ..
            } if current_proposal == proposal => {
                trace!(
                    "Node {} received accepted for {} from peer {}",
                    self.current,
                    proposal,
                    peer
                );
                accepts.insert(peer);

                if !accepts.has_quorum() {
                    return None;
                }
            }
            _ => return None,
        }

        let chosen_value = match self.state {
            ProposerState::Accepting {
                ref chosen_value, ..
            } => chosen_value.clone(),
            _ => unreachable!("quorum observed outside of Accepting"),
        };

        info!(
            "Node {} reached accept quorum for {}, announcing decision",
            self.current, proposal
        );

        self.state = ProposerState::Decided {
            proposal,
            chosen_value: chosen_value.clone(),
        };

        Some(Message::Learn {
            sender: self.current,
            proposal,
            value: chosen_value,
        })
    }

    /// Abandons an in-flight round, returning the proposer to `Idle`. The
    /// round counter is kept, so the next `propose` uses a strictly higher
    /// number. Hook for retry drivers layered above the core; a decided
    /// proposer stays decided.
    pub fn abandon(&mut self) {
        let active = match self.state {
            ProposerState::Preparing { proposal, .. }
            | ProposerState::Accepting { proposal, .. } => Some(proposal),
            _ => None,
        };

        if let Some(proposal) = active {
            debug!("Node {} abandoning round {}", self.current, proposal);
            self.state = ProposerState::Idle;
        }
    }

    /// Clears round state. Test-only escape hatch; the counter is kept so
    /// proposal numbers stay unique across the life of the process.
    pub fn reset(&mut self) {
        self.state = ProposerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn proposer_propose() {
        let mut proposer = Proposer::new(1, 2);
        assert_eq!(Phase::Idle, proposer.phase());

        let prepare = proposer.propose("123".into());
        assert_matches!(
            prepare,
            Ok(Message::Prepare {
                sender: 1,
                proposal: ProposalNumber(1, 1),
            })
        );
        assert_eq!(Phase::Preparing, proposer.phase());

        // second propose while the round is active fails fast
        assert_eq!(Err(ProposeError::Busy), proposer.propose("456".into()));
        assert_eq!(Phase::Preparing, proposer.phase());
    }

    #[test]
    fn proposer_rounds_strictly_increase() {
        let mut proposer = Proposer::new(3, 2);
        assert_matches!(
            proposer.propose("a".into()),
            Ok(Message::Prepare { proposal: ProposalNumber(1, 3), .. })
        );
        proposer.abandon();
        assert_matches!(
            proposer.propose("a".into()),
            Ok(Message::Prepare { proposal: ProposalNumber(2, 3), .. })
        );
        proposer.abandon();
        assert_matches!(
            proposer.propose("a".into()),
            Ok(Message::Prepare { proposal: ProposalNumber(3, 3), .. })
        );
    }

    #[test]
    fn proposer_receive_promise_without_accepted_values() {
        let mut proposer = Proposer::new(1, 2);
        proposer.propose("123".into()).unwrap();
        let proposal = ProposalNumber(1, 1);

        let accept = proposer.receive_promise(2, proposal, None);
        assert!(accept.is_none());
        assert_eq!(Phase::Preparing, proposer.phase());

        // quorum of two: the proposer's own value is chosen
        let accept = proposer.receive_promise(3, proposal, None);
        assert_matches!(
            accept,
            Some(Message::AcceptRequest {
                sender: 1,
                proposal: ProposalNumber(1, 1),
                ref value,
            }) if value == "123"
        );
        assert_eq!(Phase::Accepting, proposer.phase());
    }

    #[test]
    fn proposer_adopts_highest_accepted_value() {
        let mut proposer = Proposer::new(1, 3);
        proposer.propose("mine".into()).unwrap();
        let proposal = ProposalNumber(1, 1);

        let accept =
            proposer.receive_promise(3, proposal, Some((ProposalNumber(90, 0), "low".into())));
        assert!(accept.is_none());

        let accept =
            proposer.receive_promise(4, proposal, Some((ProposalNumber(100, 0), "high".into())));
        assert!(accept.is_none());

        // a lower-numbered accepted pair arriving later must not displace
        // the adopted value
        let accept =
            proposer.receive_promise(5, proposal, Some((ProposalNumber(99, 0), "mid".into())));
        assert_matches!(
            accept,
            Some(Message::AcceptRequest {
                proposal: ProposalNumber(1, 1),
                ref value,
                ..
            }) if value == "high"
        );
    }

    #[test]
    fn adopted_value_is_independent_of_promise_order() {
        // all six delivery orders of a fixed set of three promises
        // settle on the same value
        let promises = [
            (3u32, Some((ProposalNumber(90, 0), Bytes::from("low")))),
            (4u32, Some((ProposalNumber(100, 0), Bytes::from("high")))),
            (5u32, None),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let mut proposer = Proposer::new(1, 3);
            proposer.propose("mine".into()).unwrap();
            let proposal = ProposalNumber(1, 1);

            let mut accept = None;
            for i in order {
                let (peer, last_accepted) = promises[i].clone();
                accept = proposer.receive_promise(peer, proposal, last_accepted);
            }
            assert_matches!(
                accept,
                Some(Message::AcceptRequest { ref value, .. }) if value == "high",
                "order {:?}",
                order
            );
        }
    }

    #[test]
    fn proposer_ignores_stale_and_foreign_promises() {
        let mut proposer = Proposer::new(1, 2);
        proposer.propose("123".into()).unwrap();

        // promise for a different round
        assert!(proposer
            .receive_promise(2, ProposalNumber(9, 9), None)
            .is_none());
        // duplicate promises from the same peer count once
        assert!(proposer
            .receive_promise(2, ProposalNumber(1, 1), None)
            .is_none());
        assert!(proposer
            .receive_promise(2, ProposalNumber(1, 1), None)
            .is_none());
        assert_eq!(Phase::Preparing, proposer.phase());
    }

    #[test]
    fn proposer_receive_accepted() {
        let mut proposer = Proposer::new(1, 2);
        proposer.propose("123".into()).unwrap();
        let proposal = ProposalNumber(1, 1);
        proposer.receive_promise(2, proposal, None);
        proposer.receive_promise(3, proposal, None);
        assert_eq!(Phase::Accepting, proposer.phase());

        // accepted messages for foreign rounds are dropped
        assert!(proposer.receive_accepted(2, ProposalNumber(9, 9)).is_none());

        assert!(proposer.receive_accepted(2, proposal).is_none());
        // duplicates count once
        assert!(proposer.receive_accepted(2, proposal).is_none());

        let learn = proposer.receive_accepted(3, proposal);
        assert_matches!(
            learn,
            Some(Message::Learn {
                sender: 1,
                proposal: ProposalNumber(1, 1),
                ref value,
            }) if value == "123"
        );
        assert_eq!(Phase::Decided, proposer.phase());

        // further accepted messages do not re-announce
        assert!(proposer.receive_accepted(4, proposal).is_none());
    }

    #[test]
    fn propose_after_decision_is_rejected() {
        let mut proposer = Proposer::new(1, 1);
        proposer.propose("123".into()).unwrap();
        let proposal = ProposalNumber(1, 1);
        proposer.receive_promise(2, proposal, None);
        proposer.receive_accepted(2, proposal);
        assert_eq!(Phase::Decided, proposer.phase());

        assert_eq!(
            Err(ProposeError::AlreadyDecided),
            proposer.propose("456".into())
        );

        // abandon does not forget a decision
        proposer.abandon();
        assert_eq!(Phase::Decided, proposer.phase());
    }

    #[test]
    fn promises_for_abandoned_round_are_ignored() {
        let mut proposer = Proposer::new(1, 2);
        proposer.propose("123".into()).unwrap();
        proposer.abandon();
        assert_eq!(Phase::Idle, proposer.phase());

        assert!(proposer
            .receive_promise(2, ProposalNumber(1, 1), None)
            .is_none());
        assert!(proposer
            .receive_promise(3, ProposalNumber(1, 1), None)
            .is_none());
        assert_eq!(Phase::Idle, proposer.phase());
    }
}
