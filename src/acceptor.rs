use crate::{Message, NodeId, ProposalNumber};
use bytes::Bytes;
use log::{debug, trace};

/// Encoding of the Acceptor (Paxos memory) role.
///
/// Both fields are monotonic: `promised` never decreases and the number of
/// the `accepted` pair never decreases. State is reset only by the explicit
/// test-only reset, never by protocol traffic.
pub struct Acceptor {
    current: NodeId,
    /// last promised proposal number
    promised: Option<ProposalNumber>,
    /// last accepted proposal/value pair
    accepted: Option<(ProposalNumber, Bytes)>,
}

impl Acceptor {
    /// Creates acceptor state for a node.
    pub fn new(current: NodeId) -> Acceptor {
        Acceptor {
            current,
            promised: None,
            accepted: None,
        }
    }

    /// Number of the last promise, if any.
    pub fn promised(&self) -> Option<ProposalNumber> {
        self.promised
    }

    /// Last accepted proposal/value pair, if any.
    pub fn accepted(&self) -> Option<(ProposalNumber, Bytes)> {
        self.accepted.clone()
    }

    /// Handler for a PREPARE message sent from a proposer. The result is a
    /// PROMISE to the proposer not to accept proposals below `proposal`,
    /// carrying the last accepted pair. Prepares at or below the promised
    /// number are ignored without a reply; liveness comes from higher-round
    /// retries rather than negative acknowledgements.
    pub fn receive_prepare(&mut self, proposal: ProposalNumber) -> Option<Message> {
        match self.promised {
            Some(promised) if proposal <= promised => {
                trace!(
                    "Ignoring prepare {} below promised {} at node {}",
                    proposal,
                    promised,
                    self.current
                );
                None
            }
            _ => {
                debug!("Node {} promising {}", self.current, proposal);

                // track the proposal as the highest promise
                // (in order to ignore proposals < promised)
                self.promised = Some(proposal);
                Some(Message::Promise {
                    sender: self.current,
                    proposal,
                    last_accepted: self.accepted.clone(),
                })
            }
        }
    }

    /// Handler for an ACCEPT_REQUEST message, which is sent from a proposer
    /// once it holds a Phase 1 quorum. Accepts the proposal when its number
    /// is at least the promised number; note `>=` rather than `>`, so the
    /// acceptor accepts the very proposal it just promised. A newer accept
    /// replaces any older accepted pair outright.
    pub fn receive_accept(&mut self, proposal: ProposalNumber, value: Bytes) -> Option<Message> {
        match self.promised {
            Some(promised) if proposal < promised => {
                trace!(
                    "Ignoring accept request {} below promised {} at node {}",
                    proposal,
                    promised,
                    self.current
                );
                None
            }
            _ => {
                debug!("Node {} accepting {}", self.current, proposal);

                // an acceptor may accept without having seen the prepare
                // (it missed Phase 1 but still counts toward Phase 2
                // quorum); promised must rise to the accepted number so
                // later prepares cannot slide under it
                self.promised = Some(proposal);
                self.accepted = Some((proposal, value.clone()));
                Some(Message::Accepted {
                    sender: self.current,
                    proposal,
                    value,
                })
            }
        }
    }

    /// Clears all acceptor state. Test-only escape hatch.
    pub fn reset(&mut self) {
        self.promised = None;
        self.accepted = None;
    }
}
