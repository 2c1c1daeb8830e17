use crate::{config, NodeId, ProposalNumber};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol messages sent between nodes. Every message carries the id of
/// the node that sent it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Message {
    /// `PREPARE` message is the Phase 1a message from a proposer sent
    /// to acceptors to receive agreement to not accept proposals of
    /// lower number.
    Prepare {
        sender: NodeId,
        proposal: ProposalNumber,
    },

    /// `PROMISE` is the Phase 1b message sent from acceptors in reply to
    /// `PREPARE` messages. The number in the promise denotes that the
    /// acceptor will not accept proposals less than the promised number.
    /// Carries the acceptor's last accepted pair, if any.
    Promise {
        sender: NodeId,
        proposal: ProposalNumber,
        last_accepted: Option<(ProposalNumber, Bytes)>,
    },

    /// `ACCEPT_REQUEST` message is the Phase 2a message from a proposer
    /// sent to acceptors to accept a value. It is predicated on the
    /// proposer receiving quorum from Phase 1.
    AcceptRequest {
        sender: NodeId,
        proposal: ProposalNumber,
        value: Bytes,
    },

    /// `ACCEPTED` is the Phase 2b message sent from acceptors denoting
    /// acceptance of a value.
    Accepted {
        sender: NodeId,
        proposal: ProposalNumber,
        value: Bytes,
    },

    /// `LEARN` announces a decided value once the proposer observes a
    /// quorum of `ACCEPTED` messages.
    Learn {
        sender: NodeId,
        proposal: ProposalNumber,
        value: Bytes,
    },
}

impl Message {
    /// Node that sent the message.
    pub fn sender(&self) -> NodeId {
        match *self {
            Message::Prepare { sender, .. }
            | Message::Promise { sender, .. }
            | Message::AcceptRequest { sender, .. }
            | Message::Accepted { sender, .. }
            | Message::Learn { sender, .. } => sender,
        }
    }

    /// Proposal number the message belongs to.
    pub fn proposal(&self) -> ProposalNumber {
        match *self {
            Message::Prepare { proposal, .. }
            | Message::Promise { proposal, .. }
            | Message::AcceptRequest { proposal, .. }
            | Message::Accepted { proposal, .. }
            | Message::Learn { proposal, .. } => proposal,
        }
    }

    /// Serializes the message into the line-oriented wire form:
    /// `TYPE:SENDER:PROPOSAL:VALUE[:ACCEPTED_N:ACCEPTED_V]` terminated by
    /// a newline. Unset optional fields are encoded as empty strings.
    pub fn serialize(&self) -> String {
        match *self {
            Message::Prepare { sender, proposal } => {
                format!("PREPARE:{}:{}:\n", sender, proposal)
            }
            Message::Promise {
                sender,
                proposal,
                ref last_accepted,
            } => match *last_accepted {
                Some((accepted, ref value)) => format!(
                    "PROMISE:{}:{}::{}:{}\n",
                    sender,
                    proposal,
                    accepted,
                    String::from_utf8_lossy(value)
                ),
                None => format!("PROMISE:{}:{}:\n", sender, proposal),
            },
            Message::AcceptRequest {
                sender,
                proposal,
                ref value,
            } => format!(
                "ACCEPT_REQUEST:{}:{}:{}\n",
                sender,
                proposal,
                String::from_utf8_lossy(value)
            ),
            Message::Accepted {
                sender,
                proposal,
                ref value,
            } => format!(
                "ACCEPTED:{}:{}:{}\n",
                sender,
                proposal,
                String::from_utf8_lossy(value)
            ),
            Message::Learn {
                sender,
                proposal,
                ref value,
            } => format!(
                "LEARN:{}:{}:{}\n",
                sender,
                proposal,
                String::from_utf8_lossy(value)
            ),
        }
    }

    /// Deserializes a message from its wire form.
    ///
    /// The split preserves trailing empty fields, so `PROMISE:7:1.4:` and
    /// `PROMISE:7:1.4::2.3:M9` both parse.
    pub fn deserialize(line: &str) -> Result<Message, DeserializeError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let fields = line.split(':').collect::<Vec<_>>();
        if fields.len() < 4 {
            return Err(DeserializeError::Truncated(line.to_string()));
        }

        let sender = config::parse_member_id(fields[1])
            .ok_or_else(|| DeserializeError::InvalidSender(fields[1].to_string()))?;
        let proposal = fields[2]
            .parse::<ProposalNumber>()
            .map_err(|()| DeserializeError::InvalidProposal(fields[2].to_string()))?;
        let value = Bytes::copy_from_slice(fields[3].as_bytes());

        match fields[0] {
            "PREPARE" => Ok(Message::Prepare { sender, proposal }),
            "PROMISE" => {
                let last_accepted = if fields.len() >= 6 && !fields[4].is_empty() {
                    let accepted = fields[4]
                        .parse::<ProposalNumber>()
                        .map_err(|()| DeserializeError::InvalidProposal(fields[4].to_string()))?;
                    Some((accepted, Bytes::copy_from_slice(fields[5].as_bytes())))
                } else {
                    None
                };
                Ok(Message::Promise {
                    sender,
                    proposal,
                    last_accepted,
                })
            }
            "ACCEPT_REQUEST" => Ok(Message::AcceptRequest {
                sender,
                proposal,
                value,
            }),
            "ACCEPTED" => Ok(Message::Accepted {
                sender,
                proposal,
                value,
            }),
            "LEARN" => Ok(Message::Learn {
                sender,
                proposal,
                value,
            }),
            other => Err(DeserializeError::UnknownType(other.to_string())),
        }
    }
}

/// Error encountered while decoding a wire message. Decode failures are
/// logged and dropped by consumers; they never cross the protocol boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeserializeError {
    #[error("truncated message: {0:?}")]
    Truncated(String),
    #[error("unknown message type: {0:?}")]
    UnknownType(String),
    #[error("invalid sender id: {0:?}")]
    InvalidSender(String),
    #[error("invalid proposal number: {0:?}")]
    InvalidProposal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn prepare_round_trip() {
        let msg = Message::Prepare {
            sender: 4,
            proposal: ProposalNumber(1, 4),
        };
        assert_eq!("PREPARE:4:1.4:\n", msg.serialize());
        assert_eq!(Ok(msg), Message::deserialize("PREPARE:4:1.4:\n"));
    }

    #[test]
    fn promise_without_accepted_round_trip() {
        let msg = Message::Promise {
            sender: 7,
            proposal: ProposalNumber(1, 4),
            last_accepted: None,
        };
        assert_eq!("PROMISE:7:1.4:\n", msg.serialize());
        assert_eq!(Ok(msg), Message::deserialize("PROMISE:7:1.4:\n"));
    }

    #[test]
    fn promise_with_accepted_round_trip() {
        let msg = Message::Promise {
            sender: 7,
            proposal: ProposalNumber(2, 4),
            last_accepted: Some((ProposalNumber(1, 3), "M9".into())),
        };
        assert_eq!("PROMISE:7:2.4::1.3:M9\n", msg.serialize());
        assert_eq!(Ok(msg), Message::deserialize("PROMISE:7:2.4::1.3:M9\n"));
    }

    #[test]
    fn accept_request_round_trip() {
        let msg = Message::AcceptRequest {
            sender: 2,
            proposal: ProposalNumber(1, 2),
            value: "M5".into(),
        };
        assert_eq!("ACCEPT_REQUEST:2:1.2:M5\n", msg.serialize());
        assert_eq!(Ok(msg), Message::deserialize("ACCEPT_REQUEST:2:1.2:M5\n"));
    }

    #[test]
    fn learn_and_accepted_round_trip() {
        let accepted = Message::Accepted {
            sender: 9,
            proposal: ProposalNumber(3, 1),
            value: "M5".into(),
        };
        assert_eq!(Ok(accepted.clone()), Message::deserialize(&accepted.serialize()));

        let learn = Message::Learn {
            sender: 1,
            proposal: ProposalNumber(3, 1),
            value: "M5".into(),
        };
        assert_eq!(Ok(learn.clone()), Message::deserialize(&learn.serialize()));
    }

    #[test]
    fn deserialize_tolerates_missing_newline() {
        assert_matches!(
            Message::deserialize("PREPARE:4:1.4:"),
            Ok(Message::Prepare { sender: 4, .. })
        );
    }

    #[test]
    fn deserialize_accepts_tagged_member_ids() {
        // interop with deployments that spell node ids M1, M2, ...
        assert_eq!(
            Ok(Message::Prepare {
                sender: 4,
                proposal: ProposalNumber(1, 4),
            }),
            Message::deserialize("PREPARE:M4:1.M4:\n")
        );
    }

    #[test]
    fn deserialize_rejects_malformed_input() {
        assert_matches!(
            Message::deserialize("PREPARE:4:1.4"),
            Err(DeserializeError::Truncated(_))
        );
        assert_matches!(
            Message::deserialize("NACK:4:1.4:\n"),
            Err(DeserializeError::UnknownType(_))
        );
        assert_matches!(
            Message::deserialize("PREPARE:x:1.4:\n"),
            Err(DeserializeError::InvalidSender(_))
        );
        assert_matches!(
            Message::deserialize("PREPARE:4:nope:\n"),
            Err(DeserializeError::InvalidProposal(_))
        );
        assert_matches!(
            Message::deserialize("PROMISE:7:1.4::bad:M9\n"),
            Err(DeserializeError::InvalidProposal(_))
        );
        assert_matches!(Message::deserialize(""), Err(DeserializeError::Truncated(_)));
    }

    #[test]
    fn sender_and_proposal_accessors() {
        let msg = Message::Learn {
            sender: 3,
            proposal: ProposalNumber(2, 3),
            value: "v".into(),
        };
        assert_eq!(3, msg.sender());
        assert_eq!(ProposalNumber(2, 3), msg.proposal());
    }
}
