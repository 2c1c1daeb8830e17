use crate::{Message, NodeId};

/// Sends protocol messages to other nodes in the cluster.
///
/// A transport is best-effort: it may drop messages, delay them arbitrarily,
/// and deliver them in any order. The protocol tolerates all of it.
///
/// Implementations must not deliver inbound messages to the sending node
/// synchronously on the thread that called [`send`](Transport::send) or
/// [`broadcast`](Transport::broadcast). Nodes issue sends directly from
/// their message handlers and rely on this non-reentrancy to stay
/// deadlock-free. A transport that cannot guarantee it must buffer inbound
/// delivery onto another thread.
pub trait Transport {
    /// Send a message to a single node. Returns `false` when the message
    /// could not be handed to the network; the caller ignores the result,
    /// the protocol treats an unsent message like a lost one.
    fn send(&self, to: NodeId, msg: Message) -> bool;

    /// Send a message to every peer except the local node. Returns the
    /// number of sends that succeeded.
    fn broadcast(&self, msg: Message) -> usize;
}

/// Receiver of protocol messages.
///
/// Implemented by [`Node`](crate::Node); transports deliver each inbound
/// message through this trait.
pub trait Receiver {
    /// Receives a message and reacts accordingly
    fn receive(&self, msg: Message);
}
