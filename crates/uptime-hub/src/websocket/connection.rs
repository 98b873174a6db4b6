//! Live validator connections

use crate::error::{HubError, Result};
use crate::models::OutgoingMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type Outbox = mpsc::UnboundedReceiver<OutgoingMessage>;

/// Sending half of a validator socket.
///
/// Frames are queued on an unbounded channel that the socket writer task
/// drains, so a send never waits on the network. Once the writer is gone
/// every send fails immediately with [`HubError::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<OutgoingMessage>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                outbox: tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, msg: OutgoingMessage) -> Result<()> {
        self.outbox
            .send(msg)
            .map_err(|_| HubError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignupOutgoing;

    fn ack() -> OutgoingMessage {
        OutgoingMessage::Signup(SignupOutgoing {
            validator_id: "v".to_string(),
            callback_id: "c".to_string(),
        })
    }

    #[test]
    fn test_send_queues_frame() {
        let (conn, mut rx) = ConnectionHandle::new();
        conn.send(ack()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ack());
    }

    #[test]
    fn test_send_after_close_fails_fast() {
        let (conn, rx) = ConnectionHandle::new();
        drop(rx);
        assert!(conn.is_closed());
        assert!(matches!(conn.send(ack()), Err(HubError::ConnectionClosed)));
    }

    #[test]
    fn test_handles_have_distinct_ids() {
        let (a, _ra) = ConnectionHandle::new();
        let (b, _rb) = ConnectionHandle::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
