use std::collections::VecDeque;

use super::buffer::{BufferError, NetBuffer};
use super::protocol::{MessageTag, RELIABLE_SIZE_FLAG};

#[derive(Debug, Clone)]
pub struct OutReliableCommand {
    pub id: u32,
    pub tag: MessageTag,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReliableError {
    #[error("reliable command overflow: {pending} commands unacknowledged, cap is {cap}")]
    Overflow { pending: u32, cap: u32 },
    #[error("reliable command id {id} is too far ahead of last received id {last}")]
    Desync { id: u32, last: u32 },
}

/// Outgoing reliable-command queue plus the incoming de-duplication window.
///
/// Every unacknowledged command is re-serialized into each outgoing message
/// until the peer acknowledges an id at or past it; inbound commands are
/// applied at most once, in increasing id order.
#[derive(Debug)]
pub struct ReliableChannel {
    out_sequence: u32,
    out_acknowledged: u32,
    last_received_id: u32,
    pending: VecDeque<OutReliableCommand>,
    max_pending: u32,
    receive_slack: u32,
}

impl ReliableChannel {
    pub fn new(max_pending: u32, receive_slack: u32) -> Self {
        Self {
            out_sequence: 0,
            out_acknowledged: 0,
            last_received_id: 0,
            pending: VecDeque::new(),
            max_pending,
            receive_slack,
        }
    }

    /// Resets all counters and queues for a fresh session.
    pub fn reset(&mut self) {
        self.out_sequence = 0;
        self.out_acknowledged = 0;
        self.last_received_id = 0;
        self.pending.clear();
    }

    /// Resets the inbound window only, as done when the server accepts the
    /// connection and restarts its own command numbering.
    pub fn reset_incoming(&mut self) {
        self.last_received_id = 0;
    }

    pub fn enqueue(&mut self, tag: MessageTag, payload: &[u8]) -> Result<u32, ReliableError> {
        let unacknowledged = self.out_sequence - self.out_acknowledged;
        if unacknowledged >= self.max_pending {
            return Err(ReliableError::Overflow {
                pending: unacknowledged,
                cap: self.max_pending,
            });
        }

        self.out_sequence += 1;

        self.pending.push_back(OutReliableCommand {
            id: self.out_sequence,
            tag,
            payload: payload.to_vec(),
        });

        Ok(self.out_sequence)
    }

    /// Evicts every queued command covered by the peer's acknowledgment.
    /// An ack past our own sequence counter is clamped.
    pub fn process_ack(&mut self, ack: u32) {
        let ack = ack.min(self.out_sequence);
        if ack <= self.out_acknowledged {
            return;
        }

        self.pending.retain(|command| command.id > ack);
        self.out_acknowledged = ack;
    }

    /// Decides whether an inbound command id should be applied. Duplicate or
    /// stale ids report `false` and must be dropped silently; an id far past
    /// the expected window is a protocol desync.
    pub fn accept(&mut self, id: u32) -> Result<bool, ReliableError> {
        if id > self.last_received_id.saturating_add(self.receive_slack) {
            return Err(ReliableError::Desync {
                id,
                last: self.last_received_id,
            });
        }

        if id > self.last_received_id {
            self.last_received_id = id;
            return Ok(true);
        }

        Ok(false)
    }

    /// Serializes every pending command as a frame into the outgoing message.
    pub fn write_pending(&self, msg: &mut NetBuffer) -> Result<(), BufferError> {
        for command in &self.pending {
            msg.write_u32(command.tag.raw())?;

            if command.payload.len() > u16::MAX as usize {
                msg.write_u32(command.id | RELIABLE_SIZE_FLAG)?;
                msg.write_u32(command.payload.len() as u32)?;
            } else {
                msg.write_u32(command.id)?;
                msg.write_u16(command.payload.len() as u16)?;
            }

            msg.write_bytes(&command.payload)?;
        }

        Ok(())
    }

    pub fn pending(&self) -> impl Iterator<Item = &OutReliableCommand> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn out_sequence(&self) -> u32 {
        self.out_sequence
    }

    pub fn out_acknowledged(&self) -> u32 {
        self.out_acknowledged
    }

    pub fn last_received_id(&self) -> u32 {
        self.last_received_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> MessageTag {
        MessageTag::from_name(name)
    }

    #[test]
    fn test_ack_evicts_exactly_the_acknowledged_prefix() {
        let mut channel = ReliableChannel::new(64, 64);

        for _ in 0..5 {
            channel.enqueue(tag("msgTest"), b"x").unwrap();
        }

        channel.process_ack(3);

        let pending: Vec<u32> = channel.pending().map(|c| c.id).collect();
        assert_eq!(pending, vec![4, 5]);
        assert_eq!(channel.out_acknowledged(), 3);
    }

    #[test]
    fn test_stale_ack_is_ignored() {
        let mut channel = ReliableChannel::new(64, 64);

        for _ in 0..3 {
            channel.enqueue(tag("msgTest"), b"x").unwrap();
        }

        channel.process_ack(2);
        channel.process_ack(1);

        assert_eq!(channel.out_acknowledged(), 2);
        assert_eq!(channel.pending_count(), 1);
    }

    #[test]
    fn test_overflow_is_an_error_not_a_drop() {
        let mut channel = ReliableChannel::new(4, 64);

        for _ in 0..4 {
            channel.enqueue(tag("msgTest"), b"x").unwrap();
        }

        let err = channel.enqueue(tag("msgTest"), b"x").unwrap_err();
        assert_eq!(err, ReliableError::Overflow { pending: 4, cap: 4 });
        assert_eq!(channel.pending_count(), 4);
    }

    #[test]
    fn test_ack_frees_pending_capacity() {
        let mut channel = ReliableChannel::new(2, 64);

        channel.enqueue(tag("msgTest"), b"x").unwrap();
        channel.enqueue(tag("msgTest"), b"x").unwrap();
        assert!(channel.enqueue(tag("msgTest"), b"x").is_err());

        channel.process_ack(2);
        assert!(channel.enqueue(tag("msgTest"), b"x").is_ok());
    }

    #[test]
    fn test_duplicate_apply_is_idempotent() {
        let mut channel = ReliableChannel::new(64, 64);

        assert!(channel.accept(1).unwrap());
        assert!(channel.accept(2).unwrap());
        assert!(!channel.accept(2).unwrap());
        assert!(!channel.accept(1).unwrap());
        assert!(channel.accept(3).unwrap());
        assert_eq!(channel.last_received_id(), 3);
    }

    #[test]
    fn test_far_ahead_id_is_a_desync() {
        let mut channel = ReliableChannel::new(64, 64);

        channel.accept(1).unwrap();
        assert_eq!(
            channel.accept(66).unwrap_err(),
            ReliableError::Desync { id: 66, last: 1 }
        );
    }

    #[test]
    fn test_extended_size_frame_encoding() {
        let mut channel = ReliableChannel::new(64, 64);
        let large = vec![0xAB; (u16::MAX as usize) + 1];
        channel.enqueue(tag("msgBig"), &large).unwrap();

        let mut msg = NetBuffer::with_capacity(large.len() + 64);
        channel.write_pending(&mut msg).unwrap();

        let mut read = NetBuffer::from_bytes(msg.as_bytes().to_vec());
        assert_eq!(read.read_u32().unwrap(), tag("msgBig").raw());

        let id = read.read_u32().unwrap();
        assert_ne!(id & RELIABLE_SIZE_FLAG, 0);
        assert_eq!(id & !RELIABLE_SIZE_FLAG, 1);
        assert_eq!(read.read_u32().unwrap() as usize, large.len());
        assert_eq!(read.read_bytes(large.len()).unwrap(), large);
    }

    #[test]
    fn test_pending_resent_until_acked() {
        let mut channel = ReliableChannel::new(64, 64);
        channel.enqueue(tag("msgTest"), b"hi").unwrap();

        // two composes without an ack serialize the same frame twice
        for _ in 0..2 {
            let mut msg = NetBuffer::with_capacity(64);
            channel.write_pending(&mut msg).unwrap();
            assert!(!msg.is_empty());
        }

        channel.process_ack(1);
        let mut msg = NetBuffer::with_capacity(64);
        channel.write_pending(&mut msg).unwrap();
        assert!(msg.is_empty());
    }
}
