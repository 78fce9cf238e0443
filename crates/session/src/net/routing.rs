use std::collections::VecDeque;
use std::time::Instant;

/// Best-effort addressed payload carried alongside the reliable channel.
#[derive(Debug, Clone)]
pub struct RoutedPacket {
    pub peer_id: u16,
    pub payload: Vec<u8>,
    pub queued_at: Instant,
}

/// Two independent FIFO queues for routed packets. Loss is accepted; there
/// is no retry or acknowledgment on this sub-channel.
#[derive(Debug, Default)]
pub struct RouteQueues {
    inbound: VecDeque<RoutedPacket>,
    outbound: VecDeque<RoutedPacket>,
}

impl RouteQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outbound(&mut self, peer_id: u16, payload: Vec<u8>) {
        self.outbound.push_back(RoutedPacket {
            peer_id,
            payload,
            queued_at: Instant::now(),
        });
    }

    pub fn pop_outbound(&mut self) -> Option<RoutedPacket> {
        self.outbound.pop_front()
    }

    pub fn push_inbound(&mut self, peer_id: u16, payload: Vec<u8>) {
        self.inbound.push_back(RoutedPacket {
            peer_id,
            payload,
            queued_at: Instant::now(),
        });
    }

    pub fn pop_inbound(&mut self) -> Option<RoutedPacket> {
        self.inbound.pop_front()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn clear(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_fifo_across_peers() {
        let mut queues = RouteQueues::new();
        queues.push_outbound(1, b"x".to_vec());
        queues.push_outbound(2, b"y".to_vec());

        let first = queues.pop_outbound().unwrap();
        assert_eq!((first.peer_id, first.payload.as_slice()), (1, &b"x"[..]));

        let second = queues.pop_outbound().unwrap();
        assert_eq!((second.peer_id, second.payload.as_slice()), (2, &b"y"[..]));

        assert!(queues.pop_outbound().is_none());
    }

    #[test]
    fn test_inbound_empty_reports_none() {
        let mut queues = RouteQueues::new();
        assert!(queues.pop_inbound().is_none());

        queues.push_inbound(7, b"data".to_vec());
        assert_eq!(queues.inbound_len(), 1);
        assert_eq!(queues.pop_inbound().unwrap().peer_id, 7);
        assert!(queues.pop_inbound().is_none());
    }

    #[test]
    fn test_clear_drops_both_queues() {
        let mut queues = RouteQueues::new();
        queues.push_inbound(1, vec![0]);
        queues.push_outbound(2, vec![0]);

        queues.clear();
        assert!(!queues.has_outbound());
        assert_eq!(queues.inbound_len(), 0);
    }
}
