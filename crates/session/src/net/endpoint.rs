use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::{MAX_DATAGRAM_SIZE, OOB_MARKER};

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub from: SocketAddr,
}

impl Datagram {
    /// True when the payload starts with the reserved out-of-band marker.
    pub fn is_oob(&self) -> bool {
        self.data.len() >= 4 && self.data[..4] == OOB_MARKER.to_le_bytes()
    }

    pub fn oob_text(&self) -> Option<String> {
        if !self.is_oob() {
            return None;
        }

        let text = String::from_utf8_lossy(&self.data[4..]);
        Some(text.trim_end_matches('\0').to_string())
    }
}

/// Non-blocking unreliable socket bound to an ephemeral local port. Absence
/// of data is not an error; transport failures are logged and swallowed on
/// the receive path.
pub struct DatagramEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl DatagramEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let bytes = self.socket.send_to(data, addr)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    pub fn send_oob(&mut self, addr: SocketAddr, text: &str) -> io::Result<usize> {
        let mut data = Vec::with_capacity(4 + text.len());
        data.extend_from_slice(&OOB_MARKER.to_le_bytes());
        data.extend_from_slice(text.as_bytes());

        self.send_to(&data, addr)
    }

    /// Drains every datagram currently queued on the socket.
    pub fn receive(&mut self) -> Vec<Datagram> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, from)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;

                    datagrams.push(Datagram {
                        data: self.recv_buffer[..size].to_vec(),
                        from,
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("recv failed: {e}");
                    break;
                }
            }
        }

        datagrams
    }

    pub fn reset_stats(&mut self) {
        self.stats = NetworkStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn pair() -> (DatagramEndpoint, DatagramEndpoint) {
        let a = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
        let b = DatagramEndpoint::bind("127.0.0.1:0").unwrap();
        (a, b)
    }

    fn wait_for(endpoint: &mut DatagramEndpoint) -> Vec<Datagram> {
        for _ in 0..200 {
            let datagrams = endpoint.receive();
            if !datagrams.is_empty() {
                return datagrams;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("no datagram received");
    }

    #[test]
    fn test_send_receive() {
        let (mut a, mut b) = pair();

        a.send_to(b"hello", b.local_addr()).unwrap();

        let datagrams = wait_for(&mut b);
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].data, b"hello");
        assert_eq!(datagrams[0].from, a.local_addr());
        assert!(!datagrams[0].is_oob());
    }

    #[test]
    fn test_oob_marker() {
        let (mut a, mut b) = pair();

        a.send_oob(b.local_addr(), "connectOK 1 2 3").unwrap();

        let datagrams = wait_for(&mut b);
        assert!(datagrams[0].is_oob());
        assert_eq!(datagrams[0].oob_text().unwrap(), "connectOK 1 2 3");
    }

    #[test]
    fn test_empty_receive_is_not_an_error() {
        let (_, mut b) = pair();
        assert!(b.receive().is_empty());
    }
}
