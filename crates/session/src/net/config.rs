use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between out-of-band connect datagrams while `Connecting`.
    pub connect_interval: Duration,
    /// Connect datagrams sent before the attempt fails fatally.
    pub max_connect_attempts: u32,
    /// Inbound silence tolerated while `Active` before a fatal timeout.
    pub liveness_timeout: Duration,
    /// Minimum spacing between composed outgoing messages.
    pub send_interval: Duration,
    /// Skip the send rate limit whenever routed packets are waiting.
    pub instant_send: bool,
    /// Unacknowledged reliable commands tolerated before a fatal overflow.
    pub max_pending_reliables: u32,
    /// How far past the last received reliable id an inbound id may run
    /// before it counts as a protocol desync.
    pub receive_slack: u32,
    /// Capacity of the composed per-tick message.
    pub message_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_interval: Duration::from_millis(5000),
            max_connect_attempts: 3,
            liveness_timeout: Duration::from_millis(15000),
            send_interval: Duration::from_secs(1) / 60,
            instant_send: false,
            max_pending_reliables: 64,
            receive_slack: 64,
            message_capacity: 12000,
        }
    }
}
