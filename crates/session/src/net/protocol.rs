pub const DEFAULT_PORT: u16 = 30120;
pub const MAX_DATAGRAM_SIZE: usize = 16384;

/// Leading marker that distinguishes out-of-band datagrams from session
/// messages.
pub const OOB_MARKER: u32 = 0xFFFF_FFFF;

/// High bit on a reliable command id marking an extended (u32) payload size.
pub const RELIABLE_SIZE_FLAG: u32 = 0x8000_0000;

/// 32-bit command tag derived from a human-readable command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag(pub u32);

impl MessageTag {
    pub fn from_name(name: &str) -> Self {
        Self(hash_type_name(name))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

pub const MSG_ROUTE: MessageTag = MessageTag(0xE938445B); // hash_type_name("msgRoute")
pub const MSG_END: MessageTag = MessageTag(0xCA569E63); // hash_type_name("msgEnd")
pub const MSG_I_HOST: MessageTag = MessageTag(0xB3EA30DE); // hash_type_name("msgIHost")
pub const MSG_I_QUIT: MessageTag = MessageTag(0x522CADD1); // hash_type_name("msgIQuit")

/// Jenkins one-at-a-time hash over the command name, matching the tag values
/// the server computes for the same names.
pub fn hash_type_name(name: &str) -> u32 {
    let mut hash: u32 = 0;

    for byte in name.bytes() {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }

    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// ASCII command carried after the out-of-band marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobMessage {
    ConnectOk {
        client_id: u16,
        host_id: u16,
        host_base: u32,
    },
    Error {
        message: String,
    },
    Connect {
        token: String,
        guid: u64,
    },
}

impl OobMessage {
    pub fn parse(text: &str) -> Option<Self> {
        if let Some(rest) = text.strip_prefix("connectOK ") {
            let mut parts = rest.split_whitespace();
            let client_id = parts.next()?.parse().ok()?;
            let host_id = parts.next()?.parse().ok()?;
            let host_base = parts.next()?.parse().ok()?;

            return Some(Self::ConnectOk {
                client_id,
                host_id,
                host_base,
            });
        }

        if let Some(message) = text.strip_prefix("error ") {
            return Some(Self::Error {
                message: message.to_string(),
            });
        }

        if let Some(rest) = text.strip_prefix("connect ") {
            let mut token = None;
            let mut guid = None;

            for pair in rest.split('&') {
                match pair.split_once('=') {
                    Some(("token", value)) => token = Some(value.to_string()),
                    Some(("guid", value)) => guid = value.parse().ok(),
                    _ => {}
                }
            }

            return Some(Self::Connect {
                token: token?,
                guid: guid?,
            });
        }

        None
    }

    pub fn encode(&self) -> String {
        match self {
            Self::ConnectOk {
                client_id,
                host_id,
                host_base,
            } => format!("connectOK {client_id} {host_id} {host_base}"),
            Self::Error { message } => format!("error {message}"),
            Self::Connect { token, guid } => format!("connect token={token}&guid={guid}"),
        }
    }
}
