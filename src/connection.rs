use serde::Serialize;
use std::fmt;
use std::ops::BitOr;

/// Client id of the sequencer's reserved system client (timer and announce ports)
pub const SYSTEM_CLIENT: u32 = 0;

/// Unique identifier for a MIDI endpoint: a (client, port) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientPortId {
    client: u32,
    port: u32,
}

impl ClientPortId {
    pub const fn new(client: u32, port: u32) -> Self {
        Self { client, port }
    }

    pub const fn client_id(&self) -> u32 {
        self.client
    }

    pub const fn port_id(&self) -> u32 {
        self.port
    }

    /// Single composite value with the client in the high half and the port in the low half
    pub const fn packed(&self) -> u64 {
        ((self.client as u64) << 32) | self.port as u64
    }

}

impl fmt::Display for ClientPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

/// A sender -> destination link between two endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub sender: ClientPortId,
    pub dest: ClientPortId,
}

impl Subscription {
    pub fn new(sender: ClientPortId, dest: ClientPortId) -> Self {
        Self { sender, dest }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.sender, self.dest)
    }
}

/// Capability bits reported for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PortCaps(u32);

impl PortCaps {
    pub const NONE: PortCaps = PortCaps(0);
    pub const READ: PortCaps = PortCaps(1 << 0);
    pub const WRITE: PortCaps = PortCaps(1 << 1);
    pub const SUBS_READ: PortCaps = PortCaps(1 << 5);
    pub const SUBS_WRITE: PortCaps = PortCaps(1 << 6);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn union(self, other: PortCaps) -> PortCaps {
        PortCaps(self.0 | other.0)
    }

    pub const fn contains(&self, other: PortCaps) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: PortCaps) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for PortCaps {
    type Output = PortCaps;

    fn bitor(self, rhs: PortCaps) -> PortCaps {
        self.union(rhs)
    }
}

/// Which side of the bus a port model lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sources we can read from
    Readable,
    /// Destinations we can write to
    Writable,
}

impl Direction {
    /// Capability bits a port needs to show up in a model of this direction.
    /// Having either bit is enough.
    pub fn required_caps(&self) -> PortCaps {
        match self {
            Direction::Readable => PortCaps::READ | PortCaps::SUBS_READ,
            Direction::Writable => PortCaps::WRITE | PortCaps::SUBS_WRITE,
        }
    }

    /// The endpoint of a subscription a model of this direction keeps track of
    pub fn tracked(&self, sub: &Subscription) -> ClientPortId {
        match self {
            Direction::Readable => sub.sender,
            Direction::Writable => sub.dest,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Readable => write!(f, "sources"),
            Direction::Writable => write!(f, "destinations"),
        }
    }
}

/// One row of a port list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub id: ClientPortId,
    pub name: String,
}

impl PortEntry {
    pub fn new(id: ClientPortId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}
