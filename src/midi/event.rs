use crate::connection::ClientPortId;
use std::fmt;

/// Whether a topology change concerns one port link or a whole client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyScope {
    Port,
    Client,
}

/// Events produced by the input listener for the main context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    /// A complete System Exclusive message, 0xF0 .. 0xF7 inclusive
    SysEx { source: ClientPortId, data: Vec<u8> },

    /// A read/write link between two ports was made or torn down
    PortSubscription {
        sender: ClientPortId,
        dest: ClientPortId,
        connected: bool,
    },

    /// A client appeared on or left the bus
    Client { addr: ClientPortId, started: bool },

    /// A pending SysEx grew past the configured limit and was dropped
    SysExOverflow { source: ClientPortId, discarded: usize },
}

impl MidiEvent {
    pub fn scope(&self) -> Option<TopologyScope> {
        match self {
            MidiEvent::PortSubscription { .. } => Some(TopologyScope::Port),
            MidiEvent::Client { .. } => Some(TopologyScope::Client),
            _ => None,
        }
    }

    /// Originating port of a SysEx as a single packed value
    pub fn sysex_port(&self) -> Option<u64> {
        match self {
            MidiEvent::SysEx { source, .. } => Some(source.packed()),
            _ => None,
        }
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiEvent::SysEx { source, data } => {
                write!(f, "SysEx from {} ({} bytes): {}", source, data.len(), hex_preview(data, 12))
            }
            MidiEvent::PortSubscription { sender, dest, connected } => {
                let verb = if *connected { "connected" } else { "disconnected" };
                write!(f, "{} → {} {}", sender, dest, verb)
            }
            MidiEvent::Client { addr, started } => {
                let verb = if *started { "started" } else { "exited" };
                write!(f, "client {} {}", addr.client_id(), verb)
            }
            MidiEvent::SysExOverflow { source, discarded } => {
                write!(f, "SysEx from {} dropped after {} bytes without F7", source, discarded)
            }
        }
    }
}

/// Space separated hex of the first `max` bytes, with an ellipsis when cut
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out = data
        .iter()
        .take(max)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max {
        out.push_str(" …");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope() {
        let id = ClientPortId::new(20, 0);
        let sysex = MidiEvent::SysEx { source: id, data: vec![0xF0, 0xF7] };
        let client = MidiEvent::Client { addr: id, started: true };
        let link = MidiEvent::PortSubscription { sender: id, dest: id, connected: false };

        assert_eq!(sysex.scope(), None);
        assert_eq!(client.scope(), Some(TopologyScope::Client));
        assert_eq!(link.scope(), Some(TopologyScope::Port));
        assert_eq!(sysex.sysex_port(), Some(id.packed()));
        assert_eq!(client.sysex_port(), None);
    }

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[0xF0, 0x43, 0xF7], 8), "F0 43 F7");
        assert_eq!(hex_preview(&[0xF0, 0x43, 0x7D, 0xF7], 2), "F0 43 …");
        assert_eq!(hex_preview(&[], 4), "");
    }
}
