//! Platform MIDI backends
//!
//! Every backend exposes the same capability set: enumerate endpoints,
//! subscribe and unsubscribe port pairs, send to a destination, and a
//! blocking read of the next input event. The concrete backend is picked
//! at startup from the configuration.

pub mod loopback;
pub mod native;

use crate::connection::{ClientPortId, PortCaps, Subscription};
use serde::Serialize;
use thiserror::Error;

pub use loopback::LoopbackBackend;
pub use native::NativeBackend;

/// Name every client opened by this application registers under
pub const CLIENT_NAME: &str = "stompsync";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to open MIDI client: {0}")]
    Init(String),

    #[error("port {0} not found")]
    PortNotFound(ClientPortId),

    #[error("failed to subscribe {sub}: {reason}")]
    Subscribe { sub: Subscription, reason: String },

    #[error("{0} is not subscribed")]
    NotSubscribed(Subscription),

    #[error("failed to send to {dest}: {reason}")]
    Send { dest: ClientPortId, reason: String },

    #[error("failed to enumerate ports: {0}")]
    Enumerate(String),

    #[error("event queue closed")]
    Closed,
}

/// An endpoint as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub id: ClientPortId,
    pub client_name: String,
    pub name: String,
    #[serde(serialize_with = "serialize_caps")]
    pub caps: PortCaps,
}

fn serialize_caps<S: serde::Serializer>(caps: &PortCaps, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(caps.bits())
}

/// Raw input as it comes off the platform queue, before reassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// One fragment of a SysEx transfer
    SysEx { source: ClientPortId, data: Vec<u8> },
    PortSubscribed(Subscription),
    PortUnsubscribed(Subscription),
    ClientStart(ClientPortId),
    ClientExit(ClientPortId),
    Sensing { source: ClientPortId },
    /// Anything else; carried only so it can be logged
    Other { source: ClientPortId, data: Vec<u8> },
}

pub trait MidiBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Our own client id
    fn self_client(&self) -> u32;

    /// The local endpoint that pairs with remote ports to form subscriptions
    fn local_endpoint(&self) -> ClientPortId {
        ClientPortId::new(self.self_client(), 0)
    }

    /// Whether clients coming and going show up on the input queue by themselves.
    /// Backends that return false get a polling monitor.
    fn announces_clients(&self) -> bool {
        true
    }

    /// All endpoints of every client currently on the bus, in platform order
    fn enumerate(&self) -> Result<Vec<EndpointInfo>, BackendError>;

    fn subscribe(&self, sub: &Subscription) -> Result<(), BackendError>;

    fn unsubscribe(&self, sub: &Subscription) -> Result<(), BackendError>;

    /// Sends one complete message to a subscribed destination
    fn send(&self, dest: ClientPortId, message: &[u8]) -> Result<(), BackendError>;

    /// Blocks until the next input event is available
    fn read_event(&self) -> Result<RawEvent, BackendError>;

    /// Queues an event on our own input as if the platform had delivered it
    fn post(&self, event: RawEvent) -> Result<(), BackendError>;
}

/// Backend implementations selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// The platform MIDI subsystem (ALSA sequencer or CoreMIDI through midir)
    Native,
    /// In-process bus with a simulated device, no hardware needed
    Loopback,
}
