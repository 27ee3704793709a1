use super::{BackendError, EndpointInfo, MidiBackend, RawEvent, CLIENT_NAME};
use crate::connection::{ClientPortId, PortCaps, Subscription};
use crate::midi::validation::{self, MessageKind};
use crossbeam::channel::{unbounded, Receiver, Sender};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// midir does not report our own sequencer client id, so the local endpoint
/// gets a reserved value; our own ports are recognised by name instead.
pub const NATIVE_SELF_CLIENT: u32 = u32::MAX;

/// First client id handed out to ports whose platform id is not numeric
const FALLBACK_CLIENT_BASE: u32 = 0x1000;

const INPUT_PORT_NAME: &str = "stompsync-in";
const OUTPUT_PORT_NAME: &str = "stompsync-out";

/// Per-connection state handed to the midir input callback
struct InputState {
    source: ClientPortId,
    sysex_open: bool,
    tx: Sender<RawEvent>,
}

/// Backend on top of midir: ALSA sequencer on Linux, CoreMIDI on macOS
pub struct NativeBackend {
    // Keep the connections alive - dropping them closes the subscription
    inputs: Mutex<HashMap<ClientPortId, MidiInputConnection<InputState>>>,
    outputs: Mutex<HashMap<ClientPortId, MidiOutputConnection>>,
    tx: Sender<RawEvent>,
    rx: Receiver<RawEvent>,
}

// The connections are only reached through their mutexes
unsafe impl Send for NativeBackend {}
unsafe impl Sync for NativeBackend {}

impl NativeBackend {
    /// Checks that the platform MIDI subsystem is reachable
    pub fn new() -> Result<Self, BackendError> {
        MidiInput::new(CLIENT_NAME).map_err(|e| BackendError::Init(e.to_string()))?;
        let (tx, rx) = unbounded();

        Ok(Self {
            inputs: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            tx,
            rx,
        })
    }

    fn inputs(&self) -> MutexGuard<'_, HashMap<ClientPortId, MidiInputConnection<InputState>>> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outputs(&self) -> MutexGuard<'_, HashMap<ClientPortId, MidiOutputConnection>> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_input(&self, sub: &Subscription) -> Result<(), BackendError> {
        let fail = |reason: String| BackendError::Subscribe { sub: *sub, reason };

        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| fail(e.to_string()))?;
        // SysEx and active sensing are filtered out by default
        midi_in.ignore(Ignore::None);

        let port = midi_in
            .ports()
            .into_iter()
            .enumerate()
            .find(|(idx, p)| endpoint_id(&p.id(), *idx) == sub.sender)
            .map(|(_, p)| p)
            .ok_or(BackendError::PortNotFound(sub.sender))?;

        let state = InputState {
            source: sub.sender,
            sysex_open: false,
            tx: self.tx.clone(),
        };
        let connection = midi_in
            .connect(&port, INPUT_PORT_NAME, on_input, state)
            .map_err(|e| fail(e.to_string()))?;

        self.inputs().insert(sub.sender, connection);
        Ok(())
    }

    fn open_output(&self, sub: &Subscription) -> Result<(), BackendError> {
        let fail = |reason: String| BackendError::Subscribe { sub: *sub, reason };

        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| fail(e.to_string()))?;
        let port = midi_out
            .ports()
            .into_iter()
            .enumerate()
            .find(|(idx, p)| endpoint_id(&p.id(), *idx) == sub.dest)
            .map(|(_, p)| p)
            .ok_or(BackendError::PortNotFound(sub.dest))?;

        let connection = midi_out
            .connect(&port, OUTPUT_PORT_NAME)
            .map_err(|e| fail(e.to_string()))?;

        self.outputs().insert(sub.dest, connection);
        Ok(())
    }

    fn list_inputs(&self, endpoints: &mut Vec<EndpointInfo>) -> Result<(), BackendError> {
        let midi_in =
            MidiInput::new(CLIENT_NAME).map_err(|e| BackendError::Enumerate(e.to_string()))?;
        for (idx, port) in midi_in.ports().iter().enumerate() {
            match midi_in.port_name(port) {
                Ok(name) => merge_endpoint(
                    endpoints,
                    endpoint_id(&port.id(), idx),
                    name,
                    PortCaps::READ | PortCaps::SUBS_READ,
                ),
                Err(e) => warn!("Skipping input port {}: {}", port.id(), e),
            }
        }
        Ok(())
    }

    fn list_outputs(&self, endpoints: &mut Vec<EndpointInfo>) -> Result<(), BackendError> {
        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| BackendError::Enumerate(e.to_string()))?;
        for (idx, port) in midi_out.ports().iter().enumerate() {
            match midi_out.port_name(port) {
                Ok(name) => merge_endpoint(
                    endpoints,
                    endpoint_id(&port.id(), idx),
                    name,
                    PortCaps::WRITE | PortCaps::SUBS_WRITE,
                ),
                Err(e) => warn!("Skipping output port {}: {}", port.id(), e),
            }
        }
        Ok(())
    }
}

impl MidiBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn self_client(&self) -> u32 {
        NATIVE_SELF_CLIENT
    }

    fn announces_clients(&self) -> bool {
        false
    }

    fn enumerate(&self) -> Result<Vec<EndpointInfo>, BackendError> {
        let mut endpoints = Vec::new();
        let inputs = self.list_inputs(&mut endpoints);
        let outputs = self.list_outputs(&mut endpoints);
        endpoints.retain(|e| !is_own_port(&e.name));

        match (inputs, outputs) {
            (Err(e), Err(_)) => Err(e),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                warn!("Partial port enumeration: {}", e);
                Ok(endpoints)
            }
            (Ok(()), Ok(())) => Ok(endpoints),
        }
    }

    fn subscribe(&self, sub: &Subscription) -> Result<(), BackendError> {
        let local = self.local_endpoint();
        if sub.dest == local {
            self.open_input(sub)?;
        } else if sub.sender == local {
            self.open_output(sub)?;
        } else {
            return Err(BackendError::Subscribe {
                sub: *sub,
                reason: "only links to this application are supported".to_string(),
            });
        }

        debug!("native: subscribed {}", sub);
        self.post(RawEvent::PortSubscribed(*sub))
    }

    fn unsubscribe(&self, sub: &Subscription) -> Result<(), BackendError> {
        let local = self.local_endpoint();
        let closed = if sub.dest == local {
            self.inputs().remove(&sub.sender).map(|conn| {
                conn.close();
            })
        } else if sub.sender == local {
            self.outputs().remove(&sub.dest).map(|conn| {
                conn.close();
            })
        } else {
            None
        };

        if closed.is_none() {
            return Err(BackendError::NotSubscribed(*sub));
        }
        debug!("native: unsubscribed {}", sub);
        self.post(RawEvent::PortUnsubscribed(*sub))
    }

    fn send(&self, dest: ClientPortId, message: &[u8]) -> Result<(), BackendError> {
        let mut outputs = self.outputs();
        let conn = outputs.get_mut(&dest).ok_or_else(|| BackendError::Send {
            dest,
            reason: "destination is not subscribed".to_string(),
        })?;
        conn.send(message).map_err(|e| BackendError::Send {
            dest,
            reason: e.to_string(),
        })
    }

    fn read_event(&self) -> Result<RawEvent, BackendError> {
        self.rx.recv().map_err(|_| BackendError::Closed)
    }

    fn post(&self, event: RawEvent) -> Result<(), BackendError> {
        self.tx.send(event).map_err(|_| BackendError::Closed)
    }
}

/// midir input callback: classify each chunk and queue it for the listener
fn on_input(_stamp: u64, message: &[u8], state: &mut InputState) {
    let source = state.source;
    let event = match validation::classify(message, state.sysex_open) {
        Some(MessageKind::SysExStart) | Some(MessageKind::SysExContinuation) => {
            state.sysex_open = !validation::ends_sysex(message);
            RawEvent::SysEx {
                source,
                data: message.to_vec(),
            }
        }
        Some(MessageKind::ActiveSensing) => RawEvent::Sensing { source },
        Some(MessageKind::Other) => RawEvent::Other {
            source,
            data: message.to_vec(),
        },
        None => {
            trace!("Dropping malformed input from {}: {:02X?}", source, message);
            return;
        }
    };

    if state.tx.send(event).is_err() {
        trace!("Input queue closed, dropping event from {}", source);
    }
}

/// Derives a (client, port) pair from a midir port id.
/// ALSA ids read "client:port", CoreMIDI ids are a unique integer;
/// anything else falls back to the enumeration index.
pub fn endpoint_id(raw: &str, index: usize) -> ClientPortId {
    if let Some((client, port)) = raw.split_once(':') {
        if let (Ok(client), Ok(port)) = (client.trim().parse(), port.trim().parse()) {
            return ClientPortId::new(client, port);
        }
    }
    if let Ok(unique) = raw.trim().parse::<i32>() {
        return ClientPortId::new(unique as u32, 0);
    }
    ClientPortId::new(FALLBACK_CLIENT_BASE + index as u32, 0)
}

/// Client part of a midir port name ("Client:Port 20:0" on ALSA)
pub fn client_name_of(port_name: &str) -> &str {
    port_name
        .split_once(':')
        .map(|(client, _)| client)
        .unwrap_or(port_name)
}

/// True for the ports our own connections open ("stompsync:stompsync-in 129:0").
/// Other clients that happen to share our client name are kept.
fn is_own_port(port_name: &str) -> bool {
    let Some((client, rest)) = port_name.split_once(':') else {
        return false;
    };
    let port = rest.rsplit_once(' ').map_or(rest, |(port, _)| port);
    client == CLIENT_NAME && (port == INPUT_PORT_NAME || port == OUTPUT_PORT_NAME)
}

/// Adds an endpoint, or widens the caps of one already listed under the same id
fn merge_endpoint(endpoints: &mut Vec<EndpointInfo>, id: ClientPortId, name: String, caps: PortCaps) {
    if let Some(existing) = endpoints.iter_mut().find(|e| e.id == id) {
        existing.caps = existing.caps | caps;
        return;
    }
    endpoints.push(EndpointInfo {
        id,
        client_name: client_name_of(&name).to_string(),
        name,
        caps,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alsa_style_id() {
        assert_eq!(endpoint_id("20:0", 3), ClientPortId::new(20, 0));
        assert_eq!(endpoint_id("128:1", 0), ClientPortId::new(128, 1));
    }

    #[test]
    fn test_coremidi_style_id() {
        assert_eq!(endpoint_id("1234567", 0), ClientPortId::new(1234567, 0));
        assert_eq!(endpoint_id("-5", 0), ClientPortId::new(-5i32 as u32, 0));
    }

    #[test]
    fn test_fallback_id() {
        assert_eq!(endpoint_id("\\\\?\\usb#vid_0499", 2), ClientPortId::new(FALLBACK_CLIENT_BASE + 2, 0));
        assert_eq!(endpoint_id("a:b", 0), ClientPortId::new(FALLBACK_CLIENT_BASE, 0));
    }

    #[test]
    fn test_client_name() {
        assert_eq!(client_name_of("Magicstomp:Magicstomp MIDI 1 20:0"), "Magicstomp");
        assert_eq!(client_name_of("IAC Driver Bus 1"), "IAC Driver Bus 1");
    }

    #[test]
    fn test_only_our_connection_ports_are_hidden() {
        assert!(is_own_port("stompsync:stompsync-in 129:0"));
        assert!(is_own_port("stompsync:stompsync-out 129:1"));
        assert!(is_own_port("stompsync:stompsync-in"));

        // Another client registered under the same name
        assert!(!is_own_port("stompsync:Editor Out 130:0"));
        assert!(!is_own_port("Magicstomp:stompsync-in 20:0"));
        assert!(!is_own_port("stompsync-in"));
    }

    #[test]
    fn test_merge_widens_caps() {
        let mut endpoints = Vec::new();
        let id = ClientPortId::new(20, 0);
        merge_endpoint(&mut endpoints, id, "Magicstomp:Port 20:0".to_string(), PortCaps::READ);
        merge_endpoint(&mut endpoints, id, "Magicstomp:Port 20:0".to_string(), PortCaps::WRITE);

        assert_eq!(endpoints.len(), 1);
        assert!(endpoints[0].caps.contains(PortCaps::READ | PortCaps::WRITE));
        assert_eq!(endpoints[0].client_name, "Magicstomp");
    }

    #[test]
    fn test_callback_tracks_sysex_transfer() {
        let (tx, rx) = unbounded();
        let source = ClientPortId::new(20, 0);
        let mut state = InputState { source, sysex_open: false, tx };

        on_input(0, &[0xF0, 0x43, 0x7D], &mut state);
        on_input(1, &[0xFE], &mut state);
        on_input(2, &[0x30, 0xF7], &mut state);
        on_input(3, &[0x30, 0x01], &mut state);

        assert_eq!(rx.try_recv().unwrap(), RawEvent::SysEx { source, data: vec![0xF0, 0x43, 0x7D] });
        assert_eq!(rx.try_recv().unwrap(), RawEvent::Sensing { source });
        assert_eq!(rx.try_recv().unwrap(), RawEvent::SysEx { source, data: vec![0x30, 0xF7] });
        // Transfer closed, so stray data bytes are dropped
        assert!(rx.try_recv().is_err());
        assert!(!state.sysex_open);
    }
}
