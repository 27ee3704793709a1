use super::{BackendError, EndpointInfo, MidiBackend, RawEvent, CLIENT_NAME};
use crate::connection::{ClientPortId, PortCaps, Subscription, SYSTEM_CLIENT};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Client id the loopback bus hands to this application
pub const LOOPBACK_SELF_CLIENT: u32 = 128;

/// Client id of the simulated effect processor in demo mode
pub const DEMO_DEVICE_CLIENT: u32 = 20;

const DEMO_THROUGH_CLIENT: u32 = 14;

/// Fragment size used when echoing messages back in demo mode
const DEMO_FRAGMENT_SIZE: usize = 4;

const DUPLEX: PortCaps = PortCaps::READ
    .union(PortCaps::SUBS_READ)
    .union(PortCaps::WRITE)
    .union(PortCaps::SUBS_WRITE);

struct LoopPort {
    port: u32,
    name: String,
    caps: PortCaps,
}

struct LoopClient {
    id: u32,
    name: String,
    ports: Vec<LoopPort>,
}

struct Bus {
    clients: Vec<LoopClient>,
    subscriptions: HashSet<Subscription>,
    fail_subscriptions: bool,
    fail_enumerate: bool,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    sent: Vec<(ClientPortId, Vec<u8>)>,
    // 0 disables echoing sent messages back
    echo_fragment_size: usize,
}

impl Bus {
    fn has_port(&self, id: ClientPortId) -> bool {
        self.clients
            .iter()
            .filter(|c| c.id == id.client_id())
            .flat_map(|c| c.ports.iter())
            .any(|p| p.port == id.port_id())
    }
}

/// In-process MIDI bus
///
/// Behaves like a sequencer: clients and ports can come and go, subscriptions
/// are announced on the input queue, and messages sent to a destination that
/// is also subscribed as a source are echoed back in fragments.
pub struct LoopbackBackend {
    bus: Mutex<Bus>,
    tx: Mutex<Option<Sender<RawEvent>>>,
    rx: Receiver<RawEvent>,
}

impl LoopbackBackend {
    /// A bus holding only the system client and our own client
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let bus = Bus {
            clients: vec![
                LoopClient {
                    id: SYSTEM_CLIENT,
                    name: "System".to_string(),
                    ports: vec![
                        LoopPort {
                            port: 0,
                            name: "Timer".to_string(),
                            caps: PortCaps::READ | PortCaps::WRITE | PortCaps::SUBS_READ,
                        },
                        LoopPort {
                            port: 1,
                            name: "Announce".to_string(),
                            caps: PortCaps::READ | PortCaps::SUBS_READ,
                        },
                    ],
                },
                LoopClient {
                    id: LOOPBACK_SELF_CLIENT,
                    name: CLIENT_NAME.to_string(),
                    ports: vec![LoopPort {
                        port: 0,
                        name: "io".to_string(),
                        caps: DUPLEX,
                    }],
                },
            ],
            subscriptions: HashSet::new(),
            fail_subscriptions: false,
            fail_enumerate: false,
            subscribe_calls: 0,
            unsubscribe_calls: 0,
            sent: Vec::new(),
            echo_fragment_size: 0,
        };

        Self {
            bus: Mutex::new(bus),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// A bus with a through port and a simulated Magicstomp that echoes SysEx
    pub fn demo() -> Self {
        let backend = Self::new();
        backend.add_client(DEMO_THROUGH_CLIENT, "Midi Through");
        backend.add_port(DEMO_THROUGH_CLIENT, 0, "Midi Through Port-0", DUPLEX);
        backend.add_client(DEMO_DEVICE_CLIENT, "Magicstomp");
        backend.add_port(DEMO_DEVICE_CLIENT, 0, "Magicstomp MIDI 1", DUPLEX);
        backend.set_echo_fragment_size(DEMO_FRAGMENT_SIZE);
        // Announcements made while seeding are not news to anyone
        while backend.rx.try_recv().is_ok() {}
        backend
    }

    fn bus(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a client without ports and announces it
    pub fn add_client(&self, id: u32, name: &str) {
        self.bus().clients.push(LoopClient {
            id,
            name: name.to_string(),
            ports: Vec::new(),
        });
        let _ = self.post(RawEvent::ClientStart(ClientPortId::new(id, 0)));
    }

    /// Adds a port to an existing client; ignored if the client is unknown
    pub fn add_port(&self, client: u32, port: u32, name: &str, caps: PortCaps) {
        let mut bus = self.bus();
        if let Some(c) = bus.clients.iter_mut().find(|c| c.id == client) {
            c.ports.push(LoopPort {
                port,
                name: name.to_string(),
                caps,
            });
        }
    }

    /// Removes a client with all its ports and subscriptions and announces its exit
    pub fn remove_client(&self, id: u32) {
        {
            let mut bus = self.bus();
            bus.clients.retain(|c| c.id != id);
            bus.subscriptions
                .retain(|s| s.sender.client_id() != id && s.dest.client_id() != id);
        }
        let _ = self.post(RawEvent::ClientExit(ClientPortId::new(id, 0)));
    }

    /// Makes every following subscribe and unsubscribe call fail
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.bus().fail_subscriptions = fail;
    }

    pub fn set_fail_enumerate(&self, fail: bool) {
        self.bus().fail_enumerate = fail;
    }

    /// Echo messages sent to a subscribed duplex port back in fragments of this size (0 = off)
    pub fn set_echo_fragment_size(&self, size: usize) {
        self.bus().echo_fragment_size = size;
    }

    pub fn subscribe_calls(&self) -> usize {
        self.bus().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.bus().unsubscribe_calls
    }

    pub fn is_subscribed(&self, sub: &Subscription) -> bool {
        self.bus().subscriptions.contains(sub)
    }

    /// Every message handed to `send`, in order
    pub fn sent(&self) -> Vec<(ClientPortId, Vec<u8>)> {
        self.bus().sent.clone()
    }

    /// Closes the input queue; a blocked `read_event` returns `Closed` once it is drained
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for LoopbackBackend {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn self_client(&self) -> u32 {
        LOOPBACK_SELF_CLIENT
    }

    fn enumerate(&self) -> Result<Vec<EndpointInfo>, BackendError> {
        let bus = self.bus();
        if bus.fail_enumerate {
            return Err(BackendError::Enumerate("loopback bus unavailable".to_string()));
        }

        Ok(bus
            .clients
            .iter()
            .flat_map(|c| {
                c.ports.iter().map(move |p| EndpointInfo {
                    id: ClientPortId::new(c.id, p.port),
                    client_name: c.name.clone(),
                    name: p.name.clone(),
                    caps: p.caps,
                })
            })
            .collect())
    }

    fn subscribe(&self, sub: &Subscription) -> Result<(), BackendError> {
        {
            let mut bus = self.bus();
            bus.subscribe_calls += 1;
            if bus.fail_subscriptions {
                return Err(BackendError::Subscribe {
                    sub: *sub,
                    reason: "refused by loopback bus".to_string(),
                });
            }
            for id in [sub.sender, sub.dest] {
                if !bus.has_port(id) {
                    return Err(BackendError::PortNotFound(id));
                }
            }
            bus.subscriptions.insert(*sub);
        }
        debug!("loopback: subscribed {}", sub);
        self.post(RawEvent::PortSubscribed(*sub))
    }

    fn unsubscribe(&self, sub: &Subscription) -> Result<(), BackendError> {
        {
            let mut bus = self.bus();
            bus.unsubscribe_calls += 1;
            if bus.fail_subscriptions {
                return Err(BackendError::Subscribe {
                    sub: *sub,
                    reason: "refused by loopback bus".to_string(),
                });
            }
            if !bus.subscriptions.remove(sub) {
                return Err(BackendError::NotSubscribed(*sub));
            }
        }
        debug!("loopback: unsubscribed {}", sub);
        self.post(RawEvent::PortUnsubscribed(*sub))
    }

    fn send(&self, dest: ClientPortId, message: &[u8]) -> Result<(), BackendError> {
        let local = self.local_endpoint();
        let fragments = {
            let mut bus = self.bus();
            if !bus.subscriptions.contains(&Subscription::new(local, dest)) {
                return Err(BackendError::Send {
                    dest,
                    reason: "destination is not subscribed".to_string(),
                });
            }
            bus.sent.push((dest, message.to_vec()));

            let echoes = bus.echo_fragment_size > 0
                && message.first() == Some(&0xF0)
                && bus.subscriptions.contains(&Subscription::new(dest, local));
            if echoes {
                message
                    .chunks(bus.echo_fragment_size)
                    .map(|chunk| chunk.to_vec())
                    .collect()
            } else {
                Vec::new()
            }
        };

        for data in fragments {
            self.post(RawEvent::SysEx { source: dest, data })?;
        }
        Ok(())
    }

    fn read_event(&self) -> Result<RawEvent, BackendError> {
        self.rx.recv().map_err(|_| BackendError::Closed)
    }

    fn post(&self, event: RawEvent) -> Result<(), BackendError> {
        match self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.send(event).map_err(|_| BackendError::Closed),
            None => Err(BackendError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_includes_reserved_clients() {
        let backend = LoopbackBackend::new();
        let clients: Vec<u32> = backend
            .enumerate()
            .unwrap()
            .iter()
            .map(|e| e.id.client_id())
            .collect();

        assert_eq!(clients, vec![SYSTEM_CLIENT, SYSTEM_CLIENT, LOOPBACK_SELF_CLIENT]);
    }

    #[test]
    fn test_subscribe_announces() {
        let backend = LoopbackBackend::demo();
        let sub = Subscription::new(ClientPortId::new(DEMO_DEVICE_CLIENT, 0), backend.local_endpoint());

        backend.subscribe(&sub).unwrap();

        assert!(backend.is_subscribed(&sub));
        assert_eq!(backend.read_event().unwrap(), RawEvent::PortSubscribed(sub));
    }

    #[test]
    fn test_subscribe_unknown_port() {
        let backend = LoopbackBackend::new();
        let sub = Subscription::new(ClientPortId::new(99, 0), backend.local_endpoint());

        assert!(matches!(backend.subscribe(&sub), Err(BackendError::PortNotFound(_))));
        assert!(matches!(backend.unsubscribe(&sub), Err(BackendError::NotSubscribed(_))));
    }

    #[test]
    fn test_send_echoes_fragments() {
        let backend = LoopbackBackend::demo();
        let device = ClientPortId::new(DEMO_DEVICE_CLIENT, 0);
        let local = backend.local_endpoint();
        backend.subscribe(&Subscription::new(device, local)).unwrap();
        backend.subscribe(&Subscription::new(local, device)).unwrap();
        while backend.rx.try_recv().is_ok() {}

        backend.send(device, &[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]).unwrap();

        assert_eq!(
            backend.read_event().unwrap(),
            RawEvent::SysEx { source: device, data: vec![0xF0, 0x7E, 0x7F, 0x06] }
        );
        assert_eq!(
            backend.read_event().unwrap(),
            RawEvent::SysEx { source: device, data: vec![0x01, 0xF7] }
        );
        assert_eq!(backend.sent().len(), 1);
    }

    #[test]
    fn test_send_requires_subscription() {
        let backend = LoopbackBackend::demo();

        let result = backend.send(ClientPortId::new(DEMO_DEVICE_CLIENT, 0), &[0xF0, 0xF7]);

        assert!(matches!(result, Err(BackendError::Send { .. })));
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_close_ends_reads() {
        let backend = LoopbackBackend::new();
        backend.post(RawEvent::Sensing { source: ClientPortId::new(20, 0) }).unwrap();
        backend.close();

        assert!(backend.read_event().is_ok());
        assert!(matches!(backend.read_event(), Err(BackendError::Closed)));
        assert!(matches!(
            backend.post(RawEvent::ClientStart(ClientPortId::new(1, 0))),
            Err(BackendError::Closed)
        ));
    }
}
