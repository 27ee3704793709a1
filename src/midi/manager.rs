use crate::connection::{ClientPortId, Direction, Subscription};
use crate::events::AppEvent;
use crate::midi::backend::MidiBackend;
use crate::midi::event::MidiEvent;
use crate::midi::listener::{InputListener, ListenerConfig};
use crate::midi::monitor::PortMonitor;
use crate::midi::port_model::PortModel;
use anyhow::{anyhow, Result};
use crossbeam::channel::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub listener: ListenerConfig,
    pub rollback_on_failure: bool,
    pub poll_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            rollback_on_failure: false,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Owns the backend, one port model per direction, the input listener and,
/// for backends that need it, the hot-plug monitor
pub struct MidiManager {
    backend: Arc<dyn MidiBackend>,
    readable: PortModel,
    writable: PortModel,
    listener: Option<InputListener>,
    monitor: Option<PortMonitor>,
}

impl MidiManager {
    /// Creates the models and starts the background threads
    pub fn new(
        backend: Arc<dyn MidiBackend>,
        event_tx: Sender<AppEvent>,
        options: ManagerOptions,
    ) -> Result<Self> {
        let readable = PortModel::new(Direction::Readable, Arc::clone(&backend))
            .with_rollback(options.rollback_on_failure);
        let writable = PortModel::new(Direction::Writable, Arc::clone(&backend))
            .with_rollback(options.rollback_on_failure);

        let listener = InputListener::spawn(Arc::clone(&backend), event_tx, options.listener)?;

        let monitor = if backend.announces_clients() {
            None
        } else {
            Some(PortMonitor::start(Arc::clone(&backend), options.poll_interval)?)
        };

        info!("MIDI manager running on {} backend", backend.name());

        Ok(Self {
            backend,
            readable,
            writable,
            listener: Some(listener),
            monitor,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// False once the input thread has exited, for whatever reason
    pub fn listener_running(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| l.is_running())
    }

    pub fn model(&self, direction: Direction) -> &PortModel {
        match direction {
            Direction::Readable => &self.readable,
            Direction::Writable => &self.writable,
        }
    }

    pub fn model_mut(&mut self, direction: Direction) -> &mut PortModel {
        match direction {
            Direction::Readable => &mut self.readable,
            Direction::Writable => &mut self.writable,
        }
    }

    /// Rescans both directions, returning (sources, destinations)
    pub fn scan_all(&mut self) -> (usize, usize) {
        (self.readable.scan(), self.writable.scan())
    }

    /// The subscription linking `remote` to this application for a direction
    fn link(&self, direction: Direction, remote: ClientPortId) -> Subscription {
        let local = self.backend.local_endpoint();
        match direction {
            Direction::Readable => Subscription::new(remote, local),
            Direction::Writable => Subscription::new(local, remote),
        }
    }

    /// Flips the connection of the port at `row`. Returns the new state.
    pub fn toggle(&mut self, direction: Direction, row: usize) -> Result<bool> {
        let (id, connected) = self
            .model(direction)
            .data_at(row)
            .map(|r| (r.id, r.connected))
            .ok_or_else(|| anyhow!("no {} port at row {}", direction, row))?;

        let sub = self.link(direction, id);
        let enable = !connected;
        self.model_mut(direction)
            .connect(sub.sender, sub.dest, enable)?;
        Ok(enable)
    }

    /// Reacts to an event from the listener on the main thread
    pub fn handle_event(&mut self, event: &MidiEvent) {
        match event {
            MidiEvent::Client { addr, started } => {
                debug!("Client {} {}, rescanning", addr.client_id(), if *started { "started" } else { "exited" });
                self.scan_all();
            }
            MidiEvent::PortSubscription { sender, dest, .. } => {
                for id in [*sender, *dest] {
                    self.readable.notify_port_changed(id);
                    self.writable.notify_port_changed(id);
                }
            }
            MidiEvent::SysEx { .. } | MidiEvent::SysExOverflow { .. } => {}
        }
    }

    /// Sends one message to every connected destination. Returns how many accepted it.
    pub fn send_sysex(&self, message: &[u8]) -> usize {
        let mut delivered = 0;
        for dest in self.writable.connected() {
            match self.backend.send(dest, message) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Send to {} failed: {}", dest, e),
            }
        }
        delivered
    }

    /// Tears down our subscriptions, then stops the monitor and the listener
    pub fn shutdown(&mut self) {
        for direction in [Direction::Readable, Direction::Writable] {
            let connected: Vec<ClientPortId> = self.model(direction).connected().collect();
            for id in connected {
                let sub = self.link(direction, id);
                if let Err(e) = self.model_mut(direction).connect(sub.sender, sub.dest, false) {
                    debug!("Leaving {} on shutdown: {}", sub, e);
                }
            }
        }

        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
    }
}

impl Drop for MidiManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::backend::loopback::{DEMO_DEVICE_CLIENT, LOOPBACK_SELF_CLIENT};
    use crate::midi::backend::LoopbackBackend;
    use crate::midi::validation::identity_request;
    use crate::midi::ModelChange;
    use crossbeam::channel::{unbounded, Receiver};

    fn demo() -> (Arc<LoopbackBackend>, MidiManager, Receiver<AppEvent>) {
        let backend = Arc::new(LoopbackBackend::demo());
        let (tx, rx) = unbounded();
        let mut manager = MidiManager::new(backend.clone(), tx, ManagerOptions::default()).unwrap();
        manager.scan_all();
        (backend, manager, rx)
    }

    fn device_row(manager: &MidiManager, direction: Direction) -> usize {
        manager
            .model(direction)
            .row_of(ClientPortId::new(DEMO_DEVICE_CLIENT, 0))
            .unwrap()
    }

    fn next_midi(rx: &Receiver<AppEvent>) -> MidiEvent {
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            AppEvent::Midi(event) => event,
            AppEvent::Error(e) => panic!("unexpected error event: {}", e),
        }
    }

    #[test]
    fn test_demo_bus_lists_devices() {
        let (_backend, manager, _rx) = demo();

        assert_eq!(manager.model(Direction::Readable).row_count(), 2);
        assert_eq!(manager.model(Direction::Writable).row_count(), 2);
        assert_eq!(manager.backend_name(), "loopback");
    }

    #[test]
    fn test_toggle_subscribes_and_announces() {
        let (backend, mut manager, rx) = demo();
        let row = device_row(&manager, Direction::Readable);
        let device = ClientPortId::new(DEMO_DEVICE_CLIENT, 0);
        let local = ClientPortId::new(LOOPBACK_SELF_CLIENT, 0);

        assert!(manager.toggle(Direction::Readable, row).unwrap());

        assert!(backend.is_subscribed(&Subscription::new(device, local)));
        assert_eq!(
            next_midi(&rx),
            MidiEvent::PortSubscription { sender: device, dest: local, connected: true }
        );

        assert!(!manager.toggle(Direction::Readable, row).unwrap());
        assert!(!backend.is_subscribed(&Subscription::new(device, local)));
    }

    #[test]
    fn test_toggle_missing_row() {
        let (_backend, mut manager, _rx) = demo();

        assert!(manager.toggle(Direction::Writable, 99).is_err());
    }

    #[test]
    fn test_identity_request_round_trip() {
        let (backend, mut manager, rx) = demo();
        let device = ClientPortId::new(DEMO_DEVICE_CLIENT, 0);
        let source_row = device_row(&manager, Direction::Readable);
        let dest_row = device_row(&manager, Direction::Writable);
        manager.toggle(Direction::Readable, source_row).unwrap();
        manager.toggle(Direction::Writable, dest_row).unwrap();
        next_midi(&rx);
        next_midi(&rx);

        assert_eq!(manager.send_sysex(&identity_request(0x7F)), 1);

        // Echoed back in fragments, delivered as one message
        assert_eq!(
            next_midi(&rx),
            MidiEvent::SysEx { source: device, data: identity_request(0x7F) }
        );
        assert_eq!(backend.sent().len(), 1);
    }

    #[test]
    fn test_send_without_destinations() {
        let (backend, manager, _rx) = demo();

        assert_eq!(manager.send_sysex(&identity_request(0x7F)), 0);
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_client_exit_triggers_rescan() {
        let (backend, mut manager, rx) = demo();
        let changes = manager.model_mut(Direction::Readable).observe();

        backend.remove_client(DEMO_DEVICE_CLIENT);
        let event = next_midi(&rx);
        manager.handle_event(&event);

        assert_eq!(
            event,
            MidiEvent::Client { addr: ClientPortId::new(DEMO_DEVICE_CLIENT, 0), started: false }
        );
        assert_eq!(manager.model(Direction::Readable).row_count(), 1);
        assert_eq!(changes.try_recv(), Ok(ModelChange::Reset));
    }

    #[test]
    fn test_subscription_event_refreshes_rows() {
        let (_backend, mut manager, rx) = demo();
        let row = device_row(&manager, Direction::Readable);
        manager.toggle(Direction::Readable, row).unwrap();
        let changes = manager.model_mut(Direction::Readable).observe();

        let event = next_midi(&rx);
        manager.handle_event(&event);

        assert_eq!(changes.try_recv(), Ok(ModelChange::RowChanged(row)));
    }

    #[test]
    fn test_shutdown_tears_down_links() {
        let (backend, mut manager, _rx) = demo();
        let row = device_row(&manager, Direction::Writable);
        manager.toggle(Direction::Writable, row).unwrap();
        let sub = Subscription::new(
            ClientPortId::new(LOOPBACK_SELF_CLIENT, 0),
            ClientPortId::new(DEMO_DEVICE_CLIENT, 0),
        );
        assert!(backend.is_subscribed(&sub));

        manager.shutdown();

        assert!(!backend.is_subscribed(&sub));
        assert_eq!(manager.model(Direction::Writable).connected().count(), 0);
    }
}
