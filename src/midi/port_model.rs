use crate::connection::{ClientPortId, Direction, PortEntry, Subscription, SYSTEM_CLIENT};
use crate::midi::backend::{BackendError, MidiBackend};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Change notifications published by a [`PortModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChange {
    /// The whole list was rebuilt
    Reset,
    /// Only the row at this index changed
    RowChanged(usize),
}

/// What a view needs to draw one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRow<'a> {
    pub name: &'a str,
    pub id: ClientPortId,
    pub connected: bool,
}

/// Observable list of the endpoints of one direction, with connection state
///
/// Lives on the main thread. Connection changes seen by the input listener
/// reach it only through [`PortModel::notify_port_changed`] and rescans.
pub struct PortModel {
    direction: Direction,
    backend: Arc<dyn MidiBackend>,
    ports: Vec<PortEntry>,
    connections: HashSet<ClientPortId>,
    observers: Vec<Sender<ModelChange>>,
    rollback_on_failure: bool,
}

impl PortModel {
    pub fn new(direction: Direction, backend: Arc<dyn MidiBackend>) -> Self {
        Self {
            direction,
            backend,
            ports: Vec::new(),
            connections: HashSet::new(),
            observers: Vec::new(),
            rollback_on_failure: false,
        }
    }

    /// Revert the local connection set when the OS call fails
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback_on_failure = rollback;
        self
    }

    /// Registers an observer; it receives every change from now on
    pub fn observe(&mut self) -> Receiver<ModelChange> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    fn publish(&mut self, change: ModelChange) {
        // Observers that went away are forgotten
        self.observers.retain(|tx| tx.send(change).is_ok());
    }

    /// Re-queries the backend and replaces the whole list.
    /// Returns the number of ports listed.
    pub fn scan(&mut self) -> usize {
        self.ports.clear();

        match self.backend.enumerate() {
            Ok(endpoints) => {
                let required = self.direction.required_caps();
                let self_client = self.backend.self_client();

                for endpoint in endpoints {
                    let client = endpoint.id.client_id();
                    debug!("Client {:3} '{}' port {}", client, endpoint.client_name, endpoint.name);
                    if client == SYSTEM_CLIENT || client == self_client {
                        continue;
                    }
                    if endpoint.caps.intersects(required) {
                        self.ports.push(PortEntry::new(endpoint.id, endpoint.name));
                    }
                }
            }
            Err(e) => warn!("Scanning {} failed, list left empty: {}", self.direction, e),
        }

        let listed: HashSet<ClientPortId> = self.ports.iter().map(|p| p.id).collect();
        let before = self.connections.len();
        self.connections.retain(|id| listed.contains(id));
        if self.connections.len() != before {
            debug!(
                "Dropped {} connection(s) to {} that disappeared",
                before - self.connections.len(),
                self.direction
            );
        }

        self.publish(ModelChange::Reset);
        self.ports.len()
    }

    pub fn row_count(&self) -> usize {
        self.ports.len()
    }

    pub fn data_at(&self, index: usize) -> Option<PortRow<'_>> {
        self.ports.get(index).map(|entry| PortRow {
            name: &entry.name,
            id: entry.id,
            connected: self.is_connected(entry.id),
        })
    }

    pub fn is_connected(&self, id: ClientPortId) -> bool {
        self.connections.contains(&id)
    }

    /// Ids currently in the connection set
    pub fn connected(&self) -> impl Iterator<Item = ClientPortId> + '_ {
        self.connections.iter().copied()
    }

    pub fn row_of(&self, id: ClientPortId) -> Option<usize> {
        self.ports.iter().position(|p| p.id == id)
    }

    /// Connects or disconnects `src` → `dest`.
    ///
    /// Only the endpoint on this model's side is tracked. Asking for the
    /// state the model already has is a no-op that succeeds without touching
    /// the OS. Otherwise the local set is updated first, then the OS call is
    /// made and its outcome returned.
    pub fn connect(
        &mut self,
        src: ClientPortId,
        dest: ClientPortId,
        enable: bool,
    ) -> Result<(), BackendError> {
        let sub = Subscription::new(src, dest);
        let tracked = self.direction.tracked(&sub);

        if self.is_connected(tracked) == enable {
            return Ok(());
        }

        self.set_connected(tracked, enable);

        let result = if enable {
            self.backend.subscribe(&sub)
        } else {
            self.backend.unsubscribe(&sub)
        };

        match &result {
            Ok(()) => {
                let verb = if enable { "Connected" } else { "Disconnected" };
                info!("{} {}", verb, sub);
            }
            Err(e) => {
                warn!("OS call for {} failed: {}", sub, e);
                if self.rollback_on_failure {
                    self.set_connected(tracked, !enable);
                }
            }
        }
        result
    }

    fn set_connected(&mut self, id: ClientPortId, connected: bool) {
        if connected {
            self.connections.insert(id);
        } else {
            self.connections.remove(&id);
        }
        self.notify_port_changed(id);
    }

    /// Emits a row change for `id` if it is still listed
    pub fn notify_port_changed(&mut self, id: ClientPortId) {
        if let Some(row) = self.row_of(id) {
            self.publish(ModelChange::RowChanged(row));
        }
    }
}
