//! MIDI client hot-plug monitoring by polling
//! Backends without announce events get a thread that re-enumerates the bus
//! on an interval and posts ClientStart/ClientExit into the backend queue,
//! where the input listener picks them up like any other topology change.

use crate::connection::ClientPortId;
use crate::midi::backend::{MidiBackend, RawEvent};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Handle for a running monitor thread
pub struct PortMonitor {
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PortMonitor {
    /// Start polling `backend` every `interval`
    pub fn start(backend: Arc<dyn MidiBackend>, interval: Duration) -> std::io::Result<Self> {
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);

        // Baseline is taken before returning so nothing added afterwards is missed
        let mut previous = match backend.enumerate() {
            Ok(endpoints) => client_set(endpoints.iter().map(|e| e.id)),
            Err(e) => {
                warn!("Initial enumeration for monitor failed: {}", e);
                BTreeSet::new()
            }
        };

        let handle = thread::Builder::new()
            .name("midi-monitor".to_string())
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if !flag.load(Ordering::Relaxed) {
                        break;
                    }

                    let current = match backend.enumerate() {
                        Ok(endpoints) => client_set(endpoints.iter().map(|e| e.id)),
                        Err(e) => {
                            debug!("Monitor enumeration failed: {}", e);
                            continue;
                        }
                    };

                    for event in diff(&previous, &current) {
                        if backend.post(event).is_err() {
                            debug!("Backend queue closed, monitor exiting");
                            return;
                        }
                    }
                    previous = current;
                }
            })?;

        Ok(Self {
            active,
            handle: Some(handle),
        })
    }

    /// Stop monitoring; returns once the thread has noticed
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PortMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn client_set(ids: impl Iterator<Item = ClientPortId>) -> BTreeSet<u32> {
    ids.map(|id| id.client_id()).collect()
}

/// Events describing how the set of clients changed
fn diff(previous: &BTreeSet<u32>, current: &BTreeSet<u32>) -> Vec<RawEvent> {
    let started = current
        .difference(previous)
        .map(|c| RawEvent::ClientStart(ClientPortId::new(*c, 0)));
    let exited = previous
        .difference(current)
        .map(|c| RawEvent::ClientExit(ClientPortId::new(*c, 0)));
    exited.chain(started).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PortCaps;
    use crate::midi::backend::LoopbackBackend;

    #[test]
    fn test_diff() {
        let previous: BTreeSet<u32> = [14, 20].into_iter().collect();
        let current: BTreeSet<u32> = [14, 24].into_iter().collect();

        assert_eq!(
            diff(&previous, &current),
            vec![
                RawEvent::ClientExit(ClientPortId::new(20, 0)),
                RawEvent::ClientStart(ClientPortId::new(24, 0)),
            ]
        );
        assert!(diff(&current, &current).is_empty());
    }

    #[test]
    fn test_monitor_posts_new_client() {
        let backend = Arc::new(LoopbackBackend::new());
        let mut monitor = PortMonitor::start(backend.clone(), Duration::from_millis(10)).unwrap();

        backend.add_client(30, "Late");
        backend.add_port(30, 0, "Late", PortCaps::READ);
        // The bus announces the client itself first
        assert_eq!(backend.read_event().unwrap(), RawEvent::ClientStart(ClientPortId::new(30, 0)));

        let polled = backend.read_event().unwrap();
        monitor.stop();

        assert_eq!(polled, RawEvent::ClientStart(ClientPortId::new(30, 0)));
    }
}
