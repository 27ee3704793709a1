//! Input listener
//!
//! Runs on its own thread for the lifetime of the application, pulling raw
//! events off the backend's input queue, reassembling SysEx transfers that
//! arrive in fragments, and forwarding completed messages and topology
//! changes to the main context in arrival order.

use crate::connection::ClientPortId;
use crate::events::AppEvent;
use crate::midi::backend::{BackendError, MidiBackend, RawEvent};
use crate::midi::event::MidiEvent;
use crate::midi::validation::{ends_sysex, SYSEX_START};
use crossbeam::channel::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Default cap on a SysEx transfer that has not seen its terminator yet
pub const DEFAULT_MAX_SYSEX_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    /// 0 means unbounded
    pub max_sysex_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_sysex_bytes: DEFAULT_MAX_SYSEX_BYTES,
        }
    }
}

struct PendingSysEx {
    source: ClientPortId,
    data: Vec<u8>,
}

/// Joins SysEx fragments into complete messages.
///
/// Holds at most one transfer at a time: fragments from a second source
/// arriving before the first transfer ends are appended to it.
/// After an overflow the rest of that transfer is dropped up to its F7,
/// or until a fragment opens a new transfer with F0.
pub struct SysExAssembler {
    pending: Option<PendingSysEx>,
    limit: usize,
    discarding: bool,
}

impl SysExAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: None,
            limit,
            discarding: false,
        }
    }

    /// Bytes buffered for the transfer in progress
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.data.len())
    }

    /// Feeds one fragment. Returns the finished message once a fragment ends
    /// with 0xF7, or an overflow notice when the buffer outgrows the limit.
    pub fn push(&mut self, source: ClientPortId, fragment: &[u8]) -> Option<MidiEvent> {
        if fragment.is_empty() {
            return None;
        }

        if self.discarding {
            if fragment[0] == SYSEX_START {
                self.discarding = false;
            } else {
                self.discarding = !ends_sysex(fragment);
                trace!("Dropping {} byte(s) of overflowed SysEx from {}", fragment.len(), source);
                return None;
            }
        }

        let pending = self.pending.get_or_insert_with(|| PendingSysEx {
            source,
            data: Vec::new(),
        });
        if pending.source != source {
            debug!(
                "SysEx fragment from {} appended to transfer from {}",
                source, pending.source
            );
        }
        pending.data.extend_from_slice(fragment);

        if self.limit > 0 && pending.data.len() > self.limit {
            let dropped = self.pending.take()?;
            self.discarding = !ends_sysex(fragment);
            warn!(
                "SysEx from {} exceeded {} bytes without F7, discarding",
                dropped.source, self.limit
            );
            return Some(MidiEvent::SysExOverflow {
                source: dropped.source,
                discarded: dropped.data.len(),
            });
        }

        if ends_sysex(fragment) {
            let done = self.pending.take()?;
            return Some(MidiEvent::SysEx {
                source: done.source,
                data: done.data,
            });
        }
        None
    }
}

/// Outcome of handling one raw event
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Emit(MidiEvent),
    Nothing,
    Stop,
}

/// Turns raw backend events into application events
struct Dispatcher {
    assembler: SysExAssembler,
    self_client: u32,
}

impl Dispatcher {
    fn new(config: ListenerConfig, self_client: u32) -> Self {
        Self {
            assembler: SysExAssembler::new(config.max_sysex_bytes),
            self_client,
        }
    }

    fn handle(&mut self, event: RawEvent) -> Step {
        match event {
            RawEvent::SysEx { source, data } => match self.assembler.push(source, &data) {
                Some(done) => Step::Emit(done),
                None => Step::Nothing,
            },
            RawEvent::PortSubscribed(sub) => Step::Emit(MidiEvent::PortSubscription {
                sender: sub.sender,
                dest: sub.dest,
                connected: true,
            }),
            RawEvent::PortUnsubscribed(sub) => Step::Emit(MidiEvent::PortSubscription {
                sender: sub.sender,
                dest: sub.dest,
                connected: false,
            }),
            RawEvent::ClientStart(addr) => Step::Emit(MidiEvent::Client {
                addr,
                started: true,
            }),
            // Our own exit is the wake-up posted by InputListener::stop
            RawEvent::ClientExit(addr) if addr.client_id() == self.self_client => Step::Stop,
            RawEvent::ClientExit(addr) => Step::Emit(MidiEvent::Client {
                addr,
                started: false,
            }),
            RawEvent::Sensing { .. } => Step::Nothing,
            RawEvent::Other { source, data } => {
                trace!("Ignoring {:02X?} from {}", data, source);
                Step::Nothing
            }
        }
    }
}

/// Handle to the listener thread
pub struct InputListener {
    backend: Arc<dyn MidiBackend>,
    handle: Option<JoinHandle<()>>,
}

impl InputListener {
    /// Starts the listener thread
    pub fn spawn(
        backend: Arc<dyn MidiBackend>,
        event_tx: Sender<AppEvent>,
        config: ListenerConfig,
    ) -> std::io::Result<Self> {
        let thread_backend = Arc::clone(&backend);
        let handle = thread::Builder::new()
            .name("midi-in".to_string())
            .spawn(move || run(thread_backend, event_tx, config))?;

        Ok(Self {
            backend,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the thread and waits for it.
    ///
    /// The blocking read never sees the application closing its handle, so
    /// the thread is woken by posting a "client exit" for our own client.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let wake = RawEvent::ClientExit(self.backend.local_endpoint());
        if let Err(e) = self.backend.post(wake) {
            debug!("Listener wake-up not posted: {}", e);
        }
        if handle.join().is_err() {
            warn!("MIDI listener thread panicked");
        }
    }
}

impl Drop for InputListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(backend: Arc<dyn MidiBackend>, event_tx: Sender<AppEvent>, config: ListenerConfig) {
    let mut dispatcher = Dispatcher::new(config, backend.self_client());
    debug!("MIDI listener started on {} backend", backend.name());

    loop {
        let event = match backend.read_event() {
            Ok(event) => event,
            Err(BackendError::Closed) => {
                info!("MIDI input queue closed, listener exiting");
                break;
            }
            Err(e) => {
                warn!("MIDI input read failed, listener exiting: {}", e);
                let _ = event_tx.send(AppEvent::Error(format!("MIDI input stopped: {}", e)));
                break;
            }
        };
        trace!("raw event {:?}", event);

        match dispatcher.handle(event) {
            Step::Emit(midi_event) => {
                if event_tx.send(AppEvent::Midi(midi_event)).is_err() {
                    debug!("Application queue gone, listener exiting");
                    break;
                }
            }
            Step::Nothing => {}
            Step::Stop => {
                debug!("MIDI listener stopping");
                break;
            }
        }
    }

    if dispatcher.assembler.pending_len() > 0 {
        debug!(
            "Discarding {} bytes of unterminated SysEx",
            dispatcher.assembler.pending_len()
        );
    }
}
