use crate::connection::Direction;
use crate::events::AppEvent;
use crate::midi::backend::MidiBackend;
use crate::midi::validation::identity_request;
use crate::midi::{ManagerOptions, MidiManager, ModelChange};
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_LOG_MESSAGES: usize = 100;

/// Device id 0x7F addresses every device on the cable
const ALL_DEVICES: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneFocus {
    Sources,
    Destinations,
}

impl PaneFocus {
    pub fn direction(&self) -> Direction {
        match self {
            PaneFocus::Sources => Direction::Readable,
            PaneFocus::Destinations => Direction::Writable,
        }
    }
}

pub struct App {
    pub focus: PaneFocus,
    pub selected_source_idx: usize,
    pub selected_dest_idx: usize,
    pub log_messages: VecDeque<String>,
    pub sysex_received: usize,
    pub show_help: bool,
    pub should_quit: bool,

    midi_manager: MidiManager,
    event_rx: Receiver<AppEvent>,
    source_changes: Receiver<ModelChange>,
    dest_changes: Receiver<ModelChange>,
}

impl App {
    pub fn new(backend: Arc<dyn MidiBackend>, options: ManagerOptions) -> Result<Self> {
        let (event_tx, event_rx): (Sender<AppEvent>, Receiver<AppEvent>) =
            crossbeam::channel::unbounded();
        let mut midi_manager = MidiManager::new(backend, event_tx, options)?;
        let source_changes = midi_manager.model_mut(Direction::Readable).observe();
        let dest_changes = midi_manager.model_mut(Direction::Writable).observe();

        Ok(Self {
            focus: PaneFocus::Sources,
            selected_source_idx: 0,
            selected_dest_idx: 0,
            log_messages: VecDeque::new(),
            sysex_received: 0,
            show_help: false,
            should_quit: false,
            midi_manager,
            event_rx,
            source_changes,
            dest_changes,
        })
    }

    pub fn initialize(&mut self) {
        self.refresh_ports();

        if self.port_count(Direction::Readable) == 0 && self.port_count(Direction::Writable) == 0 {
            self.add_log("No MIDI devices found. Connect the Magicstomp and press R to rescan.".to_string());
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.midi_manager.backend_name()
    }

    pub fn manager(&self) -> &MidiManager {
        &self.midi_manager
    }

    pub fn port_count(&self, direction: Direction) -> usize {
        self.midi_manager.model(direction).row_count()
    }

    pub fn refresh_ports(&mut self) {
        let (sources, destinations) = self.midi_manager.scan_all();
        self.add_log(format!(
            "Found {} source(s) and {} destination(s)",
            sources, destinations
        ));
    }

    /// Drains everything the MIDI threads and the port models queued since the last frame
    pub fn process_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                AppEvent::Midi(midi_event) => {
                    if let Some(port) = midi_event.sysex_port() {
                        self.sysex_received += 1;
                        debug!("SysEx #{} from packed port {:#x}", self.sysex_received, port);
                    }
                    if let Some(scope) = midi_event.scope() {
                        info!("{:?} topology: {}", scope, midi_event);
                    }
                    self.add_log(midi_event.to_string());
                    self.midi_manager.handle_event(&midi_event);
                }
                AppEvent::Error(msg) => {
                    self.add_log(format!("ERROR: {}", msg));
                }
            }
        }

        // Only resets can leave a selection pointing past the end of a list
        if self.source_changes.try_iter().any(|c| c == ModelChange::Reset) {
            self.selected_source_idx =
                clamp_index(self.selected_source_idx, self.port_count(Direction::Readable));
        }
        if self.dest_changes.try_iter().any(|c| c == ModelChange::Reset) {
            self.selected_dest_idx =
                clamp_index(self.selected_dest_idx, self.port_count(Direction::Writable));
        }
    }

    fn add_log(&mut self, msg: String) {
        self.log_messages.push_back(msg);
        if self.log_messages.len() > MAX_LOG_MESSAGES {
            self.log_messages.pop_front();
        }
    }

    pub fn selected_idx(&self, focus: PaneFocus) -> usize {
        match focus {
            PaneFocus::Sources => self.selected_source_idx,
            PaneFocus::Destinations => self.selected_dest_idx,
        }
    }

    // Keyboard input handlers

    pub fn handle_key_up(&mut self) {
        match self.focus {
            PaneFocus::Sources if self.selected_source_idx > 0 => self.selected_source_idx -= 1,
            PaneFocus::Destinations if self.selected_dest_idx > 0 => self.selected_dest_idx -= 1,
            _ => {}
        }
    }

    pub fn handle_key_down(&mut self) {
        let last = self.port_count(self.focus.direction()).saturating_sub(1);
        match self.focus {
            PaneFocus::Sources if self.selected_source_idx < last => self.selected_source_idx += 1,
            PaneFocus::Destinations if self.selected_dest_idx < last => self.selected_dest_idx += 1,
            _ => {}
        }
    }

    pub fn handle_tab(&mut self) {
        self.focus = match self.focus {
            PaneFocus::Sources => PaneFocus::Destinations,
            PaneFocus::Destinations => PaneFocus::Sources,
        };
    }

    /// Connects or disconnects the selected port
    pub fn handle_space(&mut self) {
        let direction = self.focus.direction();
        let row = self.selected_idx(self.focus);
        let name = match self.midi_manager.model(direction).data_at(row) {
            Some(r) => r.name.to_string(),
            None => return,
        };

        match self.midi_manager.toggle(direction, row) {
            Ok(true) => self.add_log(format!("Connecting {}", name)),
            Ok(false) => self.add_log(format!("Disconnecting {}", name)),
            Err(e) => {
                warn!("Toggling {} failed: {:#}", name, e);
                self.add_log(format!("ERROR: {}: {:#}", name, e));
            }
        }
    }

    pub fn handle_refresh(&mut self) {
        self.refresh_ports();
    }

    /// Asks every connected destination to identify itself
    pub fn handle_identity_request(&mut self) {
        let sent = self.midi_manager.send_sysex(&identity_request(ALL_DEVICES));
        if sent == 0 {
            self.add_log("No connected destination to send to".to_string());
        } else {
            info!("Identity request sent to {} destination(s)", sent);
            self.add_log(format!("Identity request sent to {} destination(s)", sent));
        }
    }

    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn shutdown(&mut self) {
        self.midi_manager.shutdown();
    }
}

fn clamp_index(idx: usize, len: usize) -> usize {
    idx.min(len.saturating_sub(1))
}
