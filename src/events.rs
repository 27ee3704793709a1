use crate::midi::MidiEvent;

/// Events sent from the MIDI threads to the main loop
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Completed SysEx or topology change from the input listener
    Midi(MidiEvent),

    /// The listener stopped for a reason other than shutdown
    Error(String),
}
