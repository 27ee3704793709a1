/// SysEx start-of-message status byte
pub const SYSEX_START: u8 = 0xF0;
/// SysEx end-of-message marker
pub const SYSEX_END: u8 = 0xF7;
/// Active sensing keep-alive
pub const ACTIVE_SENSING: u8 = 0xFE;

/// What a chunk of bytes delivered by the platform layer is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Begins with 0xF0
    SysExStart,
    /// Data bytes (or the bare terminator) of a SysEx transfer already in progress
    SysExContinuation,
    /// 0xFE keep-alive
    ActiveSensing,
    /// Any complete channel or system message
    Other,
}

/// Classifies one chunk of input.
/// `sysex_open` tells whether the previous chunk left a SysEx transfer unterminated.
/// Returns None for chunks that are neither a SysEx continuation nor a valid message.
pub fn classify(msg: &[u8], sysex_open: bool) -> Option<MessageKind> {
    let first = *msg.first()?;

    if first == SYSEX_START {
        return Some(MessageKind::SysExStart);
    }

    // Realtime bytes may appear in the middle of a SysEx transfer without ending it
    if first == ACTIVE_SENSING && msg.len() == 1 {
        return Some(MessageKind::ActiveSensing);
    }

    if sysex_open && (first < 0x80 || first == SYSEX_END) {
        return Some(MessageKind::SysExContinuation);
    }

    if is_valid_midi_message(msg) {
        Some(MessageKind::Other)
    } else {
        None
    }
}

/// True when the chunk carries the SysEx terminator as its final byte
pub fn ends_sysex(msg: &[u8]) -> bool {
    msg.last() == Some(&SYSEX_END)
}

/// Validates the length of a non-SysEx MIDI message based on its status byte
pub fn is_valid_midi_message(msg: &[u8]) -> bool {
    if msg.is_empty() {
        return false;
    }

    let status = msg[0] & 0xF0; // Get the message type (high nibble)

    match status {
        // Note Off, Note On, Poly Pressure, Control Change, Pitch Bend
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => msg.len() == 3,

        // Program Change, Channel Pressure
        0xC0 | 0xD0 => msg.len() == 2,

        // System messages
        0xF0 => validate_system_message(msg),

        _ => false,
    }
}

/// Validates system common and realtime messages by their full status byte
fn validate_system_message(msg: &[u8]) -> bool {
    match msg[0] {
        // SysEx start - variable length
        SYSEX_START => ends_sysex(msg),

        // MIDI Time Code, Song Select
        0xF1 | 0xF3 => msg.len() == 2,

        // Song Position Pointer
        0xF2 => msg.len() == 3,

        // Tune Request, Clock, Start, Continue, Stop, Active Sensing, Reset
        0xF6 | 0xF8 | 0xFA | 0xFB | 0xFC | 0xFE | 0xFF => msg.len() == 1,

        _ => false,
    }
}

/// Universal non-realtime identity request addressed to `device` (0x7F = all devices)
pub fn identity_request(device: u8) -> Vec<u8> {
    vec![SYSEX_START, 0x7E, device & 0x7F, 0x06, 0x01, SYSEX_END]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        // Note On with 3 bytes (valid)
        assert!(is_valid_midi_message(&[0x90, 0x3C, 0x64]));

        // Note On with wrong length
        assert!(!is_valid_midi_message(&[0x90, 0x3C]));
        assert!(!is_valid_midi_message(&[0x90]));
    }

    #[test]
    fn test_program_change() {
        assert!(is_valid_midi_message(&[0xC0, 0x05]));
        assert!(!is_valid_midi_message(&[0xC0]));
        assert!(!is_valid_midi_message(&[0xC0, 0x05, 0x00]));
    }

    #[test]
    fn test_system_messages() {
        // MIDI Time Code (2 bytes)
        assert!(is_valid_midi_message(&[0xF1, 0x20]));

        // Song Position Pointer (3 bytes)
        assert!(is_valid_midi_message(&[0xF2, 0x00, 0x10]));

        // Clock (1 byte)
        assert!(is_valid_midi_message(&[0xF8]));

        // Undefined status
        assert!(!is_valid_midi_message(&[0xF4]));
    }

    #[test]
    fn test_classify_sysex_transfer() {
        assert_eq!(classify(&[0xF0, 0x43, 0x7D], false), Some(MessageKind::SysExStart));
        assert_eq!(classify(&[0x30, 0x41], true), Some(MessageKind::SysExContinuation));
        assert_eq!(classify(&[0x01, 0xF7], true), Some(MessageKind::SysExContinuation));
        assert_eq!(classify(&[0xF7], true), Some(MessageKind::SysExContinuation));

        // Stray data bytes with nothing open
        assert_eq!(classify(&[0x30, 0x41], false), None);
    }

    #[test]
    fn test_classify_realtime_and_channel() {
        assert_eq!(classify(&[0xFE], false), Some(MessageKind::ActiveSensing));
        assert_eq!(classify(&[0xFE], true), Some(MessageKind::ActiveSensing));
        assert_eq!(classify(&[0xB0, 0x07, 0x7F], false), Some(MessageKind::Other));
        assert_eq!(classify(&[], false), None);
    }

    #[test]
    fn test_identity_request() {
        let msg = identity_request(0x7F);

        assert_eq!(msg, vec![0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]);
        assert!(ends_sysex(&msg));
        assert!(is_valid_midi_message(&msg));
    }
}
