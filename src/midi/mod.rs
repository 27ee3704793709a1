pub mod backend;
pub mod event;
pub mod listener;
pub mod manager;
pub mod monitor;
pub mod port_model;
pub mod validation;

pub use event::MidiEvent;
pub use manager::{ManagerOptions, MidiManager};
pub use port_model::{ModelChange, PortModel};
