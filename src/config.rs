use crate::midi::backend::{BackendKind, LoopbackBackend, MidiBackend, NativeBackend};
use crate::midi::listener::{ListenerConfig, DEFAULT_MAX_SYSEX_BYTES};
use crate::midi::ManagerOptions;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LOG_FILE: &str = "stompsync.log";

/// Command line and environment configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "stompsync", version, about = "MIDI port manager and SysEx monitor for the Yamaha Magicstomp")]
pub struct Config {
    /// MIDI backend to use
    #[arg(long, value_enum, env = "STOMPSYNC_BACKEND", default_value_t = BackendKind::Native)]
    pub backend: BackendKind,

    /// Print every MIDI endpoint as JSON and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Log file (defaults to stompsync.log in the temp directory)
    #[arg(long, env = "STOMPSYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, env = "STOMPSYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Largest SysEx transfer buffered while waiting for F7 (0 = unbounded)
    #[arg(long, default_value_t = DEFAULT_MAX_SYSEX_BYTES)]
    pub max_sysex_bytes: usize,

    /// Undo the local connection state when connecting or disconnecting fails
    #[arg(long)]
    pub rollback_on_failure: bool,

    /// How often the native backend re-enumerates ports to detect hot-plugging
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(10..))]
    pub poll_interval_ms: u64,
}

impl Config {
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_LOG_FILE))
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            listener: ListenerConfig {
                max_sysex_bytes: self.max_sysex_bytes,
            },
            rollback_on_failure: self.rollback_on_failure,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn open_backend(&self) -> Result<Arc<dyn MidiBackend>> {
        Ok(match self.backend {
            BackendKind::Native => {
                Arc::new(NativeBackend::new().context("Failed to open the platform MIDI subsystem")?)
            }
            BackendKind::Loopback => Arc::new(LoopbackBackend::demo()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["stompsync"]).unwrap();

        assert_eq!(config.max_sysex_bytes, DEFAULT_MAX_SYSEX_BYTES);
        assert!(!config.rollback_on_failure);
        assert!(!config.list_ports);
        assert_eq!(config.manager_options().poll_interval, Duration::from_secs(1));
        assert!(config.log_path().ends_with(DEFAULT_LOG_FILE));
    }

    #[test]
    fn test_flags() {
        let config = Config::try_parse_from([
            "stompsync",
            "--backend",
            "loopback",
            "--max-sysex-bytes",
            "0",
            "--rollback-on-failure",
            "--log-file",
            "/tmp/ss.log",
        ])
        .unwrap();

        assert_eq!(config.backend, BackendKind::Loopback);
        let options = config.manager_options();
        assert_eq!(options.listener.max_sysex_bytes, 0);
        assert!(options.rollback_on_failure);
        assert_eq!(config.log_path(), PathBuf::from("/tmp/ss.log"));
        assert_eq!(config.open_backend().unwrap().name(), "loopback");
    }

    #[test]
    fn test_poll_interval_floor() {
        assert!(Config::try_parse_from(["stompsync", "--poll-interval-ms", "1"]).is_err());
    }
}
