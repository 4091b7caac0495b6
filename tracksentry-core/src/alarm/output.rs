//! Alarm side effects
//!
//! The core never touches speakers, sockets or files. Sounds, network
//! messages and log lines are handed to an [`AlarmOutput`] supplied by the
//! platform:
//!
//! ```text
//!   AlarmDatabase ──play_alarm_sounds──> AlarmOutput::play_sound
//!                 ──send_net_mesgs────> AlarmOutput::send_net_mesg
//!                 ──flush_alarm_log───> AlarmOutput::log_alarm
//! ```
//!
//! Output failures are logged by the caller and never change alarm state.

use core::fmt;
use serde::Serialize;

use super::action::AlarmSound;
use super::alarm::{AlarmId, AlarmState};
use crate::track::TrackId;

// =============================================================================
// Error Types
// =============================================================================

/// Failure reported by an output backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputError {
    pub message: String,
}

impl OutputError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OutputError {}

impl From<std::io::Error> for OutputError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

// =============================================================================
// Records
// =============================================================================

/// One alarm log line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmLogRecord {
    /// Unix milliseconds
    pub time_ms: u64,
    pub alarm_id: AlarmId,
    pub config_name: String,
    pub state: AlarmState,
    pub track1: Option<TrackId>,
    pub track2: Option<TrackId>,
    pub trigger: String,
}

impl fmt::Display for AlarmLogRecord {
    /// Everything after the time column
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = |t: Option<TrackId>| t.map(|t| t.to_string()).unwrap_or_default();
        write!(
            f,
            "{},{},{},{},{},{}",
            self.alarm_id,
            self.config_name,
            self.state.name(),
            id(self.track1),
            id(self.track2),
            self.trigger
        )
    }
}

// =============================================================================
// Output Trait
// =============================================================================

pub trait AlarmOutput {
    /// Play a sound. `once` is false while a continuous alarm sound is
    /// running and this is called again on every sound tick.
    fn play_sound(&mut self, sound: AlarmSound, once: bool);

    /// Send one complete network message, including line terminator
    fn send_net_mesg(&mut self, mesg: &str) -> Result<(), OutputError>;

    fn log_alarm(&mut self, record: &AlarmLogRecord) -> Result<(), OutputError>;
}

/// Output that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AlarmOutput for NullOutput {
    fn play_sound(&mut self, _sound: AlarmSound, _once: bool) {}

    fn send_net_mesg(&mut self, _mesg: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn log_alarm(&mut self, _record: &AlarmLogRecord) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Output that records everything, for tests and status dumps
#[derive(Debug, Default, Clone)]
pub struct RecordingOutput {
    pub sounds: Vec<(AlarmSound, bool)>,
    pub net_mesgs: Vec<String>,
    pub log: Vec<AlarmLogRecord>,
}

impl AlarmOutput for RecordingOutput {
    fn play_sound(&mut self, sound: AlarmSound, once: bool) {
        self.sounds.push((sound, once));
    }

    fn send_net_mesg(&mut self, mesg: &str) -> Result<(), OutputError> {
        self.net_mesgs.push(mesg.to_string());
        Ok(())
    }

    fn log_alarm(&mut self, record: &AlarmLogRecord) -> Result<(), OutputError> {
        self.log.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_record_columns() {
        let record = AlarmLogRecord {
            time_ms: 0,
            alarm_id: 4,
            config_name: "Speeding".to_string(),
            state: AlarmState::Active,
            track1: Some(12),
            track2: None,
            trigger: "Speed > 20 kts".to_string(),
        };
        assert_eq!(record.to_string(), "4,Speeding,Active,12,,Speed > 20 kts");
    }
}
