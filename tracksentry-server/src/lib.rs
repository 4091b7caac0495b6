//! # TrackSentry Server
//!
//! Native daemon around [`tracksentry_core`]:
//! - Receives track updates as JSON lines over UDP or from a replay file
//! - Runs the alarm timers (background conditions, timeouts, sounds)
//! - Sends TTM network messages for alarming tracks
//! - Writes the daily alarm log file
//! - Loads and saves the alarm and filter configuration files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  tracksentry-server                     │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐ │
//! │  │ UdpInput    │  │ Replay      │  │ AlarmTimers      │ │
//! │  │ (JSON/UDP)  │  │ (JSON file) │  │ (1 s / 2 s)      │ │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬─────────┘ │
//! │         │                │                  │           │
//! │         ▼                ▼                  ▼           │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              Session (Arc<RwLock>)                  ││
//! │  │  - tracksentry_core::Engine                         ││
//! │  │  - ServerOutput (TTM over UDP, alarm log file)      ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every task takes the session lock for one delivery, so a track is
//! evaluated against a consistent set of tracks, shapes and configs.
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-l, --listen` - UDP address for track messages (default: 0.0.0.0:6503)
//! - `-r, --replay` - Replay track messages from a JSON lines file
//! - `--net-mesg-addr` - Where TTM sentences are sent
//! - `-v` - Increase verbosity (use multiple times)

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};
use tracksentry_core::alarm::database::PARAM_REF_LAT_LONG;
use tracksentry_core::track::TrackType;
use tracksentry_core::{Engine, NetMesgType, TrackTypes};

pub mod config;
pub mod error;
pub mod input;
pub mod output;
pub mod timers;

use config::ConfigFiles;
use error::ServerError;
use input::TrackMessage;
use output::ServerOutput;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum NetMesgFormat {
    #[default]
    None,
    /// TTM with the unified track ID
    TtmV1,
    /// TTM with the track descriptor
    TtmV2,
}

impl From<NetMesgFormat> for NetMesgType {
    fn from(f: NetMesgFormat) -> Self {
        match f {
            NetMesgFormat::None => NetMesgType::None,
            NetMesgFormat::TtmV1 => NetMesgType::TtmV1,
            NetMesgFormat::TtmV2 => NetMesgType::TtmV2,
        }
    }
}

fn parse_track_type(s: &str) -> Result<TrackType, String> {
    s.to_ascii_uppercase()
        .parse()
        .map_err(|_| format!("unknown track type '{s}', expected radar, ais, ads-b or fused"))
}

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Listen for JSON track messages on this UDP address
    #[arg(short, long, default_value = "0.0.0.0:6503")]
    pub listen: SocketAddr,

    /// Do not listen for track messages over UDP
    #[arg(long, default_value_t = false)]
    pub no_listen: bool,

    /// Replay track messages from a JSON lines file
    #[arg(short, long)]
    pub replay: Option<PathBuf>,

    /// Alarm configuration file (default: in the user config directory)
    #[arg(long)]
    pub alarm_config: Option<PathBuf>,

    /// Filter configuration file (default: in the user config directory)
    #[arg(long)]
    pub filter_config: Option<PathBuf>,

    /// Do not write configuration files on shutdown
    #[arg(long, default_value_t = false)]
    pub no_save: bool,

    /// Send alarm network messages to this UDP address
    #[arg(long)]
    pub net_mesg_addr: Option<SocketAddr>,

    /// Alarm network message format
    #[arg(long, value_enum)]
    pub net_mesg_type: Option<NetMesgFormat>,

    /// Alarm log file prefix; files are named <prefix>_YYYYMMDD.log
    #[arg(long)]
    pub alarm_log_prefix: Option<String>,

    /// Reference position for network messages, as "lat,lon"
    #[arg(long)]
    pub ref_lat_long: Option<String>,

    /// Track types that raise alarms, comma separated
    #[arg(long, value_delimiter = ',', value_parser = parse_track_type)]
    pub track_types: Vec<TrackType>,
}

/// Current time as Unix milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub struct SessionInner {
    pub args: Cli,
    pub engine: Engine,
    pub output: ServerOutput,
    pub config_files: ConfigFiles,
}

#[derive(Clone)]
pub struct Session {
    pub inner: Arc<RwLock<SessionInner>>,
}

impl Session {
    pub fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the engine and outputs without starting any task
    pub fn new_base(args: Cli) -> Result<Self, ServerError> {
        let config_files = ConfigFiles::from_args(&args);
        let output = ServerOutput::new(args.net_mesg_addr)?;
        let session = Session {
            inner: Arc::new(RwLock::new(SessionInner {
                args,
                engine: Engine::new(),
                output,
                config_files,
            })),
        };
        Ok(session)
    }

    pub async fn new(subsystem: &SubsystemHandle, args: Cli) -> Result<Self, ServerError> {
        let session = Self::new_base(args)?;
        session.load_config()?;
        session.apply_args()?;

        let args = session.args();
        if !args.no_listen {
            let input = input::UdpInput::new(session.clone(), args.listen);
            subsystem.start(SubsystemBuilder::new("UdpInput", |subsys| input.run(subsys)));
        }
        if let Some(path) = args.replay {
            let replay = input::Replay::new(session.clone(), path);
            subsystem.start(SubsystemBuilder::new("Replay", |subsys| replay.run(subsys)));
        }
        let timers = timers::AlarmTimers::new(session.clone());
        subsystem.start(SubsystemBuilder::new("AlarmTimers", |subsys| timers.run(subsys)));

        Ok(session)
    }

    pub fn args(&self) -> Cli {
        self.read().args.clone()
    }

    /// Command line settings override those from the configuration file
    pub fn apply_args(&self) -> Result<(), ServerError> {
        let mut inner = self.write();
        let args = inner.args.clone();
        let alarms_result = inner.engine.with_alarms(|alarms| -> tracksentry_core::Result<()> {
            if let Some(format) = args.net_mesg_type {
                alarms.set_net_mesg_type(format.into());
            }
            if let Some(prefix) = &args.alarm_log_prefix {
                alarms.set_alarm_log_file_prefix(prefix);
            }
            if let Some(position) = &args.ref_lat_long {
                alarms.set_parameter(PARAM_REF_LAT_LONG, position)?;
            }
            if !args.track_types.is_empty() {
                let types = args
                    .track_types
                    .iter()
                    .fold(TrackTypes::empty(), |acc, t| acc | t.as_flag());
                alarms.set_alarm_track_types(types);
            }
            Ok(())
        });
        alarms_result.map_err(|e| ServerError::Argument(e.to_string()))
    }

    pub fn load_config(&self) -> Result<(), ServerError> {
        let mut inner = self.write();
        let inner = &mut *inner;
        inner.config_files.load(&mut inner.engine, now_ms())
    }

    pub fn save_config(&self) -> Result<(), ServerError> {
        let inner = self.read();
        if inner.args.no_save {
            log::debug!("Not saving configuration");
            return Ok(());
        }
        inner.config_files.save(&inner.engine)
    }

    /// Feed one track message into the engine
    pub fn apply(&self, message: TrackMessage) {
        let now = now_ms();
        let mut inner = self.write();
        match message {
            TrackMessage::Update { source, update, .. } => {
                inner.engine.update_track(source, update, now);
            }
            TrackMessage::Delete { source, .. } => {
                if inner.engine.delete_track(&source).is_none() {
                    log::debug!("Delete for unknown track {:?}", source);
                }
            }
        }
    }

    pub fn background(&self) {
        self.write().engine.background(now_ms());
    }

    pub fn check_alarm_timeouts(&self) {
        self.write().engine.check_alarm_timeouts(now_ms());
    }

    pub fn play_alarm_sounds(&self) {
        let mut inner = self.write();
        let inner = &mut *inner;
        inner.engine.play_alarm_sounds(&mut inner.output);
    }

    pub fn send_net_mesgs(&self) {
        let mut inner = self.write();
        let inner = &mut *inner;
        let prefix = inner.engine.alarms().alarm_log_file_prefix().to_string();
        inner.output.set_log_prefix(&prefix);
        inner.engine.send_net_mesgs(now_ms(), &mut inner.output);
    }

    /// Live alarms as JSON
    pub fn status(&self) -> serde_json::Value {
        let inner = self.read();
        serde_json::json!({
            "version": VERSION,
            "tracks": inner.engine.tracks().num_tracks(false),
            "alarms": inner.engine.alarms().alarms_json(),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksentry_core::alarm::AlarmStates;
    use tracksentry_core::condition::{ConditionType, Operator};

    fn session(extra: &[&str]) -> Session {
        let mut argv = vec!["tracksentry-server", "--no-listen", "--no-save"];
        argv.extend_from_slice(extra);
        Session::new_base(Cli::parse_from(argv)).unwrap()
    }

    #[test]
    fn test_args_override_settings() {
        let s = session(&[
            "--net-mesg-type",
            "ttm-v2",
            "--alarm-log-prefix",
            "/tmp/alarms",
            "--ref-lat-long",
            "50.1,-1.2",
            "--track-types",
            "ais,ads-b",
        ]);
        s.apply_args().unwrap();
        let inner = s.read();
        let alarms = inner.engine.alarms();
        assert_eq!(alarms.net_mesg_type(), NetMesgType::TtmV2);
        assert_eq!(alarms.alarm_log_file_prefix(), "/tmp/alarms");
        assert_eq!(alarms.alarm_track_types(), TrackTypes::AIS | TrackTypes::ADSB);
        assert!(alarms.ref_lat_long().is_some());
    }

    #[test]
    fn test_bad_ref_position_rejected() {
        let s = session(&["--ref-lat-long", "north"]);
        assert!(matches!(s.apply_args(), Err(ServerError::Argument(_))));
    }

    #[test]
    fn test_messages_drive_alarms() {
        let s = session(&[]);
        {
            let mut inner = s.write();
            let config = inner.engine.with_alarms(|a| a.create_config("Fast", false));
            inner
                .engine
                .edit_config(config, 0, |c| {
                    let cond = c.group_mut().create_condition(ConditionType::TrackSpeed, None)?;
                    c.group_mut().update_condition(cond, |c| {
                        let op = c.set_arg_operator(Operator::GreaterThan)?;
                        Ok(op | c.set_arg_value(10.0)?)
                    })
                })
                .unwrap();
        }

        let update = r#"{"type":"update","source":{"trackType":"radar","sourceIndex":0,"sourceId":9},"update":{"position":{"lat":1.0,"lon":2.0},"velocity":{"speedMps":12.0,"courseDegs":90.0}}}"#;
        s.apply(input::parse_line(update).unwrap().unwrap());
        assert_eq!(s.read().engine.alarms().num_alarms(AlarmStates::ACTIVE), 1);
        assert_eq!(s.status()["alarms"].as_array().map(|a| a.len()), Some(1));

        let delete = r#"{"type":"delete","source":{"trackType":"radar","sourceIndex":0,"sourceId":9}}"#;
        s.apply(input::parse_line(delete).unwrap().unwrap());
        assert_eq!(s.read().engine.alarms().alarms().count(), 0);
    }
}
