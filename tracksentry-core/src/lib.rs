//! # TrackSentry Core
//!
//! Platform-independent track condition and alarm engine for surveillance
//! displays combining radar, AIS, ADS-B and fused tracks.
//!
//! This crate contains the evaluation logic only, with **zero I/O
//! dependencies**. Time is passed in as Unix milliseconds and every side
//! effect (sounds, network messages, log lines) goes through the
//! [`AlarmOutput`] trait supplied by the platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  tracksentry-core (platform-independent, no tokio/async)    │
//! │  ├── track/       (unified tracks, groups, ref points)      │
//! │  ├── condition/   (condition types, groups, evaluation)     │
//! │  ├── filter       (inclusion / exclusion track filters)     │
//! │  ├── alarm/       (configs, actions, alarm state machine)   │
//! │  ├── engine       (databases wired together)                │
//! │  └── AlarmOutput  (abstracts sounds, network and log file)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  tracksentry-server     │
//!                 │  (UDP input, timers)    │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`track`] - Unified track registry fed by source updates
//! - [`condition`] - The condition type table and condition groups
//! - [`alarm`] - Alarm configs, actions and the alarm database
//! - [`engine`] - Single entry point tying tracks, shapes and alarms
//! - [`config_file`] - Line-oriented `Keyword=Value` configuration format
//! - [`nmea`] - TTM sentences sent for alarming tracks
//!
//! ## Example: Speed Alarm
//!
//! ```rust
//! use tracksentry_core::condition::{ConditionType, Operator};
//! use tracksentry_core::geo::{LatLong, Velocity};
//! use tracksentry_core::track::{TrackSource, TrackType, TrackUpdate};
//! use tracksentry_core::{AlarmStates, Engine};
//!
//! let mut engine = Engine::new();
//! let config = engine.with_alarms(|a| a.create_config("Too fast", false));
//! engine
//!     .edit_config(config, 0, |c| {
//!         let id = c.group_mut().create_condition(ConditionType::TrackSpeed, None)?;
//!         c.group_mut().update_condition(id, |c| {
//!             let op = c.set_arg_operator(Operator::GreaterThan)?;
//!             Ok(op | c.set_arg_value(20.0)?)
//!         })
//!     })
//!     .unwrap();
//!
//! let source = TrackSource {
//!     track_type: TrackType::Radar,
//!     source_index: 0,
//!     source_id: 12,
//! };
//! let update = TrackUpdate {
//!     position: Some(LatLong::new(50.8, -1.1)),
//!     velocity: Some(Velocity::new(25.0, 90.0)),
//!     ..Default::default()
//! };
//! engine.update_track(source, update, 1_000);
//! assert_eq!(engine.alarms().num_alarms(AlarmStates::ACTIVE), 1);
//! ```

pub mod alarm;
pub mod condition;
pub mod config_file;
pub mod cpa;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod geo;
pub mod ids;
pub mod nmea;
pub mod shapes;
pub mod track;

// Re-export commonly used types
pub use alarm::{
    ActionType, Alarm, AlarmConfig, AlarmDatabase, AlarmDbEvent, AlarmLogRecord, AlarmOutput,
    AlarmSound, AlarmState, AlarmStates, NullOutput, OutputError,
};
pub use condition::{Condition, ConditionGroup, ConditionType, EvalContext, Operator};
pub use engine::Engine;
pub use error::{Error, Result};
pub use filter::UniTrackFilter;
pub use geo::{LatLong, Velocity};
pub use nmea::NetMesgType;
pub use shapes::{Shape, ShapeDatabase, ShapeKind};
pub use track::{TrackId, TrackSource, TrackType, TrackTypes, TrackUpdate, UniTrack, UniTrackDatabase};
