//! Alarms
//!
//! An [`AlarmConfig`] pairs a condition group with the actions its alarms
//! run. The [`AlarmDatabase`] owns configs and live [`Alarm`]s and drives
//! their side effects through an [`AlarmOutput`].

pub mod action;
#[allow(clippy::module_inception)]
pub mod alarm;
pub mod config;
pub mod database;
pub mod output;

pub use action::{
    ActionChange, ActionId, ActionLifetime, ActionOption, ActionType, AlarmAction, AlarmSound,
    OptionType, OptionValueType, BUILTIN_SOUNDS, CUSTOM_SOUND_BASE,
};
pub use alarm::{ActionTransition, Alarm, AlarmChange, AlarmId, AlarmState, AlarmStates};
pub use config::{AlarmConfig, ConfigEvent};
pub use database::{AlarmDatabase, AlarmDbEvent, CustomSound};
pub use output::{AlarmLogRecord, AlarmOutput, NullOutput, OutputError, RecordingOutput};
