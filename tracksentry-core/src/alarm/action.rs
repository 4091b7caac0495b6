//! Alarm actions
//!
//! Actions are the side effects of an alarm: sounds, highlights, network
//! messages, automatic state changes and logging. Each action type has a
//! fixed option setup (none, a single value or a named list) and a fixed
//! lifetime relative to the alarm state:
//!
//! ```text
//!   state        ACTIVE   ACKNOWLEDGED   CLEARED   EMPTY
//!   normal         ●
//!   stop-on-clear  ●          ●
//!   stop-on-empty  ●          ●             ●
//! ```

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;

use crate::config_file::{ConfigWriter, Section};
use crate::error::{Error, Result};
use crate::ids::ACTION_IDS;

pub type ActionId = u32;

/// First value of the user-defined action range
pub const USER_ACTION_START: u32 = 102;

/// Option values at or above this select a custom sound
pub const CUSTOM_SOUND_BASE: u32 = 1000;

/// Sounds available on every system
pub const BUILTIN_SOUNDS: &[(&str, u32)] = &[
    ("Beep", 0),
    ("Chime", 1),
    ("Siren", 2),
    ("Klaxon", 3),
    ("Bell", 4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ActionType {
    HighlightTrack,
    SoundAlarm,
    SendNetMesg,
    AutoAcknowledge,
    AutoClear,
    SoundAlarmOnce,
    AutoReset,
    AutoDelete,
    HighlightShapes,
    LogToFile,
    /// Handled by the application, 102 and above
    User(u32),
}

/// When a started action is stopped again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionLifetime {
    /// Runs while the alarm is active
    Normal,
    /// Runs until the alarm is cleared
    StopOnClear,
    /// Runs until the alarm is empty
    StopOnEmpty,
}

impl ActionType {
    pub fn from_u32(v: u32) -> Result<ActionType> {
        use ActionType::*;
        Ok(match v {
            1 => HighlightTrack,
            2 => SoundAlarm,
            3 => SendNetMesg,
            4 => AutoAcknowledge,
            5 => AutoClear,
            6 => SoundAlarmOnce,
            7 => AutoReset,
            8 => AutoDelete,
            9 => HighlightShapes,
            10 => LogToFile,
            v if v >= USER_ACTION_START => User(v),
            // 0, unassigned built-in values and the reserved 100 and 101
            v => return Err(Error::InvalidActionType(v)),
        })
    }

    pub fn as_u32(self) -> u32 {
        use ActionType::*;
        match self {
            HighlightTrack => 1,
            SoundAlarm => 2,
            SendNetMesg => 3,
            AutoAcknowledge => 4,
            AutoClear => 5,
            SoundAlarmOnce => 6,
            AutoReset => 7,
            AutoDelete => 8,
            HighlightShapes => 9,
            LogToFile => 10,
            User(v) => v,
        }
    }

    pub fn is_builtin(self) -> bool {
        !matches!(self, ActionType::User(_))
    }

    pub fn is_user_defined(self) -> bool {
        matches!(self, ActionType::User(_))
    }

    pub fn name(self) -> &'static str {
        use ActionType::*;
        match self {
            HighlightTrack => "Highlight track",
            SoundAlarm => "Sound alarm",
            SendNetMesg => "Send network message",
            AutoAcknowledge => "Auto acknowledge",
            AutoClear => "Auto clear",
            SoundAlarmOnce => "Sound alarm once",
            AutoReset => "Auto reset",
            AutoDelete => "Auto delete",
            HighlightShapes => "Highlight shapes",
            LogToFile => "Log to file",
            User(_) => "User defined",
        }
    }

    pub fn lifetime(self) -> ActionLifetime {
        use ActionType::*;
        match self {
            HighlightTrack | SendNetMesg | AutoClear | HighlightShapes => {
                ActionLifetime::StopOnClear
            }
            AutoReset | AutoDelete => ActionLifetime::StopOnEmpty,
            _ => ActionLifetime::Normal,
        }
    }

    pub fn is_stop_on_clear(self) -> bool {
        self.lifetime() == ActionLifetime::StopOnClear
    }

    pub fn is_stop_on_empty(self) -> bool {
        self.lifetime() == ActionLifetime::StopOnEmpty
    }

    /// Fires once when started, nothing to undo on stop
    pub fn is_one_shot(self) -> bool {
        matches!(self, ActionType::SoundAlarmOnce | ActionType::LogToFile)
    }
}

impl From<ActionType> for u32 {
    fn from(t: ActionType) -> u32 {
        t.as_u32()
    }
}

impl TryFrom<u32> for ActionType {
    type Error = Error;

    fn try_from(v: u32) -> Result<ActionType> {
        ActionType::from_u32(v)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::User(v) => write!(f, "User defined ({v})"),
            t => f.write_str(t.name()),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u32)]
pub enum OptionType {
    #[default]
    None = 0,
    Value = 1,
    List = 2,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u32)]
pub enum OptionValueType {
    #[default]
    None = 0,
    TimeSecs = 1,
}

/// Named entry of a list option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOption {
    pub name: String,
    pub value: u32,
}

/// Sound selected by a sound action option value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmSound {
    BuiltIn(u32),
    Custom(u32),
}

impl AlarmSound {
    pub fn from_option_value(value: u32) -> AlarmSound {
        if value >= CUSTOM_SOUND_BASE {
            AlarmSound::Custom(value - CUSTOM_SOUND_BASE)
        } else {
            AlarmSound::BuiltIn(value)
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ActionChange: u32 {
        const STATE = 0x01;
        const OPTION_VALUE = 0x02;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmAction {
    id: ActionId,
    action_type: ActionType,
    option_type: OptionType,
    option_value_type: OptionValueType,
    value_min: u32,
    value_max: u32,
    options: Vec<ActionOption>,
    option_value: u32,
    is_enabled: bool,
}

impl AlarmAction {
    /// Create an action with the option setup of its type. `sounds` is the
    /// list offered by sound actions.
    pub(crate) fn new(action_type: ActionType, sounds: &[ActionOption]) -> Self {
        let mut action = AlarmAction {
            id: ACTION_IDS.next_id(),
            action_type,
            option_type: OptionType::None,
            option_value_type: OptionValueType::None,
            value_min: 0,
            value_max: 0,
            options: Vec::new(),
            option_value: 0,
            is_enabled: true,
        };
        use ActionType::*;
        match action_type {
            HighlightTrack | HighlightShapes => {
                // 0 highlights for as long as the action runs
                action.setup_value(OptionValueType::TimeSecs, 0, 3600, 0);
            }
            AutoAcknowledge => action.setup_value(OptionValueType::TimeSecs, 1, 86400, 30),
            AutoClear => action.setup_value(OptionValueType::TimeSecs, 1, 86400, 60),
            SendNetMesg => action.setup_value(OptionValueType::None, 0, 9999, 0),
            SoundAlarm | SoundAlarmOnce => action.set_sound_options(sounds),
            AutoReset | AutoDelete | LogToFile | User(_) => {}
        }
        action
    }

    fn setup_value(&mut self, value_type: OptionValueType, min: u32, max: u32, default: u32) {
        self.option_type = OptionType::Value;
        self.option_value_type = value_type;
        self.value_min = min;
        self.value_max = max;
        self.option_value = default;
    }

    /// Replace the list of a sound action, keeping the selection if it
    /// is still offered
    pub(crate) fn set_sound_options(&mut self, sounds: &[ActionOption]) {
        self.option_type = OptionType::List;
        self.options = sounds.to_vec();
        if !self.options.iter().any(|o| o.value == self.option_value) {
            self.option_value = self.options.first().map(|o| o.value).unwrap_or(0);
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) -> ActionChange {
        if self.is_enabled == enabled {
            return ActionChange::empty();
        }
        self.is_enabled = enabled;
        ActionChange::STATE
    }

    pub fn option_type(&self) -> OptionType {
        self.option_type
    }

    pub fn option_value_type(&self) -> OptionValueType {
        self.option_value_type
    }

    pub fn option_limits(&self) -> (u32, u32) {
        (self.value_min, self.value_max)
    }

    pub fn option_value(&self) -> u32 {
        self.option_value
    }

    /// Define the options of a user-defined action. Built-in actions have
    /// a fixed setup.
    pub fn set_option_type(
        &mut self,
        option_type: OptionType,
        value_type: OptionValueType,
        min: u32,
        max: u32,
    ) -> Result<()> {
        if self.action_type.is_builtin() {
            return Err(Error::Restricted(format!(
                "options of built-in action {}",
                self.action_type
            )));
        }
        self.option_type = option_type;
        self.option_value_type = value_type;
        self.value_min = min;
        self.value_max = max;
        self.options.clear();
        self.option_value = min;
        Ok(())
    }

    /// Add an entry to a user-defined list action
    pub fn add_option(&mut self, name: &str, value: u32) -> Result<()> {
        if self.action_type.is_builtin() || self.option_type != OptionType::List {
            return Err(Error::Restricted(format!(
                "list options of action {}",
                self.action_type
            )));
        }
        if self.options.iter().any(|o| o.value == value) {
            return Err(Error::InvalidOptionValue {
                action_type: self.action_type.as_u32(),
                value,
            });
        }
        if self.options.is_empty() {
            self.option_value = value;
        }
        self.options.push(ActionOption {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    pub fn is_option_value_valid(&self, value: u32) -> bool {
        match self.option_type {
            OptionType::None => false,
            OptionType::Value => {
                self.value_max <= self.value_min
                    || (self.value_min..=self.value_max).contains(&value)
            }
            OptionType::List => self.options.iter().any(|o| o.value == value),
        }
    }

    pub fn set_option_value(&mut self, value: u32) -> Result<ActionChange> {
        if !self.is_option_value_valid(value) {
            return Err(Error::InvalidOptionValue {
                action_type: self.action_type.as_u32(),
                value,
            });
        }
        if self.option_value == value {
            return Ok(ActionChange::empty());
        }
        self.option_value = value;
        Ok(ActionChange::OPTION_VALUE)
    }

    pub fn options(&self) -> &[ActionOption] {
        &self.options
    }

    pub fn num_options(&self) -> usize {
        self.options.len()
    }

    pub fn option_name_from_value(&self, value: u32) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.value == value)
            .map(|o| o.name.as_str())
    }

    /// Name of the selected list entry
    pub fn option_name(&self) -> Option<&str> {
        self.option_name_from_value(self.option_value)
    }

    /// Short description, e.g. `Sound alarm (Siren)` or `Auto clear (60 s)`
    pub fn summary(&self) -> String {
        match self.option_type {
            OptionType::None => self.action_type.to_string(),
            OptionType::List => match self.option_name() {
                Some(name) => format!("{} ({})", self.action_type, name),
                None => self.action_type.to_string(),
            },
            OptionType::Value => match self.option_value_type {
                OptionValueType::TimeSecs if self.option_value == 0 => {
                    self.action_type.to_string()
                }
                OptionValueType::TimeSecs => {
                    format!("{} ({} s)", self.action_type, self.option_value)
                }
                OptionValueType::None => {
                    format!("{} ({})", self.action_type, self.option_value)
                }
            },
        }
    }

    pub(crate) fn save(&self, w: &mut ConfigWriter) {
        w.begin("Action");
        w.param("Type", self.action_type.as_u32());
        w.param("Enabled", u8::from(self.is_enabled));
        if self.action_type.is_user_defined() {
            w.param("OptionType", self.option_type as u32);
            w.param("OptionValueType", self.option_value_type as u32);
            w.param("OptionMin", self.value_min);
            w.param("OptionMax", self.value_max);
            for o in &self.options {
                w.param("Option", format!("{},{}", o.value, o.name));
            }
        }
        if self.option_type != OptionType::None {
            w.param("OptionValue", self.option_value);
        }
        w.end();
    }

    /// Apply the settings of an `Action` section to a freshly created action
    pub(crate) fn load(&mut self, section: &Section) -> Result<()> {
        if self.action_type.is_user_defined() {
            let option_type = section.get_parsed::<u32>("OptionType")?.unwrap_or(0);
            let value_type = section.get_parsed::<u32>("OptionValueType")?.unwrap_or(0);
            self.set_option_type(
                OptionType::from_u32(option_type).unwrap_or_default(),
                OptionValueType::from_u32(value_type).unwrap_or_default(),
                section.get_parsed("OptionMin")?.unwrap_or(0),
                section.get_parsed("OptionMax")?.unwrap_or(0),
            )?;
            for p in section.params("Option") {
                let (value, name) = p
                    .value
                    .split_once(',')
                    .ok_or_else(|| Error::parse(p.line, "option must be value,name"))?;
                let value: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::parse(p.line, format!("bad option value '{value}'")))?;
                self.add_option(name.trim(), value)
                    .map_err(|e| Error::parse(p.line, e.to_string()))?;
            }
        }
        if let Some(value) = section.get_parsed::<u32>("OptionValue")? {
            // A sound that is no longer offered keeps the default
            if self.option_type == OptionType::List && !self.is_option_value_valid(value) {
                log::warn!(
                    "Action {} option {} not available, using {}",
                    self.action_type,
                    value,
                    self.option_value
                );
            } else {
                self.set_option_value(value)
                    .map_err(|e| Error::parse(section.line, e.to_string()))?;
            }
        }
        if let Some(enabled) = section.get_bool("Enabled")? {
            self.set_enabled(enabled);
        }
        Ok(())
    }
}

/// Sound list offered by sound actions: the built-in sounds followed by
/// the custom sounds, keyed by custom sound index
pub fn sound_options<'a>(custom: impl Iterator<Item = (u32, &'a str)>) -> Vec<ActionOption> {
    BUILTIN_SOUNDS
        .iter()
        .map(|(name, value)| ActionOption {
            name: name.to_string(),
            value: *value,
        })
        .chain(custom.map(|(index, name)| ActionOption {
            name: name.to_string(),
            value: CUSTOM_SOUND_BASE + index,
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file;

    #[test]
    fn test_type_numbering() {
        assert_eq!(ActionType::from_u32(2), Ok(ActionType::SoundAlarm));
        assert_eq!(ActionType::from_u32(10), Ok(ActionType::LogToFile));
        assert_eq!(ActionType::from_u32(102), Ok(ActionType::User(102)));
        for bad in [0, 11, 99, 100, 101] {
            assert_eq!(ActionType::from_u32(bad), Err(Error::InvalidActionType(bad)));
        }
        assert!(ActionType::HighlightTrack.is_builtin());
        assert!(ActionType::User(500).is_user_defined());
        assert_eq!(ActionType::User(500).as_u32(), 500);
    }

    #[test]
    fn test_lifetimes() {
        assert!(ActionType::AutoClear.is_stop_on_clear());
        assert!(ActionType::AutoDelete.is_stop_on_empty());
        assert_eq!(ActionType::SoundAlarm.lifetime(), ActionLifetime::Normal);
        assert!(ActionType::LogToFile.is_one_shot());
        assert!(!ActionType::SoundAlarm.is_one_shot());
    }

    #[test]
    fn test_value_options() {
        let mut a = AlarmAction::new(ActionType::AutoAcknowledge, &[]);
        assert_eq!(a.option_type(), OptionType::Value);
        assert_eq!(a.option_value_type(), OptionValueType::TimeSecs);
        assert_eq!(a.option_value(), 30);
        assert!(a.set_option_value(0).is_err());
        assert_eq!(a.set_option_value(45), Ok(ActionChange::OPTION_VALUE));
        assert_eq!(a.summary(), "Auto acknowledge (45 s)");

        let mut reset = AlarmAction::new(ActionType::AutoReset, &[]);
        assert!(reset.set_option_value(1).is_err());
        assert!(reset
            .set_option_type(OptionType::Value, OptionValueType::None, 0, 5)
            .is_err());
    }

    #[test]
    fn test_sound_list() {
        let sounds = sound_options([(0, "Foghorn")].into_iter());
        let mut a = AlarmAction::new(ActionType::SoundAlarm, &sounds);
        assert_eq!(a.option_type(), OptionType::List);
        assert_eq!(a.option_name(), Some("Beep"));
        a.set_option_value(CUSTOM_SOUND_BASE).unwrap();
        assert_eq!(a.option_name(), Some("Foghorn"));
        assert_eq!(
            AlarmSound::from_option_value(a.option_value()),
            AlarmSound::Custom(0)
        );
        assert!(a.set_option_value(77).is_err());

        // Custom sound removed, selection falls back
        a.set_sound_options(&sound_options(std::iter::empty()));
        assert_eq!(a.option_value(), 0);
    }

    #[test]
    fn test_user_action_save_load() {
        let mut a = AlarmAction::new(ActionType::User(150), &[]);
        a.set_option_type(OptionType::List, OptionValueType::None, 0, 0)
            .unwrap();
        a.add_option("Port", 1).unwrap();
        a.add_option("Starboard", 2).unwrap();
        assert!(a.add_option("Again", 2).is_err());
        a.set_option_value(2).unwrap();
        a.set_enabled(false);

        let mut w = ConfigWriter::new();
        a.save(&mut w);
        let root = config_file::parse(&w.finish()).unwrap();
        let section = root.children("Action").next().unwrap();

        let mut loaded = AlarmAction::new(ActionType::User(150), &[]);
        loaded.load(section).unwrap();
        assert_eq!(loaded.options(), a.options());
        assert_eq!(loaded.option_value(), 2);
        assert_eq!(loaded.option_name(), Some("Starboard"));
        assert!(!loaded.is_enabled());
    }
}
