//! Alarm database
//!
//! Owns the alarm configs and the live alarms, and matches tracks against
//! configs:
//!
//! ```text
//!   track update ──> check_track ──> each enabled config
//!                                      │ test_conditions(track)
//!                                      ▼
//!                          passed: create or retrigger the alarm
//!                          failed: mark the (config, track) alarm untriggered
//!                                      │
//!                                      ▼
//!              action transitions ──> sounds, highlights, log queue
//! ```
//!
//! Periodic work is split into entry points the platform calls from its
//! timers: [`AlarmDatabase::background`], [`AlarmDatabase::check_alarm_timeouts`],
//! [`AlarmDatabase::play_alarm_sounds`] and [`AlarmDatabase::send_net_mesgs`].
//! The track database is never owned here; evaluation reads it through
//! an [`EvalContext`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::action::{sound_options, ActionChange, ActionId, ActionOption, ActionType, AlarmSound};
use super::alarm::{ActionTransition, Alarm, AlarmChange, AlarmId, AlarmState, AlarmStates};
use super::config::{AlarmConfig, ConfigEvent};
use super::output::{AlarmLogRecord, AlarmOutput};
use crate::condition::{
    ConditionChange, ConditionId, EvalContext, GroupChange, GroupEvent, GroupId, GroupResult,
    GroupState, GroupStates,
};
use crate::config_file::{ConfigWriter, Section};
use crate::error::{Error, Result};
use crate::events::{ListenerId, Listeners};
use crate::geo::LatLong;
use crate::ids::ALARM_IDS;
use crate::nmea::{build_ttm, NetMesgType};
use crate::shapes::{ShapeDatabase, ShapeEvent, ShapeId};
use crate::track::{TrackId, TrackTypes, UniTrack};

// Remote control and config file parameter names
pub const PARAM_TRACK_TYPES: &str = "TrackTypes";
pub const PARAM_NET_MESG_TYPE: &str = "NetMesgType";
pub const PARAM_REF_LAT_LONG: &str = "RefLatLong";
pub const PARAM_ALARM_LOG_FILE_PREFIX: &str = "AlarmLogFilePrefix";
pub const PARAM_CUSTOM_ALARM_FILE: &str = "CustomAlarmSoundFile-";
pub const PARAM_CUSTOM_ALARM_NAME: &str = "CustomAlarmSoundName-";

#[derive(Debug, Clone, PartialEq)]
pub enum AlarmDbEvent {
    LoadStart,
    LoadComplete,
    AlarmCreate(AlarmId),
    AlarmChange(AlarmId, AlarmChange),
    /// Sent before the alarm is removed
    AlarmDelete(AlarmId),
    ConfigCreate(GroupId),
    ConfigChange(GroupId, GroupChange),
    ConfigDelete(GroupId),
    ConditionCreate(GroupId, ConditionId),
    ConditionChange(GroupId, ConditionId, ConditionChange),
    ConditionDelete(GroupId, ConditionId),
    ActionCreate(GroupId, ActionId),
    ActionChange(GroupId, ActionId, ActionChange),
    ActionStart(AlarmId, ActionId),
    ActionStop(AlarmId, ActionId),
    ActionDelete(GroupId, ActionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomSound {
    pub file: String,
    pub name: String,
}

/// Tracks and shapes highlighted by one running highlight action
#[derive(Debug, Clone)]
struct Highlight {
    tracks: Vec<TrackId>,
    shapes: Vec<ShapeId>,
    until_ms: Option<u64>,
}

impl Highlight {
    fn is_live(&self, now_ms: u64) -> bool {
        self.until_ms.map_or(true, |until| now_ms < until)
    }
}

/// Parameters a config file can change
struct Settings {
    ref_lat_long: Option<LatLong>,
    alarm_track_types: TrackTypes,
    net_mesg_type: NetMesgType,
    alarm_log_prefix: String,
    custom_sounds: BTreeMap<u32, CustomSound>,
}

#[derive(Debug)]
pub struct AlarmDatabase {
    configs: Vec<AlarmConfig>,
    alarms: BTreeMap<AlarmId, Alarm>,
    ref_lat_long: Option<LatLong>,
    alarm_track_types: TrackTypes,
    net_mesg_type: NetMesgType,
    alarm_log_prefix: String,
    custom_sounds: BTreeMap<u32, CustomSound>,
    /// Running continuous sounds, counted per sound
    sound_refs: BTreeMap<AlarmSound, u32>,
    once_sounds: BTreeSet<AlarmSound>,
    log_queue: Vec<AlarmLogRecord>,
    highlights: BTreeMap<(AlarmId, ActionId), Highlight>,
    /// Alarm flags last reported per track
    track_flags: BTreeMap<TrackId, (bool, bool)>,
    listeners: Listeners<AlarmDbEvent>,
}

impl Default for AlarmDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmDatabase {
    pub fn new() -> Self {
        AlarmDatabase {
            configs: Vec::new(),
            alarms: BTreeMap::new(),
            ref_lat_long: None,
            alarm_track_types: TrackTypes::all(),
            net_mesg_type: NetMesgType::None,
            alarm_log_prefix: String::new(),
            custom_sounds: BTreeMap::new(),
            sound_refs: BTreeMap::new(),
            once_sounds: BTreeSet::new(),
            log_queue: Vec::new(),
            highlights: BTreeMap::new(),
            track_flags: BTreeMap::new(),
            listeners: Listeners::default(),
        }
    }

    fn emit(&mut self, event: AlarmDbEvent) {
        self.listeners.emit(&event);
    }

    pub fn add_event_listener<F>(&mut self, f: F) -> ListenerId
    where
        F: FnMut(&AlarmDbEvent) + Send + Sync + 'static,
    {
        self.listeners.add(f)
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }


    // ========================================================================
    // Settings
    // ========================================================================

    /// Position network messages report distance and bearing from
    pub fn set_ref_lat_long(&mut self, position: Option<LatLong>) {
        self.ref_lat_long = position;
    }

    pub fn ref_lat_long(&self) -> Option<LatLong> {
        self.ref_lat_long
    }

    /// Only tracks of these types raise alarms
    pub fn set_alarm_track_types(&mut self, types: TrackTypes) {
        self.alarm_track_types = types;
    }

    pub fn alarm_track_types(&self) -> TrackTypes {
        self.alarm_track_types
    }

    pub fn set_net_mesg_type(&mut self, mesg_type: NetMesgType) {
        self.net_mesg_type = mesg_type;
    }

    pub fn net_mesg_type(&self) -> NetMesgType {
        self.net_mesg_type
    }

    pub fn set_alarm_log_file_prefix(&mut self, prefix: &str) {
        self.alarm_log_prefix = prefix.trim().to_string();
    }

    pub fn alarm_log_file_prefix(&self) -> &str {
        &self.alarm_log_prefix
    }

    /// Register a sound file. The display name defaults to the file stem.
    pub fn add_custom_alarm_sound(&mut self, index: u32, file: &str) {
        let stem = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file)
            .to_string();
        let entry = self
            .custom_sounds
            .entry(index)
            .or_insert_with(|| CustomSound {
                file: String::new(),
                name: stem,
            });
        entry.file = file.to_string();
        self.refresh_sound_options();
    }

    pub fn set_custom_alarm_sound_name(&mut self, index: u32, name: &str) -> Result<()> {
        let sound = self
            .custom_sounds
            .get_mut(&index)
            .ok_or_else(|| Error::not_found("custom sound", index))?;
        sound.name = name.to_string();
        self.refresh_sound_options();
        Ok(())
    }

    pub fn custom_alarm_sound(&self, index: u32) -> Option<&CustomSound> {
        self.custom_sounds.get(&index)
    }

    /// Display name of a built-in or custom sound
    pub fn alarm_sound_name(&self, sound: AlarmSound) -> Option<&str> {
        match sound {
            AlarmSound::BuiltIn(v) => super::action::BUILTIN_SOUNDS
                .iter()
                .find(|(_, value)| *value == v)
                .map(|(name, _)| *name),
            AlarmSound::Custom(index) => self.custom_sounds.get(&index).map(|s| s.name.as_str()),
        }
    }

    fn sound_options(&self) -> Vec<ActionOption> {
        sound_options(
            self.custom_sounds
                .iter()
                .map(|(index, s)| (*index, s.name.as_str())),
        )
    }

    fn refresh_sound_options(&mut self) {
        let sounds = self.sound_options();
        for config in self.configs.iter_mut() {
            config.set_sound_options(&sounds);
        }
    }

    /// Set a named parameter, as used by remote control and config files
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let bad = || Error::InvalidArgument(format!("bad value '{value}' for {name}"));
        match name {
            PARAM_TRACK_TYPES => {
                let bits: u32 = value.parse().map_err(|_| bad())?;
                self.set_alarm_track_types(TrackTypes::from_bits_truncate(bits));
            }
            PARAM_NET_MESG_TYPE => {
                let v: u32 = value.parse().map_err(|_| bad())?;
                self.set_net_mesg_type(NetMesgType::from_value(v).ok_or_else(bad)?);
            }
            PARAM_REF_LAT_LONG => {
                if value.is_empty() {
                    self.set_ref_lat_long(None);
                } else {
                    let (lat, lon) = value.split_once(',').ok_or_else(bad)?;
                    let lat: f64 = lat.trim().parse().map_err(|_| bad())?;
                    let lon: f64 = lon.trim().parse().map_err(|_| bad())?;
                    let position = LatLong::new(lat, lon);
                    if !position.is_valid() {
                        return Err(bad());
                    }
                    self.set_ref_lat_long(Some(position));
                }
            }
            PARAM_ALARM_LOG_FILE_PREFIX => self.set_alarm_log_file_prefix(value),
            _ => {
                if let Some(index) = name.strip_prefix(PARAM_CUSTOM_ALARM_FILE) {
                    let index: u32 = index.parse().map_err(|_| bad())?;
                    self.add_custom_alarm_sound(index, value);
                } else if let Some(index) = name.strip_prefix(PARAM_CUSTOM_ALARM_NAME) {
                    let index: u32 = index.parse().map_err(|_| bad())?;
                    self.set_custom_alarm_sound_name(index, value)?;
                } else {
                    return Err(Error::InvalidArgument(format!("unknown parameter {name}")));
                }
            }
        }
        Ok(())
    }

    pub fn get_parameter(&self, name: &str) -> Option<String> {
        match name {
            PARAM_TRACK_TYPES => Some(self.alarm_track_types.bits().to_string()),
            PARAM_NET_MESG_TYPE => Some((self.net_mesg_type as u32).to_string()),
            PARAM_REF_LAT_LONG => Some(
                self.ref_lat_long
                    .map(|p| format!("{:.6},{:.6}", p.lat, p.lon))
                    .unwrap_or_default(),
            ),
            PARAM_ALARM_LOG_FILE_PREFIX => Some(self.alarm_log_prefix.clone()),
            _ => {
                if let Some(index) = name.strip_prefix(PARAM_CUSTOM_ALARM_FILE) {
                    let index: u32 = index.parse().ok()?;
                    self.custom_sounds.get(&index).map(|s| s.file.clone())
                } else if let Some(index) = name.strip_prefix(PARAM_CUSTOM_ALARM_NAME) {
                    let index: u32 = index.parse().ok()?;
                    self.custom_sounds.get(&index).map(|s| s.name.clone())
                } else {
                    None
                }
            }
        }
    }

    // ========================================================================
    // Alarms
    // ========================================================================

    pub fn alarm(&self, id: AlarmId) -> Option<&Alarm> {
        self.alarms.get(&id)
    }

    /// Alarms in ID (creation) order
    pub fn alarms(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.values()
    }

    pub fn num_alarms(&self, states: AlarmStates) -> usize {
        self.alarms
            .values()
            .filter(|a| states.contains(a.state().as_flag()))
            .count()
    }

    pub fn delete_alarm(&mut self, id: AlarmId) -> Result<()> {
        if !self.alarms.contains_key(&id) {
            return Err(Error::not_found("alarm", id));
        }
        self.remove_alarm(id);
        Ok(())
    }

    pub fn delete_alarms(&mut self, states: AlarmStates) -> usize {
        let ids: Vec<AlarmId> = self
            .alarms
            .values()
            .filter(|a| states.contains(a.state().as_flag()))
            .map(|a| a.id())
            .collect();
        for id in &ids {
            self.remove_alarm(*id);
        }
        ids.len()
    }

    pub fn set_alarm_state(&mut self, id: AlarmId, state: AlarmState, now_ms: u64) -> Result<()> {
        let alarm = self
            .alarms
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("alarm", id))?;
        let (changes, transitions) = alarm.set_state(state, now_ms)?;
        self.after_alarm_update(id, changes, transitions, now_ms);
        Ok(())
    }

    /// Move every alarm in `states`, optionally only those involving
    /// `track`, forward to `state`. Alarms already past it are left alone.
    pub fn set_alarms_state(
        &mut self,
        state: AlarmState,
        track: Option<TrackId>,
        states: AlarmStates,
        now_ms: u64,
    ) -> Result<usize> {
        if state == AlarmState::Unknown {
            return Err(Error::InvalidState(state as u32));
        }
        let ids: Vec<AlarmId> = self
            .alarms
            .values()
            .filter(|a| states.contains(a.state().as_flag()))
            .filter(|a| track.map_or(true, |t| a.involves_track(t)))
            .map(|a| a.id())
            .collect();
        let mut count = 0;
        for id in ids {
            if self.set_alarm_state(id, state, now_ms).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Advance every alarm in `states` to its next state
    pub fn set_next_alarms_state(&mut self, states: AlarmStates, now_ms: u64) -> usize {
        let targets: Vec<(AlarmId, AlarmState)> = self
            .alarms
            .values()
            .filter(|a| states.contains(a.state().as_flag()))
            .map(|a| (a.id(), a.next_state()))
            .collect();
        let mut count = 0;
        for (id, state) in targets {
            if self.set_alarm_state(id, state, now_ms).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Live alarms as JSON, for status dumps
    pub fn alarms_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.alarms
                .values()
                .filter_map(|a| serde_json::to_value(a).ok())
                .collect(),
        )
    }

    /// Tracks highlighted by running highlight actions
    pub fn highlighted_tracks(&self, now_ms: u64) -> BTreeSet<TrackId> {
        self.highlights
            .values()
            .filter(|h| h.is_live(now_ms))
            .flat_map(|h| h.tracks.iter().copied())
            .collect()
    }

    pub fn highlighted_shapes(&self, now_ms: u64) -> BTreeSet<ShapeId> {
        self.highlights
            .values()
            .filter(|h| h.is_live(now_ms))
            .flat_map(|h| h.shapes.iter().copied())
            .collect()
    }

    /// Alarm and cleared-alarm flags that changed since the last call, as
    /// `(track, is_alarm, is_cleared)`
    pub fn take_track_flag_changes(&mut self) -> Vec<(TrackId, bool, bool)> {
        let mut flags: BTreeMap<TrackId, (bool, bool)> = BTreeMap::new();
        for alarm in self.alarms.values() {
            let Some(track) = alarm.track1() else {
                continue;
            };
            let entry = flags.entry(track).or_default();
            match alarm.state() {
                AlarmState::Active | AlarmState::Acknowledged => entry.0 = true,
                AlarmState::Cleared => entry.1 = true,
                AlarmState::Empty | AlarmState::Unknown => {}
            }
        }
        flags.retain(|_, f| f.0 || f.1);
        for f in flags.values_mut() {
            // An alarming track is never shown as cleared
            f.1 &= !f.0;
        }

        let mut changes = Vec::new();
        for (id, old) in &self.track_flags {
            if !flags.contains_key(id) && *old != (false, false) {
                changes.push((*id, false, false));
            }
        }
        for (id, new) in &flags {
            if self.track_flags.get(id) != Some(new) {
                changes.push((*id, new.0, new.1));
            }
        }
        changes.sort_by_key(|c| c.0);
        self.track_flags = flags;
        changes
    }

    fn remove_alarm(&mut self, id: AlarmId) {
        let Some(alarm) = self.alarms.get_mut(&id) else {
            return;
        };
        let transitions = alarm.stop_all_actions();
        for t in transitions.iter().filter(|t| !t.start) {
            self.stop_action(id, t);
        }
        self.emit(AlarmDbEvent::AlarmDelete(id));
        self.alarms.remove(&id);
        log::debug!("Deleted alarm {}", id);
    }

    fn after_alarm_update(
        &mut self,
        id: AlarmId,
        changes: AlarmChange,
        transitions: Vec<ActionTransition>,
        now_ms: u64,
    ) {
        if !changes.is_empty() {
            self.emit(AlarmDbEvent::AlarmChange(id, changes));
        }
        self.apply_transitions(id, &transitions, now_ms);
        let auto_delete = self
            .alarms
            .get(&id)
            .is_some_and(|a| a.state() == AlarmState::Empty && a.is_auto_delete());
        if auto_delete {
            log::debug!("Alarm {} empty, auto deleting", id);
            self.remove_alarm(id);
        }
    }

    /// Carry out the database side of started and stopped actions
    fn apply_transitions(&mut self, id: AlarmId, transitions: &[ActionTransition], now_ms: u64) {
        let Some(alarm) = self.alarms.get(&id) else {
            return;
        };
        let track1 = alarm.track1();
        let shapes: Vec<ShapeId> = alarm
            .shape()
            .into_iter()
            .chain(alarm.triggers().iter().filter_map(|t| t.shape))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let record = AlarmLogRecord {
            time_ms: now_ms,
            alarm_id: id,
            config_name: alarm.config_name().to_string(),
            state: alarm.state(),
            track1,
            track2: alarm.track2(),
            trigger: alarm.trigger_string(),
        };

        for t in transitions {
            if !t.start {
                self.stop_action(id, t);
                continue;
            }
            self.emit(AlarmDbEvent::ActionStart(id, t.action_id));
            let sound = AlarmSound::from_option_value(t.option_value);
            match t.action_type {
                ActionType::SoundAlarm => {
                    *self.sound_refs.entry(sound).or_insert(0) += 1;
                }
                ActionType::SoundAlarmOnce => {
                    self.once_sounds.insert(sound);
                }
                ActionType::LogToFile => {
                    self.log_queue.push(record.clone());
                }
                ActionType::HighlightTrack | ActionType::HighlightShapes => {
                    let (tracks, shapes) = if t.action_type == ActionType::HighlightTrack {
                        (track1.into_iter().collect(), Vec::new())
                    } else {
                        (Vec::new(), shapes.clone())
                    };
                    let until_ms =
                        (t.option_value > 0).then(|| now_ms + u64::from(t.option_value) * 1000);
                    self.highlights.insert(
                        (id, t.action_id),
                        Highlight {
                            tracks,
                            shapes,
                            until_ms,
                        },
                    );
                }
                _ => {}
            }
        }
    }

    /// Stopping an action does not depend on the time
    fn stop_action(&mut self, id: AlarmId, t: &ActionTransition) {
        self.emit(AlarmDbEvent::ActionStop(id, t.action_id));
        match t.action_type {
            ActionType::SoundAlarm => {
                let sound = AlarmSound::from_option_value(t.option_value);
                if let Some(count) = self.sound_refs.get_mut(&sound) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.sound_refs.remove(&sound);
                    }
                }
            }
            ActionType::HighlightTrack | ActionType::HighlightShapes => {
                self.highlights.remove(&(id, t.action_id));
            }
            _ => {}
        }
    }

    // ========================================================================
    // Configs
    // ========================================================================

    pub fn create_config(&mut self, name: &str, shared: bool) -> GroupId {
        let mut config = AlarmConfig::new(self.sound_options());
        config.group_mut().set_shared(shared);
        config.group_mut().init_display_name(name);
        config.take_events();
        let id = config.id();
        self.configs.push(config);
        log::info!("Created alarm config {} '{}'", id, name);
        self.emit(AlarmDbEvent::ConfigCreate(id));
        id
    }

    pub fn config(&self, id: GroupId) -> Option<&AlarmConfig> {
        self.configs.iter().find(|c| c.id() == id)
    }

    pub fn configs(&self) -> impl Iterator<Item = &AlarmConfig> {
        self.configs.iter()
    }

    pub fn num_configs(&self, states: GroupStates) -> usize {
        self.configs
            .iter()
            .filter(|c| states.contains(c.group().state().as_flag()))
            .count()
    }

    /// Modify a config. Changes are reported as config, condition and
    /// action events, and the config's alarms pick up action changes.
    pub fn edit_config<R>(
        &mut self,
        id: GroupId,
        now_ms: u64,
        f: impl FnOnce(&mut AlarmConfig) -> Result<R>,
    ) -> Result<R> {
        let index = self
            .configs
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| Error::not_found("alarm config", id))?;
        let result = f(&mut self.configs[index]);

        let events = self.configs[index].take_events();
        let resync = events.iter().any(|e| {
            !matches!(
                e,
                ConfigEvent::Group(GroupEvent::ConditionCreate(_))
                    | ConfigEvent::Group(GroupEvent::ConditionChange(..))
                    | ConfigEvent::Group(GroupEvent::ConditionDelete(_))
            )
        });
        for event in events {
            self.emit(config_event(id, event));
        }
        if resync {
            self.sync_config_alarms(index, now_ms);
        }
        result
    }

    fn sync_config_alarms(&mut self, index: usize, now_ms: u64) {
        let config = &self.configs[index];
        let mut updates = Vec::new();
        for alarm in self
            .alarms
            .values_mut()
            .filter(|a| a.config_id() == config.id())
        {
            updates.push((alarm.id(), alarm.sync_actions(config)));
        }
        for (id, transitions) in updates {
            self.after_alarm_update(id, AlarmChange::empty(), transitions, now_ms);
        }
    }

    pub fn delete_config(&mut self, id: GroupId) -> Result<()> {
        let index = self
            .configs
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| Error::not_found("alarm config", id))?;
        if !self.configs[index].group().can_delete() {
            return Err(Error::Restricted(format!("alarm config {id} cannot be deleted")));
        }
        self.remove_config(index);
        Ok(())
    }

    fn remove_config(&mut self, index: usize) {
        let id = self.configs[index].id();
        let alarms: Vec<AlarmId> = self
            .alarms
            .values()
            .filter(|a| a.config_id() == id)
            .map(|a| a.id())
            .collect();
        for alarm in alarms {
            self.remove_alarm(alarm);
        }
        self.emit(AlarmDbEvent::ConfigDelete(id));
        self.configs.remove(index);
        log::info!("Deleted alarm config {}", id);
    }

    fn delete_matching_configs(&mut self, states: GroupStates, shared: bool) -> usize {
        let ids: Vec<GroupId> = self
            .configs
            .iter()
            .filter(|c| c.group().is_shared() == shared)
            .filter(|c| states.contains(c.group().state().as_flag()))
            .filter(|c| c.group().can_delete())
            .map(|c| c.id())
            .collect();
        for id in &ids {
            if let Some(index) = self.configs.iter().position(|c| c.id() == *id) {
                self.remove_config(index);
            }
        }
        ids.len()
    }

    pub fn delete_configs(&mut self, states: GroupStates) -> usize {
        self.delete_matching_configs(states, false)
    }

    pub fn delete_shared_configs(&mut self, states: GroupStates) -> usize {
        self.delete_matching_configs(states, true)
    }

    /// Enable or disable every configured config in `states`
    pub fn set_configs_state(&mut self, enabled: bool, states: GroupStates, now_ms: u64) -> Result<()> {
        let state = if enabled {
            GroupState::Enabled
        } else {
            GroupState::Disabled
        };
        let ids: Vec<GroupId> = self
            .configs
            .iter()
            .filter(|c| states.contains(c.group().state().as_flag()))
            .filter(|c| c.group().is_config_valid())
            .map(|c| c.id())
            .collect();
        for id in ids {
            self.edit_config(id, now_ms, |c| c.group_mut().set_state(state))?;
        }
        Ok(())
    }

    pub fn is_track_group_used_in_config(&self, group_id: u32) -> bool {
        self.configs
            .iter()
            .any(|c| c.group().uses_track_group(group_id))
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    fn is_track_eligible(&self, track: &UniTrack) -> bool {
        !track.is_deleted()
            && track.is_allowed_by_filters()
            && self
                .alarm_track_types
                .contains(track.track_type().as_flag())
    }

    /// Test a created or updated track against every enabled config
    pub fn check_track(&mut self, id: TrackId, ctx: &EvalContext<'_>) {
        let Some(track) = ctx.tracks.track(id) else {
            return;
        };
        for index in 0..self.configs.len() {
            let group = self.configs[index].group();
            if group.is_enabled() && !group.is_track_independent() {
                self.check_config(index, Some(track), ctx);
            }
        }

        let mut updated = Vec::new();
        for alarm in self.alarms.values_mut().filter(|a| a.involves_track(id)) {
            if alarm.update_cpa(ctx) {
                updated.push(alarm.id());
            }
        }
        for alarm in updated {
            self.emit(AlarmDbEvent::AlarmChange(alarm, AlarmChange::CPA));
        }
    }

    /// Re-test configs with clock based conditions. Track independent
    /// configs are tested once, mixed ones against every track.
    pub fn background(&mut self, ctx: &EvalContext<'_>) {
        for index in 0..self.configs.len() {
            let group = self.configs[index].group();
            if !group.is_enabled() || !group.has_background_conditions() {
                continue;
            }
            if group.is_track_independent() {
                self.check_config(index, None, ctx);
            } else {
                for track in ctx.tracks.tracks() {
                    self.check_config(index, Some(track), ctx);
                }
            }
        }
    }

    fn check_config(&mut self, index: usize, track: Option<&UniTrack>, ctx: &EvalContext<'_>) {
        let result = match track {
            Some(t) if !self.is_track_eligible(t) => GroupResult::default(),
            _ => {
                let ctx = ctx.with_candidate_types(self.alarm_track_types);
                self.configs[index].group().test_conditions(track, &ctx)
            }
        };
        self.report(index, track.map(|t| t.id()), result, ctx.now_ms);
    }

    /// Create, retrigger or untrigger the alarm of a (config, track) pair
    fn report(&mut self, index: usize, track: Option<TrackId>, result: GroupResult, now_ms: u64) {
        let config_id = self.configs[index].id();

        if !result.passed {
            let ids: Vec<AlarmId> = self
                .alarms
                .values()
                .filter(|a| a.config_id() == config_id && a.track1() == track)
                .map(|a| a.id())
                .collect();
            for id in ids {
                if let Some(alarm) = self.alarms.get_mut(&id) {
                    let (changes, transitions) = alarm.update(false, Vec::new(), now_ms);
                    self.after_alarm_update(id, changes, transitions, now_ms);
                }
            }
            return;
        }

        // A pair already alarming from the other track's side is the same alarm
        let other = result.triggers.iter().find_map(|t| t.track);
        let existing = self
            .alarms
            .values()
            .find(|a| {
                a.config_id() == config_id
                    && (a.track1() == track
                        || (other.is_some() && a.track1() == other && a.track2() == track))
            })
            .map(|a| a.id());

        match existing {
            Some(id) => {
                if let Some(alarm) = self.alarms.get_mut(&id) {
                    let (changes, transitions) = alarm.update(true, result.triggers, now_ms);
                    self.after_alarm_update(id, changes, transitions, now_ms);
                }
            }
            None => {
                let id = ALARM_IDS.next_id();
                let (alarm, transitions) =
                    Alarm::new(id, &self.configs[index], track, result.triggers, now_ms);
                log::info!(
                    "Alarm {} raised by '{}' on track {:?}: {}",
                    id,
                    alarm.config_name(),
                    track,
                    alarm.trigger_string()
                );
                self.alarms.insert(id, alarm);
                self.emit(AlarmDbEvent::AlarmCreate(id));
                self.apply_transitions(id, &transitions, now_ms);
            }
        }
    }

    /// Retire every alarm that involves a deleted track
    pub fn handle_track_delete(&mut self, id: TrackId) {
        let alarms: Vec<AlarmId> = self
            .alarms
            .values()
            .filter(|a| a.involves_track(id))
            .map(|a| a.id())
            .collect();
        for alarm in alarms {
            self.remove_alarm(alarm);
        }
        self.track_flags.remove(&id);
    }

    /// Forward a shape database change to every config
    pub fn handle_shape_event(&mut self, event: ShapeEvent, shapes: &ShapeDatabase, now_ms: u64) {
        let ids: Vec<GroupId> = self.configs.iter().map(|c| c.id()).collect();
        for id in ids {
            let result = self.edit_config(id, now_ms, |c| {
                c.group_mut().handle_shape_event(event, shapes);
                Ok(())
            });
            if let Err(e) = result {
                log::warn!("Alarm config {}: shape change not applied: {}", id, e);
            }
        }
        match event {
            ShapeEvent::Delete(shape) => {
                for h in self.highlights.values_mut() {
                    h.shapes.retain(|s| *s != shape);
                }
            }
            ShapeEvent::DeleteAll | ShapeEvent::ReloadAll => {
                for h in self.highlights.values_mut() {
                    h.shapes.clear();
                }
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Apply acknowledge and clear timeouts
    pub fn check_alarm_timeouts(&mut self, now_ms: u64) {
        let ids: Vec<AlarmId> = self.alarms.keys().copied().collect();
        for id in ids {
            if let Some(alarm) = self.alarms.get_mut(&id) {
                let (changes, transitions) = alarm.check_timeouts(now_ms);
                self.after_alarm_update(id, changes, transitions, now_ms);
            }
        }
        self.highlights.retain(|_, h| h.is_live(now_ms));
    }

    /// Play every running alarm sound once per call, each sound at most
    /// once however many alarms use it, then the pending one-shot sounds
    pub fn play_alarm_sounds(&mut self, output: &mut dyn AlarmOutput) {
        for sound in self.sound_refs.keys() {
            output.play_sound(*sound, false);
        }
        for sound in std::mem::take(&mut self.once_sounds) {
            output.play_sound(sound, true);
        }
    }

    /// Send a network message for every alarm with a running network
    /// message action
    pub fn send_net_mesgs(&mut self, ctx: &EvalContext<'_>, output: &mut dyn AlarmOutput) {
        if self.net_mesg_type == NetMesgType::None {
            return;
        }
        for alarm in self.alarms.values().filter(|a| a.is_sending_net_mesgs()) {
            let Some(track) = alarm.track1().and_then(|id| ctx.tracks.track(id)) else {
                continue;
            };
            let Some(mesg) = build_ttm(
                self.net_mesg_type,
                track,
                self.ref_lat_long,
                alarm.cpa(),
                alarm.net_mesg_alarm_value(),
                ctx.now_ms,
            ) else {
                continue;
            };
            if let Err(e) = output.send_net_mesg(&mesg) {
                log::warn!("Failed to send network message for alarm {}: {}", alarm.id(), e);
            }
        }
    }

    /// Hand queued log lines to the output. Nothing is logged without a
    /// log file prefix.
    pub fn flush_alarm_log(&mut self, output: &mut dyn AlarmOutput) {
        let records = std::mem::take(&mut self.log_queue);
        if self.alarm_log_prefix.is_empty() {
            if !records.is_empty() {
                log::debug!("No alarm log prefix, dropping {} records", records.len());
            }
            return;
        }
        for record in &records {
            if let Err(e) = output.log_alarm(record) {
                log::warn!("Failed to log alarm {}: {}", record.alarm_id, e);
            }
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write parameters and the shared or per-view configs
    pub fn save(&self, w: &mut ConfigWriter, shared: bool) {
        w.param(PARAM_TRACK_TYPES, self.alarm_track_types.bits());
        w.param(PARAM_NET_MESG_TYPE, self.net_mesg_type as u32);
        if let Some(p) = self.get_parameter(PARAM_REF_LAT_LONG).filter(|p| !p.is_empty()) {
            w.param(PARAM_REF_LAT_LONG, p);
        }
        if !self.alarm_log_prefix.is_empty() {
            w.param(PARAM_ALARM_LOG_FILE_PREFIX, &self.alarm_log_prefix);
        }
        for (index, sound) in &self.custom_sounds {
            w.param(&format!("{PARAM_CUSTOM_ALARM_FILE}{index}"), &sound.file);
            w.param(&format!("{PARAM_CUSTOM_ALARM_NAME}{index}"), &sound.name);
        }
        for config in self.configs.iter().filter(|c| c.group().is_shared() == shared) {
            if config.group().can_save() {
                config.save(w);
            }
        }
    }

    /// Replace the shared or per-view configs from a parsed config file
    pub fn load(&mut self, root: &Section, shared: bool, shapes: &ShapeDatabase) -> Result<usize> {
        self.emit(AlarmDbEvent::LoadStart);
        let result = self.load_sections(root, shared, shapes);
        self.emit(AlarmDbEvent::LoadComplete);
        result
    }

    fn load_sections(&mut self, root: &Section, shared: bool, shapes: &ShapeDatabase) -> Result<usize> {
        let saved = self.settings();
        let configs = match self.parse_sections(root, shared, shapes) {
            Ok(configs) => configs,
            Err(e) => {
                self.restore_settings(saved);
                return Err(e);
            }
        };

        if shared {
            self.delete_shared_configs(GroupStates::all());
        } else {
            self.delete_configs(GroupStates::all());
        }
        let count = configs.len();
        for config in configs {
            let id = config.id();
            self.configs.push(config);
            self.emit(AlarmDbEvent::ConfigCreate(id));
        }
        log::info!(
            "Loaded {} {} alarm configs",
            count,
            if shared { "shared" } else { "view" }
        );
        Ok(count)
    }

    /// Apply the parameters and build every config, leaving the existing
    /// configs in place
    fn parse_sections(
        &mut self,
        root: &Section,
        shared: bool,
        shapes: &ShapeDatabase,
    ) -> Result<Vec<AlarmConfig>> {
        // Sound files first so sound actions find their options
        let mut params: Vec<_> = root.params.iter().collect();
        params.sort_by_key(|p| !p.key.starts_with(PARAM_CUSTOM_ALARM_FILE));
        for p in params {
            self.set_parameter(&p.key, &p.value)
                .map_err(|e| Error::parse(p.line, e.to_string()))?;
        }

        let mut configs = Vec::new();
        for section in root.children("AlarmConfig") {
            let mut config = AlarmConfig::new(self.sound_options());
            config.load(section)?;
            config.group_mut().set_shared(shared);
            config.group_mut().resolve_shapes(shapes);
            config.take_events();
            configs.push(config);
        }
        Ok(configs)
    }

    fn settings(&self) -> Settings {
        Settings {
            ref_lat_long: self.ref_lat_long,
            alarm_track_types: self.alarm_track_types,
            net_mesg_type: self.net_mesg_type,
            alarm_log_prefix: self.alarm_log_prefix.clone(),
            custom_sounds: self.custom_sounds.clone(),
        }
    }

    fn restore_settings(&mut self, saved: Settings) {
        self.ref_lat_long = saved.ref_lat_long;
        self.alarm_track_types = saved.alarm_track_types;
        self.net_mesg_type = saved.net_mesg_type;
        self.alarm_log_prefix = saved.alarm_log_prefix;
        self.custom_sounds = saved.custom_sounds;
        self.refresh_sound_options();
    }

    /// Remove every alarm and config and restore default settings
    pub fn reset(&mut self) {
        let ids: Vec<AlarmId> = self.alarms.keys().copied().collect();
        for id in ids {
            self.remove_alarm(id);
        }
        while !self.configs.is_empty() {
            self.remove_config(self.configs.len() - 1);
        }
        self.ref_lat_long = None;
        self.alarm_track_types = TrackTypes::all();
        self.net_mesg_type = NetMesgType::None;
        self.alarm_log_prefix.clear();
        self.custom_sounds.clear();
        self.sound_refs.clear();
        self.once_sounds.clear();
        self.log_queue.clear();
        self.highlights.clear();
        log::info!("Alarm database reset");
    }
}

fn config_event(config: GroupId, event: ConfigEvent) -> AlarmDbEvent {
    match event {
        ConfigEvent::Group(GroupEvent::Change(changes)) => AlarmDbEvent::ConfigChange(config, changes),
        ConfigEvent::Group(GroupEvent::ConditionCreate(c)) => AlarmDbEvent::ConditionCreate(config, c),
        ConfigEvent::Group(GroupEvent::ConditionChange(c, changes)) => {
            AlarmDbEvent::ConditionChange(config, c, changes)
        }
        ConfigEvent::Group(GroupEvent::ConditionDelete(c)) => AlarmDbEvent::ConditionDelete(config, c),
        ConfigEvent::ActionCreate(a) => AlarmDbEvent::ActionCreate(config, a),
        ConfigEvent::ActionChange(a, changes) => AlarmDbEvent::ActionChange(config, a, changes),
        ConfigEvent::ActionDelete(a) => AlarmDbEvent::ActionDelete(config, a),
    }
}
