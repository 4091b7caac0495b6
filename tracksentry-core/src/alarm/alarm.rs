//! Alarm state machine
//!
//! One alarm per config and triggering track (or track pair). States only
//! move forward:
//!
//! ```text
//!             ack / timeout          clear / timeout
//!   ACTIVE ─────────────────> ACKNOWLEDGED ─────────> CLEARED
//!      │                                                 │ not triggering
//!      │ clear                                           ▼
//!      └───────────────────────────────────────────>   EMPTY
//!                                                        │ triggers again
//!                       auto reset  <────────────────────┘
//! ```
//!
//! Clearing an alarm whose condition no longer holds empties it straight
//! away. Every state change reconciles the started actions and returns the
//! resulting [`ActionTransition`]s so the database can drive sounds,
//! highlights and logging.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::action::{ActionId, ActionLifetime, ActionType};
use super::config::AlarmConfig;
use crate::condition::{EvalContext, GroupId, Trigger};
use crate::cpa::{calculate_cpa, CpaResult, Motion};
use crate::error::{Error, Result};
use crate::geo::Velocity;
use crate::shapes::ShapeId;
use crate::track::{TrackId, UniTrackDatabase};

pub type AlarmId = u32;

/// CPA of a live alarm is recomputed at most this often
pub const CPA_UPDATE_INTERVAL_MS: u64 = 1000;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    FromPrimitive,
    Serialize_repr,
    Deserialize_repr,
)]
#[repr(u32)]
pub enum AlarmState {
    #[default]
    Unknown = 0x00,
    Cleared = 0x01,
    Acknowledged = 0x02,
    Active = 0x04,
    Empty = 0x08,
}

impl AlarmState {
    pub fn as_flag(self) -> AlarmStates {
        AlarmStates::from_bits_retain(self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            AlarmState::Unknown => "Unknown",
            AlarmState::Cleared => "Cleared",
            AlarmState::Acknowledged => "Acknowledged",
            AlarmState::Active => "Active",
            AlarmState::Empty => "Empty",
        }
    }

    fn rank(self) -> u8 {
        match self {
            AlarmState::Unknown => 0,
            AlarmState::Active => 1,
            AlarmState::Acknowledged => 2,
            AlarmState::Cleared => 3,
            AlarmState::Empty => 4,
        }
    }

    /// Whether actions with this lifetime run in this state
    fn runs(self, lifetime: ActionLifetime) -> bool {
        match lifetime {
            ActionLifetime::Normal => self == AlarmState::Active,
            ActionLifetime::StopOnClear => {
                matches!(self, AlarmState::Active | AlarmState::Acknowledged)
            }
            ActionLifetime::StopOnEmpty => matches!(
                self,
                AlarmState::Active | AlarmState::Acknowledged | AlarmState::Cleared
            ),
        }
    }
}

bitflags! {
    /// Set of alarm states for bulk queries
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlarmStates: u32 {
        const CLEARED = 0x01;
        const ACKNOWLEDGED = 0x02;
        const ACTIVE = 0x04;
        const EMPTY = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AlarmChange: u32 {
        const STATE = 0x01;
        const TRIGGER = 0x02;
        const CPA = 0x04;
    }
}

/// An action of an alarm being started or stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTransition {
    pub action_id: ActionId,
    pub action_type: ActionType,
    pub option_value: u32,
    pub start: bool,
}

#[derive(Debug, Clone)]
struct ActionInfo {
    action_id: ActionId,
    action_type: ActionType,
    option_value: u32,
    is_started: bool,
}

impl ActionInfo {
    fn transition(&self, start: bool) -> ActionTransition {
        ActionTransition {
            action_id: self.action_id,
            action_type: self.action_type,
            option_value: self.option_value,
            start,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    id: AlarmId,
    config_id: GroupId,
    config_name: String,
    state: AlarmState,
    trigger_count: u32,
    trigger_time_ms: u64,
    state_change_time_ms: u64,
    reset_time_ms: u64,
    track1: Option<TrackId>,
    track2: Option<TrackId>,
    shape: Option<ShapeId>,
    ref_point: Option<u32>,
    triggers: Vec<Trigger>,
    cpa: Option<CpaResult>,
    cpa_limit_metres: Option<f64>,
    tcpa_limit_secs: Option<f64>,
    last_cpa_update_ms: u64,
    ack_timeout_secs: Option<u32>,
    clear_timeout_secs: Option<u32>,
    net_mesg_value: Option<u32>,
    #[serde(skip)]
    actions: Vec<ActionInfo>,
}

impl Alarm {
    /// Raise a new alarm. It starts active with the config's actions
    /// started.
    pub(crate) fn new(
        id: AlarmId,
        config: &AlarmConfig,
        track1: Option<TrackId>,
        triggers: Vec<Trigger>,
        now_ms: u64,
    ) -> (Alarm, Vec<ActionTransition>) {
        let mut alarm = Alarm {
            id,
            config_id: config.id(),
            config_name: config.display_name().to_string(),
            state: AlarmState::Active,
            trigger_count: 1,
            trigger_time_ms: now_ms,
            state_change_time_ms: now_ms,
            reset_time_ms: now_ms,
            track1,
            track2: None,
            shape: None,
            ref_point: None,
            triggers: Vec::new(),
            cpa: None,
            cpa_limit_metres: None,
            tcpa_limit_secs: None,
            last_cpa_update_ms: now_ms,
            ack_timeout_secs: None,
            clear_timeout_secs: None,
            net_mesg_value: None,
            actions: Vec::new(),
        };
        alarm.set_triggers(triggers);
        let transitions = alarm.sync_actions(config);
        (alarm, transitions)
    }

    pub fn id(&self) -> AlarmId {
        self.id
    }

    pub fn config_id(&self) -> GroupId {
        self.config_id
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    pub fn trigger_time_ms(&self) -> u64 {
        self.trigger_time_ms
    }

    pub fn state_change_time_ms(&self) -> u64 {
        self.state_change_time_ms
    }

    pub fn reset_time_ms(&self) -> u64 {
        self.reset_time_ms
    }

    pub fn track1(&self) -> Option<TrackId> {
        self.track1
    }

    pub fn track2(&self) -> Option<TrackId> {
        self.track2
    }

    pub fn shape(&self) -> Option<ShapeId> {
        self.shape
    }

    pub fn ref_point(&self) -> Option<u32> {
        self.ref_point
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn involves_track(&self, id: TrackId) -> bool {
        self.track1 == Some(id) || self.track2 == Some(id)
    }

    /// Most recent CPA, with the condition's range and time limits
    pub fn cpa(&self) -> Option<&CpaResult> {
        self.cpa.as_ref()
    }

    pub fn cpa_limit_metres(&self) -> Option<f64> {
        self.cpa_limit_metres
    }

    pub fn tcpa_limit_secs(&self) -> Option<f64> {
        self.tcpa_limit_secs
    }

    pub fn acknowledge_timeout_secs(&self) -> Option<u32> {
        self.ack_timeout_secs
    }

    pub fn clear_timeout_secs(&self) -> Option<u32> {
        self.clear_timeout_secs
    }

    pub fn is_auto_reset(&self) -> bool {
        self.has_action(ActionType::AutoReset)
    }

    pub fn is_auto_delete(&self) -> bool {
        self.has_action(ActionType::AutoDelete)
    }

    pub fn is_sending_net_mesgs(&self) -> bool {
        self.net_mesg_value.is_some()
    }

    /// Value reported as the target name in network messages
    pub fn net_mesg_alarm_value(&self) -> u32 {
        self.net_mesg_value.unwrap_or(0)
    }

    fn has_action(&self, action_type: ActionType) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }

    pub fn is_action_started(&self, id: ActionId) -> bool {
        self.actions.iter().any(|a| a.action_id == id && a.is_started)
    }

    /// Description of what triggered the alarm
    pub fn trigger_string(&self) -> String {
        let parts: Vec<String> = self.triggers.iter().map(|t| t.to_string()).collect();
        parts.join("; ")
    }

    fn set_triggers(&mut self, triggers: Vec<Trigger>) {
        if triggers.is_empty() {
            return;
        }
        // Seen from track2's side the other track is track1. The pair and
        // its CPA keep track1's orientation.
        let other = triggers.iter().find_map(|t| t.track);
        let from_track2 = other.is_some() && other == self.track1;
        if !from_track2 {
            self.track2 = other;
        }
        self.shape = triggers.iter().find_map(|t| t.shape);
        self.ref_point = triggers.iter().find_map(|t| t.ref_point);
        if let Some(t) = triggers
            .iter()
            .find(|t| t.condition_type.is_cpa())
            .filter(|_| !from_track2)
        {
            self.cpa = t.cpa;
            self.cpa_limit_metres = t.range_limit.is_active().then_some(t.range_limit.value);
            self.tcpa_limit_secs = t.time_limit.is_active().then_some(t.time_limit.value);
        }
        self.triggers = triggers;
    }

    // ========================================================================
    // State
    // ========================================================================

    /// State reached by the next user "advance"
    pub fn next_state(&self) -> AlarmState {
        match self.state {
            AlarmState::Unknown => AlarmState::Active,
            AlarmState::Active => AlarmState::Acknowledged,
            AlarmState::Acknowledged | AlarmState::Cleared => AlarmState::Cleared,
            AlarmState::Empty => AlarmState::Empty,
        }
    }

    /// Move to a later state
    pub(crate) fn set_state(
        &mut self,
        state: AlarmState,
        now_ms: u64,
    ) -> Result<(AlarmChange, Vec<ActionTransition>)> {
        if state == AlarmState::Unknown {
            return Err(Error::InvalidState(state as u32));
        }
        if state == self.state {
            return Ok((AlarmChange::empty(), Vec::new()));
        }
        if state.rank() < self.state.rank() {
            return Err(Error::InvalidStateTransition {
                from: self.state.name().to_string(),
                to: state.name().to_string(),
            });
        }
        let state = if state == AlarmState::Cleared && self.trigger_count == 0 {
            AlarmState::Empty
        } else {
            state
        };
        Ok(self.change_state(state, now_ms))
    }

    fn change_state(
        &mut self,
        state: AlarmState,
        now_ms: u64,
    ) -> (AlarmChange, Vec<ActionTransition>) {
        if state == self.state {
            return (AlarmChange::empty(), Vec::new());
        }
        log::debug!(
            "Alarm {} {} -> {}",
            self.id,
            self.state.name(),
            state.name()
        );
        self.state = state;
        self.state_change_time_ms = now_ms;
        (AlarmChange::STATE, self.start_stop_actions())
    }

    /// Record the result of testing the alarm's config against its track
    pub(crate) fn update(
        &mut self,
        triggered: bool,
        triggers: Vec<Trigger>,
        now_ms: u64,
    ) -> (AlarmChange, Vec<ActionTransition>) {
        if triggered {
            self.trigger_count = self.trigger_count.saturating_add(1);
            self.set_triggers(triggers);
            if self.state == AlarmState::Empty && self.is_auto_reset() {
                return self.reset(now_ms);
            }
            return (AlarmChange::TRIGGER, Vec::new());
        }

        if self.trigger_count == 0 {
            return (AlarmChange::empty(), Vec::new());
        }
        self.trigger_count = 0;
        let (changes, transitions) = if self.state == AlarmState::Cleared {
            self.change_state(AlarmState::Empty, now_ms)
        } else {
            (AlarmChange::empty(), Vec::new())
        };
        (changes | AlarmChange::TRIGGER, transitions)
    }

    /// Re-arm an empty alarm that triggered again
    fn reset(&mut self, now_ms: u64) -> (AlarmChange, Vec<ActionTransition>) {
        log::debug!("Alarm {} reset", self.id);
        self.trigger_count = 1;
        self.trigger_time_ms = now_ms;
        self.reset_time_ms = now_ms;
        let (changes, transitions) = self.change_state(AlarmState::Active, now_ms);
        (changes | AlarmChange::TRIGGER, transitions)
    }

    /// Apply acknowledge and clear timeouts, measured from the trigger time
    pub(crate) fn check_timeouts(&mut self, now_ms: u64) -> (AlarmChange, Vec<ActionTransition>) {
        let elapsed_ms = now_ms.saturating_sub(self.trigger_time_ms);
        let expired = |secs: Option<u32>| secs.is_some_and(|s| elapsed_ms >= u64::from(s) * 1000);

        let target = if expired(self.clear_timeout_secs)
            && matches!(self.state, AlarmState::Active | AlarmState::Acknowledged)
        {
            Some(AlarmState::Cleared)
        } else if expired(self.ack_timeout_secs) && self.state == AlarmState::Active {
            Some(self.next_state())
        } else {
            None
        };

        match target.map(|s| self.set_state(s, now_ms)) {
            Some(Ok(result)) => {
                log::debug!("Alarm {} timed out to {}", self.id, self.state.name());
                result
            }
            _ => (AlarmChange::empty(), Vec::new()),
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Match the tracked actions to the config's enabled actions, stopping
    /// removed or changed ones, then start whatever the state calls for
    pub(crate) fn sync_actions(&mut self, config: &AlarmConfig) -> Vec<ActionTransition> {
        self.config_name = config.display_name().to_string();
        let mut transitions = Vec::new();

        let mut kept = Vec::with_capacity(self.actions.len());
        for info in std::mem::take(&mut self.actions) {
            let current = config
                .action(info.action_id)
                .filter(|a| a.is_enabled() && a.option_value() == info.option_value);
            if current.is_some() {
                kept.push(info);
            } else if info.is_started {
                self.apply_action(&info, false);
                transitions.push(info.transition(false));
            }
        }
        self.actions = kept;

        for action in config.actions().filter(|a| a.is_enabled()) {
            if !self.actions.iter().any(|i| i.action_id == action.id()) {
                self.actions.push(ActionInfo {
                    action_id: action.id(),
                    action_type: action.action_type(),
                    option_value: action.option_value(),
                    is_started: false,
                });
            }
        }
        // Keep config order
        self.actions.sort_by_key(|i| {
            config
                .actions()
                .position(|a| a.id() == i.action_id)
                .unwrap_or(usize::MAX)
        });

        transitions.extend(self.start_stop_actions());
        transitions
    }

    /// Stop every started action, e.g. before the alarm is deleted
    pub(crate) fn stop_all_actions(&mut self) -> Vec<ActionTransition> {
        let mut transitions = Vec::new();
        for i in 0..self.actions.len() {
            if self.actions[i].is_started {
                self.actions[i].is_started = false;
                let info = self.actions[i].clone();
                self.apply_action(&info, false);
                transitions.push(info.transition(false));
            }
        }
        transitions
    }

    fn start_stop_actions(&mut self) -> Vec<ActionTransition> {
        let mut transitions = Vec::new();
        for i in 0..self.actions.len() {
            let should_run = self.state.runs(self.actions[i].action_type.lifetime());
            if should_run != self.actions[i].is_started {
                self.actions[i].is_started = should_run;
                let info = self.actions[i].clone();
                self.apply_action(&info, should_run);
                transitions.push(info.transition(should_run));
            }
        }
        transitions
    }

    /// Effects of an action on the alarm itself
    fn apply_action(&mut self, info: &ActionInfo, start: bool) {
        match info.action_type {
            ActionType::AutoAcknowledge => {
                self.ack_timeout_secs = start.then_some(info.option_value);
            }
            ActionType::AutoClear => {
                self.clear_timeout_secs = start.then_some(info.option_value);
            }
            ActionType::SendNetMesg => {
                self.net_mesg_value = start.then_some(info.option_value);
            }
            _ => {}
        }
    }

    // ========================================================================
    // CPA
    // ========================================================================

    /// Recompute the CPA between the alarm's track and its second track,
    /// ref point or point shape. Returns true if the cached value changed.
    pub(crate) fn update_cpa(&mut self, ctx: &EvalContext<'_>) -> bool {
        if self.cpa.is_none()
            || ctx.now_ms.saturating_sub(self.last_cpa_update_ms) < CPA_UPDATE_INTERVAL_MS
        {
            return false;
        }
        self.last_cpa_update_ms = ctx.now_ms;
        let Some(own) = self.track1.and_then(|id| motion_of_track(ctx.tracks, id)) else {
            return false;
        };
        let other = if let Some(id) = self.track2 {
            motion_of_track(ctx.tracks, id)
        } else if let Some(id) = self.ref_point {
            ctx.tracks.ref_point(id).map(|r| {
                Motion::new(r.position, r.velocity.unwrap_or_default())
            })
        } else {
            self.shape
                .and_then(|id| ctx.shapes.shape(id))
                .and_then(|s| s.kind.reference())
                .map(Motion::stationary)
        };
        let Some(other) = other else {
            return false;
        };
        let cpa = calculate_cpa(&own, &other);
        let changed = self.cpa != Some(cpa);
        self.cpa = Some(cpa);
        changed
    }
}

fn motion_of_track(tracks: &UniTrackDatabase, id: TrackId) -> Option<Motion> {
    let track = tracks.track(id).filter(|t| !t.is_deleted())?;
    Some(Motion::new(
        track.position?,
        track.velocity.unwrap_or(Velocity::default()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::action::sound_options;
    use crate::condition::{ConditionType, Limit, Operator};

    fn config_with(actions: &[ActionType]) -> AlarmConfig {
        let mut config = AlarmConfig::new(sound_options(std::iter::empty()));
        config.group_mut().set_display_name("Test").unwrap();
        for a in actions {
            config.create_action(*a).unwrap();
        }
        config
    }

    fn trigger() -> Trigger {
        Trigger {
            condition_id: 1,
            condition_type: ConditionType::TrackSpeed,
            arg_op: Operator::GreaterThan,
            arg_text: "20 m/s".to_string(),
            track: None,
            shape: None,
            ref_point: None,
            time_limit: Limit::default(),
            range_limit: Limit::default(),
            cpa: None,
            distance_metres: None,
        }
    }

    fn started(transitions: &[ActionTransition]) -> Vec<ActionType> {
        transitions
            .iter()
            .filter(|t| t.start)
            .map(|t| t.action_type)
            .collect()
    }

    #[test]
    fn test_new_alarm_is_active() {
        let config = config_with(&[ActionType::SoundAlarm, ActionType::HighlightTrack]);
        let (alarm, transitions) = Alarm::new(1, &config, Some(7), vec![trigger()], 1000);
        assert_eq!(alarm.state(), AlarmState::Active);
        assert_eq!(alarm.trigger_count(), 1);
        assert_eq!(alarm.trigger_time_ms(), 1000);
        assert_eq!(alarm.config_name(), "Test");
        assert_eq!(
            started(&transitions),
            vec![ActionType::SoundAlarm, ActionType::HighlightTrack]
        );
    }

    #[test]
    fn test_acknowledge_and_retrigger() {
        let config = config_with(&[]);
        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 1000);

        let (changes, _) = alarm.set_state(AlarmState::Acknowledged, 5000).unwrap();
        assert_eq!(changes, AlarmChange::STATE);
        assert_eq!(alarm.state(), AlarmState::Acknowledged);
        assert!(alarm.state_change_time_ms() > alarm.trigger_time_ms());

        alarm.update(true, vec![trigger()], 6000);
        alarm.update(true, vec![trigger()], 7000);
        assert_eq!(alarm.trigger_count(), 3);
        assert_eq!(alarm.trigger_time_ms(), 1000);

        // Never backwards
        assert!(matches!(
            alarm.set_state(AlarmState::Active, 8000),
            Err(Error::InvalidStateTransition { .. })
        ));
        assert_eq!(
            alarm.set_state(AlarmState::Unknown, 8000).unwrap_err(),
            Error::InvalidState(0)
        );
    }

    #[test]
    fn test_not_triggering_keeps_active() {
        let config = config_with(&[]);
        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        alarm.update(false, Vec::new(), 1000);
        assert_eq!(alarm.trigger_count(), 0);
        assert_eq!(alarm.state(), AlarmState::Active);

        // Clearing an alarm that no longer triggers empties it
        alarm.set_state(AlarmState::Cleared, 2000).unwrap();
        assert_eq!(alarm.state(), AlarmState::Empty);
    }

    #[test]
    fn test_cleared_then_empty() {
        let config = config_with(&[ActionType::AutoDelete]);
        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        alarm.set_state(AlarmState::Cleared, 100).unwrap();
        assert_eq!(alarm.state(), AlarmState::Cleared);

        let (changes, transitions) = alarm.update(false, Vec::new(), 200);
        assert!(changes.contains(AlarmChange::STATE));
        assert_eq!(alarm.state(), AlarmState::Empty);
        assert!(alarm.is_auto_delete());
        assert_eq!(transitions.len(), 1);
        assert!(!transitions[0].start);
    }

    #[test]
    fn test_auto_reset() {
        let config = config_with(&[ActionType::AutoReset, ActionType::SoundAlarmOnce]);
        let (mut alarm, transitions) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        assert_eq!(
            started(&transitions),
            vec![ActionType::AutoReset, ActionType::SoundAlarmOnce]
        );
        alarm.set_state(AlarmState::Acknowledged, 100).unwrap();
        alarm.update(false, Vec::new(), 200);
        alarm.set_state(AlarmState::Cleared, 300).unwrap();
        assert_eq!(alarm.state(), AlarmState::Empty);

        let (_, transitions) = alarm.update(true, vec![trigger()], 5000);
        assert_eq!(alarm.state(), AlarmState::Active);
        assert_eq!(alarm.trigger_time_ms(), 5000);
        assert_eq!(alarm.reset_time_ms(), 5000);
        assert_eq!(alarm.trigger_count(), 1);
        assert_eq!(
            started(&transitions),
            vec![ActionType::AutoReset, ActionType::SoundAlarmOnce]
        );
    }

    #[test]
    fn test_empty_without_reset_stays_empty() {
        let config = config_with(&[]);
        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        alarm.update(false, Vec::new(), 100);
        alarm.set_state(AlarmState::Cleared, 200).unwrap();
        alarm.update(true, vec![trigger()], 300);
        assert_eq!(alarm.state(), AlarmState::Empty);
    }

    #[test]
    fn test_timeouts() {
        let mut config = config_with(&[ActionType::AutoAcknowledge, ActionType::AutoClear]);
        let ack = config.find_action(ActionType::AutoAcknowledge).unwrap().id();
        let clear = config.find_action(ActionType::AutoClear).unwrap().id();
        config.set_action_option_value(ack, 10).unwrap();
        config.set_action_option_value(clear, 60).unwrap();

        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        assert_eq!(alarm.acknowledge_timeout_secs(), Some(10));

        alarm.check_timeouts(9_999);
        assert_eq!(alarm.state(), AlarmState::Active);
        let (changes, transitions) = alarm.check_timeouts(10_000);
        assert_eq!(changes, AlarmChange::STATE);
        assert_eq!(alarm.state(), AlarmState::Acknowledged);
        // Auto acknowledge stops once acknowledged
        assert!(transitions
            .iter()
            .any(|t| t.action_type == ActionType::AutoAcknowledge && !t.start));
        assert_eq!(alarm.acknowledge_timeout_secs(), None);

        alarm.check_timeouts(60_000);
        assert_eq!(alarm.state(), AlarmState::Cleared);
        assert_eq!(alarm.clear_timeout_secs(), None);
    }

    #[test]
    fn test_action_lifetimes() {
        let config = config_with(&[
            ActionType::SoundAlarm,
            ActionType::HighlightTrack,
            ActionType::AutoReset,
        ]);
        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        let ids: Vec<(ActionType, ActionId)> =
            config.actions().map(|a| (a.action_type(), a.id())).collect();
        let running = |alarm: &Alarm| -> Vec<ActionType> {
            ids.iter()
                .filter(|(_, id)| alarm.is_action_started(*id))
                .map(|(t, _)| *t)
                .collect()
        };

        alarm.set_state(AlarmState::Acknowledged, 1).unwrap();
        assert_eq!(
            running(&alarm),
            vec![ActionType::HighlightTrack, ActionType::AutoReset]
        );
        alarm.set_state(AlarmState::Cleared, 2).unwrap();
        assert_eq!(running(&alarm), vec![ActionType::AutoReset]);
        alarm.update(false, Vec::new(), 3);
        assert!(running(&alarm).is_empty());
    }

    #[test]
    fn test_config_action_changes() {
        let mut config = config_with(&[ActionType::SendNetMesg]);
        let (mut alarm, _) = Alarm::new(1, &config, Some(7), vec![trigger()], 0);
        assert!(alarm.is_sending_net_mesgs());
        assert_eq!(alarm.net_mesg_alarm_value(), 0);

        let id = config.find_action(ActionType::SendNetMesg).unwrap().id();
        config.set_action_option_value(id, 42).unwrap();
        let transitions = alarm.sync_actions(&config);
        assert_eq!(transitions.len(), 2);
        assert!(!transitions[0].start && transitions[1].start);
        assert_eq!(alarm.net_mesg_alarm_value(), 42);

        config.delete_action(id).unwrap();
        alarm.sync_actions(&config);
        assert!(!alarm.is_sending_net_mesgs());
    }
}
