//! Alarm configurations
//!
//! A condition group whose passing tracks raise alarms, plus the ordered
//! actions those alarms run. Built-in action types appear at most once.

use super::action::{ActionChange, ActionId, ActionOption, ActionType, AlarmAction};
use crate::condition::{ConditionGroup, GroupEvent, GroupId};
use crate::config_file::{ConfigWriter, Section};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEvent {
    Group(GroupEvent),
    ActionCreate(ActionId),
    ActionChange(ActionId, ActionChange),
    ActionDelete(ActionId),
}

#[derive(Debug, Clone)]
pub struct AlarmConfig {
    group: ConditionGroup,
    actions: Vec<AlarmAction>,
    /// Sound list offered to new sound actions
    sounds: Vec<ActionOption>,
    events: Vec<ConfigEvent>,
}

impl AlarmConfig {
    pub(crate) fn new(sounds: Vec<ActionOption>) -> Self {
        AlarmConfig {
            group: ConditionGroup::new(true),
            actions: Vec::new(),
            sounds,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.group.id()
    }

    pub fn group(&self) -> &ConditionGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut ConditionGroup {
        &mut self.group
    }

    pub fn display_name(&self) -> &str {
        self.group.display_name()
    }

    /// Drain queued group and action events
    pub fn take_events(&mut self) -> Vec<ConfigEvent> {
        let mut events: Vec<ConfigEvent> = self
            .group
            .take_events()
            .into_iter()
            .map(ConfigEvent::Group)
            .collect();
        events.append(&mut self.events);
        events
    }

    // ========================================================================
    // Actions
    // ========================================================================

    pub fn create_action(&mut self, action_type: ActionType) -> Result<ActionId> {
        if action_type.is_builtin() && self.find_action(action_type).is_some() {
            return Err(Error::DuplicateAction(action_type.as_u32()));
        }
        let action = AlarmAction::new(action_type, &self.sounds);
        let id = action.id();
        log::debug!("Config {} created action {} ({})", self.id(), id, action_type);
        self.actions.push(action);
        self.events.push(ConfigEvent::ActionCreate(id));
        Ok(id)
    }

    pub fn find_action(&self, action_type: ActionType) -> Option<&AlarmAction> {
        self.actions.iter().find(|a| a.action_type() == action_type)
    }

    pub fn action(&self, id: ActionId) -> Option<&AlarmAction> {
        self.actions.iter().find(|a| a.id() == id)
    }

    pub fn action_from_index(&self, index: usize) -> Option<&AlarmAction> {
        self.actions.get(index)
    }

    pub fn actions(&self) -> impl Iterator<Item = &AlarmAction> {
        self.actions.iter()
    }

    pub fn num_actions(&self) -> usize {
        self.actions.len()
    }

    /// Apply a setter to an action
    pub fn update_action<R>(
        &mut self,
        id: ActionId,
        f: impl FnOnce(&mut AlarmAction) -> Result<R>,
    ) -> Result<R> {
        let action = self
            .actions
            .iter_mut()
            .find(|a| a.id() == id)
            .ok_or_else(|| Error::not_found("action", id))?;
        let before = action.clone();
        let result = f(action)?;

        let mut changes = ActionChange::empty();
        if before.is_enabled() != action.is_enabled() {
            changes |= ActionChange::STATE;
        }
        if before.option_value() != action.option_value() {
            changes |= ActionChange::OPTION_VALUE;
        }
        if !changes.is_empty() {
            self.events.push(ConfigEvent::ActionChange(id, changes));
        }
        Ok(result)
    }

    pub fn set_action_option_value(&mut self, id: ActionId, value: u32) -> Result<ActionChange> {
        self.update_action(id, |a| a.set_option_value(value))
    }

    pub fn set_action_enabled(&mut self, id: ActionId, enabled: bool) -> Result<ActionChange> {
        self.update_action(id, |a| Ok(a.set_enabled(enabled)))
    }

    pub fn delete_action(&mut self, id: ActionId) -> Result<()> {
        let index = self
            .actions
            .iter()
            .position(|a| a.id() == id)
            .ok_or_else(|| Error::not_found("action", id))?;
        self.actions.remove(index);
        self.events.push(ConfigEvent::ActionDelete(id));
        Ok(())
    }

    pub fn delete_all_actions(&mut self) {
        for a in self.actions.drain(..) {
            self.events.push(ConfigEvent::ActionDelete(a.id()));
        }
    }

    /// Enabled actions joined into one line
    pub fn actions_summary(&self) -> String {
        let parts: Vec<String> = self
            .actions
            .iter()
            .filter(|a| a.is_enabled())
            .map(|a| a.summary())
            .collect();
        parts.join(", ")
    }

    pub(crate) fn set_sound_options(&mut self, sounds: &[ActionOption]) {
        self.sounds = sounds.to_vec();
        for a in self.actions.iter_mut() {
            if matches!(
                a.action_type(),
                ActionType::SoundAlarm | ActionType::SoundAlarmOnce
            ) {
                a.set_sound_options(sounds);
            }
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn save(&self, w: &mut ConfigWriter) {
        w.begin("AlarmConfig");
        self.group.save(w);
        for a in &self.actions {
            a.save(w);
        }
        w.end();
    }

    /// Replace conditions and actions from a config section. On error the
    /// config is left as it was.
    pub fn load(&mut self, section: &Section) -> Result<()> {
        let mut staged = self.clone();
        staged.load_actions(section)?;
        *self = staged;
        Ok(())
    }

    fn load_actions(&mut self, section: &Section) -> Result<()> {
        self.group.load(section)?;
        self.actions.clear();
        for s in section.children("Action") {
            let ty: u32 = s
                .get_parsed("Type")?
                .ok_or_else(|| Error::parse(s.line, "action without Type"))?;
            let ty = ActionType::from_u32(ty).map_err(|e| Error::parse(s.line, e.to_string()))?;
            let id = self
                .create_action(ty)
                .map_err(|e| Error::parse(s.line, e.to_string()))?;
            if let Some(action) = self.actions.iter_mut().find(|a| a.id() == id) {
                action.load(s)?;
            }
        }
        self.events.clear();
        Ok(())
    }
}
