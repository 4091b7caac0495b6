//! Condition groups
//!
//! An ordered list of conditions tested together. Buddy pairs (gate
//! forward/reverse) are created and deleted together and act as one unit
//! that passes when either member passes:
//!
//! ```text
//!   passes = (at least one enabled condition)
//!          AND every inclusion unit passes
//!          AND no exclusion unit passes
//! ```
//!
//! Every enabled condition is evaluated so the trigger list is complete.
//! Filters and alarm configs embed a group; the owner drains
//! [`GroupEvent`]s after each edit and republishes them as its own events.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::{
    Condition, ConditionChange, ConditionId, ConditionType, EvalContext, Limit, Operator,
    Trigger,
};
use crate::config_file::{ConfigWriter, Section};
use crate::error::{Error, Result};
use crate::ids::{CONDITION_IDS, GROUP_IDS};
use crate::shapes::{ShapeDatabase, ShapeEvent};
use crate::track::UniTrack;

pub type GroupId = u32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u32)]
pub enum GroupState {
    NotConfigured = 0x01,
    Disabled = 0x02,
    Enabled = 0x04,
}

impl Default for GroupState {
    fn default() -> Self {
        GroupState::NotConfigured
    }
}

impl GroupState {
    pub fn as_flag(self) -> GroupStates {
        GroupStates::from_bits_retain(self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            GroupState::NotConfigured => "Not configured",
            GroupState::Disabled => "Disabled",
            GroupState::Enabled => "Enabled",
        }
    }
}

bitflags! {
    /// Set of group states used to select groups in bulk operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GroupStates: u32 {
        const NOT_CONFIGURED = 0x01;
        const DISABLED = 0x02;
        const ENABLED = 0x04;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GroupChange: u32 {
        const DISPLAY_NAME = 0x01;
        const STATE = 0x02;
        const OWNER = 0x04;
        const SUBTYPE = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GroupRestrictions: u32 {
        const SAVE = 0x01;
        const DELETE = 0x02;
        const RENAME = 0x04;
        const STATE = 0x08;
        const CREATE_CONDITION = 0x10;
        const DELETE_CONDITION = 0x20;
        const ALL = 0xFFFF_FFFF;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    Change(GroupChange),
    ConditionCreate(ConditionId),
    ConditionChange(ConditionId, ConditionChange),
    ConditionDelete(ConditionId),
}

/// Outcome of testing a group against one track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupResult {
    pub passed: bool,
    /// Triggers of the passing inclusion conditions, in condition order
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone)]
pub struct ConditionGroup {
    id: GroupId,
    display_name: String,
    state: GroupState,
    is_shared: bool,
    restrictions: GroupRestrictions,
    /// Filters cannot hold track independent conditions
    allow_track_independent: bool,
    conditions: Vec<Condition>,
    reset_time_ms: u64,
    events: Vec<GroupEvent>,
}

impl ConditionGroup {
    pub(crate) fn new(allow_track_independent: bool) -> Self {
        ConditionGroup {
            id: GROUP_IDS.next_id(),
            display_name: String::new(),
            state: GroupState::NotConfigured,
            is_shared: false,
            restrictions: GroupRestrictions::empty(),
            allow_track_independent,
            conditions: Vec::new(),
            reset_time_ms: 0,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Drain queued events
    pub fn take_events(&mut self) -> Vec<GroupEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn report_change(&mut self, changes: GroupChange) {
        if !changes.is_empty() {
            self.events.push(GroupEvent::Change(changes));
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: &str) -> Result<()> {
        if self.is_restricted(GroupRestrictions::RENAME) {
            return Err(Error::Restricted(format!("rename group {}", self.id)));
        }
        if self.display_name != name {
            self.display_name = name.to_string();
            self.report_change(GroupChange::DISPLAY_NAME);
        }
        Ok(())
    }

    /// Name a group that has just been created, before anyone can see it
    pub(crate) fn init_display_name(&mut self, name: &str) {
        self.display_name = name.to_string();
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Enable or disable the group. A group without valid conditions
    /// cannot be enabled.
    pub fn set_state(&mut self, state: GroupState) -> Result<()> {
        if self.is_restricted(GroupRestrictions::STATE) {
            return Err(Error::Restricted(format!("state of group {}", self.id)));
        }
        match state {
            GroupState::NotConfigured => return Err(Error::InvalidState(state as u32)),
            GroupState::Enabled if !self.is_config_valid() => {
                return Err(Error::NotConfigured(self.id))
            }
            GroupState::Disabled if !self.is_config_valid() => {
                return Err(Error::NotConfigured(self.id))
            }
            _ => {}
        }
        self.change_state(state);
        Ok(())
    }

    fn change_state(&mut self, state: GroupState) {
        if self.state != state {
            log::debug!("Group {} {} -> {}", self.id, self.state.name(), state.name());
            self.state = state;
            self.report_change(GroupChange::STATE);
        }
    }

    /// Track configuration validity. The group becomes enabled the first
    /// time it is valid.
    fn update_state(&mut self) {
        if !self.is_config_valid() {
            self.change_state(GroupState::NotConfigured);
        } else if self.state == GroupState::NotConfigured {
            self.change_state(GroupState::Enabled);
        }
    }

    /// At least one enabled condition and every enabled condition valid
    pub fn is_config_valid(&self) -> bool {
        let mut enabled = self.conditions.iter().filter(|c| c.is_enabled()).peekable();
        enabled.peek().is_some() && enabled.all(|c| c.is_condition_valid())
    }

    pub fn is_enabled(&self) -> bool {
        self.state == GroupState::Enabled
    }

    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.is_shared = shared;
    }

    pub fn restrictions(&self) -> GroupRestrictions {
        self.restrictions
    }

    pub fn set_restrictions(&mut self, flags: GroupRestrictions) {
        self.restrictions = flags;
    }

    pub fn is_restricted(&self, flags: GroupRestrictions) -> bool {
        self.restrictions.intersects(flags)
    }

    pub fn can_delete(&self) -> bool {
        !self.is_restricted(GroupRestrictions::DELETE)
    }

    pub fn can_save(&self) -> bool {
        !self.is_restricted(GroupRestrictions::SAVE)
    }

    pub fn reset_time_ms(&self) -> u64 {
        self.reset_time_ms
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    /// Operators still free for a new or edited condition of `condition_type`.
    /// Each of greater-than and less-than may appear once per type.
    pub fn is_condition_arg_operator_valid(
        &self,
        condition_type: ConditionType,
        op: Operator,
        exclude: Option<ConditionId>,
    ) -> bool {
        if !condition_type.is_arg_operator_valid(op) {
            return false;
        }
        if !matches!(op, Operator::GreaterThan | Operator::LessThan) {
            return true;
        }
        !self.conditions.iter().any(|c| {
            Some(c.id()) != exclude && c.condition_type() == condition_type && c.arg_operator() == op
        })
    }

    fn free_operator(&self, condition_type: ConditionType) -> Option<Operator> {
        let ops = condition_type.info().arg_ops;
        if ops.is_empty() {
            return Some(Operator::None);
        }
        [
            Operator::Equal,
            Operator::GreaterThan,
            Operator::LessThan,
            Operator::NotEqual,
        ]
        .into_iter()
        .find(|op| ops.allows(*op) && self.is_condition_arg_operator_valid(condition_type, *op, None))
    }

    pub fn can_condition_be_created(&self, condition_type: ConditionType) -> bool {
        condition_type.is_valid()
            && (self.allow_track_independent || !condition_type.is_track_independent())
            && self.free_operator(condition_type).is_some()
    }

    /// Create a condition, and its buddy for paired types. Returns the ID
    /// of the primary condition.
    pub fn create_condition(
        &mut self,
        condition_type: ConditionType,
        arg: Option<&str>,
    ) -> Result<ConditionId> {
        if self.is_restricted(GroupRestrictions::CREATE_CONDITION) {
            return Err(Error::Restricted(format!("create condition in group {}", self.id)));
        }
        if !self.can_condition_be_created(condition_type) {
            return Err(Error::InvalidType(condition_type as u32));
        }

        let mut primary = Condition::new(CONDITION_IDS.next_id(), condition_type);
        if let Some(op) = self.free_operator(condition_type) {
            if op != Operator::None {
                primary.arg_op = op;
            }
        }
        if let Some(arg) = arg.filter(|a| !a.trim().is_empty()) {
            primary.set_arg_string(arg)?;
        }

        let primary_id = primary.id();
        let buddy = condition_type.buddy_type().map(|buddy_type| {
            let mut buddy = Condition::new(CONDITION_IDS.next_id(), buddy_type);
            buddy.set_buddy(primary_id, false);
            buddy.sync_from_buddy(&primary);
            buddy
        });
        if let Some(b) = &buddy {
            primary.set_buddy(b.id(), true);
        }

        log::debug!(
            "Group {} created condition {} ({})",
            self.id,
            primary_id,
            condition_type
        );
        self.conditions.push(primary);
        self.events.push(GroupEvent::ConditionCreate(primary_id));
        if let Some(b) = buddy {
            self.events.push(GroupEvent::ConditionCreate(b.id()));
            self.conditions.push(b);
        }
        self.update_state();
        Ok(primary_id)
    }

    /// Apply a setter to a condition, keeping its buddy in step
    pub fn update_condition(
        &mut self,
        id: ConditionId,
        f: impl FnOnce(&mut Condition) -> Result<ConditionChange>,
    ) -> Result<ConditionChange> {
        let index = self
            .conditions
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| Error::not_found("condition", id))?;

        let mut edited = self.conditions[index].clone();
        let changes = f(&mut edited)?;
        if edited.arg_operator() != self.conditions[index].arg_operator()
            && !self.is_condition_arg_operator_valid(
                edited.condition_type(),
                edited.arg_operator(),
                Some(id),
            )
        {
            return Err(Error::InvalidOperator {
                op: edited.arg_operator() as u32,
                context: format!("{} already used in group {}", edited.condition_type(), self.id),
            });
        }

        if let Some(buddy_id) = edited.buddy() {
            if let Some(buddy) = self.conditions.iter_mut().find(|c| c.id() == buddy_id) {
                buddy.sync_from_buddy(&edited);
                if !changes.is_empty() {
                    self.events.push(GroupEvent::ConditionChange(buddy_id, changes));
                }
            }
        }
        self.conditions[index] = edited;
        if !changes.is_empty() {
            self.events.push(GroupEvent::ConditionChange(id, changes));
        }
        self.update_state();
        Ok(changes)
    }

    /// Delete a condition and its buddy
    pub fn delete_condition(&mut self, id: ConditionId) -> Result<()> {
        if self.is_restricted(GroupRestrictions::DELETE_CONDITION) {
            return Err(Error::Restricted(format!("delete condition in group {}", self.id)));
        }
        let condition = self
            .condition(id)
            .ok_or_else(|| Error::not_found("condition", id))?;
        let ids: Vec<ConditionId> = std::iter::once(id).chain(condition.buddy()).collect();

        self.conditions.retain(|c| !ids.contains(&c.id()));
        for id in ids {
            self.events.push(GroupEvent::ConditionDelete(id));
        }
        self.update_state();
        Ok(())
    }

    pub fn delete_all_conditions(&mut self) -> Result<()> {
        if self.is_restricted(GroupRestrictions::DELETE_CONDITION) {
            return Err(Error::Restricted(format!("delete condition in group {}", self.id)));
        }
        for c in self.conditions.drain(..) {
            self.events.push(GroupEvent::ConditionDelete(c.id()));
        }
        self.update_state();
        Ok(())
    }

    pub fn condition(&self, id: ConditionId) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.id() == id)
    }

    pub fn condition_from_index(&self, index: usize) -> Option<&Condition> {
        self.conditions.get(index)
    }

    /// Conditions in creation order, buddies included
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    pub fn num_conditions(&self) -> usize {
        self.conditions.len()
    }

    /// One line describing the primary conditions, e.g.
    /// `Speed > 20.0 kts AND NOT Inside area = Harbour`
    pub fn conditions_summary(&self) -> String {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .filter(|c| c.is_primary() && c.is_enabled())
            .map(|c| {
                let mut s = String::new();
                if c.is_exclusion() {
                    s.push_str("NOT ");
                }
                s.push_str(c.condition_type().name());
                if c.arg_operator() != Operator::None {
                    s.push(' ');
                    s.push_str(c.arg_operator().symbol());
                }
                let arg = c.arg_display_string();
                if !arg.is_empty() {
                    s.push(' ');
                    s.push_str(&arg);
                }
                s
            })
            .collect();
        parts.join(" AND ")
    }

    pub fn has_background_conditions(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.is_enabled() && c.condition_type().is_background())
    }

    /// Every enabled condition can be evaluated without a track
    pub fn is_track_independent(&self) -> bool {
        let mut enabled = self.conditions.iter().filter(|c| c.is_enabled()).peekable();
        enabled.peek().is_some() && enabled.all(|c| c.condition_type().is_track_independent())
    }

    pub fn uses_track_group(&self, group_id: u32) -> bool {
        self.conditions.iter().any(|c| {
            c.condition_type() == ConditionType::TrackGroup
                && c.arg_value() == Some(f64::from(group_id))
        })
    }

    // ========================================================================
    // Testing
    // ========================================================================

    /// Test every enabled condition against a track
    pub fn test_conditions(&self, track: Option<&UniTrack>, ctx: &EvalContext<'_>) -> GroupResult {
        // (unit, exclusion, passed) per enabled condition
        let mut units: Vec<(ConditionId, bool, bool)> = Vec::new();
        let mut triggers = Vec::new();

        for c in self.conditions.iter().filter(|c| c.is_enabled()) {
            let unit = if c.is_primary() {
                c.id()
            } else {
                c.buddy().unwrap_or(c.id())
            };
            let trigger = c.test(track, ctx);
            let passed = trigger.is_some();
            if let Some(t) = trigger {
                if !c.is_exclusion() {
                    triggers.push(t);
                }
            }
            match units.iter_mut().find(|(u, _, _)| *u == unit) {
                Some(entry) => entry.2 |= passed,
                None => units.push((unit, c.is_exclusion(), passed)),
            }
        }

        let passed = !units.is_empty()
            && units
                .iter()
                .all(|(_, exclusion, passed)| if *exclusion { !passed } else { *passed });
        GroupResult {
            passed,
            triggers: if passed { triggers } else { Vec::new() },
        }
    }

    // ========================================================================
    // Shapes
    // ========================================================================

    pub fn resolve_shapes(&mut self, shapes: &ShapeDatabase) {
        for c in self.conditions.iter_mut() {
            c.resolve_shape(shapes);
        }
    }

    /// Drop references to deleted shapes, re-resolving after a reload.
    /// Returns true if any condition was affected.
    pub fn handle_shape_event(&mut self, event: ShapeEvent, shapes: &ShapeDatabase) -> bool {
        match event {
            ShapeEvent::Delete(id) => self.handle_shape_delete(id),
            ShapeEvent::DeleteAll => self.handle_shape_delete_all(),
            ShapeEvent::ReloadAll => {
                self.handle_shape_delete_all();
                self.resolve_shapes(shapes);
                true
            }
        }
    }

    pub fn handle_shape_delete(&mut self, id: u32) -> bool {
        let mut any = false;
        for c in self.conditions.iter_mut() {
            any |= c.forget_shape(Some(id));
        }
        any
    }

    pub fn handle_shape_delete_all(&mut self) -> bool {
        let mut any = false;
        for c in self.conditions.iter_mut() {
            any |= c.forget_shape(None);
        }
        any
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write group settings and primary conditions. Buddies are recreated
    /// on load.
    pub fn save(&self, w: &mut ConfigWriter) {
        w.param("DisplayName", &self.display_name);
        w.param("State", self.state as u32);
        for c in self.conditions.iter().filter(|c| c.is_primary()) {
            w.begin("Condition");
            w.param("Type", c.condition_type() as u32);
            w.param("Enabled", u8::from(c.is_enabled()));
            w.param("Exclusion", u8::from(c.is_exclusion()));
            w.param("ArgOperator", c.arg_operator() as u32);
            let arg = c.arg_string();
            if !arg.is_empty() {
                w.param("Arg", arg);
            }
            let limit = |w: &mut ConfigWriter, name: &str, l: Limit| {
                w.param(&format!("{name}Operator"), l.op as u32);
                w.param(name, l.value);
            };
            if c.condition_type().is_time_limit_valid() {
                limit(w, "TimeLimit", c.time_limit());
            }
            if c.condition_type().is_range_limit_valid() {
                limit(w, "RangeLimit", c.range_limit());
            }
            w.end();
        }
    }

    /// Replace conditions from a config section. On error the group is
    /// left as it was.
    pub fn load(&mut self, section: &Section) -> Result<()> {
        let mut staged = self.clone();
        staged.load_conditions(section)?;
        *self = staged;
        Ok(())
    }

    fn load_conditions(&mut self, section: &Section) -> Result<()> {
        self.conditions.clear();
        if let Some(name) = section.get("DisplayName") {
            self.display_name = name.to_string();
        }

        for cs in section.children("Condition") {
            let ty: u32 = cs
                .get_parsed("Type")?
                .ok_or_else(|| Error::parse(cs.line, "condition without Type"))?;
            let ty = ConditionType::from_u32(ty).map_err(|e| Error::parse(cs.line, e.to_string()))?;
            let at = |e: Error| Error::parse(cs.line, e.to_string());

            let id = self.create_condition(ty, cs.get("Arg")).map_err(at)?;
            self.update_condition(id, |c| {
                let mut changes = ConditionChange::empty();
                if let Some(op) = cs.get_parsed::<u32>("ArgOperator")? {
                    let op = Operator::from_u32(op)?;
                    if op != Operator::None {
                        changes |= c.set_arg_operator(op)?;
                    }
                }
                changes |= load_limit(
                    cs,
                    "TimeLimit",
                    c,
                    Condition::set_time_limit,
                    Condition::set_time_limit_operator,
                )?;
                changes |= load_limit(
                    cs,
                    "RangeLimit",
                    c,
                    Condition::set_range_limit,
                    Condition::set_range_limit_operator,
                )?;
                if let Some(ex) = cs.get_bool("Exclusion")? {
                    changes |= c.set_exclusion(ex)?;
                }
                if let Some(en) = cs.get_bool("Enabled")? {
                    changes |= c.set_enabled(en)?;
                }
                Ok(changes)
            })
            .map_err(at)?;
        }

        self.update_state();
        if let Some(state) = section.get_parsed::<u32>("State")? {
            let state = GroupState::from_u32(state).ok_or(Error::InvalidState(state))?;
            if state != GroupState::NotConfigured && self.is_config_valid() {
                self.change_state(state);
            }
        }
        self.events.clear();
        Ok(())
    }

    /// Mark the time the owning alarm was last reset
    pub fn reset_time(&mut self, now_ms: u64) {
        self.reset_time_ms = now_ms;
        for c in self.conditions.iter_mut() {
            c.reset_time(now_ms);
        }
    }

    /// Disarm or re-arm every condition. Disarmed conditions never
    /// trigger, so the group cannot pass while any is disarmed.
    pub fn set_disarmed(&mut self, disarmed: bool, now_ms: u64) -> Result<()> {
        let ids: Vec<ConditionId> = self.conditions.iter().map(|c| c.id()).collect();
        for id in ids {
            self.update_condition(id, |c| c.set_disarmed(disarmed, now_ms))?;
        }
        Ok(())
    }

    pub fn is_disarmed(&self) -> bool {
        self.conditions.iter().any(|c| c.is_enabled() && c.is_disarmed())
    }
}

type LimitSetter = fn(&mut Condition, f64) -> Result<ConditionChange>;
type LimitOpSetter = fn(&mut Condition, Operator) -> Result<ConditionChange>;

fn load_limit(
    cs: &Section,
    name: &str,
    c: &mut Condition,
    set_value: LimitSetter,
    set_op: LimitOpSetter,
) -> Result<ConditionChange> {
    let op = match cs.get_parsed::<u32>(&format!("{name}Operator"))? {
        Some(op) => Operator::from_u32(op)?,
        None => return Ok(ConditionChange::empty()),
    };
    if op == Operator::None {
        // Required limits keep their default operator
        return Ok(set_op(c, op).unwrap_or_default());
    }
    let mut changes = ConditionChange::empty();
    if let Some(v) = cs.get_parsed::<f64>(name)? {
        changes |= set_value(c, v)?;
    }
    Ok(changes | set_op(c, op)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file;
    use crate::geo::{LatLong, Velocity};
    use crate::shapes::ShapeKind;
    use crate::track::{TrackSource, TrackType, TrackUpdate, UniTrackDatabase};

    fn speed_group(op: Operator, value: f64) -> (ConditionGroup, ConditionId) {
        let mut g = ConditionGroup::new(true);
        let id = g.create_condition(ConditionType::TrackSpeed, None).unwrap();
        g.update_condition(id, |c| {
            let a = c.set_arg_operator(op)?;
            Ok(a | c.set_arg_value(value)?)
        })
        .unwrap();
        (g, id)
    }

    fn one_track(speed: f64) -> (UniTrackDatabase, u32) {
        let mut db = UniTrackDatabase::new();
        let id = db.update_track(
            TrackSource {
                track_type: TrackType::Ais,
                source_index: 0,
                source_id: 1,
            },
            TrackUpdate {
                position: Some(LatLong::new(50.0, 0.0)),
                velocity: Some(Velocity::new(speed, 45.0)),
                ..Default::default()
            },
            0,
        );
        (db, id)
    }

    #[test]
    fn test_state_follows_validity() {
        let mut g = ConditionGroup::new(true);
        assert_eq!(g.state(), GroupState::NotConfigured);
        assert_eq!(g.set_state(GroupState::Enabled), Err(Error::NotConfigured(g.id())));

        let id = g.create_condition(ConditionType::TrackSpeed, None).unwrap();
        assert_eq!(g.state(), GroupState::NotConfigured);
        g.update_condition(id, |c| c.set_arg_value(5.0)).unwrap();
        assert_eq!(g.state(), GroupState::Enabled);

        g.set_state(GroupState::Disabled).unwrap();
        assert!(g.set_state(GroupState::NotConfigured).is_err());
        g.delete_condition(id).unwrap();
        assert_eq!(g.state(), GroupState::NotConfigured);
    }

    #[test]
    fn test_disarmed_group_does_not_pass() {
        let (mut g, id) = speed_group(Operator::GreaterThan, 5.0);
        let (db, track) = one_track(10.0);
        let shapes = ShapeDatabase::new();
        let ctx = EvalContext::new(&db, &shapes, 0);
        assert!(g.test_conditions(db.track(track), &ctx).passed);
        g.take_events();

        g.set_disarmed(true, 1000).unwrap();
        assert!(g.is_disarmed());
        assert_eq!(g.state(), GroupState::Enabled);
        assert!(!g.test_conditions(db.track(track), &ctx).passed);
        assert_eq!(
            g.take_events(),
            vec![GroupEvent::ConditionChange(id, ConditionChange::DISARMED)]
        );

        g.set_disarmed(false, 5000).unwrap();
        assert!(!g.is_disarmed());
        assert_eq!(g.condition(id).unwrap().reset_time_ms(), 5000);
        assert!(g.test_conditions(db.track(track), &ctx).passed);

        g.reset_time(9000);
        assert_eq!(g.reset_time_ms(), 9000);
        assert_eq!(g.condition(id).unwrap().reset_time_ms(), 9000);
    }

    #[test]
    fn test_exclusion_vetoes() {
        let (mut g, _) = speed_group(Operator::GreaterThan, 5.0);
        let ex = g.create_condition(ConditionType::TrackSpeed, None).unwrap();
        g.update_condition(ex, |c| {
            let a = c.set_arg_value(1.0)?;
            Ok(a | c.set_exclusion(true)?)
        })
        .unwrap();
        // Both > 5 and the exclusion (< 1 is taken, so it got another operator)
        let (db, track) = one_track(10.0);
        let shapes = ShapeDatabase::new();
        let ctx = EvalContext::new(&db, &shapes, 0);

        let op = g.condition(ex).unwrap().arg_operator();
        assert_ne!(op, Operator::GreaterThan);
        g.update_condition(ex, |c| c.set_arg_operator(Operator::NotEqual))
            .unwrap();
        let result = g.test_conditions(db.track(track), &ctx);
        assert!(!result.passed);
        assert!(result.triggers.is_empty());

        g.update_condition(ex, |c| c.set_exclusion(false)).unwrap();
        let result = g.test_conditions(db.track(track), &ctx);
        assert!(result.passed);
        assert_eq!(result.triggers.len(), 2);
    }

    #[test]
    fn test_duplicate_threshold_operator_rejected() {
        let (mut g, first) = speed_group(Operator::GreaterThan, 5.0);
        let second = g.create_condition(ConditionType::TrackSpeed, None).unwrap();
        // Equal is free, greater-than is taken
        assert_eq!(g.condition(second).unwrap().arg_operator(), Operator::Equal);
        let err = g.update_condition(second, |c| c.set_arg_operator(Operator::GreaterThan));
        assert!(matches!(err, Err(Error::InvalidOperator { .. })));
        assert_eq!(g.condition(second).unwrap().arg_operator(), Operator::Equal);
        // Editing the owner of the operator is fine
        assert!(g
            .update_condition(first, |c| c.set_arg_operator(Operator::GreaterThan))
            .is_ok());

        // Timestamp only has > and <
        let mut g = ConditionGroup::new(true);
        g.create_condition(ConditionType::Timestamp, None).unwrap();
        g.create_condition(ConditionType::Timestamp, None).unwrap();
        assert!(!g.can_condition_be_created(ConditionType::Timestamp));
        // Filters reject track independent types
        assert!(!ConditionGroup::new(false).can_condition_be_created(ConditionType::Timestamp));
    }

    #[test]
    fn test_buddy_pairing() {
        let mut g = ConditionGroup::new(true);
        let fwd = g
            .create_condition(ConditionType::GateCrossedFwd, Some("Entrance"))
            .unwrap();
        assert_eq!(g.num_conditions(), 2);
        let rev = g.condition(fwd).unwrap().buddy().unwrap();
        let buddy = g.condition(rev).unwrap();
        assert_eq!(buddy.condition_type(), ConditionType::GateCrossedRev);
        assert_eq!(buddy.buddy(), Some(fwd));
        assert!(!buddy.is_primary());
        assert_eq!(buddy.arg_string(), "Entrance");

        // Settings follow the buddy
        g.update_condition(fwd, |c| c.set_time_limit(30.0)).unwrap();
        assert_eq!(g.condition(rev).unwrap().time_limit().value, 30.0);
        g.update_condition(rev, |c| c.set_enabled(false)).unwrap();
        assert!(!g.condition(fwd).unwrap().is_enabled());

        // Deleting either deletes both
        g.delete_condition(rev).unwrap();
        assert_eq!(g.num_conditions(), 0);
        let events = g.take_events();
        assert!(events.contains(&GroupEvent::ConditionDelete(fwd)));
        assert!(events.contains(&GroupEvent::ConditionDelete(rev)));
    }

    #[test]
    fn test_forward_crossing_triggers_forward_only() {
        let mut shapes = ShapeDatabase::new();
        let o = LatLong::new(10.0, 10.0);
        shapes.add_shape(
            "Entrance",
            ShapeKind::Gate {
                points: vec![o, o.offset_by(0.0, 1000.0)],
            },
        );
        let mut g = ConditionGroup::new(true);
        let fwd = g
            .create_condition(ConditionType::GateCrossedFwd, Some("Entrance"))
            .unwrap();
        g.resolve_shapes(&shapes);
        assert_eq!(g.state(), GroupState::Enabled);

        let mut db = UniTrackDatabase::new();
        let source = TrackSource {
            track_type: TrackType::Radar,
            source_index: 0,
            source_id: 5,
        };
        let west = o.offset_by(-100.0, 500.0);
        let east = o.offset_by(100.0, 500.0);
        let at = |p: LatLong| TrackUpdate {
            position: Some(p),
            ..Default::default()
        };
        let id = db.update_track(source, at(west), 0);
        db.update_track(source, at(east), 2000);

        let ctx = EvalContext::new(&db, &shapes, 2000);
        let result = g.test_conditions(db.track(id), &ctx);
        assert!(result.passed);
        assert_eq!(result.triggers.len(), 1);
        assert_eq!(result.triggers[0].condition_id, fwd);
        assert_eq!(result.triggers[0].condition_type, ConditionType::GateCrossedFwd);

        // Crossing back east to west triggers the reverse buddy only
        db.update_track(source, at(west), 4000);
        let ctx = EvalContext::new(&db, &shapes, 4000);
        let result = g.test_conditions(db.track(id), &ctx);
        assert_eq!(result.triggers.len(), 1);
        assert_eq!(result.triggers[0].condition_type, ConditionType::GateCrossedRev);
    }

    #[test]
    fn test_shape_delete_makes_condition_false() {
        let mut shapes = ShapeDatabase::new();
        let o = LatLong::new(50.0, 0.0);
        let sid = shapes.add_shape(
            "zone",
            ShapeKind::Circle {
                centre: o,
                radius_metres: 500.0,
            },
        );
        let mut g = ConditionGroup::new(true);
        g.create_condition(ConditionType::AreaInside, Some("zone")).unwrap();
        g.resolve_shapes(&shapes);
        let (db, track) = one_track(1.0);
        {
            let ctx = EvalContext::new(&db, &shapes, 0);
            assert!(g.test_conditions(db.track(track), &ctx).passed);
        }

        let event = shapes.remove_shape(sid).unwrap();
        assert!(g.handle_shape_event(event, &shapes));
        let ctx = EvalContext::new(&db, &shapes, 0);
        assert!(!g.test_conditions(db.track(track), &ctx).passed);

        // Reload with the same name restores it
        let event = shapes.reload(vec![(
            "zone".to_string(),
            ShapeKind::Circle {
                centre: o,
                radius_metres: 500.0,
            },
        )]);
        g.handle_shape_event(event, &shapes);
        let ctx = EvalContext::new(&db, &shapes, 0);
        assert!(g.test_conditions(db.track(track), &ctx).passed);
    }

    #[test]
    fn test_failed_load_leaves_group_unchanged() {
        let mut g = ConditionGroup::new(true);
        g.set_display_name("Harbour watch").unwrap();
        let speed = g.create_condition(ConditionType::TrackSpeed, None).unwrap();
        g.take_events();

        let root = config_file::parse(
            "Group\n\
             DisplayName=Renamed\n\
             Condition\n\
             Type=302\n\
             End\n\
             Condition\n\
             Type=302\n\
             ArgOperator=77\n\
             End\n\
             End\n",
        )
        .unwrap();
        assert!(g.load(root.children("Group").next().unwrap()).is_err());

        assert_eq!(g.display_name(), "Harbour watch");
        let ids: Vec<ConditionId> = g.conditions().map(|c| c.id()).collect();
        assert_eq!(ids, vec![speed]);
        assert!(g.take_events().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut g = ConditionGroup::new(true);
        g.set_display_name("Harbour watch").unwrap();
        let speed = g.create_condition(ConditionType::TrackSpeed, None).unwrap();
        g.update_condition(speed, |c| {
            let a = c.set_arg_operator(Operator::LessThan)?;
            Ok(a | c.set_arg_value(3.5)?)
        })
        .unwrap();
        let area = g.create_condition(ConditionType::AreaInside, Some("Harbour")).unwrap();
        g.update_condition(area, |c| {
            let a = c.set_time_limit(60.0)?;
            let b = c.set_time_limit_operator(Operator::GreaterThan)?;
            Ok(a | b | c.set_exclusion(true)?)
        })
        .unwrap();
        let cpa = g.create_condition(ConditionType::CpaToAnyTrack, None).unwrap();
        g.update_condition(cpa, |c| c.set_range_limit(926.0)).unwrap();
        g.create_condition(ConditionType::GateCrossedFwd, Some("Line")).unwrap();
        g.set_state(GroupState::Disabled).unwrap();

        let mut w = ConfigWriter::new();
        w.begin("Group");
        g.save(&mut w);
        w.end();
        let root = config_file::parse(&w.finish()).unwrap();

        let mut loaded = ConditionGroup::new(true);
        loaded.load(root.children("Group").next().unwrap()).unwrap();

        assert_eq!(loaded.display_name(), "Harbour watch");
        assert_eq!(loaded.state(), GroupState::Disabled);
        assert_eq!(loaded.num_conditions(), g.num_conditions());
        for (a, b) in g.conditions().zip(loaded.conditions()) {
            assert_eq!(a.condition_type(), b.condition_type());
            assert_eq!(a.arg_operator(), b.arg_operator());
            assert_eq!(a.arg(), b.arg());
            assert_eq!(a.time_limit(), b.time_limit());
            assert_eq!(a.range_limit(), b.range_limit());
            assert_eq!(a.is_exclusion(), b.is_exclusion());
            assert_eq!(a.is_enabled(), b.is_enabled());
            assert_eq!(a.is_primary(), b.is_primary());
        }
    }
}
