//! Conditions
//!
//! A [`Condition`] is one validated predicate tested against a track:
//!
//! ```text
//!   type ──> TypeInfo (argument kind, operators, limits, buddy)
//!     │
//!     ├── arg_op  arg            e.g. Speed  >  10.3 m/s
//!     ├── time limit  op + secs  e.g. inside area for > 60 s
//!     └── range limit op + m     e.g. CPA < 500 m
//! ```
//!
//! Setters validate against the type table and leave the condition
//! unchanged on error. Testing never fails: missing track data or a
//! deleted shape, ref point or track simply means "no trigger".

mod eval;
pub mod group;
pub mod types;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cpa::CpaResult;
use crate::error::{Error, Result};
use crate::shapes::{ShapeDatabase, ShapeId, ShapeKind};
use crate::track::{Descriptor, TrackId, TrackTypes, UniTrack, UniTrackDatabase};
pub use group::{
    ConditionGroup, GroupChange, GroupEvent, GroupId, GroupRestrictions, GroupResult,
    GroupState, GroupStates,
};
pub use types::{
    ArgKind, ConditionChange, ConditionRestrictions, ConditionType, LimitInfo, Operator,
    OperatorSet, ShapeReq, TypeInfo, ValueKind,
};

pub type ConditionId = u32;

/// Everything a condition may look up while testing a track
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub tracks: &'a UniTrackDatabase,
    pub shapes: &'a ShapeDatabase,
    pub now_ms: u64,
    /// Track types eligible as the second track of "any track" tests
    pub candidate_types: TrackTypes,
}

impl<'a> EvalContext<'a> {
    pub fn new(tracks: &'a UniTrackDatabase, shapes: &'a ShapeDatabase, now_ms: u64) -> Self {
        EvalContext {
            tracks,
            shapes,
            now_ms,
            candidate_types: TrackTypes::all(),
        }
    }

    pub fn with_candidate_types(mut self, types: TrackTypes) -> Self {
        self.candidate_types = types;
        self
    }
}

/// Condition argument. Exactly one representation, chosen by type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConditionArg {
    #[default]
    None,
    Value(f64),
    Track(Descriptor),
    Shape {
        name: String,
        /// Resolved shape, cleared when the shape is deleted
        id: Option<ShapeId>,
    },
}

/// Time or range limit. An operator of [`Operator::None`] means unset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limit {
    pub op: Operator,
    pub value: f64,
}

impl Limit {
    pub fn is_active(&self) -> bool {
        self.op != Operator::None
    }

    /// Passes when inactive, otherwise `v <op> value`
    pub fn test(&self, v: f64) -> bool {
        !self.is_active() || self.op.apply(v, self.value)
    }
}

/// Details of a passed condition test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub condition_id: ConditionId,
    pub condition_type: ConditionType,
    pub arg_op: Operator,
    /// Argument that was tested, as displayed
    pub arg_text: String,
    /// Second track involved (proximity and CPA)
    pub track: Option<TrackId>,
    pub shape: Option<ShapeId>,
    pub ref_point: Option<u32>,
    pub time_limit: Limit,
    pub range_limit: Limit,
    pub cpa: Option<CpaResult>,
    pub distance_metres: Option<f64>,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.condition_type)?;
        if self.arg_op != Operator::None {
            write!(f, " {}", self.arg_op.symbol())?;
        }
        if !self.arg_text.is_empty() {
            write!(f, " {}", self.arg_text)?;
        }
        if let Some(cpa) = &self.cpa {
            write!(f, " (CPA {:.0} m in {:.0} s)", cpa.cpa_metres, cpa.tcpa_secs)?;
        } else if let Some(d) = self.distance_metres {
            write!(f, " ({:.0} m)", d)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    id: ConditionId,
    condition_type: ConditionType,
    arg_op: Operator,
    arg: ConditionArg,
    time_limit: Limit,
    range_limit: Limit,
    is_exclusion: bool,
    is_enabled: bool,
    /// Enabled but held off from triggering until re-armed
    is_disarmed: bool,
    reset_time_ms: u64,
    buddy: Option<ConditionId>,
    is_primary: bool,
    restrictions: ConditionRestrictions,
}

impl Condition {
    pub(crate) fn new(id: ConditionId, condition_type: ConditionType) -> Self {
        let info = condition_type.info();
        let default_limit = |l: Option<LimitInfo>| match l {
            Some(l) if l.required => Limit {
                op: l.ops.preferred_limit(),
                value: 0.0,
            },
            _ => Limit::default(),
        };
        Condition {
            id,
            condition_type,
            arg_op: info.arg_ops.preferred(),
            arg: ConditionArg::None,
            time_limit: default_limit(info.time_limit),
            range_limit: default_limit(info.range_limit),
            is_exclusion: false,
            is_enabled: true,
            is_disarmed: false,
            reset_time_ms: 0,
            buddy: None,
            is_primary: true,
            restrictions: ConditionRestrictions::empty(),
        }
    }

    pub fn id(&self) -> ConditionId {
        self.id
    }

    pub fn condition_type(&self) -> ConditionType {
        self.condition_type
    }

    pub fn arg(&self) -> &ConditionArg {
        &self.arg
    }

    pub fn arg_operator(&self) -> Operator {
        self.arg_op
    }

    pub fn arg_value(&self) -> Option<f64> {
        match self.arg {
            ConditionArg::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn time_limit(&self) -> Limit {
        self.time_limit
    }

    pub fn range_limit(&self) -> Limit {
        self.range_limit
    }

    pub fn is_exclusion(&self) -> bool {
        self.is_exclusion
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn buddy(&self) -> Option<ConditionId> {
        self.buddy
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn restrictions(&self) -> ConditionRestrictions {
        self.restrictions
    }

    pub fn is_restricted(&self, flags: ConditionRestrictions) -> bool {
        self.restrictions.intersects(flags)
    }

    pub(crate) fn set_buddy(&mut self, buddy: ConditionId, is_primary: bool) {
        self.buddy = Some(buddy);
        self.is_primary = is_primary;
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<ConditionChange> {
        if self.is_enabled == enabled {
            return Ok(ConditionChange::empty());
        }
        self.is_enabled = enabled;
        Ok(ConditionChange::STATE)
    }

    pub fn is_disarmed(&self) -> bool {
        self.is_disarmed
    }

    /// Hold the condition off from triggering, or re-arm it. Re-arming
    /// resets it at `now_ms`.
    pub fn set_disarmed(&mut self, disarmed: bool, now_ms: u64) -> Result<ConditionChange> {
        if self.is_disarmed == disarmed {
            return Ok(ConditionChange::empty());
        }
        self.is_disarmed = disarmed;
        if !disarmed {
            self.reset_time_ms = now_ms;
        }
        Ok(ConditionChange::DISARMED)
    }

    /// When the condition was last re-armed or its group reset
    pub fn reset_time_ms(&self) -> u64 {
        self.reset_time_ms
    }

    pub(crate) fn reset_time(&mut self, now_ms: u64) {
        self.reset_time_ms = now_ms;
    }

    pub fn set_exclusion(&mut self, exclusion: bool) -> Result<ConditionChange> {
        if self.is_exclusion == exclusion {
            return Ok(ConditionChange::empty());
        }
        self.is_exclusion = exclusion;
        Ok(ConditionChange::EXCLUSION)
    }

    pub fn set_restrictions(&mut self, flags: ConditionRestrictions) {
        self.restrictions = flags;
    }

    pub fn set_arg_operator(&mut self, op: Operator) -> Result<ConditionChange> {
        if self.is_restricted(ConditionRestrictions::ARG_OPERATOR) {
            return Err(Error::Restricted("argument operator".to_string()));
        }
        if !self.condition_type.is_arg_operator_valid(op) {
            return Err(Error::InvalidOperator {
                op: op as u32,
                context: format!("{} argument", self.condition_type),
            });
        }
        if self.arg_op == op {
            return Ok(ConditionChange::empty());
        }
        self.arg_op = op;
        Ok(ConditionChange::ARG_OPERATOR)
    }

    /// Set a numeric argument (SI units)
    pub fn set_arg_value(&mut self, value: f64) -> Result<ConditionChange> {
        if self.is_restricted(ConditionRestrictions::ARG_VALUE) {
            return Err(Error::Restricted("argument value".to_string()));
        }
        let Some(kind) = self.condition_type.arg_value_kind() else {
            return Err(Error::InvalidArgument(format!(
                "{} does not take a value",
                self.condition_type
            )));
        };
        if !value.is_finite() {
            return Err(Error::InvalidArgument(format!("{value} is not finite")));
        }
        let valid = match kind {
            ValueKind::Bool => value == 0.0 || value == 1.0,
            ValueKind::Course => (0.0..=360.0).contains(&value),
            ValueKind::Acceleration => true,
            ValueKind::RefPointId
            | ValueKind::GroupId
            | ValueKind::SecondaryId
            | ValueKind::ClassCode
            | ValueKind::SecondaryType
            | ValueKind::ShipType
            | ValueKind::NavStatus
            | ValueKind::CommsCap
            | ValueKind::FlightStatus => value >= 0.0 && value.fract() == 0.0,
            _ => value >= 0.0,
        };
        if !valid {
            return Err(Error::InvalidArgument(format!(
                "{value} is not valid for {}",
                self.condition_type
            )));
        }
        if self.arg == ConditionArg::Value(value) {
            return Ok(ConditionChange::empty());
        }
        self.arg = ConditionArg::Value(value);
        Ok(ConditionChange::ARG_VALUE)
    }

    /// Set the argument from its string form: a number, a track
    /// descriptor or a shape name depending on type.
    pub fn set_arg_string(&mut self, s: &str) -> Result<ConditionChange> {
        if self.is_restricted(ConditionRestrictions::ARG_VALUE) {
            return Err(Error::Restricted("argument value".to_string()));
        }
        let s = s.trim();
        let arg = match self.condition_type.info().arg {
            ArgKind::None => {
                return Err(Error::InvalidArgument(format!(
                    "{} does not take an argument",
                    self.condition_type
                )))
            }
            ArgKind::Value(_) => {
                let v: f64 = s
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("'{s}' is not a number")))?;
                return self.set_arg_value(v);
            }
            ArgKind::TrackDescriptor => ConditionArg::Track(Descriptor::parse(s)?),
            ArgKind::Shape(_) => {
                if s.is_empty() {
                    return Err(Error::InvalidArgument("empty shape name".to_string()));
                }
                ConditionArg::Shape {
                    name: s.to_string(),
                    id: None,
                }
            }
        };
        if self.arg == arg {
            return Ok(ConditionChange::empty());
        }
        self.arg = arg;
        Ok(ConditionChange::ARG_VALUE)
    }

    /// Argument in the form accepted by [`Condition::set_arg_string`]
    pub fn arg_string(&self) -> String {
        match &self.arg {
            ConditionArg::None => String::new(),
            ConditionArg::Value(v) => format!("{v}"),
            ConditionArg::Track(d) => d.to_string(),
            ConditionArg::Shape { name, .. } => name.clone(),
        }
    }

    /// Argument in display units
    pub fn arg_display_string(&self) -> String {
        match (&self.arg, self.condition_type.arg_value_kind()) {
            (ConditionArg::Value(v), Some(ValueKind::Bool)) => {
                if *v != 0.0 { "true" } else { "false" }.to_string()
            }
            (ConditionArg::Value(v), Some(kind)) => {
                let shown = v * kind.multiplier();
                let units = kind.units();
                let text = if shown.fract() == 0.0 {
                    format!("{shown:.0}")
                } else {
                    format!("{shown:.1}")
                };
                if units.is_empty() {
                    text
                } else {
                    format!("{text} {units}")
                }
            }
            _ => self.arg_string(),
        }
    }

    pub fn set_time_limit(&mut self, secs: f64) -> Result<ConditionChange> {
        let Some(info) = self.condition_type.info().time_limit else {
            return Err(Error::InvalidTimeLimit(format!(
                "{} has no time limit",
                self.condition_type
            )));
        };
        if !secs.is_finite() || secs < 0.0 {
            return Err(Error::InvalidTimeLimit(format!("{secs} secs")));
        }
        let mut changes = ConditionChange::empty();
        if !self.time_limit.is_active() {
            self.time_limit.op = info.ops.preferred_limit();
            changes |= ConditionChange::TIME_LIMIT_OPERATOR;
        }
        if self.time_limit.value != secs {
            self.time_limit.value = secs;
            changes |= ConditionChange::TIME_LIMIT_VALUE;
        }
        Ok(changes)
    }

    pub fn set_time_limit_operator(&mut self, op: Operator) -> Result<ConditionChange> {
        if !self.condition_type.is_time_limit_operator_valid(op) {
            return Err(Error::InvalidOperator {
                op: op as u32,
                context: format!("{} time limit", self.condition_type),
            });
        }
        if self.time_limit.op == op {
            return Ok(ConditionChange::empty());
        }
        self.time_limit.op = op;
        Ok(ConditionChange::TIME_LIMIT_OPERATOR)
    }

    pub fn set_range_limit(&mut self, metres: f64) -> Result<ConditionChange> {
        let Some(info) = self.condition_type.info().range_limit else {
            return Err(Error::InvalidRangeLimit(format!(
                "{} has no range limit",
                self.condition_type
            )));
        };
        if !metres.is_finite() || metres < 0.0 {
            return Err(Error::InvalidRangeLimit(format!("{metres} metres")));
        }
        let mut changes = ConditionChange::empty();
        if !self.range_limit.is_active() {
            self.range_limit.op = info.ops.preferred_limit();
            changes |= ConditionChange::RANGE_LIMIT_OPERATOR;
        }
        if self.range_limit.value != metres {
            self.range_limit.value = metres;
            changes |= ConditionChange::RANGE_LIMIT_VALUE;
        }
        Ok(changes)
    }

    pub fn set_range_limit_operator(&mut self, op: Operator) -> Result<ConditionChange> {
        if !self.condition_type.is_range_limit_operator_valid(op) {
            return Err(Error::InvalidOperator {
                op: op as u32,
                context: format!("{} range limit", self.condition_type),
            });
        }
        if self.range_limit.op == op {
            return Ok(ConditionChange::empty());
        }
        self.range_limit.op = op;
        Ok(ConditionChange::RANGE_LIMIT_OPERATOR)
    }

    /// Argument and required limits are set
    pub fn is_condition_valid(&self) -> bool {
        let info = self.condition_type.info();
        if !self.condition_type.is_valid() {
            return false;
        }
        let arg_ok = match (info.arg, &self.arg) {
            (ArgKind::None, ConditionArg::None) => true,
            (ArgKind::Value(_), ConditionArg::Value(_)) => true,
            (ArgKind::TrackDescriptor, ConditionArg::Track(_)) => true,
            (ArgKind::Shape(_), ConditionArg::Shape { .. }) => true,
            _ => false,
        };
        let op_ok = info.arg_ops.is_empty() || info.arg_ops.allows(self.arg_op);
        let limit_ok = |info: Option<LimitInfo>, limit: &Limit| match info {
            Some(l) if l.required => limit.is_active() && limit.value > 0.0,
            _ => true,
        };
        arg_ok
            && op_ok
            && limit_ok(info.time_limit, &self.time_limit)
            && limit_ok(info.range_limit, &self.range_limit)
    }

    /// Copy the synchronised settings of a buddy condition
    pub(crate) fn sync_from_buddy(&mut self, other: &Condition) {
        self.is_enabled = other.is_enabled;
        self.is_disarmed = other.is_disarmed;
        self.reset_time_ms = other.reset_time_ms;
        self.is_exclusion = other.is_exclusion;
        self.arg = other.arg.clone();
        self.time_limit = other.time_limit;
        self.range_limit = other.range_limit;
    }

    /// Resolve (or re-resolve) the shape argument by name
    pub(crate) fn resolve_shape(&mut self, shapes: &ShapeDatabase) {
        let req = self.condition_type.shape_requirement();
        if let ConditionArg::Shape { name, id } = &mut self.arg {
            *id = shapes
                .shape_by_name(name)
                .filter(|s| req.map_or(false, |r| shape_meets(r, &s.kind)))
                .map(|s| s.id);
        }
    }

    /// Forget a deleted shape. Returns true if this condition used it.
    pub(crate) fn forget_shape(&mut self, shape: Option<ShapeId>) -> bool {
        if let ConditionArg::Shape { id, .. } = &mut self.arg {
            if id.is_some() && (shape.is_none() || *id == shape) {
                *id = None;
                return true;
            }
        }
        false
    }

    pub fn shape_id(&self) -> Option<ShapeId> {
        match &self.arg {
            ConditionArg::Shape { id, .. } => *id,
            _ => None,
        }
    }

    /// Evaluate this condition. `track` may be `None` only for track
    /// independent types.
    pub fn test(&self, track: Option<&UniTrack>, ctx: &EvalContext<'_>) -> Option<Trigger> {
        if !self.is_enabled || self.is_disarmed || !self.is_condition_valid() {
            return None;
        }
        let ty = self.condition_type;
        if ty.is_track_independent() {
            return self.test_timestamp(ctx);
        }
        let track = track?;
        if ty.is_area() {
            self.test_area(track, ctx)
        } else if ty.is_gate() {
            self.test_gate(track, ctx)
        } else if ty.is_track_attribute() {
            self.test_attribute(track, ctx)
        } else if ty.is_proximity() {
            self.test_proximity(track, ctx)
        } else if ty.is_cpa() {
            self.test_cpa(track, ctx)
        } else {
            None
        }
    }

    /// Trigger with no second track, shape or ref point
    fn trigger(&self) -> Trigger {
        Trigger {
            condition_id: self.id,
            condition_type: self.condition_type,
            arg_op: self.arg_op,
            arg_text: self.arg_display_string(),
            track: None,
            shape: None,
            ref_point: None,
            time_limit: self.time_limit,
            range_limit: self.range_limit,
            cpa: None,
            distance_metres: None,
        }
    }
}

impl OperatorSet {
    /// Operator used when a limit is first set
    fn preferred_limit(self) -> Operator {
        if self.allows(Operator::LessThan) {
            Operator::LessThan
        } else {
            self.preferred()
        }
    }
}

pub(crate) fn shape_meets(req: ShapeReq, kind: &ShapeKind) -> bool {
    match req {
        ShapeReq::Area => kind.is_area(),
        ShapeReq::Gate => kind.is_gate(),
        ShapeReq::Point => kind.is_point(),
        ShapeReq::Any => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_setters_leave_state() {
        let mut c = Condition::new(1, ConditionType::TrackClass);
        assert_eq!(c.arg_operator(), Operator::Equal);
        assert!(c.set_arg_operator(Operator::GreaterThan).is_err());
        assert_eq!(c.arg_operator(), Operator::Equal);

        assert!(c.set_arg_value(2.5).is_err());
        assert_eq!(c.arg(), &ConditionArg::None);
        assert!(c.set_time_limit(10.0).is_err());
        assert!(c.set_range_limit(10.0).is_err());
        assert!(c.set_arg_string("Harbour").is_err());
        assert!(!c.is_condition_valid());

        assert_eq!(c.set_arg_value(3.0), Ok(ConditionChange::ARG_VALUE));
        assert_eq!(c.set_arg_value(3.0), Ok(ConditionChange::empty()));
        assert!(c.is_condition_valid());
    }

    #[test]
    fn test_restrictions() {
        let mut c = Condition::new(1, ConditionType::TrackSpeed);
        c.set_restrictions(ConditionRestrictions::ARG_VALUE);
        assert!(matches!(c.set_arg_value(5.0), Err(Error::Restricted(_))));
        assert!(c.set_arg_operator(Operator::LessThan).is_ok());
    }

    #[test]
    fn test_limits() {
        let mut c = Condition::new(1, ConditionType::CpaToAnyTrack);
        // Range limit is required, time limit is optional
        assert_eq!(c.range_limit().op, Operator::LessThan);
        assert!(!c.time_limit().is_active());
        assert!(!c.is_condition_valid());

        c.set_range_limit(2000.0).unwrap();
        assert!(c.is_condition_valid());
        let changes = c.set_time_limit(120.0).unwrap();
        assert!(changes.contains(ConditionChange::TIME_LIMIT_OPERATOR));
        assert_eq!(c.time_limit().op, Operator::LessThan);

        assert!(c.set_range_limit_operator(Operator::GreaterThan).is_err());
        assert!(c.set_range_limit_operator(Operator::None).is_err());
        assert!(c.set_time_limit_operator(Operator::None).is_ok());
        assert!(c.set_time_limit(-1.0).is_err());
    }

    #[test]
    fn test_arg_strings() {
        let mut c = Condition::new(1, ConditionType::Track);
        assert!(c.set_arg_string("nonsense").is_err());
        c.set_arg_string("0A0.2.235001234P").unwrap();
        assert_eq!(c.arg_string(), "0A0.2.235001234P");

        let mut c = Condition::new(2, ConditionType::TrackSpeed);
        c.set_arg_string("10.288889").unwrap();
        assert_eq!(c.arg_display_string(), "20.0 kts");

        let mut c = Condition::new(3, ConditionType::TrackOnGround);
        assert!(c.set_arg_value(2.0).is_err());
        c.set_arg_value(1.0).unwrap();
        assert_eq!(c.arg_display_string(), "true");
    }
}
