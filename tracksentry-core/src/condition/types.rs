//! Condition type table
//!
//! Every condition type is described by one [`TypeInfo`] entry returned
//! from [`ConditionType::info`]. All validation predicates are derived
//! from that table, so adding a type is a one-place edit.
//!
//! Numeric values of [`ConditionType`] and [`Operator`] are stored in
//! configuration files and must never be renumbered.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};
use strum::{EnumCount, EnumIter};

use crate::error::Error;
use crate::geo::{MS_TO_KN, NAUTICAL_MILE};
use crate::track::TrackTypes;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    FromPrimitive,
    Serialize_repr,
    Deserialize_repr,
    EnumIter,
    EnumCount,
)]
#[repr(u32)]
pub enum ConditionType {
    #[default]
    Unknown = 0,
    AreaInside = 100,
    AreaVisited = 101,
    AreaNotLeft = 102,
    AreaStarted = 103,
    GateCrossedFwd = 200,
    GateCrossedRev = 201,
    GateCrossed = 202,
    Track = 300,
    TrackSecondaryId = 301,
    TrackSpeed = 302,
    TrackCourse = 303,
    TrackAltitude = 304,
    TrackClass = 305,
    TrackGroup = 306,
    TrackSecondaryType = 307,
    TrackOnGround = 308,
    TrackIsTest = 309,
    TrackIsSimulated = 310,
    TrackCommsCap = 311,
    TrackFlightStatus = 312,
    TrackAcceleration = 313,
    TrackRateOfTurn = 314,
    TrackSpeedDeviation = 315,
    TrackCourseDeviation = 316,
    TrackThreatLevel = 317,
    AisShipType = 400,
    AisNavStatus = 401,
    AisHazardousCargo = 402,
    AisDraught = 403,
    /// Superseded by [`ConditionType::ProximityToShape`]
    ProximityToPoint = 500,
    ProximityToRefPoint = 503,
    ProximityToAnyAis = 504,
    ProximityToAnyAdsb = 505,
    ProximityToTrack = 506,
    ProximityToAnyTrack = 507,
    ProximityToLand = 510,
    ProximityToShape = 511,
    ApproachLand = 520,
    CpaToPoint = 600,
    CpaToTrack = 601,
    CpaToAnyTrack = 602,
    CpaToRefPoint = 603,
    Timestamp = 700,
}

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
    EnumIter,
)]
#[repr(u32)]
pub enum Operator {
    #[default]
    None = 0,
    Equal = 1,
    NotEqual = 2,
    GreaterThan = 3,
    LessThan = 4,
}

/// Tolerance used by the equality operators on floating point values
const EQUAL_TOLERANCE: f64 = 1e-9;

impl Operator {
    pub fn from_u32(v: u32) -> Result<Self, Error> {
        <Operator as FromPrimitive>::from_u32(v).ok_or(Error::InvalidOperator {
            op: v,
            context: "unknown operator".to_string(),
        })
    }

    /// `lhs <op> rhs`. [`Operator::None`] is never true.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::None => false,
            Operator::Equal => (lhs - rhs).abs() <= EQUAL_TOLERANCE,
            Operator::NotEqual => (lhs - rhs).abs() > EQUAL_TOLERANCE,
            Operator::GreaterThan => lhs > rhs,
            Operator::LessThan => lhs < rhs,
        }
    }

    /// Equal keeps `value`, not-equal negates it
    pub fn apply_bool(self, value: bool) -> bool {
        match self {
            Operator::Equal => value,
            Operator::NotEqual => !value,
            _ => false,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::None => "",
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
        }
    }
}

bitflags! {
    /// Set of operators valid in some position
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperatorSet: u32 {
        const EQUAL = 1 << 1;
        const NOT_EQUAL = 1 << 2;
        const GREATER_THAN = 1 << 3;
        const LESS_THAN = 1 << 4;

        const EQ_NE = Self::EQUAL.bits() | Self::NOT_EQUAL.bits();
        const GT_LT = Self::GREATER_THAN.bits() | Self::LESS_THAN.bits();
        const ALL = Self::EQ_NE.bits() | Self::GT_LT.bits();
    }
}

impl OperatorSet {
    pub fn allows(self, op: Operator) -> bool {
        op != Operator::None && self.contains(OperatorSet::from_bits_retain(1 << op as u32))
    }

    /// Operator used for new conditions
    pub fn preferred(self) -> Operator {
        [
            Operator::Equal,
            Operator::GreaterThan,
            Operator::LessThan,
            Operator::NotEqual,
        ]
        .into_iter()
        .find(|op| self.allows(*op))
        .unwrap_or(Operator::None)
    }
}

/// Unit of a numeric argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    SecondaryId,
    ClassCode,
    GroupId,
    SecondaryType,
    /// m/s, displayed in knots
    Speed,
    Course,
    /// metres, displayed in nautical miles
    Distance,
    /// metres, displayed in feet
    Altitude,
    RefPointId,
    CommsCap,
    FlightStatus,
    ShipType,
    NavStatus,
    /// Unix seconds
    Timestamp,
    /// metres
    Dimension,
    /// m/s²
    Acceleration,
    /// degrees per second
    RateOfTurn,
    Percentage,
    ThreatLevel,
}

impl ValueKind {
    /// Factor from stored (SI) value to display units
    pub fn multiplier(self) -> f64 {
        match self {
            ValueKind::Speed => MS_TO_KN,
            ValueKind::Distance => 1.0 / NAUTICAL_MILE,
            ValueKind::Altitude => 1.0 / 0.3048,
            _ => 1.0,
        }
    }

    pub fn units(self) -> &'static str {
        match self {
            ValueKind::Speed => "kts",
            ValueKind::Course => "degs",
            ValueKind::Distance => "NM",
            ValueKind::Altitude => "ft",
            ValueKind::Dimension => "m",
            ValueKind::Acceleration => "m/s2",
            ValueKind::RateOfTurn => "degs/s",
            ValueKind::Percentage => "%",
            _ => "",
        }
    }
}

/// Which kind of shape a shape argument must be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeReq {
    Area,
    Gate,
    Point,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    None,
    Value(ValueKind),
    TrackDescriptor,
    Shape(ShapeReq),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitInfo {
    pub ops: OperatorSet,
    /// Limit must be set for the condition to be valid
    pub required: bool,
}

impl LimitInfo {
    const fn optional(ops: OperatorSet) -> Option<Self> {
        Some(LimitInfo {
            ops,
            required: false,
        })
    }

    const fn required(ops: OperatorSet) -> Option<Self> {
        Some(LimitInfo {
            ops,
            required: true,
        })
    }
}

/// Capabilities of one condition type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: &'static str,
    pub arg: ArgKind,
    pub arg_ops: OperatorSet,
    pub time_limit: Option<LimitInfo>,
    pub range_limit: Option<LimitInfo>,
    pub buddy: Option<ConditionType>,
    /// Track types that carry the attribute tested
    pub track_types: TrackTypes,
    /// Evaluated without a track, from the background timer
    pub background: bool,
}

impl TypeInfo {
    const fn new(name: &'static str, arg: ArgKind, arg_ops: OperatorSet) -> Self {
        TypeInfo {
            name,
            arg,
            arg_ops,
            time_limit: None,
            range_limit: None,
            buddy: None,
            track_types: TrackTypes::all(),
            background: false,
        }
    }

    const fn time(mut self, limit: Option<LimitInfo>) -> Self {
        self.time_limit = limit;
        self
    }

    const fn range(mut self, limit: Option<LimitInfo>) -> Self {
        self.range_limit = limit;
        self
    }

    const fn buddy(mut self, buddy: ConditionType) -> Self {
        self.buddy = Some(buddy);
        self
    }

    const fn types(mut self, types: TrackTypes) -> Self {
        self.track_types = types;
        self
    }

    const fn background(mut self) -> Self {
        self.background = true;
        self
    }
}

const EQ: OperatorSet = OperatorSet::EQUAL;
const EQ_NE: OperatorSet = OperatorSet::EQ_NE;
const GT_LT: OperatorSet = OperatorSet::GT_LT;
const LT: OperatorSet = OperatorSet::LESS_THAN;
const GT: OperatorSet = OperatorSet::GREATER_THAN;
const ALL: OperatorSet = OperatorSet::ALL;
const NO_OPS: OperatorSet = OperatorSet::empty();

const fn value(kind: ValueKind) -> ArgKind {
    ArgKind::Value(kind)
}

const AIS: TrackTypes = TrackTypes::AIS.union(TrackTypes::FUSED);
const ADSB: TrackTypes = TrackTypes::ADSB.union(TrackTypes::FUSED);

impl ConditionType {
    pub fn from_u32(v: u32) -> Result<Self, Error> {
        <ConditionType as FromPrimitive>::from_u32(v).ok_or(Error::InvalidType(v))
    }

    pub fn info(self) -> TypeInfo {
        use ArgKind::*;
        use ConditionType as T;
        use ValueKind as V;

        match self {
            T::Unknown => TypeInfo::new("Unknown", None, NO_OPS),

            T::AreaInside => TypeInfo::new("Inside area", Shape(ShapeReq::Area), EQ_NE)
                .time(LimitInfo::optional(GT_LT)),
            T::AreaVisited => TypeInfo::new("Visited area", Shape(ShapeReq::Area), EQ_NE)
                .time(LimitInfo::optional(LT)),
            T::AreaNotLeft => TypeInfo::new("Not left area", Shape(ShapeReq::Area), EQ)
                .time(LimitInfo::required(GT)),
            T::AreaStarted => TypeInfo::new("Started in area", Shape(ShapeReq::Area), EQ_NE),

            T::GateCrossedFwd => TypeInfo::new("Crossed gate forward", Shape(ShapeReq::Gate), EQ)
                .time(LimitInfo::optional(LT))
                .buddy(T::GateCrossedRev),
            T::GateCrossedRev => TypeInfo::new("Crossed gate reverse", Shape(ShapeReq::Gate), EQ)
                .time(LimitInfo::optional(LT))
                .buddy(T::GateCrossedFwd),
            T::GateCrossed => TypeInfo::new("Crossed gate", Shape(ShapeReq::Gate), EQ)
                .time(LimitInfo::optional(LT)),

            T::Track => TypeInfo::new("Track", TrackDescriptor, EQ_NE),
            T::TrackSecondaryId => {
                TypeInfo::new("Secondary ID", value(V::SecondaryId), EQ_NE)
            }
            T::TrackSpeed => TypeInfo::new("Speed", value(V::Speed), ALL),
            T::TrackCourse => TypeInfo::new("Course", value(V::Course), ALL),
            T::TrackAltitude => TypeInfo::new("Altitude", value(V::Altitude), ALL)
                .types(ADSB.union(TrackTypes::RADAR)),
            T::TrackClass => TypeInfo::new("Class", value(V::ClassCode), EQ_NE),
            T::TrackGroup => TypeInfo::new("Track group", value(V::GroupId), EQ_NE),
            T::TrackSecondaryType => {
                TypeInfo::new("Secondary type", value(V::SecondaryType), EQ_NE)
            }
            T::TrackOnGround => TypeInfo::new("On ground", value(V::Bool), EQ_NE).types(ADSB),
            T::TrackIsTest => TypeInfo::new("Test target", value(V::Bool), EQ_NE),
            T::TrackIsSimulated => TypeInfo::new("Simulated", value(V::Bool), EQ_NE),
            T::TrackCommsCap => {
                TypeInfo::new("Comms capability", value(V::CommsCap), ALL).types(ADSB)
            }
            T::TrackFlightStatus => {
                TypeInfo::new("Flight status", value(V::FlightStatus), EQ_NE).types(ADSB)
            }
            T::TrackAcceleration => {
                TypeInfo::new("Acceleration", value(V::Acceleration), ALL)
            }
            T::TrackRateOfTurn => TypeInfo::new("Rate of turn", value(V::RateOfTurn), ALL),
            T::TrackSpeedDeviation => {
                TypeInfo::new("Speed deviation", value(V::Percentage), GT_LT)
                    .types(TrackTypes::FUSED)
            }
            T::TrackCourseDeviation => {
                TypeInfo::new("Course deviation", value(V::Course), GT_LT)
                    .types(TrackTypes::FUSED)
            }
            T::TrackThreatLevel => {
                TypeInfo::new("Threat level", value(V::ThreatLevel), ALL)
            }

            T::AisShipType => TypeInfo::new("AIS ship type", value(V::ShipType), EQ_NE).types(AIS),
            T::AisNavStatus => {
                TypeInfo::new("AIS nav status", value(V::NavStatus), EQ_NE).types(AIS)
            }
            T::AisHazardousCargo => {
                TypeInfo::new("AIS hazardous cargo", value(V::Bool), EQ_NE).types(AIS)
            }
            T::AisDraught => TypeInfo::new("AIS draught", value(V::Dimension), ALL).types(AIS),

            T::ProximityToPoint => {
                TypeInfo::new("Proximity to point", Shape(ShapeReq::Point), NO_OPS)
                    .range(LimitInfo::required(GT_LT))
            }
            T::ProximityToRefPoint => {
                TypeInfo::new("Proximity to ref point", value(V::RefPointId), NO_OPS)
                    .range(LimitInfo::required(GT_LT))
            }
            T::ProximityToAnyAis => TypeInfo::new("Proximity to any AIS", None, NO_OPS)
                .range(LimitInfo::required(LT))
                .time(LimitInfo::optional(LT)),
            T::ProximityToAnyAdsb => TypeInfo::new("Proximity to any ADS-B", None, NO_OPS)
                .range(LimitInfo::required(LT))
                .time(LimitInfo::optional(LT)),
            T::ProximityToTrack => {
                TypeInfo::new("Proximity to track", TrackDescriptor, NO_OPS)
                    .range(LimitInfo::required(GT_LT))
            }
            T::ProximityToAnyTrack => TypeInfo::new("Proximity to any track", None, NO_OPS)
                .range(LimitInfo::required(LT))
                .time(LimitInfo::optional(LT)),
            T::ProximityToLand => TypeInfo::new("Proximity to land", None, NO_OPS)
                .range(LimitInfo::required(LT)),
            T::ProximityToShape => {
                TypeInfo::new("Proximity to shape", Shape(ShapeReq::Any), NO_OPS)
                    .range(LimitInfo::required(GT_LT))
            }
            T::ApproachLand => TypeInfo::new("Approaching land", None, NO_OPS)
                .time(LimitInfo::required(LT)),

            T::CpaToPoint => TypeInfo::new("CPA to point", Shape(ShapeReq::Point), NO_OPS)
                .range(LimitInfo::required(LT))
                .time(LimitInfo::optional(LT)),
            T::CpaToTrack => TypeInfo::new("CPA to track", TrackDescriptor, NO_OPS)
                .range(LimitInfo::required(LT))
                .time(LimitInfo::optional(LT)),
            T::CpaToAnyTrack => TypeInfo::new("CPA to any track", None, NO_OPS)
                .range(LimitInfo::required(LT))
                .time(LimitInfo::optional(LT)),
            T::CpaToRefPoint => {
                TypeInfo::new("CPA to ref point", value(V::RefPointId), NO_OPS)
                    .range(LimitInfo::required(LT))
                    .time(LimitInfo::optional(LT))
            }

            T::Timestamp => {
                TypeInfo::new("Timestamp", value(V::Timestamp), GT_LT).background()
            }
        }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_valid(self) -> bool {
        self != ConditionType::Unknown
    }

    pub fn is_arg_valid(self) -> bool {
        self.info().arg != ArgKind::None
    }

    pub fn is_arg_value(self) -> bool {
        matches!(self.info().arg, ArgKind::Value(_))
    }

    pub fn arg_value_kind(self) -> Option<ValueKind> {
        match self.info().arg {
            ArgKind::Value(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_arg_value_bool(self) -> bool {
        self.arg_value_kind() == Some(ValueKind::Bool)
    }

    pub fn is_arg_string(self) -> bool {
        matches!(
            self.info().arg,
            ArgKind::TrackDescriptor | ArgKind::Shape(_)
        )
    }

    pub fn is_arg_track_descriptor(self) -> bool {
        self.info().arg == ArgKind::TrackDescriptor
    }

    pub fn shape_requirement(self) -> Option<ShapeReq> {
        match self.info().arg {
            ArgKind::Shape(req) => Some(req),
            _ => None,
        }
    }

    pub fn is_arg_operator_valid(self, op: Operator) -> bool {
        self.info().arg_ops.allows(op)
    }

    /// Display units factor, see [`ValueKind::multiplier`]
    pub fn arg_value_multiplier(self) -> f64 {
        self.arg_value_kind().map_or(1.0, ValueKind::multiplier)
    }

    pub fn is_time_limit_valid(self) -> bool {
        self.info().time_limit.is_some()
    }

    pub fn is_time_limit_operator_valid(self, op: Operator) -> bool {
        match self.info().time_limit {
            Some(l) => l.ops.allows(op) || (op == Operator::None && !l.required),
            None => false,
        }
    }

    pub fn is_range_limit_valid(self) -> bool {
        self.info().range_limit.is_some()
    }

    pub fn is_range_limit_operator_valid(self, op: Operator) -> bool {
        match self.info().range_limit {
            Some(l) => l.ops.allows(op) || (op == Operator::None && !l.required),
            None => false,
        }
    }

    pub fn has_buddy(self) -> bool {
        self.info().buddy.is_some()
    }

    pub fn buddy_type(self) -> Option<ConditionType> {
        self.info().buddy
    }

    pub fn is_proximity(self) -> bool {
        matches!(self as u32, 500..=599)
    }

    pub fn is_cpa(self) -> bool {
        matches!(self as u32, 600..=699)
    }

    pub fn is_area(self) -> bool {
        matches!(self as u32, 100..=199)
    }

    pub fn is_gate(self) -> bool {
        matches!(self as u32, 200..=299)
    }

    /// Tests an attribute of the track itself
    pub fn is_track_attribute(self) -> bool {
        matches!(self as u32, 300..=499)
    }

    pub fn is_ais_attribute(self) -> bool {
        self.is_track_attribute() && self.info().track_types == AIS
    }

    pub fn is_adsb_attribute(self) -> bool {
        self.is_track_attribute() && self.info().track_types == ADSB
    }

    /// Involves a second track chosen from the live track set
    pub fn is_any_track(self) -> bool {
        matches!(
            self,
            ConditionType::ProximityToAnyAis
                | ConditionType::ProximityToAnyAdsb
                | ConditionType::ProximityToAnyTrack
                | ConditionType::CpaToAnyTrack
        )
    }

    pub fn is_background(self) -> bool {
        self.info().background
    }

    /// Evaluated without a track
    pub fn is_track_independent(self) -> bool {
        self == ConditionType::Timestamp
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConditionRestrictions: u32 {
        const ARG_OPERATOR = 0x0000_0001;
        const ARG_VALUE = 0x0000_0002;
        const ALL = 0xFFFF_FFFF;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConditionChange: u32 {
        const STATE = 0x0000_0001;
        const ARG_OPERATOR = 0x0000_0002;
        const TIME_LIMIT_OPERATOR = 0x0000_0004;
        const ARG_VALUE = 0x0000_0008;
        const TIME_LIMIT_VALUE = 0x0000_0010;
        const RANGE_LIMIT_OPERATOR = 0x0000_0020;
        const RANGE_LIMIT_VALUE = 0x0000_0040;
        const EXCLUSION = 0x0000_0080;
        const DISARMED = 0x0000_0100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_type_count_and_values() {
        assert_eq!(ConditionType::COUNT, 44);
        assert_eq!(ConditionType::GateCrossedFwd as u32, 200);
        assert_eq!(ConditionType::TrackThreatLevel as u32, 317);
        assert_eq!(ConditionType::ApproachLand as u32, 520);
        assert_eq!(ConditionType::Timestamp as u32, 700);
        assert_eq!(ConditionType::from_u32(511), Ok(ConditionType::ProximityToShape));
        assert_eq!(ConditionType::from_u32(501), Err(Error::InvalidType(501)));
    }

    #[test]
    fn test_operator_values() {
        assert_eq!(Operator::from_u32(3), Ok(Operator::GreaterThan));
        assert!(Operator::from_u32(5).is_err());
        assert!(Operator::Equal.apply(20.0, 20.0));
        assert!(!Operator::Equal.apply(20.0, 20.5));
        assert!(Operator::NotEqual.apply(20.0, 20.5));
        assert!(Operator::GreaterThan.apply(25.0, 20.0));
        assert!(!Operator::GreaterThan.apply(20.0, 20.0));
        assert!(Operator::LessThan.apply(10.0, 20.0));
        assert!(!Operator::None.apply(1.0, 1.0));
    }

    #[test]
    fn test_table_consistency() {
        for t in ConditionType::iter().filter(|t| t.is_valid()) {
            let info = t.info();
            // Buddies point at each other
            if let Some(b) = info.buddy {
                assert_eq!(b.buddy_type(), Some(t), "{t:?}");
            }
            // Types without an argument have no argument operator
            if info.arg == ArgKind::None {
                assert!(info.arg_ops.is_empty(), "{t:?}");
            }
            // Something must be tested
            assert!(
                !info.arg_ops.is_empty() || info.range_limit.is_some() || info.time_limit.is_some(),
                "{t:?}"
            );
        }
    }

    #[test]
    fn test_predicates() {
        assert!(ConditionType::TrackSpeed.is_arg_operator_valid(Operator::GreaterThan));
        assert!(!ConditionType::TrackClass.is_arg_operator_valid(Operator::GreaterThan));
        assert!(!ConditionType::TrackSpeed.is_arg_operator_valid(Operator::None));
        assert!(ConditionType::CpaToTrack.is_cpa());
        assert!(ConditionType::ApproachLand.is_proximity());
        assert!(ConditionType::AisDraught.is_ais_attribute());
        assert!(ConditionType::TrackOnGround.is_adsb_attribute());
        assert!(ConditionType::AreaInside.is_time_limit_operator_valid(Operator::None));
        assert!(!ConditionType::AreaNotLeft.is_time_limit_operator_valid(Operator::None));
        assert!(!ConditionType::TrackSpeed.is_range_limit_valid());
        assert_eq!(OperatorSet::ALL.preferred(), Operator::Equal);
        assert_eq!(OperatorSet::GT_LT.preferred(), Operator::GreaterThan);
    }
}
