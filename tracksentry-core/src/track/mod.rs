//! Unified tracks
//!
//! A [`UniTrack`] presents radar, AIS, ADS-B and fused tracks through one
//! interface. Source-specific attributes live in [`TrackVariant`]; the
//! accessors return `None` whenever a track type does not carry an
//! attribute, which conditions treat as "does not match".

pub mod database;
pub mod descriptor;
pub mod history;

use bitflags::bitflags;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::geo::{bearing_difference, LatLong, Velocity};
pub use database::{
    RefPoint, SelectState, TrackDbEvent, TrackGroup, TrackSource, UniTrackDatabase,
};
pub use descriptor::{Descriptor, FieldType};
pub use history::{HistoryPoint, HistorySettings, TrackHistory};

/// Unified track ID, assigned once by the track database
pub type TrackId = u32;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    FromPrimitive,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u32)]
pub enum TrackType {
    Radar = 1,
    Ais = 2,
    #[strum(serialize = "ADS-B")]
    Adsb = 4,
    Fused = 8,
}

bitflags! {
    /// Set of track types, used for filtering
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TrackTypes: u32 {
        const RADAR = 0x01;
        const AIS = 0x02;
        const ADSB = 0x04;
        const FUSED = 0x08;
    }
}

impl TrackType {
    pub fn as_flag(self) -> TrackTypes {
        TrackTypes::from_bits_retain(self as u32)
    }
}

impl Default for TrackTypes {
    fn default() -> Self {
        TrackTypes::all()
    }
}

bitflags! {
    /// What changed in a track update
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TrackChange: u32 {
        const POSITION = 0x0001;
        const VELOCITY = 0x0002;
        const ALTITUDE = 0x0004;
        const CLASS = 0x0008;
        const THREAT = 0x0010;
        const NOTE = 0x0020;
        const DETAILS = 0x0040;
        const LAND = 0x0080;
        const FLAGS = 0x0100;
        const ASTERIX = 0x0200;
        const NAME = 0x0400;
        const ALARM = 0x0800;
        const FILTER = 0x1000;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadarDetails {
    pub mode_3a: Option<u32>,
    pub mode_2: Option<u32>,
    pub mode_1: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AisDetails {
    pub mmsi: u32,
    pub name: Option<String>,
    pub ship_type: Option<u32>,
    pub nav_status: Option<u32>,
    /// Hazardous cargo category (1-4 = A-D), 0 when none
    pub hazardous_cargo: Option<u32>,
    pub draught_metres: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdsbDetails {
    /// 24-bit ICAO aircraft address
    pub aa: u32,
    pub callsign: Option<String>,
    pub mode_3a: Option<u32>,
    pub on_ground: Option<bool>,
    pub comms_cap: Option<u32>,
    pub flight_status: Option<u32>,
}

/// Fused track built from a primary (radar) and a secondary source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FusedDetails {
    pub secondary_type: Option<TrackType>,
    pub secondary_id: Option<u32>,
    pub primary_velocity: Option<Velocity>,
    pub secondary_velocity: Option<Velocity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TrackVariant {
    Radar(RadarDetails),
    Ais(AisDetails),
    Adsb(AdsbDetails),
    Fused(FusedDetails),
}

impl TrackVariant {
    pub fn track_type(&self) -> TrackType {
        match self {
            TrackVariant::Radar(_) => TrackType::Radar,
            TrackVariant::Ais(_) => TrackType::Ais,
            TrackVariant::Adsb(_) => TrackType::Adsb,
            TrackVariant::Fused(_) => TrackType::Fused,
        }
    }

    pub fn empty(track_type: TrackType) -> Self {
        match track_type {
            TrackType::Radar => TrackVariant::Radar(RadarDetails::default()),
            TrackType::Ais => TrackVariant::Ais(AisDetails::default()),
            TrackType::Adsb => TrackVariant::Adsb(AdsbDetails::default()),
            TrackType::Fused => TrackVariant::Fused(FusedDetails::default()),
        }
    }
}

/// Threat score with the time it was assessed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threat {
    pub score: f64,
    pub time_ms: u64,
}

/// Update record produced by a source decoder. Absent fields are left
/// unchanged on the track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackUpdate {
    pub position: Option<LatLong>,
    pub raw_position: Option<LatLong>,
    pub velocity: Option<Velocity>,
    pub altitude_metres: Option<f64>,
    pub class_code: Option<u32>,
    pub threat_score: Option<f64>,
    pub note: Option<String>,
    pub user_name: Option<String>,
    pub land_distance_metres: Option<f64>,
    pub land_approach_mps: Option<f64>,
    pub is_test: Option<bool>,
    pub is_simulated: Option<bool>,
    #[serde(skip)]
    pub asterix: Option<Vec<u8>>,
    pub details: Option<TrackVariant>,
}

#[derive(Debug, Clone)]
pub struct UniTrack {
    id: TrackId,
    source: TrackSource,
    pub position: Option<LatLong>,
    pub raw_position: Option<LatLong>,
    pub created_ms: u64,
    pub last_update_ms: u64,
    pub velocity: Option<Velocity>,
    pub altitude_metres: Option<f64>,
    pub class_code: Option<u32>,
    pub threat: Option<Threat>,
    pub note: Option<String>,
    pub user_name: Option<String>,
    pub asterix: Option<Vec<u8>>,
    pub land_distance_metres: Option<f64>,
    pub land_approach_mps: Option<f64>,
    pub is_test: bool,
    pub is_simulated: bool,
    pub details: TrackVariant,
    history: TrackHistory,
    is_alarm: bool,
    is_cleared_alarm: bool,
    is_selected: bool,
    user_select_level: Option<u8>,
    is_deleted: bool,
    is_allowed_by_filters: bool,
}

impl UniTrack {
    pub(crate) fn new(
        id: TrackId,
        source: TrackSource,
        now_ms: u64,
        history: HistorySettings,
    ) -> Self {
        UniTrack {
            id,
            source,
            position: None,
            raw_position: None,
            created_ms: now_ms,
            last_update_ms: now_ms,
            velocity: None,
            altitude_metres: None,
            class_code: None,
            threat: None,
            note: None,
            user_name: None,
            asterix: None,
            land_distance_metres: None,
            land_approach_mps: None,
            is_test: false,
            is_simulated: false,
            details: TrackVariant::empty(source.track_type),
            history: TrackHistory::new(history),
            is_alarm: false,
            is_cleared_alarm: false,
            is_selected: false,
            user_select_level: None,
            is_deleted: false,
            is_allowed_by_filters: true,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn track_type(&self) -> TrackType {
        self.source.track_type
    }

    pub fn history(&self) -> &TrackHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear_history();
    }

    pub fn is_alarm(&self) -> bool {
        self.is_alarm
    }

    pub fn is_cleared_alarm(&self) -> bool {
        self.is_cleared_alarm
    }

    pub fn is_selected(&self) -> bool {
        self.is_selected
    }

    pub fn user_select_level(&self) -> Option<u8> {
        self.user_select_level
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn is_allowed_by_filters(&self) -> bool {
        self.is_allowed_by_filters
    }

    pub(crate) fn set_alarm_flags(&mut self, is_alarm: bool, is_cleared_alarm: bool) -> bool {
        let changed = self.is_alarm != is_alarm || self.is_cleared_alarm != is_cleared_alarm;
        self.is_alarm = is_alarm;
        self.is_cleared_alarm = is_cleared_alarm;
        changed
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.is_selected = selected;
    }

    pub(crate) fn set_user_select_level(&mut self, level: Option<u8>) {
        self.user_select_level = level;
    }

    pub(crate) fn set_deleted(&mut self) {
        self.is_deleted = true;
    }

    pub(crate) fn set_allowed_by_filters(&mut self, allowed: bool) -> bool {
        let changed = self.is_allowed_by_filters != allowed;
        self.is_allowed_by_filters = allowed;
        changed
    }

    /// Apply a source update, returning what changed
    pub(crate) fn apply_update(&mut self, update: TrackUpdate, now_ms: u64) -> TrackChange {
        let mut changes = TrackChange::empty();
        self.last_update_ms = now_ms;

        if let Some(p) = update.position {
            if self.position != Some(p) {
                changes |= TrackChange::POSITION;
            }
            self.position = Some(p);
        }
        if let Some(p) = update.raw_position {
            self.raw_position = Some(p);
        }
        if let Some(v) = update.velocity {
            if self.velocity != Some(v) {
                changes |= TrackChange::VELOCITY;
            }
            self.velocity = Some(v);
        }
        if update.altitude_metres.is_some() && update.altitude_metres != self.altitude_metres {
            self.altitude_metres = update.altitude_metres;
            changes |= TrackChange::ALTITUDE;
        }
        if update.class_code.is_some() && update.class_code != self.class_code {
            self.class_code = update.class_code;
            changes |= TrackChange::CLASS;
        }
        if let Some(score) = update.threat_score {
            self.threat = Some(Threat {
                score,
                time_ms: now_ms,
            });
            changes |= TrackChange::THREAT;
        }
        if update.note.is_some() && update.note != self.note {
            self.note = update.note;
            changes |= TrackChange::NOTE;
        }
        if update.user_name.is_some() && update.user_name != self.user_name {
            self.user_name = update.user_name;
            changes |= TrackChange::NAME;
        }
        if update.land_distance_metres.is_some() || update.land_approach_mps.is_some() {
            if update.land_distance_metres.is_some() {
                self.land_distance_metres = update.land_distance_metres;
            }
            if update.land_approach_mps.is_some() {
                self.land_approach_mps = update.land_approach_mps;
            }
            changes |= TrackChange::LAND;
        }
        if let Some(t) = update.is_test {
            if t != self.is_test {
                changes |= TrackChange::FLAGS;
            }
            self.is_test = t;
        }
        if let Some(s) = update.is_simulated {
            if s != self.is_simulated {
                changes |= TrackChange::FLAGS;
            }
            self.is_simulated = s;
        }
        if update.asterix.is_some() {
            self.asterix = update.asterix;
            changes |= TrackChange::ASTERIX;
        }
        if let Some(details) = update.details {
            if details.track_type() == self.track_type() {
                if details != self.details {
                    changes |= TrackChange::DETAILS;
                }
                self.details = details;
            } else {
                log::warn!(
                    "Ignoring {} details for {} track {}",
                    details.track_type(),
                    self.track_type(),
                    self.id
                );
            }
        }

        if let Some(position) = self.position {
            self.history.add_point(HistoryPoint {
                time_ms: now_ms,
                position,
                velocity: self.velocity,
            });
        }
        changes
    }

    pub fn speed(&self) -> Option<f64> {
        self.velocity.map(|v| v.speed_mps)
    }

    pub fn course(&self) -> Option<f64> {
        self.velocity.map(|v| v.course_degs)
    }

    /// MMSI, aircraft address, Mode-3A code or the fused secondary ID
    pub fn secondary_id(&self) -> Option<u32> {
        match &self.details {
            TrackVariant::Radar(r) => r.mode_3a,
            TrackVariant::Ais(a) => Some(a.mmsi),
            TrackVariant::Adsb(b) => Some(b.aa),
            TrackVariant::Fused(f) => f.secondary_id,
        }
    }

    pub fn secondary_type(&self) -> Option<TrackType> {
        match &self.details {
            TrackVariant::Radar(_) => None,
            TrackVariant::Ais(_) => Some(TrackType::Ais),
            TrackVariant::Adsb(_) => Some(TrackType::Adsb),
            TrackVariant::Fused(f) => f.secondary_type,
        }
    }

    pub fn ais(&self) -> Option<&AisDetails> {
        match &self.details {
            TrackVariant::Ais(a) => Some(a),
            _ => None,
        }
    }

    pub fn adsb(&self) -> Option<&AdsbDetails> {
        match &self.details {
            TrackVariant::Adsb(b) => Some(b),
            _ => None,
        }
    }

    pub fn on_ground(&self) -> Option<bool> {
        self.adsb().and_then(|b| b.on_ground)
    }

    pub fn comms_cap(&self) -> Option<u32> {
        self.adsb().and_then(|b| b.comms_cap)
    }

    pub fn flight_status(&self) -> Option<u32> {
        self.adsb().and_then(|b| b.flight_status)
    }

    pub fn acceleration(&self) -> Option<f64> {
        self.history.acceleration()
    }

    pub fn rate_of_turn(&self) -> Option<f64> {
        self.history.rate_of_turn()
    }

    fn fused_velocities(&self) -> Option<(Velocity, Velocity)> {
        match &self.details {
            TrackVariant::Fused(f) => Some((f.primary_velocity?, f.secondary_velocity?)),
            _ => None,
        }
    }

    /// Difference between primary and secondary speed as a percentage of
    /// the secondary speed
    pub fn speed_deviation(&self) -> Option<f64> {
        let (p, s) = self.fused_velocities()?;
        if s.speed_mps <= f64::EPSILON {
            return None;
        }
        Some((p.speed_mps - s.speed_mps).abs() / s.speed_mps * 100.0)
    }

    /// Difference between primary and secondary course in degrees
    pub fn course_deviation(&self) -> Option<f64> {
        let (p, s) = self.fused_velocities()?;
        Some(bearing_difference(p.course_degs, s.course_degs))
    }

    /// Threat level is the integer part of the threat score
    pub fn threat_level(&self) -> Option<u32> {
        self.threat
            .filter(|t| t.score.is_finite() && t.score >= 0.0)
            .map(|t| t.score.floor() as u32)
    }

    /// Build a descriptor for this track. With [`FieldType::Persistent`]
    /// the best persistent field for the track type is used.
    pub fn descriptor(&self, field_type: FieldType) -> Option<Descriptor> {
        let (field_type, persistent) = match field_type {
            FieldType::Persistent => match &self.details {
                TrackVariant::Ais(_) => (FieldType::Mmsi, true),
                TrackVariant::Adsb(_) => (FieldType::Aa, true),
                _ => (FieldType::Id, false),
            },
            other => (other, false),
        };
        let field = self.field_value(field_type)?;
        Some(Descriptor {
            is_fused: self.track_type() == TrackType::Fused,
            source_type: self.track_type(),
            source_index: self.source.source_index,
            field_type,
            field,
            persistent,
        })
    }

    fn field_value(&self, field_type: FieldType) -> Option<u32> {
        match (field_type, &self.details) {
            (FieldType::Persistent, _) => None,
            (FieldType::Id, _) => Some(self.source.source_id),
            (FieldType::Mmsi, TrackVariant::Ais(a)) => Some(a.mmsi),
            (FieldType::Mmsi, TrackVariant::Fused(f)) if f.secondary_type == Some(TrackType::Ais) => {
                f.secondary_id
            }
            (FieldType::Aa, TrackVariant::Adsb(b)) => Some(b.aa),
            (FieldType::Aa, TrackVariant::Fused(f)) if f.secondary_type == Some(TrackType::Adsb) => {
                f.secondary_id
            }
            (FieldType::Mode3A, TrackVariant::Adsb(b)) => b.mode_3a,
            (FieldType::Mode3A, TrackVariant::Radar(r)) => r.mode_3a,
            (FieldType::Mode2, TrackVariant::Radar(r)) => r.mode_2,
            (FieldType::Mode1, TrackVariant::Radar(r)) => r.mode_1,
            _ => None,
        }
    }

    /// Does this track match the descriptor
    pub fn test_descriptor(&self, desc: &Descriptor) -> bool {
        desc.is_fused == (self.track_type() == TrackType::Fused)
            && desc.source_type == self.track_type()
            && desc.source_index == self.source.source_index
            && self.field_value(desc.field_type) == Some(desc.field)
    }

    /// Display name: user name, AIS/ADS-B name, or type and ID
    pub fn name(&self) -> String {
        if let Some(name) = &self.user_name {
            return name.clone();
        }
        match &self.details {
            TrackVariant::Ais(AisDetails {
                name: Some(name), ..
            }) => name.trim().to_string(),
            TrackVariant::Adsb(AdsbDetails {
                callsign: Some(cs), ..
            }) => cs.trim().to_string(),
            _ => format!("{} {}", self.track_type(), self.id),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ais_track(id: TrackId, mmsi: u32) -> UniTrack {
        let mut t = UniTrack::new(
            id,
            TrackSource {
                track_type: TrackType::Ais,
                source_index: 0,
                source_id: mmsi,
            },
            0,
            HistorySettings::default(),
        );
        t.details = TrackVariant::Ais(AisDetails {
            mmsi,
            ..Default::default()
        });
        t
    }

    #[test]
    fn test_update_change_flags() {
        let mut t = ais_track(1, 235000001);
        let changes = t.apply_update(
            TrackUpdate {
                position: Some(LatLong::new(50.0, -1.0)),
                velocity: Some(Velocity::new(5.0, 90.0)),
                ..Default::default()
            },
            1000,
        );
        assert!(changes.contains(TrackChange::POSITION | TrackChange::VELOCITY));
        assert_eq!(t.history().len(), 1);

        // Same values again: nothing changed
        let changes = t.apply_update(
            TrackUpdate {
                position: Some(LatLong::new(50.0, -1.0)),
                ..Default::default()
            },
            3000,
        );
        assert!(changes.is_empty());
        assert_eq!(t.last_update_ms, 3000);
    }

    #[test]
    fn test_mismatched_details_ignored() {
        let mut t = ais_track(1, 235000001);
        let changes = t.apply_update(
            TrackUpdate {
                details: Some(TrackVariant::Adsb(AdsbDetails::default())),
                ..Default::default()
            },
            0,
        );
        assert!(!changes.contains(TrackChange::DETAILS));
        assert_eq!(t.secondary_id(), Some(235000001));
    }

    #[test]
    fn test_missing_attributes_are_none() {
        let t = ais_track(1, 1);
        assert_eq!(t.speed(), None);
        assert_eq!(t.on_ground(), None);
        assert_eq!(t.speed_deviation(), None);
        assert_eq!(t.threat_level(), None);
        assert_eq!(t.secondary_type(), Some(TrackType::Ais));
    }

    #[test]
    fn test_persistent_descriptor() {
        let t = ais_track(7, 235001234);
        let d = t.descriptor(FieldType::Persistent).unwrap();
        assert_eq!(d.to_string(), "0A0.2.235001234P");
        assert!(t.test_descriptor(&d));
        assert!(t.test_descriptor(&Descriptor::parse("0A0.1.235001234").unwrap()));
        assert!(!t.test_descriptor(&Descriptor::parse("0A0.2.1").unwrap()));
        assert_eq!(t.descriptor(FieldType::Aa), None);
    }

    #[test]
    fn test_fused_deviation() {
        let mut t = ais_track(1, 1);
        t.source.track_type = TrackType::Fused;
        t.details = TrackVariant::Fused(FusedDetails {
            secondary_type: Some(TrackType::Ais),
            secondary_id: Some(99),
            primary_velocity: Some(Velocity::new(12.0, 10.0)),
            secondary_velocity: Some(Velocity::new(10.0, 350.0)),
        });
        assert!((t.speed_deviation().unwrap() - 20.0).abs() < 1e-9);
        assert!((t.course_deviation().unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(t.descriptor(FieldType::Mmsi).map(|d| d.field), Some(99));
    }
}
