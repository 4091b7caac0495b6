//! Per-type condition evaluation

use super::{shape_meets, Condition, ConditionArg, EvalContext, Trigger};
use crate::condition::types::ConditionType as T;
use crate::cpa::{calculate_cpa, CpaResult, Motion};
use crate::shapes::{GateDirection, Shape};
use crate::track::{RefPoint, TrackType, UniTrack};

impl Condition {
    fn arg_shape<'c>(&self, ctx: &EvalContext<'c>) -> Option<&'c Shape> {
        let shape = ctx.shapes.shape(self.shape_id()?)?;
        let req = self.condition_type.shape_requirement()?;
        shape_meets(req, &shape.kind).then_some(shape)
    }

    fn arg_track<'c>(&self, track: &UniTrack, ctx: &EvalContext<'c>) -> Option<&'c UniTrack> {
        let ConditionArg::Track(desc) = &self.arg else {
            return None;
        };
        ctx.tracks
            .track_from_descriptor(desc)
            .filter(|other| other.id() != track.id() && !other.is_deleted())
    }

    fn arg_ref_point<'c>(&self, ctx: &EvalContext<'c>) -> Option<&'c RefPoint> {
        ctx.tracks.ref_point(self.arg_value()? as u32)
    }

    fn test_value(&self, value: Option<f64>) -> bool {
        match (value, self.arg_value()) {
            (Some(v), Some(arg)) => self.arg_op.apply(v, arg),
            _ => false,
        }
    }

    fn test_flag(&self, value: Option<bool>) -> bool {
        match (value, self.arg_value()) {
            (Some(v), Some(arg)) => self.arg_op.apply_bool(v == (arg != 0.0)),
            _ => false,
        }
    }

    pub(super) fn test_timestamp(&self, ctx: &EvalContext<'_>) -> Option<Trigger> {
        let now_secs = ctx.now_ms as f64 / 1000.0;
        self.test_value(Some(now_secs)).then(|| self.trigger())
    }

    pub(super) fn test_area(&self, track: &UniTrack, ctx: &EvalContext<'_>) -> Option<Trigger> {
        let shape = self.arg_shape(ctx)?;
        let area = &shape.kind;
        let position = track.position?;
        let history = track.history();
        let limit = self.time_limit;

        let matched = match self.condition_type {
            T::AreaInside => {
                area.contains(&position)
                    && (!limit.is_active()
                        || history
                            .time_in_area(area, ctx.now_ms)
                            .is_some_and(|secs| limit.test(secs)))
            }
            T::AreaVisited => {
                let since = limit
                    .is_active()
                    .then(|| ctx.now_ms.saturating_sub((limit.value * 1000.0) as u64));
                area.contains(&position) || history.was_in_area(area, since)
            }
            T::AreaNotLeft => {
                area.contains(&position) && history.lingered_in_area(area, limit.value, ctx.now_ms)
            }
            T::AreaStarted => history.started_in_area(area),
            _ => return None,
        };

        self.arg_op.apply_bool(matched).then(|| Trigger {
            shape: Some(shape.id),
            ..self.trigger()
        })
    }

    pub(super) fn test_gate(&self, track: &UniTrack, ctx: &EvalContext<'_>) -> Option<Trigger> {
        let shape = self.arg_shape(ctx)?;
        let direction = match self.condition_type {
            T::GateCrossedFwd => Some(GateDirection::Forward),
            T::GateCrossedRev => Some(GateDirection::Reverse),
            T::GateCrossed => None,
            _ => return None,
        };
        let limit = self.time_limit;
        let since = limit
            .is_active()
            .then(|| ctx.now_ms.saturating_sub((limit.value * 1000.0) as u64));

        let crossed = track
            .history()
            .is_gate_crossed(&shape.kind, direction, since);
        self.arg_op.apply_bool(crossed).then(|| Trigger {
            shape: Some(shape.id),
            ..self.trigger()
        })
    }

    pub(super) fn test_attribute(
        &self,
        track: &UniTrack,
        ctx: &EvalContext<'_>,
    ) -> Option<Trigger> {
        let as_f64 = |v: Option<u32>| v.map(f64::from);
        let ais = track.ais();

        let matched = match self.condition_type {
            T::Track => match &self.arg {
                ConditionArg::Track(desc) => self.arg_op.apply_bool(track.test_descriptor(desc)),
                _ => false,
            },
            T::TrackSecondaryId => self.test_value(as_f64(track.secondary_id())),
            T::TrackSpeed => self.test_value(track.speed()),
            T::TrackCourse => self.test_value(track.course()),
            T::TrackAltitude => self.test_value(track.altitude_metres),
            T::TrackClass => self.test_value(as_f64(track.class_code)),
            T::TrackGroup => {
                let in_group = self
                    .arg_value()
                    .map(|id| ctx.tracks.is_track_in_group(track, id as u32));
                self.test_flag_against(in_group)
            }
            T::TrackSecondaryType => {
                self.test_value(as_f64(track.secondary_type().map(|t| t as u32)))
            }
            T::TrackOnGround => self.test_flag(track.on_ground()),
            T::TrackIsTest => self.test_flag(Some(track.is_test)),
            T::TrackIsSimulated => self.test_flag(Some(track.is_simulated)),
            T::TrackCommsCap => self.test_value(as_f64(track.comms_cap())),
            T::TrackFlightStatus => self.test_value(as_f64(track.flight_status())),
            T::TrackAcceleration => self.test_value(track.acceleration()),
            T::TrackRateOfTurn => self.test_value(track.rate_of_turn().map(f64::abs)),
            T::TrackSpeedDeviation => self.test_value(track.speed_deviation()),
            T::TrackCourseDeviation => self.test_value(track.course_deviation()),
            T::TrackThreatLevel => self.test_value(as_f64(track.threat_level())),
            T::AisShipType => self.test_value(as_f64(ais.and_then(|a| a.ship_type))),
            T::AisNavStatus => self.test_value(as_f64(ais.and_then(|a| a.nav_status))),
            T::AisHazardousCargo => {
                self.test_flag(ais.and_then(|a| a.hazardous_cargo).map(|c| c > 0))
            }
            T::AisDraught => self.test_value(ais.and_then(|a| a.draught_metres)),
            _ => false,
        };
        matched.then(|| self.trigger())
    }

    /// Membership style test where the argument selects the set
    fn test_flag_against(&self, value: Option<bool>) -> bool {
        value.is_some_and(|v| self.arg_op.apply_bool(v))
    }

    /// Candidate second tracks for "any track" types
    fn candidates<'c>(
        &self,
        track: &UniTrack,
        ctx: &EvalContext<'c>,
    ) -> impl Iterator<Item = &'c UniTrack> + 'c {
        let ty = self.condition_type;
        let id = track.id();
        let now_ms = ctx.now_ms;
        let candidate_types = ctx.candidate_types;
        // Proximity "any" types use the time limit as a recency window
        let max_age_ms = (ty.is_proximity() && self.time_limit.is_active())
            .then(|| (self.time_limit.value * 1000.0) as u64);

        ctx.tracks.tracks().filter(move |other| {
            if other.id() == id || other.is_deleted() || other.position.is_none() {
                return false;
            }
            if !candidate_types.contains(other.track_type().as_flag()) {
                return false;
            }
            let is_type = |t: TrackType| other.track_type() == t || other.secondary_type() == Some(t);
            let type_ok = match ty {
                T::ProximityToAnyAis => is_type(TrackType::Ais),
                T::ProximityToAnyAdsb => is_type(TrackType::Adsb),
                _ => true,
            };
            type_ok
                && max_age_ms
                    .map_or(true, |max| now_ms.saturating_sub(other.last_update_ms) < max)
        })
    }

    pub(super) fn test_proximity(
        &self,
        track: &UniTrack,
        ctx: &EvalContext<'_>,
    ) -> Option<Trigger> {
        let range = self.range_limit;
        let position = track.position?;

        match self.condition_type {
            T::ProximityToPoint | T::ProximityToShape => {
                let shape = self.arg_shape(ctx)?;
                let d = shape.kind.distance_to(&position);
                range.test(d).then(|| Trigger {
                    shape: Some(shape.id),
                    distance_metres: Some(d),
                    ..self.trigger()
                })
            }
            T::ProximityToRefPoint => {
                let rp = self.arg_ref_point(ctx)?;
                let d = rp.position.distance_to(&position);
                range.test(d).then(|| Trigger {
                    ref_point: Some(rp.id),
                    distance_metres: Some(d),
                    ..self.trigger()
                })
            }
            T::ProximityToTrack => {
                let other = self.arg_track(track, ctx)?;
                let d = other.position?.distance_to(&position);
                range.test(d).then(|| Trigger {
                    track: Some(other.id()),
                    distance_metres: Some(d),
                    ..self.trigger()
                })
            }
            T::ProximityToAnyAis | T::ProximityToAnyAdsb | T::ProximityToAnyTrack => {
                // Nearest qualifying track, lowest ID on a tie
                let mut best: Option<(f64, &UniTrack)> = None;
                for other in self.candidates(track, ctx) {
                    let Some(p) = other.position else { continue };
                    let d = p.distance_to(&position);
                    if range.test(d) && best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, other));
                    }
                }
                best.map(|(d, other)| Trigger {
                    track: Some(other.id()),
                    distance_metres: Some(d),
                    ..self.trigger()
                })
            }
            T::ProximityToLand => {
                let d = track.land_distance_metres?;
                range.test(d).then(|| Trigger {
                    distance_metres: Some(d),
                    ..self.trigger()
                })
            }
            T::ApproachLand => {
                let d = track.land_distance_metres?;
                let speed = track.land_approach_mps.filter(|s| *s > 0.0)?;
                self.time_limit.test(d / speed).then(|| Trigger {
                    distance_metres: Some(d),
                    ..self.trigger()
                })
            }
            _ => None,
        }
    }

    fn cpa_passes(&self, cpa: &CpaResult) -> bool {
        cpa.tcpa_secs >= 0.0
            && self.range_limit.test(cpa.cpa_metres)
            && self.time_limit.test(cpa.tcpa_secs)
    }

    fn track_motion(track: &UniTrack) -> Option<Motion> {
        Some(Motion::new(track.position?, track.velocity?))
    }

    pub(super) fn test_cpa(&self, track: &UniTrack, ctx: &EvalContext<'_>) -> Option<Trigger> {
        let own = Self::track_motion(track)?;

        match self.condition_type {
            T::CpaToPoint => {
                let shape = self.arg_shape(ctx)?;
                let point = Motion::stationary(shape.kind.reference()?);
                let cpa = calculate_cpa(&own, &point);
                self.cpa_passes(&cpa).then(|| Trigger {
                    shape: Some(shape.id),
                    cpa: Some(cpa),
                    distance_metres: Some(cpa.cpa_metres),
                    ..self.trigger()
                })
            }
            T::CpaToRefPoint => {
                let rp = self.arg_ref_point(ctx)?;
                let other = Motion::new(rp.position, rp.velocity.unwrap_or_default());
                let cpa = calculate_cpa(&own, &other);
                self.cpa_passes(&cpa).then(|| Trigger {
                    ref_point: Some(rp.id),
                    cpa: Some(cpa),
                    distance_metres: Some(cpa.cpa_metres),
                    ..self.trigger()
                })
            }
            T::CpaToTrack => {
                let other = self.arg_track(track, ctx)?;
                let cpa = calculate_cpa(&own, &Self::track_motion(other)?);
                self.cpa_passes(&cpa).then(|| Trigger {
                    track: Some(other.id()),
                    cpa: Some(cpa),
                    distance_metres: Some(cpa.cpa_metres),
                    ..self.trigger()
                })
            }
            T::CpaToAnyTrack => {
                // Smallest CPA wins, lowest ID on a tie
                let mut best: Option<(CpaResult, &UniTrack)> = None;
                for other in self.candidates(track, ctx) {
                    let Some(motion) = Self::track_motion(other) else {
                        continue;
                    };
                    let cpa = calculate_cpa(&own, &motion);
                    if self.cpa_passes(&cpa)
                        && best.map_or(true, |(b, _)| cpa.cpa_metres < b.cpa_metres)
                    {
                        best = Some((cpa, other));
                    }
                }
                best.map(|(cpa, other)| Trigger {
                    track: Some(other.id()),
                    cpa: Some(cpa),
                    distance_metres: Some(cpa.cpa_metres),
                    ..self.trigger()
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionType, Operator};
    use crate::geo::{LatLong, Velocity};
    use crate::shapes::{ShapeDatabase, ShapeKind};
    use crate::track::{AisDetails, TrackSource, TrackUpdate, TrackVariant, UniTrackDatabase};

    fn ais_source(mmsi: u32) -> TrackSource {
        TrackSource {
            track_type: TrackType::Ais,
            source_index: 0,
            source_id: mmsi,
        }
    }

    fn update(position: LatLong, speed: f64, course: f64) -> TrackUpdate {
        TrackUpdate {
            position: Some(position),
            velocity: Some(Velocity::new(speed, course)),
            ..Default::default()
        }
    }

    fn speed_condition(op: Operator, value: f64) -> Condition {
        let mut c = Condition::new(1, ConditionType::TrackSpeed);
        c.set_arg_operator(op).unwrap();
        c.set_arg_value(value).unwrap();
        c
    }

    #[test]
    fn test_speed_operators() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let id = tracks.update_track(ais_source(1), update(LatLong::new(50.0, 0.0), 20.0, 0.0), 0);
        let ctx = EvalContext::new(&tracks, &shapes, 0);
        let track = tracks.track(id);

        for (op, value, expected) in [
            (Operator::Equal, 20.0, true),
            (Operator::Equal, 19.0, false),
            (Operator::NotEqual, 20.0, false),
            (Operator::GreaterThan, 19.0, true),
            (Operator::GreaterThan, 20.0, false),
            (Operator::LessThan, 21.0, true),
            (Operator::LessThan, 20.0, false),
        ] {
            let c = speed_condition(op, value);
            assert_eq!(c.test(track, &ctx).is_some(), expected, "{op:?} {value}");
        }
    }

    #[test]
    fn test_repeated_evaluation_is_stable() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let id = tracks.update_track(ais_source(1), update(LatLong::new(50.0, 0.0), 25.0, 0.0), 0);
        let ctx = EvalContext::new(&tracks, &shapes, 0);
        let c = speed_condition(Operator::GreaterThan, 20.0);
        let first = c.test(tracks.track(id), &ctx);
        assert!(first.is_some());
        assert_eq!(first, c.test(tracks.track(id), &ctx));
    }

    #[test]
    fn test_missing_data_is_false() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let id = tracks.update_track(
            ais_source(1),
            TrackUpdate {
                position: Some(LatLong::new(50.0, 0.0)),
                ..Default::default()
            },
            0,
        );
        let ctx = EvalContext::new(&tracks, &shapes, 0);

        // No velocity, no altitude: both operators are false
        assert!(speed_condition(Operator::LessThan, 100.0)
            .test(tracks.track(id), &ctx)
            .is_none());
        let mut c = Condition::new(2, ConditionType::TrackAltitude);
        c.set_arg_operator(Operator::NotEqual).unwrap();
        c.set_arg_value(100.0).unwrap();
        assert!(c.test(tracks.track(id), &ctx).is_none());

        // Unconfigured condition
        let c = Condition::new(3, ConditionType::TrackClass);
        assert!(c.test(tracks.track(id), &ctx).is_none());
    }

    #[test]
    fn test_ais_attributes() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let id = tracks.update_track(
            ais_source(235000001),
            TrackUpdate {
                position: Some(LatLong::new(50.0, 0.0)),
                details: Some(TrackVariant::Ais(AisDetails {
                    mmsi: 235000001,
                    ship_type: Some(70),
                    hazardous_cargo: Some(2),
                    draught_metres: Some(12.5),
                    ..Default::default()
                })),
                ..Default::default()
            },
            0,
        );
        let ctx = EvalContext::new(&tracks, &shapes, 0);
        let track = tracks.track(id);

        let mut c = Condition::new(1, ConditionType::AisHazardousCargo);
        c.set_arg_value(1.0).unwrap();
        assert!(c.test(track, &ctx).is_some());

        let mut c = Condition::new(2, ConditionType::AisDraught);
        c.set_arg_operator(Operator::GreaterThan).unwrap();
        c.set_arg_value(10.0).unwrap();
        assert!(c.test(track, &ctx).is_some());

        let mut c = Condition::new(3, ConditionType::AisShipType);
        c.set_arg_operator(Operator::NotEqual).unwrap();
        c.set_arg_value(70.0).unwrap();
        assert!(c.test(track, &ctx).is_none());

        let mut c = Condition::new(4, ConditionType::TrackSecondaryId);
        c.set_arg_value(235000001.0).unwrap();
        assert!(c.test(track, &ctx).is_some());
    }

    #[test]
    fn test_area_and_deleted_shape() {
        let mut tracks = UniTrackDatabase::new();
        let mut shapes = ShapeDatabase::new();
        let o = LatLong::new(50.0, -1.0);
        let shape_id = shapes.add_shape(
            "zone",
            ShapeKind::Circle {
                centre: o,
                radius_metres: 1000.0,
            },
        );
        let id = tracks.update_track(ais_source(1), update(o.offset_by(100.0, 0.0), 1.0, 0.0), 0);

        let mut c = Condition::new(1, ConditionType::AreaInside);
        c.set_arg_string("zone").unwrap();
        c.resolve_shape(&shapes);
        {
            let ctx = EvalContext::new(&tracks, &shapes, 0);
            let trigger = c.test(tracks.track(id), &ctx).unwrap();
            assert_eq!(trigger.shape, Some(shape_id));
        }

        shapes.remove_shape(shape_id);
        assert!(c.forget_shape(Some(shape_id)));
        let ctx = EvalContext::new(&tracks, &shapes, 0);
        assert!(c.test(tracks.track(id), &ctx).is_none());
    }

    #[test]
    fn test_cpa_to_track_converging() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let a = tracks.update_track(ais_source(1), update(LatLong::new(0.0, 0.0), 10.0, 90.0), 0);
        tracks.update_track(ais_source(2), update(LatLong::new(0.0, 0.01), 10.0, 270.0), 0);

        let mut c = Condition::new(1, ConditionType::CpaToTrack);
        c.set_arg_string("0A0.1.2").unwrap();
        c.set_range_limit(2000.0).unwrap();
        c.set_time_limit(120.0).unwrap();

        let ctx = EvalContext::new(&tracks, &shapes, 0);
        let trigger = c.test(tracks.track(a), &ctx).unwrap();
        let cpa = trigger.cpa.unwrap();
        let separation = LatLong::new(0.0, 0.0).distance_to(&LatLong::new(0.0, 0.01));
        assert!(cpa.cpa_metres < 1.0);
        assert!((cpa.tcpa_secs - separation / 20.0).abs() < 0.5);
        assert!(cpa.tcpa_secs > 0.0);

        // Time limit shorter than TCPA
        c.set_time_limit(30.0).unwrap();
        assert!(c.test(tracks.track(a), &ctx).is_none());
    }

    #[test]
    fn test_proximity_to_any_picks_nearest() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let o = LatLong::new(40.0, 10.0);
        let own = tracks.update_track(ais_source(1), update(o, 0.0, 0.0), 0);
        tracks.update_track(ais_source(2), update(o.offset_by(800.0, 0.0), 0.0, 0.0), 0);
        let near = tracks.update_track(ais_source(3), update(o.offset_by(0.0, 300.0), 0.0, 0.0), 0);
        tracks.update_track(ais_source(4), update(o.offset_by(5000.0, 0.0), 0.0, 0.0), 0);

        let mut c = Condition::new(1, ConditionType::ProximityToAnyTrack);
        c.set_range_limit(1000.0).unwrap();
        let ctx = EvalContext::new(&tracks, &shapes, 0);
        let trigger = c.test(tracks.track(own), &ctx).unwrap();
        assert_eq!(trigger.track, Some(near));
        assert!((trigger.distance_metres.unwrap() - 300.0).abs() < 1.0);

        // Only tracks updated in the last 5 seconds qualify
        c.set_time_limit(5.0).unwrap();
        let ctx = EvalContext::new(&tracks, &shapes, 60_000);
        assert!(c.test(tracks.track(own), &ctx).is_none());
    }

    #[test]
    fn test_approach_land() {
        let mut tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let id = tracks.update_track(
            ais_source(1),
            TrackUpdate {
                position: Some(LatLong::new(50.0, 0.0)),
                land_distance_metres: Some(600.0),
                land_approach_mps: Some(5.0),
                ..Default::default()
            },
            0,
        );
        let mut c = Condition::new(1, ConditionType::ApproachLand);
        c.set_time_limit(180.0).unwrap();
        let ctx = EvalContext::new(&tracks, &shapes, 0);
        assert!(c.test(tracks.track(id), &ctx).is_some());
        c.set_time_limit(60.0).unwrap();
        assert!(c.test(tracks.track(id), &ctx).is_none());
    }

    #[test]
    fn test_timestamp_without_track() {
        let tracks = UniTrackDatabase::new();
        let shapes = ShapeDatabase::new();
        let mut c = Condition::new(1, ConditionType::Timestamp);
        assert_eq!(c.arg_operator(), Operator::GreaterThan);
        c.set_arg_value(1_700_000_000.0).unwrap();

        let ctx = EvalContext::new(&tracks, &shapes, 1_700_000_001_000);
        assert!(c.test(None, &ctx).is_some());
        let ctx = EvalContext::new(&tracks, &shapes, 1_600_000_000_000);
        assert!(c.test(None, &ctx).is_none());
    }
}
