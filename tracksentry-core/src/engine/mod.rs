//! Engine - track, shape and alarm databases wired together
//!
//! The engine is the single entry point used by platforms. It owns the
//! three databases and runs every track update through filtering and
//! alarm evaluation:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Engine                                                      │
//! │  ├─ UniTrackDatabase   tracks, filters, groups, ref points   │
//! │  ├─ ShapeDatabase      areas, gates, points                  │
//! │  └─ AlarmDatabase      alarm configs, alarms, actions        │
//! └──────────────────────────────────────────────────────────────┘
//!
//!   update_track ──> apply_filters ──> check_track ──> track alarm flags
//!   delete_track ──> alarms retired
//!   shape change ──> filters and alarm configs re-resolve
//! ```
//!
//! Nothing here is asynchronous. Platforms hold the engine behind a lock
//! and call the timer entry points at their own rate.

use crate::alarm::{AlarmConfig, AlarmDatabase, AlarmOutput};
use crate::condition::{EvalContext, GroupId};
use crate::config_file::{self, ConfigWriter};
use crate::error::Result;
use crate::filter::UniTrackFilter;
use crate::ids;
use crate::shapes::{ShapeDatabase, ShapeEvent, ShapeId, ShapeKind};
use crate::track::{TrackId, TrackSource, TrackUpdate, UniTrackDatabase};

#[derive(Debug, Default)]
pub struct Engine {
    tracks: UniTrackDatabase,
    shapes: ShapeDatabase,
    alarms: AlarmDatabase,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            tracks: UniTrackDatabase::new(),
            shapes: ShapeDatabase::new(),
            alarms: AlarmDatabase::new(),
        }
    }

    pub fn tracks(&self) -> &UniTrackDatabase {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut UniTrackDatabase {
        &mut self.tracks
    }

    pub fn shapes(&self) -> &ShapeDatabase {
        &self.shapes
    }

    pub fn alarms(&self) -> &AlarmDatabase {
        &self.alarms
    }

    /// Run `f` against the alarm database, then push any alarm flag
    /// changes onto the tracks
    pub fn with_alarms<R>(&mut self, f: impl FnOnce(&mut AlarmDatabase) -> R) -> R {
        let result = f(&mut self.alarms);
        self.sync_track_flags();
        result
    }

    /// Modify an alarm config. Shape names used by its conditions are
    /// resolved against the current shapes afterwards.
    pub fn edit_config<R>(
        &mut self,
        id: GroupId,
        now_ms: u64,
        f: impl FnOnce(&mut AlarmConfig) -> Result<R>,
    ) -> Result<R> {
        let shapes = &self.shapes;
        let result = self.alarms.edit_config(id, now_ms, |c| {
            let result = f(c);
            c.group_mut().resolve_shapes(shapes);
            result
        });
        self.sync_track_flags();
        result
    }

    fn sync_track_flags(&mut self) {
        for (id, is_alarm, is_cleared) in self.alarms.take_track_flag_changes() {
            self.tracks.set_track_alarm_flags(id, is_alarm, is_cleared);
        }
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Apply a source update and evaluate the track against filters and
    /// alarm configs
    pub fn update_track(&mut self, source: TrackSource, update: TrackUpdate, now_ms: u64) -> TrackId {
        let id = self.tracks.update_track(source, update, now_ms);
        self.tracks.apply_filters(id, &self.shapes, now_ms);
        let ctx = EvalContext::new(&self.tracks, &self.shapes, now_ms);
        self.alarms.check_track(id, &ctx);
        self.sync_track_flags();
        id
    }

    pub fn delete_track(&mut self, source: &TrackSource) -> Option<TrackId> {
        let id = self.tracks.delete_track(source)?.id();
        self.alarms.handle_track_delete(id);
        self.sync_track_flags();
        Some(id)
    }

    // ========================================================================
    // Filters
    // ========================================================================

    pub fn create_filter(&mut self, name: &str, shared: bool) -> GroupId {
        self.tracks.create_filter(name, shared)
    }

    /// Modify a filter and re-apply filters to every track
    pub fn edit_filter<R>(
        &mut self,
        id: GroupId,
        now_ms: u64,
        f: impl FnOnce(&mut UniTrackFilter) -> Result<R>,
    ) -> Result<R> {
        let shapes = &self.shapes;
        let result = self.tracks.edit_filter(id, |filter| {
            let result = f(filter);
            filter.group_mut().resolve_shapes(shapes);
            result
        });
        self.tracks.update_filters(&self.shapes, now_ms);
        result
    }

    pub fn delete_filter(&mut self, id: GroupId, now_ms: u64) -> Result<()> {
        self.tracks.delete_filter(id)?;
        self.tracks.update_filters(&self.shapes, now_ms);
        Ok(())
    }

    // ========================================================================
    // Shapes
    // ========================================================================

    /// Add or replace a shape. Conditions naming it pick it up.
    pub fn add_shape(&mut self, name: &str, kind: ShapeKind, now_ms: u64) -> ShapeId {
        let id = self.shapes.add_shape(name, kind);
        for filter in self.tracks.filters_mut() {
            filter.group_mut().resolve_shapes(&self.shapes);
        }
        let ids: Vec<GroupId> = self.alarms.configs().map(|c| c.id()).collect();
        for config in ids {
            let shapes = &self.shapes;
            let result = self.alarms.edit_config(config, now_ms, |c| {
                c.group_mut().resolve_shapes(shapes);
                Ok(())
            });
            if let Err(e) = result {
                log::warn!("Alarm config {}: shape '{}' not resolved: {}", config, name, e);
            }
        }
        self.tracks.update_filters(&self.shapes, now_ms);
        id
    }

    pub fn remove_shape(&mut self, id: ShapeId, now_ms: u64) -> bool {
        match self.shapes.remove_shape(id) {
            Some(event) => {
                self.shape_changed(event, now_ms);
                true
            }
            None => false,
        }
    }

    pub fn clear_shapes(&mut self, now_ms: u64) {
        let event = self.shapes.clear();
        self.shape_changed(event, now_ms);
    }

    /// Replace every shape, e.g. after the shape source reloaded
    pub fn reload_shapes(&mut self, shapes: Vec<(String, ShapeKind)>, now_ms: u64) {
        let event = self.shapes.reload(shapes);
        self.shape_changed(event, now_ms);
    }

    fn shape_changed(&mut self, event: ShapeEvent, now_ms: u64) {
        log::debug!("Shape change {:?}", event);
        for filter in self.tracks.filters_mut() {
            filter.group_mut().handle_shape_event(event, &self.shapes);
        }
        self.alarms.handle_shape_event(event, &self.shapes, now_ms);
        self.tracks.update_filters(&self.shapes, now_ms);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Re-test configs with clock based conditions (1 s timer)
    pub fn background(&mut self, now_ms: u64) {
        let ctx = EvalContext::new(&self.tracks, &self.shapes, now_ms);
        self.alarms.background(&ctx);
        self.sync_track_flags();
    }

    /// Apply acknowledge and clear timeouts (1 s timer)
    pub fn check_alarm_timeouts(&mut self, now_ms: u64) {
        self.alarms.check_alarm_timeouts(now_ms);
        self.sync_track_flags();
    }

    /// Play running alarm sounds (2 s timer)
    pub fn play_alarm_sounds(&mut self, output: &mut dyn AlarmOutput) {
        self.alarms.play_alarm_sounds(output);
    }

    /// Send network messages for alarming tracks and flush the alarm
    /// log (1 s timer)
    pub fn send_net_mesgs(&mut self, now_ms: u64, output: &mut dyn AlarmOutput) {
        let ctx = EvalContext::new(&self.tracks, &self.shapes, now_ms);
        self.alarms.send_net_mesgs(&ctx, output);
        self.alarms.flush_alarm_log(output);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn save_alarm_config(&self, shared: bool) -> String {
        let mut w = ConfigWriter::new();
        w.comment("Alarm configuration");
        self.alarms.save(&mut w, shared);
        w.finish()
    }

    pub fn load_alarm_config(&mut self, text: &str, shared: bool) -> Result<usize> {
        let root = config_file::parse(text)?;
        let count = self.alarms.load(&root, shared, &self.shapes)?;
        self.sync_track_flags();
        Ok(count)
    }

    pub fn save_filter_config(&self, shared: bool) -> String {
        let mut w = ConfigWriter::new();
        w.comment("Track filters");
        self.tracks.save_filters(&mut w, shared);
        w.finish()
    }

    pub fn load_filter_config(&mut self, text: &str, shared: bool, now_ms: u64) -> Result<usize> {
        let root = config_file::parse(text)?;
        let count = self.tracks.load_filters(&root, shared, &self.shapes)?;
        self.tracks.update_filters(&self.shapes, now_ms);
        Ok(count)
    }

    /// Drop every track, shape, filter, config and alarm and restart ID
    /// allocation
    pub fn reset(&mut self) {
        self.alarms.reset();
        self.tracks = UniTrackDatabase::new();
        self.shapes = ShapeDatabase::new();
        ids::reset_all();
        log::info!("Engine reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{ActionType, AlarmState, AlarmStates, RecordingOutput};
    use crate::condition::{ConditionType, Operator};
    use crate::geo::{LatLong, Velocity};
    use crate::track::{FieldType, TrackType};

    fn source(track_type: TrackType, source_id: u32) -> TrackSource {
        TrackSource {
            track_type,
            source_index: 0,
            source_id,
        }
    }

    fn moving(position: LatLong, speed: f64, course: f64) -> TrackUpdate {
        TrackUpdate {
            position: Some(position),
            velocity: Some(Velocity::new(speed, course)),
            ..Default::default()
        }
    }

    fn at(position: LatLong) -> TrackUpdate {
        TrackUpdate {
            position: Some(position),
            ..Default::default()
        }
    }

    #[test]
    fn test_speed_alarm_persists_until_timeout() {
        let mut engine = Engine::new();
        let config = engine.with_alarms(|a| a.create_config("Fast", false));
        engine
            .edit_config(config, 0, |c| {
                let cond = c.group_mut().create_condition(ConditionType::TrackSpeed, None)?;
                c.group_mut().update_condition(cond, |c| {
                    let op = c.set_arg_operator(Operator::GreaterThan)?;
                    Ok(op | c.set_arg_value(20.0)?)
                })
            })
            .unwrap();

        let src = source(TrackType::Radar, 7);
        let p = LatLong::new(50.0, -1.0);
        let id = engine.update_track(src, moving(p, 25.0, 0.0), 1000);
        assert_eq!(engine.alarms().num_alarms(AlarmStates::ACTIVE), 1);
        assert!(engine.tracks().track(id).unwrap().is_alarm());

        // Slowing down leaves the alarm active without a timeout action
        engine.update_track(src, moving(p, 10.0, 0.0), 2000);
        engine.check_alarm_timeouts(60_000);
        let alarm = engine.alarms().alarms().next().unwrap();
        assert_eq!(alarm.state(), AlarmState::Active);
        assert_eq!(alarm.trigger_count(), 0);

        // Add an auto clear and the alarm clears on the next timeout check
        engine
            .edit_config(config, 61_000, |c| {
                let id = c.create_action(ActionType::AutoClear)?;
                c.set_action_option_value(id, 30)
            })
            .unwrap();
        engine.check_alarm_timeouts(61_000);
        // Not triggering when cleared, so the alarm empties
        assert_eq!(engine.alarms().num_alarms(AlarmStates::EMPTY), 1);
        let track = engine.tracks().track(id).unwrap();
        assert!(!track.is_alarm());
        assert!(!track.is_cleared_alarm());
    }

    #[test]
    fn test_converging_tracks_raise_cpa_alarm() {
        let mut engine = Engine::new();
        let b = engine.update_track(
            source(TrackType::Ais, 2),
            moving(LatLong::new(0.0, 0.01), 10.0, 270.0),
            0,
        );
        let desc = engine
            .tracks()
            .track(b)
            .and_then(|t| t.descriptor(FieldType::Id))
            .unwrap()
            .to_string();

        let config = engine.with_alarms(|a| a.create_config("Collision", false));
        engine
            .edit_config(config, 0, |c| {
                let cond = c
                    .group_mut()
                    .create_condition(ConditionType::CpaToTrack, Some(&desc))?;
                c.group_mut().update_condition(cond, |c| {
                    let range = c.set_range_limit(2000.0)?;
                    Ok(range | c.set_time_limit(120.0)?)
                })
            })
            .unwrap();

        let a = engine.update_track(
            source(TrackType::Ais, 1),
            moving(LatLong::new(0.0, 0.0), 10.0, 90.0),
            0,
        );
        let alarm = engine.alarms().alarms().next().unwrap();
        assert_eq!(alarm.track1(), Some(a));
        assert_eq!(alarm.track2(), Some(b));
        let cpa = alarm.cpa().unwrap();
        assert!(cpa.tcpa_secs > 0.0);
        assert!(cpa.cpa_metres < 2000.0);
    }

    #[test]
    fn test_proximity_pair_is_one_alarm() {
        let mut engine = Engine::new();
        let config = engine.with_alarms(|a| a.create_config("Close quarters", false));
        engine
            .edit_config(config, 0, |c| {
                let cond = c
                    .group_mut()
                    .create_condition(ConditionType::ProximityToAnyTrack, None)?;
                c.group_mut().update_condition(cond, |c| c.set_range_limit(1000.0))
            })
            .unwrap();

        let o = LatLong::new(30.0, 5.0);
        let (src_a, src_b) = (source(TrackType::Ais, 1), source(TrackType::Ais, 2));
        let a = engine.update_track(src_a, at(o), 0);
        let b = engine.update_track(src_b, at(o.offset_by(0.0, 300.0)), 0);
        engine.update_track(src_b, at(o.offset_by(0.0, 310.0)), 1000);
        engine.update_track(src_a, at(o), 1000);

        assert_eq!(engine.alarms().alarms().count(), 1);
        let alarm = engine.alarms().alarms().next().unwrap();
        assert_eq!(alarm.track1(), Some(b));
        assert_eq!(alarm.track2(), Some(a));
        assert_eq!(alarm.trigger_count(), 3);
        assert!(engine.tracks().track(b).unwrap().is_alarm());

        // Once apart, the track owning the alarm untriggers it
        engine.update_track(src_a, at(o.offset_by(0.0, -5000.0)), 2000);
        engine.update_track(src_b, at(o.offset_by(0.0, 310.0)), 2000);
        assert_eq!(engine.alarms().alarms().count(), 1);
        assert_eq!(engine.alarms().alarms().next().unwrap().trigger_count(), 0);
    }

    #[test]
    fn test_forward_gate_crossing_alarms_forward_only() {
        let mut engine = Engine::new();
        let o = LatLong::new(10.0, 10.0);
        engine.add_shape(
            "Entrance",
            ShapeKind::Gate {
                points: vec![o, o.offset_by(0.0, 1000.0)],
            },
            0,
        );
        let config = engine.with_alarms(|a| a.create_config("Entry", false));
        let fwd = engine
            .edit_config(config, 0, |c| {
                c.group_mut()
                    .create_condition(ConditionType::GateCrossedFwd, Some("Entrance"))
            })
            .unwrap();

        let src = source(TrackType::Radar, 5);
        engine.update_track(src, at(o.offset_by(-100.0, 500.0)), 0);
        assert_eq!(engine.alarms().alarms().count(), 0);
        engine.update_track(src, at(o.offset_by(100.0, 500.0)), 2000);

        let alarm = engine.alarms().alarms().next().unwrap();
        assert_eq!(alarm.triggers().len(), 1);
        assert_eq!(alarm.triggers()[0].condition_id, fwd);
        assert_eq!(
            alarm.triggers()[0].condition_type,
            ConditionType::GateCrossedFwd
        );
    }

    #[test]
    fn test_shape_removal_stops_alarms() {
        let mut engine = Engine::new();
        let centre = LatLong::new(20.0, 20.0);
        let zone = engine.add_shape(
            "Zone",
            ShapeKind::Circle {
                centre,
                radius_metres: 500.0,
            },
            0,
        );
        let config = engine.with_alarms(|a| a.create_config("Intruder", false));
        engine
            .edit_config(config, 0, |c| {
                c.group_mut()
                    .create_condition(ConditionType::AreaInside, Some("Zone"))
            })
            .unwrap();

        let src = source(TrackType::Radar, 1);
        engine.update_track(src, at(centre), 0);
        let alarm = engine.alarms().alarms().next().unwrap();
        assert_eq!(alarm.trigger_count(), 1);
        assert_eq!(alarm.shape(), Some(zone));

        assert!(engine.remove_shape(zone, 1000));
        engine.update_track(src, at(centre), 1000);
        assert_eq!(engine.alarms().alarms().next().unwrap().trigger_count(), 0);
    }

    #[test]
    fn test_deleted_track_retires_alarms_and_net_mesgs_stop() {
        let mut engine = Engine::new();
        let config = engine.with_alarms(|a| {
            a.set_net_mesg_type(crate::nmea::NetMesgType::TtmV1);
            a.create_config("Fast", false)
        });
        engine
            .edit_config(config, 0, |c| {
                let cond = c.group_mut().create_condition(ConditionType::TrackSpeed, None)?;
                c.group_mut().update_condition(cond, |c| {
                    let op = c.set_arg_operator(Operator::GreaterThan)?;
                    Ok(op | c.set_arg_value(5.0)?)
                })?;
                c.create_action(ActionType::SendNetMesg)
            })
            .unwrap();

        let src = source(TrackType::Radar, 3);
        engine.update_track(src, moving(LatLong::new(1.0, 1.0), 8.0, 45.0), 0);
        let mut out = RecordingOutput::default();
        engine.send_net_mesgs(1000, &mut out);
        assert_eq!(out.net_mesgs.len(), 1);

        assert!(engine.delete_track(&src).is_some());
        assert_eq!(engine.alarms().alarms().count(), 0);
        out.net_mesgs.clear();
        engine.send_net_mesgs(2000, &mut out);
        assert!(out.net_mesgs.is_empty());
    }

    #[test]
    fn test_config_text_round_trip() {
        let mut engine = Engine::new();
        let config = engine.with_alarms(|a| a.create_config("Slow", false));
        engine
            .edit_config(config, 0, |c| {
                let cond = c.group_mut().create_condition(ConditionType::TrackSpeed, None)?;
                c.group_mut().update_condition(cond, |c| {
                    let op = c.set_arg_operator(Operator::LessThan)?;
                    Ok(op | c.set_arg_value(1.0)?)
                })?;
                c.create_action(ActionType::HighlightTrack)
            })
            .unwrap();
        let text = engine.save_alarm_config(false);

        let mut other = Engine::new();
        assert_eq!(other.load_alarm_config(&text, false).unwrap(), 1);
        assert_eq!(other.save_alarm_config(false), text);
    }
}
