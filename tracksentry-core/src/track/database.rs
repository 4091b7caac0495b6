//! Unified track database
//!
//! Aggregates radar, AIS, ADS-B and fused sources into one ID space:
//!
//! ```text
//!   source decoder ──(TrackSource, TrackUpdate)──> UniTrackDatabase
//!                                                    │  assigns TrackId
//!                                                    │  owns filters, groups, ref points
//!                                                    ▼
//!                                       TrackDbEvent ──> listeners, engine
//! ```
//!
//! Mutating methods emit events to listeners immediately. Nothing is
//! retained once the listeners have been called.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{
    Descriptor, HistorySettings, TrackChange, TrackId, TrackTypes, TrackUpdate, UniTrack,
};
use super::TrackType;
use crate::condition::{ConditionChange, ConditionId, EvalContext, GroupChange, GroupEvent};
use crate::condition::{GroupId, GroupStates};
use crate::config_file::{ConfigWriter, Section};
use crate::error::{Error, Result};
use crate::events::{ListenerId, Listeners};
use crate::filter::UniTrackFilter;
use crate::geo::{LatLong, Velocity};
use crate::shapes::ShapeDatabase;

/// Identity of a track within its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSource {
    pub track_type: TrackType,
    pub source_index: u32,
    /// Track number assigned by the source
    pub source_id: u32,
}

/// Fixed or moving reference point, e.g. own ship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefPoint {
    pub id: u32,
    pub name: String,
    pub position: LatLong,
    pub velocity: Option<Velocity>,
}

/// Named set of tracks identified by descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGroup {
    pub id: u32,
    pub name: String,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectState {
    Select,
    Deselect,
    Toggle,
    /// User selection levels, independent of the primary selection
    Level1,
    Level2,
    Level3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackDbEvent {
    TrackCreate(TrackId),
    TrackUpdate(TrackId, TrackChange),
    TrackPreselect(Option<TrackId>),
    TrackSelect(Option<TrackId>),
    TrackDelete(TrackId),
    FilterCreate(GroupId),
    FilterChange(GroupId, GroupChange),
    FilterDelete(GroupId),
    FilterConditionCreate(GroupId, ConditionId),
    FilterConditionChange(GroupId, ConditionId, ConditionChange),
    FilterConditionDelete(GroupId, ConditionId),
    TrackGroupCreate(u32),
    TrackGroupChange(u32),
    TrackGroupDelete(u32),
}

#[derive(Debug)]
pub struct UniTrackDatabase {
    tracks: BTreeMap<TrackId, UniTrack>,
    by_source: HashMap<TrackSource, TrackId>,
    next_track_id: TrackId,
    history: HistorySettings,
    filters: Vec<UniTrackFilter>,
    filter_default_exclusion: bool,
    track_groups: BTreeMap<u32, TrackGroup>,
    next_group_id: u32,
    ref_points: BTreeMap<u32, RefPoint>,
    next_ref_point_id: u32,
    class_names: BTreeMap<u32, String>,
    selected: Option<TrackId>,
    listeners: Listeners<TrackDbEvent>,
}

impl Default for UniTrackDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl UniTrackDatabase {
    pub fn new() -> Self {
        Self::with_history(HistorySettings::default())
    }

    pub fn with_history(history: HistorySettings) -> Self {
        UniTrackDatabase {
            tracks: BTreeMap::new(),
            by_source: HashMap::new(),
            next_track_id: 1,
            history,
            filters: Vec::new(),
            filter_default_exclusion: false,
            track_groups: BTreeMap::new(),
            next_group_id: 1,
            ref_points: BTreeMap::new(),
            next_ref_point_id: 1,
            class_names: BTreeMap::new(),
            selected: None,
            listeners: Listeners::default(),
        }
    }

    fn emit(&mut self, event: TrackDbEvent) {
        self.listeners.emit(&event);
    }

    pub fn add_event_listener<F>(&mut self, f: F) -> ListenerId
    where
        F: FnMut(&TrackDbEvent) + Send + Sync + 'static,
    {
        self.listeners.add(f)
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }


    // ========================================================================
    // Tracks
    // ========================================================================

    /// Apply an update from a source, creating the track on first sight
    pub fn update_track(&mut self, source: TrackSource, update: TrackUpdate, now_ms: u64) -> TrackId {
        let (id, created) = match self.by_source.get(&source) {
            Some(id) => (*id, false),
            None => {
                let id = self.next_track_id;
                self.next_track_id += 1;
                self.by_source.insert(source, id);
                self.tracks
                    .insert(id, UniTrack::new(id, source, now_ms, self.history));
                log::debug!("Created {} track {} from source {:?}", source.track_type, id, source);
                (id, true)
            }
        };

        let Some(track) = self.tracks.get_mut(&id) else {
            return id;
        };
        let changes = track.apply_update(update, now_ms);

        if created {
            self.emit(TrackDbEvent::TrackCreate(id));
        }
        self.emit(TrackDbEvent::TrackUpdate(id, changes));
        id
    }

    /// Remove a track whose source has dropped it
    pub fn delete_track(&mut self, source: &TrackSource) -> Option<UniTrack> {
        let id = self.by_source.remove(source)?;
        let mut track = self.tracks.remove(&id)?;
        track.set_deleted();
        if self.selected == Some(id) {
            self.selected = None;
        }
        log::debug!("Deleted track {}", id);
        self.emit(TrackDbEvent::TrackDelete(id));
        Some(track)
    }

    pub fn delete_all_tracks(&mut self) {
        let sources: Vec<TrackSource> = self.by_source.keys().copied().collect();
        for source in sources {
            self.delete_track(&source);
        }
    }

    pub fn track(&self, id: TrackId) -> Option<&UniTrack> {
        self.tracks.get(&id)
    }

    pub fn track_by_source(&self, source: &TrackSource) -> Option<&UniTrack> {
        self.by_source.get(source).and_then(|id| self.tracks.get(id))
    }

    pub fn track_from_descriptor(&self, desc: &Descriptor) -> Option<&UniTrack> {
        self.tracks.values().find(|t| t.test_descriptor(desc))
    }

    /// Tracks in ID order
    pub fn tracks(&self) -> impl Iterator<Item = &UniTrack> {
        self.tracks.values()
    }

    pub fn num_tracks(&self, apply_filters: bool) -> usize {
        self.tracks
            .values()
            .filter(|t| !apply_filters || t.is_allowed_by_filters())
            .count()
    }

    /// Update the alarm highlight flags on a track
    pub fn set_track_alarm_flags(&mut self, id: TrackId, is_alarm: bool, is_cleared: bool) {
        let changed = self
            .tracks
            .get_mut(&id)
            .is_some_and(|t| t.set_alarm_flags(is_alarm, is_cleared));
        if changed {
            self.emit(TrackDbEvent::TrackUpdate(id, TrackChange::ALARM));
        }
    }

    pub fn clear_track_history(&mut self, id: TrackId) -> Result<()> {
        self.tracks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("track", id))?
            .clear_history();
        Ok(())
    }

    pub fn nearest_track(
        &self,
        position: &LatLong,
        types: TrackTypes,
        apply_filters: bool,
    ) -> Option<TrackId> {
        self.tracks
            .values()
            .filter(|t| types.contains(t.track_type().as_flag()))
            .filter(|t| !apply_filters || t.is_allowed_by_filters())
            .filter_map(|t| Some((t.position?.distance_to(position), t.id())))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }

    pub fn tracks_in_range(&self, position: &LatLong, metres: f64) -> Vec<TrackId> {
        self.tracks
            .values()
            .filter(|t| t.position.is_some_and(|p| p.distance_to(position) <= metres))
            .map(|t| t.id())
            .collect()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn set_selected_track(&mut self, id: Option<TrackId>, state: SelectState) -> Result<()> {
        if let Some(id) = id {
            if !self.tracks.contains_key(&id) {
                return Err(Error::not_found("track", id));
            }
        }
        let level = match state {
            SelectState::Level1 => Some(1),
            SelectState::Level2 => Some(2),
            SelectState::Level3 => Some(3),
            _ => None,
        };
        if let Some(level) = level {
            let id = id.ok_or_else(|| Error::InvalidArgument("no track to select".to_string()))?;
            if let Some(t) = self.tracks.get_mut(&id) {
                let new = if t.user_select_level() == Some(level) { None } else { Some(level) };
                t.set_user_select_level(new);
            }
            self.emit(TrackDbEvent::TrackUpdate(id, TrackChange::FLAGS));
            return Ok(());
        }

        let new_selection = match state {
            SelectState::Select => id,
            SelectState::Deselect => {
                if id.is_none() || id == self.selected {
                    None
                } else {
                    self.selected
                }
            }
            SelectState::Toggle => {
                if id == self.selected {
                    None
                } else {
                    id
                }
            }
            _ => self.selected,
        };
        if new_selection == self.selected {
            return Ok(());
        }

        self.emit(TrackDbEvent::TrackPreselect(new_selection));
        if let Some(old) = self.selected.and_then(|old| self.tracks.get_mut(&old)) {
            old.set_selected(false);
        }
        if let Some(t) = new_selection.and_then(|new| self.tracks.get_mut(&new)) {
            t.set_selected(true);
        }
        self.selected = new_selection;
        self.emit(TrackDbEvent::TrackSelect(new_selection));
        Ok(())
    }

    pub fn selected_track(&self) -> Option<TrackId> {
        self.selected
    }

    // ========================================================================
    // Track groups
    // ========================================================================

    pub fn add_track_group(&mut self, name: &str) -> u32 {
        let id = self.next_group_id;
        self.next_group_id += 1;
        self.track_groups.insert(
            id,
            TrackGroup {
                id,
                name: name.to_string(),
                descriptors: Vec::new(),
            },
        );
        self.emit(TrackDbEvent::TrackGroupCreate(id));
        id
    }

    /// Fails if a filter still uses the group
    pub fn delete_track_group(&mut self, id: u32) -> Result<()> {
        if !self.track_groups.contains_key(&id) {
            return Err(Error::not_found("track group", id));
        }
        if self.is_track_group_used_in_filter(id) {
            return Err(Error::Restricted(format!("track group {id} is used by a filter")));
        }
        self.track_groups.remove(&id);
        self.emit(TrackDbEvent::TrackGroupDelete(id));
        Ok(())
    }

    pub fn set_track_group_name(&mut self, id: u32, name: &str) -> Result<()> {
        let group = self
            .track_groups
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("track group", id))?;
        group.name = name.to_string();
        self.emit(TrackDbEvent::TrackGroupChange(id));
        Ok(())
    }

    pub fn add_track_group_descriptor(&mut self, id: u32, desc: Descriptor) -> Result<()> {
        let group = self
            .track_groups
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("track group", id))?;
        if !group.descriptors.iter().any(|d| d.matches(&desc)) {
            group.descriptors.push(desc);
            self.emit(TrackDbEvent::TrackGroupChange(id));
        }
        Ok(())
    }

    pub fn remove_track_group_descriptor(&mut self, id: u32, desc: &Descriptor) -> Result<()> {
        let group = self
            .track_groups
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("track group", id))?;
        let before = group.descriptors.len();
        group.descriptors.retain(|d| !d.matches(desc));
        if group.descriptors.len() != before {
            self.emit(TrackDbEvent::TrackGroupChange(id));
        }
        Ok(())
    }

    pub fn track_group(&self, id: u32) -> Option<&TrackGroup> {
        self.track_groups.get(&id)
    }

    pub fn track_groups(&self) -> impl Iterator<Item = &TrackGroup> {
        self.track_groups.values()
    }

    pub fn is_track_in_group(&self, track: &UniTrack, group_id: u32) -> bool {
        self.track_groups
            .get(&group_id)
            .is_some_and(|g| g.descriptors.iter().any(|d| track.test_descriptor(d)))
    }

    pub fn is_track_group_used_in_filter(&self, group_id: u32) -> bool {
        self.filters.iter().any(|f| f.group().uses_track_group(group_id))
    }

    // ========================================================================
    // Reference points
    // ========================================================================

    pub fn add_ref_point(&mut self, name: &str, position: LatLong, velocity: Option<Velocity>) -> u32 {
        let id = self.next_ref_point_id;
        self.next_ref_point_id += 1;
        self.ref_points.insert(
            id,
            RefPoint {
                id,
                name: name.to_string(),
                position,
                velocity,
            },
        );
        id
    }

    pub fn update_ref_point(
        &mut self,
        id: u32,
        position: LatLong,
        velocity: Option<Velocity>,
    ) -> Result<()> {
        let rp = self
            .ref_points
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ref point", id))?;
        rp.position = position;
        rp.velocity = velocity;
        Ok(())
    }

    pub fn remove_ref_point(&mut self, id: u32) -> Option<RefPoint> {
        self.ref_points.remove(&id)
    }

    pub fn ref_point(&self, id: u32) -> Option<&RefPoint> {
        self.ref_points.get(&id)
    }

    pub fn ref_points(&self) -> impl Iterator<Item = &RefPoint> {
        self.ref_points.values()
    }

    // ========================================================================
    // Class names
    // ========================================================================

    pub fn set_class_name(&mut self, code: u32, name: &str) {
        self.class_names.insert(code, name.to_string());
    }

    pub fn class_name(&self, code: u32) -> Option<&str> {
        self.class_names.get(&code).map(String::as_str)
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// New filters are exclusion filters when this is set
    pub fn set_filter_default_is_exclusion(&mut self, exclusion: bool) {
        self.filter_default_exclusion = exclusion;
    }

    pub fn filter_default_is_exclusion(&self) -> bool {
        self.filter_default_exclusion
    }

    pub fn create_filter(&mut self, name: &str, shared: bool) -> GroupId {
        let mut filter = UniTrackFilter::new(self.filter_default_exclusion);
        filter.group_mut().set_shared(shared);
        filter.group_mut().init_display_name(name);
        filter.group_mut().take_events();
        let id = filter.group().id();
        self.filters.push(filter);
        log::info!("Created filter {} '{}'", id, name);
        self.emit(TrackDbEvent::FilterCreate(id));
        id
    }

    pub fn filter(&self, id: GroupId) -> Option<&UniTrackFilter> {
        self.filters.iter().find(|f| f.group().id() == id)
    }

    pub fn filters(&self) -> impl Iterator<Item = &UniTrackFilter> {
        self.filters.iter()
    }

    pub fn num_filters(&self, states: GroupStates) -> usize {
        self.filters
            .iter()
            .filter(|f| states.contains(f.group().state().as_flag()))
            .count()
    }

    /// Modify a filter. Changes are reported as filter events.
    pub fn edit_filter<R>(
        &mut self,
        id: GroupId,
        f: impl FnOnce(&mut UniTrackFilter) -> Result<R>,
    ) -> Result<R> {
        let filter = self
            .filters
            .iter_mut()
            .find(|f| f.group().id() == id)
            .ok_or_else(|| Error::not_found("filter", id))?;
        let result = f(filter);
        let events = filter.group_mut().take_events();
        for event in events {
            self.emit(filter_event(id, event));
        }
        result
    }

    pub fn delete_filter(&mut self, id: GroupId) -> Result<()> {
        let index = self
            .filters
            .iter()
            .position(|f| f.group().id() == id)
            .ok_or_else(|| Error::not_found("filter", id))?;
        if !self.filters[index].group().can_delete() {
            return Err(Error::Restricted(format!("filter {id} cannot be deleted")));
        }
        self.filters.remove(index);
        self.emit(TrackDbEvent::FilterDelete(id));
        Ok(())
    }

    fn delete_matching_filters(&mut self, states: GroupStates, shared: bool) -> usize {
        let ids: Vec<GroupId> = self
            .filters
            .iter()
            .filter(|f| f.group().is_shared() == shared)
            .filter(|f| states.contains(f.group().state().as_flag()))
            .filter(|f| f.group().can_delete())
            .map(|f| f.group().id())
            .collect();
        for id in &ids {
            self.filters.retain(|f| f.group().id() != *id);
            self.emit(TrackDbEvent::FilterDelete(*id));
        }
        ids.len()
    }

    /// Delete per-view filters in any of `states`
    pub fn delete_filters(&mut self, states: GroupStates) -> usize {
        self.delete_matching_filters(states, false)
    }

    pub fn delete_shared_filters(&mut self, states: GroupStates) -> usize {
        self.delete_matching_filters(states, true)
    }

    pub fn can_delete_filters(&self, states: GroupStates) -> bool {
        self.filters
            .iter()
            .filter(|f| states.contains(f.group().state().as_flag()))
            .all(|f| f.group().can_delete())
    }

    /// Enable or disable every configured filter in `states`
    pub fn set_filters_state(&mut self, enabled: bool, states: GroupStates) -> Result<()> {
        let ids: Vec<GroupId> = self
            .filters
            .iter()
            .filter(|f| states.contains(f.group().state().as_flag()))
            .map(|f| f.group().id())
            .collect();
        let state = if enabled {
            crate::condition::GroupState::Enabled
        } else {
            crate::condition::GroupState::Disabled
        };
        for id in ids {
            self.edit_filter(id, |f| {
                if f.group().is_config_valid() {
                    f.group_mut().set_state(state)
                } else {
                    Ok(())
                }
            })?;
        }
        Ok(())
    }

    /// Allowed iff the track passes every enabled inclusion filter and
    /// matches no enabled exclusion filter
    pub fn is_track_allowed_by_filters(
        &self,
        track: &UniTrack,
        shapes: &ShapeDatabase,
        now_ms: u64,
    ) -> bool {
        let ctx = EvalContext::new(self, shapes, now_ms);
        self.filters
            .iter()
            .filter(|f| f.is_active())
            .all(|f| f.allows(track, &ctx))
    }

    /// Re-apply filters to one track
    pub fn apply_filters(&mut self, id: TrackId, shapes: &ShapeDatabase, now_ms: u64) {
        let Some(allowed) = self
            .track(id)
            .map(|t| self.is_track_allowed_by_filters(t, shapes, now_ms))
        else {
            return;
        };
        let changed = self
            .tracks
            .get_mut(&id)
            .is_some_and(|t| t.set_allowed_by_filters(allowed));
        if changed {
            self.emit(TrackDbEvent::TrackUpdate(id, TrackChange::FILTER));
        }
    }

    /// Re-apply filters to every track, e.g. after a filter changed
    pub fn update_filters(&mut self, shapes: &ShapeDatabase, now_ms: u64) {
        let ids: Vec<TrackId> = self.tracks.keys().copied().collect();
        for id in ids {
            self.apply_filters(id, shapes, now_ms);
        }
    }

    pub(crate) fn filters_mut(&mut self) -> impl Iterator<Item = &mut UniTrackFilter> {
        self.filters.iter_mut()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write shared or per-view filters in config file form
    pub fn save_filters(&self, w: &mut ConfigWriter, shared: bool) {
        w.param("FilterDefaultExclusion", u8::from(self.filter_default_exclusion));
        for group in self.track_groups.values() {
            w.begin("TrackGroup");
            w.param("Name", &group.name);
            for d in &group.descriptors {
                w.param("Track", d);
            }
            w.end();
        }
        for filter in self.filters.iter().filter(|f| f.group().is_shared() == shared) {
            if filter.group().can_save() {
                filter.save(w);
            }
        }
    }

    /// Replace the shared or per-view filters from a parsed config file.
    /// Nothing changes unless the whole file parses.
    pub fn load_filters(&mut self, root: &Section, shared: bool, shapes: &ShapeDatabase) -> Result<usize> {
        let default_exclusion = match root.get_parsed::<u8>("FilterDefaultExclusion")? {
            Some(v) => v != 0,
            None => self.filter_default_exclusion,
        };
        let mut groups = Vec::new();
        for section in root.children("TrackGroup") {
            let name = section.get("Name").unwrap_or_default();
            let descs = section
                .params("Track")
                .map(|p| Descriptor::parse(&p.value).map_err(|e| Error::parse(p.line, e.to_string())))
                .collect::<Result<Vec<_>>>()?;
            groups.push((name, descs));
        }
        let mut filters = Vec::new();
        for section in root.children("Filter") {
            let mut filter = UniTrackFilter::new(default_exclusion);
            filter.load(section)?;
            filter.group_mut().set_shared(shared);
            filter.group_mut().resolve_shapes(shapes);
            filter.group_mut().take_events();
            filters.push(filter);
        }

        self.filter_default_exclusion = default_exclusion;
        for (name, descs) in groups {
            let id = match self.track_groups.values().find(|g| g.name == name) {
                Some(g) => g.id,
                None => self.add_track_group(name),
            };
            for desc in descs {
                self.add_track_group_descriptor(id, desc)?;
            }
        }
        if shared {
            self.delete_shared_filters(GroupStates::all());
        } else {
            self.delete_filters(GroupStates::all());
        }
        let count = filters.len();
        for filter in filters {
            let id = filter.group().id();
            self.filters.push(filter);
            self.emit(TrackDbEvent::FilterCreate(id));
        }
        log::info!("Loaded {} {} filters", count, if shared { "shared" } else { "view" });
        Ok(count)
    }
}

fn filter_event(filter: GroupId, event: GroupEvent) -> TrackDbEvent {
    match event {
        GroupEvent::Change(changes) => TrackDbEvent::FilterChange(filter, changes),
        GroupEvent::ConditionCreate(c) => TrackDbEvent::FilterConditionCreate(filter, c),
        GroupEvent::ConditionChange(c, changes) => {
            TrackDbEvent::FilterConditionChange(filter, c, changes)
        }
        GroupEvent::ConditionDelete(c) => TrackDbEvent::FilterConditionDelete(filter, c),
    }
}
