//! Track filters
//!
//! A filter is a condition group that decides whether a track is shown
//! and considered by alarms. An inclusion filter lets through the tracks
//! that pass its group; an exclusion filter lets through the tracks that
//! fail it. Only enabled filters take part.

use crate::condition::{ConditionGroup, EvalContext, GroupChange};
use crate::config_file::{ConfigWriter, Section};
use crate::error::Result;
use crate::track::UniTrack;

#[derive(Debug, Clone)]
pub struct UniTrackFilter {
    group: ConditionGroup,
    is_exclusion: bool,
}

impl UniTrackFilter {
    pub(crate) fn new(is_exclusion: bool) -> Self {
        UniTrackFilter {
            // Filters test tracks, never the clock
            group: ConditionGroup::new(false),
            is_exclusion,
        }
    }

    pub fn group(&self) -> &ConditionGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut ConditionGroup {
        &mut self.group
    }

    pub fn is_exclusion_filter(&self) -> bool {
        self.is_exclusion
    }

    pub fn set_is_exclusion_filter(&mut self, is_exclusion: bool) {
        if self.is_exclusion != is_exclusion {
            self.is_exclusion = is_exclusion;
            self.group.report_change(GroupChange::SUBTYPE);
        }
    }

    pub fn is_active(&self) -> bool {
        self.group.is_enabled()
    }

    /// Whether this filter lets the track through
    pub fn allows(&self, track: &UniTrack, ctx: &EvalContext<'_>) -> bool {
        if !self.is_active() {
            return true;
        }
        let passed = self.group.test_conditions(Some(track), ctx).passed;
        passed != self.is_exclusion
    }

    pub fn save(&self, w: &mut ConfigWriter) {
        w.begin("Filter");
        w.param("Exclusion", u8::from(self.is_exclusion));
        self.group.save(w);
        w.end();
    }

    pub fn load(&mut self, section: &Section) -> Result<()> {
        let exclusion = section.get_bool("Exclusion")?;
        self.group.load(section)?;
        if let Some(ex) = exclusion {
            self.is_exclusion = ex;
        }
        Ok(())
    }
}
