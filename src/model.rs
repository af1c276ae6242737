use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{cue::Cue, settings::{ShowSettings, SortKey}};

pub mod cue;
pub mod settings;

/// The in-memory show: the open folder, its cues in presentation order, and
/// the show-level settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShowModel {
    pub folder: Option<PathBuf>,
    pub cues: Vec<Cue>,
    pub settings: ShowSettings,
}

impl ShowModel {
    pub fn get_cue(&self, number: u32) -> Option<&Cue> {
        self.cues.iter().find(|cue| cue.number == number)
    }

    pub fn get_cue_mut(&mut self, number: u32) -> Option<&mut Cue> {
        self.cues.iter_mut().find(|cue| cue.number == number)
    }

    pub fn index_of(&self, number: u32) -> Option<usize> {
        self.cues.iter().position(|cue| cue.number == number)
    }

    /// The cue immediately following `number` in presentation order.
    pub fn cue_after(&self, number: u32) -> Option<&Cue> {
        self.index_of(number).and_then(|index| self.cues.get(index + 1))
    }

    /// The next cue after `number` with auto-follow disabled, skipping any
    /// run of consecutive auto-follow cues. This drives the presentation
    /// cursor, not the playback chain.
    pub fn next_manual_cue(&self, number: u32) -> Option<&Cue> {
        let index = self.index_of(number)?;
        self.cues[index + 1..].iter().find(|cue| !cue.auto_follow)
    }

    /// Applies the configured sort when enabled. A bad sort key falls back
    /// to sorting by cue number.
    pub fn apply_sort(&mut self) {
        if !self.settings.sort_enabled {
            return;
        }
        let key = self.settings.sort_key().unwrap_or_else(|e| {
            log::warn!("{e}; sorting by cue number instead.");
            SortKey::Number
        });
        match key {
            SortKey::Number => self.cues.sort_by_key(|cue| cue.number),
            SortKey::Name => self.cues.sort_by(|a, b| a.name.cmp(&b.name)),
            SortKey::Duration => self.cues.sort_by_key(|cue| cue.duration_key()),
        }
        if !self.settings.sort_ascending {
            self.cues.reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with(numbers: &[(u32, bool)]) -> ShowModel {
        let mut model = ShowModel::default();
        for &(number, auto_follow) in numbers {
            let mut cue = Cue::with_number(number);
            cue.auto_follow = auto_follow;
            model.cues.push(cue);
        }
        model
    }

    #[test]
    fn cue_after_follows_presentation_order() {
        let model = model_with(&[(1, false), (5, true), (2, false)]);
        assert_eq!(model.cue_after(1).map(|c| c.number), Some(5));
        assert_eq!(model.cue_after(5).map(|c| c.number), Some(2));
        assert_eq!(model.cue_after(2).map(|c| c.number), None);
    }

    #[test]
    fn next_manual_cue_skips_auto_follow_runs() {
        let model = model_with(&[(1, false), (2, true), (3, true), (4, false), (5, false)]);
        assert_eq!(model.next_manual_cue(1).map(|c| c.number), Some(4));
        assert_eq!(model.next_manual_cue(4).map(|c| c.number), Some(5));
        assert_eq!(model.next_manual_cue(5).map(|c| c.number), None);
    }

    #[test]
    fn sort_is_a_no_op_unless_enabled() {
        let mut model = model_with(&[(3, false), (1, false), (2, false)]);
        model.apply_sort();
        assert_eq!(model.cues.iter().map(|c| c.number).collect::<Vec<_>>(), [3, 1, 2]);

        model.settings.sort_enabled = true;
        model.apply_sort();
        assert_eq!(model.cues.iter().map(|c| c.number).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn descending_sort_and_bad_key_fallback() {
        let mut model = model_with(&[(1, false), (3, false), (2, false)]);
        model.settings.sort_enabled = true;
        model.settings.sort_ascending = false;
        model.settings.sort_by = "Bogus".to_string();
        model.apply_sort();
        assert_eq!(model.cues.iter().map(|c| c.number).collect::<Vec<_>>(), [3, 2, 1]);
    }
}
