use serde::{Deserialize, Serialize};

use crate::model::{cue::Cue, settings::ShowSettings};

/// Broadcast notifications for UI layers. Every failure surfaced here is
/// non-fatal; playback and editing continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "param")]
pub enum UiEvent {
    // Cue status events
    CueStarted { number: u32 },
    CuePaused { number: u32 },
    CueResumed { number: u32 },
    CueStopped { number: u32 },
    CueCompleted { number: u32 },
    CueError { number: u32, error: String },

    // System events
    PlaybackCursorMoved { number: u32 },
    PlaybackPaused,
    PlaybackResumed,

    ShowLoaded,
    LoadProgress { loaded: usize, total: usize },
    CueUpdated { cue: Cue },
    CueAdded { cue: Cue, at_index: usize },
    CueRemoved { number: u32 },
    SettingsUpdated { settings: ShowSettings },
}
