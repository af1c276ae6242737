use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Show-level settings, one `show.json` record per show folder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShowSettings {
    /// Master playback volume, 0–100.
    pub master_volume: f64,
    pub extra_info: String,
    pub sort_enabled: bool,
    pub sort_by: String,
    pub sort_ascending: bool,
}

impl Default for ShowSettings {
    fn default() -> Self {
        Self {
            master_volume: 100.0,
            extra_info: String::new(),
            sort_enabled: false,
            sort_by: SortKey::Number.name().to_string(),
            sort_ascending: true,
        }
    }
}

impl ShowSettings {
    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = volume.clamp(0.0, 100.0);
    }

    /// The configured sort key; an unknown name is a validation error the
    /// caller recovers from by falling back to [`SortKey::Number`].
    pub fn sort_key(&self) -> Result<SortKey, EngineError> {
        self.sort_by.parse()
    }
}

/// Sortable cue fields, named as stored in the settings record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Number,
    Name,
    Duration,
}

impl SortKey {
    pub fn name(self) -> &'static str {
        match self {
            Self::Number => "Cue_Number",
            Self::Name => "Cue_Name",
            Self::Duration => "Duration",
        }
    }
}

impl FromStr for SortKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Cue_Number" => Ok(Self::Number),
            "Cue_Name" => Ok(Self::Name),
            "Duration" => Ok(Self::Duration),
            other => Err(EngineError::Validation {
                field: "sortBy",
                value: other.to_string(),
            }),
        }
    }
}
