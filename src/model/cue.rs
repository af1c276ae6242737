use std::{fmt, path::{Path, PathBuf}, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::pathutil;

/// Fixed-point time with 1/100 s resolution, rendered as `mm:ss.ff`.
///
/// Parsing is strict: two digits per component, minutes and seconds below
/// sixty. Every string this accepts formats back to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CueTime {
    centis: u32,
}

impl CueTime {
    pub const ZERO: Self = Self { centis: 0 };
    /// Largest representable value, `59:59.99`.
    pub const MAX: Self = Self { centis: 59 * 6000 + 59 * 100 + 99 };

    pub fn from_duration(duration: Duration) -> Self {
        let centis = (duration.as_millis() + 5) / 10;
        Self { centis: centis.min(Self::MAX.centis as u128) as u32 }
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_millis(self.centis as u64 * 10)
    }

    pub fn is_zero(self) -> bool {
        self.centis == 0
    }
}

impl fmt::Display for CueTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}.{:02}",
            self.centis / 6000,
            self.centis / 100 % 60,
            self.centis % 100
        )
    }
}

impl FromStr for CueTime {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 8 || bytes[2] != b':' || bytes[5] != b'.' {
            return Err(());
        }
        if !bytes.iter().enumerate().all(|(i, b)| matches!(i, 2 | 5) || b.is_ascii_digit()) {
            return Err(());
        }
        let field = |range: std::ops::Range<usize>| s[range].parse::<u32>().map_err(|_| ());
        let minutes = field(0..2)?;
        let seconds = field(3..5)?;
        let centis = field(6..8)?;
        if minutes > 59 || seconds > 59 {
            return Err(());
        }
        Ok(Self { centis: minutes * 6000 + seconds * 100 + centis })
    }
}

/// Outcome of assigning duration text outside an edit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUpdate {
    /// The text was kept (either valid, or held verbatim mid-edit).
    Accepted,
    /// The text did not parse; the caller should probe the target media and
    /// apply the file's true length via [`Cue::set_duration_from_media`].
    NeedsProbe,
}

/// One schedulable playback event. Persisted as `cue_{number}.json` in the
/// show folder; unknown or missing record fields fall back to defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Cue {
    pub number: u32,
    pub name: String,
    /// Raw duration text, `mm:ss.ff` when valid. Invalid text is healed on
    /// playback from the media file's true length.
    pub duration: String,
    pub pre_wait: String,
    pub auto_follow: bool,
    /// Display label derived from the target's final path component.
    pub file_name: String,
    /// Stored relative to the show folder whenever the target lives under
    /// it; resolved to absolute form only for playback and probing.
    pub target_path: PathBuf,
    pub notes: String,

    /// The user has named this cue by hand; clearing the target must not
    /// reset the name.
    #[serde(skip)]
    pub name_explicit: bool,
    #[serde(skip)]
    editing_duration: bool,
}

impl Default for Cue {
    fn default() -> Self {
        Self {
            number: 0,
            name: String::new(),
            duration: CueTime::ZERO.to_string(),
            pre_wait: CueTime::ZERO.to_string(),
            auto_follow: false,
            file_name: String::new(),
            target_path: PathBuf::new(),
            notes: String::new(),
            name_explicit: false,
            editing_duration: false,
        }
    }
}

impl Cue {
    /// A fresh cue with default fields and the standard `Cue {number}` name.
    pub fn with_number(number: u32) -> Self {
        Self {
            number,
            name: format!("Cue {number}"),
            ..Self::default()
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.name_explicit = true;
    }

    /// Points the cue at a new target file, storing the show-relative form.
    /// Clearing the target reverts the name to its default unless the user
    /// named the cue explicitly.
    pub fn set_target(&mut self, target: &Path, show_folder: Option<&Path>) {
        if target.as_os_str().is_empty() {
            self.target_path = PathBuf::new();
            self.file_name = String::new();
            if !self.name_explicit {
                self.name = format!("Cue {}", self.number);
            }
            return;
        }

        self.target_path = match show_folder {
            Some(folder) => pathutil::to_relative(target, folder),
            None => target.to_path_buf(),
        };
        self.file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    /// The target resolved for playback or probing; `None` when unset.
    pub fn resolved_target(&self, show_folder: Option<&Path>) -> Option<PathBuf> {
        if self.target_path.as_os_str().is_empty() {
            return None;
        }
        Some(match show_folder {
            Some(folder) => pathutil::to_absolute(&self.target_path, folder),
            None => self.target_path.clone(),
        })
    }

    /// Suspends duration validation; text assigned until
    /// [`Cue::end_duration_edit`] is held verbatim.
    pub fn begin_duration_edit(&mut self) {
        self.editing_duration = true;
    }

    pub fn end_duration_edit(&mut self) {
        self.editing_duration = false;
    }

    pub fn is_editing_duration(&self) -> bool {
        self.editing_duration
    }

    pub fn set_duration_text(&mut self, value: &str) -> DurationUpdate {
        if self.editing_duration {
            self.duration = value.to_string();
            return DurationUpdate::Accepted;
        }
        if value.parse::<CueTime>().is_ok() {
            self.duration = value.to_string();
            DurationUpdate::Accepted
        } else {
            DurationUpdate::NeedsProbe
        }
    }

    /// Replaces the duration with the probed media length, zero when the
    /// target is unset or unreadable.
    pub fn set_duration_from_media(&mut self, media_len: Option<Duration>) {
        self.duration = CueTime::from_duration(media_len.unwrap_or_default()).to_string();
    }

    /// The play-time limit for this cue: `mm:ss.ff`, falling back to a raw
    /// millisecond count. `None` means "play to the natural end".
    pub fn effective_duration(&self) -> Option<Duration> {
        if let Ok(time) = self.duration.parse::<CueTime>() {
            return (!time.is_zero()).then(|| time.to_duration());
        }
        if let Ok(millis) = self.duration.trim().parse::<f64>() {
            if millis > 0.0 {
                return Some(Duration::from_secs_f64(millis / 1000.0));
            }
        }
        None
    }

    /// Duration sort key: parsed when valid, zero otherwise.
    pub fn duration_key(&self) -> CueTime {
        self.duration.parse().unwrap_or(CueTime::ZERO)
    }
}
