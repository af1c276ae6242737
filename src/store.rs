//! File-backed persistence for cue records: one `cue_{number}.json` per cue
//! plus one `show.json` settings record per show folder.

use std::{path::{Path, PathBuf}, sync::Arc};

use crate::{
    error::{EngineError, Result},
    model::{cue::Cue, settings::ShowSettings},
    pathutil,
};

/// A persistence conflict that needs a decision from outside the core.
#[derive(Debug, Clone)]
pub enum Conflict {
    DuplicateCueNumber { number: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Overwrite,
    Keep,
}

/// Decides persistence conflicts. Injected so the core never talks to a
/// dialog box; a headless harness supplies deterministic decisions.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> ConflictDecision;
}

/// Default policy: keep the existing record (no decision means "keep").
pub struct KeepExisting;

impl ConflictResolver for KeepExisting {
    fn resolve(&self, _conflict: &Conflict) -> ConflictDecision {
        ConflictDecision::Keep
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenumberOutcome {
    /// The record was renamed (and possibly an existing one overwritten).
    Renamed,
    /// Same number as before; nothing touched on disk.
    Unchanged,
}

pub fn cue_record_path(folder: &Path, number: u32) -> PathBuf {
    folder.join(format!("cue_{number}.json"))
}

pub fn settings_record_path(folder: &Path) -> PathBuf {
    folder.join("show.json")
}

#[derive(Clone)]
pub struct CueStore {
    resolver: Arc<dyn ConflictResolver>,
}

impl CueStore {
    pub fn new(resolver: Arc<dyn ConflictResolver>) -> Self {
        Self { resolver }
    }

    /// A fresh cue with default fields for the given number.
    pub fn create_default(number: u32) -> Cue {
        Cue::with_number(number)
    }

    /// Loads every cue record in the folder. A record that cannot be read
    /// or parsed yields a default cue for its number instead of aborting the
    /// load. Reports `(loaded, total)` through `progress` after each record.
    pub async fn load(
        &self,
        folder: &Path,
        mut progress: impl FnMut(usize, usize),
    ) -> Vec<Cue> {
        let mut numbered_files = Vec::new();
        match tokio::fs::read_dir(folder).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if let Some(number) = parse_record_number(name) {
                        numbered_files.push((number, entry.path()));
                    }
                }
            }
            Err(e) => {
                log::warn!("Cannot enumerate show folder {}: {e}", folder.display());
                return Vec::new();
            }
        }
        numbered_files.sort_by_key(|(number, _)| *number);

        let total = numbered_files.len();
        log::info!("Found {total} cue records in {}.", folder.display());

        let mut cues = Vec::with_capacity(total);
        for (loaded, (number, path)) in numbered_files.into_iter().enumerate() {
            let mut cue = match read_record(&path).await {
                Ok(cue) => cue,
                Err(e) => {
                    log::warn!("{e}; substituting a default cue for number {number}.");
                    Cue::with_number(number)
                }
            };
            // Normalize the stored target so in-memory cues are display-ready.
            if !cue.target_path.as_os_str().is_empty() {
                let absolute = pathutil::to_absolute(&cue.target_path, folder);
                cue.target_path = pathutil::to_relative(&absolute, folder);
            }
            cues.push(cue);
            progress(loaded + 1, total);
        }
        cues
    }

    /// Writes exactly one record for the cue's number, overwriting.
    pub async fn save(&self, cue: &Cue, folder: &Path) -> Result<()> {
        let path = cue_record_path(folder, cue.number);
        let json = serde_json::to_string_pretty(cue)
            .map_err(|e| EngineError::Validation { field: "cue", value: e.to_string() })?;
        tokio::fs::write(&path, json).await?;
        log::debug!("Saved cue {} to {}.", cue.number, path.display());
        Ok(())
    }

    /// Removes the record for a cue number. A missing record is logged and
    /// is not an error.
    pub async fn delete(&self, number: u32, folder: &Path) -> Result<()> {
        let path = cue_record_path(folder, number);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            log::warn!("Cue record not found for deletion: {}", path.display());
            return Ok(());
        }
        if !pathutil::is_within_root(&path, folder) {
            log::warn!("Refusing to delete {} outside the show folder.", path.display());
            return Ok(());
        }
        tokio::fs::remove_file(&path).await?;
        log::info!("Deleted cue record {}.", path.display());
        Ok(())
    }

    /// Moves a cue's record to a new number. Renumbering to the current
    /// number touches nothing. When a record already exists at the new
    /// number the injected resolver decides; keeping aborts with a conflict
    /// and leaves both disk and the in-memory number untouched.
    pub async fn renumber(
        &self,
        cue: &mut Cue,
        new_number: u32,
        folder: &Path,
    ) -> Result<RenumberOutcome> {
        if cue.number == new_number {
            return Ok(RenumberOutcome::Unchanged);
        }
        if !folder.is_dir() {
            log::warn!("Show folder does not exist: {}", folder.display());
            return Err(EngineError::NoShowFolder);
        }

        let new_path = cue_record_path(folder, new_number);
        if tokio::fs::try_exists(&new_path).await.unwrap_or(false) {
            let conflict = Conflict::DuplicateCueNumber { number: new_number };
            match self.resolver.resolve(&conflict) {
                ConflictDecision::Keep => {
                    log::info!("Keeping existing record for cue {new_number}; renumber aborted.");
                    return Err(EngineError::Conflict { number: new_number });
                }
                ConflictDecision::Overwrite => {
                    if !pathutil::is_within_root(&new_path, folder) {
                        log::warn!(
                            "Refusing to overwrite {} outside the show folder.",
                            new_path.display()
                        );
                        return Err(EngineError::Conflict { number: new_number });
                    }
                    tokio::fs::remove_file(&new_path).await?;
                    log::info!("Overwrote existing record for cue {new_number}.");
                }
            }
        }

        let old_path = cue_record_path(folder, cue.number);
        if tokio::fs::try_exists(&old_path).await.unwrap_or(false) {
            tokio::fs::rename(&old_path, &new_path).await?;
            log::info!("Renamed {} -> {}.", old_path.display(), new_path.display());
        } else {
            log::warn!("Old cue record not found: {}", old_path.display());
        }

        cue.number = new_number;
        // Rewrite so the record's number field matches its file name.
        self.save(cue, folder).await?;
        Ok(RenumberOutcome::Renamed)
    }

    /// True iff at least one `.json` file in the folder deserializes to a
    /// usable cue.
    pub async fn has_valid_record(folder: &Path) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(folder).await else {
            log::warn!("Invalid show folder: {}", folder.display());
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && read_record(&path).await.is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Loads the show settings record, defaulting when missing or corrupt.
    pub async fn load_settings(folder: &Path) -> ShowSettings {
        let path = settings_record_path(folder);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Corrupt settings record {}: {e}; using defaults.", path.display());
                ShowSettings::default()
            }),
            Err(_) => {
                log::warn!("Settings record {} does not exist; using defaults.", path.display());
                ShowSettings::default()
            }
        }
    }

    pub async fn save_settings(&self, settings: &ShowSettings, folder: &Path) -> Result<()> {
        let path = settings_record_path(folder);
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| EngineError::Validation { field: "settings", value: e.to_string() })?;
        tokio::fs::write(&path, json).await?;
        log::info!("Saved show settings to {}.", path.display());
        Ok(())
    }
}

fn parse_record_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("cue_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

async fn read_record(path: &Path) -> Result<Cue> {
    let json = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&json).map_err(|source| EngineError::CorruptRecord {
        path: path.to_path_buf(),
        source,
    })
}
