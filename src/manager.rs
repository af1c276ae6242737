use std::{path::{Path, PathBuf}, sync::Arc};

use tokio::sync::{RwLock, broadcast};

use crate::{
    engine::audio_engine,
    error::{EngineError, Result},
    event::UiEvent,
    model::{ShowModel, cue::{Cue, DurationUpdate}},
    store::{ConflictResolver, CueStore},
};

/// Shared handle over the in-memory show. All mutation flows through here:
/// an edit batch is applied under the write lock and committed with exactly
/// one record write, and bulk load never writes back to the store.
#[derive(Clone)]
pub struct ShowModelManager {
    state: Arc<RwLock<ShowModel>>,
    store: CueStore,
    event_tx: broadcast::Sender<UiEvent>,
}

impl ShowModelManager {
    pub fn new(event_tx: broadcast::Sender<UiEvent>, resolver: Arc<dyn ConflictResolver>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ShowModel::default())),
            store: CueStore::new(resolver),
            event_tx,
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, ShowModel> {
        self.state.read().await
    }

    pub async fn write_with<F, R>(&self, updater: F) -> R
    where
        F: FnOnce(&mut ShowModel) -> R,
    {
        let mut guard = self.state.write().await;
        updater(&mut guard)
    }

    fn emit(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to events.");
        }
    }

    pub async fn show_folder(&self) -> Option<PathBuf> {
        self.read().await.folder.clone()
    }

    pub async fn get_cue(&self, number: u32) -> Option<Cue> {
        self.read().await.get_cue(number).cloned()
    }

    /// Opens an existing show folder: settings first, then every cue record
    /// with incremental progress events, then the configured sort.
    pub async fn open_show(&self, folder: &Path) -> Result<()> {
        if !folder.is_dir() {
            return Err(EngineError::NotFound(format!("show folder {}", folder.display())));
        }
        if !CueStore::has_valid_record(folder).await {
            log::warn!("No usable cue records found in {}.", folder.display());
        }
        let settings = CueStore::load_settings(folder).await;
        let event_tx = self.event_tx.clone();
        let cues = self
            .store
            .load(folder, |loaded, total| {
                let _ = event_tx.send(UiEvent::LoadProgress { loaded, total });
            })
            .await;

        self.write_with(|model| {
            model.folder = Some(folder.to_path_buf());
            model.cues = cues;
            model.settings = settings;
            model.apply_sort();
        })
        .await;

        log::info!("Show loaded from {}.", folder.display());
        self.emit(UiEvent::ShowLoaded);
        Ok(())
    }

    /// Creates (or reuses) a show folder with default settings and no cues.
    pub async fn create_show(&self, folder: &Path) -> Result<()> {
        tokio::fs::create_dir_all(folder).await?;
        let settings = crate::model::settings::ShowSettings::default();
        self.store.save_settings(&settings, folder).await?;

        self.write_with(|model| {
            model.folder = Some(folder.to_path_buf());
            model.cues.clear();
            model.settings = settings;
        })
        .await;

        log::info!("Created new show at {}.", folder.display());
        self.emit(UiEvent::ShowLoaded);
        Ok(())
    }

    /// Adds a default cue with the given number and persists its record.
    pub async fn add_cue(&self, number: u32) -> Result<Cue> {
        let mut guard = self.state.write().await;
        if guard.get_cue(number).is_some() {
            return Err(EngineError::Conflict { number });
        }
        let cue = CueStore::create_default(number);
        guard.cues.push(cue.clone());
        let at_index = guard.cues.len() - 1;
        let folder = guard.folder.clone();
        drop(guard);

        self.persist(&cue, folder.as_deref()).await?;
        self.emit(UiEvent::CueAdded { cue: cue.clone(), at_index });
        Ok(cue)
    }

    /// Applies a batch of edits to one cue and commits exactly one write.
    pub async fn update_cue<F>(&self, number: u32, edit: F) -> Result<Cue>
    where
        F: FnOnce(&mut Cue),
    {
        let mut guard = self.state.write().await;
        let cue = guard
            .get_cue_mut(number)
            .ok_or_else(|| EngineError::NotFound(format!("cue {number}")))?;
        edit(cue);
        let cue = cue.clone();
        let folder = guard.folder.clone();
        drop(guard);

        self.persist(&cue, folder.as_deref()).await?;
        self.emit(UiEvent::CueUpdated { cue: cue.clone() });
        Ok(cue)
    }

    /// Removes a cue and deletes its record; a missing record is tolerated.
    pub async fn remove_cue(&self, number: u32) -> Result<()> {
        let mut guard = self.state.write().await;
        let index = guard
            .index_of(number)
            .ok_or_else(|| EngineError::NotFound(format!("cue {number}")))?;
        guard.cues.remove(index);
        let folder = guard.folder.clone();
        drop(guard);

        if let Some(folder) = folder {
            self.store.delete(number, &folder).await?;
        }
        self.emit(UiEvent::CueRemoved { number });
        Ok(())
    }

    /// Renumbers a cue, resolving a duplicate number through the injected
    /// conflict resolver. A kept conflict leaves memory and disk untouched.
    pub async fn renumber_cue(&self, number: u32, new_number: u32) -> Result<()> {
        let mut guard = self.state.write().await;
        let folder = guard.folder.clone().ok_or(EngineError::NoShowFolder)?;
        let index = guard
            .index_of(number)
            .ok_or_else(|| EngineError::NotFound(format!("cue {number}")))?;

        let mut cue = guard.cues[index].clone();
        self.store.renumber(&mut cue, new_number, &folder).await?;

        // The displaced cue's record is gone; drop it from the model too.
        if let Some(displaced) = guard
            .cues
            .iter()
            .position(|c| c.number == new_number && c.number != number)
        {
            guard.cues.remove(displaced);
            self.emit(UiEvent::CueRemoved { number: new_number });
        }
        if let Some(slot) = guard.get_cue_mut(number) {
            *slot = cue.clone();
        }
        drop(guard);

        self.emit(UiEvent::CueUpdated { cue });
        Ok(())
    }

    /// Marks the duration field as being edited; validation is suspended
    /// until [`ShowModelManager::finish_duration_edit`].
    pub async fn begin_duration_edit(&self, number: u32) -> Result<()> {
        self.write_with(|model| {
            model
                .get_cue_mut(number)
                .map(|cue| cue.begin_duration_edit())
                .ok_or_else(|| EngineError::NotFound(format!("cue {number}")))
        })
        .await
    }

    /// Ends a duration edit session and re-validates the entered text.
    /// Unparsable text is replaced by the target media's true length (zero
    /// when there is no readable target).
    pub async fn finish_duration_edit(&self, number: u32, text: &str) -> Result<Cue> {
        let mut guard = self.state.write().await;
        let folder = guard.folder.clone();
        let cue = guard
            .get_cue_mut(number)
            .ok_or_else(|| EngineError::NotFound(format!("cue {number}")))?;
        cue.end_duration_edit();
        if cue.set_duration_text(text) == DurationUpdate::Accepted {
            let cue = cue.clone();
            drop(guard);
            self.persist(&cue, folder.as_deref()).await?;
            self.emit(UiEvent::CueUpdated { cue: cue.clone() });
            return Ok(cue);
        }
        let target = cue.resolved_target(folder.as_deref());
        drop(guard);

        log::warn!("Invalid duration {text:?} for cue {number}; reverting to media length.");
        let media_len = match target {
            Some(path) => {
                tokio::task::spawn_blocking(move || audio_engine::media_duration(&path))
                    .await
                    .unwrap_or(None)
            }
            None => None,
        };

        self.update_cue(number, |cue| cue.set_duration_from_media(media_len))
            .await
    }

    /// Clamps and persists the master volume; the caller routes the new
    /// value to the audio engine.
    pub async fn set_master_volume(&self, volume: f64) -> Result<f64> {
        let mut guard = self.state.write().await;
        guard.settings.set_master_volume(volume);
        let settings = guard.settings.clone();
        let folder = guard.folder.clone();
        drop(guard);

        if let Some(folder) = folder {
            self.store.save_settings(&settings, &folder).await?;
        }
        let volume = settings.master_volume;
        self.emit(UiEvent::SettingsUpdated { settings });
        Ok(volume)
    }

    /// Rewrites every cue record (the "save all" action).
    pub async fn save_all(&self) -> Result<()> {
        let guard = self.read().await;
        let Some(folder) = guard.folder.clone() else {
            log::warn!("Not saved - no show folder is open.");
            return Ok(());
        };
        let cues = guard.cues.clone();
        drop(guard);

        for cue in &cues {
            self.store.save(cue, &folder).await?;
        }
        log::info!("All {} cues saved.", cues.len());
        Ok(())
    }

    async fn persist(&self, cue: &Cue, folder: Option<&Path>) -> Result<()> {
        match folder {
            Some(folder) => self.store.save(cue, folder).await,
            None => {
                log::warn!("Not saved - no show folder is open.");
                Ok(())
            }
        }
    }
}
