use std::{collections::HashMap, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use kira::{
    AudioManager, AudioManagerSettings, Decibels, DefaultBackend, Tween,
    sound::static_sound::{StaticSoundData, StaticSoundHandle},
};
use tokio::{sync::mpsc, time};
use uuid::Uuid;

use crate::executor::EngineEvent;

#[derive(Debug, Clone)]
pub enum AudioCommand {
    Play {
        id: Uuid,
        filepath: PathBuf,
        /// Master volume percent, 0-100.
        volume: f64,
    },
    Pause { id: Uuid },
    Resume { id: Uuid },
    Stop { id: Uuid },
    PauseAll,
    ResumeAll,
    StopAll,
    SetMasterVolume { volume: f64 },
}

struct PlayingSound {
    duration: f64,
    handle: StaticSoundHandle,
}

/// Maps a 0-100 master volume to playback decibels. Zero and below land on
/// kira's silence floor.
pub fn percent_to_decibels(volume: f64) -> Decibels {
    if volume <= 0.0 {
        return Decibels::from(-60.0f32);
    }
    let db = 20.0 * (volume.min(100.0) / 100.0).log10();
    Decibels::from((db as f32).max(-60.0))
}

/// Total length of an audio file, `None` when it cannot be decoded. Runs a
/// full decode; call from a blocking task.
pub fn media_duration(path: &Path) -> Option<Duration> {
    StaticSoundData::from_file(path).ok().map(|data| data.duration())
}

pub struct AudioEngine {
    manager: AudioManager,
    command_rx: mpsc::Receiver<AudioCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    playing_sounds: HashMap<Uuid, PlayingSound>,
}

impl AudioEngine {
    pub fn new(
        command_rx: mpsc::Receiver<AudioCommand>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Result<Self> {
        let manager = AudioManager::<DefaultBackend>::new(AudioManagerSettings::default())
            .context("Failed to initialize AudioManager")?;

        Ok(Self {
            manager,
            command_rx,
            event_tx,
            playing_sounds: HashMap::new(),
        })
    }

    pub async fn run(mut self) {
        let mut poll_timer = time::interval(Duration::from_millis(50));
        log::info!("AudioEngine run loop started.");
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    log::debug!("AudioEngine received command: {:?}", command);

                    if let Err(e) = self.process_command(command).await {
                        log::error!("Error processing audio command: {:?}", e);
                    }
                },
                _ = poll_timer.tick() => {
                    self.poll_playing_sounds().await;
                },
                else => break,
            }
        }
        log::info!("AudioEngine run loop finished.");
    }

    async fn process_command(&mut self, command: AudioCommand) -> Result<()> {
        match command {
            AudioCommand::Play { id, filepath, volume } => {
                self.handle_play(id, filepath, volume).await
            }
            AudioCommand::Pause { id } => self.handle_pause(id),
            AudioCommand::Resume { id } => self.handle_resume(id),
            AudioCommand::Stop { id } => self.handle_stop(id),
            AudioCommand::PauseAll => {
                for sound in self.playing_sounds.values_mut() {
                    if sound.handle.state() == kira::sound::PlaybackState::Playing {
                        sound.handle.pause(Tween::default());
                    }
                }
                Ok(())
            }
            AudioCommand::ResumeAll => {
                for sound in self.playing_sounds.values_mut() {
                    if sound.handle.state() == kira::sound::PlaybackState::Paused {
                        sound.handle.resume(Tween::default());
                    }
                }
                Ok(())
            }
            AudioCommand::StopAll => {
                for (_, mut sound) in self.playing_sounds.drain() {
                    sound.handle.stop(Tween::default());
                }
                Ok(())
            }
            AudioCommand::SetMasterVolume { volume } => {
                let decibels = percent_to_decibels(volume);
                for sound in self.playing_sounds.values_mut() {
                    sound.handle.set_volume(decibels, Tween::default());
                }
                Ok(())
            }
        }
    }

    /// Mirrors every active handle's state into engine events and reaps
    /// sounds that reached their natural end.
    async fn poll_playing_sounds(&mut self) {
        let mut events = Vec::new();
        for (id, sound) in &self.playing_sounds {
            let event = match sound.handle.state() {
                kira::sound::PlaybackState::Playing
                | kira::sound::PlaybackState::Pausing
                | kira::sound::PlaybackState::Resuming
                | kira::sound::PlaybackState::Stopping => AudioEngineEvent::Progress {
                    instance_id: *id,
                    position: sound.handle.position(),
                    duration: sound.duration,
                },
                kira::sound::PlaybackState::Paused => AudioEngineEvent::Paused {
                    instance_id: *id,
                    position: sound.handle.position(),
                    duration: sound.duration,
                },
                kira::sound::PlaybackState::WaitingToResume => continue,
                kira::sound::PlaybackState::Stopped => {
                    AudioEngineEvent::Completed { instance_id: *id }
                }
            };
            events.push(event);
        }
        for event in events {
            if let Err(e) = self.event_tx.send(EngineEvent::Audio(event)).await {
                log::error!("Error publishing sound status: {:?}", e);
            }
        }
        self.playing_sounds
            .retain(|_, sound| !matches!(sound.handle.state(), kira::sound::PlaybackState::Stopped));
    }

    async fn handle_play(&mut self, id: Uuid, filepath: PathBuf, volume: f64) -> Result<()> {
        log::info!("PLAY: id={}, file={}", id, filepath.display());

        let filepath_clone = filepath.clone();
        let sound_data =
            match tokio::task::spawn_blocking(move || StaticSoundData::from_file(filepath_clone))
                .await?
            {
                Ok(data) => data.volume(percent_to_decibels(volume)),
                Err(e) => {
                    // Non-fatal: report the failed instance, keep the rest playing.
                    let error = format!("Failed to load sound data from {}: {e}", filepath.display());
                    log::error!("{error}");
                    self.event_tx
                        .send(EngineEvent::Audio(AudioEngineEvent::Error {
                            instance_id: id,
                            error,
                        }))
                        .await?;
                    return Ok(());
                }
            };

        let duration = sound_data.duration().as_secs_f64();

        let handle = self.manager.play(sound_data)?;

        self.event_tx
            .send(EngineEvent::Audio(AudioEngineEvent::Started {
                instance_id: id,
                duration,
            }))
            .await?;

        self.playing_sounds.insert(id, PlayingSound { duration, handle });
        Ok(())
    }

    fn handle_pause(&mut self, id: Uuid) -> Result<()> {
        log::info!("PAUSE: id={}", id);
        if let Some(sound) = self.playing_sounds.get_mut(&id) {
            sound.handle.pause(Tween::default());
            Ok(())
        } else {
            log::warn!("Pause command received for non-existent ID: {}", id);
            Err(anyhow::anyhow!("Sound with ID {} not found for pause.", id))
        }
    }

    fn handle_resume(&mut self, id: Uuid) -> Result<()> {
        log::info!("RESUME: id={}", id);
        if let Some(sound) = self.playing_sounds.get_mut(&id) {
            if sound.handle.state() == kira::sound::PlaybackState::Paused {
                sound.handle.resume(Tween::default());
            }
            Ok(())
        } else {
            log::warn!("Resume command received for non-existent ID: {}", id);
            Err(anyhow::anyhow!("Sound with ID {} not found for resume.", id))
        }
    }

    fn handle_stop(&mut self, id: Uuid) -> Result<()> {
        log::info!("STOP: id={}", id);
        if let Some(mut sound) = self.playing_sounds.remove(&id) {
            sound.handle.stop(Tween::default());
            Ok(())
        } else {
            log::warn!("Stop command received for non-existent ID: {}", id);
            Err(anyhow::anyhow!("Sound with ID {} not found for stop.", id))
        }
    }
}

#[derive(Debug)]
pub enum AudioEngineEvent {
    Started {
        instance_id: Uuid,
        /// True total length of the opened file, in seconds.
        duration: f64,
    },
    Progress {
        instance_id: Uuid,
        position: f64,
        duration: f64,
    },
    Paused {
        instance_id: Uuid,
        position: f64,
        duration: f64,
    },
    Resumed {
        instance_id: Uuid,
    },
    Completed {
        instance_id: Uuid,
    },
    Error {
        instance_id: Uuid,
        error: String,
    },
}

impl AudioEngineEvent {
    pub fn instance_id(&self) -> Uuid {
        match self {
            Self::Started { instance_id, .. } => *instance_id,
            Self::Progress { instance_id, .. } => *instance_id,
            Self::Paused { instance_id, .. } => *instance_id,
            Self::Resumed { instance_id } => *instance_id,
            Self::Completed { instance_id } => *instance_id,
            Self::Error { instance_id, .. } => *instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_percent_maps_to_decibels() {
        assert_eq!(percent_to_decibels(100.0).0, 0.0);
        assert_eq!(percent_to_decibels(0.0).0, -60.0);
        assert_eq!(percent_to_decibels(-5.0).0, -60.0);

        // Half volume is roughly -6 dB.
        assert!((percent_to_decibels(50.0).0 + 6.02).abs() < 0.01);
    }
}
