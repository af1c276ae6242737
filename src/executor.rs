use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::{
    engine::audio_engine::{AudioCommand, AudioEngineEvent},
    manager::ShowModelManager,
    model::cue::Cue,
};

#[derive(Debug)]
pub enum ExecutorCommand {
    ExecuteCue(u32),
    StopInstance(Uuid),
    StopAll,
    PauseAll,
    ResumeAll,
    SetMasterVolume(f64),
}

#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Started {
        instance_id: Uuid,
        number: u32,
    },
    Progress {
        instance_id: Uuid,
        number: u32,
        position: f64,
        duration: f64,
    },
    Paused {
        instance_id: Uuid,
        number: u32,
        position: f64,
        duration: f64,
    },
    Resumed {
        instance_id: Uuid,
        number: u32,
    },
    /// Manually stopped; never chains auto-follow.
    Stopped {
        instance_id: Uuid,
        number: u32,
    },
    /// Reached the natural end of an untimed stream; never chains.
    Completed {
        instance_id: Uuid,
        number: u32,
    },
    /// A duration timer fired — the only end that evaluates auto-follow.
    DurationElapsed {
        instance_id: Uuid,
        number: u32,
    },
    Error {
        instance_id: Uuid,
        number: u32,
        error: String,
    },
}

#[derive(Debug)]
pub enum EngineEvent {
    Audio(AudioEngineEvent),
}

struct ActiveInstance {
    number: u32,
    timer: Option<JoinHandle<()>>,
    /// The cue's stored duration was unusable; correct it from the file's
    /// true length once the stream reports in.
    heal_duration: bool,
}

/// Turns cue executions into audio commands and enforces per-stream
/// duration limits. The active-instance registry lives only here, so timer
/// fires and manual stops are serialized through one loop: whichever
/// arrives first removes the instance, the other finds it absent and is a
/// no-op.
pub struct Executor {
    model: ShowModelManager,
    command_rx: mpsc::Receiver<ExecutorCommand>,
    audio_tx: mpsc::Sender<AudioCommand>,
    playback_event_tx: mpsc::Sender<ExecutorEvent>,
    engine_event_rx: mpsc::Receiver<EngineEvent>,

    timer_tx: mpsc::Sender<Uuid>,
    timer_rx: mpsc::Receiver<Uuid>,
    active_instances: HashMap<Uuid, ActiveInstance>,
}

impl Executor {
    pub fn new(
        model: ShowModelManager,
        command_rx: mpsc::Receiver<ExecutorCommand>,
        audio_tx: mpsc::Sender<AudioCommand>,
        playback_event_tx: mpsc::Sender<ExecutorEvent>,
        engine_event_rx: mpsc::Receiver<EngineEvent>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel::<Uuid>(32);
        Self {
            model,
            command_rx,
            audio_tx,
            playback_event_tx,
            engine_event_rx,
            timer_tx,
            timer_rx,
            active_instances: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        log::info!("Executor run loop started.");
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    log::debug!("Executor received command: {:?}", command);
                    if let Err(e) = self.process_command(command).await {
                        log::error!("Error processing executor command: {:?}", e);
                    }
                },
                Some(instance_id) = self.timer_rx.recv() => {
                    if let Err(e) = self.handle_timer_elapsed(instance_id).await {
                        log::error!("Error handling duration timer: {:?}", e);
                    }
                },
                Some(event) = self.engine_event_rx.recv() => {
                    if let Err(e) = self.handle_engine_event(event).await {
                        log::error!("Error handling engine event: {:?}", e);
                    }
                },
                else => break,
            }
        }
        log::info!("Executor run loop finished.");
    }

    async fn process_command(&mut self, command: ExecutorCommand) -> Result<(), anyhow::Error> {
        match command {
            ExecutorCommand::ExecuteCue(number) => {
                if let Some(cue) = self.model.get_cue(number).await {
                    self.dispatch_cue(&cue).await?;
                } else {
                    log::error!("Cannot execute cue: number {number} not found.");
                }
            }
            ExecutorCommand::StopInstance(instance_id) => {
                if let Some(instance) = self.active_instances.remove(&instance_id) {
                    if let Some(timer) = instance.timer {
                        timer.abort();
                    }
                    self.audio_tx.send(AudioCommand::Stop { id: instance_id }).await?;
                    self.playback_event_tx
                        .send(ExecutorEvent::Stopped { instance_id, number: instance.number })
                        .await?;
                } else {
                    log::debug!("Stop for instance {instance_id} ignored; already gone.");
                }
            }
            ExecutorCommand::StopAll => {
                for (instance_id, instance) in self.active_instances.drain() {
                    if let Some(timer) = instance.timer {
                        timer.abort();
                    }
                    self.playback_event_tx
                        .send(ExecutorEvent::Stopped { instance_id, number: instance.number })
                        .await?;
                }
                self.audio_tx.send(AudioCommand::StopAll).await?;
            }
            ExecutorCommand::PauseAll => {
                self.audio_tx.send(AudioCommand::PauseAll).await?;
            }
            ExecutorCommand::ResumeAll => {
                self.audio_tx.send(AudioCommand::ResumeAll).await?;
            }
            ExecutorCommand::SetMasterVolume(volume) => {
                self.audio_tx.send(AudioCommand::SetMasterVolume { volume }).await?;
            }
        }
        Ok(())
    }

    async fn dispatch_cue(&mut self, cue: &Cue) -> Result<(), anyhow::Error> {
        let folder = self.model.show_folder().await;
        let Some(target) = cue.resolved_target(folder.as_deref()) else {
            let error = format!("Cue {} has no target file.", cue.number);
            log::error!("{error}");
            self.playback_event_tx
                .send(ExecutorEvent::Error {
                    instance_id: Uuid::now_v7(),
                    number: cue.number,
                    error,
                })
                .await?;
            return Ok(());
        };

        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let error = format!("Target file does not exist: {}", target.display());
            log::error!("{error}");
            self.playback_event_tx
                .send(ExecutorEvent::Error {
                    instance_id: Uuid::now_v7(),
                    number: cue.number,
                    error,
                })
                .await?;
            return Ok(());
        }

        let instance_id = Uuid::now_v7();
        log::info!(
            "Dispatching cue {} with new instance_id '{}'",
            cue.number,
            instance_id
        );

        let volume = self.model.read().await.settings.master_volume;
        self.audio_tx
            .send(AudioCommand::Play { id: instance_id, filepath: target, volume })
            .await?;

        let limit = cue.effective_duration();
        let timer = match limit {
            Some(limit) => {
                log::info!(
                    "Playing cue {} for {:.2} seconds.",
                    cue.number,
                    limit.as_secs_f64()
                );
                let timer_tx = self.timer_tx.clone();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    let _ = timer_tx.send(instance_id).await;
                }))
            }
            None => {
                log::warn!(
                    "Invalid or zero duration {:?} for cue {}; playing the full track.",
                    cue.duration,
                    cue.number
                );
                None
            }
        };

        self.active_instances.insert(
            instance_id,
            ActiveInstance {
                number: cue.number,
                heal_duration: limit.is_none(),
                timer,
            },
        );
        Ok(())
    }

    /// A duration limit expired. Remove-if-present: when a manual stop got
    /// here first the instance is already gone and this is a no-op.
    async fn handle_timer_elapsed(&mut self, instance_id: Uuid) -> Result<(), anyhow::Error> {
        let Some(instance) = self.active_instances.remove(&instance_id) else {
            log::debug!("Timer for instance {instance_id} ignored; already stopped.");
            return Ok(());
        };
        log::info!("Duration limit reached for cue {}.", instance.number);
        self.audio_tx.send(AudioCommand::Stop { id: instance_id }).await?;
        self.playback_event_tx
            .send(ExecutorEvent::DurationElapsed { instance_id, number: instance.number })
            .await?;
        Ok(())
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), anyhow::Error> {
        let EngineEvent::Audio(audio_event) = event;
        let instance_id = audio_event.instance_id();

        let Some(number) = self.active_instances.get(&instance_id).map(|i| i.number) else {
            log::warn!("Received event for unknown instance_id: {instance_id}");
            return Ok(());
        };

        let playback_event = match audio_event {
            AudioEngineEvent::Started { duration, .. } => {
                self.heal_cue_duration(instance_id, number, duration).await;
                ExecutorEvent::Started { instance_id, number }
            }
            AudioEngineEvent::Progress { position, duration, .. } => {
                ExecutorEvent::Progress { instance_id, number, position, duration }
            }
            AudioEngineEvent::Paused { position, duration, .. } => {
                ExecutorEvent::Paused { instance_id, number, position, duration }
            }
            AudioEngineEvent::Resumed { .. } => ExecutorEvent::Resumed { instance_id, number },
            AudioEngineEvent::Completed { .. } => {
                let timer_pending = self
                    .active_instances
                    .get(&instance_id)
                    .is_some_and(|instance| instance.timer.is_some());
                if timer_pending {
                    // Stream drained before its duration limit; the pending
                    // timer still owns teardown and the auto-follow decision.
                    return Ok(());
                }
                self.drop_instance(instance_id);
                ExecutorEvent::Completed { instance_id, number }
            }
            AudioEngineEvent::Error { error, .. } => {
                self.drop_instance(instance_id);
                ExecutorEvent::Error { instance_id, number, error }
            }
        };

        self.playback_event_tx.send(playback_event).await?;
        Ok(())
    }

    /// Corrects an unusable stored duration to the file's true length, once
    /// per instance.
    async fn heal_cue_duration(&mut self, instance_id: Uuid, number: u32, duration: f64) {
        let Some(instance) = self.active_instances.get_mut(&instance_id) else {
            return;
        };
        if !instance.heal_duration {
            return;
        }
        instance.heal_duration = false;
        let media_len = Duration::from_secs_f64(duration.max(0.0));
        if let Err(e) = self
            .model
            .update_cue(number, |cue| cue.set_duration_from_media(Some(media_len)))
            .await
        {
            log::error!("Failed to heal duration for cue {number}: {e}");
        }
    }

    fn drop_instance(&mut self, instance_id: Uuid) {
        if let Some(instance) = self.active_instances.remove(&instance_id) {
            if let Some(timer) = instance.timer {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tempfile::TempDir;
    use tokio::{
        sync::{broadcast, mpsc::{Receiver, Sender}},
        time::timeout,
    };

    use crate::{event::UiEvent, store::KeepExisting};

    struct Harness {
        model: ShowModelManager,
        exec_tx: Sender<ExecutorCommand>,
        audio_rx: Receiver<AudioCommand>,
        engine_event_tx: Sender<EngineEvent>,
        playback_event_rx: Receiver<ExecutorEvent>,
        _show_dir: TempDir,
    }

    async fn setup(cues: &[(u32, &str, &str)]) -> Harness {
        let show_dir = TempDir::new().unwrap();
        let (event_tx, _) = broadcast::channel::<UiEvent>(64);
        let model = ShowModelManager::new(event_tx, Arc::new(KeepExisting));
        model.create_show(show_dir.path()).await.unwrap();

        for &(number, target, duration) in cues {
            if !target.is_empty() {
                let path = show_dir.path().join(target);
                tokio::fs::write(&path, b"RIFF").await.unwrap();
            }
            model.add_cue(number).await.unwrap();
            model
                .update_cue(number, |cue| {
                    if !target.is_empty() {
                        let absolute = show_dir.path().join(target);
                        cue.set_target(&absolute, Some(show_dir.path()));
                    }
                    cue.duration = duration.to_string();
                })
                .await
                .unwrap();
        }

        let (exec_tx, exec_rx) = mpsc::channel::<ExecutorCommand>(32);
        let (audio_tx, audio_rx) = mpsc::channel::<AudioCommand>(32);
        let (playback_event_tx, playback_event_rx) = mpsc::channel::<ExecutorEvent>(32);
        let (engine_event_tx, engine_event_rx) = mpsc::channel::<EngineEvent>(32);

        let executor = Executor::new(
            model.clone(),
            exec_rx,
            audio_tx,
            playback_event_tx,
            engine_event_rx,
        );
        tokio::spawn(executor.run());

        Harness {
            model,
            exec_tx,
            audio_rx,
            engine_event_tx,
            playback_event_rx,
            _show_dir: show_dir,
        }
    }

    async fn expect_play(harness: &mut Harness) -> Uuid {
        match timeout(Duration::from_secs(1), harness.audio_rx.recv()).await {
            Ok(Some(AudioCommand::Play { id, .. })) => id,
            other => panic!("expected Play command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_cue_sends_play_with_resolved_target_and_volume() {
        let mut harness = setup(&[(1, "intro.wav", "00:05.00")]).await;

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();

        match timeout(Duration::from_secs(1), harness.audio_rx.recv()).await.unwrap() {
            Some(AudioCommand::Play { filepath, volume, .. }) => {
                assert_eq!(filepath, harness._show_dir.path().join("intro.wav"));
                assert_eq!(volume, 100.0);
            }
            other => panic!("expected Play command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_target_reports_error_and_never_plays() {
        let mut harness = setup(&[(1, "", "00:05.00")]).await;
        harness
            .model
            .update_cue(1, |cue| cue.target_path = "missing.wav".into())
            .await
            .unwrap();

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();

        match timeout(Duration::from_secs(1), harness.playback_event_rx.recv()).await.unwrap() {
            Some(ExecutorEvent::Error { number: 1, .. }) => {}
            other => panic!("expected Error event, got {other:?}"),
        }
        assert!(
            timeout(Duration::from_millis(100), harness.audio_rx.recv()).await.is_err(),
            "no audio command may be sent for a missing target"
        );
    }

    #[tokio::test]
    async fn empty_target_reports_error() {
        let mut harness = setup(&[(1, "", "00:05.00")]).await;

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();

        match timeout(Duration::from_secs(1), harness.playback_event_rx.recv()).await.unwrap() {
            Some(ExecutorEvent::Error { number: 1, .. }) => {}
            other => panic!("expected Error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duration_timer_stops_the_stream_and_reports_elapsed() {
        let mut harness = setup(&[(1, "hit.wav", "00:00.05")]).await;

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();
        let id = expect_play(&mut harness).await;

        match timeout(Duration::from_secs(2), harness.audio_rx.recv()).await.unwrap() {
            Some(AudioCommand::Stop { id: stopped }) => assert_eq!(stopped, id),
            other => panic!("expected Stop command, got {other:?}"),
        }
        match timeout(Duration::from_secs(1), harness.playback_event_rx.recv()).await.unwrap() {
            Some(ExecutorEvent::DurationElapsed { instance_id, number: 1 }) => {
                assert_eq!(instance_id, id);
            }
            other => panic!("expected DurationElapsed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn manual_stop_cancels_the_timer() {
        let mut harness = setup(&[(1, "bed.wav", "00:10.00")]).await;

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();
        let id = expect_play(&mut harness).await;

        harness.exec_tx.send(ExecutorCommand::StopInstance(id)).await.unwrap();

        match timeout(Duration::from_secs(1), harness.audio_rx.recv()).await.unwrap() {
            Some(AudioCommand::Stop { id: stopped }) => assert_eq!(stopped, id),
            other => panic!("expected Stop command, got {other:?}"),
        }
        match timeout(Duration::from_secs(1), harness.playback_event_rx.recv()).await.unwrap() {
            Some(ExecutorEvent::Stopped { instance_id, number: 1 }) => assert_eq!(instance_id, id),
            other => panic!("expected Stopped event, got {other:?}"),
        }

        // A second stop for the same instance is a silent no-op.
        harness.exec_tx.send(ExecutorCommand::StopInstance(id)).await.unwrap();
        assert!(timeout(Duration::from_millis(100), harness.playback_event_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn stop_all_is_safe_with_nothing_active_and_idempotent() {
        let mut harness = setup(&[]).await;

        harness.exec_tx.send(ExecutorCommand::StopAll).await.unwrap();
        harness.exec_tx.send(ExecutorCommand::StopAll).await.unwrap();

        for _ in 0..2 {
            match timeout(Duration::from_secs(1), harness.audio_rx.recv()).await.unwrap() {
                Some(AudioCommand::StopAll) => {}
                other => panic!("expected StopAll command, got {other:?}"),
            }
        }
        assert!(timeout(Duration::from_millis(100), harness.playback_event_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn unusable_duration_is_healed_from_the_file_length() {
        let mut harness = setup(&[(1, "song.wav", "garbage")]).await;

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();
        let id = expect_play(&mut harness).await;

        harness
            .engine_event_tx
            .send(EngineEvent::Audio(AudioEngineEvent::Started {
                instance_id: id,
                duration: 12.5,
            }))
            .await
            .unwrap();

        match timeout(Duration::from_secs(1), harness.playback_event_rx.recv()).await.unwrap() {
            Some(ExecutorEvent::Started { number: 1, .. }) => {}
            other => panic!("expected Started event, got {other:?}"),
        }
        let healed = harness.model.get_cue(1).await.unwrap();
        assert_eq!(healed.duration, "00:12.50");
    }

    #[tokio::test]
    async fn valid_duration_is_not_rewritten_on_start() {
        let mut harness = setup(&[(1, "song.wav", "00:05.00")]).await;

        harness.exec_tx.send(ExecutorCommand::ExecuteCue(1)).await.unwrap();
        let id = expect_play(&mut harness).await;

        harness
            .engine_event_tx
            .send(EngineEvent::Audio(AudioEngineEvent::Started {
                instance_id: id,
                duration: 99.0,
            }))
            .await
            .unwrap();

        match timeout(Duration::from_secs(1), harness.playback_event_rx.recv()).await.unwrap() {
            Some(ExecutorEvent::Started { number: 1, .. }) => {}
            other => panic!("expected Started event, got {other:?}"),
        }
        assert_eq!(harness.model.get_cue(1).await.unwrap().duration, "00:05.00");
    }
}
