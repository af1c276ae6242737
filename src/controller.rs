use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::{
    error::EngineError,
    event::UiEvent,
    executor::{ExecutorCommand, ExecutorEvent},
    manager::ShowModelManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Playing,
    Paused,
}

/// One active playback stream as presented to UI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCue {
    pub instance_id: Uuid,
    pub number: u32,
    pub position: f64,
    pub duration: f64,
    pub status: PlaybackStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "param", rename_all = "camelCase")]
pub enum ControllerCommand {
    Go { number: u32 },
    Stop { instance_id: Uuid },
    StopAll,
    PauseAll,
    ResumeAll,
    SetMasterVolume { volume: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowState {
    pub active_cues: HashMap<Uuid, ActiveCue>,
    /// While set, every new `Go` is rejected. Duration timers keep counting.
    pub paused: bool,
    /// Presentation cursor: the next cue an operator would fire by hand.
    pub selected: Option<u32>,
}

impl ShowState {
    pub fn new() -> Self {
        Self {
            active_cues: HashMap::new(),
            paused: false,
            selected: None,
        }
    }
}

impl Default for ShowState {
    fn default() -> Self {
        Self::new()
    }
}

/// The control actor. Owns the published `ShowState`, gates `Go` while
/// paused, advances the presentation cursor, and decides auto-follow when a
/// duration timer fires.
pub struct CueController {
    model: ShowModelManager,
    executor_tx: mpsc::Sender<ExecutorCommand>,
    command_rx: mpsc::Receiver<ControllerCommand>,
    event_rx: mpsc::Receiver<ExecutorEvent>,
    state_tx: watch::Sender<ShowState>,
    event_tx: broadcast::Sender<UiEvent>,
    state: ShowState,
}

impl CueController {
    pub fn new(
        model: ShowModelManager,
        executor_tx: mpsc::Sender<ExecutorCommand>,
        command_rx: mpsc::Receiver<ControllerCommand>,
        event_rx: mpsc::Receiver<ExecutorEvent>,
        state_tx: watch::Sender<ShowState>,
        event_tx: broadcast::Sender<UiEvent>,
    ) -> Self {
        Self {
            model,
            executor_tx,
            command_rx,
            event_rx,
            state_tx,
            event_tx,
            state: ShowState::new(),
        }
    }

    pub async fn run(mut self) {
        log::info!("CueController run loop started.");
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    if let Err(e) = self.handle_command(command).await {
                        log::error!("Error handling controller command: {:?}", e);
                    }
                    self.publish_state();
                },
                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.handle_playback_event(event).await {
                        log::error!("Error handling playback event: {:?}", e);
                    }
                    self.publish_state();
                },
                else => break,
            }
        }
        log::info!("CueController run loop finished.");
    }

    fn publish_state(&self) {
        if self.state_tx.send(self.state.clone()).is_err() {
            log::trace!("No UI clients are listening to state updates.");
        }
    }

    fn emit(&self, event: UiEvent) {
        if self.event_tx.send(event).is_err() {
            log::trace!("No UI clients are listening to events.");
        }
    }

    async fn handle_command(&mut self, command: ControllerCommand) -> Result<(), anyhow::Error> {
        match command {
            ControllerCommand::Go { number } => self.handle_go(number).await,
            ControllerCommand::Stop { instance_id } => {
                self.executor_tx.send(ExecutorCommand::StopInstance(instance_id)).await?;
                Ok(())
            }
            ControllerCommand::StopAll => {
                self.executor_tx.send(ExecutorCommand::StopAll).await?;
                Ok(())
            }
            ControllerCommand::PauseAll => {
                if !self.state.paused {
                    self.state.paused = true;
                    self.executor_tx.send(ExecutorCommand::PauseAll).await?;
                    self.emit(UiEvent::PlaybackPaused);
                }
                Ok(())
            }
            ControllerCommand::ResumeAll => {
                if self.state.paused {
                    self.state.paused = false;
                    self.executor_tx.send(ExecutorCommand::ResumeAll).await?;
                    self.emit(UiEvent::PlaybackResumed);
                }
                Ok(())
            }
            ControllerCommand::SetMasterVolume { volume } => {
                let applied = self.model.set_master_volume(volume).await?;
                self.executor_tx.send(ExecutorCommand::SetMasterVolume(applied)).await?;
                Ok(())
            }
        }
    }

    /// Starts a cue unless playback is paused. The same gate applies to
    /// operator `Go`s and auto-follow chains; a rejected call is surfaced
    /// and dropped, never queued.
    async fn handle_go(&mut self, number: u32) -> Result<(), anyhow::Error> {
        if self.state.paused {
            let error = EngineError::BlockedWhilePaused;
            log::warn!("Cannot start cue {number}: {error}");
            self.emit(UiEvent::CueError { number, error: error.to_string() });
            return Ok(());
        }
        if self.model.get_cue(number).await.is_none() {
            log::warn!("GO: cue {number} not found.");
            return Ok(());
        }
        self.executor_tx.send(ExecutorCommand::ExecuteCue(number)).await?;
        Ok(())
    }

    async fn handle_playback_event(&mut self, event: ExecutorEvent) -> Result<(), anyhow::Error> {
        match event {
            ExecutorEvent::Started { instance_id, number } => {
                self.state.active_cues.insert(
                    instance_id,
                    ActiveCue {
                        instance_id,
                        number,
                        position: 0.0,
                        duration: 0.0,
                        status: PlaybackStatus::Playing,
                    },
                );
                self.emit(UiEvent::CueStarted { number });
                self.advance_cursor(number).await;
            }
            ExecutorEvent::Progress { instance_id, number, position, duration } => {
                let entry = self.state.active_cues.entry(instance_id).or_insert(ActiveCue {
                    instance_id,
                    number,
                    position,
                    duration,
                    status: PlaybackStatus::Playing,
                });
                entry.position = position;
                entry.duration = duration;
                entry.status = PlaybackStatus::Playing;
            }
            ExecutorEvent::Paused { instance_id, number, position, duration } => {
                if let Some(active) = self.state.active_cues.get_mut(&instance_id) {
                    active.position = position;
                    active.duration = duration;
                    if active.status != PlaybackStatus::Paused {
                        active.status = PlaybackStatus::Paused;
                        self.emit(UiEvent::CuePaused { number });
                    }
                }
            }
            ExecutorEvent::Resumed { instance_id, number } => {
                if let Some(active) = self.state.active_cues.get_mut(&instance_id) {
                    if active.status != PlaybackStatus::Playing {
                        active.status = PlaybackStatus::Playing;
                        self.emit(UiEvent::CueResumed { number });
                    }
                }
            }
            ExecutorEvent::Stopped { instance_id, number } => {
                self.state.active_cues.remove(&instance_id);
                self.emit(UiEvent::CueStopped { number });
            }
            ExecutorEvent::Completed { instance_id, number } => {
                // Natural end of an untimed stream; auto-follow only chains
                // from a duration timer.
                self.state.active_cues.remove(&instance_id);
                self.emit(UiEvent::CueCompleted { number });
            }
            ExecutorEvent::DurationElapsed { instance_id, number } => {
                self.state.active_cues.remove(&instance_id);
                self.emit(UiEvent::CueCompleted { number });
                self.chain_auto_follow(number).await?;
            }
            ExecutorEvent::Error { instance_id, number, error } => {
                self.state.active_cues.remove(&instance_id);
                log::error!("Cue {number} failed: {error}");
                self.emit(UiEvent::CueError { number, error });
            }
        }
        Ok(())
    }

    /// Moves the presentation cursor past the played cue to the next one an
    /// operator would fire by hand, skipping consecutive auto-follow cues.
    async fn advance_cursor(&mut self, played: u32) {
        let next = self.model.read().await.next_manual_cue(played).map(|cue| cue.number);
        match next {
            Some(number) => {
                self.state.selected = Some(number);
                self.emit(UiEvent::PlaybackCursorMoved { number });
            }
            None => {
                log::info!("Reached the end of the cue list or no non-auto-follow cue found.");
            }
        }
    }

    /// A timed stream ended naturally. The cue immediately following it in
    /// show order starts iff its own auto-follow flag is set right now.
    async fn chain_auto_follow(&mut self, played: u32) -> Result<(), anyhow::Error> {
        let next = self
            .model
            .read()
            .await
            .cue_after(played)
            .map(|cue| (cue.number, cue.auto_follow));
        if let Some((next_number, true)) = next {
            log::info!("Auto-follow: chaining from cue {played} into cue {next_number}.");
            self.handle_go(next_number).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{sync::Arc, time::Duration};

    use tokio::{
        sync::mpsc::{Receiver, Sender},
        time::timeout,
    };

    use crate::{model::cue::Cue, store::KeepExisting};

    struct Harness {
        model: ShowModelManager,
        ctrl_tx: Sender<ControllerCommand>,
        exec_rx: Receiver<ExecutorCommand>,
        playback_event_tx: Sender<ExecutorEvent>,
        state_rx: watch::Receiver<ShowState>,
        event_rx: broadcast::Receiver<UiEvent>,
    }

    async fn setup(cues: &[(u32, bool)]) -> Harness {
        let (ctrl_tx, ctrl_rx) = mpsc::channel::<ControllerCommand>(32);
        let (exec_tx, exec_rx) = mpsc::channel::<ExecutorCommand>(32);
        let (playback_event_tx, playback_event_rx) = mpsc::channel::<ExecutorEvent>(32);
        let (state_tx, state_rx) = watch::channel::<ShowState>(ShowState::new());
        let (event_tx, event_rx) = broadcast::channel::<UiEvent>(64);

        let model = ShowModelManager::new(event_tx.clone(), Arc::new(KeepExisting));
        model
            .write_with(|show| {
                for &(number, auto_follow) in cues {
                    let mut cue = Cue::with_number(number);
                    cue.auto_follow = auto_follow;
                    show.cues.push(cue);
                }
            })
            .await;

        let controller = CueController::new(
            model.clone(),
            exec_tx,
            ctrl_rx,
            playback_event_rx,
            state_tx,
            event_tx,
        );
        tokio::spawn(controller.run());

        Harness { model, ctrl_tx, exec_rx, playback_event_tx, state_rx, event_rx }
    }

    async fn expect_execute(harness: &mut Harness, number: u32) {
        match timeout(Duration::from_secs(1), harness.exec_rx.recv()).await {
            Ok(Some(ExecutorCommand::ExecuteCue(n))) => assert_eq!(n, number),
            other => panic!("expected ExecuteCue({number}), got {other:?}"),
        }
    }

    async fn expect_no_execute(harness: &mut Harness) {
        match timeout(Duration::from_millis(150), harness.exec_rx.recv()).await {
            Err(_) => {}
            Ok(Some(ExecutorCommand::ExecuteCue(n))) => panic!("unexpected ExecuteCue({n})"),
            Ok(other) => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn go_command_forwards_to_the_executor() {
        let mut harness = setup(&[(1, false)]).await;

        harness.ctrl_tx.send(ControllerCommand::Go { number: 1 }).await.unwrap();
        expect_execute(&mut harness, 1).await;
    }

    #[tokio::test]
    async fn go_on_an_unknown_cue_is_a_quiet_no_op() {
        let mut harness = setup(&[(1, false)]).await;

        harness.ctrl_tx.send(ControllerCommand::Go { number: 99 }).await.unwrap();
        expect_no_execute(&mut harness).await;
    }

    #[tokio::test]
    async fn go_is_rejected_while_paused_and_works_after_resume() {
        let mut harness = setup(&[(1, false)]).await;

        harness.ctrl_tx.send(ControllerCommand::PauseAll).await.unwrap();
        match timeout(Duration::from_secs(1), harness.exec_rx.recv()).await.unwrap() {
            Some(ExecutorCommand::PauseAll) => {}
            other => panic!("expected PauseAll, got {other:?}"),
        }

        harness.ctrl_tx.send(ControllerCommand::Go { number: 1 }).await.unwrap();
        expect_no_execute(&mut harness).await;
        loop {
            match harness.event_rx.recv().await.unwrap() {
                UiEvent::CueError { number: 1, .. } => break,
                UiEvent::PlaybackPaused => continue,
                other => panic!("expected CueError for the blocked go, got {other:?}"),
            }
        }

        harness.ctrl_tx.send(ControllerCommand::ResumeAll).await.unwrap();
        match timeout(Duration::from_secs(1), harness.exec_rx.recv()).await.unwrap() {
            Some(ExecutorCommand::ResumeAll) => {}
            other => panic!("expected ResumeAll, got {other:?}"),
        }

        harness.ctrl_tx.send(ControllerCommand::Go { number: 1 }).await.unwrap();
        expect_execute(&mut harness, 1).await;
    }

    #[tokio::test]
    async fn started_event_records_the_stream_and_advances_the_cursor() {
        let mut harness = setup(&[(1, false), (2, true), (3, true), (4, false)]).await;
        let instance_id = Uuid::now_v7();

        harness
            .playback_event_tx
            .send(ExecutorEvent::Started { instance_id, number: 1 })
            .await
            .unwrap();

        harness.state_rx.changed().await.unwrap();
        {
            let state = harness.state_rx.borrow();
            let active = state.active_cues.get(&instance_id).unwrap();
            assert_eq!(active.number, 1);
            assert_eq!(active.status, PlaybackStatus::Playing);
            // Cursor skips the auto-follow run (2, 3) and lands on 4.
            assert_eq!(state.selected, Some(4));
        }

        let mut saw_started = false;
        let mut saw_cursor = false;
        while let Ok(event) = harness.event_rx.try_recv() {
            match event {
                UiEvent::CueStarted { number: 1 } => saw_started = true,
                UiEvent::PlaybackCursorMoved { number: 4 } => saw_cursor = true,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_started && saw_cursor);
    }

    #[tokio::test]
    async fn duration_elapsed_chains_when_the_next_cue_auto_follows() {
        let mut harness = setup(&[(1, false), (2, true)]).await;

        harness
            .playback_event_tx
            .send(ExecutorEvent::DurationElapsed { instance_id: Uuid::now_v7(), number: 1 })
            .await
            .unwrap();

        expect_execute(&mut harness, 2).await;
    }

    #[tokio::test]
    async fn duration_elapsed_checks_the_next_cues_own_flag() {
        // The played cue auto-follows, the next one does not: no chain.
        let mut harness = setup(&[(1, true), (2, false)]).await;

        harness
            .playback_event_tx
            .send(ExecutorEvent::DurationElapsed { instance_id: Uuid::now_v7(), number: 1 })
            .await
            .unwrap();

        expect_no_execute(&mut harness).await;
    }

    #[tokio::test]
    async fn manual_stop_and_natural_completion_never_chain() {
        let mut harness = setup(&[(1, false), (2, true)]).await;
        let instance_id = Uuid::now_v7();

        harness
            .playback_event_tx
            .send(ExecutorEvent::Stopped { instance_id, number: 1 })
            .await
            .unwrap();
        expect_no_execute(&mut harness).await;

        harness
            .playback_event_tx
            .send(ExecutorEvent::Completed { instance_id, number: 1 })
            .await
            .unwrap();
        expect_no_execute(&mut harness).await;
    }

    #[tokio::test]
    async fn auto_follow_is_blocked_while_paused() {
        let mut harness = setup(&[(1, false), (2, true)]).await;

        harness.ctrl_tx.send(ControllerCommand::PauseAll).await.unwrap();
        match timeout(Duration::from_secs(1), harness.exec_rx.recv()).await.unwrap() {
            Some(ExecutorCommand::PauseAll) => {}
            other => panic!("expected PauseAll, got {other:?}"),
        }

        harness
            .playback_event_tx
            .send(ExecutorEvent::DurationElapsed { instance_id: Uuid::now_v7(), number: 1 })
            .await
            .unwrap();
        expect_no_execute(&mut harness).await;
    }

    #[tokio::test]
    async fn pause_and_resume_transition_stream_status_once() {
        let mut harness = setup(&[(1, false)]).await;
        let instance_id = Uuid::now_v7();

        harness
            .playback_event_tx
            .send(ExecutorEvent::Started { instance_id, number: 1 })
            .await
            .unwrap();
        for _ in 0..2 {
            harness
                .playback_event_tx
                .send(ExecutorEvent::Paused {
                    instance_id,
                    number: 1,
                    position: 21.0,
                    duration: 50.0,
                })
                .await
                .unwrap();
        }

        harness.state_rx.changed().await.unwrap();
        loop {
            {
                let state = harness.state_rx.borrow();
                if let Some(active) = state.active_cues.get(&instance_id) {
                    if active.status == PlaybackStatus::Paused {
                        assert_eq!(active.position, 21.0);
                        assert_eq!(active.duration, 50.0);
                        break;
                    }
                }
            }
            harness.state_rx.changed().await.unwrap();
        }

        harness
            .playback_event_tx
            .send(ExecutorEvent::Resumed { instance_id, number: 1 })
            .await
            .unwrap();
        loop {
            harness.state_rx.changed().await.unwrap();
            let status = harness
                .state_rx
                .borrow()
                .active_cues
                .get(&instance_id)
                .map(|active| active.status);
            if status == Some(PlaybackStatus::Playing) {
                break;
            }
        }

        let paused_events = {
            let mut count = 0;
            while let Ok(event) = harness.event_rx.try_recv() {
                if matches!(event, UiEvent::CuePaused { .. }) {
                    count += 1;
                }
            }
            count
        };
        assert_eq!(paused_events, 1, "repeated pause polls must not re-broadcast");
    }

    #[tokio::test]
    async fn completed_event_removes_the_stream() {
        let mut harness = setup(&[(1, false)]).await;
        let instance_id = Uuid::now_v7();

        harness
            .playback_event_tx
            .send(ExecutorEvent::Started { instance_id, number: 1 })
            .await
            .unwrap();
        harness
            .playback_event_tx
            .send(ExecutorEvent::Completed { instance_id, number: 1 })
            .await
            .unwrap();

        loop {
            harness.state_rx.changed().await.unwrap();
            if harness.state_rx.borrow().active_cues.is_empty() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn stop_all_is_always_forwarded() {
        let mut harness = setup(&[]).await;

        for _ in 0..2 {
            harness.ctrl_tx.send(ControllerCommand::StopAll).await.unwrap();
            match timeout(Duration::from_secs(1), harness.exec_rx.recv()).await.unwrap() {
                Some(ExecutorCommand::StopAll) => {}
                other => panic!("expected StopAll, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn master_volume_flows_through_the_model_to_the_executor() {
        let mut harness = setup(&[]).await;

        harness
            .ctrl_tx
            .send(ControllerCommand::SetMasterVolume { volume: 180.0 })
            .await
            .unwrap();
        match timeout(Duration::from_secs(1), harness.exec_rx.recv()).await.unwrap() {
            Some(ExecutorCommand::SetMasterVolume(volume)) => assert_eq!(volume, 100.0),
            other => panic!("expected SetMasterVolume, got {other:?}"),
        }
        assert_eq!(harness.model.read().await.settings.master_volume, 100.0);
    }
}
