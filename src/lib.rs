use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    controller::{ControllerCommand, CueController, ShowState},
    engine::audio_engine::{AudioCommand, AudioEngine},
    event::UiEvent,
    executor::{EngineEvent, Executor, ExecutorCommand, ExecutorEvent},
    manager::ShowModelManager,
    store::ConflictResolver,
};

pub mod apiserver;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod manager;
pub mod model;
pub mod pathutil;
pub mod store;

pub struct BackendHandle {
    pub model: ShowModelManager,

    pub controller_tx: mpsc::Sender<ControllerCommand>,
    pub state_rx: watch::Receiver<ShowState>,
    pub event_tx: broadcast::Sender<UiEvent>,
    pub event_rx: broadcast::Receiver<UiEvent>,
}

pub async fn start_backend(resolver: Arc<dyn ConflictResolver>) -> anyhow::Result<BackendHandle> {
    let (controller_tx, controller_rx) = mpsc::channel::<ControllerCommand>(32);
    let (exec_tx, exec_rx) = mpsc::channel::<ExecutorCommand>(32);
    let (audio_tx, audio_rx) = mpsc::channel::<AudioCommand>(32);
    let (executor_event_tx, executor_event_rx) = mpsc::channel::<ExecutorEvent>(32);
    let (engine_event_tx, engine_event_rx) = mpsc::channel::<EngineEvent>(32);
    let (state_tx, state_rx) = watch::channel::<ShowState>(ShowState::new());
    let (event_tx, event_rx) = broadcast::channel::<UiEvent>(32);

    let model = ShowModelManager::new(event_tx.clone(), resolver);
    let controller = CueController::new(
        model.clone(),
        exec_tx,
        controller_rx,
        executor_event_rx,
        state_tx,
        event_tx.clone(),
    );

    let executor = Executor::new(
        model.clone(),
        exec_rx,
        audio_tx,
        executor_event_tx,
        engine_event_rx,
    );

    let audio_engine = AudioEngine::new(audio_rx, engine_event_tx)?;

    tokio::spawn(controller.run());
    tokio::spawn(executor.run());
    tokio::spawn(audio_engine.run());

    Ok(BackendHandle { model, controller_tx, state_rx, event_tx, event_rx })
}
