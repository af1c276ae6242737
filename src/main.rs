use std::{path::Path, sync::Arc};

use cuedeck_backend::{apiserver, start_backend, store::KeepExisting};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let backend = start_backend(Arc::new(KeepExisting)).await?;

    if let Some(folder) = std::env::args().nth(1) {
        backend.model.open_show(Path::new(&folder)).await?;
    }

    let router = apiserver::create_api_router(
        backend.controller_tx.clone(),
        backend.state_rx.clone(),
        backend.event_tx.clone(),
        backend.model.clone(),
    )
    .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:7070").await?;
    log::info!("API server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
