use std::{error::Error, sync::Arc};

use clap::Parser;
use cube_worker::{
    config::WorkerConfig,
    tasks::docker::DockerClient,
    worker::types::{TaskServer, Worker, WorkerHandle},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = WorkerConfig::parse();
    config.validate()?;

    let runtime = DockerClient::connect(config.docker_socket.as_deref())?;
    let worker = Arc::new(Worker::new(&config.name, Arc::new(runtime)));

    info!(
        worker = %config.name,
        host = %config.host,
        port = config.port,
        interval_ms = config.interval_ms,
        "starting worker"
    );

    let handle = WorkerHandle::spawn(worker.clone(), config.interval());
    let server = TaskServer::new(worker, &config.host, config.port);

    let result = server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await;

    handle.shutdown_and_join().await;
    result?;
    Ok(())
}
