mod config;
mod dispatch;
mod worker;

use anyhow::Result;
use reqwest::Client;
use tracing::{error, info};
use tracing_subscriber;

use common::nomad::{load_job_template, NomadClient};
use common::zeebe::ZeebeClient;

use crate::config::Config;
use crate::dispatch::Dispatcher;

/// Tiempo que el broker nos reserva cada job antes de reentregarlo.
pub const JOB_TIMEOUT_SECS: u64 = 2;
/// Máximo de jobs por activación.
pub const ACTIVATE_MAX_JOBS: u32 = 1;
/// Espera entre polls cuando no hay jobs.
pub const IDLE_POLL_SECS: u64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("trigger=debug,reqwest=info")
        .init();

    let cfg = Config::from_env()?;

    let template = load_job_template(&cfg.nomad_job_json_path)?;
    info!(
        "plantilla {} cargada desde {}",
        template.id, cfg.nomad_job_json_path
    );

    let http = Client::new();
    let zeebe = ZeebeClient::new(http.clone(), cfg.zeebe_broker_url.clone());
    let nomad = NomadClient::new(http, cfg.nomad_server_url.clone());

    let dispatcher = Dispatcher::new(zeebe.clone(), nomad, template, &cfg);

    // Un worker por job type, cada uno con su propia suscripción.
    let mut handles = Vec::new();
    for job_type in cfg.job_types.clone() {
        let zeebe = zeebe.clone();
        let dispatcher = dispatcher.clone();
        let jt = job_type.clone();

        info!("arrancando worker para el job type {}", job_type);
        let handle =
            tokio::spawn(async move { worker::run_worker(&jt, zeebe, dispatcher).await });
        handles.push((job_type, handle));
    }

    // El proceso vive mientras viva alguna suscripción; la caída de un
    // worker no tumba a los demás.
    for (job_type, handle) in handles {
        match handle.await {
            Ok(Ok(())) => info!("worker {} cerró su suscripción", job_type),
            Ok(Err(e)) => error!("worker {} terminó con error: {:?}", job_type, e),
            Err(e) => error!("worker {} murió (join error): {:?}", job_type, e),
        }
    }

    Ok(())
}
