use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use common::zeebe::{ActivateJobsRequest, ZeebeClient};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::{ACTIVATE_MAX_JOBS, IDLE_POLL_SECS, JOB_TIMEOUT_SECS};

/// Loop de suscripción de un job type. Cada worker es independiente:
/// long poll al broker, despacho síncrono de cada job recibido, y
/// vuelta a pedir. Un error fatal de despacho corta este loop y solo
/// este loop; los demás workers siguen a lo suyo.
pub async fn run_worker(job_type: &str, zeebe: ZeebeClient, dispatcher: Dispatcher) -> Result<()> {
    let worker_name = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let request = ActivateJobsRequest {
        job_type: job_type.to_string(),
        worker: worker_name,
        timeout_secs: JOB_TIMEOUT_SECS,
        max_jobs: ACTIVATE_MAX_JOBS,
    };

    loop {
        let jobs = zeebe.activate_jobs(&request).await?;

        if jobs.is_empty() {
            sleep(Duration::from_secs(IDLE_POLL_SECS)).await;
            continue;
        }

        for job in &jobs {
            info!(
                "worker {} recibió el job {} (elemento {})",
                job_type, job.key, job.headers.element_id
            );

            match dispatcher.handle_job(job).await? {
                DispatchOutcome::Registered => info!(
                    "worker {}: batch job registrado para el job {}",
                    job_type, job.key
                ),
                DispatchOutcome::AlreadyExists => info!(
                    "worker {}: el batch job del job {} ya existía",
                    job_type, job.key
                ),
                DispatchOutcome::CompletedWithError => warn!(
                    "worker {}: job {} completado con error=true",
                    job_type, job.key
                ),
            }
        }
    }
}
