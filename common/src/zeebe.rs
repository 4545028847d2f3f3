use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::payload::JobPayload;

/* --------- Contrato de entorno con el runner --------- */

/// Claves que el trigger inyecta en el entorno del batch job y que el
/// runner lee al arrancar.
pub const ENV_JOB_KEY: &str = "ZEEBE_JOB_KEY";
pub const ENV_PAYLOAD: &str = "ZEEBE_PAYLOAD";
pub const ENV_BROKER_URL: &str = "ZEEBE_BROKER_URL";
pub const ENV_FAIL_JOB_FLAG: &str = "ZEEBE_FAIL_JOB_FLAG";
pub const ENV_DURATION_SECS: &str = "DURATION_SECS";

/* --------- Tipos del API de jobs del broker --------- */

/// Cabeceras que identifican de dónde salió el job: qué proceso, qué
/// instancia en ejecución y qué elemento (paso) concreto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHeaders {
    pub process_id: String,
    pub workflow_instance_key: i64,
    pub element_id: String,
}

/// Un job entregado por el broker. El payload llega como texto JSON
/// crudo; decodificarlo es cosa del handler que lo reciba.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedJob {
    /// Id global del job, estable a través de timeouts y reentregas.
    pub key: i64,
    pub job_type: String,
    pub headers: JobHeaders,
    pub payload: String,
    /// Hasta cuándo es nuestro el job antes de que el broker lo
    /// vuelva a entregar.
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateJobsRequest {
    pub job_type: String,
    pub worker: String,
    pub timeout_secs: u64,
    pub max_jobs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateJobsResponse {
    pub jobs: Vec<ActivatedJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteJobRequest {
    pub payload: JobPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailJobRequest {
    pub retries: u32,
    pub error_message: String,
}

/* --------- Cliente HTTP --------- */

#[derive(Clone)]
pub struct ZeebeClient {
    http: Client,
    base_url: String,
}

impl ZeebeClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Long poll de jobs de un tipo. Una lista vacía es normal.
    pub async fn activate_jobs(&self, req: &ActivateJobsRequest) -> Result<Vec<ActivatedJob>> {
        let url = format!("{}/api/v1/jobs/activate", self.base_url);
        let resp = self.http.post(&url).json(req).send().await?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "el broker devolvió status {} al activar jobs de tipo {}",
                resp.status(),
                req.job_type
            ));
        }

        let body: ActivateJobsResponse = resp.json().await?;
        Ok(body.jobs)
    }

    /// Completa un job. Con `payload.error = true` el workflow puede
    /// ramificar a su camino de error.
    pub async fn complete_job(&self, job_key: i64, payload: &JobPayload) -> Result<()> {
        let url = format!("{}/api/v1/jobs/{}/complete", self.base_url, job_key);
        let req = CompleteJobRequest {
            payload: payload.clone(),
        };
        let resp = self.http.post(&url).json(&req).send().await?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "el broker devolvió status {} al completar el job {}",
                resp.status(),
                job_key
            ));
        }

        Ok(())
    }

    /// Fallo nativo del broker. Permite reintentar el job pero no
    /// ramificar el workflow, así que el flujo del trigger no lo usa:
    /// marca `error` en el payload y completa el job en su lugar.
    pub async fn fail_job(
        &self,
        job_key: i64,
        retries: u32,
        error_message: impl Into<String>,
    ) -> Result<()> {
        let url = format!("{}/api/v1/jobs/{}/fail", self.base_url, job_key);
        let req = FailJobRequest {
            retries,
            error_message: error_message.into(),
        };
        let resp = self.http.post(&url).json(&req).send().await?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "el broker devolvió status {} al fallar el job {}",
                resp.status(),
                job_key
            ));
        }

        Ok(())
    }
}
