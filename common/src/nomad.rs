use std::collections::HashMap;
use std::fs;

use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/* --------- Documento de definición del batch job --------- */

/// Definición de un job tal como la entiende el scheduler (campos
/// PascalCase en el JSON, el formato externo del documento).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NomadJob {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub job_type: String,
    #[serde(rename = "Datacenters", default)]
    pub datacenters: Vec<String>,
    #[serde(rename = "TaskGroups")]
    pub task_groups: Vec<TaskGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Count", default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(rename = "Tasks")]
    pub tasks: Vec<NomadTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NomadTask {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Driver")]
    pub driver: String,
    #[serde(rename = "Config", default)]
    pub config: Map<String, Value>,
    #[serde(rename = "Env", default)]
    pub env: HashMap<String, String>,
}

/// Resumen que devuelve el scheduler al consultar un job por id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterJobRequest {
    #[serde(rename = "Job")]
    pub job: NomadJob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterJobResponse {
    #[serde(rename = "EvalID", default)]
    pub eval_id: String,
}

/// Carga la plantilla del batch job desde un archivo JSON. Se hace una
/// sola vez al arrancar; cualquier error aquí aborta el proceso.
pub fn load_job_template(path: &str) -> Result<NomadJob> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("error leyendo la plantilla {}: {}", path, e))?;

    let job: NomadJob = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("error decodificando la plantilla {}: {}", path, e))?;

    // La plantilla tiene que traer al menos un grupo con una tarea:
    // ahí inyecta el dispatch el entorno del runner.
    if job.task_groups.is_empty() || job.task_groups[0].tasks.is_empty() {
        return Err(anyhow!(
            "la plantilla {} no tiene task groups con tareas",
            path
        ));
    }

    Ok(job)
}

/* --------- Cliente HTTP --------- */

#[derive(Clone)]
pub struct NomadClient {
    http: Client,
    base_url: String,
}

impl NomadClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Consulta un job por id. `Ok(None)` significa que el job no
    /// existe todavía (404 del scheduler); cualquier otro fallo es un
    /// error de verdad y se propaga.
    pub async fn job_info(&self, job_id: &str) -> Result<Option<JobSummary>> {
        let url = format!("{}/v1/job/{}", self.base_url, job_id);
        let resp = self.http.get(&url).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(anyhow!(
                "el scheduler devolvió status {} al consultar el job {}",
                resp.status(),
                job_id
            ));
        }

        let summary: JobSummary = resp.json().await?;
        Ok(Some(summary))
    }

    /// Registra un job. Para un id que ya existe el scheduler actualiza
    /// el registro en vez de arrancar una segunda ejecución.
    pub async fn register_job(&self, job: &NomadJob) -> Result<RegisterJobResponse> {
        let url = format!("{}/v1/jobs", self.base_url);
        let req = RegisterJobRequest { job: job.clone() };
        let resp = self.http.put(&url).json(&req).send().await?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "el scheduler devolvió status {} al registrar el job {}",
                resp.status(),
                job.id
            ));
        }

        let body: RegisterJobResponse = resp.json().await?;
        Ok(body)
    }
}
