use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Result};

/// Job types a los que nos suscribimos si ZEEBE_JOB_TYPES no dice otra
/// cosa.
pub const DEFAULT_JOB_TYPES: &str = "action,test,rollback";

/// Duración simulada por defecto del batch job (2 minutos).
pub const DEFAULT_RUN_DURATION_SECS: u64 = 120;

/// Configuración del proceso, leída del entorno una sola vez al
/// arrancar. Después de construirla nadie vuelve a mirar el entorno.
#[derive(Debug, Clone)]
pub struct Config {
    pub zeebe_broker_url: String,
    pub nomad_server_url: String,
    pub nomad_job_json_path: String,
    /// element_ids cuyos batch jobs deben simular un fallo.
    pub tasks_to_fail: HashSet<String>,
    pub job_types: Vec<String>,
    pub run_duration_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let zeebe_broker_url = required_env("ZEEBE_BROKER_URL")?;
        let nomad_server_url = required_env("NOMAD_SERVER_URL")?;
        let nomad_job_json_path = required_env("NOMAD_JOB_JSON_PATH")?;

        let tasks_to_fail =
            parse_task_set(&env::var("ZEEBE_TASKS_TO_FAIL").unwrap_or_default());

        let job_types: Vec<String> = env::var("ZEEBE_JOB_TYPES")
            .unwrap_or_else(|_| DEFAULT_JOB_TYPES.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if job_types.is_empty() {
            return Err(anyhow!(
                "ZEEBE_JOB_TYPES no dejó ningún job type al que suscribirse"
            ));
        }

        let run_duration_secs = match env::var("RUN_DURATION_SECS") {
            Ok(s) => s
                .parse::<u64>()
                .map_err(|_| anyhow!("RUN_DURATION_SECS inválida: {}", s))?,
            Err(_) => DEFAULT_RUN_DURATION_SECS,
        };

        Ok(Self {
            zeebe_broker_url,
            nomad_server_url,
            nomad_job_json_path,
            tasks_to_fail,
            job_types,
            run_duration_secs,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("falta la variable de entorno {}", key))
}

/// Separa una lista "a,b,c" en un set, ignorando entradas vacías.
pub fn parse_task_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
