use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber;

use common::payload::JobPayload;
use common::zeebe::{self, ZeebeClient};

/// Proceso batch de larga duración: duerme el tiempo configurado y
/// después completa el job de workflow contra el broker. Todo su
/// contrato llega por las variables de entorno que inyectó el trigger.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("runner=debug,reqwest=info")
        .init();

    let broker_url = required_env(zeebe::ENV_BROKER_URL)?;

    let job_key: i64 = required_env(zeebe::ENV_JOB_KEY)?
        .parse()
        .map_err(|_| anyhow!("{} no es un entero", zeebe::ENV_JOB_KEY))?;

    let fail_job: bool = required_env(zeebe::ENV_FAIL_JOB_FLAG)?
        .parse()
        .map_err(|_| anyhow!("{} no es un booleano", zeebe::ENV_FAIL_JOB_FLAG))?;

    let duration_secs: u64 = required_env(zeebe::ENV_DURATION_SECS)?
        .parse()
        .map_err(|_| anyhow!("{} no es un entero", zeebe::ENV_DURATION_SECS))?;

    let mut payload: JobPayload = serde_json::from_str(&required_env(zeebe::ENV_PAYLOAD)?)
        .map_err(|e| anyhow!("error decodificando {}: {}", zeebe::ENV_PAYLOAD, e))?;

    info!("simulando trabajo por {}s...", duration_secs);
    sleep(Duration::from_secs(duration_secs)).await;

    if fail_job {
        info!("marcando error=true en el payload del job {}", job_key);
        payload.error = true;
    }

    let client = ZeebeClient::new(Client::new(), broker_url);
    client.complete_job(job_key, &payload).await?;

    info!("job {} completado", job_key);
    Ok(())
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("falta la variable de entorno {}", key))
}
