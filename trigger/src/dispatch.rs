use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use common::nomad::{NomadClient, NomadJob};
use common::payload::JobPayload;
use common::zeebe::{self, ActivatedJob, JobHeaders, ZeebeClient};

use crate::config::Config;

/// Id determinista de la transacción: el mismo job reentregado produce
/// exactamente el mismo id, y ese id es a la vez el id del batch job
/// en el scheduler. Ahí vive toda la idempotencia del sistema.
///
/// Los campos se unen con `_` tal cual llegan, sin sanitizar.
pub fn transaction_id(headers: &JobHeaders, job_key: i64) -> String {
    format!(
        "{}_{}_{}_{}",
        headers.process_id, headers.workflow_instance_key, headers.element_id, job_key,
    )
}

/// Qué pasó con una entrega concreta.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Primera vez: el batch job quedó registrado en el scheduler.
    Registered,
    /// El batch job ya existía; no se registra ni se completa nada.
    AlreadyExists,
    /// El payload no se pudo decodificar; el job se completó con
    /// error=true para que el workflow ramifique.
    CompletedWithError,
}

/// Todo lo que necesita el manejo de una entrega. Cada worker recibe
/// su propio clon; no hay estado mutable compartido entre workers.
#[derive(Clone)]
pub struct Dispatcher {
    zeebe: ZeebeClient,
    nomad: NomadClient,
    template: NomadJob,
    tasks_to_fail: HashSet<String>,
    zeebe_broker_url: String,
    run_duration_secs: u64,
}

impl Dispatcher {
    pub fn new(
        zeebe: ZeebeClient,
        nomad: NomadClient,
        template: NomadJob,
        cfg: &Config,
    ) -> Self {
        Self {
            zeebe,
            nomad,
            template,
            tasks_to_fail: cfg.tasks_to_fail.clone(),
            zeebe_broker_url: cfg.zeebe_broker_url.clone(),
            run_duration_secs: cfg.run_duration_secs,
        }
    }

    /// Maneja una entrega: deriva el id de transacción, arma el spec y
    /// aplica el protocolo consultar-y-luego-crear contra el scheduler.
    ///
    /// Un `Err` aquí es fatal para el worker que lo llamó; los caminos
    /// esperados (job ya existente, payload roto) salen como `Ok` con
    /// su outcome.
    pub async fn handle_job(&self, job: &ActivatedJob) -> Result<DispatchOutcome> {
        let tx_id = transaction_id(&job.headers, job.key);

        // 1) Decodificar el payload. Si no se puede, esta entrega
        //    termina aquí: completamos el job con error=true.
        let mut payload: JobPayload = match serde_json::from_str(&job.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "payload indecodificable en el job {} ({}): {}",
                    job.key, tx_id, e
                );
                self.fail_zeebe_job(job).await?;
                return Ok(DispatchOutcome::CompletedWithError);
            }
        };

        // 2) Arrancamos optimistas: el flag de error viaja en false.
        payload.error = false;
        let payload_json = serde_json::to_string(&payload)?;

        // 3) Clonar la plantilla y parametrizarla para esta transacción.
        let spec = self.build_spec(&tx_id, job, &payload_json);

        // 4) ¿Existe ya el batch job? El 404 es el camino normal de la
        //    primera entrega; cualquier otro fallo del lookup se
        //    propaga tal cual.
        info!("consultando el job {} en el scheduler", tx_id);
        if let Some(existing) = self.nomad.job_info(&tx_id).await? {
            info!(
                "el job {} ya existe, status: {}",
                tx_id,
                existing.status.as_deref().unwrap_or("desconocido"),
            );
            return Ok(DispatchOutcome::AlreadyExists);
        }

        // 5) No existe: lo registramos. El scheduler trata un registro
        //    duplicado del mismo id como update, no como segunda
        //    ejecución, así que la carrera residual entre dos lookups
        //    concurrentes no duplica trabajo.
        info!("creando el job {} en el scheduler", tx_id);
        self.nomad.register_job(&spec).await?;

        Ok(DispatchOutcome::Registered)
    }

    /// Copia de la plantilla con el id de transacción y el entorno que
    /// el runner espera encontrar.
    fn build_spec(&self, tx_id: &str, job: &ActivatedJob, payload_json: &str) -> NomadJob {
        let mut spec = self.template.clone();
        spec.id = tx_id.to_string();
        spec.name = tx_id.to_string();

        let env = &mut spec.task_groups[0].tasks[0].env;
        env.insert(zeebe::ENV_JOB_KEY.to_string(), job.key.to_string());
        env.insert(zeebe::ENV_PAYLOAD.to_string(), payload_json.to_string());
        env.insert(
            zeebe::ENV_BROKER_URL.to_string(),
            self.zeebe_broker_url.clone(),
        );
        env.insert(zeebe::ENV_FAIL_JOB_FLAG.to_string(), "false".to_string());
        env.insert(
            zeebe::ENV_DURATION_SECS.to_string(),
            self.run_duration_secs.to_string(),
        );

        // Override del operador: este paso debe simular un fallo.
        if self.tasks_to_fail.contains(&job.headers.element_id) {
            env.insert(zeebe::ENV_FAIL_JOB_FLAG.to_string(), "true".to_string());
        }

        spec
    }

    /// El fallo nativo del broker permite reintentar pero no
    /// ramificar; completar el job con error=true sí deja que un
    /// switch sobre el payload transicione al camino de error. Por eso
    /// este camino completa el job en vez de fallarlo.
    async fn fail_zeebe_job(&self, job: &ActivatedJob) -> Result<()> {
        // Mejor esfuerzo: conservar lo que sí se pueda decodificar del
        // payload original; si no hay nada decodificable, va vacío.
        let mut payload: JobPayload =
            serde_json::from_str(&job.payload).unwrap_or_default();
        payload.error = true;

        self.zeebe.complete_job(job.key, &payload).await?;

        info!(
            "job {} del elemento {} completado con error=true",
            job.key, job.headers.element_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::json;

    use common::nomad::{JobSummary, RegisterJobRequest, RegisterJobResponse};
    use common::zeebe::CompleteJobRequest;

    /* --------- Stub del broker y del scheduler --------- */

    #[derive(Clone, Default)]
    struct StubState {
        registered: Arc<Mutex<Vec<NomadJob>>>,
        completed: Arc<Mutex<Vec<(i64, JobPayload)>>>,
    }

    async fn stub_job_info(
        State(state): State<StubState>,
        Path(id): Path<String>,
    ) -> Result<Json<JobSummary>, StatusCode> {
        let registered = state.registered.lock().unwrap();
        if registered.iter().any(|j| j.id == id) {
            Ok(Json(JobSummary {
                id,
                status: Some("running".to_string()),
            }))
        } else {
            Err(StatusCode::NOT_FOUND)
        }
    }

    async fn stub_register(
        State(state): State<StubState>,
        Json(req): Json<RegisterJobRequest>,
    ) -> Json<RegisterJobResponse> {
        state.registered.lock().unwrap().push(req.job);
        Json(RegisterJobResponse {
            eval_id: "eval-1".to_string(),
        })
    }

    async fn stub_complete(
        State(state): State<StubState>,
        Path(key): Path<i64>,
        Json(req): Json<CompleteJobRequest>,
    ) -> Json<serde_json::Value> {
        state.completed.lock().unwrap().push((key, req.payload));
        Json(json!({"ok": true}))
    }

    async fn spawn_stub(state: StubState) -> String {
        let app = Router::new()
            .route("/v1/job/:id", get(stub_job_info))
            .route("/v1/jobs", put(stub_register))
            .route("/api/v1/jobs/:key/complete", post(stub_complete))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    /* --------- Helpers --------- */

    fn test_template() -> NomadJob {
        serde_json::from_value(json!({
            "ID": "proceso-largo",
            "Name": "proceso-largo",
            "Type": "batch",
            "Datacenters": ["dc1"],
            "TaskGroups": [{
                "Name": "grupo",
                "Tasks": [{
                    "Name": "proceso-largo",
                    "Driver": "docker",
                    "Config": {"image": "long-running-process:latest"},
                    "Env": {}
                }]
            }]
        }))
        .unwrap()
    }

    fn test_job(payload: &str) -> ActivatedJob {
        ActivatedJob {
            key: 42,
            job_type: "action".to_string(),
            headers: JobHeaders {
                process_id: "p1".to_string(),
                workflow_instance_key: 7,
                element_id: "step1".to_string(),
            },
            payload: payload.to_string(),
            deadline: None,
        }
    }

    fn dispatcher_for(base_url: &str, tasks_to_fail: HashSet<String>) -> Dispatcher {
        let http = reqwest::Client::new();
        Dispatcher {
            zeebe: ZeebeClient::new(http.clone(), base_url),
            nomad: NomadClient::new(http, base_url),
            template: test_template(),
            tasks_to_fail,
            zeebe_broker_url: "http://broker:26500".to_string(),
            run_duration_secs: 120,
        }
    }

    /* --------- transaction_id --------- */

    #[test]
    fn transaction_id_es_determinista() {
        let job = test_job("{}");
        let a = transaction_id(&job.headers, job.key);
        let b = transaction_id(&job.headers, job.key);

        assert_eq!(a, "p1_7_step1_42");
        assert_eq!(a, b);
    }

    #[test]
    fn transaction_id_distingue_pasos_e_instancias() {
        let job = test_job("{}");
        let base = transaction_id(&job.headers, job.key);

        let mut otro_paso = job.headers.clone();
        otro_paso.element_id = "step2".to_string();
        assert_ne!(base, transaction_id(&otro_paso, job.key));

        let mut otra_instancia = job.headers.clone();
        otra_instancia.workflow_instance_key = 8;
        assert_ne!(base, transaction_id(&otra_instancia, job.key));

        assert_ne!(base, transaction_id(&job.headers, 43));
    }

    /* --------- build_spec --------- */

    #[test]
    fn el_spec_lleva_el_entorno_del_runner() {
        let d = dispatcher_for("http://127.0.0.1:1", HashSet::new());
        let job = test_job(r#"{"x": 1}"#);

        let spec = d.build_spec("p1_7_step1_42", &job, r#"{"error":false,"x":1}"#);

        assert_eq!(spec.id, "p1_7_step1_42");
        assert_eq!(spec.name, "p1_7_step1_42");

        let env = &spec.task_groups[0].tasks[0].env;
        assert_eq!(env.get("ZEEBE_JOB_KEY").map(String::as_str), Some("42"));
        assert_eq!(
            env.get("ZEEBE_BROKER_URL").map(String::as_str),
            Some("http://broker:26500")
        );
        assert_eq!(
            env.get("ZEEBE_FAIL_JOB_FLAG").map(String::as_str),
            Some("false")
        );
        assert_eq!(env.get("DURATION_SECS").map(String::as_str), Some("120"));

        let payload: serde_json::Value =
            serde_json::from_str(env.get("ZEEBE_PAYLOAD").unwrap()).unwrap();
        assert_eq!(payload, json!({"error": false, "x": 1}));
    }

    #[test]
    fn el_fail_set_fuerza_el_flag() {
        let fallar: HashSet<String> = ["step1".to_string()].into_iter().collect();
        let d = dispatcher_for("http://127.0.0.1:1", fallar);
        let job = test_job(r#"{"x": 1}"#);

        let spec = d.build_spec("tx", &job, "{}");
        let env = &spec.task_groups[0].tasks[0].env;
        assert_eq!(
            env.get("ZEEBE_FAIL_JOB_FLAG").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn build_spec_no_toca_la_plantilla() {
        let d = dispatcher_for("http://127.0.0.1:1", HashSet::new());
        let job = test_job(r#"{"x": 1}"#);

        let _ = d.build_spec("tx", &job, "{}");

        assert_eq!(d.template.id, "proceso-largo");
        assert!(d.template.task_groups[0].tasks[0].env.is_empty());
    }

    /* --------- Protocolo contra los stubs --------- */

    #[tokio::test]
    async fn la_reentrega_no_registra_dos_veces() {
        let state = StubState::default();
        let base = spawn_stub(state.clone()).await;
        let d = dispatcher_for(&base, HashSet::new());
        let job = test_job(r#"{"x": 1}"#);

        // Primera entrega: no existe, se registra.
        let out = d.handle_job(&job).await.unwrap();
        assert_eq!(out, DispatchOutcome::Registered);

        {
            let registered = state.registered.lock().unwrap();
            assert_eq!(registered.len(), 1);

            let spec = &registered[0];
            assert_eq!(spec.id, "p1_7_step1_42");

            let env = &spec.task_groups[0].tasks[0].env;
            assert_eq!(env.get("ZEEBE_JOB_KEY").map(String::as_str), Some("42"));
            assert_eq!(
                env.get("ZEEBE_FAIL_JOB_FLAG").map(String::as_str),
                Some("false")
            );
            let payload: serde_json::Value =
                serde_json::from_str(env.get("ZEEBE_PAYLOAD").unwrap()).unwrap();
            assert_eq!(payload, json!({"x": 1, "error": false}));
        }

        // Reentrega del mismo job: el lookup lo encuentra y no se
        // registra nada más ni se completa nada desde aquí.
        let out = d.handle_job(&job).await.unwrap();
        assert_eq!(out, DispatchOutcome::AlreadyExists);

        assert_eq!(state.registered.lock().unwrap().len(), 1);
        assert!(state.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn el_payload_invalido_completa_el_job_con_error() {
        let state = StubState::default();
        let base = spawn_stub(state.clone()).await;
        let d = dispatcher_for(&base, HashSet::new());

        let out = d.handle_job(&test_job("esto no es json")).await.unwrap();
        assert_eq!(out, DispatchOutcome::CompletedWithError);

        let completed = state.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, 42);
        assert!(completed[0].1.error);

        // Nada llegó al scheduler.
        assert!(state.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dos_jobs_distintos_registran_dos_batch_jobs() {
        let state = StubState::default();
        let base = spawn_stub(state.clone()).await;
        let d = dispatcher_for(&base, HashSet::new());

        let job1 = test_job(r#"{"x": 1}"#);
        let mut job2 = test_job(r#"{"x": 2}"#);
        job2.key = 43;
        job2.headers.element_id = "step2".to_string();

        assert_eq!(d.handle_job(&job1).await.unwrap(), DispatchOutcome::Registered);
        assert_eq!(d.handle_job(&job2).await.unwrap(), DispatchOutcome::Registered);

        let registered = state.registered.lock().unwrap();
        assert_eq!(registered.len(), 2);
        assert_ne!(registered[0].id, registered[1].id);
    }
}
