//! HTTP ingress for notification workflows.
//!
//! [`NotificationService`] wires the `hubshard` engine to the process: it
//! builds the activity runner, workflow host and dispatcher from the server
//! configuration, spawns the worker pool and exposes three routes.
//!
//! | Route                                   | Purpose                               |
//! |-----------------------------------------|---------------------------------------|
//! | `POST /api/v1/notifications`            | Submit a request, `202 {instanceId}`  |
//! | `GET /api/v1/notifications/{instanceId}`| Persisted result or `PENDING`         |
//! | `GET /health`                           | Probe every configured backend        |
//!
//! A submitted body is only required to be JSON; the workflow validates it
//! and persists malformed requests as `FAILURE_INVALID_INPUT`.

use crate::server::{
    beta::FileBetaUserLookup,
    config::ServerConfig,
    pool::{
        manager::WorkerPool,
        request::{Inflight, WorkRequest},
        worker::worker_loop,
    },
    service::{
        error::{Error, Result},
        observer::{MetricsObserver, TracingTelemetrySink},
    },
    telemetry::{
        decrement_workflows_inflight, increment_workflows_inflight, increment_workflows_started,
    },
};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use hubshard::{
    ActivityRunner, BackendProvider, BetaUserLookup, Dispatcher, InstanceId, MemoryBackendProvider,
    MemoryHistoryStore, MemoryResultStore, NotificationBackendConfig, StaticBetaUsers,
    WorkflowHost, WorkflowResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct NotificationService {
    config: ServerConfig,
    dispatcher: Dispatcher,
    inflight: Arc<Inflight>,
    worker_pool: Arc<WorkerPool>,
}

impl NotificationService {
    /// Creates the service with one in-memory store per configured backend.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_backends(config, Arc::new(MemoryBackendProvider::unrecorded()))
    }

    /// Creates the service on top of `backends` and spawns the worker pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_backends(config: ServerConfig, backends: Arc<dyn BackendProvider>) -> Self {
        let beta_users: Arc<dyn BetaUserLookup> = match &config.beta_users_file {
            Some(path) => Arc::new(FileBetaUserLookup::new(path.clone())),
            None => Arc::new(StaticBetaUsers::default()),
        };
        let runner = ActivityRunner::new(
            Arc::clone(&config.orchestrator),
            backends,
            beta_users,
            Arc::new(TracingTelemetrySink),
        );
        let host = WorkflowHost::new(runner, Arc::new(MemoryHistoryStore::new()))
            .with_observer(Arc::new(MetricsObserver));
        let dispatcher = Dispatcher::new(
            host,
            Arc::new(MemoryResultStore::with_capacity(
                config.result_store_capacity,
            )),
        );

        let inflight = Arc::new(Inflight::new());
        let shutdown_token = CancellationToken::new();
        let mut workers = Vec::with_capacity(config.num_workers);

        for worker_id in 0..config.num_workers {
            let (tx, rx) = mpsc::channel(config.work_queue_size);
            workers.push(tx);

            tokio::spawn(worker_loop(
                worker_id,
                rx,
                dispatcher.clone(),
                Arc::clone(&inflight),
                shutdown_token.clone(),
            ));
        }

        let worker_pool = WorkerPool::new(
            workers,
            shutdown_token,
            config.shutdown_timeout,
            Arc::clone(&inflight),
        );

        Self {
            config,
            dispatcher,
            inflight,
            worker_pool: Arc::new(worker_pool),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/notifications", post(submit))
            .route("/api/v1/notifications/{instance_id}", get(status))
            .route("/health", get(health))
            .with_state(self.clone())
    }

    /// Stops accepting work, drains running instances and stops the workers.
    pub async fn shutdown(&self) -> Result<()> {
        self.worker_pool.shutdown().await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    /// Caller-chosen instance id. Resubmitting a completed id returns the
    /// stored result without running it again.
    pub instance_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub instance_id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowResult>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StatusResponse {
    Completed(WorkflowResult),
    Pending { status: &'static str },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backends: Vec<BackendHealth>,
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
async fn submit(
    State(service): State<NotificationService>,
    Query(params): Query<SubmitParams>,
    body: core::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(input) = body.map_err(|e| Error::InvalidRequest {
        reason: e.body_text(),
    })?;

    let instance_id = match params.instance_id {
        Some(id) if id.trim().is_empty() => {
            return Err(Error::InvalidRequest {
                reason: "instanceId must not be empty".to_string(),
            });
        }
        Some(id) => InstanceId::new(id),
        None => InstanceId::random(),
    };

    if let Some(result) = service.dispatcher.result(&instance_id) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%instance_id, "returning stored result");
        let response = SubmitResponse {
            instance_id,
            result: Some(result),
        };
        return Ok((StatusCode::OK, Json(response)).into_response());
    }

    if service.inflight.insert(instance_id.clone()) {
        increment_workflows_started();
        increment_workflows_inflight();

        let request = WorkRequest::Run {
            instance_id: instance_id.clone(),
            input,
        };
        if let Err(e) = service.worker_pool.send_to_next_worker(request).await {
            service.inflight.remove(&instance_id);
            decrement_workflows_inflight();
            return Err(e);
        }
    }

    let response = SubmitResponse {
        instance_id,
        result: None,
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn status(
    State(service): State<NotificationService>,
    Path(instance_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let instance_id = InstanceId::new(instance_id);

    if let Some(result) = service.dispatcher.result(&instance_id) {
        return Ok(Json(StatusResponse::Completed(result)));
    }
    if service.inflight.contains(&instance_id) {
        return Ok(Json(StatusResponse::Pending { status: "PENDING" }));
    }
    Err(Error::NotFound {
        instance_id: instance_id.to_string(),
    })
}

async fn health(State(service): State<NotificationService>) -> (StatusCode, Json<HealthResponse>) {
    let provider = service.dispatcher.host().runner().backends();
    let probes = service
        .config
        .orchestrator
        .backends()
        .map(|backend| probe(provider.as_ref(), backend));
    let backends = futures::future::join_all(probes).await;

    let (code, status) = if service.worker_pool.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else if backends.iter().all(|b| b.healthy) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: status.to_string(),
        backends,
    };
    (code, Json(response))
}

async fn probe(provider: &dyn BackendProvider, backend: &NotificationBackendConfig) -> BackendHealth {
    let outcome = match provider.backend(backend) {
        Ok(client) => client.health_check().await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => BackendHealth {
            name: backend.name.clone(),
            healthy: true,
            error: None,
        },
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(backend = %backend.name, "health check failed: {e}");
            BackendHealth {
                name: backend.name.clone(),
                healthy: false,
                error: Some(e.to_string()),
            }
        }
    }
}
