//! In-memory stand-in for the remote scheduling service, for running the
//! controller on a desktop without the real backend.

use std::{net::SocketAddr, sync::Arc, thread};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use siren_common::{
    endpoints::{PATH_CHECK_COMMAND, PATH_CONFIRM_COMMAND, PATH_SCHEDULE_DECISION},
    schedule::next_alarm_today,
    types::COMMAND_ACTIVATE,
    LocalTime, ScheduleEntry,
};

const PATH_ACTIVATE: &str = "/ativar/";
const PATH_SCHEDULES: &str = "/api/agendamentos";
const DEFAULT_ACTIVATE_SOURCE: &str = "manual";

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingCommand {
    id: u64,
    source: String,
}

#[derive(Debug, Default)]
struct MockService {
    entries: Vec<ScheduleEntry>,
    pending: Option<PendingCommand>,
    issued: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct DecisionResponse {
    current_time: String,
    current_day: &'static str,
    should_activate: bool,
    is_scheduled: bool,
    sirene_status: bool,
    next_alarm: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct CommandResponse {
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ActivateRequest {
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_id: Option<u64>,
}

impl MockService {
    fn decision(&self, now: &LocalTime) -> DecisionResponse {
        let scheduled = self.entries.iter().any(|entry| entry.matches(now));
        let manual = self.pending.is_some();

        DecisionResponse {
            current_time: format!("{:02}:{:02}", now.hour, now.minute),
            current_day: now.weekday.abbreviation(),
            should_activate: scheduled || manual,
            is_scheduled: scheduled && !manual,
            sirene_status: false,
            next_alarm: next_alarm_today(&self.entries, now),
        }
    }

    fn check_command(&self) -> CommandResponse {
        match &self.pending {
            Some(pending) => CommandResponse {
                command: COMMAND_ACTIVATE,
                source: Some(pending.source.clone()),
                id: Some(pending.id.to_string()),
            },
            None => CommandResponse {
                command: "desligar",
                source: None,
                id: None,
            },
        }
    }

    fn confirm(&mut self) {
        if let Some(pending) = self.pending.take() {
            info!("command {} confirmed by device", pending.id);
        }
    }

    fn queue(&mut self, source: Option<String>) -> u64 {
        self.issued += 1;
        let source = source
            .filter(|source| !source.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ACTIVATE_SOURCE.to_string());
        info!("queued manual command {} from {source}", self.issued);
        self.pending = Some(PendingCommand {
            id: self.issued,
            source,
        });
        self.issued
    }

    fn replace_entries(&mut self, entries: Vec<ScheduleEntry>) {
        info!("schedule replaced with {} entries", entries.len());
        self.entries = entries;
    }
}

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<MockService>>,
    timezone: Tz,
}

/// Binds the mock service and serves it from a dedicated thread with its own
/// runtime. Returns the bound address.
pub fn spawn(port: u16, timezone: Tz) -> anyhow::Result<SocketAddr> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to build mock service runtime")?;

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = runtime
        .block_on(TcpListener::bind(addr))
        .with_context(|| format!("failed to bind mock service at {addr}"))?;
    let bound = listener.local_addr()?;

    let state = AppState {
        service: Arc::new(Mutex::new(MockService::default())),
        timezone,
    };
    let app = router(state);

    thread::Builder::new()
        .name("mock-service".into())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(err) = axum::serve(listener, app).await {
                    warn!("mock service stopped: {err:#}");
                }
            });
        })
        .context("failed to spawn mock service thread")?;

    info!("mock service listening on http://{bound}");
    Ok(bound)
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_SCHEDULE_DECISION, get(handle_decision))
        .route(PATH_CHECK_COMMAND, get(handle_check_command))
        .route(PATH_CONFIRM_COMMAND, post(handle_confirm_command))
        .route(PATH_ACTIVATE, post(handle_activate))
        .route(PATH_SCHEDULES, put(handle_put_schedules))
        .with_state(state)
}

async fn handle_decision(State(state): State<AppState>) -> Json<DecisionResponse> {
    let local = Utc::now().with_timezone(&state.timezone);
    let now = LocalTime::from_datetime(&local.with_timezone(&local.offset().fix()));
    let service = state.service.lock().await;
    Json(service.decision(&now))
}

async fn handle_check_command(State(state): State<AppState>) -> Json<CommandResponse> {
    Json(state.service.lock().await.check_command())
}

async fn handle_confirm_command(State(state): State<AppState>) -> Json<StatusBody> {
    state.service.lock().await.confirm();
    Json(StatusBody {
        status: "success",
        command_id: None,
    })
}

async fn handle_activate(State(state): State<AppState>, body: Bytes) -> Json<StatusBody> {
    let request: ActivateRequest = serde_json::from_slice(&body).unwrap_or_default();
    let id = state.service.lock().await.queue(request.source);
    Json(StatusBody {
        status: "success",
        command_id: Some(id),
    })
}

async fn handle_put_schedules(
    State(state): State<AppState>,
    Json(entries): Json<Vec<ScheduleEntry>>,
) -> Json<StatusBody> {
    state.service.lock().await.replace_entries(entries);
    Json(StatusBody {
        status: "success",
        command_id: None,
    })
}
