use axum::extract::rejection::JsonRejection;
use axum::response::Html;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::api::models::{
    ActiveResponse, CancelResponse, ConfigResponse, HistoryQuery, HistoryResponse,
    PreviewQuery, ProgressResponse, StartResponse,
};
use crate::error::GenerationError;
use crate::generation::admission::COUNT_RANGE;
use crate::generation::{GenerationController, GenerationRequest, JobStatus, Preview};
use crate::questions::PoolStats;

pub mod models;

pub const ADMIN_ID_HEADER: &str = "x-admin-id";

const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct ApiState {
    pub controller: GenerationController,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(admin_index))
        // Generation control
        .route("/api/generation/start", post(start_generation))
        .route("/api/generation/progress/:id", get(get_progress))
        .route("/api/generation/active", get(get_active))
        .route("/api/generation/cancel", post(cancel_active))
        .route("/api/generation/:id/cancel", post(cancel_job))
        // Read-only views
        .route("/api/generation/preview", get(preview))
        .route("/api/generation/history", get(history))
        .route("/api/generation/pool-stats", get(pool_stats))
        .route("/api/generation/config", get(get_config))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

const ADMIN_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Question Generation Admin</title>
  <style>
    :root {
      color-scheme: light;
      --bg: #f6f7fb;
      --panel: #ffffff;
      --border: #d7dbe6;
      --text: #1b1f2a;
      --muted: #5b6275;
      --accent: #1f6feb;
      --danger: #cf222e;
    }
    * { box-sizing: border-box; }
    body {
      margin: 0;
      font-family: "Segoe UI", "Helvetica Neue", Arial, sans-serif;
      background: var(--bg);
      color: var(--text);
    }
    header {
      padding: 20px 24px;
      border-bottom: 1px solid var(--border);
      background: var(--panel);
    }
    h1 { margin: 0; font-size: 20px; }
    main {
      padding: 16px 24px 32px;
      display: grid;
      gap: 16px;
      grid-template-columns: repeat(auto-fit, minmax(320px, 1fr));
    }
    section {
      background: var(--panel);
      border: 1px solid var(--border);
      border-radius: 10px;
      padding: 12px 14px;
    }
    h2 { margin: 0 0 8px; font-size: 16px; }
    .muted { color: var(--muted); font-size: 12px; }
    label { display: block; font-size: 12px; margin: 6px 0 4px; }
    input, select {
      width: 100%;
      padding: 8px;
      border: 1px solid var(--border);
      border-radius: 6px;
      font-family: inherit;
    }
    button {
      margin-top: 8px;
      padding: 8px 12px;
      border: 1px solid var(--accent);
      background: var(--accent);
      color: white;
      border-radius: 6px;
      cursor: pointer;
    }
    button.danger { border-color: var(--danger); background: var(--danger); }
    pre {
      margin: 10px 0 0;
      padding: 10px;
      background: #0f172a;
      color: #e5e7eb;
      border-radius: 8px;
      font-size: 12px;
      overflow: auto;
      min-height: 120px;
    }
  </style>
</head>
<body>
  <header>
    <h1>Question Generation</h1>
    <div class="muted">One job at a time. Progress refreshes every 2s while a job is running.</div>
  </header>
  <main>
    <section>
      <h2>Start Job</h2>
      <label>Count (1-500)</label>
      <input id="start-count" placeholder="50" />
      <label>Areas (optional, none selected means all)</label>
      <select id="start-areas" multiple size="6"></select>
      <label>Minimum difficulty (optional, 1-5)</label>
      <input id="start-difficulty" placeholder="3" />
      <label><input type="checkbox" id="start-skip-dedup" style="width:auto" /> Skip duplicate detection</label>
      <button onclick="previewJob()">Preview</button>
      <button onclick="startJob()">Start</button>
      <pre id="start-out">{}</pre>
    </section>
    <section>
      <h2>Active Job</h2>
      <button onclick="pollActive()">Refresh</button>
      <button class="danger" onclick="cancelActive()">Cancel</button>
      <pre id="active-out">{}</pre>
    </section>
    <section>
      <h2>History</h2>
      <button onclick="show('/api/generation/history?limit=20', 'history-out')">Fetch</button>
      <pre id="history-out">{}</pre>
    </section>
    <section>
      <h2>Question Pool</h2>
      <button onclick="show('/api/generation/pool-stats', 'pool-out')">Fetch</button>
      <pre id="pool-out">{}</pre>
    </section>
  </main>
  <script>
    let pollTimer = null;

    async function show(path, targetId, opts) {
      const res = await fetch(path, opts || {});
      const txt = await res.text();
      let out = txt;
      let parsed = null;
      try { parsed = JSON.parse(txt); out = JSON.stringify(parsed, null, 2); } catch (e) {}
      document.getElementById(targetId).textContent = out;
      return parsed;
    }

    // area names contain commas, so each one travels as its own value
    function areaList() {
      return Array.from(document.getElementById("start-areas").selectedOptions)
        .map(o => o.value);
    }

    async function loadAreas() {
      const res = await fetch("/api/generation/config");
      if (!res.ok) return;
      const cfg = await res.json();
      const select = document.getElementById("start-areas");
      for (const area of Object.keys(cfg.area_weights)) {
        const opt = document.createElement("option");
        opt.value = area;
        opt.textContent = area + " (" + Math.round(cfg.area_weights[area] * 100) + "%)";
        select.appendChild(opt);
      }
    }

    function previewJob() {
      const params = new URLSearchParams();
      params.set("count", document.getElementById("start-count").value.trim() || "50");
      for (const area of areaList()) params.append("areas", area);
      show("/api/generation/preview?" + params.toString(), "start-out");
    }

    async function startJob() {
      const body = {
        count: parseInt(document.getElementById("start-count").value.trim() || "50", 10),
        skip_dedup: document.getElementById("start-skip-dedup").checked,
      };
      const areas = areaList();
      if (areas.length) body.selected_areas = areas;
      const difficulty = document.getElementById("start-difficulty").value.trim();
      if (difficulty) body.difficulty_min = parseInt(difficulty, 10);

      await show("/api/generation/start", "start-out", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify(body),
      });
      pollActive();
    }

    async function pollActive() {
      const snap = await show("/api/generation/active", "active-out");
      if (pollTimer) { clearTimeout(pollTimer); pollTimer = null; }
      if (snap && snap.running) {
        pollTimer = setTimeout(pollActive, 2000);
      }
    }

    function cancelActive() {
      show("/api/generation/cancel", "active-out", { method: "POST" });
    }

    loadAreas();
    pollActive();
  </script>
</body>
</html>
"#;

pub async fn admin_index() -> Html<&'static str> {
    Html(ADMIN_HTML)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<JobStatus>,
}

/// Wraps the controller error taxonomy so handlers can use `?`.
#[derive(Debug)]
pub struct ApiError(GenerationError);

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let reason = err.reason_code();
        let (code, job_id, status) = match &err {
            GenerationError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, None, None),
            GenerationError::AlreadyRunning { job_id } => (StatusCode::CONFLICT, *job_id, None),
            GenerationError::NotFound(id) => (StatusCode::NOT_FOUND, Some(*id), None),
            GenerationError::NoActiveJob => (StatusCode::NOT_FOUND, None, None),
            GenerationError::AlreadyTerminal { job_id, status } => {
                (StatusCode::CONFLICT, Some(*job_id), Some(*status))
            }
            GenerationError::Store(e) => {
                error!(error = %e, "store error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, None, None)
            }
        };

        let error = match &err {
            GenerationError::InvalidRequest { message, .. } => message.clone(),
            GenerationError::Store(e) => format!("internal error: {e}"),
            other => other.to_string(),
        };

        (
            code,
            Json(ErrorBody {
                error,
                reason,
                job_id,
                status,
            }),
        )
            .into_response()
    }
}

fn admin_id(headers: &HeaderMap) -> i64 {
    headers
        .get(ADMIN_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

pub async fn start_generation(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    // undecodable bodies get the same JSON error shape as validation failures
    let Json(body) =
        body.map_err(|rej| GenerationError::invalid("malformed_body", rej.body_text()))?;
    let handle = state.controller.submit(body, admin_id(&headers)).await?;
    Ok(Json(StartResponse {
        job_id: handle.job_id,
        distribution: handle.distribution,
    }))
}

pub async fn get_progress(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let snapshot = state.controller.progress(id).await?;
    Ok(Json(snapshot.into()))
}

pub async fn get_active(State(state): State<ApiState>) -> Result<Json<ActiveResponse>, ApiError> {
    let body = match state.controller.active().await? {
        Some(snapshot) => ActiveResponse::Active(snapshot.into()),
        None => ActiveResponse::Idle { running: false },
    };
    Ok(Json(body))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let status = state.controller.cancel(id).await?;
    Ok(Json(CancelResponse {
        cancelled: true,
        job_id: id,
        status,
    }))
}

pub async fn cancel_active(
    State(state): State<ApiState>,
) -> Result<Json<CancelResponse>, ApiError> {
    let (job_id, status) = state.controller.cancel_active().await?;
    Ok(Json(CancelResponse {
        cancelled: true,
        job_id,
        status,
    }))
}

pub async fn preview(
    State(state): State<ApiState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Preview>, ApiError> {
    let q = PreviewQuery::from_pairs(pairs)?;
    Ok(Json(state.controller.preview(q.count, q.areas)?))
}

pub async fn history(
    State(state): State<ApiState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let items = state
        .controller
        .history(limit)
        .await?
        .into_iter()
        .map(ProgressResponse::from)
        .collect();
    Ok(Json(HistoryResponse { items }))
}

pub async fn pool_stats(State(state): State<ApiState>) -> Result<Json<PoolStats>, ApiError> {
    Ok(Json(state.controller.pool_stats().await?))
}

pub async fn get_config(State(state): State<ApiState>) -> Json<ConfigResponse> {
    let cfg = state.controller.config();
    Json(ConfigResponse {
        area_weights: cfg
            .weights
            .iter()
            .map(|(area, w)| (area.to_string(), w))
            .collect(),
        cost: cfg.cost.clone(),
        count_min: *COUNT_RANGE.start(),
        count_max: *COUNT_RANGE.end(),
        generator_timeout_ms: cfg.generator_timeout.as_millis() as u64,
        attempts_per_question: cfg.attempts_per_question,
        max_consecutive_timeouts: cfg.max_consecutive_timeouts,
        dedup_threshold: cfg.dedup_threshold,
    })
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
