//! API route handlers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use chrono::Utc;
use lanwake_core::error::LanWakeError;
use lanwake_core::types::{
    Group, GroupUpdate, HistoryEntry, Machine, MachineUpdate, NewGroup, NewMachine, ScheduledTask,
    TargetType, TaskTarget,
};
use lanwake_monitor::MonitorSnapshot;
use lanwake_scheduler::tasks::{self, TaskDraft, TaskPatch, TaskView};
use lanwake_scheduler::{WakeReport, WakeSource};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::server::AppState;

type Body<T> = Result<Json<T>, JsonRejection>;

const MAX_HISTORY_PAGE: usize = 500;

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "lanwake",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Version, uptime and wake-method diagnostics.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let policy = state.monitors.policy();
    Json(json!({
        "name": "LanWake",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "wol": state.wol_info,
        "monitor": {
            "interval_secs": policy.interval.as_secs(),
            "max_attempts": policy.max_attempts,
            "initial_delay_secs": policy.initial_delay.as_secs(),
        },
        "scheduler": {
            "tick_secs": state.config.scheduler.tick_secs,
            "clock": state.config.scheduler.clock,
        },
    }))
}

// ─── Machines ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct MachineQuery {
    pub group_id: Option<i64>,
}

pub async fn list_machines(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MachineQuery>,
) -> ApiResult<Json<Vec<Machine>>> {
    Ok(Json(state.db.list_machines(query.group_id)?))
}

pub async fn create_machine(
    State(state): State<Arc<AppState>>,
    body: Body<NewMachine>,
) -> ApiResult<Json<Machine>> {
    let Json(machine) = body?;
    Ok(Json(state.db.create_machine(&machine)?))
}

pub async fn get_machine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Machine>> {
    let machine = state
        .db
        .get_machine(id)?
        .ok_or_else(|| LanWakeError::machine_not_found(id))?;
    Ok(Json(machine))
}

pub async fn update_machine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Body<MachineUpdate>,
) -> ApiResult<Json<Machine>> {
    let Json(update) = body?;
    Ok(Json(state.db.update_machine(id, &update)?))
}

pub async fn delete_machine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.db.delete_machine(id)?;
    state.monitors.cancel_monitor(id);
    state.monitors.dismiss_monitor(id);
    Ok(Json(json!({"ok": true, "message": "Machine deleted"})))
}

/// Send the wake signal and start verification.
pub async fn wake_machine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let outcome = state.waker.wake_machine(id, &WakeSource::Manual).await?;
    Ok(Json(json!({
        "ok": true,
        "message": format!("Wake signal sent to {}", outcome.machine),
        "monitor": outcome.monitor,
    })))
}

/// One-off reachability check.
pub async fn machine_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let machine = state
        .db
        .get_machine(id)?
        .ok_or_else(|| LanWakeError::machine_not_found(id))?;
    let Some(ip) = machine.probe_ip() else {
        return Ok(Json(json!({"online": null, "message": "No IP address configured"})));
    };
    let online = state.probe.probe(ip).await.unwrap_or(false);
    Ok(Json(json!({"online": online, "ip_address": ip})))
}

/// Ping every machine concurrently. `null` for machines without an IP.
pub async fn all_machine_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let machines = state.db.list_machines(None)?;
    let checks = machines.iter().map(|m| {
        let probe = state.probe.clone();
        async move {
            let online = match m.probe_ip() {
                Some(ip) => Some(probe.probe(ip).await.unwrap_or(false)),
                None => None,
            };
            (m.id.to_string(), online)
        }
    });
    let statuses: BTreeMap<String, Option<bool>> =
        futures::future::join_all(checks).await.into_iter().collect();
    Ok(Json(json!(statuses)))
}

// ─── Groups ──────────────────────────────────────────────

pub async fn list_groups(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Group>>> {
    Ok(Json(state.db.list_groups()?))
}

pub async fn create_group(
    State(state): State<Arc<AppState>>,
    body: Body<NewGroup>,
) -> ApiResult<Json<Group>> {
    let Json(group) = body?;
    Ok(Json(state.db.create_group(&group)?))
}

pub async fn get_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Group>> {
    let group = state
        .db
        .get_group(id)?
        .ok_or_else(|| LanWakeError::group_not_found(id))?;
    Ok(Json(group))
}

pub async fn update_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Body<GroupUpdate>,
) -> ApiResult<Json<Group>> {
    let Json(update) = body?;
    Ok(Json(state.db.update_group(id, &update)?))
}

/// Members are unassigned, never deleted.
pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.db.delete_group(id)?;
    Ok(Json(json!({"ok": true, "message": "Group deleted"})))
}

pub async fn group_machines(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Machine>>> {
    if state.db.get_group(id)?.is_none() {
        return Err(LanWakeError::group_not_found(id).into());
    }
    Ok(Json(state.db.machines_in_group(id)?))
}

pub async fn wake_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WakeReport>> {
    let report = state
        .waker
        .wake(&TaskTarget::group(id), &WakeSource::Manual)
        .await?;
    Ok(Json(report))
}

// ─── Wake & monitors ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BatchWakeRequest {
    pub machine_ids: Vec<i64>,
}

pub async fn batch_wake(
    State(state): State<Arc<AppState>>,
    body: Body<BatchWakeRequest>,
) -> ApiResult<Json<WakeReport>> {
    let Json(request) = body?;
    Ok(Json(state.waker.wake_batch(&request.machine_ids).await?))
}

pub async fn list_monitors(State(state): State<Arc<AppState>>) -> Json<Vec<MonitorSnapshot>> {
    Json(state.monitors.list_monitors())
}

/// Poll one monitor. Absent monitors are reported, not an error.
pub async fn get_monitor(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Json<Value> {
    match state.monitors.get_monitor(id) {
        Some(snapshot) => Json(json!(snapshot)),
        None => Json(json!({"machine_id": id, "status": "none", "finished": true})),
    }
}

/// Cancel an active monitor, or dismiss a finished one.
pub async fn cancel_monitor(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Json<Value> {
    let cancelled = state.monitors.cancel_monitor(id);
    let dismissed = !cancelled && state.monitors.dismiss_monitor(id);
    let message = if cancelled { "Monitoring cancelled" } else { "No active monitor" };
    Json(json!({
        "machine_id": id,
        "cancelled": cancelled,
        "dismissed": dismissed,
        "message": message,
    }))
}

// ─── History ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_history_limit() -> usize {
    50
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    if !(1..=MAX_HISTORY_PAGE).contains(&query.limit) {
        return Err(LanWakeError::validation(format!(
            "limit must be between 1 and {MAX_HISTORY_PAGE}"
        ))
        .into());
    }
    Ok(Json(state.db.list_history(query.limit, query.offset)?))
}

pub async fn history_count(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({"count": state.db.count_history()?})))
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let removed = state.db.clear_history()?;
    tracing::info!("🧹 Cleared {removed} history entries");
    Ok(Json(json!({"ok": true, "message": "History cleared", "removed": removed})))
}

// ─── Scheduled tasks ─────────────────────────────────────

fn task_view(state: &AppState, task: &ScheduledTask) -> ApiResult<TaskView> {
    let clock = state.config.scheduler.clock;
    let target_name = state.db.target_name(&task.target)?;
    let next = tasks::next_run(task, Utc::now(), clock);
    Ok(TaskView::new(task, target_name, next))
}

fn ensure_target_exists(state: &AppState, target: &TaskTarget) -> ApiResult<()> {
    if state.db.target_name(target)?.is_some() {
        return Ok(());
    }
    let err = match target.target_type {
        TargetType::Machine => LanWakeError::machine_not_found(target.target_id),
        TargetType::Group => LanWakeError::group_not_found(target.target_id),
    };
    Err(err.into())
}

/// Newest first, each with its target name and next run.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TaskView>>> {
    let views = state
        .db
        .list_tasks()?
        .iter()
        .rev()
        .map(|task| task_view(&state, task))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(views))
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Body<TaskDraft>,
) -> ApiResult<Json<TaskView>> {
    let Json(draft) = body?;
    let task = draft.validate(state.config.scheduler.clock)?;
    ensure_target_exists(&state, &task.target)?;
    let created = state.db.create_task(&task)?;
    Ok(Json(task_view(&state, &created)?))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Body<TaskPatch>,
) -> ApiResult<Json<TaskView>> {
    let Json(patch) = body?;
    let current = state
        .db
        .get_task(id)?
        .ok_or_else(|| LanWakeError::task_not_found(id))?;
    let task = patch.apply(&current, state.config.scheduler.clock)?;
    if task.target != current.target {
        ensure_target_exists(&state, &task.target)?;
    }
    let updated = state.db.update_task(id, &task)?;
    tracing::info!("📅 Task updated: '{}' id={}", updated.name, id);
    Ok(Json(task_view(&state, &updated)?))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.db.delete_task(id)?;
    tracing::info!("📅 Task removed: id={id}");
    Ok(Json(json!({"ok": true, "message": "Scheduled task deleted"})))
}
