use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Row};
use tracing::error;
use uuid::Uuid;

use crate::web::{
    ApiMessage, AppState,
    auth::{self, AuthUser, JsonAuthError, server_error},
    json_error,
};

pub const PAGES_PER_JUZ: i32 = 20;
pub const MAX_JUZ: i32 = 30;

const STATUS_NOT_DONE: &str = "not_done";
const STATUS_DONE: &str = "done";

const RECAP_WINDOW_DAYS: i64 = 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/log-harian", get(daily_log))
        .route("/api/v1/log-harian/detail", post(create_session))
        .route(
            "/api/v1/log-harian/detail/:id",
            put(update_session).delete(remove_session),
        )
        .route(
            "/api/v1/log-harian/detail/dari-rekomendasi",
            post(apply_recommendation),
        )
        .route("/api/v1/log-harian/rekap/mingguan", get(weekly_recap))
        .route("/api/v1/log-harian/statistik", get(statistics))
}

#[derive(Debug)]
enum LedgerError {
    InvalidRange(String),
    NotFound(&'static str),
    Db(anyhow::Error),
}

impl LedgerError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRange(message.into())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.into())
    }
}

#[derive(Clone, sqlx::FromRow)]
struct DailyLogRow {
    id: Uuid,
    user_id: Uuid,
    log_date: NaiveDate,
    total_target_pages: i32,
    total_completed_pages: i32,
}

#[derive(Clone, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    daily_log_id: Uuid,
    waktu: String,
    target_start_juz: i32,
    target_start_page: i32,
    target_end_juz: i32,
    target_end_page: i32,
    target_pages: i32,
    progress_end_juz: i32,
    progress_end_page: i32,
    completed_pages: i32,
    status: String,
    note: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub(crate) struct SessionPayload {
    id: Uuid,
    daily_log_id: Uuid,
    waktu: String,
    target_start_juz: i32,
    target_start_page: i32,
    target_end_juz: i32,
    target_end_page: i32,
    target_pages: i32,
    progress_end_juz: i32,
    progress_end_page: i32,
    completed_pages: i32,
    status: String,
    note: String,
    updated_at: String,
}

impl From<SessionRow> for SessionPayload {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            daily_log_id: row.daily_log_id,
            waktu: row.waktu,
            target_start_juz: row.target_start_juz,
            target_start_page: row.target_start_page,
            target_end_juz: row.target_end_juz,
            target_end_page: row.target_end_page,
            target_pages: row.target_pages,
            progress_end_juz: row.progress_end_juz,
            progress_end_page: row.progress_end_page,
            completed_pages: row.completed_pages,
            status: row.status,
            note: row.note,
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct DailyLogPayload {
    id: Uuid,
    user_id: Uuid,
    log_date: NaiveDate,
    total_target_pages: i32,
    total_completed_pages: i32,
    sessions: Vec<SessionPayload>,
}

#[derive(Serialize, sqlx::FromRow)]
pub(crate) struct RecapDay {
    log_date: NaiveDate,
    total_completed_pages: i32,
}

#[derive(Serialize)]
pub(crate) struct WeeklyRecapResponse {
    start_date: NaiveDate,
    end_date: NaiveDate,
    days: Vec<RecapDay>,
}

#[derive(Serialize)]
pub(crate) struct StatisticsPayload {
    total_completed_pages: i64,
    total_active_days: i64,
    average_pages_per_active_day: f64,
    most_productive_day: Option<RecapDay>,
    most_productive_waktu: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct DailyLogQuery {
    #[serde(default)]
    tanggal: Option<NaiveDate>,
    #[serde(default)]
    user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub(crate) struct RecapQuery {
    #[serde(default)]
    end_date: Option<NaiveDate>,
    #[serde(default)]
    user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub(crate) struct StatisticsQuery {
    #[serde(default)]
    user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub(crate) struct AddSessionRequest {
    waktu: String,
    target_start_juz: i32,
    target_start_page: i32,
    target_end_juz: i32,
    target_end_page: i32,
    #[serde(default)]
    note: String,
}

#[derive(Deserialize)]
pub(crate) struct UpdateProgressRequest {
    progress_end_juz: i32,
    progress_end_page: i32,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ApplyRecommendationRequest {
    decision_id: Uuid,
    target_start_juz: i32,
    target_start_page: i32,
    target_end_juz: i32,
    target_end_page: i32,
    #[serde(default)]
    note: String,
}

/// Fetches the caller's log for the requested date, creating an empty one on
/// first access. Admins may read another user's log via `user_id`.
pub async fn daily_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<DailyLogQuery>,
) -> Result<Json<DailyLogPayload>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let target_user = resolve_target_user(&user, query.user_id);
    let date = query.tanggal.unwrap_or_else(|| Utc::now().date_naive());

    let (log, sessions) = load_daily_log(state.pool_ref(), target_user, date)
        .await
        .map_err(|err| ledger_error_response(err, "load daily log"))?;

    Ok(Json(daily_log_payload(log, sessions)))
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<AddSessionRequest>,
) -> Result<(StatusCode, Json<SessionPayload>), (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let session = add_session(state.pool_ref(), user.id, &req)
        .await
        .map_err(|err| ledger_error_response(err, "add session"))?;

    Ok((StatusCode::CREATED, Json(SessionPayload::from(session))))
}

pub async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(session_id): Path<Uuid>,
    Json(req): Json<UpdateProgressRequest>,
) -> Result<Json<SessionPayload>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let session = update_progress(state.pool_ref(), user.id, session_id, &req)
        .await
        .map_err(|err| ledger_error_response(err, "update session progress"))?;

    Ok(Json(SessionPayload::from(session)))
}

pub async fn remove_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    delete_session(state.pool_ref(), user.id, session_id)
        .await
        .map_err(|err| ledger_error_response(err, "delete session"))?;

    Ok(Json(ApiMessage::new("murojaah session removed")))
}

/// Turns a stored recommendation into a new session on today's log. The
/// session's time slot records which schedule was applied.
pub async fn apply_recommendation(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<ApplyRecommendationRequest>,
) -> Result<(StatusCode, Json<SessionPayload>), (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let session = apply_decision(state.pool_ref(), user.id, &req)
        .await
        .map_err(|err| ledger_error_response(err, "apply recommendation"))?;

    Ok((StatusCode::CREATED, Json(SessionPayload::from(session))))
}

pub async fn weekly_recap(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<RecapQuery>,
) -> Result<Json<WeeklyRecapResponse>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let target_user = resolve_target_user(&user, query.user_id);
    let end_date = query.end_date.unwrap_or_else(|| Utc::now().date_naive());
    let start_date = end_date - Duration::days(RECAP_WINDOW_DAYS - 1);

    let days = fetch_recap(state.pool_ref(), target_user, start_date, end_date)
        .await
        .map_err(|err| {
            error!(?err, user_id = %target_user, "failed to load weekly recap");
            server_error()
        })?;

    Ok(Json(WeeklyRecapResponse {
        start_date,
        end_date,
        days,
    }))
}

pub async fn statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<StatisticsPayload>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let target_user = resolve_target_user(&user, query.user_id);

    let payload = load_statistics(state.pool_ref(), target_user)
        .await
        .map_err(|err| {
            error!(?err, user_id = %target_user, "failed to load murojaah statistics");
            server_error()
        })?;

    Ok(Json(payload))
}

/// Number of mushaf pages covered by an inclusive (juz, page) range.
fn page_span(
    start_juz: i32,
    start_page: i32,
    end_juz: i32,
    end_page: i32,
) -> Result<i32, LedgerError> {
    if start_juz > end_juz || (start_juz == end_juz && start_page > end_page) {
        return Err(LedgerError::invalid(
            "end position must not precede the start position",
        ));
    }

    if start_juz == end_juz {
        return Ok(end_page - start_page + 1);
    }

    let lead = PAGES_PER_JUZ - start_page + 1;
    let middle = (end_juz - start_juz - 1) * PAGES_PER_JUZ;
    Ok(lead + middle + end_page)
}

fn validate_position(juz: i32, page: i32, what: &str) -> Result<(), LedgerError> {
    if !(1..=MAX_JUZ).contains(&juz) {
        return Err(LedgerError::invalid(format!(
            "{what} juz must be between 1 and {MAX_JUZ}"
        )));
    }
    if !(1..=PAGES_PER_JUZ).contains(&page) {
        return Err(LedgerError::invalid(format!(
            "{what} page must be between 1 and {PAGES_PER_JUZ}"
        )));
    }
    Ok(())
}

fn validated_target_pages(
    start_juz: i32,
    start_page: i32,
    end_juz: i32,
    end_page: i32,
) -> Result<i32, LedgerError> {
    validate_position(start_juz, start_page, "target start")?;
    validate_position(end_juz, end_page, "target end")?;

    let pages = page_span(start_juz, start_page, end_juz, end_page)?;
    if pages <= 0 {
        return Err(LedgerError::invalid("target must cover at least one page"));
    }
    Ok(pages)
}

fn status_for(completed_pages: i32, target_pages: i32) -> &'static str {
    if completed_pages >= target_pages {
        STATUS_DONE
    } else {
        STATUS_NOT_DONE
    }
}

/// Progress never exceeds the target: overshoot is clamped and the status is
/// recomputed from the clamped value, so a shrunken range also moves a session
/// back to not_done.
fn clamped_progress(target_pages: i32, progress_span: i32) -> (i32, &'static str) {
    let completed = progress_span.min(target_pages);
    (completed, status_for(completed, target_pages))
}

fn resolve_target_user(user: &AuthUser, requested: Option<Uuid>) -> Uuid {
    match requested {
        Some(id) if user.is_admin => id,
        _ => user.id,
    }
}

fn daily_log_payload(log: DailyLogRow, sessions: Vec<SessionRow>) -> DailyLogPayload {
    DailyLogPayload {
        id: log.id,
        user_id: log.user_id,
        log_date: log.log_date,
        total_target_pages: log.total_target_pages,
        total_completed_pages: log.total_completed_pages,
        sessions: sessions.into_iter().map(SessionPayload::from).collect(),
    }
}

fn ledger_error_response(err: LedgerError, op: &'static str) -> (StatusCode, Json<ApiMessage>) {
    match err {
        LedgerError::InvalidRange(message) => json_error(StatusCode::BAD_REQUEST, message),
        LedgerError::NotFound(message) => json_error(StatusCode::NOT_FOUND, message),
        LedgerError::Db(err) => {
            error!(?err, op, "murojaah ledger operation failed");
            server_error()
        }
    }
}

async fn load_daily_log(
    pool: &PgPool,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<(DailyLogRow, Vec<SessionRow>), LedgerError> {
    let mut transaction = pool.begin().await?;

    let log = get_or_create_log_tx(&mut transaction, user_id, date).await?;
    let sessions = fetch_sessions(&mut transaction, log.id).await?;

    transaction.commit().await?;
    Ok((log, sessions))
}

async fn add_session(
    pool: &PgPool,
    user_id: Uuid,
    req: &AddSessionRequest,
) -> Result<SessionRow, LedgerError> {
    let waktu = req.waktu.trim();
    if waktu.is_empty() {
        return Err(LedgerError::invalid("waktu must not be empty"));
    }

    let target_pages = validated_target_pages(
        req.target_start_juz,
        req.target_start_page,
        req.target_end_juz,
        req.target_end_page,
    )?;

    let mut transaction = pool.begin().await?;

    let today = Utc::now().date_naive();
    let log = get_or_create_log_tx(&mut transaction, user_id, today).await?;
    lock_daily_log(&mut transaction, log.id).await?;

    let session = insert_session(
        &mut transaction,
        log.id,
        &NewSession {
            waktu,
            target_start_juz: req.target_start_juz,
            target_start_page: req.target_start_page,
            target_end_juz: req.target_end_juz,
            target_end_page: req.target_end_page,
            target_pages,
            note: req.note.trim(),
        },
    )
    .await?;

    recalculate_totals(&mut transaction, log.id).await?;
    transaction.commit().await?;

    Ok(session)
}

async fn update_progress(
    pool: &PgPool,
    user_id: Uuid,
    session_id: Uuid,
    req: &UpdateProgressRequest,
) -> Result<SessionRow, LedgerError> {
    validate_position(req.progress_end_juz, req.progress_end_page, "progress end")?;

    let mut transaction = pool.begin().await?;

    let session = find_owned_session(&mut transaction, session_id, user_id).await?;

    let progress_span = page_span(
        session.target_start_juz,
        session.target_start_page,
        req.progress_end_juz,
        req.progress_end_page,
    )?;
    let (completed_pages, status) = clamped_progress(session.target_pages, progress_span);

    let updated = sqlx::query_as::<_, SessionRow>(
        "UPDATE murojaah_sessions SET progress_end_juz = $2, progress_end_page = $3, \
         completed_pages = $4, status = $5, note = COALESCE($6, note), updated_at = NOW() \
         WHERE id = $1 \
         RETURNING id, daily_log_id, waktu, target_start_juz, target_start_page, target_end_juz, \
         target_end_page, target_pages, progress_end_juz, progress_end_page, completed_pages, \
         status, note, created_at, updated_at",
    )
    .bind(session.id)
    .bind(req.progress_end_juz)
    .bind(req.progress_end_page)
    .bind(completed_pages)
    .bind(status)
    .bind(req.note.as_deref().map(str::trim))
    .fetch_one(&mut *transaction)
    .await?;

    recalculate_totals(&mut transaction, session.daily_log_id).await?;
    transaction.commit().await?;

    Ok(updated)
}

async fn delete_session(
    pool: &PgPool,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<(), LedgerError> {
    let mut transaction = pool.begin().await?;

    let session = find_owned_session(&mut transaction, session_id, user_id).await?;

    sqlx::query("DELETE FROM murojaah_sessions WHERE id = $1")
        .bind(session.id)
        .execute(&mut *transaction)
        .await?;

    recalculate_totals(&mut transaction, session.daily_log_id).await?;
    transaction.commit().await?;

    Ok(())
}

async fn apply_decision(
    pool: &PgPool,
    user_id: Uuid,
    req: &ApplyRecommendationRequest,
) -> Result<SessionRow, LedgerError> {
    let target_pages = validated_target_pages(
        req.target_start_juz,
        req.target_start_page,
        req.target_end_juz,
        req.target_end_page,
    )?;

    let mut transaction = pool.begin().await?;

    let action: Option<String> = sqlx::query_scalar(
        "SELECT action FROM recommendation_decisions WHERE id = $1 AND user_id = $2",
    )
    .bind(req.decision_id)
    .bind(user_id)
    .fetch_optional(&mut *transaction)
    .await?;
    let action = action.ok_or(LedgerError::NotFound(
        "recommendation decision not found or not owned by the caller",
    ))?;

    let today = Utc::now().date_naive();
    let log = get_or_create_log_tx(&mut transaction, user_id, today).await?;
    lock_daily_log(&mut transaction, log.id).await?;

    let waktu = format!("AI: {action}");
    let session = insert_session(
        &mut transaction,
        log.id,
        &NewSession {
            waktu: &waktu,
            target_start_juz: req.target_start_juz,
            target_start_page: req.target_start_page,
            target_end_juz: req.target_end_juz,
            target_end_page: req.target_end_page,
            target_pages,
            note: req.note.trim(),
        },
    )
    .await?;

    recalculate_totals(&mut transaction, log.id).await?;
    transaction.commit().await?;

    Ok(session)
}

async fn fetch_log_by_user_date(
    conn: &mut PgConnection,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<Option<DailyLogRow>, LedgerError> {
    let row = sqlx::query_as::<_, DailyLogRow>(
        "SELECT id, user_id, log_date, total_target_pages, total_completed_pages \
         FROM daily_logs WHERE user_id = $1 AND log_date = $2",
    )
    .bind(user_id)
    .bind(date)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

async fn get_or_create_log_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<DailyLogRow, LedgerError> {
    if let Some(log) = fetch_log_by_user_date(conn, user_id, date).await? {
        return Ok(log);
    }

    // Concurrent callers can race to create the same (user, date) log; the
    // unique constraint makes every loser fall through to the re-read.
    sqlx::query(
        "INSERT INTO daily_logs (id, user_id, log_date) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, log_date) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(date)
    .execute(&mut *conn)
    .await?;

    fetch_log_by_user_date(conn, user_id, date)
        .await?
        .ok_or_else(|| LedgerError::Db(anyhow::anyhow!("daily log missing after upsert")))
}

// Row lock on the parent log; sibling session writers queue here.
async fn lock_daily_log(conn: &mut PgConnection, daily_log_id: Uuid) -> Result<(), LedgerError> {
    sqlx::query("SELECT id FROM daily_logs WHERE id = $1 FOR UPDATE")
        .bind(daily_log_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn fetch_sessions(
    conn: &mut PgConnection,
    daily_log_id: Uuid,
) -> Result<Vec<SessionRow>, LedgerError> {
    let rows = sqlx::query_as::<_, SessionRow>(
        "SELECT id, daily_log_id, waktu, target_start_juz, target_start_page, target_end_juz, \
         target_end_page, target_pages, progress_end_juz, progress_end_page, completed_pages, \
         status, note, created_at, updated_at \
         FROM murojaah_sessions WHERE daily_log_id = $1 ORDER BY created_at ASC",
    )
    .bind(daily_log_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Loads a session and locks its parent log, rejecting sessions that belong
/// to another user. Missing and not-owned are indistinguishable on purpose.
async fn find_owned_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<SessionRow, LedgerError> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT s.id, s.daily_log_id, s.waktu, s.target_start_juz, s.target_start_page, \
         s.target_end_juz, s.target_end_page, s.target_pages, s.progress_end_juz, \
         s.progress_end_page, s.completed_pages, s.status, s.note, s.created_at, s.updated_at \
         FROM murojaah_sessions s JOIN daily_logs l ON l.id = s.daily_log_id \
         WHERE s.id = $1 AND l.user_id = $2 FOR UPDATE OF l",
    )
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or(LedgerError::NotFound(
        "murojaah session not found or not owned by the caller",
    ))
}

struct NewSession<'a> {
    waktu: &'a str,
    target_start_juz: i32,
    target_start_page: i32,
    target_end_juz: i32,
    target_end_page: i32,
    target_pages: i32,
    note: &'a str,
}

async fn insert_session(
    conn: &mut PgConnection,
    daily_log_id: Uuid,
    new: &NewSession<'_>,
) -> Result<SessionRow, LedgerError> {
    let session = sqlx::query_as::<_, SessionRow>(
        "INSERT INTO murojaah_sessions (id, daily_log_id, waktu, target_start_juz, \
         target_start_page, target_end_juz, target_end_page, target_pages, progress_end_juz, \
         progress_end_page, completed_pages, status, note) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $12) \
         RETURNING id, daily_log_id, waktu, target_start_juz, target_start_page, target_end_juz, \
         target_end_page, target_pages, progress_end_juz, progress_end_page, completed_pages, \
         status, note, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(daily_log_id)
    .bind(new.waktu)
    .bind(new.target_start_juz)
    .bind(new.target_start_page)
    .bind(new.target_end_juz)
    .bind(new.target_end_page)
    .bind(new.target_pages)
    .bind(new.target_start_juz)
    .bind(new.target_start_page)
    .bind(STATUS_NOT_DONE)
    .bind(new.note)
    .fetch_one(&mut *conn)
    .await?;

    Ok(session)
}

/// Re-derives the cached totals from the surviving sessions inside the same
/// transaction as the write that changed them.
async fn recalculate_totals(
    conn: &mut PgConnection,
    daily_log_id: Uuid,
) -> Result<(), LedgerError> {
    let sums = sqlx::query(
        "SELECT COALESCE(SUM(target_pages), 0)::INT AS total_target, \
         COALESCE(SUM(completed_pages), 0)::INT AS total_completed \
         FROM murojaah_sessions WHERE daily_log_id = $1",
    )
    .bind(daily_log_id)
    .fetch_one(&mut *conn)
    .await?;

    let total_target: i32 = sums.try_get("total_target")?;
    let total_completed: i32 = sums.try_get("total_completed")?;

    sqlx::query(
        "UPDATE daily_logs SET total_target_pages = $2, total_completed_pages = $3, \
         updated_at = NOW() WHERE id = $1",
    )
    .bind(daily_log_id)
    .bind(total_target)
    .bind(total_completed)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_recap(
    pool: &PgPool,
    user_id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<RecapDay>> {
    sqlx::query_as::<_, RecapDay>(
        "SELECT log_date, total_completed_pages FROM daily_logs \
         WHERE user_id = $1 AND log_date BETWEEN $2 AND $3 ORDER BY log_date ASC",
    )
    .bind(user_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await
    .context("failed to load weekly recap")
}

async fn load_statistics(pool: &PgPool, user_id: Uuid) -> Result<StatisticsPayload> {
    let sums = sqlx::query(
        "SELECT COALESCE(SUM(total_completed_pages), 0)::BIGINT AS total_completed, \
         COUNT(id) AS active_days \
         FROM daily_logs WHERE user_id = $1 AND total_completed_pages > 0",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("failed to aggregate completed pages")?;

    let total_completed: i64 = sums.try_get("total_completed")?;
    let active_days: i64 = sums.try_get("active_days")?;

    let average = if active_days > 0 {
        total_completed as f64 / active_days as f64
    } else {
        0.0
    };

    let most_productive_day = sqlx::query_as::<_, RecapDay>(
        "SELECT log_date, total_completed_pages FROM daily_logs WHERE user_id = $1 \
         ORDER BY total_completed_pages DESC, log_date ASC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("failed to find the most productive day")?;

    let most_productive_waktu: Option<String> = sqlx::query_scalar(
        "SELECT s.waktu FROM murojaah_sessions s JOIN daily_logs l ON l.id = s.daily_log_id \
         WHERE l.user_id = $1 AND s.status = $2 \
         GROUP BY s.waktu ORDER BY COUNT(s.id) DESC, s.waktu ASC LIMIT 1",
    )
    .bind(user_id)
    .bind(STATUS_DONE)
    .fetch_optional(pool)
    .await
    .context("failed to find the most productive time slot")?;

    Ok(StatisticsPayload {
        total_completed_pages: total_completed,
        total_active_days: active_days,
        average_pages_per_active_day: average,
        most_productive_day,
        most_productive_waktu,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_span_within_a_single_juz() {
        assert_eq!(page_span(3, 5, 3, 12).expect("span"), 8);
        assert_eq!(page_span(3, 5, 3, 5).expect("span"), 1);
        assert_eq!(page_span(1, 1, 1, 20).expect("span"), 20);
    }

    #[test]
    fn page_span_across_juz_boundaries() {
        // Juz 1 page 15 through juz 2 page 5: six remaining pages plus five.
        assert_eq!(page_span(1, 15, 2, 5).expect("span"), 11);
        assert_eq!(page_span(2, 7, 5, 13).expect("span"), 67);
        assert_eq!(page_span(1, 1, 30, 20).expect("span"), 600);
    }

    #[test]
    fn page_span_decomposes_at_juz_boundaries() {
        let whole = page_span(2, 7, 5, 13).expect("span");
        let head = page_span(2, 7, 2, PAGES_PER_JUZ).expect("span");
        let tail = page_span(3, 1, 5, 13).expect("span");
        assert_eq!(whole, head + tail);
    }

    #[test]
    fn page_span_rejects_inverted_ranges() {
        assert!(matches!(
            page_span(5, 10, 3, 2),
            Err(LedgerError::InvalidRange(_))
        ));
        assert!(matches!(
            page_span(4, 9, 4, 8),
            Err(LedgerError::InvalidRange(_))
        ));
    }

    #[test]
    fn validated_target_rejects_out_of_bounds_positions() {
        assert!(matches!(
            validated_target_pages(0, 1, 1, 1),
            Err(LedgerError::InvalidRange(_))
        ));
        assert!(matches!(
            validated_target_pages(1, 21, 1, 1),
            Err(LedgerError::InvalidRange(_))
        ));
        assert!(matches!(
            validated_target_pages(1, 1, 31, 1),
            Err(LedgerError::InvalidRange(_))
        ));
        assert!(matches!(
            validated_target_pages(1, 1, 2, 0),
            Err(LedgerError::InvalidRange(_))
        ));
        assert_eq!(validated_target_pages(1, 1, 1, 1).expect("pages"), 1);
    }

    #[test]
    fn progress_is_clamped_to_the_target() {
        assert_eq!(clamped_progress(10, 15), (10, STATUS_DONE));
        assert_eq!(clamped_progress(10, 10), (10, STATUS_DONE));
        assert_eq!(clamped_progress(10, 4), (4, STATUS_NOT_DONE));
    }

    #[test]
    fn shrinking_progress_downgrades_status() {
        let (completed, status) = clamped_progress(10, 10);
        assert_eq!((completed, status), (10, STATUS_DONE));

        let (completed, status) = clamped_progress(10, 9);
        assert_eq!((completed, status), (9, STATUS_NOT_DONE));
    }

    #[test]
    fn admin_targeting_only_applies_to_admins() {
        let admin = AuthUser {
            id: Uuid::new_v4(),
            nama: "Admin".to_string(),
            email: "admin@example.com".to_string(),
            is_admin: true,
            murojaah_profile_filled: false,
        };
        let member = AuthUser {
            id: Uuid::new_v4(),
            nama: "Santri".to_string(),
            email: "santri@example.com".to_string(),
            is_admin: false,
            murojaah_profile_filled: true,
        };
        let other = Uuid::new_v4();

        assert_eq!(resolve_target_user(&admin, Some(other)), other);
        assert_eq!(resolve_target_user(&admin, None), admin.id);
        assert_eq!(resolve_target_user(&member, Some(other)), member.id);
        assert_eq!(resolve_target_user(&member, None), member.id);
    }
}
