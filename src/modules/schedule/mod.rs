use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::web::{
    ApiMessage, AppState, Pagination,
    auth::{self, JsonAuthError, server_error},
    json_error, page_params,
};

const MAX_TOTAL_HAFALAN: i32 = 30;
const MAX_EFFECTIVENESS_SCORE: i32 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/jadwal-personal",
            get(my_schedule).post(save_schedule).put(update_schedule),
        )
        .route("/api/v1/jadwal-personal/all", get(all_schedules))
}

#[derive(Clone, sqlx::FromRow)]
pub struct PersonalScheduleRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_hafalan: i32,
    pub jadwal: String,
    pub kesibukan: String,
    pub efektifitas_jadwal: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct SchedulePayload {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_hafalan: i32,
    pub jadwal: String,
    pub kesibukan: String,
    pub efektifitas_jadwal: i32,
    pub updated_at: String,
}

impl From<PersonalScheduleRow> for SchedulePayload {
    fn from(row: PersonalScheduleRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            total_hafalan: row.total_hafalan,
            jadwal: row.jadwal,
            kesibukan: row.kesibukan,
            efektifitas_jadwal: row.efektifitas_jadwal,
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
pub struct SaveScheduleRequest {
    pub total_hafalan: i32,
    pub jadwal: String,
    pub kesibukan: String,
    pub efektifitas_jadwal: i32,
}

#[derive(Deserialize)]
pub struct UpdateScheduleRequest {
    pub total_hafalan: Option<i32>,
    pub jadwal: Option<String>,
    pub kesibukan: Option<String>,
    pub efektifitas_jadwal: Option<i32>,
}

#[derive(Deserialize)]
pub struct ScheduleListQuery {
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    kesibukan: Option<String>,
}

#[derive(Clone, sqlx::FromRow)]
struct ScheduleWithOwnerRow {
    id: Uuid,
    user_id: Uuid,
    total_hafalan: i32,
    jadwal: String,
    kesibukan: String,
    efektifitas_jadwal: i32,
    updated_at: DateTime<Utc>,
    owner_nama: String,
    owner_is_admin: bool,
}

#[derive(Serialize)]
pub(crate) struct ScheduleListItem {
    id: Uuid,
    user_id: Uuid,
    owner_nama: String,
    owner_is_admin: bool,
    total_hafalan: i32,
    jadwal: String,
    kesibukan: String,
    efektifitas_jadwal: i32,
    updated_at: String,
}

#[derive(Serialize)]
pub(crate) struct ScheduleListResponse {
    pagination: Pagination,
    schedules: Vec<ScheduleListItem>,
}

/// Returns the caller's schedule, or `null` when the profile was never filled.
pub async fn my_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Option<SchedulePayload>>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let schedule = fetch_for_user(state.pool_ref(), user.id)
        .await
        .map_err(|err| {
            error!(?err, user_id = %user.id, "failed to load personal schedule");
            server_error()
        })?;

    Ok(Json(schedule.map(SchedulePayload::from)))
}

pub async fn save_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<SaveScheduleRequest>,
) -> Result<Json<SchedulePayload>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let jadwal = req.jadwal.trim().to_string();
    let kesibukan = req.kesibukan.trim().to_string();
    if let Err(message) = validate_profile(
        req.total_hafalan,
        &jadwal,
        &kesibukan,
        req.efektifitas_jadwal,
    ) {
        return Err(json_error(StatusCode::BAD_REQUEST, message));
    }

    let row = upsert_schedule(
        state.pool_ref(),
        user.id,
        req.total_hafalan,
        &jadwal,
        &kesibukan,
        req.efektifitas_jadwal,
    )
    .await
    .map_err(|err| {
        error!(?err, user_id = %user.id, "failed to save personal schedule");
        server_error()
    })?;

    Ok(Json(SchedulePayload::from(row)))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<SchedulePayload>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    if req.total_hafalan.is_none()
        && req.jadwal.is_none()
        && req.kesibukan.is_none()
        && req.efektifitas_jadwal.is_none()
    {
        return Err(json_error(StatusCode::BAD_REQUEST, "no fields to update"));
    }

    let existing = fetch_for_user(state.pool_ref(), user.id)
        .await
        .map_err(|err| {
            error!(?err, user_id = %user.id, "failed to load personal schedule");
            server_error()
        })?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "personal schedule not found"))?;

    let total_hafalan = req.total_hafalan.unwrap_or(existing.total_hafalan);
    let jadwal = match req.jadwal {
        Some(jadwal) => jadwal.trim().to_string(),
        None => existing.jadwal,
    };
    let kesibukan = match req.kesibukan {
        Some(kesibukan) => kesibukan.trim().to_string(),
        None => existing.kesibukan,
    };
    let efektifitas_jadwal = req.efektifitas_jadwal.unwrap_or(existing.efektifitas_jadwal);

    if let Err(message) = validate_profile(total_hafalan, &jadwal, &kesibukan, efektifitas_jadwal) {
        return Err(json_error(StatusCode::BAD_REQUEST, message));
    }

    let row = sqlx::query_as::<_, PersonalScheduleRow>(
        "UPDATE personal_schedules SET total_hafalan = $2, jadwal = $3, kesibukan = $4, \
         efektifitas_jadwal = $5, updated_at = NOW() WHERE id = $1 \
         RETURNING id, user_id, total_hafalan, jadwal, kesibukan, efektifitas_jadwal, updated_at",
    )
    .bind(existing.id)
    .bind(total_hafalan)
    .bind(&jadwal)
    .bind(&kesibukan)
    .bind(efektifitas_jadwal)
    .fetch_one(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, user_id = %user.id, "failed to update personal schedule");
        server_error()
    })?;

    Ok(Json(SchedulePayload::from(row)))
}

pub async fn all_schedules(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<ScheduleListQuery>,
) -> Result<Json<ScheduleListResponse>, (StatusCode, Json<ApiMessage>)> {
    auth::current_admin_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let (page, limit, offset) = page_params(query.page, query.limit);
    let filter = query
        .kesibukan
        .as_deref()
        .map(str::trim)
        .filter(|kesibukan| !kesibukan.is_empty())
        .map(|kesibukan| format!("%{kesibukan}%"));

    let (total, rows) = fetch_schedule_listing(state.pool_ref(), filter.as_deref(), limit, offset)
        .await
        .map_err(|err| {
            error!(?err, "failed to list personal schedules");
            server_error()
        })?;

    let schedules = rows
        .into_iter()
        .map(|row| ScheduleListItem {
            id: row.id,
            user_id: row.user_id,
            owner_nama: row.owner_nama,
            owner_is_admin: row.owner_is_admin,
            total_hafalan: row.total_hafalan,
            jadwal: row.jadwal,
            kesibukan: row.kesibukan,
            efektifitas_jadwal: row.efektifitas_jadwal,
            updated_at: row.updated_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(ScheduleListResponse {
        pagination: Pagination::new(page, limit, total),
        schedules,
    }))
}

fn validate_profile(
    total_hafalan: i32,
    jadwal: &str,
    kesibukan: &str,
    efektifitas_jadwal: i32,
) -> Result<(), &'static str> {
    if jadwal.is_empty() {
        return Err("jadwal must not be empty");
    }
    if kesibukan.is_empty() {
        return Err("kesibukan must not be empty");
    }
    if !(1..=MAX_TOTAL_HAFALAN).contains(&total_hafalan) {
        return Err("total_hafalan must be between 1 and 30 juz");
    }
    if !(1..=MAX_EFFECTIVENESS_SCORE).contains(&efektifitas_jadwal) {
        return Err("efektifitas_jadwal must be between 1 and 5");
    }
    Ok(())
}

pub async fn fetch_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> sqlx::Result<Option<PersonalScheduleRow>> {
    sqlx::query_as::<_, PersonalScheduleRow>(
        "SELECT id, user_id, total_hafalan, jadwal, kesibukan, efektifitas_jadwal, updated_at \
         FROM personal_schedules WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

async fn upsert_schedule(
    pool: &PgPool,
    user_id: Uuid,
    total_hafalan: i32,
    jadwal: &str,
    kesibukan: &str,
    efektifitas_jadwal: i32,
) -> Result<PersonalScheduleRow> {
    let mut transaction = pool.begin().await.context("failed to open transaction")?;

    let row = sqlx::query_as::<_, PersonalScheduleRow>(
        "INSERT INTO personal_schedules (id, user_id, total_hafalan, jadwal, kesibukan, efektifitas_jadwal) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (user_id) DO UPDATE SET total_hafalan = EXCLUDED.total_hafalan, \
         jadwal = EXCLUDED.jadwal, kesibukan = EXCLUDED.kesibukan, \
         efektifitas_jadwal = EXCLUDED.efektifitas_jadwal, updated_at = NOW() \
         RETURNING id, user_id, total_hafalan, jadwal, kesibukan, efektifitas_jadwal, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(total_hafalan)
    .bind(jadwal)
    .bind(kesibukan)
    .bind(efektifitas_jadwal)
    .fetch_one(&mut *transaction)
    .await
    .context("failed to upsert personal schedule")?;

    sqlx::query("UPDATE users SET murojaah_profile_filled = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *transaction)
        .await
        .context("failed to flag murojaah profile as filled")?;

    transaction
        .commit()
        .await
        .context("failed to commit personal schedule")?;

    Ok(row)
}

async fn fetch_schedule_listing(
    pool: &PgPool,
    kesibukan_filter: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<ScheduleWithOwnerRow>)> {
    let total: i64 = if let Some(pattern) = kesibukan_filter {
        sqlx::query_scalar("SELECT COUNT(*) FROM personal_schedules WHERE kesibukan ILIKE $1")
            .bind(pattern)
            .fetch_one(pool)
            .await
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM personal_schedules")
            .fetch_one(pool)
            .await
    }
    .context("failed to count personal schedules")?;

    let rows = if let Some(pattern) = kesibukan_filter {
        sqlx::query_as::<_, ScheduleWithOwnerRow>(
            "SELECT ps.id, ps.user_id, ps.total_hafalan, ps.jadwal, ps.kesibukan, \
             ps.efektifitas_jadwal, ps.updated_at, u.nama AS owner_nama, u.is_admin AS owner_is_admin \
             FROM personal_schedules ps JOIN users u ON u.id = ps.user_id \
             WHERE ps.kesibukan ILIKE $1 \
             ORDER BY ps.updated_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, ScheduleWithOwnerRow>(
            "SELECT ps.id, ps.user_id, ps.total_hafalan, ps.jadwal, ps.kesibukan, \
             ps.efektifitas_jadwal, ps.updated_at, u.nama AS owner_nama, u.is_admin AS owner_is_admin \
             FROM personal_schedules ps JOIN users u ON u.id = ps.user_id \
             ORDER BY ps.updated_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
    .context("failed to list personal schedules")?;

    Ok((total, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_profile_accepts_boundary_values() {
        assert!(validate_profile(1, "Subuh", "sibuk", 1).is_ok());
        assert!(validate_profile(30, "Malam", "santai", 5).is_ok());
    }

    #[test]
    fn validate_profile_rejects_out_of_range_values() {
        assert_eq!(
            validate_profile(0, "Subuh", "sibuk", 3),
            Err("total_hafalan must be between 1 and 30 juz")
        );
        assert_eq!(
            validate_profile(31, "Subuh", "sibuk", 3),
            Err("total_hafalan must be between 1 and 30 juz")
        );
        assert_eq!(
            validate_profile(10, "Subuh", "sibuk", 0),
            Err("efektifitas_jadwal must be between 1 and 5")
        );
        assert_eq!(
            validate_profile(10, "Subuh", "sibuk", 6),
            Err("efektifitas_jadwal must be between 1 and 5")
        );
    }

    #[test]
    fn validate_profile_rejects_blank_strings() {
        assert_eq!(
            validate_profile(10, "", "sibuk", 3),
            Err("jadwal must not be empty")
        );
        assert_eq!(
            validate_profile(10, "Subuh", "", 3),
            Err("kesibukan must not be empty")
        );
    }
}
