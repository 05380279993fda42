use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::modules::schedule::{self, SchedulePayload};
use crate::web::{
    ApiMessage, AppState, Pagination,
    auth::{self, AuthUser, JsonAuthError, UserPayload, server_error},
    json_error, page_params,
};

#[derive(Deserialize)]
pub(crate) struct UserListQuery {
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    nama: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct UserListResponse {
    pagination: Pagination,
    users: Vec<UserPayload>,
}

#[derive(Deserialize)]
pub(crate) struct UpdateUserRequest {
    #[serde(default)]
    nama: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    is_admin: Option<bool>,
}

pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, (StatusCode, Json<ApiMessage>)> {
    auth::current_admin_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let (page, limit, offset) = page_params(query.page, query.limit);
    let nama = query
        .nama
        .as_deref()
        .map(str::trim)
        .filter(|nama| !nama.is_empty());

    let (total, rows) = fetch_user_listing(state.pool_ref(), nama, limit, offset)
        .await
        .map_err(|err| {
            error!(?err, "failed to list users");
            server_error()
        })?;

    let users = rows
        .into_iter()
        .map(|user| UserPayload::from_user(user, None))
        .collect();

    Ok(Json(UserListResponse {
        pagination: Pagination::new(page, limit, total),
        users,
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserPayload>, (StatusCode, Json<ApiMessage>)> {
    let caller = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    if caller.id != user_id && !caller.is_admin {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "you can only view your own account",
        ));
    }

    let user = match fetch_user_by_id(state.pool_ref(), user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(json_error(StatusCode::NOT_FOUND, "user not found")),
        Err(err) => {
            error!(?err, %user_id, "failed to load user");
            return Err(server_error());
        }
    };

    let jadwal = schedule::fetch_for_user(state.pool_ref(), user.id)
        .await
        .map_err(|err| {
            error!(?err, %user_id, "failed to load personal schedule");
            server_error()
        })?;

    Ok(Json(UserPayload::from_user(
        user,
        jadwal.map(SchedulePayload::from),
    )))
}

pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserPayload>, (StatusCode, Json<ApiMessage>)> {
    let caller = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    if caller.id != user_id && !caller.is_admin {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "you can only update your own account",
        ));
    }

    if req.is_admin.is_some() && !caller.is_admin {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "only administrators can change roles",
        ));
    }

    if req.nama.is_none() && req.email.is_none() && req.is_admin.is_none() {
        return Err(json_error(StatusCode::BAD_REQUEST, "no fields to update"));
    }

    let nama = match req.nama.as_deref().map(str::trim) {
        Some("") => {
            return Err(json_error(StatusCode::BAD_REQUEST, "nama must not be empty"));
        }
        other => other,
    };

    let email = match req.email.as_deref().map(str::trim) {
        Some(email) if !email.contains('@') => {
            return Err(json_error(StatusCode::BAD_REQUEST, "email is not valid"));
        }
        other => other.map(str::to_lowercase),
    };

    let current = match fetch_user_by_id(state.pool_ref(), user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(json_error(StatusCode::NOT_FOUND, "user not found")),
        Err(err) => {
            error!(?err, %user_id, "failed to load user before update");
            return Err(server_error());
        }
    };

    let nama = nama.map(str::to_string).unwrap_or(current.nama);
    let email = email.unwrap_or(current.email);
    let is_admin = req.is_admin.unwrap_or(current.is_admin);

    let result = sqlx::query_as::<_, AuthUser>(
        "UPDATE users SET nama = $2, email = $3, is_admin = $4, updated_at = NOW() \
         WHERE id = $1 RETURNING id, nama, email, is_admin, murojaah_profile_filled",
    )
    .bind(user_id)
    .bind(nama)
    .bind(email)
    .bind(is_admin)
    .fetch_one(state.pool_ref())
    .await;

    match result {
        Ok(user) => Ok(Json(UserPayload::from_user(user, None))),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => Err(
            json_error(StatusCode::CONFLICT, "email is already registered"),
        ),
        Err(err) => {
            error!(?err, %user_id, "failed to update user");
            Err(server_error())
        }
    }
}

pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::current_admin_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    // Sessions, logs and schedules go with the account via ON DELETE CASCADE.
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(state.pool_ref())
        .await;

    match result {
        Ok(res) if res.rows_affected() > 0 => Ok(Json(ApiMessage::new("user removed"))),
        Ok(_) => Err(json_error(StatusCode::NOT_FOUND, "user not found")),
        Err(err) => {
            error!(?err, %user_id, "failed to delete user");
            Err(server_error())
        }
    }
}

async fn fetch_user_by_id(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT id, nama, email, is_admin, murojaah_profile_filled FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

async fn fetch_user_listing(
    pool: &PgPool,
    nama: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<AuthUser>)> {
    let total: i64 = if let Some(nama) = nama {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE nama ILIKE $1")
            .bind(format!("%{nama}%"))
            .fetch_one(pool)
            .await
            .context("failed to count users")?
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
            .context("failed to count users")?
    };

    let rows = if let Some(nama) = nama {
        sqlx::query_as::<_, AuthUser>(
            "SELECT id, nama, email, is_admin, murojaah_profile_filled \
             FROM users WHERE nama ILIKE $1 \
             ORDER BY created_at ASC LIMIT $2 OFFSET $3",
        )
        .bind(format!("%{nama}%"))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to list users")?
    } else {
        sqlx::query_as::<_, AuthUser>(
            "SELECT id, nama, email, is_admin, murojaah_profile_filled \
             FROM users ORDER BY created_at ASC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("failed to list users")?
    };

    Ok((total, rows))
}
