use anyhow::Context;
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::modules::schedule::{self, SchedulePayload};
use crate::web::{ApiMessage, AppState, json_error};

#[derive(Clone, sqlx::FromRow)]
pub struct DbUserAuth {
    pub id: Uuid,
    pub password_hash: String,
}

#[derive(Clone, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub nama: String,
    pub email: String,
    pub is_admin: bool,
    pub murojaah_profile_filled: bool,
}

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;

const MIN_PASSWORD_LEN: usize = 6;

/// Public representation of an account, optionally carrying the owner's
/// personal schedule.
#[derive(Serialize)]
pub struct UserPayload {
    pub id: Uuid,
    pub nama: String,
    pub email: String,
    pub is_admin: bool,
    pub murojaah_profile_filled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jadwal_personal: Option<SchedulePayload>,
}

impl UserPayload {
    pub fn from_user(user: AuthUser, jadwal_personal: Option<SchedulePayload>) -> Self {
        Self {
            id: user.id,
            nama: user.nama,
            email: user.email,
            is_admin: user.is_admin,
            murojaah_profile_filled: user.murojaah_profile_filled,
            jadwal_personal,
        }
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub nama: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: Uuid,
    pub user: UserPayload,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserPayload>), (StatusCode, Json<ApiMessage>)> {
    let nama = req.nama.trim();
    if nama.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "nama must not be empty"));
    }

    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(json_error(StatusCode::BAD_REQUEST, "email is not valid"));
    }

    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "password must be at least 6 characters",
        ));
    }

    let password_hash = match hash_password(&req.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, "failed to hash password during registration");
            return Err(server_error());
        }
    };

    let result = sqlx::query_as::<_, AuthUser>(
        "INSERT INTO users (id, nama, email, password_hash) VALUES ($1, $2, $3, $4) \
         RETURNING id, nama, email, is_admin, murojaah_profile_filled",
    )
    .bind(Uuid::new_v4())
    .bind(nama)
    .bind(&email)
    .bind(password_hash)
    .fetch_one(state.pool_ref())
    .await;

    match result {
        Ok(user) => Ok((StatusCode::CREATED, Json(UserPayload::from_user(user, None)))),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => Err(
            json_error(StatusCode::CONFLICT, "email is already registered"),
        ),
        Err(err) => {
            error!(?err, "failed to register user");
            Err(server_error())
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), (StatusCode, Json<ApiMessage>)> {
    let email = req.email.trim().to_lowercase();

    let record = match fetch_user_by_email(state.pool_ref(), &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(invalid_credentials()),
        Err(err) => {
            error!(?err, "failed to fetch user during login");
            return Err(server_error());
        }
    };

    if !verify_password(&req.password, &record.password_hash) {
        return Err(invalid_credentials());
    }

    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    if let Err(err) =
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_token)
            .bind(record.id)
            .bind(expires_at)
            .execute(state.pool_ref())
            .await
    {
        error!(?err, "failed to create session");
        return Err(server_error());
    }

    let user = match fetch_user_by_session(state.pool_ref(), session_token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!(user_id = %record.id, "session vanished immediately after login");
            return Err(server_error());
        }
        Err(err) => {
            error!(?err, "failed to load user after login");
            return Err(server_error());
        }
    };

    let mut cookie = Cookie::new(SESSION_COOKIE, session_token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));

    let jar = jar.add(cookie);
    Ok((
        jar,
        Json(AuthResponse {
            token: session_token,
            user: UserPayload::from_user(user, None),
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Json<ApiMessage>) {
    if let Some(token) = bearer_token(&headers).or_else(|| cookie_token(&jar)) {
        if let Err(err) = sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(token)
            .execute(state.pool_ref())
            .await
        {
            error!(?err, "failed to remove session during logout");
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    let jar = jar.remove(removal);

    (jar, Json(ApiMessage::new("session closed")))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let email = req.email.trim().to_lowercase();

    if req.new_password.len() < MIN_PASSWORD_LEN {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "password must be at least 6 characters",
        ));
    }

    let password_hash = match hash_password(&req.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, "failed to hash password during reset");
            return Err(server_error());
        }
    };

    match reset_password(state.pool_ref(), &email, &password_hash).await {
        Ok(true) => Ok(Json(ApiMessage::new("password has been reset"))),
        Ok(false) => Err(json_error(
            StatusCode::NOT_FOUND,
            "no account with that email",
        )),
        Err(err) => {
            error!(?err, "failed to reset password");
            Err(server_error())
        }
    }
}

pub async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<UserPayload>, (StatusCode, Json<ApiMessage>)> {
    let user = current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let jadwal = schedule::fetch_for_user(state.pool_ref(), user.id)
        .await
        .map_err(|err| {
            error!(?err, user_id = %user.id, "failed to load personal schedule");
            server_error()
        })?;

    Ok(Json(UserPayload::from_user(
        user,
        jadwal.map(SchedulePayload::from),
    )))
}

#[derive(Debug)]
pub struct JsonAuthError {
    pub status: StatusCode,
    pub message: &'static str,
}

/// Resolves the calling user from a bearer token or the session cookie.
pub async fn current_user_or_json_error(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<AuthUser, JsonAuthError> {
    let Some(token) = bearer_token(headers).or_else(|| cookie_token(jar)) else {
        return Err(JsonAuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "authentication required",
        });
    };

    match fetch_user_by_session(state.pool_ref(), token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(JsonAuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "session is invalid or expired",
        }),
        Err(err) => {
            error!(?err, "failed to validate session");
            Err(JsonAuthError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "failed to validate session",
            })
        }
    }
}

pub async fn current_admin_or_json_error(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<AuthUser, JsonAuthError> {
    let user = current_user_or_json_error(state, headers, jar).await?;

    if !user.is_admin {
        return Err(JsonAuthError {
            status: StatusCode::FORBIDDEN,
            message: "administrator access required",
        });
    }

    Ok(user)
}

fn bearer_token(headers: &HeaderMap) -> Option<Uuid> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    Uuid::parse_str(token.trim()).ok()
}

fn cookie_token(jar: &CookieJar) -> Option<Uuid> {
    Uuid::parse_str(jar.get(SESSION_COOKIE)?.value()).ok()
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_user_by_email(pool: &PgPool, email: &str) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.nama, users.email, users.is_admin, users.murojaah_profile_filled \
         FROM auth_sessions JOIN users ON users.id = auth_sessions.user_id \
         WHERE auth_sessions.id = $1 AND auth_sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

async fn reset_password(pool: &PgPool, email: &str, password_hash: &str) -> anyhow::Result<bool> {
    let mut transaction = pool.begin().await.context("failed to open transaction")?;

    let updated = sqlx::query(
        "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE email = $1",
    )
    .bind(email)
    .bind(password_hash)
    .execute(&mut *transaction)
    .await
    .context("failed to update password")?;

    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        "DELETE FROM auth_sessions WHERE user_id IN (SELECT id FROM users WHERE email = $1)",
    )
    .bind(email)
    .execute(&mut *transaction)
    .await
    .context("failed to clear existing sessions")?;

    transaction
        .commit()
        .await
        .context("failed to commit password reset")?;

    Ok(true)
}

fn invalid_credentials() -> (StatusCode, Json<ApiMessage>) {
    json_error(StatusCode::UNAUTHORIZED, "email or password is incorrect")
}

pub(crate) fn server_error() -> (StatusCode, Json<ApiMessage>) {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "something went wrong, please try again later",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parses_authorization_header() {
        let token = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );

        assert_eq!(bearer_token(&headers), Some(token));
    }

    #[test]
    fn bearer_token_rejects_malformed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-uuid"),
        );
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("kept-secret").expect("hash password");
        assert!(verify_password("kept-secret", &hash));
        assert!(!verify_password("wrong-guess", &hash));
        assert!(!verify_password("kept-secret", "not-a-phc-string"));
    }
}
