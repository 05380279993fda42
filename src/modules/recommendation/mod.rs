use std::cmp::Ordering;

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

use crate::config::RecommendationModel;
use crate::web::{
    ApiMessage, AppState, Pagination,
    auth::{self, JsonAuthError, server_error},
    json_error, page_params,
};

pub const KIND_SPECIFIC: &str = "specific";
pub const KIND_GENERAL_HISTORICAL: &str = "general_historical";
pub const KIND_NONE: &str = "none";

/// Action text returned when neither the value table nor the historical
/// ranking can offer anything.
pub const NO_SCHEDULE_SENTINEL: &str = "no default schedule available";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/rekomendasi",
            get(decision_history).post(get_recommendation),
        )
        .route("/api/v1/rekomendasi/kesibukan", get(kesibukan_options))
}

/// Outcome of one selection pass over the model.
pub(crate) struct Selection {
    pub action: String,
    pub kind: &'static str,
    pub estimated_value: Option<f64>,
    pub effectiveness_percent: Option<f64>,
}

#[derive(Clone, sqlx::FromRow)]
struct DecisionRow {
    id: Uuid,
    user_id: Uuid,
    state: String,
    action: String,
    kind: String,
    estimated_value: Option<f64>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub(crate) struct RecommendationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    user_id: Uuid,
    state: String,
    action: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effectiveness_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct DecisionHistoryResponse {
    pagination: Pagination,
    decisions: Vec<RecommendationPayload>,
}

#[derive(Serialize)]
pub(crate) struct KesibukanOptionsResponse {
    kesibukan: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct RecommendationRequest {
    kesibukan: String,
    kategori_hafalan: String,
}

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

/// Recommends a schedule for the caller's situation and records the decision.
/// A failed insert is logged but never hides the recommendation itself.
pub async fn get_recommendation(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<RecommendationRequest>,
) -> Result<Json<RecommendationPayload>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let kesibukan = req.kesibukan.trim();
    let kategori_hafalan = req.kategori_hafalan.trim();
    if kesibukan.is_empty() || kategori_hafalan.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "kesibukan and kategori_hafalan are required",
        ));
    }

    let state_key = format!("{kesibukan}_{kategori_hafalan}");
    let selection = select_action(state.model(), &state_key);

    let mut payload = RecommendationPayload {
        id: None,
        user_id: user.id,
        state: state_key,
        action: selection.action,
        kind: selection.kind.to_string(),
        estimated_value: selection.estimated_value,
        effectiveness_percent: selection.effectiveness_percent,
        created_at: None,
    };

    if payload.kind != KIND_NONE {
        match insert_decision(state.pool_ref(), user.id, &payload).await {
            Ok(id) => payload.id = Some(id),
            Err(err) => {
                error!(?err, user_id = %user.id, "failed to persist recommendation decision");
            }
        }
    }

    Ok(Json(payload))
}

pub async fn decision_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<DecisionHistoryResponse>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let (page, limit, offset) = page_params(query.page, query.limit);

    let (total, rows) = fetch_decisions(state.pool_ref(), user.id, limit, offset)
        .await
        .map_err(|err| {
            error!(?err, user_id = %user.id, "failed to list recommendation decisions");
            server_error()
        })?;

    let model = state.model();
    let decisions = rows
        .into_iter()
        .map(|row| {
            // Effectiveness reflects the ranking the service is running with
            // now, not the one in effect when the decision was stored.
            let effectiveness_percent = model.effectiveness_for(&row.action);
            RecommendationPayload {
                id: Some(row.id),
                user_id: row.user_id,
                state: row.state,
                action: row.action,
                kind: row.kind,
                estimated_value: row.estimated_value,
                effectiveness_percent,
                created_at: Some(row.created_at.to_rfc3339()),
            }
        })
        .collect();

    Ok(Json(DecisionHistoryResponse {
        pagination: Pagination::new(page, limit, total),
        decisions,
    }))
}

pub async fn kesibukan_options(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<KesibukanOptionsResponse>, (StatusCode, Json<ApiMessage>)> {
    auth::current_admin_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    Ok(Json(KesibukanOptionsResponse {
        kesibukan: state.model().kesibukan_options(),
    }))
}

/// Picks the best known action for a state: the highest value wins, equal
/// values fall back to the lexicographically smallest action. Unknown states
/// use the historical ranking, and an empty model yields the sentinel.
fn select_action(model: &RecommendationModel, state_key: &str) -> Selection {
    if let Some(actions) = model.actions_for_state(state_key) {
        let mut best: Option<(&str, f64)> = None;
        for (action, value) in actions {
            let better = match best {
                None => true,
                Some((best_action, best_value)) => match value.partial_cmp(&best_value) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => action.as_str() < best_action,
                    _ => false,
                },
            };
            if better {
                best = Some((action.as_str(), *value));
            }
        }

        if let Some((action, value)) = best {
            return Selection {
                action: action.to_string(),
                kind: KIND_SPECIFIC,
                estimated_value: Some(value),
                effectiveness_percent: model.effectiveness_for(action),
            };
        }
        // A state with an empty action map behaves like an unknown state.
    }

    if let Some(entry) = model.historical_ranking().first() {
        return Selection {
            action: entry.jadwal.clone(),
            kind: KIND_GENERAL_HISTORICAL,
            estimated_value: None,
            effectiveness_percent: Some(entry.effectiveness_percent),
        };
    }

    Selection {
        action: NO_SCHEDULE_SENTINEL.to_string(),
        kind: KIND_NONE,
        estimated_value: None,
        effectiveness_percent: None,
    }
}

/// Persists the audit row for a selection. The stored effectiveness is the
/// value at decision time; history reads refresh it from the live ranking.
async fn insert_decision(
    pool: &PgPool,
    user_id: Uuid,
    payload: &RecommendationPayload,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO recommendation_decisions \
         (id, user_id, state, action, kind, estimated_value, effectiveness_percent) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(id)
    .bind(user_id)
    .bind(&payload.state)
    .bind(&payload.action)
    .bind(&payload.kind)
    .bind(payload.estimated_value)
    .bind(payload.effectiveness_percent)
    .execute(pool)
    .await
    .context("failed to insert recommendation decision")?;

    Ok(id)
}

async fn fetch_decisions(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<DecisionRow>)> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM recommendation_decisions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("failed to count recommendation decisions")?;

    let rows = sqlx::query_as::<_, DecisionRow>(
        "SELECT id, user_id, state, action, kind, estimated_value, created_at \
         FROM recommendation_decisions WHERE user_id = $1 \
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list recommendation decisions")?;

    Ok((total, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoricalEntry;
    use std::collections::HashMap;

    fn model_with(
        states: &[(&str, &[(&str, f64)])],
        ranking: &[(&str, f64)],
    ) -> RecommendationModel {
        let value_table = states
            .iter()
            .map(|(state, actions)| {
                let actions = actions
                    .iter()
                    .map(|(action, value)| (action.to_string(), *value))
                    .collect::<HashMap<_, _>>();
                (state.to_string(), actions)
            })
            .collect();

        let historical_ranking = ranking
            .iter()
            .map(|(jadwal, percent)| HistoricalEntry {
                jadwal: jadwal.to_string(),
                effectiveness_percent: *percent,
            })
            .collect();

        RecommendationModel::from_parts(value_table, historical_ranking)
    }

    #[test]
    fn known_state_yields_the_highest_valued_action() {
        let model = model_with(
            &[("sibuk_baru", &[("Subuh", 0.8), ("Malam", 0.5)])],
            &[("Subuh", 88.0)],
        );

        let selection = select_action(&model, "sibuk_baru");

        assert_eq!(selection.action, "Subuh");
        assert_eq!(selection.kind, KIND_SPECIFIC);
        assert_eq!(selection.estimated_value, Some(0.8));
        assert_eq!(selection.effectiveness_percent, Some(88.0));
    }

    #[test]
    fn equal_values_pick_the_lexicographically_smallest_action() {
        let model = model_with(
            &[("sibuk_baru", &[("Subuh", 0.5), ("Malam", 0.5), ("Ashar", 0.2)])],
            &[],
        );

        let selection = select_action(&model, "sibuk_baru");

        assert_eq!(selection.action, "Malam");
        assert_eq!(selection.kind, KIND_SPECIFIC);
        assert_eq!(selection.effectiveness_percent, None);
    }

    #[test]
    fn unknown_state_falls_back_to_the_historical_ranking() {
        let model = model_with(
            &[("sibuk_baru", &[("Subuh", 0.8)])],
            &[("Dzuhur", 90.0), ("Malam", 70.0)],
        );

        let selection = select_action(&model, "santai_lancar");

        assert_eq!(selection.action, "Dzuhur");
        assert_eq!(selection.kind, KIND_GENERAL_HISTORICAL);
        assert_eq!(selection.estimated_value, None);
        assert_eq!(selection.effectiveness_percent, Some(90.0));
    }

    #[test]
    fn state_with_no_actions_behaves_like_an_unknown_state() {
        let model = model_with(&[("sibuk_baru", &[])], &[("Dzuhur", 90.0)]);

        let selection = select_action(&model, "sibuk_baru");

        assert_eq!(selection.action, "Dzuhur");
        assert_eq!(selection.kind, KIND_GENERAL_HISTORICAL);
    }

    #[test]
    fn empty_model_yields_the_sentinel() {
        let model = model_with(&[], &[]);

        let selection = select_action(&model, "sibuk_baru");

        assert_eq!(selection.action, NO_SCHEDULE_SENTINEL);
        assert_eq!(selection.kind, KIND_NONE);
        assert_eq!(selection.estimated_value, None);
        assert_eq!(selection.effectiveness_percent, None);
    }
}
