use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiMessage>) {
    (status, Json(ApiMessage::new(message)))
}

/// Envelope metadata attached to every paginated listing.
#[derive(Debug, Serialize, Clone, Copy)]
pub struct Pagination {
    pub current_page: i64,
    pub total_data: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            current_page: page,
            total_data: total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

const MAX_PAGE_SIZE: i64 = 100;

/// Normalizes optional `page`/`limit` query values into a page number, a page
/// size and the matching SQL offset.
pub fn page_params(page: Option<i64>, limit: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(10).clamp(1, MAX_PAGE_SIZE);
    (page, limit, (page - 1) * limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_total_pages_up() {
        let pagination = Pagination::new(2, 10, 21);
        assert_eq!(pagination.current_page, 2);
        assert_eq!(pagination.total_data, 21);
        assert_eq!(pagination.total_pages, 3);

        let empty = Pagination::new(1, 10, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn page_params_clamp_out_of_range_values() {
        assert_eq!(page_params(None, None), (1, 10, 0));
        assert_eq!(page_params(Some(0), Some(0)), (1, 1, 0));
        assert_eq!(page_params(Some(3), Some(25)), (3, 25, 50));
        assert_eq!(page_params(Some(-2), Some(500)), (1, 100, 0));
    }
}
