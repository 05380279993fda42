pub mod auth;
pub mod responses;
pub mod router;
pub mod state;
pub mod users;

pub use auth::{AuthUser, SESSION_COOKIE, SESSION_TTL_DAYS};
pub use responses::{ApiMessage, Pagination, json_error, page_params};
pub use state::AppState;
