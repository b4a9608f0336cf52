use crate::state::AppState;
use axum::Router;

pub mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use repo::UserRepository;
pub use repo_types::User;
pub use services::{ServiceError, UserService};

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
