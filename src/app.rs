use crate::handlers;
use crate::state::AppState;
use axum::{routing::{get, post}, Router};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/local/dashboard", get(handlers::dashboard))
        .route("/local/toggle", post(handlers::toggle))
        .route("/local/new-lab", post(handlers::new_lab))
        .route("/local/login", post(handlers::login))
        .route("/local/register", post(handlers::register))
        .route("/local/logout", post(handlers::logout))
        .route("/local/theme", post(handlers::set_theme))
        .route("/local/leaderboard", get(handlers::leaderboard))
        .fallback(handlers::proxy)
        .with_state(state)
}
