mod rooms;
mod users;
mod ws;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn app(app_state: AppState) -> Router {
    Router::new()
        .nest("/rooms", rooms::router())
        .nest("/users", users::router())
        .route("/ws/{user}", get(ws::user_ws))

        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
