use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State, WebSocketUpgrade}, response::Response};

use crate::{
    chat::{BroadcasterError, BroadcasterHandle, UserSocket},
    domain::Registry,
    AppResult, AppState,
};

/// Upgrades to a WebSocket session for `user`, creating the user on first
/// contact. A user may hold one session at a time.
#[debug_handler(state = AppState)]
pub(crate) async fn user_ws(
    Path(user_name): Path<String>,
    State(registry): State<Arc<Registry>>,
    State(broadcaster): State<BroadcasterHandle>,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let (user, created) = registry.find_or_create_user(&user_name);
    if created {
        tracing::info!(user = %user.name, "new user");
    }

    let live = match broadcaster.is_registered(&user.name).await {
        Ok(live) => live,
        Err(e) => {
            if created {
                forget_user(&registry, &user.name);
            }
            return Err(e.into());
        }
    };
    if live {
        tracing::warn!(user = %user.name, "rejecting second connection");
        return Err(BroadcasterError::AlreadyRegistered(user.name.clone()).into());
    }

    let failed_user = user.name.clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            tracing::warn!(user = %failed_user, error = %e, "websocket upgrade failed");
            if created {
                forget_user(&registry, &failed_user);
            }
        })
        .on_upgrade(move |socket| UserSocket::new(user, broadcaster).serve(socket)))
}

/// Gives back a name created for a session that never started, so the
/// client can retry.
fn forget_user(registry: &Registry, name: &str) {
    match registry.remove_user(name) {
        Ok(()) => tracing::info!(user = %name, "rolled back new user"),
        Err(e) => tracing::warn!(user = %name, error = %e, "could not roll back user"),
    }
}
