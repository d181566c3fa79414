//! HTTP side-channel.
//!
//! A small REST surface next to the control channel, mirroring the device's
//! debug endpoints: the serialized config document, the firmware version and
//! a restart trigger. Everything UI-related stays on the WebSocket channel.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::dispatch::PanelContext;

/// Build the side-channel router.
pub fn router(ctx: PanelContext) -> Router {
    Router::new()
        .route("/config", get(config_handler))
        .route("/version", get(version_handler))
        .route("/restart", get(restart_handler).post(restart_handler))
        .with_state(ctx)
}

/// The full serialized document store.
async fn config_handler(State(ctx): State<PanelContext>) -> impl IntoResponse {
    let body = ctx.store().lock().unwrap().serialize();
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
}

async fn version_handler() -> &'static str {
    concat!("panelui ver: ", env!("CARGO_PKG_VERSION"))
}

/// Raise the reboot flag; the housekeeping loop acts on it.
async fn restart_handler(State(ctx): State<PanelContext>) -> &'static str {
    ctx.request_reboot();
    "Ok"
}
