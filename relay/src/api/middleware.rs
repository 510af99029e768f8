use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::server::AppState;

/// API credential sent by the client, if any
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiCredential(pub Option<String>);

/// Capture the configured credential header into request extensions.
///
/// No policy is applied here: requests without the header pass through with
/// an empty credential, and handlers decide what to store on the session.
pub async fn capture_credential(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credential = request
        .headers()
        .get(state.config.server.credential_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    request.extensions_mut().insert(ApiCredential(credential));
    next.run(request).await
}
