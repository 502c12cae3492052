//! Provider-auth retry wrapper.
//!
//! Some providers hand out short-lived credentials that can be refreshed
//! transparently; a single retry after an auth-flavored failure covers
//! the refresh window. For every other provider the wrapper is a
//! pass-through: the operation runs once and its error is returned
//! verbatim.

use std::future::Future;

const AUTH_RETRY_PROVIDERS: &[&str] = &["anthropic", "openai-codex"];

/// Provider prefix of a model id (`anthropic:claude-sonnet-4` → `anthropic`).
pub fn provider_of(model_id: &str) -> &str {
    model_id.split(':').next().unwrap_or(model_id)
}

fn is_auth_failure(error: &str) -> bool {
    let error = error.to_ascii_lowercase();
    error.contains("401") || error.contains("unauthorized") || error.contains("token expired")
}

pub async fn run_with_provider_auth_retry<T, F, Fut>(model_id: &str, op: F) -> Result<T, String>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let first = op().await;
    if !AUTH_RETRY_PROVIDERS.contains(&provider_of(model_id)) {
        return first;
    }
    match first {
        Err(error) if is_auth_failure(&error) => {
            tracing::debug!(%model_id, %error, "retrying after provider auth failure");
            op().await
        }
        other => other,
    }
}
