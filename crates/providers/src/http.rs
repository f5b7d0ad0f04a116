//! Shared HTTP plumbing for the hosted backends.

use lampkit_core::ProviderError;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Build the client every hosted backend uses.
pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))
}

/// Map a response's status to a `ProviderError`, or decode its JSON body.
pub(crate) async fn decode<T: DeserializeOwned>(
    backend: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        return Err(ProviderError::RateLimited);
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{backend} rejected the API key"
        )));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(backend, status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::malformed(backend, format!("Failed to parse response: {e}")))
}
