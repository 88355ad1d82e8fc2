use anyhow::{Result, anyhow};
use reqwest::Client;
use tracing::{info, warn};

/// Response header carrying the token.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Fetch the CSRF token from `{base_url}/api/csrf-token`.
///
/// `Ok(None)` means the server answered without the header.
pub async fn fetch_csrf_token(client: &Client, base_url: &str) -> Result<Option<String>> {
    let url = format!("{}/api/csrf-token", base_url.trim_end_matches('/'));

    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        return Err(anyhow!("CSRF token request failed: {}", response.status()));
    }

    let token = response
        .headers()
        .get(CSRF_HEADER)
        .map(|value| value.to_str().map(str::to_string))
        .transpose()?;

    Ok(token)
}

/// Startup variant: any failure is logged and requests go out without the header.
pub async fn fetch_csrf_token_or_none(client: &Client, base_url: &str) -> Option<String> {
    match fetch_csrf_token(client, base_url).await {
        Ok(Some(token)) => {
            info!("obtained CSRF token");
            Some(token)
        }
        Ok(None) => {
            warn!("CSRF endpoint returned no {} header", CSRF_HEADER);
            None
        }
        Err(e) => {
            warn!(error = %e, "failed to fetch CSRF token");
            None
        }
    }
}
