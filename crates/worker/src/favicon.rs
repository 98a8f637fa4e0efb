//! Favicon resolution for loaded pages.
//!
//! The page declares an icon URL; fetching it happens host-side with a short
//! timeout so a slow icon server never stalls tab metadata. Every failure
//! mode collapses to an empty favicon.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::time::timeout;
use tracing::debug;
use vitrine_engine::{DEFAULT_TIMEOUT, FAVICON_TIMEOUT, PageHandle};

/// Resolves the favicon of `page` as a data URI, or `""`.
pub async fn resolve(client: &reqwest::Client, page: &Arc<dyn PageHandle>) -> String {
    let icon_url = match timeout(DEFAULT_TIMEOUT, page.icon_url()).await {
        Ok(Ok(url)) if !url.is_empty() => url,
        _ => return String::new(),
    };

    // Pages that declare a data URI icon need no fetch at all.
    if icon_url.starts_with("data:") {
        return icon_url;
    }

    match fetch_as_data_uri(client, &icon_url).await {
        Some(data_uri) => data_uri,
        None => {
            debug!(target = "vitrine", url = %icon_url, "favicon fetch failed");
            String::new()
        }
    }
}

async fn fetch_as_data_uri(client: &reqwest::Client, url: &str) -> Option<String> {
    let response = client
        .get(url)
        .timeout(FAVICON_TIMEOUT)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)?
        .to_str()
        .ok()?
        .split(';')
        .next()?
        .trim()
        .to_string();
    if !mime.starts_with("image/") {
        return None;
    }

    let bytes = response.bytes().await.ok()?;
    Some(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
}
