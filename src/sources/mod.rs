//! Source clients and shared HTTP utilities for the upstream drug-data APIs.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::cache::{ResponseCache, cache_ttl};
use crate::error::DrugFactsError;
use crate::record::SourceName;

pub(crate) mod dailymed;
pub(crate) mod openfda;
pub(crate) mod pubchem;
pub(crate) mod pubmed;
pub(crate) mod rxnorm;

const ERROR_BODY_MAX_BYTES: usize = 2048;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    std::env::var(env_var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Cow::Owned)
        .unwrap_or_else(|| Cow::Borrowed(default))
}

pub(crate) fn ncbi_api_key() -> Option<String> {
    std::env::var("NCBI_API_KEY")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn openfda_api_key() -> Option<String> {
    std::env::var("OPENFDA_API_KEY")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Returns a shared HTTP client with retry middleware.
///
/// - Retry: 3 attempts with exponential backoff for transient errors
/// - Timeouts: 30s per request, 10s connect
pub(crate) fn shared_client() -> Result<ClientWithMiddleware, DrugFactsError> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("drugfacts/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(DrugFactsError::HttpClientInit)?;

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

    let client = ClientBuilder::new(base_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

    match HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| DrugFactsError::Api {
                api: "http-client".into(),
                message: "Shared HTTP client initialization race".into(),
            }),
    }
}

/// Reads a typed payload back out of the response cache. A payload that no
/// longer deserializes (shape drift across versions) is treated as a miss.
pub(crate) fn cache_lookup<T: DeserializeOwned>(
    cache: &dyn ResponseCache,
    source: SourceName,
    name: &str,
) -> Option<T> {
    let payload = cache.get(source, name)?;
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(source = %source, name, "discarding unreadable cache payload: {err}");
            None
        }
    }
}

/// Stores a successful fetch result. Serialization failures are logged and
/// skipped; the fetch result itself is unaffected.
pub(crate) fn cache_store<T: Serialize>(
    cache: &dyn ResponseCache,
    source: SourceName,
    name: &str,
    value: &T,
) {
    match serde_json::to_value(value) {
        Ok(payload) => cache.put(source, name, payload, cache_ttl()),
        Err(err) => warn!(source = %source, name, "failed to serialize cache payload: {err}"),
    }
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);

    let truncated: &str = if full.len() > ERROR_BODY_MAX_BYTES {
        let mut end = ERROR_BODY_MAX_BYTES;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        &full[..end]
    } else {
        full.as_ref()
    };

    let mut s = truncated.trim().replace(['\n', '\r', '\t'], " ");
    if full.len() > ERROR_BODY_MAX_BYTES {
        s.push_str(" …");
    }
    s
}

pub(crate) async fn read_limited_body(
    mut resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, DrugFactsError> {
    let mut body: Vec<u8> = Vec::new();

    while let Some(chunk) = resp.chunk().await? {
        let next_len = body.len().saturating_add(chunk.len());
        if next_len > DEFAULT_MAX_BODY_BYTES {
            return Err(DrugFactsError::Api {
                api: api.to_string(),
                message: format!("Response body exceeded {DEFAULT_MAX_BODY_BYTES} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Shared GET-and-decode path for the source clients: non-2xx becomes an
/// `Api` error carrying a bounded body excerpt, malformed JSON an `ApiJson`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    api: &str,
    req: reqwest_middleware::RequestBuilder,
) -> Result<T, DrugFactsError> {
    let resp = req.send().await?;
    let status = resp.status();
    let bytes = read_limited_body(resp, api).await?;

    if !status.is_success() {
        let excerpt = body_excerpt(&bytes);
        return Err(DrugFactsError::Api {
            api: api.to_string(),
            message: format!("HTTP {status}: {excerpt}"),
        });
    }

    serde_json::from_slice(&bytes).map_err(|source| DrugFactsError::ApiJson {
        api: api.to_string(),
        source,
    })
}

pub(crate) fn validate_drug_name(name: &str) -> Result<&str, DrugFactsError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DrugFactsError::InvalidArgument(
            "Drug name is required. Example: drugfacts fetch warfarin".into(),
        ));
    }
    if name.len() > 256 {
        return Err(DrugFactsError::InvalidArgument("Drug name is too long.".into()));
    }
    Ok(name)
}
