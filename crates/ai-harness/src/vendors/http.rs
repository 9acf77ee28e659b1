//! HTTP plumbing shared by the vendor adapters.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::TryStreamExt as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;
use crate::options::AbortSignal;
use crate::provider::{ByteStream, ProviderRequest};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the client an adapter keeps for its lifetime.
///
/// `timeout` bounds each read, so it is the longest a stream may stay
/// silent; a long generation that keeps sending is never cut off.
pub(crate) fn build_client(vendor: &str, timeout: Duration) -> Result<reqwest::Client, HarnessError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .read_timeout(timeout)
        .build()
        .map_err(|e| HarnessError::Config(format!("failed to build {vendor} client: {e}")))
}

/// Layers header maps; later layers win, names compare case-insensitively.
pub(crate) fn merge_headers<'a>(
    layers: impl IntoIterator<Item = &'a BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (name, value) in layer {
            merged.insert(name.to_ascii_lowercase(), value.clone());
        }
    }
    merged
}

fn header_map(provider: &ProviderId, headers: &BTreeMap<String, String>) -> Result<HeaderMap, ProviderError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ProviderError::InvalidRequest {
            provider: provider.clone(),
            message: format!("invalid header name `{name}`: {e}"),
            status_code: None,
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| ProviderError::InvalidRequest {
            provider: provider.clone(),
            message: format!("invalid value for header `{name}`: {e}"),
            status_code: None,
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

fn transport_error(provider: &ProviderId, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.clone(),
            message: format!("request timed out: {err}"),
        }
    } else {
        ProviderError::network(provider.clone(), format!("request failed: {err}"))
    }
}

fn read_error(provider: &ProviderId, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.clone(),
            message: format!("stream stalled: {err}"),
        }
    } else {
        ProviderError::network(provider.clone(), format!("stream read failed: {err}"))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// POSTs `request` and returns the response body as a byte stream.
///
/// Non-success statuses are mapped through [`ProviderError::from_status`]
/// with the response body as message. An abort while waiting for headers
/// yields [`ProviderError::Aborted`].
pub(crate) async fn send_streaming(
    client: &reqwest::Client,
    request: &ProviderRequest,
    signal: Option<&AbortSignal>,
) -> Result<ByteStream, ProviderError> {
    let provider = request.provider.clone();
    let headers = header_map(&provider, &request.headers)?;
    debug!(provider = %provider, url = %request.url, "sending streaming request");
    let pending = client
        .post(&request.url)
        .headers(headers)
        .json(&request.body)
        .send();

    let response = match signal {
        Some(signal) => {
            tokio::select! {
                _ = signal.aborted() => return Err(ProviderError::aborted(provider)),
                response = pending => response,
            }
        }
        None => pending.await,
    }
    .map_err(|e| transport_error(&provider, &e))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after(response.headers());
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ProviderError::from_status(
            provider,
            status.as_u16(),
            &body,
            retry_after,
        ));
    }

    let stream_provider = provider.clone();
    Ok(Box::pin(
        response
            .bytes_stream()
            .map_err(move |e| read_error(&stream_provider, &e)),
    ))
}
