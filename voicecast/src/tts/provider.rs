//! HTTP plumbing for the two external TTS providers.
//!
//! Both providers are opaque HTTP collaborators; this module only knows
//! how to shape a request and classify the response status. Decoding the
//! primary provider's body lives in [`crate::tts::decode`].

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Serialize;

use crate::error::CoreError;

/// User-Agent sent to the fallback provider, which rejects unfamiliar
/// clients.
const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Serialize)]
struct PrimaryRequestBody<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Builds the shared [`Client`] used for all TTS provider calls, with a
/// bounded redirect policy (providers should never issue more than a
/// handful of hops).
#[must_use]
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(6))
        .build()
        .expect("TLS backend initialization must not fail")
}

/// Issues the primary provider request and returns the still-streaming
/// response once a successful status line has been observed.
///
/// # Errors
///
/// Returns [`CoreError::ProviderStatus`] on a non-2xx response and
/// [`CoreError::Other`] if the request could not even be sent.
pub async fn request_primary(
    client: &Client,
    url: &url::Url,
    text: &str,
    voice: &str,
) -> Result<Response, CoreError> {
    let resp = client
        .post(url.clone())
        .json(&PrimaryRequestBody { text, voice })
        .send()
        .await
        .map_err(|err| CoreError::Other(err.to_string()))?;
    classify_status(resp)
}

/// Issues the fallback (translator) provider request and returns the
/// still-streaming response once a successful status line has been
/// observed. The response body is opaque MP3 and is forwarded verbatim.
///
/// # Errors
///
/// Returns [`CoreError::ProviderStatus`] on a non-2xx response and
/// [`CoreError::Other`] if the request could not even be sent.
pub async fn request_fallback(
    client: &Client,
    url: &url::Url,
    text: &str,
) -> Result<Response, CoreError> {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("ie", "UTF-8")
        .append_pair("q", text)
        .append_pair("tl", "en")
        .append_pair("client", "tw-ob");

    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, FALLBACK_USER_AGENT)
        .send()
        .await
        .map_err(|err| CoreError::Other(err.to_string()))?;
    classify_status(resp)
}

fn classify_status(resp: Response) -> Result<Response, CoreError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(CoreError::ProviderStatus(status.as_u16()))
    }
}

/// Returns `true` if `status` should additionally mark the requested
/// voice as failed (server-side provider trouble, not a client error).
#[must_use]
pub fn is_server_failure(err: &CoreError) -> bool {
    matches!(err, CoreError::ProviderStatus(code) if *code >= 500)
}
