//! Rotating-identity HTTP client for fetching archive indices and pastes.
//!
//! Grounded on `original_source/pystemon/ua.py`'s `UserAgent.download_url`:
//! throttle, pick a fresh proxy and UA string per attempt, issue the GET with
//! independent connect/read timeouts, classify the outcome, and retry through
//! two independent counters — `loop_client` for 404 and `loop_server` for
//! everything else worth retrying — each capped so a single pastie site
//! can't retry forever, sleeping a fixed wait (or the `Retry-After` hint on
//! 429) between attempts. The client builder shape (explicit timeouts, one
//! `reqwest::Client` per attempt when a proxy is in play) follows
//! `download/client.rs`; the classify/counter split and the `Retry-After`
//! parsing follow `download/retry.rs`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::seq::SliceRandom;
use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::proxy::ProxyList;
use crate::throttler::Throttler;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(3_050);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed wait applied before a retry when no more specific hint (like a
/// numeric `Retry-After`) applies.
const RETRY_WAIT: Duration = Duration::from_secs(60);

/// Retry cap for the one client-side condition worth retrying (404).
pub const LOOP_CLIENT_MAX: u32 = 5;
/// Retry cap for server-side conditions (429, 5xx, blocked, connection/timeout).
pub const LOOP_SERVER_MAX: u32 = 100;

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/121.0",
];

/// How a completed attempt should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx: caller gets the body.
    Success,
    /// 404: retried against `loop_client`, not forever.
    NotFound,
    /// 403 with a banner recognised as a known block/slowdown page.
    Blocked,
    /// Any other 403: not worth retrying.
    Forbidden,
    /// 429: rate limited, counts against `loop_server`.
    RateLimited,
    /// 500, 502, 504: counts against `loop_server`.
    ServerError,
    /// Any other non-2xx status: not worth retrying.
    OtherStatus,
    /// Connect/read timeout, counts against `loop_server`.
    Timeout,
    /// Transport-level failure (DNS, connection refused, TLS), counts
    /// against `loop_server`.
    ConnectionError,
    /// The task was cancelled by the caller (e.g. shutdown); not a failure
    /// worth recording against either counter.
    Cancelled,
}

impl Outcome {
    fn from_response(status: reqwest::StatusCode, body_prefix: &[u8]) -> Self {
        if status.is_success() {
            Outcome::Success
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Outcome::NotFound
        } else if status == reqwest::StatusCode::FORBIDDEN {
            if looks_like_block_page(body_prefix) {
                Outcome::Blocked
            } else {
                Outcome::Forbidden
            }
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Outcome::RateLimited
        } else if matches!(
            status,
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
                | reqwest::StatusCode::BAD_GATEWAY
                | reqwest::StatusCode::GATEWAY_TIMEOUT
        ) {
            Outcome::ServerError
        } else {
            Outcome::OtherStatus
        }
    }

    /// Whether this outcome counts against `loop_server` (`Some(true)`),
    /// against `loop_client` (`Some(false)`), or should abort with no retry
    /// at all (`None`).
    fn counts_against_server(self) -> Option<bool> {
        match self {
            Outcome::Success | Outcome::Forbidden | Outcome::OtherStatus | Outcome::Cancelled => {
                None
            }
            Outcome::NotFound => Some(false),
            Outcome::Blocked
            | Outcome::RateLimited
            | Outcome::ServerError
            | Outcome::Timeout
            | Outcome::ConnectionError => Some(true),
        }
    }

    /// Whether a failed attempt with this outcome should count against the
    /// proxy that was used (still a no-op when no proxy was in play).
    fn penalizes_proxy(self) -> bool {
        !matches!(self, Outcome::Success | Outcome::OtherStatus | Outcome::Cancelled)
    }

    /// Human-readable reason for an immediate abort, used in [`FetchError::Aborted`].
    fn abort_reason(self) -> &'static str {
        match self {
            Outcome::Forbidden => "403 forbidden",
            Outcome::OtherStatus => "unexpected HTTP status",
            Outcome::Cancelled => "cancelled",
            _ => "aborted",
        }
    }
}

fn looks_like_block_page(body_prefix: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body_prefix).to_ascii_lowercase();
    text.contains("access denied")
        || text.contains("cloudflare")
        || text.contains("just a moment")
        || text.contains("slow down")
        || text.contains("blocked")
        || text.contains("temporarily blocked your computer")
}

/// Resolves how long to wait before the next retry. Only `RateLimited`
/// consults `retry_after`, preferring a numeric delay-seconds value, then an
/// RFC 7231 HTTP-date, falling back to the fixed wait if neither parses.
fn retry_wait(outcome: Outcome, retry_after: Option<&str>) -> Duration {
    if outcome != Outcome::RateLimited {
        return RETRY_WAIT;
    }
    let Some(value) = retry_after else {
        return RETRY_WAIT;
    };
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Duration::from_secs(secs);
    }
    if let Ok(when) = httpdate::parse_http_date(value)
        && let Ok(remaining) = when.duration_since(SystemTime::now())
    {
        return remaining;
    }
    RETRY_WAIT
}

/// Errors fetching a URL that exhaust the retry budget or fail outright.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url}: {reason}")]
    Aborted { url: String, reason: &'static str },
    #[error("{url}: exhausted client-retry budget ({attempts} attempts)")]
    ClientRetriesExhausted { url: String, attempts: u32 },
    #[error("{url}: exhausted server-retry budget ({attempts} attempts)")]
    ServerRetriesExhausted { url: String, attempts: u32 },
    #[error("{url}: request build failed: {source}")]
    Build {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url}: empty response body")]
    EmptyContent { url: String },
}

/// Per-site HTTP fetcher: rotates proxy and User-Agent per attempt,
/// throttles, retries with independent client/server counters.
pub struct UserAgent {
    proxies: Option<Arc<ProxyList>>,
    throttler: Option<Arc<Throttler>>,
    user_agents: Vec<String>,
    base_client: Client,
}

impl UserAgent {
    /// Builds a fetcher. `proxies` is `None` when the site config carries no
    /// `proxy` key; `throttler` is `None` when throttling is disabled.
    pub fn new(
        proxies: Option<Arc<ProxyList>>,
        throttler: Option<Arc<Throttler>>,
        user_agents: Vec<String>,
    ) -> Result<Self, reqwest::Error> {
        let user_agents = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| (*s).to_string()).collect()
        } else {
            user_agents
        };
        let base_client = base_client_builder().build()?;
        Ok(Self {
            proxies,
            throttler,
            user_agents,
            base_client,
        })
    }

    fn random_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.user_agents[0])
    }

    async fn client_for_attempt(&self) -> Result<(Client, Option<String>), reqwest::Error> {
        let Some(proxies) = &self.proxies else {
            return Ok((self.base_client.clone(), None));
        };
        let Some(proxy_url) = proxies.random() else {
            return Ok((self.base_client.clone(), None));
        };
        let client = base_client_builder().proxy(Proxy::all(&proxy_url)?).build()?;
        Ok((client, Some(proxy_url)))
    }

    /// Fetches `url`, retrying on transient failures until one of the two
    /// retry budgets is exhausted. Returns the response body on success.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn download_url(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut loop_client = 0u32;
        let mut loop_server = 0u32;

        loop {
            if let Some(throttler) = &self.throttler {
                throttler.wait().await;
            }

            let (client, proxy_used) = match self.client_for_attempt().await {
                Ok(pair) => pair,
                Err(source) => {
                    return Err(FetchError::Build {
                        url: url.to_string(),
                        source,
                    });
                }
            };

            let outcome = self.attempt(&client, url).await;
            match outcome {
                Ok((Outcome::Success, body, _)) => return Ok(body),
                Ok((outcome, _, retry_after)) => {
                    self.record_failure(outcome, proxy_used.as_deref());
                    match outcome.counts_against_server() {
                        Some(true) => {
                            loop_server += 1;
                            if loop_server >= LOOP_SERVER_MAX {
                                return Err(FetchError::ServerRetriesExhausted {
                                    url: url.to_string(),
                                    attempts: loop_server,
                                });
                            }
                            debug!(?outcome, loop_server, "server retry");
                            tokio::time::sleep(retry_wait(outcome, retry_after.as_deref())).await;
                        }
                        Some(false) => {
                            loop_client += 1;
                            if loop_client >= LOOP_CLIENT_MAX {
                                return Err(FetchError::ClientRetriesExhausted {
                                    url: url.to_string(),
                                    attempts: loop_client,
                                });
                            }
                            debug!(?outcome, loop_client, "client retry");
                            tokio::time::sleep(RETRY_WAIT).await;
                        }
                        None => {
                            return Err(FetchError::Aborted {
                                url: url.to_string(),
                                reason: outcome.abort_reason(),
                            });
                        }
                    }
                }
                Err(outcome) => {
                    self.record_failure(outcome, proxy_used.as_deref());
                    loop_server += 1;
                    debug!(?outcome, loop_server, "transport error, retrying");
                    if loop_server >= LOOP_SERVER_MAX {
                        return Err(FetchError::ServerRetriesExhausted {
                            url: url.to_string(),
                            attempts: loop_server,
                        });
                    }
                    tokio::time::sleep(RETRY_WAIT).await;
                }
            }
        }
    }

    fn record_failure(&self, outcome: Outcome, proxy_used: Option<&str>) {
        if outcome.penalizes_proxy()
            && let Some(proxies) = &self.proxies
            && let Some(proxy) = proxy_used
        {
            proxies.fail(proxy);
        }
    }

    async fn attempt(&self, client: &Client, url: &str) -> Result<(Outcome, Vec<u8>, Option<String>), Outcome> {
        let response = client
            .get(url)
            .header(reqwest::header::USER_AGENT, self.random_user_agent())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                warn!(%error, "request timed out");
                return Err(Outcome::Timeout);
            }
            Err(error) => {
                warn!(%error, "request failed");
                return Err(Outcome::ConnectionError);
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "failed reading response body");
                return Err(Outcome::ConnectionError);
            }
        };
        let prefix_len = body.len().min(4096);
        let outcome = Outcome::from_response(status, &body[..prefix_len]);
        Ok((outcome, body.to_vec(), retry_after))
    }
}

fn base_client_builder() -> ClientBuilder {
    ClientBuilder::new()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .gzip(true)
        .cookie_store(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_url_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paste/1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let ua = UserAgent::new(None, None, Vec::new()).unwrap();
        let body = ua
            .download_url(&format!("{}/paste/1", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_url_not_found_retries_then_exhausts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(LOOP_CLIENT_MAX as u64)
            .mount(&server)
            .await;

        let ua = UserAgent::new(None, None, Vec::new()).unwrap();
        let err = ua
            .download_url(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::ClientRetriesExhausted { attempts, .. } if attempts == LOOP_CLIENT_MAX
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_url_blocked_retries_as_server_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(403).set_body_string("please slow down"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let ua = UserAgent::new(None, None, Vec::new()).unwrap();
        let body = ua.download_url(&format!("{}/slow", server.uri())).await.unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_download_url_forbidden_aborts_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/denied"))
            .respond_with(ResponseTemplate::new(403).set_body_string("plain forbidden page"))
            .expect(1)
            .mount(&server)
            .await;

        let ua = UserAgent::new(None, None, Vec::new()).unwrap();
        let err = ua
            .download_url(&format!("{}/denied", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Aborted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_url_retries_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let ua = UserAgent::new(None, None, Vec::new()).unwrap();
        let body = ua
            .download_url(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_url_rate_limited_honors_numeric_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let ua = UserAgent::new(None, None, Vec::new()).unwrap();
        let body = ua
            .download_url(&format!("{}/throttled", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, b"ok");
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            Outcome::from_response(reqwest::StatusCode::OK, b""),
            Outcome::Success
        );
        assert_eq!(
            Outcome::from_response(reqwest::StatusCode::TOO_MANY_REQUESTS, b""),
            Outcome::RateLimited
        );
        assert_eq!(
            Outcome::from_response(reqwest::StatusCode::BAD_GATEWAY, b""),
            Outcome::ServerError
        );
        assert_eq!(
            Outcome::from_response(reqwest::StatusCode::FORBIDDEN, b"plain body"),
            Outcome::Forbidden
        );
        assert_eq!(
            Outcome::from_response(reqwest::StatusCode::FORBIDDEN, b"Access Denied by WAF"),
            Outcome::Blocked
        );
        assert_eq!(
            Outcome::from_response(reqwest::StatusCode::FORBIDDEN, b"please slow down"),
            Outcome::Blocked
        );
        assert_eq!(
            Outcome::from_response(
                reqwest::StatusCode::FORBIDDEN,
                b"we have temporarily blocked your computer"
            ),
            Outcome::Blocked
        );
    }

    #[test]
    fn test_server_vs_client_counter_routing() {
        assert_eq!(Outcome::ServerError.counts_against_server(), Some(true));
        assert_eq!(Outcome::Timeout.counts_against_server(), Some(true));
        assert_eq!(Outcome::Blocked.counts_against_server(), Some(true));
        assert_eq!(Outcome::RateLimited.counts_against_server(), Some(true));
        assert_eq!(Outcome::NotFound.counts_against_server(), Some(false));
        assert_eq!(Outcome::Forbidden.counts_against_server(), None);
        assert_eq!(Outcome::OtherStatus.counts_against_server(), None);
    }

    #[test]
    fn test_penalizes_proxy_excludes_other_status_and_cancelled() {
        assert!(Outcome::NotFound.penalizes_proxy());
        assert!(Outcome::Forbidden.penalizes_proxy());
        assert!(Outcome::Timeout.penalizes_proxy());
        assert!(!Outcome::OtherStatus.penalizes_proxy());
        assert!(!Outcome::Cancelled.penalizes_proxy());
    }

    #[test]
    fn test_retry_wait_prefers_numeric_retry_after() {
        assert_eq!(
            retry_wait(Outcome::RateLimited, Some("5")),
            Duration::from_secs(5)
        );
        assert_eq!(retry_wait(Outcome::RateLimited, None), RETRY_WAIT);
        assert_eq!(retry_wait(Outcome::RateLimited, Some("not-a-number-or-date")), RETRY_WAIT);
        assert_eq!(retry_wait(Outcome::ServerError, Some("5")), RETRY_WAIT);
    }
}
