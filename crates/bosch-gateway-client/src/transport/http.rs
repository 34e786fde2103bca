use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bosch_gateway::crypto::Codec;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};

use tokio::sync::Mutex;

use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::retry::RetryPolicy;

use super::{Method, Request, RequestTimeout, USER_AGENT};

const JSON: &str = "application/json";

/// A request/response transport over the gateway local HTTP interface.
///
/// Requests are serialized: a gateway serves a single request at a time.
/// Transient failures are retried according to the configured
/// [`RetryPolicy`].
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    codec: Arc<Codec>,
    retry: RetryPolicy,
    timeout: Arc<RequestTimeout>,
    gate: Mutex<()>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub(crate) async fn connect(
        config: &GatewayConfig,
        codec: Arc<Codec>,
        timeout: Arc<RequestTimeout>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::transport(format!("Impossible to build the HTTP client: {e}")))?;

        let host = config.host();
        let base_url = if host.contains("://") {
            host.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };

        let transport = Self {
            client,
            base_url,
            codec,
            retry: config.retry_policy(),
            timeout,
            gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        };

        // Detect unreachable hosts and wrong keys right away.
        match transport.send_request(Request::get(config.probe().clone())).await {
            Ok(payload) => {
                if !payload.is_empty()
                    && serde_json::from_slice::<serde_json::Value>(&payload).is_err()
                {
                    return Err(Error::new(
                        ErrorKind::Crypto,
                        "The probe reply cannot be decoded, the key is probably wrong",
                    )
                    .with_path(config.probe()));
                }
            }
            Err(e) if e.kind() == ErrorKind::Device => {
                warn!("Probe of `{}` failed, the gateway is reachable: {e}", config.probe());
            }
            Err(e) => return Err(e.with_path(config.probe())),
        }

        debug!("Connected to gateway at {}", transport.base_url);
        Ok(transport)
    }

    pub(crate) async fn send_request(&self, request: Request) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::not_connected());
        }

        let body = request
            .body
            .as_deref()
            .map(|body| self.codec.seal(body))
            .transpose()?;

        let _gate = self.gate.lock().await;

        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            match self.attempt(&request, body.as_deref()).await {
                Ok(reply) => return Ok(reply),
                Err(Failure::Transient(e)) if attempt < attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "{} {} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}",
                        request.method, request.path
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Failure::Transient(e) | Failure::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        request: &Request,
        body: Option<&str>,
    ) -> std::result::Result<Vec<u8>, Failure> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("{} {url}", request.method);

        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Put => self
                .client
                .put(&url)
                .header(CONTENT_TYPE, JSON)
                .body(body.unwrap_or_default().to_owned()),
        };

        let response = builder
            .header(ACCEPT, JSON)
            .timeout(self.timeout.get())
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Failure::Fatal(Error::transport(format!(
                    "Authentication rejected with status {}",
                    status.as_u16()
                ))))
            }
            status if status.is_success() => {
                let text = response.text().await?;
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                Ok(self.codec.open(&text).map_err(Error::from)?)
            }
            status => Err(Failure::Fatal(Error::device(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown status"),
            ))),
        }
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed connection to gateway at {}", self.base_url);
        }
    }
}

// Failures which might not happen again, such as timeouts and refused or
// reset connections, are retried. Malformed requests and unreadable replies
// are not.
enum Failure {
    Transient(Error),
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

impl From<reqwest::Error> for Failure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::Transient(e.into())
        } else {
            Self::Fatal(e.into())
        }
    }
}
