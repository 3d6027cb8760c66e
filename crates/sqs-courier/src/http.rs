//! Signed HTTP calls and named service actions.
//!
//! [`SignedHttpClient`] issues exactly one wire call per
//! [`SignedHttpClient::request`] and layers [`SignedHttpClient::action`] on top:
//! a form-encoded POST of a named remote operation whose failures are parsed
//! into [`ActionError`] and retried when the service reports a 5xx status.
//!
//! The wire itself sits behind [`HttpTransport`]. The default
//! [`ReqwestTransport`] wraps a single `reqwest::Client`, which is internally
//! reference counted and safe to use from many tasks at once, so one transport
//! instance is shared by every queue and listener built from the same client.

use crate::auth::{self, SigningRequest, DATE_HEADER};
use crate::config::{ClientConfig, Credentials};
use crate::error::{ActionError, QueueError, TransportError};
use crate::retry::{is_retryable, RetryPolicy};
use crate::xml::{XmlDocument, XmlPath};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Method;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

// ============================================================================
// Transport
// ============================================================================

/// Raw request handed to the transport, already signed
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Raw response returned by the transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Issue one request and return status, headers and body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the transport once; clones share the same connection pool.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            message: e.to_string(),
        }
    } else if e.is_connect() {
        TransportError::Connection {
            message: e.to_string(),
        }
    } else {
        TransportError::Request {
            message: e.to_string(),
        }
    }
}

// ============================================================================
// Requests and Responses
// ============================================================================

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Raw(Bytes),
    /// Percent-encoded as `k=v&...`, sorted by key
    Form(BTreeMap<String, String>),
}

impl RequestBody {
    fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Raw(bytes) => bytes,
            Self::Form(fields) => Bytes::from(auth::encode_pairs(&fields)),
        }
    }
}

/// A prepared, single-use signed request
///
/// The timestamp is captured when the request is prepared and reused for the
/// `x-amz-date` header and the signature. Once [`OutgoingRequest::send`] has
/// been called the request is spent: a second send fails with
/// [`QueueError::RequestAlreadySent`] instead of replaying a stale signature.
#[derive(Debug)]
pub struct OutgoingRequest {
    signing: SigningRequest,
    sent: bool,
}

impl OutgoingRequest {
    pub fn signing_request(&self) -> &SigningRequest {
        &self.signing
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Full URL including the encoded query string
    pub fn url(&self) -> Url {
        let mut url = self.signing.url.clone();
        if self.signing.query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&auth::encode_pairs(&self.signing.query)));
        }
        url
    }

    /// Sign and send the request. Exactly one wire call per request.
    pub async fn send(&mut self, transport: &dyn HttpTransport) -> Result<Response, QueueError> {
        if self.sent {
            return Err(QueueError::RequestAlreadySent {
                url: self.url().to_string(),
            });
        }
        self.sent = true;

        let signed = auth::sign(&self.signing)?;

        // Only the freshly computed Authorization header goes on the wire.
        let mut headers: Vec<(String, String)> = self
            .signing
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("authorization"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.push(("Authorization".to_string(), signed.authorization));

        let request = HttpRequest {
            method: self.signing.method.clone(),
            url: self.url(),
            headers,
            body: self.signing.body.clone(),
        };

        let response = transport.execute(request).await?;
        debug!(
            method = %self.signing.method,
            path = %self.signing.url.path(),
            status = response.status,
            "Signed request completed"
        );

        Ok(Response::new(response))
    }
}

/// Response with lazily parsed XML document
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    document: OnceLock<XmlDocument>,
}

impl Response {
    pub fn new(raw: HttpResponse) -> Self {
        Self {
            status: raw.status,
            headers: raw.headers,
            body: String::from_utf8_lossy(&raw.body).into_owned(),
            document: OnceLock::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body parsed as XML; parsed on first call and cached.
    pub fn document(&self) -> Result<&XmlDocument, QueueError> {
        if let Some(document) = self.document.get() {
            return Ok(document);
        }
        let parsed = XmlDocument::parse(&self.body)?;
        Ok(self.document.get_or_init(|| parsed))
    }

    /// Service error carried by a failed response
    pub fn action_error(&self) -> ActionError {
        let document = self.document().ok();
        let field = |path: XmlPath| document.and_then(|d| d.find_text(path));

        ActionError {
            error_type: field(XmlPath::ErrorType).unwrap_or_else(|| "Unknown".to_string()),
            code: field(XmlPath::ErrorCode).unwrap_or_else(|| format!("Http{}", self.status)),
            message: field(XmlPath::ErrorMessage)
                .unwrap_or_else(|| self.body.trim().to_string()),
            status: self.status,
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("body_length", &self.body.len())
            .finish()
    }
}

// ============================================================================
// Signed HTTP Client
// ============================================================================

/// Client that signs every call and runs named service actions
///
/// Cheap to share behind `Arc`; one instance serves any number of queue
/// clients and listener workers.
pub struct SignedHttpClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: Url,
    credentials: Credentials,
    region: String,
    service: String,
    api_version: String,
    retry_policy: RetryPolicy,
}

impl SignedHttpClient {
    /// Create a client with the default `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is incomplete or the transport
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, QueueError> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over an existing transport.
    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        Ok(Self {
            transport,
            endpoint: config.endpoint_url()?,
            credentials: config.credentials()?.clone(),
            region: config.region.clone(),
            service: config.service.clone(),
            api_version: config.api_version.clone(),
            retry_policy: config.retry.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Build a signed, single-use request against the configured endpoint.
    pub fn prepare(
        &self,
        method: Method,
        path: &str,
        query: BTreeMap<String, String>,
        body: RequestBody,
        headers: BTreeMap<String, String>,
    ) -> Result<OutgoingRequest, QueueError> {
        let timestamp = Utc::now();

        let mut url = self.endpoint.clone();
        url.set_path(if path.is_empty() { "/" } else { path });
        url.set_query(None);

        let mut headers = headers;
        if matches!(body, RequestBody::Form(_)) {
            headers
                .entry("content-type".to_string())
                .or_insert_with(|| FORM_CONTENT_TYPE.to_string());
        }
        headers.insert(DATE_HEADER.to_string(), auth::format_amz_date(&timestamp));

        let signing = SigningRequest {
            method,
            url,
            query,
            headers,
            body: body.into_bytes(),
            region: self.region.clone(),
            service: self.service.clone(),
            credentials: self.credentials.clone(),
            timestamp,
        };
        signing.validate()?;

        Ok(OutgoingRequest {
            signing,
            sent: false,
        })
    }

    /// Issue exactly one signed call.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: BTreeMap<String, String>,
        body: RequestBody,
        headers: BTreeMap<String, String>,
    ) -> Result<Response, QueueError> {
        let mut request = self.prepare(method, path, query, body, headers)?;
        request.send(self.transport.as_ref()).await
    }

    /// Run a named remote action as a form POST.
    ///
    /// `Action` and `Version` are merged into `params`. A non-2xx response is
    /// returned as [`QueueError::Action`]. Responses with a 5xx status are
    /// retried up to the policy's `max_retries` times, each attempt freshly
    /// signed; anything else surfaces immediately.
    pub async fn action(
        &self,
        name: &str,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> Result<Response, QueueError> {
        let mut fields = params;
        fields.insert("Action".to_string(), name.to_string());
        fields
            .entry("Version".to_string())
            .or_insert_with(|| self.api_version.clone());

        let mut retries = 0;
        loop {
            match self.action_once(path, fields.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) && self.retry_policy.should_retry(retries) => {
                    retries += 1;
                    warn!(
                        action = name,
                        attempt = retries + 1,
                        max_attempts = self.retry_policy.total_attempts(),
                        error = %e,
                        "Service error, retrying action"
                    );
                    let delay = self.retry_policy.delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn action_once(
        &self,
        path: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<Response, QueueError> {
        let response = self
            .request(
                Method::POST,
                path,
                BTreeMap::new(),
                RequestBody::Form(fields),
                BTreeMap::new(),
            )
            .await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(QueueError::Action(response.action_error()))
        }
    }
}

impl fmt::Debug for SignedHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedHttpClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("service", &self.service)
            .field("credentials", &self.credentials)
            .finish()
    }
}
