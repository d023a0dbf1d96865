//! Fetching exposition bodies over HTTP(S), a Unix socket, or from a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper_util::rt::TokioIo;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Identity, StatusCode, Url};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::Instant;

use datakit_framework::ErrorType;

use crate::config::{AuthConfig, PromInputConfig};
use crate::error::{PromError, Result};

/// Timeout of the diagnostic TCP dial made after a failed fetch.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Where a target's body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// `authority` is `host[:port]` exactly as configured; [`Url`] drops
    /// explicit default ports.
    Http { url: Url, authority: String },
    File(PathBuf),
}

impl TargetKind {
    /// `http(s)://` URLs are fetched, `file://` URLs and plain paths are read.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PromError::config("empty url"));
        }

        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(TargetKind::File(PathBuf::from(path)));
        }

        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(raw)
                .map_err(|e| PromError::config(format!("invalid url '{}': {}", raw, e)))?;
            if url.host_str().is_none_or(str::is_empty) {
                return Err(PromError::config(format!("url '{}' has no host", raw)));
            }
            let authority = raw_authority(raw).to_string();
            return Ok(TargetKind::Http { url, authority });
        }

        if raw.contains("://") {
            return Err(PromError::config(format!("unsupported url scheme '{}'", raw)));
        }

        Ok(TargetKind::File(PathBuf::from(raw)))
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            TargetKind::Http { url, .. } => url.host_str(),
            TargetKind::File(_) => None,
        }
    }

    /// Host and port to dial, using the scheme's default port if needed.
    pub fn host_port(&self) -> Option<(String, u16)> {
        match self {
            TargetKind::Http { url, .. } => {
                let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']');
                Some((host.to_string(), url.port_or_known_default()?))
            }
            TargetKind::File(_) => None,
        }
    }

    /// `host[:port]` as written in the URL.
    pub fn instance(&self) -> Option<String> {
        match self {
            TargetKind::Http { authority, .. } => Some(authority.clone()),
            TargetKind::File(_) => None,
        }
    }
}

/// The `host[:port]` part of an absolute URL, without user info.
fn raw_authority(raw: &str) -> &str {
    let rest = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    authority.rsplit_once('@').map_or(authority, |(_, host)| host)
}

/// HTTP client configured for one input.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    headers: HeaderMap,
    auth: Option<AuthConfig>,
    uds_path: Option<PathBuf>,
    timeout: Duration,
}

impl Fetcher {
    pub fn from_config(config: &PromInputConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(keep_alive) = config.keep_alive {
            builder = builder.pool_idle_timeout(keep_alive);
        }

        if let Some(ca) = &config.tls_ca {
            let pem = read_file(ca, "tls_ca")?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| PromError::config(format!("invalid tls_ca: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        } else if config.tls_open {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
            let mut pem = read_file(cert, "tls_cert")?;
            pem.push(b'\n');
            pem.extend(read_file(key, "tls_key")?);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| PromError::config(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| PromError::config(format!("failed to build http client: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.http_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PromError::config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| PromError::config(format!("invalid value for header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            headers,
            auth: config.auth.clone(),
            uds_path: config.uds_path.clone(),
            timeout: config.timeout,
        })
    }

    /// Start fetching a target; the body is read through the returned stream.
    pub async fn open(&self, raw: &str, target: &TargetKind) -> Result<BodyStream> {
        let deadline = Instant::now() + self.timeout;
        let body = match target {
            TargetKind::File(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| PromError::fetch(raw, ErrorType::Fetch, e.to_string()))?;
                Body::Buffered(Some(data))
            }
            TargetKind::Http { url, .. } => {
                let request = self.request(raw, url).await?;
                match &self.uds_path {
                    Some(socket) => {
                        Body::Uds(self.send_uds(raw, socket, request, deadline).await?)
                    }
                    None => {
                        let response = self
                            .client
                            .execute(request)
                            .await
                            .map_err(|e| request_error(raw, &e))?;
                        check_status(raw, response.status())?;
                        Body::Http(response)
                    }
                }
            }
        };

        Ok(BodyStream {
            target: raw.to_string(),
            body,
            deadline,
        })
    }

    /// Fetch a whole body.
    pub async fn fetch(&self, raw: &str, target: &TargetKind) -> Result<Vec<u8>> {
        let mut stream = self.open(raw, target).await?;
        let mut body = Vec::new();
        while let Some(chunk) = stream.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn request(&self, raw: &str, url: &Url) -> Result<reqwest::Request> {
        let mut builder = self.client.get(url.clone()).headers(self.headers.clone());

        match &self.auth {
            Some(AuthConfig::BearerToken { token, token_file }) => {
                let token = match (token, token_file) {
                    (Some(token), _) => token.clone(),
                    (None, Some(path)) => tokio::fs::read_to_string(path)
                        .await
                        .map_err(|e| {
                            PromError::fetch(
                                raw,
                                ErrorType::ConfigError,
                                format!("read token file {}: {}", path.display(), e),
                            )
                        })?
                        .trim()
                        .to_string(),
                    (None, None) => {
                        return Err(PromError::config(
                            "bearer_token auth requires token or token_file",
                        ));
                    }
                };
                builder = builder.bearer_auth(token);
            }
            Some(AuthConfig::BasicAuth { username, password }) => {
                builder = builder.basic_auth(username, password.as_deref());
            }
            None => {}
        }

        builder
            .build()
            .map_err(|e| PromError::fetch(raw, ErrorType::Fetch, e.to_string()))
    }

    /// Send a request over a Unix socket, addressed to the URL's host.
    ///
    /// The whole exchange, body included, must finish before `deadline`.
    async fn send_uds(
        &self,
        raw: &str,
        socket: &Path,
        request: reqwest::Request,
        deadline: Instant,
    ) -> Result<Incoming> {
        let stream = tokio::time::timeout_at(deadline, UnixStream::connect(socket))
            .await
            .map_err(|_| PromError::fetch(raw, ErrorType::Timeout, "unix socket connect timed out"))?
            .map_err(|e| {
                PromError::fetch(
                    raw,
                    ErrorType::ConnectionRefused,
                    format!("dial {}: {}", socket.display(), e),
                )
            })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| PromError::fetch(raw, ErrorType::Fetch, e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Unix socket connection closed");
            }
        });

        let url = request.url();
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let mut builder = hyper::Request::builder()
            .method(request.method().clone())
            .uri(path)
            .header(hyper::header::HOST, url.host_str().unwrap_or("localhost"));
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        let hyper_request = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| PromError::fetch(raw, ErrorType::Fetch, e.to_string()))?;

        let response = tokio::time::timeout_at(deadline, sender.send_request(hyper_request))
            .await
            .map_err(|_| PromError::fetch(raw, ErrorType::Timeout, "request timed out"))?
            .map_err(|e| PromError::fetch(raw, ErrorType::Fetch, e.to_string()))?;
        check_status(raw, response.status())?;

        Ok(response.into_body())
    }
}

enum Body {
    Http(reqwest::Response),
    Uds(Incoming),
    Buffered(Option<Vec<u8>>),
}

/// A body being read chunk by chunk.
pub struct BodyStream {
    target: String,
    body: Body,
    /// Reads of a Unix socket body fail past this point. reqwest enforces
    /// its own timeout on HTTP bodies.
    deadline: Instant,
}

impl BodyStream {
    /// Next chunk of the body, or `None` once it is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match &mut self.body {
            Body::Http(response) => response
                .chunk()
                .await
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .map_err(|e| request_error(&self.target, &e)),
            Body::Uds(body) => loop {
                let frame = tokio::time::timeout_at(self.deadline, body.frame())
                    .await
                    .map_err(|_| {
                        PromError::fetch(&self.target, ErrorType::Timeout, "reading body timed out")
                    })?;
                match frame {
                    None => return Ok(None),
                    Some(Err(e)) => {
                        return Err(PromError::fetch(&self.target, ErrorType::Fetch, e.to_string()));
                    }
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            return Ok(Some(data.to_vec()));
                        }
                    }
                }
            },
            Body::Buffered(data) => Ok(data.take()),
        }
    }
}

/// Whether a TCP connection to `host:port` can be opened.
pub async fn dial_tcp(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

fn check_status(raw: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(PromError::fetch(
            raw,
            ErrorType::Fetch,
            format!("unexpected status {}", status),
        ))
    }
}

fn request_error(raw: &str, err: &reqwest::Error) -> PromError {
    let kind = if err.is_timeout() {
        ErrorType::Timeout
    } else if err.is_connect() {
        ErrorType::ConnectionRefused
    } else {
        ErrorType::Fetch
    };
    PromError::fetch(raw, kind, err.to_string())
}

fn read_file(path: &Path, option: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| PromError::config(format!("read {} {}: {}", option, path.display(), e)))
}
