//! HTTP delivery to a collector addressed by a DSN.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use courier_common::outgoing;
use url::Url;

use crate::{
    DsnError, ExecutorError,
    executor::{DeliveryRequest, DeliveryResponse, RequestExecutor, ResponseHeaders},
};

pub const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";
pub const AUTH_HEADER: &str = "X-Sentry-Auth";
const PROTOCOL_VERSION: u8 = 7;
const CLIENT_NAME: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Where to deliver envelopes and how to authenticate
///
/// `{scheme}://{public_key}[:{secret_key}]@{host}[:{port}]/{path/}{project_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    url: Url,
    public_key: String,
    secret_key: Option<String>,
    project_id: String,
}

impl Dsn {
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    #[must_use]
    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// `{scheme}://{host}[:{port}]/{path/}api/{project_id}/envelope/`
    #[must_use]
    pub fn envelope_endpoint(&self) -> Url {
        let mut endpoint = self.url.clone();
        // Credentials are sent in the auth header, not the URL.
        let _ = endpoint.set_username("");
        let _ = endpoint.set_password(None);

        let path = self.url.path();
        let prefix = path
            .rsplit_once('/')
            .map_or("", |(prefix, _project)| prefix)
            .trim_end_matches('/');

        endpoint.set_path(&format!("{prefix}/api/{}/envelope/", self.project_id));
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        endpoint
    }

    /// Value of the `X-Sentry-Auth` header.
    #[must_use]
    pub fn auth_header(&self) -> String {
        let mut header = format!(
            "Sentry sentry_version={PROTOCOL_VERSION}, sentry_client={CLIENT_NAME}, sentry_key={}",
            self.public_key
        );
        if let Some(secret) = &self.secret_key {
            header.push_str(", sentry_secret=");
            header.push_str(secret);
        }
        header
    }
}

impl FromStr for Dsn {
    type Err = DsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s.trim())?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(DsnError::UnsupportedScheme(url.scheme().to_string()));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(DsnError::MissingHost);
        }

        if url.username().is_empty() {
            return Err(DsnError::MissingPublicKey);
        }

        let project_id = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or(DsnError::MissingProjectId)?
            .to_string();

        Ok(Self {
            public_key: url.username().to_string(),
            secret_key: url.password().map(ToString::to_string),
            project_id,
            url,
        })
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Delivers envelopes with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: Url,
    auth: String,
}

impl HttpExecutor {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// # Errors
    /// If the HTTP client cannot be constructed (e.g. no TLS backend)
    pub fn new(dsn: &Dsn) -> Result<Self, ExecutorError> {
        Self::with_timeout(dsn, Self::DEFAULT_TIMEOUT)
    }

    /// # Errors
    /// If the HTTP client cannot be constructed (e.g. no TLS backend)
    pub fn with_timeout(dsn: &Dsn, timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(CLIENT_NAME)
            .build()
            .map_err(|err| ExecutorError::Request(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: dsn.envelope_endpoint(),
            auth: dsn.auth_header(),
        })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl From<reqwest::Error> for ExecutorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connectivity(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: DeliveryRequest) -> Result<DeliveryResponse, ExecutorError> {
        outgoing!(
            level = DEBUG,
            "POST {} envelope {} ({} bytes)",
            self.endpoint,
            request.envelope_id,
            request.body.len()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
            .header(AUTH_HEADER, &self.auth)
            .body(request.body)
            .send()
            .await?;

        let headers: ResponseHeaders = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
            .collect();

        Ok(DeliveryResponse {
            status: response.status().as_u16(),
            headers,
        })
    }
}
