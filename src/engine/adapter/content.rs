//! Content Endpoint Client
//!
//! Remote rows are addressed by `content://authority/path` identifiers. The
//! HTTP resolver maps each identifier onto a content provider served by
//! `engine::provider` and speaks its JSON protocol:
//!
//! - `POST /content/{authority}/{table}/query`  -> `Cursor`
//! - `POST /content/{authority}/{table}/insert` -> `201 {"uri": ...}`
//! - `POST /content/{authority}/{table}/update` -> `{"affected": n}`
//! - `POST /content/{authority}/{table}/delete` -> `{"affected": n}`

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::runtime::Handle;

use super::{AdapterError, AdapterResult, ContentResolver, Cursor, RowValues};
use crate::engine::error::{QueryError, Result};

const SCHEME_PREFIX: &str = "content://";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A `content://` resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentUri {
    authority: String,
    segments: Vec<String>,
}

impl ContentUri {
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(SCHEME_PREFIX).ok_or_else(|| {
            QueryError::InvalidEndpoint(format!("only content:// identifiers can address an endpoint: {}", s))
        })?;

        let mut parts = rest.split('/').filter(|p| !p.is_empty());
        let authority = parts
            .next()
            .ok_or_else(|| QueryError::InvalidEndpoint(format!("missing authority: {}", s)))?
            .to_string();

        Ok(Self {
            authority,
            segments: parts.map(str::to_string).collect(),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path_segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last_path_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// This identifier with one more path segment, e.g. a row id
    pub fn with_appended(&self, segment: impl fmt::Display) -> Self {
        let mut uri = self.clone();
        uri.segments.push(segment.to_string());
        uri
    }
}

impl fmt::Display for ContentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME_PREFIX, self.authority)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for ContentUri {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default)]
    pub selection_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertRequest {
    pub values: RowValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertResponse {
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub values: RowValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default)]
    pub selection_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default)]
    pub selection_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

/// Blocking HTTP client for content providers
pub struct HttpContentResolver {
    base_url: String,
    client: Client,
}

impl HttpContentResolver {
    pub fn new(base_url: &str) -> AdapterResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Safe to call from inside a tokio runtime: the blocking client is then
    /// built on a plain thread, since it must not be created on an async one.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> AdapterResult<Self> {
        let build = move || {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| AdapterError::Connection(e.to_string()))
        };
        let client = if Handle::try_current().is_ok() {
            std::thread::Builder::new()
                .name("airquery-http-init".to_string())
                .spawn(build)
                .map_err(|e| AdapterError::Internal(e.to_string()))?
                .join()
                .map_err(|_| AdapterError::Internal("HTTP client construction panicked".to_string()))??
        } else {
            build()?
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, uri: &ContentUri, action: &str) -> String {
        format!(
            "{}/content/{}/{}/{}",
            self.base_url,
            uri.authority(),
            uri.path_segments().join("/"),
            action
        )
    }

    fn post<B: Serialize>(&self, uri: &ContentUri, action: &str, body: &B) -> AdapterResult<Response> {
        self.client
            .post(self.endpoint(uri, action))
            .json(body)
            .send()
            .map_err(|e| AdapterError::Connection(e.to_string()))
    }

    fn expect_success(response: Response, uri: &ContentUri) -> AdapterResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            Err(AdapterError::NotFound(format!("{}: {}", uri, body)))
        } else {
            Err(AdapterError::Query(format!("{} answered {}: {}", uri, status, body)))
        }
    }

    fn affected(response: Response, uri: &ContentUri) -> AdapterResult<u64> {
        let body: AffectedResponse = Self::expect_success(response, uri)?
            .json()
            .map_err(|e| AdapterError::Internal(e.to_string()))?;
        Ok(body.affected)
    }
}

impl ContentResolver for HttpContentResolver {
    fn query(
        &self,
        uri: &ContentUri,
        projection: Option<&[String]>,
        selection: Option<&str>,
        args: &[String],
        sort: Option<&str>,
    ) -> AdapterResult<Option<Cursor>> {
        let request = QueryRequest {
            projection: projection.map(<[String]>::to_vec),
            selection: selection.map(str::to_string),
            selection_args: args.to_vec(),
            sort: sort.map(str::to_string),
        };
        let response = self.post(uri, "query", &request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let cursor = Self::expect_success(response, uri)?
            .json()
            .map_err(|e| AdapterError::Internal(e.to_string()))?;
        Ok(Some(cursor))
    }

    fn insert(&self, uri: &ContentUri, values: &RowValues) -> AdapterResult<Option<ContentUri>> {
        let request = InsertRequest {
            values: values.clone(),
        };
        let response = self.post(uri, "insert", &request)?;
        if !response.status().is_success() {
            tracing::debug!(uri = %uri, status = %response.status(), "Provider refused insert");
            return Ok(None);
        }
        let body: InsertResponse = response
            .json()
            .map_err(|e| AdapterError::Internal(e.to_string()))?;
        ContentUri::parse(&body.uri)
            .map(Some)
            .map_err(|e| AdapterError::Validation(e.to_string()))
    }

    fn update(
        &self,
        uri: &ContentUri,
        values: &RowValues,
        selection: Option<&str>,
        args: &[String],
    ) -> AdapterResult<u64> {
        let request = UpdateRequest {
            values: values.clone(),
            selection: selection.map(str::to_string),
            selection_args: args.to_vec(),
        };
        let response = self.post(uri, "update", &request)?;
        Self::affected(response, uri)
    }

    fn delete(&self, uri: &ContentUri, selection: Option<&str>, args: &[String]) -> AdapterResult<u64> {
        let request = DeleteRequest {
            selection: selection.map(str::to_string),
            selection_args: args.to_vec(),
        };
        let response = self.post(uri, "delete", &request)?;
        Self::affected(response, uri)
    }
}
