use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method,
};
use url::Url;

use crate::{CoordKvError, HttpRequest, Params, Result, RetryPolicy};

/// Caller-side description of one logical request.
///
/// The path is resolved against whichever endpoint an attempt targets, so
/// one request can be replayed against every member of the endpoint set.
#[derive(Clone, Debug)]
pub struct KvRequest {
    method: Method,
    path: String,
    params: Params,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    timeout: Option<Duration>,
}

impl KvRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::default(),
            headers: HeaderMap::new(),
            body: None,
            retry_policy: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Adds one parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(name, value);
        self
    }

    /// Replaces all parameters.
    pub fn params<P: Into<Params>>(mut self, params: P) -> Self {
        self.params = params.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sends `body` verbatim; parameters then go to the query string.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Overrides the client's default retry policy for this request.
    pub fn retry_policy<P: RetryPolicy + 'static>(self, policy: P) -> Self {
        self.shared_retry_policy(Arc::new(policy))
    }

    pub fn shared_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Overrides the client's per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    fn params_in_body(&self) -> bool {
        self.body.is_none()
            && !self.params.is_empty()
            && !matches!(self.method, Method::GET | Method::DELETE | Method::HEAD)
    }

    /// Resolves the request path and query against `endpoint`.
    pub(crate) fn url_for(&self, endpoint: &Url) -> Result<Url> {
        let mut url = endpoint.join(&self.path).map_err(|err| {
            CoordKvError::Config(format!(
                "invalid request path '{}' for {endpoint}: {err}",
                self.path
            ))
        })?;
        if !self.params.is_empty() && !self.params_in_body() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url)
    }

    pub(crate) fn to_http(
        &self,
        default_timeout: Option<Duration>,
        authorization: Option<&HeaderValue>,
    ) -> HttpRequest {
        let mut headers = self.headers.clone();
        if let Some(authorization) = authorization {
            headers
                .entry(header::AUTHORIZATION)
                .or_insert_with(|| authorization.clone());
        }

        let body = if self.params_in_body() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            Some(self.params.to_form().into_bytes())
        } else {
            self.body.clone()
        };

        HttpRequest {
            method: self.method.clone(),
            headers,
            body,
            timeout: self.timeout.or(default_timeout),
        }
    }
}
