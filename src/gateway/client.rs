use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use super::error::CallError;
use super::types::{Endpoint, FormField, Method, Payload, ResponseBody, Service, TimeoutClass, TimeoutPolicy};

/// A single remote call with a timeout class.
///
/// Implementations never panic or leak transport errors: every failure comes
/// back as a [`CallError`]. No retries happen at this layer.
pub trait RemoteCall: Send + Sync {
    fn call(
        &self,
        endpoint: &Endpoint,
        payload: &Payload,
        timeout: TimeoutClass,
    ) -> impl Future<Output = Result<ResponseBody, CallError>> + Send;
}

/// Base URLs for every [`Service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrls {
    pub backend: String,
    pub gallery: String,
}

impl ServiceUrls {
    fn base(&self, service: Service) -> &str {
        match service {
            Service::Backend => &self.backend,
            Service::Gallery => &self.gallery,
        }
    }

    /// Absolute URL for an endpoint.
    pub fn url_for(&self, endpoint: &Endpoint) -> String {
        format!(
            "{}/{}",
            self.base(endpoint.service).trim_end_matches('/'),
            endpoint.path.trim_start_matches('/')
        )
    }
}

/// reqwest-backed gateway.
pub struct HttpGateway {
    client: Client,
    urls: ServiceUrls,
    timeouts: TimeoutPolicy,
}

impl HttpGateway {
    pub fn new(urls: ServiceUrls, timeouts: TimeoutPolicy, connect_timeout: Duration) -> Result<Self, CallError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CallError::Transport {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            urls,
            timeouts,
        })
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    fn request(&self, endpoint: &Endpoint, payload: &Payload, timeout: Duration) -> reqwest::RequestBuilder {
        let url = self.urls.url_for(endpoint);
        let builder = match endpoint.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .timeout(timeout);

        match payload {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(value),
            Payload::Query(pairs) => builder.query(pairs),
            Payload::Form(fields) => builder.multipart(build_form(fields)),
        }
    }
}

fn build_form(fields: &[FormField]) -> Form {
    fields.iter().fold(Form::new(), |form, field| match field {
        FormField::Text { name, value } => form.text(name.clone(), value.clone()),
        FormField::File {
            name,
            file_name,
            bytes,
        } => form.part(
            name.clone(),
            Part::bytes(bytes.to_vec()).file_name(file_name.clone()),
        ),
    })
}

/// Pull `detail` out of a FastAPI-style error body. Non-string details are
/// rendered as compact JSON.
fn extract_detail(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Null => None,
        serde_json::Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

fn normalize_send_error(endpoint: &Endpoint, timeout: Duration, err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout {
            endpoint: endpoint.path.trim_start_matches('/').to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        CallError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: format!("network error calling {endpoint}: {err}"),
        }
    }
}

impl RemoteCall for HttpGateway {
    async fn call(
        &self,
        endpoint: &Endpoint,
        payload: &Payload,
        timeout: TimeoutClass,
    ) -> Result<ResponseBody, CallError> {
        let duration = self.timeouts.duration(timeout);
        debug!(endpoint = %endpoint, timeout_ms = duration.as_millis() as u64, "calling remote endpoint");

        let response = self
            .request(endpoint, payload, duration)
            .send()
            .await
            .map_err(|e| normalize_send_error(endpoint, duration, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| normalize_send_error(endpoint, duration, e))?;

        if !status.is_success() {
            let code = status.as_u16();
            return Err(match extract_detail(&bytes) {
                Some(detail) => {
                    warn!(endpoint = %endpoint, status = code, %detail, "remote call failed");
                    CallError::RemoteDetail { status: code, detail }
                }
                None => {
                    warn!(endpoint = %endpoint, status = code, "remote call failed without detail");
                    CallError::Transport {
                        status: Some(code),
                        message: format!("Request failed with status code {code}"),
                    }
                }
            });
        }

        debug!(endpoint = %endpoint, status = status.as_u16(), bytes = bytes.len(), "remote call succeeded");
        Ok(ResponseBody::new(status.as_u16(), bytes.to_vec()))
    }
}
