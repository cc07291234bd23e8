// dashboard/transport.rs
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::ClientError;

/// Url-encoded form fields, in order.
pub type Form = Vec<(String, String)>;

/// Builds a gateway query form for `reqtype` with the `request` flag set.
pub fn query(reqtype: &str, params: &[(&str, String)]) -> Form {
    let mut form = vec![
        ("request".to_string(), "True".to_string()),
        ("reqtype".to_string(), reqtype.to_string()),
    ];
    form.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));
    form
}

/// Looks up a field in a form.
pub fn field<'a>(form: &'a Form, name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Posts `form` to the gateway query endpoint and returns the reply body.
    async fn post(&self, form: Form) -> Result<String, ClientError>;
}

/// Talks to a running gateway over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, form: Form) -> Result<String, ClientError> {
        debug!(url = %self.url, reqtype = field(&form, "reqtype"), "Posting query");
        let response = self.client.post(&self.url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
