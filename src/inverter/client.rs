use crate::prelude::*;

use reqwest::{Client, RequestBuilder, Response, StatusCode};

/// HTTP client for the inverter's bridge server. One `reqwest::Client` is
/// shared (cloned) between the poller and all writes, so they share the
/// connection pool.
#[derive(Clone, Debug)]
pub struct InverterClient {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    client: Client,
}

impl InverterClient {
    pub fn new(config: &config::Inverter) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow!("inverter client: failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: config.url().to_string(),
            username: config.username().clone(),
            password: config.password().clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /status`
    pub async fn status(&self) -> Result<StatusSnapshot, BridgeError> {
        self.get_document("status").await
    }

    /// `GET /config`
    pub async fn config(&self) -> Result<StatusSnapshot, BridgeError> {
        self.get_document("config").await
    }

    /// `PUT /config?key=..&value=..`
    pub async fn write_config(&self, key: &str, value: &str) -> Result<(), BridgeError> {
        let url = self.config_url(key, value);
        debug!("PUT {}", url);

        let response = self.authed(self.client.put(&url)).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }
        if let Some(err) = auth_error(status) {
            return Err(err);
        }

        let message = response.text().await.unwrap_or_default();
        Err(BridgeError::WriteRejected {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }

    /// Key and value are percent-encoded (spaces as %20, `&` as %26).
    pub fn config_url(&self, key: &str, value: &str) -> String {
        format!(
            "{}/config?key={}&value={}",
            self.base_url,
            urlencoding::encode(key),
            urlencoding::encode(value)
        )
    }

    async fn get_document(&self, path: &str) -> Result<StatusSnapshot, BridgeError> {
        let url = format!("{}/{}", self.base_url, path);
        trace!("GET {}", url);

        let response = self.authed(self.client.get(&url)).send().await?;
        let response = check_status(response)?;
        let time = chrono::Utc::now();
        let body = response.text().await?;

        StatusSnapshot::from_json(&body, time)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }
}

fn auth_error(status: StatusCode) -> Option<BridgeError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(BridgeError::Auth(status.as_u16())),
        _ => None,
    }
}

fn check_status(response: Response) -> Result<Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let Some(err) = auth_error(status) {
        return Err(err);
    }
    Err(BridgeError::Transport(format!("{} returned HTTP {}", response.url(), status.as_u16())))
}
