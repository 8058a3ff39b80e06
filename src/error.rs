use thiserror::Error;

/// Errors talking to the inverter's HTTP bridge.
///
/// Kept `Clone` so results can travel over the broadcast channels, which is
/// why the underlying reqwest/serde errors are flattened to strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Connection refused, DNS failure, request timeout etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// 401/403 from the bridge server
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    /// Body was not a JSON object, or not what we expected
    #[error("parse error: {0}")]
    Parse(String),

    /// Non-2xx on a config write
    #[error("write rejected (HTTP {status}): {message}")]
    WriteRejected { status: u16, message: String },

    /// Refused locally before anything was sent
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl BridgeError {
    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::Auth(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return BridgeError::Auth(status.as_u16());
            }
        }
        // a timeout while reading the body surfaces wrapped as a decode error
        if err.is_timeout() {
            return BridgeError::Transport(err.to_string());
        }
        if err.is_decode() {
            return BridgeError::Parse(err.to_string());
        }
        BridgeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Parse(err.to_string())
    }
}
