// ── Reply envelope ────────────────────────────────────────────────────────────
//
// Every operation that crosses the front-end boundary settles into
// `{ "success": true, ...payload }` or `{ "success": false, "error": "..." }`.

use crate::error::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply<T> {
    pub success: bool,
    #[serde(flatten)]
    pub payload: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for operations that only report success or failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

impl<T: Default> Reply<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: T::default(),
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        if self.success {
            Ok(self.payload)
        } else {
            Err(self.error.unwrap_or_else(|| "Unknown error".into()))
        }
    }
}

impl<T: Default> From<Result<T, Error>> for Reply<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(payload) => Reply::ok(payload),
            Err(e) => Reply::failed(e.to_string()),
        }
    }
}
