use crate::ids::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded response to an executed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub id: Id,
    /// Live request the call was made for.
    pub http_id: Id,
    pub snapshot_id: Id,
    pub status: u16,
    /// UTF-8 body, or base64 when `body_base64` is set.
    pub body: String,
    #[serde(default)]
    pub body_base64: bool,
    pub duration_ms: u64,
    pub size: u64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseHeader {
    pub id: Id,
    pub response_id: Id,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseAssert {
    pub id: Id,
    pub response_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_id: Option<Id>,
    pub expression: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
