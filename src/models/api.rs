use serde::{Deserialize, Serialize};

/// Envelope used by the main content service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Envelope used by the AI service. Extra fields stay on the flattened object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiEnvelope {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "postCount")]
    pub post_count: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    #[serde(rename = "postCount", default)]
    pub post_count: u32,
}
