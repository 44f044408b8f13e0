use base64::Engine;
use serde_json::Value;
use thiserror::Error;

/// Why a repository file could not be read as text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path is a directory")]
    Directory,

    #[error("path is a {0}, not a file")]
    NotAFile(String),

    #[error("failed to decode file content: {0}")]
    Decode(String),

    #[error("GitHub API error: {0}")]
    Api(String),
}

/// Decode a `GET /repos/{owner}/{repo}/contents/{path}` response body.
///
/// Directories come back as arrays, other entries as objects tagged with
/// `type`. Only base64-encoded files holding valid UTF-8 decode successfully.
pub fn decode_contents(value: Value) -> Result<String, ContentError> {
    if value.is_array() {
        return Err(ContentError::Directory);
    }

    let kind = value["type"].as_str().unwrap_or("unknown");
    if kind != "file" {
        return Err(ContentError::NotAFile(kind.to_string()));
    }

    let encoding = value["encoding"].as_str().unwrap_or("base64");
    if encoding != "base64" {
        return Err(ContentError::Decode(format!("unsupported encoding '{}'", encoding)));
    }

    // GitHub wraps the payload at 60 columns
    let encoded: String = value["content"]
        .as_str()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ContentError::Decode(e.to_string()))?;

    String::from_utf8(bytes).map_err(|e| ContentError::Decode(e.to_string()))
}
