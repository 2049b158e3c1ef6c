use serde_json::Value;
use thiserror::Error;

/// Failure taxonomy for the studio core.
///
/// Composition and normalization never fail on malformed *output* (they
/// degrade to fallbacks); they fail on missing required *input*. Remote
/// failures are classified once, at the top of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    /// Required input missing; surfaced before any remote call.
    #[error("{0}")]
    Validation(String),
    /// Image-to-branch classification returned an empty or out-of-enum
    /// label; aborts the two-step analysis flow before the second call.
    #[error("could not classify the image: {0}")]
    Classification(String),
    /// Image generation returned zero artifacts.
    #[error("AI did not return any images")]
    GenerationEmpty,
    /// Image edit returned no image content part. Treated as a policy
    /// refusal; the remote signals it only by absence of content.
    #[error("AI did not return an image; it might have refused the request")]
    GenerationRefused,
    /// The remote reported resource exhaustion.
    #[error("API usage limit reached; check your plan or try again shortly")]
    QuotaExceeded,
    /// Any other network or remote-side failure.
    #[error("{0}")]
    Transport(String),
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> StudioError {
        StudioError::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> StudioError {
        StudioError::Transport(message.into())
    }

    /// Best-effort JSON unwrap of a remote failure payload. A structured
    /// `RESOURCE_EXHAUSTED` status becomes `QuotaExceeded`; an embedded
    /// `error.message` replaces the raw body; anything else passes through
    /// as-is.
    pub fn from_remote_payload(raw: &str) -> StudioError {
        if let Ok(parsed) = serde_json::from_str::<Value>(raw.trim()) {
            if let Some(error) = parsed.get("error") {
                let status = error.get("status").and_then(Value::as_str).unwrap_or("");
                if status == "RESOURCE_EXHAUSTED" {
                    return StudioError::QuotaExceeded;
                }
                if let Some(message) = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|message| !message.is_empty())
                {
                    return StudioError::Transport(message.to_string());
                }
            }
        }
        StudioError::Transport(raw.trim().to_string())
    }
}
