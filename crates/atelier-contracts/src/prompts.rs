use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strategy selector for instruction composition. A variant selector, not a
/// set of flags: `focused` and `super` share the branch requirement,
/// `in_depth` and `super` share professional-detail injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Freestyle,
    Focused,
    InDepth,
    Super,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 4] = [
        AnalysisMode::Freestyle,
        AnalysisMode::Focused,
        AnalysisMode::InDepth,
        AnalysisMode::Super,
    ];

    pub fn key(self) -> &'static str {
        match self {
            AnalysisMode::Freestyle => "freestyle",
            AnalysisMode::Focused => "focused",
            AnalysisMode::InDepth => "in_depth",
            AnalysisMode::Super => "super",
        }
    }

    pub fn from_key(raw: &str) -> Option<AnalysisMode> {
        let normalized = raw.trim().to_ascii_lowercase();
        AnalysisMode::ALL
            .into_iter()
            .find(|mode| mode.key() == normalized)
    }

    /// Whether composition must be anchored to a catalog branch.
    pub fn requires_branch(self) -> bool {
        matches!(self, AnalysisMode::Focused | AnalysisMode::Super)
    }

    /// Whether the strategy demands professional camera/lighting detail.
    pub fn injects_professional_detail(self) -> bool {
        matches!(self, AnalysisMode::InDepth | AnalysisMode::Super)
    }
}

/// Canonical bilingual result of a text-composition request. Both fields
/// are non-empty after `normalize_prompt_response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    pub english: String,
    pub vietnamese: String,
}

pub const FALLBACK_ENGLISH: &str = "Did not receive a valid response from AI.";
pub const FALLBACK_VIETNAMESE: &str = "Không nhận được phản hồi hợp lệ từ AI.";

/// Recognized shapes of a structured-text response, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// Top-level `{english, vietnamese}` object.
    Bilingual(PromptPair),
    /// `{descriptions: {english, vietnamese}}`, used by the in-depth
    /// image-analysis dual-paragraph path.
    Nested(PromptPair),
    /// Anything else: the trimmed raw text.
    Raw(String),
}

pub fn parse_response_shape(raw: &str) -> ResponseShape {
    let trimmed = raw.trim();
    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
        if let Some(pair) = bilingual_fields(&parsed) {
            return ResponseShape::Bilingual(pair);
        }
        if let Some(pair) = parsed.get("descriptions").and_then(bilingual_fields) {
            return ResponseShape::Nested(pair);
        }
    }
    ResponseShape::Raw(trimmed.to_string())
}

/// Normalizes a raw structured-text response into a usable `PromptPair`.
/// Never fails: malformed upstream output degrades to the raw text in both
/// fields, and an empty response yields a fixed bilingual placeholder.
pub fn normalize_prompt_response(raw: &str) -> PromptPair {
    if raw.trim().is_empty() {
        return PromptPair {
            english: FALLBACK_ENGLISH.to_string(),
            vietnamese: FALLBACK_VIETNAMESE.to_string(),
        };
    }
    match parse_response_shape(raw) {
        ResponseShape::Bilingual(pair) | ResponseShape::Nested(pair) => pair,
        ResponseShape::Raw(text) => PromptPair {
            english: text.clone(),
            vietnamese: text,
        },
    }
}

fn bilingual_fields(value: &Value) -> Option<PromptPair> {
    let english = non_empty_str(value.get("english")?)?;
    let vietnamese = non_empty_str(value.get("vietnamese")?)?;
    Some(PromptPair {
        english,
        vietnamese,
    })
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_prompt_response, parse_response_shape, AnalysisMode, PromptPair, ResponseShape,
        FALLBACK_ENGLISH, FALLBACK_VIETNAMESE,
    };

    #[test]
    fn mode_capabilities_match_contract() {
        assert!(AnalysisMode::Focused.requires_branch());
        assert!(AnalysisMode::Super.requires_branch());
        assert!(!AnalysisMode::Freestyle.requires_branch());
        assert!(!AnalysisMode::InDepth.requires_branch());
        assert!(AnalysisMode::InDepth.injects_professional_detail());
        assert!(AnalysisMode::Super.injects_professional_detail());
        assert_eq!(AnalysisMode::from_key(" SUPER "), Some(AnalysisMode::Super));
        assert_eq!(AnalysisMode::from_key("deep"), None);
    }

    #[test]
    fn bilingual_object_passes_through_unchanged() {
        let raw = r#"{"english": "a lone astronaut", "vietnamese": "một phi hành gia đơn độc"}"#;
        assert_eq!(
            normalize_prompt_response(raw),
            PromptPair {
                english: "a lone astronaut".to_string(),
                vietnamese: "một phi hành gia đơn độc".to_string(),
            }
        );
    }

    #[test]
    fn nested_descriptions_are_extracted() {
        let raw = r#"{"descriptions": {"english": "dense fog", "vietnamese": "sương mù dày"}}"#;
        let shape = parse_response_shape(raw);
        assert!(matches!(shape, ResponseShape::Nested(_)));
        let pair = normalize_prompt_response(raw);
        assert_eq!(pair.english, "dense fog");
        assert_eq!(pair.vietnamese, "sương mù dày");
    }

    #[test]
    fn empty_response_yields_fixed_placeholder() {
        let pair = normalize_prompt_response("   \n ");
        assert_eq!(pair.english, FALLBACK_ENGLISH);
        assert_eq!(pair.vietnamese, FALLBACK_VIETNAMESE);
    }

    #[test]
    fn malformed_responses_never_yield_empty_fields() {
        for raw in [
            "not json at all",
            r#"{"unexpected": true}"#,
            r#"{"english": "only one language"}"#,
            r#"{"english": "", "vietnamese": ""}"#,
            r#"[1, 2, 3]"#,
        ] {
            let pair = normalize_prompt_response(raw);
            assert!(!pair.english.is_empty(), "english empty for {raw:?}");
            assert!(!pair.vietnamese.is_empty(), "vietnamese empty for {raw:?}");
            assert_eq!(pair.english, pair.vietnamese);
        }
    }
}
