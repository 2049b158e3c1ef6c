use std::env;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::thread;

use atelier_contracts::catalog::{structure_guide, Branch};
use atelier_contracts::error::StudioError;
use atelier_contracts::history::{ArtifactHistory, ImageArtifact};
use atelier_contracts::options::TechOptions;
use atelier_contracts::prompts::{normalize_prompt_response, AnalysisMode, PromptPair};
use atelier_contracts::ratio::AspectRatio;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{GenericImageView, Rgb, RgbImage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Fixed Vietnamese note attached when the user supplies a finished prompt
/// directly instead of an idea.
pub const DIRECT_PROMPT_NOTE: &str = "Prompt được cung cấp trực tiếp bởi người dùng.";

/// An uploaded or generated image carried inline as base64 plus MIME type.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub data: String,
    pub mime_type: String,
}

impl InlineImage {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            data: BASE64.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, StudioError> {
        let bytes = fs::read(path).map_err(|err| {
            StudioError::validation(format!("failed reading {}: {err}", path.display()))
        })?;
        let mime = mime_for_path(path).unwrap_or("image/png");
        Ok(Self::from_bytes(&bytes, mime))
    }

    pub fn decoded_bytes(&self) -> Result<Vec<u8>, StudioError> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|_| StudioError::transport("inline image payload was not valid base64"))
    }

    /// Pixel dimensions, decoded from the payload itself.
    pub fn dimensions(&self) -> Result<(u32, u32), StudioError> {
        let bytes = self.decoded_bytes()?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| StudioError::transport(format!("image decode failed: {err}")))?;
        Ok(decoded.dimensions())
    }
}

/// One piece of a multimodal request body.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    Image(InlineImage),
}

/// Contract wrapper around the remote generative capability. Four
/// operation kinds; every call is a network round-trip and none are
/// idempotent (the backend is non-deterministic by design).
pub trait GenerationGateway: Send + Sync {
    /// generateContent constrained to a JSON response schema. Schema
    /// enforcement is advisory; callers normalize the raw text.
    fn structured_text(&self, parts: &[ContentPart], schema: &Value) -> Result<String, StudioError>;

    /// generateContent with no schema; returns the raw text.
    fn free_text(&self, parts: &[ContentPart]) -> Result<String, StudioError>;

    /// Text-to-image generation. Returns base64 payloads, newest API
    /// ordering preserved. Zero images is `GenerationEmpty`.
    fn generate_images(
        &self,
        prompt: &str,
        count: u32,
        ratio: AspectRatio,
    ) -> Result<Vec<String>, StudioError>;

    /// Image editing/compositing over inline parts. A response without an
    /// inline image part is `GenerationRefused`.
    fn edit_image(&self, parts: &[ContentPart], seed: Option<i64>) -> Result<String, StudioError>;
}

// ---------------------------------------------------------------------------
// Remote gateway (Gemini family)
// ---------------------------------------------------------------------------

pub struct GeminiStudio {
    api_base: String,
    http: HttpClient,
    text_model: String,
    image_model: String,
    edit_model: String,
}

impl GeminiStudio {
    pub fn new() -> Self {
        Self::with_models(DEFAULT_TEXT_MODEL, DEFAULT_IMAGE_MODEL, DEFAULT_EDIT_MODEL)
    }

    pub fn with_models(text_model: &str, image_model: &str, edit_model: &str) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
            text_model: text_model.to_string(),
            image_model: image_model.to_string(),
            edit_model: edit_model.to_string(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn generate_endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model.trim())
    }

    fn predict_endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:predict", self.api_base, model.trim())
    }

    fn post_json(&self, endpoint: &str, payload: &Value) -> Result<Value, StudioError> {
        let Some(api_key) = Self::api_key() else {
            return Err(StudioError::transport(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key.as_str())])
            .json(payload)
            .send()
            .map_err(|err| StudioError::transport(format!("request failed ({endpoint}): {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| StudioError::transport(format!("response body read failed: {err}")))?;
        if !status.is_success() {
            return Err(StudioError::from_remote_payload(&body));
        }
        serde_json::from_str(&body).map_err(|_| {
            StudioError::transport(format!(
                "remote returned invalid JSON payload: {}",
                truncate_text(&body, 256)
            ))
        })
    }

    fn generate_content(
        &self,
        model: &str,
        parts: &[ContentPart],
        generation_config: Option<Value>,
    ) -> Result<Value, StudioError> {
        let mut payload = json!({
            "contents": [{
                "role": "user",
                "parts": parts_to_json(parts),
            }],
        });
        if let Some(config) = generation_config {
            payload["generationConfig"] = config;
        }
        self.post_json(&self.generate_endpoint(model), &payload)
    }
}

impl Default for GeminiStudio {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationGateway for GeminiStudio {
    fn structured_text(&self, parts: &[ContentPart], schema: &Value) -> Result<String, StudioError> {
        let config = json!({
            "responseMimeType": "application/json",
            "responseSchema": schema,
        });
        let payload = self.generate_content(&self.text_model, parts, Some(config))?;
        Ok(extract_text_parts(&payload))
    }

    fn free_text(&self, parts: &[ContentPart]) -> Result<String, StudioError> {
        let payload = self.generate_content(&self.text_model, parts, None)?;
        Ok(extract_text_parts(&payload))
    }

    fn generate_images(
        &self,
        prompt: &str,
        count: u32,
        ratio: AspectRatio,
    ) -> Result<Vec<String>, StudioError> {
        let payload = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": count.clamp(1, 4),
                "aspectRatio": ratio.as_str(),
                "outputMimeType": "image/png",
            },
        });
        let response = self.post_json(&self.predict_endpoint(&self.image_model), &payload)?;
        let images = extract_predictions(&response);
        if images.is_empty() {
            return Err(StudioError::GenerationEmpty);
        }
        Ok(images)
    }

    fn edit_image(&self, parts: &[ContentPart], seed: Option<i64>) -> Result<String, StudioError> {
        let mut config = json!({
            "responseModalities": ["IMAGE", "TEXT"],
        });
        if let Some(seed) = seed {
            config["seed"] = json!(seed);
        }
        let payload = self.generate_content(&self.edit_model, parts, Some(config))?;
        extract_inline_image_data(&payload).ok_or(StudioError::GenerationRefused)
    }
}

/// Concatenated text of the first candidate's parts, mirroring the SDK's
/// `response.text` accessor.
fn extract_text_parts(payload: &Value) -> String {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// First inline image payload across all candidates, camelCase or
/// snake_case keys accepted.
fn extract_inline_image_data(payload: &Value) -> Option<String> {
    let candidates = payload.get("candidates").and_then(Value::as_array)?;
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !data.is_empty() {
                return Some(data.to_string());
            }
        }
    }
    None
}

fn extract_predictions(payload: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let predictions = payload
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in predictions {
        if let Some(encoded) = row
            .get("bytesBase64Encoded")
            .or_else(|| row.get("bytes_base64_encoded"))
            .and_then(Value::as_str)
        {
            if !encoded.is_empty() {
                out.push(encoded.to_string());
            }
            continue;
        }
        if let Some(encoded) = row
            .get("image")
            .and_then(|image| image.get("imageBytes"))
            .and_then(Value::as_str)
        {
            if !encoded.is_empty() {
                out.push(encoded.to_string());
            }
        }
    }
    out
}

fn parts_to_json(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::Image(image) => json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data,
                }
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Offline gateway
// ---------------------------------------------------------------------------

/// Deterministic offline stand-in for the remote capability. Text calls
/// honor the requested response schema; image calls render solid-color
/// artifacts keyed by prompt and seed.
#[derive(Debug, Default, Clone)]
pub struct DryrunGateway;

impl DryrunGateway {
    fn canned_pair(instruction: &str) -> String {
        let summary = truncate_text(instruction.trim(), 160).replace('"', "'");
        json!({
            "english": format!("Dryrun prompt: {summary}"),
            "vietnamese": format!("Prompt thử nghiệm: {summary}"),
        })
        .to_string()
    }

    fn render_artifact(key: &str, seed: u64, width: u32, height: u32) -> Result<String, StudioError> {
        let (r, g, b) = color_from_key(key, seed);
        let mut canvas = RgbImage::new(width.max(1), height.max(1));
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(canvas)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .map_err(|err| StudioError::transport(format!("dryrun artifact encode failed: {err}")))?;
        Ok(BASE64.encode(buffer.into_inner()))
    }
}

impl GenerationGateway for DryrunGateway {
    fn structured_text(&self, parts: &[ContentPart], schema: &Value) -> Result<String, StudioError> {
        let instruction = joined_text(parts);
        let properties = schema.get("properties");
        if let Some(labels) = properties
            .and_then(|props| props.get("category"))
            .and_then(|category| category.get("enum"))
            .and_then(Value::as_array)
        {
            let label = labels
                .first()
                .and_then(Value::as_str)
                .unwrap_or("landscape_scene");
            return Ok(json!({ "category": label }).to_string());
        }
        if properties.map(|props| props.get("descriptions").is_some()) == Some(true) {
            let summary = truncate_text(instruction.trim(), 160).replace('"', "'");
            return Ok(json!({
                "descriptions": {
                    "english": format!("Dryrun prompt: {summary}"),
                    "vietnamese": format!("Prompt thử nghiệm: {summary}"),
                }
            })
            .to_string());
        }
        Ok(Self::canned_pair(&instruction))
    }

    fn free_text(&self, parts: &[ContentPart]) -> Result<String, StudioError> {
        let instruction = joined_text(parts);
        Ok(format!(
            "Dryrun video prompt: {}",
            truncate_text(instruction.trim(), 200)
        ))
    }

    fn generate_images(
        &self,
        prompt: &str,
        count: u32,
        ratio: AspectRatio,
    ) -> Result<Vec<String>, StudioError> {
        let (width, height) = dryrun_dims(ratio);
        (0..count.max(1))
            .map(|idx| Self::render_artifact(prompt, idx as u64, width, height))
            .collect()
    }

    fn edit_image(&self, parts: &[ContentPart], seed: Option<i64>) -> Result<String, StudioError> {
        let (width, height) = parts
            .iter()
            .find_map(|part| match part {
                ContentPart::Image(image) => image.dimensions().ok(),
                ContentPart::Text(_) => None,
            })
            .unwrap_or((256, 256));
        Self::render_artifact(&joined_text(parts), seed.unwrap_or_default() as u64, width, height)
    }
}

fn dryrun_dims(ratio: AspectRatio) -> (u32, u32) {
    match ratio {
        AspectRatio::Auto | AspectRatio::Square => (256, 256),
        AspectRatio::Widescreen => (256, 144),
        AspectRatio::Vertical => (144, 256),
        AspectRatio::Landscape => (256, 192),
        AspectRatio::Portrait => (192, 256),
    }
}

fn color_from_key(key: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn joined_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text(text) => Some(text.as_str()),
            ContentPart::Image(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Instruction composer
// ---------------------------------------------------------------------------

/// Response schema for the canonical bilingual prompt pair.
pub fn bilingual_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "vietnamese": { "type": "STRING" },
            "english": { "type": "STRING" },
        },
        "required": ["vietnamese", "english"],
    })
}

/// Response schema for the in-depth dual-paragraph shape.
pub fn nested_descriptions_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "descriptions": {
                "type": "OBJECT",
                "properties": {
                    "vietnamese": { "type": "STRING" },
                    "english": { "type": "STRING" },
                },
                "required": ["vietnamese", "english"],
            },
        },
        "required": ["descriptions"],
    })
}

/// Enum-constrained single-label schema for image classification.
pub fn classification_schema() -> Value {
    let labels: Vec<&str> = Branch::ALL.iter().map(|branch| branch.key()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "category": { "type": "STRING", "enum": labels },
        },
        "required": ["category"],
    })
}

fn require_idea(idea: &str) -> Result<&str, StudioError> {
    let trimmed = idea.trim();
    if trimmed.is_empty() {
        return Err(StudioError::validation("an idea is required"));
    }
    Ok(trimmed)
}

fn require_branch(branch: Option<Branch>, mode: AnalysisMode) -> Result<Branch, StudioError> {
    branch.ok_or_else(|| {
        StudioError::validation(format!("mode '{}' requires a branch", mode.key()))
    })
}

/// Builds the instruction for expanding a text idea into a bilingual
/// prompt pair. Every strategy demands a negative-prompt clause.
pub fn compose_idea_instruction(
    idea: &str,
    branch: Option<Branch>,
    options: &TechOptions,
    mode: AnalysisMode,
) -> Result<String, StudioError> {
    let idea = require_idea(idea)?;
    match mode {
        AnalysisMode::Focused => {
            let branch = require_branch(branch, mode)?;
            Ok(focused_structure_instruction(idea, branch, options))
        }
        AnalysisMode::InDepth => Ok(format!(
            r#"You are a world-class creative director and prompt engineer for an advanced AI image generation model. Your task is to take a user's simple idea and transform it into a professional, hyper-detailed, and cinematic prompt.

**User's Core Idea:** "{idea}"
{preferences}
**Instructions:**
1. **Deconstruct the Idea:** Break down the user's idea into core components: Subject, Environment, Action, Mood, and Style.
2. **Add Professional Details:** For each component, add extremely detailed, professional-level descriptions. Specify professional camera gear (e.g., shot on ARRI Alexa with a 35mm prime lens), advanced lighting techniques (e.g., chiaroscuro, volumetric lighting), composition (e.g., rule of thirds, leading lines), and artistic influences.
3. **Synthesize Master Prompts:** Synthesize these details into two master prompts: one in English and one in standard, fully-accented Vietnamese.
4. **Negative Prompt:** Include a comprehensive negative prompt within the English prompt using a standard format like '--neg ...' or 'Negative prompt: ...' at the end.
5. **Output Format:** Return ONLY the JSON object with the "english" and "vietnamese" prompts."#,
            idea = idea,
            preferences = options.render_block("incorporate these into your description"),
        )),
        AnalysisMode::Super => {
            let branch = require_branch(branch, mode)?;
            Ok(format!(
                r#"You are a world-class creative director and prompt engineer. Your task is to take a user's simple idea and transform it into a professional, ultimate-quality prompt, strictly following a specific theme while injecting cinematic, professional details.

**User's Core Idea:** "{idea}"
**Strict Theme/Branch:** "{branch}" (You MUST adhere to the concepts and structure of this theme. This is the foundational guide for your creativity).
{preferences}
**Instructions:**
1. **Analyze Idea within Theme:** Analyze the user's idea exclusively through the lens of the '{branch}' theme. Use the theme's structure as your guide.
2. **Inject Professional Details:** For each structural element of the theme, inject hyper-detailed, professional-level descriptions. Specify professional camera gear (e.g., shot on ARRI Alexa with a 85mm prime lens), advanced lighting techniques (e.g., chiaroscuro, volumetric lighting, god rays), and cinematic composition (e.g., rule of thirds, leading lines).
3. **Synthesize Master Prompts:** Create two master prompts (one in English, one in standard, fully-accented Vietnamese) that are both incredibly detailed AND perfectly aligned with the chosen theme.
4. **Negative Prompt:** Include a comprehensive negative prompt within the English prompt.
5. **Output Format:** Return ONLY the JSON object with "english" and "vietnamese" prompts."#,
                idea = idea,
                branch = branch.key(),
                preferences = options.render_block("incorporate these into your description"),
            ))
        }
        AnalysisMode::Freestyle => Ok(format!(
            r#"You are a creative expert and prompt engineer. Your task is to take the user's core idea and expand it into a single, rich, descriptive, and imaginative paragraph in English, suitable for an advanced AI image generation model. You have creative freedom but must respect the user's technical preferences if provided. Also, create a Vietnamese translation of the final English paragraph.

**User's Core Idea:** "{idea}"
{preferences}
**Instructions:**
1. Brainstorm creative details related to the idea and preferences.
2. Write the final English prompt as a single, detailed paragraph.
3. Provide a faithful Vietnamese translation of that English prompt.
4. Include a comprehensive negative prompt suggestion within the English prompt using a standard format like '--neg ...' or 'Negative prompt: ...' at the end."#,
            idea = idea,
            preferences = options.render_block("incorporate these into your description"),
        )),
    }
}

fn focused_structure_instruction(idea: &str, branch: Branch, options: &TechOptions) -> String {
    format!(
        r#"**User's Core Idea:** "{idea}"
**Contextual Theme:** "{theme}"
You are an expert prompt engineer. Your task is to expand the user's simple idea into a detailed specification based on the theme.
{preferences}
**Instructions:**
1. Analyze the user's idea, contextual theme, and especially their technical preferences.
2. Mentally fill out the JSON structure below with creative details that match all the inputs.
3. Use ALL details from your mental model to write two rich, descriptive paragraphs (one Vietnamese, one English).
4. The final paragraph MUST include a comprehensive negative prompt.

**JSON Structure Guide:** {structure}"#,
        idea = idea,
        theme = branch.key(),
        preferences = options.render_block("follow these"),
        structure = structure_guide(branch),
    )
}

/// Instruction asking the model to classify an uploaded image into the
/// closed branch set.
pub fn compose_classification_instruction() -> String {
    let labels: Vec<&str> = Branch::ALL.iter().map(|branch| branch.key()).collect();
    format!(
        "Analyze the image and classify it into one of the following categories: {}.",
        labels.join(", ")
    )
}

/// Builds the analysis instruction for an uploaded image. For `focused`
/// and `super` the caller must already hold the classified branch.
pub fn compose_image_analysis_instruction(
    mode: AnalysisMode,
    branch: Option<Branch>,
    options: &TechOptions,
) -> Result<String, StudioError> {
    let preferences = options.render_block("creatively reinterpret the image according to these");
    match mode {
        AnalysisMode::Freestyle => Ok(format!(
            r#"You are an expert image analyst and prompt engineer. Your task is to analyze a user's image and describe it in extreme detail to create a high-quality generation prompt. Focus on objective details: subject, composition, lighting, style, color palette, and any specific artistic techniques. Write two rich, descriptive paragraphs (one in English, one in standard, fully-accented Vietnamese) and include a comprehensive negative prompt within the English paragraph using a standard format like '--neg ...' or 'Negative prompt: ...' at the end.
{preferences}"#,
        )),
        AnalysisMode::Focused => {
            let branch = require_branch(branch, mode)?;
            Ok(format!(
                r#"You are an expert image analyst. The image has been classified as **{branch}**. Describe the image in extreme detail, using the JSON structure below as a mental checklist: complete every slot from what you observe before writing. Then write two rich, descriptive paragraphs (one Vietnamese, one English) covering every slot. The final paragraph MUST include a comprehensive negative prompt.
{preferences}
**JSON Structure Guide:** {structure}"#,
                branch = branch.key(),
                preferences = preferences,
                structure = structure_guide(branch),
            ))
        }
        AnalysisMode::InDepth => Ok(format!(
            r#"You are a world-class creative director and prompt engineer for an advanced AI image generation model. Analyze the provided image and transform it into a professional, hyper-detailed, and cinematic prompt.
{preferences}
**Instructions:**
1. **Deconstruct the Image:** Break the image down into core components: Subject, Environment, Action, Mood, and Style.
2. **Add Professional Details:** For each component, add extremely detailed, professional-level descriptions. Specify professional camera gear (e.g., shot on ARRI Alexa with a 35mm prime lens), advanced lighting techniques (e.g., chiaroscuro, volumetric lighting), and composition (e.g., rule of thirds, leading lines).
3. **Synthesize Master Descriptions:** Synthesize these details into two master paragraphs, one in English and one in standard, fully-accented Vietnamese, returned under "descriptions".
4. **Negative Prompt:** Include a comprehensive negative prompt within the English paragraph."#,
        )),
        AnalysisMode::Super => {
            let branch = require_branch(branch, mode)?;
            Ok(format!(
                r#"You are an expert image analyst and creative director. The image has been classified as **{branch}**. Analyze the image exclusively through the lens of that theme, using its structure as your guide, and inject hyper-detailed, professional-level descriptions for every structural element: professional camera gear (e.g., shot on ARRI Alexa with a 85mm prime lens), advanced lighting techniques (e.g., chiaroscuro, volumetric lighting, god rays), and cinematic composition (e.g., rule of thirds, leading lines). Create two master prompts (one in English, one in standard, fully-accented Vietnamese) that are both incredibly detailed AND perfectly aligned with the theme. Include a comprehensive negative prompt within the English prompt.
{preferences}
**JSON Structure Guide:** {structure}"#,
                branch = branch.key(),
                preferences = preferences,
                structure = structure_guide(branch),
            ))
        }
    }
}

/// Builds the single-paragraph text-to-video instruction. `super` asks the
/// model to infer genre/theme first, then layer cinematic detail, all in
/// one composed instruction.
pub fn compose_video_instruction(idea: &str, mode: AnalysisMode) -> Result<String, StudioError> {
    let idea = require_idea(idea)?;
    let specific = match mode {
        AnalysisMode::Focused => "5. **Focused Mode:** Analyze the user's idea and automatically select the most impactful cinematographic choices to bring it to life. Structure the prompt logically.",
        AnalysisMode::InDepth => "5. **In-depth Mode:** Deconstruct the idea into its core components (subject, environment, style). For each component, add extremely detailed, professional-level descriptions. Synthesize these details into a master prompt, specifying professional camera gear (e.g., shot on ARRI Alexa with a 35mm prime lens) and advanced lighting techniques.",
        AnalysisMode::Super => "5. **Super Mode:** First, analyze the user's idea to identify its core genre and theme. Then, adhering strictly to that theme, deconstruct the idea and inject professional-level cinematic details for every component. The final prompt must be both thematically consistent and technically sophisticated, specifying camera gear, advanced lighting, and precise camera movements.",
        AnalysisMode::Freestyle => "5. **Freestyle Mode:** You have complete creative freedom. Be imaginative and generate the most visually stunning and dynamic prompt possible based on the user's idea.",
    };
    Ok(format!(
        r#"You are an expert prompt engineer for an advanced text-to-video AI model. Your task is to take a user's simple idea and transform it into a rich, detailed, and cinematic prompt. The prompt should be a single paragraph in English.

**User's Idea:** "{idea}"

**Instructions:**
1. **Core Elements:** Describe the main subject, the setting, and the primary action.
2. **Cinematography:** Specify camera angles (e.g., wide shot, close-up, drone shot, low angle), camera movement (e.g., panning, tracking shot, slow zoom), and lighting (e.g., golden hour, neon glow, cinematic lighting).
3. **Atmosphere & Style:** Define the mood (e.g., epic, mysterious, serene) and visual style (e.g., photorealistic, cinematic, futuristic, 8K, hyper-detailed).
4. **Details:** Add specific sensory details: what does the scene look, feel, or sound like?
{specific}"#,
    ))
}

/// Builds the continuation instruction for the next video scene. `super`
/// has no distinct continuation path and resolves to the in-depth
/// guideline.
pub fn compose_continuation_instruction(
    previous_prompt: &str,
    next_idea: &str,
    mode: AnalysisMode,
) -> Result<String, StudioError> {
    let previous = previous_prompt.trim();
    if previous.is_empty() {
        return Err(StudioError::validation("the previous scene's prompt is required"));
    }
    let next = require_idea(next_idea)?;
    let guideline = match mode {
        AnalysisMode::Focused => {
            "Choose logical, effective camera shots and movements to advance the scene."
        }
        AnalysisMode::InDepth | AnalysisMode::Super => {
            "Add professional-level details about camera work, lighting changes, and environmental interactions to make the transition seamless and cinematic."
        }
        AnalysisMode::Freestyle => {
            "Be highly creative and cinematic in your description of the new scene."
        }
    };
    Ok(format!(
        r#"You are an expert prompt engineer for a text-to-video AI model, specializing in creating coherent, continuous scenes.

**Previous Scene's Prompt:**
```
{previous}
```

**User's Idea for the NEXT Scene:** "{next}"

**Your Task:**
Create a new, detailed, cinematic prompt for the next scene that logically and visually continues from the previous one.

**Instructions:**
1. **Analyze Continuity:** Understand the subject, setting, style, and mood of the previous prompt.
2. **Incorporate New Idea:** Seamlessly integrate the user's "next idea" into the narrative.
3. **Maintain Consistency:** The new prompt's style, lighting, and core elements should feel like a natural continuation. Camera work can change to reflect the new action (e.g., from a wide shot to a close-up).
4. **Mode Guideline:** {guideline}
5. **Output:** Provide only the new, complete, single-paragraph prompt in English."#,
    ))
}

/// Wraps a custom edit request with the non-negotiable aspect-ratio
/// directive for the image-preview model.
pub fn compose_edit_instruction(custom_prompt: &str, ratio: AspectRatio) -> String {
    format!(
        "CRITICAL REQUIREMENT: The final image's aspect ratio MUST be exactly {ratio}. This is a non-negotiable rule. Do not inherit the aspect ratio from the input image. Now, edit the image with this instruction: \"{custom_prompt}\"",
        ratio = ratio.as_str(),
    )
}

/// Identity-preserving directive around a synthesized scene description.
pub fn compose_face_swap_instruction(scene_description: &str) -> String {
    format!(
        "CRITICAL INSTRUCTION: You MUST use the exact face from the reference image. Preserve 99.99% of the facial features, identity, and expression. Do NOT alter the face. Place this exact person in the following scene: \"{scene_description}\""
    )
}

/// Labeled character parts plus the compositing task text, in the order
/// the edit model expects: images first, instruction last.
pub fn compose_composite_parts(
    characters: &[InlineImage],
    background: Option<&InlineImage>,
    scene_description: &str,
    ratio: AspectRatio,
) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    for (index, character) in characters.iter().enumerate() {
        parts.push(ContentPart::Image(character.clone()));
        parts.push(ContentPart::Text(format!("This is Character {}.", index + 1)));
    }
    if let Some(background) = background {
        parts.push(ContentPart::Image(background.clone()));
        parts.push(ContentPart::Text("This is the background image.".to_string()));
    }
    parts.push(ContentPart::Text(format!(
        r#"**Task: Character Compositing**
You are provided with several character images (labeled "Character 1", "Character 2", etc.) and an optional background image.
Your job is to composite the selected characters into a single, coherent scene based on the user's description.

**User's Scene Description:** "{scene}"

**Instructions:**
1. **Isolate Characters:** Identify and cleanly isolate the characters from their original backgrounds. Preserve their appearance and identity exactly as in the source images.
2. **Positioning:** Place the characters into the new scene (either the provided background or a newly generated one) according to the description.
3. **Consistency:** Ensure lighting, shadows, and perspective are consistent for all characters and match the background.
4. **Final Image:** The final output must be a single, photorealistic image.
5. **Aspect Ratio:** The final image MUST have an aspect ratio of {ratio}. This is a strict requirement."#,
        scene = scene_description,
        ratio = ratio.as_str(),
    )));
    parts
}

/// Who is in the photo being restored.
#[derive(Debug, Clone)]
pub enum RestoreSubject {
    SinglePerson {
        gender: Option<String>,
        age: Option<String>,
        description: Option<String>,
    },
    MultiplePeople {
        description: Option<String>,
    },
}

pub fn compose_restore_instruction(subject: &RestoreSubject) -> String {
    let mut text = String::from(
        "This is a photo restoration task. Please restore this old, blurry, or damaged photo to high quality. Enhance details, fix colors, and remove scratches or imperfections.",
    );
    match subject {
        RestoreSubject::SinglePerson {
            gender,
            age,
            description,
        } => {
            text.push_str(" The photo contains a single person.");
            if let Some(gender) = non_empty(gender) {
                text.push_str(&format!(" Gender: {gender}."));
            }
            if let Some(age) = non_empty(age) {
                text.push_str(&format!(" Approximate age: {age}."));
            }
            if let Some(description) = non_empty(description) {
                text.push_str(&format!(" Additional details: {description}."));
            }
        }
        RestoreSubject::MultiplePeople { description } => {
            text.push_str(" The photo contains multiple people.");
            if let Some(description) = non_empty(description) {
                text.push_str(&format!(" Scene description: {description}."));
            }
        }
    }
    text.push_str(" The goal is a clean, sharp, and natural-looking restoration.");
    text
}

pub fn compose_upscale_instruction() -> String {
    "Upscale this image. Increase its resolution and sharpness while preserving all original details and art style. The goal is to make the image clearer and larger without adding new elements or changing the content.".to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Session orchestrator
// ---------------------------------------------------------------------------

/// Resolves `auto` to a concrete ratio: snap from the source image's pixel
/// dimensions when one exists, otherwise take the context default.
pub fn resolve_aspect_ratio(
    requested: AspectRatio,
    source: Option<&InlineImage>,
    fallback: AspectRatio,
) -> AspectRatio {
    if !requested.is_auto() {
        return requested;
    }
    if let Some(image) = source {
        if let Ok((width, height)) = image.dimensions() {
            return AspectRatio::from_dimensions(width, height);
        }
    }
    fallback
}

#[derive(Debug, Clone)]
pub struct IdeaRequest {
    pub idea: String,
    pub branch: Option<Branch>,
    pub options: TechOptions,
    pub mode: AnalysisMode,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub count: u32,
    pub ratio: AspectRatio,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            count: 1,
            ratio: AspectRatio::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FaceSwapSource {
    Description(String),
    StyleImage(InlineImage),
}

#[derive(Debug, Clone)]
pub struct FaceSwapRequest {
    pub portrait: InlineImage,
    pub source: FaceSwapSource,
    pub options: TechOptions,
    pub mode: AnalysisMode,
}

#[derive(Debug, Clone)]
pub struct CompositeRequest {
    pub characters: Vec<InlineImage>,
    pub background: Option<InlineImage>,
    pub description: String,
    pub options: TechOptions,
    pub mode: AnalysisMode,
}

/// Result of an image-producing workflow. The same artifacts have already
/// been appended to session history.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub prompts: Option<PromptPair>,
    pub artifacts: Vec<ImageArtifact>,
}

/// Sequences composition, gateway calls, and normalization per user
/// action, and owns the bounded artifact history. Every workflow takes
/// `&mut self`, so at most one top-level generation workflow can be active
/// per session; there is no hidden cross-cutting state.
pub struct StudioSession {
    gateway: Box<dyn GenerationGateway>,
    history: ArtifactHistory,
}

impl StudioSession {
    pub fn new(gateway: Box<dyn GenerationGateway>) -> Self {
        Self {
            gateway,
            history: ArtifactHistory::new(),
        }
    }

    pub fn history(&self) -> &ArtifactHistory {
        &self.history
    }

    pub fn remove_artifact(&mut self, index: usize) -> Option<ImageArtifact> {
        self.history.remove(index)
    }

    /// Text idea to bilingual prompt pair; no image generation.
    pub fn prompts_from_idea(&mut self, request: &IdeaRequest) -> Result<PromptPair, StudioError> {
        let instruction = compose_idea_instruction(
            &request.idea,
            request.branch,
            &request.options,
            request.mode,
        )?;
        let raw = self
            .gateway
            .structured_text(&[ContentPart::Text(instruction)], &bilingual_schema())?;
        Ok(normalize_prompt_response(&raw))
    }

    /// Uploaded image to bilingual prompt pair. `focused` and `super` run
    /// the blocking classification sub-step first and abort with
    /// `Classification` before the second call when the label is unusable.
    pub fn analyze_image(
        &mut self,
        image: &InlineImage,
        mode: AnalysisMode,
        options: &TechOptions,
    ) -> Result<PromptPair, StudioError> {
        let (branch, schema) = match mode {
            AnalysisMode::Focused | AnalysisMode::Super => {
                (Some(self.classify_image(image)?), bilingual_schema())
            }
            AnalysisMode::Freestyle => (None, bilingual_schema()),
            AnalysisMode::InDepth => (None, nested_descriptions_schema()),
        };
        let instruction = compose_image_analysis_instruction(mode, branch, options)?;
        let parts = vec![
            ContentPart::Image(image.clone()),
            ContentPart::Text(instruction),
        ];
        let raw = self.gateway.structured_text(&parts, &schema)?;
        Ok(normalize_prompt_response(&raw))
    }

    fn classify_image(&mut self, image: &InlineImage) -> Result<Branch, StudioError> {
        let parts = vec![
            ContentPart::Image(image.clone()),
            ContentPart::Text(compose_classification_instruction()),
        ];
        let raw = self
            .gateway
            .structured_text(&parts, &classification_schema())?;
        let text = raw.trim();
        if text.is_empty() {
            return Err(StudioError::Classification(
                "the classifier returned an empty label".to_string(),
            ));
        }
        let label = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("category")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| text.to_string());
        Branch::from_key(&label).ok_or_else(|| {
            StudioError::Classification(format!("AI returned '{}'", truncate_text(&label, 80)))
        })
    }

    /// Full idea workflow: compose, normalize, generate, record.
    pub fn create_from_idea(
        &mut self,
        request: &IdeaRequest,
        settings: &GenerationSettings,
    ) -> Result<ImageOutcome, StudioError> {
        let prompts = self.prompts_from_idea(request)?;
        let ratio = resolve_aspect_ratio(settings.ratio, None, AspectRatio::Square);
        self.generate_and_record(prompts, settings.count, ratio)
    }

    /// Generation from a finished prompt supplied directly by the user.
    pub fn create_from_prompt(
        &mut self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<ImageOutcome, StudioError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(StudioError::validation("a prompt is required"));
        }
        let prompts = PromptPair {
            english: prompt.to_string(),
            vietnamese: DIRECT_PROMPT_NOTE.to_string(),
        };
        let ratio = resolve_aspect_ratio(settings.ratio, None, AspectRatio::Square);
        self.generate_and_record(prompts, settings.count, ratio)
    }

    /// Full image-analysis workflow; `auto` ratio snaps from the uploaded
    /// image.
    pub fn create_from_image(
        &mut self,
        image: &InlineImage,
        mode: AnalysisMode,
        options: &TechOptions,
        settings: &GenerationSettings,
    ) -> Result<ImageOutcome, StudioError> {
        let prompts = self.analyze_image(image, mode, options)?;
        let ratio = resolve_aspect_ratio(settings.ratio, Some(image), AspectRatio::Square);
        self.generate_and_record(prompts, settings.count, ratio)
    }

    fn generate_and_record(
        &mut self,
        prompts: PromptPair,
        count: u32,
        ratio: AspectRatio,
    ) -> Result<ImageOutcome, StudioError> {
        let images = self
            .gateway
            .generate_images(&prompts.english, count.max(1), ratio)?;
        let artifacts = self.record_artifacts(images, Some(prompts.english.clone()))?;
        Ok(ImageOutcome {
            prompts: Some(prompts),
            artifacts,
        })
    }

    /// Edits a source image with a custom instruction, fanning out into
    /// `count` variants with deterministic seeds.
    pub fn edit(
        &mut self,
        source: &InlineImage,
        custom_prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<Vec<ImageArtifact>, StudioError> {
        let custom_prompt = custom_prompt.trim();
        if custom_prompt.is_empty() {
            return Err(StudioError::validation("an edit instruction is required"));
        }
        let ratio = resolve_aspect_ratio(settings.ratio, Some(source), AspectRatio::Square);
        let parts = vec![
            ContentPart::Image(source.clone()),
            ContentPart::Text(compose_edit_instruction(custom_prompt, ratio)),
        ];
        let images = self.edit_variants(&parts, settings.count)?;
        self.record_artifacts(images, None)
    }

    /// Face-swap chain: synthesize a scene (from a description or a style
    /// image), then run identity-preserving edits on the portrait.
    pub fn face_swap(
        &mut self,
        request: &FaceSwapRequest,
        settings: &GenerationSettings,
    ) -> Result<ImageOutcome, StudioError> {
        let scene = match &request.source {
            FaceSwapSource::Description(description) => {
                if description.trim().is_empty() {
                    return Err(StudioError::validation(
                        "a scene description is required for this mode",
                    ));
                }
                self.prompts_from_idea(&IdeaRequest {
                    idea: description.clone(),
                    branch: Some(Branch::ModernHuman),
                    options: request.options.clone(),
                    mode: request.mode,
                })?
            }
            FaceSwapSource::StyleImage(style) => {
                self.analyze_image(style, request.mode, &request.options)?
            }
        };
        let ratio =
            resolve_aspect_ratio(settings.ratio, Some(&request.portrait), AspectRatio::Square);
        let instruction =
            compose_edit_instruction(&compose_face_swap_instruction(&scene.english), ratio);
        let parts = vec![
            ContentPart::Image(request.portrait.clone()),
            ContentPart::Text(instruction),
        ];
        let images = self.edit_variants(&parts, settings.count)?;
        let artifacts = self.record_artifacts(images, Some(scene.english.clone()))?;
        Ok(ImageOutcome {
            prompts: Some(scene),
            artifacts,
        })
    }

    /// Compositing chain: synthesize the scene once via the idea path
    /// (landscape_scene), then fan out labeled-parts composite edits.
    pub fn composite(
        &mut self,
        request: &CompositeRequest,
        settings: &GenerationSettings,
    ) -> Result<ImageOutcome, StudioError> {
        if request.characters.is_empty() {
            return Err(StudioError::validation(
                "at least one character image is required",
            ));
        }
        if request.description.trim().is_empty() {
            return Err(StudioError::validation(
                "a description of the scene and action is required",
            ));
        }
        let scene = self.prompts_from_idea(&IdeaRequest {
            idea: request.description.clone(),
            branch: Some(Branch::LandscapeScene),
            options: request.options.clone(),
            mode: request.mode,
        })?;
        let ratio = resolve_aspect_ratio(
            settings.ratio,
            request.background.as_ref(),
            AspectRatio::Square,
        );
        let parts = compose_composite_parts(
            &request.characters,
            request.background.as_ref(),
            &scene.english,
            ratio,
        );
        let images = self.edit_variants(&parts, settings.count)?;
        let artifacts = self.record_artifacts(images, Some(scene.english.clone()))?;
        Ok(ImageOutcome {
            prompts: Some(scene),
            artifacts,
        })
    }

    pub fn restore(
        &mut self,
        image: &InlineImage,
        subject: &RestoreSubject,
    ) -> Result<Vec<ImageArtifact>, StudioError> {
        let parts = vec![
            ContentPart::Image(image.clone()),
            ContentPart::Text(compose_restore_instruction(subject)),
        ];
        let restored = self.gateway.edit_image(&parts, None)?;
        self.record_artifacts(vec![restored], None)
    }

    pub fn upscale(&mut self, image: &InlineImage) -> Result<Vec<ImageArtifact>, StudioError> {
        let parts = vec![
            ContentPart::Image(image.clone()),
            ContentPart::Text(compose_upscale_instruction()),
        ];
        let upscaled = self.gateway.edit_image(&parts, None)?;
        self.record_artifacts(vec![upscaled], None)
    }

    pub fn video_prompt(
        &mut self,
        idea: &str,
        mode: AnalysisMode,
    ) -> Result<String, StudioError> {
        let instruction = compose_video_instruction(idea, mode)?;
        let raw = self.gateway.free_text(&[ContentPart::Text(instruction)])?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StudioError::transport("AI returned an empty video prompt"));
        }
        Ok(trimmed.to_string())
    }

    pub fn continuation_prompt(
        &mut self,
        previous_prompt: &str,
        next_idea: &str,
        mode: AnalysisMode,
    ) -> Result<String, StudioError> {
        let instruction = compose_continuation_instruction(previous_prompt, next_idea, mode)?;
        let raw = self.gateway.free_text(&[ContentPart::Text(instruction)])?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StudioError::transport("AI returned an empty video prompt"));
        }
        Ok(trimmed.to_string())
    }

    /// Fans out `count` edit calls with seeds `0..count` so variants are
    /// reproducible-distinct, joins on an all-complete barrier, and fails
    /// the whole batch on the first failure. A single variant carries no
    /// seed.
    fn edit_variants(
        &self,
        parts: &[ContentPart],
        count: u32,
    ) -> Result<Vec<String>, StudioError> {
        let count = count.max(1);
        if count == 1 {
            return Ok(vec![self.gateway.edit_image(parts, None)?]);
        }
        let gateway = self.gateway.as_ref();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..count)
                .map(|idx| scope.spawn(move || gateway.edit_image(parts, Some(idx as i64))))
                .collect();
            let mut images = Vec::with_capacity(handles.len());
            let mut first_failure: Option<StudioError> = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(image)) => images.push(image),
                    Ok(Err(err)) => {
                        if first_failure.is_none() {
                            first_failure = Some(err);
                        }
                    }
                    Err(_) => {
                        if first_failure.is_none() {
                            first_failure =
                                Some(StudioError::transport("edit variant worker panicked"));
                        }
                    }
                }
            }
            match first_failure {
                Some(err) => Err(err),
                None => Ok(images),
            }
        })
    }

    /// Decodes resolutions and prepends the finished batch to history in
    /// one step, so history never reflects a half-finished batch.
    fn record_artifacts(
        &mut self,
        images: Vec<String>,
        source_prompt: Option<String>,
    ) -> Result<Vec<ImageArtifact>, StudioError> {
        let artifacts = images
            .into_iter()
            .map(|data| artifact_from_base64(data, source_prompt.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        self.history.prepend_batch(artifacts.clone());
        Ok(artifacts)
    }
}

/// Builds an artifact from a raw base64 payload, deriving the resolution
/// by decoding the bytes rather than trusting the remote call.
pub fn artifact_from_base64(
    data: String,
    source_prompt: Option<String>,
) -> Result<ImageArtifact, StudioError> {
    let bytes = BASE64
        .decode(data.as_bytes())
        .map_err(|_| StudioError::transport("artifact payload was not valid base64"))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| StudioError::transport(format!("artifact image decode failed: {err}")))?;
    let (width, height) = decoded.dimensions();
    Ok(ImageArtifact {
        data,
        resolution: format!("{width} x {height}"),
        source_prompt,
    })
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use atelier_contracts::catalog::Branch;
    use atelier_contracts::error::StudioError;
    use atelier_contracts::options::TechOptions;
    use atelier_contracts::prompts::AnalysisMode;
    use atelier_contracts::ratio::AspectRatio;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::{json, Value};

    use super::{
        artifact_from_base64, compose_classification_instruction,
        compose_continuation_instruction, compose_idea_instruction, compose_restore_instruction,
        compose_video_instruction, extract_inline_image_data, extract_predictions,
        extract_text_parts, resolve_aspect_ratio, CompositeRequest, ContentPart, DryrunGateway,
        FaceSwapRequest, FaceSwapSource, GenerationGateway, GenerationSettings, IdeaRequest,
        InlineImage, RestoreSubject, StudioSession, DIRECT_PROMPT_NOTE,
    };

    fn png_base64(width: u32, height: u32) -> String {
        let canvas = image::RgbImage::new(width, height);
        let mut buffer = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(canvas)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("png encode");
        BASE64.encode(buffer.into_inner())
    }

    fn png_image(width: u32, height: u32) -> InlineImage {
        InlineImage::new(png_base64(width, height), "image/png")
    }

    const BILINGUAL: &str = r#"{"english":"scripted english","vietnamese":"scripted vietnamese"}"#;

    #[derive(Debug, Clone)]
    enum GatewayCall {
        StructuredText {
            instruction: String,
            image_count: usize,
            schema: Value,
        },
        FreeText {
            instruction: String,
        },
        GenerateImages {
            prompt: String,
            count: u32,
            ratio: AspectRatio,
        },
        EditImage {
            instruction: String,
            image_count: usize,
            seed: Option<i64>,
        },
    }

    #[derive(Default)]
    struct ScriptedState {
        calls: Mutex<Vec<GatewayCall>>,
        text_queue: Mutex<VecDeque<Result<String, StudioError>>>,
        edit_queue: Mutex<VecDeque<Result<String, StudioError>>>,
        images_response: Mutex<Option<Result<Vec<String>, StudioError>>>,
    }

    #[derive(Default, Clone)]
    struct ScriptedGateway {
        state: Arc<ScriptedState>,
    }

    impl ScriptedGateway {
        fn queue_text(&self, response: Result<String, StudioError>) {
            self.state.text_queue.lock().unwrap().push_back(response);
        }

        fn queue_edit(&self, response: Result<String, StudioError>) {
            self.state.edit_queue.lock().unwrap().push_back(response);
        }

        fn set_images(&self, response: Result<Vec<String>, StudioError>) {
            *self.state.images_response.lock().unwrap() = Some(response);
        }

        fn calls(&self) -> Vec<GatewayCall> {
            self.state.calls.lock().unwrap().clone()
        }

        fn record(&self, call: GatewayCall) {
            self.state.calls.lock().unwrap().push(call);
        }
    }

    fn text_of(parts: &[ContentPart]) -> String {
        parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn image_count(parts: &[ContentPart]) -> usize {
        parts
            .iter()
            .filter(|part| matches!(part, ContentPart::Image(_)))
            .count()
    }

    impl GenerationGateway for ScriptedGateway {
        fn structured_text(
            &self,
            parts: &[ContentPart],
            schema: &Value,
        ) -> Result<String, StudioError> {
            self.record(GatewayCall::StructuredText {
                instruction: text_of(parts),
                image_count: image_count(parts),
                schema: schema.clone(),
            });
            self.state
                .text_queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(BILINGUAL.to_string()))
        }

        fn free_text(&self, parts: &[ContentPart]) -> Result<String, StudioError> {
            self.record(GatewayCall::FreeText {
                instruction: text_of(parts),
            });
            self.state
                .text_queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("scripted video prompt".to_string()))
        }

        fn generate_images(
            &self,
            prompt: &str,
            count: u32,
            ratio: AspectRatio,
        ) -> Result<Vec<String>, StudioError> {
            self.record(GatewayCall::GenerateImages {
                prompt: prompt.to_string(),
                count,
                ratio,
            });
            self.state
                .images_response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok((0..count).map(|_| png_base64(8, 8)).collect()))
        }

        fn edit_image(
            &self,
            parts: &[ContentPart],
            seed: Option<i64>,
        ) -> Result<String, StudioError> {
            self.record(GatewayCall::EditImage {
                instruction: text_of(parts),
                image_count: image_count(parts),
                seed,
            });
            self.state
                .edit_queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(png_base64(8, 8)))
        }
    }

    fn scripted_session() -> (StudioSession, ScriptedGateway) {
        let gateway = ScriptedGateway::default();
        let session = StudioSession::new(Box::new(gateway.clone()));
        (session, gateway)
    }

    fn cinematic_options() -> TechOptions {
        TechOptions {
            style: Some("Cinematic".to_string()),
            ..TechOptions::default()
        }
    }

    // --- composer ---------------------------------------------------------

    #[test]
    fn focused_instruction_embeds_idea_branch_preferences_and_structure() {
        let instruction = compose_idea_instruction(
            "a lone astronaut on a red dune",
            Some(Branch::LandscapeScene),
            &cinematic_options(),
            AnalysisMode::Focused,
        )
        .expect("focused composition succeeds");
        assert!(instruction.contains("a lone astronaut on a red dune"));
        assert!(instruction.contains("landscape_scene"));
        assert!(instruction.contains("- Style: Cinematic"));
        assert!(instruction.contains("scene_concept"));
        assert!(instruction.contains("art_style"));
        assert!(instruction.contains("negative prompt"));
    }

    #[test]
    fn branch_requirement_follows_mode_capabilities() {
        for mode in [AnalysisMode::Focused, AnalysisMode::Super] {
            let result =
                compose_idea_instruction("a quiet harbor", None, &TechOptions::default(), mode);
            assert!(
                matches!(result, Err(StudioError::Validation(_))),
                "{} should require a branch",
                mode.key()
            );
        }
        for mode in [AnalysisMode::Freestyle, AnalysisMode::InDepth] {
            assert!(
                compose_idea_instruction("a quiet harbor", None, &TechOptions::default(), mode)
                    .is_ok(),
                "{} should not require a branch",
                mode.key()
            );
        }
    }

    #[test]
    fn empty_idea_is_a_validation_error() {
        let result = compose_idea_instruction(
            "   ",
            Some(Branch::ModernHuman),
            &TechOptions::default(),
            AnalysisMode::Focused,
        );
        assert!(matches!(result, Err(StudioError::Validation(_))));
    }

    #[test]
    fn every_idea_mode_requests_a_negative_prompt() {
        for mode in AnalysisMode::ALL {
            let branch = mode.requires_branch().then_some(Branch::ModernCreature);
            let instruction =
                compose_idea_instruction("a glass dragon", branch, &TechOptions::default(), mode)
                    .expect("composition succeeds");
            assert!(
                instruction.to_ascii_lowercase().contains("negative prompt"),
                "{} must request a negative prompt",
                mode.key()
            );
        }
    }

    #[test]
    fn classification_instruction_lists_the_closed_branch_set() {
        let instruction = compose_classification_instruction();
        for branch in Branch::ALL {
            assert!(instruction.contains(branch.key()));
        }
    }

    #[test]
    fn video_super_mode_asks_for_theme_inference_in_one_instruction() {
        let instruction = compose_video_instruction("a storm chaser at dusk", AnalysisMode::Super)
            .expect("video composition succeeds");
        assert!(instruction.contains("identify its core genre and theme"));
        assert!(instruction.contains("a storm chaser at dusk"));
    }

    #[test]
    fn continuation_super_falls_back_to_in_depth_guideline() {
        let in_depth = compose_continuation_instruction(
            "previous scene",
            "the chase continues",
            AnalysisMode::InDepth,
        )
        .expect("in_depth continuation");
        let super_mode = compose_continuation_instruction(
            "previous scene",
            "the chase continues",
            AnalysisMode::Super,
        )
        .expect("super continuation");
        assert_eq!(in_depth, super_mode);
        assert!(in_depth.contains("previous scene"));
        assert!(in_depth.contains("the chase continues"));
    }

    #[test]
    fn restore_instruction_reflects_subject_details() {
        let single = compose_restore_instruction(&RestoreSubject::SinglePerson {
            gender: Some("female".to_string()),
            age: Some("around 70".to_string()),
            description: None,
        });
        assert!(single.contains("a single person"));
        assert!(single.contains("Gender: female."));
        assert!(single.contains("Approximate age: around 70."));

        let group = compose_restore_instruction(&RestoreSubject::MultiplePeople {
            description: Some("a wedding in 1960s Saigon".to_string()),
        });
        assert!(group.contains("multiple people"));
        assert!(group.contains("Scene description: a wedding in 1960s Saigon."));
    }

    // --- aspect ratio resolution -----------------------------------------

    #[test]
    fn auto_ratio_snaps_from_source_image_dimensions() {
        let source = png_image(32, 18);
        assert_eq!(
            resolve_aspect_ratio(AspectRatio::Auto, Some(&source), AspectRatio::Square),
            AspectRatio::Widescreen
        );
    }

    #[test]
    fn auto_ratio_without_source_takes_context_default() {
        assert_eq!(
            resolve_aspect_ratio(AspectRatio::Auto, None, AspectRatio::Square),
            AspectRatio::Square
        );
        assert_eq!(
            resolve_aspect_ratio(AspectRatio::Auto, None, AspectRatio::Widescreen),
            AspectRatio::Widescreen
        );
    }

    #[test]
    fn concrete_ratio_is_never_overridden() {
        let source = png_image(32, 18);
        assert_eq!(
            resolve_aspect_ratio(AspectRatio::Portrait, Some(&source), AspectRatio::Square),
            AspectRatio::Portrait
        );
    }

    // --- session workflows ------------------------------------------------

    #[test]
    fn idea_workflow_composes_generates_and_records() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(
            r#"{"english":"An astronaut crossing a crimson dune sea","vietnamese":"Một phi hành gia băng qua biển cát đỏ"}"#
                .to_string(),
        ));
        gateway.set_images(Ok(vec![png_base64(16, 9)]));

        let outcome = session
            .create_from_idea(
                &IdeaRequest {
                    idea: "a lone astronaut on a red dune".to_string(),
                    branch: Some(Branch::LandscapeScene),
                    options: cinematic_options(),
                    mode: AnalysisMode::Focused,
                },
                &GenerationSettings {
                    count: 1,
                    ratio: AspectRatio::Widescreen,
                },
            )
            .expect("workflow succeeds");

        let prompts = outcome.prompts.expect("prompts present");
        assert_eq!(prompts.english, "An astronaut crossing a crimson dune sea");
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].resolution, "16 x 9");
        assert_eq!(
            outcome.artifacts[0].source_prompt.as_deref(),
            Some("An astronaut crossing a crimson dune sea")
        );
        assert_eq!(session.history().len(), 1);

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            GatewayCall::StructuredText { instruction, .. } => {
                assert!(instruction.contains("a lone astronaut on a red dune"));
                assert!(instruction.contains("landscape_scene"));
                assert!(instruction.contains("- Style: Cinematic"));
                assert!(instruction.contains("scene_concept"));
            }
            other => panic!("expected structured text call, got {other:?}"),
        }
        match &calls[1] {
            GatewayCall::GenerateImages { prompt, count, ratio } => {
                assert_eq!(prompt, "An astronaut crossing a crimson dune sea");
                assert_eq!(*count, 1);
                assert_eq!(*ratio, AspectRatio::Widescreen);
            }
            other => panic!("expected image generation call, got {other:?}"),
        }
    }

    #[test]
    fn direct_prompt_skips_composition_and_notes_the_source() {
        let (mut session, gateway) = scripted_session();
        let outcome = session
            .create_from_prompt(
                "hyperreal koi pond at dawn",
                &GenerationSettings {
                    count: 1,
                    ratio: AspectRatio::Square,
                },
            )
            .expect("direct prompt workflow succeeds");
        let prompts = outcome.prompts.expect("prompts present");
        assert_eq!(prompts.english, "hyperreal koi pond at dawn");
        assert_eq!(prompts.vietnamese, DIRECT_PROMPT_NOTE);
        assert!(matches!(
            gateway.calls().as_slice(),
            [GatewayCall::GenerateImages { .. }]
        ));
    }

    #[test]
    fn edit_fans_out_with_seeds_zero_to_n() {
        let (mut session, gateway) = scripted_session();
        let source = png_image(10, 10);
        let artifacts = session
            .edit(
                &source,
                "make it rain",
                &GenerationSettings {
                    count: 3,
                    ratio: AspectRatio::Square,
                },
            )
            .expect("edit fan-out succeeds");
        assert_eq!(artifacts.len(), 3);
        assert_eq!(session.history().len(), 3);

        let mut seeds: Vec<Option<i64>> = gateway
            .calls()
            .iter()
            .map(|call| match call {
                GatewayCall::EditImage { seed, instruction, .. } => {
                    assert!(instruction.contains("make it rain"));
                    assert!(instruction.contains("aspect ratio MUST be exactly 1:1"));
                    *seed
                }
                other => panic!("expected edit call, got {other:?}"),
            })
            .collect();
        seeds.sort();
        assert_eq!(seeds, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn single_edit_variant_carries_no_seed() {
        let (mut session, gateway) = scripted_session();
        let source = png_image(10, 10);
        session
            .edit(&source, "add a lighthouse", &GenerationSettings::default())
            .expect("single edit succeeds");
        assert!(matches!(
            gateway.calls().as_slice(),
            [GatewayCall::EditImage { seed: None, .. }]
        ));
    }

    #[test]
    fn failed_variant_discards_the_whole_batch() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_edit(Ok(png_base64(8, 8)));
        gateway.queue_edit(Err(StudioError::GenerationRefused));
        gateway.queue_edit(Ok(png_base64(8, 8)));
        let source = png_image(10, 10);
        let result = session.edit(
            &source,
            "make it rain",
            &GenerationSettings {
                count: 3,
                ratio: AspectRatio::Square,
            },
        );
        assert!(matches!(result, Err(StudioError::GenerationRefused)));
        assert!(session.history().is_empty());
        assert_eq!(gateway.calls().len(), 3, "join waits for every variant");
    }

    #[test]
    fn generation_failure_preserves_existing_history() {
        let (mut session, gateway) = scripted_session();
        session
            .create_from_prompt("first artwork", &GenerationSettings::default())
            .expect("seed history");
        assert_eq!(session.history().len(), 1);

        gateway.set_images(Err(StudioError::GenerationEmpty));
        let result = session.create_from_prompt("second artwork", &GenerationSettings::default());
        assert!(matches!(result, Err(StudioError::GenerationEmpty)));
        assert_eq!(session.history().len(), 1, "partial history preserved");
    }

    #[test]
    fn history_stays_bounded_across_workflows() {
        let (mut session, gateway) = scripted_session();
        for round in 0..5 {
            gateway.set_images(Ok(vec![png_base64(4, 4), png_base64(4, 4)]));
            session
                .create_from_prompt(&format!("artwork {round}"), &GenerationSettings::default())
                .expect("generation succeeds");
        }
        assert_eq!(session.history().len(), 8);
        assert_eq!(
            session.history().items()[0].source_prompt.as_deref(),
            Some("artwork 4")
        );
    }

    #[test]
    fn focused_image_analysis_classifies_then_details() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(r#"{"category":"modern_creature"}"#.to_string()));
        gateway.queue_text(Ok(BILINGUAL.to_string()));

        let pair = session
            .analyze_image(
                &png_image(12, 12),
                AnalysisMode::Focused,
                &TechOptions::default(),
            )
            .expect("two-step analysis succeeds");
        assert_eq!(pair.english, "scripted english");

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            GatewayCall::StructuredText {
                instruction,
                image_count,
                schema,
            } => {
                assert!(instruction.contains("classify it into one of the following categories"));
                assert_eq!(*image_count, 1);
                assert!(schema["properties"]["category"]["enum"].is_array());
            }
            other => panic!("expected classification call, got {other:?}"),
        }
        match &calls[1] {
            GatewayCall::StructuredText { instruction, .. } => {
                assert!(instruction.contains("modern_creature"));
                assert!(instruction.contains("creature_concept"));
            }
            other => panic!("expected detail call, got {other:?}"),
        }
    }

    #[test]
    fn super_image_analysis_uses_the_same_two_step_pattern() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(r#"{"category":"prehistoric_human"}"#.to_string()));
        gateway.queue_text(Ok(BILINGUAL.to_string()));

        session
            .analyze_image(
                &png_image(12, 12),
                AnalysisMode::Super,
                &TechOptions::default(),
            )
            .expect("super analysis succeeds");

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        match &calls[1] {
            GatewayCall::StructuredText { instruction, .. } => {
                assert!(instruction.contains("prehistoric_human"));
                assert!(instruction.contains("professional camera gear"));
            }
            other => panic!("expected detail call, got {other:?}"),
        }
    }

    #[test]
    fn empty_classification_label_aborts_before_the_second_call() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok("   ".to_string()));
        let result = session.analyze_image(
            &png_image(12, 12),
            AnalysisMode::Focused,
            &TechOptions::default(),
        );
        assert!(matches!(result, Err(StudioError::Classification(_))));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[test]
    fn out_of_enum_classification_label_fails() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(r#"{"category":"abstract_sculpture"}"#.to_string()));
        let result = session.analyze_image(
            &png_image(12, 12),
            AnalysisMode::Super,
            &TechOptions::default(),
        );
        assert!(matches!(result, Err(StudioError::Classification(_))));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[test]
    fn in_depth_image_analysis_uses_nested_schema_single_call() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(
            r#"{"descriptions":{"english":"a misty harbor","vietnamese":"một bến cảng mù sương"}}"#
                .to_string(),
        ));
        let pair = session
            .analyze_image(
                &png_image(12, 12),
                AnalysisMode::InDepth,
                &TechOptions::default(),
            )
            .expect("in-depth analysis succeeds");
        assert_eq!(pair.english, "a misty harbor");
        assert_eq!(pair.vietnamese, "một bến cảng mù sương");

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            GatewayCall::StructuredText { schema, .. } => {
                assert!(schema["properties"]["descriptions"].is_object());
            }
            other => panic!("expected structured call, got {other:?}"),
        }
    }

    #[test]
    fn create_from_image_snaps_auto_ratio_from_the_upload() {
        let (mut session, gateway) = scripted_session();
        let outcome = session
            .create_from_image(
                &png_image(32, 18),
                AnalysisMode::Freestyle,
                &TechOptions::default(),
                &GenerationSettings {
                    count: 1,
                    ratio: AspectRatio::Auto,
                },
            )
            .expect("image workflow succeeds");
        assert!(outcome.prompts.is_some());
        let ratio = gateway
            .calls()
            .iter()
            .find_map(|call| match call {
                GatewayCall::GenerateImages { ratio, .. } => Some(*ratio),
                _ => None,
            })
            .expect("image generation issued");
        assert_eq!(ratio, AspectRatio::Widescreen);
    }

    #[test]
    fn face_swap_chains_scene_synthesis_and_identity_preserving_edits() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(
            r#"{"english":"a rain-soaked neon alley","vietnamese":"một con hẻm neon ướt mưa"}"#
                .to_string(),
        ));
        let outcome = session
            .face_swap(
                &FaceSwapRequest {
                    portrait: png_image(9, 16),
                    source: FaceSwapSource::Description("a neon alley at night".to_string()),
                    options: TechOptions::default(),
                    mode: AnalysisMode::Freestyle,
                },
                &GenerationSettings {
                    count: 2,
                    ratio: AspectRatio::Auto,
                },
            )
            .expect("face swap succeeds");
        assert_eq!(outcome.artifacts.len(), 2);

        let calls = gateway.calls();
        assert!(matches!(calls[0], GatewayCall::StructuredText { .. }));
        let edits: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::EditImage { instruction, seed, .. } => {
                    Some((instruction.clone(), *seed))
                }
                _ => None,
            })
            .collect();
        assert_eq!(edits.len(), 2);
        for (instruction, _) in &edits {
            assert!(instruction.contains("Preserve 99.99% of the facial features"));
            assert!(instruction.contains("a rain-soaked neon alley"));
            assert!(instruction.contains("aspect ratio MUST be exactly 9:16"));
        }
        let mut seeds: Vec<_> = edits.iter().map(|(_, seed)| *seed).collect();
        seeds.sort();
        assert_eq!(seeds, vec![Some(0), Some(1)]);
    }

    #[test]
    fn composite_synthesizes_scene_once_then_fans_out_labeled_edits() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok(
            r#"{"english":"a sunlit plaza","vietnamese":"một quảng trường nắng"}"#.to_string(),
        ));
        let outcome = session
            .composite(
                &CompositeRequest {
                    characters: vec![png_image(8, 8), png_image(8, 8)],
                    background: Some(png_image(32, 18)),
                    description: "two friends meet at noon".to_string(),
                    options: TechOptions::default(),
                    mode: AnalysisMode::Freestyle,
                },
                &GenerationSettings {
                    count: 2,
                    ratio: AspectRatio::Auto,
                },
            )
            .expect("composite succeeds");
        assert_eq!(outcome.artifacts.len(), 2);

        let calls = gateway.calls();
        let structured = calls
            .iter()
            .filter(|call| matches!(call, GatewayCall::StructuredText { .. }))
            .count();
        assert_eq!(structured, 1, "scene is synthesized once");
        let edits: Vec<_> = calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::EditImage {
                    instruction,
                    image_count,
                    ..
                } => Some((instruction.clone(), *image_count)),
                _ => None,
            })
            .collect();
        assert_eq!(edits.len(), 2);
        for (instruction, images) in &edits {
            assert_eq!(*images, 3, "two characters plus the background");
            assert!(instruction.contains("This is Character 1."));
            assert!(instruction.contains("This is Character 2."));
            assert!(instruction.contains("This is the background image."));
            assert!(instruction.contains("a sunlit plaza"));
            assert!(instruction.contains("aspect ratio of 16:9"));
        }
    }

    #[test]
    fn composite_requires_characters_and_description() {
        let (mut session, gateway) = scripted_session();
        let missing_characters = session.composite(
            &CompositeRequest {
                characters: Vec::new(),
                background: None,
                description: "a plaza".to_string(),
                options: TechOptions::default(),
                mode: AnalysisMode::Freestyle,
            },
            &GenerationSettings::default(),
        );
        assert!(matches!(missing_characters, Err(StudioError::Validation(_))));
        let missing_description = session.composite(
            &CompositeRequest {
                characters: vec![png_image(8, 8)],
                background: None,
                description: "  ".to_string(),
                options: TechOptions::default(),
                mode: AnalysisMode::Freestyle,
            },
            &GenerationSettings::default(),
        );
        assert!(matches!(missing_description, Err(StudioError::Validation(_))));
        assert!(gateway.calls().is_empty(), "no remote call attempted");
    }

    #[test]
    fn restore_and_upscale_run_single_edit_tasks() {
        let (mut session, gateway) = scripted_session();
        session
            .restore(
                &png_image(6, 6),
                &RestoreSubject::SinglePerson {
                    gender: Some("male".to_string()),
                    age: None,
                    description: None,
                },
            )
            .expect("restore succeeds");
        session
            .upscale(&png_image(6, 6))
            .expect("upscale succeeds");
        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            GatewayCall::EditImage { instruction, seed, .. } => {
                assert!(instruction.contains("photo restoration task"));
                assert_eq!(*seed, None);
            }
            other => panic!("expected edit call, got {other:?}"),
        }
        match &calls[1] {
            GatewayCall::EditImage { instruction, .. } => {
                assert!(instruction.contains("Upscale this image."));
            }
            other => panic!("expected edit call, got {other:?}"),
        }
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn video_prompt_round_trips_free_text() {
        let (mut session, gateway) = scripted_session();
        gateway.queue_text(Ok("  A slow dolly shot across the dunes.  ".to_string()));
        let prompt = session
            .video_prompt("an astronaut walking", AnalysisMode::Focused)
            .expect("video prompt succeeds");
        assert_eq!(prompt, "A slow dolly shot across the dunes.");
        match &gateway.calls()[0] {
            GatewayCall::FreeText { instruction } => {
                assert!(instruction.contains("an astronaut walking"));
                assert!(instruction.contains("Focused Mode"));
            }
            other => panic!("expected free text call, got {other:?}"),
        }
    }

    // --- wire payload extraction ------------------------------------------

    #[test]
    fn text_parts_concatenate_like_the_sdk_accessor() {
        let payload = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "{\"english\":" },
                        { "text": "\"x\",\"vietnamese\":\"y\"}" },
                    ]
                }
            }]
        });
        assert_eq!(
            extract_text_parts(&payload),
            "{\"english\":\"x\",\"vietnamese\":\"y\"}"
        );
        assert_eq!(extract_text_parts(&json!({})), "");
    }

    #[test]
    fn inline_image_extraction_accepts_both_key_styles() {
        let camel = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "sure, here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "QUJD" } },
                ]}
            }]
        });
        assert_eq!(extract_inline_image_data(&camel), Some("QUJD".to_string()));

        let snake = json!({
            "candidates": [{
                "content": { "parts": [
                    { "inline_data": { "mime_type": "image/png", "data": "REVG" } },
                ]}
            }]
        });
        assert_eq!(extract_inline_image_data(&snake), Some("REVG".to_string()));
    }

    #[test]
    fn refusal_without_inline_image_yields_none() {
        let refusal = json!({
            "candidates": [{
                "content": { "parts": [ { "text": "I cannot help with that." } ] }
            }]
        });
        assert_eq!(extract_inline_image_data(&refusal), None);
    }

    #[test]
    fn predictions_extraction_handles_both_shapes() {
        let payload = json!({
            "predictions": [
                { "bytesBase64Encoded": "QUJD" },
                { "image": { "imageBytes": "REVG" } },
                { "unrelated": true },
            ]
        });
        assert_eq!(
            extract_predictions(&payload),
            vec!["QUJD".to_string(), "REVG".to_string()]
        );
        assert!(extract_predictions(&json!({})).is_empty());
    }

    #[test]
    fn artifact_resolution_is_derived_from_the_payload() {
        let artifact = artifact_from_base64(png_base64(24, 13), None).expect("decodes");
        assert_eq!(artifact.resolution, "24 x 13");
        assert!(artifact_from_base64("not base64!!!".to_string(), None).is_err());
    }

    // --- dryrun gateway ----------------------------------------------------

    #[test]
    fn dryrun_honors_the_classification_schema() {
        let gateway = DryrunGateway;
        let raw = gateway
            .structured_text(
                &[ContentPart::Text("classify".to_string())],
                &super::classification_schema(),
            )
            .expect("dryrun classification");
        let parsed: Value = serde_json::from_str(&raw).expect("valid json");
        let label = parsed["category"].as_str().expect("category label");
        assert!(Branch::from_key(label).is_some());
    }

    #[test]
    fn dryrun_artifacts_are_deterministic_per_seed() {
        let gateway = DryrunGateway;
        let parts = vec![
            ContentPart::Image(png_image(10, 10)),
            ContentPart::Text("edit".to_string()),
        ];
        let first = gateway.edit_image(&parts, Some(1)).expect("edit");
        let again = gateway.edit_image(&parts, Some(1)).expect("edit");
        let other = gateway.edit_image(&parts, Some(2)).expect("edit");
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn dryrun_generation_matches_requested_count_and_ratio() {
        let gateway = DryrunGateway;
        let images = gateway
            .generate_images("a koi pond", 3, AspectRatio::Vertical)
            .expect("dryrun generation");
        assert_eq!(images.len(), 3);
        let artifact = artifact_from_base64(images[0].clone(), None).expect("decodes");
        assert_eq!(artifact.resolution, "144 x 256");
    }
}
