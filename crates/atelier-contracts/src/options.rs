use serde::{Deserialize, Serialize};

/// Sentinel meaning "leave this axis at its default".
pub const DEFAULT_OPTION: &str = "Mặc định";

/// Sparse technical preferences chosen by the user. An axis left `None` or
/// holding the sentinel contributes nothing to composed instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechOptions {
    pub style: Option<String>,
    pub layout: Option<String>,
    pub angle: Option<String>,
    pub quality: Option<String>,
}

impl TechOptions {
    /// Axes in declaration order. The order is part of the contract:
    /// identical inputs must render byte-identical instruction fragments.
    fn axes(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("Style", self.style.as_deref()),
            ("Layout", self.layout.as_deref()),
            ("Angle", self.angle.as_deref()),
            ("Quality", self.quality.as_deref()),
        ]
    }

    /// Ordered `- Axis: value` lines, skipping unset and sentinel axes.
    pub fn preference_lines(&self) -> Vec<String> {
        self.axes()
            .into_iter()
            .filter_map(|(axis, value)| {
                let value = value.map(str::trim).filter(|value| !value.is_empty())?;
                if value == DEFAULT_OPTION {
                    return None;
                }
                Some(format!("- {axis}: {value}"))
            })
            .collect()
    }

    pub fn is_all_default(&self) -> bool {
        self.preference_lines().is_empty()
    }

    /// The preferences block embedded in instructions, or the empty string
    /// when every axis is default. `requirement` states how strongly the
    /// model must honor the preferences ("follow these", "incorporate
    /// these into your description", ...).
    pub fn render_block(&self, requirement: &str) -> String {
        let lines = self.preference_lines();
        if lines.is_empty() {
            return String::new();
        }
        format!(
            "\n**User's Technical Preferences (IMPORTANT: You MUST {requirement}):**\n{}\n",
            lines.join("\n")
        )
    }
}

/// Option vocabulary offered per axis, sentinel first.
pub fn axis_choices() -> [(&'static str, &'static [&'static str]); 4] {
    [
        (
            "style",
            &[
                DEFAULT_OPTION,
                "Cinematic",
                "Photorealistic",
                "Anime",
                "Fantasy Art",
                "Cyberpunk",
                "Vintage",
            ],
        ),
        (
            "layout",
            &[DEFAULT_OPTION, "Portrait", "Landscape", "Close-up", "Wide Shot"],
        ),
        (
            "angle",
            &[DEFAULT_OPTION, "Eye-level", "High-angle", "Low-angle", "Dutch Angle"],
        ),
        (
            "quality",
            &[DEFAULT_OPTION, "Hyper-detailed", "8K", "Sharp focus", "Intricate details"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::{TechOptions, DEFAULT_OPTION};

    #[test]
    fn all_default_axes_render_nothing() {
        let options = TechOptions {
            style: Some(DEFAULT_OPTION.to_string()),
            layout: None,
            angle: Some(String::new()),
            quality: Some("  ".to_string()),
        };
        assert!(options.preference_lines().is_empty());
        assert!(options.is_all_default());
        assert_eq!(options.render_block("follow these"), "");
    }

    #[test]
    fn set_axes_render_in_declaration_order() {
        let options = TechOptions {
            style: Some("Cinematic".to_string()),
            layout: Some(DEFAULT_OPTION.to_string()),
            angle: Some("Low-angle".to_string()),
            quality: Some("8K".to_string()),
        };
        assert_eq!(
            options.preference_lines(),
            vec![
                "- Style: Cinematic".to_string(),
                "- Angle: Low-angle".to_string(),
                "- Quality: 8K".to_string(),
            ]
        );
    }

    #[test]
    fn identical_inputs_render_identical_blocks() {
        let options = TechOptions {
            style: Some("Vintage".to_string()),
            quality: Some("Sharp focus".to_string()),
            ..TechOptions::default()
        };
        let first = options.render_block("follow these");
        let second = options.clone().render_block("follow these");
        assert_eq!(first, second);
        assert!(first.contains("- Style: Vintage\n- Quality: Sharp focus"));
    }
}
