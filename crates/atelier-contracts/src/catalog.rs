use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Subject-domain template for prompt synthesis.
///
/// Each branch owns a fixed, ordered set of descriptive slots; the slot
/// texts are hints for the generative model, never user-editable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    ModernHuman,
    PrehistoricHuman,
    ModernCreature,
    PrehistoricCreature,
    LandscapeScene,
}

impl Branch {
    pub const ALL: [Branch; 5] = [
        Branch::ModernHuman,
        Branch::PrehistoricHuman,
        Branch::ModernCreature,
        Branch::PrehistoricCreature,
        Branch::LandscapeScene,
    ];

    /// Stable wire key, also used verbatim inside composed instructions.
    pub fn key(self) -> &'static str {
        match self {
            Branch::ModernHuman => "modern_human",
            Branch::PrehistoricHuman => "prehistoric_human",
            Branch::ModernCreature => "modern_creature",
            Branch::PrehistoricCreature => "prehistoric_creature",
            Branch::LandscapeScene => "landscape_scene",
        }
    }

    pub fn from_key(raw: &str) -> Option<Branch> {
        let normalized = raw.trim().to_ascii_lowercase();
        Branch::ALL
            .into_iter()
            .find(|branch| branch.key() == normalized)
    }

    /// Vietnamese display label shown in the studio UI.
    pub fn label_vi(self) -> &'static str {
        match self {
            Branch::ModernHuman => "Con người Hiện đại",
            Branch::PrehistoricHuman => "Con người Tiền sử",
            Branch::ModernCreature => "Sinh vật Hiện đại",
            Branch::PrehistoricCreature => "Sinh vật Tiền sử",
            Branch::LandscapeScene => "Cảnh quan / Bối cảnh",
        }
    }

    /// Branch-specific slots in declaration order.
    pub fn slot_hints(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Branch::ModernHuman => &[
                (
                    "character_concept",
                    "e.g., cyberpunk hacker, elegant queen, gritty detective, futuristic soldier",
                ),
                (
                    "clothing_style",
                    "e.g., high-fashion couture, tactical gear, vintage streetwear, formal suit",
                ),
                (
                    "facial_expression",
                    "e.g., determined, serene, melancholic, joyful",
                ),
                (
                    "setting",
                    "e.g., neon-lit city street, opulent throne room, abandoned warehouse, high-tech lab",
                ),
            ],
            Branch::PrehistoricHuman => &[
                (
                    "character_concept",
                    "e.g., wise shaman, fierce hunter, tribal chieftain, young gatherer",
                ),
                (
                    "clothing_materials",
                    "e.g., animal hides, woven fibers, bone ornaments, leather straps",
                ),
                (
                    "tools_weapons",
                    "e.g., stone-tipped spear, obsidian knife, bow and arrow, ceremonial staff",
                ),
                (
                    "environment",
                    "e.g., lush jungle, icy tundra, savanna plains, cave dwelling with fire",
                ),
            ],
            Branch::ModernCreature => &[
                (
                    "creature_concept",
                    "e.g., bio-mechanical dragon, ethereal forest spirit, robotic wolf, colossal city leviathan",
                ),
                (
                    "key_features",
                    "e.g., glowing eyes, metallic feathers, crystalline scales, integrated weaponry",
                ),
                (
                    "abilities",
                    "e.g., breathes plasma, camouflages with light, controls technology, telekinetic powers",
                ),
                (
                    "habitat",
                    "e.g., post-apocalyptic city ruins, enchanted digital forest, deep-sea trench, orbital station",
                ),
            ],
            Branch::PrehistoricCreature => &[
                (
                    "creature_concept",
                    "e.g., tyrannosaurus rex with feathers, saber-toothed tiger, woolly mammoth, velociraptor pack",
                ),
                (
                    "physical_attributes",
                    "e.g., massive size, sharp claws, powerful jaws, thick fur, vibrant plumage",
                ),
                (
                    "behavior",
                    "e.g., hunting, grazing, migrating, defending territory",
                ),
                (
                    "environment",
                    "e.g., primordial swamp, volcanic landscape, dense fern forest, vast grasslands",
                ),
            ],
            Branch::LandscapeScene => &[
                (
                    "scene_concept",
                    "e.g., floating sky islands, futuristic underwater city, enchanted alien forest, volcanic wasteland",
                ),
                (
                    "key_elements",
                    "e.g., strange flora and fauna, towering crystal structures, ancient ruins, cascading waterfalls",
                ),
                (
                    "time_of_day",
                    "e.g., twin-sun sunset, bioluminescent night, perpetual twilight, stormy afternoon",
                ),
                (
                    "mood_atmosphere",
                    "e.g., mysterious and awe-inspiring, peaceful and serene, dangerous and foreboding, vibrant and full of life",
                ),
            ],
        }
    }
}

/// Slots shared by every branch.
pub const COMMON_SLOT_HINTS: [(&str, &str); 7] = [
    (
        "art_style",
        "e.g., photorealistic, cinematic, anime, watercolor, impressionistic",
    ),
    (
        "lighting",
        "e.g., soft morning light, dramatic chiaroscuro, neon glow, golden hour",
    ),
    (
        "color_palette",
        "e.g., vibrant and saturated, monochrome, pastel, earthy tones",
    ),
    (
        "camera_shot",
        "e.g., wide-angle, macro, aerial view, dutch angle, portrait",
    ),
    (
        "composition",
        "e.g., rule of thirds, leading lines, symmetrical, minimalist",
    ),
    (
        "detail_level",
        "e.g., hyper-detailed, intricate, simple, abstract",
    ),
    (
        "negative_prompt_suggestions",
        "e.g., ugly, deformed, blurry, bad anatomy, extra limbs",
    ),
];

/// Renders the `{common, <branch>}` JSON structure guide embedded in
/// focused-mode instructions. Slot order is declaration order; the map is
/// serialized through `IndexMap` so identical inputs always produce
/// byte-identical guides.
pub fn structure_guide(branch: Branch) -> String {
    let mut guide: IndexMap<&str, IndexMap<&str, &str>> = IndexMap::new();
    guide.insert("common", COMMON_SLOT_HINTS.into_iter().collect());
    guide.insert(branch.key(), branch.slot_hints().iter().copied().collect());
    serde_json::to_string_pretty(&guide).unwrap_or_else(|_| "{}".to_string())
}
