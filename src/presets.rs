use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// A named encoder argument template.
#[derive(Clone, Debug, PartialEq)]
pub struct Preset {
    pub name: String,
    pub category: String,
    pub template: String,
    pub description: String,
}

/// On-disk shape of one preset: `{"args": ..., "desc": ..., "category": ...}`.
#[derive(Serialize, Deserialize, Debug)]
struct PresetEntry {
    pub args: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    String::from("Other")
}

/// Read-only mapping of preset name to preset.
#[derive(Clone, Debug, Default)]
pub struct PresetSet {
    presets: HashMap<String, Preset>,
}

impl PresetSet {
    pub fn new() -> Self {
        PresetSet { presets: HashMap::new() }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries = serde_json::from_str::<HashMap<String, PresetEntry>>(json)?;
        let mut set = PresetSet::new();
        for (name, entry) in entries {
            set.insert(Preset {
                name,
                category: entry.category,
                template: entry.args,
                description: entry.desc,
            });
        }
        Ok(set)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        PresetSet::from_json_str(&json)
    }

    pub fn builtin() -> Self {
        let mut set = PresetSet::new();
        for (name, category, template, description) in [
            ("H264 2500k", "Video", "-c:v libx264 -preset medium -b:v 2500k -c:a aac -b:a 160k", "H.264 at a fixed bitrate, AAC audio"),
            ("H264 CRF 23", "Video", "-c:v libx264 -preset medium -crf 23 -c:a aac -b:a 128k", "H.264 constant quality"),
            ("HEVC CRF 26", "Video", "-c:v libx265 -preset medium -crf 26 -tag:v hvc1 -c:a copy", "HEVC constant quality, audio copied"),
            ("Remux", "Container", "-c copy -map 0", "Copy every stream without re-encoding"),
            ("MP3 192k", "Audio", "-vn -c:a libmp3lame -b:a 192k", "Extract audio to MP3"),
        ] {
            set.insert(Preset {
                name: String::from(name),
                category: String::from(category),
                template: String::from(template),
                description: String::from(description),
            });
        }
        set
    }

    pub fn insert(&mut self, preset: Preset) {
        self.presets.insert(preset.name.clone(), preset);
    }

    pub fn get(&self, name: &str) -> Result<&Preset> {
        self.presets
            .get(name.trim())
            .ok_or_else(|| ConvertError::UnknownPreset(String::from(name)))
    }

    /// Presets ordered by category, then name.
    pub fn sorted(&self) -> Vec<&Preset> {
        let mut presets: Vec<&Preset> = self.presets.values().collect();
        presets.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} :: {}", self.category, self.name)
    }
}
