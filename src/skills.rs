//! Skill discovery.
//!
//! Skills live under `<home>/skills/<id>/` as a `SKILL.md` body plus a
//! `manifest.json` with name and description. The runtime consumes them
//! read-only: enabled ids are persisted in KV and the summaries are
//! surfaced to the brain in each turn input.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the brain sees about one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct SkillManifest {
    name: String,
    #[serde(default)]
    description: String,
}

pub struct SkillRegistry {
    skills_dir: PathBuf,
}

impl SkillRegistry {
    pub fn new(skills_dir: PathBuf) -> Self {
        SkillRegistry { skills_dir }
    }

    /// List every skill directory with a readable manifest.
    pub fn list_available(&self) -> Vec<SkillSummary> {
        let Ok(entries) = std::fs::read_dir(&self.skills_dir) else {
            return Vec::new();
        };
        let mut skills = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let manifest_path = path.join("manifest.json");
            let Ok(raw) = std::fs::read_to_string(&manifest_path) else {
                continue;
            };
            let Ok(manifest) = serde_json::from_str::<SkillManifest>(&raw) else {
                log::warn!("[SKILLS] Skipping '{}': unreadable manifest", id);
                continue;
            };
            if !path.join("SKILL.md").is_file() {
                log::warn!("[SKILLS] Skipping '{}': missing SKILL.md", id);
                continue;
            }
            skills.push(SkillSummary {
                id,
                name: manifest.name,
                description: manifest.description,
            });
        }
        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }

    /// Available skills filtered by the enabled id set.
    pub fn list_enabled(&self, enabled_ids: &[String]) -> Vec<SkillSummary> {
        self.list_available()
            .into_iter()
            .filter(|s| enabled_ids.iter().any(|id| id == &s.id))
            .collect()
    }
}
