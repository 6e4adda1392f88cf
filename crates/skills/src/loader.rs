use std::path::Path;

use crate::manifest::SkillManifest;

/// Scan a directory of skills, one subdirectory per skill, each with a
/// `skill.toml`. Malformed manifests are skipped with a warning so one
/// bad skill cannot take down startup.
pub fn load_skills(skills_dir: &Path) -> Vec<SkillManifest> {
    let mut manifests = Vec::new();

    let entries = match std::fs::read_dir(skills_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::info!(dir = %skills_dir.display(), error = %e, "no skills directory");
            return manifests;
        }
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let manifest_path = dir.join("skill.toml");
        if !manifest_path.exists() {
            continue;
        }

        let raw = match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %manifest_path.display(), error = %e, "unreadable skill manifest, skipping");
                continue;
            }
        };
        match toml::from_str::<SkillManifest>(&raw) {
            Ok(mut manifest) => {
                manifest.dir = dir.clone();
                tracing::info!(
                    skill = %manifest.id,
                    actions = manifest.actions.len(),
                    "loaded skill"
                );
                manifests.push(manifest);
            }
            Err(e) => {
                tracing::warn!(path = %manifest_path.display(), error = %e, "invalid skill manifest, skipping");
            }
        }
    }

    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    manifests
}
