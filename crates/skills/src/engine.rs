use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;

use hearth_domain::chat::ToolDefinition;
use hearth_domain::error::{Error, Result};
use hearth_tools::SkillEngine;

use crate::manifest::SkillManifest;

const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_CHARS: usize = 200_000;

/// Runs skill actions as subprocesses.
///
/// The declared command executes via `sh -c` in the skill's directory
/// with the call parameters serialized into `HEARTH_ACTION_PARAMS`.
/// Stdout is the result; a non-zero exit becomes an error carrying
/// stderr.
pub struct ScriptSkillEngine {
    skills: HashMap<String, SkillManifest>,
}

impl ScriptSkillEngine {
    /// Index manifests by their plugin namespace. Skills whose
    /// `requires` keys are unset in `configured` are left out.
    pub fn new(manifests: Vec<SkillManifest>, configured: &HashMap<String, String>) -> Self {
        let mut skills = HashMap::new();
        for manifest in manifests {
            let missing: Vec<&String> = manifest
                .requires
                .iter()
                .filter(|key| configured.get(*key).map(|v| v.is_empty()).unwrap_or(true))
                .collect();
            if !missing.is_empty() {
                tracing::info!(
                    skill = %manifest.id,
                    missing = ?missing,
                    "skill not configured, actions disabled"
                );
                continue;
            }
            skills.insert(manifest.plugin_name(), manifest);
        }
        Self { skills }
    }

    pub fn skill_count(&self) -> usize {
        self.skills.len()
    }
}

#[async_trait::async_trait]
impl SkillEngine for ScriptSkillEngine {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut plugin_names: Vec<&String> = self.skills.keys().collect();
        plugin_names.sort();
        plugin_names
            .into_iter()
            .flat_map(|name| self.skills[name].definitions())
            .collect()
    }

    async fn execute_action(&self, plugin: &str, action: &str, params: &Value) -> Result<String> {
        let manifest = self
            .skills
            .get(plugin)
            .ok_or_else(|| Error::Other(format!("skill not found: {plugin}")))?;
        let action = manifest
            .action(action)
            .ok_or_else(|| Error::Other(format!("action not found: {plugin}::{action}")))?;

        let params_json = serde_json::to_string(params)?;
        tracing::debug!(skill = %manifest.id, action = %action.name, "running skill action");

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&action.command)
            .current_dir(&manifest.dir)
            .env("HEARTH_ACTION_PARAMS", &params_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let waited = tokio::time::timeout(ACTION_TIMEOUT, async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(pipe) = &mut stdout_pipe {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(pipe) = &mut stderr_pipe {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await;
            (status, stdout, stderr)
        })
        .await;

        let (status, mut stdout, stderr) = match waited {
            Ok(r) => r,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "skill action exceeded {}s",
                    ACTION_TIMEOUT.as_secs()
                )));
            }
        };

        let status = status.map_err(Error::Io)?;
        if !status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::Other(format!(
                "action exited with {}: {detail}",
                status.code().unwrap_or(-1)
            )));
        }

        if stdout.len() > MAX_OUTPUT_CHARS {
            stdout.truncate(MAX_OUTPUT_CHARS);
        }
        Ok(stdout.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(dir: &std::path::Path, command: &str) -> SkillManifest {
        let mut m: SkillManifest = toml::from_str(&format!(
            r#"
id = "demo"
name = "Demo"
description = "Demo skill"
[[actions]]
name = "run"
description = "Run the demo"
command = '{command}'
"#
        ))
        .unwrap();
        m.dir = dir.to_path_buf();
        m
    }

    #[tokio::test]
    async fn action_captures_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ScriptSkillEngine::new(
            vec![manifest(tmp.path(), "echo hello from skill")],
            &HashMap::new(),
        );

        let out = engine
            .execute_action("skill_demo", "run", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out, "hello from skill");
    }

    #[tokio::test]
    async fn params_arrive_via_env() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ScriptSkillEngine::new(
            vec![manifest(tmp.path(), "printf %s \"$HEARTH_ACTION_PARAMS\"")],
            &HashMap::new(),
        );

        let out = engine
            .execute_action("skill_demo", "run", &serde_json::json!({"city": "Oslo"}))
            .await
            .unwrap();
        assert!(out.contains("\"city\":\"Oslo\""));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ScriptSkillEngine::new(
            vec![manifest(tmp.path(), "echo boom >&2; exit 3")],
            &HashMap::new(),
        );

        let err = engine
            .execute_action("skill_demo", "run", &serde_json::json!({}))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with 3"));
        assert!(msg.contains("boom"));
    }

    #[tokio::test]
    async fn unknown_action_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let engine =
            ScriptSkillEngine::new(vec![manifest(tmp.path(), "echo x")], &HashMap::new());
        assert!(engine
            .execute_action("skill_demo", "missing", &serde_json::json!({}))
            .await
            .is_err());
        assert!(engine
            .execute_action("skill_ghost", "run", &serde_json::json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unconfigured_skill_is_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manifest(tmp.path(), "echo x");
        m.requires = vec!["some_api_key".into()];

        let engine = ScriptSkillEngine::new(vec![m], &HashMap::new());
        assert_eq!(engine.skill_count(), 0);
        assert!(engine.definitions().is_empty());
    }

    #[tokio::test]
    async fn configured_skill_is_included() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manifest(tmp.path(), "echo x");
        m.requires = vec!["some_api_key".into()];

        let mut configured = HashMap::new();
        configured.insert("some_api_key".to_string(), "value".to_string());
        let engine = ScriptSkillEngine::new(vec![m], &configured);
        assert_eq!(engine.skill_count(), 1);
        assert_eq!(engine.definitions()[0].full_name(), "skill_demo__run");
    }
}
