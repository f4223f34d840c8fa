//! Prompt configuration: where instructions come from and how they resolve.
//!
//! The extraction core holds no prompt text of its own. Both instructions are
//! resolved at startup, per field, with this priority:
//!
//! 1. explicit override passed by the caller,
//! 2. environment (`RXSCRIBE_SYSTEM_PROMPT` / `RXSCRIBE_USER_PROMPT_TEMPLATE`),
//! 3. the JSON prompts file (default `config/prompts.json`),
//! 4. hard failure — running with an empty prompt would silently extract
//!    nothing, so the pipeline refuses to start instead.
//!
//! The user template must contain a `{filename}` placeholder; it is
//! substituted once per request with the image's display name.

use crate::error::RxscribeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the prompts file, relative to the working directory.
pub const DEFAULT_PROMPTS_PATH: &str = "config/prompts.json";

/// Environment override for the system instruction.
pub const SYSTEM_PROMPT_ENV: &str = "RXSCRIBE_SYSTEM_PROMPT";

/// Environment override for the user instruction template.
pub const USER_TEMPLATE_ENV: &str = "RXSCRIBE_USER_PROMPT_TEMPLATE";

const FILENAME_PLACEHOLDER: &str = "{filename}";

/// Resolved, validated prompt pair threaded into every extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub system: String,
    pub user_template: String,
}

/// On-disk shape of the prompts file. Both fields optional so a file can
/// supply just one of them while the other comes from the environment.
#[derive(Debug, Default, Deserialize)]
struct PromptsFile {
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    user_prompt_template: Option<String>,
}

impl PromptConfig {
    /// Build from explicit strings, validating the template placeholder.
    pub fn new(
        system: impl Into<String>,
        user_template: impl Into<String>,
    ) -> Result<Self, RxscribeError> {
        let config = Self {
            system: system.into(),
            user_template: user_template.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve both prompts through the override > env > file chain.
    ///
    /// `config_path = None` falls back to [`DEFAULT_PROMPTS_PATH`]; a missing
    /// file is fine as long as every field resolves from a higher-priority
    /// source, but an unreadable or unparseable file is a hard error.
    pub fn resolve(
        system_override: Option<&str>,
        template_override: Option<&str>,
        config_path: Option<&Path>,
    ) -> Result<Self, RxscribeError> {
        let path = config_path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| DEFAULT_PROMPTS_PATH.into());
        let file = load_prompts_file(&path)?;
        let path_display = path.display().to_string();

        let system = pick(system_override, SYSTEM_PROMPT_ENV, &file.system_prompt)
            .ok_or_else(|| RxscribeError::PromptMissing {
                path: path_display.clone(),
            })?;

        let user_template = pick(
            template_override,
            USER_TEMPLATE_ENV,
            &file.user_prompt_template,
        )
        .ok_or(RxscribeError::TemplateMissing { path: path_display })?;

        Self::new(system, user_template)
    }

    /// Substitute `{filename}` for this request's display name.
    pub fn user_instruction(&self, filename: &str) -> String {
        self.user_template.replace(FILENAME_PLACEHOLDER, filename)
    }

    fn validate(&self) -> Result<(), RxscribeError> {
        if self.system.trim().is_empty() {
            return Err(RxscribeError::PromptMissing {
                path: DEFAULT_PROMPTS_PATH.into(),
            });
        }
        if !self.user_template.contains(FILENAME_PLACEHOLDER) {
            return Err(RxscribeError::TemplateMissingPlaceholder);
        }
        Ok(())
    }
}

/// First non-empty candidate wins: override, then environment, then file.
fn pick(explicit: Option<&str>, env_var: &str, from_file: &Option<String>) -> Option<String> {
    if let Some(s) = explicit {
        if !s.trim().is_empty() {
            return Some(s.to_string());
        }
    }
    if let Ok(s) = std::env::var(env_var) {
        if !s.trim().is_empty() {
            return Some(s);
        }
    }
    from_file
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn load_prompts_file(path: &Path) -> Result<PromptsFile, RxscribeError> {
    if !path.exists() {
        return Ok(PromptsFile::default());
    }
    let text =
        std::fs::read_to_string(path).map_err(|e| RxscribeError::PromptConfigUnreadable {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
    serde_json::from_str(&text).map_err(|e| RxscribeError::PromptConfigUnreadable {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_override_wins() {
        let config = PromptConfig::resolve(
            Some("read the prescription"),
            Some("Extract from {filename}"),
            Some(Path::new("/nonexistent/prompts.json")),
        )
        .unwrap();
        assert_eq!(config.system, "read the prescription");
    }

    #[test]
    fn file_supplies_missing_fields() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"system_prompt": "from file", "user_prompt_template": "image {{filename}}"}}"#
        )
        .unwrap();

        let config = PromptConfig::resolve(None, None, Some(f.path())).unwrap();
        assert_eq!(config.system, "from file");
        assert_eq!(config.user_instruction("rx.jpg"), "image rx.jpg");
    }

    #[test]
    fn entirely_absent_is_a_hard_failure() {
        let err = PromptConfig::resolve(None, None, Some(Path::new("/nonexistent/p.json")))
            .unwrap_err();
        assert!(matches!(err, RxscribeError::PromptMissing { .. }));
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = PromptConfig::new("sys", "no slot here").unwrap_err();
        assert!(matches!(err, RxscribeError::TemplateMissingPlaceholder));
    }

    #[test]
    fn unparseable_file_is_a_hard_failure() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        let err = PromptConfig::resolve(Some("s"), Some("{{filename}}"), Some(f.path()));
        assert!(matches!(
            err,
            Err(RxscribeError::PromptConfigUnreadable { .. })
        ));
    }

    #[test]
    fn substitution_replaces_every_occurrence() {
        let config =
            PromptConfig::new("sys", "first {filename}, again {filename}").unwrap();
        assert_eq!(
            config.user_instruction("a.png"),
            "first a.png, again a.png"
        );
    }
}
