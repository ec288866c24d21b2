use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::PromptsSection;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_SYSTEM: &str = "system.txt";
pub const DEFAULT_TRANSLATE: &str = "translate.txt";

pub const DEFAULT_SYSTEM_TEXT: &str = include_str!("../../prompts/system.txt");
pub const DEFAULT_TRANSLATE_TEXT: &str = include_str!("../../prompts/translate.txt");

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    /// System prompt for the vision model.
    pub system: String,
    /// Translation template; sees `{{source_lang}}`, `{{target_lang}}` and `{{text}}`.
    pub translate: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_TEXT.trim().to_string(),
            translate: DEFAULT_TRANSLATE_TEXT.trim().to_string(),
        }
    }
}

impl PromptSet {
    /// Reads prompt files relative to the config directory. Files that do not exist
    /// fall back to the built-in text.
    pub fn load(config_path: &Path, prompts: &PromptsSection) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let defaults = Self::default();
        Ok(Self {
            system: read_prompt(
                config_dir,
                prompts.system.as_deref(),
                DEFAULT_SYSTEM,
                defaults.system,
            )?,
            translate: read_prompt(
                config_dir,
                prompts.translate.as_deref(),
                DEFAULT_TRANSLATE,
                defaults.translate,
            )?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    configured: Option<&str>,
    default_filename: &str,
    fallback: String,
) -> anyhow::Result<String> {
    let rel = format!("{DEFAULT_PROMPTS_DIR}/{default_filename}");
    let mut p = PathBuf::from(configured.unwrap_or(&rel));
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        if configured.is_some() {
            log::warn!("prompt file not found: {} (using built-in)", p.display());
        }
        return Ok(fallback);
    }
    let text =
        std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(text.trim().to_string())
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_SYSTEM, DEFAULT_SYSTEM_TEXT),
        (DEFAULT_TRANSLATE, DEFAULT_TRANSLATE_TEXT),
    ]
}
