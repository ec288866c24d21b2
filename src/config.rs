use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::models::GenerationParams;

pub const CONFIG_FILENAME: &str = "vision-assistant.toml";
pub const CONFIG_ENV: &str = "VISION_ASSISTANT_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub models: ModelsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// actix worker threads (default: number of physical cores).
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub max_payload_mb: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StreamSection {
    /// Delay between streamed characters.
    #[serde(default)]
    pub char_delay_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub vision_backend: Option<String>,
    #[serde(default)]
    pub translate_backend: Option<String>,

    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,

    #[serde(default)]
    pub english_max_sentences: Option<usize>,
    #[serde(default)]
    pub korean_max_sentences: Option<usize>,

    #[serde(default)]
    pub min_pixels: Option<u64>,
    #[serde(default)]
    pub max_pixels: Option<u64>,

    #[serde(default)]
    pub log_max_chars: Option<usize>,
    /// When set, every request dumps its prompt and intermediate answers here.
    #[serde(default)]
    pub trace_dir: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GenerationSection {
    #[serde(default)]
    pub vision: GenerationOverrides,
    #[serde(default)]
    pub translate: GenerationOverrides,
}

#[derive(Clone, Copy, Debug, Deserialize, Default)]
pub struct GenerationOverrides {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
}

impl GenerationOverrides {
    #[must_use]
    pub fn apply(&self, base: GenerationParams) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            repeat_penalty: self.repeat_penalty.or(base.repeat_penalty),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub translate: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub backends: HashMap<String, ModelBackend>,

    /// Preferred directory to locate model files when backend paths are relative.
    /// Can be absolute or relative to the config file directory.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelBackend {
    pub path: PathBuf,
    /// Multimodal projector (vision backends only).
    #[serde(default)]
    pub mmproj: Option<PathBuf>,
    #[serde(default)]
    pub template_hint: Option<String>,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub ubatch_size: Option<u32>,
    #[serde(default)]
    pub offload_kqv: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct ResolvedBackend {
    pub name: String,
    pub model_path: PathBuf,
    pub mmproj_path: Option<PathBuf>,
    pub template_hint: Option<String>,
    pub ctx_size: u32,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub offload_kqv: Option<bool>,
}

impl ResolvedBackend {
    /// Backend pointing straight at a model file, bypassing the config tables.
    pub fn from_path(name: &str, model_path: PathBuf, ctx_size: u32) -> Self {
        Self {
            name: name.to_string(),
            model_path,
            mmproj_path: None,
            template_hint: None,
            ctx_size,
            threads: None,
            gpu_layers: None,
            batch_size: None,
            ubatch_size: None,
            offload_kqv: None,
        }
    }
}

/// Fallback lookup for a backend that has no `[models.backends.<name>]` table.
#[derive(Clone, Copy, Debug)]
pub struct BackendDefaults<'a> {
    pub filenames: &'a [&'a str],
    pub mmproj_filenames: &'a [&'a str],
    pub ctx_size: u32,
    pub template_hint: Option<&'a str>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    toml::from_str(text).context("parse config toml")
}

fn search_dirs(cfg: &AppConfig, config_dir: &Path, fallback_search_dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(md) = cfg.models.model_dir.as_ref() {
        let mut p = md.clone();
        if p.is_relative() {
            p = config_dir.join(&p);
        }
        dirs.push(p);
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.to_path_buf());
        }
    }
    dirs.push(config_dir.to_path_buf());
    dirs.push(fallback_search_dir.to_path_buf());

    let mut seen: HashSet<PathBuf> = HashSet::new();
    dirs.retain(|d| d.is_dir() && seen.insert(d.clone()));
    dirs
}

fn resolve_relative(
    path: &Path,
    dirs: &[PathBuf],
    what: &str,
    backend: &str,
    config_path: &Path,
) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        if !path.exists() {
            return Err(anyhow!(
                "backend {backend} {what} not found: {} (config={})",
                path.display(),
                config_path.display()
            ));
        }
        return Ok(path.to_path_buf());
    }
    dirs.iter()
        .map(|dir| dir.join(path))
        .find(|cand| cand.exists())
        .ok_or_else(|| {
            anyhow!(
                "backend {backend} {what} not found: {} (searched: {}) (config={})",
                path.display(),
                dirs.iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
                config_path.display()
            )
        })
}

pub fn resolve_backend(
    cfg: &AppConfig,
    config_path: &Path,
    name: &str,
    fallback_search_dir: &Path,
    defaults: BackendDefaults<'_>,
) -> anyhow::Result<ResolvedBackend> {
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let dirs = search_dirs(cfg, config_dir, fallback_search_dir);

    if let Some(b) = cfg.models.backends.get(name) {
        let model_path = resolve_relative(&b.path, &dirs, "model", name, config_path)?;
        let mmproj_path = match b.mmproj.as_ref() {
            Some(p) => Some(resolve_relative(p, &dirs, "mmproj", name, config_path)?),
            None => find_any(&dirs, defaults.mmproj_filenames),
        };
        let template_hint = b
            .template_hint
            .as_deref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| defaults.template_hint.map(|s| s.to_string()));
        return Ok(ResolvedBackend {
            name: name.to_string(),
            model_path,
            mmproj_path,
            template_hint,
            ctx_size: b.ctx_size.unwrap_or(defaults.ctx_size),
            threads: b.threads,
            gpu_layers: b.gpu_layers,
            batch_size: b.batch_size,
            ubatch_size: b.ubatch_size,
            offload_kqv: b.offload_kqv,
        });
    }

    // Fallback: search by known filenames upwards from each search dir.
    if let Some(model_path) = find_any(&dirs, defaults.filenames) {
        return Ok(ResolvedBackend {
            name: name.to_string(),
            model_path,
            mmproj_path: find_any(&dirs, defaults.mmproj_filenames),
            template_hint: defaults.template_hint.map(|s| s.to_string()),
            ctx_size: defaults.ctx_size,
            threads: None,
            gpu_layers: None,
            batch_size: None,
            ubatch_size: None,
            offload_kqv: None,
        });
    }

    Err(anyhow!("backend not configured and not found: {name}"))
}

fn find_any(dirs: &[PathBuf], filenames: &[&str]) -> Option<PathBuf> {
    filenames
        .iter()
        .find_map(|fname| dirs.iter().find_map(|dir| find_file_upwards(dir, fname, 8)))
}
