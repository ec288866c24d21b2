use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, resolve_backend, AppConfig, BackendDefaults,
    ResolvedBackend, CONFIG_ENV, CONFIG_FILENAME,
};
use crate::image_input::{PixelBounds, DEFAULT_MAX_PIXELS, DEFAULT_MIN_PIXELS};
use crate::models::GenerationParams;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};

pub const DEFAULT_VISION_BACKEND: &str = "qwen2_vl_2b";
pub const DEFAULT_TRANSLATE_BACKEND: &str = "translategemma_4b";

const VISION_DEFAULTS: BackendDefaults<'static> = BackendDefaults {
    filenames: &[
        "Qwen2-VL-2B-Instruct-Q4_K_M.gguf",
        "Qwen2-VL-2B-Instruct-Q8_0.gguf",
        "Qwen2-VL-2B-Instruct-f16.gguf",
    ],
    mmproj_filenames: &[
        "mmproj-Qwen2-VL-2B-Instruct-f16.gguf",
        "mmproj-Qwen2-VL-2B-Instruct-Q8_0.gguf",
    ],
    ctx_size: 4096,
    template_hint: None,
};

const TRANSLATE_DEFAULTS: BackendDefaults<'static> = BackendDefaults {
    filenames: &[
        "translategemma-4b-it.i1-Q5_K_S.gguf",
        "translategemma-4b-it.Q4_K_M.gguf",
    ],
    mmproj_filenames: &[],
    ctx_size: 2048,
    template_hint: Some("gemma"),
};

/// Knobs of the text pipeline that do not depend on the models.
#[derive(Clone, Debug)]
pub struct AssistantSettings {
    pub english_max_sentences: usize,
    pub korean_max_sentences: usize,
    pub log_max_chars: usize,
    pub pixel_bounds: PixelBounds,
    pub trace_dir: Option<PathBuf>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            english_max_sentences: 1,
            korean_max_sentences: 2,
            log_max_chars: 240,
            pixel_bounds: PixelBounds::default(),
            trace_dir: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_payload_bytes: usize,
    pub char_delay: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
            max_payload_bytes: 32 * 1024 * 1024,
            char_delay: Duration::from_millis(20),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub vision_backend: Option<String>,
    pub translate_backend: Option<String>,
    pub vision_model: Option<PathBuf>,
    pub vision_mmproj: Option<PathBuf>,
    pub translate_model: Option<PathBuf>,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub config_path: PathBuf,
    pub server: ServerSettings,
    pub assistant: AssistantSettings,

    pub vision_backend: ResolvedBackend,
    pub translate_backend: ResolvedBackend,
    pub threads: i32,
    pub gpu_layers: i32,

    pub vision_params: GenerationParams,
    pub translate_params: GenerationParams,
    pub prompts: PromptSet,
}

impl ServiceConfig {
    pub fn from_overrides(cli: CliOverrides) -> anyhow::Result<Self> {
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let cfg_file = cli
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if cli.config_path.is_some() {
                anyhow::bail!("config not found: {}", p.display());
            }
        }
        let config_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));

        let server = server_settings(&file_cfg, &cli);
        let assistant = assistant_settings(&file_cfg, &config_path);

        let model_dir = file_cfg
            .models
            .model_dir
            .clone()
            .unwrap_or_else(|| workdir.clone());

        let vision_name = cli
            .vision_backend
            .clone()
            .or_else(|| file_cfg.pipeline.vision_backend.clone())
            .unwrap_or_else(|| DEFAULT_VISION_BACKEND.to_string());
        let translate_name = cli
            .translate_backend
            .clone()
            .or_else(|| file_cfg.pipeline.translate_backend.clone())
            .unwrap_or_else(|| DEFAULT_TRANSLATE_BACKEND.to_string());

        let vision_backend = match cli.vision_model.clone() {
            Some(p) => {
                let mut b = ResolvedBackend::from_path(&vision_name, p, VISION_DEFAULTS.ctx_size);
                b.mmproj_path = cli.vision_mmproj.clone();
                b
            }
            None => {
                let mut b = resolve_backend(
                    &file_cfg,
                    &config_path,
                    &vision_name,
                    &model_dir,
                    VISION_DEFAULTS,
                )
                .context("resolve vision backend")?;
                if let Some(p) = cli.vision_mmproj.clone() {
                    b.mmproj_path = Some(p);
                }
                b
            }
        };
        let translate_backend = match cli.translate_model.clone() {
            Some(p) => {
                let mut b =
                    ResolvedBackend::from_path(&translate_name, p, TRANSLATE_DEFAULTS.ctx_size);
                b.template_hint = TRANSLATE_DEFAULTS.template_hint.map(|s| s.to_string());
                b
            }
            None => resolve_backend(
                &file_cfg,
                &config_path,
                &translate_name,
                &model_dir,
                TRANSLATE_DEFAULTS,
            )
            .context("resolve translate backend")?,
        };

        let threads = cli.threads.or(file_cfg.pipeline.threads).unwrap_or(-1);
        let gpu_layers = cli.gpu_layers.or(file_cfg.pipeline.gpu_layers).unwrap_or(-1);

        let vision_params = file_cfg.generation.vision.apply(GenerationParams::VISION);
        let translate_params = file_cfg
            .generation
            .translate
            .apply(GenerationParams::TRANSLATE);

        let prompts = PromptSet::load(&config_path, &file_cfg.prompts).context("load prompts")?;

        Ok(Self {
            config_path,
            server,
            assistant,
            vision_backend,
            translate_backend,
            threads,
            gpu_layers,
            vision_params,
            translate_params,
            prompts,
        })
    }
}

fn server_settings(file_cfg: &AppConfig, cli: &CliOverrides) -> ServerSettings {
    let defaults = ServerSettings::default();
    ServerSettings {
        host: cli
            .host
            .clone()
            .or_else(|| file_cfg.server.host.clone())
            .unwrap_or(defaults.host),
        port: cli.port.or(file_cfg.server.port).unwrap_or(defaults.port),
        workers: file_cfg.server.workers.filter(|n| *n > 0),
        max_payload_bytes: file_cfg
            .server
            .max_payload_mb
            .map(|mb| mb.max(1) * 1024 * 1024)
            .unwrap_or(defaults.max_payload_bytes),
        char_delay: file_cfg
            .stream
            .char_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.char_delay),
    }
}

fn assistant_settings(file_cfg: &AppConfig, config_path: &Path) -> AssistantSettings {
    let defaults = AssistantSettings::default();
    let p = &file_cfg.pipeline;
    let min_pixels = p.min_pixels.unwrap_or(DEFAULT_MIN_PIXELS).max(1);
    let max_pixels = p.max_pixels.unwrap_or(DEFAULT_MAX_PIXELS).max(min_pixels);
    let trace_dir = p
        .trace_dir
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .map(|d| {
            if d.is_relative() {
                config_path.parent().unwrap_or_else(|| Path::new(".")).join(d)
            } else {
                d
            }
        });
    AssistantSettings {
        english_max_sentences: p
            .english_max_sentences
            .unwrap_or(defaults.english_max_sentences),
        korean_max_sentences: p
            .korean_max_sentences
            .unwrap_or(defaults.korean_max_sentences),
        log_max_chars: p.log_max_chars.unwrap_or(defaults.log_max_chars),
        pixel_bounds: PixelBounds {
            min_pixels,
            max_pixels,
        },
        trace_dir,
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

pub const DEFAULT_CONFIG_TOML: &str = r#"[server]
host = "0.0.0.0"
port = 8000
max_payload_mb = 32

[stream]
char_delay_ms = 20

[pipeline]
vision_backend = "qwen2_vl_2b"
translate_backend = "translategemma_4b"

threads = -1
gpu_layers = -1

english_max_sentences = 1
korean_max_sentences = 2

# Image pixel bounds (256..512 patches of 28x28).
min_pixels = 200704
max_pixels = 401408

log_max_chars = 240
# trace_dir = "_trace"

[generation.vision]
max_tokens = 80
temperature = 0.7
top_p = 0.9
repeat_penalty = 1.3

[generation.translate]
max_tokens = 256
temperature = 0.0

[prompts]
system = "prompts/system.txt"
translate = "prompts/translate.txt"

[models]
model_dir = "."

[models.backends.qwen2_vl_2b]
path = "Qwen2-VL-2B-Instruct-Q4_K_M.gguf"
mmproj = "mmproj-Qwen2-VL-2B-Instruct-f16.gguf"
ctx_size = 4096
gpu_layers = -1
batch_size = 512
ubatch_size = 512
offload_kqv = true

[models.backends.translategemma_4b]
path = "translategemma-4b-it.i1-Q5_K_S.gguf"
template_hint = "gemma"
ctx_size = 2048
gpu_layers = -1
batch_size = 512
ubatch_size = 512
offload_kqv = true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn default_config_parses_and_matches_builtin_defaults() {
        let cfg = parse_config(DEFAULT_CONFIG_TOML).expect("parse default config");
        assert_eq!(cfg.pipeline.min_pixels, Some(DEFAULT_MIN_PIXELS));
        assert_eq!(cfg.pipeline.max_pixels, Some(DEFAULT_MAX_PIXELS));
        let vision = cfg.generation.vision.apply(GenerationParams::TRANSLATE);
        assert_eq!(vision.max_tokens, GenerationParams::VISION.max_tokens);
        assert_eq!(vision.top_k, None);
        assert!(vision.repeat_penalty.is_some());
        assert!(cfg.models.backends.contains_key(DEFAULT_VISION_BACKEND));
        assert!(cfg.models.backends.contains_key(DEFAULT_TRANSLATE_BACKEND));
    }

    #[test]
    fn settings_follow_file_and_cli_precedence() {
        let cfg = parse_config(
            r#"
[server]
host = "127.0.0.1"
port = 9000
max_payload_mb = 4

[stream]
char_delay_ms = 0

[pipeline]
korean_max_sentences = 3
min_pixels = 500
max_pixels = 100
trace_dir = "_trace"
"#,
        )
        .expect("parse");
        let cli = CliOverrides {
            port: Some(7000),
            ..Default::default()
        };
        let server = server_settings(&cfg, &cli);
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 7000);
        assert_eq!(server.max_payload_bytes, 4 * 1024 * 1024);
        assert_eq!(server.char_delay, Duration::ZERO);

        let assistant = assistant_settings(&cfg, Path::new("/etc/va/vision-assistant.toml"));
        assert_eq!(assistant.korean_max_sentences, 3);
        assert_eq!(assistant.english_max_sentences, 1);
        assert_eq!(assistant.pixel_bounds.min_pixels, 500);
        assert_eq!(assistant.pixel_bounds.max_pixels, 500);
        assert_eq!(assistant.trace_dir, Some(PathBuf::from("/etc/va/_trace")));
    }

    #[test]
    fn init_writes_config_and_prompts() {
        let dir = std::env::temp_dir().join(format!("va-init-{}", std::process::id()));
        let path = init_default_config(&dir, true).expect("init");
        assert!(path.ends_with(CONFIG_FILENAME));
        assert!(dir.join("prompts").join("system.txt").exists());
        assert!(dir.join("prompts").join("translate.txt").exists());
        let cfg = load_config(&path).expect("reload");
        assert_eq!(cfg.server.port, Some(8000));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
