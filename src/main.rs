use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use vision_assistant::pipeline::{init_default_config, CliOverrides, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "vision-assistant")]
#[command(about = "Scene description service for visually impaired users (vision LLM + Korean translation)", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Config file path (default: search for vision-assistant.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (default: 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (default: 8000)
    #[arg(long)]
    port: Option<u16>,

    /// Vision backend name from config (e.g. qwen2_vl_2b)
    #[arg(long)]
    vision_backend: Option<String>,

    /// Translation backend name from config (e.g. translategemma_4b)
    #[arg(long)]
    translate_backend: Option<String>,

    /// Vision model GGUF (overrides vision_backend)
    #[arg(long)]
    vision_model: Option<PathBuf>,

    /// Multimodal projector GGUF for the vision model
    #[arg(long)]
    vision_mmproj: Option<PathBuf>,

    /// Translation model GGUF (overrides translate_backend)
    #[arg(long)]
    translate_model: Option<PathBuf>,

    /// Threads for llama.cpp (default: -1 = auto)
    #[arg(long)]
    threads: Option<i32>,

    /// GPU layers for llama.cpp (default: -1 = auto/offload as much as possible)
    #[arg(long)]
    gpu_layers: Option<i32>,

    /// Answer once for this image file instead of serving HTTP
    #[arg(long, value_name = "IMAGE", requires = "question")]
    image: Option<PathBuf>,

    /// Question for --image
    #[arg(long)]
    question: Option<String>,

    /// Answer language for --image (default: ko)
    #[arg(long, default_value = "ko")]
    language: String,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            host: self.host.clone(),
            port: self.port,
            vision_backend: self.vision_backend.clone(),
            translate_backend: self.translate_backend.clone(),
            vision_model: self.vision_model.clone(),
            vision_mmproj: self.vision_mmproj.clone(),
            translate_model: self.translate_model.clone(),
            threads: self.threads,
            gpu_layers: self.gpu_layers,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    vision_assistant::logging::init();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        log::info!("wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let cfg = ServiceConfig::from_overrides(args.overrides()).context("build config")?;
    log::info!("config: {}", cfg.config_path.display());

    run(args, cfg)
}

#[cfg(feature = "native")]
fn run(args: Args, cfg: ServiceConfig) -> anyhow::Result<()> {
    use vision_assistant::image_input::decode_base64_image;
    use vision_assistant::models::loader::load_native;
    use vision_assistant::pipeline::{AnswerRequest, Assistant};
    use vision_assistant::server::{startup, AppState, ServiceInfo};
    use vision_assistant::worker::spawn_worker;

    if let (Some(image_path), Some(question)) = (args.image.as_ref(), args.question.clone()) {
        let bytes = std::fs::read(image_path)
            .with_context(|| format!("read image: {}", image_path.display()))?;
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
        let image = decode_base64_image(&encoded, cfg.assistant.pixel_bounds)?;

        let (describer, translator) = load_native(&cfg)?;
        let mut assistant = Assistant::new(describer, translator, cfg.assistant.clone());
        let answer = assistant.answer(&AnswerRequest {
            image,
            question,
            language: args.language.clone(),
        })?;
        println!("{answer}");
        return Ok(());
    }

    let info = ServiceInfo {
        vl_model: cfg.vision_backend.name.clone(),
        translator: cfg.translate_backend.name.clone(),
    };
    let pixel_bounds = cfg.assistant.pixel_bounds;
    let char_delay = cfg.server.char_delay;
    let server_settings = cfg.server.clone();
    let assistant_settings = cfg.assistant.clone();

    let handle = spawn_worker(assistant_settings, move || load_native(&cfg))?;
    let state = AppState {
        handle,
        pixel_bounds,
        char_delay,
        info,
    };

    actix_web::rt::System::new()
        .block_on(startup(server_settings, state))
        .context("http server")?;
    Ok(())
}

#[cfg(not(feature = "native"))]
fn run(_args: Args, _cfg: ServiceConfig) -> anyhow::Result<()> {
    anyhow::bail!("built without the `native` feature; no inference backend available")
}
