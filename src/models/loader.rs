use anyhow::{anyhow, Context};

use crate::pipeline::ServiceConfig;

use super::native::{llama_backend, NativeChatModel, NativeModelConfig, NativeTranslator};
use super::vision::NativeVisionModel;

/// Loads both models described by `cfg`. Must run on the thread that will use them.
pub fn load_native(cfg: &ServiceConfig) -> anyhow::Result<(NativeVisionModel, NativeTranslator)> {
    let backend = llama_backend()?;

    let vision_cfg = NativeModelConfig::from_backend(&cfg.vision_backend, cfg.threads, cfg.gpu_layers);
    let mmproj = cfg.vision_backend.mmproj_path.clone().ok_or_else(|| {
        anyhow!(
            "{}: no mmproj configured (set models.backends.{}.mmproj or --vision-mmproj)",
            cfg.vision_backend.name,
            cfg.vision_backend.name
        )
    })?;
    log::info!(
        "loading vision model {} from {}",
        vision_cfg.name,
        vision_cfg.model_path.display()
    );
    let vision = NativeVisionModel::load(
        backend,
        vision_cfg,
        &mmproj,
        cfg.prompts.system.clone(),
        cfg.vision_params,
    )
    .context("load vision model")?;

    let translate_cfg =
        NativeModelConfig::from_backend(&cfg.translate_backend, cfg.threads, cfg.gpu_layers);
    log::info!(
        "loading translation model {} from {}",
        translate_cfg.name,
        translate_cfg.model_path.display()
    );
    let translate_model =
        NativeChatModel::load(backend, translate_cfg).context("load translation model")?;
    let translator = NativeTranslator::new(
        translate_model,
        cfg.prompts.translate.clone(),
        cfg.translate_params,
    );

    Ok((vision, translator))
}
