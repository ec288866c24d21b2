use std::ffi::CString;
use std::path::Path;

use anyhow::{anyhow, Context};
use llama_cpp_2::mtmd::{mtmd_default_marker, MtmdBitmap, MtmdContext, MtmdContextParams, MtmdInputText};

use crate::image_input::SceneImage;

use super::native::{NativeChatModel, NativeModelConfig};
use super::{GenerationParams, SceneDescriber};

/// Vision-language model: a chat model plus its multimodal projector.
pub struct NativeVisionModel {
    // Declared before `chat`: the projector references the text model.
    mtmd: Option<MtmdContext>,
    chat: NativeChatModel,
    system_prompt: String,
    params: GenerationParams,
    marker: String,
}

impl NativeVisionModel {
    pub fn load(
        backend: &llama_cpp_2::llama_backend::LlamaBackend,
        cfg: NativeModelConfig,
        mmproj_path: &Path,
        system_prompt: String,
        params: GenerationParams,
    ) -> anyhow::Result<Self> {
        if !mmproj_path.exists() {
            return Err(anyhow!(
                "{} mmproj not found: {}",
                cfg.name,
                mmproj_path.display()
            ));
        }
        let use_gpu = cfg.gpu_layers != 0;
        let threads = cfg.threads;
        let chat = NativeChatModel::load(backend, cfg)?;

        let marker = mtmd_default_marker().to_string();
        let mtmd_params = MtmdContextParams {
            use_gpu,
            print_timings: false,
            n_threads: if threads > 0 { threads } else { 4 },
            media_marker: CString::new(marker.clone()).context("media marker")?,
            ..Default::default()
        };
        let path = mmproj_path
            .to_str()
            .ok_or_else(|| anyhow!("mmproj path is not valid UTF-8: {}", mmproj_path.display()))?;
        let mtmd = MtmdContext::init_from_file(path, chat.model_ref(), &mtmd_params)
            .with_context(|| format!("load mmproj {}", mmproj_path.display()))?;
        log::info!("loaded mmproj {} for {}", mmproj_path.display(), chat.name);

        Ok(Self {
            mtmd: Some(mtmd),
            chat,
            system_prompt,
            params,
            marker,
        })
    }

    fn mtmd_ref(&self) -> &MtmdContext {
        self.mtmd
            .as_ref()
            .expect("NativeVisionModel mtmd missing (use-after-drop)")
    }
}

impl SceneDescriber for NativeVisionModel {
    fn describe(&mut self, image: &SceneImage, prompt: &str) -> anyhow::Result<String> {
        let user = format!("{}\n{}", self.marker, prompt.trim());
        let text = self
            .chat
            .render_chat(Some(&self.system_prompt), &user)
            .context("render vision prompt")?;

        let bitmap = MtmdBitmap::from_image_data(image.width, image.height, &image.rgb)
            .map_err(|err| anyhow!("build image bitmap: {err}"))?;

        self.chat.clear_kv_cache();
        let chunks = self
            .mtmd_ref()
            .tokenize(
                MtmdInputText {
                    text,
                    add_special: true,
                    parse_special: true,
                },
                &[&bitmap],
            )
            .map_err(|err| anyhow!("tokenize image prompt: {err}"))?;

        let n_batch = self.chat.ctx_ref().n_batch() as i32;
        let n_past = chunks
            .eval_chunks(self.mtmd_ref(), self.chat.ctx_ref(), 0, 0, n_batch, true)
            .map_err(|err| anyhow!("{} eval image prompt: {err}", self.chat.name))?;

        let params = self.params;
        self.chat.sample_continuation(n_past, &[], &params)
    }
}

impl Drop for NativeVisionModel {
    fn drop(&mut self) {
        // Projector before the model it was built from.
        let _ = self.mtmd.take();
    }
}
