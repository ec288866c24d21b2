use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::DecodeError;
use once_cell::sync::OnceCell;

use crate::config::ResolvedBackend;
use crate::pipeline::render_template;
use crate::textutil::strip_model_wrapping;

use super::{GenerationParams, Translator};

pub const DEFAULT_SEED: u32 = 42;

static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

/// Process-wide llama.cpp backend; initialised on first use.
pub fn llama_backend() -> anyhow::Result<&'static LlamaBackend> {
    BACKEND.get_or_try_init(|| LlamaBackend::init().context("init llama backend"))
}

#[derive(Clone, Debug)]
pub struct NativeModelConfig {
    pub name: String,
    pub model_path: PathBuf,
    pub template_hint: Option<String>,
    pub ctx_size: u32,
    pub threads: i32,
    pub gpu_layers: i32,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub offload_kqv: Option<bool>,
    pub seed: u32,
}

impl NativeModelConfig {
    /// Per-backend values win over the global `threads` / `gpu_layers`.
    pub fn from_backend(backend: &ResolvedBackend, threads: i32, gpu_layers: i32) -> Self {
        Self {
            name: backend.name.clone(),
            model_path: backend.model_path.clone(),
            template_hint: backend.template_hint.clone(),
            ctx_size: backend.ctx_size,
            threads: backend.threads.unwrap_or(threads),
            gpu_layers: backend.gpu_layers.unwrap_or(gpu_layers),
            batch_size: backend.batch_size,
            ubatch_size: backend.ubatch_size,
            offload_kqv: backend.offload_kqv,
            seed: DEFAULT_SEED,
        }
    }
}

pub struct NativeChatModel {
    pub name: String,
    model: Option<Box<LlamaModel>>,
    ctx: Option<LlamaContext<'static>>,
    template: LlamaChatTemplate,
    seed: u32,
}

impl NativeChatModel {
    pub fn load(backend: &LlamaBackend, cfg: NativeModelConfig) -> anyhow::Result<Self> {
        if !cfg.model_path.exists() {
            return Err(anyhow!(
                "{} model not found: {}",
                cfg.name,
                cfg.model_path.display()
            ));
        }

        let mut model_params = LlamaModelParams::default();
        if cfg.gpu_layers == -1 {
            // -1 offloads everything; llama.cpp caps values above n_layer.
            model_params = model_params.with_n_gpu_layers(9999);
        } else if cfg.gpu_layers >= 0 {
            model_params = model_params.with_n_gpu_layers(cfg.gpu_layers as u32);
        }

        let model = Box::new(
            LlamaModel::load_from_file(backend, &cfg.model_path, &model_params)
                .with_context(|| format!("load model {}", cfg.model_path.display()))?,
        );
        // `LlamaContext` borrows `LlamaModel`. The model is boxed (stable address) and the
        // context gets a `'static` view of it.
        // SAFETY:
        // - The model allocation stays valid while `self.model` is `Some`.
        // - `Drop` releases `ctx` before `model`.
        let model_ptr: *const LlamaModel = &*model;
        let model_ref: &'static LlamaModel = unsafe { &*model_ptr };

        let ctx_train = model_ref.n_ctx_train();
        let mut ctx_size = cfg.ctx_size;
        if ctx_size == 0 {
            ctx_size = ctx_train.max(4096);
        }
        if ctx_train > 0 && ctx_size > ctx_train {
            ctx_size = ctx_train;
        }
        if ctx_size < 256 {
            ctx_size = 256;
        }

        let mut ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(ctx_size));
        let n_batch: u32 = cfg.batch_size.unwrap_or(512).clamp(8, 65536);
        let n_ubatch: u32 = cfg.ubatch_size.unwrap_or(n_batch).clamp(1, n_batch);
        ctx_params = ctx_params.with_n_batch(n_batch).with_n_ubatch(n_ubatch);
        if let Some(offload) = cfg.offload_kqv {
            ctx_params = ctx_params.with_offload_kqv(offload);
        }
        if cfg.threads > 0 {
            ctx_params = ctx_params.with_n_threads(cfg.threads);
            ctx_params = ctx_params.with_n_threads_batch(cfg.threads);
        }
        let ctx = model_ref
            .new_context(backend, ctx_params)
            .context("create model context")?;

        let template = match model_ref.chat_template(None) {
            Ok(t) => t,
            Err(_) => {
                let hint = cfg.template_hint.as_deref().unwrap_or("chatml");
                log::warn!("{}: no embedded chat template, using '{hint}'", cfg.name);
                LlamaChatTemplate::new(hint).context("build fallback chat template")?
            }
        };

        log::info!(
            "loaded {} ({}) ctx={} train_ctx={} gpu_layers={}",
            cfg.name,
            cfg.model_path.display(),
            ctx_size,
            ctx_train,
            cfg.gpu_layers
        );

        Ok(Self {
            name: cfg.name,
            model: Some(model),
            ctx: Some(ctx),
            template,
            seed: cfg.seed,
        })
    }

    /// Formats a single-turn conversation with the model's chat template.
    pub fn render_chat(&self, system_prompt: Option<&str>, user_prompt: &str) -> anyhow::Result<String> {
        let mut chat: Vec<LlamaChatMessage> = Vec::new();
        if let Some(s) = system_prompt {
            if !s.trim().is_empty() {
                chat.push(
                    LlamaChatMessage::new("system".to_string(), s.to_string())
                        .context("build system message")?,
                );
            }
        }
        chat.push(
            LlamaChatMessage::new("user".to_string(), user_prompt.to_string())
                .context("build user message")?,
        );
        self.model_ref()
            .apply_chat_template(&self.template, &chat, true)
            .context("apply chat template")
    }

    pub fn chat(
        &mut self,
        system_prompt: Option<&str>,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> anyhow::Result<String> {
        let prompt = self.render_chat(system_prompt, user_prompt)?;
        self.generate_from_prompt(&prompt, params)
    }

    fn generate_from_prompt(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> anyhow::Result<String> {
        self.clear_kv_cache();

        let add_bos = decide_add_bos(prompt);
        let prompt_tokens = self
            .model_ref()
            .str_to_token(prompt, add_bos)
            .context("tokenize prompt")?;
        if prompt_tokens.is_empty() {
            return Err(anyhow!("empty prompt tokens"));
        }

        let n_ctx = self.ctx_ref().n_ctx() as usize;
        if prompt_tokens.len() + 1 >= n_ctx {
            return Err(anyhow!(
                "prompt_too_long: prompt_tokens={} n_ctx={}",
                prompt_tokens.len(),
                n_ctx
            ));
        }

        let n_batch = self.ctx_ref().n_batch() as usize;
        if n_batch == 0 {
            return Err(anyhow!("invalid n_batch=0"));
        }

        let last_index = prompt_tokens.len() - 1;
        let mut chunk_start = 0;
        while chunk_start < prompt_tokens.len() {
            let chunk_end = (chunk_start + n_batch).min(prompt_tokens.len());
            let chunk = &prompt_tokens[chunk_start..chunk_end];

            let mut batch = LlamaBatch::new(chunk.len().max(512), 1);
            for (i, token) in chunk.iter().copied().enumerate() {
                let pos = (chunk_start + i) as i32;
                let is_last = (chunk_start + i) == last_index;
                batch
                    .add(token, pos, &[0], is_last)
                    .context("batch.add(prompt)")?;
            }

            self.decode_checked(&mut batch, "decode prompt")?;
            chunk_start = chunk_end;
        }

        self.sample_continuation(prompt_tokens.len() as i32, &prompt_tokens, params)
    }

    /// Samples up to `params.max_tokens` tokens after a prompt that already sits in
    /// the KV cache at positions `0..n_past`. `history` feeds the repetition penalty.
    pub(crate) fn sample_continuation(
        &mut self,
        n_past: i32,
        history: &[LlamaToken],
        params: &GenerationParams,
    ) -> anyhow::Result<String> {
        let n_ctx = self.ctx_ref().n_ctx() as usize;
        let available = n_ctx.saturating_sub(n_past.max(0) as usize + 1);
        if available == 0 {
            return Err(anyhow!(
                "no room for generation: n_past={} n_ctx={}",
                n_past,
                n_ctx
            ));
        }
        let max_tokens = (params.max_tokens as usize).min(available);

        let mut sampler = build_sampler(params, self.seed);
        if !history.is_empty() {
            sampler.accept_many(history);
        }

        let mut decoder = UTF_8.new_decoder();
        let mut out = String::new();

        let mut batch = LlamaBatch::new(512, 1);
        let mut n_cur = n_past;
        for _ in 0..max_tokens {
            let token = sampler.sample(self.ctx_ref(), -1);

            if self.model_ref().is_eog_token(token) {
                break;
            }

            let bytes = self
                .model_ref()
                .token_to_bytes(token, Special::Tokenize)
                .context("token_to_bytes")?;
            let mut piece = String::with_capacity(32);
            let _ = decoder.decode_to_string(&bytes, &mut piece, false);
            out.push_str(&piece);

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .context("batch.add(gen)")?;
            n_cur += 1;
            self.decode_checked(&mut batch, "decode(gen)")?;
        }

        let mut tail = String::new();
        let _ = decoder.decode_to_string(&[], &mut tail, true);
        out.push_str(&tail);

        Ok(out.trim().to_string())
    }

    pub(crate) fn clear_kv_cache(&mut self) {
        self.ctx_mut().clear_kv_cache();
    }

    fn decode_checked(&mut self, batch: &mut LlamaBatch, stage: &str) -> anyhow::Result<()> {
        self.ctx_mut().decode(batch).map_err(|err| match err {
            DecodeError::Unknown(-2) => anyhow!(
                "llama_decode threw a foreign exception (likely OOM) (model={}, stage={})",
                self.name,
                stage
            ),
            other => anyhow!(other),
        })?;
        Ok(())
    }

    pub(crate) fn model_ref(&self) -> &LlamaModel {
        self.ctx_ref().model
    }

    pub(crate) fn ctx_ref(&self) -> &LlamaContext<'static> {
        self.ctx
            .as_ref()
            .expect("NativeChatModel ctx missing (use-after-drop)")
    }

    fn ctx_mut(&mut self) -> &mut LlamaContext<'static> {
        self.ctx
            .as_mut()
            .expect("NativeChatModel ctx missing (use-after-drop)")
    }
}

impl Drop for NativeChatModel {
    fn drop(&mut self) {
        // Context first: it borrows the model.
        let _ = self.ctx.take();
        let _ = self.model.take();
    }
}

fn build_sampler(params: &GenerationParams, seed: u32) -> LlamaSampler {
    let mut samplers: Vec<LlamaSampler> = Vec::new();
    if let Some(rp) = params.repeat_penalty {
        samplers.push(LlamaSampler::penalties(64, rp, 0.0, 0.0));
    }
    if params.temperature <= 0.0 {
        samplers.push(LlamaSampler::greedy());
        return LlamaSampler::chain_simple(samplers);
    }
    samplers.push(LlamaSampler::temp(params.temperature));
    if let Some(k) = params.top_k {
        samplers.push(LlamaSampler::top_k(k as i32));
    }
    samplers.push(LlamaSampler::top_p(params.top_p, 1));
    samplers.push(LlamaSampler::dist(seed));
    LlamaSampler::chain_simple(samplers)
}

fn decide_add_bos(prompt: &str) -> AddBos {
    let p = prompt.trim_start();
    // Templates that already open with a BOS-like token must not get a second one.
    if p.starts_with("<s>")
        || p.starts_with("<|begin_of_text|>")
        || p.starts_with("<bos>")
        || p.starts_with("<BOS>")
        || p.starts_with("<|startoftext|>")
    {
        AddBos::Never
    } else {
        AddBos::Always
    }
}

/// English-to-Korean translation through a text-only chat model.
pub struct NativeTranslator {
    model: NativeChatModel,
    template: String,
    params: GenerationParams,
}

impl NativeTranslator {
    pub fn new(model: NativeChatModel, template: String, params: GenerationParams) -> Self {
        Self {
            model,
            template,
            params,
        }
    }
}

impl Translator for NativeTranslator {
    fn translate(&mut self, english: &str) -> anyhow::Result<String> {
        let text = english.trim();
        if text.is_empty() {
            return Ok(String::new());
        }
        let prompt = render_template(
            &self.template,
            &[
                ("source_lang", "English"),
                ("target_lang", "Korean"),
                ("text", text),
            ],
        );
        let raw = self
            .model
            .chat(None, &prompt, &self.params)
            .with_context(|| format!("{} translate", self.model.name))?;
        Ok(strip_model_wrapping(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bos_is_skipped_when_template_has_one() {
        assert!(matches!(decide_add_bos("<bos><start_of_turn>user"), AddBos::Never));
        assert!(matches!(decide_add_bos("  <s>[INST]"), AddBos::Never));
        assert!(matches!(decide_add_bos("<|im_start|>system"), AddBos::Always));
    }

    #[test]
    fn backend_values_override_globals() {
        let mut backend = ResolvedBackend::from_path("vl", PathBuf::from("m.gguf"), 4096);
        backend.gpu_layers = Some(12);
        let cfg = NativeModelConfig::from_backend(&backend, 8, -1);
        assert_eq!(cfg.threads, 8);
        assert_eq!(cfg.gpu_layers, 12);
        assert_eq!(cfg.ctx_size, 4096);
        assert_eq!(cfg.seed, DEFAULT_SEED);
    }
}
