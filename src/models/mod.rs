//! Inference adapters. The pipeline only sees the two traits below; the native
//! llama.cpp implementations live behind the `native` feature.

use crate::image_input::SceneImage;

#[cfg(feature = "native")]
pub mod loader;
#[cfg(feature = "native")]
pub mod native;
#[cfg(feature = "native")]
pub mod vision;

/// Produces an English description of an image for a given prompt.
pub trait SceneDescriber {
    fn describe(&mut self, image: &SceneImage, prompt: &str) -> anyhow::Result<String>;
}

/// Renders English text in the target language.
pub trait Translator {
    fn translate(&mut self, english: &str) -> anyhow::Result<String>;
}

impl<T: SceneDescriber + ?Sized> SceneDescriber for Box<T> {
    fn describe(&mut self, image: &SceneImage, prompt: &str) -> anyhow::Result<String> {
        (**self).describe(image, prompt)
    }
}

impl<T: Translator + ?Sized> Translator for Box<T> {
    fn translate(&mut self, english: &str) -> anyhow::Result<String> {
        (**self).translate(english)
    }
}

/// Sampling settings for one generation call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
}

impl GenerationParams {
    /// Scene description: sampled, with a strong repetition penalty.
    pub const VISION: Self = Self {
        max_tokens: 80,
        temperature: 0.7,
        top_p: 0.9,
        top_k: None,
        repeat_penalty: Some(1.3),
    };

    /// Translation: greedy.
    pub const TRANSLATE: Self = Self {
        max_tokens: 256,
        temperature: 0.0,
        top_p: 1.0,
        top_k: None,
        repeat_penalty: Some(1.05),
    };
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::VISION
    }
}
