//! Scripted models for pipeline and worker tests.

use std::sync::{Arc, Mutex};

use crate::image_input::SceneImage;
use crate::models::{SceneDescriber, Translator};

#[derive(Clone, Default)]
pub(crate) struct FakeDescriber {
    pub answer: String,
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl SceneDescriber for FakeDescriber {
    fn describe(&mut self, _image: &SceneImage, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        if self.fail {
            anyhow::bail!("vision backend exploded");
        }
        Ok(self.answer.clone())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeTranslator {
    pub answer: Option<String>,
    pub inputs: Arc<Mutex<Vec<String>>>,
}

impl Translator for FakeTranslator {
    fn translate(&mut self, english: &str) -> anyhow::Result<String> {
        self.inputs.lock().expect("lock").push(english.to_string());
        self.answer
            .clone()
            .ok_or_else(|| anyhow::anyhow!("translator offline"))
    }
}
