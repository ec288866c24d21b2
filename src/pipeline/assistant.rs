use anyhow::Context;

use crate::cleanup::{clean_english, clean_korean};
use crate::image_input::SceneImage;
use crate::models::{SceneDescriber, Translator};
use crate::question::map_question;
use crate::textutil::truncate_chars;

use super::config::AssistantSettings;
use super::trace::TraceWriter;

pub const KOREAN: &str = "ko";

#[derive(Clone, Debug)]
pub struct AnswerRequest {
    pub image: SceneImage,
    /// Mapped to an English prompt when `language` is Korean, used as is otherwise.
    pub question: String,
    pub language: String,
}

pub fn is_korean(language: &str) -> bool {
    language == KOREAN
}

pub struct Assistant<D, T> {
    describer: D,
    translator: T,
    settings: AssistantSettings,
    trace: TraceWriter,
    next_request_id: u64,
}

impl<D: SceneDescriber, T: Translator> Assistant<D, T> {
    pub fn new(describer: D, translator: T, settings: AssistantSettings) -> Self {
        let trace = match settings.trace_dir.clone() {
            Some(dir) => TraceWriter::new(dir, true).unwrap_or_else(|err| {
                log::warn!("trace disabled: {err:#}");
                TraceWriter::disabled()
            }),
            None => TraceWriter::disabled(),
        };
        Self {
            describer,
            translator,
            settings,
            trace,
            next_request_id: 0,
        }
    }

    /// The English prompt handed to the vision model for this question.
    pub fn english_prompt(&self, question: &str, language: &str) -> String {
        if !is_korean(language) {
            return question.to_string();
        }
        let mapping = map_question(question);
        log::info!(
            "question mapped: '{}' -> '{}' (subject={:?} pattern={:?})",
            self.clip(question),
            mapping.prompt,
            mapping.subject,
            mapping.pattern
        );
        mapping.prompt
    }

    pub fn answer(&mut self, req: &AnswerRequest) -> anyhow::Result<String> {
        self.next_request_id += 1;
        let id = self.next_request_id;

        let prompt = self.english_prompt(&req.question, &req.language);
        self.trace_text(id, "prompt", &prompt);

        let raw = self
            .describer
            .describe(&req.image, &prompt)
            .context("describe image")?;
        self.trace_text(id, "english.raw", &raw);

        let mut english = clean_english(&raw, self.settings.english_max_sentences);
        if english.is_empty() {
            english = raw.trim().to_string();
        }
        log::info!("english answer: {}", self.clip(&english));

        if !is_korean(&req.language) {
            self.trace_text(id, "final", &english);
            return Ok(english);
        }

        let answer = match self.translator.translate(&english) {
            Ok(translated) => {
                self.trace_text(id, "korean.raw", &translated);
                let cleaned = clean_korean(&translated, self.settings.korean_max_sentences);
                if cleaned.is_empty() {
                    log::warn!("translation came back empty; answering in English");
                    english
                } else {
                    cleaned
                }
            }
            Err(err) => {
                log::warn!("translation failed: {err:#}; answering in English");
                english
            }
        };
        log::info!("korean answer: {}", self.clip(&answer));
        self.trace_text(id, "final", &answer);
        Ok(answer)
    }

    fn clip(&self, text: &str) -> String {
        truncate_chars(text, self.settings.log_max_chars)
    }

    fn trace_text(&self, id: u64, stage: &str, text: &str) {
        if let Err(err) = self.trace.write_request_text(id, stage, text) {
            log::warn!("{err:#}");
        }
    }
}
