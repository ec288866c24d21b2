mod assistant;
mod config;
mod prompts;
mod trace;

#[cfg(test)]
pub(crate) mod testutil;

pub use assistant::{is_korean, AnswerRequest, Assistant, KOREAN};
pub use config::{
    init_default_config, AssistantSettings, CliOverrides, ServerSettings, ServiceConfig,
    DEFAULT_TRANSLATE_BACKEND, DEFAULT_VISION_BACKEND,
};
pub use prompts::{render_template, PromptSet};
pub use trace::TraceWriter;
