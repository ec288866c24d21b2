use serde::{Deserialize, Serialize};

use crate::pipeline::KOREAN;

pub const ASK_ERROR_ANSWER: &str = "오류가 발생했어요. 다시 시도해주세요.";
pub const ERROR_ANSWER: &str = "오류가 발생했어요.";
pub const STREAM_DONE: &str = "[DONE]";

pub const FEATURES: &[&str] = &[
    "질문 매핑 개선",
    "복합 질문 처리",
    "번역 후처리",
    "친근한 말투",
];

fn default_language() -> String {
    KOREAN.to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QuestionRequest {
    /// Raw base64 or a `data:image/...;base64,` URL.
    pub image_base64: String,
    /// Ignored by the describe endpoints.
    #[serde(default)]
    pub question: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AnswerResponse {
    pub answer: String,
    pub success: bool,
    pub error: Option<String>,
}

impl AnswerResponse {
    pub fn ok(answer: String) -> Self {
        Self {
            answer,
            success: true,
            error: None,
        }
    }

    pub fn failed(answer: &str, err: &anyhow::Error) -> Self {
        Self {
            answer: answer.to_string(),
            success: false,
            error: Some(format!("{err:#}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub vl_model: String,
    pub translator: String,
    pub gpu_offload: bool,
    pub features: &'static [&'static str],
}

/// One server-sent event carrying `payload` as its data line.
pub fn sse_event(payload: &str) -> String {
    format!("data: {payload}\n\n")
}
