use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use base64::Engine as _;
use serde_json::json;

use vision_assistant::api::{AnswerResponse, ASK_ERROR_ANSWER, ERROR_ANSWER};
use vision_assistant::image_input::{PixelBounds, SceneImage};
use vision_assistant::models::{SceneDescriber, Translator};
use vision_assistant::pipeline::AssistantSettings;
use vision_assistant::question::{DEFAULT_PROMPT, DETAILED_SCENE_PROMPT};
use vision_assistant::server::{cors_headers, json_config, routes, AppState, ServiceInfo};
use vision_assistant::worker::spawn_worker;

struct ScriptedVision {
    answer: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl SceneDescriber for ScriptedVision {
    fn describe(&mut self, image: &SceneImage, prompt: &str) -> anyhow::Result<String> {
        assert_eq!(image.rgb.len(), (image.width * image.height * 3) as usize);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vision model crashed"))
    }
}

struct ScriptedTranslator {
    answer: String,
}

impl Translator for ScriptedTranslator {
    fn translate(&mut self, _english: &str) -> anyhow::Result<String> {
        Ok(self.answer.clone())
    }
}

fn state(vision_answer: Option<&str>, prompts: Arc<Mutex<Vec<String>>>) -> web::Data<AppState> {
    let vision = ScriptedVision {
        answer: vision_answer.map(str::to_string),
        prompts,
    };
    let translator = ScriptedTranslator {
        answer: "이미지에서 푸른 하늘 아래 초록 언덕이 있습니다.".to_string(),
    };
    let handle = spawn_worker(AssistantSettings::default(), move || Ok((vision, translator)))
        .expect("spawn worker");
    web::Data::new(AppState {
        handle,
        pixel_bounds: PixelBounds {
            min_pixels: 1,
            max_pixels: 64 * 64,
        },
        char_delay: Duration::ZERO,
        info: ServiceInfo {
            vl_model: "qwen2_vl_2b".to_string(),
            translator: "translategemma_4b".to_string(),
        },
    })
}

fn png_base64() -> String {
    let img = image::RgbImage::from_pixel(4, 3, image::Rgb([90, 160, 220]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).expect("encode png");
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
    )
}

const EXPECTED_KOREAN: &str = "푸른 하늘 아래 초록 언덕이 있어요.";

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(cors_headers())
                .app_data($state)
                .app_data(json_config(1024 * 1024))
                .configure(routes),
        )
        .await
    };
}

#[actix_web::test]
async fn status_reports_models() {
    let app = app!(state(Some("Hills."), Arc::default()));
    let req = test::TestRequest::get().uri("/").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["vl_model"], "qwen2_vl_2b");
    assert_eq!(body["translator"], "translategemma_4b");
    assert!(body["features"].as_array().is_some_and(|f| !f.is_empty()));
}

#[actix_web::test]
async fn ask_maps_question_and_returns_korean() {
    let prompts: Arc<Mutex<Vec<String>>> = Arc::default();
    let app = app!(state(
        Some("The image shows green hills under a blue sky. Sheep graze nearby."),
        prompts.clone()
    ));
    let req = test::TestRequest::post()
        .uri("/api/ask")
        .set_json(json!({
            "image_base64": png_base64(),
            "question": "하늘 색깔이 뭐야?",
        }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.success, "{resp:?}");
    assert_eq!(resp.answer, EXPECTED_KOREAN);
    assert_eq!(resp.error, None);
    assert_eq!(prompts.lock().unwrap().len(), 1);
    assert_ne!(prompts.lock().unwrap()[0], "하늘 색깔이 뭐야?");
}

#[actix_web::test]
async fn describe_ignores_question_and_maps_detailed_prompt() {
    let prompts: Arc<Mutex<Vec<String>>> = Arc::default();
    let app = app!(state(Some("Green hills."), prompts.clone()));
    let req = test::TestRequest::post()
        .uri("/api/describe")
        .set_json(json!({ "image_base64": png_base64(), "question": "무시됨" }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.success);
    assert_eq!(resp.answer, EXPECTED_KOREAN);
    assert_eq!(prompts.lock().unwrap().as_slice(), [DEFAULT_PROMPT]);
}

#[actix_web::test]
async fn english_describe_keeps_detailed_prompt() {
    let prompts: Arc<Mutex<Vec<String>>> = Arc::default();
    let app = app!(state(Some("Green hills."), prompts.clone()));
    let req = test::TestRequest::post()
        .uri("/api/describe")
        .set_json(json!({ "image_base64": png_base64(), "language": "en" }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.success);
    assert_eq!(resp.answer, "Green hills.");
    assert_eq!(prompts.lock().unwrap().as_slice(), [DETAILED_SCENE_PROMPT]);
}

#[actix_web::test]
async fn ask_without_question_uses_default_prompt() {
    let prompts: Arc<Mutex<Vec<String>>> = Arc::default();
    let app = app!(state(Some("Green hills."), prompts.clone()));
    let req = test::TestRequest::post()
        .uri("/api/ask")
        .set_json(json!({ "image_base64": png_base64() }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.success, "{resp:?}");
    assert_eq!(prompts.lock().unwrap().as_slice(), [DEFAULT_PROMPT]);
}

#[actix_web::test]
async fn english_requests_skip_translation() {
    let app = app!(state(Some("green hills, far away. Sheep."), Arc::default()));
    let req = test::TestRequest::post()
        .uri("/api/ask")
        .set_json(json!({
            "image_base64": png_base64(),
            "question": "What is in the distance?",
            "language": "en",
        }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp.answer, "Green hills, far away.");
}

#[actix_web::test]
async fn bad_image_is_a_soft_error() {
    let app = app!(state(Some("Hills."), Arc::default()));
    let req = test::TestRequest::post()
        .uri("/api/ask")
        .set_json(json!({ "image_base64": "bm90IGFuIGltYWdl", "question": "뭐가 보여?" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: AnswerResponse = test::read_body_json(resp).await;
    assert!(!body.success);
    assert_eq!(body.answer, ASK_ERROR_ANSWER);
    assert!(body.error.unwrap_or_default().starts_with("이미지 처리 실패"));
}

#[actix_web::test]
async fn model_failure_is_a_soft_error() {
    let app = app!(state(None, Arc::default()));
    let req = test::TestRequest::post()
        .uri("/api/describe")
        .set_json(json!({ "image_base64": png_base64() }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert!(!resp.success);
    assert_eq!(resp.answer, ERROR_ANSWER);
    assert!(resp.error.unwrap_or_default().contains("vision model crashed"));
}

#[actix_web::test]
async fn ask_stream_sends_one_event_per_char() {
    let app = app!(state(Some("Green hills."), Arc::default()));
    let req = test::TestRequest::post()
        .uri("/api/ask-stream")
        .set_json(json!({ "image_base64": png_base64(), "question": "풍경 설명해줘" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        resp.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );
    let body = test::read_body(resp).await;
    let mut expected: String = EXPECTED_KOREAN
        .chars()
        .map(|c| format!("data: {c}\n\n"))
        .collect();
    expected.push_str("data: [DONE]\n\n");
    assert_eq!(std::str::from_utf8(&body).expect("utf8"), expected);
}

#[actix_web::test]
async fn describe_stream_reports_failure_inside_the_stream() {
    let app = app!(state(None, Arc::default()));
    let req = test::TestRequest::post()
        .uri("/api/describe-stream")
        .set_json(json!({ "image_base64": png_base64() }))
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(
        std::str::from_utf8(&body).expect("utf8"),
        "data: 오류가 발생했어요.\n\ndata: [DONE]\n\n"
    );
}

#[actix_web::test]
async fn stream_with_bad_image_returns_json() {
    let app = app!(state(Some("Hills."), Arc::default()));
    let req = test::TestRequest::post()
        .uri("/api/ask-stream")
        .set_json(json!({ "image_base64": "", "question": "하늘" }))
        .to_request();
    let resp: AnswerResponse = test::call_and_read_body_json(&app, req).await;
    assert!(!resp.success);
    assert_eq!(resp.answer, ERROR_ANSWER);
}

#[actix_web::test]
async fn preflight_and_cors_headers() {
    let app = app!(state(Some("Hills."), Arc::default()));
    let req = test::TestRequest::default()
        .method(actix_web::http::Method::OPTIONS)
        .uri("/api/ask")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
