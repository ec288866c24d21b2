use std::time::Duration;

use actix_web::http::Method;
use actix_web::middleware::DefaultHeaders;
use actix_web::{get, post, web, HttpRequest, HttpResponse, HttpServer};
use anyhow::anyhow;
use bytes::Bytes;
use futures::{stream, StreamExt};

use crate::api::{
    sse_event, AnswerResponse, QuestionRequest, StatusResponse, ASK_ERROR_ANSWER, ERROR_ANSWER,
    FEATURES, STREAM_DONE,
};
use crate::image_input::{decode_base64_image, PixelBounds, SceneImage};
use crate::pipeline::{AnswerRequest, ServerSettings};
use crate::question::DETAILED_SCENE_PROMPT;
use crate::worker::AssistantHandle;

/// Names reported by `GET /`.
#[derive(Clone, Debug)]
pub struct ServiceInfo {
    pub vl_model: String,
    pub translator: String,
}

pub struct AppState {
    pub handle: AssistantHandle,
    pub pixel_bounds: PixelBounds,
    pub char_delay: Duration,
    pub info: ServiceInfo,
}

#[get("/")]
pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        vl_model: state.info.vl_model.clone(),
        translator: state.info.translator.clone(),
        gpu_offload: cfg!(feature = "cuda"),
        features: FEATURES,
    })
}

#[post("/api/ask")]
pub async fn ask(req: web::Json<QuestionRequest>, state: web::Data<AppState>) -> HttpResponse {
    let mut req = req.into_inner();
    let question = std::mem::take(&mut req.question);
    HttpResponse::Ok().json(answer_once(&state, req, question, ASK_ERROR_ANSWER).await)
}

#[post("/api/describe")]
pub async fn describe(req: web::Json<QuestionRequest>, state: web::Data<AppState>) -> HttpResponse {
    let question = DETAILED_SCENE_PROMPT.to_string();
    HttpResponse::Ok().json(answer_once(&state, req.into_inner(), question, ERROR_ANSWER).await)
}

#[post("/api/ask-stream")]
pub async fn ask_stream(req: web::Json<QuestionRequest>, state: web::Data<AppState>) -> HttpResponse {
    let mut req = req.into_inner();
    let question = std::mem::take(&mut req.question);
    answer_streaming(state, req, question).await
}

#[post("/api/describe-stream")]
pub async fn describe_stream(
    req: web::Json<QuestionRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let question = DETAILED_SCENE_PROMPT.to_string();
    answer_streaming(state, req.into_inner(), question).await
}

/// Answers CORS preflight for any path; everything else is a 404.
pub async fn fallback(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().finish()
    }
}

async fn decode_image(state: &AppState, data: String) -> anyhow::Result<SceneImage> {
    let bounds = state.pixel_bounds;
    web::block(move || decode_base64_image(&data, bounds))
        .await
        .map_err(|err| anyhow!("이미지 처리 실패: {err}"))?
}

async fn answer_once(
    state: &AppState,
    req: QuestionRequest,
    question: String,
    error_answer: &str,
) -> AnswerResponse {
    let result = async {
        let image = decode_image(state, req.image_base64).await?;
        state
            .handle
            .answer(AnswerRequest {
                image,
                question,
                language: req.language,
            })
            .await
    }
    .await;
    match result {
        Ok(answer) => AnswerResponse::ok(answer),
        Err(err) => {
            log::error!("request failed: {err:#}");
            AnswerResponse::failed(error_answer, &err)
        }
    }
}

async fn answer_streaming(
    state: web::Data<AppState>,
    req: QuestionRequest,
    question: String,
) -> HttpResponse {
    let image = match decode_image(&state, req.image_base64).await {
        Ok(image) => image,
        Err(err) => {
            log::error!("request failed: {err:#}");
            return HttpResponse::Ok().json(AnswerResponse::failed(ERROR_ANSWER, &err));
        }
    };

    let handle = state.handle.clone();
    let delay = state.char_delay;
    let request = AnswerRequest {
        image,
        question,
        language: req.language,
    };
    let body = stream::once(async move { handle.answer(request).await })
        .flat_map(move |result| stream::iter(answer_frames(result, delay)))
        .then(|(frame, pause)| async move {
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            Ok::<Bytes, actix_web::Error>(frame)
        });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}

/// SSE frames for a finished answer, each paired with the pause taken before it.
/// Characters are sent one per frame; the terminator follows immediately.
pub fn answer_frames(result: anyhow::Result<String>, delay: Duration) -> Vec<(Bytes, Duration)> {
    let mut frames: Vec<(Bytes, Duration)> = match result {
        Ok(answer) => answer
            .chars()
            .map(|c| {
                let mut buf = [0u8; 4];
                (Bytes::from(sse_event(c.encode_utf8(&mut buf))), delay)
            })
            .collect(),
        Err(err) => {
            log::error!("stream failed: {err:#}");
            vec![(Bytes::from(sse_event(ERROR_ANSWER)), Duration::ZERO)]
        }
    };
    frames.push((Bytes::from(sse_event(STREAM_DONE)), Duration::ZERO));
    frames
}

pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "*"))
        .add(("Access-Control-Allow-Headers", "*"))
}

pub fn json_config(max_payload_bytes: usize) -> web::JsonConfig {
    web::JsonConfig::default().limit(max_payload_bytes)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(status)
        .service(ask)
        .service(ask_stream)
        .service(describe)
        .service(describe_stream)
        .default_service(web::to(fallback));
}

pub async fn startup(settings: ServerSettings, state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);
    let max_payload = settings.max_payload_bytes;

    log::info!("starting server at {}:{}", settings.host, settings.port);

    let mut server = HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(cors_headers())
            .app_data(app_state.clone())
            .app_data(json_config(max_payload))
            .configure(routes)
    });
    if let Some(workers) = settings.workers {
        server = server.workers(workers);
    }
    server.bind((settings.host.as_str(), settings.port))?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_stream_each_char_then_done() {
        let frames = answer_frames(Ok("산이".to_string()), Duration::from_millis(20));
        let text: Vec<&[u8]> = frames.iter().map(|(b, _)| b.as_ref()).collect();
        assert_eq!(
            text,
            vec![
                "data: 산\n\n".as_bytes(),
                "data: 이\n\n".as_bytes(),
                "data: [DONE]\n\n".as_bytes(),
            ]
        );
        assert_eq!(frames[0].1, Duration::from_millis(20));
        assert_eq!(frames[2].1, Duration::ZERO);
    }

    #[test]
    fn failed_answer_streams_error_then_done() {
        let frames = answer_frames(Err(anyhow!("boom")), Duration::from_millis(20));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, Bytes::from("data: 오류가 발생했어요.\n\n"));
        assert_eq!(frames[1].0, Bytes::from("data: [DONE]\n\n"));
    }
}
