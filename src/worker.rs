//! Dedicated inference thread. llama.cpp contexts are neither `Send` nor safe to use
//! concurrently, so one OS thread owns the models and serves jobs in arrival order.

use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Context};
use tokio::sync::oneshot;

use crate::models::{SceneDescriber, Translator};
use crate::pipeline::{AnswerRequest, Assistant, AssistantSettings};

struct Job {
    request: AnswerRequest,
    reply: oneshot::Sender<anyhow::Result<String>>,
}

/// Cheap, cloneable handle used by HTTP handlers to submit work.
#[derive(Clone)]
pub struct AssistantHandle {
    tx: mpsc::Sender<Job>,
}

impl AssistantHandle {
    pub async fn answer(&self, request: AnswerRequest) -> anyhow::Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .map_err(|_| anyhow!("inference worker is not running"))?;
        rx.await
            .map_err(|_| anyhow!("inference worker dropped the request"))?
    }
}

/// Spawns the worker thread and waits until `factory` has loaded the models.
/// A load failure is returned here, before anything is served.
pub fn spawn_worker<F, D, T>(settings: AssistantSettings, factory: F) -> anyhow::Result<AssistantHandle>
where
    F: FnOnce() -> anyhow::Result<(D, T)> + Send + 'static,
    D: SceneDescriber + 'static,
    T: Translator + 'static,
{
    let (tx, rx) = mpsc::channel::<Job>();
    let (ready_tx, ready_rx) = mpsc::sync_channel::<anyhow::Result<()>>(1);

    thread::Builder::new()
        .name("inference".to_string())
        .spawn(move || {
            let (describer, translator) = match factory() {
                Ok(models) => models,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            let mut assistant = Assistant::new(describer, translator, settings);
            let _ = ready_tx.send(Ok(()));

            for job in rx {
                let started = std::time::Instant::now();
                let result = assistant.answer(&job.request);
                if let Err(err) = &result {
                    log::error!("answer failed: {err:#}");
                }
                log::debug!("job done in {:.2}s", started.elapsed().as_secs_f64());
                let _ = job.reply.send(result);
            }
            log::info!("inference worker stopped");
        })
        .context("spawn inference thread")?;

    ready_rx
        .recv()
        .map_err(|_| anyhow!("inference thread exited during model load"))?
        .context("load models")?;
    Ok(AssistantHandle { tx })
}
