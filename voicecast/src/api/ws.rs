//! `/ws/tts`: streams synthesized audio over a WebSocket as it arrives,
//! cancelling any in-flight job when a new request supersedes it.

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};

use crate::context::AppContext;

/// Wraps a [`JoinHandle`], aborting the task it refers to when dropped —
/// so cancelling the task that owns this guard also stops the work it's
/// awaiting, rather than leaving it running detached in the background.
struct AbortOnDrop<T>(Option<JoinHandle<T>>);

impl<T> AbortOnDrop<T> {
    fn new(handle: JoinHandle<T>) -> Self {
        Self(Some(handle))
    }

    /// Awaits the wrapped handle. Must not be called more than once.
    async fn join(&mut self) -> Result<T, JoinError> {
        self.0.as_mut().expect("AbortOnDrop::join called twice").await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

/// Inbound request frame: `{"text": "...", "voice_id": "..."}`.
#[derive(Deserialize)]
struct TtsFrame {
    text: String,
    voice_id: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum OutFrame<'a> {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "end")]
    End,
    #[serde(rename = "error")]
    Error { message: &'a str },
}

/// A chunk of decoded audio, delivered to the actor from its background
/// producer task, tagged with the generation it belongs to so a
/// superseded job's output is dropped rather than interleaved.
#[derive(Message)]
#[rtype(result = "()")]
struct AudioChunk(u64, Vec<u8>);

struct TtsSession {
    ctx: AppContext,
    generation: u64,
    reader_task: Option<JoinHandle<()>>,
    notifier_task: Option<JoinHandle<()>>,
}

impl Actor for TtsSession {
    type Context = ws::WebsocketContext<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.notifier_task.take() {
            task.abort();
        }
    }
}

impl Handler<AudioChunk> for TtsSession {
    type Result = ();

    fn handle(&mut self, msg: AudioChunk, ctx: &mut Self::Context) {
        if msg.0 == self.generation {
            ctx.binary(msg.1);
        }
    }
}

fn finish_job(outcome: Result<(), String>, ctx: &mut <TtsSession as Actor>::Context) {
    match outcome {
        Ok(()) => send_json(ctx, &OutFrame::End),
        Err(message) => send_json(ctx, &OutFrame::Error { message: &message }),
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TtsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(_) => {
                ctx.stop();
                return;
            }
        };
        match msg {
            ws::Message::Ping(payload) => ctx.pong(&payload),
            ws::Message::Text(text) => self.start_job(text, ctx),
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Binary(_) | ws::Message::Continuation(_) | ws::Message::Nop => {}
            ws::Message::Pong(_) => {}
        }
    }
}

impl TtsSession {
    fn start_job(&mut self, text: String, ctx: &mut <Self as Actor>::Context) {
        self.generation += 1;
        let generation = self.generation;

        // A new job supersedes whatever the previous one was doing: abort
        // its reader loop and its TTS pipeline task rather than letting
        // them run to completion in the background.
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.notifier_task.take() {
            task.abort();
        }

        let frame: TtsFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                send_json(ctx, &OutFrame::Error {
                    message: &err.to_string(),
                });
                return;
            }
        };

        let fallback_voice = crate::catalog::FALLBACK_PROVIDER_PREFIX.to_owned() + "en";
        let voice = frame.voice_id.unwrap_or_else(|| fallback_voice.clone());

        send_json(ctx, &OutFrame::Start);

        let (mut stream, handle) = self.ctx.tts.get_tts_stream(frame.text, voice, fallback_voice);
        let addr = ctx.address();
        let producer_addr = addr.clone();

        self.reader_task = Some(actix::spawn(async move {
            loop {
                let chunk = stream.read(8 * 1024).await;
                if chunk.is_empty() {
                    break;
                }
                if addr.try_send(AudioChunk(generation, chunk)).is_err() {
                    return;
                }
            }
        }));

        self.notifier_task = Some(actix::spawn(async move {
            let mut guard = AbortOnDrop::new(handle);
            let outcome = match guard.join().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            let _ = producer_addr.try_send(JobDoneFor(generation, outcome));
        }));
    }
}

/// Sent when a job's producer task finishes, tagged with the generation
/// it belongs to so a superseded job's completion is silently ignored.
#[derive(Message)]
#[rtype(result = "()")]
struct JobDoneFor(u64, Result<(), String>);

impl Handler<JobDoneFor> for TtsSession {
    type Result = ();

    fn handle(&mut self, msg: JobDoneFor, ctx: &mut Self::Context) {
        if msg.0 == self.generation {
            finish_job(msg.1, ctx);
        }
    }
}

fn send_json(ctx: &mut <TtsSession as Actor>::Context, frame: &OutFrame<'_>) {
    if let Ok(text) = serde_json::to_string(frame) {
        ctx.text(text);
    }
}

/// `GET /ws/tts` upgrade handler.
pub async fn tts_ws(
    req: HttpRequest,
    stream: web::Payload,
    ctx: web::Data<AppContext>,
) -> Result<HttpResponse, Error> {
    ws::start(
        TtsSession {
            ctx: ctx.get_ref().clone(),
            generation: 0,
            reader_task: None,
            notifier_task: None,
        },
        &req,
        stream,
    )
}
