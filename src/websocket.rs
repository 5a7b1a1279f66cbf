//! # Interview WebSocket Handler
//!
//! Handles one live interview call via WebSocket. The voice platform
//! connects to `/ws/interview` and exchanges the JSON frames defined in
//! `protocol.rs`; all decisions live in the session engine — this actor only
//! parses frames, applies effects, and shuttles background-task results back
//! onto the actor mailbox.
//!
//! ## Connection Lifecycle:
//! 1. **Connect**: HTTP upgrade; the config frame goes out immediately
//! 2. **Call details**: registered call context is resolved and merged
//! 3. **Turns**: completions stream back as partial `response` frames
//! 4. **Close/error**: the session is finalized exactly once
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor. Background work
//! (completions, congruency checks, recorder writes) runs in spawned tasks
//! that report back with `addr.do_send`, so the reply path never blocks and
//! a failed task can never take the connection down.

use crate::congruency::{CheckMode, CongruencyAnalyzer, CongruencyVerdict};
use crate::llm::client::{CompletionClient, CompletionParams};
use crate::llm::retry::RetryPolicy;
use crate::protocol::{InboundFrame, InteractionType, OutboundFrame};
use crate::recorder::{FinalizeRecord, InterviewRecorder, SessionRecord};
use crate::session::context::CallContextCache;
use crate::session::engine::{Effect, Event, EngineSettings, SessionEngine};
use crate::session::history::ChatMessage;
use crate::session::metrics::TokenUsage;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use anyhow::Result;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server pings the platform at the socket level.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Inactivity span after which the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor owning one interview session.
pub struct InterviewWebSocket {
    engine: SessionEngine,
    completion_client: Arc<dyn CompletionClient>,
    analyzer: Arc<dyn CongruencyAnalyzer>,
    recorder: Arc<dyn InterviewRecorder>,
    call_context: Arc<CallContextCache>,
    params: CompletionParams,
    retry: RetryPolicy,
    app_state: web::Data<AppState>,
    last_heartbeat: Instant,
    /// Set when the socket dies with a protocol error, so finalization
    /// records "error" instead of "completed"
    had_error: bool,
}

impl InterviewWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        Self {
            engine: SessionEngine::new(EngineSettings::from(&config)),
            completion_client: app_state.completion_client(),
            analyzer: app_state.analyzer(),
            recorder: app_state.recorder(),
            call_context: app_state.call_context(),
            params: CompletionParams {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_response_tokens,
            },
            retry: config.retry.policy(),
            app_state,
            last_heartbeat: Instant::now(),
            had_error: false,
        }
    }

    /// Apply engine effects in order. Sends happen inline; everything else
    /// is handed to a spawned task.
    fn apply_effects(&mut self, effects: Vec<Effect>, ctx: &mut ws::WebsocketContext<Self>) {
        for effect in effects {
            match effect {
                Effect::Send(frame) => self.send_frame(&frame, ctx),
                Effect::BeginCompletion {
                    response_id,
                    messages,
                } => self.spawn_completion(response_id, messages, ctx),
                Effect::RunCongruencyCheck {
                    mode,
                    resume,
                    role_title,
                    job_description,
                } => self.spawn_congruency_check(mode, resume, role_title, job_description, ctx),
                Effect::OpenRecord(record) => self.spawn_open_record(record),
                Effect::RecordFirstUtterance { interview_id } => {
                    let recorder = self.recorder.clone();
                    tokio::spawn(async move {
                        if let Err(e) = recorder.record_first_utterance(&interview_id).await {
                            warn!(%interview_id, error = %e, "First-utterance write failed");
                        }
                    });
                }
                Effect::RecordTokens {
                    interview_id,
                    usage,
                } => {
                    let recorder = self.recorder.clone();
                    tokio::spawn(async move {
                        if let Err(e) = recorder.update_tokens(&interview_id, usage).await {
                            warn!(%interview_id, error = %e, "Token usage write failed");
                        }
                    });
                }
                Effect::Finalize {
                    interview_id,
                    record,
                } => self.spawn_finalize(interview_id, record),
            }
        }
    }

    fn send_frame(&self, frame: &OutboundFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(error = %e, "Outbound frame serialization failed"),
        }
    }

    /// Run the streamed completion with retry in the background. Chunks are
    /// forwarded to the actor as they arrive; the final outcome follows.
    fn spawn_completion(
        &self,
        response_id: u64,
        messages: Vec<ChatMessage>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let client = self.completion_client.clone();
        let params = self.params;
        let retry = self.retry;
        let addr = ctx.address();

        tokio::spawn(async move {
            for attempt in 0..retry.max_attempts {
                match stream_completion(client.as_ref(), &messages, params, response_id, &addr)
                    .await
                {
                    Ok((text, usage)) => {
                        addr.do_send(CompletionOutcome::Finished {
                            response_id,
                            text,
                            usage,
                        });
                        return;
                    }
                    Err(e) => {
                        warn!(
                            response_id,
                            attempt,
                            error = %e,
                            "Completion attempt failed"
                        );
                        if attempt + 1 < retry.max_attempts {
                            tokio::time::sleep(retry.backoff_delay(attempt)).await;
                        }
                    }
                }
            }
            addr.do_send(CompletionOutcome::Failed { response_id });
        });
    }

    fn spawn_congruency_check(
        &self,
        mode: CheckMode,
        resume: String,
        role_title: String,
        job_description: String,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let analyzer = self.analyzer.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            match analyzer
                .analyze(&resume, &role_title, &job_description, mode)
                .await
            {
                Ok(verdict) => addr.do_send(CongruencyOutcome { mode, verdict }),
                // fail open: the interview continues as if the check passed
                Err(e) => warn!(?mode, error = %e, "Congruency check failed; continuing"),
            }
        });
    }

    fn spawn_open_record(&self, record: SessionRecord) {
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            let call_id = record.call_id.clone();
            match recorder.create(record).await {
                Ok(session_id) => debug!(%call_id, %session_id, "Session record opened"),
                Err(e) => warn!(%call_id, error = %e, "Session record create failed"),
            }
        });
    }

    fn spawn_finalize(&self, interview_id: String, record: FinalizeRecord) {
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.finalize(&interview_id, record).await {
                warn!(%interview_id, error = %e, "Session finalize write failed");
            }
        });
    }
}

/// A streamed chunk of an in-progress reply, forwarded from the completion
/// task to the connection actor.
#[derive(Message)]
#[rtype(result = "()")]
struct StreamDelta {
    response_id: u64,
    content: String,
    /// True for the terminating marker frame
    done: bool,
}

/// Terminal result of one completion request (after retries).
#[derive(Message)]
#[rtype(result = "()")]
enum CompletionOutcome {
    Finished {
        response_id: u64,
        text: String,
        usage: Option<TokenUsage>,
    },
    Failed {
        response_id: u64,
    },
}

/// Result of a background congruency check.
#[derive(Message)]
#[rtype(result = "()")]
struct CongruencyOutcome {
    mode: CheckMode,
    verdict: CongruencyVerdict,
}

/// Drive one streaming request, forwarding chunks as partial frames.
/// Returns the assembled text and usage once the provider marks the stream
/// final; any transport error aborts the attempt.
async fn stream_completion(
    client: &dyn CompletionClient,
    messages: &[ChatMessage],
    params: CompletionParams,
    response_id: u64,
    addr: &Addr<InterviewWebSocket>,
) -> Result<(String, Option<TokenUsage>)> {
    let mut stream = client.stream(messages.to_vec(), params).await?;
    let mut text = String::new();
    let mut usage = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_final {
            usage = chunk.usage;
            addr.do_send(StreamDelta {
                response_id,
                content: String::new(),
                done: true,
            });
        } else if !chunk.text.is_empty() {
            text.push_str(&chunk.text);
            addr.do_send(StreamDelta {
                response_id,
                content: chunk.text,
                done: false,
            });
        }
    }

    Ok((text, usage))
}

impl Actor for InterviewWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Connection opened: config frame first, then the heartbeat timer.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Interview connection started");
        self.app_state.increment_active_sessions();

        let effects = self.engine.on_open();
        self.apply_effects(effects, ctx);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(call_id = ?act.engine.call_id(), "Heartbeat timeout, closing connection");
                act.had_error = true;
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Connection gone: finalize the session exactly once. Only recorder
    /// effects can come back here, and they run in spawned tasks.
    fn stopped(&mut self, ctx: &mut Self::Context) {
        info!(
            call_id = ?self.engine.call_id(),
            elapsed = %self.engine.timer().formatted_elapsed(),
            "Interview connection stopped"
        );
        self.app_state.decrement_active_sessions();

        let effects = self.engine.handle(Event::ConnectionClosed {
            error: self.had_error,
        });
        self.apply_effects(effects, ctx);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(frame) => {
                        // the engine never reads the cache itself; resolve
                        // registered context here for details events
                        let context = match frame.interaction_type {
                            InteractionType::CallDetails | InteractionType::CallStarted => frame
                                .call_id
                                .as_deref()
                                .and_then(|id| self.call_context.get(id))
                                .map(|entry| entry.variables),
                            _ => None,
                        };
                        let effects = self.engine.handle(Event::Frame { frame, context });
                        self.apply_effects(effects, ctx);
                    }
                    Err(e) => {
                        // malformed frames are logged and dropped; the
                        // connection stays open
                        warn!(error = %e, "Malformed inbound frame dropped");
                    }
                }
            }
            Ok(ws::Message::Binary(data)) => {
                warn!(bytes = data.len(), "Unexpected binary frame dropped");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(?reason, "Interview connection closed by platform");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(error = %e, "WebSocket protocol error");
                self.had_error = true;
                ctx.stop();
            }
        }
    }
}

impl Handler<StreamDelta> for InterviewWebSocket {
    type Result = ();

    fn handle(&mut self, msg: StreamDelta, ctx: &mut Self::Context) {
        let frame = if msg.done {
            OutboundFrame::complete(msg.response_id, msg.content)
        } else {
            OutboundFrame::partial(msg.response_id, msg.content)
        };
        self.send_frame(&frame, ctx);
    }
}

impl Handler<CompletionOutcome> for InterviewWebSocket {
    type Result = ();

    fn handle(&mut self, msg: CompletionOutcome, ctx: &mut Self::Context) {
        let event = match msg {
            CompletionOutcome::Finished {
                response_id,
                text,
                usage,
            } => Event::CompletionFinished {
                response_id,
                text,
                usage,
            },
            CompletionOutcome::Failed { response_id } => {
                Event::CompletionFailed { response_id }
            }
        };
        let effects = self.engine.handle(event);
        self.apply_effects(effects, ctx);
    }
}

impl Handler<CongruencyOutcome> for InterviewWebSocket {
    type Result = ();

    fn handle(&mut self, msg: CongruencyOutcome, ctx: &mut Self::Context) {
        let effects = self.engine.handle(Event::Verdict {
            mode: msg.mode,
            verdict: msg.verdict,
        });
        self.apply_effects(effects, ctx);
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh actor.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "New interview connection request"
    );

    let websocket = InterviewWebSocket::new(app_state);
    ws::start(websocket, &req, stream)
}
