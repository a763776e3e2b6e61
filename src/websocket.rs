//! # WebSocket Audio Streaming Handler
//!
//! Captures live audio streamed over `/ws/audio` into a per-connection file.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: `GET /ws/audio?session_id=...` (`session_id` defaults to `anon`).
//!    The capture file is opened before the upgrade is accepted; if that fails the
//!    client gets an HTTP 500 instead of a socket.
//! 2. **Audio Streaming**: every binary message, whole or fragmented, is appended
//!    to the capture file and flushed before the next frame is looked at.
//! 3. **Control Text**: `ping` → `pong`, `close` → server closes the connection,
//!    anything else is ignored. Fragmented text is reassembled first.
//! 4. **Termination**: explicit `close`, client disconnect, idle timeout, protocol
//!    error and write failure all end in the actor's `stopped` hook, which closes
//!    the capture file exactly once.
//!
//! ## Connection states:
//! `Open` → `Closing` → `Closed`. Frames that arrive after `Open` are dropped.
//!
//! ## Disk I/O:
//! Writes run on the blocking thread pool. The actor waits on each one with
//! `ctx.wait`, which holds back every other frame until the write has finished.

use crate::audio::AudioSink;
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Session used when the client doesn't name one.
pub const DEFAULT_SESSION_ID: &str = "anon";

/// How often the idle timer looks at the last activity time.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub session_id: Option<String>,
}

/// Meaning of a text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Liveness check, answered with `pong`
    Ping,
    /// Client asks the server to end the connection
    Close,
    /// Anything else; logged and ignored
    Unknown,
}

impl ControlCommand {
    /// Commands are matched case-insensitively.
    pub fn parse(text: &str) -> Self {
        if text.eq_ignore_ascii_case("ping") {
            ControlCommand::Ping
        } else if text.eq_ignore_ascii_case("close") {
            ControlCommand::Close
        } else {
            ControlCommand::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Closing,
    Closed,
}

/// Why a connection ended, for the final log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    CloseRequested,
    ClientDisconnected,
    IdleTimeout,
    WriteFailed,
    ProtocolError,
}

/// A message split over continuation frames that hasn't seen its last frame yet.
#[derive(Debug)]
enum Fragment {
    /// Binary fragments go straight to the sink as they arrive
    Binary,
    /// Text is buffered until the last fragment, then parsed as a command
    Text(Vec<u8>),
}

/// WebSocket actor owning one streaming connection and its capture file.
///
/// ## Actor Model:
/// Actix delivers frames to `StreamHandler::handle` one at a time, in arrival
/// order, and a pending write blocks delivery, so the sink never has concurrent
/// writers.
pub struct AudioStreamSocket {
    session_id: String,

    /// Capture file; `None` while a write holds it or once it has been closed
    sink: Option<AudioSink>,
    /// Bytes known to be on disk, kept here so it survives a lost sink
    bytes_persisted: u64,

    fragment: Option<Fragment>,
    /// Largest reassembled text message accepted
    max_text_bytes: usize,

    state: StreamState,
    end_reason: Option<EndReason>,

    app_state: AppState,

    /// Last time any frame arrived
    last_activity: Instant,
    idle_timeout: Duration,
}

impl AudioStreamSocket {
    pub fn new(session_id: String, sink: AudioSink, app_state: AppState) -> Self {
        let idle_timeout = Duration::from_secs(app_state.config.stream.idle_timeout_secs);
        let max_text_bytes = app_state.config.stream.max_frame_bytes;
        Self {
            session_id,
            bytes_persisted: sink.bytes_written(),
            sink: Some(sink),
            fragment: None,
            max_text_bytes,
            state: StreamState::Open,
            end_reason: None,
            app_state,
            last_activity: Instant::now(),
            idle_timeout,
        }
    }

    /// Move to `Closing`, send a close frame and stop the actor. Only the first call counts.
    fn begin_close(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        reason: EndReason,
        frame: Option<ws::CloseReason>,
    ) {
        if self.state != StreamState::Open {
            return;
        }
        self.state = StreamState::Closing;
        self.end_reason = Some(reason);
        ctx.close(frame);
        ctx.stop();
    }

    fn protocol_violation(&mut self, what: &str, ctx: &mut ws::WebsocketContext<Self>) {
        error!(session_id = %self.session_id, violation = what, "WebSocket protocol error");
        self.begin_close(ctx, EndReason::ProtocolError, Some(ws::CloseCode::Protocol.into()));
    }

    /// Append one binary chunk. A failed write ends the connection; it is never retried.
    fn persist_chunk(&mut self, data: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };

        let write = web::block(move || {
            let result = sink.append(&data);
            (sink, data.len(), result)
        });

        ctx.wait(write.into_actor(self).map(|outcome, act, ctx| match outcome {
            Ok((sink, len, Ok(()))) => {
                act.bytes_persisted = sink.bytes_written();
                debug!(session_id = %act.session_id, bytes = len, total = act.bytes_persisted, "Audio chunk persisted");
                act.sink = Some(sink);
            }
            Ok((sink, _, Err(err))) => {
                error!(
                    session_id = %act.session_id,
                    path = %sink.path().display(),
                    error = %err,
                    "Failed to persist audio chunk, closing connection"
                );
                act.sink = Some(sink);
                act.begin_close(ctx, EndReason::WriteFailed, Some(ws::CloseCode::Error.into()));
            }
            Err(err) => {
                // The sink went down with the blocking task; its handle is already dropped
                error!(session_id = %act.session_id, error = %err, "Audio write task failed, closing connection");
                act.begin_close(ctx, EndReason::WriteFailed, Some(ws::CloseCode::Error.into()));
            }
        }));
    }

    fn handle_control(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match ControlCommand::parse(text) {
            ControlCommand::Ping => ctx.text("pong"),
            ControlCommand::Close => {
                info!(session_id = %self.session_id, "Client requested close");
                self.begin_close(ctx, EndReason::CloseRequested, Some(ws::CloseCode::Normal.into()));
            }
            ControlCommand::Unknown => {
                debug!(session_id = %self.session_id, text = %text, "Ignoring unrecognized text frame");
            }
        }
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        match item {
            Item::FirstBinary(data) => {
                if self.open_fragment(Fragment::Binary, ctx) {
                    self.persist_chunk(data, ctx);
                }
            }
            Item::FirstText(data) => {
                if self.open_fragment(Fragment::Text(Vec::new()), ctx) {
                    self.continue_fragment(data, ctx);
                }
            }
            Item::Continue(data) => self.continue_fragment(data, ctx),
            Item::Last(data) => {
                self.continue_fragment(data, ctx);
                if self.state != StreamState::Open {
                    return;
                }
                if let Some(Fragment::Text(buffer)) = self.fragment.take() {
                    match String::from_utf8(buffer) {
                        Ok(text) => self.handle_control(&text, ctx),
                        Err(_) => self.protocol_violation("fragmented text is not UTF-8", ctx),
                    }
                }
            }
        }
    }

    /// Start a fragmented message. Returns false (and closes) if one is already open.
    fn open_fragment(&mut self, fragment: Fragment, ctx: &mut ws::WebsocketContext<Self>) -> bool {
        if self.fragment.is_some() {
            self.protocol_violation("new message started inside a fragmented one", ctx);
            return false;
        }
        self.fragment = Some(fragment);
        true
    }

    fn continue_fragment(&mut self, data: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        let max_text_bytes = self.max_text_bytes;
        let violation = match self.fragment.as_mut() {
            Some(Fragment::Binary) => None,
            Some(Fragment::Text(buffer)) if buffer.len() + data.len() > max_text_bytes => {
                Some("fragmented text message too large")
            }
            Some(Fragment::Text(buffer)) => {
                buffer.extend_from_slice(&data);
                return;
            }
            None => Some("continuation frame without a first fragment"),
        };

        match violation {
            Some(what) => self.protocol_violation(what, ctx),
            None => self.persist_chunk(data, ctx),
        }
    }

    /// Close the capture file off the actor thread. Runs once; a failed close is
    /// reported, not retried. The stream only counts as closed once the file is.
    fn release_sink(&mut self) {
        let session_id = self.session_id.clone();
        let app_state = self.app_state.clone();

        let Some(sink) = self.sink.take() else {
            app_state.stream_closed(self.bytes_persisted);
            return;
        };

        let path = sink.path().display().to_string();
        let bytes = sink.bytes_written();
        actix_web::rt::spawn(async move {
            match web::block(move || sink.close()).await {
                Ok(Ok(_)) => info!(session_id = %session_id, path = %path, bytes, "Saved audio stream"),
                Ok(Err(err)) => {
                    error!(session_id = %session_id, path = %path, error = %err, "Failed to close audio stream file")
                }
                Err(err) => error!(session_id = %session_id, path = %path, error = %err, "Audio close task failed"),
            }
            app_state.stream_closed(bytes);
        });
    }
}

impl Actor for AudioStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.stream_opened();
        info!(session_id = %self.session_id, "WebSocket audio stream started");

        ctx.run_interval(IDLE_CHECK_INTERVAL.min(self.idle_timeout), |act, ctx| {
            if act.last_activity.elapsed() > act.idle_timeout {
                warn!(session_id = %act.session_id, "No frames within idle timeout, closing connection");
                act.begin_close(ctx, EndReason::IdleTimeout, Some(ws::CloseCode::Away.into()));
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state = StreamState::Closed;
        self.release_sink();
        info!(
            session_id = %self.session_id,
            reason = ?self.end_reason.unwrap_or(EndReason::ClientDisconnected),
            "WebSocket audio stream closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        if self.state != StreamState::Open {
            return;
        }
        self.last_activity = Instant::now();

        match msg {
            Ok(ws::Message::Binary(_) | ws::Message::Text(_)) if self.fragment.is_some() => {
                self.protocol_violation("data frame inside a fragmented message", ctx);
            }
            Ok(ws::Message::Binary(data)) => self.persist_chunk(data, ctx),
            Ok(ws::Message::Text(text)) => self.handle_control(&text, ctx),
            Ok(ws::Message::Continuation(item)) => self.handle_continuation(item, ctx),
            Ok(ws::Message::Ping(payload)) => ctx.pong(&payload),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, reason = ?reason, "Client closed WebSocket");
                self.begin_close(ctx, EndReason::ClientDisconnected, reason);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => self.protocol_violation(&err.to_string(), ctx),
        }
    }

    /// The client went away without a close frame.
    fn finished(&mut self, ctx: &mut Self::Context) {
        if self.state == StreamState::Open {
            self.state = StreamState::Closing;
            self.end_reason = Some(EndReason::ClientDisconnected);
        }
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Validates the handshake, opens the capture file, then hands the connection to
/// an `AudioStreamSocket` actor.
pub async fn audio_stream(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<StreamQuery>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    // Refuse non-WebSocket requests before anything touches the disk
    ws::handshake(&req)?;

    let session_id = query
        .into_inner()
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

    let config = &app_state.config;
    let sink = AudioSink::create(
        &config.storage.upload_dir,
        &session_id,
        chrono::Utc::now().timestamp(),
        &config.storage.stream_extension,
        config.stream.fsync_each_chunk,
    )
    .map_err(|err| {
        error!(session_id = %session_id, error = %err, "Could not open capture file");
        AppError::Storage(format!("Could not open capture file: {}", err))
    })?
    .with_size_limit(config.stream.max_capture_bytes);

    info!(
        session_id = %session_id,
        peer = ?req.connection_info().peer_addr(),
        path = %sink.path().display(),
        "WebSocket connected, capturing audio"
    );

    let socket = AudioStreamSocket::new(session_id, sink, app_state.get_ref().clone());
    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(config.stream.max_frame_bytes)
        .start()
}
