// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-request glue: workspace → child argv → supervisor → SSE stream.
//!
//! Both endpoints share the same skeleton.  The handler resolves the
//! workspace (failures there are still plain HTTP errors), then hands a
//! bounded channel to a driver task and returns the SSE response backed by
//! the channel's receiving end.  From that point on:
//!
//! - a failed channel send means the client hung up → cancel the
//!   supervisor, stop;
//! - a translator-declared completion (`[DONE]` emitted) → cancel the
//!   supervisor, stop, so child events after the success envelope are
//!   never forwarded;
//! - the supervisor's own driver guarantees the child is reaped and the
//!   registry entry removed on every one of these paths.
//!
//! The native endpoint forwards raw child lines verbatim and never writes
//! `[DONE]`; the OpenAI endpoint transcodes through [`OpenAiTranslator`].

use std::path::PathBuf;

use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use brygga_core::{
    build_child_args, resolve_workspace, NormalizedRequest, SessionConfig, Supervisor,
    SupervisorEvent, SupervisorSettings,
};

use crate::adapter::AdaptedRequest;
use crate::files::persist_attachments;
use crate::http::error::ApiError;
use crate::http::AppState;
use crate::translator::OpenAiTranslator;

/// Frames buffered between the driver and the HTTP connection.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// Everything the driver needs to spawn one child.
struct SpawnPlan {
    binary: String,
    args: Vec<String>,
    cwd: PathBuf,
    stdin_payload: String,
    settings: SupervisorSettings,
}

fn plan_spawn(state: &AppState, request: &NormalizedRequest) -> Result<SpawnPlan, ApiError> {
    let base = state.config.workspace.effective_base();
    let cwd = resolve_workspace(&base, request.workspace.as_deref())
        .map_err(|e| ApiError::workspace(e.to_string()))?;
    let mcp_path = state.config.mcp.effective_path(&base);
    let args = build_child_args(request, &state.mcp, &mcp_path);
    Ok(SpawnPlan {
        binary: state.config.child.binary.clone(),
        args,
        cwd,
        stdin_payload: request.stdin_payload(),
        settings: SupervisorSettings::from_millis(
            state.config.child.total_timeout_ms,
            state.config.child.inactivity_timeout_ms,
            state.config.child.kill_grace_ms,
        ),
    })
}

/// `POST /api/claude` — pass-through streaming.
pub async fn handle_native(state: AppState, request: NormalizedRequest) -> Response {
    let production = state.config.log.is_production();
    let plan = match plan_spawn(&state, &request) {
        Ok(p) => p,
        Err(e) => return e.for_environment(production).into_response(),
    };

    let (tx, rx) = mpsc::channel::<Event>(FRAME_CHANNEL_CAPACITY);
    let registry = state.registry.clone();
    tokio::spawn(async move { native_driver(plan, registry, tx).await });
    sse_response(rx)
}

/// `POST /v1/chat/completions` — transcoded streaming.
pub async fn handle_openai(state: AppState, adapted: AdaptedRequest) -> Response {
    let production = state.config.log.is_production();
    let AdaptedRequest {
        mut request,
        session,
        attachments,
    } = adapted;

    let plan = match plan_spawn(&state, &request) {
        Ok(p) => p,
        Err(e) => return e.for_environment(production).into_response(),
    };
    // Attachments land inside the resolved workspace, so persistence has to
    // wait until after resolution — then the stdin payload must be rebuilt.
    request.files = persist_attachments(&plan.cwd, &attachments).await;
    let plan = SpawnPlan {
        stdin_payload: request.stdin_payload(),
        ..plan
    };

    let chunk_chars = state.config.stream.chunk_chars;
    let (tx, rx) = mpsc::channel::<Event>(FRAME_CHANNEL_CAPACITY);
    let registry = state.registry.clone();
    tokio::spawn(async move {
        openai_driver(plan, session, chunk_chars, registry, tx).await;
    });
    sse_response(rx)
}

fn sse_response(rx: mpsc::Receiver<Event>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

async fn send_frame(tx: &mpsc::Sender<Event>, payload: String) -> bool {
    tx.send(Event::default().data(payload)).await.is_ok()
}

// ── Drivers ───────────────────────────────────────────────────────────────────

async fn native_driver(
    plan: SpawnPlan,
    registry: brygga_core::ActiveRegistry,
    tx: mpsc::Sender<Event>,
) {
    let mut sup = match Supervisor::spawn(
        &plan.binary,
        &plan.args,
        &plan.cwd,
        plan.stdin_payload,
        plan.settings,
        &registry,
    ) {
        Ok(sup) => sup,
        Err(e) => {
            warn!(error = %e, "child spawn failed");
            let err = ApiError::spawn_failure(format!("Failed to start the agent: {e}"));
            let _ = send_frame(&tx, err.stream_payload()).await;
            return;
        }
    };
    info!(id = sup.id(), pid = ?sup.pid(), "native stream started");

    loop {
        match sup.next_event().await {
            Some(SupervisorEvent::Line(parsed)) => {
                if !send_frame(&tx, parsed.raw).await {
                    debug!(id = sup.id(), "client disconnected, cancelling supervisor");
                    sup.cancel();
                    break;
                }
            }
            Some(SupervisorEvent::Timeout { kind, limit }) => {
                let err = ApiError::child_timeout(format!(
                    "{kind} exceeded ({} ms); the agent run was terminated",
                    limit.as_millis()
                ));
                let _ = send_frame(&tx, err.stream_payload()).await;
                // The supervisor is already terminating; just stop reading.
                break;
            }
            None => break,
        }
    }
    // Dropping `sup` releases the event channel; the supervisor's own task
    // finishes termination and deregistration.
}

async fn openai_driver(
    plan: SpawnPlan,
    session: SessionConfig,
    chunk_chars: usize,
    registry: brygga_core::ActiveRegistry,
    tx: mpsc::Sender<Event>,
) {
    let mut translator = OpenAiTranslator::new(session, chunk_chars);

    let mut sup = match Supervisor::spawn(
        &plan.binary,
        &plan.args,
        &plan.cwd,
        plan.stdin_payload,
        plan.settings,
        &registry,
    ) {
        Ok(sup) => sup,
        Err(e) => {
            warn!(error = %e, "child spawn failed");
            for frame in translator.fail(&format!("Failed to start the agent: {e}")) {
                if !send_frame(&tx, frame).await {
                    break;
                }
            }
            return;
        }
    };
    info!(id = sup.id(), pid = ?sup.pid(), "chat-completion stream started");

    loop {
        let (frames, channel_open) = match sup.next_event().await {
            Some(SupervisorEvent::Line(parsed)) => (translator.on_event(&parsed.event), true),
            Some(SupervisorEvent::Timeout { kind, limit }) => {
                (translator.on_timeout(kind, limit), true)
            }
            None => (translator.finish(), false),
        };

        for frame in frames {
            if !send_frame(&tx, frame).await {
                debug!(id = sup.id(), "client disconnected, cancelling supervisor");
                sup.cancel();
                return;
            }
        }

        if translator.is_complete() {
            // The child may keep talking after its success envelope; nothing
            // after [DONE] is forwarded.
            sup.cancel();
            return;
        }
        if !channel_open {
            return;
        }
    }
}
