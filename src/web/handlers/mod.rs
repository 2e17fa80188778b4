use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::gadget::{CallbackReply, ChannelCallback, FunctionSet, Status, UsbSpeed};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Function set as raw bits or comma-separated names
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FunctionsArg {
    Bits(u64),
    Names(String),
}

impl FunctionsArg {
    fn into_set(self) -> Result<FunctionSet> {
        match self {
            FunctionsArg::Bits(bits) => Ok(FunctionSet::from_bits_retain(bits)),
            FunctionsArg::Names(names) => names.parse(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetFunctionsRequest {
    pub functions: FunctionsArg,
    /// Milliseconds to wait for pull-up; 0 returns without waiting
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct FunctionsResponse {
    pub success: bool,
    pub functions: FunctionSet,
    /// Raw HAL bitmask of `functions`
    pub bits: u64,
    pub names: Vec<&'static str>,
    pub status: Status,
}

impl FunctionsResponse {
    fn new(functions: FunctionSet, status: Status) -> Self {
        Self {
            success: status.is_success(),
            functions,
            bits: functions.bits(),
            names: functions.names(),
            status,
        }
    }
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub status: Status,
}

#[derive(Serialize)]
pub struct SpeedResponse {
    pub speed: UsbSpeed,
}

/// The controller replies before returning, so the reply is already queued
async fn take_reply(rx: &mut mpsc::UnboundedReceiver<CallbackReply>) -> Result<CallbackReply> {
    rx.recv()
        .await
        .ok_or_else(|| AppError::Internal("Gadget callback was not invoked".to_string()))
}

/// Get current functions and whether they are applied
pub async fn get_functions(State(state): State<Arc<AppState>>) -> Result<Json<FunctionsResponse>> {
    let (callback, mut rx) = ChannelCallback::new();
    state.gadget.get_current_usb_functions(callback).await;

    match take_reply(&mut rx).await? {
        CallbackReply::CurrentFunctions { functions, status } => {
            Ok(Json(FunctionsResponse::new(functions, status)))
        }
        other => Err(AppError::Internal(format!("Unexpected reply: {:?}", other))),
    }
}

/// Switch USB functions
pub async fn set_functions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetFunctionsRequest>,
) -> Result<Json<FunctionsResponse>> {
    let functions = req.functions.into_set()?;
    let timeout_ms = req
        .timeout_ms
        .unwrap_or_else(|| state.gadget.default_timeout_ms());

    let (callback, mut rx) = ChannelCallback::new();
    state
        .gadget
        .set_current_usb_functions(functions, Some(callback), timeout_ms)
        .await;

    match take_reply(&mut rx).await? {
        CallbackReply::SetFunctions { functions, status } => {
            Ok(Json(FunctionsResponse::new(functions, status)))
        }
        other => Err(AppError::Internal(format!("Unexpected reply: {:?}", other))),
    }
}

/// Tear down and reset the gadget
pub async fn reset(State(state): State<Arc<AppState>>) -> Json<ResetResponse> {
    let status = state.gadget.reset().await;
    Json(ResetResponse {
        success: status.is_success(),
        status,
    })
}

/// Get negotiated link speed
pub async fn get_speed(State(state): State<Arc<AppState>>) -> Result<Json<SpeedResponse>> {
    let (callback, mut rx) = ChannelCallback::new();
    state.gadget.get_usb_speed(callback).await;

    match take_reply(&mut rx).await? {
        CallbackReply::Speed(speed) => Ok(Json(SpeedResponse { speed })),
        other => Err(AppError::Internal(format!("Unexpected reply: {:?}", other))),
    }
}

/// Get the running configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json((*state.config.get()).clone())
}

/// Stream gadget events as server-sent events until shutdown
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let rx = state.events.subscribe();

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Event::default().json_data(&event), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Event stream lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::default())
}
