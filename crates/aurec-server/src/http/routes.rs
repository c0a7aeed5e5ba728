use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::params::FormParams;
use crate::error::ApiError;
use crate::flash::{format_bytes, is_audio_name, FlashError, FlashPath};
use crate::metrics::Metrics;
use crate::upload::{Reservation, UploadStream};
use crate::AppState;

pub const MIN_RECORD_SECONDS: i64 = 5;
pub const MAX_RECORD_SECONDS: i64 = 30;

pub(crate) async fn record(
    State(state): State<AppState>,
    params: FormParams,
) -> Result<&'static str, ApiError> {
    let raw = params.require("record_time")?;
    let seconds: i64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid record_time: {raw}")))?;
    if !(MIN_RECORD_SECONDS..=MAX_RECORD_SECONDS).contains(&seconds) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "record_time must be between {MIN_RECORD_SECONDS} and {MAX_RECORD_SECONDS} seconds"
        )));
    }

    let target = state.flash().resolve(state.recording_path())?;
    state
        .uploads()
        .admit_unclaimed(&target, || {
            // The range check above keeps this in u32.
            state.jobs().start_recording(target.clone(), seconds as u32)
        })
        .ok_or_else(|| being_uploaded(&target))??;
    Ok("Recording started")
}

pub(crate) async fn play(
    State(state): State<AppState>,
    params: FormParams,
) -> Result<String, ApiError> {
    let path = state.flash().resolve(params.require("file")?)?;
    if !path.has_extension(".wav") {
        return Err(ApiError::UnsupportedMediaType(
            "Only .wav files can be played".to_string(),
        ));
    }
    if !state.flash().exists(&path).await? {
        return Err(ApiError::NotFound("File not found".to_string()));
    }
    state
        .uploads()
        .admit_unclaimed(&path, || state.jobs().start_playback(path.clone()))
        .ok_or_else(|| being_uploaded(&path))??;
    Ok(format!("Playing {path}"))
}

fn being_uploaded(path: &FlashPath) -> ApiError {
    ApiError::ConcurrencyConflict(format!("{path} is being uploaded"))
}

pub(crate) async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<&'static str, ApiError> {
    let mut multipart = multipart.map_err(|err| ApiError::BadRequest(err.body_text()))?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let Some(reservation) = accept_upload_target(&state, &file_name) else {
            state.metrics().inc_upload("dropped");
            continue;
        };
        let Some(permit) = state.uploads().try_admit() else {
            tracing::info!(path = %reservation.path(), "upload rejected: no free slot");
            state.metrics().inc_upload("rejected");
            return Err(ApiError::AdmissionExhausted);
        };

        let mut stream = match UploadStream::begin(state.flash(), permit, reservation).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(file_name = %file_name, error = %err, "upload could not start");
                state.metrics().inc_upload("aborted");
                continue;
            }
        };

        let mut failed = None;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(err) = stream.write_chunk(&chunk).await {
                        failed = Some(err);
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    stream.abort(&err);
                    state.metrics().inc_upload("aborted");
                    return Err(ApiError::BadRequest(err.body_text()));
                }
            }
        }

        match failed {
            Some(err) => {
                stream.abort(&err);
                state.metrics().inc_upload("aborted");
            }
            None => match stream.finish().await {
                Ok(_) => state.metrics().inc_upload("completed"),
                Err(err) => {
                    tracing::warn!(file_name = %file_name, error = %err, "upload flush failed");
                    state.metrics().inc_upload("aborted");
                }
            },
        }
        refresh_storage_gauge(&state).await;
    }

    Ok("Upload complete")
}

/// Validate an upload file name and claim it. `None` means the stream is dropped silently.
fn accept_upload_target(state: &AppState, file_name: &str) -> Option<Reservation> {
    let path = match state.flash().resolve(file_name) {
        Ok(path) => path,
        Err(err) => {
            tracing::info!(file_name, error = %err, "upload dropped: bad file name");
            return None;
        }
    };
    if !path.is_audio() {
        tracing::info!(path = %path, "upload dropped: unsupported extension");
        return None;
    }
    let reservation = state
        .uploads()
        .reserve_unless(&path, |path| state.arbiter().holds_target(path));
    if reservation.is_none() {
        tracing::info!(path = %path, "upload dropped: target in use");
    }
    reservation
}

pub(crate) async fn edit(
    State(state): State<AppState>,
    params: FormParams,
) -> Result<String, ApiError> {
    let path = state.flash().resolve(params.require("file")?)?;
    if !path.is_audio() {
        return Err(ApiError::UnsupportedMediaType(
            "Only audio files can be deleted".to_string(),
        ));
    }
    if !state.flash().exists(&path).await? {
        return Err(ApiError::NotFound("File not found".to_string()));
    }
    // Held across the removal so neither a job nor an upload can claim the path meanwhile.
    let Some(_claim) = state
        .uploads()
        .reserve_unless(&path, |path| state.arbiter().holds_target(path))
    else {
        return Err(ApiError::ConcurrencyConflict(format!("{path} is in use")));
    };

    match state.flash().remove(&path).await {
        Ok(()) => {
            tracing::info!(path = %path, "file deleted");
            refresh_storage_gauge(&state).await;
            Ok(format!("Deleted {path}"))
        }
        Err(FlashError::NotFound) => Err(ApiError::NotFound("File not found".to_string())),
        Err(err) => {
            tracing::error!(path = %path, error = %err, "delete failed");
            Err(ApiError::Internal(format!("Failed to delete {path}")))
        }
    }
}

pub(crate) async fn status(State(state): State<AppState>) -> &'static str {
    if state.arbiter().is_busy() {
        "busy"
    } else {
        "ready"
    }
}

#[derive(Debug, Serialize)]
pub struct PlaylistEntry {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    path: String,
    size: String,
}

pub(crate) async fn playlist(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlaylistEntry>>, ApiError> {
    let entries = state
        .flash()
        .list()
        .await?
        .into_iter()
        .filter(|entry| is_audio_name(&entry.name))
        .map(|entry| PlaylistEntry {
            kind: "file",
            size: format_bytes(entry.size),
            name: entry.name,
            path: entry.path,
        })
        .collect();
    Ok(Json(entries))
}

pub(crate) async fn space(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let available = state.flash().available_space().await?;
    state.metrics().set_storage_available(available);
    Ok(Json(serde_json::json!({ "space": format_bytes(available) })))
}

pub(crate) async fn healthz() -> &'static str {
    "ok\n"
}

pub(crate) async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(Metrics::metrics_content_type()),
        )],
        state.metrics().encode(),
    )
        .into_response()
}

pub(crate) async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn refresh_storage_gauge(state: &AppState) {
    if let Ok(available) = state.flash().available_space().await {
        state.metrics().set_storage_available(available);
    }
}
