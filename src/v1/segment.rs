use std::path::{Path, PathBuf};

use async_stream::stream;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, multipart::MultipartRejection, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Envelope, SegmentError, SegmentResult};
use crate::options::SegmentOptions;
use crate::watchdog::RecycleGuard;
use crate::{storage, AppState};

/// Multipart field carrying the volume.
pub const UPLOAD_FIELD: &str = "file";

const STREAM_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub input: String,
    #[serde(default)]
    pub data: SegmentOptions,
}

/// Body of `/segment_input`: server-local paths with the options inline.
#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub input: PathBuf,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(flatten)]
    pub options: SegmentOptions,
}

pub async fn segment_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, SegmentError> {
    let span = tracing::info_span!("segment", job_id = %Uuid::new_v4(), endpoint = "segment_file");

    async move {
        let _job = state.track_job();
        let recycle = state.watchdog.recycle_guard();
        let timestamp_ms = storage::timestamp_ms();
        let (input, options) = receive_upload(&state, multipart?, timestamp_ms).await?;
        let options = options.single_file_output();
        let output = storage::output_path(&state.config.outputs_dir, timestamp_ms);

        state
            .watchdog
            .guard(state.segmenter.segment(&input, &output, &options))
            .await?;

        stream_result(&output, recycle).await
    }
    .instrument(span)
    .await
}

pub async fn segment_url(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<Response, SegmentError> {
    let span = tracing::info_span!("segment", job_id = %Uuid::new_v4(), endpoint = "segment_url");

    async move {
        let Json(req) = payload?;
        let url = reqwest::Url::parse(&req.input)
            .map_err(|e| SegmentError::BadRequest(format!("invalid input url {:?}: {e}", req.input)))?;

        let _job = state.track_job();
        let recycle = state.watchdog.recycle_guard();
        let options = req.data.single_file_output();
        let timestamp_ms = storage::timestamp_ms();
        let input = storage::input_path(
            &state.config.inputs_dir,
            timestamp_ms,
            &storage::url_file_name(&url),
        );
        let output = storage::output_path(&state.config.outputs_dir, timestamp_ms);

        state
            .watchdog
            .guard(async {
                let bytes = storage::download(&state.http, &url, &input).await?;
                tracing::info!(%url, bytes, "input downloaded");
                state.segmenter.segment(&input, &output, &options).await
            })
            .await?;

        stream_result(&output, recycle).await
    }
    .instrument(span)
    .await
}

/// Runs on paths the server can already see and answers with an envelope.
pub async fn segment_input(
    State(state): State<AppState>,
    payload: Result<Json<PathRequest>, JsonRejection>,
) -> Result<Json<Envelope>, SegmentError> {
    let span = tracing::info_span!("segment", job_id = %Uuid::new_v4(), endpoint = "segment_input");

    async move {
        let Json(req) = payload?;
        let _job = state.track_job();
        let _recycle = state.watchdog.recycle_guard();
        let output = req.output.unwrap_or_else(|| {
            storage::output_path(&state.config.outputs_dir, storage::timestamp_ms())
        });

        state
            .watchdog
            .guard(state.segmenter.segment(&req.input, &output, &req.options))
            .await?;

        Ok(Json(Envelope::new(
            StatusCode::OK.as_u16(),
            "totalsegmentator succeed.",
        )))
    }
    .instrument(span)
    .await
}

async fn receive_upload(
    state: &AppState,
    mut multipart: Multipart,
    timestamp_ms: i64,
) -> SegmentResult<(PathBuf, SegmentOptions)> {
    let mut options = SegmentOptions::default();
    let mut input = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == UPLOAD_FIELD {
            let file_name = field
                .file_name()
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .ok_or(SegmentError::MissingFileName)?;
            if !storage::has_archive_extension(&file_name) {
                return Err(SegmentError::UnsupportedUpload(file_name));
            }

            let path = storage::input_path(&state.config.inputs_dir, timestamp_ms, &file_name);
            let bytes = storage::persist_stream(field, &path).await?;
            tracing::info!(file = %file_name, bytes, "upload received");
            input = Some(path);
        } else {
            let value = field.text().await?;
            options.set_field(&name, &value)?;
        }
    }

    let input = input.ok_or_else(|| {
        SegmentError::BadRequest(format!("missing `{UPLOAD_FIELD}` field"))
    })?;
    Ok((input, options))
}

/// Stream the engine's output back as an attachment.
///
/// `recycle` rides along with the body and is released after the last chunk.
async fn stream_result(path: &Path, recycle: Option<RecycleGuard>) -> SegmentResult<Response> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(SegmentError::MissingOutput),
    };
    let file = tokio::fs::File::open(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    tracing::info!(file = %file_name, bytes = metadata.len(), "streaming segmentation result");

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={file_name}"),
        ),
        (header::CONTENT_LENGTH, metadata.len().to_string()),
    ];

    Ok((StatusCode::OK, headers, Body::from_stream(file_chunks(file, recycle))).into_response())
}

fn file_chunks(
    mut file: tokio::fs::File,
    recycle: Option<RecycleGuard>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream! {
        let _recycle = recycle;
        loop {
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => return,
                Ok(n) => {
                    buf.truncate(n);
                    yield Ok(Bytes::from(buf));
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}
