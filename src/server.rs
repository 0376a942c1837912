use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use log::{error, info};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;

use crate::error::TransportError;
use crate::links::LinkBuilder;
use crate::store::Store;
use crate::transport::{MediaDownload, MessageRef, Transport};

const MAX_CONCURRENT_REQUESTS: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub links: LinkBuilder,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/get/:id", get(redirect_to_bot))
        .route("/stream/:message_id", get(stream))
        .route("/download/:message_id", get(download))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web server listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "running",
        "bot": state.links.bot_username(),
    }))
}

async fn redirect_to_bot(State(state): State<AppState>, Path(id): Path<String>) -> Redirect {
    Redirect::temporary(&state.links.start_link(&format!("get_{}", id)))
}

async fn stream(State(state): State<AppState>, Path(message_id): Path<i32>) -> Response {
    serve_media(&state, message_id, Disposition::Inline).await
}

async fn download(State(state): State<AppState>, Path(message_id): Path<i32>) -> Response {
    serve_media(&state, message_id, Disposition::Attachment).await
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    fn header(self, file_name: &str) -> String {
        let kind = match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        };
        let ascii: String = file_name
            .chars()
            .map(|c| match c {
                '"' | '\\' => '_',
                c if c.is_ascii_graphic() || c == ' ' => c,
                _ => '_',
            })
            .collect();
        format!(
            "{}; filename=\"{}\"; filename*=UTF-8''{}",
            kind,
            ascii,
            utf8_percent_encode(file_name, NON_ALPHANUMERIC)
        )
    }
}

async fn serve_media(state: &AppState, message_id: i32, disposition: Disposition) -> Response {
    match find_media(state, message_id).await {
        Ok(Some(media)) => media_response(media, disposition),
        Ok(None) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(err) => {
            error!("Serving message {} failed: {:#}", message_id, err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Look the message up in the stream channel, then in the storage channel.
async fn find_media(state: &AppState, message_id: i32) -> Result<Option<MediaDownload>> {
    let channels = [
        state.store.get_stream_channel().await?,
        state.store.get_owner_storage_channel().await?,
    ];
    let mut tried = Vec::new();
    for chat_id in channels.into_iter().flatten() {
        if tried.contains(&chat_id) {
            continue;
        }
        tried.push(chat_id);
        match state
            .transport
            .stream_media(MessageRef::new(chat_id, message_id))
            .await
        {
            Ok(Some(media)) => return Ok(Some(media)),
            Ok(None) | Err(TransportError::MessageNotFound { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}

fn media_response(media: MediaDownload, disposition: Disposition) -> Response {
    let content_type = media.mime_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&media.file_name)
            .first_or_octet_stream()
            .to_string()
    });
    let body = media
        .chunks
        .map(|chunk| chunk.map_err(|err| std::io::Error::other(err.to_string())));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            disposition.header(&media.file_name),
        );
    if media.file_size > 0 {
        response = response.header(header::CONTENT_LENGTH, media.file_size);
    }
    match response.body(Body::from_stream(body)) {
        Ok(response) => response,
        Err(err) => {
            error!("Failed to build media response: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
