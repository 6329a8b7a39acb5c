use std::path::{Path, PathBuf};

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use huddle_gateway::identity::Identity;
use huddle_types::api::AttachmentResponse;
use huddle_types::error::{ChatError, ChatResult};
use huddle_types::models::{AttachmentRef, MessageType};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// 16 MB upload limit.
pub const MAX_ATTACHMENT_BYTES: usize = 16 * 1024 * 1024;

/// URL prefix the upload directory is served under.
pub const PUBLIC_PREFIX: &str = "/uploads";

const ALLOWED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "pdf", "txt", "doc", "docx", "zip", "mp3", "wav", "ogg",
    "webm", "m4a",
];

/// Content-addressed blob storage on local disk. Identical uploads share a
/// file named after their SHA-256.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn store(&self, original_name: &str, bytes: &[u8]) -> ChatResult<AttachmentRef> {
        let original_name = clean_name(original_name)?;
        let ext = allowed_extension(&original_name)?;
        if bytes.is_empty() {
            return Err(ChatError::invalid("empty upload"));
        }

        let file_name = format!("{}.{}", hex::encode(Sha256::digest(bytes)), ext);
        let path = self.dir.join(&file_name);

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("Failed to create upload directory {:?}: {}", self.dir, e);
            ChatError::storage(e)
        })?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Attachment {} already stored", file_name);
        } else {
            tokio::fs::write(&path, bytes).await.map_err(|e| {
                error!("Failed to write attachment {:?}: {}", path, e);
                ChatError::storage(e)
            })?;
        }

        Ok(AttachmentRef {
            path: format!("{}/{}", PUBLIC_PREFIX, file_name),
            original_name,
        })
    }
}

/// Final path component only, so client-supplied names never carry directories.
fn clean_name(raw: &str) -> ChatResult<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name.len() > 255 {
        return Err(ChatError::invalid("invalid file name"));
    }
    Ok(name.to_string())
}

fn allowed_extension(name: &str) -> ChatResult<String> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ChatError::invalid(format!("file type '{}' not allowed", ext)))
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// POST /attachments?name=: raw body upload. The returned reference is then
/// sent along with a message.
pub async fn upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UploadQuery>,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(ApiError::Status(StatusCode::PAYLOAD_TOO_LARGE, "attachment too large"));
    }

    let attachment = state.attachments.store(&query.name, &bytes).await?;
    let ext = attachment
        .path
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_string();
    debug!(
        "{} uploaded {} ({} bytes) as {}",
        identity.username,
        attachment.original_name,
        bytes.len(),
        attachment.path
    );

    Ok((
        StatusCode::CREATED,
        Json(AttachmentResponse {
            message_type: MessageType::from_extension(&ext),
            path: attachment.path,
            original_name: attachment.original_name,
        }),
    ))
}
