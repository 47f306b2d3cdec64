//! Media Port: stores a blob under a logical kind and filename.
//!
//! Content may arrive as raw bytes or base64 text; both paths are accepted,
//! matching the original implementation's `media_handler.py`.

use crate::domain_types::Filename;
use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info};

/// Media kind, determining the target subdirectory and valid extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Voice/audio attachment.
    Voice,
}

impl MediaKind {
    fn directory(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Voice => "voices",
        }
    }

    fn valid_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["jpg", "jpeg", "png", "gif"],
            Self::Video => &["mp4", "webm", "mov", "avi", "mkv", "3gp"],
            Self::Voice => &["wav", "mp3", "m4a"],
        }
    }
}

/// Content as delivered over the wire: either raw bytes or base64 text.
#[derive(Debug, Clone)]
pub enum MediaContent {
    /// Already-decoded bytes (the binary-frame path).
    Bytes(Vec<u8>),
    /// Base64-encoded text (the inline-JSON path).
    Base64(String),
}

impl MediaContent {
    fn decode(self) -> Result<Vec<u8>, MediaError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Base64(text) => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| MediaError::Decode(e.to_string())),
        }
    }
}

/// Failure saving a media blob.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Base64 content failed to decode.
    #[error("base64 decode failed: {0}")]
    Decode(String),

    /// Content decoded to zero bytes.
    #[error("empty content")]
    Empty,

    /// Filename extension is not valid for the declared kind.
    #[error("invalid extension for {kind:?}: {filename}")]
    InvalidExtension {
        /// The media kind the extension was checked against.
        kind: MediaKind,
        /// The offending filename.
        filename: String,
    },

    /// The blob could not be written to disk.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract contract for storing a media blob.
#[async_trait]
pub trait MediaPort: Send + Sync {
    /// Saves `content` under `kind`, returning the path it was written to.
    async fn save(
        &self,
        content: MediaContent,
        kind: MediaKind,
        filename: &Filename,
    ) -> Result<String, MediaError>;
}

/// Filesystem-backed implementation rooted at a configured media directory.
pub struct FilesystemMedia {
    root: PathBuf,
}

impl FilesystemMedia {
    /// Creates a media store rooted at `root`. The directory and its
    /// per-kind subdirectories are created lazily on first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn extension_of(filename: &str) -> Option<&str> {
        filename.rsplit_once('.').map(|(_, ext)| ext)
    }

    fn unique_filename(filename: &str) -> String {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let suffix: String = rand::thread_rng()
            .sample_iter(rand::distributions::Alphanumeric)
            .filter(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            .take(6)
            .map(char::from)
            .collect();

        match filename.rsplit_once('.') {
            Some((base, ext)) => format!("{base}_{timestamp}_{suffix}.{ext}"),
            None => format!("{filename}_{timestamp}_{suffix}"),
        }
    }
}

#[async_trait]
impl MediaPort for FilesystemMedia {
    async fn save(
        &self,
        content: MediaContent,
        kind: MediaKind,
        filename: &Filename,
    ) -> Result<String, MediaError> {
        let raw_name = filename.as_ref().to_string();
        let extension = Self::extension_of(&raw_name).unwrap_or("").to_lowercase();
        if !kind.valid_extensions().contains(&extension.as_str()) {
            error!(filename = %raw_name, ?kind, "invalid media extension");
            return Err(MediaError::InvalidExtension {
                kind,
                filename: raw_name,
            });
        }

        let bytes = content.decode()?;
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }

        let dir = self.root.join(kind.directory());
        tokio::fs::create_dir_all(&dir).await?;

        let stored_name = Self::unique_filename(&raw_name);
        let stored_path = dir.join(&stored_name);
        tokio::fs::write(&stored_path, &bytes).await?;

        info!(path = %stored_path.display(), bytes = bytes.len(), "saved media");
        Ok(stored_path.to_string_lossy().into_owned())
    }
}
