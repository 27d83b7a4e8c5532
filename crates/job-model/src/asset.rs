//! Fetched media assets.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which input slot an asset fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetRole {
    Image,
    Audio,
}

impl AssetRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }

    /// Media type assumed when neither the response nor the URL tells us.
    pub fn default_media_type(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Audio => "audio/mpeg",
        }
    }

    /// Top-level media type this role accepts.
    fn top_level(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for AssetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable in-memory media buffer.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    role: AssetRole,
    bytes: Bytes,
    media_type_hint: String,
}

impl MediaAsset {
    pub fn new(role: AssetRole, bytes: Bytes, media_type_hint: impl Into<String>) -> Self {
        Self {
            role,
            bytes,
            media_type_hint: media_type_hint.into(),
        }
    }

    pub fn role(&self) -> AssetRole {
        self.role
    }

    /// Cheap clone of the underlying buffer.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn media_type_hint(&self) -> &str {
        &self.media_type_hint
    }

    /// File extension used when this asset is materialized on disk.
    pub fn file_extension(&self) -> &'static str {
        extension_for_media_type(&self.media_type_hint, self.role)
    }
}

/// Decide the media type for a fetched asset.
///
/// Prefers a specific `Content-Type` header, then the URL path extension,
/// then the role default. Header parameters (`; charset=...`) are dropped.
pub fn infer_media_type(role: AssetRole, content_type: Option<&str>, url_path: &str) -> String {
    if let Some(header) = content_type {
        let essence = header
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if is_specific_for(role, &essence) {
            return essence;
        }
    }

    if let Some(guess) = mime_guess::from_path(url_path).first() {
        let essence = guess.essence_str().to_ascii_lowercase();
        if is_specific_for(role, &essence) {
            return essence;
        }
    }

    role.default_media_type().to_string()
}

fn is_specific_for(role: AssetRole, essence: &str) -> bool {
    essence
        .split_once('/')
        .map(|(top, sub)| top == role.top_level() && !sub.is_empty())
        .unwrap_or(false)
}

/// Map a media type to the extension the encoding engine expects.
pub fn extension_for_media_type(media_type: &str, role: AssetRole) -> &'static str {
    match media_type {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac" => "m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/webm" => "webm",
        _ => match role {
            AssetRole::Image => "jpg",
            AssetRole::Audio => "mp3",
        },
    }
}
