//! Image references accepted by the face-swap endpoint.
//!
//! A reference is either an HTTP(S) URL or an inline `data:` URI carrying the
//! user's compressed upload.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use url::Url;

/// Why an image reference was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("image reference is empty")]
    Empty,

    #[error("not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("malformed data URI")]
    MalformedDataUri,

    #[error("data URI payload is not valid base64")]
    InvalidBase64,
}

/// A validated image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Remote image addressed by an HTTP(S) URL
    Url(Url),
    /// Inline image carried in the request
    DataUri {
        media_type: String,
        payload_len: usize,
    },
}

impl ImageRef {
    /// Validate a raw reference.
    pub fn parse(raw: &str) -> Result<Self, ImageRefError> {
        if raw.trim().is_empty() {
            return Err(ImageRefError::Empty);
        }

        if let Some(rest) = raw.strip_prefix("data:") {
            return parse_data_uri(rest);
        }

        let url = Url::parse(raw).map_err(|e| ImageRefError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(ImageRef::Url(url)),
            other => Err(ImageRefError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn is_data_uri(&self) -> bool {
        matches!(self, ImageRef::DataUri { .. })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Url(url) => write!(f, "{}", url),
            ImageRef::DataUri {
                media_type,
                payload_len,
            } => write!(f, "data URI ({}, {} bytes)", media_type, payload_len),
        }
    }
}

fn parse_data_uri(rest: &str) -> Result<ImageRef, ImageRefError> {
    let (header, payload) = rest.split_once(',').ok_or(ImageRefError::MalformedDataUri)?;

    let media_type = header.split(';').next().unwrap_or_default();
    let media_type = if media_type.is_empty() {
        "text/plain".to_string()
    } else {
        media_type.to_ascii_lowercase()
    };

    let payload_len = if header.ends_with(";base64") {
        STANDARD
            .decode(payload)
            .map_err(|_| ImageRefError::InvalidBase64)?
            .len()
    } else {
        payload.len()
    };

    Ok(ImageRef::DataUri {
        media_type,
        payload_len,
    })
}

/// Shorten a raw reference for logs; data URIs can be megabytes long.
pub fn summarize(raw: &str) -> String {
    if raw.starts_with("data:") {
        format!("data URI (length: {})", raw.len())
    } else {
        raw.to_string()
    }
}

/// Strip the query string from a URL, keeping any fragment.
///
/// Data URIs and anything that does not parse as a URL come back unchanged.
pub fn sanitize_image_url(raw: &str) -> String {
    if raw.starts_with("data:") {
        return raw.to_string();
    }
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

pub fn is_imagekit_url(raw: &str) -> bool {
    raw.contains("imagekit.io")
}

/// Append an ImageKit transformation suffix to ImageKit URLs.
pub fn apply_transformations(url: &str, transformations: &str) -> String {
    if is_imagekit_url(url) && !transformations.is_empty() {
        format!("{}{}", url, transformations)
    } else {
        url.to_string()
    }
}
