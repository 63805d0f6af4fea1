//! ImageKit media library client for the curated reference images.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ImageKitConfig;
use crate::error::Result;

const DEFAULT_TITLE: &str = "Reference Image";

/// Failure of an ImageKit call.
#[derive(Error, Debug)]
pub enum ImageKitError {
    #[error("ImageKit request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ImageKit request failed: {status}")]
    Status { status: u16, body: String },
}

/// A reference image as served to the try-on page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub id: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct ImageKitFile {
    #[serde(rename = "fileId")]
    file_id: String,
    url: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<ImageKitFile> for ReferenceImage {
    fn from(file: ImageKitFile) -> Self {
        Self {
            id: file.file_id,
            url: file.url,
            title: file
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        }
    }
}

/// Lists files from the reference folder of the ImageKit media library.
pub struct ImageKitClient {
    http: reqwest::Client,
    base_url: String,
    private_key: String,
    reference_path: String,
}

impl ImageKitClient {
    pub fn new(config: &ImageKitConfig, private_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            private_key: private_key.to_string(),
            reference_path: config.reference_path.clone(),
        })
    }

    /// One page of reference images. `page` is 1-based; page 0 is treated as 1.
    pub async fn list_references(
        &self,
        page: u32,
        limit: u32,
    ) -> std::result::Result<Vec<ReferenceImage>, ImageKitError> {
        let skip = u64::from(page.max(1) - 1) * u64::from(limit);
        let entries = self
            .fetch_entries(&[
                ("path", self.reference_path.clone()),
                ("skip", skip.to_string()),
                ("limit", limit.to_string()),
            ])
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<ImageKitFile>(item) {
                Ok(file) => Some(ReferenceImage::from(file)),
                Err(e) => {
                    debug!(error = %e, "Skipping non-file ImageKit entry");
                    None
                }
            })
            .collect())
    }

    /// Number of entries in the reference folder listing.
    ///
    /// Counts every listed entry, the same set `skip` pages over.
    pub async fn count_references(&self) -> std::result::Result<usize, ImageKitError> {
        let entries = self
            .fetch_entries(&[("path", self.reference_path.clone())])
            .await?;
        debug!(count = entries.len(), "Counted reference images");
        Ok(entries.len())
    }

    async fn fetch_entries(
        &self,
        query: &[(&str, String)],
    ) -> std::result::Result<Vec<Value>, ImageKitError> {
        let response = self
            .http
            .get(format!("{}/v1/files", self.base_url))
            .basic_auth(&self.private_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImageKitError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Anything but an array is treated as an empty listing.
        let Value::Array(items) = response.json::<Value>().await? else {
            warn!("ImageKit listing was not an array");
            return Ok(Vec::new());
        };

        Ok(items)
    }
}
