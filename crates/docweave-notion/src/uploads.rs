use std::time::Duration;

use async_trait::async_trait;
use docweave_engine::images::filename_from_url;
use docweave_engine::{FetchedImage, ImageError, ImageFetcher, ImageStore};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::{Value, json};

use crate::client::NotionClient;

/// Largest file accepted by a single-part upload.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Mime type guessed from a file extension.
pub fn mime_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ImageStore for NotionClient {
    /// Creates a file upload and sends the bytes in one part; the upload id
    /// is what image blocks reference.
    async fn upload(&self, image: FetchedImage) -> Result<String, ImageError> {
        let failed = |message: String| ImageError::Upload {
            filename: image.filename.clone(),
            message,
        };
        if image.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(failed(format!("{} bytes exceeds the upload limit", image.bytes.len())));
        }

        let created = self
            .send(
                self.request(Method::POST, "file_uploads")
                    .json(&json!({ "filename": image.filename, "content_type": image.mime })),
            )
            .await
            .map_err(|e| failed(e.to_string()))?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| failed("file upload without id".into()))?
            .to_string();

        let part = Part::bytes(image.bytes.clone())
            .file_name(image.filename.clone())
            .mime_str(&image.mime)
            .map_err(|e| failed(e.to_string()))?;
        self.send(
            self.request(Method::POST, &format!("file_uploads/{id}/send"))
                .multipart(Form::new().part("file", part)),
        )
        .await
        .map_err(|e| failed(e.to_string()))?;

        log::debug!("uploaded {} as {id}", image.filename);
        Ok(id)
    }
}

/// Downloads source images with a plain HTTP client.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    http: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ImageError> {
        let failed = |message: String| ImageError::Fetch {
            url: url.to_string(),
            message,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(response.status().to_string()));
        }

        let filename = filename_from_url(url);
        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| mime_for(&filename).to_string());
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            filename,
            mime,
        })
    }
}
