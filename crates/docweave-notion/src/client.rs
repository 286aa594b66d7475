use std::time::Duration;

use async_trait::async_trait;
use docweave_engine::api::{BlockApi, ChildrenPage, CreatedPage, NewPage, PageParent, RemoteBlock};
use docweave_engine::ApiError;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};
use thiserror::Error;

use crate::status::{classify, parse_retry_after, transport_error};

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API token contains characters not allowed in a header")]
    InvalidToken,

    #[error("invalid Notion-Version header value {0:?}")]
    InvalidVersion(String),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Notion REST client. Every call is a single request; retries belong to the caller.
#[derive(Debug, Clone)]
pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
}

impl NotionClient {
    pub fn new(token: &str, notion_version: &str) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            "notion-version",
            HeaderValue::from_str(notion_version)
                .map_err(|_| ClientError::InvalidVersion(notion_version.to_string()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}/{path}", self.base_url))
    }

    /// Sends `request` and returns the JSON body of a successful response.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body);
        }
        let err = classify(status, retry_after, &body);
        log::debug!("notion responded {status}: {err}");
        Err(err)
    }
}

fn unexpected(what: &str) -> ApiError {
    ApiError::Status {
        code: 200,
        message: format!("unexpected response: {what}"),
    }
}

/// Request body for `POST /pages`.
pub fn page_body(page: &NewPage) -> Value {
    let parent = match &page.parent {
        PageParent::Database(id) => json!({ "database_id": id }),
        PageParent::Page(id) => json!({ "page_id": id }),
    };
    let mut body = json!({
        "parent": parent,
        "properties": page.properties,
        "children": page.children,
    });
    if let Some(icon) = &page.icon {
        body["icon"] = icon.clone();
    }
    if let Some(cover) = &page.cover {
        body["cover"] = cover.clone();
    }
    body
}

fn remote_blocks(body: &Value) -> Vec<RemoteBlock> {
    body.get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().filter_map(RemoteBlock::from_value).collect())
        .unwrap_or_default()
}

#[async_trait]
impl BlockApi for NotionClient {
    async fn create_page(&self, page: NewPage) -> Result<CreatedPage, ApiError> {
        let body = self
            .send(self.request(Method::POST, "pages").json(&page_body(&page)))
            .await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| unexpected("page without id"))?;
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://www.notion.so/{}", id.replace('-', "")));
        Ok(CreatedPage {
            id: id.to_string(),
            url,
        })
    }

    async fn append_children(
        &self,
        block_id: &str,
        children: Vec<Value>,
    ) -> Result<Vec<RemoteBlock>, ApiError> {
        let request = self
            .request(Method::PATCH, &format!("blocks/{block_id}/children"))
            .json(&json!({ "children": children }));
        Ok(remote_blocks(&self.send(request).await?))
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage, ApiError> {
        let mut query = vec![("page_size", page_size.clamp(1, 100).to_string())];
        if let Some(cursor) = cursor {
            query.push(("start_cursor", cursor.to_string()));
        }
        let request = self
            .request(Method::GET, &format!("blocks/{block_id}/children"))
            .query(&query);
        let body = self.send(request).await?;

        let has_more = body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
        Ok(ChildrenPage {
            results: remote_blocks(&body),
            next_cursor: body
                .get("next_cursor")
                .and_then(Value::as_str)
                .filter(|_| has_more)
                .map(str::to_string),
        })
    }

    async fn retrieve_block(&self, block_id: &str) -> Result<RemoteBlock, ApiError> {
        let body = self
            .send(self.request(Method::GET, &format!("blocks/{block_id}")))
            .await?;
        RemoteBlock::from_value(&body).ok_or_else(|| unexpected("block without id or type"))
    }

    async fn update_block(&self, block_id: &str, payload: Value) -> Result<RemoteBlock, ApiError> {
        let body = self
            .send(
                self.request(Method::PATCH, &format!("blocks/{block_id}"))
                    .json(&payload),
            )
            .await?;
        RemoteBlock::from_value(&body).ok_or_else(|| unexpected("block without id or type"))
    }
}
