//! # Destination API
//!
//! The block store this crate writes to, seen through the [`BlockApi`] trait.
//! The HTTP implementation lives in the `docweave-notion` crate;
//! [`memory::InMemoryApi`] is a faithful in-process fake for tests and dry
//! experiments.
//!
//! ## Limits the callers respect
//!
//! - at most 100 children per append call
//! - two levels of nesting per write
//! - `429` responses must be backed off

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::RichTextSpan;
use crate::model::payload::spans_from_value;

/// Failure talking to the destination API, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("object is archived: {0}")]
    Archived(String),

    #[error("conflicting edit: {0}")]
    Conflict(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Validation(String),

    #[error("unexpected status {code}: {message}")]
    Status { code: u16, message: String },
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Errors that may succeed when the same request is sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::Conflict(_) | ApiError::Transient(_) => true,
            ApiError::Status { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Errors after which no further write to the same page can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Archived(_))
    }
}

/// A block as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBlock {
    pub id: String,
    pub block_type: String,
    pub rich_text: Vec<RichTextSpan>,
    pub has_children: bool,
    pub archived: bool,
    pub table_width: Option<usize>,
    /// Cells of a `table_row` block.
    pub cells: Vec<Vec<RichTextSpan>>,
}

impl RemoteBlock {
    /// Parses a block object returned by the destination API.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        let block_type = value.get("type")?.as_str()?.to_string();
        let body = value.get(&block_type).cloned().unwrap_or(Value::Null);

        let rich_text = body
            .get("rich_text")
            .or_else(|| body.get("caption"))
            .map(spans_from_value)
            .unwrap_or_default();
        let cells = body
            .get("cells")
            .and_then(Value::as_array)
            .map(|cells| cells.iter().map(spans_from_value).collect())
            .unwrap_or_default();

        Some(Self {
            id,
            rich_text,
            has_children: value.get("has_children").and_then(Value::as_bool).unwrap_or(false),
            archived: value.get("archived").and_then(Value::as_bool).unwrap_or(false)
                || value.get("in_trash").and_then(Value::as_bool).unwrap_or(false),
            table_width: body
                .get("table_width")
                .and_then(Value::as_u64)
                .map(|w| w as usize),
            cells,
            block_type,
        })
    }

    pub fn plain_text(&self) -> String {
        crate::model::plain_text(&self.rich_text)
    }

    pub fn has_rich_text(&self) -> bool {
        !self.rich_text.is_empty()
    }
}

/// One page of a paginated children listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildrenPage {
    pub results: Vec<RemoteBlock>,
    pub next_cursor: Option<String>,
}

/// Where a new page is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageParent {
    Database(String),
    Page(String),
}

/// A create-page call: properties and icon/cover are already in API JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub parent: PageParent,
    pub properties: Map<String, Value>,
    pub icon: Option<Value>,
    pub cover: Option<Value>,
    pub children: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPage {
    pub id: String,
    pub url: String,
}

/// Operations the conversion pipeline needs from the destination store.
///
/// Calls are issued strictly one at a time by a single pipeline.
#[async_trait]
pub trait BlockApi: Send + Sync {
    async fn create_page(&self, page: NewPage) -> Result<CreatedPage, ApiError>;

    /// Appends `children` (already serialised) after the existing children of `block_id`.
    async fn append_children(
        &self,
        block_id: &str,
        children: Vec<Value>,
    ) -> Result<Vec<RemoteBlock>, ApiError>;

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage, ApiError>;

    async fn retrieve_block(&self, block_id: &str) -> Result<RemoteBlock, ApiError>;

    async fn update_block(&self, block_id: &str, payload: Value) -> Result<RemoteBlock, ApiError>;
}

/// Every child of `block_id`, following pagination.
pub async fn list_all_children(
    api: &dyn BlockApi,
    block_id: &str,
    page_size: usize,
) -> Result<Vec<RemoteBlock>, ApiError> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = api
            .list_children(block_id, cursor.as_deref(), page_size)
            .await?;
        out.extend(page.results);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(out),
        }
    }
}
