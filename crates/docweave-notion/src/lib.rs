//! # Notion API client
//!
//! [`NotionClient`] speaks Notion's REST API and implements the engine's
//! [`BlockApi`](docweave_engine::BlockApi) and
//! [`ImageStore`](docweave_engine::ImageStore) traits.
//!
//! ## Modules
//!
//! - **`client`**: the HTTP client and request bodies
//! - **`status`**: mapping HTTP failures onto [`ApiError`](docweave_engine::ApiError)
//! - **`uploads`**: file uploads and fetching source images over HTTP

pub mod client;
pub mod status;
pub mod uploads;

pub use client::{ClientError, DEFAULT_BASE_URL, DEFAULT_NOTION_VERSION, NotionClient};
pub use uploads::HttpImageFetcher;
