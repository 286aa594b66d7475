pub mod api;
pub mod config;
pub mod convert;
pub mod dedupe;
pub mod images;
pub mod markers;
pub mod model;
pub mod parsing;
pub mod placement;
pub mod retry;

#[cfg(test)]
pub mod tests;

// Re-export key types for easier usage
pub use api::{ApiError, BlockApi, ChildrenPage, CreatedPage, NewPage, PageParent, RemoteBlock};
pub use config::PipelineConfig;
pub use convert::{
    ConversionOutcome, ConversionRequest, ConversionResponse, ConvertError, Converter,
    PropertyNames,
};
pub use images::{FetchedImage, ImageError, ImageFetcher, ImageRehoster, ImageStore, RehostPolicy};
pub use markers::{MarkerMap, MarkerToken, PendingPlacement, PlacementStatus};
pub use model::{Block, BlockKind, RichTextSpan};
pub use parsing::{ParsedDocument, parse_html};
pub use placement::{Orchestrator, PlacementReport};
pub use retry::{Backoff, RetryPolicy};
