//! Optional re-hosting of external images through an [`ImageStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::markers::MarkerMap;
use crate::model::{Block, BlockKind, ImageSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("fetching {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("upload of {filename} failed: {message}")]
    Upload { filename: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: String,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ImageError>;
}

/// Stores raw image bytes and returns a reference usable in an image block.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, image: FetchedImage) -> Result<String, ImageError>;
}

/// What to do with an image that could not be re-hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RehostPolicy {
    /// Keep the block pointing at the original URL.
    #[default]
    FallbackToExternal,
    /// Drop the block; the source is not publicly reachable.
    Required,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehostStats {
    pub uploaded: usize,
    pub kept_external: usize,
    pub dropped: usize,
}

/// File name for an upload: last path segment of `url`, query removed.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("image")
        .to_string()
}

pub struct ImageRehoster<'a> {
    fetcher: &'a dyn ImageFetcher,
    store: &'a dyn ImageStore,
    policy: RehostPolicy,
}

impl<'a> ImageRehoster<'a> {
    pub fn new(fetcher: &'a dyn ImageFetcher, store: &'a dyn ImageStore, policy: RehostPolicy) -> Self {
        Self {
            fetcher,
            store,
            policy,
        }
    }

    async fn upload(&self, url: &str) -> Result<String, ImageError> {
        let image = self.fetcher.fetch(url).await?;
        self.store.upload(image).await
    }

    /// Re-hosts every external image in `blocks` and in the deferred `map`.
    ///
    /// Each distinct URL is uploaded once.
    pub async fn rehost(&self, blocks: &mut Vec<Block>, map: &mut MarkerMap) -> RehostStats {
        let mut urls = Vec::new();
        let mut gather = |block: &Block| {
            if let BlockKind::Image(ImageSource::External(url)) = &block.kind
                && !urls.contains(url)
            {
                urls.push(url.clone());
            }
        };
        for block in blocks.iter() {
            block.visit(&mut gather);
        }
        for group in map.groups_mut() {
            for block in group.iter() {
                block.visit(&mut gather);
            }
        }

        let mut resolved: HashMap<String, Option<ImageSource>> = HashMap::new();
        let mut stats = RehostStats::default();
        for url in urls {
            let outcome = match self.upload(&url).await {
                Ok(id) => {
                    log::debug!("re-hosted {url} as {id}");
                    stats.uploaded += 1;
                    Some(ImageSource::Uploaded(id))
                }
                Err(err) => match self.policy {
                    RehostPolicy::FallbackToExternal => {
                        log::warn!("{err}; keeping external URL");
                        stats.kept_external += 1;
                        Some(ImageSource::External(url.clone()))
                    }
                    RehostPolicy::Required => {
                        log::warn!("{err}; dropping image");
                        None
                    }
                },
            };
            resolved.insert(url, outcome);
        }

        stats.dropped += apply(blocks, &resolved);
        for group in map.groups_mut() {
            stats.dropped += apply(group, &resolved);
        }
        stats
    }
}

/// Swaps image sources in place; returns how many blocks were removed.
fn apply(blocks: &mut Vec<Block>, resolved: &HashMap<String, Option<ImageSource>>) -> usize {
    let before = blocks.len();
    let mut dropped = 0;
    blocks.retain_mut(|block| {
        if let BlockKind::Image(ImageSource::External(url)) = &block.kind
            && let Some(outcome) = resolved.get(url)
        {
            match outcome {
                Some(source) => block.kind = BlockKind::Image(source.clone()),
                None => return false,
            }
        }
        dropped += apply(&mut block.children, resolved);
        true
    });
    dropped + before - blocks.len()
}
