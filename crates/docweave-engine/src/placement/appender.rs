use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::api::{ApiError, BlockApi};
use crate::config::PipelineConfig;
use crate::model::Block;

/// Chunk count from which the inter-chunk delay starts to grow.
const DELAY_SCALE_STEP: usize = 10;
const MAX_DELAY_FACTOR: u32 = 5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppendError {
    #[error("chunk {chunk_index} failed after {attempts} attempt(s) ({appended} block(s) already appended): {source}")]
    Api {
        chunk_index: usize,
        attempts: u32,
        /// Blocks written by earlier chunks before the failure.
        appended: usize,
        #[source]
        source: ApiError,
    },

    #[error("append aborted at chunk {chunk_index}: {source}")]
    Aborted {
        chunk_index: usize,
        appended: usize,
        #[source]
        source: ApiError,
    },
}

impl AppendError {
    pub fn appended(&self) -> usize {
        match self {
            AppendError::Api { appended, .. } | AppendError::Aborted { appended, .. } => *appended,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AppendError::Aborted { .. })
    }

    pub fn api_error(&self) -> &ApiError {
        match self {
            AppendError::Api { source, .. } | AppendError::Aborted { source, .. } => source,
        }
    }
}

/// Writes blocks under a parent in batches the destination accepts.
pub struct ChunkAppender<'a> {
    api: &'a dyn BlockApi,
    config: &'a PipelineConfig,
}

impl<'a> ChunkAppender<'a> {
    pub fn new(api: &'a dyn BlockApi, config: &'a PipelineConfig) -> Self {
        Self { api, config }
    }

    /// Delay between chunks; longer sequences wait longer.
    pub fn inter_chunk_delay(&self, total_chunks: usize) -> Duration {
        let factor = 1 + (total_chunks / DELAY_SCALE_STEP) as u32;
        self.config
            .inter_chunk_delay()
            .saturating_mul(factor.min(MAX_DELAY_FACTOR))
    }

    /// Appends `blocks` under `parent_id` and returns how many were written.
    ///
    /// Each chunk is retried on its own under the append policy; a chunk that
    /// exhausts its attempts stops the whole append.
    pub async fn append(&self, parent_id: &str, blocks: &[Block]) -> Result<usize, AppendError> {
        if blocks.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.config.chunk_size();
        let total_chunks = blocks.len().div_ceil(chunk_size);
        let policy = self.config.append_policy();
        let delay = self.inter_chunk_delay(total_chunks);
        let mut appended = 0;

        for (chunk_index, chunk) in blocks.chunks(chunk_size).enumerate() {
            if chunk_index > 0 {
                tokio::time::sleep(delay).await;
            }
            let payload: Vec<Value> = chunk.iter().map(Block::to_payload).collect();
            let what = format!("append chunk {}/{total_chunks} to {parent_id}", chunk_index + 1);

            let result = policy
                .run(&what, |_| self.api.append_children(parent_id, payload.clone()))
                .await;
            match result {
                Ok(_) => {
                    appended += chunk.len();
                    log::debug!("{what}: {} block(s)", chunk.len());
                }
                Err(failure) if failure.error.is_fatal() => {
                    return Err(AppendError::Aborted {
                        chunk_index,
                        appended,
                        source: failure.error,
                    });
                }
                Err(failure) => {
                    return Err(AppendError::Api {
                        chunk_index,
                        attempts: failure.attempts,
                        appended,
                        source: failure.error,
                    });
                }
            }
        }
        Ok(appended)
    }
}
