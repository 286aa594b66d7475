use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;

use crate::api::{ApiError, BlockApi, RemoteBlock, list_all_children};
use crate::config::PipelineConfig;
use crate::markers::{MarkerToken, contains_marker_text};
use crate::retry::RetryPolicy;

/// Where deferred content for a marker goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorLocation {
    /// Block that receives the deferred children.
    pub parent_id: String,
    /// Descendant of `parent_id` that actually holds the marker text, when it
    /// is not `parent_id` itself.
    pub carrier_id: Option<String>,
}

impl AnchorLocation {
    /// Block whose rich text must be cleaned after placement.
    pub fn text_holder(&self) -> &str {
        self.carrier_id.as_deref().unwrap_or(&self.parent_id)
    }
}

/// Search over the persisted block tree.
#[async_trait]
pub trait TreeWalker: Send + Sync {
    /// Breadth-first search from `root_id` for the block carrying `token`'s marker text.
    async fn find_by_marker(
        &self,
        root_id: &str,
        token: &MarkerToken,
    ) -> Result<Option<AnchorLocation>, ApiError>;

    /// Every block under `root_id` whose rich text still holds any marker text.
    async fn find_marked(&self, root_id: &str) -> Result<Vec<RemoteBlock>, ApiError>;
}

/// Types whose child paragraphs may carry their marker.
const CARRIER_PARENTS: &[&str] = &["bulleted_list_item", "numbered_list_item", "callout"];
/// Types never searched below.
const OPAQUE_TYPES: &[&str] = &["table", "child_page", "child_database"];

/// Every child of `block_id`, re-listing from the first page when a call
/// fails with a retryable error.
pub async fn list_children_retrying(
    api: &dyn BlockApi,
    block_id: &str,
    page_size: usize,
    policy: &RetryPolicy,
) -> Result<Vec<RemoteBlock>, ApiError> {
    policy
        .run(&format!("list children of {block_id}"), |_| {
            list_all_children(api, block_id, page_size)
        })
        .await
        .map_err(|failure| failure.error)
}

/// [`TreeWalker`] over a live [`BlockApi`], listing children page by page.
pub struct ApiTreeWalker<'a> {
    api: &'a dyn BlockApi,
    page_size: usize,
    retry: RetryPolicy,
}

impl<'a> ApiTreeWalker<'a> {
    pub fn new(api: &'a dyn BlockApi, page_size: usize) -> Self {
        Self {
            api,
            page_size,
            retry: PipelineConfig::default().request_policy(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn list(&self, id: &str) -> Result<Vec<RemoteBlock>, ApiError> {
        list_children_retrying(self.api, id, self.page_size, &self.retry).await
    }

    async fn children(
        &self,
        id: &str,
        listed: &mut HashMap<String, Vec<RemoteBlock>>,
    ) -> Result<Vec<RemoteBlock>, ApiError> {
        if let Some(children) = listed.remove(id) {
            return Ok(children);
        }
        self.list(id).await
    }

    fn should_descend(block: &RemoteBlock) -> bool {
        block.has_children && !OPAQUE_TYPES.contains(&block.block_type.as_str())
    }
}

#[async_trait]
impl TreeWalker for ApiTreeWalker<'_> {
    async fn find_by_marker(
        &self,
        root_id: &str,
        token: &MarkerToken,
    ) -> Result<Option<AnchorLocation>, ApiError> {
        let needle = token.marker_text();
        let mut queue = VecDeque::from([root_id.to_string()]);
        // Children already listed for the one-level-deeper check, reused when dequeued.
        let mut listed: HashMap<String, Vec<RemoteBlock>> = HashMap::new();

        while let Some(id) = queue.pop_front() {
            for block in self.children(&id, &mut listed).await? {
                if block.plain_text().contains(&needle) {
                    return Ok(Some(AnchorLocation {
                        parent_id: block.id,
                        carrier_id: None,
                    }));
                }
                if !Self::should_descend(&block) {
                    continue;
                }
                if CARRIER_PARENTS.contains(&block.block_type.as_str()) {
                    let nested = self.list(&block.id).await?;
                    let carrier = nested
                        .iter()
                        .find(|c| c.block_type == "paragraph" && c.plain_text().contains(&needle));
                    if let Some(carrier) = carrier {
                        return Ok(Some(AnchorLocation {
                            parent_id: block.id.clone(),
                            carrier_id: Some(carrier.id.clone()),
                        }));
                    }
                    listed.insert(block.id.clone(), nested);
                }
                queue.push_back(block.id);
            }
        }
        Ok(None)
    }

    async fn find_marked(&self, root_id: &str) -> Result<Vec<RemoteBlock>, ApiError> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([root_id.to_string()]);
        let mut listed = HashMap::new();
        while let Some(id) = queue.pop_front() {
            for block in self.children(&id, &mut listed).await? {
                let descend = Self::should_descend(&block);
                let id = block.id.clone();
                if contains_marker_text(&block.plain_text()) {
                    out.push(block);
                }
                if descend {
                    queue.push_back(id);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryApi;
    use crate::markers::marker_span;
    use crate::model::{Block, RichTextSpan};
    use crate::tests::bullet as item;

    #[tokio::test]
    async fn finds_nested_anchor_breadth_first() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok_1");
        let mut anchor = item("two", vec![]);
        anchor.spans.push(marker_span(&token));
        api.seed_children(&page, vec![item("one", vec![anchor]).to_payload()]);

        let walker = ApiTreeWalker::new(&api, 100);
        let found = walker.find_by_marker(&page, &token).await.unwrap().unwrap();
        let children = api.children_of(&page);
        let nested = api.children_of(&children[0].id);
        assert_eq!(found.parent_id, nested[0].id);
        assert_eq!(found.carrier_id, None);
    }

    #[tokio::test]
    async fn paragraph_under_list_item_is_a_carrier() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok_2");
        let carrier = Block::paragraph(
            vec![RichTextSpan::plain("Details"), marker_span(&token)],
            0,
        );
        api.seed_children(&page, vec![item("Step", vec![carrier]).to_payload()]);

        let walker = ApiTreeWalker::new(&api, 100);
        let found = walker.find_by_marker(&page, &token).await.unwrap().unwrap();
        let step = &api.children_of(&page)[0];
        assert_eq!(found.parent_id, step.id);
        assert_eq!(found.carrier_id, Some(api.children_of(&step.id)[0].id.clone()));
        assert_eq!(found.text_holder(), api.children_of(&step.id)[0].id);
    }

    #[tokio::test]
    async fn missing_marker_is_none() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        api.seed_children(&page, vec![item("a", vec![item("b", vec![])]).to_payload()]);
        let walker = ApiTreeWalker::new(&api, 1);
        let found = walker
            .find_by_marker(&page, &MarkerToken::from_raw("absent"))
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_listing_is_retried() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok_3");
        let anchor = Block::paragraph(vec![RichTextSpan::plain("anchor"), marker_span(&token)], 0);
        api.seed_children(&page, vec![anchor.to_payload()]);
        api.fail_list_call(1, ApiError::RateLimited { retry_after: None });

        let walker = ApiTreeWalker::new(&api, 100);
        let found = walker.find_by_marker(&page, &token).await.unwrap();
        assert_eq!(found.map(|f| f.parent_id), Some(api.children_of(&page)[0].id.clone()));
        assert_eq!(api.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn listing_gives_up_after_the_policy_attempts() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        for call in 1..=3 {
            api.fail_list_call(call, ApiError::Transient("ECONNRESET".into()));
        }
        let walker = ApiTreeWalker::new(&api, 100);
        let err = walker
            .find_by_marker(&page, &MarkerToken::from_raw("any"))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Transient("ECONNRESET".into()));
        assert_eq!(api.list_calls(), 3);
    }

    #[tokio::test]
    async fn find_marked_sees_every_level() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("left_over");
        let mut deep = item("deep", vec![]);
        deep.spans.push(marker_span(&token));
        let mut top = Block::paragraph(vec![RichTextSpan::plain("top")], 0);
        top.spans.push(marker_span(&token));
        api.seed_children(&page, vec![top.to_payload(), item("x", vec![deep]).to_payload()]);

        let walker = ApiTreeWalker::new(&api, 100);
        let marked = walker.find_marked(&page).await.unwrap();
        assert_eq!(marked.len(), 2);
    }
}
