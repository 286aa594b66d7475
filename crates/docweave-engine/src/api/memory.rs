use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{ApiError, BlockApi, ChildrenPage, CreatedPage, NewPage, RemoteBlock};
use crate::model::payload::spans_from_value;
use crate::model::plain_text;

const MAX_CHILDREN_PER_CALL: usize = 100;
const MAX_NESTING_PER_CALL: usize = 2;

#[derive(Debug, Clone)]
struct Node {
    block_type: String,
    body: Value,
    children: Vec<String>,
    parent: Option<String>,
    archived: bool,
}

/// A recorded append-children call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCall {
    pub parent: String,
    pub count: usize,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, Node>,
    next_id: u64,
    append_calls: Vec<AppendCall>,
    append_failures: HashMap<usize, ApiError>,
    update_calls: usize,
    update_failures: HashMap<usize, ApiError>,
    list_calls: usize,
    list_failures: HashMap<usize, ApiError>,
    create_calls: usize,
    create_failures: HashMap<usize, ApiError>,
}

/// In-process block store with the destination API's limits and failure modes.
///
/// Append calls are numbered from 1 across the store's lifetime; failures can
/// be injected for specific call numbers.
#[derive(Debug, Default)]
pub struct InMemoryApi {
    state: Mutex<State>,
}

impl InMemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes append call number `call` (1-based) fail with `error`.
    pub fn fail_append_call(&self, call: usize, error: ApiError) {
        self.state().append_failures.insert(call, error);
    }

    /// Makes update call number `call` (1-based) fail with `error`.
    pub fn fail_update_call(&self, call: usize, error: ApiError) {
        self.state().update_failures.insert(call, error);
    }

    /// Makes list-children call number `call` (1-based) fail with `error`.
    pub fn fail_list_call(&self, call: usize, error: ApiError) {
        self.state().list_failures.insert(call, error);
    }

    /// Makes create-page call number `call` (1-based) fail with `error`.
    pub fn fail_create_call(&self, call: usize, error: ApiError) {
        self.state().create_failures.insert(call, error);
    }

    /// Archives a page; later writes anywhere under it fail.
    pub fn archive(&self, id: &str) {
        if let Some(node) = self.state().nodes.get_mut(id) {
            node.archived = true;
        }
    }

    /// Inserts blocks under `parent` without going through the API limits.
    pub fn seed_children(&self, parent: &str, children: Vec<Value>) -> Vec<String> {
        let mut state = self.state();
        children
            .iter()
            .map(|child| state.insert(parent, child))
            .collect()
    }

    /// Creates an empty page directly and returns its id.
    pub fn seed_page(&self) -> String {
        self.state().new_page()
    }

    pub fn append_calls(&self) -> Vec<AppendCall> {
        self.state().append_calls.clone()
    }

    pub fn update_calls(&self) -> usize {
        self.state().update_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Direct children of `id` in order.
    pub fn children_of(&self, id: &str) -> Vec<RemoteBlock> {
        let state = self.state();
        state
            .nodes
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| state.remote(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of blocks under `id`, table rows excluded.
    pub fn content_block_count(&self, id: &str) -> usize {
        let state = self.state();
        let mut count = 0;
        state.walk(id, 0, &mut |_, node| {
            if node.block_type != "table_row" {
                count += 1;
            }
        });
        count
    }

    /// Plain text of every block under `id`, in document order.
    pub fn all_text(&self, id: &str) -> Vec<String> {
        let state = self.state();
        let mut out = Vec::new();
        state.walk(id, 0, &mut |_, node| out.push(node_text(node)));
        out
    }

    /// Indented `type: text` rendering of the tree under `id`.
    pub fn outline(&self, id: &str) -> String {
        let state = self.state();
        let mut out = String::new();
        state.walk(id, 0, &mut |depth, node| {
            let text = node_text(node);
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.block_type);
            if !text.is_empty() {
                out.push_str(": ");
                out.push_str(&text.replace('\n', "\\n"));
            }
            out.push('\n');
        });
        out
    }
}

fn node_text(node: &Node) -> String {
    if let Some(cells) = node.body.get("cells").and_then(Value::as_array) {
        return cells
            .iter()
            .map(|cell| plain_text(&spans_from_value(cell)))
            .collect::<Vec<_>>()
            .join(" | ");
    }
    node.body
        .get("rich_text")
        .or_else(|| node.body.get("caption"))
        .map(|rt| plain_text(&spans_from_value(rt)))
        .unwrap_or_default()
}

fn payload_depth(block: &Value) -> usize {
    let Some(block_type) = block.get("type").and_then(Value::as_str) else {
        return 1;
    };
    let children = block
        .get(block_type)
        .and_then(|body| body.get("children"))
        .and_then(Value::as_array);
    1 + children
        .map(|c| c.iter().map(payload_depth).max().unwrap_or(0))
        .unwrap_or(0)
}

fn validate_batch(children: &[Value]) -> Result<(), ApiError> {
    if children.len() > MAX_CHILDREN_PER_CALL {
        return Err(ApiError::Validation(format!(
            "body.children.length should be ≤ {MAX_CHILDREN_PER_CALL}, got {}",
            children.len()
        )));
    }
    if children.iter().any(|c| payload_depth(c) > MAX_NESTING_PER_CALL) {
        return Err(ApiError::Validation(
            "children nested deeper than the request limit".into(),
        ));
    }
    Ok(())
}

impl State {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("blk-{:04}", self.next_id)
    }

    fn new_page(&mut self) -> String {
        let id = self.new_id();
        self.nodes.insert(
            id.clone(),
            Node {
                block_type: "page".into(),
                body: Value::Object(Map::new()),
                children: Vec::new(),
                parent: None,
                archived: false,
            },
        );
        id
    }

    fn insert(&mut self, parent: &str, payload: &Value) -> String {
        let block_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("paragraph")
            .to_string();
        let mut body = payload.get(&block_type).cloned().unwrap_or(json!({}));
        let children = body
            .as_object_mut()
            .and_then(|b| b.remove("children"))
            .and_then(|c| c.as_array().cloned())
            .unwrap_or_default();

        let id = self.new_id();
        self.nodes.insert(
            id.clone(),
            Node {
                block_type,
                body,
                children: Vec::new(),
                parent: Some(parent.to_string()),
                archived: false,
            },
        );
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id.clone());
        }
        for child in &children {
            self.insert(&id, child);
        }
        id
    }

    fn is_archived(&self, id: &str) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            match self.nodes.get(cur) {
                Some(node) if node.archived => return true,
                Some(node) => current = node.parent.as_deref(),
                None => return false,
            }
        }
        false
    }

    fn remote(&self, id: &str) -> Option<RemoteBlock> {
        let node = self.nodes.get(id)?;
        RemoteBlock::from_value(&json!({
            "id": id,
            "type": node.block_type,
            "has_children": !node.children.is_empty(),
            "archived": node.archived,
            node.block_type.clone(): node.body,
        }))
    }

    fn walk(&self, id: &str, depth: usize, f: &mut dyn FnMut(usize, &Node)) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        for child in &node.children {
            if let Some(child_node) = self.nodes.get(child) {
                f(depth, child_node);
                self.walk(child, depth + 1, f);
            }
        }
    }

    fn writable(&self, id: &str) -> Result<(), ApiError> {
        if !self.nodes.contains_key(id) {
            return Err(ApiError::NotFound(id.to_string()));
        }
        if self.is_archived(id) {
            return Err(ApiError::Archived(format!(
                "Can't edit block that is archived: {id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockApi for InMemoryApi {
    async fn create_page(&self, page: NewPage) -> Result<CreatedPage, ApiError> {
        let mut state = self.state();
        state.create_calls += 1;
        let call = state.create_calls;
        if let Some(err) = state.create_failures.remove(&call) {
            return Err(err);
        }
        validate_batch(&page.children)?;
        let id = state.new_page();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.body = json!({ "properties": page.properties });
        }
        for child in &page.children {
            state.insert(&id, child);
        }
        Ok(CreatedPage {
            url: format!("https://www.notion.so/{}", id.replace('-', "")),
            id,
        })
    }

    async fn append_children(
        &self,
        block_id: &str,
        children: Vec<Value>,
    ) -> Result<Vec<RemoteBlock>, ApiError> {
        let mut state = self.state();
        let call = state.append_calls.len() + 1;
        let injected = state.append_failures.remove(&call);
        let outcome = match injected {
            Some(err) => Err(err),
            None => state.writable(block_id).and_then(|_| validate_batch(&children)),
        };
        state.append_calls.push(AppendCall {
            parent: block_id.to_string(),
            count: children.len(),
            succeeded: outcome.is_ok(),
        });
        outcome?;

        let ids: Vec<String> = children
            .iter()
            .map(|child| state.insert(block_id, child))
            .collect();
        Ok(ids.iter().filter_map(|id| state.remote(id)).collect())
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage, ApiError> {
        let mut state = self.state();
        state.list_calls += 1;
        let call = state.list_calls;
        if let Some(err) = state.list_failures.remove(&call) {
            return Err(err);
        }
        let node = state
            .nodes
            .get(block_id)
            .ok_or_else(|| ApiError::NotFound(block_id.to_string()))?;

        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + page_size.max(1)).min(node.children.len());
        let ids: Vec<String> = node.children[start.min(end)..end].to_vec();
        let next_cursor = (end < node.children.len()).then(|| end.to_string());

        Ok(ChildrenPage {
            results: ids.iter().filter_map(|id| state.remote(id)).collect(),
            next_cursor,
        })
    }

    async fn retrieve_block(&self, block_id: &str) -> Result<RemoteBlock, ApiError> {
        self.state()
            .remote(block_id)
            .ok_or_else(|| ApiError::NotFound(block_id.to_string()))
    }

    async fn update_block(&self, block_id: &str, payload: Value) -> Result<RemoteBlock, ApiError> {
        let mut state = self.state();
        state.update_calls += 1;
        let call = state.update_calls;
        if let Some(err) = state.update_failures.remove(&call) {
            return Err(err);
        }
        state.writable(block_id)?;

        let node = state
            .nodes
            .get_mut(block_id)
            .ok_or_else(|| ApiError::NotFound(block_id.to_string()))?;
        let patch = payload
            .get(&node.block_type)
            .and_then(Value::as_object)
            .ok_or_else(|| ApiError::Validation(format!("body.{} is required", node.block_type)))?;
        if let Some(body) = node.body.as_object_mut() {
            for (key, value) in patch {
                body.insert(key.clone(), value.clone());
            }
        }
        state
            .remote(block_id)
            .ok_or_else(|| ApiError::NotFound(block_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PageParent, list_all_children};
    use crate::model::{Block, RichTextSpan};

    fn para(text: &str) -> Value {
        Block::paragraph(vec![RichTextSpan::plain(text)], 0).to_payload()
    }

    fn new_page(children: Vec<Value>) -> NewPage {
        NewPage {
            parent: PageParent::Database("db".into()),
            properties: Map::new(),
            icon: None,
            cover: None,
            children,
        }
    }

    #[tokio::test]
    async fn create_and_list_with_pagination() {
        let api = InMemoryApi::new();
        let children = (0..5).map(|i| para(&format!("p{i}"))).collect();
        let page = api.create_page(new_page(children)).await.unwrap();

        let first = api.list_children(&page.id, None, 2).await.unwrap();
        assert_eq!(first.results.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let all = list_all_children(&api, &page.id, 2).await.unwrap();
        let texts: Vec<_> = all.iter().map(RemoteBlock::plain_text).collect();
        assert_eq!(texts, vec!["p0", "p1", "p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn rejects_oversized_batches() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let children = (0..101).map(|i| para(&i.to_string())).collect();
        let err = api.append_children(&page, children).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_three_level_payloads() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let leaf = Block::paragraph(vec![RichTextSpan::plain("c")], 0);
        let mid = Block::new(crate::model::BlockKind::BulletedItem, vec![], 0)
            .with_children(vec![leaf]);
        let top = Block::new(crate::model::BlockKind::BulletedItem, vec![], 0)
            .with_children(vec![mid]);
        let err = api.append_children(&page, vec![top.to_payload()]).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn injected_failures_hit_specific_calls() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        api.fail_append_call(2, ApiError::Transient("reset".into()));

        assert!(api.append_children(&page, vec![para("a")]).await.is_ok());
        assert!(api.append_children(&page, vec![para("b")]).await.is_err());
        assert!(api.append_children(&page, vec![para("b")]).await.is_ok());
        assert_eq!(api.all_text(&page), vec!["a", "b"]);
        assert!(!api.append_calls()[1].succeeded);
    }

    #[tokio::test]
    async fn archived_pages_reject_writes() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let ids = api.seed_children(&page, vec![para("x")]);
        api.archive(&page);

        let err = api.append_children(&ids[0], vec![para("y")]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn update_replaces_rich_text() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let ids = api.seed_children(&page, vec![para("before")]);
        let payload = crate::model::payload::rich_text_update(
            "paragraph",
            &[RichTextSpan::plain("after")],
        );
        let updated = api.update_block(&ids[0], payload).await.unwrap();
        assert_eq!(updated.plain_text(), "after");
        assert_eq!(api.update_calls(), 1);
    }
}
