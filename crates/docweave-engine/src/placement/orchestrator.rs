use std::collections::HashSet;

use crate::api::{ApiError, BlockApi, RemoteBlock};
use crate::config::PipelineConfig;
use crate::markers::{
    MarkerMap, MarkerToken, PendingPlacement, PlacementStatus, remove_marker_text_from_spans,
    strip_all_marker_text,
};
use crate::model::payload::rich_text_update;
use crate::model::{Block, BlockKind, TableData, outline, plain_text};

use super::appender::ChunkAppender;
use super::walker::{AnchorLocation, TreeWalker, list_children_retrying};

/// Result of one orchestration pass.
#[derive(Debug, Default)]
pub struct PlacementReport {
    pub placements: Vec<PendingPlacement>,
    /// Top-level deferred blocks written, anchored or at the root.
    pub appended: usize,
    pub cleanup_failures: usize,
    /// Blocks whose leftover marker text the final sweep removed.
    pub swept: usize,
    /// Set when an archived page stopped the pass early.
    pub aborted: Option<ApiError>,
}

impl PlacementReport {
    pub fn degraded(&self) -> usize {
        self.count(|s| matches!(s, PlacementStatus::Degraded))
    }

    pub fn placed(&self) -> usize {
        self.count(|s| matches!(s, PlacementStatus::Placed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, PlacementStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&PlacementStatus) -> bool) -> usize {
        self.placements.iter().filter(|p| pred(&p.status)).count()
    }
}

/// Stops the pass: further writes to the page cannot succeed.
struct Abort(ApiError);

/// Drives deferred placement for one page, one marker at a time.
pub struct Orchestrator<'a> {
    api: &'a dyn BlockApi,
    walker: &'a dyn TreeWalker,
    config: &'a PipelineConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(api: &'a dyn BlockApi, walker: &'a dyn TreeWalker, config: &'a PipelineConfig) -> Self {
        Self {
            api,
            walker,
            config,
        }
    }

    /// Places every entry of `map` under its anchor in `page_id`, in source
    /// order, then sweeps leftover marker text.
    pub async fn run(&self, page_id: &str, map: MarkerMap) -> PlacementReport {
        let mut report = PlacementReport {
            placements: map.into_placements(),
            ..PlacementReport::default()
        };
        let total = report.placements.len();
        log::info!("placing {total} deferred group(s) on {page_id}");

        for index in 0..total {
            if report.aborted.is_some() {
                report.placements[index].status = PlacementStatus::Failed {
                    reason: "orchestration aborted".into(),
                };
                continue;
            }

            let mut placement = std::mem::replace(
                &mut report.placements[index],
                PendingPlacement::new(MarkerToken::from_raw(""), Vec::new()),
            );
            match self.place(page_id, &mut placement, &mut report).await {
                Ok(()) => {}
                Err(Abort(err)) => {
                    log::error!("aborting placement on {page_id}: {err}");
                    placement.status = PlacementStatus::Failed {
                        reason: err.to_string(),
                    };
                    report.aborted = Some(err);
                }
            }
            report.placements[index] = placement;

            if index + 1 < total && report.aborted.is_none() {
                tokio::time::sleep(self.config.inter_marker_delay()).await;
            }
        }

        if report.aborted.is_none() {
            match self.sweep(page_id).await {
                Ok(swept) => report.swept = swept,
                Err(err) => log::warn!("marker sweep on {page_id} failed: {err}"),
            }
        }
        log::info!(
            "placement done: {} placed, {} degraded, {} failed, {} block(s) appended",
            report.placed(),
            report.degraded(),
            report.failed(),
            report.appended
        );
        report
    }

    async fn place(
        &self,
        page_id: &str,
        placement: &mut PendingPlacement,
        report: &mut PlacementReport,
    ) -> Result<(), Abort> {
        let token = placement.token.clone();
        if self.config.debug {
            log::debug!("placing {token}:\n{}", outline(&placement.blocks));
        }

        let anchor = match self.walker.find_by_marker(page_id, &token).await {
            Ok(anchor) => anchor,
            Err(err) if err.is_fatal() => return Err(Abort(err)),
            Err(err) => {
                log::warn!("searching for {token} failed: {err}");
                None
            }
        };

        let Some(anchor) = anchor else {
            log::warn!(
                "no anchor found for {token}; appending {} block(s) at the page root",
                placement.blocks.len()
            );
            placement.status = self
                .place_at_root(page_id, &token, &placement.blocks, report)
                .await?;
            return Ok(());
        };

        let blocks = self.without_existing_tables(&anchor, &placement.blocks).await?;
        let appender = ChunkAppender::new(self.api, self.config);
        placement.status = match appender.append(&anchor.parent_id, &blocks).await {
            Ok(count) => {
                report.appended += count;
                PlacementStatus::Placed {
                    anchor_id: anchor.parent_id.clone(),
                }
            }
            Err(err) if err.is_fatal() => return Err(Abort(err.api_error().clone())),
            Err(err) => {
                log::warn!("appending {token} under {} failed: {err}", anchor.parent_id);
                report.appended += err.appended();
                let remaining = &blocks[err.appended().min(blocks.len())..];
                self.place_at_root(page_id, &token, remaining, report).await?
            }
        };

        self.clean_anchor(&anchor, &token, report).await
    }

    /// Appends `blocks` at the page root as a degraded placement.
    async fn place_at_root(
        &self,
        page_id: &str,
        token: &MarkerToken,
        blocks: &[Block],
        report: &mut PlacementReport,
    ) -> Result<PlacementStatus, Abort> {
        let appender = ChunkAppender::new(self.api, self.config);
        match appender.append(page_id, blocks).await {
            Ok(count) => {
                report.appended += count;
                Ok(PlacementStatus::Degraded)
            }
            Err(err) if err.is_fatal() => Err(Abort(err.api_error().clone())),
            Err(err) => {
                log::error!("root fallback for {token} failed: {err}");
                report.appended += err.appended();
                Ok(PlacementStatus::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Drops pending tables whose signature already exists under the anchor,
    /// which happens when an earlier attempt got through before failing.
    async fn without_existing_tables(
        &self,
        anchor: &AnchorLocation,
        blocks: &[Block],
    ) -> Result<Vec<Block>, Abort> {
        if !blocks.iter().any(|b| matches!(b.kind, BlockKind::Table(_))) {
            return Ok(blocks.to_vec());
        }
        let existing = match self.existing_table_signatures(&anchor.parent_id).await {
            Ok(signatures) => signatures,
            Err(err) if err.is_fatal() => return Err(Abort(err)),
            Err(err) => {
                log::warn!("could not read tables under {}: {err}", anchor.parent_id);
                HashSet::new()
            }
        };
        Ok(blocks
            .iter()
            .filter(|block| match &block.kind {
                BlockKind::Table(table) if existing.contains(&table_signature(table)) => {
                    log::info!("table already present under {}, skipping", anchor.parent_id);
                    false
                }
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn existing_table_signatures(&self, parent_id: &str) -> Result<HashSet<String>, ApiError> {
        let page_size = self.config.list_page_size;
        let policy = self.config.request_policy();
        let mut signatures = HashSet::new();
        for child in list_children_retrying(self.api, parent_id, page_size, &policy).await? {
            if child.block_type != "table" {
                continue;
            }
            let rows = list_children_retrying(self.api, &child.id, page_size, &policy).await?;
            signatures.insert(remote_table_signature(&child, &rows));
        }
        Ok(signatures)
    }

    /// Removes the marker text from the block holding it, retrying conflicts.
    async fn clean_anchor(
        &self,
        anchor: &AnchorLocation,
        token: &MarkerToken,
        report: &mut PlacementReport,
    ) -> Result<(), Abort> {
        let holder = anchor.text_holder();
        let policy = self.config.cleanup_policy();
        let result = policy
            .run(&format!("clean marker on {holder}"), |_| async move {
                let block = self.api.retrieve_block(holder).await?;
                let spans = remove_marker_text_from_spans(&block.rich_text, token);
                if spans == block.rich_text {
                    return Ok::<(), ApiError>(());
                }
                self.api
                    .update_block(holder, rich_text_update(&block.block_type, &spans))
                    .await
                    .map(|_| ())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(failure) if failure.error.is_fatal() => Err(Abort(failure.error)),
            Err(failure) => {
                log::warn!(
                    "could not remove marker {token} from {holder} after {} attempt(s): {}",
                    failure.attempts,
                    failure.error
                );
                report.cleanup_failures += 1;
                Ok(())
            }
        }
    }

    /// Removes any marker text still present under `page_id`; returns how
    /// many blocks were updated. A clean tree needs no updates.
    pub async fn sweep(&self, page_id: &str) -> Result<usize, ApiError> {
        let marked = self.walker.find_marked(page_id).await?;
        let mut updated = 0;
        for block in marked {
            if let Err(err) = self.strip_block(&block).await {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("sweep could not clean {}: {err}", block.id);
                continue;
            }
            updated += 1;
        }
        if updated > 0 {
            log::info!("sweep removed leftover markers from {updated} block(s)");
        }
        Ok(updated)
    }

    async fn strip_block(&self, block: &RemoteBlock) -> Result<(), ApiError> {
        let spans = strip_all_marker_text(&block.rich_text);
        let payload = rich_text_update(&block.block_type, &spans);
        self.config
            .cleanup_policy()
            .run(&format!("sweep {}", block.id), |_| {
                self.api.update_block(&block.id, payload.clone())
            })
            .await
            .map(|_| ())
            .map_err(|failure| failure.error)
    }
}

fn normalized(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// `width x rows : first row text`
pub fn table_signature(table: &TableData) -> String {
    let first_row = table
        .rows
        .first()
        .map(|row| {
            row.iter()
                .map(|cell| normalized(&plain_text(cell)))
                .collect::<Vec<_>>()
                .join("|")
        })
        .unwrap_or_default();
    format!("{}x{}:{first_row}", table.width, table.rows.len())
}

fn remote_table_signature(table: &RemoteBlock, rows: &[RemoteBlock]) -> String {
    let first_row = rows
        .first()
        .map(|row| {
            row.cells
                .iter()
                .map(|cell| normalized(&plain_text(cell)))
                .collect::<Vec<_>>()
                .join("|")
        })
        .unwrap_or_default();
    format!(
        "{}x{}:{first_row}",
        table.table_width.unwrap_or_default(),
        rows.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::InMemoryApi;
    use crate::markers::{collect_and_strip, marker_span};
    use crate::model::RichTextSpan;
    use crate::parsing::parse_html;
    use crate::placement::walker::ApiTreeWalker;
    use crate::tests::para;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn anchored(text: &str, token: &MarkerToken) -> Value {
        Block::paragraph(vec![RichTextSpan::plain(text), marker_span(token)], 0).to_payload()
    }

    fn table(rows: &[&[&str]]) -> Block {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|c| vec![RichTextSpan::plain(*c)]).collect())
            .collect();
        Block::new(
            BlockKind::Table(TableData {
                width: 2,
                has_column_header: false,
                rows,
            }),
            vec![],
            0,
        )
    }

    async fn run(api: &InMemoryApi, page: &str, map: MarkerMap) -> PlacementReport {
        let config = PipelineConfig::default();
        let walker = ApiTreeWalker::new(api, config.list_page_size);
        Orchestrator::new(api, &walker, &config).run(page, map).await
    }

    #[tokio::test(start_paused = true)]
    async fn deep_list_is_completed_under_its_anchor() {
        let mut doc = parse_html(
            "<ul><li>one<ul><li>two<ul><li>three</li><li>four</li></ul></li></ul></li></ul>",
            &PipelineConfig::default(),
        );
        let map = collect_and_strip(&mut doc.blocks);
        let api = InMemoryApi::new();
        let page = api.seed_page();
        api.seed_children(&page, doc.blocks.iter().map(Block::to_payload).collect());

        let report = run(&api, &page, map).await;

        assert_eq!(report.placed(), 1);
        assert_eq!(report.appended, 2);
        assert_eq!(report.swept, 0);
        insta::assert_snapshot!(api.outline(&page), @r"
        bulleted_list_item: one
          bulleted_list_item: two
            bulleted_list_item: three
            bulleted_list_item: four
        ");
    }

    #[tokio::test(start_paused = true)]
    async fn carrier_paragraph_is_cleaned_and_parent_receives_children() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("step_1");
        let item = Block::new(BlockKind::BulletedItem, vec![RichTextSpan::plain("Step")], 0);
        let ids = api.seed_children(&page, vec![item.to_payload()]);
        api.seed_children(&ids[0], vec![anchored("Details", &token)]);

        let mut map = MarkerMap::default();
        map.push(token, para("deferred", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(
            report.placements[0].status,
            PlacementStatus::Placed {
                anchor_id: ids[0].clone()
            }
        );
        assert_eq!(api.all_text(&page), vec!["Step", "Details", "deferred"]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_anchor_degrades_to_page_root() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        api.seed_children(&page, vec![para("intro", 0).to_payload()]);

        let mut map = MarkerMap::default();
        map.push(MarkerToken::from_raw("ghost"), para("orphan", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(report.degraded(), 1);
        assert_eq!(api.all_text(&page), vec!["intro", "orphan"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_anchor_append_falls_back_to_root() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok");
        api.seed_children(&page, vec![anchored("anchor", &token)]);
        for call in 1..=3 {
            api.fail_append_call(call, ApiError::Transient("timeout".into()));
        }

        let mut map = MarkerMap::default();
        map.push(token, para("late", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(report.degraded(), 1);
        assert_eq!(api.all_text(&page), vec!["anchor", "late"]);
        assert_eq!(api.append_calls().last().map(|c| c.parent.clone()), Some(page));
    }

    #[tokio::test(start_paused = true)]
    async fn archived_page_aborts_remaining_placements() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let first = MarkerToken::from_raw("a");
        let second = MarkerToken::from_raw("b");
        api.seed_children(&page, vec![anchored("x", &first), anchored("y", &second)]);
        api.archive(&page);

        let mut map = MarkerMap::default();
        map.push(first, para("one", 1));
        map.push(second, para("two", 2));
        let report = run(&api, &page, map).await;

        assert!(matches!(report.aborted, Some(ApiError::Archived(_))));
        assert_eq!(report.failed(), 2);
        assert_eq!(api.append_calls().len(), 1);
        assert_eq!(api.update_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_conflicts_are_retried() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok");
        api.seed_children(&page, vec![anchored("anchor", &token)]);
        api.fail_update_call(1, ApiError::Conflict("conflict_error".into()));

        let mut map = MarkerMap::default();
        map.push(token, para("child", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(report.cleanup_failures, 0);
        assert_eq!(api.update_calls(), 2);
        assert_eq!(api.all_text(&page), vec!["anchor", "child"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_markers_cleanup_left_behind() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok");
        api.seed_children(&page, vec![anchored("anchor", &token)]);
        for call in 1..=3 {
            api.fail_update_call(call, ApiError::Conflict("conflict_error".into()));
        }

        let mut map = MarkerMap::default();
        map.push(token, para("child", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(report.cleanup_failures, 1);
        assert_eq!(report.swept, 1);
        assert_eq!(api.all_text(&page), vec!["anchor", "child"]);

        let config = PipelineConfig::default();
        let walker = ApiTreeWalker::new(&api, 100);
        let again = Orchestrator::new(&api, &walker, &config).sweep(&page).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tables_already_under_the_anchor_are_skipped() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok");
        let ids = api.seed_children(&page, vec![anchored("anchor", &token)]);
        let existing = table(&[&["A", "B"], &["1", "2"]]);
        api.seed_children(&ids[0], vec![existing.to_payload()]);

        let mut map = MarkerMap::default();
        map.push(token.clone(), existing.clone());
        map.push(token, para("after", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(report.appended, 1);
        let children = api.children_of(&ids[0]);
        let types: Vec<_> = children.iter().map(|c| c.block_type.as_str()).collect();
        assert_eq!(types, vec!["table", "paragraph"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_search_still_places_under_the_anchor() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok");
        let ids = api.seed_children(&page, vec![anchored("anchor", &token)]);
        api.fail_list_call(1, ApiError::RateLimited { retry_after: None });

        let mut map = MarkerMap::default();
        map.push(token, para("child", 1));
        let report = run(&api, &page, map).await;

        assert_eq!(
            report.placements[0].status,
            PlacementStatus::Placed {
                anchor_id: ids[0].clone()
            }
        );
        assert_eq!(api.all_text(&ids[0]), vec!["child"]);
        assert_eq!(api.all_text(&page), vec!["anchor", "child"]);
        assert_eq!(api.children_of(&page).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn table_lookup_under_the_anchor_is_retried() {
        let api = InMemoryApi::new();
        let page = api.seed_page();
        let token = MarkerToken::from_raw("tok");
        let ids = api.seed_children(&page, vec![anchored("anchor", &token)]);
        let existing = table(&[&["A", "B"], &["1", "2"]]);
        api.seed_children(&ids[0], vec![existing.to_payload()]);
        // First call is the anchor search; the second lists the anchor's tables.
        api.fail_list_call(2, ApiError::Transient("ECONNRESET".into()));

        let mut map = MarkerMap::default();
        map.push(token, existing);
        let report = run(&api, &page, map).await;

        assert_eq!(report.placed(), 1);
        assert_eq!(report.appended, 0);
        assert_eq!(api.children_of(&ids[0]).len(), 1);
    }

    #[test]
    fn table_signature_ignores_case_and_spacing() {
        let a = table(&[&["Name ", "Value"]]);
        let b = table(&[&["name", "  value"]]);
        let (BlockKind::Table(a), BlockKind::Table(b)) = (&a.kind, &b.kind) else {
            unreachable!()
        };
        assert_eq!(table_signature(a), table_signature(b));
        assert_eq!(table_signature(a), "2x1:name|value");
    }
}
