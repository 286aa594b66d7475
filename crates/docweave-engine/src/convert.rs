//! End-to-end conversion of one extracted document into a destination page.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::api::{ApiError, BlockApi, NewPage, PageParent};
use crate::config::PipelineConfig;
use crate::dedupe;
use crate::images::ImageRehoster;
use crate::markers::{MarkerMap, collect_and_strip};
use crate::model::payload::rich_text_value;
use crate::model::{Block, ImageSource, RichTextSpan, count_blocks, outline};
use crate::parsing::blocks::media::absolute_url;
use crate::parsing::parse_html;
use crate::placement::{ApiTreeWalker, ChunkAppender, Orchestrator};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestImage {
    pub url: String,
    pub alt: Option<String>,
}

/// Inbound conversion request, as sent by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionRequest {
    pub title: String,
    pub content_html: String,
    pub url: Option<String>,
    pub images: Vec<RequestImage>,
    pub metadata: Map<String, Value>,
    pub database_id: Option<String>,
    /// Emoji icon for the page.
    pub icon: Option<String>,
    /// External cover image URL.
    pub cover: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("missing required field `{0}`")]
    Validation(&'static str),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Names of the database properties a page is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyNames {
    pub title: String,
    pub url: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            title: "Name".into(),
            url: "URL".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub id: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    pub page_url: String,
    pub page: PageSummary,
    /// Top-level blocks written, including deferred groups.
    pub appended_blocks: usize,
    pub degraded_markers: usize,
    pub failed_markers: usize,
    pub has_videos: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResponse {
    pub dry_run: bool,
    pub children: Vec<Value>,
    pub has_videos: bool,
    /// Blocks that would be placed after the initial write.
    pub deferred_blocks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConversionOutcome {
    Created(ConversionResponse),
    DryRun(DryRunResponse),
}

/// A parsed, filtered document ready to be written.
#[derive(Debug, Default)]
pub struct PreparedDocument {
    pub blocks: Vec<Block>,
    pub deferred: MarkerMap,
    pub has_videos: bool,
}

/// Runs conversions against one destination API.
pub struct Converter<'a> {
    api: &'a dyn BlockApi,
    config: &'a PipelineConfig,
    properties: PropertyNames,
    rehoster: Option<ImageRehoster<'a>>,
}

impl<'a> Converter<'a> {
    pub fn new(api: &'a dyn BlockApi, config: &'a PipelineConfig) -> Self {
        Self {
            api,
            config,
            properties: PropertyNames::default(),
            rehoster: None,
        }
    }

    pub fn with_properties(mut self, properties: PropertyNames) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_rehoster(mut self, rehoster: ImageRehoster<'a>) -> Self {
        self.rehoster = Some(rehoster);
        self
    }

    /// Parses, filters and splits `request`'s HTML without touching the API.
    pub fn prepare(&self, request: &ConversionRequest) -> Result<PreparedDocument, ConvertError> {
        validate(request)?;
        let parsed = parse_html(&request.content_html, self.config);
        let mut blocks = parsed.blocks;
        append_request_images(&mut blocks, &request.images);

        let mut blocks = dedupe::filter(blocks, self.config);
        let deferred = collect_and_strip(&mut blocks);
        log::info!(
            "prepared \"{}\": {} block(s), {} deferred under {} marker(s)",
            request.title,
            count_blocks(&blocks),
            deferred.block_count(),
            deferred.len()
        );
        Ok(PreparedDocument {
            blocks,
            deferred,
            has_videos: parsed.has_videos,
        })
    }

    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutcome, ConvertError> {
        let mut doc = self.prepare(request)?;
        if let Some(rehoster) = &self.rehoster {
            let stats = rehoster.rehost(&mut doc.blocks, &mut doc.deferred).await;
            log::info!(
                "images: {} uploaded, {} kept external, {} dropped",
                stats.uploaded,
                stats.kept_external,
                stats.dropped
            );
        }

        if request.dry_run {
            return Ok(ConversionOutcome::DryRun(DryRunResponse {
                dry_run: true,
                children: doc.blocks.iter().map(Block::to_payload).collect(),
                has_videos: doc.has_videos,
                deferred_blocks: doc.deferred.block_count(),
            }));
        }
        self.create(request, doc).await.map(ConversionOutcome::Created)
    }

    async fn create(
        &self,
        request: &ConversionRequest,
        doc: PreparedDocument,
    ) -> Result<ConversionResponse, ConvertError> {
        let database_id = request
            .database_id
            .clone()
            .ok_or(ConvertError::Validation("databaseId"))?;
        if self.config.debug {
            log::debug!("writing tree:\n{}", outline(&doc.blocks));
        }

        let split = doc.blocks.len().min(self.config.chunk_size());
        let (initial, rest) = doc.blocks.split_at(split);
        let new_page = NewPage {
            parent: PageParent::Database(database_id),
            properties: self.page_properties(request),
            icon: request
                .icon
                .as_ref()
                .map(|emoji| json!({ "type": "emoji", "emoji": emoji })),
            cover: request
                .cover
                .as_ref()
                .map(|url| json!({ "type": "external", "external": { "url": url } })),
            children: initial.iter().map(Block::to_payload).collect(),
        };
        let page = self
            .config
            .request_policy()
            .run("create page", |_| self.api.create_page(new_page.clone()))
            .await
            .map_err(|failure| failure.error)?;
        log::info!("created page {} ({})", page.id, page.url);

        let mut appended = initial.len();
        match ChunkAppender::new(self.api, self.config)
            .append(&page.id, rest)
            .await
        {
            Ok(count) => appended += count,
            Err(err) if err.is_fatal() => return Err(err.api_error().clone().into()),
            Err(err) => {
                log::error!("remaining top-level blocks were not all written: {err}");
                appended += err.appended();
            }
        }

        let mut degraded = 0;
        let mut failed = 0;
        if !doc.deferred.is_empty() {
            let walker = ApiTreeWalker::new(self.api, self.config.list_page_size)
                .with_retry(self.config.request_policy());
            let report = Orchestrator::new(self.api, &walker, self.config)
                .run(&page.id, doc.deferred)
                .await;
            appended += report.appended;
            degraded = report.degraded();
            failed = report.failed();
            if let Some(err) = &report.aborted {
                log::error!("deferred placement stopped early: {err}");
            }
        }

        Ok(ConversionResponse {
            page_url: page.url.clone(),
            page: PageSummary {
                id: page.id,
                url: page.url,
                title: request.title.clone(),
            },
            appended_blocks: appended,
            degraded_markers: degraded,
            failed_markers: failed,
            has_videos: doc.has_videos,
        })
    }

    fn page_properties(&self, request: &ConversionRequest) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert(
            self.properties.title.clone(),
            json!({ "title": rich_text_value(&[RichTextSpan::plain(request.title.trim())]) }),
        );
        if let Some(url) = &request.url {
            properties.insert(self.properties.url.clone(), json!({ "url": url }));
        }
        for (name, value) in &request.metadata {
            match metadata_property(value) {
                Some(property) => {
                    properties.insert(name.clone(), property);
                }
                None => log::debug!("skipping metadata field {name}: unsupported value"),
            }
        }
        properties
    }
}

fn validate(request: &ConversionRequest) -> Result<(), ConvertError> {
    if request.title.trim().is_empty() {
        return Err(ConvertError::Validation("title"));
    }
    if request.content_html.trim().is_empty() {
        return Err(ConvertError::Validation("contentHtml"));
    }
    if !request.dry_run && request.database_id.as_deref().is_none_or(str::is_empty) {
        return Err(ConvertError::Validation("databaseId"));
    }
    Ok(())
}

fn metadata_property(value: &Value) -> Option<Value> {
    match value {
        Value::String(text) if !text.is_empty() => {
            Some(json!({ "rich_text": rich_text_value(&[RichTextSpan::plain(text.as_str())]) }))
        }
        Value::Number(n) => Some(json!({ "number": n })),
        Value::Bool(b) => Some(json!({ "checkbox": b })),
        _ => None,
    }
}

/// Appends the request's image list after the parsed content.
fn append_request_images(blocks: &mut Vec<Block>, images: &[RequestImage]) {
    let mut next_order = blocks
        .iter()
        .map(|b| {
            let mut max = 0;
            b.visit(&mut |d| max = max.max(d.dom_order));
            max + 1
        })
        .max()
        .unwrap_or(0);
    for image in images {
        let Some(url) = absolute_url(&image.url) else {
            log::debug!("ignoring request image {}", image.url);
            continue;
        };
        let caption = image
            .alt
            .as_deref()
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(|alt| vec![RichTextSpan::plain(alt)])
            .unwrap_or_default();
        blocks.push(Block::image(ImageSource::External(url), caption, next_order));
        next_order += 1;
    }
}
