//! Test fixtures: items, policy and a fully wired site.

use crate::handlers::{link, FieldHandler, ReferenceMode};
use contentsync_engine::{
    ContentRepository, EmbeddedFileChangeTime, EngineConfig, FileStatusStore, FixedClock,
    HandlerRegistry, LocalItem, MemoryBackend, MemoryContentRepository, PolicyResolver,
    PolicyRule, PoolUsage, PullMode, PushMode, StaticPolicy, SyncEngine,
};
use contentsync_protocol::{Channel, ItemRef};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// Clock start for every test site.
pub const START: i64 = 1_700_000_000;

/// Reference to an article node.
pub fn article_ref(uuid: &str) -> ItemRef {
    ItemRef::new("node", "article", uuid)
}

/// Reference to a tag term.
pub fn term_ref(uuid: &str) -> ItemRef {
    ItemRef::new("taxonomy_term", "tags", uuid)
}

/// Reference to an image media item.
pub fn media_ref(uuid: &str) -> ItemRef {
    ItemRef::new("media", "image", uuid)
}

/// Reference to a file.
pub fn file_ref(uuid: &str) -> ItemRef {
    ItemRef::new("file", "file", uuid)
}

/// Reference to a paragraph.
pub fn paragraph_ref(uuid: &str) -> ItemRef {
    ItemRef::new("paragraph", "text", uuid)
}

/// A published article.
pub fn article(uuid: &str, title: &str) -> LocalItem {
    LocalItem::new(article_ref(uuid), START - 100)
        .with_field("title", json!(title))
        .with_field("status", json!(true))
}

/// A tag term.
pub fn term(uuid: &str, name: &str) -> LocalItem {
    LocalItem::new(term_ref(uuid), START - 100).with_field("name", json!(name))
}

/// An image media item pointing at a file.
pub fn media(uuid: &str, file: &ItemRef) -> LocalItem {
    LocalItem::new(media_ref(uuid), START - 100)
        .with_field("name", json!(format!("image {uuid}")))
        .with_field("image", link(file))
}

/// A file.
pub fn file(uuid: &str) -> LocalItem {
    LocalItem::new(file_ref(uuid), START - 100)
        .with_field("uri", json!(format!("public://{uuid}.png")))
}

/// A text paragraph.
pub fn paragraph(uuid: &str, text: &str) -> LocalItem {
    LocalItem::new(paragraph_ref(uuid), START - 100).with_field("text", json!(text))
}

/// Content channel on the main pool.
pub fn main_channel() -> Channel {
    Channel::new("content", "main")
}

/// Content channel on the archive pool.
pub fn archive_channel() -> Channel {
    Channel::new("content", "archive")
}

/// Tag channel on the main pool.
pub fn tags_channel() -> Channel {
    Channel::new("tags", "main")
}

/// Media channel on the main pool.
pub fn media_channel() -> Channel {
    Channel::new("media", "main")
}

/// Policy used by [`TestSite`].
///
/// Articles replicate automatically through `main` and on request through
/// `archive`. Terms, media and files only go out as dependencies and come
/// in automatically.
pub fn standard_policy() -> StaticPolicy {
    StaticPolicy::from_rules(vec![
        PolicyRule::new("content", "node")
            .push(PushMode::Automatic)
            .pull(PullMode::Automatic)
            .pool("main", PoolUsage::Force)
            .pool("archive", PoolUsage::Allow)
            .respect_local_overrides(),
        PolicyRule::new("tags", "taxonomy_term")
            .push(PushMode::AsDependency)
            .pull(PullMode::Automatic)
            .pool("main", PoolUsage::Force),
        PolicyRule::new("media", "media")
            .push(PushMode::AsDependency)
            .pull(PullMode::Automatic)
            .pool("main", PoolUsage::Force),
        PolicyRule::new("media", "file")
            .push(PushMode::AsDependency)
            .pull(PullMode::Automatic)
            .pool("main", PoolUsage::Force),
    ])
}

/// Handlers registered by [`TestSite`], kept for call counters and toggles.
#[derive(Debug, Clone)]
pub struct SiteHandlers {
    /// Articles: title, body, status; tags as dependencies, related as
    /// references, media as dependency, sections embedded.
    pub node: Arc<FieldHandler>,
    /// Terms: name; parent as reference.
    pub term: Arc<FieldHandler>,
    /// Media: name; image file as dependency.
    pub media: Arc<FieldHandler>,
    /// Files: uri and crop metadata.
    pub file: Arc<FieldHandler>,
    /// Paragraphs: text.
    pub paragraph: Arc<FieldHandler>,
}

impl SiteHandlers {
    /// The standard handler set.
    pub fn standard() -> Self {
        Self {
            node: Arc::new(
                FieldHandler::new()
                    .with_fields(["title", "body", "status"])
                    .with_reference("tags", ReferenceMode::Dependency)
                    .with_reference("related", ReferenceMode::Reference)
                    .with_reference("media", ReferenceMode::Dependency)
                    .with_reference("sections", ReferenceMode::Embed)
                    .with_forbidden("revision_log")
                    .skip_unpublished(),
            ),
            term: Arc::new(
                FieldHandler::new()
                    .with_fields(["name"])
                    .with_reference("parent", ReferenceMode::Reference),
            ),
            media: Arc::new(
                FieldHandler::new()
                    .with_fields(["name"])
                    .with_reference("image", ReferenceMode::Dependency),
            ),
            file: Arc::new(FieldHandler::new().with_fields(["uri", "crop_changed"])),
            paragraph: Arc::new(FieldHandler::new().with_fields(["text"])),
        }
    }

    /// A registry over these handlers.
    pub fn registry(&self) -> HandlerRegistry {
        HandlerRegistry::new()
            .register("node", "*", self.node.clone())
            .register("taxonomy_term", "*", self.term.clone())
            .register("media", "*", self.media.clone())
            .register("file", "*", self.file.clone())
            .register("paragraph", "*", self.paragraph.clone())
            .register_change_time("media", Arc::new(EmbeddedFileChangeTime::new(["image"])))
    }
}

/// An in-memory site: engine, backend, content and a stopped clock.
pub struct TestSite {
    /// The engine.
    pub engine: SyncEngine,
    /// Backend shared with the engine.
    pub backend: Arc<MemoryBackend>,
    /// Local content shared with the engine.
    pub content: Arc<MemoryContentRepository>,
    /// Clock shared with the engine.
    pub clock: Arc<FixedClock>,
    /// Registered handlers.
    pub handlers: SiteHandlers,
}

impl TestSite {
    /// A site with the standard handlers and policy.
    pub fn new(site_id: &str) -> Self {
        Self::with_config(EngineConfig::new(site_id))
    }

    /// A site with the standard handlers and policy and a custom config.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, SiteHandlers::standard(), Arc::new(standard_policy()))
    }

    /// A site with custom handlers and policy.
    pub fn build(
        config: EngineConfig,
        handlers: SiteHandlers,
        policy: Arc<dyn PolicyResolver>,
    ) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let content = Arc::new(MemoryContentRepository::new());
        let clock = Arc::new(FixedClock::new(START));
        let engine = SyncEngine::new(
            config,
            handlers.registry(),
            policy,
            backend.clone(),
            content.clone(),
        )
        .with_clock(clock.clone());
        Self {
            engine,
            backend,
            content,
            clock,
            handlers,
        }
    }

    /// A site whose status ledger lives in a temporary directory.
    pub fn file_backed(site_id: &str) -> (Self, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStatusStore::open(&dir.path().join("status.cbor"))
            .expect("Failed to open status store");
        let mut site = Self::new(site_id);
        site.engine = site.engine.with_status_store(Arc::new(store));
        (site, dir)
    }

    /// Stores a local item and returns it with its id.
    pub fn save(&self, mut item: LocalItem) -> LocalItem {
        self.content.save(&mut item).expect("Failed to save item");
        item
    }

    /// Loads a local item.
    pub fn load(&self, item: &ItemRef) -> Option<LocalItem> {
        self.content.load(item).expect("Failed to load item")
    }
}
