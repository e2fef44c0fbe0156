//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use chrono::Utc;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use fragment_render_core::{
    cache::{CacheKeys, CacheLookup, RenderCache},
    config::{AssetSettings, CacheSettings, GallerySettings, Settings},
    fragment::{CachedContentProvider, ContentProvider, Fragment, FragmentStatus},
    gallery::{GalleryDataset, GalleryItem, GalleryReconciler, GalleryViewSettings, ReconcileOutcome, UnchangedReason},
    handles::{AssetKind, AssetRecord},
    invalidation::{FragmentChange, InvalidationOutcome, Invalidator, SkipReason},
    materializer::{AssetMaterializer, MaterializeError, PassthroughUrlFilter, UrlFilter},
    memory::{ComponentFixture, MemoryRegistry, MemorySite, SiteFixture, StaticStyleEngine, VariationEntry},
    renderer::{RenderError, RenderResult},
    scanner::RenderedComponent,
    tiers::{DurableTier, FastTier, FileTier, ManualClock, MemoryTier},
};

static INIT_LOGGING: Once = Once::new();

/// Enable with `RUST_LOG=debug cargo test`.
fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}

fn fragment(id: u64, content: &str) -> Fragment {
    Fragment {
        id,
        content: content.to_string(),
        status: FragmentStatus::Publish,
        access_password: None,
        shareable: true,
    }
}

fn record(src: &str, version: Option<&str>) -> AssetRecord {
    AssetRecord {
        src: Some(src.to_string()),
        version: version.map(str::to_string),
        ..Default::default()
    }
}

fn create_fixture() -> SiteFixture {
    let styles = MemoryRegistry {
        queue: vec!["theme-style".into()],
        ..Default::default()
    }
    .with_record("gallery-style", record("/css/gallery.css", Some("2")))
    .with_record("button-style", record("https://cdn.example/button.css", None))
    .with_record("block-style-variation-styles", record("/css/variations.css", Some("1")))
    .with_record(
        "button-outline-style",
        AssetRecord {
            after: vec![".is-style-outline{border:1px}".into(), ".x{}".into()],
            ..Default::default()
        },
    )
    .with_record("wp-block-library", record("/wp-includes/block-library.css", None));

    let scripts = MemoryRegistry::default()
        .with_record(
            "gallery-js",
            AssetRecord {
                src: Some("/js/gallery.js".into()),
                version: Some("5".into()),
                before: vec!["var galleryConfig = {};".into()],
                after: vec![],
            },
        )
        .with_record("empty-js", AssetRecord::default());

    SiteFixture {
        fragments: vec![
            fragment(42, "<p>Hi</p>"),
            fragment(
                7,
                "<div><!-- component:gallery /--><!-- component:button /--><!-- component:gallery /--></div>",
            ),
            Fragment {
                status: FragmentStatus::Draft,
                ..fragment(2, "<p>draft</p>")
            },
            Fragment {
                access_password: Some("hunter2".into()),
                ..fragment(3, "<p>locked</p>")
            },
            Fragment {
                shareable: false,
                ..fragment(4, "<p>private</p>")
            },
        ],
        styles,
        scripts,
        variations: vec![VariationEntry {
            component_type: "core/button".into(),
            slug: "outline".into(),
            handle: "button-outline-style".into(),
        }],
        components: vec![
            ComponentFixture {
                name: "gallery".into(),
                component: RenderedComponent {
                    component_type: "core/gallery".into(),
                    markup: r#"<figure class="wp-block-gallery"></figure>"#.into(),
                    ..Default::default()
                },
                enqueue_styles: vec!["gallery-style".into(), "wp-block-library".into(), "theme-style".into()],
                enqueue_scripts: vec!["gallery-js".into(), "empty-js".into()],
            },
            ComponentFixture {
                name: "button".into(),
                component: RenderedComponent {
                    component_type: "core/button".into(),
                    style_handles: vec!["button-style".into()],
                    markup: r#"<div class="wp-block-button is-style-outline"><a>Go</a></div>"#.into(),
                    ..Default::default()
                },
                enqueue_styles: vec![],
                enqueue_scripts: vec![],
            },
        ],
        css: StaticStyleEngine {
            block_supports_css: ".wp-container-1{gap:1em}".into(),
            variation_css: [("block-style-variations".to_string(), ".is-style-outline{}".to_string())]
                .into_iter()
                .collect(),
            global_stylesheet: "body{margin:0}".into(),
        },
    }
}

fn create_settings() -> Settings {
    Settings {
        assets: AssetSettings {
            base_url: "https://site".into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn create_cache(clock: Arc<ManualClock>) -> (RenderCache, Arc<MemoryTier>, Arc<MemoryTier>) {
    let fast = Arc::new(MemoryTier::new(clock.clone()));
    let durable = Arc::new(MemoryTier::new(clock.clone()));
    let cache = RenderCache::new(fast.clone(), durable.clone(), clock, &CacheSettings::default());
    (cache, fast, durable)
}

fn sample_result(html: &str) -> RenderResult {
    RenderResult {
        html: html.to_string(),
        style_handles: vec!["a".into(), "b".into()],
        ..Default::default()
    }
}

// --- Renderer ---

#[test]
fn invariant_restricted_fragments_are_not_found() {
    init_test_logging();
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();

    for id in [999, 2, 3, 4] {
        let result = renderer.render(id);
        assert!(matches!(result, Err(RenderError::NotFound)), "id {} should be NotFound", id);
    }
    // Same message regardless of the failed gate
    assert_eq!(
        renderer.render(3).unwrap_err().to_string(),
        renderer.render(999).unwrap_err().to_string()
    );
}

#[test]
fn invariant_plain_fragment_renders_without_assets() {
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();

    let result = renderer.render(42).unwrap();
    assert_eq!(result.html, "<p>Hi</p>");
    assert!(result.style_handles.is_empty());
    assert!(result.script_handles.is_empty());
    assert!(result.assets.styles.is_empty());
    assert!(result.assets.scripts.is_empty());
}

#[test]
fn invariant_discovery_order_and_filtering() {
    init_test_logging();
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();

    let result = renderer.render(7).unwrap();

    // theme-style was active before the render; wp-block-library is baseline-excluded
    assert_eq!(
        result.style_handles,
        vec![
            "gallery-style".to_string(),
            "button-style".to_string(),
            "block-style-variation-styles".to_string(),
            "button-outline-style".to_string(),
        ]
    );
    assert_eq!(result.script_handles, vec!["gallery-js".to_string(), "empty-js".to_string()]);
    assert!(result.html.contains("is-style-outline"));
}

#[test]
fn invariant_materialized_assets() {
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();
    let result = renderer.render(7).unwrap();

    let styles = &result.assets.styles;
    assert_eq!(styles.len(), 4);
    assert_eq!(styles[0].src, "https://site/css/gallery.css?ver=2");
    assert_eq!(styles[1].src, "https://cdn.example/button.css");
    assert_eq!(styles[2].src, "https://site/css/variations.css?ver=1");
    assert_eq!(styles[3].src, "");
    assert_eq!(styles[3].inline_after, ".is-style-outline{border:1px}\n.x{}");

    // empty-js has nothing to ship
    let scripts = &result.assets.scripts;
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].handle, "gallery-js");
    assert_eq!(scripts[0].src, "https://site/js/gallery.js?ver=5");
    assert_eq!(scripts[0].inline_before, "var galleryConfig = {};");
}

#[test]
fn invariant_structural_css_kept_separate() {
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();
    let payload = renderer.render(7).unwrap().to_payload();

    assert_eq!(payload.block_supports_css, ".wp-container-1{gap:1em}");
    assert_eq!(payload.block_style_variation_css, ".is-style-outline{}");
    assert_eq!(payload.global_stylesheet, "body{margin:0}");
}

#[test]
fn invariant_render_deterministic() {
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();

    let first = renderer.render(7).unwrap();
    let second = renderer.render(7).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        fragment_render_core::fingerprint(&first).unwrap(),
        fragment_render_core::fingerprint(&second).unwrap()
    );
}

// --- Materializer ---

fn create_materializer(filter: Arc<dyn UrlFilter>) -> AssetMaterializer {
    let styles = MemoryRegistry::default()
        .with_record("h", record("/a.css", Some("3")))
        .with_record("bare", AssetRecord::default());
    AssetMaterializer::new(
        Arc::new(styles),
        Arc::new(MemoryRegistry::default()),
        filter,
        &AssetSettings {
            base_url: "https://site".into(),
            ..Default::default()
        },
    )
}

#[test]
fn invariant_style_handle_exclusions() {
    let m = create_materializer(Arc::new(PassthroughUrlFilter));
    let handles = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    assert_eq!(
        m.filter_style_handles(&handles(&["wp-block-library", "global-styles", "custom-a"])),
        handles(&["custom-a"])
    );
    assert_eq!(m.filter_style_handles(&handles(&["wp-edit-blocks", "custom-b"])), handles(&["custom-b"]));
    assert_eq!(m.filter_style_handles(&handles(&["wp-edit-foo", "custom-c"])), handles(&["custom-c"]));
}

#[test]
fn invariant_materialize_url_and_version() {
    let m = create_materializer(Arc::new(PassthroughUrlFilter));
    let asset = m.materialize("h", AssetKind::Style).unwrap();
    assert_eq!(asset.src, "https://site/a.css?ver=3");
    assert_eq!(asset.handle, "h");
}

#[test]
fn invariant_empty_assets_not_emitted() {
    let m = create_materializer(Arc::new(PassthroughUrlFilter));
    assert!(m.materialize("missing", AssetKind::Style).is_none());
    assert!(m.materialize("bare", AssetKind::Style).is_none());
}

struct RejectingFilter;

impl UrlFilter for RejectingFilter {
    fn filter_url(&self, url: &str, handle: &str, _kind: AssetKind) -> Result<String, MaterializeError> {
        if url.contains("a.css") {
            return Err(MaterializeError::Filter {
                handle: handle.to_string(),
                reason: "blocked".into(),
            });
        }
        Ok(url.to_string())
    }
}

#[test]
fn invariant_failing_url_filter_skips_only_that_asset() {
    let styles = MemoryRegistry::default()
        .with_record("bad", record("/a.css", None))
        .with_record("good", record("/b.css", None));
    let m = AssetMaterializer::new(
        Arc::new(styles),
        Arc::new(MemoryRegistry::default()),
        Arc::new(RejectingFilter),
        &AssetSettings {
            base_url: "https://site".into(),
            ..Default::default()
        },
    );
    let assets = m.materialize_all(&["bad".to_string(), "good".to_string()], AssetKind::Style);
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].src, "https://site/b.css");
}

// --- Cache ---

#[test]
fn invariant_cache_round_trip_delete_and_expiry() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, _, _) = create_cache(clock.clone());
    let r = sample_result("<p>cached</p>");

    cache.set(1, &r, Duration::from_secs(60));
    assert_eq!(cache.get(1), CacheLookup::Hit(r.clone()));

    cache.delete(1);
    assert!(cache.get(1).is_miss());

    cache.set(1, &r, Duration::from_secs(60));
    clock.advance(Duration::from_secs(61));
    assert!(cache.get(1).is_miss());
}

#[test]
fn invariant_durable_hit_promotes_to_fast() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, fast, durable) = create_cache(clock.clone());
    let r = sample_result("<p>durable</p>");

    // Populate both, then drop the fast copy
    cache.set(8, &r, Duration::from_secs(60));
    FastTier::delete(fast.as_ref(), &cache.keys().render(8)).unwrap();
    assert!(FastTier::get(fast.as_ref(), &cache.keys().render(8)).unwrap().is_none());

    assert_eq!(cache.get(8), CacheLookup::Hit(r.clone()));
    assert!(FastTier::get(fast.as_ref(), &cache.keys().render(8)).unwrap().is_some());

    // Now served by the fast tier alone
    DurableTier::delete(durable.as_ref(), &cache.keys().render(8)).unwrap();
    assert_eq!(cache.get(8), CacheLookup::Hit(r));
}

#[test]
fn invariant_clear_all_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let fast = Arc::new(MemoryTier::new(clock.clone()));
    let durable = Arc::new(FileTier::open(dir.path(), clock.clone()).unwrap());
    let cache = RenderCache::new(fast.clone(), durable, clock, &CacheSettings::default());

    let n = 5;
    for id in 0..n {
        cache.store(id, &sample_result(&format!("<p>{}</p>", id)));
    }
    let deleted = cache.clear_all();
    assert!(deleted >= n as usize);
    assert!(fast.is_empty());
    for id in 0..n {
        assert!(cache.get(id).is_miss());
    }
}

#[test]
fn invariant_delete_clears_fragment_object_entry() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, fast, _) = create_cache(clock.clone());
    let store = Arc::new(fragment_render_core::memory::MemoryContentStore::new(vec![fragment(5, "<p>v1</p>")]));
    let cached = CachedContentProvider::new(
        store.clone(),
        fast.clone(),
        clock,
        CacheKeys::new("fragment_render"),
        CacheSettings::default().object_ttl(),
    );

    assert_eq!(cached.get_fragment(5).unwrap().content, "<p>v1</p>");
    store.put(fragment(5, "<p>v2</p>"));
    // Object cache still serves the stale copy
    assert_eq!(cached.get_fragment(5).unwrap().content, "<p>v1</p>");

    cache.delete(5);
    assert!(FastTier::get(fast.as_ref(), &cache.keys().object(5)).unwrap().is_none());
    assert_eq!(cached.get_fragment(5).unwrap().content, "<p>v2</p>");
}

#[test]
fn invariant_concurrent_misses_converge() {
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = Arc::new(site.renderer(&create_settings()).unwrap());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, _, _) = create_cache(clock);
    let cache = Arc::new(cache);

    let results: Vec<RenderResult> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let renderer = renderer.clone();
                let cache = cache.clone();
                s.spawn(move || renderer.render_cached(7, &cache).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.get(7), CacheLookup::Hit(results[0].clone()));
}

// --- Invalidation ---

#[test]
fn invariant_end_to_end_render_cache_invalidate() {
    init_test_logging();
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, _, _) = create_cache(clock);
    let cache = Arc::new(cache);

    let result = renderer.render_cached(42, &cache).unwrap();
    assert_eq!(result.html, "<p>Hi</p>");
    assert!(result.style_handles.is_empty());
    assert!(result.script_handles.is_empty());
    assert_eq!(cache.get(42), CacheLookup::Hit(result));

    let invalidator = Invalidator::new(site.content.clone(), cache.clone());
    assert_eq!(
        invalidator.handle(&FragmentChange::Saved { id: 42 }),
        InvalidationOutcome::Invalidated
    );
    assert!(cache.get(42).is_miss());
}

#[test]
fn invariant_invalidation_rules() {
    let site = MemorySite::from_fixture(create_fixture());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, _, _) = create_cache(clock);
    let cache = Arc::new(cache);
    let invalidator = Invalidator::new(site.content.clone(), cache.clone());

    // Not shareable now: ignored
    assert_eq!(
        invalidator.handle(&FragmentChange::Saved { id: 4 }),
        InvalidationOutcome::Skipped(SkipReason::NotShareable)
    );

    // Draft -> pending does not cross the public boundary
    cache.store(2, &sample_result("<p>x</p>"));
    assert_eq!(
        invalidator.handle(&FragmentChange::StatusChanged {
            id: 2,
            from: FragmentStatus::Draft,
            to: FragmentStatus::Pending
        }),
        InvalidationOutcome::Skipped(SkipReason::VisibilityUnchanged)
    );
    assert!(!cache.get(2).is_miss());

    // Publish -> private crosses it
    cache.store(42, &sample_result("<p>x</p>"));
    assert_eq!(
        invalidator.handle(&FragmentChange::StatusChanged {
            id: 42,
            from: FragmentStatus::Publish,
            to: FragmentStatus::Private
        }),
        InvalidationOutcome::Invalidated
    );
    assert!(cache.get(42).is_miss());

    // Access change on a shareable fragment
    cache.store(3, &sample_result("<p>x</p>"));
    assert_eq!(
        invalidator.handle(&FragmentChange::AccessChanged { id: 3 }),
        InvalidationOutcome::Invalidated
    );
    assert!(cache.get(3).is_miss());
}

#[test]
fn invariant_shareability_read_at_invalidation_time() {
    let site = MemorySite::from_fixture(create_fixture());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, _, _) = create_cache(clock);
    let cache = Arc::new(cache);
    let invalidator = Invalidator::new(site.content.clone(), cache.clone());

    cache.store(4, &sample_result("<p>x</p>"));
    site.content.put(Fragment {
        shareable: true,
        ..fragment(4, "<p>now shared</p>")
    });
    assert_eq!(
        invalidator.handle(&FragmentChange::Saved { id: 4 }),
        InvalidationOutcome::Invalidated
    );
    assert!(cache.get(4).is_miss());
}

#[test]
fn invariant_unshared_fragment_not_served_from_cache() {
    init_test_logging();
    let site = MemorySite::from_fixture(create_fixture());
    let renderer = site.renderer(&create_settings()).unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (cache, _, _) = create_cache(clock);
    let cache = Arc::new(cache);
    let invalidator = Invalidator::new(site.content.clone(), cache.clone());

    renderer.render_cached(42, &cache).unwrap();
    assert!(!cache.get(42).is_miss());

    site.content.put(Fragment {
        shareable: false,
        ..fragment(42, "<p>Hi</p>")
    });
    // The save is ignored, so the entry stays behind
    assert_eq!(
        invalidator.handle(&FragmentChange::Saved { id: 42 }),
        InvalidationOutcome::Skipped(SkipReason::NotShareable)
    );
    assert!(!cache.get(42).is_miss());

    assert!(matches!(renderer.render_cached(42, &cache), Err(RenderError::NotFound)));

    // Same for a fragment that left the public status without an event
    renderer.render_cached(7, &cache).unwrap();
    site.content.put(Fragment {
        status: FragmentStatus::Private,
        ..fragment(7, "<p>gone</p>")
    });
    assert!(matches!(renderer.render_cached(7, &cache), Err(RenderError::NotFound)));
}

// --- Gallery ---

fn gallery_item(id: u64, name: &str) -> GalleryItem {
    GalleryItem {
        id: Some(id),
        full_url: format!("https://site/{}.jpg", name),
        caption: name.to_string(),
        alt: format!("{} alt", name),
        original_index: 0,
    }
}

fn gallery_dataset() -> GalleryDataset {
    GalleryDataset::new(
        vec![gallery_item(1, "A"), gallery_item(2, "B"), gallery_item(3, "C")],
        GalleryViewSettings::from(&GallerySettings::default()),
    )
}

fn gallery_markup(ids: &[u64]) -> String {
    let items: String = ids
        .iter()
        .map(|id| format!(r#"<figure class="wp-block-image" data-id="{}"><img src="{}.jpg"></figure>"#, id, id))
        .collect();
    format!(r#"<figure class="wp-block-gallery has-nested-images">{}</figure>"#, items)
}

#[test]
fn invariant_reconcile_reorders_to_display_order() {
    let reconciler = GalleryReconciler::new(&GallerySettings::default());
    let mut dataset = gallery_dataset();

    assert_eq!(reconciler.reconcile(&mut dataset, &gallery_markup(&[3, 1, 2])), ReconcileOutcome::Reordered);
    let captions: Vec<_> = dataset.items.iter().map(|i| i.caption.as_str()).collect();
    assert_eq!(captions, vec!["C", "A", "B"]);
}

#[test]
fn invariant_reconcile_idempotent() {
    let reconciler = GalleryReconciler::new(&GallerySettings::default());
    let markup = gallery_markup(&[2, 3, 1]);
    let mut dataset = gallery_dataset();

    reconciler.reconcile(&mut dataset, &markup);
    let first = dataset.clone();
    reconciler.reconcile(&mut dataset, &markup);
    assert_eq!(dataset, first);
}

#[test]
fn invariant_reconcile_fail_safe_on_count_mismatch() {
    let reconciler = GalleryReconciler::new(&GallerySettings::default());
    let mut dataset = gallery_dataset();
    let before = dataset.clone();

    let outcome = reconciler.reconcile(&mut dataset, &gallery_markup(&[2, 1]));
    assert_eq!(
        outcome,
        ReconcileOutcome::Unchanged(UnchangedReason::CountMismatch { found: 2, expected: 3 })
    );
    assert_eq!(dataset.items.len(), 3);
    assert_eq!(dataset, before);
}

#[test]
fn invariant_reconcile_untagged_markup_unchanged() {
    let reconciler = GalleryReconciler::new(&GallerySettings::default());
    let mut dataset = gallery_dataset();
    let before = dataset.clone();

    assert_eq!(
        reconciler.reconcile(&mut dataset, "<div><img src=\"a.jpg\"></div>"),
        ReconcileOutcome::Unchanged(UnchangedReason::NoTaggedItems)
    );
    assert_eq!(dataset, before);
}

#[test]
fn invariant_tagged_markup_reconciles() {
    let reconciler = GalleryReconciler::new(&GallerySettings::default());
    let raw = concat!(
        r#"<figure class="wp-block-gallery">"#,
        r#"<figure class="wp-block-image"><img src="c.jpg" class="wp-image-3"></figure>"#,
        r#"<figure class="wp-block-image"><img src="a.jpg" class="wp-image-1"></figure>"#,
        r#"<figure class="wp-block-image"><img src="b.jpg" class="wp-image-2"></figure>"#,
        r#"</figure>"#,
    );
    let mut dataset = gallery_dataset();
    assert_eq!(
        reconciler.reconcile(&mut dataset, &reconciler.tag_items(raw)),
        ReconcileOutcome::Reordered
    );
    let payload = dataset.to_payload();
    let ids: Vec<_> = payload.images.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![Some(3), Some(1), Some(2)]);
}
