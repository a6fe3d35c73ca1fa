//! Integration tests for the per-page runtime.
//!
//! Pages run against the in-memory data source with the tokio clock paused,
//! so every interval below is virtual time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use carousel_core::config::PageConfig;
use carousel_core::value::RawCellValue;
use carousel_core::PublishPhase;
use carousel_events::EventKind;
use carousel_pipeline::TrustingProbe;
use carousel_worker::PageHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{
    deps, is_slide_changed, memory_source, next_event, page, wait_view, ListProbe, SlowSource,
};

fn slide_ids(view: &carousel_worker::PageView) -> Vec<&str> {
    view.slides.iter().map(|s| s.id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Test: rotation
// ---------------------------------------------------------------------------

/// Three records with a limit of ten give three slides, and the index wraps
/// modulo three at the configured interval.
#[tokio::test(start_paused = true)]
async fn three_records_rotate_and_wrap() {
    let deps = deps(Arc::new(memory_source()), Arc::new(TrustingProbe));
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();
    let config = PageConfig {
        limit: 10,
        interval_ms: 3000,
        ..page("p1", "news")
    };

    let mut handle = PageHandle::spawn(config, &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();

    let loaded = wait_view(&mut view, |v| v.slides.len() == 3).await;
    assert_eq!(slide_ids(&loaded), ["n1", "n2", "n3"]);
    assert_eq!(loaded.index, 0);
    assert!(!loaded.loading);

    let mut indices = Vec::new();
    let mut flipped_at = Vec::new();
    for _ in 0..4 {
        let event = next_event(&mut events, is_slide_changed).await;
        flipped_at.push(Instant::now());
        if let EventKind::SlideChanged { index, .. } = event.kind {
            indices.push(index);
        }
    }
    assert_eq!(indices, [1, 2, 0, 1]);
    for pair in flipped_at.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(3000) && gap < Duration::from_millis(3100),
            "flips should be one interval apart, got {gap:?}"
        );
    }

    handle.shutdown().await;
}

/// A page never activated does not load anything.
#[tokio::test(start_paused = true)]
async fn inactive_page_stays_idle() {
    let deps = deps(Arc::new(memory_source()), Arc::new(TrustingProbe));
    let cancel = CancellationToken::new();
    let handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = handle.snapshot();
    assert!(snapshot.slides.is_empty());
    assert!(!snapshot.active);
    assert!(snapshot.is_empty());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: refresh
// ---------------------------------------------------------------------------

/// Once every record is cached, refresh cycles publish from the cache and the
/// page never shows the loading indicator again.
#[tokio::test(start_paused = true)]
async fn refresh_with_unchanged_ids_renders_from_cache() {
    let deps = deps(Arc::new(memory_source()), Arc::new(TrustingProbe));
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();

    let mut handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();
    wait_view(&mut view, |v| v.slides.len() == 3).await;

    let cached = next_event(&mut events, |e| {
        matches!(
            e.kind,
            EventKind::SlidesPublished {
                phase: PublishPhase::Cached,
                ..
            }
        )
    })
    .await;
    assert_matches::assert_matches!(
        cached.kind,
        EventKind::SlidesPublished {
            slide_count: 3,
            index_reset: false,
            ..
        }
    );

    let snapshot = handle.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.slides.len(), 3);

    handle.shutdown().await;
}

/// A record added to the table shows up on the next refresh.
#[tokio::test(start_paused = true)]
async fn refresh_picks_up_new_records() {
    let source = memory_source();
    let table = source.table("news").expect("table exists");
    let deps = deps(Arc::new(source), Arc::new(TrustingProbe));
    let cancel = CancellationToken::new();

    let mut handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();
    wait_view(&mut view, |v| v.slides.len() == 3).await;

    table.set_value("n4", "title", RawCellValue::text("Four"));
    let updated = wait_view(&mut view, |v| v.slides.len() == 4).await;
    assert_eq!(updated.slides[3].title, "Four");
    assert_eq!(updated.index, 0, "a changed id list resets the index");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: source changes
// ---------------------------------------------------------------------------

/// Switching tables clears the displayed slides and resets the index before
/// the new table's data arrives.
#[tokio::test(start_paused = true)]
async fn table_change_clears_before_new_data() {
    let source = SlowSource::new(memory_source(), &[("alerts", Duration::from_secs(2))]);
    let deps = deps(Arc::new(source), Arc::new(TrustingProbe));
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();

    let mut handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();
    wait_view(&mut view, |v| v.slides.len() == 3).await;
    next_event(&mut events, is_slide_changed).await;
    assert_eq!(handle.snapshot().index, 1);

    handle
        .update_config(page("p1", "alerts"))
        .await
        .expect("page should accept commands");

    let cleared = wait_view(&mut view, |v| v.slides.is_empty() && v.loading).await;
    assert_eq!(cleared.index, 0);

    next_event(&mut events, |e| e.kind == EventKind::SlidesCleared).await;
    let published = next_event(&mut events, |e| {
        matches!(e.kind, EventKind::SlidesPublished { .. })
    })
    .await;
    assert_matches::assert_matches!(
        published.kind,
        EventKind::SlidesPublished {
            index: 0,
            index_reset: true,
            ..
        }
    );

    let alerts = wait_view(&mut view, |v| v.slides.len() == 2).await;
    assert_eq!(slide_ids(&alerts), ["a1", "a2"]);
    assert_eq!(alerts.index, 0);

    handle.shutdown().await;
}

/// A slow cycle for a replaced source never reaches the screen.
#[tokio::test(start_paused = true)]
async fn results_from_replaced_source_are_dropped() {
    let source = SlowSource::new(memory_source(), &[("news", Duration::from_secs(5))]);
    let deps = deps(Arc::new(source), Arc::new(TrustingProbe));
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();

    let mut handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle
        .update_config(page("p1", "alerts"))
        .await
        .expect("page should accept commands");
    let mut view = handle.view();
    wait_view(&mut view, |v| v.slides.len() == 2).await;

    // Well past the point where the news lookup finishes.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let snapshot = handle.snapshot();
    assert!(snapshot.slides.iter().all(|s| s.id.starts_with('a')));

    while let Ok(event) = events.try_recv() {
        if let EventKind::SlidesPublished { slide_count, .. } = event.kind {
            assert_ne!(slide_count, 3, "news slides must never be published");
        }
    }

    handle.shutdown().await;
}

/// Changing only display options keeps the slides and the index.
#[tokio::test(start_paused = true)]
async fn display_change_keeps_slides() {
    let deps = deps(Arc::new(memory_source()), Arc::new(TrustingProbe));
    let cancel = CancellationToken::new();

    let mut handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();
    wait_view(&mut view, |v| v.slides.len() == 3).await;

    let restyled = PageConfig {
        color: "#ff0000".into(),
        show_indicators: false,
        ..page("p1", "news")
    };
    handle
        .update_config(restyled)
        .await
        .expect("page should accept commands");

    let updated = wait_view(&mut view, |v| v.color == "#ff0000").await;
    assert_eq!(updated.slides.len(), 3);
    assert!(!updated.show_indicators);

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: image refresh
// ---------------------------------------------------------------------------

/// An expired attachment URL is replaced by a fresh one, which then loads
/// and is displayed.
#[tokio::test(start_paused = true)]
async fn expired_image_is_displayed_with_refreshed_url() {
    let source = memory_source();
    let table = source.table("gallery").expect("table exists");
    let probe = Arc::new(ListProbe::allowing(&["https://cdn/g4.png?sig=new"]));
    let deps = deps(Arc::new(source), probe.clone());
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();
    let config = PageConfig {
        image_field_id: Some("photo".into()),
        ..page("p1", "gallery")
    };

    let mut handle = PageHandle::spawn(config, &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();
    let loaded = wait_view(&mut view, |v| v.slides.len() == 4).await;
    assert_eq!(
        loaded.slides[3].image_url.as_deref(),
        Some("https://cdn/g4.png?sig=old")
    );

    // The host now hands out a newly signed URL for the same attachment.
    table.set_value(
        "g4",
        "photo",
        RawCellValue::from(serde_json::json!([{"url": "https://cdn/g4.png?sig=new"}])),
    );

    let preloaded = next_event(&mut events, |e| {
        matches!(e.kind, EventKind::PreloadFinished { .. })
    })
    .await;
    assert_eq!(
        preloaded.kind,
        EventKind::PreloadFinished {
            record_id: "g4".into(),
            url: "https://cdn/g4.png?sig=new".into(),
            loaded: true,
            refreshed: true,
        }
    );

    let showing = wait_view(&mut view, |v| v.index == 3).await;
    assert_eq!(
        showing.current().and_then(|s| s.image_url.as_deref()),
        Some("https://cdn/g4.png?sig=new")
    );
    assert_eq!(probe.calls(), 2);

    handle.shutdown().await;
}

/// An image that never loads does not stall the rotation.
#[tokio::test(start_paused = true)]
async fn failing_image_still_flips() {
    let images = Arc::new(ListProbe::default());
    let deps = deps(Arc::new(memory_source()), images.clone());
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();
    let config = PageConfig {
        image_field_id: Some("photo".into()),
        ..page("p1", "gallery")
    };

    let mut handle = PageHandle::spawn(config, &deps, &cancel);
    handle.activate().await.expect("page should accept commands");

    let mut visited = Vec::new();
    for _ in 0..4 {
        let event = next_event(&mut events, is_slide_changed).await;
        if let EventKind::SlideChanged { index, record_id } = event.kind {
            visited.push((index, record_id));
        }
    }
    assert_eq!(visited[2], (3, "g4".to_string()));
    assert_eq!(visited[3], (0, "g1".to_string()));
    assert!(images.calls() >= 2, "the broken URL is retried once");

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: suspend and resume
// ---------------------------------------------------------------------------

/// A suspended page keeps its index, runs no refresh, and resumes from the
/// same slide.
#[tokio::test(start_paused = true)]
async fn suspend_freezes_index_and_refresh() {
    let deps = deps(Arc::new(memory_source()), Arc::new(TrustingProbe));
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();

    let mut handle = PageHandle::spawn(page("p1", "news"), &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    let mut view = handle.view();
    wait_view(&mut view, |v| v.slides.len() == 3).await;
    next_event(&mut events, is_slide_changed).await;

    handle.deactivate().await.expect("page should accept commands");
    let suspended = wait_view(&mut view, |v| !v.active).await;
    assert_eq!(suspended.index, 1);
    while events.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.index, 1);
    assert_eq!(snapshot.slides.len(), 3);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event.kind,
                EventKind::SlidesPublished { .. } | EventKind::SlideChanged { .. }
            ),
            "suspended page must stay still, got {:?}",
            event.kind
        );
    }

    handle.activate().await.expect("page should accept commands");
    let resumed = wait_view(&mut view, |v| v.active).await;
    assert_eq!(resumed.index, 1);
    let event = next_event(&mut events, is_slide_changed).await;
    assert_matches::assert_matches!(event.kind, EventKind::SlideChanged { index: 2, .. });

    handle.shutdown().await;
}

/// Suspending while the next image is still loading drops the pending flip
/// instead of moving the index in the background.
#[tokio::test(start_paused = true)]
async fn suspend_during_image_wait_keeps_index() {
    let images = Arc::new(ListProbe::default().with_delay(Duration::from_secs(5)));
    let deps = deps(Arc::new(memory_source()), images);
    let mut events = deps.events.subscribe();
    let cancel = CancellationToken::new();
    let config = PageConfig {
        image_field_id: Some("photo".into()),
        ..page("p1", "gallery")
    };

    let mut handle = PageHandle::spawn(config, &deps, &cancel);
    handle.activate().await.expect("page should accept commands");
    next_event(&mut events, |e| {
        matches!(e.kind, EventKind::SlideChanged { index: 2, .. })
    })
    .await;

    // The flip towards g4 is now waiting on its slow image.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(handle.snapshot().index, 2);
    handle.deactivate().await.expect("page should accept commands");

    tokio::time::sleep(Duration::from_secs(20)).await;
    let snapshot = handle.snapshot();
    assert!(!snapshot.active);
    assert_eq!(snapshot.index, 2);

    handle.activate().await.expect("page should accept commands");
    let event = next_event(&mut events, is_slide_changed).await;
    assert_matches::assert_matches!(event.kind, EventKind::SlideChanged { index: 3, .. });

    handle.shutdown().await;
}
