//! Viewer lifecycle integration tests.
//!
//! Tests verify:
//! - Mount and unmount create and destroy the surface exactly once
//! - Re-selecting the current slide does not re-open it
//! - The last selection wins regardless of descriptor arrival order
//! - Clearing the selection closes the surface without fetching
//! - Descriptor failures surface once; tile failures never do
//! - Viewport changes release tiles that left the view and redraw cached ones
//! - Tile results from a superseded session never reach the surface

use wsi_viewer::error::{DescriptorError, DescriptorFetchError, LifecycleError, ViewerError};
use bytes::Bytes;
use wsi_viewer::error::TileFetchError;
use wsi_viewer::pyramid::{RawDescriptor, Rect, SlideId, TileCoord};
use wsi_viewer::scheduler::{TileKey, TileSettled, TileState};
use wsi_viewer::viewer::{ViewerEvent, ViewerState};

use super::test_utils::{
    container, container_with_viewport, controller, next_error, small_descriptor, step_until,
    with_timeout, GatedDescriptorSource, RecordingTileFetcher,
};

// =============================================================================
// Mount / Unmount
// =============================================================================

#[tokio::test]
async fn test_mount_creates_one_surface() {
    let (mut viewer, _errors) = controller(GatedDescriptorSource::new(), RecordingTileFetcher::new());
    let recording = container();

    assert_eq!(viewer.state(), ViewerState::Unmounted);
    viewer.mount(recording.clone()).unwrap();
    assert_eq!(viewer.state(), ViewerState::Idle);

    assert_eq!(viewer.mount(container()), Err(LifecycleError::AlreadyMounted));
    assert_eq!(recording.lock().unwrap().created, 1);
}

#[tokio::test]
async fn test_select_before_mount_is_ignored() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());

    viewer.select(Some(SlideId::from("1")));
    tokio::task::yield_now().await;

    assert_eq!(viewer.state(), ViewerState::Unmounted);
    assert!(viewer.token().is_none());
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn test_unmount_destroys_surface_once() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("1")));
    source.resolve("1", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;
    let token = viewer.token().unwrap();

    viewer.unmount();
    viewer.unmount();
    assert_eq!(viewer.state(), ViewerState::Unmounted);
    assert_eq!(recording.lock().unwrap().destroyed, 1);

    // Late results after teardown are no-ops
    viewer.dispatch(ViewerEvent::DescriptorArrived {
        token,
        slide_id: SlideId::from("1"),
        result: Ok(small_descriptor()),
    });
    viewer.select(Some(SlideId::from("2")));
    assert_eq!(viewer.state(), ViewerState::Unmounted);
    assert_eq!(recording.lock().unwrap().opened.len(), 1);

    // Terminal: cannot be mounted again
    assert_eq!(viewer.mount(container()), Err(LifecycleError::Terminated));
    assert!(!viewer.step().await);
    assert_eq!(recording.lock().unwrap().destroyed, 1);
}

#[tokio::test]
async fn test_unmount_while_awaiting_descriptor() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("1")));
    assert_eq!(viewer.state(), ViewerState::AwaitingDescriptor);

    viewer.unmount();
    source.resolve("1", Ok(small_descriptor()));
    tokio::task::yield_now().await;
    assert_eq!(viewer.drain(), 0);

    let recording = recording.lock().unwrap();
    assert!(recording.opened.is_empty());
    assert_eq!(recording.closed, 0);
    assert_eq!(recording.destroyed, 1);
}

// =============================================================================
// Selection
// =============================================================================

#[tokio::test]
async fn test_select_same_slide_opens_once() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("7")));
    let token = viewer.token();
    viewer.select(Some(SlideId::from("7")));
    assert_eq!(viewer.token(), token);

    source.resolve("7", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;

    // Selecting the open slide again is a no-op as well
    viewer.select(Some(SlideId::from("7")));
    assert_eq!(viewer.state(), ViewerState::Open);
    assert_eq!(viewer.token(), token);

    assert_eq!(source.calls(), vec!["7".to_string()]);
    let recording = recording.lock().unwrap();
    assert_eq!(recording.opened.len(), 1);
    assert_eq!(recording.closed, 0);
    assert_eq!(recording.first_tile_urls, vec!["/slides/7/tiles/10/0/0".to_string()]);
}

#[tokio::test]
async fn test_last_selection_wins() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::new();
    let (mut viewer, mut errors) = controller(source.clone(), tiles.clone());
    let recording = container_with_viewport(10, Rect::new(0.0, 0.0, 512.0, 256.0));
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("1")));
    let first = viewer.token().unwrap();
    viewer.select(Some(SlideId::from("2")));
    let second = viewer.token().unwrap();
    assert!(second > first);

    // Slide 2 resolves first
    source.resolve("2", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;
    step_until(&mut viewer, |_| recording.lock().unwrap().loaded.len() == 2).await;

    // Slide 1 resolves last; its result is discarded whether or not the
    // aborted fetch still reports back
    source.resolve("1", Ok(small_descriptor()));
    tokio::task::yield_now().await;
    viewer.drain();
    viewer.dispatch(ViewerEvent::DescriptorArrived {
        token: first,
        slide_id: SlideId::from("1"),
        result: Ok(small_descriptor()),
    });

    assert_eq!(viewer.state(), ViewerState::Open);
    assert_eq!(viewer.slide_id(), Some(&SlideId::from("2")));
    assert_eq!(viewer.token(), Some(second));

    let recording = recording.lock().unwrap();
    assert_eq!(recording.opened, vec![(second, "2".to_string())]);
    assert_eq!(recording.closed, 0);

    let requested = tiles.requests();
    assert_eq!(requested.len(), 2);
    assert!(requested.iter().all(|uri| uri.starts_with("/slides/2/")));
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_switch_while_open_closes_and_reopens() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("a")));
    source.resolve("a", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;

    viewer.select(Some(SlideId::from("b")));
    assert_eq!(viewer.state(), ViewerState::AwaitingDescriptor);
    assert_eq!(recording.lock().unwrap().closed, 1);

    source.resolve("b", Ok(RawDescriptor::new(4000, 3000, 512, 1, 12)));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;

    let recording = recording.lock().unwrap();
    let opened: Vec<&str> = recording.opened.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(opened, vec!["a", "b"]);
    assert_eq!(recording.created, 1);
    assert_eq!(recording.destroyed, 0);
    assert_eq!(viewer.descriptor().map(|d| d.tile_size()), Some(512));
}

#[tokio::test]
async fn test_clear_selection_while_open() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::new();
    let (mut viewer, _errors) = controller(source.clone(), tiles.clone());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("1")));
    source.resolve("1", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;
    let calls_before = source.calls().len();

    viewer.select(None);
    assert_eq!(viewer.state(), ViewerState::Idle);
    assert!(viewer.token().is_none());
    assert!(viewer.scheduler().is_empty());

    // Clearing an already empty viewer does nothing
    viewer.select(None);

    tokio::task::yield_now().await;
    assert_eq!(viewer.drain(), 0);
    assert_eq!(source.calls().len(), calls_before);
    assert!(tiles.requests().is_empty());
    assert_eq!(recording.lock().unwrap().closed, 1);
}

#[tokio::test]
async fn test_clear_selection_while_awaiting_does_not_close() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("1")));
    viewer.select(None);
    assert_eq!(viewer.state(), ViewerState::Idle);

    source.resolve("1", Ok(small_descriptor()));
    tokio::task::yield_now().await;
    viewer.drain();

    let recording = recording.lock().unwrap();
    assert!(recording.opened.is_empty());
    assert_eq!(recording.closed, 0);
}

// =============================================================================
// Descriptor Failures
// =============================================================================

#[tokio::test]
async fn test_inverted_levels_never_open() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, mut errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("9")));
    source.resolve("9", Ok(RawDescriptor::new(1000, 800, 256, 0, 2).with_min_level(5)));
    let error = next_error(&mut viewer, &mut errors).await;

    assert_eq!(
        error,
        ViewerError::InvalidDescriptor {
            slide_id: "9".to_string(),
            source: DescriptorError::InvertedLevels {
                min_level: 5,
                max_level: 2
            },
        }
    );
    assert!(errors.try_recv().is_err());
    assert_eq!(viewer.state(), ViewerState::AwaitingDescriptor);
    assert!(recording.lock().unwrap().opened.is_empty());
}

#[tokio::test]
async fn test_non_positive_geometry_never_opens() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, mut errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("z")));
    source.resolve("z", Ok(RawDescriptor::new(1000, 800, 0, 0, 10)));
    match next_error(&mut viewer, &mut errors).await {
        ViewerError::InvalidDescriptor { source, .. } => assert_eq!(
            source,
            DescriptorError::NonPositive {
                field: "tile_size",
                value: 0
            }
        ),
        other => panic!("expected an invalid descriptor error, got {other:?}"),
    }
    assert!(errors.try_recv().is_err());
    assert!(recording.lock().unwrap().opened.is_empty());
}

#[tokio::test]
async fn test_fetch_error_reported_and_reselect_retries() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, mut errors) = controller(source.clone(), RecordingTileFetcher::new());
    viewer.mount(container()).unwrap();

    viewer.select(Some(SlideId::from("3")));
    source.resolve(
        "3",
        Err(DescriptorFetchError::Status {
            url: "http://localhost/slides/3/dzi".to_string(),
            status: 404,
        }),
    );
    assert!(matches!(
        next_error(&mut viewer, &mut errors).await,
        ViewerError::DescriptorFetch { .. }
    ));
    assert_eq!(viewer.state(), ViewerState::AwaitingDescriptor);

    source.resolve("3", Ok(small_descriptor()));
    viewer.select(Some(SlideId::from("3")));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;

    assert_eq!(source.calls().len(), 2);
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_surface_open_failure_returns_to_idle() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, mut errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    recording.lock().unwrap().fail_open = Some("no GPU".to_string());
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("4")));
    source.resolve("4", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.state() == ViewerState::Idle).await;

    assert_eq!(
        errors.try_recv(),
        Ok(ViewerError::OpenFailed {
            slide_id: "4".to_string(),
            reason: "no GPU".to_string(),
        })
    );
    assert_eq!(recording.lock().unwrap().closed, 1);
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_failing_tile_renders_one_placeholder() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::failing(["/slides/5/tiles/10/0/0"]);
    let (mut viewer, mut errors) = controller(source.clone(), tiles.clone());
    let recording = container_with_viewport(10, Rect::new(0.0, 0.0, 512.0, 256.0));
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("5")));
    source.resolve("5", Ok(small_descriptor()));
    step_until(&mut viewer, |_| {
        let r = recording.lock().unwrap();
        r.failed.len() + r.loaded.len() == 2
    })
    .await;

    {
        let recording = recording.lock().unwrap();
        assert_eq!(recording.failed, vec![TileCoord::new(10, 0, 0)]);
        assert_eq!(recording.loaded, vec![TileCoord::new(10, 1, 0)]);
    }
    // First attempt plus two retries
    assert_eq!(tiles.count("/slides/5/tiles/10/0/0"), 3);
    assert_eq!(tiles.count("/slides/5/tiles/10/1/0"), 1);
    assert!(errors.try_recv().is_err());
    assert_eq!(viewer.state(), ViewerState::Open);
    assert_eq!(viewer.scheduler().pending(), 0);
}

#[tokio::test]
async fn test_viewport_covers_expected_tiles() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::new();
    let (mut viewer, _errors) = controller(source.clone(), tiles.clone());
    let recording = container_with_viewport(9, Rect::new(0.0, 0.0, 512.0, 384.0));
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("6")));
    source.resolve("6", Ok(small_descriptor()));
    step_until(&mut viewer, |_| recording.lock().unwrap().loaded.len() == 4).await;

    // Level 9 is 512x384: a 2x2 grid, all of it in view
    let visible: Vec<TileCoord> = viewer.visible_tiles().into_iter().collect();
    assert_eq!(
        visible,
        vec![
            TileCoord::new(9, 0, 0),
            TileCoord::new(9, 0, 1),
            TileCoord::new(9, 1, 0),
            TileCoord::new(9, 1, 1),
        ]
    );
    assert_eq!(tiles.requests().len(), 4);
}

#[tokio::test]
async fn test_viewport_change_releases_and_redraws_from_cache() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::stalling(["/slides/s/tiles/10/2/0"]);
    let (mut viewer, _errors) = controller(source.clone(), tiles.clone());
    let left = Rect::new(0.0, 0.0, 512.0, 256.0);
    let right = Rect::new(256.0, 0.0, 512.0, 256.0);
    let recording = container_with_viewport(10, left);
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("s")));
    source.resolve("s", Ok(small_descriptor()));
    step_until(&mut viewer, |_| recording.lock().unwrap().loaded.len() == 2).await;
    let token = viewer.token().unwrap();

    // Pan right: (0,0) leaves the view, (2,0) starts loading and never finishes
    viewer.viewport_changed(token, 10, right);
    assert_eq!(
        viewer.visible_tiles().into_iter().collect::<Vec<_>>(),
        vec![TileCoord::new(10, 1, 0), TileCoord::new(10, 2, 0)]
    );
    let stalled = TileKey::new(SlideId::from("s"), TileCoord::new(10, 2, 0));
    assert_eq!(
        viewer.scheduler().state(&stalled),
        Some(TileState::Pending { attempt: 0 })
    );
    assert_eq!(viewer.scheduler().pending(), 1);

    // Pan back: the pending tile is released, the loaded one comes from cache
    viewer.viewport_changed(token, 10, left);
    assert_eq!(
        viewer.visible_tiles().into_iter().collect::<Vec<_>>(),
        vec![TileCoord::new(10, 0, 0), TileCoord::new(10, 1, 0)]
    );
    assert_eq!(viewer.scheduler().state(&stalled), None);
    assert_eq!(viewer.scheduler().pending(), 0);

    {
        let recording = recording.lock().unwrap();
        assert_eq!(recording.loaded.len(), 3);
        assert_eq!(recording.loaded.last(), Some(&TileCoord::new(10, 0, 0)));
        assert!(recording.failed.is_empty());
    }
    assert_eq!(tiles.count("/slides/s/tiles/10/0/0"), 1);
    assert_eq!(tiles.count("/slides/s/tiles/10/1/0"), 1);
}

#[tokio::test]
async fn test_tile_results_of_previous_slide_are_dropped() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::gated();
    let (mut viewer, mut errors) = controller(source.clone(), tiles.clone());
    // Only slide "a" has a tile under this viewport
    let recording = container_with_viewport(10, Rect::new(768.0, 512.0, 256.0, 256.0));
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("a")));
    source.resolve("a", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.scheduler().pending() == 1).await;
    let first = viewer.token().unwrap();
    let held = TileCoord::new(10, 3, 2);

    viewer.select(Some(SlideId::from("b")));
    source.resolve("b", Ok(RawDescriptor::new(512, 512, 256, 0, 10)));
    step_until(&mut viewer, |v| v.state() == ViewerState::Open).await;
    assert!(viewer.visible_tiles().is_empty());

    // Release the held fetch and deliver late results as if the abort lost the race
    tiles.release();
    tokio::task::yield_now().await;
    viewer.drain();
    let key = TileKey::new(SlideId::from("a"), held);
    viewer.dispatch(ViewerEvent::TileSettled(TileSettled {
        token: first,
        key: key.clone(),
        attempt: 0,
        result: Ok(Bytes::from_static(b"late")),
    }));
    viewer.dispatch(ViewerEvent::TileSettled(TileSettled {
        token: first,
        key,
        attempt: 2,
        result: Err(TileFetchError::Timeout(std::time::Duration::from_secs(2))),
    }));

    {
        let recording = recording.lock().unwrap();
        assert!(recording.loaded.is_empty());
        assert!(recording.failed.is_empty());
        assert_eq!(recording.opened.len(), 2);
    }
    assert!(viewer.scheduler().is_empty());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_tile_results_after_unmount_are_dropped() {
    let source = GatedDescriptorSource::new();
    let tiles = RecordingTileFetcher::gated();
    let (mut viewer, _errors) = controller(source.clone(), tiles.clone());
    let recording = container_with_viewport(10, Rect::new(0.0, 0.0, 256.0, 256.0));
    viewer.mount(recording.clone()).unwrap();

    viewer.select(Some(SlideId::from("a")));
    source.resolve("a", Ok(small_descriptor()));
    step_until(&mut viewer, |v| v.scheduler().pending() == 1).await;
    let token = viewer.token().unwrap();

    viewer.unmount();
    tiles.release();
    tokio::task::yield_now().await;
    viewer.dispatch(ViewerEvent::TileSettled(TileSettled {
        token,
        key: TileKey::new(SlideId::from("a"), TileCoord::new(10, 0, 0)),
        attempt: 0,
        result: Ok(Bytes::from_static(b"late")),
    }));

    let recording = recording.lock().unwrap();
    assert!(recording.loaded.is_empty());
    assert!(recording.failed.is_empty());
    assert_eq!(recording.destroyed, 1);
}

#[tokio::test]
async fn test_dropping_all_handles_unmounts_running_viewer() {
    let source = GatedDescriptorSource::new();
    let (mut viewer, _errors) = controller(source.clone(), RecordingTileFetcher::new());
    let recording = container();
    viewer.mount(recording.clone()).unwrap();

    let handle = viewer.handle();
    let second = handle.clone();
    let control = tokio::spawn(viewer.run());
    assert!(handle.select(Some(SlideId::from("1"))));

    drop(handle);
    tokio::task::yield_now().await;
    assert!(!control.is_finished());
    assert_eq!(recording.lock().unwrap().destroyed, 0);

    drop(second);
    with_timeout(control).await.unwrap();
    assert_eq!(recording.lock().unwrap().destroyed, 1);
}
