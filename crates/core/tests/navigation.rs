use frame_annotator_cache::{AnnotatorConfig, CacheStatus, FrameIndex, FramePayload};
use frame_annotator_core::{
    ChannelObserver, NavigationController, NavigationError, NavigationEvent, NavigationOutcome,
    VideoInfo,
};
use frame_annotator_scheduler::testing::ScriptedSource;
use frame_annotator_scheduler::FetchError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    source: Arc<ScriptedSource>,
    nav: Arc<NavigationController<ScriptedSource>>,
    events: UnboundedReceiver<NavigationEvent>,
}

impl Harness {
    fn new(config: AnnotatorConfig) -> Self {
        let source = Arc::new(ScriptedSource::new());
        let (observer, events) = ChannelObserver::new();
        let nav = Arc::new(NavigationController::new(
            Arc::clone(&source),
            config,
            Arc::new(observer),
        ));
        Self {
            source,
            nav,
            events,
        }
    }

    fn loaded(config: AnnotatorConfig, total_frames: u32) -> Self {
        let mut harness = Self::new(config);
        harness
            .nav
            .load_video(VideoInfo::new(total_frames, 30.0))
            .unwrap();
        harness.drain();
        harness
    }

    fn drain(&mut self) -> Vec<NavigationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn spawn_navigation(
        &self,
        target: i64,
    ) -> tokio::task::JoinHandle<Result<NavigationOutcome, NavigationError>> {
        let nav = Arc::clone(&self.nav);
        tokio::spawn(async move { nav.navigate_to(target).await })
    }
}

/// No prefetching, so every fetch is one the test asked for
fn quiet() -> AnnotatorConfig {
    AnnotatorConfig::default().with_prefetch_radius(0)
}

fn renders(events: &[NavigationEvent]) -> Vec<FrameIndex> {
    events
        .iter()
        .filter_map(|event| match event {
            NavigationEvent::RenderFrame { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

fn loading(events: &[NavigationEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|event| match event {
            NavigationEvent::LoadingChanged(loading) => Some(*loading),
            _ => None,
        })
        .collect()
}

fn errors(events: &[NavigationEvent]) -> Vec<NavigationError> {
    events
        .iter()
        .filter_map(|event| match event {
            NavigationEvent::Error(error) => Some(error.clone()),
            _ => None,
        })
        .collect()
}

fn rendered(index: FrameIndex, from_cache: bool) -> NavigationOutcome {
    NavigationOutcome::Rendered { index, from_cache }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_miss_fetches_stores_and_renders() {
    let mut h = Harness::loaded(quiet(), 100);

    assert_eq!(h.nav.navigate_to(5).await, Ok(rendered(5, false)));

    assert_eq!(
        h.drain(),
        vec![
            NavigationEvent::LoadingChanged(true),
            NavigationEvent::CacheStatus(CacheStatus {
                size: 1,
                capacity: Some(50)
            }),
            NavigationEvent::RenderFrame {
                index: 5,
                payload: ScriptedSource::payload_for(5)
            },
            NavigationEvent::LoadingChanged(false),
        ]
    );
    assert_eq!(h.nav.current_frame(), Some(5));
    assert!(h.nav.store().has(5));
    assert!(!h.nav.is_loading());
}

#[tokio::test]
async fn test_hit_renders_without_network() {
    let mut h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(5).await.unwrap();
    h.nav.navigate_to(6).await.unwrap();
    h.drain();

    assert_eq!(h.nav.navigate_to(5).await, Ok(rendered(5, true)));

    assert_eq!(
        h.drain(),
        vec![NavigationEvent::RenderFrame {
            index: 5,
            payload: ScriptedSource::payload_for(5)
        }]
    );
    assert_eq!(h.source.call_count(5), 1);
    assert_eq!(h.nav.current_frame(), Some(5));
}

#[tokio::test]
async fn test_out_of_range_is_a_noop() {
    let mut h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(10).await.unwrap();
    h.drain();

    assert_eq!(h.nav.navigate_to(-1).await, Ok(NavigationOutcome::Ignored));
    assert_eq!(h.nav.navigate_to(100).await, Ok(NavigationOutcome::Ignored));

    assert!(h.drain().is_empty());
    assert_eq!(h.source.calls(), vec![10]);
    assert_eq!(h.nav.current_frame(), Some(10));
}

#[tokio::test]
async fn test_navigation_without_video_is_ignored() {
    let mut h = Harness::new(quiet());

    assert_eq!(h.nav.navigate_to(0).await, Ok(NavigationOutcome::Ignored));
    assert!(h.drain().is_empty());
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn test_superseded_navigation_never_renders() {
    let mut h = Harness::loaded(quiet(), 100);
    h.source.hold(5);

    let first = h.spawn_navigation(5);
    h.source.wait_for_calls(1).await;

    assert_eq!(h.nav.navigate_to(8).await, Ok(rendered(8, false)));

    // The response for 5 arrives after 8 was rendered
    h.source.release_all(5);
    assert_eq!(first.await.unwrap(), Ok(NavigationOutcome::Superseded));

    let events = h.drain();
    assert_eq!(renders(&events), vec![8]);
    assert_eq!(loading(&events), vec![true, false]);
    assert!(errors(&events).is_empty());
    assert_eq!(h.nav.current_frame(), Some(8));
    assert!(!h.nav.store().has(5));
}

#[tokio::test]
async fn test_rapid_navigation_renders_only_the_last_target() {
    let mut h = Harness::loaded(quiet(), 100);
    for frame in 1..=5 {
        h.source.hold(frame);
    }

    let mut tasks = Vec::new();
    for (calls, frame) in (1..=5).enumerate() {
        tasks.push(h.spawn_navigation(i64::from(frame)));
        h.source.wait_for_calls(calls + 1).await;
    }
    for frame in 1..=5 {
        h.source.release_all(frame);
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    assert_eq!(outcomes[4], rendered(5, false));
    assert!(outcomes[..4]
        .iter()
        .all(|outcome| *outcome == NavigationOutcome::Superseded));
    assert_eq!(renders(&h.drain()), vec![5]);
    assert_eq!(h.nav.store().cached_indices(), vec![5]);
}

#[tokio::test]
async fn test_cache_hit_supersedes_pending_fetch() {
    let mut h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(2).await.unwrap();
    h.source.hold(9);
    h.drain();

    let pending = h.spawn_navigation(9);
    h.source.wait_for_calls(2).await;

    assert_eq!(h.nav.navigate_to(2).await, Ok(rendered(2, true)));
    h.source.release_all(9);
    assert_eq!(pending.await.unwrap(), Ok(NavigationOutcome::Superseded));

    let events = h.drain();
    assert_eq!(renders(&events), vec![2]);
    assert_eq!(loading(&events), vec![true, false]);
    assert_eq!(h.nav.current_frame(), Some(2));
    assert!(!h.nav.store().has(9));
}

#[tokio::test]
async fn test_failure_is_surfaced_and_frame_not_advanced() {
    let mut h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(2).await.unwrap();
    h.source.fail(3, FetchError::NotFound { index: 3 });
    h.drain();

    let expected = NavigationError::Fetch {
        index: 3,
        source: FetchError::NotFound { index: 3 },
    };
    assert_eq!(h.nav.navigate_to(3).await, Err(expected.clone()));

    assert_eq!(
        h.drain(),
        vec![
            NavigationEvent::LoadingChanged(true),
            NavigationEvent::Error(expected),
            NavigationEvent::LoadingChanged(false),
        ]
    );
    assert_eq!(h.nav.current_frame(), Some(2));
    assert!(!h.nav.store().has(3));
}

#[tokio::test]
async fn test_invalid_payload_is_not_cached_and_can_be_retried() {
    let mut h = Harness::loaded(quiet(), 100);
    h.source.respond_with(4, FramePayload::from(""));

    let result = h.nav.navigate_to(4).await;
    assert!(matches!(
        result,
        Err(NavigationError::Fetch {
            index: 4,
            source: FetchError::InvalidPayload { .. }
        })
    ));
    assert!(!h.nav.store().has(4));
    assert!(h.nav.store().is_empty());
    assert_eq!(h.nav.current_frame(), None);

    h.source.respond_with(4, ScriptedSource::payload_for(4));
    assert_eq!(h.nav.navigate_to(4).await, Ok(rendered(4, false)));
    assert_eq!(renders(&h.drain()), vec![4]);
}

#[tokio::test]
async fn test_clear_all_cancels_foreground_and_empties_cache() {
    let mut h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(1).await.unwrap();
    h.nav.navigate_to(2).await.unwrap();
    h.source.hold(3);
    h.drain();

    let pending = h.spawn_navigation(3);
    h.source.wait_for_calls(3).await;

    h.nav.clear_all();
    h.source.release_all(3);
    assert_eq!(pending.await.unwrap(), Ok(NavigationOutcome::Superseded));

    for frame in 1..=3 {
        assert!(!h.nav.store().has(frame));
    }
    let events = h.drain();
    assert!(renders(&events).is_empty());
    assert!(events.contains(&NavigationEvent::CacheStatus(CacheStatus {
        size: 0,
        capacity: Some(50)
    })));
    assert_eq!(loading(&events), vec![true, false]);
}

#[tokio::test]
async fn test_clear_all_discards_late_prefetch_results() {
    let h = Harness::loaded(AnnotatorConfig::default().with_prefetch_radius(3), 100);
    for frame in [7, 8, 9, 11, 12, 13] {
        h.source.hold(frame);
    }

    assert_eq!(h.nav.navigate_to(10).await, Ok(rendered(10, false)));
    h.source.wait_for_calls(7).await;

    h.nav.clear_all();
    for frame in [7, 8, 9, 11, 12, 13] {
        h.source.release_all(frame);
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(h.nav.store().is_empty());
    assert_eq!(h.nav.prefetcher().stats().stored, 0);
}

#[tokio::test]
async fn test_prefetch_failures_are_silent() {
    let mut h = Harness::loaded(AnnotatorConfig::default().with_prefetch_radius(2), 100);
    for frame in [8, 9, 11, 12] {
        h.source.fail(
            frame,
            FetchError::Server {
                status: 500,
                message: "Could not read frame".into(),
            },
        );
    }

    assert_eq!(h.nav.navigate_to(10).await, Ok(rendered(10, false)));
    let prefetcher = Arc::clone(h.nav.prefetcher());
    wait_until(|| prefetcher.in_flight() == 0).await;

    let events = h.drain();
    assert_eq!(loading(&events), vec![true, false]);
    assert!(errors(&events).is_empty());
    assert_eq!(renders(&events), vec![10]);
    assert_eq!(prefetcher.stats().failed, 4);
    assert_eq!(h.nav.store().cached_indices(), vec![10]);
}

#[tokio::test]
async fn test_prefetched_neighbours_become_cache_hits() {
    let mut h = Harness::loaded(AnnotatorConfig::default().with_prefetch_radius(2), 100);

    h.nav.navigate_to(10).await.unwrap();
    let store = Arc::clone(h.nav.store());
    wait_until(|| [8, 9, 11, 12].iter().all(|&frame| store.has(frame))).await;
    h.drain();

    assert_eq!(h.nav.step(1).await, Ok(rendered(11, true)));
    assert!(loading(&h.drain()).is_empty());
    assert_eq!(h.source.call_count(11), 1);
}

#[tokio::test]
async fn test_prefetch_never_evicts_the_current_frame() {
    let h = Harness::loaded(
        AnnotatorConfig::default()
            .with_max_frames(3)
            .with_prefetch_radius(5),
        100,
    );

    h.nav.navigate_to(10).await.unwrap();
    let prefetcher = Arc::clone(h.nav.prefetcher());
    wait_until(|| prefetcher.in_flight() == 0).await;

    assert!(h.nav.store().has(10));
    assert_eq!(h.nav.store().size(), 3);
    assert!(prefetcher.stats().stored >= 2);
}

#[tokio::test]
async fn test_single_frame_cache_keeps_the_current_frame() {
    let h = Harness::loaded(
        AnnotatorConfig::default()
            .with_max_frames(1)
            .with_prefetch_radius(1),
        100,
    );

    assert_eq!(h.nav.navigate_to(10).await, Ok(rendered(10, false)));
    let prefetcher = Arc::clone(h.nav.prefetcher());
    wait_until(|| prefetcher.stats().skipped == 2).await;

    assert_eq!(h.source.call_count(9), 1);
    assert_eq!(h.source.call_count(11), 1);
    assert_eq!(h.nav.store().cached_indices(), vec![10]);
    assert_eq!(prefetcher.stats().stored, 0);
    assert_eq!(h.nav.navigate_to(10).await, Ok(rendered(10, true)));
}

#[tokio::test]
async fn test_bulk_preload_sweeps_the_video() {
    let mut h = Harness::new(
        AnnotatorConfig::default()
            .with_unbounded_cache()
            .with_bulk_preload(4),
    );

    h.nav.load_video(VideoInfo::new(10, 25.0)).unwrap();
    h.nav.prefetcher().join_sweep().await;

    assert_eq!(h.nav.store().size(), 10);
    let progress: Vec<u32> = h
        .drain()
        .iter()
        .filter_map(|event| match event {
            NavigationEvent::PrefetchProgress(progress) => Some(progress.completed),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![4, 8, 10]);

    assert_eq!(h.nav.navigate_to(7).await, Ok(rendered(7, true)));
    assert_eq!(h.source.call_count(7), 1);
}

#[tokio::test]
async fn test_foreground_not_blocked_by_sweep() {
    let h = Harness::new(
        AnnotatorConfig::default()
            .with_unbounded_cache()
            .with_bulk_preload(2),
    );
    h.source.hold(0);
    h.source.hold(1);

    h.nav.load_video(VideoInfo::new(100, 25.0)).unwrap();
    h.source.wait_for_calls(2).await;
    assert!(h.nav.prefetcher().is_sweeping());

    assert_eq!(h.nav.navigate_to(50).await, Ok(rendered(50, false)));
    // Windowed top-up is suppressed while the sweep runs
    assert_eq!(h.source.call_count(51), 0);
    assert_eq!(h.source.call_count(49), 0);

    h.nav.page_unloading();
    assert!(!h.nav.prefetcher().is_sweeping());
    h.source.release_all(0);
    h.source.release_all(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.nav.store().is_empty());
}

#[tokio::test]
async fn test_new_video_halts_running_sweep() {
    let mut h = Harness::new(
        AnnotatorConfig::default()
            .with_unbounded_cache()
            .with_bulk_preload(2),
    );
    h.source.hold(0);
    h.source.hold(1);

    h.nav.load_video(VideoInfo::new(100, 25.0)).unwrap();
    h.source.wait_for_calls(2).await;

    h.nav.load_video(VideoInfo::new(6, 25.0)).unwrap();
    h.source.wait_for_calls(4).await;
    h.source.release_all(0);
    h.source.release_all(1);
    h.nav.prefetcher().join_sweep().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.nav.store().cached_indices(), vec![0, 1, 2, 3, 4, 5]);
    let progress: Vec<(u32, u32)> = h
        .drain()
        .iter()
        .filter_map(|event| match event {
            NavigationEvent::PrefetchProgress(progress) => {
                Some((progress.completed, progress.total))
            }
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(2, 6), (4, 6), (6, 6)]);
    assert_eq!(h.source.call_count(6), 0);
}

#[tokio::test]
async fn test_load_video_resets_session() {
    let h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(3).await.unwrap();

    h.nav.load_video(VideoInfo::new(20, 30.0)).unwrap();

    assert!(h.nav.store().is_empty());
    assert_eq!(h.nav.current_frame(), None);
    assert_eq!(h.nav.step(1).await, Ok(NavigationOutcome::Ignored));
    assert_eq!(h.nav.navigate_to(50).await, Ok(NavigationOutcome::Ignored));
}

#[tokio::test]
async fn test_empty_video_is_rejected() {
    let h = Harness::new(quiet());

    assert_eq!(
        h.nav.load_video(VideoInfo::new(0, 30.0)),
        Err(NavigationError::EmptyVideo)
    );
    assert_eq!(h.nav.navigate_to(0).await, Ok(NavigationOutcome::Ignored));
}

#[tokio::test]
async fn test_relative_navigation() {
    let h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(5).await.unwrap();

    assert_eq!(h.nav.step(1).await, Ok(rendered(6, false)));
    assert_eq!(h.nav.step(-10).await, Ok(NavigationOutcome::Ignored));
    assert_eq!(h.nav.current_frame(), Some(6));
    assert_eq!(h.nav.first().await, Ok(rendered(0, false)));
    assert_eq!(h.nav.last().await, Ok(rendered(99, false)));
    assert_eq!(h.nav.step(1).await, Ok(NavigationOutcome::Ignored));
}

#[tokio::test]
async fn test_page_lifecycle_hooks() {
    let h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(1).await.unwrap();

    assert!(!h.nav.page_hidden());
    assert!(h.nav.store().has(1));

    h.nav.page_unloading();
    assert!(!h.nav.store().has(1));

    let h = Harness::loaded(quiet().with_clear_on_hide(true), 100);
    h.nav.navigate_to(1).await.unwrap();
    assert!(h.nav.page_hidden());
    assert!(h.nav.store().is_empty());
}

#[tokio::test]
async fn test_key_release_cancels_pending_fetch() {
    let mut h = Harness::loaded(quiet(), 100);
    h.nav.navigate_to(6).await.unwrap();
    h.source.hold(7);
    h.drain();

    let pending = h.spawn_navigation(7);
    h.source.wait_for_calls(2).await;

    assert_eq!(h.nav.key_released(), Some(7));
    assert_eq!(pending.await.unwrap(), Ok(NavigationOutcome::Superseded));

    let events = h.drain();
    assert_eq!(loading(&events), vec![true, false]);
    assert!(errors(&events).is_empty());
    assert!(renders(&events).is_empty());
    assert_eq!(h.nav.current_frame(), Some(6));
    assert_eq!(h.nav.key_released(), None);
}

#[tokio::test]
async fn test_frame_time_uses_video_fps() {
    let h = Harness::loaded(quiet(), 300);
    assert_eq!(h.nav.frame_time(60), Some(2.0));
    assert_eq!(h.nav.video().map(|v| v.total_frames), Some(300));
}
