use std::sync::Arc;

use async_trait::async_trait;
use tilescope::prelude::*;
use tilescope::rendering::decode::RawRgbaDecoder;

const TILE: u32 = 4;
const MAX_LEVEL: u8 = 3;

/// Flat-colored tiles for every key of a 32px square image.
fn full_pack() -> PackHandle {
    let mut builder = TilePackBuilder::new(TILE);
    for level in 0..=MAX_LEVEL {
        let n = 1u32 << level;
        for y in 0..n {
            for x in 0..n {
                let bitmap = Bitmap::solid(TILE, TILE, [level * 60, x as u8, y as u8, 255]);
                builder
                    .add(TileKey::new(level, x, y), RawRgbaDecoder::encode(&bitmap))
                    .unwrap();
            }
        }
    }
    PackHandle::from_bytes(builder.build().unwrap()).unwrap()
}

fn grid() -> PyramidGrid {
    PyramidGrid::square(TILE, 0, MAX_LEVEL)
}

fn view(zoom: f64, x: f64, y: f64) -> ViewState {
    ViewState::new(zoom, Point::new(x, y), 8.0, 8.0).with_pyramid(TILE, MAX_LEVEL)
}

struct Harness {
    engine: TileEngine,
    spawner: ManualSpawner,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(builder: TileEngineBuilder) -> Self {
        let spawner = ManualSpawner::new();
        let clock = Arc::new(ManualClock::new(0.0));
        let engine = builder
            .with_decoder(Arc::new(RawRgbaDecoder))
            .with_spawner(Arc::new(spawner.clone()))
            .with_clock(clock.clone())
            .with_concurrency(8)
            .build(TileSource::pack(full_pack()), grid())
            .unwrap();
        Self { engine, spawner, clock }
    }

    fn standard() -> Self {
        Self::new(TileEngine::builder())
    }

    /// Tick and let every spawned decode finish, `frames` times.
    fn settle(&mut self, view: &ViewState, frames: usize) -> FrameOutput {
        let mut last = self.engine.tick(view);
        for _ in 1..frames {
            self.spawner.run_until_stalled();
            self.clock.advance(16.0);
            last = self.engine.tick(view);
        }
        last
    }
}

#[test]
fn test_fractional_zoom_blends_next_level() {
    println!("🧪 [TEST] Fractional zoom blends the next level over the base");
    let mut h = Harness::standard();
    let out = h.settle(&view(2.5, 16.0, 16.0), 6);

    assert_eq!(out.plan.base_level, 2);
    assert_eq!(out.draws().levels(), vec![2, 3]);
    for cmd in out.draws().for_level(2) {
        assert_eq!(cmd.alpha, 1.0);
        assert_eq!(cmd.filter, FilterMode::HighQuality);
    }
    for cmd in out.draws().for_level(3) {
        assert!((cmd.alpha - 0.5).abs() < 1e-6);
        assert_eq!(cmd.filter, FilterMode::Linear);
    }
    assert_eq!(out.plan.coverage_of(2), Some(1.0));
}

#[test]
fn test_coarser_level_fills_gaps_while_base_loads() {
    println!("🧪 [TEST] Backfill from a coarser level while the base level is missing");
    let mut h = Harness::standard();
    h.settle(&view(1.0, 16.0, 16.0), 3);

    // Nothing at level 2 has been decoded yet.
    let out = h.engine.tick(&view(2.0, 16.0, 16.0));
    assert_eq!(out.plan.coverage_of(2), Some(0.0));
    assert!(!out.draws().is_empty());
    assert!(out.draws().iter().all(|cmd| cmd.level == 1));
    assert!(out.draws().iter().all(|cmd| cmd.alpha == 1.0));
    assert!(out.requested > 0);

    h.spawner.run_until_stalled();
    let out = h.engine.tick(&view(2.0, 16.0, 16.0));
    assert_eq!(out.draws().levels(), vec![2]);
}

#[test]
fn test_panning_keeps_ready_tiles_within_capacity() {
    println!("🧪 [TEST] Eviction bounds the cache while panning");
    let config = SchedulerConfig {
        cache_capacity: 8,
        texture_pool_size: 2,
        prefetch_radius: 0,
        ..SchedulerConfig::default()
    };
    let mut h = Harness::new(TileEngine::builder().with_config(config));

    let mut last = None;
    for step in 0..8 {
        let x = 2.0 + step as f64 * 4.0;
        let out = h.settle(&view(3.0, x, 16.0), 3);
        let ready = h.engine.cache().iter().filter(|(_, r)| r.is_ready()).count();
        assert!(ready <= 8, "step {step}: {ready} ready tiles");
        last = Some(out);
    }
    assert_eq!(last.unwrap().plan.coverage_of(3), Some(1.0));
}

#[test]
fn test_draws_outlive_end_of_frame_eviction() {
    println!("🧪 [TEST] Textures in a frame's draw plan survive that frame's eviction");
    let config = SchedulerConfig {
        cache_capacity: 4,
        texture_pool_size: 0,
        prefetch_radius: 0,
        ..SchedulerConfig::default()
    };
    let mut h = Harness::new(TileEngine::builder().with_config(config));
    let wide = ViewState::new(3.0, Point::new(16.0, 16.0), 12.0, 12.0).with_pyramid(TILE, MAX_LEVEL);

    let out = h.settle(&wide, 8);
    assert_eq!(out.plan.coverage_of(3), Some(1.0));
    assert!(out.draws().len() > 4, "view should need more tiles than the cache holds");
    for cmd in out.draws().iter() {
        let record = h.engine.cache().get(&cmd.key);
        assert_eq!(record.and_then(|r| r.texture()), Some(cmd.texture), "tile {} lost its texture", cmd.key);
    }

    h.spawner.run_until_stalled();
    let again = h.engine.tick(&wide);
    assert_eq!(again.requested, 0);
    assert_eq!(again.plan.coverage_of(3), Some(1.0));
}

/// Serves the pack but fails one tile.
struct FlakyFetcher {
    inner: TileSource,
    broken: TileKey,
}

#[async_trait]
impl TileFetcher for FlakyFetcher {
    async fn fetch(&self, task: &RequestTask) -> tilescope::Result<Vec<u8>> {
        if task.key == self.broken {
            return Err(TileError::NotFound(task.key.to_string()));
        }
        self.inner.fetch(task).await
    }
}

#[test]
fn test_failed_tile_is_not_requested_again() {
    println!("🧪 [TEST] A failed tile stays failed until the source changes");
    let broken = TileKey::new(0, 0, 0);
    let fetcher = FlakyFetcher {
        inner: TileSource::pack(full_pack()),
        broken,
    };
    let mut h = Harness::new(TileEngine::builder().with_fetcher(Arc::new(fetcher)));

    h.settle(&view(0.0, 16.0, 16.0), 3);
    assert!(h.engine.cache().get(&broken).is_some_and(|r| r.is_error()));

    let out = h.engine.tick(&view(0.0, 16.0, 16.0));
    assert_eq!(out.requested, 0);
    assert!(out.plan.requests.iter().all(|r| r.key != broken));
    assert_eq!(h.engine.stats().pending_loads, 0);

    h.engine.set_source(TileSource::pack(full_pack()), grid());
    assert!(h.engine.cache().get(&broken).is_none());
}

#[test]
fn test_animation_requests_frames_until_done() {
    println!("🧪 [TEST] A running animation keeps asking for frames");
    let mut h = Harness::standard();
    h.settle(&view(1.0, 16.0, 16.0), 3);

    let before = h.clock.frame_requests();
    h.engine.animate_to(3.0, Point::new(8.0, 24.0), 64.0);
    let mut frames = 0;
    while h.engine.is_animating() {
        h.clock.advance(16.0);
        let out = h.engine.tick(&view(1.0, 16.0, 16.0));
        assert!(out.moving || !h.engine.is_animating());
        h.spawner.run_until_stalled();
        frames += 1;
        assert!(frames < 10, "animation never finished");
    }
    assert!(h.clock.frame_requests() > before);
    assert_eq!(h.engine.view().zoom, 3.0);
    assert_eq!(h.engine.view().center, Point::new(8.0, 24.0));
}

#[test]
fn test_manual_enqueue_and_cancel() {
    println!("🧪 [TEST] Explicit enqueue and cancel_unwanted");
    let spawner = ManualSpawner::new();
    let mut engine = TileEngine::builder()
        .with_decoder(Arc::new(RawRgbaDecoder))
        .with_spawner(Arc::new(spawner.clone()))
        .with_clock(Arc::new(ManualClock::new(0.0)))
        .with_concurrency(2)
        .build(TileSource::pack(full_pack()), grid())
        .unwrap();

    assert!(engine.enqueue(3, 1, 1, 0));
    assert!(!engine.enqueue(3, 1, 1, 0));
    assert!(!engine.enqueue(3, 8, 0, 0));
    assert!(!engine.enqueue(3, -1, 0, 0));
    assert!(engine.enqueue(3, 2, 2, 0));
    assert!(engine.enqueue(3, 3, 3, 0));
    assert_eq!(engine.stats().pending_loads + engine.stats().queued_requests, 3);

    let mut wanted = HashSet::default();
    wanted.insert(TileKey::new(3, 1, 1));
    engine.cancel_unwanted(&wanted);
    let stats = engine.stats();
    assert_eq!(stats.pending_loads + stats.queued_requests, 1);

    spawner.run_until_stalled();
    let plan = engine.build_draw_plan(&view(3.0, 6.0, 6.0));
    assert!(plan.is_empty(), "completions are only applied by tick");
}

#[cfg(feature = "tokio-runtime")]
#[test]
fn test_default_spawner_without_ambient_runtime() {
    println!("🧪 [TEST] Loads make progress with no spawner and no entered runtime");
    let mut engine = TileEngine::builder()
        .with_decoder(Arc::new(RawRgbaDecoder))
        .build(TileSource::pack(full_pack()), grid())
        .unwrap();

    let view = view(1.0, 16.0, 16.0);
    let mut covered = false;
    for _ in 0..500 {
        let out = engine.tick(&view);
        if out.plan.coverage_of(1) == Some(1.0) {
            covered = true;
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert!(covered, "loads never completed: {:?}", engine.stats());
}

#[cfg(feature = "tokio-runtime")]
#[test]
fn test_unreachable_http_source_fails_tiles() {
    println!("🧪 [TEST] HTTP fetches from a plain executor fail instead of panicking");
    let spawner = ManualSpawner::new();
    let mut engine = TileEngine::builder()
        .with_decoder(Arc::new(RawRgbaDecoder))
        .with_spawner(Arc::new(spawner.clone()))
        .with_clock(Arc::new(ManualClock::new(0.0)))
        .build(TileSource::template("http://127.0.0.1:9/{z}/{x}/{y}.raw"), grid())
        .unwrap();

    let view = view(0.0, 16.0, 16.0);
    engine.tick(&view);
    for _ in 0..500 {
        spawner.run_until_stalled();
        engine.tick(&view);
        if engine.stats().pending_loads == 0 && engine.stats().queued_requests == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(engine.stats().pending_loads, 0);
    assert!(engine.cache().len() > 0);
    assert!(engine.cache().iter().all(|(_, record)| record.is_error()));
}

#[cfg(feature = "tokio-runtime")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_runtime_end_to_end() {
    println!("🧪 [TEST] Decodes run on the ambient tokio runtime");
    let mut engine = TileEngine::builder()
        .with_decoder(Arc::new(RawRgbaDecoder))
        .build(TileSource::pack(full_pack()), grid())
        .unwrap();

    let view = view(2.0, 16.0, 16.0);
    let mut covered = false;
    for _ in 0..200 {
        let out = engine.tick(&view);
        if out.plan.coverage_of(2) == Some(1.0) {
            covered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(covered, "level 2 never became fully ready");
    println!("✅ [TEST] stats: {:?}", engine.stats());
}
