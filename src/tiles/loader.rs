//! Bounded-concurrency fetch → decode → upload pipeline.
//!
//! Fetch and decode run as spawned futures. Their results travel back over a
//! channel and are applied on the render tick by
//! [`poll_completions`](LoaderBackend::poll_completions), which is the only
//! place textures are created or written.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;

use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::FutureExt;

use crate::core::config::SchedulerConfig;
use crate::core::geo::TileKey;
use crate::prelude::{Arc, HashMap, HashSet};
use crate::rendering::decode::Bitmap;
use crate::rendering::texture::TextureId;
use crate::runtime::{run_blocking, spawn_on, AsyncHandle, AsyncSpawner};
use crate::tiles::cancel::CancellationToken;
use crate::tiles::queue::RequestTask;
use crate::traits::{CacheBackend, ClockSource, ImageDecoder, LoaderBackend, TileFetcher};
use crate::Error;

/// How a load ended.
#[derive(Debug)]
enum Outcome {
    Ready(Bitmap),
    Failed(Error),
    Cancelled,
}

struct Completion {
    key: TileKey,
    generation: u64,
    outcome: Outcome,
}

/// Bookkeeping for a key that is queued for decode or in flight.
struct ActiveLoad {
    generation: u64,
    token: CancellationToken,
    /// `None` while the task still waits in the decode queue
    handle: Option<Box<dyn AsyncHandle>>,
}

struct QueuedDecode {
    task: RequestTask,
    generation: u64,
}

pub struct TileLoader {
    spawner: Arc<dyn AsyncSpawner>,
    fetcher: Arc<dyn TileFetcher>,
    decoder: Arc<dyn ImageDecoder>,
    decode_queue: Vec<QueuedDecode>,
    active: HashMap<TileKey, ActiveLoad>,
    mipmap_queue: VecDeque<(TileKey, TextureId)>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    next_generation: u64,
    base_concurrency: usize,
    mipmap_budget_ms: f64,
}

impl TileLoader {
    pub fn new(
        config: &SchedulerConfig,
        spawner: Arc<dyn AsyncSpawner>,
        fetcher: Arc<dyn TileFetcher>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            spawner,
            fetcher,
            decoder,
            decode_queue: Vec::new(),
            active: HashMap::default(),
            mipmap_queue: VecDeque::new(),
            tx,
            rx,
            next_generation: 0,
            base_concurrency: config.base_concurrency(),
            mipmap_budget_ms: config.mipmap_budget_ms,
        }
    }

    /// Override the hardware-derived concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.base_concurrency = concurrency.max(1);
        self
    }

    /// Swap the byte source. Loads already in flight keep the old one.
    pub fn set_fetcher(&mut self, fetcher: Arc<dyn TileFetcher>) {
        self.fetcher = fetcher;
    }

    /// Simultaneous decodes allowed; halved while the view moves.
    pub fn concurrency(&self, moving: bool) -> usize {
        if moving {
            (self.base_concurrency / 2).max(1)
        } else {
            self.base_concurrency
        }
    }

    pub fn in_flight(&self) -> usize {
        self.active.values().filter(|load| load.handle.is_some()).count()
    }

    pub fn queued(&self) -> usize {
        self.decode_queue.len()
    }

    pub fn pending_mipmaps(&self) -> usize {
        self.mipmap_queue.len()
    }

    fn process_queue(&mut self, moving: bool) {
        if self.decode_queue.is_empty() {
            return;
        }
        let bound = self.concurrency(moving);
        let mut in_flight = self.in_flight();
        if in_flight >= bound {
            return;
        }

        // Stable: equal priorities keep their arrival order.
        self.decode_queue.sort_by_key(|queued| queued.task.priority);
        let take = (bound - in_flight).min(self.decode_queue.len());
        let admitted: Vec<QueuedDecode> = self.decode_queue.drain(..take).collect();
        for queued in admitted {
            self.dispatch(queued);
            in_flight += 1;
        }
        log::trace!("decodes in flight: {}/{}", in_flight, bound);
    }

    fn dispatch(&mut self, queued: QueuedDecode) {
        let QueuedDecode { task, generation } = queued;
        let Some(load) = self.active.get_mut(&task.key) else {
            return;
        };
        let key = task.key;
        let token = load.token.clone();
        let fetcher = self.fetcher.clone();
        let decoder = self.decoder.clone();
        let tx = self.tx.clone();

        log::trace!("fetching tile {} from {}", key, task.url);
        let handle = spawn_on(self.spawner.as_ref(), async move {
            let load = async move {
                if token.is_cancelled() {
                    return Outcome::Cancelled;
                }
                let bytes = match fetcher.fetch(&task).await {
                    Ok(_) if token.is_cancelled() => return Outcome::Cancelled,
                    Ok(bytes) => bytes,
                    Err(e) => return Outcome::Failed(e),
                };
                match run_blocking(move || decoder.decode(&bytes)).await.and_then(|decoded| decoded) {
                    Ok(bitmap) => Outcome::Ready(bitmap),
                    Err(e) => Outcome::Failed(e),
                }
            };
            // A panicking fetcher or decoder still has to release its slot.
            let outcome = AssertUnwindSafe(load).catch_unwind().await.unwrap_or_else(|_| {
                log::error!("load of tile {} panicked", key);
                Outcome::Failed(Error::Runtime(format!("load of tile {} panicked", key)))
            });
            // The loader may be gone already; nothing to report to then.
            let _ = tx.send(Completion {
                key,
                generation,
                outcome,
            });
        });
        load.handle = Some(handle);
    }

    /// Drop the pending/in-flight bookkeeping of `key`, if it still belongs
    /// to `generation`. Every exit path (ready, failed, cancelled) goes
    /// through here exactly once.
    fn release(&mut self, key: &TileKey, generation: u64) -> Option<ActiveLoad> {
        if self.active.get(key)?.generation != generation {
            return None;
        }
        let load = self.active.remove(key)?;
        if load.handle.is_none() {
            self.decode_queue.retain(|queued| queued.generation != generation);
        }
        Some(load)
    }

    fn finish(
        &mut self,
        key: TileKey,
        generation: u64,
        outcome: Outcome,
        cache: &mut dyn CacheBackend,
        frame: u64,
    ) -> bool {
        let Some(load) = self.release(&key, generation) else {
            log::trace!("dropping stale result for tile {}", key);
            return false;
        };
        let outcome = match outcome {
            Outcome::Ready(_) if load.token.is_cancelled() => Outcome::Cancelled,
            other => other,
        };

        match outcome {
            Outcome::Ready(bitmap) => match self.upload(&bitmap, cache) {
                Ok(texture) => {
                    cache.set_ready(key, texture, bitmap.width, bitmap.height, frame);
                    self.mipmap_queue.push_back((key, texture));
                    log::trace!("tile {} ready ({}x{})", key, bitmap.width, bitmap.height);
                }
                Err(e) => {
                    log::warn!("tile {} failed to upload: {}", key, e);
                    cache.set_error(key);
                }
            },
            Outcome::Failed(e) => {
                log::warn!("tile {} failed: {}", key, e);
                cache.set_error(key);
            }
            Outcome::Cancelled => {
                log::trace!("tile {} cancelled", key);
                cache.discard_loading(&key);
            }
        }
        true
    }

    fn upload(&mut self, bitmap: &Bitmap, cache: &mut dyn CacheBackend) -> crate::Result<TextureId> {
        let texture = cache.acquire_texture()?;
        if let Err(e) = cache.upload_texture(texture, bitmap) {
            cache.release_texture(texture);
            return Err(e);
        }
        Ok(texture)
    }
}

impl LoaderBackend for TileLoader {
    fn has_capacity(&self, moving: bool) -> bool {
        self.decode_queue.len() + self.in_flight() < self.concurrency(moving)
    }

    fn is_pending(&self, key: &TileKey) -> bool {
        self.active.contains_key(key)
    }

    fn start(&mut self, task: RequestTask, cache: &mut dyn CacheBackend, moving: bool) {
        let key = task.key;
        if let Some(old) = self.active.get(&key).map(|load| load.generation) {
            log::trace!("tile {} superseded by a newer load", key);
            if let Some(load) = self.release(&key, old) {
                load.token.cancel();
                if let Some(handle) = load.handle {
                    handle.cancel();
                }
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        cache.set_loading(key);
        self.active.insert(
            key,
            ActiveLoad {
                generation,
                token: CancellationToken::new(),
                handle: None,
            },
        );
        self.decode_queue.push(QueuedDecode { task, generation });
        self.process_queue(moving);
    }

    fn cancel(&mut self, key: &TileKey, cache: &mut dyn CacheBackend) -> bool {
        let Some(load) = self.active.get(key) else {
            return false;
        };
        load.token.cancel();
        if let Some(handle) = &load.handle {
            handle.cancel();
        }
        let generation = load.generation;
        self.finish(*key, generation, Outcome::Cancelled, cache, 0)
    }

    fn cancel_unwanted(&mut self, wanted: &HashSet<TileKey>, cache: &mut dyn CacheBackend) -> usize {
        let unwanted: Vec<TileKey> = self
            .active
            .keys()
            .filter(|key| !wanted.contains(key))
            .copied()
            .collect();
        let cancelled = unwanted.iter().filter(|key| self.cancel(key, cache)).count();
        if cancelled > 0 {
            log::debug!("cancelled {} loads no longer wanted", cancelled);
        }
        cancelled
    }

    fn poll_completions(&mut self, cache: &mut dyn CacheBackend, frame: u64, moving: bool) -> usize {
        let mut applied = 0;
        while let Ok(done) = self.rx.try_recv() {
            if self.finish(done.key, done.generation, done.outcome, cache, frame) {
                applied += 1;
            }
        }
        self.process_queue(moving);
        applied
    }

    fn process_mipmaps(&mut self, cache: &mut dyn CacheBackend, clock: &dyn ClockSource, idle: bool) -> usize {
        if !idle {
            return 0;
        }
        let started = clock.now_ms();
        let mut done = 0;
        while let Some((key, texture)) = self.mipmap_queue.pop_front() {
            // The texture may have been recycled for another tile since.
            if cache.get(&key).and_then(|r| r.texture()) != Some(texture) {
                continue;
            }
            if let Err(e) = cache.generate_mipmaps(texture) {
                log::warn!("mipmaps for tile {} failed: {}", key, e);
            }
            done += 1;
            if clock.now_ms() - started >= self.mipmap_budget_ms {
                break;
            }
        }
        done
    }

    fn pending_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::decode::RawRgbaDecoder;
    use crate::rendering::texture::MemoryTextureSurface;
    use crate::runtime::ManualSpawner;
    use crate::tiles::cache::TileCache;
    use crate::traits::ManualClock;
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SolidFetcher {
        calls: AtomicUsize,
        fail: HashSet<TileKey>,
    }

    #[async_trait]
    impl TileFetcher for SolidFetcher {
        async fn fetch(&self, task: &RequestTask) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.contains(&task.key) {
                return Err(Error::NotFound(task.key.to_string()));
            }
            Ok(RawRgbaDecoder::encode(&Bitmap::solid(4, 4, [task.key.x as u8, 0, 0, 255])))
        }
    }

    fn setup(concurrency: usize, fail: &[TileKey]) -> (TileLoader, TileCache, ManualSpawner, Arc<SolidFetcher>) {
        let spawner = ManualSpawner::new();
        let fetcher = Arc::new(SolidFetcher {
            calls: AtomicUsize::new(0),
            fail: fail.iter().copied().collect(),
        });
        let loader = TileLoader::new(
            &SchedulerConfig::default(),
            Arc::new(spawner.clone()),
            fetcher.clone(),
            Arc::new(RawRgbaDecoder),
        )
        .with_concurrency(concurrency);
        let cache = TileCache::new(64, 8, 4, Box::new(MemoryTextureSurface::new()));
        (loader, cache, spawner, fetcher)
    }

    fn task(x: u32) -> RequestTask {
        RequestTask::new(TileKey::new(3, x, 0), 0, format!("mem://3/{x}/0"))
    }

    #[test]
    fn test_load_reaches_ready() {
        let (mut loader, mut cache, spawner, fetcher) = setup(4, &[]);
        loader.start(task(1), &mut cache, false);
        assert!(cache.get(&task(1).key).unwrap().is_loading());
        assert!(loader.is_pending(&task(1).key));

        // Nothing is applied until the tick polls.
        spawner.run_until_stalled();
        assert!(cache.get(&task(1).key).unwrap().is_loading());

        assert_eq!(loader.poll_completions(&mut cache, 9, false), 1);
        let record = cache.get(&task(1).key).unwrap();
        assert!(record.is_ready());
        assert_eq!(record.last_used_frame, Some(9));
        assert_eq!(loader.pending_count(), 0);
        assert_eq!(loader.pending_mipmaps(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    struct PanickingDecoder;

    impl ImageDecoder for PanickingDecoder {
        fn decode(&self, _bytes: &[u8]) -> Result<Bitmap> {
            panic!("corrupt tile");
        }
    }

    #[test]
    fn test_panicking_decode_becomes_error() {
        let spawner = ManualSpawner::new();
        let fetcher = Arc::new(SolidFetcher {
            calls: AtomicUsize::new(0),
            fail: HashSet::default(),
        });
        let mut loader = TileLoader::new(
            &SchedulerConfig::default(),
            Arc::new(spawner.clone()),
            fetcher,
            Arc::new(PanickingDecoder),
        );
        let mut cache = TileCache::new(64, 8, 4, Box::new(MemoryTextureSurface::new()));

        loader.start(task(5), &mut cache, false);
        spawner.run_until_stalled();
        assert_eq!(loader.poll_completions(&mut cache, 1, false), 1);
        assert!(cache.get(&task(5).key).unwrap().is_error());
        assert_eq!(loader.pending_count(), 0);
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn test_failure_is_terminal_error() {
        let (mut loader, mut cache, spawner, _) = setup(4, &[task(2).key]);
        loader.start(task(2), &mut cache, false);
        spawner.run_until_stalled();
        loader.poll_completions(&mut cache, 1, false);
        let record = cache.get(&task(2).key).unwrap();
        assert!(record.is_error());
        assert_eq!(record.texture(), None);
    }

    #[test]
    fn test_concurrency_bound_and_halving() {
        let (mut loader, mut cache, spawner, _) = setup(4, &[]);
        assert_eq!(loader.concurrency(true), 2);

        for x in 0..3 {
            loader.start(task(x), &mut cache, true);
        }
        assert_eq!(loader.in_flight(), 2);
        assert_eq!(loader.queued(), 1);
        assert!(!loader.has_capacity(true));

        spawner.run_until_stalled();
        loader.poll_completions(&mut cache, 1, true);
        // The queued decode took a freed slot.
        assert_eq!(loader.in_flight(), 1);
        assert_eq!(loader.queued(), 0);
        assert!(loader.has_capacity(false));
    }

    #[test]
    fn test_cancel_queued_task_releases_bookkeeping() {
        let (mut loader, mut cache, spawner, fetcher) = setup(1, &[]);
        loader.start(task(0), &mut cache, false);
        loader.start(task(1), &mut cache, false);
        assert_eq!(loader.queued(), 1);

        assert!(loader.cancel(&task(1).key, &mut cache));
        assert_eq!(loader.queued(), 0);
        assert!(!loader.is_pending(&task(1).key));
        assert!(cache.get(&task(1).key).is_none());
        assert!(!loader.cancel(&task(1).key, &mut cache));

        spawner.run_until_stalled();
        loader.poll_completions(&mut cache, 1, false);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn test_cancel_in_flight_discards_result() {
        let (mut loader, mut cache, spawner, _) = setup(2, &[]);
        loader.start(task(0), &mut cache, false);
        assert_eq!(loader.in_flight(), 1);

        let wanted = HashSet::default();
        assert_eq!(loader.cancel_unwanted(&wanted, &mut cache), 1);
        assert_eq!(loader.in_flight(), 0);

        spawner.run_until_stalled();
        assert_eq!(loader.poll_completions(&mut cache, 1, false), 0);
        assert!(cache.get(&task(0).key).is_none());
    }

    #[test]
    fn test_restart_supersedes_in_flight_load() {
        let (mut loader, mut cache, spawner, _) = setup(4, &[]);
        loader.start(task(5), &mut cache, false);
        loader.start(task(5), &mut cache, false);
        assert_eq!(loader.pending_count(), 1);
        assert_eq!(loader.in_flight(), 1);

        spawner.run_until_stalled();
        // Only the newer generation lands.
        assert_eq!(loader.poll_completions(&mut cache, 2, false), 1);
        assert!(cache.get(&task(5).key).unwrap().is_ready());
    }

    #[test]
    fn test_texture_slot_exhaustion_marks_error() {
        let spawner = ManualSpawner::new();
        let fetcher = Arc::new(SolidFetcher {
            calls: AtomicUsize::new(0),
            fail: HashSet::default(),
        });
        let mut loader = TileLoader::new(
            &SchedulerConfig::default(),
            Arc::new(spawner.clone()),
            fetcher,
            Arc::new(RawRgbaDecoder),
        );
        let mut cache = TileCache::new(64, 8, 4, Box::new(MemoryTextureSurface::with_slot_limit(1)));

        loader.start(task(0), &mut cache, false);
        loader.start(task(1), &mut cache, false);
        spawner.run_until_stalled();
        loader.poll_completions(&mut cache, 1, false);

        let states: Vec<bool> = [0, 1].iter().map(|x| cache.get(&task(*x).key).unwrap().is_ready()).collect();
        assert_eq!(states.iter().filter(|ready| **ready).count(), 1);
        assert_eq!(states.iter().filter(|ready| !**ready).count(), 1);
    }

    #[test]
    fn test_mipmaps_wait_for_idle() {
        let (mut loader, mut cache, spawner, _) = setup(4, &[]);
        let clock = ManualClock::new(0.0);
        loader.start(task(0), &mut cache, false);
        spawner.run_until_stalled();
        loader.poll_completions(&mut cache, 1, false);

        assert_eq!(loader.process_mipmaps(&mut cache, &clock, false), 0);
        assert_eq!(loader.pending_mipmaps(), 1);
        assert_eq!(loader.process_mipmaps(&mut cache, &clock, true), 1);
        assert_eq!(loader.pending_mipmaps(), 0);
    }
}
