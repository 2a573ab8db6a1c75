//! Windowed cache of decoded page images around the reading cursor.
//!
//! After each [`ImageCache::update_cache`] the cache keeps at most
//! `WINDOW_PREV + 1 + WINDOW_NEXT` entries. A direct `get_image` or
//! `preload_image` for an index outside the window still inserts an entry,
//! which stays resident until the next window update evicts it. Each entry
//! owns a revocable [`ImageHandle`] and a shared once-cell that holds the
//! outcome of its load, so concurrent requests for one index share a single
//! decode. Bookkeeping happens under a short std mutex that is never held
//! across an await.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::error::CacheError;
use crate::matcher::match_files_to_pages;
use crate::thumbnail::probe_dimensions;
use crate::types::{FileBag, ImageBytes, Page};

pub(crate) const WINDOW_PREV: usize = 2;
pub(crate) const WINDOW_NEXT: usize = 3;

pub(crate) type BackendError = Box<dyn Error + Send + Sync>;

/// Opaque, revocable reference to one image's backing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ImageHandle(u64);

impl ImageHandle {
    pub(crate) fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LoadedImage {
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Platform image services used by the cache. `load` and `decode` run on the
/// blocking pool.
pub(crate) trait ImageBackend: Send + Sync + 'static {
    fn create_handle(&self, bytes: &ImageBytes) -> ImageHandle;
    fn revoke_handle(&self, handle: ImageHandle);
    /// Must succeed for the image to be usable at all.
    fn load(&self, bytes: &[u8]) -> Result<LoadedImage, BackendError>;
    /// Full pixel decode. Failure leaves the image loaded but not decoded.
    fn decode(&self, bytes: &[u8]) -> Result<(), BackendError>;
}

// ── Raster backend ───────────────────────────────────────────────────────

/// `image`-crate backend. Tracks live handles and the bytes they pin.
#[derive(Debug, Default)]
pub(crate) struct RasterBackend {
    next_id: AtomicU64,
    live: Mutex<HashMap<ImageHandle, usize>>,
}

impl RasterBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn live_map(&self) -> MutexGuard<'_, HashMap<ImageHandle, usize>> {
        self.live.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.live_map().len()
    }

    pub(crate) fn live_bytes(&self) -> usize {
        self.live_map().values().sum()
    }
}

impl ImageBackend for RasterBackend {
    fn create_handle(&self, bytes: &ImageBytes) -> ImageHandle {
        let handle = ImageHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.live_map().insert(handle, bytes.len());
        handle
    }

    fn revoke_handle(&self, handle: ImageHandle) {
        if self.live_map().remove(&handle).is_none() {
            tracing::warn!(handle = handle.0, "revoking unknown image handle");
        }
    }

    fn load(&self, bytes: &[u8]) -> Result<LoadedImage, BackendError> {
        let (width, height) = probe_dimensions(bytes)?;
        Ok(LoadedImage { width, height })
    }

    fn decode(&self, bytes: &[u8]) -> Result<(), BackendError> {
        image::load_from_memory(bytes)?;
        Ok(())
    }
}

// ── Volume source ────────────────────────────────────────────────────────

/// Files and pages of the volume being read. A new `generation` tells the
/// cache the volume changed.
#[derive(Debug, Clone)]
pub(crate) struct VolumeSource {
    pub(crate) generation: u64,
    pub(crate) files: Arc<FileBag>,
    pub(crate) pages: Arc<Vec<Page>>,
}

impl VolumeSource {
    pub(crate) fn new(generation: u64, files: FileBag, pages: Vec<Page>) -> Self {
        Self {
            generation,
            files: Arc::new(files),
            pages: Arc::new(pages),
        }
    }

    /// Generation derived from file names, file sizes and page paths.
    pub(crate) fn fingerprinted(files: FileBag, pages: Vec<Page>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (name, bytes) in &files {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        hasher.update(&[0xff]);
        for page in &pages {
            hasher.update(page.img_path.as_bytes());
            hasher.update(&[0]);
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        Self::new(u64::from_le_bytes(head), files, pages)
    }
}

/// Inclusive window around `cursor`, clamped to the page range.
pub(crate) fn window_bounds(cursor: usize, page_count: usize) -> Option<(usize, usize)> {
    if page_count == 0 {
        return None;
    }
    let lo = cursor.saturating_sub(WINDOW_PREV);
    let hi = cursor.saturating_add(WINDOW_NEXT).min(page_count - 1);
    (lo <= hi).then_some((lo, hi))
}

// ── Cache ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedImage {
    pub(crate) handle: ImageHandle,
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// False when only the load step succeeded.
    pub(crate) pixels_decoded: bool,
}

type LoadSlot = Arc<OnceCell<Result<CachedImage, CacheError>>>;

struct CacheEntry {
    handle: ImageHandle,
    bytes: ImageBytes,
    decoded: bool,
    slot: LoadSlot,
}

#[derive(Default)]
struct CacheState {
    generation: Option<u64>,
    aligned: Vec<Option<ImageBytes>>,
    cursor: usize,
    entries: BTreeMap<usize, CacheEntry>,
}

impl CacheState {
    fn in_window(&self, index: usize) -> bool {
        window_bounds(self.cursor, self.aligned.len())
            .is_some_and(|(lo, hi)| (lo..=hi).contains(&index))
    }
}

/// Whether a preload came from a window update (and may be stale) or from a
/// direct request.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Window(u64),
    Request,
}

#[derive(Clone)]
pub(crate) struct ImageCache {
    backend: Arc<dyn ImageBackend>,
    state: Arc<Mutex<CacheState>>,
    decode_timeout: Duration,
}

impl ImageCache {
    pub(crate) fn new(backend: Arc<dyn ImageBackend>, decode_timeout: Duration) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(CacheState::default())),
            decode_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Move the window to `cursor`, evicting and preloading as needed.
    ///
    /// Returns immediately; preloads run as tokio tasks, so this must be
    /// called from within a runtime.
    pub(crate) fn update_cache(&self, source: &VolumeSource, cursor: usize) {
        let mut released = Vec::new();
        let window = {
            let mut state = self.state();
            if state.generation != Some(source.generation) {
                let old = std::mem::take(&mut state.entries);
                released.extend(old.into_values().map(|e| e.handle));
                state.aligned = match_files_to_pages(&source.files, &source.pages);
                state.generation = Some(source.generation);
                tracing::debug!(
                    generation = source.generation,
                    pages = source.pages.len(),
                    released = released.len(),
                    "image cache source replaced"
                );
            }
            state.cursor = cursor;
            let window = window_bounds(cursor, state.aligned.len());
            let outside: Vec<usize> = state
                .entries
                .keys()
                .copied()
                .filter(|i| !window.is_some_and(|(lo, hi)| (lo..=hi).contains(i)))
                .collect();
            for index in outside {
                if let Some(entry) = state.entries.remove(&index) {
                    released.push(entry.handle);
                }
            }
            window
        };

        for handle in released {
            self.backend.revoke_handle(handle);
        }

        let Some((lo, hi)) = window else {
            return;
        };
        for index in lo..=hi {
            let cache = self.clone();
            let origin = Origin::Window(source.generation);
            tokio::spawn(async move {
                if let Err(err) = cache.preload(index, origin).await {
                    tracing::warn!(index, %err, "image preload failed");
                }
            });
        }
    }

    /// Handle for `index` if it is cached and finished loading. Never starts work.
    pub(crate) fn get_image_sync(&self, index: usize) -> Option<ImageHandle> {
        self.state()
            .entries
            .get(&index)
            .filter(|e| e.decoded)
            .map(|e| e.handle)
    }

    /// Image for `index`, loading it if needed. `Ok(None)` when no file is
    /// aligned to that page. A failed entry returns its stored error until it
    /// is evicted.
    pub(crate) async fn get_image(&self, index: usize) -> Result<Option<CachedImage>, CacheError> {
        self.preload_image(index).await
    }

    pub(crate) async fn preload_image(&self, index: usize) -> Result<Option<CachedImage>, CacheError> {
        self.preload(index, Origin::Request).await
    }

    async fn preload(&self, index: usize, origin: Origin) -> Result<Option<CachedImage>, CacheError> {
        let (slot, handle, bytes) = {
            let mut state = self.state();
            if let Origin::Window(generation) = origin {
                if state.generation != Some(generation) || !state.in_window(index) {
                    return Ok(None);
                }
            }
            match state.entries.get(&index) {
                Some(entry) => (entry.slot.clone(), entry.handle, entry.bytes.clone()),
                None => {
                    let Some(bytes) = state.aligned.get(index).cloned().flatten() else {
                        return Ok(None);
                    };
                    let handle = self.backend.create_handle(&bytes);
                    let slot: LoadSlot = Arc::new(OnceCell::new());
                    state.entries.insert(
                        index,
                        CacheEntry {
                            handle,
                            bytes: bytes.clone(),
                            decoded: false,
                            slot: slot.clone(),
                        },
                    );
                    (slot, handle, bytes)
                }
            }
        };

        let result = slot
            .get_or_init(|| self.decode_image(index, handle, bytes))
            .await
            .clone();

        if result.is_ok() {
            let mut state = self.state();
            // The entry may have been evicted or replaced while loading.
            if let Some(entry) = state.entries.get_mut(&index) {
                if Arc::ptr_eq(&entry.slot, &slot) {
                    entry.decoded = true;
                }
            }
        }
        result.map(Some)
    }

    /// Load then decode on the blocking pool, bounded by the decode timeout.
    async fn decode_image(
        &self,
        index: usize,
        handle: ImageHandle,
        bytes: ImageBytes,
    ) -> Result<CachedImage, CacheError> {
        let backend = Arc::clone(&self.backend);
        let work = tokio::task::spawn_blocking(move || -> Result<(LoadedImage, bool), String> {
            let loaded = backend.load(&bytes).map_err(|e| e.to_string())?;
            let decoded = match backend.decode(&bytes) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(index, %err, "full decode failed, keeping loaded image");
                    false
                }
            };
            Ok((loaded, decoded))
        });

        match tokio::time::timeout(self.decode_timeout, work).await {
            Err(_) => Err(CacheError::Timeout {
                index,
                timeout_ms: self.decode_timeout.as_millis() as u64,
            }),
            Ok(Err(join)) => Err(CacheError::Task {
                index,
                reason: join.to_string(),
            }),
            Ok(Ok(Err(reason))) => Err(CacheError::Load { index, reason }),
            Ok(Ok(Ok((loaded, pixels_decoded)))) => Ok(CachedImage {
                handle,
                width: loaded.width,
                height: loaded.height,
                pixels_decoded,
            }),
        }
    }

    /// Revoke every handle and forget the current volume.
    pub(crate) fn cleanup(&self) {
        let released: Vec<ImageHandle> = {
            let mut state = self.state();
            let entries = std::mem::take(&mut state.entries);
            state.generation = None;
            state.aligned.clear();
            state.cursor = 0;
            entries.into_values().map(|e| e.handle).collect()
        };
        tracing::debug!(released = released.len(), "image cache cleared");
        for handle in released {
            self.backend.revoke_handle(handle);
        }
    }

    pub(crate) fn resident_indices(&self) -> Vec<usize> {
        self.state().entries.keys().copied().collect()
    }

    pub(crate) fn decoded_indices(&self) -> Vec<usize> {
        self.state()
            .entries
            .iter()
            .filter(|(_, e)| e.decoded)
            .map(|(i, _)| *i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::text_page;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    /// Backend that records every call. Bytes `bad` fail to load, bytes
    /// `flat` load but fail to decode.
    #[derive(Default)]
    struct CountingBackend {
        next_id: AtomicU64,
        created: Mutex<Vec<ImageHandle>>,
        revoked: Mutex<HashMap<ImageHandle, usize>>,
        loads: Mutex<HashMap<Vec<u8>, usize>>,
        total_loads: AtomicUsize,
        delay: Duration,
    }

    impl CountingBackend {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn loads_of(&self, bytes: &str) -> usize {
            self.loads.lock().unwrap().get(bytes.as_bytes()).copied().unwrap_or(0)
        }

        fn created(&self) -> Vec<ImageHandle> {
            self.created.lock().unwrap().clone()
        }

        fn revoked(&self) -> HashMap<ImageHandle, usize> {
            self.revoked.lock().unwrap().clone()
        }
    }

    impl ImageBackend for CountingBackend {
        fn create_handle(&self, _bytes: &ImageBytes) -> ImageHandle {
            let handle = ImageHandle(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.created.lock().unwrap().push(handle);
            handle
        }

        fn revoke_handle(&self, handle: ImageHandle) {
            *self.revoked.lock().unwrap().entry(handle).or_default() += 1;
        }

        fn load(&self, bytes: &[u8]) -> Result<LoadedImage, BackendError> {
            *self.loads.lock().unwrap().entry(bytes.to_vec()).or_default() += 1;
            self.total_loads.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if bytes == b"bad" {
                return Err("corrupt image".into());
            }
            Ok(LoadedImage {
                width: 100,
                height: 150,
            })
        }

        fn decode(&self, bytes: &[u8]) -> Result<(), BackendError> {
            if bytes == b"flat" {
                return Err("decode unsupported".into());
            }
            Ok(())
        }
    }

    fn source(generation: u64, bodies: &[&str]) -> VolumeSource {
        let mut files = FileBag::new();
        let mut pages = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            let name = format!("p{i:02}.png");
            files.insert(name.clone(), Arc::from(body.as_bytes()));
            pages.push(text_page(&name, &[]));
        }
        VolumeSource::new(generation, files, pages)
    }

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("img{i}")).collect()
    }

    fn numbered_source(generation: u64, n: usize) -> VolumeSource {
        let bodies = numbered(n);
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        source(generation, &refs)
    }

    fn cache_with(backend: &Arc<CountingBackend>) -> ImageCache {
        let dyn_backend: Arc<dyn ImageBackend> = backend.clone();
        ImageCache::new(dyn_backend, Duration::from_secs(5))
    }

    async fn settle(cache: &ImageCache, cursor: usize, pages: usize) {
        if let Some((lo, hi)) = window_bounds(cursor, pages) {
            for i in lo..=hi {
                let _ = cache.get_image(i).await;
            }
        }
    }

    #[test]
    fn window_is_clamped() {
        assert_eq!(window_bounds(0, 10), Some((0, 3)));
        assert_eq!(window_bounds(5, 10), Some((3, 8)));
        assert_eq!(window_bounds(9, 10), Some((7, 9)));
        assert_eq!(window_bounds(0, 1), Some((0, 0)));
        assert_eq!(window_bounds(0, 0), None);
        assert_eq!(window_bounds(20, 10), None);
    }

    #[test]
    fn fingerprint_tracks_content_shape() {
        let a = VolumeSource::fingerprinted(source(0, &["x", "y"]).files.as_ref().clone(), vec![]);
        let b = VolumeSource::fingerprinted(source(0, &["x", "y"]).files.as_ref().clone(), vec![]);
        let c = VolumeSource::fingerprinted(source(0, &["x", "yy"]).files.as_ref().clone(), vec![]);
        assert_eq!(a.generation, b.generation);
        assert_ne!(a.generation, c.generation);
    }

    #[test]
    fn fingerprint_covers_file_bytes() {
        let bag = |body: &[u8]| {
            let mut files = FileBag::new();
            files.insert("001.png".to_string(), Arc::from(body));
            files
        };
        let pages = || vec![text_page("001.png", &[])];
        let a = VolumeSource::fingerprinted(bag(b"AAAA"), pages());
        let b = VolumeSource::fingerprinted(bag(b"BBBB"), pages());
        assert_ne!(a.generation, b.generation);
    }

    #[tokio::test]
    async fn cache_holds_only_the_window() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        let src = numbered_source(1, 10);

        cache.update_cache(&src, 0);
        settle(&cache, 0, 10).await;
        assert_eq!(cache.resident_indices(), vec![0, 1, 2, 3]);

        cache.update_cache(&src, 6);
        assert!(cache.resident_indices().iter().all(|i| (4..=9).contains(i)));
        settle(&cache, 6, 10).await;
        assert_eq!(cache.resident_indices(), vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(cache.decoded_indices(), vec![4, 5, 6, 7, 8, 9]);

        cache.update_cache(&src, 9);
        settle(&cache, 9, 10).await;
        assert_eq!(cache.resident_indices(), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_decode() {
        let backend = Arc::new(CountingBackend::slow(Duration::from_millis(50)));
        let cache = cache_with(&backend);
        cache.update_cache(&numbered_source(1, 10), 0);

        let (a, b, c) = tokio::join!(cache.get_image(8), cache.get_image(8), cache.get_image(8));
        let a = a.unwrap().unwrap();
        assert_eq!(b.unwrap().unwrap(), a);
        assert_eq!(c.unwrap().unwrap(), a);
        assert_eq!(backend.loads_of("img8"), 1);
        assert_eq!(cache.get_image_sync(8), Some(a.handle));
    }

    #[tokio::test]
    async fn every_handle_is_revoked_exactly_once() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        let src = numbered_source(1, 12);

        for cursor in [0, 4, 11, 2] {
            cache.update_cache(&src, cursor);
            settle(&cache, cursor, 12).await;
        }
        let _ = cache.get_image(10).await;
        cache.cleanup();

        let created = backend.created();
        let revoked = backend.revoked();
        assert!(!created.is_empty());
        assert_eq!(created.len(), revoked.len());
        for handle in &created {
            assert_eq!(revoked.get(handle), Some(&1), "handle {handle:?}");
        }
        assert!(cache.resident_indices().is_empty());
    }

    #[tokio::test]
    async fn eviction_during_load_discards_result() {
        let backend = Arc::new(CountingBackend::slow(Duration::from_millis(80)));
        let cache = cache_with(&backend);
        let src = numbered_source(1, 12);

        cache.update_cache(&src, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.update_cache(&src, 9);
        settle(&cache, 9, 12).await;
        // let the evicted loads for 0..=3 run to completion
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.resident_indices(), vec![7, 8, 9, 10, 11]);
        assert_eq!(cache.decoded_indices(), vec![7, 8, 9, 10, 11]);

        cache.cleanup();
        let created = backend.created();
        let revoked = backend.revoked();
        assert_eq!(created.len(), 9);
        assert_eq!(created.len(), revoked.len());
        for handle in &created {
            assert_eq!(revoked.get(handle), Some(&1), "handle {handle:?}");
        }
    }

    #[tokio::test]
    async fn out_of_window_request_stays_until_next_update() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        let src = numbered_source(1, 12);

        cache.update_cache(&src, 0);
        settle(&cache, 0, 12).await;
        assert!(cache.get_image(10).await.is_ok());
        assert_eq!(cache.resident_indices(), vec![0, 1, 2, 3, 10]);

        cache.update_cache(&src, 1);
        let resident = cache.resident_indices();
        assert!(!resident.contains(&10));
        assert!(resident.iter().all(|i| (0..=4).contains(i)));
    }

    #[tokio::test]
    async fn sync_accessor_never_starts_work() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        assert_eq!(cache.get_image_sync(0), None);
        cache.update_cache(&numbered_source(1, 10), 0);
        assert_eq!(cache.get_image_sync(7), None);
        settle(&cache, 0, 10).await;
        assert_eq!(backend.loads_of("img7"), 0);
        assert!(cache.get_image_sync(2).is_some());
    }

    #[tokio::test]
    async fn failed_entry_keeps_error_until_evicted() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        let src = source(1, &["a", "bad", "c", "d", "e", "f", "g", "h", "i", "j"]);

        cache.update_cache(&src, 0);
        let first = cache.get_image(1).await;
        assert!(matches!(first, Err(CacheError::Load { index: 1, .. })));
        let again = cache.get_image(1).await;
        assert!(matches!(again, Err(CacheError::Load { index: 1, .. })));
        assert_eq!(backend.loads_of("bad"), 1);
        assert_eq!(cache.get_image_sync(1), None);
        assert!(cache.get_image(0).await.unwrap().is_some());

        cache.update_cache(&src, 8);
        settle(&cache, 8, 10).await;
        cache.update_cache(&src, 0);
        let _ = cache.get_image(1).await;
        assert_eq!(backend.loads_of("bad"), 2);
    }

    #[tokio::test]
    async fn decode_failure_still_yields_image() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        cache.update_cache(&source(1, &["flat"]), 0);
        let image = cache.get_image(0).await.unwrap().unwrap();
        assert!(!image.pixels_decoded);
        assert_eq!((image.width, image.height), (100, 150));
        assert_eq!(cache.get_image_sync(0), Some(image.handle));
    }

    #[tokio::test]
    async fn stalled_load_times_out() {
        let backend = Arc::new(CountingBackend::slow(Duration::from_millis(200)));
        let dyn_backend: Arc<dyn ImageBackend> = backend.clone();
        let cache = ImageCache::new(dyn_backend, Duration::from_millis(20));
        cache.update_cache(&source(1, &["a"]), 0);
        let err = cache.get_image(0).await.unwrap_err();
        assert!(matches!(err, CacheError::Timeout { index: 0, timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn new_generation_releases_everything() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);

        cache.update_cache(&numbered_source(1, 6), 0);
        settle(&cache, 0, 6).await;
        let first: HashSet<ImageHandle> = backend.created().into_iter().collect();

        // Same generation and cursor: nothing is reloaded.
        cache.update_cache(&numbered_source(1, 6), 0);
        settle(&cache, 0, 6).await;
        assert_eq!(backend.created().len(), first.len());

        cache.update_cache(&numbered_source(2, 6), 0);
        let revoked = backend.revoked();
        assert!(first.iter().all(|h| revoked.get(h) == Some(&1)));
        settle(&cache, 0, 6).await;
        assert_eq!(backend.created().len(), first.len() * 2);
        assert_eq!(cache.resident_indices(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn pages_without_files_are_skipped() {
        let backend = Arc::new(CountingBackend::default());
        let cache = cache_with(&backend);
        let mut files = FileBag::new();
        files.insert("zzz.png".into(), Arc::from(&b"only"[..]));
        let pages = vec![text_page("a.png", &[]), text_page("b.png", &[])];
        cache.update_cache(&VolumeSource::new(1, files, pages), 0);

        assert!(cache.get_image(0).await.unwrap().is_some());
        assert_eq!(cache.get_image(1).await.unwrap(), None);
        assert_eq!(cache.get_image(40).await.unwrap(), None);
        assert_eq!(cache.resident_indices(), vec![0]);
    }

    #[tokio::test]
    async fn raster_backend_loads_real_images() {
        let backend = Arc::new(RasterBackend::new());
        let dyn_backend: Arc<dyn ImageBackend> = backend.clone();
        let cache = ImageCache::new(dyn_backend, Duration::from_secs(5));

        let mut files = FileBag::new();
        files.insert("001.png".into(), Arc::from(crate::thumbnail::png_bytes(6, 9)));
        files.insert("002.png".into(), Arc::from(&b"not an image"[..]));
        let pages = vec![text_page("001.png", &[]), text_page("002.png", &[])];
        cache.update_cache(&VolumeSource::new(7, files, pages), 0);

        let image = cache.get_image(0).await.unwrap().unwrap();
        assert_eq!((image.width, image.height), (6, 9));
        assert!(image.pixels_decoded);
        assert!(matches!(cache.get_image(1).await, Err(CacheError::Load { index: 1, .. })));
        assert_eq!(backend.live_handles(), 2);
        assert!(backend.live_bytes() > 0);

        cache.cleanup();
        assert_eq!(backend.live_handles(), 0);
    }
}
