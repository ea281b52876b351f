//! Buffer store
//!
//! Fetches and decodes every configured variant exactly once, on background
//! loader threads, and tracks per-track readiness on the control thread.
//!
//! - Tracks sharing a file reference share one decode and one buffer.
//! - Every track resolution, success or failure, bumps the resolved count
//!   exactly once, so one bad asset never keeps the library from being ready.
//! - Results reach the store's bookkeeping only through [`BufferStore::poll`]
//!   (or the blocking [`BufferStore::wait_for_library`]); a [`LoadHandle`]
//!   can observe its own result as soon as the loader finishes.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrackDescriptor;
use crate::engine::buffer::DecodedBuffer;
use crate::engine::io::{load_asset, AssetSource};

// ============================================================================
// Types
// ============================================================================

/// Load state of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Pending,
    Ready,
    Errored,
}

impl Readiness {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Readiness::Pending)
    }
}

/// Why a load failed, kept as text so it can be shared between tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub reference: String,
    pub code: &'static str,
    pub message: String,
}

pub type LoadResult = std::result::Result<Arc<DecodedBuffer>, LoadFailure>;

/// One track's resolution, reported by [`BufferStore::poll`]
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub track_id: String,
    pub result: LoadResult,
}

/// Promise-like view of a pending load
///
/// Resolves as soon as the loader thread finishes, independently of the
/// store's own bookkeeping.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    cell: Arc<OnceLock<LoadResult>>,
    /// Disconnects when the loader finishes; nothing is ever sent on it
    done: Receiver<()>,
}

impl LoadHandle {
    /// The result, if the load has finished
    pub fn try_result(&self) -> Option<LoadResult> {
        self.cell.get().cloned()
    }

    /// Block until the load finishes or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Option<LoadResult> {
        if let Some(result) = self.cell.get() {
            return Some(result.clone());
        }
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => self.cell.get().cloned(),
            Err(RecvTimeoutError::Timeout) => None,
        }
    }
}

struct SourceSlot {
    reference: String,
    track_ids: Vec<String>,
    handle: LoadHandle,
    /// Result as seen by the control thread, set by `poll`
    applied: Option<LoadResult>,
}

// ============================================================================
// Buffer Store
// ============================================================================

/// Owner of every decoded buffer
pub struct BufferStore {
    source: Arc<dyn AssetSource>,
    slots: HashMap<String, SourceSlot>,
    /// Track id -> slot key
    tracks: HashMap<String, String>,
    readiness: HashMap<String, Readiness>,
    results_tx: Sender<(String, LoadResult)>,
    results_rx: Receiver<(String, LoadResult)>,
    resolved_count: usize,
}

/// Key under which identical references share one decode
fn slot_key(reference: &str) -> String {
    reference.trim().trim_start_matches("./").to_string()
}

impl BufferStore {
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            source,
            slots: HashMap::new(),
            tracks: HashMap::new(),
            readiness: HashMap::new(),
            results_tx,
            results_rx,
            resolved_count: 0,
        }
    }

    /// Request every track in order
    pub fn request_all(&mut self, tracks: &[TrackDescriptor]) -> Vec<LoadHandle> {
        tracks.iter().map(|track| self.request(track)).collect()
    }

    /// Start (or join) the load of `track`'s file reference
    pub fn request(&mut self, track: &TrackDescriptor) -> LoadHandle {
        if let Some(key) = self.tracks.get(&track.id) {
            return self.slots[key].handle.clone();
        }

        let key = slot_key(&track.file);
        self.tracks.insert(track.id.clone(), key.clone());
        self.readiness.insert(track.id.clone(), Readiness::Pending);

        if let Some(slot) = self.slots.get_mut(&key) {
            debug!(track = %track.id, reference = %slot.reference, "joining existing load");
            slot.track_ids.push(track.id.clone());
            let handle = slot.handle.clone();
            // The shared source already settled: resolve this track right away
            if let Some(result) = slot.applied.clone() {
                self.resolve_track(&track.id, &result);
            }
            return handle;
        }

        let handle = self.spawn_loader(&key, &track.file);
        self.slots.insert(
            key,
            SourceSlot {
                reference: track.file.clone(),
                track_ids: vec![track.id.clone()],
                handle: handle.clone(),
                applied: None,
            },
        );
        handle
    }

    fn spawn_loader(&self, key: &str, reference: &str) -> LoadHandle {
        let cell: Arc<OnceLock<LoadResult>> = Arc::new(OnceLock::new());
        let (done_tx, done_rx) = bounded::<()>(0);
        let handle = LoadHandle {
            cell: Arc::clone(&cell),
            done: done_rx,
        };

        let source = Arc::clone(&self.source);
        let results_tx = self.results_tx.clone();
        let worker_cell = Arc::clone(&cell);
        let worker_key = key.to_string();
        let worker_reference = reference.to_string();

        debug!(reference, "loading asset");
        let spawned = thread::Builder::new()
            .name(format!("cambio-load-{}", key))
            .spawn(move || {
                let result = load_asset(source.as_ref(), &worker_reference)
                    .map(Arc::new)
                    .map_err(|e| LoadFailure {
                        reference: worker_reference.clone(),
                        code: e.error_code(),
                        message: e.to_string(),
                    });
                let _ = worker_cell.set(result.clone());
                let _ = results_tx.send((worker_key, result));
                drop(done_tx);
            });

        if let Err(e) = spawned {
            let failure = LoadFailure {
                reference: reference.to_string(),
                code: "IO_ERROR",
                message: format!("could not start loader thread: {}", e),
            };
            let _ = cell.set(Err(failure.clone()));
            let _ = self.results_tx.send((key.to_string(), Err(failure)));
        }

        handle
    }

    /// Apply every finished load; never blocks
    pub fn poll(&mut self) -> Vec<LoadOutcome> {
        let finished: Vec<(String, LoadResult)> = self.results_rx.try_iter().collect();
        finished
            .into_iter()
            .flat_map(|(key, result)| self.apply(key, result))
            .collect()
    }

    /// Block until every requested track has resolved or `timeout` elapses
    ///
    /// Returns the outcomes applied while waiting.
    pub fn wait_for_library(&mut self, timeout: Duration) -> Vec<LoadOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = self.poll();
        while !self.is_library_ready() {
            match self.results_rx.recv_deadline(deadline) {
                Ok((key, result)) => outcomes.extend(self.apply(key, result)),
                Err(_) => {
                    warn!(
                        resolved = self.resolved_count,
                        total = self.total_count(),
                        "timed out waiting for library"
                    );
                    break;
                }
            }
        }
        outcomes
    }

    fn apply(&mut self, key: String, result: LoadResult) -> Vec<LoadOutcome> {
        let track_ids = match self.slots.get_mut(&key) {
            Some(slot) if slot.applied.is_none() => {
                slot.applied = Some(result.clone());
                slot.track_ids.clone()
            }
            _ => return Vec::new(),
        };

        match &result {
            Ok(buffer) => debug!(
                reference = %key,
                duration = buffer.duration_secs(),
                sample_rate = buffer.sample_rate(),
                "asset decoded"
            ),
            Err(failure) => warn!(reference = %key, error = %failure.message, "asset failed to load"),
        }

        let outcomes: Vec<LoadOutcome> = track_ids
            .into_iter()
            .filter_map(|track_id| {
                self.resolve_track(&track_id, &result).then(|| LoadOutcome {
                    track_id,
                    result: result.clone(),
                })
            })
            .collect();

        if self.is_library_ready() {
            info!(tracks = self.total_count(), "library ready");
        }
        outcomes
    }

    /// Mark `track_id` resolved; returns false if it already was
    fn resolve_track(&mut self, track_id: &str, result: &LoadResult) -> bool {
        let Some(state) = self.readiness.get_mut(track_id) else {
            return false;
        };
        if state.is_resolved() {
            return false;
        }
        *state = if result.is_ok() {
            Readiness::Ready
        } else {
            Readiness::Errored
        };
        self.resolved_count += 1;
        true
    }

    pub fn readiness(&self, track_id: &str) -> Option<Readiness> {
        self.readiness.get(track_id).copied()
    }

    /// Decoded buffer of a ready track
    pub fn buffer(&self, track_id: &str) -> Option<Arc<DecodedBuffer>> {
        match self.applied(track_id)? {
            Ok(buffer) => Some(Arc::clone(buffer)),
            Err(_) => None,
        }
    }

    /// Failure of an errored track
    pub fn failure(&self, track_id: &str) -> Option<&LoadFailure> {
        match self.applied(track_id)? {
            Ok(_) => None,
            Err(failure) => Some(failure),
        }
    }

    fn applied(&self, track_id: &str) -> Option<&LoadResult> {
        let key = self.tracks.get(track_id)?;
        self.slots.get(key)?.applied.as_ref()
    }

    /// Tracks resolved so far, ready or errored
    pub fn resolved_count(&self) -> usize {
        self.resolved_count
    }

    pub fn total_count(&self) -> usize {
        self.tracks.len()
    }

    /// Number of distinct decodes started
    pub fn unique_source_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_library_ready(&self) -> bool {
        self.resolved_count == self.total_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::MemorySource;
    use crate::error::Result;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn wav_bytes(frames: usize) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    struct CountingSource {
        inner: MemorySource,
        fetches: AtomicUsize,
    }

    impl AssetSource for CountingSource {
        fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(reference)
        }
    }

    /// Holds every fetch until the gate is opened
    struct GatedSource {
        inner: MemorySource,
        gate: Mutex<Receiver<()>>,
    }

    impl AssetSource for GatedSource {
        fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
            let _ = self.gate.lock().unwrap().recv();
            self.inner.fetch(reference)
        }
    }

    #[test]
    fn test_identical_references_decode_once() {
        let source = Arc::new(CountingSource {
            inner: MemorySource::new()
                .with_asset("a.wav", wav_bytes(800))
                .with_asset("b.wav", wav_bytes(400)),
            fetches: AtomicUsize::new(0),
        });
        let mut store = BufferStore::new(source.clone());
        store.request_all(&[
            TrackDescriptor::new("original", "Original", "a.wav"),
            TrackDescriptor::new("master-1", "Warm", "./a.wav"),
            TrackDescriptor::new("master-2", "Balanced", "b.wav"),
        ]);

        let outcomes = store.wait_for_library(TIMEOUT);
        assert_eq!(outcomes.len(), 3);
        assert!(store.is_library_ready());
        assert_eq!(store.unique_source_count(), 2);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

        let first = store.buffer("original").unwrap();
        let second = store.buffer("master-1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.buffer("master-2").unwrap().frames(), 400);
    }

    #[test]
    fn test_failure_still_counts_as_resolved() {
        let source = Arc::new(MemorySource::new().with_asset("a.wav", wav_bytes(800)));
        let mut store = BufferStore::new(source);
        store.request_all(&[
            TrackDescriptor::new("original", "Original", "a.wav"),
            TrackDescriptor::new("master-1", "Warm", "missing.wav"),
        ]);

        store.wait_for_library(TIMEOUT);
        assert!(store.is_library_ready());
        assert_eq!(store.resolved_count(), 2);
        assert_eq!(store.readiness("original"), Some(Readiness::Ready));
        assert_eq!(store.readiness("master-1"), Some(Readiness::Errored));
        assert!(store.buffer("master-1").is_none());
        assert_eq!(store.failure("master-1").unwrap().code, "ASSET_NOT_FOUND");
    }

    #[test]
    fn test_pending_until_polled() {
        let (gate_tx, gate_rx) = unbounded();
        let source = Arc::new(GatedSource {
            inner: MemorySource::new().with_asset("a.wav", wav_bytes(800)),
            gate: Mutex::new(gate_rx),
        });
        let mut store = BufferStore::new(source);
        let handle = store.request(&TrackDescriptor::new("original", "Original", "a.wav"));

        assert_eq!(store.readiness("original"), Some(Readiness::Pending));
        assert!(store.poll().is_empty());
        assert!(!store.is_library_ready());
        assert!(handle.try_result().is_none());

        gate_tx.send(()).unwrap();
        let result = handle.wait(TIMEOUT).expect("load should finish");
        assert_eq!(result.unwrap().frames(), 800);

        // The handle saw the result; the store applies it on the next poll
        let outcomes = store.wait_for_library(TIMEOUT);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(store.readiness("original"), Some(Readiness::Ready));
    }

    #[test]
    fn test_late_request_for_settled_source_resolves_immediately() {
        let source = Arc::new(MemorySource::new().with_asset("a.wav", wav_bytes(100)));
        let mut store = BufferStore::new(source);
        store.request(&TrackDescriptor::new("original", "Original", "a.wav"));
        store.wait_for_library(TIMEOUT);

        store.request(&TrackDescriptor::new("copy", "Copy", "a.wav"));
        assert_eq!(store.readiness("copy"), Some(Readiness::Ready));
        assert_eq!(store.resolved_count(), 2);
        assert!(store.is_library_ready());
    }
}
