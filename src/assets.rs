//! Asset Cache: single-flight loading of decoded samples.
//!
//! The first request for a sample id starts one fetch+decode task; every
//! request that arrives before it finishes waits on that same task and gets
//! the same result. Results, failures included, are kept for the life of the
//! cache.
//!
//! Loads run as detached tokio tasks, so a load started before the engine
//! halts still completes and fills the cache. Nothing is started from a
//! completion; the reconciler picks finished samples up on its next tick.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::config::sample_asset_name;
use crate::dsp::decode::decode_audio;
use crate::dsp::sampler::SampleBuffer;
use crate::error::DecodeFailure;
pub use crate::reconciler::CacheLookup;
use crate::reconciler::SampleLookup;

/// Where encoded sample bytes come from.
pub trait SampleSource: Send + Sync + 'static {
    fn fetch(&self, sample_id: u32) -> impl Future<Output = Result<Vec<u8>, DecodeFailure>> + Send;
}

type Waiter = oneshot::Sender<Option<Arc<SampleBuffer>>>;

enum Slot {
    Loading(Vec<Waiter>),
    /// `None` marks a permanent decode failure.
    Ready(Option<Arc<SampleBuffer>>),
}

pub struct AssetCache<S: SampleSource> {
    source: Arc<S>,
    slots: Arc<Mutex<HashMap<u32, Slot>>>,
    loads_started: Arc<AtomicUsize>,
}

impl<S: SampleSource> Clone for AssetCache<S> {
    fn clone(&self) -> Self {
        AssetCache {
            source: Arc::clone(&self.source),
            slots: Arc::clone(&self.slots),
            loads_started: Arc::clone(&self.loads_started),
        }
    }
}

impl<S: SampleSource> AssetCache<S> {
    pub fn new(source: S) -> Self {
        AssetCache {
            source: Arc::new(source),
            slots: Arc::new(Mutex::new(HashMap::new())),
            loads_started: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u32, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decoded buffer for `sample_id`, or `None` if it failed to load.
    pub async fn get(&self, sample_id: u32) -> Option<Arc<SampleBuffer>> {
        let (rx, first) = {
            let mut slots = self.slots();
            let (tx, rx) = oneshot::channel();
            match slots.entry(sample_id) {
                Entry::Occupied(mut entry) => match entry.get_mut() {
                    Slot::Ready(buffer) => return buffer.clone(),
                    Slot::Loading(waiters) => {
                        waiters.push(tx);
                        (rx, false)
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(Slot::Loading(vec![tx]));
                    (rx, true)
                }
            }
        };
        if first {
            self.spawn_load(sample_id);
        }
        rx.await.unwrap_or(None)
    }

    /// Current state of `sample_id`, starting a load if none exists yet.
    pub fn poll(&self, sample_id: u32) -> CacheLookup {
        {
            let mut slots = self.slots();
            match slots.entry(sample_id) {
                Entry::Occupied(entry) => {
                    return match entry.get() {
                        Slot::Ready(Some(buffer)) => CacheLookup::Ready(Arc::clone(buffer)),
                        Slot::Ready(None) => CacheLookup::Failed,
                        Slot::Loading(_) => CacheLookup::Pending,
                    };
                }
                Entry::Vacant(entry) => {
                    entry.insert(Slot::Loading(Vec::new()));
                }
            }
        }
        self.spawn_load(sample_id);
        CacheLookup::Pending
    }

    /// Start loading every id that is not cached or loading yet.
    pub fn preload(&self, sample_ids: impl IntoIterator<Item = u32>) {
        for id in sample_ids {
            self.poll(id);
        }
    }

    /// How many fetch+decode tasks have been started.
    pub fn loads_started(&self) -> usize {
        self.loads_started.load(Ordering::Relaxed)
    }

    pub fn is_cached(&self, sample_id: u32) -> bool {
        matches!(self.slots().get(&sample_id), Some(Slot::Ready(_)))
    }

    fn spawn_load(&self, sample_id: u32) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("event=sample_load module=assets status=no_runtime sample={sample_id}");
            self.slots().remove(&sample_id);
            return;
        };
        self.loads_started.fetch_add(1, Ordering::Relaxed);
        let source = Arc::clone(&self.source);
        let slots = Arc::clone(&self.slots);
        runtime.spawn(async move {
            let buffer = match load(source.as_ref(), sample_id).await {
                Ok(buffer) => {
                    info!(
                        "event=sample_load module=assets status=ok sample={sample_id} frames={} rate={}",
                        buffer.len(),
                        buffer.sample_rate
                    );
                    Some(Arc::new(buffer))
                }
                Err(e) => {
                    warn!("event=sample_load module=assets status=error sample={sample_id} error={e}");
                    None
                }
            };

            let previous = slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(sample_id, Slot::Ready(buffer.clone()));
            if let Some(Slot::Loading(waiters)) = previous {
                debug!("event=sample_waiters module=assets sample={sample_id} count={}", waiters.len());
                for waiter in waiters {
                    let _ = waiter.send(buffer.clone());
                }
            }
        });
    }
}

impl<S: SampleSource> SampleLookup for AssetCache<S> {
    fn lookup(&self, sample_id: u32) -> CacheLookup {
        self.poll(sample_id)
    }
}

async fn load<S: SampleSource>(source: &S, sample_id: u32) -> Result<SampleBuffer, DecodeFailure> {
    let bytes = source.fetch(sample_id).await?;
    let decoded = tokio::task::spawn_blocking(move || decode_audio(&bytes))
        .await
        .map_err(|e| DecodeFailure {
            sample_id,
            reason: format!("decode task failed: {e}"),
        })?;
    decoded.map_err(|reason| DecodeFailure { sample_id, reason })
}

/// Reads `<dir>/<pattern>` from disk.
#[derive(Debug, Clone)]
pub struct FsSampleSource {
    dir: PathBuf,
    pattern: String,
}

impl FsSampleSource {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        FsSampleSource {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    pub fn path_of(&self, sample_id: u32) -> PathBuf {
        self.dir.join(sample_asset_name(&self.pattern, sample_id))
    }
}

impl SampleSource for FsSampleSource {
    fn fetch(&self, sample_id: u32) -> impl Future<Output = Result<Vec<u8>, DecodeFailure>> + Send {
        let path = self.path_of(sample_id);
        async move {
            tokio::fs::read(&path).await.map_err(|e| DecodeFailure {
                sample_id,
                reason: format!("{}: {e}", path.display()),
            })
        }
    }
}

/// Encoded samples held in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemorySampleSource {
    samples: HashMap<u32, Vec<u8>>,
}

impl MemorySampleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample(mut self, sample_id: u32, bytes: Vec<u8>) -> Self {
        self.samples.insert(sample_id, bytes);
        self
    }
}

impl SampleSource for MemorySampleSource {
    fn fetch(&self, sample_id: u32) -> impl Future<Output = Result<Vec<u8>, DecodeFailure>> + Send {
        let result = self.samples.get(&sample_id).cloned().ok_or_else(|| DecodeFailure {
            sample_id,
            reason: "no such sample".to_string(),
        });
        std::future::ready(result)
    }
}

/// Fetches `<base_url>/<pattern>` over HTTP.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSampleSource {
    client: reqwest::Client,
    base_url: String,
    pattern: String,
}

#[cfg(feature = "http")]
impl HttpSampleSource {
    pub fn new(base_url: impl Into<String>, pattern: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| format!("http client init failed: {e}"))?;
        Ok(HttpSampleSource {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pattern: pattern.into(),
        })
    }

    pub fn url_of(&self, sample_id: u32) -> String {
        format!("{}/{}", self.base_url, sample_asset_name(&self.pattern, sample_id))
    }
}

#[cfg(feature = "http")]
impl SampleSource for HttpSampleSource {
    fn fetch(&self, sample_id: u32) -> impl Future<Output = Result<Vec<u8>, DecodeFailure>> + Send {
        let url = self.url_of(sample_id);
        let client = self.client.clone();
        async move {
            let fail = |reason: String| DecodeFailure { sample_id, reason };
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| fail(format!("{url}: {e}")))?;
            if !response.status().is_success() {
                return Err(fail(format!("{url}: HTTP {}", response.status().as_u16())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| fail(format!("{url}: {e}")))?;
            Ok(bytes.to_vec())
        }
    }
}
