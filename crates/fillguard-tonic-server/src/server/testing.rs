use core::time::Duration;
use fillguard::{
    CacheFill, FanOut, FetchError, FillPolicy, MemoryStore, OriginFetcher, ResourceKey, TtlRange,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio_util::sync::CancellationToken;

/// Origin answering `origin {url}` after a fixed latency.
#[derive(Clone)]
pub struct StaticOrigin {
    latency: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl StaticOrigin {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OriginFetcher for StaticOrigin {
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_owned() }),
            () = tokio::time::sleep(self.latency) => Ok(format!("origin {url}")),
        }
    }
}

pub fn fan_out(origin: StaticOrigin, keys: &[&str], count: usize) -> FanOut<MemoryStore, StaticOrigin> {
    let ttl = TtlRange::from_millis(60_000, 120_000).unwrap();
    let coordinator = CacheFill::new(
        Arc::new(MemoryStore::new()),
        Arc::new(origin),
        FillPolicy::new(ttl),
    );
    let keys = keys.iter().map(|k| ResourceKey::from(*k)).collect();
    FanOut::new(Arc::new(coordinator), keys, count).unwrap()
}
