//! Topic loop, watcher fan-out, and backoff (§4.4), grounded on
//! `pkg/config/consul/consul.go`'s `Topic`/`Watcher`/`subscribe`.

use super::{ConfigSource, KvClient, Spec, Watcher};
use crate::error::{MeshError, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_MAX: Duration = Duration::from_secs(25);
const BACKOFF_JITTER: f64 = 0.2;

struct TopicWatcher {
    id: u64,
    snapshot: Arc<ArcSwap<Vec<Spec>>>,
    recv: AsyncMutex<mpsc::Receiver<()>>,
    closed: CancellationToken,
    topic: Arc<Topic>,
}

#[async_trait]
impl Watcher for TopicWatcher {
    async fn watch(&self, ctx: &CancellationToken) -> Result<Vec<Spec>> {
        tokio::select! {
            _ = ctx.cancelled() => Err(MeshError::WatchTimeout),
            _ = self.closed.cancelled() => Err(MeshError::WatchClosed),
            got = async {
                let mut recv = self.recv.lock().await;
                recv.recv().await
            } => {
                got.ok_or(MeshError::WatchClosed)?;
                Ok((**self.snapshot.load()).clone())
            }
        }
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.topic.remove_watcher(self.id);
    }
}

struct Topic {
    path: String,
    snapshot: Arc<ArcSwap<Vec<Spec>>>,
    watchers: Mutex<HashMap<u64, mpsc::Sender<()>>>,
    next_watcher_id: AtomicUsize,
    shutdown: CancellationToken,
    source: std::sync::Weak<Inner>,
}

impl Topic {
    fn remove_watcher(&self, id: u64) {
        let remaining = {
            let mut watchers = self.watchers.lock();
            watchers.remove(&id);
            watchers.len()
        };
        if remaining == 0 {
            self.shutdown.cancel();
            if let Some(source) = self.source.upgrade() {
                source.topics.write().remove(&self.path);
            }
        }
    }

    fn broadcast(&self, specs: Vec<Spec>) {
        self.snapshot.store(Arc::new(specs));
        let watchers = self.watchers.lock();
        for tx in watchers.values() {
            // depth-1 coalescing: a full channel means an edge is already
            // pending, so the send is simply dropped (§4.4 Watcher contract).
            let _ = tx.try_send(());
        }
    }
}

async fn run_topic<C: KvClient + 'static>(topic: Arc<Topic>, client: Arc<C>) {
    let mut last_index = 0u64;
    let mut backoff = BACKOFF_BASE;

    loop {
        if topic.shutdown.is_cancelled() {
            return;
        }
        match client.fetch(&topic.path, last_index).await {
            Ok((specs, next_index)) => {
                backoff = BACKOFF_BASE;
                let prev = (**topic.snapshot.load()).clone();
                if specs != prev {
                    info!(path = %topic.path, count = specs.len(), "config topic: new snapshot, broadcasting");
                    topic.broadcast(specs);
                }
                last_index = next_index;
                tokio::select! {
                    _ = topic.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            Err(e) => {
                error!(path = %topic.path, error = %e, backoff_ms = backoff.as_millis(), "config topic: fetch failed, backing off");
                let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * BACKOFF_JITTER;
                let sleep_for = backoff.mul_f64(jitter);
                tokio::select! {
                    _ = topic.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(sleep_for) => {}
                }
                backoff = Duration::from_secs_f64((backoff.as_secs_f64() * BACKOFF_FACTOR).min(BACKOFF_MAX.as_secs_f64()));
            }
        }
    }
}

struct Inner {
    topics: parking_lot::RwLock<HashMap<String, Arc<Topic>>>,
}

/// A `ConfigSource` backed by a long-poll KV client, fanning each
/// subscribed path out to coalescing watchers (§4.4).
pub struct KvConfigSource<C: KvClient + 'static> {
    client: Arc<C>,
    inner: Arc<Inner>,
}

impl<C: KvClient + 'static> KvConfigSource<C> {
    pub fn new(client: C) -> Self {
        KvConfigSource {
            client: Arc::new(client),
            inner: Arc::new(Inner {
                topics: parking_lot::RwLock::new(HashMap::new()),
            }),
        }
    }

    fn topic_for(&self, path: &str) -> Arc<Topic> {
        if let Some(t) = self.inner.topics.read().get(path) {
            return t.clone();
        }
        let mut write = self.inner.topics.write();
        write
            .entry(path.to_string())
            .or_insert_with(|| {
                let topic = Arc::new(Topic {
                    path: path.to_string(),
                    snapshot: Arc::new(ArcSwap::from_pointee(Vec::new())),
                    watchers: Mutex::new(HashMap::new()),
                    next_watcher_id: AtomicUsize::new(0),
                    shutdown: CancellationToken::new(),
                    source: Arc::downgrade(&self.inner),
                });
                let client = self.client.clone();
                let spawned = topic.clone();
                tokio::spawn(async move {
                    run_topic(spawned, client).await;
                });
                debug!(path, "config topic created");
                topic
            })
            .clone()
    }
}

impl<C: KvClient + 'static> ConfigSource for KvConfigSource<C> {
    fn subscribe(&self, path: &str) -> Arc<dyn Watcher> {
        let topic = self.topic_for(path);
        let (tx, rx) = mpsc::channel(1);
        let id = topic.next_watcher_id.fetch_add(1, Ordering::SeqCst) as u64;
        topic.watchers.lock().insert(id, tx);
        Arc::new(TopicWatcher {
            id,
            snapshot: topic.snapshot.clone(),
            recv: AsyncMutex::new(rx),
            closed: CancellationToken::new(),
            topic,
        })
    }

    fn get(&self, path: &str) -> Vec<Spec> {
        match self.inner.topics.read().get(path) {
            Some(t) => (**t.snapshot.load()).clone(),
            None => Vec::new(),
        }
    }
}
