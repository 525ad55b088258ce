// Copyright 2024 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! List/watch driven caches for configuration objects.
//!
//! An [`Informer`] lists a resource once, then follows its watch stream,
//! keeping a [`Store`] current and notifying event handlers in batches. A
//! watch stream that ends is resumed from the last seen resource version; a
//! watch error triggers a full relist.

pub mod fake;
mod reflector;
mod store;
pub mod workqueue;

pub use reflector::{EventHandler, Informer};
pub use store::Store;
pub use workqueue::WorkQueue;

use crate::api::meta::{NamespacedName, ObjectMeta};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Polling interval of [`wait_for_cache_sync`].
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resource is implemented by every kind an informer can cache.
pub trait Resource: Clone + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> NamespacedName {
        let meta = self.meta();
        NamespacedName::new(&meta.namespace, &meta.name)
    }
}

/// One change observed on a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    Bookmark { resource_version: String },
    Error(String),
}

/// Result of a list call.
#[derive(Debug, Clone)]
pub struct ObjectList<K> {
    pub resource_version: String,
    pub items: Vec<K>,
}

/// Change delivered to event handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K: Resource> Notification<K> {
    pub fn key(&self) -> NamespacedName {
        match self {
            Notification::Added(obj) | Notification::Deleted(obj) => obj.key(),
            Notification::Updated { new, .. } => new.key(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum InformerError {
    #[error("failed to list: {0}")]
    List(String),

    #[error("failed to watch: {0}")]
    Watch(String),
}

/// ListerWatcher is the source an informer consumes.
#[async_trait]
pub trait ListerWatcher<K: Resource>: Send + Sync {
    async fn list(&self) -> Result<ObjectList<K>, InformerError>;

    /// Streams events that happened after `resource_version`.
    async fn watch(&self, resource_version: &str) -> Result<BoxStream<'static, WatchEvent<K>>, InformerError>;
}

/// StopCh closes when `true` is sent or the sender is dropped.
pub type StopCh = tokio::sync::watch::Receiver<bool>;

/// InformerSynced reports whether a cache has completed its initial sync.
pub type InformerSynced = Arc<dyn Fn() -> bool + Send + Sync>;

/// Resolves once `stop` is closed.
pub async fn stopped(stop: &mut StopCh) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Waits until every `synced` function reports true. Returns false if
/// `stop` closes first.
pub async fn wait_for_cache_sync(mut stop: StopCh, synced: &[InformerSynced]) -> bool {
    loop {
        if synced.iter().all(|f| f()) {
            return true;
        }
        tokio::select! {
            _ = stopped(&mut stop) => return false,
            _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cache_sync() {
        let flag = Arc::new(AtomicBool::new(false));
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            setter.store(true, Ordering::SeqCst);
        });
        let synced: InformerSynced = {
            let flag = flag.clone();
            Arc::new(move || flag.load(Ordering::SeqCst))
        };
        assert!(wait_for_cache_sync(rx, &[synced]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cache_sync_stopped() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let never: InformerSynced = Arc::new(|| false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let _ = tx.send(true);
        });
        assert!(!wait_for_cache_sync(rx, &[never]).await);
    }

    #[tokio::test]
    async fn test_stopped_on_sender_drop() {
        let (tx, mut rx) = tokio::sync::watch::channel(false);
        drop(tx);
        stopped(&mut rx).await;
    }
}
