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

//! Informer: keeps a [`Store`] in sync with a [`ListerWatcher`].

use super::store::Store;
use super::{stopped, ListerWatcher, Notification, Resource, StopCh, WatchEvent};
use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_RELIST_BACKOFF: Duration = Duration::from_secs(1);

/// EventHandler receives the notifications of one list or watch event.
pub type EventHandler<K> = Arc<dyn Fn(&[Notification<K>]) + Send + Sync>;

pub struct Informer<K: Resource> {
    name: String,
    lister_watcher: Arc<dyn ListerWatcher<K>>,
    store: Arc<Store<K>>,
    handlers: RwLock<Vec<EventHandler<K>>>,
    synced: AtomicBool,
    relist_backoff: Duration,
}

impl<K: Resource> Informer<K> {
    pub fn new(name: &str, lister_watcher: Arc<dyn ListerWatcher<K>>) -> Self {
        Self {
            name: name.to_string(),
            lister_watcher,
            store: Arc::new(Store::new()),
            handlers: RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
            relist_backoff: DEFAULT_RELIST_BACKOFF,
        }
    }

    pub fn with_relist_backoff(mut self, backoff: Duration) -> Self {
        self.relist_backoff = backoff;
        self
    }

    pub fn store(&self) -> &Arc<Store<K>> {
        &self.store
    }

    /// Handlers added after the initial list only see later changes.
    pub fn add_event_handler(&self, handler: EventHandler<K>) {
        self.handlers.write().push(handler);
    }

    /// True once the first list has been stored and delivered to handlers.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn notify(&self, notifications: &[Notification<K>]) {
        if notifications.is_empty() {
            return;
        }
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(notifications);
        }
    }

    /// Lists, then watches until `stop` closes.
    pub async fn run(&self, mut stop: StopCh) {
        loop {
            if *stop.borrow() {
                return;
            }

            let listed = tokio::select! {
                _ = stopped(&mut stop) => return,
                listed = self.lister_watcher.list() => listed,
            };
            let mut resource_version = match listed {
                Ok(list) => {
                    info!(informer = %self.name, count = list.items.len(), resource_version = %list.resource_version, "listed objects");
                    let notifications = self.store.replace(list.items);
                    self.notify(&notifications);
                    self.synced.store(true, Ordering::Release);
                    list.resource_version
                }
                Err(err) => {
                    error!(informer = %self.name, error = %err, "list failed");
                    if !self.backoff(&mut stop).await {
                        return;
                    }
                    continue;
                }
            };

            // Watch until an error forces a relist. A stream that simply
            // ends is resumed from the last seen resource version.
            'watch: loop {
                let watched = tokio::select! {
                    _ = stopped(&mut stop) => return,
                    watched = self.lister_watcher.watch(&resource_version) => watched,
                };
                let mut stream = match watched {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(informer = %self.name, error = %err, "watch failed");
                        break 'watch;
                    }
                };

                loop {
                    let event = tokio::select! {
                        _ = stopped(&mut stop) => return,
                        event = stream.next() => event,
                    };
                    match event {
                        None => {
                            debug!(informer = %self.name, resource_version = %resource_version, "watch closed, resuming");
                            continue 'watch;
                        }
                        Some(WatchEvent::Error(msg)) => {
                            error!(informer = %self.name, error = %msg, "watch error, relisting");
                            break 'watch;
                        }
                        Some(WatchEvent::Bookmark { resource_version: rv }) => {
                            resource_version = rv;
                        }
                        Some(event) => {
                            if let WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) = &event {
                                let rv = &obj.meta().resource_version;
                                if !rv.is_empty() {
                                    resource_version = rv.clone();
                                }
                            }
                            if let Some(notification) = self.store.apply(event) {
                                self.notify(std::slice::from_ref(&notification));
                            }
                        }
                    }
                }
            }

            if !self.backoff(&mut stop).await {
                return;
            }
        }
    }

    /// Sleeps for the relist backoff. Returns false if stopped meanwhile.
    async fn backoff(&self, stop: &mut StopCh) -> bool {
        tokio::select! {
            _ = stopped(stop) => false,
            _ = tokio::time::sleep(self.relist_backoff) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::core::Namespace;
    use crate::informer::fake::FakeListerWatcher;
    use parking_lot::Mutex;

    async fn eventually(f: impl Fn() -> bool) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn start(informer: Arc<Informer<Namespace>>) -> tokio::sync::watch::Sender<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move { informer.run(rx).await });
        tx
    }

    #[tokio::test]
    async fn test_list_then_watch() {
        let lw = Arc::new(FakeListerWatcher::new());
        lw.add(Namespace::new("a", &[]));
        let informer = Arc::new(Informer::new("namespaces", lw.clone()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        informer.add_event_handler(Arc::new(move |batch: &[Notification<Namespace>]| {
            sink.lock().extend(batch.iter().map(|n| n.key().to_string()));
        }));

        let _stop = start(informer.clone());
        eventually(|| informer.has_synced()).await;
        assert_eq!(seen.lock().clone(), vec!["a".to_string()]);

        lw.add(Namespace::new("b", &[]));
        eventually(|| informer.store().len() == 2).await;
        lw.delete(&Namespace::new("a", &[]));
        eventually(|| informer.store().len() == 1).await;
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_resume_after_disconnect() {
        let lw = Arc::new(FakeListerWatcher::new());
        let informer = Arc::new(Informer::new("namespaces", lw.clone()));
        let _stop = start(informer.clone());
        eventually(|| informer.has_synced()).await;

        lw.add(Namespace::new("a", &[]));
        eventually(|| informer.store().len() == 1).await;
        lw.disconnect();
        lw.add(Namespace::new("b", &[]));
        eventually(|| informer.store().len() == 2).await;
        assert_eq!(lw.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_relist_after_watch_error() {
        let lw = Arc::new(FakeListerWatcher::new());
        let informer = Arc::new(
            Informer::new("namespaces", lw.clone()).with_relist_backoff(Duration::from_millis(10)),
        );
        let _stop = start(informer.clone());
        eventually(|| informer.has_synced()).await;

        lw.inject_watch_error("resource version too old");
        eventually(|| lw.list_calls() >= 2).await;
        lw.add(Namespace::new("c", &[]));
        eventually(|| informer.store().get_by_name("c").is_some()).await;
    }

    #[tokio::test]
    async fn test_list_failure_retries() {
        let lw = Arc::new(FakeListerWatcher::new());
        lw.fail_next_lists(2);
        let informer = Arc::new(
            Informer::new("namespaces", lw.clone()).with_relist_backoff(Duration::from_millis(10)),
        );
        let _stop = start(informer.clone());
        eventually(|| informer.has_synced()).await;
        assert_eq!(lw.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_stop() {
        let lw = Arc::new(FakeListerWatcher::<Namespace>::new());
        let informer = Arc::new(Informer::new("namespaces", lw.clone()));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn({
            let informer = informer.clone();
            async move { informer.run(rx).await }
        });
        eventually(|| informer.has_synced()).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
