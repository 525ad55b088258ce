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

//! In-memory [`ListerWatcher`] for tests.

use super::{InformerError, ListerWatcher, ObjectList, Resource, WatchEvent};
use crate::api::meta::NamespacedName;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum Signal<K> {
    Event(u64, WatchEvent<K>),
    Error(String),
    Disconnect,
}

struct FakeState<K> {
    objects: BTreeMap<NamespacedName, K>,
    log: Vec<(u64, WatchEvent<K>)>,
    resource_version: u64,
    failing_lists: usize,
    list_calls: usize,
    watch_calls: usize,
}

/// FakeListerWatcher serves objects from memory. Every mutation gets the
/// next resource version and is appended to an event log, so a watch that
/// resumes from an older version replays what it missed.
pub struct FakeListerWatcher<K: Resource> {
    state: Mutex<FakeState<K>>,
    events: broadcast::Sender<Signal<K>>,
    list_gate: watch::Sender<bool>,
}

impl<K: Resource> Default for FakeListerWatcher<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> FakeListerWatcher<K> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (list_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(FakeState {
                objects: BTreeMap::new(),
                log: Vec::new(),
                resource_version: 0,
                failing_lists: 0,
                list_calls: 0,
                watch_calls: 0,
            }),
            events,
            list_gate,
        }
    }

    fn record(&self, mut obj: K, make: fn(K) -> WatchEvent<K>, remove: bool) {
        let mut state = self.state.lock();
        state.resource_version += 1;
        let rv = state.resource_version;
        obj.meta_mut().resource_version = rv.to_string();
        let key = obj.key();
        if remove {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, obj.clone());
        }
        let event = make(obj);
        state.log.push((rv, event.clone()));
        // Sent under the lock so a concurrent watch sees each event once.
        let _ = self.events.send(Signal::Event(rv, event));
    }

    pub fn add(&self, obj: K) {
        self.record(obj, WatchEvent::Added, false);
    }

    pub fn update(&self, obj: K) {
        self.record(obj, WatchEvent::Modified, false);
    }

    pub fn delete(&self, obj: &K) {
        self.record(obj.clone(), WatchEvent::Deleted, true);
    }

    /// Ends every open watch stream without an error.
    pub fn disconnect(&self) {
        let _state = self.state.lock();
        let _ = self.events.send(Signal::Disconnect);
    }

    /// Sends an error event on every open watch stream.
    pub fn inject_watch_error(&self, msg: &str) {
        let _state = self.state.lock();
        let _ = self.events.send(Signal::Error(msg.to_string()));
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().failing_lists = count;
    }

    /// Makes `list` wait until [`unblock_lists`](Self::unblock_lists).
    pub fn block_lists(&self) {
        self.list_gate.send_replace(false);
    }

    pub fn unblock_lists(&self) {
        self.list_gate.send_replace(true);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn watch_calls(&self) -> usize {
        self.state.lock().watch_calls
    }
}

#[async_trait]
impl<K: Resource> ListerWatcher<K> for FakeListerWatcher<K> {
    async fn list(&self) -> Result<ObjectList<K>, InformerError> {
        let mut gate = self.list_gate.subscribe();
        while !*gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }

        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(InformerError::List("injected list failure".to_string()));
        }
        Ok(ObjectList {
            resource_version: state.resource_version.to_string(),
            items: state.objects.values().cloned().collect(),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<BoxStream<'static, WatchEvent<K>>, InformerError> {
        let from: u64 = if resource_version.is_empty() {
            0
        } else {
            resource_version
                .parse()
                .map_err(|_| InformerError::Watch(format!("invalid resource version {:?}", resource_version)))?
        };

        let (replay, rx) = {
            let mut state = self.state.lock();
            state.watch_calls += 1;
            let replay: Vec<WatchEvent<K>> = state
                .log
                .iter()
                .filter(|(rv, _)| *rv > from)
                .map(|(_, event)| event.clone())
                .collect();
            (replay, self.events.subscribe())
        };

        let live = stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(Signal::Event(rv, event)) if rv > from => return Some((event, rx)),
                    Ok(Signal::Event(..)) => continue,
                    Ok(Signal::Error(msg)) => return Some((WatchEvent::Error(msg), rx)),
                    Ok(Signal::Disconnect) | Err(RecvError::Closed) => return None,
                    Err(RecvError::Lagged(_)) => {
                        return Some((WatchEvent::Error("watch fell behind".to_string()), rx))
                    }
                }
            }
        });
        Ok(stream::iter(replay).chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::core::Namespace;

    #[tokio::test]
    async fn test_list_assigns_resource_versions() {
        let lw = FakeListerWatcher::new();
        lw.add(Namespace::new("a", &[]));
        lw.add(Namespace::new("b", &[]));
        let list = lw.list().await.unwrap();
        assert_eq!(list.resource_version, "2");
        assert_eq!(list.items[1].metadata.resource_version, "2");
    }

    #[tokio::test]
    async fn test_watch_replays_from_resource_version() {
        let lw = FakeListerWatcher::new();
        lw.add(Namespace::new("a", &[]));
        lw.add(Namespace::new("b", &[]));
        let mut stream = lw.watch("1").await.unwrap();
        match stream.next().await {
            Some(WatchEvent::Added(ns)) => assert_eq!(ns.metadata.name, "b"),
            other => panic!("unexpected event {:?}", other),
        }
        lw.disconnect();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_list_failures() {
        let lw = FakeListerWatcher::<Namespace>::new();
        lw.fail_next_lists(1);
        assert!(lw.list().await.is_err());
        assert!(lw.list().await.is_ok());
        assert_eq!(lw.list_calls(), 2);
    }
}
