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

//! Thread-safe object cache backing an informer.

use super::{Notification, Resource, WatchEvent};
use crate::api::meta::NamespacedName;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Store holds the latest copy of every object keyed by namespace/name.
///
/// Readers get an `Arc` snapshot of the whole map; writers copy it on
/// change, so a snapshot never observes a partial update.
pub struct Store<K> {
    items: RwLock<Arc<BTreeMap<NamespacedName, K>>>,
}

impl<K: Resource> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> Store<K> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    pub fn get(&self, key: &NamespacedName) -> Option<K> {
        self.items.read().get(key).cloned()
    }

    /// Looks up a cluster-scoped object.
    pub fn get_by_name(&self, name: &str) -> Option<K> {
        self.get(&NamespacedName::cluster(name))
    }

    /// All objects ordered by key.
    pub fn list(&self) -> Vec<K> {
        self.items.read().values().cloned().collect()
    }

    pub fn snapshot(&self) -> Arc<BTreeMap<NamespacedName, K>> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Replaces the contents with a fresh list and reports the difference.
    /// Objects present before and after are reported as updated.
    pub(crate) fn replace(&self, items: Vec<K>) -> Vec<Notification<K>> {
        let next: BTreeMap<NamespacedName, K> = items.into_iter().map(|obj| (obj.key(), obj)).collect();
        let mut guard = self.items.write();
        let mut notifications = Vec::new();
        for (key, obj) in &next {
            match guard.get(key) {
                Some(old) => notifications.push(Notification::Updated {
                    old: old.clone(),
                    new: obj.clone(),
                }),
                None => notifications.push(Notification::Added(obj.clone())),
            }
        }
        for (key, old) in guard.iter() {
            if !next.contains_key(key) {
                notifications.push(Notification::Deleted(old.clone()));
            }
        }
        *guard = Arc::new(next);
        notifications
    }

    /// Applies one watch event. Bookmarks and errors change nothing.
    pub(crate) fn apply(&self, event: WatchEvent<K>) -> Option<Notification<K>> {
        let mut guard = self.items.write();
        let items = Arc::make_mut(&mut *guard);
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let notification = match items.insert(obj.key(), obj.clone()) {
                    Some(old) => Notification::Updated { old, new: obj },
                    None => Notification::Added(obj),
                };
                Some(notification)
            }
            WatchEvent::Deleted(obj) => {
                let removed = items.remove(&obj.key());
                Some(Notification::Deleted(removed.unwrap_or(obj)))
            }
            WatchEvent::Bookmark { .. } | WatchEvent::Error(_) => None,
        }
    }
}
