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

//! Base admission handler implementation.

use super::interfaces::{Interface, Operation};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Polling interval of [`Handler::wait_for_ready`].
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on how long [`Handler::wait_for_ready`] blocks.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// ReadyFunc reports whether a plugin's backing state is usable.
pub type ReadyFunc = Arc<dyn Fn() -> bool + Send + Sync>;

/// Handler is a base struct for admission plugins.
/// It provides default implementation of the Handles method and tracks
/// readiness of the plugin's configuration sources.
#[derive(Clone)]
pub struct Handler {
    operations: HashSet<Operation>,
    ready_func: Option<ReadyFunc>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("operations", &self.operations)
            .field("has_ready_func", &self.ready_func.is_some())
            .finish()
    }
}

impl Handler {
    /// Create a new Handler that handles the given operations.
    pub fn new(operations: &[Operation]) -> Self {
        Self {
            operations: operations.iter().cloned().collect(),
            ready_func: None,
        }
    }

    /// Create a new Handler that handles Create and Update operations.
    pub fn new_create_update() -> Self {
        Self::new(&[Operation::Create, Operation::Update])
    }

    /// Create a new Handler that handles all operations.
    pub fn new_all() -> Self {
        Self::new(&[
            Operation::Create,
            Operation::Update,
            Operation::Delete,
            Operation::Connect,
        ])
    }

    /// Sets the function consulted by [`Handler::is_ready`].
    pub fn set_ready_func(&mut self, ready_func: ReadyFunc) {
        self.ready_func = Some(ready_func);
    }

    /// A handler without a ready func is always ready.
    pub fn is_ready(&self) -> bool {
        self.ready_func.as_ref().map_or(true, |ready| ready())
    }

    /// Polls the ready func until it reports true or ten seconds pass.
    /// Returns the final readiness.
    pub async fn wait_for_ready(&self) -> bool {
        let ready = match &self.ready_func {
            Some(ready) => ready,
            None => return true,
        };
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if ready() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

impl Interface for Handler {
    fn handles(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    fn is_ready(&self) -> bool {
        Handler::is_ready(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_handler_new() {
        let handler = Handler::new(&[Operation::Create, Operation::Update]);
        assert!(handler.handles(Operation::Create));
        assert!(handler.handles(Operation::Update));
        assert!(!handler.handles(Operation::Delete));
        assert!(!handler.handles(Operation::Connect));
    }

    #[test]
    fn test_handler_new_create_update() {
        let handler = Handler::new_create_update();
        assert!(handler.handles(Operation::Create));
        assert!(!handler.handles(Operation::Delete));
    }

    #[test]
    fn test_handler_new_all() {
        let handler = Handler::new_all();
        assert!(handler.handles(Operation::Create));
        assert!(handler.handles(Operation::Update));
        assert!(handler.handles(Operation::Delete));
        assert!(handler.handles(Operation::Connect));
        assert!(handler.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut handler = Handler::new_all();
        let ready = flag.clone();
        handler.set_ready_func(Arc::new(move || ready.load(Ordering::SeqCst)));
        assert!(!handler.is_ready());

        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            setter.store(true, Ordering::SeqCst);
        });
        assert!(handler.wait_for_ready().await);
        assert!(handler.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_times_out() {
        let mut handler = Handler::new_all();
        handler.set_ready_func(Arc::new(|| false));
        assert!(!handler.wait_for_ready().await);
    }
}
