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

//! Joining policies with their bindings.

use super::{BindingAccessor, PolicyAccessor, PolicyHook};
use crate::api::meta::NamespacedName;
use crate::informer::{stopped, Informer, ListerWatcher, Notification, StopCh, WorkQueue};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Compiles a policy into its evaluator.
pub type CompileFn<P, E> = Arc<dyn Fn(&P) -> Result<E, String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum QueueKey {
    Policy(NamespacedName),
    Binding(NamespacedName),
}

struct PolicyEntry<P, E> {
    policy: P,
    /// Compiled on first use, dropped when the policy changes.
    evaluator: Option<Result<Arc<E>, String>>,
}

struct State<P, B, E> {
    policies: BTreeMap<NamespacedName, PolicyEntry<P, E>>,
    bindings: BTreeMap<NamespacedName, B>,
    /// Binding keys by the policy they reference. Includes bindings of
    /// policies that do not exist (yet).
    policy_to_bindings: BTreeMap<NamespacedName, BTreeSet<NamespacedName>>,
    hooks: Option<Arc<Vec<PolicyHook<P, B, E>>>>,
}

impl<P, B: BindingAccessor, E> State<P, B, E> {
    fn unlink(&mut self, binding: &NamespacedName, policy: &NamespacedName) {
        if let Some(names) = self.policy_to_bindings.get_mut(policy) {
            names.remove(binding);
            if names.is_empty() {
                self.policy_to_bindings.remove(policy);
            }
        }
    }
}

/// PolicySource follows policies and bindings through two informers and
/// publishes the joined view.
pub struct PolicySource<P: PolicyAccessor, B: BindingAccessor, E> {
    policy_informer: Arc<Informer<P>>,
    binding_informer: Arc<Informer<B>>,
    queue: Arc<WorkQueue<QueueKey>>,
    state: RwLock<State<P, B, E>>,
    compile: CompileFn<P, E>,
    synced: AtomicBool,
}

impl<P, B, E> PolicySource<P, B, E>
where
    P: PolicyAccessor,
    B: BindingAccessor,
    E: Send + Sync + 'static,
{
    pub fn new(
        policies: Arc<dyn ListerWatcher<P>>,
        bindings: Arc<dyn ListerWatcher<B>>,
        compile: CompileFn<P, E>,
    ) -> Self {
        let policy_informer = Arc::new(Informer::new("policies", policies));
        let binding_informer = Arc::new(Informer::new("bindings", bindings));
        let queue = Arc::new(WorkQueue::new());

        let q = queue.clone();
        policy_informer.add_event_handler(Arc::new(move |changes: &[Notification<P>]| {
            for change in changes {
                q.add(QueueKey::Policy(change.key()));
            }
        }));
        let q = queue.clone();
        binding_informer.add_event_handler(Arc::new(move |changes: &[Notification<B>]| {
            for change in changes {
                q.add(QueueKey::Binding(change.key()));
            }
        }));

        Self {
            policy_informer,
            binding_informer,
            queue,
            state: RwLock::new(State {
                policies: BTreeMap::new(),
                bindings: BTreeMap::new(),
                policy_to_bindings: BTreeMap::new(),
                hooks: None,
            }),
            compile,
            synced: AtomicBool::new(false),
        }
    }

    /// True once both informers have listed and every item of the initial
    /// lists has been reconciled. Stays true afterwards.
    pub fn has_synced(&self) -> bool {
        if self.synced.load(Ordering::Acquire) {
            return true;
        }
        let synced = self.policy_informer.has_synced()
            && self.binding_informer.has_synced()
            && self.queue.is_idle();
        if synced {
            self.synced.store(true, Ordering::Release);
        }
        synced
    }

    /// Runs both informers and the reconcile worker until `stop` closes.
    pub async fn run(&self, stop: StopCh) {
        let worker = async {
            while let Some(key) = self.queue.get().await {
                self.reconcile(&key);
                self.queue.done(&key);
            }
        };
        let shutdown = {
            let mut stop = stop.clone();
            async move {
                stopped(&mut stop).await;
                self.queue.shut_down();
            }
        };
        tokio::join!(
            self.policy_informer.run(stop.clone()),
            self.binding_informer.run(stop),
            worker,
            shutdown,
        );
    }

    fn reconcile(&self, key: &QueueKey) {
        match key {
            QueueKey::Policy(nn) => {
                let current = self.policy_informer.store().get(nn);
                let mut state = self.state.write();
                match current {
                    Some(policy) => {
                        debug!(policy = %nn, "policy changed");
                        state.policies.insert(
                            nn.clone(),
                            PolicyEntry {
                                policy,
                                evaluator: None,
                            },
                        );
                    }
                    None => {
                        debug!(policy = %nn, "policy removed");
                        state.policies.remove(nn);
                    }
                }
                state.hooks = None;
            }
            QueueKey::Binding(nn) => {
                let current = self.binding_informer.store().get(nn);
                // Moving a binding between policies happens under one lock.
                let mut state = self.state.write();
                let previous = state.bindings.get(nn).map(|b| b.policy_name());
                if let Some(previous) = previous {
                    state.unlink(nn, &previous);
                }
                match current {
                    Some(binding) => {
                        let policy = binding.policy_name();
                        debug!(binding = %nn, policy = %policy, "binding changed");
                        state.policy_to_bindings.entry(policy).or_default().insert(nn.clone());
                        state.bindings.insert(nn.clone(), binding);
                    }
                    None => {
                        debug!(binding = %nn, "binding removed");
                        state.bindings.remove(nn);
                    }
                }
                state.hooks = None;
            }
        }
    }

    /// The bound policies, sorted by policy name with bindings sorted by
    /// name. Recomputed after changes on first read.
    pub fn hooks(&self) -> Arc<Vec<PolicyHook<P, B, E>>> {
        if let Some(hooks) = &self.state.read().hooks {
            return hooks.clone();
        }

        let mut guard = self.state.write();
        if let Some(hooks) = &guard.hooks {
            return hooks.clone();
        }
        let state = &mut *guard;
        let mut hooks = Vec::new();
        for (name, entry) in state.policies.iter_mut() {
            let bindings: Vec<B> = state
                .policy_to_bindings
                .get(name)
                .into_iter()
                .flatten()
                .filter_map(|b| state.bindings.get(b).cloned())
                .collect();
            if bindings.is_empty() {
                continue;
            }
            let evaluator = entry
                .evaluator
                .get_or_insert_with(|| (self.compile)(&entry.policy).map(Arc::new))
                .clone();
            hooks.push(PolicyHook {
                policy: entry.policy.clone(),
                bindings,
                evaluator,
            });
        }
        let hooks = Arc::new(hooks);
        state.hooks = Some(hooks.clone());
        hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::admissionregistration::{
        ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding, Validation,
    };
    use crate::informer::fake::FakeListerWatcher;
    use crate::informer::{wait_for_cache_sync, InformerSynced, Resource};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type TestSource = PolicySource<ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding, String>;

    struct Fixture {
        policies: Arc<FakeListerWatcher<ValidatingAdmissionPolicy>>,
        bindings: Arc<FakeListerWatcher<ValidatingAdmissionPolicyBinding>>,
        source: Arc<TestSource>,
        compiles: Arc<AtomicUsize>,
        _stop: tokio::sync::watch::Sender<bool>,
    }

    fn policy(name: &str) -> ValidatingAdmissionPolicy {
        ValidatingAdmissionPolicy::new(name, vec![Validation::new("true", "")])
    }

    fn fixture() -> Fixture {
        let policies = Arc::new(FakeListerWatcher::new());
        let bindings = Arc::new(FakeListerWatcher::new());
        let compiles = Arc::new(AtomicUsize::new(0));
        let counter = compiles.clone();
        let compile: CompileFn<ValidatingAdmissionPolicy, String> = Arc::new(move |p| {
            counter.fetch_add(1, Ordering::SeqCst);
            if p.metadata.name == "broken" {
                Err("syntax error".to_string())
            } else {
                Ok(format!("compiled {}", p.metadata.name))
            }
        });
        let source = Arc::new(PolicySource::new(policies.clone(), bindings.clone(), compile));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let runner = source.clone();
        tokio::spawn(async move { runner.run(rx).await });
        Fixture {
            policies,
            bindings,
            source,
            compiles,
            _stop: tx,
        }
    }

    fn view(source: &TestSource) -> Vec<(String, Vec<String>)> {
        source
            .hooks()
            .iter()
            .map(|h| {
                (
                    h.policy.metadata.name.clone(),
                    h.bindings.iter().map(|b| b.metadata.name.clone()).collect(),
                )
            })
            .collect()
    }

    async fn eventually(f: impl Fn() -> bool) {
        for _ in 0..300 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn pairs(items: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        items
            .iter()
            .map(|(p, bs)| (p.to_string(), bs.iter().map(|b| b.to_string()).collect()))
            .collect()
    }

    #[tokio::test]
    async fn test_join_requires_both_sides() {
        let f = fixture();
        f.policies.add(policy("lonely"));
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("orphan", "missing"));
        eventually(|| f.source.has_synced()).await;
        eventually(|| f.source.binding_informer.store().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(view(&f.source).is_empty());

        f.policies.add(policy("missing"));
        eventually(|| !view(&f.source).is_empty()).await;
        assert_eq!(view(&f.source), pairs(&[("missing", &["orphan"])]));
    }

    #[tokio::test]
    async fn test_sorted_view() {
        let f = fixture();
        f.policies.add(policy("policy-b"));
        f.policies.add(policy("policy-a"));
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("z", "policy-a"));
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("y", "policy-a"));
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("x", "policy-b"));
        eventually(|| f.source.hooks().iter().map(|h| h.bindings.len()).sum::<usize>() == 3).await;
        assert_eq!(
            view(&f.source),
            pairs(&[("policy-a", &["y", "z"]), ("policy-b", &["x"])])
        );
    }

    #[tokio::test]
    async fn test_binding_moves_atomically() {
        let f = fixture();
        f.policies.add(policy("policy1"));
        f.policies.add(policy("policy2"));
        let binding = ValidatingAdmissionPolicyBinding::new("binding", "policy1");
        f.bindings.add(binding.clone());
        eventually(|| view(&f.source) == pairs(&[("policy1", &["binding"])])).await;

        let reader = {
            let source = f.source.clone();
            tokio::spawn(async move {
                let mut violations = 0;
                for _ in 0..200 {
                    let seen: usize = source
                        .hooks()
                        .iter()
                        .map(|h| h.bindings.iter().filter(|b| b.metadata.name == "binding").count())
                        .sum();
                    if seen != 1 {
                        violations += 1;
                    }
                    tokio::task::yield_now().await;
                }
                violations
            })
        };

        let mut moved = binding;
        moved.spec.policy_name = "policy2".to_string();
        f.bindings.update(moved);
        eventually(|| view(&f.source) == pairs(&[("policy2", &["binding"])])).await;
        assert_eq!(reader.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bindings_with_same_name_in_different_namespaces() {
        let f = fixture();
        f.policies.add(policy("p"));
        let mut first = ValidatingAdmissionPolicyBinding::new("b", "p");
        first.metadata.namespace = "ns1".to_string();
        let mut second = ValidatingAdmissionPolicyBinding::new("b", "p");
        second.metadata.namespace = "ns2".to_string();
        f.bindings.add(first.clone());
        f.bindings.add(second);

        let keys = |source: &TestSource| -> Vec<String> {
            source
                .hooks()
                .iter()
                .flat_map(|h| h.bindings.iter().map(|b| b.key().to_string()))
                .collect()
        };
        eventually(|| keys(&f.source).len() == 2).await;
        assert_eq!(keys(&f.source), vec!["ns1/b", "ns2/b"]);

        f.bindings.delete(&first);
        eventually(|| keys(&f.source).len() == 1).await;
        assert_eq!(keys(&f.source), vec!["ns2/b"]);
        assert_eq!(f.source.state.read().bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluators_compiled_lazily_and_cached() {
        let f = fixture();
        f.policies.add(policy("good"));
        f.policies.add(policy("broken"));
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("b1", "good"));
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("b2", "broken"));
        eventually(|| f.source.has_synced()).await;
        eventually(|| f.source.hooks().len() == 2).await;
        let compiles = f.compiles.load(Ordering::SeqCst);

        let hooks = f.source.hooks();
        assert_eq!(hooks[0].policy.metadata.name, "broken");
        assert_eq!(hooks[0].evaluator.as_ref().unwrap_err(), "syntax error");
        assert_eq!(hooks[1].evaluator.as_deref().unwrap(), "compiled good");

        // A binding change rebuilds the view without recompiling.
        f.bindings.add(ValidatingAdmissionPolicyBinding::new("b3", "good"));
        eventually(|| f.source.hooks()[1].bindings.len() == 2).await;
        assert_eq!(f.compiles.load(Ordering::SeqCst), compiles);

        // A policy change recompiles that policy only.
        f.policies.update(policy("good"));
        eventually(|| {
            f.source.hooks();
            f.compiles.load(Ordering::SeqCst) > compiles
        })
        .await;
        assert_eq!(f.compiles.load(Ordering::SeqCst), compiles + 1);
    }

    #[tokio::test]
    async fn test_has_synced_waits_for_lists() {
        let policies = Arc::new(FakeListerWatcher::new());
        let bindings = Arc::new(FakeListerWatcher::<ValidatingAdmissionPolicyBinding>::new());
        policies.add(policy("p"));
        bindings.add(ValidatingAdmissionPolicyBinding::new("b", "p"));
        bindings.block_lists();

        let compile: CompileFn<ValidatingAdmissionPolicy, String> = Arc::new(|_| Ok(String::new()));
        let source = Arc::new(PolicySource::new(policies, bindings.clone(), compile));
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let runner = source.clone();
        tokio::spawn(async move { runner.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!source.has_synced());

        let synced: InformerSynced = {
            let source = source.clone();
            Arc::new(move || source.has_synced())
        };
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_cache_sync(stop_rx, &[synced]).await });
        bindings.unblock_lists();
        assert!(waiter.await.unwrap());
        assert_eq!(source.hooks().len(), 1);
    }
}
