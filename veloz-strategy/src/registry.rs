use crate::{Strategy, StrategyError, budget::StrategyBudget, params::VersionedParams};
use derive_more::Display;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use veloz_execution::order::id::StrategyId;

/// Lifecycle state of a hosted strategy.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum StrategyState {
    /// Registered but not receiving events.
    Stopped,
    /// Receiving events and allowed to produce actions.
    Running,
    /// Frozen by the reconciler or breaker; receives events, actions are dropped.
    Frozen,
}

/// One hosted strategy instance with its runtime metadata.
///
/// Metadata (state, params version, budget, intent counter) is external to the strategy
/// implementation, which stays a pure event processor.
#[derive(Debug)]
pub struct StrategyHandle<Event> {
    pub strategy: Box<dyn Strategy<Event>>,
    pub state: StrategyState,
    pub params: VersionedParams,
    pub budget: StrategyBudget,
    /// Monotonic intent counter backing deterministic client order ids.
    pub intent_counter: u64,
}

impl<Event> StrategyHandle<Event> {
    pub fn next_counter(&mut self) -> u64 {
        self.intent_counter += 1;
        self.intent_counter
    }
}

/// Registry of the strategies hosted by one runtime.
///
/// Iteration order is registration order, keeping event delivery deterministic.
#[derive(Debug)]
pub struct StrategyRegistry<Event> {
    strategies: IndexMap<StrategyId, StrategyHandle<Event>>,
}

impl<Event> Default for StrategyRegistry<Event> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Event> StrategyRegistry<Event> {
    pub fn new() -> Self {
        Self {
            strategies: IndexMap::new(),
        }
    }

    /// Register a strategy in the `Stopped` state with default budget.
    pub fn register(&mut self, strategy: Box<dyn Strategy<Event>>) {
        let id = strategy.id();
        info!(strategy = %id, "strategy registered");
        self.strategies.insert(
            id,
            StrategyHandle {
                strategy,
                state: StrategyState::Stopped,
                params: VersionedParams::default(),
                budget: StrategyBudget::default(),
                intent_counter: 0,
            },
        );
    }

    pub fn get(&self, id: &StrategyId) -> Option<&StrategyHandle<Event>> {
        self.strategies.get(id)
    }

    pub fn get_mut(&mut self, id: &StrategyId) -> Option<&mut StrategyHandle<Event>> {
        self.strategies.get_mut(id)
    }

    pub fn start(&mut self, id: &StrategyId) -> bool {
        let Some(handle) = self.strategies.get_mut(id) else {
            return false;
        };
        if handle.state != StrategyState::Running {
            handle.strategy.on_start();
            handle.state = StrategyState::Running;
            info!(strategy = %id, "strategy started");
        }
        true
    }

    pub fn stop(&mut self, id: &StrategyId) -> bool {
        let Some(handle) = self.strategies.get_mut(id) else {
            return false;
        };
        if handle.state == StrategyState::Running || handle.state == StrategyState::Frozen {
            handle.strategy.on_stop();
            handle.state = StrategyState::Stopped;
            info!(strategy = %id, "strategy stopped");
        }
        true
    }

    /// Freeze every running strategy, eg/ on a reconciler balance divergence.
    pub fn freeze_all(&mut self) {
        for (id, handle) in self.strategies.iter_mut() {
            if handle.state == StrategyState::Running {
                handle.state = StrategyState::Frozen;
                info!(strategy = %id, "strategy frozen");
            }
        }
    }

    /// Unfreeze previously frozen strategies.
    pub fn unfreeze_all(&mut self) {
        for (id, handle) in self.strategies.iter_mut() {
            if handle.state == StrategyState::Frozen {
                handle.state = StrategyState::Running;
                info!(strategy = %id, "strategy unfrozen");
            }
        }
    }

    /// Apply a hot parameter update, returning the new version.
    pub fn update_params(
        &mut self,
        id: &StrategyId,
        params: serde_json::Value,
    ) -> Result<u64, StrategyError> {
        let handle = self
            .strategies
            .get_mut(id)
            .ok_or_else(|| StrategyError::InvalidParams {
                strategy: id.clone(),
                reason: "strategy not registered".into(),
            })?;

        handle.strategy.apply_params(&params)?;
        let version = handle.params.update(params);
        info!(strategy = %id, version, "strategy params updated");
        Ok(version)
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&StrategyId, &mut StrategyHandle<Event>)> {
        self.strategies.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StrategyId, &StrategyHandle<Event>)> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StrategyAction;

    #[derive(Debug)]
    struct Noop {
        id: StrategyId,
        started: bool,
    }

    impl Strategy<u64> for Noop {
        fn id(&self) -> StrategyId {
            self.id.clone()
        }

        fn apply_params(&mut self, params: &serde_json::Value) -> Result<(), StrategyError> {
            if params.get("bad").is_some() {
                return Err(StrategyError::InvalidParams {
                    strategy: self.id.clone(),
                    reason: "bad key".into(),
                });
            }
            Ok(())
        }

        fn on_start(&mut self) {
            self.started = true;
        }

        fn on_event(&mut self, _: &u64) -> Vec<StrategyAction> {
            Vec::new()
        }
    }

    #[test]
    fn test_lifecycle_and_params() {
        let mut registry = StrategyRegistry::<u64>::new();
        let id = StrategyId::new("noop");
        registry.register(Box::new(Noop {
            id: id.clone(),
            started: false,
        }));

        assert_eq!(registry.get(&id).unwrap().state, StrategyState::Stopped);
        assert!(registry.start(&id));
        assert_eq!(registry.get(&id).unwrap().state, StrategyState::Running);

        // Rejected params do not bump the version
        let version = registry
            .update_params(&id, serde_json::json!({"spread": 1}))
            .unwrap();
        assert_eq!(version, 1);
        assert!(
            registry
                .update_params(&id, serde_json::json!({"bad": true}))
                .is_err()
        );
        assert_eq!(registry.get(&id).unwrap().params.version(), 1);

        registry.freeze_all();
        assert_eq!(registry.get(&id).unwrap().state, StrategyState::Frozen);
        registry.unfreeze_all();
        assert_eq!(registry.get(&id).unwrap().state, StrategyState::Running);

        assert!(registry.stop(&id));
        assert_eq!(registry.get(&id).unwrap().state, StrategyState::Stopped);
        assert!(!registry.start(&StrategyId::new("missing")));
    }
}
