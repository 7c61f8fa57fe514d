use crate::event::EngineEvent;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use veloz_execution::order::{
    OrderIntent,
    id::{ClientOrderId, StrategyId},
};
use veloz_strategy::{
    OpenRequest, Strategy, StrategyAction, StrategyError,
    registry::{StrategyRegistry, StrategyState},
};

/// Per-strategy counters served by the `STRATEGY METRICS` control command.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct StrategyMetrics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub orders_rejected: u64,
    pub volume_traded: Decimal,
    pub realized_pnl: Decimal,
}

/// Hosts strategy instances and mediates between them and the rest of the engine.
///
/// Strategies are pure event processors; the runtime owns their identity (intent counters,
/// parameter versions), budget enforcement, and lifecycle.
#[derive(Debug)]
pub struct StrategyRuntime {
    registry: StrategyRegistry<EngineEvent>,
    metrics: FnvHashMap<StrategyId, StrategyMetrics>,
}

impl Default for StrategyRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRuntime {
    pub fn new() -> Self {
        Self {
            registry: StrategyRegistry::new(),
            metrics: FnvHashMap::default(),
        }
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy<EngineEvent>>) {
        self.metrics
            .entry(strategy.id())
            .or_default();
        self.registry.register(strategy);
    }

    pub fn start(&mut self, id: &StrategyId) -> bool {
        self.registry.start(id)
    }

    pub fn stop(&mut self, id: &StrategyId) -> bool {
        self.registry.stop(id)
    }

    pub fn freeze_all(&mut self) {
        self.registry.freeze_all()
    }

    pub fn unfreeze_all(&mut self) {
        self.registry.unfreeze_all()
    }

    pub fn update_params(
        &mut self,
        id: &StrategyId,
        params: serde_json::Value,
    ) -> Result<u64, StrategyError> {
        self.registry.update_params(id, params)
    }

    pub fn metrics(&self, id: &StrategyId) -> Option<&StrategyMetrics> {
        self.metrics.get(id)
    }

    /// Current budget occupancy of a registered strategy.
    pub fn budget(&self, id: &StrategyId) -> Option<&veloz_strategy::budget::StrategyBudget> {
        self.registry.get(id).map(|handle| &handle.budget)
    }

    pub fn is_registered(&self, id: &StrategyId) -> bool {
        self.registry.get(id).is_some()
    }

    /// Deliver one engine event to every running strategy, collecting their actions.
    ///
    /// Frozen strategies still receive the event (they may need it to stay consistent) but
    /// their actions are dropped.
    pub fn deliver(&mut self, event: &EngineEvent) -> Vec<(StrategyId, StrategyAction)> {
        let mut actions = Vec::new();

        for (id, handle) in self.registry.iter_mut() {
            if handle.state == StrategyState::Stopped {
                continue;
            }

            let produced = handle.strategy.on_event(event);

            if handle.state == StrategyState::Frozen {
                if !produced.is_empty() {
                    debug!(strategy = %id, dropped = produced.len(), "frozen strategy actions dropped");
                }
                continue;
            }

            actions.extend(produced.into_iter().map(|action| (id.clone(), action)));
        }

        actions
    }

    /// Deliver a timer tick to every running strategy.
    pub fn deliver_timer(&mut self, now: DateTime<Utc>) -> Vec<(StrategyId, StrategyAction)> {
        let mut actions = Vec::new();

        for (id, handle) in self.registry.iter_mut() {
            if handle.state != StrategyState::Running {
                continue;
            }
            actions.extend(
                handle
                    .strategy
                    .on_timer(now)
                    .into_iter()
                    .map(|action| (id.clone(), action)),
            );
        }

        actions
    }

    /// Turn an [`OpenRequest`] into a fully-identified [`OrderIntent`], reserving the
    /// strategy's budget under the intent's client order id.
    ///
    /// Returns `None` when the strategy is unknown or its budget refuses the open.
    pub fn build_intent(
        &mut self,
        strategy: &StrategyId,
        request: &OpenRequest,
        reference_price: Option<Decimal>,
    ) -> Option<OrderIntent> {
        let handle = self.registry.get_mut(strategy)?;

        let price_for_budget = request.price.or(reference_price)?;
        let notional = request.quantity * price_for_budget;

        let counter = handle.next_counter();
        let intent = OrderIntent::new(
            strategy.clone(),
            counter,
            request.symbol,
            request.side,
            request.kind,
            request.time_in_force,
            request.quantity,
            request.price,
            request.stop_price,
            request.reduce_only,
            handle.params.version(),
        );

        if let Err(refusal) = handle.budget.reserve(intent.client_order_id(), notional) {
            debug!(%strategy, %refusal, "strategy budget refused open request");
            return None;
        }

        Some(intent)
    }

    /// Release any budget reserved under the order's client order id.
    ///
    /// A no-op for orders that never reserved, eg/ gateway placements that happen to reuse
    /// a registered strategy's id.
    pub fn release_budget(&mut self, strategy: &StrategyId, cid: &ClientOrderId) {
        if let Some(handle) = self.registry.get_mut(strategy) {
            handle.budget.release(cid);
        }
    }

    pub fn record_submitted(&mut self, strategy: &StrategyId) {
        self.metrics.entry(strategy.clone()).or_default().orders_submitted += 1;
    }

    pub fn record_filled(&mut self, strategy: &StrategyId, quantity: Decimal, price: Decimal) {
        let metrics = self.metrics.entry(strategy.clone()).or_default();
        metrics.orders_filled += 1;
        metrics.volume_traded += quantity * price;
    }

    pub fn record_cancelled(&mut self, strategy: &StrategyId) {
        self.metrics.entry(strategy.clone()).or_default().orders_cancelled += 1;
    }

    pub fn record_rejected(&mut self, strategy: &StrategyId) {
        self.metrics.entry(strategy.clone()).or_default().orders_rejected += 1;
    }

    pub fn record_realized_pnl(&mut self, strategy: &StrategyId, realized: Decimal) {
        self.metrics.entry(strategy.clone()).or_default().realized_pnl = realized;
    }

    /// Owner strategy of an order's client id, derived from the deterministic id scheme.
    pub fn strategy_of(cid: &ClientOrderId) -> Option<StrategyId> {
        cid.0
            .rsplit_once('-')
            .map(|(strategy, _counter)| StrategyId::new(strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SystemEvent;
    use rust_decimal_macros::dec;
    use veloz_execution::order::{OrderKind, TimeInForce};
    use veloz_instrument::{Side, symbol::SymbolIndex};

    /// Strategy that requests one fixed open on every event.
    #[derive(Debug)]
    struct OneShot {
        id: StrategyId,
    }

    impl Strategy<EngineEvent> for OneShot {
        fn id(&self) -> StrategyId {
            self.id.clone()
        }

        fn apply_params(&mut self, _: &serde_json::Value) -> Result<(), StrategyError> {
            Ok(())
        }

        fn on_event(&mut self, _: &EngineEvent) -> Vec<StrategyAction> {
            vec![StrategyAction::Open(OpenRequest::new(
                SymbolIndex(0),
                Side::Buy,
                OrderKind::Limit,
                TimeInForce::GoodUntilCancelled { post_only: false },
                dec!(1),
                Some(dec!(100)),
                None,
                false,
            ))]
        }
    }

    #[test]
    fn test_delivery_respects_lifecycle() {
        let mut runtime = StrategyRuntime::new();
        let id = StrategyId::new("one");
        runtime.register(Box::new(OneShot { id: id.clone() }));

        let event = EngineEvent::System(SystemEvent::ShutdownRequested);

        // Stopped: no delivery
        assert!(runtime.deliver(&event).is_empty());

        runtime.start(&id);
        assert_eq!(runtime.deliver(&event).len(), 1);

        // Frozen: delivered but actions dropped
        runtime.freeze_all();
        assert!(runtime.deliver(&event).is_empty());
    }

    #[test]
    fn test_build_intent_counters_monotonic() {
        let mut runtime = StrategyRuntime::new();
        let id = StrategyId::new("one");
        runtime.register(Box::new(OneShot { id: id.clone() }));

        let request = OpenRequest::new(
            SymbolIndex(0),
            Side::Buy,
            OrderKind::Limit,
            TimeInForce::GoodUntilCancelled { post_only: false },
            dec!(1),
            Some(dec!(100)),
            None,
            false,
        );

        let first = runtime.build_intent(&id, &request, None).unwrap();
        let second = runtime.build_intent(&id, &request, None).unwrap();

        assert_eq!(first.counter + 1, second.counter);
        assert_ne!(first.client_order_id(), second.client_order_id());
        assert!(runtime.build_intent(&StrategyId::new("ghost"), &request, None).is_none());
    }

    #[test]
    fn test_strategy_of_cid() {
        assert_eq!(
            StrategyRuntime::strategy_of(&ClientOrderId::new("mom-42")),
            Some(StrategyId::new("mom"))
        );
    }
}
