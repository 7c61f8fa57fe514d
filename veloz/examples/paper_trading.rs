use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use veloz::{
    config::EngineConfig,
    event::EngineEvent,
    logging::init_logging,
    replay::{ReplayEnvironment, matching::MatchingConfig},
    runtime::StrategyRuntime,
};
use veloz_data::event::{MarketDataKind, MarketEvent, PublicTrade};
use veloz_execution::{
    event::{AssetBalance, Balance},
    order::{OrderKind, TimeInForce, id::StrategyId},
};
use veloz_instrument::{
    Side, asset::AssetName, index::SymbolSet, symbol::SymbolIndex, test_utils::symbol,
    venue::VenueId,
};
use veloz_strategy::{OpenRequest, Strategy, StrategyAction, StrategyError};

/// Toy mean-reversion strategy: buys one unit whenever the tape prints below its moving
/// reference.
#[derive(Debug)]
struct MeanReverter {
    id: StrategyId,
    reference: Option<Decimal>,
    edge: Decimal,
}

impl Strategy<EngineEvent> for MeanReverter {
    fn id(&self) -> StrategyId {
        self.id.clone()
    }

    fn apply_params(&mut self, params: &serde_json::Value) -> Result<(), StrategyError> {
        if let Some(edge) = params.get("edge").and_then(|value| value.as_str()) {
            self.edge = edge.parse().map_err(|_| StrategyError::InvalidParams {
                strategy: self.id.clone(),
                reason: "edge must be a decimal string".into(),
            })?;
        }
        Ok(())
    }

    fn on_event(&mut self, event: &EngineEvent) -> Vec<StrategyAction> {
        let EngineEvent::Market(market) = event else {
            return Vec::new();
        };
        let MarketDataKind::Trade(trade) = &market.kind else {
            return Vec::new();
        };

        let reference = *self.reference.get_or_insert(trade.price);
        let mut actions = Vec::new();

        if trade.price <= reference - self.edge {
            actions.push(StrategyAction::Open(OpenRequest::new(
                market.symbol,
                Side::Buy,
                OrderKind::Limit,
                TimeInForce::GoodUntilCancelled { post_only: false },
                dec!(1),
                Some(trade.price),
                None,
                false,
            )));
        }

        // Slow-moving reference
        self.reference = Some((reference * dec!(0.9)) + (trade.price * dec!(0.1)));
        actions
    }
}

fn main() {
    init_logging();

    let symbols = SymbolSet::builder()
        .extend([symbol(VenueId::Sim, "btc", "usdt")])
        .build();

    let mut runtime = StrategyRuntime::new();
    let id = StrategyId::new("reverter");
    runtime.register(Box::new(MeanReverter {
        id: id.clone(),
        reference: None,
        edge: dec!(50),
    }));
    runtime.start(&id);

    // A synthetic tape standing in for recorded market data
    let start = Utc::now();
    let tape: Vec<_> = (0..500)
        .map(|index| {
            let phase = Decimal::from(index % 20);
            MarketEvent {
                time_exchange: start + TimeDelta::seconds(index),
                time_received: start + TimeDelta::seconds(index),
                venue: VenueId::Sim,
                symbol: SymbolIndex(0),
                kind: MarketDataKind::Trade(PublicTrade {
                    id: format!("t{index}").into(),
                    price: dec!(50000) + (phase - dec!(10)) * dec!(15),
                    quantity: dec!(0.1),
                    side: if index % 2 == 0 { Side::Buy } else { Side::Sell },
                }),
            }
        })
        .collect();

    let mut replay = ReplayEnvironment::new(
        start,
        EngineConfig::default(),
        MatchingConfig::default(),
        symbols,
        runtime,
    );
    replay.seed_balances(
        VenueId::Sim,
        vec![AssetBalance::new(
            AssetName::new("usdt"),
            Balance::new(dec!(1000000), dec!(1000000)),
            start,
        )],
    );

    let summary = replay.run(tape);
    println!(
        "replay complete: {} events, {} orders submitted, {} filled, realized pnl {}",
        summary.events_processed,
        summary.orders_submitted,
        summary.orders_filled,
        summary.realized_pnl
    );
}
