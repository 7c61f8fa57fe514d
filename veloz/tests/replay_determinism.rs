//! Replay runs must be bit-identical given identical inputs and parameters: same event
//! stream + same strategy + same seed => same orders, fills and summary.

use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use veloz::{
    config::EngineConfig,
    event::EngineEvent,
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

/// Buys one unit whenever a trade prints below its threshold, at most once per print.
#[derive(Debug)]
struct DipBuyer {
    id: StrategyId,
    threshold: Decimal,
}

impl Strategy<EngineEvent> for DipBuyer {
    fn id(&self) -> StrategyId {
        self.id.clone()
    }

    fn apply_params(&mut self, params: &serde_json::Value) -> Result<(), StrategyError> {
        if let Some(threshold) = params.get("threshold").and_then(|value| value.as_str()) {
            self.threshold = threshold.parse().map_err(|_| StrategyError::InvalidParams {
                strategy: self.id.clone(),
                reason: "threshold not a decimal".into(),
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

        if trade.price < self.threshold {
            vec![StrategyAction::Open(OpenRequest::new(
                market.symbol,
                Side::Buy,
                OrderKind::Limit,
                TimeInForce::GoodUntilCancelled { post_only: false },
                dec!(1),
                Some(trade.price),
                None,
                false,
            ))]
        } else {
            Vec::new()
        }
    }
}

fn synthetic_tape() -> Vec<MarketEvent<SymbolIndex, MarketDataKind>> {
    // Fixed epoch so both runs consume byte-identical inputs
    let start = chrono::DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap();
    let prices = [
        dec!(100),
        dec!(99),
        dec!(101),
        dec!(98),
        dec!(98),
        dec!(102),
        dec!(97),
        dec!(99),
        dec!(96),
        dec!(100),
    ];

    prices
        .iter()
        .enumerate()
        .map(|(index, price)| MarketEvent {
            time_exchange: start + TimeDelta::seconds(index as i64),
            time_received: start + TimeDelta::seconds(index as i64),
            venue: VenueId::Sim,
            symbol: SymbolIndex(0),
            kind: MarketDataKind::Trade(PublicTrade {
                id: format!("t{index}").into(),
                price: *price,
                quantity: dec!(1),
                side: Side::Sell,
            }),
        })
        .collect()
}

fn run_once(seed: u64) -> (veloz::replay::ReplaySummary, Vec<String>) {
    let symbols = SymbolSet::builder()
        .extend([symbol(VenueId::Sim, "btc", "usdt")])
        .build();

    let mut runtime = StrategyRuntime::new();
    let id = StrategyId::new("dip");
    runtime.register(Box::new(DipBuyer {
        id: id.clone(),
        threshold: dec!(99),
    }));
    runtime.start(&id);

    let tape = synthetic_tape();
    let start_time = tape.first().unwrap().time_exchange;

    let mut replay = ReplayEnvironment::new(
        start_time,
        EngineConfig::default(),
        MatchingConfig {
            rng_seed: seed,
            ..Default::default()
        },
        symbols,
        runtime,
    );
    replay.seed_balances(
        VenueId::Sim,
        vec![AssetBalance::new(
            AssetName::new("usdt"),
            Balance::new(dec!(1000000), dec!(1000000)),
            start_time,
        )],
    );

    let summary = replay.run(tape);

    let mut order_log: Vec<String> = replay
        .engine
        .oms
        .orders()
        .map(|order| {
            format!(
                "{}:{}:{}:{}",
                order.cid, order.status, order.filled_quantity, order.avg_fill_price
            )
        })
        .collect();
    order_log.sort();

    (summary, order_log)
}

#[test]
fn test_identical_inputs_produce_identical_runs() {
    let (first_summary, first_orders) = run_once(42);
    let (second_summary, second_orders) = run_once(42);

    assert_eq!(first_summary, second_summary);
    assert_eq!(first_orders, second_orders);
    assert!(
        first_summary.orders_submitted > 0,
        "the dip buyer must have traded on this tape"
    );
}

#[test]
fn test_different_seed_may_change_fills_but_not_intents() {
    // The seed only affects the queue model (fills), never which orders are generated
    let (first_summary, first_orders) = run_once(1);
    let (second_summary, second_orders) = run_once(2);

    assert_eq!(first_summary.orders_submitted, second_summary.orders_submitted);

    let cids = |orders: &[String]| -> Vec<String> {
        orders
            .iter()
            .map(|line| line.split(':').next().unwrap_or_default().to_string())
            .collect()
    };
    assert_eq!(cids(&first_orders), cids(&second_orders));
}
