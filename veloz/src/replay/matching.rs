use crate::event::{EngineEvent, ExecOp, ExecutionFailure};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::ToSmolStr;
use veloz_data::event::{MarketDataKind, MarketEvent, PublicTrade};
use veloz_execution::{
    error::{BusinessReason, ExecutionError},
    event::{
        AssetFees, Fill, LiquidityRole, OrderAccepted, OrderCanceled, OrderFillEvent,
        TradingEvent, TradingEventKind,
    },
    order::{
        OrderIntent, OrderKind,
        id::{ClientOrderId, ExecId, VenueOrderId},
    },
};
use veloz_instrument::{Side, asset::AssetName, symbol::SymbolIndex, venue::VenueId};

/// Matching model configuration.
///
/// The RNG is the only stochastic element in a replay run and is always seeded, keeping
/// runs bit-identical for identical inputs and parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MatchingConfig {
    pub taker_fee_rate: Decimal,
    pub maker_fee_rate: Decimal,
    /// Probability a resting limit order fills when a trade prints exactly at its price
    /// (trades strictly through the price always fill).
    pub queue_fill_probability: f64,
    pub rng_seed: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            taker_fee_rate: Decimal::new(10, 4),
            maker_fee_rate: Decimal::new(2, 4),
            queue_fill_probability: 0.5,
            rng_seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
struct RestingOrder {
    cid: ClientOrderId,
    void: VenueOrderId,
    side: Side,
    price: Decimal,
    quantity: Decimal,
    quote_asset: AssetName,
}

#[derive(Debug, Clone)]
struct PendingMarket {
    cid: ClientOrderId,
    void: VenueOrderId,
    side: Side,
    quantity: Decimal,
    quote_asset: AssetName,
}

/// Simulated matching engine standing in for every venue during replay.
///
/// * Market orders fill against the next trade print or book ladder.
/// * Limit orders rest and fill on trade-through; trades exactly at the limit price fill
///   with the configured queue probability.
/// * Fees come from the cost model (maker/taker rates on quote notional).
#[derive(Debug)]
pub struct MatchingEngine {
    config: MatchingConfig,
    rng: StdRng,
    resting: FnvHashMap<SymbolIndex, Vec<RestingOrder>>,
    pending_market: FnvHashMap<SymbolIndex, Vec<PendingMarket>>,
    seq: u64,
    order_seq: u64,
    time_last: DateTime<Utc>,
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Self {
            config,
            rng,
            resting: FnvHashMap::default(),
            pending_market: FnvHashMap::default(),
            seq: 0,
            order_seq: 0,
            time_last: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn place(
        &mut self,
        symbol: &veloz_instrument::symbol::Symbol,
        symbol_index: SymbolIndex,
        cid: ClientOrderId,
        intent: &OrderIntent,
    ) -> Vec<EngineEvent> {
        self.order_seq += 1;
        let void = VenueOrderId::new(self.order_seq.to_smolstr());
        let quote_asset = symbol.underlying.quote.clone();

        let accepted = self.wrap(TradingEventKind::OrderAccepted(OrderAccepted::new(
            cid.clone(),
            void.clone(),
        )));

        match intent.kind {
            OrderKind::Market => {
                self.pending_market
                    .entry(symbol_index)
                    .or_default()
                    .push(PendingMarket {
                        cid,
                        void,
                        side: intent.side,
                        quantity: intent.quantity,
                        quote_asset,
                    });
                vec![EngineEvent::Trading(accepted)]
            }
            OrderKind::Limit => {
                let Some(price) = intent.price else {
                    return vec![self.reject(cid, "limit order without price")];
                };
                self.resting
                    .entry(symbol_index)
                    .or_default()
                    .push(RestingOrder {
                        cid,
                        void,
                        side: intent.side,
                        price,
                        quantity: intent.quantity,
                        quote_asset,
                    });
                vec![EngineEvent::Trading(accepted)]
            }
            OrderKind::StopLimit => vec![self.reject(cid, "stop-limit unsupported in replay")],
        }
    }

    pub fn cancel(&mut self, cid: &ClientOrderId) -> Vec<EngineEvent> {
        let removed = self.resting.values_mut().find_map(|orders| {
            orders
                .iter()
                .position(|order| &order.cid == cid)
                .map(|index| orders.remove(index))
        });

        match removed {
            Some(removed) => {
                let canceled = self.wrap(TradingEventKind::OrderCanceled(OrderCanceled::new(
                    Some(removed.cid),
                    removed.void,
                )));
                vec![EngineEvent::Trading(canceled)]
            }
            None => vec![self.not_found(cid)],
        }
    }

    /// Match one market event, returning receipts for any simulated fills.
    pub fn on_market(
        &mut self,
        event: &MarketEvent<SymbolIndex, MarketDataKind>,
    ) -> Vec<EngineEvent> {
        self.time_last = event.time_exchange;

        match &event.kind {
            MarketDataKind::Trade(trade) => self.match_trade(event.symbol, trade),
            MarketDataKind::BookSnapshot(snapshot) => {
                self.match_ladder(event.symbol, &snapshot.bids, &snapshot.asks)
            }
            MarketDataKind::BookUpdate(update) => {
                self.match_ladder(event.symbol, &update.bids, &update.asks)
            }
            _ => Vec::new(),
        }
    }

    fn match_trade(&mut self, symbol: SymbolIndex, trade: &PublicTrade) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        // Market orders take the print price
        for pending in self.pending_market.remove(&symbol).unwrap_or_default() {
            let fill = self.fill_event(
                &pending.cid,
                &pending.void,
                pending.quantity,
                trade.price,
                &pending.quote_asset,
                LiquidityRole::Taker,
            );
            events.push(EngineEvent::Trading(fill));
        }

        // Resting limits fill on trade-through; at-price fills are probabilistic
        let filled: Vec<RestingOrder> = {
            let rng = &mut self.rng;
            let queue_probability = self.config.queue_fill_probability;

            match self.resting.get_mut(&symbol) {
                Some(orders) => {
                    let mut filled_indices = Vec::new();
                    for (index, order) in orders.iter().enumerate() {
                        let through = match order.side {
                            Side::Buy => trade.price < order.price,
                            Side::Sell => trade.price > order.price,
                        };
                        let at_price = trade.price == order.price;

                        if through || (at_price && rng.random::<f64>() < queue_probability) {
                            filled_indices.push(index);
                        }
                    }

                    // Remove back-to-front so indices stay valid, then restore queue order
                    let mut filled = Vec::new();
                    for index in filled_indices.into_iter().rev() {
                        filled.push(orders.remove(index));
                    }
                    filled.reverse();
                    filled
                }
                None => Vec::new(),
            }
        };

        for order in filled {
            let fill = self.fill_event(
                &order.cid,
                &order.void,
                order.quantity,
                order.price,
                &order.quote_asset,
                LiquidityRole::Maker,
            );
            events.push(EngineEvent::Trading(fill));
        }

        events
    }

    fn match_ladder(
        &mut self,
        symbol: SymbolIndex,
        bids: &[veloz_data::books::Level],
        asks: &[veloz_data::books::Level],
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        let best_bid = bids.first().map(|level| level.price);
        let best_ask = asks.first().map(|level| level.price);

        for pending in self.pending_market.remove(&symbol).unwrap_or_default() {
            let price = match pending.side {
                Side::Buy => best_ask,
                Side::Sell => best_bid,
            };
            match price {
                Some(price) => {
                    let fill = self.fill_event(
                        &pending.cid,
                        &pending.void,
                        pending.quantity,
                        price,
                        &pending.quote_asset,
                        LiquidityRole::Taker,
                    );
                    events.push(EngineEvent::Trading(fill));
                }
                None => {
                    // No opposing liquidity in this ladder; keep waiting
                    self.pending_market
                        .entry(symbol)
                        .or_default()
                        .push(pending);
                }
            }
        }

        events
    }

    fn fill_event(
        &mut self,
        cid: &ClientOrderId,
        void: &VenueOrderId,
        quantity: Decimal,
        price: Decimal,
        quote_asset: &AssetName,
        liquidity: LiquidityRole,
    ) -> TradingEvent {
        self.seq += 1;
        let fee_rate = match liquidity {
            LiquidityRole::Taker => self.config.taker_fee_rate,
            LiquidityRole::Maker => self.config.maker_fee_rate,
        };
        let fee = price * quantity * fee_rate;

        TradingEvent::new(
            VenueId::Sim,
            self.seq,
            self.time_last,
            self.time_last,
            TradingEventKind::OrderFill(OrderFillEvent::new(
                Some(cid.clone()),
                void.clone(),
                Fill::new(
                    ExecId::new(format!("sim-{}", self.seq)),
                    quantity,
                    quantity,
                    price,
                    AssetFees::new(quote_asset.clone(), fee),
                    liquidity,
                ),
            )),
        )
    }

    fn wrap(&mut self, kind: TradingEventKind) -> TradingEvent {
        self.seq += 1;
        TradingEvent::new(VenueId::Sim, self.seq, self.time_last, self.time_last, kind)
    }

    fn reject(&mut self, cid: ClientOrderId, reason: &str) -> EngineEvent {
        EngineEvent::ExecutionFailure(ExecutionFailure::new(
            VenueId::Sim,
            cid,
            ExecOp::Place,
            ExecutionError::Business(BusinessReason::Venue {
                code: -1,
                message: reason.to_string(),
            }),
        ))
    }

    fn not_found(&mut self, cid: &ClientOrderId) -> EngineEvent {
        EngineEvent::ExecutionFailure(ExecutionFailure::new(
            VenueId::Sim,
            cid.clone(),
            ExecOp::Cancel,
            ExecutionError::Business(BusinessReason::OrderNotFound),
        ))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use veloz_execution::order::{TimeInForce, id::StrategyId};
    use veloz_instrument::test_utils::symbol;

    fn market_trade(symbol: SymbolIndex, price: Decimal) -> MarketEvent<SymbolIndex, MarketDataKind> {
        MarketEvent {
            time_exchange: Utc::now(),
            time_received: Utc::now(),
            venue: VenueId::Sim,
            symbol,
            kind: MarketDataKind::Trade(PublicTrade {
                id: "t".into(),
                price,
                quantity: dec!(1),
                side: Side::Sell,
            }),
        }
    }

    fn limit_intent(side: Side, price: Decimal) -> OrderIntent {
        OrderIntent::new(
            StrategyId::new("s"),
            1,
            SymbolIndex(0),
            side,
            OrderKind::Limit,
            TimeInForce::GoodUntilCancelled { post_only: false },
            dec!(1),
            Some(price),
            None,
            false,
            0,
        )
    }

    fn market_intent(side: Side) -> OrderIntent {
        OrderIntent::new(
            StrategyId::new("s"),
            2,
            SymbolIndex(0),
            side,
            OrderKind::Market,
            TimeInForce::ImmediateOrCancel,
            dec!(1),
            None,
            None,
            false,
            0,
        )
    }

    #[test]
    fn test_market_order_fills_on_next_trade() {
        let mut matcher = MatchingEngine::new(MatchingConfig::default());
        let btc = symbol(VenueId::Sim, "btc", "usdt");

        let intent = market_intent(Side::Buy);
        let events = matcher.place(&btc, SymbolIndex(0), ClientOrderId::new("s-2"), &intent);
        assert_eq!(events.len(), 1, "market order only acks until the next print");

        let fills = matcher.on_market(&market_trade(SymbolIndex(0), dec!(50000)));
        assert_eq!(fills.len(), 1);
        match &fills[0] {
            EngineEvent::Trading(event) => match &event.kind {
                TradingEventKind::OrderFill(fill) => {
                    assert_eq!(fill.fill.price, dec!(50000));
                    assert_eq!(fill.fill.liquidity, LiquidityRole::Taker);
                }
                other => panic!("expected fill, got {other:?}"),
            },
            other => panic!("expected trading event, got {other:?}"),
        }
    }

    #[test]
    fn test_limit_fills_only_on_trade_through() {
        let mut matcher = MatchingEngine::new(MatchingConfig {
            queue_fill_probability: 0.0,
            ..Default::default()
        });
        let btc = symbol(VenueId::Sim, "btc", "usdt");

        let intent = limit_intent(Side::Buy, dec!(49000));
        matcher.place(&btc, SymbolIndex(0), ClientOrderId::new("s-1"), &intent);

        // At-price print with p=0: stays in the queue
        assert!(matcher.on_market(&market_trade(SymbolIndex(0), dec!(49000))).is_empty());

        // Trade-through always fills, at the limit price
        let fills = matcher.on_market(&market_trade(SymbolIndex(0), dec!(48999)));
        assert_eq!(fills.len(), 1);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let run = |seed: u64| -> Vec<u64> {
            let mut matcher = MatchingEngine::new(MatchingConfig {
                queue_fill_probability: 0.5,
                rng_seed: seed,
                ..Default::default()
            });
            let btc = symbol(VenueId::Sim, "btc", "usdt");

            let mut filled = Vec::new();
            for counter in 0..20u64 {
                let mut intent = limit_intent(Side::Buy, dec!(49000));
                intent.counter = counter;
                matcher.place(
                    &btc,
                    SymbolIndex(0),
                    intent.client_order_id(),
                    &intent,
                );
                for event in matcher.on_market(&market_trade(SymbolIndex(0), dec!(49000))) {
                    if let EngineEvent::Trading(trading) = event {
                        if matches!(trading.kind, TradingEventKind::OrderFill(_)) {
                            filled.push(trading.seq);
                        }
                    }
                }
            }
            filled
        };

        assert_eq!(run(7), run(7), "same seed must reproduce identical fills");
    }
}
