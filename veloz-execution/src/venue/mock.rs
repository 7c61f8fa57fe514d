use crate::{
    client::{OrderRef, UserStream, VenueCapabilities, VenueClient},
    error::{BusinessReason, ExecutionError},
    event::{
        AssetBalance, AssetFees, Balance, BalanceUpdate, Fill, LiquidityRole, OrderAccepted,
        OrderCanceled, OrderFillEvent, TradingEvent, TradingEventKind,
    },
    order::{
        OrderIntent, OrderKind, OrderSnapshot,
        id::{ClientOrderId, ExecId, VenueOrderId},
        status::OrderStatus,
    },
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use smol_str::ToSmolStr;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::error;
use veloz_instrument::{Side, asset::AssetName, symbol::Symbol, venue::VenueId};

/// Configuration of a [`MockVenue`].
#[derive(Debug, Clone)]
pub struct MockVenueConfig {
    pub fees_percent: Decimal,
    pub initial_balances: Vec<(AssetName, Decimal)>,
}

impl Default for MockVenueConfig {
    fn default() -> Self {
        Self {
            fees_percent: Decimal::ZERO,
            initial_balances: vec![],
        }
    }
}

#[derive(Debug, Clone)]
struct RestingOrder {
    cid: ClientOrderId,
    void: VenueOrderId,
    symbol_name: smol_str::SmolStr,
    side: Side,
    price: Decimal,
    quantity: Decimal,
    filled_quantity: Decimal,
}

#[derive(Debug)]
struct MockState {
    balances: FnvHashMap<AssetName, Balance>,
    resting: FnvHashMap<ClientOrderId, RestingOrder>,
    event_seq: u64,
    order_seq: u64,
    exec_seq: u64,
    /// Last trade price per venue symbol text, the reference for market fills.
    marks: FnvHashMap<smol_str::SmolStr, Decimal>,
}

/// Deterministic in-process venue.
///
/// Market orders fill immediately at the configured mark price; limit orders rest until a
/// [`MockVenue::trade_print`] crosses them. Responses come back synchronously, fills and
/// balance updates arrive via the user stream, matching the shape of a real venue.
#[derive(Debug)]
pub struct MockVenue {
    venue: VenueId,
    fees_percent: Decimal,
    state: Mutex<MockState>,
    event_tx: broadcast::Sender<TradingEvent>,
}

impl MockVenue {
    pub fn new(venue: VenueId, config: MockVenueConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            venue,
            fees_percent: config.fees_percent,
            state: Mutex::new(MockState {
                balances: config
                    .initial_balances
                    .into_iter()
                    .map(|(asset, total)| (asset, Balance::new(total, total)))
                    .collect(),
                resting: FnvHashMap::default(),
                event_seq: 0,
                order_seq: 0,
                exec_seq: 0,
                marks: FnvHashMap::default(),
            }),
            event_tx,
        }
    }

    /// Set the reference price market orders fill against.
    pub fn set_mark(&self, symbol: &Symbol, price: Decimal) {
        self.state
            .lock()
            .marks
            .insert(symbol.name_venue.0.clone(), price);
    }

    /// Simulate a public trade print, filling any resting limit orders it crosses.
    ///
    /// Fill events are emitted on the user stream, exactly as a live venue would deliver
    /// them.
    pub fn trade_print(&self, symbol: &Symbol, price: Decimal) {
        let mut state = self.state.lock();
        state.marks.insert(symbol.name_venue.0.clone(), price);

        let crossed: Vec<ClientOrderId> = state
            .resting
            .values()
            .filter(|order| {
                order.symbol_name == symbol.name_venue.0
                    && match order.side {
                        Side::Buy => price <= order.price,
                        Side::Sell => price >= order.price,
                    }
            })
            .map(|order| order.cid.clone())
            .collect();

        for cid in crossed {
            let Some(order) = state.resting.remove(&cid) else {
                continue;
            };
            let fill = self.build_fill(&mut state, &order, order.price, order.quantity);
            let event = Self::wrap(&mut state, self.venue, TradingEventKind::OrderFill(fill));
            self.broadcast(event);
        }
    }

    fn build_fill(
        &self,
        state: &mut MockState,
        order: &RestingOrder,
        price: Decimal,
        quantity: Decimal,
    ) -> OrderFillEvent {
        state.exec_seq += 1;
        let fee = price * quantity * self.fees_percent;

        OrderFillEvent::new(
            Some(order.cid.clone()),
            order.void.clone(),
            Fill::new(
                ExecId::new(format!("exec-{}", state.exec_seq)),
                order.filled_quantity + quantity,
                quantity,
                price,
                AssetFees::new(AssetName::new("usdt"), fee),
                LiquidityRole::Taker,
            ),
        )
    }

    fn wrap(state: &mut MockState, venue: VenueId, kind: TradingEventKind) -> TradingEvent {
        state.event_seq += 1;
        let now = Utc::now();
        TradingEvent::new(venue, state.event_seq, now, now, kind)
    }

    fn broadcast(&self, event: TradingEvent) {
        if self.event_tx.send(event).is_err() {
            // No user-stream subscriber yet; events before subscription are dropped, which
            // matches a live venue's behaviour
        }
    }

    fn next_void(state: &mut MockState) -> VenueOrderId {
        state.order_seq += 1;
        VenueOrderId::new(state.order_seq.to_smolstr())
    }

    fn balance_update(&self, state: &mut MockState, time: DateTime<Utc>) -> TradingEventKind {
        TradingEventKind::BalanceUpdate(BalanceUpdate::new(
            state
                .balances
                .iter()
                .map(|(asset, balance)| AssetBalance::new(asset.clone(), *balance, time))
                .collect(),
        ))
    }
}

impl VenueClient for MockVenue {
    fn venue(&self) -> VenueId {
        self.venue
    }

    fn capabilities(&self) -> VenueCapabilities {
        VenueCapabilities::simulated()
    }

    async fn place(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
        intent: &OrderIntent,
    ) -> Result<TradingEvent, ExecutionError> {
        let mut state = self.state.lock();

        // Duplicate cid: venue-side idempotency returns the existing acceptance
        if let Some(existing) = state.resting.get(cid) {
            let void = existing.void.clone();
            let accepted =
                TradingEventKind::OrderAccepted(OrderAccepted::new(cid.clone(), void));
            return Ok(Self::wrap(&mut state, self.venue, accepted));
        }

        let void = Self::next_void(&mut state);

        match intent.kind {
            OrderKind::Market => {
                let Some(mark) = state.marks.get(&symbol.name_venue.0).copied() else {
                    return Err(ExecutionError::Business(BusinessReason::InvalidSymbol(
                        format!("no mark price for {}", symbol.name_venue),
                    )));
                };

                let order = RestingOrder {
                    cid: cid.clone(),
                    void: void.clone(),
                    symbol_name: symbol.name_venue.0.clone(),
                    side: intent.side,
                    price: mark,
                    quantity: intent.quantity,
                    filled_quantity: Decimal::ZERO,
                };

                // Acceptance returned synchronously; the fill follows on the user stream
                let fill = self.build_fill(&mut state, &order, mark, intent.quantity);
                let fill_event =
                    Self::wrap(&mut state, self.venue, TradingEventKind::OrderFill(fill));
                self.broadcast(fill_event);

                let balances = self.balance_update(&mut state, Utc::now());
                let balance_event = Self::wrap(&mut state, self.venue, balances);
                self.broadcast(balance_event);

                let accepted =
                    TradingEventKind::OrderAccepted(OrderAccepted::new(cid.clone(), void));
                Ok(Self::wrap(&mut state, self.venue, accepted))
            }
            OrderKind::Limit => {
                let Some(price) = intent.price else {
                    return Err(ExecutionError::Protocol(
                        "limit order without price".into(),
                    ));
                };

                state.resting.insert(
                    cid.clone(),
                    RestingOrder {
                        cid: cid.clone(),
                        void: void.clone(),
                        symbol_name: symbol.name_venue.0.clone(),
                        side: intent.side,
                        price,
                        quantity: intent.quantity,
                        filled_quantity: Decimal::ZERO,
                    },
                );

                let accepted =
                    TradingEventKind::OrderAccepted(OrderAccepted::new(cid.clone(), void));
                Ok(Self::wrap(&mut state, self.venue, accepted))
            }
            OrderKind::StopLimit => Err(ExecutionError::Business(BusinessReason::Venue {
                code: -1,
                message: "MockVenue does not support StopLimit".into(),
            })),
        }
    }

    async fn cancel(
        &self,
        _symbol: &Symbol,
        order: &OrderRef,
    ) -> Result<TradingEvent, ExecutionError> {
        let mut state = self.state.lock();

        let cid = match order {
            OrderRef::Client(cid) => cid.clone(),
            OrderRef::Venue(void) => state
                .resting
                .values()
                .find(|resting| &resting.void == void)
                .map(|resting| resting.cid.clone())
                .ok_or(ExecutionError::Business(BusinessReason::OrderNotFound))?,
        };

        let Some(removed) = state.resting.remove(&cid) else {
            return Err(ExecutionError::Business(BusinessReason::OrderNotFound));
        };

        let canceled = TradingEventKind::OrderCanceled(OrderCanceled::new(
            Some(removed.cid),
            removed.void,
        ));
        Ok(Self::wrap(&mut state, self.venue, canceled))
    }

    async fn amend(
        &self,
        _symbol: &Symbol,
        _order: &OrderRef,
        _new_quantity: Option<Decimal>,
        _new_price: Option<Decimal>,
    ) -> Result<TradingEvent, ExecutionError> {
        Err(ExecutionError::Business(BusinessReason::Venue {
            code: -1,
            message: "MockVenue does not support amend".into(),
        }))
    }

    async fn query_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<OrderSnapshot>, ExecutionError> {
        let state = self.state.lock();
        Ok(state
            .resting
            .values()
            .filter(|order| {
                symbol
                    .map(|symbol| order.symbol_name == symbol.name_venue.0)
                    .unwrap_or(true)
            })
            .map(|order| {
                OrderSnapshot::new(
                    self.venue,
                    Some(order.cid.clone()),
                    order.void.clone(),
                    order.side,
                    OrderStatus::Accepted,
                    order.quantity,
                    order.filled_quantity,
                    None,
                    Some(order.price),
                )
            })
            .collect())
    }

    async fn query_order(
        &self,
        _symbol: &Symbol,
        cid: &ClientOrderId,
    ) -> Result<Option<OrderSnapshot>, ExecutionError> {
        let state = self.state.lock();
        Ok(state.resting.get(cid).map(|order| {
            OrderSnapshot::new(
                self.venue,
                Some(order.cid.clone()),
                order.void.clone(),
                order.side,
                OrderStatus::Accepted,
                order.quantity,
                order.filled_quantity,
                None,
                Some(order.price),
            )
        }))
    }

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, ExecutionError> {
        let state = self.state.lock();
        let now = Utc::now();
        Ok(state
            .balances
            .iter()
            .map(|(asset, balance)| AssetBalance::new(asset.clone(), *balance, now))
            .collect())
    }

    async fn subscribe_user_stream(&self) -> Result<UserStream, ExecutionError> {
        let stream = BroadcastStream::new(self.event_tx.subscribe()).map_while(|result| {
            match result {
                Ok(event) => Some(event),
                Err(lag) => {
                    error!(?lag, "MockVenue user stream lagged - terminating");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
