use crate::event::{EngineEvent, SystemEvent};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use tracing::warn;
use veloz_data::event::{MarketDataKind, MarketEvent};
use veloz_execution::event::TradingEvent;
use veloz_instrument::symbol::SymbolIndex;
use veloz_integration::channel::Tx;

/// Which events a bus subscriber receives.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum Topic {
    /// All market events, or only those of one symbol.
    Market(Option<SymbolIndex>),
    Trading,
    System,
    /// Everything, in publish order.
    All,
}

impl Topic {
    fn matches(&self, event: &EngineEvent) -> bool {
        match (self, event) {
            (Topic::All, _) => true,
            (Topic::Market(None), EngineEvent::Market(_)) => true,
            (Topic::Market(Some(symbol)), EngineEvent::Market(market)) => {
                market.symbol == *symbol
            }
            (Topic::Trading, EngineEvent::Trading(_)) => true,
            (Topic::System, EngineEvent::System(_)) => true,
            _ => false,
        }
    }
}

/// An event as delivered to bus subscribers, stamped with its publish time and sequence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct BusEvent {
    /// Monotonic publish sequence of this engine instance.
    pub sequence: u64,
    pub time_publish: DateTime<Utc>,
    pub event: EngineEvent,
}

struct Subscriber<SubTx> {
    topic: Topic,
    tx: SubTx,
    /// Disabled after the receiving half drops; lowest-priority consumers go first under
    /// sustained pressure.
    active: bool,
}

impl<SubTx> std::fmt::Debug for Subscriber<SubTx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("active", &self.active)
            .finish()
    }
}

/// Typed publish/subscribe bus for one engine instance.
///
/// Publishing happens only on the loop thread, so subscribers observe events of any one
/// symbol in exactly the venue-sequence order the loop processed them. Subscriber channels
/// are the only fan-out; a dropped receiver disables its subscription rather than failing
/// the publisher.
#[derive(Debug)]
pub struct EventBus<SubTx> {
    subscribers: Vec<Subscriber<SubTx>>,
    sequence: u64,
}

impl<SubTx> Default for EventBus<SubTx> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            sequence: 0,
        }
    }
}

impl<SubTx> EventBus<SubTx>
where
    SubTx: Tx<Item = BusEvent>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber transmitter for `topic`. Loop-thread only.
    pub fn subscribe(&mut self, topic: Topic, tx: SubTx) {
        self.subscribers.push(Subscriber {
            topic,
            tx,
            active: true,
        });
    }

    /// Publish one event to every matching subscriber, stamping publish time and sequence.
    pub fn publish(&mut self, event: EngineEvent, time_publish: DateTime<Utc>) {
        self.sequence += 1;
        let sequence = self.sequence;

        for subscriber in self
            .subscribers
            .iter_mut()
            .filter(|subscriber| subscriber.active)
        {
            if !subscriber.topic.matches(&event) {
                continue;
            }

            let delivery = BusEvent::new(sequence, time_publish, event.clone());
            if subscriber.tx.send(delivery).is_err() {
                warn!(
                    topic = ?subscriber.topic,
                    "bus subscriber receiver dropped - subscription disabled"
                );
                subscriber.active = false;
            }
        }
    }

    pub fn publish_market(
        &mut self,
        event: MarketEvent<SymbolIndex, MarketDataKind>,
        time_publish: DateTime<Utc>,
    ) {
        self.publish(EngineEvent::Market(event), time_publish)
    }

    pub fn publish_trading(&mut self, event: TradingEvent, time_publish: DateTime<Utc>) {
        self.publish(EngineEvent::Trading(event), time_publish)
    }

    pub fn publish_system(&mut self, event: SystemEvent, time_publish: DateTime<Utc>) {
        self.publish(EngineEvent::System(event), time_publish)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|subscriber| subscriber.active)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veloz_data::event::PublicTrade;
    use veloz_instrument::{Side, venue::VenueId};
    use veloz_integration::channel::{UnboundedTx, mpsc_unbounded};

    #[derive(Debug, Clone)]
    struct SendError;

    impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SendError {
        fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
            Self
        }
    }

    fn market_event(symbol: SymbolIndex, id: &str) -> EngineEvent {
        EngineEvent::Market(MarketEvent {
            time_exchange: Default::default(),
            time_received: Default::default(),
            venue: VenueId::Mock,
            symbol,
            kind: MarketDataKind::Trade(PublicTrade {
                id: id.into(),
                price: Default::default(),
                quantity: Default::default(),
                side: Side::Buy,
            }),
        })
    }

    #[test]
    fn test_topic_filtering_and_symbol_order() {
        let mut bus = EventBus::<UnboundedTx<BusEvent, SendError>>::new();

        let (all_tx, mut all_rx) = mpsc_unbounded();
        let (sym_tx, mut sym_rx) = mpsc_unbounded();
        let (sys_tx, mut sys_rx) = mpsc_unbounded();

        bus.subscribe(Topic::Market(None), all_tx);
        bus.subscribe(Topic::Market(Some(SymbolIndex(1))), sym_tx);
        bus.subscribe(Topic::System, sys_tx);

        let now = Utc::now();
        bus.publish(market_event(SymbolIndex(0), "a"), now);
        bus.publish(market_event(SymbolIndex(1), "b"), now);
        bus.publish(market_event(SymbolIndex(1), "c"), now);
        bus.publish(EngineEvent::System(SystemEvent::ShutdownRequested), now);

        // Market(None) sees all three market events in publish order
        let all: Vec<BusEvent> = std::iter::from_fn(|| all_rx.try_next()).collect();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));

        // Symbol-filtered subscriber sees only SymbolIndex(1), in venue order
        let sym: Vec<BusEvent> = std::iter::from_fn(|| sym_rx.try_next()).collect();
        assert_eq!(sym.len(), 2);

        // System subscriber sees no market events
        let sys: Vec<BusEvent> = std::iter::from_fn(|| sys_rx.try_next()).collect();
        assert_eq!(sys.len(), 1);
    }

    #[test]
    fn test_dropped_subscriber_disabled() {
        let mut bus = EventBus::<UnboundedTx<BusEvent, SendError>>::new();

        let (tx, rx) = mpsc_unbounded();
        bus.subscribe(Topic::All, tx);
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(EngineEvent::System(SystemEvent::ShutdownRequested), Utc::now());
        assert_eq!(bus.subscriber_count(), 0);

        // Publishing to a fully-disabled bus is harmless
        bus.publish(EngineEvent::System(SystemEvent::ShutdownRequested), Utc::now());
    }
}
