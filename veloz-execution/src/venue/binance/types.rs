use crate::{
    error::{BusinessReason, ExecutionError},
    event::{
        AssetBalance, AssetFees, Balance, BalanceUpdate, Fill, LiquidityRole, OrderAccepted,
        OrderCanceled, OrderExpired, OrderFillEvent, OrderRejected, TradingEvent,
        TradingEventKind,
    },
    order::{
        OrderSnapshot,
        id::{ClientOrderId, ExecId, VenueOrderId},
        status::OrderStatus,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use smol_str::ToSmolStr;
use veloz_instrument::{Side, asset::AssetName, venue::VenueId};

/// Deserialize a `Decimal` sent as a JSON string, as Binance does for all quantities.
pub fn de_decimal_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = <&str>::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn de_time_ms<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = i64::deserialize(deserializer)?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {millis}")))
}

/// Binance REST error body.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceError {
    pub code: i64,
    pub msg: String,
}

impl BinanceError {
    /// Map a venue error code onto the engine taxonomy.
    ///
    /// See <https://developers.binance.com/docs/binance-spot-api-docs/errors>.
    pub fn into_execution_error(self) -> ExecutionError {
        match self.code {
            -1003 | -1015 => ExecutionError::Business(BusinessReason::RateLimited),
            -1121 => ExecutionError::Business(BusinessReason::InvalidSymbol(self.msg)),
            -2010 if self.msg.contains("insufficient balance") => {
                ExecutionError::Business(BusinessReason::InsufficientFunds)
            }
            -2010 if self.msg.contains("immediately match") => {
                ExecutionError::Business(BusinessReason::PostOnlyWouldTake)
            }
            -1013 if self.msg.contains("NOTIONAL") => {
                ExecutionError::Business(BusinessReason::MinNotional)
            }
            -2013 => ExecutionError::Business(BusinessReason::OrderNotFound),
            code => ExecutionError::Business(BusinessReason::Venue {
                code,
                message: self.msg,
            }),
        }
    }
}

/// Binance order status strings, shared by REST and the user stream.
pub fn parse_order_status(raw: &str) -> Result<OrderStatus, ExecutionError> {
    match raw {
        "NEW" | "PENDING_NEW" => Ok(OrderStatus::Accepted),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        other => Err(ExecutionError::Protocol(format!(
            "unknown Binance order status: {other}"
        ))),
    }
}

/// REST response to order placement (`ACK`/`RESULT` response types).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrderAck {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    #[serde(deserialize_with = "de_time_ms")]
    pub transact_time: DateTime<Utc>,
}

impl BinanceOrderAck {
    pub fn into_trading_event(self, venue: VenueId, time_received: DateTime<Utc>) -> TradingEvent {
        TradingEvent::new(
            venue,
            // REST acks carry no stream sequence; transact time millis orders them
            self.transact_time.timestamp_millis().max(0) as u64,
            self.transact_time,
            time_received,
            TradingEventKind::OrderAccepted(OrderAccepted::new(
                ClientOrderId::new(self.client_order_id.to_smolstr()),
                VenueOrderId::new(self.order_id.to_smolstr()),
            )),
        )
    }
}

/// REST response to order cancellation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceCancelAck {
    pub symbol: String,
    pub order_id: i64,
    pub orig_client_order_id: String,
}

impl BinanceCancelAck {
    pub fn into_trading_event(self, venue: VenueId, time_received: DateTime<Utc>) -> TradingEvent {
        TradingEvent::new(
            venue,
            time_received.timestamp_millis().max(0) as u64,
            time_received,
            time_received,
            TradingEventKind::OrderCanceled(OrderCanceled::new(
                Some(ClientOrderId::new(self.orig_client_order_id.to_smolstr())),
                VenueOrderId::new(self.order_id.to_smolstr()),
            )),
        )
    }
}

/// REST view of an order (`GET /api/v3/order`, `GET /api/v3/openOrders`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrder {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    #[serde(deserialize_with = "de_decimal_str")]
    pub price: Decimal,
    #[serde(deserialize_with = "de_decimal_str")]
    pub orig_qty: Decimal,
    #[serde(deserialize_with = "de_decimal_str")]
    pub executed_qty: Decimal,
    #[serde(deserialize_with = "de_decimal_str")]
    pub cummulative_quote_qty: Decimal,
    pub status: String,
    pub side: Side,
}

impl BinanceOrder {
    pub fn into_snapshot(self, venue: VenueId) -> Result<OrderSnapshot, ExecutionError> {
        let status = parse_order_status(&self.status)?;
        let avg_fill_price = (!self.executed_qty.is_zero())
            .then(|| self.cummulative_quote_qty / self.executed_qty);

        Ok(OrderSnapshot::new(
            venue,
            Some(ClientOrderId::new(self.client_order_id.to_smolstr())),
            VenueOrderId::new(self.order_id.to_smolstr()),
            self.side,
            status,
            self.orig_qty,
            self.executed_qty,
            avg_fill_price,
            (!self.price.is_zero()).then_some(self.price),
        ))
    }
}

/// REST account information (`GET /api/v3/account`).
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceAccount {
    pub balances: Vec<BinanceBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceBalance {
    pub asset: String,
    #[serde(deserialize_with = "de_decimal_str")]
    pub free: Decimal,
    #[serde(deserialize_with = "de_decimal_str")]
    pub locked: Decimal,
}

impl BinanceBalance {
    pub fn into_asset_balance(self, time_exchange: DateTime<Utc>) -> AssetBalance {
        AssetBalance::new(
            AssetName::new(self.asset.to_smolstr()),
            Balance::new(self.free + self.locked, self.free),
            time_exchange,
        )
    }
}

/// Listen-key response (`POST /api/v3/userDataStream`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceListenKey {
    pub listen_key: String,
}

/// User-data stream payloads.
///
/// Tagged by the `e` field; unknown event types are skipped by the stream decoder.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum BinanceUserEvent {
    #[serde(rename = "executionReport")]
    ExecutionReport(BinanceExecutionReport),
    #[serde(rename = "outboundAccountPosition")]
    AccountPosition(BinanceAccountPosition),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceExecutionReport {
    /// Event time.
    #[serde(rename = "E", deserialize_with = "de_time_ms")]
    pub time: DateTime<Utc>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    /// Current execution type: NEW, TRADE, CANCELED, REJECTED, EXPIRED.
    #[serde(rename = "x")]
    pub execution_type: String,
    /// Current order status.
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "l", deserialize_with = "de_decimal_str")]
    pub last_qty: Decimal,
    #[serde(rename = "z", deserialize_with = "de_decimal_str")]
    pub cum_qty: Decimal,
    #[serde(rename = "L", deserialize_with = "de_decimal_str")]
    pub last_price: Decimal,
    #[serde(rename = "n", deserialize_with = "de_decimal_str")]
    pub commission: Decimal,
    #[serde(rename = "N")]
    pub commission_asset: Option<String>,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "m")]
    pub is_maker: bool,
    /// Order-level sequence used for stale receipt detection.
    #[serde(rename = "g", default)]
    pub order_list_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceAccountPosition {
    #[serde(rename = "E", deserialize_with = "de_time_ms")]
    pub time: DateTime<Utc>,
    #[serde(rename = "B")]
    pub balances: Vec<BinancePositionBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinancePositionBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f", deserialize_with = "de_decimal_str")]
    pub free: Decimal,
    #[serde(rename = "l", deserialize_with = "de_decimal_str")]
    pub locked: Decimal,
}

/// Decode one raw user-stream message into a normalised [`TradingEvent`].
///
/// Returns `None` for event types the engine does not consume (eg/ `balanceUpdate`
/// duplicates of `outboundAccountPosition`).
pub fn decode_user_event(
    venue: VenueId,
    payload: &str,
    time_received: DateTime<Utc>,
) -> Result<Option<TradingEvent>, ExecutionError> {
    let Ok(event) = serde_json::from_str::<BinanceUserEvent>(payload) else {
        // Unknown `e` tag or non-event frame (eg/ ping payload)
        return Ok(None);
    };

    match event {
        BinanceUserEvent::ExecutionReport(report) => {
            decode_execution_report(venue, report, time_received).map(Some)
        }
        BinanceUserEvent::AccountPosition(position) => {
            let balances = position
                .balances
                .into_iter()
                .map(|balance| {
                    AssetBalance::new(
                        AssetName::new(balance.asset.to_smolstr()),
                        Balance::new(balance.free + balance.locked, balance.free),
                        position.time,
                    )
                })
                .collect();

            Ok(Some(TradingEvent::new(
                venue,
                position.time.timestamp_millis().max(0) as u64,
                position.time,
                time_received,
                TradingEventKind::BalanceUpdate(BalanceUpdate::new(balances)),
            )))
        }
    }
}

fn decode_execution_report(
    venue: VenueId,
    report: BinanceExecutionReport,
    time_received: DateTime<Utc>,
) -> Result<TradingEvent, ExecutionError> {
    let cid = ClientOrderId::new(report.client_order_id.to_smolstr());
    let void = VenueOrderId::new(report.order_id.to_smolstr());
    let seq = report.time.timestamp_millis().max(0) as u64;

    let kind = match report.execution_type.as_str() {
        "NEW" => TradingEventKind::OrderAccepted(OrderAccepted::new(cid, void)),
        "TRADE" => {
            let fill = Fill::new(
                ExecId::new(report.trade_id.to_smolstr()),
                report.cum_qty,
                report.last_qty,
                report.last_price,
                AssetFees::new(
                    AssetName::new(
                        report
                            .commission_asset
                            .as_deref()
                            .unwrap_or("")
                            .to_smolstr(),
                    ),
                    report.commission,
                ),
                if report.is_maker {
                    LiquidityRole::Maker
                } else {
                    LiquidityRole::Taker
                },
            );

            let event = OrderFillEvent::new(Some(cid), void, fill);
            match parse_order_status(&report.order_status)? {
                OrderStatus::Filled => TradingEventKind::OrderFill(event),
                _ => TradingEventKind::OrderPartialFill(event),
            }
        }
        "CANCELED" => TradingEventKind::OrderCanceled(OrderCanceled::new(Some(cid), void)),
        "EXPIRED" => TradingEventKind::OrderExpired(OrderExpired::new(Some(cid), void)),
        "REJECTED" => TradingEventKind::OrderRejected(OrderRejected::new(
            cid,
            BusinessReason::Venue {
                code: 0,
                message: format!("execution report rejected: {}", report.order_status),
            },
        )),
        other => {
            return Err(ExecutionError::Protocol(format!(
                "unknown Binance execution type: {other}"
            )));
        }
    };

    Ok(TradingEvent::new(
        venue,
        seq,
        report.time,
        time_received,
        kind,
    ))
}
