use crate::{
    ApiCredentials,
    client::{OrderRef, UserStream, VenueCapabilities, VenueClient},
    error::{ExecutionError, TransportError},
    event::{AssetBalance, TradingEvent},
    order::{OrderIntent, OrderKind, OrderSnapshot, TimeInForce, id::ClientOrderId},
    venue::binance::{
        signer::BinanceSigner,
        types::{
            BinanceAccount, BinanceCancelAck, BinanceError, BinanceListenKey, BinanceOrder,
            BinanceOrderAck, decode_user_event,
        },
    },
};
use chrono::Utc;
use futures::StreamExt;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};
use veloz_instrument::{Side, symbol::Symbol, venue::VenueId};

/// Binance private request signing.
pub mod signer;

/// Binance wire payloads and their normalisation into engine events.
pub mod types;

/// Listen-key keepalive cadence; Binance expires keys after 60 minutes.
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

/// Endpoints of one Binance API family.
#[derive(Debug, Clone)]
pub struct BinanceServers {
    pub rest_base: &'static str,
    pub ws_base: &'static str,
    pub order_path: &'static str,
    pub open_orders_path: &'static str,
    pub account_path: &'static str,
    pub listen_key_path: &'static str,
}

impl BinanceServers {
    pub fn for_venue(venue: VenueId) -> Result<Self, ExecutionError> {
        match venue {
            VenueId::BinanceSpot => Ok(Self {
                rest_base: "https://api.binance.com",
                ws_base: "wss://stream.binance.com:9443/ws",
                order_path: "/api/v3/order",
                open_orders_path: "/api/v3/openOrders",
                account_path: "/api/v3/account",
                listen_key_path: "/api/v3/userDataStream",
            }),
            VenueId::BinanceLinear => Ok(Self {
                rest_base: "https://fapi.binance.com",
                ws_base: "wss://fstream.binance.com/ws",
                order_path: "/fapi/v1/order",
                open_orders_path: "/fapi/v1/openOrders",
                account_path: "/fapi/v2/account",
                listen_key_path: "/fapi/v1/listenKey",
            }),
            VenueId::BinanceInverse => Ok(Self {
                rest_base: "https://dapi.binance.com",
                ws_base: "wss://dstream.binance.com/ws",
                order_path: "/dapi/v1/order",
                open_orders_path: "/dapi/v1/openOrders",
                account_path: "/dapi/v1/account",
                listen_key_path: "/dapi/v1/listenKey",
            }),
            other => Err(ExecutionError::Internal(format!(
                "BinanceClient cannot serve venue {other}"
            ))),
        }
    }
}

/// Binance family venue adapter (spot, linear, inverse).
#[derive(Debug)]
pub struct BinanceClient {
    venue: VenueId,
    servers: BinanceServers,
    http: reqwest::Client,
    signer: BinanceSigner,
}

impl BinanceClient {
    pub fn new(venue: VenueId, credentials: ApiCredentials) -> Result<Self, ExecutionError> {
        Ok(Self {
            venue,
            servers: BinanceServers::for_venue(venue)?,
            http: reqwest::Client::new(),
            signer: BinanceSigner::new(credentials.key, &credentials.secret),
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> ExecutionError {
        if error.is_timeout() {
            ExecutionError::Timeout
        } else if error.is_connect() {
            ExecutionError::Transport(TransportError::Unreachable(
                self.venue,
                error.to_string(),
            ))
        } else {
            ExecutionError::Transport(TransportError::ConnectionReset(error.to_string()))
        }
    }

    /// Issue a signed private request, mapping venue error bodies onto the taxonomy.
    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExecutionError> {
        let query = self
            .signer
            .signed_query(params, Utc::now().timestamp_millis())
            .map_err(|error| ExecutionError::Protocol(error.to_string()))?;

        let url = format!("{}{}?{}", self.servers.rest_base, path, query);
        debug!(venue = %self.venue, %path, "sending signed venue request");

        let response = self
            .http
            .request(method, url)
            .header(BinanceSigner::HEADER_API_KEY, self.signer.api_key())
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| self.transport_error(error))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|error| {
                ExecutionError::Protocol(format!("malformed venue response: {error}: {body}"))
            })
        } else {
            match serde_json::from_str::<BinanceError>(&body) {
                Ok(venue_error) => Err(venue_error.into_execution_error()),
                Err(_) => Err(ExecutionError::Protocol(format!(
                    "venue error (status={status}) with undecodable body: {body}"
                ))),
            }
        }
    }

    fn place_params(
        symbol: &Symbol,
        cid: &ClientOrderId,
        intent: &OrderIntent,
    ) -> Result<Vec<(&'static str, String)>, ExecutionError> {
        let mut params: Vec<(&'static str, String)> = vec![
            ("symbol", symbol.name_venue.0.to_string()),
            (
                "side",
                match intent.side {
                    Side::Buy => "BUY".into(),
                    Side::Sell => "SELL".into(),
                },
            ),
            ("newClientOrderId", cid.0.to_string()),
            (
                "quantity",
                symbol.spec.round_quantity(intent.quantity).normalize().to_string(),
            ),
        ];

        match intent.kind {
            OrderKind::Market => params.push(("type", "MARKET".into())),
            OrderKind::Limit => {
                let price = intent.price.ok_or_else(|| {
                    ExecutionError::Protocol("limit order without price".into())
                })?;

                if intent.time_in_force.is_post_only() {
                    params.push(("type", "LIMIT_MAKER".into()));
                } else {
                    params.push(("type", "LIMIT".into()));
                    params.push(("timeInForce", time_in_force_str(intent.time_in_force)));
                }
                params.push((
                    "price",
                    symbol.spec.round_price(price).normalize().to_string(),
                ));
            }
            OrderKind::StopLimit => {
                let price = intent.price.ok_or_else(|| {
                    ExecutionError::Protocol("stop-limit order without price".into())
                })?;
                let stop = intent.stop_price.ok_or_else(|| {
                    ExecutionError::Protocol("stop-limit order without stop price".into())
                })?;

                params.push(("type", "STOP_LOSS_LIMIT".into()));
                params.push(("timeInForce", time_in_force_str(intent.time_in_force)));
                params.push((
                    "price",
                    symbol.spec.round_price(price).normalize().to_string(),
                ));
                params.push((
                    "stopPrice",
                    symbol.spec.round_price(stop).normalize().to_string(),
                ));
            }
        }

        Ok(params)
    }
}

fn time_in_force_str(tif: TimeInForce) -> String {
    match tif {
        TimeInForce::GoodUntilCancelled { .. } => "GTC".into(),
        TimeInForce::ImmediateOrCancel => "IOC".into(),
        TimeInForce::FillOrKill => "FOK".into(),
    }
}

impl VenueClient for BinanceClient {
    fn venue(&self) -> VenueId {
        self.venue
    }

    fn capabilities(&self) -> VenueCapabilities {
        VenueCapabilities {
            // Spot has no native amend; futures amend is not wired through this client
            supports_amend: false,
            supports_post_only: true,
            supports_stop_limit: true,
            supports_reduce_only: matches!(
                self.venue,
                VenueId::BinanceLinear | VenueId::BinanceInverse
            ),
        }
    }

    async fn place(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
        intent: &OrderIntent,
    ) -> Result<TradingEvent, ExecutionError> {
        let mut params = Self::place_params(symbol, cid, intent)?;
        if intent.reduce_only && self.capabilities().supports_reduce_only {
            params.push(("reduceOnly", "true".into()));
        }

        let ack: BinanceOrderAck = self
            .send_signed(Method::POST, self.servers.order_path, &params)
            .await?;

        Ok(ack.into_trading_event(self.venue, Utc::now()))
    }

    async fn cancel(
        &self,
        symbol: &Symbol,
        order: &OrderRef,
    ) -> Result<TradingEvent, ExecutionError> {
        let mut params: Vec<(&str, String)> =
            vec![("symbol", symbol.name_venue.0.to_string())];
        match order {
            OrderRef::Client(cid) => params.push(("origClientOrderId", cid.0.to_string())),
            OrderRef::Venue(void) => params.push(("orderId", void.0.to_string())),
        }

        let ack: BinanceCancelAck = self
            .send_signed(Method::DELETE, self.servers.order_path, &params)
            .await?;

        Ok(ack.into_trading_event(self.venue, Utc::now()))
    }

    async fn amend(
        &self,
        _symbol: &Symbol,
        _order: &OrderRef,
        _new_quantity: Option<Decimal>,
        _new_price: Option<Decimal>,
    ) -> Result<TradingEvent, ExecutionError> {
        Err(ExecutionError::Protocol(
            "amend is not supported on this venue; cancel and re-place".into(),
        ))
    }

    async fn query_open_orders(
        &self,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<OrderSnapshot>, ExecutionError> {
        let params: Vec<(&str, String)> = symbol
            .map(|symbol| vec![("symbol", symbol.name_venue.0.to_string())])
            .unwrap_or_default();

        let orders: Vec<BinanceOrder> = self
            .send_signed(Method::GET, self.servers.open_orders_path, &params)
            .await?;

        orders
            .into_iter()
            .map(|order| order.into_snapshot(self.venue))
            .collect()
    }

    async fn query_order(
        &self,
        symbol: &Symbol,
        cid: &ClientOrderId,
    ) -> Result<Option<OrderSnapshot>, ExecutionError> {
        let params = vec![
            ("symbol", symbol.name_venue.0.to_string()),
            ("origClientOrderId", cid.0.to_string()),
        ];

        match self
            .send_signed::<BinanceOrder>(Method::GET, self.servers.order_path, &params)
            .await
        {
            Ok(order) => Ok(Some(order.into_snapshot(self.venue)?)),
            Err(ExecutionError::Business(crate::error::BusinessReason::OrderNotFound)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn fetch_balances(&self) -> Result<Vec<AssetBalance>, ExecutionError> {
        let account: BinanceAccount = self
            .send_signed(Method::GET, self.servers.account_path, &[])
            .await?;

        let now = Utc::now();
        Ok(account
            .balances
            .into_iter()
            .filter(|balance| !balance.free.is_zero() || !balance.locked.is_zero())
            .map(|balance| balance.into_asset_balance(now))
            .collect())
    }

    async fn subscribe_user_stream(&self) -> Result<UserStream, ExecutionError> {
        // Listen key creation is API-key authenticated but unsigned
        let url = format!("{}{}", self.servers.rest_base, self.servers.listen_key_path);
        let response = self
            .http
            .request(Method::POST, &url)
            .header(BinanceSigner::HEADER_API_KEY, self.signer.api_key())
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let listen_key: BinanceListenKey = response
            .json()
            .await
            .map_err(|error| ExecutionError::Protocol(error.to_string()))?;

        let ws_url = format!("{}/{}", self.servers.ws_base, listen_key.listen_key);
        let (ws, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|error| {
                ExecutionError::Transport(TransportError::Unreachable(
                    self.venue,
                    error.to_string(),
                ))
            })?;

        info!(venue = %self.venue, "user data stream connected");

        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let venue = self.venue;

        // Reader: decode each frame and forward normalised events
        let (mut _write, mut read) = ws.split();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let payload = match message {
                    Ok(message) if message.is_text() => match message.into_text() {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(_) => continue,
                    Err(error) => {
                        warn!(%venue, ?error, "user stream read failed - closing");
                        break;
                    }
                };

                match decode_user_event(venue, payload.as_str(), Utc::now()) {
                    Ok(Some(event)) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%venue, ?error, "undecodable user stream payload skipped");
                    }
                }
            }
        });

        // Keepalive: Binance expires listen keys unless refreshed
        let http = self.http.clone();
        let api_key = self.signer.api_key().to_string();
        let keepalive_url = url.clone();
        let key = listen_key.listen_key.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LISTEN_KEY_KEEPALIVE).await;
                let result = http
                    .request(Method::PUT, &keepalive_url)
                    .header(BinanceSigner::HEADER_API_KEY, &api_key)
                    .query(&[("listenKey", &key)])
                    .send()
                    .await;
                if let Err(error) = result {
                    warn!(?error, "listen key keepalive failed");
                }
            }
        });

        Ok(Box::pin(
            tokio_stream::wrappers::UnboundedReceiverStream::new(event_rx),
        ))
    }
}
