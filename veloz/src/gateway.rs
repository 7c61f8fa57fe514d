use crate::{
    bus::BusEvent,
    event::PlaceSpec,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use veloz_execution::order::{
    OrderKind, TimeInForce,
    id::{ClientOrderId, StrategyId},
};
use veloz_instrument::{Side, symbol::SymbolText};

/// One parsed gateway command.
///
/// The wire format is a whitespace-separated line per command; responses are single lines
/// prefixed `OK` or `ERR <reason>`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum GatewayRequest {
    Ping,
    Status,
    OrderPlace {
        symbol: SymbolText,
        spec: PlaceSpec,
        strategy: StrategyId,
    },
    OrderCancel {
        cid: ClientOrderId,
    },
    OrderQuery {
        cid: ClientOrderId,
    },
    StrategyStart {
        strategy: StrategyId,
    },
    StrategyStop {
        strategy: StrategyId,
    },
    StrategyParams {
        strategy: StrategyId,
        params: serde_json::Value,
    },
    StrategyMetrics {
        strategy: StrategyId,
    },
    BacktestRun {
        config: serde_json::Value,
    },
    KillSwitch {
        engaged: bool,
    },
}

/// Response to one gateway command, already in wire shape.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum GatewayResponse {
    Ok(Option<String>),
    Err(String),
}

impl GatewayResponse {
    pub fn ok() -> Self {
        Self::Ok(None)
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        Self::Ok(Some(detail.into()))
    }

    pub fn err(reason: impl Into<String>) -> Self {
        Self::Err(reason.into())
    }

    /// Render the single response line (without trailing newline).
    pub fn render(&self) -> String {
        match self {
            GatewayResponse::Ok(None) => "OK".to_string(),
            GatewayResponse::Ok(Some(detail)) => format!("OK {detail}"),
            GatewayResponse::Err(reason) => format!("ERR {reason}"),
        }
    }
}

/// Strategy id attached to orders placed directly through the gateway.
pub fn gateway_strategy() -> StrategyId {
    StrategyId::new("gateway")
}

/// Parse one command line.
pub fn parse_line(line: &str) -> Result<GatewayRequest, String> {
    let mut parts = line.split_whitespace();
    let head = parts.next().ok_or("empty command")?;

    match (head, parts.next()) {
        ("PING", None) => Ok(GatewayRequest::Ping),
        ("STATUS", None) => Ok(GatewayRequest::Status),
        ("ORDER", Some("PLACE")) => parse_order_place(&parts.collect::<Vec<_>>()),
        ("ORDER", Some("CANCEL")) => {
            let cid = parts.next().ok_or("ORDER CANCEL requires <client_order_id>")?;
            Ok(GatewayRequest::OrderCancel {
                cid: ClientOrderId::new(cid),
            })
        }
        ("ORDER", Some("QUERY")) => {
            let cid = parts.next().ok_or("ORDER QUERY requires <client_order_id>")?;
            Ok(GatewayRequest::OrderQuery {
                cid: ClientOrderId::new(cid),
            })
        }
        ("STRATEGY", Some("START")) => {
            let id = parts.next().ok_or("STRATEGY START requires <strategy_id>")?;
            Ok(GatewayRequest::StrategyStart {
                strategy: StrategyId::new(id),
            })
        }
        ("STRATEGY", Some("STOP")) => {
            let id = parts.next().ok_or("STRATEGY STOP requires <strategy_id>")?;
            Ok(GatewayRequest::StrategyStop {
                strategy: StrategyId::new(id),
            })
        }
        ("STRATEGY", Some("PARAMS")) => {
            let id = parts.next().ok_or("STRATEGY PARAMS requires <strategy_id>")?;
            let json = parts.collect::<Vec<_>>().join(" ");
            let params = serde_json::from_str(&json)
                .map_err(|error| format!("invalid params json: {error}"))?;
            Ok(GatewayRequest::StrategyParams {
                strategy: StrategyId::new(id),
                params,
            })
        }
        ("STRATEGY", Some("METRICS")) => {
            let id = parts
                .next()
                .ok_or("STRATEGY METRICS requires <strategy_id>")?;
            Ok(GatewayRequest::StrategyMetrics {
                strategy: StrategyId::new(id),
            })
        }
        ("BACKTEST", Some("RUN")) => {
            let json = parts.collect::<Vec<_>>().join(" ");
            let config = serde_json::from_str(&json)
                .map_err(|error| format!("invalid backtest config: {error}"))?;
            Ok(GatewayRequest::BacktestRun { config })
        }
        ("KILL", Some("SWITCH")) => match parts.next() {
            Some("on") => Ok(GatewayRequest::KillSwitch { engaged: true }),
            Some("off") => Ok(GatewayRequest::KillSwitch { engaged: false }),
            _ => Err("KILL SWITCH requires on|off".into()),
        },
        (head, sub) => Err(format!(
            "unknown command: {head}{}",
            sub.map(|sub| format!(" {sub}")).unwrap_or_default()
        )),
    }
}

/// `ORDER PLACE <symbol> <side> <kind> <qty> [price] [tif] [client_order_id]`
fn parse_order_place(args: &[&str]) -> Result<GatewayRequest, String> {
    let [symbol, side, kind, quantity, rest @ ..] = args else {
        return Err("ORDER PLACE requires <symbol> <side> <kind> <qty>".into());
    };

    let side = match *side {
        "buy" | "BUY" => Side::Buy,
        "sell" | "SELL" => Side::Sell,
        other => return Err(format!("invalid side: {other}")),
    };

    let kind = match *kind {
        "market" | "MARKET" => OrderKind::Market,
        "limit" | "LIMIT" => OrderKind::Limit,
        "stop_limit" | "STOP_LIMIT" => OrderKind::StopLimit,
        other => return Err(format!("invalid kind: {other}")),
    };

    let quantity: Decimal = quantity
        .parse()
        .map_err(|_| format!("invalid quantity: {quantity}"))?;

    let mut rest = rest.iter();
    let price: Option<Decimal> = if kind == OrderKind::Market {
        None
    } else {
        let raw = rest.next().ok_or("limit order requires [price]")?;
        Some(raw.parse().map_err(|_| format!("invalid price: {raw}"))?)
    };

    let time_in_force = match rest.next() {
        None => TimeInForce::GoodUntilCancelled { post_only: false },
        Some(&"gtc") => TimeInForce::GoodUntilCancelled { post_only: false },
        Some(&"post_only") => TimeInForce::GoodUntilCancelled { post_only: true },
        Some(&"ioc") => TimeInForce::ImmediateOrCancel,
        Some(&"fok") => TimeInForce::FillOrKill,
        Some(other) => return Err(format!("invalid tif: {other}")),
    };

    let cid_override = rest
        .next()
        .map(|cid| ClientOrderId::new(SmolStr::new(cid)));

    Ok(GatewayRequest::OrderPlace {
        symbol: SymbolText::new(SmolStr::new(*symbol)),
        spec: PlaceSpec::new(side, kind, time_in_force, quantity, price, cid_override),
        strategy: gateway_strategy(),
    })
}

/// Render one bus event as an `EVENT <json>` line for the gateway stream.
pub fn render_event(event: &BusEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(format!("EVENT {json}")),
        Err(error) => {
            warn!(?error, "bus event not serialisable for gateway stream");
            None
        }
    }
}

/// Serve one gateway connection over any bidirectional byte stream.
///
/// Commands are forwarded to the engine loop through `request_tx` (a oneshot per request
/// carries the response back); bus events arriving on `event_rx` are interleaved as
/// `EVENT` lines.
pub async fn serve_connection<R, W>(
    reader: R,
    mut writer: W,
    request_tx: tokio::sync::mpsc::UnboundedSender<(
        GatewayRequest,
        tokio::sync::oneshot::Sender<GatewayResponse>,
    )>,
    mut event_rx: tokio::sync::mpsc::UnboundedReceiver<BusEvent>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    info!("gateway connection established");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("gateway connection closed by peer");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }

                let response = match parse_line(&line) {
                    Ok(request) => {
                        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
                        if request_tx.send((request, response_tx)).is_err() {
                            GatewayResponse::err("engine unavailable")
                        } else {
                            response_rx
                                .await
                                .unwrap_or_else(|_| GatewayResponse::err("engine dropped request"))
                        }
                    }
                    Err(reason) => GatewayResponse::err(reason),
                };

                writer.write_all(response.render().as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            event = event_rx.recv() => {
                let Some(event) = event else {
                    debug!("gateway event stream ended");
                    return Ok(());
                };
                if let Some(line) = render_event(&event) {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_matrix() {
        struct TestCase {
            line: &'static str,
            expected: Result<GatewayRequest, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0
                line: "PING",
                expected: Ok(GatewayRequest::Ping),
            },
            TestCase {
                // TC1
                line: "STATUS",
                expected: Ok(GatewayRequest::Status),
            },
            TestCase {
                // TC2
                line: "ORDER CANCEL s1-7",
                expected: Ok(GatewayRequest::OrderCancel {
                    cid: ClientOrderId::new("s1-7"),
                }),
            },
            TestCase {
                // TC3
                line: "KILL SWITCH on",
                expected: Ok(GatewayRequest::KillSwitch { engaged: true }),
            },
            TestCase {
                // TC4: unknown command
                line: "FROB",
                expected: Err(()),
            },
            TestCase {
                // TC5: missing args
                line: "ORDER PLACE BTCUSDT buy",
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let parsed = parse_line(test.line).map_err(|_| ());
            assert_eq!(parsed, test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_parse_order_place_full() {
        let parsed =
            parse_line("ORDER PLACE BTCUSDT buy limit 0.5 50000 post_only my-cid-1").unwrap();

        let GatewayRequest::OrderPlace { symbol, spec, .. } = parsed else {
            panic!("expected OrderPlace");
        };
        assert_eq!(symbol, SymbolText::new("BTCUSDT"));
        assert_eq!(spec.side, Side::Buy);
        assert_eq!(spec.kind, OrderKind::Limit);
        assert_eq!(spec.quantity, dec!(0.5));
        assert_eq!(spec.price, Some(dec!(50000)));
        assert_eq!(
            spec.time_in_force,
            TimeInForce::GoodUntilCancelled { post_only: true }
        );
        assert_eq!(spec.cid_override, Some(ClientOrderId::new("my-cid-1")));
    }

    #[test]
    fn test_parse_market_order_skips_price() {
        let parsed = parse_line("ORDER PLACE BTCUSDT sell market 1.0").unwrap();

        let GatewayRequest::OrderPlace { spec, .. } = parsed else {
            panic!("expected OrderPlace");
        };
        assert_eq!(spec.kind, OrderKind::Market);
        assert_eq!(spec.price, None);
    }

    #[test]
    fn test_parse_strategy_params_json() {
        let parsed = parse_line(r#"STRATEGY PARAMS mom {"spread": "0.01", "depth": 3}"#).unwrap();

        let GatewayRequest::StrategyParams { strategy, params } = parsed else {
            panic!("expected StrategyParams");
        };
        assert_eq!(strategy, StrategyId::new("mom"));
        assert_eq!(params["depth"], 3);
    }

    #[test]
    fn test_response_render() {
        assert_eq!(GatewayResponse::ok().render(), "OK");
        assert_eq!(GatewayResponse::ok_with("PONG").render(), "OK PONG");
        assert_eq!(GatewayResponse::err("nope").render(), "ERR nope");
    }
}
