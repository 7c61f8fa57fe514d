use crate::error::EngineError;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::info;
use veloz_data::event::{MarketDataKind, MarketEvent};
use veloz_instrument::symbol::SymbolIndex;

/// Load a historical market event stream from a JSON-lines file.
///
/// One serialised `MarketEvent` per line; events must already be in exchange-time order
/// (the recorder writes them in arrival order, which the replay clock relies on).
pub fn load_market_events(
    path: &Path,
) -> Result<Vec<MarketEvent<SymbolIndex, MarketDataKind>>, EngineError> {
    let file = File::open(path)
        .map_err(|error| EngineError::Config(format!("market data {}: {error}", path.display())))?;

    let mut events = Vec::new();
    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.map_err(|error| EngineError::Config(format!("market data read: {error}")))?;
        if line.trim().is_empty() {
            continue;
        }

        let event = serde_json::from_str(&line).map_err(|error| {
            EngineError::Config(format!(
                "market data {} line {}: {error}",
                path.display(),
                line_number + 1
            ))
        })?;
        events.push(event);
    }

    info!(count = events.len(), path = %path.display(), "historical market events loaded");
    Ok(events)
}
