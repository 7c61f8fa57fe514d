use serde::{Deserialize, Serialize};

/// Versioned parameter set of one strategy.
///
/// Every accepted `STRATEGY PARAMS` update increments the version; the runtime WAL-appends
/// the update and stamps the active version on each subsequent intent, so fills can later
/// be attributed to the parameters that produced them.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct VersionedParams {
    version: u64,
    value: serde_json::Value,
}

impl Default for VersionedParams {
    fn default() -> Self {
        Self {
            version: 0,
            value: serde_json::Value::Null,
        }
    }
}

impl VersionedParams {
    pub fn new(value: serde_json::Value) -> Self {
        Self { version: 1, value }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Replace the parameters, returning the new version.
    pub fn update(&mut self, value: serde_json::Value) -> u64 {
        self.version += 1;
        self.value = value;
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_increments_version() {
        let mut params = VersionedParams::default();
        assert_eq!(params.version(), 0);

        assert_eq!(params.update(json!({"spread": "0.01"})), 1);
        assert_eq!(params.update(json!({"spread": "0.02"})), 2);
        assert_eq!(params.value()["spread"], "0.02");
    }
}
