use derive_more::Display;
use serde::Serialize;
use smol_str::{SmolStr, StrExt};
use std::borrow::Borrow;

/// Lowercase `SmolStr` name of an asset, as the engine refers to it internally.
///
/// eg/ "btc", "usdt"
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Display)]
pub struct AssetName(pub SmolStr);

impl AssetName {
    pub fn new<S>(name: S) -> Self
    where
        S: Into<SmolStr>,
    {
        let name = name.into();
        if name.chars().all(char::is_lowercase) {
            Self(name)
        } else {
            Self(name.to_lowercase_smolstr())
        }
    }
}

impl From<&str> for AssetName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for AssetName {
    fn borrow(&self) -> &str {
        self.0.borrow()
    }
}

impl AsRef<str> for AssetName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl<'de> serde::de::Deserialize<'de> for AssetName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let name = <&str>::deserialize(deserializer)?;
        Ok(AssetName::new(name))
    }
}

/// Marker for the quote asset of a symbol, used where fees or notionals are always
/// denominated in the quote.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Deserialize, Serialize, Display,
)]
pub struct QuoteAsset;
