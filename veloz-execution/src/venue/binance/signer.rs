use hmac::{Hmac, Mac};
use sha2::Sha256;
use veloz_integration::error::SocketError;

/// Signs Binance private REST requests: HMAC-SHA256 over the url-encoded query string,
/// hex-encoded, appended as the `signature` query parameter.
#[derive(Debug, Clone)]
pub struct BinanceSigner {
    api_key: String,
    mac: Hmac<Sha256>,
}

impl BinanceSigner {
    /// Header carrying the API key on every private request.
    pub const HEADER_API_KEY: &'static str = "X-MBX-APIKEY";

    pub fn new(api_key: String, api_secret: &str) -> Self {
        let mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
            .expect("HMAC-SHA256 accepts keys of any length");
        Self { api_key, mac }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Hex signature over the provided query string.
    pub fn sign(&self, query: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Url-encode `params` with the mandatory `timestamp`, and append the signature.
    pub fn signed_query(
        &self,
        params: &[(&str, String)],
        timestamp_ms: i64,
    ) -> Result<String, SocketError> {
        let mut pairs: Vec<(&str, String)> = params.to_vec();
        pairs.push(("timestamp", timestamp_ms.to_string()));

        let query = serde_urlencoded::to_string(&pairs)?;
        let signature = self.sign(&query);

        Ok(format!("{query}&signature={signature}"))
    }
}
