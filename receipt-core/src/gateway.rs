//! HTTP client for the gateway counterparty: collect-receipts,
//! partial-voucher, and voucher endpoints derived from one base URL.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::error::GatewayError;
use crate::types::{PartialVoucher, Voucher};

const COLLECT_RECEIPTS_PATH: &str = "collect-receipts";
const PARTIAL_VOUCHER_PATH: &str = "partial-voucher";
const VOUCHER_PATH: &str = "voucher";

/// Keeps only scheme and host from the configured URL; path/query/fragment are discarded.
fn derive_endpoint(base: &Url, path: &'static str) -> Result<Url, GatewayError> {
    let mut endpoint = base.clone();
    endpoint.set_path(path);
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    Ok(endpoint)
}

pub struct GatewayClient {
    client: Client,
    base_url: Url,
}

impl GatewayClient {
    pub fn new(base_url: Url) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| GatewayError::Request { endpoint: "client-build", source })?;
        Ok(Self { client, base_url })
    }

    async fn post_bytes(&self, path: &'static str, body: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
        let endpoint = derive_endpoint(&self.base_url, path)?;
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|source| GatewayError::Request { endpoint: path, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status { endpoint: path, status });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| GatewayError::Decode { endpoint: path, source })
    }

    /// POST the encoded receipt batch to `/collect-receipts`. Returns a final voucher.
    pub async fn collect_receipts(&self, body: Vec<u8>) -> Result<Voucher, GatewayError> {
        let bytes = self.post_bytes(COLLECT_RECEIPTS_PATH, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|source| GatewayError::Json { endpoint: COLLECT_RECEIPTS_PATH, source })
    }

    /// POST a chunk of the encoded receipt batch (at most 25_000 receipts) to
    /// `/partial-voucher`. Returns an interim aggregate.
    pub async fn partial_voucher(&self, body: Vec<u8>) -> Result<PartialVoucher, GatewayError> {
        let bytes = self.post_bytes(PARTIAL_VOUCHER_PATH, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|source| GatewayError::Json { endpoint: PARTIAL_VOUCHER_PATH, source })
    }

    /// POST the encoded partial-voucher batch to `/voucher`. Returns the final voucher.
    pub async fn voucher(&self, body: Vec<u8>) -> Result<Voucher, GatewayError> {
        let bytes = self.post_bytes(VOUCHER_PATH, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|source| GatewayError::Json { endpoint: VOUCHER_PATH, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_endpoint_keeps_scheme_and_host_only() {
        let base: Url = "https://gateway.example.com:9000/some/path?x=1#frag".parse().unwrap();
        let endpoint = derive_endpoint(&base, COLLECT_RECEIPTS_PATH).unwrap();
        assert_eq!(endpoint.as_str(), "https://gateway.example.com:9000/collect-receipts");
    }

    #[test]
    fn derive_endpoint_varies_by_path() {
        let base: Url = "http://gateway.example.com".parse().unwrap();
        assert_eq!(
            derive_endpoint(&base, VOUCHER_PATH).unwrap().path(),
            "/voucher"
        );
        assert_eq!(
            derive_endpoint(&base, PARTIAL_VOUCHER_PATH).unwrap().path(),
            "/partial-voucher"
        );
    }
}
