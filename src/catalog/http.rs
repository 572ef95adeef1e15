//! Catalog client over HTTP/JSON.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use super::{Catalog, ChangeStockRequest, StockChange, CHANGE_STOCK_PATH};

/// Posts stock changes to a remote catalog service.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), CHANGE_STOCK_PATH),
        })
    }
}

impl Catalog for HttpCatalog {
    fn change_stock(
        &self,
        name: &str,
        quantity: i32,
        is_increment: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StockChange>> + Send + '_>> {
        let req = ChangeStockRequest {
            name: name.to_string(),
            quantity,
            is_increment,
        };
        Box::pin(async move {
            debug!(url = %self.url, name = %req.name, quantity, is_increment, "Calling catalog");
            let response = self
                .client
                .post(&self.url)
                .json(&req)
                .send()
                .await
                .with_context(|| format!("catalog at {} unreachable", self.url))?
                .error_for_status()
                .context("catalog rejected the request")?;
            let change = response
                .json::<StockChange>()
                .await
                .context("catalog sent an unreadable response")?;
            Ok(change)
        })
    }
}
