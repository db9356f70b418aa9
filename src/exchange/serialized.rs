use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::exchange::{ExecutionGateway, OpenPosition, OrderOutcome, OrderRequest};
use crate::models::AccountSnapshot;
use crate::trading::trade_record::ClosedTradeOutcome;

/// Cloneable handle that funnels every call into one gateway through an
/// async mutex. Each symbol task holds its own clone.
pub struct SerializedGateway<G> {
    inner: Arc<Mutex<G>>,
}

impl<G> Clone for SerializedGateway<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: ExecutionGateway> SerializedGateway<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            inner: Arc::new(Mutex::new(gateway)),
        }
    }

    /// Direct access for operations outside the gateway trait.
    pub async fn lock(&self) -> MutexGuard<'_, G> {
        self.inner.lock().await
    }
}

#[async_trait]
impl<G: ExecutionGateway> ExecutionGateway for SerializedGateway<G> {
    async fn place_order(&mut self, req: OrderRequest) -> Result<OrderOutcome> {
        self.inner.lock().await.place_order(req).await
    }

    async fn modify_order(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        self.inner
            .lock()
            .await
            .modify_order(ticket, stop_loss, take_profit)
            .await
    }

    async fn open_positions(&mut self, symbol: &str) -> Result<Vec<OpenPosition>> {
        self.inner.lock().await.open_positions(symbol).await
    }

    async fn closed_trade_outcomes(
        &mut self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClosedTradeOutcome>> {
        self.inner
            .lock()
            .await
            .closed_trade_outcomes(symbol, since)
            .await
    }

    async fn account_snapshot(&mut self) -> Result<AccountSnapshot> {
        self.inner.lock().await.account_snapshot().await
    }
}
