//! Action dispatch once a mission's condition fires.

use std::sync::Arc;

use crate::domain::{Mission, MissionKind, SwapSide};
use crate::execution::{
    ActivityEntry, ActivityRecorder, ExecutionClient, ExecutionReceipt, IdentityResolver,
    SwapOrder,
};

/// Orients and executes the financial action of a triggered mission.
pub struct ExecutionDispatcher {
    executor: Arc<dyn ExecutionClient>,
    recorder: Arc<dyn ActivityRecorder>,
    identity: Arc<dyn IdentityResolver>,
    /// Canonical identifier of the asset swaps are quoted against.
    quote_asset: String,
}

impl std::fmt::Debug for ExecutionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDispatcher")
            .field("quote_asset", &self.quote_asset)
            .finish_non_exhaustive()
    }
}

impl ExecutionDispatcher {
    /// Create a dispatcher trading against `quote_asset`.
    pub fn new(
        executor: Arc<dyn ExecutionClient>,
        recorder: Arc<dyn ActivityRecorder>,
        identity: Arc<dyn IdentityResolver>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            recorder,
            identity,
            quote_asset: quote_asset.into(),
        }
    }

    /// Execute the mission's action. An `Err` here means the attempt
    /// failed and the caller decides between retry and exhaustion.
    ///
    /// Activity recording happens after a successful execution and is
    /// fire-and-forget: its failure never fails the mission.
    pub async fn dispatch(&self, mission: &Mission) -> anyhow::Result<ExecutionReceipt> {
        match mission.kind {
            MissionKind::Swap => self.dispatch_swap(mission).await,
            kind => anyhow::bail!("No dispatch route for mission kind {kind}"),
        }
    }

    async fn dispatch_swap(&self, mission: &Mission) -> anyhow::Result<ExecutionReceipt> {
        let payload = &mission.payload;
        let order = match payload.side {
            SwapSide::Buy => SwapOrder {
                from: self.quote_asset.clone(),
                to: payload.token.clone(),
                amount: payload.amount,
            },
            SwapSide::Sell => SwapOrder {
                from: payload.token.clone(),
                to: self.quote_asset.clone(),
                amount: payload.amount,
            },
        };

        let credentials = self.identity.credentials_for(&mission.user_id).await?;
        let receipt = self.executor.execute_swap(&order, &credentials).await?;
        tracing::info!(
            task_id = %mission.task_id,
            side = %payload.side,
            token = %payload.token,
            txid = %receipt.transaction_id,
            "Swap executed"
        );

        let entry = ActivityEntry {
            kind: mission.kind,
            side: payload.side,
            token: payload.token.clone(),
            amount: receipt.amount_from,
            usd_amount: receipt.usd_amount,
            txid: receipt.transaction_id.clone(),
        };
        if let Err(error) = self.recorder.record(&mission.user_id, &entry).await {
            tracing::warn!(task_id = %mission.task_id, %error, "Activity recording failed");
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConditionKind, ConditionSpec, SwapPayload};
    use crate::execution::Credentials;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct RecordingBackend {
        orders: Mutex<Vec<SwapOrder>>,
        entries: Mutex<Vec<(String, ActivityEntry)>>,
        fail_swap: bool,
        fail_record: bool,
    }

    impl RecordingBackend {
        fn new(fail_swap: bool, fail_record: bool) -> Arc<Self> {
            Arc::new(Self {
                orders: Mutex::new(Vec::new()),
                entries: Mutex::new(Vec::new()),
                fail_swap,
                fail_record,
            })
        }
    }

    #[async_trait]
    impl ExecutionClient for RecordingBackend {
        async fn execute_swap(
            &self,
            order: &SwapOrder,
            _credentials: &Credentials,
        ) -> anyhow::Result<ExecutionReceipt> {
            if self.fail_swap {
                anyhow::bail!("venue rejected the order");
            }
            self.orders.lock().push(order.clone());
            Ok(ExecutionReceipt {
                transaction_id: "tx-1".to_string(),
                amount_from: Some(order.amount),
                usd_amount: Some(42.0),
            })
        }
    }

    #[async_trait]
    impl ActivityRecorder for RecordingBackend {
        async fn record(&self, user_id: &str, entry: &ActivityEntry) -> anyhow::Result<()> {
            if self.fail_record {
                anyhow::bail!("activity sink down");
            }
            self.entries
                .lock()
                .push((user_id.to_string(), entry.clone()));
            Ok(())
        }
    }

    #[async_trait]
    impl IdentityResolver for RecordingBackend {
        async fn credentials_for(&self, _user_id: &str) -> anyhow::Result<Credentials> {
            Ok(Credentials("secret".to_string()))
        }
    }

    const QUOTE: &str = "So11111111111111111111111111111111111111112";

    fn mission(side: SwapSide) -> Mission {
        Mission::new(
            "user-1",
            MissionKind::Swap,
            SwapPayload {
                side,
                amount: 3.0,
                token: "BONK".to_string(),
            },
            ConditionKind::PriceLow,
            ConditionSpec {
                token: "BONK".to_string(),
                target: 0.5,
                provenance: None,
            },
            Utc::now(),
        )
    }

    fn dispatcher(backend: Arc<RecordingBackend>) -> ExecutionDispatcher {
        ExecutionDispatcher::new(backend.clone(), backend.clone(), backend, QUOTE)
    }

    #[tokio::test]
    async fn test_buy_spends_quote_asset() {
        let backend = RecordingBackend::new(false, false);
        dispatcher(backend.clone())
            .dispatch(&mission(SwapSide::Buy))
            .await
            .unwrap();

        let orders = backend.orders.lock();
        assert_eq!(orders[0].from, QUOTE);
        assert_eq!(orders[0].to, "BONK");
        assert_eq!(orders[0].amount, 3.0);
    }

    #[tokio::test]
    async fn test_sell_spends_the_token() {
        let backend = RecordingBackend::new(false, false);
        dispatcher(backend.clone())
            .dispatch(&mission(SwapSide::Sell))
            .await
            .unwrap();

        let orders = backend.orders.lock();
        assert_eq!(orders[0].from, "BONK");
        assert_eq!(orders[0].to, QUOTE);
    }

    #[tokio::test]
    async fn test_activity_entry_written_on_success() {
        let backend = RecordingBackend::new(false, false);
        dispatcher(backend.clone())
            .dispatch(&mission(SwapSide::Buy))
            .await
            .unwrap();

        let entries = backend.entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "user-1");
        assert_eq!(entries[0].1.txid, "tx-1");
        assert_eq!(entries[0].1.usd_amount, Some(42.0));
    }

    #[tokio::test]
    async fn test_record_failure_does_not_fail_dispatch() {
        let backend = RecordingBackend::new(false, true);
        let receipt = dispatcher(backend)
            .dispatch(&mission(SwapSide::Buy))
            .await
            .unwrap();
        assert_eq!(receipt.transaction_id, "tx-1");
    }

    #[tokio::test]
    async fn test_swap_failure_propagates() {
        let backend = RecordingBackend::new(true, false);
        assert!(dispatcher(backend.clone())
            .dispatch(&mission(SwapSide::Buy))
            .await
            .is_err());
        assert!(backend.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_undispatchable_kind_errors() {
        let backend = RecordingBackend::new(false, false);
        let mut m = mission(SwapSide::Buy);
        m.kind = MissionKind::AddLiquidity;
        assert!(dispatcher(backend).dispatch(&m).await.is_err());
    }
}
