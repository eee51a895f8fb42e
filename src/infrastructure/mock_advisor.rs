//! In-memory [`AdvisorPort`] double that returns a scripted response queue,
//! grounded on the teacher's mock execution/market-data services pattern of
//! a deterministic stand-in behind the same trait the live adapter wears.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::errors::TransportFailure;
use crate::domain::ports::{AdvisorPort, AdvisorResponse, AdvisorSnapshot};

#[derive(Default)]
pub struct MockAdvisor {
    queued_responses: Mutex<Vec<AdvisorResponse>>,
    received_snapshots: Mutex<Vec<AdvisorSnapshot>>,
}

impl MockAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, response: AdvisorResponse) {
        self.queued_responses.lock().unwrap().push(response);
    }

    pub fn received_snapshot_count(&self) -> usize {
        self.received_snapshots.lock().unwrap().len()
    }
}

#[async_trait]
impl AdvisorPort for MockAdvisor {
    async fn analyze(
        &self,
        snapshot: AdvisorSnapshot,
        _ticker_hint: Option<&str>,
    ) -> Result<AdvisorResponse, TransportFailure> {
        self.received_snapshots.lock().unwrap().push(snapshot);
        self.queued_responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TransportFailure::Advisor("no mock response queued".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{Recommendation, RiskAssessment};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn snapshot() -> AdvisorSnapshot {
        AdvisorSnapshot {
            timestamp: Utc::now(),
            is_market_open: true,
            equity: dec!(10000),
            fiscal_limit: dec!(300),
            available_budget: dec!(300),
            current_exposure: dec!(0),
            positions: Vec::new(),
            market_context: "flat".to_string(),
            watchlist_prices: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn returns_queued_response_and_records_snapshot() {
        let advisor = MockAdvisor::new();
        advisor.queue_response(AdvisorResponse {
            analysis: "looks fine".to_string(),
            recommendation: Recommendation::Hold,
            action_command: "/status".to_string(),
            confidence_score: 0.8,
            risk_assessment: RiskAssessment::Low,
        });

        let response = advisor.analyze(snapshot(), None).await.unwrap();
        assert_eq!(response.recommendation, Recommendation::Hold);
        assert_eq!(advisor.received_snapshot_count(), 1);
    }

    #[tokio::test]
    async fn errors_when_no_response_queued() {
        let advisor = MockAdvisor::new();
        assert!(advisor.analyze(snapshot(), None).await.is_err());
    }
}
