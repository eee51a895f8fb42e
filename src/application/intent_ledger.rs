//! In-memory pending-intent bookkeeping. Two independently-keyed maps so a
//! sell confirmation for a ticker never collides with a buy proposal for the
//! same ticker (§4.5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::state::{PendingAction, PendingProposal};

#[derive(Debug, Default)]
pub struct IntentLedger {
    pub pending_actions: HashMap<String, PendingAction>,
    pub pending_proposals: HashMap<String, PendingProposal>,
}

impl IntentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_action(&mut self, action: PendingAction) {
        self.pending_actions.insert(action.ticker.clone(), action);
    }

    pub fn insert_proposal(&mut self, proposal: PendingProposal) {
        self.pending_proposals
            .insert(proposal.ticker.clone(), proposal);
    }

    pub fn take_action(&mut self, ticker: &str) -> Option<PendingAction> {
        self.pending_actions.remove(ticker)
    }

    pub fn take_proposal(&mut self, ticker: &str) -> Option<PendingProposal> {
        self.pending_proposals.remove(ticker)
    }

    pub fn peek_action(&self, ticker: &str) -> Option<&PendingAction> {
        self.pending_actions.get(ticker)
    }

    pub fn peek_proposal(&self, ticker: &str) -> Option<&PendingProposal> {
        self.pending_proposals.get(ticker)
    }

    /// Drops any intent older than `ttl`, returning the tickers that were
    /// GC'd so the caller can notify chat about each lapsed intent.
    pub fn purge_expired(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) -> Vec<String> {
        let mut purged = Vec::new();

        self.pending_actions.retain(|ticker, action| {
            if action.is_expired(now, ttl) {
                purged.push(ticker.clone());
                false
            } else {
                true
            }
        });

        self.pending_proposals.retain(|ticker, proposal| {
            if proposal.is_expired(now, ttl) {
                purged.push(ticker.clone());
                false
            } else {
                true
            }
        });

        purged
    }
}
