use std::sync::Arc;

use crate::services::{advisory::AdvisoryClient, ledger::SharedLedger, storage::IpfsStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<SharedLedger>,
    pub storage: Arc<IpfsStore>,
    pub advisory: Arc<AdvisoryClient>,
}

impl AppState {
    pub fn new(ledger: SharedLedger, storage: IpfsStore, advisory: AdvisoryClient) -> Self {
        Self {
            ledger: Arc::new(ledger),
            storage: Arc::new(storage),
            advisory: Arc::new(advisory),
        }
    }
}
