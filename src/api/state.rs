//! Shared application state.

use std::sync::Arc;

use crate::store::Store;
use crate::turn::TurnBroker;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub broker: Arc<TurnBroker>,
}

impl AppState {
    pub fn new(store: Store, broker: TurnBroker) -> Self {
        Self {
            store,
            broker: Arc::new(broker),
        }
    }
}
