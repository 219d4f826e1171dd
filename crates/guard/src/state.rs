use crate::{config::GuardConfig, stores::Stores};

#[derive(Clone)]
pub struct GuardState {
    /// Protection-layer configuration.
    pub config: GuardConfig,
    /// Ephemeral stores (Redis).
    pub stores: Stores,
}
