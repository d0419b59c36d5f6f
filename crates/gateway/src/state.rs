//! Shared application state.

use std::sync::Arc;

use {
    switchyard_balancer::Registry,
    switchyard_config::Settings,
    switchyard_dispatch::{CreditSchedule, RetryDispatcher, StreamMachine},
    switchyard_metrics::MetricsHandle,
    switchyard_store::{AccountingStore, UserStore},
};

use crate::moderation::ModerationPreCheck;

pub struct AppState {
    pub settings: Settings,
    pub registry: Arc<Registry>,
    pub dispatcher: RetryDispatcher,
    pub stream_machine: StreamMachine,
    pub users: Arc<dyn UserStore>,
    pub accounting: Arc<dyn AccountingStore>,
    pub moderation: ModerationPreCheck,
    pub schedule: CreditSchedule,
    pub metrics: MetricsHandle,
}
