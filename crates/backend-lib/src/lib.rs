// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Realtime messaging core for the chatwire server.

pub mod auth;
pub mod bot;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod presence;
pub mod push;
pub mod session;
pub mod storage;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::bot::HelpBot;
use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::hub::Hub;
use crate::push::PushGateway;
use crate::storage::Storage;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Store of record
    pub storage: Arc<dyn Storage>,
    /// Live sessions
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<Dispatcher>,
    /// Bearer token verification for the upgrade
    pub auth: Arc<dyn TokenVerifier>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wire the hub and dispatcher around `storage`
    pub fn new(
        storage: Arc<dyn Storage>,
        auth: Arc<dyn TokenVerifier>,
        push: Arc<dyn PushGateway>,
        settings: Settings,
    ) -> Self {
        let hub = Arc::new(Hub::new(storage.clone()));
        let mut dispatcher = Dispatcher::new(storage.clone(), hub.clone(), push)
            .with_preview_chars(settings.realtime.preview_chars);
        if let Some(bot_user_id) = &settings.bot_user_id {
            dispatcher = dispatcher.with_bot(bot_user_id.clone(), Arc::new(HelpBot));
        }

        Self {
            storage,
            hub,
            dispatcher: Arc::new(dispatcher),
            auth,
            settings: Arc::new(settings),
        }
    }
}
