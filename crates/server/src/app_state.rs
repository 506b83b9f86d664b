use std::sync::Arc;

use feedgate_core::app::context::AppContext;
use feedgate_core::ports::clock::Clock;
use feedgate_core::ports::http::Http;
use feedgate_core::ports::ledger::Ledger;

pub type ServerContext = AppContext<dyn Ledger, dyn Http, dyn Clock>;

#[derive(Clone)]
pub struct AppState {
    pub ctx: ServerContext,
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(ctx: ServerContext) -> Self {
        let api_key = ctx.cfg.server.api_key.as_deref().map(Arc::from);
        Self { ctx, api_key }
    }
}
