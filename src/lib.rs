pub mod app_state;
pub mod config;
pub mod history;
pub mod ignore_eval;
pub mod indexer;
pub mod logging;
pub mod router;
pub mod search;
pub mod session;
