//! Community voting backend.
//!
//! Two flavours of time-boxed voting share one idea:
//!
//! - the **election**: one singleton window, one ballot per voter, which the
//!   voter may change as often as they like while the window is open. Results
//!   stay hidden until the window has ended *and* an admin has published them.
//! - **polls**: each with its own window and options; a voter gets exactly one
//!   vote per poll and can never take it back.
//!
//! Window status is always derived from the clock (see [`window`]); the
//! at-most-one-vote guarantees are enforced atomically by the [`store`].

use std::sync::Arc;

pub mod auth;
pub mod ballots;
pub mod candidates;
pub mod config;
pub mod error;
pub mod extract;
pub mod feed;
pub mod feedback;
pub mod models;
pub mod polls;
pub mod publication;
pub mod routes;
pub mod store;
pub mod window;

pub use auth::{Authenticator, SupabaseAuth};
pub use config::Config;
pub use error::{AppError, VoteError};
pub use routes::build_router;
pub use store::{MemoryStore, PgStore, Store};

// ===== App State =====

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn Authenticator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, auth: Arc<dyn Authenticator>, config: Config) -> Self {
        Self {
            store,
            auth,
            config: Arc::new(config),
        }
    }
}
