//! Shared application state.

use std::sync::Arc;

use crate::auth::JwtAuth;
use crate::config::Config;
use crate::runtime::ModelRuntime;
use crate::users::UserStore;

/// State shared by all handlers. Nothing in here is mutated per request.
pub struct AppState {
    pub config: Config,
    pub runtime: Arc<dyn ModelRuntime>,
    pub users: Arc<dyn UserStore>,
    pub auth: JwtAuth,
}

impl AppState {
    pub fn new(
        config: Config,
        runtime: Arc<dyn ModelRuntime>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let auth = JwtAuth::new(&config.auth.jwt_secret, config.auth.token_ttl_secs);
        Self {
            config,
            runtime,
            users,
            auth,
        }
    }
}
