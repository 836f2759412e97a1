use crate::{
    api::{self, ApiConfig, AppState},
    session::{
        CredentialStore, SessionCache, SessionConfig, SessionService, SlidingWindowThrottle,
        ThrottlePolicy,
    },
    storage::{
        self,
        memory::{MemoryCredentialStore, MemorySessionCache},
        postgres::{PgCredentialStore, PgSessionCache},
    },
};
use anyhow::Result;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub cookie_secret: SecretString,
    pub frontend_base_url: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub cleanup_grace_seconds: u64,
    pub trusted_proxy_headers: bool,
    pub login_window_seconds: u64,
    pub login_max_attempts: usize,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
            .with_cleanup_grace_seconds(self.cleanup_grace_seconds)
            .with_throttle(ThrottlePolicy::new(
                Duration::from_secs(self.login_window_seconds),
                self.login_max_attempts,
            ))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the cookie secret is
/// unusable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.session_config();
    debug!(?config, "Session configuration");

    let (store, cache): (Arc<dyn CredentialStore>, Arc<dyn SessionCache>) =
        if let Some(dsn) = &args.dsn {
            let pool = storage::connect(dsn).await?;
            (
                Arc::new(PgCredentialStore::new(pool.clone())),
                Arc::new(PgSessionCache::new(pool)),
            )
        } else {
            warn!("No DSN given, credentials and sessions live in process memory");
            (
                Arc::new(MemoryCredentialStore::new()),
                Arc::new(MemorySessionCache::new()),
            )
        };

    let throttle = Arc::new(SlidingWindowThrottle::new(config.throttle()));
    let sessions = SessionService::new(config, store, cache, throttle);

    let api_config = ApiConfig::new(args.frontend_base_url, args.cookie_secret)
        .with_trusted_proxy_headers(args.trusted_proxy_headers);
    let state = AppState::new(sessions, &api_config)?;

    api::new(args.port, Arc::new(state), &api_config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_from_args() {
        let args = Args {
            port: 8080,
            dsn: None,
            cookie_secret: SecretString::from("cookie-secret".to_string()),
            frontend_base_url: "http://localhost:5173".to_string(),
            access_token_ttl_seconds: 60,
            refresh_token_ttl_seconds: 600,
            cleanup_grace_seconds: 10,
            trusted_proxy_headers: false,
            login_window_seconds: 30,
            login_max_attempts: 3,
        };
        let config = args.session_config();
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 600);
        assert_eq!(config.retention(), Duration::from_secs(610));
        assert_eq!(config.throttle().window(), Duration::from_secs(30));
        assert_eq!(config.throttle().max_attempts(), 3);
    }
}
