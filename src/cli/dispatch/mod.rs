//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run, such as starting the
//! API server with its session configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    // An empty DSN (e.g. `TOKENGATE_DSN=`) selects the in-memory backends.
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        cookie_secret: auth_opts.cookie_secret,
        frontend_base_url: auth_opts.frontend_base_url,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        cleanup_grace_seconds: auth_opts.cleanup_grace_seconds,
        trusted_proxy_headers: auth_opts.trusted_proxy_headers,
        login_window_seconds: auth_opts.login_window_seconds,
        login_max_attempts: auth_opts.login_max_attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn maps_arguments_to_server_action() {
        temp_env::with_vars(
            [
                ("TOKENGATE_COOKIE_SECRET", Some("cookie-secret")),
                ("TOKENGATE_DSN", Some("")),
                ("TOKENGATE_REFRESH_TOKEN_TTL_SECONDS", Some("3600")),
                ("TOKENGATE_LOGIN_MAX_ATTEMPTS", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["tokengate"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert!(args.dsn.is_none());
                    assert_eq!(args.cookie_secret.expose_secret(), "cookie-secret");
                    assert_eq!(args.access_token_ttl_seconds, 900);
                    assert_eq!(args.refresh_token_ttl_seconds, 3600);
                    assert_eq!(args.login_max_attempts, 5);
                    assert_eq!(args.cleanup_grace_seconds, 300);
                    assert!(!args.trusted_proxy_headers);
                }
            },
        );
    }

    #[test]
    fn blank_cookie_secret_is_rejected() {
        temp_env::with_vars([("TOKENGATE_COOKIE_SECRET", Some("  "))], || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["tokengate"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --cookie-secret"));
            }
        });
    }
}
