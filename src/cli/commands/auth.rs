use anyhow::anyhow;
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_COOKIE_SECRET: &str = "cookie-secret";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ACCESS_TOKEN_TTL_SECONDS: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL_SECONDS: &str = "refresh-token-ttl-seconds";
pub const ARG_CLEANUP_GRACE_SECONDS: &str = "session-cleanup-grace-seconds";
pub const ARG_TRUSTED_PROXY_HEADERS: &str = "trusted-proxy-headers";
pub const ARG_LOGIN_WINDOW_SECONDS: &str = "login-window-seconds";
pub const ARG_LOGIN_MAX_ATTEMPTS: &str = "login-max-attempts";

#[derive(Debug)]
pub struct Options {
    pub cookie_secret: SecretString,
    pub frontend_base_url: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub cleanup_grace_seconds: u64,
    pub trusted_proxy_headers: bool,
    pub login_window_seconds: u64,
    pub login_max_attempts: usize,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let cookie_secret = matches
            .get_one::<String>(ARG_COOKIE_SECRET)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_COOKIE_SECRET}"))?;

        let read_u64 = |id: &str| matches.get_one::<u64>(id).copied();

        Ok(Self {
            cookie_secret: SecretString::from(cookie_secret),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "https://tokengate.dev".to_string()),
            access_token_ttl_seconds: read_u64(ARG_ACCESS_TOKEN_TTL_SECONDS).unwrap_or(900),
            refresh_token_ttl_seconds: read_u64(ARG_REFRESH_TOKEN_TTL_SECONDS).unwrap_or(43_200),
            cleanup_grace_seconds: read_u64(ARG_CLEANUP_GRACE_SECONDS).unwrap_or(300),
            trusted_proxy_headers: matches.get_flag(ARG_TRUSTED_PROXY_HEADERS),
            login_window_seconds: read_u64(ARG_LOGIN_WINDOW_SECONDS).unwrap_or(900),
            login_max_attempts: matches
                .get_one::<usize>(ARG_LOGIN_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(5),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_cookie_args(command);
    with_session_args(command)
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_SECRET)
                .long(ARG_COOKIE_SECRET)
                .help("Secret used to sign the refresh-token cookie")
                .env("TOKENGATE_COOKIE_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used for CORS and the cookie Secure flag")
                .env("TOKENGATE_FRONTEND_BASE_URL")
                .default_value("https://tokengate.dev"),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXY_HEADERS)
                .long(ARG_TRUSTED_PROXY_HEADERS)
                .help("Take the client address from X-Forwarded-For/X-Real-IP (only behind a proxy that sets them)")
                .env("TOKENGATE_TRUSTED_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .long(ARG_ACCESS_TOKEN_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("TOKENGATE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .long(ARG_REFRESH_TOKEN_TTL_SECONDS)
                .help("Refresh token TTL in seconds")
                .env("TOKENGATE_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CLEANUP_GRACE_SECONDS)
                .long(ARG_CLEANUP_GRACE_SECONDS)
                .help("Seconds secrets and token registrations outlive the longest token")
                .env("TOKENGATE_SESSION_CLEANUP_GRACE_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_WINDOW_SECONDS)
                .long(ARG_LOGIN_WINDOW_SECONDS)
                .help("Window in seconds over which failed logins are counted")
                .env("TOKENGATE_LOGIN_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_MAX_ATTEMPTS)
                .long(ARG_LOGIN_MAX_ATTEMPTS)
                .help("Failed logins per user, address and entity before blocking")
                .env("TOKENGATE_LOGIN_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(usize)),
        )
}
