//! Session lifecycle: login, authenticate, refresh, logout, logout-all, revoke.
//!
//! Flow Overview:
//! 1) `login` checks credentials, fetches (or creates) the principal's secret,
//!    signs an access and a refresh token with it and registers both.
//! 2) `authenticate` turns a presented token into a request-scoped
//!    [`SessionContext`]. Missing, unregistered, expired and malformed tokens
//!    each fail with their own kind; only registered tokens reach signature
//!    verification.
//! 3) `refresh` trades a verified refresh context for a new pair and drops the
//!    old refresh token.
//! 4) `logout` drops one access token; `logout_all` drops the secret, which
//!    invalidates every token of the principal at once.
//!
//! Nothing request-specific is stored on the service; callers thread the
//! context value through.

use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    cache::SessionCache,
    config::SessionConfig,
    credentials::{CredentialStore, CredentialVerifier, PublicUser},
    entity::EntityKind,
    error::AuthError,
    throttle::LoginThrottle,
    token::{peek_claims, TokenContent, TokenError, TokenIssuer, TokenKind},
};

/// Verified token bound to a single request.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub entity: EntityKind,
    pub kind: TokenKind,
    pub content: TokenContent,
    pub token: String,
}

/// Result of a successful login or refresh.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug)]
struct TokenPair {
    access: String,
    refresh: String,
}

#[derive(Clone)]
pub struct SessionService {
    config: SessionConfig,
    issuer: TokenIssuer,
    verifier: CredentialVerifier,
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn SessionCache>,
}

impl SessionService {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
        throttle: Arc<dyn LoginThrottle>,
    ) -> Self {
        let issuer = TokenIssuer::new(config.access_token_ttl(), config.refresh_token_ttl());
        let verifier = CredentialVerifier::new(store.clone(), throttle);
        Self {
            config,
            issuer,
            verifier,
            store,
            cache,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// # Errors
    /// Credential failures from [`CredentialVerifier::verify`], or `Internal`
    /// when issuing tokens keeps failing.
    #[instrument(skip(self, password), fields(%entity))]
    pub async fn login(
        &self,
        entity: EntityKind,
        username: &str,
        password: &str,
        ip: &str,
    ) -> Result<IssuedSession, AuthError> {
        let verified = self.verifier.verify(entity, username, password, ip).await?;
        let pair = self.issue_with_retry(entity, &verified.content).await?;
        info!(user_id = verified.user.id, "login succeeded");
        Ok(IssuedSession {
            user: verified.user,
            access_token: pair.access,
            refresh_token: pair.refresh,
        })
    }

    /// Verify a presented token of `kind` for `entity`.
    ///
    /// # Errors
    /// - `HeadersEmpty` when no token was presented.
    /// - `TokenRevoked` when the principal has no secret or the token is not
    ///   registered under it, which covers every token issued before a
    ///   logout-all.
    /// - `TokenExpired` when a registered token is past `exp`; its
    ///   registration is removed first, so presenting it again is `TokenRevoked`.
    /// - `TokenInvalid` for anything else, with no cache mutation.
    pub async fn authenticate(
        &self,
        entity: EntityKind,
        token: Option<&str>,
        kind: TokenKind,
    ) -> Result<SessionContext, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::HeadersEmpty)?;

        let claims = peek_claims(token).map_err(|_| AuthError::TokenInvalid)?;
        let user_id = claims.content.user_id;

        let Some(secret) = self.cache.get_secret(entity, user_id).await? else {
            debug!(%entity, user_id, "no secret for principal");
            return Err(AuthError::TokenRevoked);
        };
        if !self.cache.has_token(entity, user_id, token).await? {
            debug!(%entity, user_id, "token not registered");
            return Err(AuthError::TokenRevoked);
        }

        match self.issuer.verify(token, kind, secret.expose()) {
            Ok(content) => Ok(SessionContext {
                entity,
                kind,
                content,
                token: token.to_string(),
            }),
            Err(TokenError::Expired) => {
                self.cache.delete_token(entity, user_id, token).await?;
                debug!(%entity, user_id, "expired token removed");
                Err(AuthError::TokenExpired)
            }
            Err(err) => {
                warn!(%entity, user_id, error = %err, "rejected token");
                Err(AuthError::TokenInvalid)
            }
        }
    }

    /// Trade a verified refresh context for a new token pair.
    ///
    /// # Errors
    /// - `TokenInvalid` when `ctx` holds an access token.
    /// - `UserNotFound` or `Revoked` when the principal changed since login.
    /// - `Internal` when the cache fails; the presented refresh token is no
    ///   longer registered once issuing has started.
    #[instrument(skip(self, ctx), fields(entity = %ctx.entity, user_id = ctx.content.user_id))]
    pub async fn refresh(&self, ctx: &SessionContext) -> Result<IssuedSession, AuthError> {
        if ctx.kind != TokenKind::Refresh {
            return Err(AuthError::TokenInvalid);
        }
        let record = self
            .store
            .find_by_id(ctx.entity, ctx.content.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if record.revoked {
            return Err(AuthError::Revoked);
        }

        // The presented token is spent even if issuing the new pair fails.
        self.cache
            .delete_token(ctx.entity, ctx.content.user_id, &ctx.token)
            .await?;
        let content = TokenContent::new(record.id, record.role.id);
        let pair = self.issue_pair(ctx.entity, &content).await?;

        Ok(IssuedSession {
            user: record.public(),
            access_token: pair.access,
            refresh_token: pair.refresh,
        })
    }

    /// Drop the calling session's token only.
    ///
    /// # Errors
    /// Returns `Internal` if the cache fails.
    pub async fn logout(&self, ctx: &SessionContext) -> Result<(), AuthError> {
        self.cache
            .delete_token(ctx.entity, ctx.content.user_id, &ctx.token)
            .await?;
        Ok(())
    }

    /// Drop a token that was not authenticated in this request, such as the
    /// refresh cookie sent alongside a logout. Tokens that cannot be decoded
    /// are ignored.
    ///
    /// # Errors
    /// Returns `Internal` if the cache fails.
    pub async fn discard_token(&self, entity: EntityKind, token: &str) -> Result<(), AuthError> {
        let Ok(claims) = peek_claims(token) else {
            return Ok(());
        };
        self.cache
            .delete_token(entity, claims.content.user_id, token)
            .await?;
        Ok(())
    }

    /// Drop the principal's secret, invalidating every token it signed.
    ///
    /// # Errors
    /// Returns `Internal` if the cache fails.
    pub async fn logout_all(&self, ctx: &SessionContext) -> Result<(), AuthError> {
        self.cache
            .delete_secret(ctx.entity, ctx.content.user_id)
            .await?;
        info!(entity = %ctx.entity, user_id = ctx.content.user_id, "all sessions revoked");
        Ok(())
    }

    /// Mark the principal revoked and drop its secret.
    ///
    /// # Errors
    /// `EntityNotFound` when no record has `user_id`.
    #[instrument(skip(self), fields(%entity))]
    pub async fn revoke_user(&self, entity: EntityKind, user_id: i64) -> Result<(), AuthError> {
        if !self.store.set_revoked(entity, user_id, true).await? {
            return Err(AuthError::EntityNotFound);
        }
        self.cache.delete_secret(entity, user_id).await?;
        info!(user_id, "principal revoked");
        Ok(())
    }

    /// Public projection of the context's principal.
    ///
    /// # Errors
    /// `UserNotFound` when the record disappeared after the token was issued.
    pub async fn current_user(&self, ctx: &SessionContext) -> Result<PublicUser, AuthError> {
        self.store
            .find_by_id(ctx.entity, ctx.content.user_id)
            .await?
            .map(|record| record.public())
            .ok_or(AuthError::UserNotFound)
    }

    /// Admin lookup of a single record.
    ///
    /// # Errors
    /// `EntityNotFound` when no record has `id`.
    pub async fn find_user(&self, entity: EntityKind, id: i64) -> Result<PublicUser, AuthError> {
        self.store
            .find_by_id(entity, id)
            .await?
            .map(|record| record.public())
            .ok_or(AuthError::EntityNotFound)
    }

    async fn issue_with_retry(
        &self,
        entity: EntityKind,
        content: &TokenContent,
    ) -> Result<TokenPair, AuthError> {
        let attempts = self.config.issue_attempts();
        let mut attempt = 1;
        loop {
            match self.issue_pair(entity, content).await {
                Ok(pair) => return Ok(pair),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(%entity, attempt, error = %err, "token issue failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn issue_pair(
        &self,
        entity: EntityKind,
        content: &TokenContent,
    ) -> Result<TokenPair, AuthError> {
        let retention = self.config.retention();
        let secret = self
            .cache
            .get_or_create_secret(entity, content.user_id, retention)
            .await?;

        let access = self
            .issuer
            .sign(content, TokenKind::Access, secret.expose())
            .map_err(sign_failed)?;
        let refresh = self
            .issuer
            .sign(content, TokenKind::Refresh, secret.expose())
            .map_err(sign_failed)?;

        self.cache
            .store_token(entity, content.user_id, &access, retention)
            .await?;
        self.cache
            .store_token(entity, content.user_id, &refresh, retention)
            .await?;

        Ok(TokenPair { access, refresh })
    }
}

fn sign_failed(err: TokenError) -> AuthError {
    AuthError::Internal(anyhow!(err).context("failed to sign token"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cache::UserSecret;
    use crate::session::credentials::{hash_password_with, Role};
    use crate::session::throttle::SlidingWindowThrottle;
    use crate::storage::memory::{MemoryCredentialStore, MemorySessionCache};
    use anyhow::Result;
    use argon2::Params;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const IP: &str = "203.0.113.9";
    const USERNAME: &str = "alice_01";
    const PASSWORD: &str = "correct horse battery";

    struct Harness {
        service: SessionService,
        store: Arc<MemoryCredentialStore>,
        user_id: i64,
    }

    async fn harness_with(config: SessionConfig, cache: Arc<dyn SessionCache>) -> Result<Harness> {
        let store = Arc::new(MemoryCredentialStore::new());
        let params = Params::new(8, 1, 1, None).map_err(|err| anyhow!("{err}"))?;
        let record = store
            .insert(
                EntityKind::User,
                USERNAME,
                hash_password_with(PASSWORD, params)?,
                Role {
                    id: 1,
                    name: "member".to_string(),
                },
            )
            .await;
        let throttle = Arc::new(SlidingWindowThrottle::new(config.throttle()));
        let service = SessionService::new(config, store.clone(), cache, throttle);
        Ok(Harness {
            service,
            store,
            user_id: record.id,
        })
    }

    async fn harness() -> Result<Harness> {
        harness_with(SessionConfig::new(), Arc::new(MemorySessionCache::new())).await
    }

    async fn login(h: &Harness) -> Result<IssuedSession, AuthError> {
        h.service.login(EntityKind::User, USERNAME, PASSWORD, IP).await
    }

    async fn access(h: &Harness, token: &str) -> Result<SessionContext, AuthError> {
        h.service
            .authenticate(EntityKind::User, Some(token), TokenKind::Access)
            .await
    }

    async fn refresh_ctx(h: &Harness, token: &str) -> Result<SessionContext, AuthError> {
        h.service
            .authenticate(EntityKind::User, Some(token), TokenKind::Refresh)
            .await
    }

    #[tokio::test]
    async fn repeated_logins_issue_distinct_valid_tokens() -> Result<()> {
        let h = harness().await?;
        let first = login(&h).await?;
        let second = login(&h).await?;
        assert_ne!(first.access_token, second.access_token);
        assert_ne!(first.refresh_token, second.refresh_token);

        for session in [&first, &second] {
            let ctx = access(&h, &session.access_token).await?;
            assert_eq!(ctx.content.user_id, h.user_id);
            refresh_ctx(&h, &session.refresh_token).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn sixth_attempt_is_throttled_even_with_right_password() -> Result<()> {
        let h = harness().await?;
        for _ in 0..5 {
            let err = h
                .service
                .login(EntityKind::User, USERNAME, "wrong password!", IP)
                .await;
            assert!(matches!(err, Err(AuthError::IncorrectPassword)));
        }
        assert!(matches!(login(&h).await, Err(AuthError::TooManyAttempts)));

        // Other addresses are unaffected.
        h.service
            .login(EntityKind::User, USERNAME, PASSWORD, "198.51.100.1")
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_token_is_headers_empty() -> Result<()> {
        let h = harness().await?;
        let err = h
            .service
            .authenticate(EntityKind::User, None, TokenKind::Access)
            .await;
        assert!(matches!(err, Err(AuthError::HeadersEmpty)));
        let err = h
            .service
            .authenticate(EntityKind::User, Some("  "), TokenKind::Access)
            .await;
        assert!(matches!(err, Err(AuthError::HeadersEmpty)));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_and_cross_kind_tokens_are_invalid() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        assert!(matches!(
            access(&h, "not-a-token").await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            access(&h, &session.refresh_token).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            refresh_ctx(&h, &session.access_token).await,
            Err(AuthError::TokenInvalid)
        ));
        // Rejection leaves the token usable.
        access(&h, &session.access_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn token_for_other_entity_is_revoked() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        let err = h
            .service
            .authenticate(EntityKind::Admin, Some(&session.access_token), TokenKind::Access)
            .await;
        assert!(matches!(err, Err(AuthError::TokenRevoked)));
        Ok(())
    }

    #[tokio::test]
    async fn logout_all_revokes_every_token() -> Result<()> {
        let h = harness().await?;
        let first = login(&h).await?;
        let second = login(&h).await?;
        let ctx = access(&h, &first.access_token).await?;
        h.service.logout_all(&ctx).await?;

        for token in [&first.access_token, &second.access_token] {
            assert!(matches!(access(&h, token).await, Err(AuthError::TokenRevoked)));
        }
        for token in [&first.refresh_token, &second.refresh_token] {
            assert!(matches!(
                refresh_ctx(&h, token).await,
                Err(AuthError::TokenRevoked)
            ));
        }

        // A fresh login creates a new secret; older tokens stay revoked.
        let third = login(&h).await?;
        access(&h, &third.access_token).await?;
        for token in [&first.access_token, &second.access_token] {
            assert!(matches!(access(&h, token).await, Err(AuthError::TokenRevoked)));
        }
        assert!(matches!(
            refresh_ctx(&h, &first.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unregistered_token_is_revoked_without_mutation() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        // Same claims, different signature.
        let (unsigned, _) = session
            .access_token
            .rsplit_once('.')
            .ok_or_else(|| anyhow!("malformed token"))?;
        let forged = format!("{unsigned}.AAAA");
        assert!(matches!(access(&h, &forged).await, Err(AuthError::TokenRevoked)));
        access(&h, &session.access_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn logout_only_drops_the_calling_token() -> Result<()> {
        let h = harness().await?;
        let first = login(&h).await?;
        let second = login(&h).await?;
        let ctx = access(&h, &first.access_token).await?;
        h.service.logout(&ctx).await?;

        assert!(matches!(
            access(&h, &first.access_token).await,
            Err(AuthError::TokenRevoked)
        ));
        access(&h, &second.access_token).await?;
        refresh_ctx(&h, &first.refresh_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn discard_token_drops_refresh_token() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        h.service
            .discard_token(EntityKind::User, &session.refresh_token)
            .await?;
        h.service.discard_token(EntityKind::User, "garbage").await?;
        assert!(matches!(
            refresh_ctx(&h, &session.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        access(&h, &session.access_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_removed_then_revoked() -> Result<()> {
        let config = SessionConfig::new().with_access_token_ttl_seconds(0);
        let h = harness_with(config, Arc::new(MemorySessionCache::new())).await?;
        let session = login(&h).await?;

        assert!(matches!(
            access(&h, &session.access_token).await,
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            access(&h, &session.access_token).await,
            Err(AuthError::TokenRevoked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_refresh_token_reads_as_expired() -> Result<()> {
        let config = SessionConfig::new()
            .with_access_token_ttl_seconds(0)
            .with_refresh_token_ttl_seconds(0);
        let h = harness_with(config, Arc::new(MemorySessionCache::new())).await?;
        let session = login(&h).await?;

        assert!(matches!(
            refresh_ctx(&h, &session.refresh_token).await,
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            refresh_ctx(&h, &session.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_the_refresh_token() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        let ctx = refresh_ctx(&h, &session.refresh_token).await?;
        let renewed = h.service.refresh(&ctx).await?;

        assert_eq!(renewed.user.id, h.user_id);
        assert_ne!(renewed.refresh_token, session.refresh_token);
        assert!(matches!(
            refresh_ctx(&h, &session.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        access(&h, &renewed.access_token).await?;
        refresh_ctx(&h, &renewed.refresh_token).await?;
        // The old access token lives until it expires or logs out.
        access(&h, &session.access_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn refresh_requires_refresh_context() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        let ctx = access(&h, &session.access_token).await?;
        assert!(matches!(
            h.service.refresh(&ctx).await,
            Err(AuthError::TokenInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_fails_once_revoked_in_store() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        let ctx = refresh_ctx(&h, &session.refresh_token).await?;
        h.store.set_revoked(EntityKind::User, h.user_id, true).await?;
        assert!(matches!(h.service.refresh(&ctx).await, Err(AuthError::Revoked)));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_user_blocks_login_and_tokens() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        h.service.revoke_user(EntityKind::User, h.user_id).await?;

        assert!(matches!(
            access(&h, &session.access_token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(login(&h).await, Err(AuthError::Revoked)));
        assert!(matches!(
            h.service.revoke_user(EntityKind::User, 999).await,
            Err(AuthError::EntityNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn lookups() -> Result<()> {
        let h = harness().await?;
        let session = login(&h).await?;
        let ctx = access(&h, &session.access_token).await?;
        assert_eq!(h.service.current_user(&ctx).await?.username, USERNAME);
        assert_eq!(
            h.service.find_user(EntityKind::User, h.user_id).await?.id,
            h.user_id
        );
        assert!(matches!(
            h.service.find_user(EntityKind::Admin, h.user_id).await,
            Err(AuthError::EntityNotFound)
        ));
        Ok(())
    }

    /// Cache whose first `store_token` call fails.
    struct FlakyCache {
        inner: MemorySessionCache,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl SessionCache for FlakyCache {
        async fn get_or_create_secret(
            &self,
            entity: EntityKind,
            user_id: i64,
            ttl: Duration,
        ) -> anyhow::Result<UserSecret> {
            self.inner.get_or_create_secret(entity, user_id, ttl).await
        }

        async fn get_secret(
            &self,
            entity: EntityKind,
            user_id: i64,
        ) -> anyhow::Result<Option<UserSecret>> {
            self.inner.get_secret(entity, user_id).await
        }

        async fn delete_secret(&self, entity: EntityKind, user_id: i64) -> anyhow::Result<()> {
            self.inner.delete_secret(entity, user_id).await
        }

        async fn store_token(
            &self,
            entity: EntityKind,
            user_id: i64,
            token: &str,
            ttl: Duration,
        ) -> anyhow::Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(anyhow!("cache unavailable"));
            }
            self.inner.store_token(entity, user_id, token, ttl).await
        }

        async fn has_token(
            &self,
            entity: EntityKind,
            user_id: i64,
            token: &str,
        ) -> anyhow::Result<bool> {
            self.inner.has_token(entity, user_id, token).await
        }

        async fn delete_token(
            &self,
            entity: EntityKind,
            user_id: i64,
            token: &str,
        ) -> anyhow::Result<()> {
            self.inner.delete_token(entity, user_id, token).await
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyCache> {
        Arc::new(FlakyCache {
            inner: MemorySessionCache::new(),
            failures_left: AtomicUsize::new(failures),
        })
    }

    #[tokio::test]
    async fn login_retries_one_transient_failure() -> Result<()> {
        let h = harness_with(SessionConfig::new(), flaky(1)).await?;
        let session = login(&h).await?;
        access(&h, &session.access_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_spends_the_presented_token() -> Result<()> {
        let cache = flaky(0);
        let h = harness_with(SessionConfig::new(), cache.clone()).await?;
        let session = login(&h).await?;
        let ctx = refresh_ctx(&h, &session.refresh_token).await?;

        cache.failures_left.store(1, Ordering::SeqCst);
        assert!(matches!(
            h.service.refresh(&ctx).await,
            Err(AuthError::Internal(_))
        ));
        assert!(matches!(
            refresh_ctx(&h, &session.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn login_gives_up_after_two_attempts() -> Result<()> {
        let h = harness_with(SessionConfig::new(), flaky(2)).await?;
        assert!(matches!(login(&h).await, Err(AuthError::Internal(_))));
        Ok(())
    }
}
