//! Postgres backends.
//!
//! Table names come from the entity capability table, never from input, so
//! they are interpolated into the SQL text while values are bound.
//! Schema: `sql/schema.sql`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::Instrument;

use crate::session::{
    cache::{hash_token, SessionCache, UserSecret},
    credentials::{CredentialRecord, CredentialStore, Role},
    entity::EntityKind,
};

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn select_credentials(entity: EntityKind, column: &str) -> String {
    let caps = entity.capabilities();
    format!(
        r#"
        SELECT c.id, c.username, c.password, c.revoked, c.created_at, c.updated_at,
               r.id AS role_id, r.name AS role_name
        FROM "{table}" c
        JOIN "{role_table}" r ON r.id = c.role_id
        WHERE c.{column} = $1
        "#,
        table = caps.table,
        role_table = caps.role_table,
    )
}

fn credential_from_row(row: &PgRow) -> Result<CredentialRecord> {
    Ok(CredentialRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: SecretString::from(row.try_get::<String, _>("password")?),
        role: Role {
            id: row.try_get("role_id")?,
            name: row.try_get("role_name")?,
        },
        revoked: row.try_get("revoked")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username(
        &self,
        entity: EntityKind,
        username: &str,
    ) -> Result<Option<CredentialRecord>> {
        let query = select_credentials(entity, "username");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to look up {entity} by username"))?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn find_by_id(&self, entity: EntityKind, id: i64) -> Result<Option<CredentialRecord>> {
        let query = select_credentials(entity, "id");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to look up {entity} {id}"))?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn set_revoked(&self, entity: EntityKind, id: i64, revoked: bool) -> Result<bool> {
        let query = format!(
            r#"UPDATE "{}" SET revoked = $2, updated_at = NOW() WHERE id = $1"#,
            entity.capabilities().table
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE"
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(revoked)
            .execute(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to update revoked flag of {entity} {id}"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionCache {
    pool: PgPool,
}

impl PgSessionCache {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn seconds(ttl: Duration) -> f64 {
    ttl.as_secs_f64()
}

/// Drop expired secrets of every principal together with the token rows
/// registered under them. Tokens go first.
fn purge_expired(entity: EntityKind) -> [String; 2] {
    let caps = entity.capabilities();
    [
        format!(
            "DELETE FROM {tokens} t USING {secrets} s WHERE t.user_id = s.user_id AND s.expires_at <= NOW()",
            tokens = caps.token_namespace,
            secrets = caps.secret_namespace,
        ),
        format!(
            "DELETE FROM {} WHERE expires_at <= NOW()",
            caps.secret_namespace
        ),
    ]
}

/// Insert a secret or keep the live one, only ever growing its expiry.
fn upsert_secret(entity: EntityKind) -> String {
    format!(
        r"
        INSERT INTO {ns} (user_id, secret, expires_at)
        VALUES ($1, $2, NOW() + make_interval(secs => $3))
        ON CONFLICT (user_id) DO UPDATE SET
            secret = CASE WHEN {ns}.expires_at > NOW() THEN {ns}.secret ELSE EXCLUDED.secret END,
            expires_at = GREATEST({ns}.expires_at, EXCLUDED.expires_at)
        RETURNING secret
        ",
        ns = entity.capabilities().secret_namespace,
    )
}

#[async_trait]
impl SessionCache for PgSessionCache {
    async fn get_or_create_secret(
        &self,
        entity: EntityKind,
        user_id: i64,
        ttl: Duration,
    ) -> Result<UserSecret> {
        let candidate = UserSecret::generate()?;
        let [purge_tokens, purge_secrets] = purge_expired(entity);
        let upsert = upsert_secret(entity);
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let row = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&purge_tokens).execute(&mut *tx).await?;
            sqlx::query(&purge_secrets).execute(&mut *tx).await?;
            let row = sqlx::query(&upsert)
                .bind(user_id)
                .bind(candidate.encoded())
                .bind(seconds(ttl))
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(row)
        }
        .instrument(span)
        .await
        .with_context(|| format!("failed to get or create secret for {entity} {user_id}"))?;
        Ok(UserSecret::from_encoded(row.try_get("secret")?))
    }

    async fn get_secret(&self, entity: EntityKind, user_id: i64) -> Result<Option<UserSecret>> {
        let query = format!(
            "SELECT secret FROM {} WHERE user_id = $1 AND expires_at > NOW()",
            entity.capabilities().secret_namespace
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to read secret for {entity} {user_id}"))?;
        row.map(|row| row.try_get("secret").map(UserSecret::from_encoded))
            .transpose()
            .map_err(Into::into)
    }

    async fn delete_secret(&self, entity: EntityKind, user_id: i64) -> Result<()> {
        let caps = entity.capabilities();
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", caps.token_namespace))
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", caps.secret_namespace))
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        }
        .instrument(span)
        .await
        .with_context(|| format!("failed to delete secret for {entity} {user_id}"))
    }

    async fn store_token(
        &self,
        entity: EntityKind,
        user_id: i64,
        token: &str,
        ttl: Duration,
    ) -> Result<()> {
        let caps = entity.capabilities();
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let prune = format!(
            "DELETE FROM {} WHERE user_id = $1 AND expires_at <= NOW()",
            caps.token_namespace
        );
        let insert = format!(
            r"
            INSERT INTO {tokens} (user_id, token_hash, expires_at)
            SELECT $1, $2, NOW() + make_interval(secs => $3)
            WHERE EXISTS (SELECT 1 FROM {secrets} WHERE user_id = $1 AND expires_at > NOW())
            ON CONFLICT (user_id, token_hash) DO UPDATE SET expires_at = EXCLUDED.expires_at
            ",
            tokens = caps.token_namespace,
            secrets = caps.secret_namespace,
        );
        let result = async {
            sqlx::query(&prune)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            sqlx::query(&insert)
                .bind(user_id)
                .bind(hash_token(token))
                .bind(seconds(ttl))
                .execute(&self.pool)
                .await
        }
        .instrument(span)
        .await
        .with_context(|| format!("failed to store token for {entity} {user_id}"))?;

        if result.rows_affected() == 0 {
            bail!("no live secret for {entity} {user_id}");
        }
        Ok(())
    }

    async fn has_token(&self, entity: EntityKind, user_id: i64, token: &str) -> Result<bool> {
        let query = format!(
            r"
            SELECT EXISTS (
                SELECT 1 FROM {} WHERE user_id = $1 AND token_hash = $2 AND expires_at > NOW()
            ) AS present
            ",
            entity.capabilities().token_namespace
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(hash_token(token))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to check token for {entity} {user_id}"))?;
        Ok(row.try_get("present")?)
    }

    async fn delete_token(&self, entity: EntityKind, user_id: i64, token: &str) -> Result<()> {
        let query = format!(
            "DELETE FROM {} WHERE user_id = $1 AND token_hash = $2",
            entity.capabilities().token_namespace
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(&query)
            .bind(user_id)
            .bind(hash_token(token))
            .execute(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to delete token for {entity} {user_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{purge_expired, select_credentials, upsert_secret};
    use crate::session::entity::EntityKind;

    #[test]
    fn credential_query_uses_entity_tables() {
        let user = select_credentials(EntityKind::User, "username");
        assert!(user.contains(r#"FROM "User" c"#));
        assert!(user.contains(r#"JOIN "UserRole" r"#));
        assert!(user.contains("WHERE c.username = $1"));

        let admin = select_credentials(EntityKind::Admin, "id");
        assert!(admin.contains(r#"FROM "Admin" c"#));
        assert!(admin.contains(r#"JOIN "AdminRole" r"#));
        assert!(admin.contains("WHERE c.id = $1"));
    }

    #[test]
    fn expired_secrets_take_their_tokens_along() {
        let [tokens, secrets] = purge_expired(EntityKind::Admin);
        assert!(tokens.starts_with("DELETE FROM admin_tokens t USING admin_secret s"));
        assert!(tokens.contains("s.expires_at <= NOW()"));
        assert_eq!(secrets, "DELETE FROM admin_secret WHERE expires_at <= NOW()");
    }

    #[test]
    fn upsert_keeps_live_secret() {
        let query = upsert_secret(EntityKind::User);
        assert!(query.contains("INSERT INTO user_secret"));
        assert!(query.contains("ON CONFLICT (user_id) DO UPDATE"));
        assert!(query.contains("GREATEST(user_secret.expires_at, EXCLUDED.expires_at)"));
        assert!(query.contains("RETURNING secret"));
    }
}
