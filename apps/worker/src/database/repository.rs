use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params::Params;
use libsql::{Row, Value, params};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::models::{
    Target, TargetFilter, TargetPatch, TargetStatus, TokenFilter, TokenPatch, User, VisitorToken,
    i64_to_timestamp, timestamp_to_i64,
};
use crate::pool::LibsqlPool;

const TARGET_COLUMNS: &str = "id, url, name, user_id, visitor_token, is_active, status, \
    response_time_ms, last_checked_at, ssl, seo, created_at, updated_at";
const TOKEN_COLUMNS: &str = "id, token_id, expires_at, is_expired, created_at";

/// Database trait for abstracting storage of websites, users and visitor tokens
#[async_trait]
pub trait Database: Send + Sync {
    /// List targets matching a filter
    async fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>>;

    async fn count_targets(&self, filter: &TargetFilter) -> Result<u64>;

    /// Apply a partial update to one target; unknown ids are ignored
    async fn update_target(&self, id: &str, patch: &TargetPatch) -> Result<()>;

    /// Delete every target matching a filter, returning how many went away
    async fn delete_targets(&self, filter: &TargetFilter) -> Result<u64>;

    /// Insert or replace a target
    async fn save_target(&self, target: &Target) -> Result<()>;

    async fn find_user(&self, id: &str) -> Result<Option<User>>;

    async fn save_user(&self, user: &User) -> Result<()>;

    async fn list_tokens(&self, filter: &TokenFilter) -> Result<Vec<VisitorToken>>;

    async fn count_tokens(&self, filter: &TokenFilter) -> Result<u64>;

    /// Bulk update, returning the number of tokens modified
    async fn update_tokens(&self, filter: &TokenFilter, patch: &TokenPatch) -> Result<u64>;

    async fn delete_token(&self, id: &str) -> Result<()>;

    /// Insert or replace a visitor token
    async fn save_token(&self, token: &VisitorToken) -> Result<()>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn count(&self, table: &str, clause: String, values: Vec<Value>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT COUNT(*) FROM {table}{clause}");
        let mut rows = conn.query(&sql, Params::Positional(values)).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }
}

/// WHERE clause (with leading space) and positional values for a target filter
fn target_clause(filter: &TargetFilter) -> (String, Vec<Value>) {
    match filter {
        TargetFilter::All => (String::new(), Vec::new()),
        // substr keeps the prefix match case-sensitive, LIKE would not
        TargetFilter::Https => (" WHERE substr(url, 1, 8) = 'https://'".into(), Vec::new()),
        TargetFilter::Online => (
            " WHERE status = ?".into(),
            vec![Value::Text(TargetStatus::Online.as_str().into())],
        ),
        TargetFilter::VisitorToken(token_id) => {
            (" WHERE visitor_token = ?".into(), vec![Value::Text(token_id.clone())])
        }
        TargetFilter::Guest => {
            (" WHERE user_id IS NULL AND visitor_token IS NOT NULL".into(), Vec::new())
        }
    }
}

fn token_clause(filter: &TokenFilter) -> (String, Vec<Value>) {
    match filter {
        TokenFilter::LapsedUnflagged { now } => (
            " WHERE expires_at < ? AND is_expired = 0".into(),
            vec![Value::Integer(timestamp_to_i64(*now))],
        ),
        TokenFilter::FlaggedBefore { cutoff } => (
            " WHERE is_expired = 1 AND expires_at < ?".into(),
            vec![Value::Integer(timestamp_to_i64(*cutoff))],
        ),
        TokenFilter::Flagged(flag) => {
            (" WHERE is_expired = ?".into(), vec![Value::Integer(i64::from(*flag))])
        }
        TokenFilter::ExpiringBetween { from, to } => (
            " WHERE is_expired = 0 AND expires_at >= ? AND expires_at < ?".into(),
            vec![
                Value::Integer(timestamp_to_i64(*from)),
                Value::Integer(timestamp_to_i64(*to)),
            ],
        ),
    }
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn optional_json<T: serde::Serialize>(value: Option<&T>) -> Result<Value> {
    Ok(match value {
        Some(value) => Value::Text(serde_json::to_string(value)?),
        None => Value::Null,
    })
}

/// Decode a stored report, dropping it (with a warning) if it no longer parses
fn decode_report<T: DeserializeOwned>(id: &str, column: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    serde_json::from_str(&raw)
        .inspect_err(|e| warn!("Discarding unreadable {} report for website {}: {}", column, id, e))
        .ok()
}

fn target_from_row(row: &Row) -> Result<Target> {
    let id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let ssl = decode_report(&id, "ssl", row.get(9)?);
    let seo = decode_report(&id, "seo", row.get(10)?);

    Ok(Target {
        url: row.get(1)?,
        name: row.get(2)?,
        owner_user_id: row.get(3)?,
        visitor_token: row.get(4)?,
        is_active: row.get::<i64>(5)? != 0,
        status: status.parse()?,
        response_time_ms: row.get::<Option<i64>>(7)?.map(|v| v as u64),
        last_checked_at: row.get::<Option<i64>>(8)?.map(i64_to_timestamp),
        ssl,
        seo,
        created_at: i64_to_timestamp(row.get(11)?),
        updated_at: i64_to_timestamp(row.get(12)?),
        id,
    })
}

fn token_from_row(row: &Row) -> Result<VisitorToken> {
    Ok(VisitorToken {
        id: row.get(0)?,
        token_id: row.get(1)?,
        expires_at: i64_to_timestamp(row.get(2)?),
        is_expired: row.get::<i64>(3)? != 0,
        created_at: i64_to_timestamp(row.get(4)?),
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let (clause, values) = target_clause(filter);
        let sql = format!("SELECT {TARGET_COLUMNS} FROM websites{clause} ORDER BY created_at, id");

        let mut rows = conn.query(&sql, Params::Positional(values)).await?;
        let mut targets = Vec::new();

        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn count_targets(&self, filter: &TargetFilter) -> Result<u64> {
        let (clause, values) = target_clause(filter);
        self.count("websites", clause, values).await
    }

    async fn update_target(&self, id: &str, patch: &TargetPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(checked_at) = patch.last_checked_at {
            sets.push("last_checked_at = ?");
            values.push(Value::Integer(timestamp_to_i64(checked_at)));
        }
        if let Some(status) = patch.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().into()));
        }
        if let Some(is_active) = patch.is_active {
            sets.push("is_active = ?");
            values.push(Value::Integer(i64::from(is_active)));
        }
        if let Some(response_time) = patch.response_time_ms {
            sets.push("response_time_ms = ?");
            values.push(Value::Integer(response_time as i64));
        }
        if let Some(ssl) = &patch.ssl {
            sets.push("ssl = ?");
            values.push(optional_json(Some(ssl))?);
        }
        if let Some(seo) = &patch.seo {
            sets.push("seo = ?");
            values.push(optional_json(Some(seo))?);
        }
        sets.push("updated_at = ?");
        values.push(Value::Integer(timestamp_to_i64(Utc::now())));
        values.push(Value::Text(id.to_string()));

        let sql = format!("UPDATE websites SET {} WHERE id = ?", sets.join(", "));
        let conn = self.get_conn().await?;
        let changed = conn.execute(&sql, Params::Positional(values)).await?;
        if changed == 0 {
            debug!("Update for website {} matched no rows", id);
        }
        Ok(())
    }

    async fn delete_targets(&self, filter: &TargetFilter) -> Result<u64> {
        let conn = self.get_conn().await?;
        let (clause, values) = target_clause(filter);
        let sql = format!("DELETE FROM websites{clause}");
        Ok(conn.execute(&sql, Params::Positional(values)).await?)
    }

    async fn save_target(&self, target: &Target) -> Result<()> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT OR REPLACE INTO websites ({TARGET_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let values = vec![
            Value::Text(target.id.clone()),
            Value::Text(target.url.clone()),
            optional_text(target.name.clone()),
            optional_text(target.owner_user_id.clone()),
            optional_text(target.visitor_token.clone()),
            Value::Integer(i64::from(target.is_active)),
            Value::Text(target.status.as_str().into()),
            target.response_time_ms.map(|v| Value::Integer(v as i64)).unwrap_or(Value::Null),
            target
                .last_checked_at
                .map(|t| Value::Integer(timestamp_to_i64(t)))
                .unwrap_or(Value::Null),
            optional_json(target.ssl.as_ref())?,
            optional_json(target.seo.as_ref())?,
            Value::Integer(timestamp_to_i64(target.created_at)),
            Value::Integer(timestamp_to_i64(target.updated_at)),
        ];
        conn.execute(&sql, Params::Positional(values)).await?;
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.get_conn().await?;
        let mut rows =
            conn.query("SELECT id, name, email FROM users WHERE id = ?", params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(User { id: row.get(0)?, name: row.get(1)?, email: row.get(2)? }))
        } else {
            Ok(None)
        }
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO users (id, name, email) VALUES (?, ?, ?)",
            params![user.id.clone(), user.name.clone(), user.email.clone()],
        )
        .await?;
        Ok(())
    }

    async fn list_tokens(&self, filter: &TokenFilter) -> Result<Vec<VisitorToken>> {
        let conn = self.get_conn().await?;
        let (clause, values) = token_clause(filter);
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM visitor_tokens{clause} ORDER BY expires_at");

        let mut rows = conn.query(&sql, Params::Positional(values)).await?;
        let mut tokens = Vec::new();

        while let Some(row) = rows.next().await? {
            tokens.push(token_from_row(&row)?);
        }

        Ok(tokens)
    }

    async fn count_tokens(&self, filter: &TokenFilter) -> Result<u64> {
        let (clause, values) = token_clause(filter);
        self.count("visitor_tokens", clause, values).await
    }

    async fn update_tokens(&self, filter: &TokenFilter, patch: &TokenPatch) -> Result<u64> {
        let Some(is_expired) = patch.is_expired else {
            return Ok(0);
        };

        let conn = self.get_conn().await?;
        let (clause, filter_values) = token_clause(filter);
        let mut values = vec![Value::Integer(i64::from(is_expired))];
        values.extend(filter_values);

        let sql = format!("UPDATE visitor_tokens SET is_expired = ?{clause}");
        Ok(conn.execute(&sql, Params::Positional(values)).await?)
    }

    async fn delete_token(&self, id: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM visitor_tokens WHERE id = ?", params![id]).await?;
        Ok(())
    }

    async fn save_token(&self, token: &VisitorToken) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO visitor_tokens \
             (id, token_id, expires_at, is_expired, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                token.id.clone(),
                token.token_id.clone(),
                timestamp_to_i64(token.expires_at),
                i64::from(token.is_expired),
                timestamp_to_i64(token.created_at)
            ],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::create_test_database;
    use crate::monitoring::types::{SeoReport, TlsReport};
    use chrono::Duration;

    #[tokio::test]
    async fn test_target_round_trip_and_patch() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        database.save_target(&Target::new("a", "https://a.example").owned_by("u1")).await?;

        let patch = TargetPatch {
            last_checked_at: Some(Utc::now()),
            status: Some(TargetStatus::Offline),
            is_active: Some(false),
            ssl: Some(TlsReport::failure("Connection timeout")),
            ..Default::default()
        };
        database.update_target("a", &patch).await?;

        let targets = database.list_targets(&TargetFilter::All).await?;
        assert_eq!(targets.len(), 1);
        let target = &targets[0];
        assert_eq!(target.status, TargetStatus::Offline);
        assert!(!target.is_active);
        assert!(target.last_checked_at.is_some());
        assert!(target.response_time_ms.is_none());
        assert_eq!(target.ssl, Some(TlsReport::failure("Connection timeout")));
        assert!(target.seo.is_none());
        assert_eq!(target.owner_user_id.as_deref(), Some("u1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_patch_leaves_other_fields_untouched() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let mut target = Target::new("a", "https://a.example");
        target.response_time_ms = Some(120);
        database.save_target(&target).await?;

        let patch = TargetPatch { seo: Some(SeoReport::failure("x")), ..Default::default() };
        database.update_target("a", &patch).await?;

        let stored = &database.list_targets(&TargetFilter::All).await?[0];
        assert_eq!(stored.response_time_ms, Some(120));
        assert_eq!(stored.status, TargetStatus::Unknown);
        assert_eq!(stored.seo.as_ref().and_then(|s| s.error.as_deref()), Some("x"));
        Ok(())
    }

    #[tokio::test]
    async fn test_target_filters() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let mut online = Target::new("1", "https://secure.example");
        online.status = TargetStatus::Online;
        database.save_target(&online).await?;
        database.save_target(&Target::new("2", "http://plain.example")).await?;
        database.save_target(&Target::new("3", "HTTPS://shouting.example")).await?;
        database.save_target(&Target::new("4", "https://guest.example").for_visitor("tok")).await?;

        let https: Vec<String> =
            database.list_targets(&TargetFilter::Https).await?.into_iter().map(|t| t.id).collect();
        assert_eq!(https, vec!["1", "4"]);

        let online: Vec<String> =
            database.list_targets(&TargetFilter::Online).await?.into_iter().map(|t| t.id).collect();
        assert_eq!(online, vec!["1"]);

        assert_eq!(database.count_targets(&TargetFilter::Guest).await?, 1);
        assert_eq!(database.delete_targets(&TargetFilter::VisitorToken("tok".into())).await?, 1);
        assert_eq!(database.delete_targets(&TargetFilter::VisitorToken("none".into())).await?, 0);
        assert_eq!(database.count_targets(&TargetFilter::All).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_token_filters_and_bulk_update() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        let now = Utc::now();
        database.save_token(&VisitorToken::new("t1", "tok-1", now - Duration::days(2))).await?;
        database.save_token(&VisitorToken::new("t2", "tok-2", now + Duration::hours(3))).await?;

        let lapsed = TokenFilter::LapsedUnflagged { now };
        assert_eq!(database.count_tokens(&lapsed).await?, 1);

        let flag = TokenPatch { is_expired: Some(true) };
        assert_eq!(database.update_tokens(&lapsed, &flag).await?, 1);
        assert_eq!(database.update_tokens(&lapsed, &flag).await?, 0);

        let flagged = database.list_tokens(&TokenFilter::Flagged(true)).await?;
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].token_id, "tok-1");

        let soon = TokenFilter::ExpiringBetween { from: now, to: now + Duration::days(1) };
        assert_eq!(database.count_tokens(&soon).await?, 1);

        database.delete_token("t1").await?;
        assert_eq!(database.count_tokens(&TokenFilter::Flagged(true)).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_user() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        database
            .save_user(&User {
                id: "u1".into(),
                name: Some("Ada".into()),
                email: Some("ada@example.com".into()),
            })
            .await?;

        let user = database.find_user("u1").await?.expect("user exists");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert!(database.find_user("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_report_is_dropped() -> Result<()> {
        let (database, _dir) = create_test_database().await?;
        database.save_target(&Target::new("a", "https://a.example")).await?;

        let conn = database.get_conn().await?;
        conn.execute("UPDATE websites SET ssl = '{not json' WHERE id = 'a'", ()).await?;
        drop(conn);

        let targets = database.list_targets(&TargetFilter::All).await?;
        assert!(targets[0].ssl.is_none());
        Ok(())
    }
}
