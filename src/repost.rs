use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::config::Family;

/// Last-seen submission for one (author, family) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub last_id: String,
    pub last_created: DateTime<Utc>,
}

/// Outcome of a repost check for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepostVerdict {
    Clean,
    /// Inside the repost window. The prior record stays authoritative so a
    /// burst of reposts all reference the same original.
    Flagged { prior_id: String },
    /// Inside the grace window and the prior submission was already
    /// removed. Logged only, record refreshed to the new submission.
    GraceExempt { prior_id: String },
}

/// Durable per-author repost state, keyed by (author, family).
///
/// Records are created on first classified submission, overwritten on every
/// subsequent non-flagged classification and never deleted.
pub struct UserStateStore {
    conn: Connection,
}

impl UserStateStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open user state database: {db_path}"))?;
        Self::init_schema(&conn)?;
        Ok(UserStateStore { conn })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(UserStateStore { conn })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_state (
                author TEXT NOT NULL,
                family TEXT NOT NULL,
                last_id TEXT NOT NULL,
                last_created TEXT NOT NULL,
                PRIMARY KEY (author, family)
            )",
            [],
        )
        .context("Failed to create user_state table")?;
        Ok(())
    }

    pub fn get(&self, author: &str, family: Family) -> anyhow::Result<Option<UserRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT last_id, last_created FROM user_state WHERE author = ?1 AND family = ?2",
                params![author, family.prefix()],
                |row| {
                    Ok(UserRecord {
                        last_id: row.get(0)?,
                        last_created: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read user state")?;
        Ok(record)
    }

    /// Run a repost check and commit any resulting record mutation in one
    /// transaction, so a crash cannot persist a verdict that was never
    /// acted on or drop a record that was already reported clean.
    ///
    /// `prior_removed` is consulted only when the submission falls inside
    /// the grace window; it asks the collaborator whether the prior
    /// submission is currently removed.
    pub fn check_and_update(
        &mut self,
        author: &str,
        family: Family,
        post_id: &str,
        created: DateTime<Utc>,
        upper_hour: i64,
        lower_min: i64,
        prior_removed: impl FnOnce(&str) -> bool,
    ) -> anyhow::Result<RepostVerdict> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;

        let prior = tx
            .query_row(
                "SELECT last_id, last_created FROM user_state WHERE author = ?1 AND family = ?2",
                params![author, family.prefix()],
                |row| {
                    Ok(UserRecord {
                        last_id: row.get(0)?,
                        last_created: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read user state")?;

        let verdict = match prior {
            None => {
                tx.execute(
                    "INSERT INTO user_state (author, family, last_id, last_created)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![author, family.prefix(), post_id, created],
                )
                .context("Failed to insert user state")?;
                log::debug!("First {family} submission recorded for {author}");
                RepostVerdict::Clean
            }
            Some(prior) if prior.last_id == post_id => {
                // Re-delivery of an already-seen submission
                log::debug!("Submission {post_id} already recorded for {author}, skipping");
                RepostVerdict::Clean
            }
            Some(prior) => {
                let delta = (created - prior.last_created).num_seconds();
                if delta < 0 {
                    // Out-of-order delivery or clock skew upstream; treat
                    // as clean and leave the record alone.
                    log::warn!(
                        "Submission {post_id} by {author} predates recorded {} by {}s",
                        prior.last_id,
                        -delta
                    );
                    RepostVerdict::Clean
                } else if delta < lower_min * 60 && prior_removed(&prior.last_id) {
                    log::info!(
                        "Grace-exempt repost by {author}: {post_id} {delta}s after removed {}",
                        prior.last_id
                    );
                    Self::refresh(&tx, author, family, post_id, created)?;
                    RepostVerdict::GraceExempt {
                        prior_id: prior.last_id,
                    }
                } else if delta < upper_hour * 3600 {
                    log::info!(
                        "Repost by {author}: {post_id} posted {delta}s after {}",
                        prior.last_id
                    );
                    // Record deliberately not refreshed
                    RepostVerdict::Flagged {
                        prior_id: prior.last_id,
                    }
                } else {
                    Self::refresh(&tx, author, family, post_id, created)?;
                    RepostVerdict::Clean
                }
            }
        };

        tx.commit().context("Failed to commit user state")?;
        Ok(verdict)
    }

    fn refresh(
        tx: &rusqlite::Transaction<'_>,
        author: &str,
        family: Family,
        post_id: &str,
        created: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        tx.execute(
            "UPDATE user_state SET last_id = ?3, last_created = ?4
             WHERE author = ?1 AND family = ?2",
            params![author, family.prefix(), post_id, created],
        )
        .context("Failed to update user state")?;
        Ok(())
    }
}
