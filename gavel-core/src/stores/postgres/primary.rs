use crate::error::StoreError;
use crate::framework::DatabaseProcessor;
use crate::stores::primary::{CasOutcome, ClosingSoonQuery, PrimaryStore};
use crate::utils::timeout::bounded;
use async_trait::async_trait;
use compact_str::CompactString;
use gavel_sdk::objects::{AuctionDocument, AuctionStatus, UserDocument, UserStatus};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use time::OffsetDateTime;

const AUCTION_COLUMNS: &str = "id, title, description, seller_id, thumbnail_id, created_at, \
     end_time, status, current_price, bid_count, version";

const USER_COLUMNS: &str = "id, name, photo_id, status, version";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuctionRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub seller_id: String,
    pub thumbnail_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub status: String,
    pub current_price: Decimal,
    pub bid_count: i64,
    pub version: i64,
}

impl TryFrom<AuctionRow> for AuctionDocument {
    type Error = StoreError;

    fn try_from(row: AuctionRow) -> Result<Self, StoreError> {
        let status = match row.status.as_str() {
            "open" => AuctionStatus::Open,
            "closed" => AuctionStatus::Closed,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "auction {} has status '{other}'",
                    row.id
                )));
            }
        };
        Ok(AuctionDocument {
            id: CompactString::from(row.id),
            title: row.title,
            description: row.description,
            seller_id: CompactString::from(row.seller_id),
            thumbnail_id: row.thumbnail_id.map(CompactString::from),
            created_at: row.created_at,
            end_time: row.end_time,
            status,
            current_price: row.current_price,
            bid_count: row.bid_count,
            version: row.version,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub photo_id: Option<String>,
    pub status: String,
    pub version: i64,
}

impl TryFrom<UserRow> for UserDocument {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, StoreError> {
        let status = match row.status.as_str() {
            "active" => UserStatus::Active,
            "inactive" => UserStatus::Inactive,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "user {} has status '{other}'",
                    row.id
                )));
            }
        };
        Ok(UserDocument {
            id: CompactString::from(row.id),
            name: row.name,
            photo_id: row.photo_id.map(CompactString::from),
            status,
            version: row.version,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetAuctionById {
    pub id: CompactString,
}

impl Processor<GetAuctionById> for DatabaseProcessor {
    type Output = Option<AuctionRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetAuctionById")]
    async fn process(&self, query: GetAuctionById) -> Result<Option<AuctionRow>, sqlx::Error> {
        sqlx::query_as::<_, AuctionRow>(&format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE id = $1"
        ))
        .bind(query.id.as_str())
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// One id-ordered page of open auctions ending at or before a point in time.
pub struct ListOpenAuctionsClosingBefore {
    pub closing_before: OffsetDateTime,
    pub after_id: Option<CompactString>,
    pub limit: i64,
}

impl Processor<ListOpenAuctionsClosingBefore> for DatabaseProcessor {
    type Output = Vec<AuctionRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListOpenAuctionsClosingBefore")]
    async fn process(
        &self,
        query: ListOpenAuctionsClosingBefore,
    ) -> Result<Vec<AuctionRow>, sqlx::Error> {
        sqlx::query_as::<_, AuctionRow>(&format!(
            r#"
            SELECT {AUCTION_COLUMNS}
            FROM auctions
            WHERE status = 'open'
              AND end_time <= $1
              AND ($2::text IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#
        ))
        .bind(query.closing_before)
        .bind(query.after_id.as_deref())
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Close an open auction if it is still at the expected version.
///
/// Returns the closed row, or `None` if the precondition failed.
pub struct CloseAuctionIfVersion {
    pub id: CompactString,
    pub expected_version: i64,
}

impl Processor<CloseAuctionIfVersion> for DatabaseProcessor {
    type Output = Option<AuctionRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CloseAuctionIfVersion")]
    async fn process(
        &self,
        cmd: CloseAuctionIfVersion,
    ) -> Result<Option<AuctionRow>, sqlx::Error> {
        sqlx::query_as::<_, AuctionRow>(&format!(
            r#"
            UPDATE auctions
            SET status = 'closed'
            WHERE id = $1 AND version = $2 AND status = 'open'
            RETURNING {AUCTION_COLUMNS}
            "#
        ))
        .bind(cmd.id.as_str())
        .bind(cmd.expected_version)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct GetUserById {
    pub id: CompactString,
}

impl Processor<GetUserById> for DatabaseProcessor {
    type Output = Option<UserRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetUserById")]
    async fn process(&self, query: GetUserById) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(query.id.as_str())
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct DeactivateUserIfVersion {
    pub id: CompactString,
    pub expected_version: i64,
}

impl Processor<DeactivateUserIfVersion> for DatabaseProcessor {
    type Output = Option<UserRow>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeactivateUserIfVersion")]
    async fn process(&self, cmd: DeactivateUserIfVersion) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET status = 'inactive'
            WHERE id = $1 AND version = $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(cmd.id.as_str())
        .bind(cmd.expected_version)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Rewrite a user's denormalized name in bids and questions.
///
/// Returns the number of rows rewritten across both tables.
pub struct ScrubUserReferences {
    pub user_id: CompactString,
    pub display_name: String,
}

impl Processor<ScrubUserReferences> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ScrubUserReferences")]
    async fn process(&self, cmd: ScrubUserReferences) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let bids = sqlx::query(
            "UPDATE bids SET user_name = $2 WHERE user_id = $1 AND user_name <> $2",
        )
        .bind(cmd.user_id.as_str())
        .bind(&cmd.display_name)
        .execute(&mut *tx)
        .await?;
        let questions = sqlx::query(
            "UPDATE questions SET user_name = $2 WHERE user_id = $1 AND user_name <> $2",
        )
        .bind(cmd.user_id.as_str())
        .bind(&cmd.display_name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(bids.rows_affected() + questions.rows_affected())
    }
}

/// [`PrimaryStore`] over the `auctions`, `users`, `bids` and `questions` tables.
#[derive(Debug, Clone)]
pub struct PgPrimaryStore {
    db: DatabaseProcessor,
    call_timeout: Duration,
}

impl PgPrimaryStore {
    pub fn new(pool: PgPool, call_timeout: Duration) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
            call_timeout,
        }
    }
}

#[async_trait]
impl PrimaryStore for PgPrimaryStore {
    async fn get_auction(&self, auction_id: &str) -> Result<Option<AuctionDocument>, StoreError> {
        let row = bounded(self.call_timeout, async {
            Ok::<_, StoreError>(
                self.db
                    .process(GetAuctionById {
                        id: auction_id.into(),
                    })
                    .await?,
            )
        })
        .await?;
        row.map(AuctionDocument::try_from).transpose()
    }

    async fn open_auctions_closing_before(
        &self,
        query: &ClosingSoonQuery,
    ) -> Result<Vec<AuctionDocument>, StoreError> {
        let rows = bounded(self.call_timeout, async {
            Ok::<_, StoreError>(
                self.db
                    .process(ListOpenAuctionsClosingBefore {
                        closing_before: query.closing_before,
                        after_id: query.after_id.clone(),
                        limit: i64::from(query.limit),
                    })
                    .await?,
            )
        })
        .await?;
        rows.into_iter().map(AuctionDocument::try_from).collect()
    }

    async fn close_auction(
        &self,
        auction_id: &str,
        expected_version: i64,
    ) -> Result<CasOutcome<AuctionDocument>, StoreError> {
        let row = bounded(self.call_timeout, async {
            Ok::<_, StoreError>(
                self.db
                    .process(CloseAuctionIfVersion {
                        id: auction_id.into(),
                        expected_version,
                    })
                    .await?,
            )
        })
        .await?;
        match row {
            Some(row) => Ok(CasOutcome::Applied(AuctionDocument::try_from(row)?)),
            None => Ok(CasOutcome::Rejected),
        }
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserDocument>, StoreError> {
        let row = bounded(self.call_timeout, async {
            Ok::<_, StoreError>(self.db.process(GetUserById { id: user_id.into() }).await?)
        })
        .await?;
        row.map(UserDocument::try_from).transpose()
    }

    async fn deactivate_user(
        &self,
        user_id: &str,
        expected_version: i64,
    ) -> Result<CasOutcome<UserDocument>, StoreError> {
        let row = bounded(self.call_timeout, async {
            Ok::<_, StoreError>(
                self.db
                    .process(DeactivateUserIfVersion {
                        id: user_id.into(),
                        expected_version,
                    })
                    .await?,
            )
        })
        .await?;
        match row {
            Some(row) => Ok(CasOutcome::Applied(UserDocument::try_from(row)?)),
            None => Ok(CasOutcome::Rejected),
        }
    }

    async fn scrub_user_references(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<u64, StoreError> {
        bounded(self.call_timeout, async {
            Ok::<_, StoreError>(
                self.db
                    .process(ScrubUserReferences {
                        user_id: user_id.into(),
                        display_name: display_name.to_string(),
                    })
                    .await?,
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auction_row(status: &str) -> AuctionRow {
        AuctionRow {
            id: "a-1".into(),
            title: "Lamp".into(),
            description: String::new(),
            seller_id: "u-1".into(),
            thumbnail_id: Some("img-9".into()),
            created_at: OffsetDateTime::UNIX_EPOCH,
            end_time: OffsetDateTime::UNIX_EPOCH,
            status: status.into(),
            current_price: Decimal::new(1250, 2),
            bid_count: 3,
            version: 7,
        }
    }

    #[test]
    fn test_auction_row_conversion() {
        let doc = AuctionDocument::try_from(auction_row("closed")).unwrap();
        assert_eq!(doc.status, AuctionStatus::Closed);
        assert_eq!(doc.thumbnail_id.as_deref(), Some("img-9"));
        assert_eq!(doc.version, 7);
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        assert!(matches!(
            AuctionDocument::try_from(auction_row("paused")),
            Err(StoreError::Corrupt(_))
        ));
    }
}
