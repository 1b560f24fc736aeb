// Tip ledger: the write path for tips and the creator aggregates they feed
//
// Every mutation runs in one `BEGIN IMMEDIATE` transaction covering the tip row,
// the creator's counters and the bound goal, so concurrent calls against the same
// creator always land as some sequential order.

use chrono::Utc;
use sqlx::SqliteConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::{Database, DbPool};
use crate::error::LedgerError;
use crate::goals;
use crate::models::{
    Creator, Money, Pagination, RecordedTip, Tip, TipInput, TipStatus, TipsResponse,
};
use crate::notify::{self, Notifier, TipNotification};
use crate::validate;

const MAX_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);
const MAX_PAGE_SIZE: i64 = 200;

/// How withdrawals settle once the balance check has passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// Completed immediately with a mock transaction reference
    Synchronous,
    /// Left pending until `confirm_withdrawal` is called
    Asynchronous,
}

#[derive(Clone)]
pub struct Ledger {
    pool: DbPool,
    notifier: Arc<dyn Notifier>,
    settlement: SettlementMode,
}

/// Validated form of [`TipInput`]
#[derive(Debug, Clone)]
pub(crate) struct PreparedTip {
    pub handle: String,
    pub amount: Money,
    pub currency: String,
    pub message: Option<String>,
    pub tipper_name: String,
    pub tipper_contact: Option<String>,
    pub provider_reference: String,
    pub requested_goal_id: Option<String>,
}

impl PreparedTip {
    pub fn from_input(input: &TipInput) -> Result<Self, LedgerError> {
        let amount = validate::amount(input.amount_minor_units)?;
        let handle = input.recipient_handle.trim().to_ascii_lowercase();
        if handle.is_empty() {
            return Err(LedgerError::RecipientNotFound(input.recipient_handle.clone()));
        }
        Ok(Self {
            handle,
            amount,
            currency: validate::currency(&input.currency)?,
            message: validate::message(input.message.as_deref())?,
            tipper_name: validate::tipper_name(input.tipper_name.as_deref()),
            tipper_contact: input
                .tipper_contact
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            provider_reference: validate::provider_reference(&input.provider_reference)?,
            requested_goal_id: input.active_goal_id.clone(),
        })
    }
}

/// Run `attempt` until it succeeds, fails terminally, or runs out of retries on contention
pub(crate) async fn retrying<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(e) if e.is_retryable() && tries < MAX_ATTEMPTS => {
                warn!(
                    "{}: concurrency conflict (attempt {}/{}), retrying",
                    operation, tries, MAX_ATTEMPTS
                );
                tokio::time::sleep(RETRY_BACKOFF * tries).await;
            }
            other => return other,
        }
    }
}

impl Ledger {
    pub fn new(pool: DbPool, notifier: Arc<dyn Notifier>, settlement: SettlementMode) -> Self {
        Self {
            pool,
            notifier,
            settlement,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn settlement(&self) -> SettlementMode {
        self.settlement
    }

    /// Record a confirmed payment as a completed tip.
    ///
    /// Idempotent on `provider_reference`: a reference that was already applied
    /// returns the existing tip id with `duplicate` set and changes nothing. A
    /// pending tip with the same reference is completed in place.
    pub async fn record_tip(&self, input: &TipInput) -> Result<RecordedTip, LedgerError> {
        let tip = PreparedTip::from_input(input)?;
        let (recorded, notification) =
            retrying("record_tip", || self.try_record_tip(&tip)).await?;

        if let Some(notification) = notification {
            notify::dispatch(self.notifier.clone(), notification);
        }
        Ok(recorded)
    }

    async fn try_record_tip(
        &self,
        tip: &PreparedTip,
    ) -> Result<(RecordedTip, Option<TipNotification>), LedgerError> {
        let mut tx = Database::begin_write(&self.pool).await?;

        let creator = creator_by_handle(&mut tx, &tip.handle).await?;
        let now_ms = Utc::now().timestamp_millis();

        match tip_by_reference(&mut tx, &tip.provider_reference).await? {
            Some(existing) => {
                if existing.creator_id != creator.id {
                    return Err(LedgerError::ReferenceConflict(tip.provider_reference.clone()));
                }
                match existing.status {
                    TipStatus::Completed => {
                        debug!(
                            "Duplicate confirmation for '{}', tip {} already recorded",
                            tip.provider_reference, existing.id
                        );
                        Ok((duplicate(&existing), None))
                    }
                    TipStatus::Failed => Err(LedgerError::TipAlreadyFinal {
                        reference: tip.provider_reference.clone(),
                        status: TipStatus::Failed.as_str(),
                    }),
                    TipStatus::Pending
                        if existing.amount != tip.amount || existing.currency != tip.currency =>
                    {
                        warn!(
                            "Confirmation for '{}' says {} {} but the pending tip {} is {} {}",
                            tip.provider_reference,
                            tip.amount,
                            tip.currency,
                            existing.id,
                            existing.amount,
                            existing.currency
                        );
                        Err(LedgerError::ReferenceConflict(tip.provider_reference.clone()))
                    }
                    TipStatus::Pending => {
                        let recorded = complete_pending(
                            &mut tx,
                            &creator,
                            &existing,
                            tip.requested_goal_id.as_deref(),
                            now_ms,
                        )
                        .await?;
                        tx.commit().await?;
                        Ok((recorded, Some(notification_for(&creator, &existing))))
                    }
                }
            }
            None => {
                let tip_id = Uuid::new_v4().to_string();
                let goal =
                    goals::bindable_goal(&mut tx, &creator.id, tip.requested_goal_id.as_deref())
                        .await?;

                sqlx::query(
                    r#"
                    INSERT INTO tips (
                        id, creator_id, amount, currency, message, tipper_name,
                        tipper_contact, provider_reference, status, goal_id,
                        created_at_ms, completed_at_ms
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&tip_id)
                .bind(&creator.id)
                .bind(tip.amount)
                .bind(&tip.currency)
                .bind(&tip.message)
                .bind(&tip.tipper_name)
                .bind(&tip.tipper_contact)
                .bind(&tip.provider_reference)
                .bind(TipStatus::Completed)
                .bind(goal.as_ref().map(|g| g.id.as_str()))
                .bind(now_ms)
                .bind(now_ms)
                .execute(&mut *tx)
                .await?;

                credit_creator(&mut tx, &creator, tip.amount).await?;
                let goal_completed = match &goal {
                    Some(goal) => goals::accrue(&mut tx, goal, tip.amount, now_ms).await?,
                    None => false,
                };

                tx.commit().await?;

                info!(
                    "Recorded tip {} of {} {} for '{}' (ref {})",
                    tip_id, tip.amount, tip.currency, creator.handle, tip.provider_reference
                );

                let notification = TipNotification {
                    to: creator.email.clone(),
                    creator_handle: creator.handle.clone(),
                    tip_id: tip_id.clone(),
                    amount: tip.amount,
                    currency: tip.currency.clone(),
                    tipper_name: tip.tipper_name.clone(),
                    message: tip.message.clone(),
                };

                Ok((
                    RecordedTip {
                        tip_id,
                        duplicate: false,
                        goal_id: goal.map(|g| g.id),
                        goal_completed,
                    },
                    Some(notification),
                ))
            }
        }
    }

    /// Write a pending tip for a payment the provider has not confirmed yet.
    ///
    /// Pending tips never contribute to aggregates. Calling this again with the
    /// same reference returns the stored tip unchanged.
    pub async fn begin_tip(&self, input: &TipInput) -> Result<Tip, LedgerError> {
        let tip = PreparedTip::from_input(input)?;
        retrying("begin_tip", || self.try_begin_tip(&tip)).await
    }

    async fn try_begin_tip(&self, tip: &PreparedTip) -> Result<Tip, LedgerError> {
        let mut tx = Database::begin_write(&self.pool).await?;
        let creator = creator_by_handle(&mut tx, &tip.handle).await?;

        if let Some(existing) = tip_by_reference(&mut tx, &tip.provider_reference).await? {
            if existing.creator_id != creator.id {
                return Err(LedgerError::ReferenceConflict(tip.provider_reference.clone()));
            }
            return Ok(existing);
        }

        let tip_id = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO tips (
                id, creator_id, amount, currency, message, tipper_name,
                tipper_contact, provider_reference, status, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tip_id)
        .bind(&creator.id)
        .bind(tip.amount)
        .bind(&tip.currency)
        .bind(&tip.message)
        .bind(&tip.tipper_name)
        .bind(&tip.tipper_contact)
        .bind(&tip.provider_reference)
        .bind(TipStatus::Pending)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        let stored = tip_by_reference(&mut tx, &tip.provider_reference)
            .await?
            .ok_or_else(|| LedgerError::TipNotFound(tip.provider_reference.clone()))?;
        tx.commit().await?;

        info!(
            "Pending tip {} of {} {} for '{}' awaiting confirmation (ref {})",
            tip_id, tip.amount, tip.currency, creator.handle, tip.provider_reference
        );
        Ok(stored)
    }

    /// Complete a pending tip once the provider reports success
    pub async fn complete_tip(&self, provider_reference: &str) -> Result<RecordedTip, LedgerError> {
        let (recorded, notification) =
            retrying("complete_tip", || self.try_complete_tip(provider_reference)).await?;

        if let Some(notification) = notification {
            notify::dispatch(self.notifier.clone(), notification);
        }
        Ok(recorded)
    }

    async fn try_complete_tip(
        &self,
        provider_reference: &str,
    ) -> Result<(RecordedTip, Option<TipNotification>), LedgerError> {
        let mut tx = Database::begin_write(&self.pool).await?;

        let existing = tip_by_reference(&mut tx, provider_reference)
            .await?
            .ok_or_else(|| LedgerError::TipNotFound(provider_reference.to_string()))?;

        match existing.status {
            TipStatus::Completed => Ok((duplicate(&existing), None)),
            TipStatus::Failed => Err(LedgerError::TipAlreadyFinal {
                reference: provider_reference.to_string(),
                status: TipStatus::Failed.as_str(),
            }),
            TipStatus::Pending => {
                let creator = creator_by_id(&mut tx, &existing.creator_id).await?;
                let now_ms = Utc::now().timestamp_millis();
                let recorded = complete_pending(&mut tx, &creator, &existing, None, now_ms).await?;
                tx.commit().await?;
                Ok((recorded, Some(notification_for(&creator, &existing))))
            }
        }
    }

    /// Mark a pending tip failed. Failed tips are terminal and never touch aggregates.
    pub async fn fail_tip(&self, provider_reference: &str, reason: &str) -> Result<Tip, LedgerError> {
        retrying("fail_tip", || self.try_fail_tip(provider_reference, reason)).await
    }

    async fn try_fail_tip(&self, provider_reference: &str, reason: &str) -> Result<Tip, LedgerError> {
        let mut tx = Database::begin_write(&self.pool).await?;

        let existing = tip_by_reference(&mut tx, provider_reference)
            .await?
            .ok_or_else(|| LedgerError::TipNotFound(provider_reference.to_string()))?;

        match existing.status {
            TipStatus::Failed => Ok(existing),
            TipStatus::Completed => Err(LedgerError::TipAlreadyFinal {
                reference: provider_reference.to_string(),
                status: TipStatus::Completed.as_str(),
            }),
            TipStatus::Pending => {
                sqlx::query(
                    "UPDATE tips SET status = ?, failure_reason = ? WHERE id = ? AND status = ?",
                )
                .bind(TipStatus::Failed)
                .bind(reason)
                .bind(&existing.id)
                .bind(TipStatus::Pending)
                .execute(&mut *tx)
                .await?;

                let failed = tip_by_reference(&mut tx, provider_reference)
                    .await?
                    .ok_or_else(|| LedgerError::TipNotFound(provider_reference.to_string()))?;
                tx.commit().await?;

                info!("Tip {} failed (ref {}): {}", failed.id, provider_reference, reason);
                Ok(failed)
            }
        }
    }

    pub async fn tip_by_reference(&self, provider_reference: &str) -> Result<Option<Tip>, LedgerError> {
        Ok(sqlx::query_as::<_, Tip>("SELECT * FROM tips WHERE provider_reference = ?")
            .bind(provider_reference)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Newest-first page of a creator's tips
    pub async fn list_tips(
        &self,
        creator_id: &str,
        page: &Pagination,
    ) -> Result<TipsResponse, LedgerError> {
        Database::creator_by_id(&self.pool, creator_id).await?;

        let limit = page.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = page.offset.max(0);

        let tips = sqlx::query_as::<_, Tip>(
            r#"
            SELECT * FROM tips
            WHERE creator_id = ?
            ORDER BY created_at_ms DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(creator_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tips WHERE creator_id = ?")
            .bind(creator_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(TipsResponse {
            tips,
            total,
            limit,
            offset,
        })
    }

    /// Oldest pending tips first, for the reconciler
    pub async fn pending_tips(&self, limit: i64) -> Result<Vec<Tip>, LedgerError> {
        Ok(sqlx::query_as::<_, Tip>(
            "SELECT * FROM tips WHERE status = ? ORDER BY created_at_ms ASC LIMIT ?",
        )
        .bind(TipStatus::Pending)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

fn duplicate(existing: &Tip) -> RecordedTip {
    RecordedTip {
        tip_id: existing.id.clone(),
        duplicate: true,
        goal_id: existing.goal_id.clone(),
        goal_completed: false,
    }
}

fn notification_for(creator: &Creator, tip: &Tip) -> TipNotification {
    TipNotification {
        to: creator.email.clone(),
        creator_handle: creator.handle.clone(),
        tip_id: tip.id.clone(),
        amount: tip.amount,
        currency: tip.currency.clone(),
        tipper_name: tip.tipper_name.clone(),
        message: tip.message.clone(),
    }
}

/// pending -> completed, applying the same effects as a fresh confirmed tip
async fn complete_pending(
    conn: &mut SqliteConnection,
    creator: &Creator,
    pending: &Tip,
    requested_goal_id: Option<&str>,
    now_ms: i64,
) -> Result<RecordedTip, LedgerError> {
    let goal = goals::bindable_goal(conn, &creator.id, requested_goal_id).await?;

    let updated = sqlx::query(
        r#"
        UPDATE tips SET status = ?, goal_id = ?, completed_at_ms = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(TipStatus::Completed)
    .bind(goal.as_ref().map(|g| g.id.as_str()))
    .bind(now_ms)
    .bind(&pending.id)
    .bind(TipStatus::Pending)
    .execute(&mut *conn)
    .await?;

    // The row was read under the write lock, so it cannot have moved on.
    if updated.rows_affected() != 1 {
        return Err(LedgerError::ConcurrencyConflict);
    }

    credit_creator(conn, creator, pending.amount).await?;
    let goal_completed = match &goal {
        Some(goal) => goals::accrue(conn, goal, pending.amount, now_ms).await?,
        None => false,
    };

    info!(
        "Completed pending tip {} of {} {} for '{}' (ref {})",
        pending.id, pending.amount, pending.currency, creator.handle, pending.provider_reference
    );

    Ok(RecordedTip {
        tip_id: pending.id.clone(),
        duplicate: false,
        goal_id: goal.map(|g| g.id),
        goal_completed,
    })
}

async fn credit_creator(
    conn: &mut SqliteConnection,
    creator: &Creator,
    amount: Money,
) -> Result<(), LedgerError> {
    let total_received = creator
        .total_tips_received
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)?;
    let tip_count = creator
        .total_tip_count
        .checked_add(1)
        .ok_or(LedgerError::Overflow)?;

    sqlx::query("UPDATE creators SET total_tips_received = ?, total_tip_count = ? WHERE id = ?")
        .bind(total_received)
        .bind(tip_count)
        .bind(&creator.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn creator_by_handle(
    conn: &mut SqliteConnection,
    handle: &str,
) -> Result<Creator, LedgerError> {
    sqlx::query_as::<_, Creator>("SELECT * FROM creators WHERE handle = ?")
        .bind(handle)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::RecipientNotFound(handle.to_string()))
}

pub(crate) async fn creator_by_id(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Creator, LedgerError> {
    sqlx::query_as::<_, Creator>("SELECT * FROM creators WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::CreatorNotFound(id.to_string()))
}

async fn tip_by_reference(
    conn: &mut SqliteConnection,
    provider_reference: &str,
) -> Result<Option<Tip>, LedgerError> {
    Ok(sqlx::query_as::<_, Tip>("SELECT * FROM tips WHERE provider_reference = ?")
        .bind(provider_reference)
        .fetch_optional(&mut *conn)
        .await?)
}
