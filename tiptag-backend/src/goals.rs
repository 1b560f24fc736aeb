// Funding goals: activation, settings and accrual from completed tips
//
// A goal's `current_amount` is derived from the tips bound to it and can only be
// advanced by `accrue`. At most one goal per creator is active; activation
// deactivates the others inside the same write transaction.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::error::LedgerError;
use crate::ledger::{self, retrying, Ledger};
use crate::models::{FundingGoal, GoalUpdate, Money, NewGoal};
use crate::validate;

impl Ledger {
    /// Create a goal, optionally making it the creator's active goal
    pub async fn create_goal(&self, new: &NewGoal) -> Result<FundingGoal, LedgerError> {
        let title = validate::goal_title(&new.title)?;
        validate::amount(new.target_amount)?;

        retrying("create_goal", || self.try_create_goal(new, &title)).await
    }

    async fn try_create_goal(&self, new: &NewGoal, title: &str) -> Result<FundingGoal, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        ledger::creator_by_id(&mut tx, &new.creator_id).await?;

        if new.activate {
            deactivate_all(&mut tx, &new.creator_id, None).await?;
        }

        let goal_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO funding_goals (
                id, creator_id, title, description, target_amount,
                current_amount, active, is_public, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&goal_id)
        .bind(&new.creator_id)
        .bind(title)
        .bind(&new.description)
        .bind(new.target_amount)
        .bind(new.activate)
        .bind(new.is_public)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let goal = goal_by_id(&mut tx, &new.creator_id, &goal_id).await?;
        tx.commit().await?;

        info!(
            "Created goal {} '{}' (target {}) for creator {}, active={}",
            goal.id, goal.title, goal.target_amount, goal.creator_id, goal.active
        );
        Ok(goal)
    }

    /// Edit goal settings. `current_amount` is derived state and is refused.
    pub async fn update_goal(
        &self,
        creator_id: &str,
        goal_id: &str,
        update: &GoalUpdate,
    ) -> Result<FundingGoal, LedgerError> {
        if update.current_amount.is_some() {
            return Err(LedgerError::InvalidRequest(
                "currentAmount is derived from completed tips and cannot be set".to_string(),
            ));
        }
        let title = update.title.as_deref().map(validate::goal_title).transpose()?;
        if let Some(target) = update.target_amount {
            validate::amount(target)?;
        }

        retrying("update_goal", || {
            self.try_update_goal(creator_id, goal_id, update, title.as_deref())
        })
        .await
    }

    async fn try_update_goal(
        &self,
        creator_id: &str,
        goal_id: &str,
        update: &GoalUpdate,
        title: Option<&str>,
    ) -> Result<FundingGoal, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        let goal = goal_by_id(&mut tx, creator_id, goal_id).await?;

        let target_amount = match update.target_amount {
            Some(target) if target != goal.target_amount => {
                if goal.is_completed() {
                    return Err(LedgerError::GoalCompleted(goal.id.clone()));
                }
                target
            }
            _ => goal.target_amount,
        };

        // Lowering the target to or below the progress completes the goal, active or not.
        let now_ms = Utc::now().timestamp_millis();
        let reached = !goal.is_completed() && goal.current_amount >= target_amount;
        let active = goal.active && !reached;
        let completed_at_ms = match (&goal.completed_at, reached) {
            (Some(at), _) => Some(at.timestamp_millis()),
            (None, true) => Some(now_ms),
            (None, false) => None,
        };

        // An empty description clears it.
        let description = match update.description.as_deref().map(str::trim) {
            Some("") => None,
            Some(text) => Some(text),
            None => goal.description.as_deref(),
        };

        sqlx::query(
            r#"
            UPDATE funding_goals
            SET title = ?, description = ?, target_amount = ?, is_public = ?,
                active = ?, completed_at_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(title.unwrap_or(&goal.title))
        .bind(description)
        .bind(target_amount)
        .bind(update.is_public.unwrap_or(goal.is_public))
        .bind(active)
        .bind(completed_at_ms)
        .bind(&goal.id)
        .execute(&mut *tx)
        .await?;

        let updated = goal_by_id(&mut tx, creator_id, goal_id).await?;
        tx.commit().await?;

        if reached {
            info!("Goal {} completed by target change", updated.id);
        }
        Ok(updated)
    }

    /// Make `goal_id` the creator's only active goal
    pub async fn activate_goal(
        &self,
        creator_id: &str,
        goal_id: &str,
    ) -> Result<FundingGoal, LedgerError> {
        retrying("activate_goal", || self.try_activate_goal(creator_id, goal_id)).await
    }

    async fn try_activate_goal(
        &self,
        creator_id: &str,
        goal_id: &str,
    ) -> Result<FundingGoal, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        let goal = goal_by_id(&mut tx, creator_id, goal_id).await?;
        if goal.is_completed() || goal.current_amount >= goal.target_amount {
            return Err(LedgerError::GoalCompleted(goal.id));
        }

        deactivate_all(&mut tx, creator_id, Some(goal_id)).await?;
        sqlx::query("UPDATE funding_goals SET active = 1 WHERE id = ?")
            .bind(goal_id)
            .execute(&mut *tx)
            .await?;

        let activated = goal_by_id(&mut tx, creator_id, goal_id).await?;
        tx.commit().await?;

        info!("Activated goal {} for creator {}", goal_id, creator_id);
        Ok(activated)
    }

    pub async fn deactivate_goal(
        &self,
        creator_id: &str,
        goal_id: &str,
    ) -> Result<FundingGoal, LedgerError> {
        retrying("deactivate_goal", || self.try_deactivate_goal(creator_id, goal_id)).await
    }

    async fn try_deactivate_goal(
        &self,
        creator_id: &str,
        goal_id: &str,
    ) -> Result<FundingGoal, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        goal_by_id(&mut tx, creator_id, goal_id).await?;

        sqlx::query("UPDATE funding_goals SET active = 0 WHERE id = ?")
            .bind(goal_id)
            .execute(&mut *tx)
            .await?;

        let goal = goal_by_id(&mut tx, creator_id, goal_id).await?;
        tx.commit().await?;

        info!("Deactivated goal {} for creator {}", goal_id, creator_id);
        Ok(goal)
    }

    pub async fn list_goals(&self, creator_id: &str) -> Result<Vec<FundingGoal>, LedgerError> {
        Database::creator_by_id(self.pool(), creator_id).await?;
        Ok(sqlx::query_as::<_, FundingGoal>(
            "SELECT * FROM funding_goals WHERE creator_id = ? ORDER BY created_at_ms DESC, id",
        )
        .bind(creator_id)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn active_goal(&self, creator_id: &str) -> Result<Option<FundingGoal>, LedgerError> {
        Ok(sqlx::query_as::<_, FundingGoal>(
            "SELECT * FROM funding_goals WHERE creator_id = ? AND active = 1",
        )
        .bind(creator_id)
        .fetch_optional(self.pool())
        .await?)
    }
}

async fn goal_by_id(
    conn: &mut SqliteConnection,
    creator_id: &str,
    goal_id: &str,
) -> Result<FundingGoal, LedgerError> {
    sqlx::query_as::<_, FundingGoal>("SELECT * FROM funding_goals WHERE id = ? AND creator_id = ?")
        .bind(goal_id)
        .bind(creator_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::GoalNotFound(goal_id.to_string()))
}

async fn deactivate_all(
    conn: &mut SqliteConnection,
    creator_id: &str,
    except: Option<&str>,
) -> Result<(), LedgerError> {
    sqlx::query(
        "UPDATE funding_goals SET active = 0 WHERE creator_id = ? AND active = 1 AND id IS NOT ?",
    )
    .bind(creator_id)
    .bind(except)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// The goal a tip completing now should be bound to.
///
/// That is always the creator's active goal at this moment. A requested goal id
/// that is not the active one (switched, completed, or someone else's) leaves
/// the tip unbound.
pub(crate) async fn bindable_goal(
    conn: &mut SqliteConnection,
    creator_id: &str,
    requested_goal_id: Option<&str>,
) -> Result<Option<FundingGoal>, LedgerError> {
    let active = sqlx::query_as::<_, FundingGoal>(
        "SELECT * FROM funding_goals WHERE creator_id = ? AND active = 1",
    )
    .bind(creator_id)
    .fetch_optional(&mut *conn)
    .await?;

    match (requested_goal_id, active) {
        (Some(requested), Some(goal)) if goal.id != requested => {
            warn!(
                "Requested goal {} is not the active goal {} of creator {}, tip left unbound",
                requested, goal.id, creator_id
            );
            Ok(None)
        }
        (Some(requested), None) => {
            warn!(
                "Requested goal {} is not active for creator {}, tip left unbound",
                requested, creator_id
            );
            Ok(None)
        }
        (_, active) => Ok(active),
    }
}

/// Add a completed tip to its goal. Returns true when this tip completed the goal.
pub(crate) async fn accrue(
    conn: &mut SqliteConnection,
    goal: &FundingGoal,
    amount: Money,
    now_ms: i64,
) -> Result<bool, LedgerError> {
    let current = goal
        .current_amount
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)?;
    let reached = current >= goal.target_amount;

    sqlx::query(
        r#"
        UPDATE funding_goals
        SET current_amount = ?, active = ?, completed_at_ms = ?
        WHERE id = ? AND active = 1
        "#,
    )
    .bind(current)
    .bind(!reached)
    .bind(if reached { Some(now_ms) } else { None })
    .bind(&goal.id)
    .execute(&mut *conn)
    .await?;

    if reached {
        info!(
            "Goal {} reached {} of {} and is complete",
            goal.id, current, goal.target_amount
        );
    }
    Ok(reached)
}
