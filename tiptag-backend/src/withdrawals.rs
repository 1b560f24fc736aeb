// Withdrawals against a creator's available balance
//
// The balance check and the `total_withdrawn` increment happen in the same write
// transaction, so concurrent requests cannot both spend the same funds.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::error::LedgerError;
use crate::ledger::{self, retrying, Ledger, SettlementMode};
use crate::models::{
    SettlementOutcome, Withdrawal, WithdrawalReceipt, WithdrawalRequest, WithdrawalStatus,
};
use crate::validate;

impl Ledger {
    /// Withdraw `amount` from the creator's available balance
    pub async fn request_withdrawal(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        validate::amount(request.amount_minor_units)?;
        validate::address(&request.destination_address)?;

        retrying("request_withdrawal", || self.try_request_withdrawal(request)).await
    }

    async fn try_request_withdrawal(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        let creator = ledger::creator_by_id(&mut tx, &request.creator_id).await?;

        let amount = request.amount_minor_units;
        let available = creator.available_balance();
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available,
            });
        }

        let total_withdrawn = creator
            .total_withdrawn
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        sqlx::query("UPDATE creators SET total_withdrawn = ? WHERE id = ?")
            .bind(total_withdrawn)
            .bind(&creator.id)
            .execute(&mut *tx)
            .await?;

        let withdrawal_id = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();
        let (status, provider_reference, completed_at_ms) = match self.settlement() {
            SettlementMode::Synchronous => (
                WithdrawalStatus::Completed,
                Some(format!("mock-{}", Uuid::new_v4().simple())),
                Some(now_ms),
            ),
            SettlementMode::Asynchronous => (WithdrawalStatus::Pending, None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO withdrawals (
                id, creator_id, amount, destination_address, status,
                provider_reference, created_at_ms, updated_at_ms, completed_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&withdrawal_id)
        .bind(&creator.id)
        .bind(amount)
        .bind(&request.destination_address)
        .bind(status)
        .bind(&provider_reference)
        .bind(now_ms)
        .bind(now_ms)
        .bind(completed_at_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Withdrawal {} of {} for creator {} -> {} ({})",
            withdrawal_id,
            amount,
            creator.id,
            request.destination_address,
            status.as_str()
        );

        Ok(WithdrawalReceipt {
            withdrawal_id,
            status,
        })
    }

    /// pending -> processing, once the payout has been handed to the provider
    pub async fn mark_withdrawal_processing(
        &self,
        withdrawal_id: &str,
    ) -> Result<Withdrawal, LedgerError> {
        retrying("mark_withdrawal_processing", || {
            self.try_mark_processing(withdrawal_id)
        })
        .await
    }

    async fn try_mark_processing(&self, withdrawal_id: &str) -> Result<Withdrawal, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        let withdrawal = withdrawal_by_id(&mut tx, withdrawal_id).await?;

        match withdrawal.status {
            WithdrawalStatus::Processing => return Ok(withdrawal),
            status if status.is_terminal() => {
                return Err(LedgerError::WithdrawalAlreadyFinal {
                    id: withdrawal.id,
                    status: status.as_str(),
                })
            }
            _ => {}
        }

        sqlx::query("UPDATE withdrawals SET status = ?, updated_at_ms = ? WHERE id = ?")
            .bind(WithdrawalStatus::Processing)
            .bind(Utc::now().timestamp_millis())
            .bind(withdrawal_id)
            .execute(&mut *tx)
            .await?;

        let updated = withdrawal_by_id(&mut tx, withdrawal_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Apply the terminal settlement result of an asynchronous withdrawal.
    ///
    /// A failed payout gives the amount back to the creator's available balance.
    pub async fn confirm_withdrawal(
        &self,
        withdrawal_id: &str,
        outcome: &SettlementOutcome,
    ) -> Result<Withdrawal, LedgerError> {
        retrying("confirm_withdrawal", || {
            self.try_confirm_withdrawal(withdrawal_id, outcome)
        })
        .await
    }

    async fn try_confirm_withdrawal(
        &self,
        withdrawal_id: &str,
        outcome: &SettlementOutcome,
    ) -> Result<Withdrawal, LedgerError> {
        let mut tx = Database::begin_write(self.pool()).await?;
        let withdrawal = withdrawal_by_id(&mut tx, withdrawal_id).await?;

        if withdrawal.status.is_terminal() {
            return Err(LedgerError::WithdrawalAlreadyFinal {
                id: withdrawal.id,
                status: withdrawal.status.as_str(),
            });
        }

        let now_ms = Utc::now().timestamp_millis();
        match outcome {
            SettlementOutcome::Succeeded {
                transaction_reference,
            } => {
                sqlx::query(
                    r#"
                    UPDATE withdrawals
                    SET status = ?, provider_reference = ?, updated_at_ms = ?, completed_at_ms = ?
                    WHERE id = ?
                    "#,
                )
                .bind(WithdrawalStatus::Completed)
                .bind(transaction_reference)
                .bind(now_ms)
                .bind(now_ms)
                .bind(withdrawal_id)
                .execute(&mut *tx)
                .await?;
            }
            SettlementOutcome::Failed { reason } => {
                let creator = ledger::creator_by_id(&mut tx, &withdrawal.creator_id).await?;
                let total_withdrawn = creator
                    .total_withdrawn
                    .checked_sub(withdrawal.amount)
                    .filter(|total| *total >= 0)
                    .ok_or(LedgerError::Overflow)?;

                sqlx::query("UPDATE creators SET total_withdrawn = ? WHERE id = ?")
                    .bind(total_withdrawn)
                    .bind(&creator.id)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    "UPDATE withdrawals SET status = ?, failure_reason = ?, updated_at_ms = ? WHERE id = ?",
                )
                .bind(WithdrawalStatus::Failed)
                .bind(reason)
                .bind(now_ms)
                .bind(withdrawal_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let updated = withdrawal_by_id(&mut tx, withdrawal_id).await?;
        tx.commit().await?;

        info!(
            "Withdrawal {} settled as {}",
            updated.id,
            updated.status.as_str()
        );
        Ok(updated)
    }

    pub async fn list_withdrawals(&self, creator_id: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        Database::creator_by_id(self.pool(), creator_id).await?;
        Ok(sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE creator_id = ? ORDER BY created_at_ms DESC, id",
        )
        .bind(creator_id)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn withdrawal(&self, withdrawal_id: &str) -> Result<Withdrawal, LedgerError> {
        sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = ?")
            .bind(withdrawal_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| LedgerError::WithdrawalNotFound(withdrawal_id.to_string()))
    }
}

async fn withdrawal_by_id(
    conn: &mut SqliteConnection,
    withdrawal_id: &str,
) -> Result<Withdrawal, LedgerError> {
    sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = ?")
        .bind(withdrawal_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::WithdrawalNotFound(withdrawal_id.to_string()))
}
