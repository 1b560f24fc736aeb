// Database models and API payloads for the tiptag backend

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};

/// Money in minor units (cents).
pub type Money = i64;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const ANONYMOUS_TIPPER: &str = "Anonymous";

// ============================================================================
// TIMESTAMPS
// ============================================================================

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

// ============================================================================
// STATUS ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TipStatus {
    Pending,
    Completed,
    Failed,
}

impl TipStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TipStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TipStatus::Pending => "pending",
            TipStatus::Completed => "completed",
            TipStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }
}

// ============================================================================
// STORED RECORDS
// ============================================================================

/// Creator account with its running aggregates
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub id: String,
    pub handle: String,
    pub payout_address: String,
    #[serde(skip_serializing)]
    pub email: Option<String>,
    pub total_tips_received: Money,
    pub total_tip_count: i64,
    pub total_withdrawn: Money,
    pub created_at: DateTime<Utc>,
}

impl Creator {
    pub fn available_balance(&self) -> Money {
        self.total_tips_received - self.total_withdrawn
    }
}

impl<'r> FromRow<'r, SqliteRow> for Creator {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            handle: row.try_get("handle")?,
            payout_address: row.try_get("payout_address")?,
            email: row.try_get("email")?,
            total_tips_received: row.try_get("total_tips_received")?,
            total_tip_count: row.try_get("total_tip_count")?,
            total_withdrawn: row.try_get("total_withdrawn")?,
            created_at: from_millis(row.try_get("created_at_ms")?),
        })
    }
}

/// Tip stored in the ledger
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    pub id: String,
    pub creator_id: String,
    pub amount: Money,
    pub currency: String,
    pub message: Option<String>,
    pub tipper_name: String,
    #[serde(skip_serializing)]
    pub tipper_contact: Option<String>,
    pub provider_reference: String,
    pub status: TipStatus,
    pub failure_reason: Option<String>,
    pub goal_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for Tip {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            creator_id: row.try_get("creator_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            message: row.try_get("message")?,
            tipper_name: row.try_get("tipper_name")?,
            tipper_contact: row.try_get("tipper_contact")?,
            provider_reference: row.try_get("provider_reference")?,
            status: row.try_get("status")?,
            failure_reason: row.try_get("failure_reason")?,
            goal_id: row.try_get("goal_id")?,
            created_at: from_millis(row.try_get("created_at_ms")?),
            completed_at: opt_from_millis(row.try_get("completed_at_ms")?),
        })
    }
}

/// Funding goal; `current_amount` is only ever advanced by completed tips
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingGoal {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub description: Option<String>,
    pub target_amount: Money,
    pub current_amount: Money,
    pub active: bool,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FundingGoal {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

impl<'r> FromRow<'r, SqliteRow> for FundingGoal {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            creator_id: row.try_get("creator_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            target_amount: row.try_get("target_amount")?,
            current_amount: row.try_get("current_amount")?,
            active: row.try_get("active")?,
            is_public: row.try_get("is_public")?,
            created_at: from_millis(row.try_get("created_at_ms")?),
            completed_at: opt_from_millis(row.try_get("completed_at_ms")?),
        })
    }
}

/// Withdrawal of a creator's available balance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: String,
    pub creator_id: String,
    pub amount: Money,
    pub destination_address: String,
    pub status: WithdrawalStatus,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for Withdrawal {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            creator_id: row.try_get("creator_id")?,
            amount: row.try_get("amount")?,
            destination_address: row.try_get("destination_address")?,
            status: row.try_get("status")?,
            provider_reference: row.try_get("provider_reference")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: from_millis(row.try_get("created_at_ms")?),
            updated_at: from_millis(row.try_get("updated_at_ms")?),
            completed_at: opt_from_millis(row.try_get("completed_at_ms")?),
        })
    }
}

// ============================================================================
// LEDGER INPUTS AND OUTCOMES
// ============================================================================

/// A confirmed (or about to be confirmed) payment destined for a creator
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipInput {
    pub recipient_handle: String,
    pub amount_minor_units: Money,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub message: Option<String>,
    pub tipper_name: Option<String>,
    pub tipper_contact: Option<String>,
    pub provider_reference: String,
    pub active_goal_id: Option<String>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Result of `record_tip`; `duplicate` is set when the provider reference was already applied
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTip {
    pub tip_id: String,
    pub duplicate: bool,
    pub goal_id: Option<String>,
    pub goal_completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub creator_id: String,
    pub amount_minor_units: Money,
    pub destination_address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub withdrawal_id: String,
    pub status: WithdrawalStatus,
}

/// Terminal settlement result reported for an asynchronous withdrawal
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SettlementOutcome {
    #[serde(rename_all = "camelCase")]
    Succeeded { transaction_reference: String },
    #[serde(rename_all = "camelCase")]
    Failed { reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCreator {
    pub handle: String,
    pub payout_address: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGoal {
    pub creator_id: String,
    pub title: String,
    pub description: Option<String>,
    pub target_amount: Money,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub activate: bool,
}

fn default_true() -> bool {
    true
}

/// Settings edit for a goal. `current_amount` is accepted only so it can be refused.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub target_amount: Option<Money>,
    pub is_public: Option<bool>,
    pub current_amount: Option<Money>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalActivation {
    pub creator_id: String,
    pub goal_id: String,
}

// ============================================================================
// HTTP PAYLOADS
// ============================================================================

/// Checkout request: the provider is charged before anything touches the ledger
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub recipient_handle: String,
    pub amount_minor_units: Money,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub message: Option<String>,
    pub tipper_name: Option<String>,
    pub tipper_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub tip_id: String,
    pub status: TipStatus,
    pub provider_reference: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipIdResponse {
    pub tip_id: String,
}

/// Confirmation pushed by the payment provider
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    pub provider_reference: String,
    pub status: WebhookStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Paginated tips
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipsResponse {
    pub tips: Vec<Tip>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Public creator profile
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorProfile {
    pub handle: String,
    pub payout_address: String,
    pub total_tip_count: i64,
    pub active_goal: Option<FundingGoal>,
}
