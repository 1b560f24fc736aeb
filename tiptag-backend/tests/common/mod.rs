#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiptag_backend::database::{Database, DbPool};
use tiptag_backend::error::LedgerError;
use tiptag_backend::ledger::{Ledger, SettlementMode};
use tiptag_backend::models::{Creator, NewCreator, NewGoal, FundingGoal, TipInput};
use tiptag_backend::notify::{Notifier, TipNotification};
use tiptag_backend::payment::{PaymentInit, PaymentProvider, PaymentRequest, PaymentStatus};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Forwards every notification to a channel the test can inspect
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<TipNotification>,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_tip(&self, notification: &TipNotification) -> Result<()> {
        self.tx
            .send(notification.clone())
            .map_err(|_| anyhow!("receiver dropped"))
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify_tip(&self, _notification: &TipNotification) -> Result<()> {
        Err(anyhow!("email provider unavailable"))
    }
}

pub struct TestLedger {
    pub ledger: Ledger,
    pub notifications: mpsc::UnboundedReceiver<TipNotification>,
}

pub async fn ledger() -> TestLedger {
    ledger_with(SettlementMode::Synchronous).await
}

pub async fn ledger_with(settlement: SettlementMode) -> TestLedger {
    let pool = Database::in_memory().await.unwrap();
    let (tx, notifications) = mpsc::unbounded_channel();
    TestLedger {
        ledger: Ledger::new(pool, Arc::new(ChannelNotifier { tx }), settlement),
        notifications,
    }
}

/// File-backed database with a real multi-connection pool, removed on drop
pub struct TempDb {
    pub path: PathBuf,
    pub pool: DbPool,
}

impl TempDb {
    pub async fn new() -> Self {
        let path = std::env::temp_dir().join(format!("tiptag-test-{}.db", Uuid::new_v4()));
        let pool = Database::init(&format!("sqlite:{}", path.display()))
            .await
            .unwrap();
        Self { path, pool }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

pub fn address() -> String {
    format!("0x{}", "5a".repeat(20))
}

pub async fn creator(ledger: &Ledger, handle: &str) -> Creator {
    Database::insert_creator(
        ledger.pool(),
        &NewCreator {
            handle: handle.to_string(),
            payout_address: address(),
            email: Some(format!("{}@example.com", handle)),
        },
    )
    .await
    .unwrap()
}

pub async fn reload(ledger: &Ledger, creator: &Creator) -> Creator {
    Database::creator_by_id(ledger.pool(), &creator.id).await.unwrap()
}

pub fn tip(handle: &str, amount: i64, reference: &str) -> TipInput {
    TipInput {
        recipient_handle: handle.to_string(),
        amount_minor_units: amount,
        currency: "USD".to_string(),
        message: Some("love your work".to_string()),
        tipper_name: None,
        tipper_contact: None,
        provider_reference: reference.to_string(),
        active_goal_id: None,
    }
}

pub async fn goal(ledger: &Ledger, creator: &Creator, target: i64, activate: bool) -> FundingGoal {
    ledger
        .create_goal(&NewGoal {
            creator_id: creator.id.clone(),
            title: "New microphone".to_string(),
            description: None,
            target_amount: target,
            is_public: true,
            activate,
        })
        .await
        .unwrap()
}

/// Seed the balance with one completed tip
pub async fn fund(ledger: &Ledger, creator: &Creator, amount: i64) {
    ledger
        .record_tip(&tip(&creator.handle, amount, &format!("seed-{}", Uuid::new_v4())))
        .await
        .unwrap();
}

pub async fn completed_sum(pool: &DbPool, creator_id: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM tips WHERE creator_id = ? AND status = 'completed'",
    )
    .bind(creator_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn active_goal_count(pool: &DbPool, creator_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM funding_goals WHERE creator_id = ? AND active = 1")
        .bind(creator_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Drain notifications already dispatched, waiting briefly for detached tasks
pub async fn drain(rx: &mut mpsc::UnboundedReceiver<TipNotification>) -> Vec<TipNotification> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

/// Scripted payment provider
#[derive(Default)]
pub struct FakeProvider {
    pub next_pay: Mutex<Option<Result<PaymentInit, LedgerError>>>,
    pub statuses: Mutex<HashMap<String, PaymentStatus>>,
    pub charges: Mutex<Vec<PaymentRequest>>,
}

impl FakeProvider {
    pub fn answering(result: Result<PaymentInit, LedgerError>) -> Self {
        let provider = Self::default();
        *provider.next_pay.lock().unwrap() = Some(result);
        provider
    }

    pub fn set_status(&self, reference: &str, status: PaymentStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference.to_string(), status);
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentInit, LedgerError> {
        self.charges.lock().unwrap().push(request.clone());
        self.next_pay
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Err(LedgerError::ProviderTimeout))
    }

    async fn payment_status(&self, reference: &str) -> Result<PaymentStatus, LedgerError> {
        self.statuses
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or(LedgerError::ProviderTimeout)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
