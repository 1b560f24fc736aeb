// Input validation shared by the ledger and the HTTP handlers

use crate::error::LedgerError;
use crate::models::{Money, ANONYMOUS_TIPPER};

const MAX_MESSAGE_CHARS: usize = 500;
const MAX_TIPPER_NAME_CHARS: usize = 64;
const MAX_GOAL_TITLE_CHARS: usize = 120;

/// Amounts are whole minor units and strictly positive
pub fn amount(amount: Money) -> Result<Money, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(amount)
}

/// Normalize a creator handle: lowercase, 3..=32 chars of `[a-z0-9_-]`
pub fn handle(raw: &str) -> Result<String, LedgerError> {
    let handle = raw.trim().to_ascii_lowercase();
    let valid_chars = handle
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !(3..=32).contains(&handle.len()) || !valid_chars {
        return Err(LedgerError::InvalidRequest(format!(
            "invalid handle '{}': use 3-32 characters from a-z, 0-9, '_' and '-'",
            raw
        )));
    }
    Ok(handle)
}

/// Wallet addresses are `0x`-prefixed hex of 20 (EVM) or 32 (Sui) bytes
pub fn address(raw: &str) -> Result<(), LedgerError> {
    let addr_hex = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(addr_hex)
        .map_err(|e| LedgerError::InvalidRequest(format!("invalid address '{}': {}", raw, e)))?;
    match bytes.len() {
        20 | 32 => Ok(()),
        n => Err(LedgerError::InvalidRequest(format!(
            "address must be 20 or 32 bytes, got {}",
            n
        ))),
    }
}

pub fn currency(raw: &str) -> Result<String, LedgerError> {
    let currency = raw.trim().to_ascii_uppercase();
    if !(3..=10).contains(&currency.len()) || !currency.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LedgerError::InvalidRequest(format!("invalid currency '{}'", raw)));
    }
    Ok(currency)
}

pub fn provider_reference(raw: &str) -> Result<String, LedgerError> {
    let reference = raw.trim();
    if reference.is_empty() || reference.len() > 200 {
        return Err(LedgerError::InvalidRequest(
            "provider reference must be 1-200 characters".to_string(),
        ));
    }
    Ok(reference.to_string())
}

pub fn message(raw: Option<&str>) -> Result<Option<String>, LedgerError> {
    match raw.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) if m.chars().count() > MAX_MESSAGE_CHARS => Err(LedgerError::InvalidRequest(
            format!("message exceeds {} characters", MAX_MESSAGE_CHARS),
        )),
        other => Ok(other.map(str::to_string)),
    }
}

/// Blank or missing names fall back to "Anonymous"
pub fn tipper_name(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(MAX_TIPPER_NAME_CHARS).collect())
        .unwrap_or_else(|| ANONYMOUS_TIPPER.to_string())
}

pub fn goal_title(raw: &str) -> Result<String, LedgerError> {
    let title = raw.trim();
    if title.is_empty() || title.chars().count() > MAX_GOAL_TITLE_CHARS {
        return Err(LedgerError::InvalidRequest(format!(
            "goal title must be 1-{} characters",
            MAX_GOAL_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}
