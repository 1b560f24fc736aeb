// Tip checkout: charge through the payment provider, then write the ledger
//
// Nothing is written before the provider answers. A synchronous success is
// recorded as a completed tip, a pending charge becomes a pending tip for the
// webhook or reconciler to finish, and a declined charge is kept as a failed tip.

use tracing::{info, warn};

use crate::database::Database;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::{CheckoutRequest, CheckoutResponse, TipInput, TipStatus};
use crate::payment::{PaymentProvider, PaymentRequest, PaymentStatus};
use crate::validate;

pub async fn checkout(
    ledger: &Ledger,
    provider: &dyn PaymentProvider,
    request: &CheckoutRequest,
) -> Result<CheckoutResponse, LedgerError> {
    let amount = validate::amount(request.amount_minor_units)?;
    let currency = validate::currency(&request.currency)?;
    validate::message(request.message.as_deref())?;
    let creator = Database::creator_by_handle(ledger.pool(), &request.recipient_handle).await?;

    let init = provider
        .pay(&PaymentRequest {
            amount,
            currency: currency.clone(),
            destination: creator.payout_address.clone(),
        })
        .await?;

    let input = TipInput {
        recipient_handle: creator.handle.clone(),
        amount_minor_units: amount,
        currency,
        message: request.message.clone(),
        tipper_name: request.tipper_name.clone(),
        tipper_contact: request.tipper_contact.clone(),
        provider_reference: init.reference.clone(),
        active_goal_id: None,
    };

    match init.status {
        PaymentStatus::Succeeded => {
            let recorded = ledger.record_tip(&input).await?;
            Ok(CheckoutResponse {
                tip_id: recorded.tip_id,
                status: TipStatus::Completed,
                provider_reference: init.reference,
            })
        }
        PaymentStatus::Pending => {
            let tip = ledger.begin_tip(&input).await?;
            info!(
                "Checkout for '{}' pending provider confirmation (ref {})",
                creator.handle, init.reference
            );
            Ok(CheckoutResponse {
                tip_id: tip.id,
                status: tip.status,
                provider_reference: init.reference,
            })
        }
        PaymentStatus::Failed { reason } => {
            warn!(
                "Payment for '{}' declined (ref {}): {}",
                creator.handle, init.reference, reason
            );
            ledger.begin_tip(&input).await?;
            ledger.fail_tip(&init.reference, &reason).await?;
            Err(LedgerError::ProviderFailure(reason))
        }
    }
}
