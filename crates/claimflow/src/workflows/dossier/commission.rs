use serde::{Deserialize, Serialize};
use thiserror::Error;

/// French VAT applied to the platform's fee.
pub const VAT_RATE: f64 = 0.20;

/// Inputs to one waterfall computation. Percentages come from the party
/// records at computation time; `None` means the record carries no rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommissionInputs {
    /// Audited amount the administration will reimburse.
    pub base_amount: f64,
    /// Share of the base amount the client owes the expert.
    pub client_fee_pct: Option<f64>,
    /// Share of the expert fee carved out for the platform.
    pub platform_fee_pct: Option<f64>,
    /// Share of the platform's retained fee owed to the referral partner.
    pub referrer_share_pct: Option<f64>,
}

/// Fully-resolved waterfall breakdown. Every monetary field is rounded to
/// cents at its own step, so downstream sums reproduce what was invoiced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionResult {
    pub base_amount: f64,
    /// Rates actually applied, after normalization, frozen for audit.
    pub client_fee_pct: f64,
    pub platform_fee_pct: f64,
    pub referrer_share_pct: f64,
    /// Total fee the client owes the expert.
    pub expert_total_fee: f64,
    /// Platform cut of the expert fee, before tax.
    pub platform_fee_ht: f64,
    pub platform_vat: f64,
    /// Amount on the platform invoice, tax included.
    pub platform_fee_ttc: f64,
    pub referrer_commission: f64,
    /// What the expert keeps after the platform cut.
    pub expert_retained: f64,
    /// What the platform keeps after the referrer share.
    pub platform_retained: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    #[error("cannot compute commission on a non-positive amount")]
    NonPositiveAmount,
    /// The party record carries no rate for this step. Callers must surface
    /// the gap rather than fall back to a default percentage.
    #[error("missing {which} percentage on the party record")]
    MissingPercentage { which: &'static str },
}

/// Cascading fee split over an audited reimbursement.
///
/// The order is fixed: client fee to the expert, platform cut of that fee,
/// VAT on the platform cut, then the referrer share out of the platform's
/// pocket. Each step rounds to cents before feeding the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaterfallCommissionEngine;

impl WaterfallCommissionEngine {
    pub fn compute(inputs: CommissionInputs) -> Result<CommissionResult, CommissionError> {
        if !(inputs.base_amount > 0.0) {
            return Err(CommissionError::NonPositiveAmount);
        }

        let client_fee_pct = normalize_pct(
            inputs
                .client_fee_pct
                .ok_or(CommissionError::MissingPercentage { which: "client fee" })?,
        );
        let platform_fee_pct = normalize_pct(
            inputs
                .platform_fee_pct
                .ok_or(CommissionError::MissingPercentage {
                    which: "platform fee",
                })?,
        );
        // A dossier without a referral partner simply has a zero share.
        let referrer_share_pct = inputs.referrer_share_pct.map(normalize_pct).unwrap_or(0.0);

        let expert_total_fee = round_cents(inputs.base_amount * client_fee_pct);
        let platform_fee_ht = round_cents(expert_total_fee * platform_fee_pct);
        let platform_vat = round_cents(platform_fee_ht * VAT_RATE);
        let platform_fee_ttc = round_cents(platform_fee_ht + platform_vat);
        let referrer_commission = round_cents(platform_fee_ht * referrer_share_pct);
        let expert_retained = round_cents(expert_total_fee - platform_fee_ht);
        let platform_retained = round_cents(platform_fee_ht - referrer_commission);

        Ok(CommissionResult {
            base_amount: inputs.base_amount,
            client_fee_pct,
            platform_fee_pct,
            referrer_share_pct,
            expert_total_fee,
            platform_fee_ht,
            platform_vat,
            platform_fee_ttc,
            referrer_commission,
            expert_retained,
            platform_retained,
        })
    }
}

/// Rates are stored inconsistently across historical records: `0.30` and
/// `30` both mean thirty percent. Values above 1 are treated as whole
/// percentages.
pub fn normalize_pct(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

/// Round to cents, half away from zero.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
