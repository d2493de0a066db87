//! # Cash Reconciliation
//!
//! Arithmetic and state for the per-till, per-day cash count.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  (date, till) never viewed                                              │
//! │       │  no row exists: "uninitialized"                                │
//! │       ▼                                                                 │
//! │  open()  ──►  CashReconciliation::draft(..)   id = None, NOT persisted │
//! │       │       floats pre-filled from the latest earlier reconciliation │
//! │       ▼                                                                 │
//! │  save(input)  ──►  validate  ──►  compute_totals  ──►  one transaction │
//! │       │             (counts ≥ 0,      │               upsert header,   │
//! │       │              amounts ≥ 0)     │               replace payments,│
//! │       ▼                               ▼               append note      │
//! │  saved (id = Some)            variance = counted − (pos cash − paid)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Positive variance means more cash was counted than expected.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::sales::PaymentType;
use crate::validation::{
    validate_count, validate_non_negative, validate_optional, validate_required,
    ValidationResult,
};

/// Longest note accepted on a reconciliation.
pub const MAX_NOTE_LENGTH: usize = 2000;

// =============================================================================
// Denominations
// =============================================================================

/// Euro notes and coins counted in a till.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Denomination {
    Fifty,
    Twenty,
    Ten,
    Five,
    Two,
    One,
    FiftyCent,
    TwentyCent,
    TenCent,
}

impl Denomination {
    pub const ALL: [Denomination; 9] = [
        Denomination::Fifty,
        Denomination::Twenty,
        Denomination::Ten,
        Denomination::Five,
        Denomination::Two,
        Denomination::One,
        Denomination::FiftyCent,
        Denomination::TwentyCent,
        Denomination::TenCent,
    ];

    pub fn face_value(&self) -> Money {
        match self {
            Denomination::Fifty => Money::from_euros(50),
            Denomination::Twenty => Money::from_euros(20),
            Denomination::Ten => Money::from_euros(10),
            Denomination::Five => Money::from_euros(5),
            Denomination::Two => Money::from_euros(2),
            Denomination::One => Money::from_euros(1),
            Denomination::FiftyCent => Money::from_cents(50),
            Denomination::TwentyCent => Money::from_cents(20),
            Denomination::TenCent => Money::from_cents(10),
        }
    }

    /// Column / field name of the count.
    pub fn field(&self) -> &'static str {
        match self {
            Denomination::Fifty => "cash_50",
            Denomination::Twenty => "cash_20",
            Denomination::Ten => "cash_10",
            Denomination::Five => "cash_5",
            Denomination::Two => "cash_2",
            Denomination::One => "cash_1",
            Denomination::FiftyCent => "cash_50c",
            Denomination::TwentyCent => "cash_20c",
            Denomination::TenCent => "cash_10c",
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(
            self,
            Denomination::Fifty | Denomination::Twenty | Denomination::Ten | Denomination::Five
        )
    }
}

/// Number of units counted per denomination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationCounts {
    pub cash_50: i64,
    pub cash_20: i64,
    pub cash_10: i64,
    pub cash_5: i64,
    pub cash_2: i64,
    pub cash_1: i64,
    pub cash_50c: i64,
    pub cash_20c: i64,
    pub cash_10c: i64,
}

impl DenominationCounts {
    pub fn count(&self, denomination: Denomination) -> i64 {
        match denomination {
            Denomination::Fifty => self.cash_50,
            Denomination::Twenty => self.cash_20,
            Denomination::Ten => self.cash_10,
            Denomination::Five => self.cash_5,
            Denomination::Two => self.cash_2,
            Denomination::One => self.cash_1,
            Denomination::FiftyCent => self.cash_50c,
            Denomination::TwentyCent => self.cash_20c,
            Denomination::TenCent => self.cash_10c,
        }
    }

    fn sum_where(&self, keep: impl Fn(&Denomination) -> bool) -> Money {
        Denomination::ALL
            .iter()
            .filter(|d| keep(*d))
            .map(|d| d.face_value() * self.count(*d))
            .sum()
    }

    /// Σ count × face value.
    pub fn total(&self) -> Money {
        self.sum_where(|_| true)
    }

    pub fn notes_total(&self) -> Money {
        self.sum_where(Denomination::is_note)
    }

    pub fn coins_total(&self) -> Money {
        self.sum_where(|d| !d.is_note())
    }

    pub fn validate(&self) -> ValidationResult<()> {
        for denomination in Denomination::ALL {
            validate_count(denomination.field(), self.count(denomination))?;
        }
        Ok(())
    }
}

// =============================================================================
// Payment Figures
// =============================================================================

/// Payment-type figures recorded on the reconciliation form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TillPaymentTotals {
    pub card: Money,
    pub cash_back: Money,
    pub cheque: Money,
    pub debt: Money,
    pub debt_paid_cash: Money,
    pub debt_paid_cheque: Money,
    pub debt_paid_card: Money,
    pub free: Money,
    pub voucher_used: Money,
    pub money_added: Money,
}

impl TillPaymentTotals {
    fn fields(&self) -> [(&'static str, Money); 10] {
        [
            ("card", self.card),
            ("cash_back", self.cash_back),
            ("cheque", self.cheque),
            ("debt", self.debt),
            ("debt_paid_cash", self.debt_paid_cash),
            ("debt_paid_cheque", self.debt_paid_cheque),
            ("debt_paid_card", self.debt_paid_card),
            ("free", self.free),
            ("voucher_used", self.voucher_used),
            ("money_added", self.money_added),
        ]
    }

    pub fn validate(&self) -> ValidationResult<()> {
        for (field, amount) in self.fields() {
            validate_non_negative(field, amount)?;
        }
        Ok(())
    }
}

/// Totals reported by the POS for one closed-cash session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosTillTotals {
    pub cash: Money,
    pub card: Money,
    pub debt: Money,
    pub free: Money,
    pub cheque: Money,
}

impl PosTillTotals {
    /// Folds per-payment-type sums into till totals. `magcard` counts as card;
    /// types with no till column are ignored.
    pub fn from_payment_sums<'a>(sums: impl IntoIterator<Item = (&'a str, Money)>) -> Self {
        let mut totals = PosTillTotals::default();
        for (payment, amount) in sums {
            match PaymentType::from_pos(payment) {
                PaymentType::Cash => totals.cash += amount,
                PaymentType::Magcard => totals.card += amount,
                PaymentType::Debt => totals.debt += amount,
                PaymentType::Free => totals.free += amount,
                PaymentType::Cheque => totals.cheque += amount,
                _ => {}
            }
        }
        totals
    }
}

// =============================================================================
// Supplier Payments
// =============================================================================

/// A supplier cash payment as entered on the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPaymentInput {
    pub supplier_id: Option<String>,
    pub payee_name: String,
    pub amount: Money,
    pub description: Option<String>,
}

/// A supplier cash payment paid out of the till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPayment {
    pub supplier_id: Option<String>,
    pub payee_name: String,
    pub amount: Money,
    /// Position in the submitted list; gaps appear where zero rows were dropped.
    pub sequence: i64,
    pub description: Option<String>,
}

/// Drops zero-amount rows and numbers the rest by input position.
pub fn normalize_payments(inputs: &[SupplierPaymentInput]) -> Vec<SupplierPayment> {
    inputs
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.amount.is_zero())
        .map(|(index, p)| SupplierPayment {
            supplier_id: p.supplier_id.clone(),
            payee_name: p.payee_name.trim().to_string(),
            amount: p.amount,
            sequence: index as i64,
            description: p.description.clone(),
        })
        .collect()
}

// =============================================================================
// Totals
// =============================================================================

/// Floats carried from one reconciliation to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatCarryForward {
    pub note_float: Money,
    pub coin_float: Money,
}

/// Derived figures of a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationTotals {
    pub total_cash_counted: Money,
    pub pos_cash_total: Money,
    pub pos_card_total: Money,
    pub supplier_payments_total: Money,
    /// `pos_cash_total - supplier_payments_total`.
    pub expected_cash: Money,
    pub variance: Money,
}

/// Computes counted cash and variance.
///
/// ```rust
/// use backoffice_core::money::Money;
/// use backoffice_core::reconciliation::*;
///
/// let counts = DenominationCounts { cash_50: 2, cash_20: 1, ..Default::default() };
/// let floats = FloatCarryForward { note_float: Money::ZERO, coin_float: Money::from_euros(5) };
/// let pos = PosTillTotals { cash: Money::from_euros(120), ..Default::default() };
///
/// let totals = compute_totals(&counts, floats, &pos, &[]);
/// assert_eq!(totals.total_cash_counted, Money::from_euros(125));
/// assert_eq!(totals.variance, Money::from_euros(5));
/// ```
pub fn compute_totals(
    counts: &DenominationCounts,
    floats: FloatCarryForward,
    pos: &PosTillTotals,
    payments: &[SupplierPayment],
) -> ReconciliationTotals {
    let total_cash_counted = counts.total() + floats.note_float + floats.coin_float;
    let supplier_payments_total: Money = payments.iter().map(|p| p.amount).sum();
    let expected_cash = pos.cash - supplier_payments_total;

    ReconciliationTotals {
        total_cash_counted,
        pos_cash_total: pos.cash,
        pos_card_total: pos.card,
        supplier_payments_total,
        expected_cash,
        variance: total_cash_counted - expected_cash,
    }
}

// =============================================================================
// Save Input
// =============================================================================

/// Everything the user submits when saving a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationInput {
    pub counts: DenominationCounts,
    pub floats: FloatCarryForward,
    pub payment_totals: TillPaymentTotals,
    pub supplier_payments: Vec<SupplierPaymentInput>,
    /// Appended to the notes log when present.
    pub note: Option<String>,
    pub user: String,
}

impl ReconciliationInput {
    /// Rejects negative counts and amounts, and unnamed payees.
    pub fn validate(&self) -> ValidationResult<()> {
        self.counts.validate()?;
        validate_non_negative("note_float", self.floats.note_float)?;
        validate_non_negative("coin_float", self.floats.coin_float)?;
        self.payment_totals.validate()?;

        for payment in &self.supplier_payments {
            validate_non_negative("supplier_payment.amount", payment.amount)?;
            if !payment.amount.is_zero() {
                validate_required("supplier_payment.payee_name", &payment.payee_name, 255)?;
            }
        }

        validate_optional("note", self.note.as_deref(), MAX_NOTE_LENGTH)?;
        validate_required("user", &self.user, 255)?;
        Ok(())
    }
}

// =============================================================================
// Reconciliation Record
// =============================================================================

/// One till's reconciliation for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashReconciliation {
    /// `None` until the first save.
    pub id: Option<String>,
    pub date: NaiveDate,
    pub till_id: i64,
    pub till_name: String,
    /// POS closed-cash session the POS figures came from.
    pub closed_cash_id: Option<String>,
    pub counts: DenominationCounts,
    pub floats: FloatCarryForward,
    pub payment_totals: TillPaymentTotals,
    pub total_cash_counted: Money,
    pub pos_cash_total: Money,
    pub pos_card_total: Money,
    pub variance: Money,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CashReconciliation {
    /// Zero-valued, unsaved reconciliation with carried-forward floats.
    pub fn draft(
        date: NaiveDate,
        till_id: i64,
        till_name: impl Into<String>,
        floats: FloatCarryForward,
    ) -> Self {
        CashReconciliation {
            id: None,
            date,
            till_id,
            till_name: till_name.into(),
            closed_cash_id: None,
            counts: DenominationCounts::default(),
            floats,
            payment_totals: TillPaymentTotals::default(),
            total_cash_counted: floats.note_float + floats.coin_float,
            pos_cash_total: Money::ZERO,
            pos_card_total: Money::ZERO,
            variance: Money::ZERO,
            created_by: None,
            updated_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Copies the submitted figures onto the record and recomputes totals.
    pub fn apply(
        &mut self,
        input: &ReconciliationInput,
        pos: &PosTillTotals,
        payments: &[SupplierPayment],
    ) -> ReconciliationTotals {
        let totals = compute_totals(&input.counts, input.floats, pos, payments);

        self.counts = input.counts;
        self.floats = input.floats;
        self.payment_totals = input.payment_totals;
        self.total_cash_counted = totals.total_cash_counted;
        self.pos_cash_total = totals.pos_cash_total;
        self.pos_card_total = totals.pos_card_total;
        self.variance = totals.variance;

        if self.created_by.is_none() {
            self.created_by = Some(input.user.clone());
        }
        self.updated_by = Some(input.user.clone());

        totals
    }

    pub fn carry_forward(&self) -> FloatCarryForward {
        self.floats
    }
}

/// Entry in a reconciliation's append-only notes log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationNote {
    pub id: i64,
    pub reconciliation_id: String,
    pub message: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
