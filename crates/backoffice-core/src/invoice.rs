//! # Invoices and VAT Lines
//!
//! Purchase invoices broken down into the four VAT buckets.
//!
//! ## Bucket Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  VAT lines                         Invoice buckets                      │
//! │  ─────────────────────────         ──────────────────────────────────   │
//! │  #1 STANDARD  net 100.00  ──┐      standard_net 150.00  vat 34.50      │
//! │  #2 STANDARD  net  50.00  ──┘      reduced_net   20.00  vat  2.70      │
//! │  #3 REDUCED   net  20.00  ───────► second_reduced  0.00       0.00      │
//! │                                    zero_net       0.00       0.00      │
//! │                                                                         │
//! │  subtotal   = Σ bucket net   = 170.00                                   │
//! │  vat_amount = Σ bucket vat   =  37.20                                   │
//! │  total      = subtotal + vat = 207.20                                   │
//! │                                                                         │
//! │  Totals are derived from buckets, never typed in independently.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{validate_optional, validate_required, ValidationResult};
use crate::vat_rate::{validate_rate, VatRateCode, VatRateTable};

// =============================================================================
// Payment Status
// =============================================================================

/// Payment state of an invoice. Transitions are free-form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "paid" => Ok(PaymentStatus::Paid),
            "overdue" => Ok(PaymentStatus::Overdue),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(ValidationError::InvalidFormat {
                field: "payment_status".to_string(),
                reason: format!("unknown status '{}'", other),
            }),
        }
    }
}

// =============================================================================
// VAT Buckets
// =============================================================================

/// Net and VAT per rate code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatBuckets {
    pub standard_net: Money,
    pub standard_vat: Money,
    pub reduced_net: Money,
    pub reduced_vat: Money,
    pub second_reduced_net: Money,
    pub second_reduced_vat: Money,
    pub zero_net: Money,
    pub zero_vat: Money,
}

impl VatBuckets {
    /// `(net, vat)` of one bucket.
    pub fn bucket(&self, code: VatRateCode) -> (Money, Money) {
        match code {
            VatRateCode::Standard => (self.standard_net, self.standard_vat),
            VatRateCode::Reduced => (self.reduced_net, self.reduced_vat),
            VatRateCode::SecondReduced => (self.second_reduced_net, self.second_reduced_vat),
            VatRateCode::Zero => (self.zero_net, self.zero_vat),
        }
    }

    pub fn add(&mut self, code: VatRateCode, net: Money, vat: Money) {
        let (n, v) = match code {
            VatRateCode::Standard => (&mut self.standard_net, &mut self.standard_vat),
            VatRateCode::Reduced => (&mut self.reduced_net, &mut self.reduced_vat),
            VatRateCode::SecondReduced => {
                (&mut self.second_reduced_net, &mut self.second_reduced_vat)
            }
            VatRateCode::Zero => (&mut self.zero_net, &mut self.zero_vat),
        };
        *n += net;
        *v += vat;
    }

    pub fn subtotal(&self) -> Money {
        VatRateCode::ALL.iter().map(|c| self.bucket(*c).0).sum()
    }

    pub fn vat_total(&self) -> Money {
        VatRateCode::ALL.iter().map(|c| self.bucket(*c).1).sum()
    }

    pub fn total(&self) -> Money {
        self.subtotal() + self.vat_total()
    }
}

impl AddAssign for VatBuckets {
    fn add_assign(&mut self, other: Self) {
        for code in VatRateCode::ALL {
            let (net, vat) = other.bucket(code);
            self.add(code, net, vat);
        }
    }
}

// =============================================================================
// VAT Lines
// =============================================================================

/// A VAT line as entered or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineInput {
    pub vat_category: VatRateCode,
    pub net: Money,
    /// Explicit rate; the category's rate as of the invoice date otherwise.
    pub vat_rate: Option<Decimal>,
}

/// A stored VAT line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_number: i64,
    pub vat_category: VatRateCode,
    pub net: Money,
    pub vat_rate: Decimal,
    /// `round2(net × vat_rate)`.
    pub vat: Money,
    pub gross: Money,
}

impl InvoiceLine {
    pub fn compute(
        line_number: i64,
        input: &InvoiceLineInput,
        rates: &VatRateTable,
        invoice_date: NaiveDate,
    ) -> CoreResult<Self> {
        let vat_rate = match input.vat_rate {
            Some(rate) => {
                validate_rate(rate)?;
                rate
            }
            None => rates.rate_for(input.vat_category, invoice_date)?,
        };
        let vat = input.net.calculate_vat(vat_rate).round2();

        Ok(InvoiceLine {
            line_number,
            vat_category: input.vat_category,
            net: input.net,
            vat_rate,
            vat,
            gross: (input.net + vat).round2(),
        })
    }
}

/// Computes every line, numbering from 1.
pub fn build_lines(
    inputs: &[InvoiceLineInput],
    rates: &VatRateTable,
    invoice_date: NaiveDate,
) -> CoreResult<Vec<InvoiceLine>> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, input)| InvoiceLine::compute(i as i64 + 1, input, rates, invoice_date))
        .collect()
}

/// Sums lines into their category buckets.
pub fn classify_into_buckets(lines: &[InvoiceLine]) -> VatBuckets {
    let mut buckets = VatBuckets::default();
    for line in lines {
        buckets.add(line.vat_category, line.net, line.vat);
    }
    buckets
}

// =============================================================================
// Invoice
// =============================================================================

/// A purchase invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub supplier_id: String,
    pub supplier_name: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub buckets: VatBuckets,
    pub subtotal: Money,
    pub vat_amount: Money,
    pub total_amount: Money,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub expense_category: Option<String>,
    pub notes: Option<String>,
    /// Id in the external accounting system; `None` for manual invoices.
    pub external_id: Option<String>,
    pub vat_return_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Replaces the buckets and derives the three totals from them.
    pub fn apply_buckets(&mut self, buckets: VatBuckets) {
        self.buckets = buckets;
        self.subtotal = buckets.subtotal();
        self.vat_amount = buckets.vat_total();
        self.total_amount = self.subtotal + self.vat_amount;
    }

    /// Checks the stored totals against the buckets within 0.01.
    pub fn check_totals(&self) -> CoreResult<()> {
        let checks = [
            ("subtotal", self.subtotal, self.buckets.subtotal()),
            ("vat_amount", self.vat_amount, self.buckets.vat_total()),
            ("total_amount", self.total_amount, self.subtotal + self.vat_amount),
        ];
        for (field, stored, expected) in checks {
            if !stored.approx_eq(expected) {
                return Err(CoreError::TotalsMismatch {
                    entity: format!("Invoice {}", self.invoice_number),
                    detail: format!("{} is {} but should be {}", field, stored, expected),
                });
            }
        }
        Ok(())
    }

    pub fn is_assigned(&self) -> bool {
        self.vat_return_id.is_some()
    }

    /// Not paid or cancelled, and past its due date.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        if matches!(
            self.payment_status,
            PaymentStatus::Paid | PaymentStatus::Cancelled
        ) {
            return false;
        }
        self.due_date.map_or(false, |due| due < today)
    }

    /// Status `refresh_overdue` moves this invoice to, if any.
    pub fn refreshed_status(&self, today: NaiveDate) -> Option<PaymentStatus> {
        (self.payment_status == PaymentStatus::Pending && self.is_overdue(today))
            .then_some(PaymentStatus::Overdue)
    }

    pub fn can_be_assigned_to_vat_return(&self) -> bool {
        !self.is_assigned()
            && matches!(
                self.payment_status,
                PaymentStatus::Pending | PaymentStatus::Paid | PaymentStatus::Overdue
            )
    }

    /// Changes payment status. Moving to `paid` needs a payment date.
    pub fn set_payment_status(
        &mut self,
        status: PaymentStatus,
        payment_date: Option<NaiveDate>,
    ) -> ValidationResult<()> {
        let payment_date = payment_date.or(self.payment_date);
        if status == PaymentStatus::Paid && payment_date.is_none() {
            return Err(ValidationError::RequiredWhen {
                field: "payment_date".to_string(),
                condition: "status is paid".to_string(),
            });
        }
        self.payment_status = status;
        self.payment_date = payment_date;
        Ok(())
    }
}

/// Fields for creating an invoice by either path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub supplier_name: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub lines: Vec<InvoiceLineInput>,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub expense_category: Option<String>,
    pub notes: Option<String>,
    pub external_id: Option<String>,
}

impl NewInvoice {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_required("invoice_number", &self.invoice_number, 100)?;
        validate_required("supplier_name", &self.supplier_name, 255)?;
        validate_optional("payment_method", self.payment_method.as_deref(), 50)?;
        validate_optional("payment_reference", self.payment_reference.as_deref(), 100)?;
        validate_optional("expense_category", self.expense_category.as_deref(), 100)?;
        validate_optional("notes", self.notes.as_deref(), 2000)?;

        if self.lines.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            });
        }
        if let Some(due) = self.due_date {
            if due < self.invoice_date {
                return Err(ValidationError::InvalidDateRange {
                    start: self.invoice_date,
                    end: due,
                });
            }
        }
        if self.payment_status == PaymentStatus::Paid && self.payment_date.is_none() {
            return Err(ValidationError::RequiredWhen {
                field: "payment_date".to_string(),
                condition: "status is paid".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Cost Summary
// =============================================================================

/// Invoice costs in a date range, by payment status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCostSummary {
    pub invoice_count: i64,
    pub total_net: Money,
    pub total_vat: Money,
    pub total_gross: Money,
    pub paid_count: i64,
    pub paid_net: Money,
    pub paid_vat: Money,
    pub pending_count: i64,
    pub pending_net: Money,
    pub overdue_count: i64,
    pub overdue_net: Money,
}

impl InvoiceCostSummary {
    /// Cancelled invoices are not costs and are skipped.
    pub fn from_invoices<'a>(invoices: impl IntoIterator<Item = &'a Invoice>) -> Self {
        let mut summary = InvoiceCostSummary::default();
        for invoice in invoices {
            match invoice.payment_status {
                PaymentStatus::Cancelled => continue,
                PaymentStatus::Paid => {
                    summary.paid_count += 1;
                    summary.paid_net += invoice.subtotal;
                    summary.paid_vat += invoice.vat_amount;
                }
                PaymentStatus::Pending | PaymentStatus::Partial => {
                    summary.pending_count += 1;
                    summary.pending_net += invoice.subtotal;
                }
                PaymentStatus::Overdue => {
                    summary.overdue_count += 1;
                    summary.overdue_net += invoice.subtotal;
                }
            }
            summary.invoice_count += 1;
            summary.total_net += invoice.subtotal;
            summary.total_vat += invoice.vat_amount;
            summary.total_gross += invoice.total_amount;
        }
        summary
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
