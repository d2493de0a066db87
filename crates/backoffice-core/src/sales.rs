//! # Sales Aggregation
//!
//! Classifies raw POS transaction lines and rolls them up into daily
//! aggregate rows, then into period summaries.
//!
//! ## Classification Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  TransactionLine { price, quantity, vat_rate, payment_type, customer } │
//! │       │                                                                 │
//! │       │  net = price × quantity       vat = net × vat_rate (unrounded) │
//! │       ▼                                                                 │
//! │  customer ∈ {"Kitchen", "Coffee"} ?   (case-sensitive)                 │
//! │       │                                                                 │
//! │       ├── yes → Dimension::Transfer(department)   internal movement    │
//! │       │                                                                 │
//! │       └── no  → Dimension::Payment(lowercased payment type)  revenue   │
//! │                                                                         │
//! │  group by (date, dimension, VatRateCode)                               │
//! │       │  sum net, sum vat, gross = net + vat,                          │
//! │       │  count DISTINCT receipt ids                                    │
//! │       ▼                                                                 │
//! │  SalesAggregateRow  ──►  SalesSummary (voucher adjustment applied)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A row's count is distinct within its group only. A receipt with a 23%
//! line and a 13.5% line paid by cash and card lands in four rows, so the
//! summary's transaction count comes from [`SalesAggregate::receipts_by_day`]
//! instead of the rows.
//!
//! The same [`aggregate_lines`] function feeds both the pre-aggregated store
//! and real-time reporting, so the two agree to the last decimal digit.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::CoreResult;
use crate::money::Money;
use crate::vat_rate::{VatRateCode, VatRateTable};
use crate::{TRANSFER_DEPARTMENTS, VOUCHER_PAYMENT_TYPE};

// =============================================================================
// Payment Type
// =============================================================================

/// POS payment type, normalized to lowercase.
///
/// Types the back office has no special rule for are kept verbatim in
/// [`PaymentType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum PaymentType {
    Cash,
    /// Card terminal payment.
    Magcard,
    Cheque,
    /// Sale put on account.
    Debt,
    /// Account settled.
    DebtPaid,
    Free,
    /// Gift voucher redemption.
    Paperin,
    CashRefund,
    Other(String),
}

impl PaymentType {
    /// Parses a POS payment string, case-insensitively.
    pub fn from_pos(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "cash" => PaymentType::Cash,
            "magcard" => PaymentType::Magcard,
            "cheque" => PaymentType::Cheque,
            "debt" => PaymentType::Debt,
            "debtpaid" => PaymentType::DebtPaid,
            "free" => PaymentType::Free,
            "paperin" => PaymentType::Paperin,
            "cashrefund" => PaymentType::CashRefund,
            _ => PaymentType::Other(lowered),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentType::Cash => "cash",
            PaymentType::Magcard => "magcard",
            PaymentType::Cheque => "cheque",
            PaymentType::Debt => "debt",
            PaymentType::DebtPaid => "debtpaid",
            PaymentType::Free => "free",
            PaymentType::Paperin => VOUCHER_PAYMENT_TYPE,
            PaymentType::CashRefund => "cashrefund",
            PaymentType::Other(s) => s,
        }
    }

    /// True for the voucher pass-through type.
    pub fn is_voucher(&self) -> bool {
        matches!(self, PaymentType::Paperin)
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PaymentType {
    fn from(s: String) -> Self {
        PaymentType::from_pos(&s)
    }
}

impl From<PaymentType> for String {
    fn from(p: PaymentType) -> Self {
        p.as_str().to_string()
    }
}

// =============================================================================
// Department & Dimension
// =============================================================================

/// Department receiving an internal stock transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Department {
    Kitchen,
    Coffee,
}

impl Department {
    pub const ALL: [Department; 2] = [Department::Kitchen, Department::Coffee];

    /// Matches a POS customer name exactly. `"kitchen"` is a customer, not
    /// a department.
    pub fn from_customer(name: &str) -> Option<Self> {
        match name {
            n if n == TRANSFER_DEPARTMENTS[0] => Some(Department::Kitchen),
            n if n == TRANSFER_DEPARTMENTS[1] => Some(Department::Coffee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Kitchen => TRANSFER_DEPARTMENTS[0],
            Department::Coffee => TRANSFER_DEPARTMENTS[1],
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a line is grouped by besides date and rate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    /// Customer sale, grouped by payment type.
    Payment(PaymentType),
    /// Internal stock transfer, grouped by department.
    Transfer(Department),
}

impl Dimension {
    pub fn is_transfer(&self) -> bool {
        matches!(self, Dimension::Transfer(_))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Payment(p) => write!(f, "{}", p),
            Dimension::Transfer(d) => write!(f, "{}", d),
        }
    }
}

// =============================================================================
// Transaction Line
// =============================================================================

/// One POS ticket line joined with a payment and its tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub ticket_id: String,
    pub receipt_id: String,
    pub date: NaiveDate,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Raw tax rate from the POS (0.135 = 13.5%).
    pub vat_rate: Decimal,
    pub payment_type: String,
    pub customer_name: Option<String>,
}

impl TransactionLine {
    #[inline]
    pub fn net(&self) -> Money {
        Money::new(self.price * self.quantity)
    }

    #[inline]
    pub fn vat(&self) -> Money {
        self.net().calculate_vat(self.vat_rate)
    }

    /// Transfer if the customer is a department, otherwise a sale by payment type.
    pub fn dimension(&self) -> Dimension {
        match self.customer_name.as_deref().and_then(Department::from_customer) {
            Some(department) => Dimension::Transfer(department),
            None => Dimension::Payment(PaymentType::from_pos(&self.payment_type)),
        }
    }
}

// =============================================================================
// Aggregate Rows
// =============================================================================

/// Grouping key of an aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AggregateKey {
    pub date: NaiveDate,
    pub dimension: Dimension,
    pub vat_rate: VatRateCode,
}

/// One row per (date, dimension, rate code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesAggregateRow {
    pub date: NaiveDate,
    pub dimension: Dimension,
    pub vat_rate: VatRateCode,
    pub net: Money,
    pub vat: Money,
    pub gross: Money,
    pub transaction_count: i64,
}

impl SalesAggregateRow {
    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            date: self.date,
            dimension: self.dimension.clone(),
            vat_rate: self.vat_rate,
        }
    }

    /// `gross == net + vat` holds exactly.
    pub fn is_consistent(&self) -> bool {
        self.gross == self.net + self.vat
    }
}

#[derive(Default)]
struct GroupAccumulator {
    net: Money,
    vat: Money,
    receipts: BTreeSet<String>,
}

/// Groups transaction lines into aggregate rows.
///
/// Each line's VAT uses the rate stored on the line; the rate table only
/// maps that rate to its code as of the line's date.
///
/// ## Errors
/// `UnrecognizedRate` when a line carries a rate with no matching code.
pub fn aggregate_lines(
    lines: &[TransactionLine],
    rates: &VatRateTable,
) -> CoreResult<Vec<SalesAggregateRow>> {
    let mut groups: BTreeMap<AggregateKey, GroupAccumulator> = BTreeMap::new();

    for line in lines {
        let key = AggregateKey {
            date: line.date,
            dimension: line.dimension(),
            vat_rate: rates.code_for_rate(line.vat_rate, line.date)?,
        };
        let group = groups.entry(key).or_default();
        group.net += line.net();
        group.vat += line.vat();
        group.receipts.insert(line.receipt_id.clone());
    }

    Ok(groups
        .into_iter()
        .map(|(key, group)| SalesAggregateRow {
            date: key.date,
            dimension: key.dimension,
            vat_rate: key.vat_rate,
            net: group.net,
            vat: group.vat,
            gross: group.net + group.vat,
            transaction_count: group.receipts.len() as i64,
        })
        .collect())
}

/// Distinct customer-sale receipts per day. Transfer lines are not sales.
pub fn count_receipts(lines: &[TransactionLine]) -> BTreeMap<NaiveDate, i64> {
    let mut days: BTreeMap<NaiveDate, BTreeSet<&str>> = BTreeMap::new();
    for line in lines.iter().filter(|l| !l.dimension().is_transfer()) {
        days.entry(line.date).or_default().insert(&line.receipt_id);
    }

    days.into_iter()
        .map(|(day, receipts)| (day, receipts.len() as i64))
        .collect()
}

/// Aggregate rows of a range together with its receipt counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesAggregate {
    pub rows: Vec<SalesAggregateRow>,
    /// Days without sales are absent.
    pub receipts_by_day: BTreeMap<NaiveDate, i64>,
}

impl SalesAggregate {
    pub fn from_lines(lines: &[TransactionLine], rates: &VatRateTable) -> CoreResult<Self> {
        Ok(SalesAggregate {
            rows: aggregate_lines(lines, rates)?,
            receipts_by_day: count_receipts(lines),
        })
    }

    /// Receipts are dated, so per-day counts add up across a range.
    pub fn receipt_count(&self) -> i64 {
        self.receipts_by_day.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Summed figures of a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub net: Money,
    pub vat: Money,
    pub gross: Money,
    pub transaction_count: i64,
}

impl Totals {
    pub fn add_row(&mut self, row: &SalesAggregateRow) {
        self.net += row.net;
        self.vat += row.vat;
        self.gross += row.gross;
        self.transaction_count += row.transaction_count;
    }
}

/// Sums rows over dates, per (dimension, rate code).
pub fn totals_by_group(rows: &[SalesAggregateRow]) -> BTreeMap<(Dimension, VatRateCode), Totals> {
    let mut out: BTreeMap<(Dimension, VatRateCode), Totals> = BTreeMap::new();
    for row in rows {
        out.entry((row.dimension.clone(), row.vat_rate))
            .or_default()
            .add_row(row);
    }
    out
}

// =============================================================================
// Period Summary
// =============================================================================

/// Period totals shared by profit & loss, the VAT dashboard and ROS figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesSummary {
    /// Net of every customer sale, vouchers included.
    pub total_net: Money,
    pub vat_on_sales: Money,
    pub gross_sales: Money,
    /// Gross of `paperin` rows.
    pub voucher_gross: Money,
    /// `total_net - voucher_gross`.
    pub total_revenue: Money,
    /// `total_revenue + vat_on_sales`.
    pub gross_revenue: Money,
    pub by_payment_type: BTreeMap<PaymentType, Totals>,
    /// Customer sales per rate; the ZERO bucket carries the voucher deduction.
    pub by_rate: BTreeMap<VatRateCode, Totals>,
    pub transfers_by_department: BTreeMap<Department, Totals>,
    pub total_transfers: Money,
    pub transfer_vat: Money,
    pub transaction_count: i64,
    pub avg_transaction: Money,
}

impl SalesSummary {
    /// Builds the summary. An empty aggregate yields all-zero figures.
    pub fn from_aggregate(aggregate: &SalesAggregate) -> Self {
        let mut summary = SalesSummary {
            transaction_count: aggregate.receipt_count(),
            ..SalesSummary::default()
        };

        for row in &aggregate.rows {
            match &row.dimension {
                Dimension::Payment(payment) => {
                    summary.total_net += row.net;
                    summary.vat_on_sales += row.vat;
                    summary.gross_sales += row.gross;
                    if payment.is_voucher() {
                        summary.voucher_gross += row.gross;
                    }
                    summary
                        .by_payment_type
                        .entry(payment.clone())
                        .or_default()
                        .add_row(row);
                    summary.by_rate.entry(row.vat_rate).or_default().add_row(row);
                }
                Dimension::Transfer(department) => {
                    summary.total_transfers += row.net;
                    summary.transfer_vat += row.vat;
                    summary
                        .transfers_by_department
                        .entry(*department)
                        .or_default()
                        .add_row(row);
                }
            }
        }

        summary.total_revenue = summary.total_net - summary.voucher_gross;
        summary.gross_revenue = summary.total_revenue + summary.vat_on_sales;

        if !summary.voucher_gross.is_zero() {
            let zero = summary.by_rate.entry(VatRateCode::Zero).or_default();
            zero.net -= summary.voucher_gross;
            zero.gross -= summary.voucher_gross;
        }

        if summary.transaction_count > 0 {
            summary.avg_transaction = Money::new(
                summary.total_revenue.amount() / Decimal::from(summary.transaction_count),
            );
        }

        summary
    }

    /// Net sales of one payment type, zero when absent.
    pub fn payment_net(&self, payment: &PaymentType) -> Money {
        self.by_payment_type
            .get(payment)
            .map(|t| t.net)
            .unwrap_or(Money::ZERO)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
