//! Currency classification and display.
//!
//! Amounts carry no currency of their own; the currency is derived from the
//! beneficiary's employee type wherever an amount is displayed or aggregated.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Amount;
use crate::model::EmployeeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[default]
    #[serde(rename = "INR")]
    Inr,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Inr => "INR",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Inr => "₹",
        }
    }

    /// `*_usa` employee types are paid in USD, everything else in INR.
    pub fn for_employee_type(employee_type: EmployeeType) -> Self {
        if employee_type.is_usa() {
            Currency::Usd
        } else {
            Currency::Inr
        }
    }

    /// Map a free-form currency label (`usd`, `$`, `rupees`, ...) onto a
    /// currency, falling back when the label is unknown.
    pub fn normalize(value: &str, fallback: Currency) -> Currency {
        let trimmed = value.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "USD" => return Currency::Usd,
            "INR" => return Currency::Inr,
            _ => {}
        }
        match trimmed.to_lowercase().as_str() {
            "$" | "usd" | "dollar" | "dollars" | "us dollar" => Currency::Usd,
            "inr" | "rs" | "rupee" | "rupees" | "indian rupee" | "₹" => Currency::Inr,
            _ => fallback,
        }
    }

    /// Format with the currency symbol, two decimals and the locale's digit
    /// grouping (en-US thousands, en-IN lakh/crore).
    pub fn format(self, amount: Amount) -> String {
        let cents = amount.to_cents();
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        let whole = (abs / 100).to_string();
        let frac = abs % 100;
        let grouped = match self {
            Currency::Usd => group_thousands(&whole),
            Currency::Inr => group_indian(&whole),
        };
        format!("{sign}{}{grouped}.{frac:02}", self.symbol())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut out = String::with_capacity(digits.len() + digits.len() / 2);
    for (i, ch) in head.chars().enumerate() {
        if i > 0 && (head.len() - i) % 2 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.push(',');
    out.push_str(tail);
    out
}
