use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::model::EmployeeType;
use crate::replay::{Operation, WalletRow};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOperation { line: usize, op: String },

    #[error("line {line}: {op} missing amount")]
    MissingAmount { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    actor: Option<String>,
    user: Option<String>,
    role: Option<String>,
    employee_type: Option<String>,
    hod: Option<String>,
    policy: Option<String>,
    amount: Option<String>,
    reference: Option<String>,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: String,
    role: String,
    currency: String,
    balance: String,
    earned: String,
    redeemed: String,
    pending: String,
}

/// Read scripted operations from a csv file.
///
/// Columns: `op,actor,user,role,employee_type,hod,policy,amount,reference,note`.
/// `reference` names the request or redemption an operation creates or acts
/// on; for `user` and `assign` it lists initiator handles separated by `;`.
pub fn read_operations(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Operation, CsvError> {
    let op = row.op.to_ascii_lowercase();
    let required = |value: Option<String>, field: &'static str| {
        value.ok_or_else(|| CsvError::MissingField {
            line,
            op: op.clone(),
            field,
        })
    };
    let amount = |value: Option<String>| -> Result<Amount, CsvError> {
        let raw = value.ok_or_else(|| CsvError::MissingAmount {
            line,
            op: op.clone(),
        })?;
        raw.parse().map_err(|_| CsvError::InvalidField {
            line,
            field: "amount",
            value: raw,
        })
    };

    match op.as_str() {
        "admin" => Ok(Operation::Admin {
            handle: required(row.user, "user")?,
        }),
        "user" => {
            let raw_role = required(row.role, "role")?;
            let role = raw_role.parse().map_err(|_| CsvError::InvalidField {
                line,
                field: "role",
                value: raw_role,
            })?;
            let employee_type = match row.employee_type {
                Some(raw) => raw.parse().map_err(|_| CsvError::InvalidField {
                    line,
                    field: "employee_type",
                    value: raw,
                })?,
                None => EmployeeType::default(),
            };
            Ok(Operation::User {
                actor: required(row.actor, "actor")?,
                handle: required(row.user, "user")?,
                role,
                employee_type,
                hod: row.hod,
                initiators: handles(row.reference),
            })
        }
        "policy" => Ok(Operation::Policy {
            actor: required(row.actor, "actor")?,
            handle: required(row.policy, "policy")?,
            description: row.note,
        }),
        "assign" => Ok(Operation::Assign {
            actor: required(row.actor, "actor")?,
            user: required(row.user, "user")?,
            policy: required(row.policy, "policy")?,
            initiators: handles(row.reference),
        }),
        "credit" => Ok(Operation::Credit {
            amount: amount(row.amount)?,
            actor: required(row.actor, "actor")?,
            handle: required(row.reference, "reference")?,
            user: required(row.user, "user")?,
            policy: row.policy,
            note: row.note,
        }),
        "sign" => Ok(Operation::Sign {
            actor: required(row.actor, "actor")?,
            request: required(row.reference, "reference")?,
        }),
        "signed" => Ok(Operation::Signed {
            user: required(row.user, "user")?,
        }),
        "decline" => Ok(Operation::Decline {
            actor: required(row.actor, "actor")?,
            request: required(row.reference, "reference")?,
            reason: row.note.unwrap_or_default(),
        }),
        "approve" => Ok(Operation::Approve {
            actor: required(row.actor, "actor")?,
            request: required(row.reference, "reference")?,
        }),
        "reject" => Ok(Operation::Reject {
            actor: required(row.actor, "actor")?,
            request: required(row.reference, "reference")?,
            reason: row.note.unwrap_or_default(),
        }),
        "redeem" => Ok(Operation::Redeem {
            amount: amount(row.amount)?,
            actor: required(row.actor, "actor")?,
            handle: required(row.reference, "reference")?,
            payment_details: required(row.note, "note")?,
        }),
        "process" => Ok(Operation::Process {
            actor: required(row.actor, "actor")?,
            redemption: required(row.reference, "reference")?,
            reference: required(row.note, "note")?,
        }),
        _ => Err(CsvError::UnrecognizedOperation { line, op: row.op }),
    }
}

fn handles(value: Option<String>) -> Vec<String> {
    value
        .iter()
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Write wallet rows in csv format
pub fn write_wallets(
    writer: impl io::Write,
    rows: impl IntoIterator<Item = WalletRow>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for row in rows {
        writer.serialize(OutputRow {
            user: row.user,
            role: row.role.to_string(),
            currency: row.currency.to_string(),
            balance: row.balance.to_string(),
            earned: row.earned.to_string(),
            redeemed: row.redeemed.to_string(),
            pending: row.pending.to_string(),
        })?;
    }

    writer.flush().map_err(|e| CsvError::Write(e.into()))
}
