//! # BAI2
//!
//! Comma-delimited records terminated by `/`:
//!
//! ```text
//! 01 file header     02 group header     03 account identifier + summaries
//! 16 transaction     88 continuation     49 account trailer
//! 98 group trailer   99 file trailer
//! ```
//!
//! Amounts carry two implied decimals. Detail type codes 100-399 are
//! credits and 400-699 debits; other codes carry no movement and are
//! skipped with evidence. Summary code `010` is the opening ledger and
//! `015` the closing ledger balance.

use cashlock_core::{AccountId, BankCategory, Currency, Direction, StatementFormat};

use crate::error::IngestError;
use crate::pipeline::{
    parse_yymmdd, DeclaredTotals, ParsedFile, RawAccount, RawBalance, RawEntry, SkippedRecord,
};

const FORMAT: StatementFormat = StatementFormat::Bai2;

/// Currency assumed when neither the group nor the account declares one.
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug)]
struct Record {
    code: String,
    fields: Vec<String>,
    line: usize,
    /// Physical lines, counting `88` continuations.
    physical: u64,
}

/// Assemble logical records, folding `88` continuations into their parent.
fn records(text: &str) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let body = line.strip_suffix('/').unwrap_or(line);
        let mut parts: Vec<String> = body.split(',').map(|s| s.trim().to_string()).collect();
        let code = parts.first().cloned().unwrap_or_default();
        if code == "88" {
            if let Some(prev) = out.last_mut() {
                let cont = parts.split_off(1);
                prev.physical += 1;
                if prev.code == "16" {
                    // Continuation of free text.
                    let extra = cont.join(",");
                    let has_text = prev.fields.len() > 1;
                    match prev.fields.last_mut() {
                        Some(text) if has_text => {
                            if !text.is_empty() {
                                text.push(' ');
                            }
                            text.push_str(&extra);
                        }
                        _ => prev.fields.push(extra),
                    }
                } else {
                    prev.fields.extend(cont);
                }
                continue;
            }
        }
        out.push(Record {
            code,
            fields: parts,
            line: idx + 1,
            physical: 1,
        });
    }
    out
}

/// Structural check: header and trailer present, groups and accounts
/// balanced.
pub(crate) fn validate(text: &str) -> Result<(), IngestError> {
    let recs = records(text);
    let Some(first) = recs.first() else {
        return Err(IngestError::header(FORMAT, "no records"));
    };
    if first.code != "01" {
        return Err(IngestError::header(
            FORMAT,
            format!("line {}: expected 01 file header, found {:?}", first.line, first.code),
        ));
    }
    if first.fields.get(5).map_or(true, |f| f.is_empty()) {
        return Err(IngestError::header(FORMAT, "01 record has no file identification"));
    }
    match recs.last() {
        Some(last) if last.code == "99" => {}
        Some(last) => {
            return Err(IngestError::trailer(
                FORMAT,
                format!("line {}: expected 99 file trailer, found {:?}", last.line, last.code),
            ))
        }
        None => return Err(IngestError::trailer(FORMAT, "missing 99 file trailer")),
    }

    let mut in_group = false;
    let mut in_account = false;
    for r in &recs[1..recs.len() - 1] {
        let loc = format!("line:{}", r.line);
        match r.code.as_str() {
            "02" if in_group => {
                return Err(IngestError::structure(FORMAT, loc, "02 before previous group closed"))
            }
            "02" => in_group = true,
            "03" if !in_group || in_account => {
                return Err(IngestError::structure(FORMAT, loc, "03 outside an open group"))
            }
            "03" => in_account = true,
            "16" if !in_account => {
                return Err(IngestError::structure(FORMAT, loc, "16 outside an account"))
            }
            "49" if !in_account => {
                return Err(IngestError::structure(FORMAT, loc, "49 without matching 03"))
            }
            "49" => in_account = false,
            "98" if !in_group || in_account => {
                return Err(IngestError::structure(FORMAT, loc, "98 with unbalanced group"))
            }
            "98" => in_group = false,
            "01" | "99" => {
                return Err(IngestError::structure(FORMAT, loc, "nested file header or trailer"))
            }
            _ => {}
        }
    }
    if in_group || in_account {
        return Err(IngestError::trailer(FORMAT, "file ends inside an open group or account"));
    }
    Ok(())
}

struct Group {
    as_of: chrono::NaiveDate,
    currency: Currency,
}

pub(crate) fn parse(text: &str) -> Result<ParsedFile, IngestError> {
    let recs = records(text);
    let mut statement_id = String::new();
    let mut accounts = Vec::new();
    let mut skipped = Vec::new();
    let mut group: Option<Group> = None;
    let mut account: Option<RawAccount> = None;

    for r in &recs {
        if let Some(a) = account.as_mut() {
            a.records_seen += r.physical;
        }
        let loc = format!("line:{}", r.line);
        match r.code.as_str() {
            "01" => {
                statement_id = r.fields.get(5).cloned().unwrap_or_default();
            }
            "02" => {
                let as_of = r
                    .fields
                    .get(4)
                    .and_then(|d| parse_yymmdd(d))
                    .ok_or_else(|| IngestError::header(FORMAT, format!("{loc}: bad 02 as-of date")))?;
                let ccy = r.fields.get(6).filter(|c| !c.is_empty()).map(String::as_str);
                let currency = Currency::new(ccy.unwrap_or(DEFAULT_CURRENCY))
                    .map_err(|e| IngestError::header(FORMAT, format!("{loc}: {e}")))?;
                group = Some(Group { as_of, currency });
            }
            "03" => {
                let g = group
                    .as_ref()
                    .ok_or_else(|| IngestError::structure(FORMAT, &loc, "03 outside a group"))?;
                let mut a = parse_account(r, g).map_err(|e| IngestError::structure(FORMAT, &loc, e))?;
                a.records_seen = r.physical;
                account = Some(a);
            }
            "16" => {
                let (Some(g), Some(a)) = (group.as_ref(), account.as_mut()) else {
                    return Err(IngestError::structure(FORMAT, loc, "16 outside an account"));
                };
                match parse_detail(r, g, &a.currency) {
                    Ok(entry) => a.entries.push(entry),
                    Err(reason) => skipped.push(SkippedRecord::at(loc, reason)),
                }
            }
            "49" => {
                let Some(mut a) = account.take() else {
                    return Err(IngestError::structure(FORMAT, loc, "49 without matching 03"));
                };
                let control = r
                    .fields
                    .get(1)
                    .map(|s| parse_amount(s))
                    .transpose()
                    .map_err(|e| IngestError::trailer(FORMAT, format!("{loc}: {e}")))?
                    .flatten();
                let count = r
                    .fields
                    .get(2)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<u64>())
                    .transpose()
                    .map_err(|e| IngestError::trailer(FORMAT, format!("{loc}: bad record count: {e}")))?;
                a.declared.control_total_minor = control;
                a.declared.record_count = count;
                accounts.push(a);
            }
            "98" => group = None,
            "99" => {}
            other => skipped.push(SkippedRecord::at(loc, format!("unknown record type {other:?}"))),
        }
    }
    Ok(ParsedFile {
        statement_id,
        accounts,
        skipped,
    })
}

fn parse_account(r: &Record, group: &Group) -> Result<RawAccount, String> {
    let account = r
        .fields
        .get(1)
        .filter(|s| !s.is_empty())
        .ok_or("03 record has no account number")?;
    let currency = match r.fields.get(2).filter(|c| !c.is_empty()) {
        Some(c) => Currency::new(c).map_err(|e| e.to_string())?,
        None => group.currency.clone(),
    };
    let mut opening = None;
    let mut closing = None;
    let mut summary_total = 0i64;
    let mut i = 3;
    while i < r.fields.len() {
        let code = r.fields[i].as_str();
        if code.is_empty() && r.fields[i..].iter().all(|f| f.is_empty()) {
            break;
        }
        let amount = parse_amount(r.fields.get(i + 1).map(String::as_str).unwrap_or(""))?;
        // type, amount, item count, funds type
        let funds = r.fields.get(i + 3).map(String::as_str).unwrap_or("");
        let extra = funds_extra(funds, &r.fields, i + 4)?;
        if let Some(amount) = amount {
            summary_total += amount;
            let bal = RawBalance {
                date: group.as_of,
                amount_minor: amount,
            };
            match code {
                "010" => opening = Some(bal),
                "015" => closing = Some(bal),
                _ => {}
            }
        }
        i += 4 + extra;
    }
    Ok(RawAccount {
        account_id: AccountId::new(account.as_str()),
        currency,
        opening,
        closing,
        entries: Vec::new(),
        declared: DeclaredTotals::default(),
        summary_amount_minor: summary_total,
        records_seen: 0,
    })
}

fn parse_detail(r: &Record, group: &Group, currency: &Currency) -> Result<RawEntry, String> {
    let type_code = r.fields.get(1).map(String::as_str).unwrap_or("");
    let code: u32 = type_code
        .parse()
        .map_err(|_| format!("bad type code {type_code:?}"))?;
    let direction = match code {
        100..=399 => Direction::Credit,
        400..=699 => Direction::Debit,
        _ => return Err(format!("type code {code} carries no movement")),
    };
    let amount_minor = parse_amount(r.fields.get(2).map(String::as_str).unwrap_or(""))?
        .ok_or("16 record has no amount")?;
    if amount_minor < 0 {
        return Err(format!("negative detail amount {amount_minor}"));
    }
    let funds = r.fields.get(3).map(String::as_str).unwrap_or("");
    let extra = funds_extra(funds, &r.fields, 4)?;
    let value_date = if funds.eq_ignore_ascii_case("V") {
        Some(
            r.fields
                .get(4)
                .and_then(|d| parse_yymmdd(d))
                .ok_or("bad value date for funds type V")?,
        )
    } else {
        None
    };
    let i = 4 + extra;
    let bank_ref = r.fields.get(i).cloned().unwrap_or_default();
    let customer_ref = r.fields.get(i + 1).cloned().unwrap_or_default();
    let text = r.fields.get(i + 2..).map(|t| t.join(",")).unwrap_or_default();

    Ok(RawEntry {
        record: format!("line:{}", r.line),
        booking_date: group.as_of,
        value_date,
        amount_minor,
        direction,
        currency: currency.clone(),
        counterparty: counterparty_from_text(&text),
        reference: if customer_ref.is_empty() { bank_ref } else { customer_ref },
        description: text,
        type_code: Some(type_code.to_string()),
        category: category_for(code),
    })
}

/// Number of fields following the funds-type field.
fn funds_extra(funds: &str, fields: &[String], at: usize) -> Result<usize, String> {
    match funds {
        "" | "0" | "1" | "2" | "Z" | "z" => Ok(0),
        "S" | "s" => Ok(3),
        "V" | "v" => Ok(2),
        "D" | "d" => {
            let n: usize = fields
                .get(at)
                .and_then(|s| s.parse().ok())
                .ok_or("funds type D without a distribution count")?;
            Ok(1 + 2 * n)
        }
        other => Err(format!("unknown funds type {other:?}")),
    }
}

/// Implied two decimals, optional sign. Empty means "no amount".
fn parse_amount(s: &str) -> Result<Option<i64>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    let (sign, digits) = match s.as_bytes()[0] {
        b'-' => (-1, &s[1..]),
        b'+' => (1, &s[1..]),
        _ => (1, s),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("bad amount {s:?}"));
    }
    digits
        .parse::<i64>()
        .map(|v| Some(sign * v))
        .map_err(|e| format!("bad amount {s:?}: {e}"))
}

fn counterparty_from_text(text: &str) -> String {
    let Some(pos) = text.find("NAME:") else {
        return String::new();
    };
    let rest = text[pos + 5..].trim_start();
    let end = rest.find("  ").unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

fn category_for(code: u32) -> Option<BankCategory> {
    match code {
        354 => Some(BankCategory::Interest),
        698 => Some(BankCategory::Fee),
        275 | 575 => Some(BankCategory::InternalTransfer),
        _ => None,
    }
}
