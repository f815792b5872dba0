//! # SWIFT MT940
//!
//! Tag-based customer statement. Recognized tags:
//!
//! | Tag         | Meaning                                   |
//! |-------------|-------------------------------------------|
//! | `:20:`      | transaction reference; starts a statement |
//! | `:25:`      | account identification                    |
//! | `:28C:`     | statement/sequence number                 |
//! | `:60F/M:`   | opening booked balance                    |
//! | `:61:`      | statement line                            |
//! | `:86:`      | information to account owner              |
//! | `:62F/M:`   | closing booked balance                    |
//!
//! Lines that do not start a tag continue the previous field. SWIFT
//! envelope blocks (`{1:...}{4:` and `-}`) are ignored. A malformed
//! `:61:` line is skipped with evidence; a malformed balance rejects the
//! file.

use chrono::{Datelike, NaiveDate};

use cashlock_core::{parse_amount_minor, AccountId, BankCategory, Currency, Direction, StatementFormat};

use crate::error::IngestError;
use crate::pipeline::{parse_yymmdd, ParsedFile, RawAccount, RawBalance, RawEntry, SkippedRecord};

const FORMAT: StatementFormat = StatementFormat::Mt940;

#[derive(Debug)]
struct Field {
    tag: String,
    value: String,
    line: usize,
}

/// Split the text into tagged fields, folding continuation lines.
fn fields(text: &str) -> Result<Vec<Field>, IngestError> {
    let mut out: Vec<Field> = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end();
        if line.is_empty() || is_envelope(line) {
            continue;
        }
        // Block 4 may open on the same line as the first tag.
        let line = line
            .find("{4:")
            .map(|pos| &line[pos + 3..])
            .unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if let Some((tag, value)) = split_tag(line) {
            out.push(Field {
                tag: tag.to_string(),
                value: value.to_string(),
                line: line_no,
            });
        } else if let Some(last) = out.last_mut() {
            last.value.push('\n');
            last.value.push_str(line);
        } else {
            return Err(IngestError::header(
                FORMAT,
                format!("line {line_no}: content before the first tag"),
            ));
        }
    }
    Ok(out)
}

fn is_envelope(line: &str) -> bool {
    line == "-" || line == "-}" || ((line.starts_with("{1:") || line.starts_with("{2:")) && !line.contains("{4:"))
}

fn split_tag(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(':')?;
    let end = rest.find(':')?;
    let tag = &rest[..end];
    if !(2..=3).contains(&tag.len()) || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    if !tag.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    Some((tag, &rest[end + 1..]))
}

/// Structural check: every statement has an account, an opening and a
/// closing balance.
pub(crate) fn validate(text: &str) -> Result<(), IngestError> {
    let fields = fields(text)?;
    let Some(first) = fields.first() else {
        return Err(IngestError::header(FORMAT, "no tags found"));
    };
    if first.tag != "20" {
        return Err(IngestError::header(
            FORMAT,
            format!("line {}: expected :20: first, found :{}:", first.line, first.tag),
        ));
    }
    let mut seen_account = false;
    let mut seen_opening = false;
    let mut seen_closing = true;
    for f in &fields {
        match f.tag.as_str() {
            "20" => {
                if !seen_closing {
                    return Err(IngestError::trailer(
                        FORMAT,
                        format!("line {}: statement ends without :62F:/:62M:", f.line),
                    ));
                }
                seen_account = false;
                seen_opening = false;
                seen_closing = false;
            }
            "25" => seen_account = true,
            "60F" | "60M" => {
                if !seen_account {
                    return Err(IngestError::header(
                        FORMAT,
                        format!("line {}: opening balance before :25:", f.line),
                    ));
                }
                seen_opening = true;
            }
            "62F" | "62M" => {
                if !seen_opening {
                    return Err(IngestError::header(
                        FORMAT,
                        format!("line {}: closing balance without :60F:/:60M:", f.line),
                    ));
                }
                seen_closing = true;
            }
            _ => {}
        }
    }
    if !seen_closing {
        return Err(IngestError::trailer(FORMAT, "last statement has no :62F:/:62M:"));
    }
    Ok(())
}

struct Builder {
    reference: String,
    account: Option<AccountId>,
    currency: Option<Currency>,
    opening: Option<RawBalance>,
    closing: Option<RawBalance>,
    entries: Vec<RawEntry>,
}

impl Builder {
    fn new(reference: &str) -> Self {
        Self {
            reference: reference.trim().to_string(),
            account: None,
            currency: None,
            opening: None,
            closing: None,
            entries: Vec::new(),
        }
    }

    fn finish(self, line: usize) -> Result<RawAccount, IngestError> {
        let account_id = self.account.ok_or_else(|| {
            IngestError::header(FORMAT, format!("statement {} has no :25:", self.reference))
        })?;
        let currency = self.currency.ok_or_else(|| {
            IngestError::header(FORMAT, format!("line {line}: no opening balance currency"))
        })?;
        Ok(RawAccount {
            account_id,
            currency,
            opening: self.opening,
            closing: self.closing,
            entries: self.entries,
            declared: Default::default(),
            summary_amount_minor: 0,
            records_seen: 0,
        })
    }
}

pub(crate) fn parse(text: &str) -> Result<ParsedFile, IngestError> {
    let fields = fields(text)?;
    let mut accounts = Vec::new();
    let mut skipped = Vec::new();
    let mut statement_id: Option<String> = None;
    let mut current: Option<Builder> = None;
    // Index into `current.entries` of the last :61:, so a following :86:
    // can attach to it.
    let mut last_entry: Option<usize> = None;

    for f in &fields {
        let tag = f.tag.as_str();
        if tag == "20" {
            if let Some(b) = current.take() {
                accounts.push(b.finish(f.line)?);
            }
            if statement_id.is_none() {
                statement_id = Some(f.value.trim().to_string());
            }
            current = Some(Builder::new(&f.value));
            last_entry = None;
            continue;
        }
        let Some(b) = current.as_mut() else {
            return Err(IngestError::header(FORMAT, "tag before :20:"));
        };
        match tag {
            "25" => b.account = Some(AccountId::new(f.value.trim())),
            "60F" | "60M" => {
                let (bal, ccy) = parse_balance(&f.value).map_err(|e| {
                    IngestError::header(FORMAT, format!("line {}: opening balance: {e}", f.line))
                })?;
                b.opening = Some(bal);
                b.currency = Some(ccy);
                last_entry = None;
            }
            "62F" | "62M" => {
                let (bal, ccy) = parse_balance(&f.value).map_err(|e| {
                    IngestError::trailer(FORMAT, format!("line {}: closing balance: {e}", f.line))
                })?;
                if b.currency.as_ref().is_some_and(|c| *c != ccy) {
                    return Err(IngestError::trailer(
                        FORMAT,
                        format!("line {}: closing currency {ccy} differs from opening", f.line),
                    ));
                }
                b.closing = Some(bal);
                last_entry = None;
            }
            "61" => {
                let Some(ccy) = b.currency.clone() else {
                    skipped.push(SkippedRecord::at(
                        format!("line:{}", f.line),
                        "statement line before opening balance",
                    ));
                    continue;
                };
                match parse_statement_line(&f.value, ccy, f.line) {
                    Ok(entry) => {
                        b.entries.push(entry);
                        last_entry = Some(b.entries.len() - 1);
                    }
                    Err(reason) => {
                        skipped.push(SkippedRecord::at(format!("line:{}", f.line), reason));
                        last_entry = None;
                    }
                }
            }
            "86" => {
                if let Some(entry) = last_entry.and_then(|i| b.entries.get_mut(i)) {
                    apply_information(entry, &f.value);
                }
                last_entry = None;
            }
            _ => {}
        }
    }
    if let Some(b) = current.take() {
        let end = fields.last().map(|f| f.line).unwrap_or(0);
        accounts.push(b.finish(end)?);
    }
    Ok(ParsedFile {
        statement_id: statement_id.unwrap_or_default(),
        accounts,
        skipped,
    })
}

/// `C260331EUR1234,56` → signed balance and currency.
fn parse_balance(value: &str) -> Result<(RawBalance, Currency), String> {
    let v = value.trim();
    let sign = match v.get(0..1) {
        Some("C") => 1,
        Some("D") => -1,
        _ => return Err(format!("bad debit/credit mark in {v:?}")),
    };
    let date = v
        .get(1..7)
        .and_then(parse_yymmdd)
        .ok_or_else(|| format!("bad date in {v:?}"))?;
    let ccy = v
        .get(7..10)
        .ok_or_else(|| format!("missing currency in {v:?}"))
        .and_then(|c| Currency::new(c).map_err(|e| e.to_string()))?;
    let amount = v
        .get(10..)
        .ok_or_else(|| format!("missing amount in {v:?}"))
        .and_then(|a| parse_amount_minor(a).map_err(|e| e.to_string()))?;
    Ok((
        RawBalance {
            date,
            amount_minor: sign * amount,
        },
        ccy,
    ))
}

/// Parse a `:61:` statement line.
///
/// Layout: `YYMMDD[MMDD](C|D|RC|RD)[funds]amount(N|F|S)xxx ref[//bankref]`,
/// optionally followed by a supplementary-details line.
fn parse_statement_line(value: &str, currency: Currency, line: usize) -> Result<RawEntry, String> {
    let mut lines = value.lines();
    let first = lines.next().unwrap_or("").trim();
    let supplementary = lines.next().map(str::trim).unwrap_or("");

    let value_date = first
        .get(0..6)
        .and_then(parse_yymmdd)
        .ok_or_else(|| format!("bad value date in {first:?}"))?;
    let mut rest = &first[6..];

    let mut booking_date = value_date;
    if rest.len() >= 4 && rest.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
        booking_date = entry_date(value_date, &rest[..4])
            .ok_or_else(|| format!("bad entry date in {first:?}"))?;
        rest = &rest[4..];
    }

    let direction = if let Some(r) = rest.strip_prefix("RC") {
        rest = r;
        Direction::Debit
    } else if let Some(r) = rest.strip_prefix("RD") {
        rest = r;
        Direction::Credit
    } else if let Some(r) = rest.strip_prefix('C') {
        rest = r;
        Direction::Credit
    } else if let Some(r) = rest.strip_prefix('D') {
        rest = r;
        Direction::Debit
    } else {
        return Err(format!("bad debit/credit mark in {first:?}"));
    };

    // Optional funds code: third letter of the currency code.
    if rest.as_bytes().first().is_some_and(u8::is_ascii_alphabetic) {
        rest = &rest[1..];
    }

    let amount_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_digit() || *b == b',')
        .count();
    if amount_len == 0 {
        return Err(format!("missing amount in {first:?}"));
    }
    let amount_minor = parse_amount_minor(&rest[..amount_len]).map_err(|e| e.to_string())?;
    if amount_minor < 0 {
        return Err(format!("negative amount in {first:?}"));
    }
    rest = &rest[amount_len..];

    let type_code = match rest.get(0..4) {
        Some(t) if matches!(t.as_bytes()[0], b'N' | b'F' | b'S') => {
            rest = &rest[4..];
            t[1..].to_string()
        }
        _ => return Err(format!("bad transaction type in {first:?}")),
    };

    // The bank's own reference after `//` is not a payment reference.
    let customer_ref = rest.split("//").next().unwrap_or(rest);
    let reference = if customer_ref.eq_ignore_ascii_case("NONREF") {
        String::new()
    } else {
        customer_ref.trim().to_string()
    };

    let description = supplementary.to_string();

    Ok(RawEntry {
        record: format!("line:{line}"),
        booking_date,
        value_date: Some(value_date),
        amount_minor,
        direction,
        currency,
        counterparty: String::new(),
        reference,
        description,
        category: category_for(&type_code),
        type_code: Some(type_code),
    })
}

/// Resolve an `MMDD` entry date against the value date's year, handling
/// statements that straddle New Year.
fn entry_date(value_date: NaiveDate, mmdd: &str) -> Option<NaiveDate> {
    let mm: u32 = mmdd.get(0..2)?.parse().ok()?;
    let dd: u32 = mmdd.get(2..4)?.parse().ok()?;
    let mut year = value_date.year();
    if mm == 12 && value_date.month() == 1 {
        year -= 1;
    } else if mm == 1 && value_date.month() == 12 {
        year += 1;
    }
    NaiveDate::from_ymd_opt(year, mm, dd)
}

/// Fold `:86:` text into the entry: description, counterparty and a
/// fallback reference.
fn apply_information(entry: &mut RawEntry, info: &str) {
    let flat = info.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    if let Some(name) = subfield(&flat, "/NAME/").or_else(|| german_subfield(&flat, "?32")) {
        entry.counterparty = name;
    }
    if entry.reference.is_empty() {
        if let Some(r) = subfield(&flat, "/EREF/").or_else(|| subfield(&flat, "/REMI/")) {
            entry.reference = r;
        }
    }
    if entry.description.is_empty() {
        entry.description = flat;
    } else {
        entry.description = format!("{} {}", entry.description, flat);
    }
}

/// `/KEY/value/NEXT/...` structured information.
fn subfield(info: &str, key: &str) -> Option<String> {
    let start = info.find(key)? + key.len();
    let rest = &info[start..];
    let end = rest.find('/').unwrap_or(rest.len());
    let v = rest[..end].trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// `?32name?33...` German-style subfields.
fn german_subfield(info: &str, key: &str) -> Option<String> {
    let start = info.find(key)? + key.len();
    let rest = &info[start..];
    let end = rest.find('?').unwrap_or(rest.len());
    let v = rest[..end].trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn category_for(code: &str) -> Option<BankCategory> {
    match code {
        "CHG" | "COM" | "FEE" => Some(BankCategory::Fee),
        "INT" => Some(BankCategory::Interest),
        "TAX" => Some(BankCategory::Tax),
        "SAL" => Some(BankCategory::Payroll),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "{1:F01BANKDEFFAXXX0000000000}{2:I940BANKDEFFXXXXN}{4:
:20:STMT-2026-03-31
:25:DE89370400440532013000
:28C:00031/001
:60F:C260330EUR10000,00
:61:2603310331C1500,00NTRFINV-1001//BANKREF1
:86:/NAME/Acme Corporation/REMI/Payment INV-1001
 March delivery
:61:2603310331D25,50NCHGNONREF
:86:Monthly account fee
:61:2603310401RD100,00NTRFNONREF
:86:/EREF/RET-77/NAME/Globex
:62F:C260331EUR11574,50
-}";

    #[test]
    fn parses_sample_statement() {
        validate(SAMPLE).unwrap();
        let parsed = parse(SAMPLE).unwrap();
        assert_eq!(parsed.statement_id, "STMT-2026-03-31");
        assert!(parsed.skipped.is_empty());
        let acct = &parsed.accounts[0];
        assert_eq!(acct.account_id.as_str(), "DE89370400440532013000");
        assert_eq!(acct.currency.as_str(), "EUR");
        assert_eq!(acct.opening.unwrap().amount_minor, 1_000_000);
        assert_eq!(acct.closing.unwrap().amount_minor, 1_157_450);
        assert_eq!(acct.entries.len(), 3);

        let first = &acct.entries[0];
        assert_eq!(first.direction, Direction::Credit);
        assert_eq!(first.amount_minor, 150_000);
        assert_eq!(first.reference, "INV-1001");
        assert_eq!(first.counterparty, "Acme Corporation");
        assert!(first.description.contains("March delivery"));

        let fee = &acct.entries[1];
        assert_eq!(fee.category, Some(BankCategory::Fee));
        assert_eq!(fee.reference, "");

        let reversal = &acct.entries[2];
        assert_eq!(reversal.direction, Direction::Credit);
        assert_eq!(reversal.reference, "RET-77");
        assert_eq!(reversal.booking_date, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
    }

    #[test]
    fn malformed_statement_line_is_skipped() {
        let text = ":20:S1\n:25:ACC\n:60F:C260330EUR0,00\n:61:26XX31C10,00NTRF\n:61:2603310331C10,00NTRFOK\n:62F:C260331EUR10,00\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.accounts[0].entries.len(), 1);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].evidence.entity_id, "line:4");
    }

    #[test]
    fn malformed_balances_reject_the_file() {
        let bad_open = ":20:S1\n:25:ACC\n:60F:X260330EUR0,00\n:62F:C260331EUR0,00\n";
        assert!(matches!(parse(bad_open), Err(IngestError::MalformedHeader { .. })));
        let bad_close = ":20:S1\n:25:ACC\n:60F:C260330EUR0,00\n:62F:C260331EUR\n";
        assert!(matches!(parse(bad_close), Err(IngestError::MalformedTrailer { .. })));
    }

    #[test]
    fn validate_requires_structure() {
        assert!(matches!(
            validate(":25:ACC\n:60F:C260330EUR0,00\n"),
            Err(IngestError::MalformedHeader { .. })
        ));
        assert!(matches!(
            validate(":20:S1\n:25:ACC\n:60F:C260330EUR0,00\n:61:2603310331C10,00NTRFX\n"),
            Err(IngestError::MalformedTrailer { .. })
        ));
    }

    #[test]
    fn multiple_statements_become_multiple_accounts() {
        let text = ":20:A\n:25:ACC1\n:60F:C260330EUR0,00\n:62F:C260331EUR0,00\n:20:B\n:25:ACC2\n:60F:D260330USD5,00\n:62F:D260331USD5,00\n";
        validate(text).unwrap();
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.accounts.len(), 2);
        assert_eq!(parsed.accounts[1].opening.unwrap().amount_minor, -500);
        assert_eq!(parsed.statement_id, "A");
    }

    #[test]
    fn entry_date_crosses_year_end() {
        let vd = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(entry_date(vd, "1231"), NaiveDate::from_ymd_opt(2025, 12, 31));
    }
}
