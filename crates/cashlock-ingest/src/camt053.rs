//! # ISO 20022 camt.053
//!
//! Streaming parse with `quick-xml`. The reader keeps a stack of local
//! element names below `Stmt` and matches text nodes by path suffix, so
//! namespace prefixes and schema versions (`.001.02` through `.001.08`,
//! which differ in `RltdPties/Dbtr/Pty/Nm` vs `RltdPties/Dbtr/Nm`) need no
//! special handling.
//!
//! Balance types `OPBD`/`PRCD` are opening and `CLBD` is closing.
//! `TxsSummry/TtlNtries` supplies the declared entry count and sum.

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use cashlock_core::{parse_amount_minor, AccountId, BankCategory, Currency, Direction, StatementFormat};

use crate::error::IngestError;
use crate::pipeline::{DeclaredTotals, ParsedFile, RawAccount, RawBalance, RawEntry, SkippedRecord};

const FORMAT: StatementFormat = StatementFormat::Camt053;

fn xml_error(reader: &Reader<&[u8]>, e: impl std::fmt::Display) -> IngestError {
    IngestError::Xml {
        position: reader.buffer_position(),
        detail: e.to_string(),
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Well-formedness plus the mandatory `BkToCstmrStmt/Stmt/Acct` skeleton.
pub(crate) fn validate(text: &str) -> Result<(), IngestError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut statements = 0usize;
    let mut accounts = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"BkToCstmrStmt" => seen_root = true,
                    b"Stmt" if seen_root => statements += 1,
                    b"Acct" if statements > 0 => accounts += 1,
                    _ => {}
                }
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e)),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(IngestError::trailer(FORMAT, "document ends with unclosed elements"));
    }
    if !seen_root {
        return Err(IngestError::header(FORMAT, "missing BkToCstmrStmt"));
    }
    if statements == 0 {
        return Err(IngestError::header(FORMAT, "no Stmt element"));
    }
    if accounts < statements {
        return Err(IngestError::header(FORMAT, "Stmt without Acct"));
    }
    Ok(())
}

#[derive(Default)]
struct BalanceBuilder {
    code: String,
    amount: String,
    indicator: String,
    date: String,
}

#[derive(Default)]
struct EntryBuilder {
    amount: String,
    currency: String,
    indicator: String,
    booking_date: String,
    value_date: String,
    entry_ref: String,
    servicer_ref: String,
    end_to_end: String,
    creditor_ref: String,
    unstructured: Vec<String>,
    additional: String,
    debtor: String,
    creditor: String,
    sub_family: String,
    reversal: bool,
}

#[derive(Default)]
struct StatementBuilder {
    id: String,
    account: String,
    currency: String,
    opening: Option<RawBalance>,
    closing: Option<RawBalance>,
    entries: Vec<RawEntry>,
    declared: DeclaredTotals,
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

pub(crate) fn parse(text: &str) -> Result<ParsedFile, IngestError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut accounts = Vec::new();
    let mut skipped = Vec::new();
    let mut statement_id: Option<String> = None;
    let mut stmt: Option<StatementBuilder> = None;
    let mut bal: Option<BalanceBuilder> = None;
    let mut entry: Option<EntryBuilder> = None;
    let mut entry_index = 0usize;
    let mut amt_ccy = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                match name.as_str() {
                    "Stmt" => stmt = Some(StatementBuilder::default()),
                    "Bal" if stmt.is_some() => bal = Some(BalanceBuilder::default()),
                    "Ntry" if stmt.is_some() => {
                        entry_index += 1;
                        entry = Some(EntryBuilder::default());
                    }
                    "Amt" => {
                        amt_ccy.clear();
                        for a in e.attributes().flatten() {
                            if a.key.as_ref() == b"Ccy" {
                                if let Ok(v) = a.unescape_value() {
                                    amt_ccy = v.into_owned();
                                }
                            }
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape().map_err(|e| xml_error(&reader, e))?;
                let value = value.trim();
                let Some(s) = stmt.as_mut() else { continue };
                if let Some(b) = bal.as_mut() {
                    if ends_with(&path, &["Tp", "CdOrPrtry", "Cd"]) {
                        b.code = value.to_string();
                    } else if ends_with(&path, &["Bal", "Amt"]) {
                        b.amount = value.to_string();
                    } else if ends_with(&path, &["Bal", "CdtDbtInd"]) {
                        b.indicator = value.to_string();
                    } else if ends_with(&path, &["Bal", "Dt", "Dt"]) || ends_with(&path, &["Bal", "Dt", "DtTm"]) {
                        b.date = value.to_string();
                    }
                } else if let Some(n) = entry.as_mut() {
                    apply_entry_text(n, &path, value, &amt_ccy);
                } else if ends_with(&path, &["Stmt", "Id"]) {
                    s.id = value.to_string();
                } else if ends_with(&path, &["Acct", "Id", "IBAN"]) || ends_with(&path, &["Acct", "Id", "Othr", "Id"]) {
                    s.account = value.to_string();
                } else if ends_with(&path, &["Acct", "Ccy"]) {
                    s.currency = value.to_string();
                } else if ends_with(&path, &["TtlNtries", "NbOfNtries"]) {
                    s.declared.entry_count = value.parse().ok();
                } else if ends_with(&path, &["TtlNtries", "Sum"]) {
                    s.declared.entry_sum_minor = parse_amount_minor(value).ok();
                }
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else { continue };
                match name.as_str() {
                    "Bal" => {
                        if let (Some(b), Some(s)) = (bal.take(), stmt.as_mut()) {
                            apply_balance(s, b)?;
                        }
                    }
                    "Ntry" => {
                        if let (Some(n), Some(s)) = (entry.take(), stmt.as_mut()) {
                            let location = format!("entry:{entry_index}");
                            match build_entry(n, &s.currency, &location) {
                                Ok(raw) => s.entries.push(raw),
                                Err(reason) => skipped.push(SkippedRecord::at(location, reason)),
                            }
                        }
                    }
                    "Stmt" => {
                        if let Some(s) = stmt.take() {
                            if statement_id.is_none() {
                                statement_id = Some(s.id.clone());
                            }
                            accounts.push(finish_statement(s)?);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(&reader, e)),
            _ => {}
        }
    }
    Ok(ParsedFile {
        statement_id: statement_id.unwrap_or_default(),
        accounts,
        skipped,
    })
}

fn apply_entry_text(n: &mut EntryBuilder, path: &[String], value: &str, amt_ccy: &str) {
    if ends_with(path, &["Ntry", "Amt"]) {
        n.amount = value.to_string();
        n.currency = amt_ccy.to_string();
    } else if ends_with(path, &["Ntry", "CdtDbtInd"]) {
        n.indicator = value.to_string();
    } else if ends_with(path, &["Ntry", "RvslInd"]) {
        n.reversal = value.eq_ignore_ascii_case("true");
    } else if ends_with(path, &["BookgDt", "Dt"]) || ends_with(path, &["BookgDt", "DtTm"]) {
        n.booking_date = value.to_string();
    } else if ends_with(path, &["ValDt", "Dt"]) || ends_with(path, &["ValDt", "DtTm"]) {
        n.value_date = value.to_string();
    } else if ends_with(path, &["Ntry", "NtryRef"]) {
        n.entry_ref = value.to_string();
    } else if ends_with(path, &["Ntry", "AcctSvcrRef"]) {
        n.servicer_ref = value.to_string();
    } else if ends_with(path, &["Refs", "EndToEndId"]) {
        n.end_to_end = value.to_string();
    } else if ends_with(path, &["CdtrRefInf", "Ref"]) {
        n.creditor_ref = value.to_string();
    } else if ends_with(path, &["RmtInf", "Ustrd"]) {
        n.unstructured.push(value.to_string());
    } else if ends_with(path, &["Ntry", "AddtlNtryInf"]) {
        n.additional = value.to_string();
    } else if ends_with(path, &["RltdPties", "Dbtr", "Nm"]) || ends_with(path, &["RltdPties", "Dbtr", "Pty", "Nm"]) {
        n.debtor = value.to_string();
    } else if ends_with(path, &["RltdPties", "Cdtr", "Nm"]) || ends_with(path, &["RltdPties", "Cdtr", "Pty", "Nm"]) {
        n.creditor = value.to_string();
    } else if ends_with(path, &["Fmly", "SubFmlyCd"]) {
        n.sub_family = value.to_string();
    }
}

fn apply_balance(s: &mut StatementBuilder, b: BalanceBuilder) -> Result<(), IngestError> {
    let opening = matches!(b.code.as_str(), "OPBD" | "PRCD");
    let closing = b.code == "CLBD";
    if !opening && !closing {
        return Ok(());
    }
    let fail = |detail: String| {
        if opening {
            IngestError::header(FORMAT, detail)
        } else {
            IngestError::trailer(FORMAT, detail)
        }
    };
    let amount = parse_amount_minor(&b.amount).map_err(|e| fail(format!("{} balance: {e}", b.code)))?;
    let sign = match b.indicator.as_str() {
        "CRDT" => 1,
        "DBIT" => -1,
        other => return Err(fail(format!("{} balance indicator {other:?}", b.code))),
    };
    let date = parse_date(&b.date).ok_or_else(|| fail(format!("{} balance date {:?}", b.code, b.date)))?;
    let balance = RawBalance {
        date,
        amount_minor: sign * amount,
    };
    if opening {
        s.opening = Some(balance);
    } else {
        s.closing = Some(balance);
    }
    Ok(())
}

fn build_entry(n: EntryBuilder, stmt_ccy: &str, location: &str) -> Result<RawEntry, String> {
    let amount_minor = parse_amount_minor(&n.amount).map_err(|e| e.to_string())?;
    if amount_minor < 0 {
        return Err(format!("negative entry amount {:?}", n.amount));
    }
    let direction = match (n.indicator.as_str(), n.reversal) {
        ("CRDT", false) | ("DBIT", true) => Direction::Credit,
        ("DBIT", false) | ("CRDT", true) => Direction::Debit,
        (other, _) => return Err(format!("bad CdtDbtInd {other:?}")),
    };
    let booking_date = parse_date(&n.booking_date).ok_or_else(|| format!("bad booking date {:?}", n.booking_date))?;
    let value_date = if n.value_date.is_empty() {
        None
    } else {
        Some(parse_date(&n.value_date).ok_or_else(|| format!("bad value date {:?}", n.value_date))?)
    };
    let ccy = if n.currency.is_empty() { stmt_ccy } else { n.currency.as_str() };
    let currency = Currency::new(ccy).map_err(|e| e.to_string())?;

    let reference = [&n.end_to_end, &n.creditor_ref, &n.entry_ref, &n.servicer_ref]
        .into_iter()
        .find(|r| !r.is_empty() && !r.eq_ignore_ascii_case("NOTPROVIDED"))
        .cloned()
        .unwrap_or_default();
    let counterparty = match direction {
        Direction::Credit => n.debtor,
        Direction::Debit => n.creditor,
    };
    let mut description = n.unstructured.join(" ");
    if !n.additional.is_empty() {
        if !description.is_empty() {
            description.push(' ');
        }
        description.push_str(&n.additional);
    }

    Ok(RawEntry {
        record: location.to_string(),
        booking_date,
        value_date,
        amount_minor,
        direction,
        currency,
        counterparty,
        reference,
        description,
        category: category_for(&n.sub_family),
        type_code: (!n.sub_family.is_empty()).then_some(n.sub_family),
    })
}

fn finish_statement(s: StatementBuilder) -> Result<RawAccount, IngestError> {
    if s.account.is_empty() {
        return Err(IngestError::header(FORMAT, format!("statement {:?} has no account id", s.id)));
    }
    let ccy = if s.currency.is_empty() {
        s.entries.first().map(|e| e.currency.as_str().to_string())
    } else {
        Some(s.currency.clone())
    };
    let currency = ccy
        .ok_or_else(|| IngestError::header(FORMAT, format!("statement {:?} has no currency", s.id)))
        .and_then(|c| Currency::new(&c).map_err(|e| IngestError::header(FORMAT, e.to_string())))?;
    Ok(RawAccount {
        account_id: AccountId::new(s.account),
        currency,
        opening: s.opening,
        closing: s.closing,
        entries: s.entries,
        declared: s.declared,
        summary_amount_minor: 0,
        records_seen: 0,
    })
}

/// `YYYY-MM-DD`, or the date part of an ISO date-time.
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(0..10)?, "%Y-%m-%d").ok()
}

fn category_for(sub_family: &str) -> Option<BankCategory> {
    match sub_family {
        "CHRG" | "FEES" | "COMM" | "COMT" => Some(BankCategory::Fee),
        "INTR" => Some(BankCategory::Interest),
        "TAXE" | "WHLD" => Some(BankCategory::Tax),
        "BOOK" => Some(BankCategory::InternalTransfer),
        "SALA" => Some(BankCategory::Payroll),
        _ => None,
    }
}
