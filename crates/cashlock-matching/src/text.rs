//! Reference and name normalization, and Jaro–Winkler similarity.

/// Uppercase ASCII alphanumerics only. `"inv-1001 / x"` → `"INV1001X"`.
pub fn normalize_reference(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Legal-form suffixes dropped from party names before comparison.
const LEGAL_FORMS: &[&str] = &[
    "GMBH", "AG", "LTD", "LIMITED", "INC", "INCORPORATED", "LLC", "SA", "SAS", "BV", "NV", "PLC",
    "CO", "COMPANY", "CORP", "CORPORATION", "SRL", "SPA", "KG", "OY", "AB",
];

/// Uppercase words of letters and digits, legal forms removed.
pub fn normalize_name(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_uppercase)
        .filter(|w| !LEGAL_FORMS.contains(&w.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaro similarity in `0.0..=1.0`.
pub fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0usize;
    for (i, ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && b[j] == *ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }
    if matches == 0 {
        return 0.0;
    }
    let a_seq = a.iter().zip(&a_matched).filter(|(_, m)| **m).map(|(c, _)| c);
    let b_seq = b.iter().zip(&b_matched).filter(|(_, m)| **m).map(|(c, _)| c);
    let transpositions = a_seq.zip(b_seq).filter(|(x, y)| x != y).count() / 2;
    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64) / m) / 3.0
}

/// Jaro–Winkler similarity with the standard 0.1 prefix scale over at most
/// four characters.
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let j = jaro(a, b);
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(4)
        .take_while(|(x, y)| x == y)
        .count();
    j + prefix as f64 * 0.1 * (1.0 - j)
}

/// How strongly a payment reference points at a document number.
///
/// `1.0` when the normalized reference contains the normalized document
/// number, `0.6` when it contains the document's digit run (at least three
/// digits), else `0.0`.
pub fn reference_score(reference_norm: &str, document_norm: &str) -> f64 {
    if document_norm.is_empty() {
        return 0.0;
    }
    if reference_norm.contains(document_norm) {
        return 1.0;
    }
    let digits: String = document_norm.chars().filter(char::is_ascii_digit).collect();
    if digits.len() >= 3 && reference_norm.contains(&digits) {
        return 0.6;
    }
    0.0
}
