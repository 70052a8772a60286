//! Brazilian tax document helpers (CPF and CNPJ)
//!
//! Payees coming from bank transfers are often a bare tax document instead of
//! a name. These helpers detect them and render them in their usual mask.

use crate::error::{Error, Result};

pub const CPF_LEN: usize = 11;
pub const CNPJ_LEN: usize = 14;

/// Strip everything but ASCII digits
pub fn clean_document(doc: &str) -> String {
    doc.chars().filter(char::is_ascii_digit).collect()
}

/// True when the text is only a document: digits plus mask punctuation
fn is_document_like(doc: &str) -> bool {
    let trimmed = doc.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '/' | ' '))
}

pub fn is_cpf(doc: &str) -> bool {
    is_document_like(doc) && clean_document(doc).len() == CPF_LEN
}

/// A payee is a CNPJ when, punctuation stripped, it is exactly 14 digits
pub fn is_cnpj(doc: &str) -> bool {
    is_document_like(doc) && clean_document(doc).len() == CNPJ_LEN
}

/// Format a CPF (`XXX.XXX.XXX-XX`) or CNPJ (`XX.XXX.XXX/XXXX-XX`).
///
/// Any other digit count is rejected.
pub fn mask_document(doc: &str) -> Result<String> {
    let digits = clean_document(doc);

    match digits.len() {
        CNPJ_LEN => Ok(format!(
            "{}.{}.{}/{}-{}",
            &digits[..2],
            &digits[2..5],
            &digits[5..8],
            &digits[8..12],
            &digits[12..]
        )),
        CPF_LEN => Ok(format!(
            "{}.{}.{}-{}",
            &digits[..3],
            &digits[3..6],
            &digits[6..9],
            &digits[9..]
        )),
        n => Err(Error::validation(format!(
            "invalid document: expected {} or {} digits, got {}",
            CPF_LEN, CNPJ_LEN, n
        ))),
    }
}
