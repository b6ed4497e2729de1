use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::contracts::DocumentError;
use crate::documents::sanitize::clean_field;

/// Contract data submitted by a client.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContractRequest {
    pub client_full_name: Option<String>,
    pub passport_series: Option<String>,
    pub passport_number: Option<String>,
    /// Series and number in one string, e.g. `4510 123456`
    pub passport_full: Option<String>,
    pub inn: Option<String>,
    pub client_address: Option<String>,
    pub bank_name: Option<String>,
    pub bank_account: Option<String>,
    pub bank_bik: Option<String>,
    pub bank_swift: Option<String>,
    /// Caller-supplied number; skips allocation when present
    pub contract_number: Option<String>,
}

struct FieldRule {
    name: &'static str,
    required: bool,
    max_len: usize,
    /// Length kept in the rendered document
    render_limit: Option<usize>,
}

const FIELD_RULES: [FieldRule; 11] = [
    FieldRule { name: "client_full_name", required: true, max_len: 255, render_limit: Some(50) },
    FieldRule { name: "passport_series", required: false, max_len: 10, render_limit: None },
    FieldRule { name: "passport_number", required: false, max_len: 20, render_limit: None },
    FieldRule { name: "passport_full", required: false, max_len: 50, render_limit: Some(30) },
    FieldRule { name: "inn", required: true, max_len: 20, render_limit: Some(20) },
    FieldRule { name: "client_address", required: true, max_len: 255, render_limit: Some(100) },
    FieldRule { name: "bank_name", required: true, max_len: 255, render_limit: Some(80) },
    FieldRule { name: "bank_account", required: true, max_len: 50, render_limit: Some(50) },
    FieldRule { name: "bank_bik", required: true, max_len: 20, render_limit: Some(20) },
    FieldRule { name: "bank_swift", required: false, max_len: 20, render_limit: Some(20) },
    FieldRule { name: "contract_number", required: false, max_len: 50, render_limit: None },
];

/// Longest accepted contract number token.
pub const MAX_CONTRACT_NUMBER_LEN: usize = 50;

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

const PASSPORT_SERIES_DIGITS: usize = 4;
const PASSPORT_NUMBER_DIGITS: usize = 6;

/// Splits `DDDD DDDDDD` (any run of whitespace between the groups) into
/// series and number.
pub fn split_passport(full: &str) -> Option<(String, String)> {
    let mut parts = full.split_whitespace();
    let series = parts.next()?;
    let number = parts.next()?;
    if parts.next().is_some() || full.starts_with(char::is_whitespace) || full.ends_with(char::is_whitespace) {
        return None;
    }
    let all_digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
    if all_digits(series, PASSPORT_SERIES_DIGITS) && all_digits(number, PASSPORT_NUMBER_DIGITS) {
        Some((series.to_string(), number.to_string()))
    } else {
        None
    }
}

/// Checks that a contract number is safe to embed in file names and storage keys.
pub fn validate_contract_number(number: &str) -> Result<(), DocumentError> {
    if number.is_empty() || number.len() > MAX_CONTRACT_NUMBER_LEN {
        return Err(DocumentError::Validation {
            field: "contract_number",
            reason: format!("must be 1..={} characters", MAX_CONTRACT_NUMBER_LEN),
        });
    }
    if !number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        || number.starts_with('.')
    {
        return Err(DocumentError::Validation {
            field: "contract_number",
            reason: "may only contain letters, digits, '-', '_' and '.'".into(),
        });
    }
    Ok(())
}

impl ContractRequest {
    fn field(&self, name: &str) -> &Option<String> {
        match name {
            "client_full_name" => &self.client_full_name,
            "passport_series" => &self.passport_series,
            "passport_number" => &self.passport_number,
            "passport_full" => &self.passport_full,
            "inn" => &self.inn,
            "client_address" => &self.client_address,
            "bank_name" => &self.bank_name,
            "bank_account" => &self.bank_account,
            "bank_bik" => &self.bank_bik,
            "bank_swift" => &self.bank_swift,
            _ => &self.contract_number,
        }
    }

    /// Checks required fields and maximum lengths (in characters).
    pub fn validate(&self) -> Result<(), DocumentError> {
        for rule in &FIELD_RULES {
            let value = self.field(rule.name);
            match non_empty(value) {
                None if rule.required => {
                    return Err(DocumentError::Validation {
                        field: rule.name,
                        reason: "is required".into(),
                    });
                }
                None => {}
                Some(v) if v.chars().count() > rule.max_len => {
                    return Err(DocumentError::Validation {
                        field: rule.name,
                        reason: format!("must not exceed {} characters", rule.max_len),
                    });
                }
                Some(_) => {}
            }
        }
        if let Some(number) = non_empty(&self.contract_number) {
            validate_contract_number(number)?;
        }
        Ok(())
    }

    /// Fills series and number from `passport_full` when both are empty.
    pub fn normalize_passport(&mut self) {
        if non_empty(&self.passport_series).is_some() || non_empty(&self.passport_number).is_some() {
            return;
        }
        let Some(full) = non_empty(&self.passport_full) else {
            return;
        };
        if let Some((series, number)) = split_passport(full) {
            self.passport_series = Some(series);
            self.passport_number = Some(number);
        }
    }

    /// Identity used to recognise repeat submissions from the same client.
    pub fn fingerprint(&self) -> String {
        let part = |v: &Option<String>| non_empty(v).unwrap_or_default().to_string();
        format!(
            "{}\u{1f}{}\u{1f}{}",
            part(&self.client_full_name),
            part(&self.inn),
            part(&self.passport_full)
        )
    }

    /// Caller-supplied contract number, if any.
    pub fn requested_number(&self) -> Option<&str> {
        non_empty(&self.contract_number)
    }

    /// Sanitised template values, including the assigned number and date.
    ///
    /// Every known field is present; missing optional fields render empty.
    pub fn template_fields(&self, contract_number: &str, contract_date: &str) -> BTreeMap<&'static str, String> {
        let mut fields: BTreeMap<&'static str, String> = FIELD_RULES
            .iter()
            .filter(|rule| rule.name != "contract_number")
            .map(|rule| {
                let raw = self.field(rule.name).as_deref().unwrap_or_default();
                (rule.name, clean_field(raw, rule.render_limit))
            })
            .collect();
        fields.insert("contract_number", clean_field(contract_number, None));
        fields.insert("contract_date", contract_date.to_string());
        fields
    }
}
