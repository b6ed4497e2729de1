//! Contract request handling and document rendering.

mod naming;
mod request;
mod sanitize;
mod template;

pub use naming::{contract_date, contract_filename, slugify};
pub use request::{split_passport, validate_contract_number, ContractRequest};
pub use sanitize::{clean_field, limit_chars, strip_tags};
pub use template::{Template, TemplateFormat};
