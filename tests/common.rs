#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const DATE_KEYWORDS: &str = r#"{"keywords":[{"field":"date_label","keyword":"Date"}]}"#;

pub const INVOICE_KEYWORDS: &str = r#"{
  "keywords": [
    {"field": "date_label", "keyword": "Date"},
    {"field": "invoice_number", "keyword": "Invoice"},
    {"field": "total_amount", "keyword": "Total"}
  ]
}"#;

pub const NO_MATCH_KEYWORDS: &str = r#"{"keywords":[{"field":"iban","keyword":"IBAN"}]}"#;

pub fn write_keywords(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("keywords.json");
    std::fs::write(&path, json).unwrap();
    path
}
