use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logging::KEYWORD_LOAD;

/// One `field -> keyword` entry of the keyword file.
///
/// Entries that were not a `{field, keyword}` pair of strings are kept as
/// inert patterns with empty strings, so they occupy their slot in the list
/// but can never match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordPattern {
    pub field: String,
    pub keyword: String,
}

impl KeywordPattern {
    pub fn new(field: impl Into<String>, keyword: impl Into<String>) -> Self {
        KeywordPattern {
            field: field.into(),
            keyword: keyword.into(),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.field.is_empty() && !self.keyword.is_empty()
    }

    fn from_entry(entry: &Value) -> Self {
        let text = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        KeywordPattern {
            field: text("field"),
            keyword: text("keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordConfig {
    pub keywords: Vec<KeywordPattern>,
}

impl KeywordConfig {
    /// Read and parse a keyword file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::configuration(path, "file not found"));
        }
        let raw = fs::read_to_string(path).map_err(|e| Error::configuration(path, e))?;
        let config = Self::from_json(&raw).map_err(|reason| Error::configuration(path, reason))?;

        info!(
            target: KEYWORD_LOAD,
            path = %path.display(),
            count = config.keywords.len(),
            "loaded keyword patterns"
        );
        Ok(config)
    }

    /// Parse the keyword payload. Only the envelope is validated: the
    /// document must be an object whose `keywords` member is an array.
    pub fn from_json(raw: &str) -> std::result::Result<Self, String> {
        let doc: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
        let entries = match doc.get("keywords") {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err("`keywords` is not an array".to_string()),
            None => return Err("missing `keywords` array".to_string()),
        };

        let keywords: Vec<KeywordPattern> = entries.iter().map(KeywordPattern::from_entry).collect();
        for (i, pattern) in keywords.iter().enumerate() {
            if !pattern.is_usable() {
                debug!(target: KEYWORD_LOAD, index = i, "keyword entry is incomplete and will never match");
            }
        }
        Ok(KeywordConfig { keywords })
    }

    /// The configuration written by `keywords --create`.
    pub fn sample() -> Self {
        KeywordConfig {
            keywords: vec![
                KeywordPattern::new("date_label", "Date"),
                KeywordPattern::new("invoice_number", "Invoice"),
                KeywordPattern::new("total_amount", "Total"),
            ],
        }
    }

    /// Write the sample configuration to `path`, replacing any existing file.
    pub fn write_sample(path: &Path) -> Result<()> {
        if path.exists() {
            warn!(target: KEYWORD_LOAD, path = %path.display(), "replacing existing keyword file");
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| Error::Output {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut json = serde_json::to_string_pretty(&Self::sample())?;
        json.push('\n');
        fs::write(path, json).map_err(|source| Error::Output {
            path: path.to_path_buf(),
            source,
        })?;

        info!(target: KEYWORD_LOAD, path = %path.display(), "wrote sample keyword file");
        Ok(())
    }
}
