//! Encodings for a [`CoordinateSet`].

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::logging::OUTPUT;
use crate::matcher::CoordinateSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// `{"coordinates": {...}}`
    #[default]
    Json,
    /// Associative-array literal, without `matchText`
    Array,
}

/// Envelope of the JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatesDocument {
    pub coordinates: CoordinateSet,
}

pub fn to_json(set: &CoordinateSet) -> Result<String> {
    let doc = CoordinatesDocument {
        coordinates: set.clone(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Render the array-literal encoding. With `annotate`, each entry is followed
/// by a `// <matched text>` comment for console display.
pub fn to_array_literal(set: &CoordinateSet, annotate: bool) -> String {
    let mut out = String::from("[\n");
    for (field, c) in set.iter() {
        let _ = write!(
            out,
            "    '{}' => ['x' => {}, 'y' => {}, 'width' => {}, 'height' => {}],",
            escape_single_quoted(field),
            c.x,
            c.y,
            c.width,
            c.height
        );
        if annotate {
            let _ = write!(out, " // {}", c.match_text.replace('\n', " "));
        }
        out.push('\n');
    }
    out.push(']');
    out
}

fn escape_single_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// The encoding as persisted to disk. Never annotated.
pub fn render(set: &CoordinateSet, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(set),
        OutputFormat::Array => Ok(to_array_literal(set, false)),
    }
}

/// The encoding as shown on the console.
pub fn render_for_console(set: &CoordinateSet, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(set),
        OutputFormat::Array => Ok(to_array_literal(set, true)),
    }
}

pub fn write_output(path: &Path, set: &CoordinateSet, format: OutputFormat) -> Result<()> {
    let mut body = render(set, format)?;
    body.push('\n');
    fs::write(path, body).map_err(|source| Error::Output {
        path: path.to_path_buf(),
        source,
    })?;
    info!(target: OUTPUT, path = %path.display(), ?format, fields = set.len(), "wrote coordinates");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{CoordinateResult, FieldCoordinates};
    use pretty_assertions::assert_eq;

    fn sample_set() -> CoordinateSet {
        vec![
            CoordinateResult {
                field: "date_label".to_string(),
                x: 34,
                y: 32,
                width: 40,
                height: 4,
                match_text: "Date: 01/02/2024".to_string(),
            },
            CoordinateResult {
                field: "o'brien".to_string(),
                x: 1,
                y: 2,
                width: 3,
                height: 4,
                match_text: "O'Brien".to_string(),
            },
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn json_envelope_and_keys() {
        let json = to_json(&sample_set()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["coordinates"]["date_label"],
            serde_json::json!({
                "x": 34, "y": 32, "width": 40, "height": 4,
                "matchText": "Date: 01/02/2024"
            })
        );
    }

    #[test]
    fn json_preserves_field_order() {
        let json = to_json(&sample_set()).unwrap();
        let date = json.find("date_label").unwrap();
        let brien = json.find("o'brien").unwrap();
        assert!(date < brien);
    }

    #[test]
    fn json_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.json");
        let set = sample_set();
        write_output(&path, &set, OutputFormat::Json).unwrap();

        let parsed: CoordinatesDocument =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.coordinates, set);
        assert_eq!(
            parsed.coordinates.get("date_label"),
            Some(&FieldCoordinates {
                x: 34,
                y: 32,
                width: 40,
                height: 4,
                match_text: "Date: 01/02/2024".to_string(),
            })
        );
    }

    #[test]
    fn array_literal_omits_match_text() {
        let rendered = render(&sample_set(), OutputFormat::Array).unwrap();
        assert_eq!(
            rendered,
            "[\n    'date_label' => ['x' => 34, 'y' => 32, 'width' => 40, 'height' => 4],\n    'o\\'brien' => ['x' => 1, 'y' => 2, 'width' => 3, 'height' => 4],\n]"
        );
        assert!(!rendered.contains("Date: 01/02/2024"));
    }

    #[test]
    fn console_array_carries_comments() {
        let rendered = render_for_console(&sample_set(), OutputFormat::Array).unwrap();
        assert!(rendered.contains("'height' => 4], // Date: 01/02/2024\n"));
    }

    #[test]
    fn empty_set_renders_empty_containers() {
        let set = CoordinateSet::new();
        assert_eq!(to_array_literal(&set, false), "[\n]");
        let value: serde_json::Value = serde_json::from_str(&to_json(&set).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({ "coordinates": {} }));
    }
}
