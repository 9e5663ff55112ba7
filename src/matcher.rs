use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::keywords::KeywordPattern;
use crate::logging::KEYWORD_MATCH;
use crate::normalize::NormalizedFragment;

/// One fragment matched to the first keyword it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinateResult {
    pub field: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub match_text: String,
}

/// Coordinates recorded under a field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCoordinates {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    #[serde(rename = "matchText")]
    pub match_text: String,
}

impl From<CoordinateResult> for FieldCoordinates {
    fn from(r: CoordinateResult) -> Self {
        FieldCoordinates {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
            match_text: r.match_text,
        }
    }
}

/// Field-keyed results in order of first appearance.
///
/// Inserting a field that is already present replaces its coordinates but
/// keeps its position, so the last match for a field wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoordinateSet {
    fields: IndexMap<String, FieldCoordinates>,
}

impl CoordinateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the coordinates that were replaced.
    pub fn insert(&mut self, result: CoordinateResult) -> Option<FieldCoordinates> {
        let field = result.field.clone();
        let previous = self.fields.insert(field, result.into());
        if let Some(prev) = &previous {
            debug!(target: KEYWORD_MATCH, replaced = %prev.match_text, "field matched again, keeping the later match");
        }
        previous
    }

    pub fn get(&self, field: &str) -> Option<&FieldCoordinates> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldCoordinates)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<CoordinateResult> for CoordinateSet {
    fn from_iter<I: IntoIterator<Item = CoordinateResult>>(iter: I) -> Self {
        let mut set = CoordinateSet::new();
        for result in iter {
            set.insert(result);
        }
        set
    }
}

/// Test every fragment against the keywords in list order. A fragment
/// produces at most one result, for the first keyword its text contains,
/// compared case-insensitively.
pub fn match_keywords(
    fragments: &[NormalizedFragment],
    keywords: &[KeywordPattern],
) -> Vec<CoordinateResult> {
    let needles: Vec<(&KeywordPattern, String)> = keywords
        .iter()
        .filter(|k| k.is_usable())
        .map(|k| (k, k.keyword.to_lowercase()))
        .collect();

    let mut results = Vec::new();
    for fragment in fragments {
        let haystack = fragment.text.to_lowercase();
        let Some((pattern, _)) = needles.iter().find(|(_, needle)| haystack.contains(needle.as_str()))
        else {
            trace!(target: KEYWORD_MATCH, text = %fragment.text, "no keyword");
            continue;
        };

        info!(
            target: KEYWORD_MATCH,
            field = %pattern.field,
            keyword = %pattern.keyword,
            text = %fragment.text,
            "matched"
        );
        results.push(CoordinateResult {
            field: pattern.field.clone(),
            x: fragment.x,
            y: fragment.y,
            width: fragment.width,
            height: fragment.height,
            match_text: fragment.text.clone(),
        });
    }
    results
}
