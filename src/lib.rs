pub mod error;
pub mod keywords;
pub mod logging;
pub mod matcher;
pub mod normalize;
pub mod output;
pub mod parse;

use std::path::Path;
use std::time::Duration;

use tracing::info;

pub use crate::error::{Error, Result};
pub use crate::keywords::{KeywordConfig, KeywordPattern};
pub use crate::matcher::{CoordinateResult, CoordinateSet, FieldCoordinates};
pub use crate::normalize::{NormalizedFragment, TemplateConfig};
pub use crate::output::OutputFormat;
pub use crate::parse::{LopdfTextSource, PageText, PageTextSource, TextFragment, YAxisOrigin};

use crate::logging::KEYWORD_MATCH;
use crate::matcher::match_keywords;
use crate::normalize::normalize_page;
use crate::parse::load_first_page;

/// Locate keyword matches on the first page of a PDF and return their
/// template-space coordinates keyed by field.
///
/// # Arguments
/// * `source` - Backend that extracts the page text
/// * `pdf_path` - The PDF to read
/// * `keywords` - Patterns in priority order
/// * `template` - Target coordinate space
/// * `timeout` - Optional deadline for the parse
///
/// # Returns
/// [`Error::EmptyResult`] when nothing matched.
pub async fn extract_coordinates<S>(
    source: S,
    pdf_path: &Path,
    keywords: &[KeywordPattern],
    template: &TemplateConfig,
    timeout: Option<Duration>,
) -> Result<CoordinateSet>
where
    S: PageTextSource + Send + 'static,
{
    let page = load_first_page(source, pdf_path, timeout).await?;
    let fragments = normalize_page(&page, template);
    let set: CoordinateSet = match_keywords(&fragments, keywords).into_iter().collect();

    if set.is_empty() {
        return Err(Error::EmptyResult);
    }
    info!(target: KEYWORD_MATCH, fields = set.len(), "extraction complete");
    Ok(set)
}

/// Every first-page fragment in template space, optionally restricted to
/// those whose text contains `filter` (case-insensitive).
pub async fn scan_fragments<S>(
    source: S,
    pdf_path: &Path,
    template: &TemplateConfig,
    filter: Option<&str>,
    timeout: Option<Duration>,
) -> Result<(PageText, Vec<NormalizedFragment>)>
where
    S: PageTextSource + Send + 'static,
{
    let page = load_first_page(source, pdf_path, timeout).await?;
    let mut fragments = normalize_page(&page, template);

    if let Some(filter) = filter.map(str::to_lowercase) {
        fragments.retain(|f| f.text.to_lowercase().contains(&filter));
    }
    Ok((page, fragments))
}
