//! Rescaling of raw page coordinates into template space.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::PDF_PARSING;
use crate::parse::{PageText, TextFragment, YAxisOrigin};

/// Caller-defined target coordinate system, e.g. millimetres on an A4 form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    /// When unset, Y reuses the X scale factor.
    pub height: Option<f64>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        TemplateConfig {
            origin_x: 0.0,
            origin_y: 0.0,
            width: 210.0,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub fn new(template: &TemplateConfig, page_width: f64, page_height: f64) -> Self {
        let x = template.width / page_width;
        let y = match template.height {
            Some(height) => height / page_height,
            None => x,
        };
        Scale { x, y }
    }
}

/// A fragment expressed in template space, rounded to whole units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedFragment {
    pub text: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Map one raw fragment into template space.
///
/// For [`YAxisOrigin::Bottom`] the raw `y` is flipped against the page height
/// so the result is measured from the top edge, like the template.
pub fn normalize_fragment(
    fragment: &TextFragment,
    template: &TemplateConfig,
    scale: Scale,
    page_height: f64,
    y_origin: YAxisOrigin,
) -> NormalizedFragment {
    let from_top = match y_origin {
        YAxisOrigin::Bottom => page_height - fragment.y,
        YAxisOrigin::Top => fragment.y,
    };
    NormalizedFragment {
        text: fragment.text.clone(),
        x: round(template.origin_x + fragment.x * scale.x),
        y: round(template.origin_y + from_top * scale.y),
        width: round(fragment.width * scale.x),
        height: round(fragment.height * scale.y),
    }
}

pub fn normalize_page(page: &PageText, template: &TemplateConfig) -> Vec<NormalizedFragment> {
    let scale = Scale::new(template, page.width, page.height);
    debug!(
        target: PDF_PARSING,
        scale_x = scale.x,
        scale_y = scale.y,
        origin = ?page.y_origin,
        "normalizing {} fragments",
        page.fragments.len()
    );
    page.fragments
        .iter()
        .map(|f| normalize_fragment(f, template, scale, page.height, page.y_origin))
        .collect()
}

/// Round to the nearest integer, halves toward positive infinity.
fn round(v: f64) -> i64 {
    let r = v.round();
    if v - r == 0.5 {
        (r + 1.0) as i64
    } else {
        r as i64
    }
}
