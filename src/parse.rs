//! First-page text extraction.
//!
//! [`PageTextSource`] is the seam between the pipeline and whatever decodes
//! the PDF. The bundled [`LopdfTextSource`] lets `lopdf` handle the file
//! structure, stream filters and font encodings, and walks the page's content
//! stream text operators to place each text run on the page.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, Stream};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::logging::PDF_PARSING;

/// US Letter, used when a page carries no MediaBox anywhere in its tree.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];
const MAX_INHERITANCE_DEPTH: usize = 32;
/// Nesting limit for Form XObjects drawing other forms.
const MAX_FORM_DEPTH: usize = 16;

type Matrix = [f64; 6];
const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Where a backend measures `y` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum YAxisOrigin {
    Top,
    Bottom,
}

/// One run of text with its raw page-space position and size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFragment {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl TextFragment {
    /// Build a fragment from untrimmed text. Returns `None` when nothing but
    /// whitespace is left.
    pub fn new(text: &str, x: f64, y: f64, width: f64, height: f64) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(TextFragment {
            text: text.to_string(),
            x,
            y,
            width,
            height,
        })
    }
}

impl fmt::Display for TextFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" at ({:.2}, {:.2}) {:.2}x{:.2}",
            self.text, self.x, self.y, self.width, self.height
        )
    }
}

/// The fragments of one page plus the page's raw dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageText {
    pub width: f64,
    pub height: f64,
    pub y_origin: YAxisOrigin,
    pub fragments: Vec<TextFragment>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not a readable PDF: {0}")]
    Malformed(String),

    #[error("document has no pages")]
    NoPages,

    #[error("page has degenerate dimensions {width}x{height}")]
    DegeneratePage { width: f64, height: f64 },

    #[error("failed to decode page content: {0}")]
    Content(String),
}

/// Anything that can turn PDF bytes into first-page fragments.
pub trait PageTextSource {
    fn first_page(&self, pdf_bytes: &[u8]) -> std::result::Result<PageText, SourceError>;
}

/// Read `path` and extract its first page with `source`.
///
/// The file read is async; parsing runs on the blocking pool. With a
/// `timeout`, a parse that has not finished in time is abandoned and
/// reported as [`Error::Timeout`].
pub async fn load_first_page<S>(source: S, path: &Path, timeout: Option<Duration>) -> Result<PageText>
where
    S: PageTextSource + Send + 'static,
{
    if !path.exists() {
        return Err(Error::input(path, "file not found"));
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::input(path, e))?;
    debug!(target: PDF_PARSING, path = %path.display(), bytes = bytes.len(), "read PDF");

    let task = tokio::task::spawn_blocking(move || source.first_page(&bytes));
    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => task.await,
    };
    let page = joined
        .map_err(|e| Error::input(path, format!("parser task failed: {e}")))?
        .map_err(|e| Error::input(path, e))?;

    info!(
        target: PDF_PARSING,
        path = %path.display(),
        width = page.width,
        height = page.height,
        fragments = page.fragments.len(),
        "extracted first page"
    );
    Ok(page)
}

/// `lopdf`-backed source. Coordinates stay in PDF user space: `y` is the
/// baseline measured up from the bottom edge of the MediaBox.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfTextSource;

impl LopdfTextSource {
    pub const Y_AXIS_ORIGIN: YAxisOrigin = YAxisOrigin::Bottom;
}

impl PageTextSource for LopdfTextSource {
    fn first_page(&self, pdf_bytes: &[u8]) -> std::result::Result<PageText, SourceError> {
        let doc = Document::load_mem(pdf_bytes).map_err(|e| SourceError::Malformed(e.to_string()))?;
        let (page_number, page_id) = doc
            .get_pages()
            .into_iter()
            .next()
            .ok_or(SourceError::NoPages)?;
        debug!(target: PDF_PARSING, page_number, ?page_id, "reading first page");
        get_page_text(&doc, page_id)
    }
}

fn get_page_text(doc: &Document, page_id: ObjectId) -> std::result::Result<PageText, SourceError> {
    let media_box = page_media_box(doc, page_id).unwrap_or(DEFAULT_MEDIA_BOX);
    let width = media_box[2] - media_box[0];
    let height = media_box[3] - media_box[1];
    if width <= 0.0 || height <= 0.0 {
        return Err(SourceError::DegeneratePage { width, height });
    }

    let content = doc
        .get_and_decode_page_content(page_id)
        .map_err(|e| SourceError::Content(e.to_string()))?;
    let scope = ResourceScope::for_page(doc, page_id);

    let mut interpreter = PageInterpreter::new(doc, (media_box[0], media_box[1]));
    interpreter.run(&content.operations, &scope, 0);

    Ok(PageText {
        width,
        height,
        y_origin: LopdfTextSource::Y_AXIS_ORIGIN,
        fragments: interpreter.fragments,
    })
}

fn resolve<'d>(doc: &'d Document, obj: &'d Object) -> &'d Object {
    doc.dereference(obj).map(|(_, o)| o).unwrap_or(obj)
}

/// Look `key` up on the page, then on its ancestors in the page tree.
fn inherited_attribute<'d>(doc: &'d Document, page_id: ObjectId, key: &[u8]) -> Option<&'d Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(obj) = dict.get(key) {
            return Some(obj);
        }
        let parent = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn page_media_box(doc: &Document, page_id: ObjectId) -> Option<[f64; 4]> {
    rect_from_object(doc, inherited_attribute(doc, page_id, b"MediaBox")?)
}

fn rect_from_object(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let arr = resolve(doc, obj).as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut r = [0.0; 4];
    for (slot, value) in r.iter_mut().zip(arr) {
        *slot = resolve(doc, value).as_float().ok()? as f64;
    }
    Some([r[0].min(r[2]), r[1].min(r[3]), r[0].max(r[2]), r[1].max(r[3])])
}

struct PageFont<'a> {
    encoding: Encoding<'a>,
    widths: GlyphWidths,
}

/// Fonts and XObjects visible to one content stream.
struct ResourceScope<'a> {
    fonts: BTreeMap<Vec<u8>, PageFont<'a>>,
    xobjects: Option<&'a Dictionary>,
}

impl<'a> ResourceScope<'a> {
    fn for_page(doc: &'a Document, page_id: ObjectId) -> Self {
        let fonts = match doc.get_page_fonts(page_id) {
            Ok(fonts) => load_fonts(doc, fonts),
            Err(e) => {
                warn!(target: PDF_PARSING, "failed to read page fonts: {e}");
                BTreeMap::new()
            }
        };
        let xobjects = inherited_attribute(doc, page_id, b"Resources")
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .and_then(|resources| sub_dictionary(doc, resources, b"XObject"));
        ResourceScope { fonts, xobjects }
    }

    /// Scope of a Form XObject with its own `/Resources`.
    fn for_form(doc: &'a Document, resources: &'a Dictionary) -> Self {
        let fonts = sub_dictionary(doc, resources, b"Font")
            .map(|fonts| {
                fonts
                    .iter()
                    .filter_map(|(name, o)| Some((name.clone(), resolve(doc, o).as_dict().ok()?)))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();
        ResourceScope {
            fonts: load_fonts(doc, fonts),
            xobjects: sub_dictionary(doc, resources, b"XObject"),
        }
    }
}

fn sub_dictionary<'d>(doc: &'d Document, dict: &'d Dictionary, key: &[u8]) -> Option<&'d Dictionary> {
    dict.get(key).ok().and_then(|o| resolve(doc, o).as_dict().ok())
}

fn load_fonts<'a>(doc: &'a Document, fonts: BTreeMap<Vec<u8>, &'a Dictionary>) -> BTreeMap<Vec<u8>, PageFont<'a>> {
    let mut loaded = BTreeMap::new();
    for (name, dict) in fonts {
        match dict.get_font_encoding(doc) {
            Ok(encoding) => {
                let widths = GlyphWidths::from_font(doc, dict);
                loaded.insert(name, PageFont { encoding, widths });
            }
            Err(e) => warn!(
                target: PDF_PARSING,
                font = %String::from_utf8_lossy(&name),
                "skipping font with unsupported encoding: {e}"
            ),
        }
    }
    loaded
}

/// Glyph advances in thousandths of text space units.
#[derive(Debug, Clone, PartialEq)]
struct GlyphWidths {
    first_char: i64,
    widths: Vec<f64>,
    missing: f64,
    bytes_per_code: usize,
}

impl GlyphWidths {
    fn from_font(doc: &Document, font: &Dictionary) -> Self {
        let number = |dict: &Dictionary, key: &[u8]| {
            dict.get(key)
                .ok()
                .and_then(|o| resolve(doc, o).as_float().ok())
                .map(f64::from)
        };

        let subtype = font.get(b"Subtype").and_then(Object::as_name).unwrap_or_default();
        if subtype == b"Type0" {
            let default_width = font
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .and_then(|fonts| fonts.first())
                .and_then(|o| resolve(doc, o).as_dict().ok())
                .and_then(|descendant| number(descendant, b"DW"))
                .unwrap_or(1000.0);
            return GlyphWidths {
                first_char: 0,
                widths: Vec::new(),
                missing: default_width,
                bytes_per_code: 2,
            };
        }

        let base_font = font.get(b"BaseFont").and_then(Object::as_name).unwrap_or_default();
        let fallback = if String::from_utf8_lossy(base_font).contains("Courier") {
            600.0
        } else {
            500.0
        };
        let missing = font
            .get(b"FontDescriptor")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .and_then(|descriptor| number(descriptor, b"MissingWidth"))
            .unwrap_or(fallback);
        let widths = font
            .get(b"Widths")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .map(|arr| {
                arr.iter()
                    .map(|w| resolve(doc, w).as_float().map(f64::from).unwrap_or(missing))
                    .collect()
            })
            .unwrap_or_default();

        GlyphWidths {
            first_char: font.get(b"FirstChar").and_then(Object::as_i64).unwrap_or(0),
            widths,
            missing,
            bytes_per_code: 1,
        }
    }

    fn advance(&self, code: u32) -> f64 {
        usize::try_from(i64::from(code) - self.first_char)
            .ok()
            .and_then(|idx| self.widths.get(idx))
            .copied()
            .unwrap_or(self.missing)
    }

    fn codes<'b>(&self, bytes: &'b [u8]) -> impl Iterator<Item = u32> + 'b {
        bytes.chunks(self.bytes_per_code).map(|chunk| {
            chunk.iter().fold(0u32, |code, b| (code << 8) | u32::from(*b))
        })
    }
}

/// Text state parameters. They belong to the graphics state, so `q`/`Q`
/// save and restore them together with the CTM.
#[derive(Clone, Debug)]
struct TextState {
    font: Option<Vec<u8>>,
    font_size: f64,
    character_spacing: f64,  // Tc
    word_spacing: f64,       // Tw
    horizontal_scaling: f64, // Tz, as a fraction
    leading: f64,            // TL
    rise: f64,               // Ts
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            font: None,
            font_size: 0.0,
            character_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
struct GraphicsState {
    ctm: Matrix,
    text_state: TextState,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: IDENTITY,
            text_state: TextState::default(),
        }
    }
}

struct PageInterpreter<'a> {
    doc: &'a Document,
    current: GraphicsState,
    saved: Vec<GraphicsState>,
    text_matrix: Matrix,      // Tm
    text_line_matrix: Matrix, // Tlm
    page_origin: (f64, f64),
    fragments: Vec<TextFragment>,
}

impl<'a> PageInterpreter<'a> {
    fn new(doc: &'a Document, page_origin: (f64, f64)) -> Self {
        PageInterpreter {
            doc,
            current: GraphicsState::default(),
            saved: Vec::new(),
            text_matrix: IDENTITY,
            text_line_matrix: IDENTITY,
            page_origin,
            fragments: Vec::new(),
        }
    }

    fn run(&mut self, operations: &[Operation], scope: &ResourceScope<'a>, depth: usize) {
        for op in operations {
            self.handle_operator(op, scope, depth);
        }
    }

    fn handle_operator(&mut self, op: &Operation, scope: &ResourceScope<'a>, depth: usize) {
        let operands = &op.operands;
        let ts = &mut self.current.text_state;

        match op.operator.as_ref() {
            "q" => self.saved.push(self.current.clone()),
            "Q" => {
                if let Some(gs) = self.saved.pop() {
                    self.current = gs;
                }
            }
            "cm" => {
                if let Some(m) = matrix_from_operands(operands) {
                    self.current.ctm = multiply_matrices(&m, &self.current.ctm);
                }
            }
            "BT" => {
                self.text_matrix = IDENTITY;
                self.text_line_matrix = IDENTITY;
            }
            "ET" => {}
            "Tf" => {
                if let (Some(Object::Name(name)), Some(size)) = (operands.first(), operands.get(1)) {
                    ts.font = Some(name.clone());
                    ts.font_size = operand_as_float(size);
                }
            }
            "Tc" => {
                if let Some(v) = operands.first() {
                    ts.character_spacing = operand_as_float(v);
                }
            }
            "Tw" => {
                if let Some(v) = operands.first() {
                    ts.word_spacing = operand_as_float(v);
                }
            }
            "Tz" => {
                if let Some(v) = operands.first() {
                    ts.horizontal_scaling = operand_as_float(v) / 100.0;
                }
            }
            "TL" => {
                if let Some(v) = operands.first() {
                    ts.leading = operand_as_float(v);
                }
            }
            "Ts" => {
                if let Some(v) = operands.first() {
                    ts.rise = operand_as_float(v);
                }
            }
            "Tm" => {
                if let Some(m) = matrix_from_operands(operands) {
                    self.text_matrix = m;
                    self.text_line_matrix = m;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (operands.first(), operands.get(1)) {
                    let (tx, ty) = (operand_as_float(tx), operand_as_float(ty));
                    if op.operator == "TD" {
                        ts.leading = -ty;
                    }
                    self.move_to_next_line(tx, ty);
                }
            }
            "T*" => {
                let leading = ts.leading;
                self.move_to_next_line(0.0, -leading);
            }
            "Tj" | "TJ" => {
                if let Some(operand) = operands.first() {
                    self.show_text(operand, scope);
                }
            }
            "'" => {
                let leading = ts.leading;
                self.move_to_next_line(0.0, -leading);
                if let Some(operand) = operands.first() {
                    self.show_text(operand, scope);
                }
            }
            "\"" => {
                if let (Some(aw), Some(ac), Some(text)) =
                    (operands.first(), operands.get(1), operands.get(2))
                {
                    ts.word_spacing = operand_as_float(aw);
                    ts.character_spacing = operand_as_float(ac);
                    let leading = ts.leading;
                    self.move_to_next_line(0.0, -leading);
                    self.show_text(text, scope);
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.draw_xobject(name, scope, depth);
                }
            }
            _ => {}
        }
    }

    fn move_to_next_line(&mut self, tx: f64, ty: f64) {
        self.text_line_matrix = multiply_matrices(&translate_matrix(tx, ty), &self.text_line_matrix);
        self.text_matrix = self.text_line_matrix;
    }

    /// Run a Form XObject's content stream in place of `Do`. Image and other
    /// XObjects carry no text and are skipped.
    fn draw_xobject(&mut self, name: &[u8], scope: &ResourceScope<'a>, depth: usize) {
        let doc = self.doc;
        let name_text = String::from_utf8_lossy(name);
        if depth >= MAX_FORM_DEPTH {
            warn!(target: PDF_PARSING, xobject = %name_text, "form nesting too deep, skipping");
            return;
        }
        let Some(stream) = scope
            .xobjects
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|o| resolve(doc, o).as_stream().ok())
        else {
            debug!(target: PDF_PARSING, xobject = %name_text, "XObject not found in resources");
            return;
        };
        if stream.dict.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Form".as_slice()) {
            return;
        }

        let content = match stream_content(stream).and_then(|bytes| Content::decode(&bytes)) {
            Ok(content) => content,
            Err(e) => {
                warn!(target: PDF_PARSING, xobject = %name_text, "failed to decode form content: {e}");
                return;
            }
        };
        let form_scope = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .map(|resources| ResourceScope::for_form(doc, resources));

        // A form runs inside an implicit q/Q and sees a fresh text object.
        let saved_state = self.current.clone();
        let saved_depth = self.saved.len();
        let saved_matrices = (self.text_matrix, self.text_line_matrix);

        if let Some(matrix) = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .and_then(|arr| matrix_from_operands(arr))
        {
            self.current.ctm = multiply_matrices(&matrix, &self.current.ctm);
        }
        trace!(target: PDF_PARSING, xobject = %name_text, depth, "entering form");
        self.run(&content.operations, form_scope.as_ref().unwrap_or(scope), depth + 1);

        self.current = saved_state;
        self.saved.truncate(saved_depth);
        (self.text_matrix, self.text_line_matrix) = saved_matrices;
    }

    /// Show a string (`Tj`) or an array of strings and kerning offsets (`TJ`)
    /// and record the run as one fragment.
    fn show_text(&mut self, operand: &Object, scope: &ResourceScope<'a>) {
        let Some(font) = self
            .current
            .text_state
            .font
            .as_ref()
            .and_then(|name| scope.fonts.get(name))
        else {
            trace!(target: PDF_PARSING, "text shown without a usable font");
            return;
        };

        let ts = &self.current.text_state;
        let ctm = self.current.ctm;
        let start = multiply_matrices(&self.text_matrix, &ctm);
        let mut text = String::new();

        let parts: &[Object] = match operand {
            Object::Array(items) => items,
            single => std::slice::from_ref(single),
        };
        for part in parts {
            match part {
                Object::String(bytes, _) => {
                    match Document::decode_text(&font.encoding, bytes) {
                        Ok(decoded) => text.push_str(&decoded),
                        Err(e) => warn!(target: PDF_PARSING, "failed to decode text: {e}"),
                    }
                    let mut advance = 0.0;
                    for code in font.widths.codes(bytes) {
                        advance += font.widths.advance(code) / 1000.0 * ts.font_size
                            + ts.character_spacing;
                        if font.widths.bytes_per_code == 1 && code == 32 {
                            advance += ts.word_spacing;
                        }
                    }
                    self.text_matrix = multiply_matrices(
                        &translate_matrix(advance * ts.horizontal_scaling, 0.0),
                        &self.text_matrix,
                    );
                }
                Object::Integer(_) | Object::Real(_) => {
                    let offset = -operand_as_float(part) / 1000.0 * ts.font_size;
                    self.text_matrix = multiply_matrices(
                        &translate_matrix(offset * ts.horizontal_scaling, 0.0),
                        &self.text_matrix,
                    );
                }
                _ => {}
            }
        }

        let end = multiply_matrices(&self.text_matrix, &ctm);
        let (x0, y0) = transform_point(&start, 0.0, ts.rise);
        let (x1, y1) = transform_point(&end, 0.0, ts.rise);
        let width = (x1 - x0).hypot(y1 - y0);
        let height = ts.font_size * start[2].hypot(start[3]);

        let fragment = TextFragment::new(
            &text,
            x0 - self.page_origin.0,
            y0 - self.page_origin.1,
            width,
            height.abs(),
        );
        if let Some(fragment) = fragment {
            trace!(target: PDF_PARSING, "{fragment}");
            self.fragments.push(fragment);
        }
    }
}

fn stream_content(stream: &Stream) -> lopdf::Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content()
    } else {
        Ok(stream.content.clone())
    }
}

fn operand_as_float(obj: &Object) -> f64 {
    match obj {
        Object::Integer(i) => *i as f64,
        Object::Real(f) => f64::from(*f),
        _ => 0.0,
    }
}

fn matrix_from_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() != 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (slot, obj) in m.iter_mut().zip(operands) {
        *slot = operand_as_float(obj);
    }
    Some(m)
}

/// `a × b` for PDF's row-vector affine matrices `[a b c d e f]`.
pub fn multiply_matrices(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

pub fn translate_matrix(x: f64, y: f64) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, x, y]
}

fn transform_point(m: &Matrix, x: f64, y: f64) -> (f64, f64) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}
