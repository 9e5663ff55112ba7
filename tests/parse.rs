use std::path::Path;
use std::time::Duration;

use lopdf::content::Operation;
use lopdf::{Document, Object};

use pdf_coords::parse::{load_first_page, SourceError};
use pdf_coords::{Error, LopdfTextSource, PageText, PageTextSource, YAxisOrigin};

use crate::setup::{
    build_pdf, build_pdf_with_form, build_pdf_with_operations, text_operations, FormXObject,
    PdfConfig, TextRun,
};

fn first_page(config: &PdfConfig) -> PageText {
    LopdfTextSource.first_page(&build_pdf(config)).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-3,
        "expected {expected}, got {actual}"
    );
}

fn draw_form() -> Vec<Operation> {
    vec![Operation::new("Do", vec!["Fm1".into()])]
}

fn form_page(form: FormXObject) -> PageText {
    let bytes = build_pdf_with_form(&PdfConfig::default(), draw_form(), Some(form));
    LopdfTextSource.first_page(&bytes).unwrap()
}

#[test]
fn test_fixture_builds_single_and_multi_page_documents() {
    let bytes = build_pdf(&PdfConfig::default());
    assert!(bytes.starts_with(b"%PDF-1.5"));
    assert_eq!(Document::load_mem(&bytes).unwrap().get_pages().len(), 1);

    let config = PdfConfig {
        pages: 3,
        ..PdfConfig::default()
    };
    let doc = Document::load_mem(&build_pdf(&config)).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
}

#[test]
fn test_first_page_dimensions_and_origin() {
    let page = first_page(&PdfConfig::default());
    assert_eq!(page.width, 612.0);
    assert_eq!(page.height, 792.0);
    assert_eq!(page.y_origin, YAxisOrigin::Bottom);
    assert_eq!(LopdfTextSource::Y_AXIS_ORIGIN, YAxisOrigin::Bottom);
}

#[test]
fn test_fragments_in_content_order_without_blank_runs() {
    let page = first_page(&PdfConfig::default());
    let texts: Vec<&str> = page.fragments.iter().map(|f| f.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["Invoice #1234", "Date: 01/02/2024", "TOTAL AMOUNT DUE"]
    );
}

#[test]
fn test_raw_position_and_size() {
    let page = first_page(&PdfConfig::default());
    let date = &page.fragments[1];
    assert_close(date.x, 100.0);
    assert_close(date.y, 700.0);
    // 16 glyphs of 600/1000 em at 12pt
    assert_close(date.width, 115.2);
    assert_close(date.height, 12.0);
}

#[test]
fn test_fallback_widths_without_widths_table() {
    let config = PdfConfig {
        runs: vec![TextRun::new("abcd", 10, 10, 10)],
        font_name: "Helvetica".to_string(),
        monospace_widths: false,
        ..PdfConfig::default()
    };
    let page = first_page(&config);
    assert_close(page.fragments[0].width, 4.0 * 0.5 * 10.0);

    let courier = PdfConfig {
        font_name: "Courier-Bold".to_string(),
        ..config
    };
    let page = first_page(&courier);
    assert_close(page.fragments[0].width, 4.0 * 0.6 * 10.0);
}

#[test]
fn test_media_box_inherited_from_pages_node() {
    let config = PdfConfig {
        media_box: [0, 0, 595, 842],
        inherit_media_box: true,
        ..PdfConfig::default()
    };
    let page = first_page(&config);
    assert_eq!((page.width, page.height), (595.0, 842.0));
}

#[test]
fn test_positions_are_relative_to_media_box_corner() {
    let config = PdfConfig {
        media_box: [50, 100, 662, 892],
        ..PdfConfig::default()
    };
    let page = first_page(&config);
    assert_eq!((page.width, page.height), (612.0, 792.0));
    let date = &page.fragments[1];
    assert_close(date.x, 50.0);
    assert_close(date.y, 600.0);
}

#[test]
fn test_only_first_page_is_read() {
    let config = PdfConfig {
        pages: 2,
        ..PdfConfig::default()
    };
    let page = first_page(&config);
    assert!(page.fragments.iter().all(|f| f.text != "Second page Date"));
}

#[test]
fn test_text_matrix_scales_height() {
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 10.into()]),
        Operation::new(
            "Tm",
            vec![2.into(), 0.into(), 0.into(), 2.into(), 50.into(), 60.into()],
        ),
        Operation::new("Tj", vec![Object::string_literal("Scaled")]),
        Operation::new("ET", vec![]),
    ];
    let page = LopdfTextSource
        .first_page(&build_pdf_with_operations(&PdfConfig::default(), ops))
        .unwrap();
    let f = &page.fragments[0];
    assert_close(f.x, 50.0);
    assert_close(f.y, 60.0);
    assert_close(f.height, 20.0);
    assert_close(f.width, 6.0 * 6.0 * 2.0);
}

#[test]
fn test_ctm_translation_and_graphics_state_restore() {
    let ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), 100.into(), 100.into()],
        ),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![10.into(), 10.into()]),
        Operation::new("Tj", vec![Object::string_literal("Shifted")]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![10.into(), 10.into()]),
        Operation::new("Tj", vec![Object::string_literal("Plain")]),
        Operation::new("ET", vec![]),
    ];
    let page = LopdfTextSource
        .first_page(&build_pdf_with_operations(&PdfConfig::default(), ops))
        .unwrap();
    assert_close(page.fragments[0].x, 110.0);
    assert_close(page.fragments[0].y, 110.0);
    assert_close(page.fragments[1].x, 10.0);
    assert_close(page.fragments[1].y, 10.0);
}

#[test]
fn test_tj_array_joins_text_and_applies_kerning() {
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 500.into()]),
        Operation::new(
            "TJ",
            vec![Object::Array(vec![
                Object::string_literal("Da"),
                (-1000).into(),
                Object::string_literal("te"),
            ])],
        ),
        Operation::new("ET", vec![]),
    ];
    let page = LopdfTextSource
        .first_page(&build_pdf_with_operations(&PdfConfig::default(), ops))
        .unwrap();
    let f = &page.fragments[0];
    assert_eq!(f.text, "Date");
    // four glyphs plus a one-em gap at 12pt
    assert_close(f.width, 4.0 * 7.2 + 12.0);
}

#[test]
fn test_next_line_operators_use_leading() {
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("TD", vec![72.into(), (-14).into()]),
        Operation::new("Tj", vec![Object::string_literal("first")]),
        Operation::new("'", vec![Object::string_literal("second")]),
        Operation::new("ET", vec![]),
    ];
    let page = LopdfTextSource
        .first_page(&build_pdf_with_operations(&PdfConfig::default(), ops))
        .unwrap();
    assert_close(page.fragments[0].y, -14.0);
    assert_close(page.fragments[1].x, 72.0);
    assert_close(page.fragments[1].y, -28.0);
}

#[test]
fn test_text_without_font_is_skipped() {
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F9".into(), 12.into()]),
        Operation::new("Tj", vec![Object::string_literal("ghost")]),
        Operation::new("ET", vec![]),
    ];
    let page = LopdfTextSource
        .first_page(&build_pdf_with_operations(&PdfConfig::default(), ops))
        .unwrap();
    assert!(page.fragments.is_empty());
}

#[test]
fn test_document_without_pages() {
    let config = PdfConfig {
        pages: 0,
        ..PdfConfig::default()
    };
    let err = LopdfTextSource.first_page(&build_pdf(&config)).unwrap_err();
    assert!(matches!(err, SourceError::NoPages));
}

#[test]
fn test_degenerate_media_box() {
    let config = PdfConfig {
        media_box: [0, 0, 0, 792],
        ..PdfConfig::default()
    };
    let err = LopdfTextSource.first_page(&build_pdf(&config)).unwrap_err();
    assert!(matches!(err, SourceError::DegeneratePage { .. }));
}

#[tokio::test]
async fn test_load_first_page_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup::write_pdf(dir.path(), "invoice.pdf", &PdfConfig::default());
    let page = load_first_page(LopdfTextSource, &path, None).await.unwrap();
    assert_eq!(page.fragments.len(), 3);
}

#[tokio::test]
async fn test_load_missing_file_is_input_error() {
    let err = load_first_page(LopdfTextSource, Path::new("nonexistent.pdf"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Input { .. }));
    assert!(err.to_string().contains("file not found"));
}

#[tokio::test]
async fn test_load_non_pdf_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.pdf");
    std::fs::write(&path, "plain text, not a PDF").unwrap();
    let err = load_first_page(LopdfTextSource, &path, None).await.unwrap_err();
    assert!(matches!(err, Error::Input { .. }));
}

struct SlowSource;

impl PageTextSource for SlowSource {
    fn first_page(&self, _pdf_bytes: &[u8]) -> Result<PageText, SourceError> {
        std::thread::sleep(Duration::from_millis(500));
        Err(SourceError::NoPages)
    }
}

#[tokio::test]
async fn test_parse_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup::write_pdf(dir.path(), "slow.pdf", &PdfConfig::default());
    let err = load_first_page(SlowSource, &path, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.to_string().ends_with("within 50ms"));
}

#[test]
fn test_text_inside_form_xobject() {
    let form = FormXObject::new(text_operations(&[TextRun::new("Date: 01/02/2024", 100, 700, 12)]));
    let page = form_page(form);

    assert_eq!(page.fragments.len(), 1);
    let f = &page.fragments[0];
    assert_eq!(f.text, "Date: 01/02/2024");
    assert_close(f.x, 100.0);
    assert_close(f.y, 700.0);
    assert_close(f.width, 115.2);
}

#[test]
fn test_form_matrix_applies_and_state_is_restored() {
    let mut ops = draw_form();
    ops.extend(text_operations(&[TextRun::new("After", 10, 10, 12)]));
    let form = FormXObject {
        matrix: Some([1, 0, 0, 1, 50, -100]),
        ..FormXObject::new(text_operations(&[TextRun::new("Inside", 100, 700, 12)]))
    };
    let page = LopdfTextSource
        .first_page(&build_pdf_with_form(&PdfConfig::default(), ops, Some(form)))
        .unwrap();

    assert_eq!(page.fragments[0].text, "Inside");
    assert_close(page.fragments[0].x, 150.0);
    assert_close(page.fragments[0].y, 600.0);
    assert_eq!(page.fragments[1].text, "After");
    assert_close(page.fragments[1].x, 10.0);
    assert_close(page.fragments[1].y, 10.0);
}

#[test]
fn test_form_uses_its_own_font_resources() {
    let ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F2".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 600.into()]),
        Operation::new("Tj", vec![Object::string_literal("Total")]),
        Operation::new("ET", vec![]),
    ];
    let form = FormXObject {
        own_resources: true,
        ..FormXObject::new(ops)
    };
    let page = form_page(form);
    assert_eq!(page.fragments.len(), 1);
    assert_close(page.fragments[0].width, 5.0 * 7.2);
}

#[test]
fn test_self_referencing_form_stops_at_depth_limit() {
    let mut ops = text_operations(&[TextRun::new("Loop", 72, 700, 12)]);
    ops.extend(draw_form());
    let page = form_page(FormXObject::new(ops));
    // one fragment per nesting level before the limit cuts in
    assert_eq!(page.fragments.len(), 16);
}

#[test]
fn test_unknown_xobject_is_ignored() {
    let ops = vec![Operation::new("Do", vec!["Im9".into()])];
    let page = LopdfTextSource
        .first_page(&build_pdf_with_operations(&PdfConfig::default(), ops))
        .unwrap();
    assert!(page.fragments.is_empty());
}
