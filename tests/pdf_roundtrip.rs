use std::fs;
use std::path::{Path, PathBuf};

use ebook_press::base_system::context::Config;
use ebook_press::book_parser::merger::MergePolicy;
use ebook_press::book_parser::{
    EbookGenerator, GenerationReport, GeneratorError, OutputFormat, PdfBook,
};
use lopdf::content::Content;
use lopdf::{Document, Object};

fn load(path: &Path) -> Document {
    Document::load_mem(&fs::read(path).unwrap()).unwrap()
}

/// Every string shown with `Tj`, page by page.
fn page_texts(doc: &Document) -> Vec<Vec<String>> {
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let data = doc.get_page_content(page_id).unwrap();
            Content::decode(&data)
                .unwrap()
                .operations
                .into_iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| match op.operands.first() {
                    Some(Object::String(bytes, _)) => {
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                    _ => None,
                })
                .collect()
        })
        .collect()
}

fn chapter_titles(doc: &Document) -> Vec<String> {
    page_texts(doc)
        .into_iter()
        .flatten()
        .filter(|t| t.starts_with("Chapter "))
        .collect()
}

fn run_book(
    dir: &Path,
    pages_per_file: usize,
    merge: bool,
    policy: MergePolicy,
) -> Result<GenerationReport, GeneratorError> {
    let mut book = PdfBook::new(dir);
    book.set_title("Roundtrip");
    book.configure_split(pages_per_file, 0);
    book.configure_merge(merge, policy);
    book.begin()?;
    let paragraph = "<p>The quick brown fox jumps over the lazy dog.</p>".repeat(30);
    for i in 1..=12 {
        book.append_chapter(&format!("Chapter {i:02}"), "", &paragraph)?;
    }
    book.end()
}

fn write_book(dir: &Path, pages_per_file: usize, merge: bool) -> GenerationReport {
    run_book(dir, pages_per_file, merge, MergePolicy::Strict).unwrap()
}

fn part(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("Roundtrip_a4({index:04}).pdf"))
}

#[test]
fn single_file_has_one_page_per_laid_out_page() {
    let dir = tempfile::tempdir().unwrap();
    let report = write_book(dir.path(), 0, false);

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.chapters, 12);
    let doc = load(&report.files[0]);
    assert_eq!(doc.get_pages().len(), report.pages);
    assert!(report.pages > 3);

    let expected: Vec<String> = (1..=12).map(|i| format!("Chapter {i:02}")).collect();
    assert_eq!(chapter_titles(&doc), expected);
}

#[test]
fn split_parts_merge_back_into_the_same_pages() {
    let unsplit_dir = tempfile::tempdir().unwrap();
    let unsplit = write_book(unsplit_dir.path(), 0, false);
    let unsplit_doc = load(&unsplit.files[0]);

    let dir = tempfile::tempdir().unwrap();
    let report = write_book(dir.path(), 3, true);
    let merge = report.merge.as_ref().expect("merge report");
    assert!(merge.merged.len() > 1);
    assert!(merge.skipped.is_empty());
    assert_eq!(report.files, vec![merge.target.clone()]);
    assert_eq!(merge.target, dir.path().join("Roundtrip_a4.pdf"));

    let merged = load(&merge.target);
    assert_eq!(merged.get_pages().len(), unsplit_doc.get_pages().len());
    assert_eq!(page_texts(&merged), page_texts(&unsplit_doc));

    for part in &merge.merged {
        assert!(!part.exists(), "{} should be removed", part.display());
    }
}

#[test]
fn split_without_merge_keeps_numbered_parts() {
    let dir = tempfile::tempdir().unwrap();
    let report = write_book(dir.path(), 3, false);

    assert!(report.merge.is_none());
    assert!(report.files.len() > 1);
    let mut total = 0;
    for (idx, file) in report.files.iter().enumerate() {
        let expected: PathBuf = dir.path().join(format!("Roundtrip_a4({:04}).pdf", idx + 1));
        assert_eq!(file, &expected);
        let pages = load(file).get_pages().len();
        assert!(pages <= 3);
        total += pages;
    }
    assert_eq!(total, report.pages);
}

#[test]
fn page_numbers_are_drawn_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let report = write_book(dir.path(), 0, false);
    let doc = load(&report.files[0]);

    let numbers: Vec<String> = page_texts(&doc)
        .into_iter()
        .map(|texts| texts.last().cloned().unwrap_or_default())
        .collect();
    let expected: Vec<String> = (1..=report.pages).map(|n| n.to_string()).collect();
    assert_eq!(numbers, expected);
}

#[test]
fn builtin_font_raises_a_too_small_line_spacing() {
    let dir = tempfile::tempdir().unwrap();
    let mut book = PdfBook::new(dir.path());
    let adjustment = book.configure_line_spacing(0.5).unwrap();
    assert!(adjustment.raised());
    assert_eq!(adjustment.requested, 0.5);
    assert!((book.font_spec().line_spacing - adjustment.minimum).abs() < 1e-6);

    // A generous request is kept as is
    let kept = book.configure_line_spacing(1.5).unwrap();
    assert!(!kept.raised());
    assert_eq!(book.font_spec().line_spacing, 1.5);
}

#[test]
fn invalid_settings_are_rejected_before_generation() {
    let dir = tempfile::tempdir().unwrap();
    let mut book = PdfBook::new(dir.path());
    assert!(book.configure_font_size(0, 12).is_err());
    assert!(book.configure_line_spacing(f32::NAN).is_err());
    assert!(book.configure_margins(400.0, 10.0).is_err());
    assert!(book.append_chapter("x", "", "y").is_err());
    assert!(book.end().is_err());
}

#[test]
fn generator_from_config_writes_epub_or_pdf() {
    let dir = tempfile::tempdir().unwrap();
    for (format, ext) in [("pdf", "pdf"), ("epub", "epub")] {
        let config = Config {
            format: format.to_string(),
            save_path: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let mut generator = EbookGenerator::from_config(&config).unwrap();
        assert_eq!(generator.format(), format.parse::<OutputFormat>().unwrap());
        generator.set_title("配置");
        generator.begin().unwrap();
        generator.append_chapter("第一章", "", "<p>正文</p>").unwrap();
        let report = generator.end().unwrap();

        assert_eq!(report.files.len(), 1);
        let file = &report.files[0];
        assert!(file.starts_with(dir.path()));
        assert_eq!(file.extension().and_then(|e| e.to_str()), Some(ext));
        assert!(fs::metadata(file).unwrap().len() > 0);
    }
}

#[test]
fn leftover_parts_from_an_earlier_run_are_not_merged() {
    let unsplit_dir = tempfile::tempdir().unwrap();
    let unsplit = write_book(unsplit_dir.path(), 0, false);

    let dir = tempfile::tempdir().unwrap();
    let earlier = write_book(dir.path(), 1, false);
    let report = write_book(dir.path(), 3, true);
    let merge = report.merge.as_ref().unwrap();
    assert!(earlier.files.len() > merge.merged.len());

    let merged = load(&merge.target);
    assert_eq!(merged.get_pages().len(), unsplit.pages);
    assert_eq!(merge.pages, unsplit.pages);
    for stale in &earlier.files[merge.merged.len()..] {
        assert!(stale.exists(), "{} is not ours to merge", stale.display());
    }
}

#[test]
fn strict_merge_refuses_when_a_part_was_not_written() {
    let dir = tempfile::tempdir().unwrap();
    // a directory where the second part should go makes that write fail
    fs::create_dir(part(dir.path(), 2)).unwrap();

    let err = run_book(dir.path(), 3, true, MergePolicy::Strict).unwrap_err();
    assert!(matches!(err, GeneratorError::Merge { .. }), "{err}");
    assert!(!dir.path().join("Roundtrip_a4.pdf").exists());
    assert!(part(dir.path(), 1).is_file());
    assert!(part(dir.path(), 3).is_file());
}

#[test]
fn lossy_merge_skips_a_part_that_was_not_written() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(part(dir.path(), 2)).unwrap();

    let report = run_book(dir.path(), 3, true, MergePolicy::Lossy).unwrap();
    assert_eq!(report.failed_parts, vec![part(dir.path(), 2)]);
    let merge = report.merge.as_ref().unwrap();
    assert_eq!(merge.skipped, vec![part(dir.path(), 2)]);
    assert!(!merge.merged.contains(&part(dir.path(), 2)));

    let merged = load(&merge.target);
    assert_eq!(merged.get_pages().len(), report.pages - 3);
    assert_eq!(merge.pages, report.pages - 3);
}
