mod common;

use common::{Monospace, RecordingSink, engine, engine_with, html, naming, small_geometry};
use ebook_press::book_parser::error::GeneratorError;
use ebook_press::book_parser::font::{TextMeasurer, reconcile_line_spacing};
use ebook_press::book_parser::geometry::PageGeometry;
use ebook_press::book_parser::layout::{DocumentInfo, LayoutSettings, PaginationEngine, RunRole};
use ebook_press::book_parser::splitter::{FileSplitter, SplitPolicy};

/// 16 characters plus the two-character indent: exactly one full line.
const FULL_LINE: &str = "xxxxxxxxxxxxxxxx";

fn long_chapter(lines: usize) -> String {
    html(&vec![FULL_LINE; lines])
}

#[test]
fn title_and_indented_paragraphs_share_one_page() {
    let mut e = engine_with(
        PageGeometry::default(),
        SplitPolicy::default(),
        RecordingSink::default(),
        false,
    );
    e.begin().unwrap();
    e.append_chapter("T", "https://example.com/t", "<p>A</p><p>B</p>").unwrap();
    let summary = e.end().unwrap();

    assert_eq!(summary.pages, 1);
    let sink = e.into_sink();
    assert_eq!(sink.files.len(), 1);
    assert_eq!(sink.files[0].pages.len(), 1);
    let texts: Vec<&str> = sink.files[0].pages[0]
        .iter()
        .filter(|r| r.role != RunRole::PageNumber)
        .map(|r| r.text.as_str())
        .collect();
    assert_eq!(texts, vec!["T", "　　A", "　　B"]);
}

#[test]
fn seven_chapters_at_three_per_file_split_three_three_one() {
    let mut e = engine(SplitPolicy::new(0, 3));
    e.begin().unwrap();
    for i in 1..=7 {
        e.append_chapter(&format!("c{i}"), "", "<p>x</p>").unwrap();
    }
    let summary = e.end().unwrap();

    let n = naming();
    assert_eq!(summary.files, vec![n.part_path(1), n.part_path(2), n.part_path(3)]);
    let sink = e.into_sink();
    let per_file: Vec<Vec<String>> = sink.files.iter().map(|f| f.titles()).collect();
    assert_eq!(
        per_file,
        vec![
            vec!["c1", "c2", "c3"],
            vec!["c4", "c5", "c6"],
            vec!["c7"],
        ]
    );
}

#[test]
fn zero_thresholds_never_split() {
    let mut e = engine(SplitPolicy::default());
    e.begin().unwrap();
    for i in 0..50 {
        e.append_chapter(&format!("c{i}"), "", &long_chapter(5)).unwrap();
    }
    let summary = e.end().unwrap();
    assert_eq!(summary.files, vec![naming().final_path()]);
    assert!(summary.pages > 1);
    assert_eq!(e.into_sink().files.len(), 1);
}

#[test]
fn long_chapter_breaks_exactly_as_often_as_needed() {
    // 120pt box: title 20 + 10 lines, then 12 lines, then the last 8
    let mut e = engine(SplitPolicy::default());
    e.begin().unwrap();
    e.append_chapter("long", "", &long_chapter(30)).unwrap();
    let summary = e.end().unwrap();
    assert_eq!(summary.pages, 3);

    let sink = e.into_sink();
    let pages = &sink.files[0].pages;
    let content_per_page: Vec<usize> = pages
        .iter()
        .map(|p| p.iter().filter(|r| r.role == RunRole::Content).count())
        .collect();
    assert_eq!(content_per_page, vec![10, 12, 8]);

    let numbers: Vec<String> = sink.files[0]
        .runs(RunRole::PageNumber)
        .map(|r| r.text.clone())
        .collect();
    assert_eq!(numbers, vec!["1", "2", "3"]);
}

#[test]
fn page_numbers_continue_across_split_files() {
    let mut e = engine(SplitPolicy::new(2, 0));
    e.begin().unwrap();
    e.append_chapter("long", "", &long_chapter(60)).unwrap();
    e.end().unwrap();

    let sink = e.into_sink();
    let numbers: Vec<usize> = sink
        .all_runs()
        .filter(|r| r.role == RunRole::PageNumber)
        .map(|r| r.text.parse().unwrap())
        .collect();
    let expected: Vec<usize> = (1..=numbers.len()).collect();
    assert_eq!(numbers, expected);
    for file in &sink.files[..sink.files.len() - 1] {
        assert_eq!(file.pages.len(), 2);
    }
}

#[test]
fn lines_never_exceed_the_content_width() {
    let paragraphs = [
        "short",
        "a paragraph long enough to wrap across several lines of the box",
        "中文段落也需要正确换行，每一行都不能超过版心宽度。",
        "mixed 中英 text with 全角，标点 and ascii",
        "",
    ];
    let mut e = engine(SplitPolicy::default());
    e.begin().unwrap();
    e.append_chapter("wrap", "", &html(&paragraphs)).unwrap();
    e.end().unwrap();

    let width = small_geometry().content_width();
    let sink = e.into_sink();
    let mut lines = 0;
    for run in sink.all_runs().filter(|r| r.role == RunRole::Content) {
        lines += 1;
        let measured = Monospace.text_width(&run.text, run.size);
        assert!(
            measured <= width || run.text.chars().count() == 1,
            "line {:?} is {measured} wide",
            run.text
        );
    }
    assert!(lines > paragraphs.len());
}

#[test]
fn character_wider_than_the_box_gets_its_own_line() {
    let geometry = PageGeometry::new(25.0, 200.0, 10.0, 10.0).unwrap();
    let mut e = engine_with(geometry, SplitPolicy::default(), RecordingSink::default(), false);
    e.begin().unwrap();
    e.append_chapter("t", "", "<p>ab</p>").unwrap();
    e.end().unwrap();

    let sink = e.into_sink();
    let lines: Vec<&str> = sink
        .all_runs()
        .filter(|r| r.role == RunRole::Content)
        .map(|r| r.text.as_str())
        .collect();
    assert_eq!(lines, vec!["　", "　", "a", "b"]);
}

#[test]
fn nothing_is_drawn_below_the_content_box() {
    let geometry = small_geometry();
    let bottom = geometry.top_margin + geometry.content_height();
    let mut e = engine(SplitPolicy::new(3, 2));
    e.begin().unwrap();
    for i in 0..9 {
        e.append_chapter(&format!("chapter {i}"), "", &long_chapter(i * 3 + 1)).unwrap();
        assert!(e.cursor().offset() <= e.cursor().limit());
    }
    e.end().unwrap();

    for run in e.into_sink().all_runs() {
        let line = match run.role {
            RunRole::Title => 20.0,
            RunRole::Content => 10.0,
            _ => continue,
        };
        assert!(run.top >= geometry.top_margin);
        assert!(run.top + line <= bottom + 1e-3, "{run:?} overflows");
    }
}

#[test]
fn same_input_gives_same_pages_and_files() {
    let render = || {
        let mut e = engine(SplitPolicy::new(4, 3));
        e.begin().unwrap();
        for i in 0..11 {
            e.append_chapter(&format!("c{i}"), "", &long_chapter(i * 2)).unwrap();
        }
        let summary = e.end().unwrap();
        (summary, e.into_sink().files)
    };
    let (first_summary, first_files) = render();
    let (second_summary, second_files) = render();
    assert_eq!(first_summary, second_summary);
    assert_eq!(first_files, second_files);
}

#[test]
fn engine_can_run_again_after_end() {
    let mut e = engine(SplitPolicy::new(0, 1));
    e.begin().unwrap();
    e.append_chapter("a", "", "x").unwrap();
    e.append_chapter("b", "", "x").unwrap();
    let first = e.end().unwrap();
    e.begin().unwrap();
    e.append_chapter("a", "", "x").unwrap();
    e.append_chapter("b", "", "x").unwrap();
    let second = e.end().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.files.len(), 2);
}

#[test]
fn failed_part_is_logged_and_generation_continues() {
    let n = naming();
    let sink = RecordingSink::failing_on([n.part_path(2)]);
    let mut e = engine_with(small_geometry(), SplitPolicy::new(0, 1), sink, false);
    e.begin().unwrap();
    for title in ["a", "b", "c"] {
        e.append_chapter(title, "", "x").unwrap();
    }
    let summary = e.end().unwrap();
    assert_eq!(summary.files, vec![n.part_path(1), n.part_path(3)]);
    assert_eq!(summary.failed_parts, vec![n.part_path(2)]);
}

#[test]
fn failed_single_output_is_an_error() {
    let sink = RecordingSink::failing_on([naming().final_path()]);
    let mut e = engine_with(small_geometry(), SplitPolicy::default(), sink, false);
    e.begin().unwrap();
    e.append_chapter("a", "", "x").unwrap();
    assert!(matches!(e.end(), Err(GeneratorError::Save { .. })));
}

#[test]
fn raised_line_spacing_drives_every_advance() {
    let adjustment = reconcile_line_spacing(0.5, 0.9, "mono");
    assert!(adjustment.raised());

    let mut font = common::small_font();
    font.line_spacing = adjustment.effective;
    let settings = LayoutSettings {
        geometry: small_geometry(),
        font,
        write_cover: false,
    };
    let mut e = PaginationEngine::new(
        settings,
        Monospace,
        RecordingSink::default(),
        FileSplitter::new(SplitPolicy::default(), naming()),
        DocumentInfo::default(),
    );
    e.begin().unwrap();
    e.append_chapter("T", "", &html(&["a", "b", "c"])).unwrap();
    e.end().unwrap();

    let sink = e.into_sink();
    let tops: Vec<f32> = sink.files[0].pages[0]
        .iter()
        .filter(|r| r.role != RunRole::PageNumber)
        .map(|r| r.top)
        .collect();
    // title 20 * 0.9, then content 10 * 0.9 each
    let expected = [10.0, 28.0, 37.0, 46.0];
    for (top, want) in tops.iter().zip(expected) {
        assert!((top - want).abs() < 1e-3, "{tops:?}");
    }
}

#[test]
fn cover_is_written_once_in_the_first_file() {
    let mut e = engine_with(
        small_geometry(),
        SplitPolicy::new(0, 1),
        RecordingSink::default(),
        true,
    );
    e.begin().unwrap();
    e.append_chapter("a", "", "x").unwrap();
    e.append_chapter("b", "", "x").unwrap();
    let summary = e.end().unwrap();
    assert_eq!(summary.pages, 2);

    let sink = e.into_sink();
    assert_eq!(sink.files[0].pages.len(), 2);
    assert_eq!(sink.files[1].pages.len(), 1);
    assert_eq!(sink.files[0].runs(RunRole::CoverTitle).count(), 1);
    assert_eq!(sink.files[1].runs(RunRole::CoverTitle).count(), 0);
}
