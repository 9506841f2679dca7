//! Terminal renderings of a persisted dataset.

use std::fmt::Write;

use color_eyre::eyre::Result;
use imageset_shared::{Dataset, ImageRecord};

/// Widest a table cell may get before it is cut with an ellipsis.
const MAX_CELL_CHARS: usize = 60;

/// Dataset rendering selected with `inspect --view`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum View {
    /// Each image's local path with its caption.
    Gallery,
    /// The dataset metadata as pretty JSON.
    Metadata,
    /// One row per image: domain, path, caption, source page.
    Table,
}

pub(crate) fn render(dataset: &Dataset, view: View) -> Result<String> {
    match view {
        View::Gallery => Ok(gallery(dataset)),
        View::Metadata => Ok(format!("{}\n", serde_json::to_string_pretty(dataset.metadata())?)),
        View::Table => Ok(table(dataset)),
    }
}

fn gallery(dataset: &Dataset) -> String {
    let meta = dataset.metadata();
    let mut out = String::new();
    let _ = writeln!(out, "{} ({} images)", meta.prompt, meta.total_images);

    for record in dataset.images() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}", local_path(record));
        let _ = writeln!(out, "    {}", caption_or_placeholder(record));
    }
    out
}

fn table(dataset: &Dataset) -> String {
    let header = ["DOMAIN", "LOCAL PATH", "CAPTION", "SOURCE PAGE"];
    let rows: Vec<[String; 4]> = dataset
        .images()
        .iter()
        .map(|r| {
            [
                truncate(&r.domain),
                truncate(&local_path(r)),
                truncate(r.caption.as_deref().unwrap_or_default()),
                truncate(r.source_page_url.as_str()),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header.map(String::from), &widths);
    push_row(&mut out, &widths.map(|w| "-".repeat(w)), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(" | ");
    let _ = writeln!(out, "{}", line.trim_end());
}

fn local_path(record: &ImageRecord) -> String {
    record
        .local_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

fn caption_or_placeholder(record: &ImageRecord) -> &str {
    match record.caption.as_deref() {
        Some(caption) if !caption.is_empty() => caption,
        _ => "(no caption)",
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_CELL_CHARS - 1).collect();
    cut.push('…');
    cut
}
