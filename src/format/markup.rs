//! Image stripping and table formatting.

use std::sync::LazyLock;

use htmlescape::decode_html;
use regex::{Captures, Regex};

/// Widest a formatted table column may get.
pub const MAX_COLUMN_WIDTH: usize = 60;

static HTML_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<img\b[^>]*>").expect("html image pattern should compile")
});

static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("markdown image pattern should compile")
});

static TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").expect("table pattern should compile")
});

static ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").expect("row pattern should compile")
});

static CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<t[hd]\b[^>]*>(.*?)</t[hd]\s*>").expect("cell pattern should compile")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern should compile"));

/// Remove `<img>` tags and markdown images.
pub fn strip_images(content: &str) -> String {
    let without_html = HTML_IMAGE.replace_all(content, "");
    MARKDOWN_IMAGE.replace_all(&without_html, "").into_owned()
}

/// Render every `<table>` block as a fixed-width code block.
pub fn format_tables(content: &str) -> String {
    TABLE
        .replace_all(content, |caps: &Captures| render_table(&caps[1]))
        .into_owned()
}

fn render_table(inner: &str) -> String {
    let rows: Vec<Vec<String>> = ROW
        .captures_iter(inner)
        .map(|row| {
            CELL.captures_iter(&row[1])
                .map(|cell| cell_text(&cell[1]))
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    if rows.is_empty() {
        return String::new();
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|r| r.get(col))
                .map(|c| c.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::from("```\n");
    for row in &rows {
        let line = widths
            .iter()
            .enumerate()
            .map(|(col, width)| {
                let cell = row.get(col).map(String::as_str).unwrap_or("");
                format!("{cell:<width$}")
            })
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.push_str("```");
    out
}

/// Plain text of a cell, capped at the column width.
fn cell_text(html: &str) -> String {
    let text = TAG.replace_all(html, " ");
    let text = decode_html(&text).unwrap_or_else(|_| text.into_owned());
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_COLUMN_WIDTH).collect()
}
