//! Length-based message splitting and truncation.

use serde::{Deserialize, Serialize};

/// Break characters used when no split character is configured.
pub const DEFAULT_SPLIT_CHARS: &[&str] = &[".", "!", "?"];

/// How over-long content is split into several messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOptions {
    /// Splitting is on unless explicitly disabled.
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub split_char: Option<String>,
    #[serde(default)]
    pub append_char: Option<String>,
    #[serde(default)]
    pub prepend_char: Option<String>,
    /// Maximum characters per message, markers included.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SplitOptions {
    /// Check if splitting applies.
    pub fn enabled(&self) -> bool {
        self.is_enabled.unwrap_or(true)
    }

    fn separators(&self) -> Vec<&str> {
        match self.split_char.as_deref() {
            Some(c) if !c.is_empty() => vec![c],
            _ => DEFAULT_SPLIT_CHARS.to_vec(),
        }
    }
}

/// Truncate to at most `max_chars` characters.
///
/// Returns the result and whether anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        None => (s.to_string(), false),
        Some((idx, _)) => (s[..idx].to_string(), true),
    }
}

/// Split content into chunks of at most `limit` characters each.
///
/// Content that fits is returned as-is. Otherwise every chunk is wrapped in
/// the prepend/append markers, and the markers count against the limit.
/// Markers that leave no room for content are dropped.
/// Concatenating the chunks without markers reproduces the content.
pub fn split_content(content: &str, limit: usize, options: &SplitOptions) -> Vec<String> {
    let limit = limit.max(1);
    if content.chars().count() <= limit {
        return vec![content.to_string()];
    }

    let mut prepend = options.prepend_char.as_deref().unwrap_or("");
    let mut append = options.append_char.as_deref().unwrap_or("");
    let marker_len = prepend.chars().count() + append.chars().count();
    let budget = if marker_len < limit {
        limit - marker_len
    } else {
        prepend = "";
        append = "";
        limit
    };

    chunks(content, budget, &options.separators())
        .into_iter()
        .map(|chunk| format!("{prepend}{chunk}{append}"))
        .collect()
}

/// Cut content down to the first chunk that fits in `limit`.
pub fn truncate_content(content: &str, limit: usize, options: &SplitOptions) -> String {
    chunks(content, limit.max(1), &options.separators())
        .into_iter()
        .next()
        .unwrap_or_default()
        .to_string()
}

fn chunks<'a>(content: &'a str, budget: usize, separators: &[&str]) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut rest = content;

    while !rest.is_empty() {
        let Some((window_end, _)) = rest.char_indices().nth(budget) else {
            out.push(rest);
            break;
        };
        let window = &rest[..window_end];
        let cut = last_break(window, separators).unwrap_or(window_end);
        out.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    out
}

/// Byte offset just past the last break point in the window.
///
/// Separators win over whitespace. The break character stays with the
/// preceding chunk.
fn last_break(window: &str, separators: &[&str]) -> Option<usize> {
    separators
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|i| i + sep.len()))
        .max()
        .or_else(|| {
            window
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn newline_split() -> SplitOptions {
        SplitOptions {
            split_char: Some("\n".to_string()),
            ..Default::default()
        }
    }

    fn lines(count: usize, width: usize) -> String {
        (0..count)
            .map(|i| format!("{:0>width$}\n", i, width = width - 1))
            .collect()
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 10), ("héllo".to_string(), false));
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_chars("abc", 3), ("abc".to_string(), false));
    }

    #[test]
    fn test_short_content_unchanged() {
        let options = SplitOptions {
            prepend_char: Some(">".to_string()),
            ..newline_split()
        };
        assert_eq!(split_content("short", 2000, &options), vec!["short"]);
    }

    #[test]
    fn test_split_on_newlines() {
        let content = lines(50, 50);
        assert_eq!(content.chars().count(), 2500);

        let parts = split_content(&content, 2000, &newline_split());
        assert!(parts.len() >= 2);
        assert!(parts.iter().all(|p| p.chars().count() <= 2000));
        assert!(parts.iter().all(|p| p.ends_with('\n')));
        assert_eq!(parts.concat(), content);
    }

    #[test]
    fn test_markers_count_against_limit() {
        let content = lines(50, 50);
        let options = SplitOptions {
            prepend_char: Some("[[".to_string()),
            append_char: Some("]]".to_string()),
            ..newline_split()
        };

        let parts = split_content(&content, 2000, &options);
        assert!(parts.len() >= 2);
        assert!(parts.iter().all(|p| p.chars().count() <= 2000));

        let stripped: String = parts
            .iter()
            .map(|p| p.strip_prefix("[[").and_then(|p| p.strip_suffix("]]")).unwrap())
            .collect();
        assert_eq!(stripped, content);
    }

    #[test]
    fn test_oversized_markers_are_dropped() {
        let options = SplitOptions {
            prepend_char: Some("<<<".to_string()),
            append_char: Some(">>>".to_string()),
            ..Default::default()
        };

        let parts = split_content("abcdefghij", 4, &options);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);

        // Exactly filling the limit leaves no room either
        let parts = split_content("abcdefghij", 6, &options);
        assert!(parts.iter().all(|p| p.chars().count() <= 6));
        assert_eq!(parts.concat(), "abcdefghij");
    }

    #[test]
    fn test_default_separators_then_whitespace() {
        let options = SplitOptions::default();

        let parts = split_content("One. Two! Three", 10, &options);
        assert_eq!(parts, vec!["One. Two!", " Three"]);

        let parts = split_content("alpha beta gamma", 8, &options);
        assert_eq!(parts, vec!["alpha ", "beta ", "gamma"]);
    }

    #[test]
    fn test_hard_cut_without_break_points() {
        let parts = split_content("abcdefghij", 4, &SplitOptions::default());
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_truncate_content() {
        let content = lines(50, 50);
        let truncated = truncate_content(&content, 2000, &newline_split());
        assert_eq!(truncated.chars().count(), 2000);
        assert!(content.starts_with(&truncated));
    }

    #[test]
    fn test_enabled_defaults_on() {
        assert!(SplitOptions::default().enabled());
        let disabled = SplitOptions {
            is_enabled: Some(false),
            ..Default::default()
        };
        assert!(!disabled.enabled());
    }
}
