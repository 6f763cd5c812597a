//! Custom placeholders and per-placeholder character limits.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono_tz::Tz;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::split::truncate_chars;
use super::FormatError;
use crate::fingerprint::parse_article_date;

/// Prefix under which custom placeholders are exposed as fields.
pub const CUSTOM_PREFIX: &str = "custom::";

/// Flags applied when a regex step names none.
pub const DEFAULT_REGEX_FLAGS: &str = "gmi";

/// Format used by date steps without an explicit format.
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// A transformation step of a custom placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaceholderStep {
    #[serde(rename_all = "camelCase")]
    Regex {
        regex_search: String,
        #[serde(default)]
        regex_search_flags: Option<String>,
        #[serde(default)]
        replacement_string: Option<String>,
    },
    UrlEncode,
    Uppercase,
    Lowercase,
    DateFormat {
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        timezone: Option<String>,
    },
}

/// A named field derived from another field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPlaceholder {
    #[serde(default)]
    pub id: String,
    pub reference_name: String,
    pub source_placeholder: String,
    #[serde(default)]
    pub steps: Vec<PlaceholderStep>,
}

impl CustomPlaceholder {
    /// Field name the result is stored under.
    pub fn field_name(&self) -> String {
        format!("{CUSTOM_PREFIX}{}", self.reference_name)
    }
}

/// A character limit on one placeholder's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderLimit {
    pub placeholder: String,
    pub character_count: usize,
    #[serde(default)]
    pub append_string: Option<String>,
}

/// Resolve custom placeholders into a copy of the field map.
///
/// Placeholders run in order, so later ones can read earlier results.
/// A missing or empty source yields an empty value.
pub fn resolve_custom_placeholders(
    fields: &BTreeMap<String, String>,
    placeholders: &[CustomPlaceholder],
) -> Result<BTreeMap<String, String>, FormatError> {
    let mut resolved = fields.clone();

    for placeholder in placeholders {
        let source = resolved
            .get(&placeholder.source_placeholder)
            .cloned()
            .unwrap_or_default();

        let value = if source.is_empty() {
            String::new()
        } else {
            let mut value = source;
            for step in &placeholder.steps {
                value = apply_step(placeholder, step, &value)?;
            }
            value
        };

        resolved.insert(placeholder.field_name(), value);
    }

    Ok(resolved)
}

fn apply_step(
    placeholder: &CustomPlaceholder,
    step: &PlaceholderStep,
    input: &str,
) -> Result<String, FormatError> {
    let output = match step {
        PlaceholderStep::Regex {
            regex_search,
            regex_search_flags,
            replacement_string,
        } => {
            if regex_search.is_empty() {
                return Ok(input.to_string());
            }
            let flags = regex_search_flags.as_deref().unwrap_or(DEFAULT_REGEX_FLAGS);
            let (regex, global) =
                build_regex(regex_search, flags).map_err(|message| {
                    FormatError::InvalidPlaceholderRegex {
                        placeholder: placeholder.reference_name.clone(),
                        pattern: regex_search.clone(),
                        message,
                    }
                })?;
            let replacement = translate_replacement(replacement_string.as_deref().unwrap_or(""));
            let replaced = if global {
                regex.replace_all(input, replacement.as_str())
            } else {
                regex.replace(input, replacement.as_str())
            };
            replaced.trim().to_string()
        }
        PlaceholderStep::UrlEncode => urlencoding::encode(input).into_owned(),
        PlaceholderStep::Uppercase => input.to_uppercase(),
        PlaceholderStep::Lowercase => input.to_lowercase(),
        PlaceholderStep::DateFormat { format, timezone } => {
            format_date(input, format.as_deref(), timezone.as_deref())
        }
    };
    Ok(output)
}

/// Build a regex from a pattern and a flag string such as `gmi`.
///
/// Returns the regex and whether replacement is global.
fn build_regex(pattern: &str, flags: &str) -> Result<(Regex, bool), String> {
    let mut builder = RegexBuilder::new(pattern);
    builder.size_limit(1 << 20);
    let mut global = false;

    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'u' => {}
            other => return Err(format!("unsupported flag {other:?}")),
        }
    }

    let regex = builder.build().map_err(|e| e.to_string())?;
    Ok((regex, global))
}

/// Convert `$&`, `$1` and `$<name>` references to the `${..}` form.
fn translate_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some(d) if d.is_ascii_digit() => {
                let mut group = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    group.push(d);
                    chars.next();
                }
                out.push_str(&format!("${{{group}}}"));
            }
            Some('<') => {
                let rest: String = chars.clone().collect();
                match rest.find('>') {
                    Some(end) => {
                        out.push_str(&format!("${{{}}}", &rest[1..end]));
                        for _ in 0..rest[..=end].chars().count() {
                            chars.next();
                        }
                    }
                    None => out.push_str("$$"),
                }
            }
            _ => out.push_str("$$"),
        }
    }

    out
}

/// Reformat a date string; unparseable dates and unknown zones yield "".
fn format_date(input: &str, format: Option<&str>, timezone: Option<&str>) -> String {
    let Some(date) = parse_article_date(input) else {
        return String::new();
    };
    let format = format.unwrap_or(DEFAULT_DATE_FORMAT);

    let mut out = String::new();
    let written = match timezone {
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => write!(out, "{}", date.with_timezone(&tz).format(format)),
            Err(_) => return String::new(),
        },
        None => write!(out, "{}", date.format(format)),
    };

    // Invalid format specifiers surface as a write error
    match written {
        Ok(()) => out,
        Err(_) => String::new(),
    }
}

/// Apply character limits to the named fields in place.
///
/// The append string is added only when the value was actually cut.
pub fn apply_placeholder_limits(fields: &mut BTreeMap<String, String>, limits: &[PlaceholderLimit]) {
    for limit in limits {
        if let Some(value) = fields.get_mut(&limit.placeholder) {
            *value = limit_value(value, limit);
        }
    }
}

/// Truncate a single value according to a limit.
pub fn limit_value(value: &str, limit: &PlaceholderLimit) -> String {
    let (mut truncated, cut) = truncate_chars(value, limit.character_count);
    if cut {
        if let Some(append) = &limit.append_string {
            truncated.push_str(append);
        }
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("title".to_string(), "Release v1.2.3 is OUT".to_string()),
            ("link".to_string(), "https://example.com/a b".to_string()),
            ("date".to_string(), "2024-03-01T12:00:00Z".to_string()),
        ])
    }

    fn placeholder(source: &str, steps: Vec<PlaceholderStep>) -> CustomPlaceholder {
        CustomPlaceholder {
            id: "p1".to_string(),
            reference_name: "out".to_string(),
            source_placeholder: source.to_string(),
            steps,
        }
    }

    fn regex_step(search: &str, flags: Option<&str>, replacement: &str) -> PlaceholderStep {
        PlaceholderStep::Regex {
            regex_search: search.to_string(),
            regex_search_flags: flags.map(str::to_string),
            replacement_string: Some(replacement.to_string()),
        }
    }

    #[test]
    fn test_placeholder_limit_truncates_with_marker() {
        let limit = PlaceholderLimit {
            placeholder: "title".to_string(),
            character_count: 10,
            append_string: Some("…".to_string()),
        };
        assert_eq!(limit_value("0123456789ABCDEF", &limit), "0123456789…");
        // Not truncated, no marker
        assert_eq!(limit_value("short", &limit), "short");
    }

    #[test]
    fn test_apply_limits_to_fields() {
        let mut f = fields();
        apply_placeholder_limits(
            &mut f,
            &[PlaceholderLimit {
                placeholder: "title".to_string(),
                character_count: 7,
                append_string: None,
            }],
        );
        assert_eq!(f["title"], "Release");
    }

    #[test]
    fn test_regex_extracts_version() {
        let p = placeholder("title", vec![regex_step(r".*v(\d+\.\d+)\.\d+.*", None, "$1")]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "1.2");
    }

    #[test]
    fn test_regex_flags() {
        // Case-sensitive, non-global
        let p = placeholder("title", vec![regex_step("e", Some(""), "E")]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "RElease v1.2.3 is OUT");

        let p = placeholder("title", vec![regex_step("out", None, "in")]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "Release v1.2.3 is in");
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let p = placeholder("title", vec![regex_step("(open", None, "")]);
        let err = resolve_custom_placeholders(&fields(), &[p]).unwrap_err();
        assert!(matches!(err, FormatError::InvalidPlaceholderRegex { .. }));
    }

    #[test]
    fn test_case_and_url_steps() {
        let p = placeholder(
            "link",
            vec![PlaceholderStep::Uppercase, PlaceholderStep::UrlEncode],
        );
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "HTTPS%3A%2F%2FEXAMPLE.COM%2FA%20B");

        let p = placeholder("title", vec![PlaceholderStep::Lowercase]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "release v1.2.3 is out");
    }

    #[test]
    fn test_date_format_step() {
        let step = |format: &str, tz: Option<&str>| PlaceholderStep::DateFormat {
            format: Some(format.to_string()),
            timezone: tz.map(str::to_string),
        };

        let p = placeholder("date", vec![step("%Y/%m/%d %H:%M", Some("Asia/Tokyo"))]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "2024/03/01 21:00");

        let p = placeholder("date", vec![step("%Y", Some("Not/AZone"))]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "");

        let p = placeholder("title", vec![step("%Y", None)]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "");
    }

    #[test]
    fn test_missing_source_is_empty() {
        let p = placeholder("nope", vec![PlaceholderStep::Uppercase]);
        let resolved = resolve_custom_placeholders(&fields(), &[p]).unwrap();
        assert_eq!(resolved["custom::out"], "");
    }

    #[test]
    fn test_translate_replacement() {
        assert_eq!(translate_replacement("$1-$2"), "${1}-${2}");
        assert_eq!(translate_replacement("[$&]"), "[${0}]");
        assert_eq!(translate_replacement("$<year>"), "${year}");
        assert_eq!(translate_replacement("cost $"), "cost $$");
    }

    #[test]
    fn test_deserialize_steps() {
        let json = r#"{
            "id": "x",
            "referenceName": "short",
            "sourcePlaceholder": "title",
            "steps": [
                {"type": "REGEX", "regexSearch": "a", "replacementString": "b"},
                {"type": "URL_ENCODE"},
                {"type": "DATE_FORMAT", "format": "%Y"}
            ]
        }"#;
        let p: CustomPlaceholder = serde_json::from_str(json).unwrap();
        assert_eq!(p.field_name(), "custom::short");
        assert_eq!(p.steps.len(), 3);
    }
}
