//! Payload formatter.
//!
//! Turns an accepted article into one or more provider messages for a
//! connection. The steps run in a fixed order:
//!
//! 1. custom placeholders are resolved into the field map
//! 2. per-placeholder character limits are applied
//! 3. placeholders are substituted into the content and embed templates
//! 4. images are stripped and tables reformatted if configured
//! 5. over-long content is split (or truncated when splitting is off)
//!
//! Embeds go on the last message.

mod markup;
mod payload;
mod placeholder;
mod split;
mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::article::Article;
use crate::connection::Connection;

pub use markup::{format_tables, strip_images, MAX_COLUMN_WIDTH};
pub use payload::{
    Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia, MessagePayload,
    EMBED_DESCRIPTION_LIMIT, EMBED_FIELD_NAME_LIMIT, EMBED_FIELD_VALUE_LIMIT, EMBED_FOOTER_LIMIT,
    EMBED_TITLE_LIMIT, MAX_EMBEDS,
};
pub use placeholder::{
    apply_placeholder_limits, limit_value, resolve_custom_placeholders, CustomPlaceholder,
    PlaceholderLimit, PlaceholderStep, CUSTOM_PREFIX,
};
pub use split::{split_content, truncate_chars, truncate_content, SplitOptions};
pub use template::{render_template, Node, Parser, Renderer, Source};

/// Default maximum length of a single message.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Formatting error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Neither the content nor any embed produced anything to send.
    #[error("article produced no non-empty message")]
    EmptyMessage,

    /// A custom placeholder's regex step does not compile.
    #[error("custom placeholder {placeholder}: invalid regex {pattern:?}: {message}")]
    InvalidPlaceholderRegex {
        placeholder: String,
        pattern: String,
        message: String,
    },
}

/// Formatting switches of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatOptions {
    #[serde(default)]
    pub strip_images: bool,
    #[serde(default)]
    pub format_tables: bool,
    /// Splitting of over-long content; absent means truncate.
    #[serde(default)]
    pub split: Option<SplitOptions>,
    #[serde(default)]
    pub placeholder_limits: Vec<PlaceholderLimit>,
    #[serde(default)]
    pub enable_placeholder_fallback: bool,
}

/// Message templates of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub embeds: Vec<EmbedTemplate>,
}

impl MessageTemplate {
    /// A content-only template.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }
}

/// Embed template; every text is itself a placeholder template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedTemplate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub footer_text: Option<String>,
    #[serde(default)]
    pub footer_icon_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_url: Option<String>,
    #[serde(default)]
    pub author_icon_url: Option<String>,
    #[serde(default)]
    pub fields: Vec<EmbedFieldTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedFieldTemplate {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Builds provider messages from articles.
#[derive(Debug, Clone)]
pub struct Formatter {
    max_message_length: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl Formatter {
    /// Create a formatter with the provider's maximum message length.
    pub fn new(max_message_length: usize) -> Self {
        Self {
            max_message_length: max_message_length.max(1),
        }
    }

    /// Format an article for a connection.
    pub fn format(
        &self,
        article: &Article,
        connection: &Connection,
    ) -> Result<Vec<MessagePayload>, FormatError> {
        let fields =
            resolve_custom_placeholders(&article.flattened, &connection.custom_placeholders)?;
        self.format_resolved(fields, connection)
    }

    /// Format from a field map whose custom placeholders are already resolved.
    pub fn format_resolved(
        &self,
        mut fields: BTreeMap<String, String>,
        connection: &Connection,
    ) -> Result<Vec<MessagePayload>, FormatError> {
        let options = &connection.format_options;
        apply_placeholder_limits(&mut fields, &options.placeholder_limits);

        let ctx = RenderContext {
            fields: &fields,
            options,
        };

        let content = connection
            .template
            .content
            .as_deref()
            .map(|t| ctx.text(t))
            .unwrap_or_default();
        let content = content.trim();

        let mut payloads: Vec<MessagePayload> = if content.is_empty() {
            Vec::new()
        } else {
            self.content_parts(content, options)
                .into_iter()
                .filter(|part| !part.trim().is_empty())
                .map(MessagePayload::text)
                .collect()
        };

        let embeds: Vec<Embed> = connection
            .template
            .embeds
            .iter()
            .map(|t| ctx.embed(t))
            .filter(|e| !e.is_empty())
            .take(MAX_EMBEDS)
            .collect();

        if !embeds.is_empty() {
            match payloads.last_mut() {
                Some(last) => last.embeds = embeds,
                None => payloads.push(MessagePayload {
                    content: None,
                    embeds,
                }),
            }
        }

        if payloads.is_empty() {
            return Err(FormatError::EmptyMessage);
        }

        debug!(
            "Formatted article for connection {} into {} message(s)",
            connection.id,
            payloads.len()
        );
        Ok(payloads)
    }

    fn content_parts(&self, content: &str, options: &FormatOptions) -> Vec<String> {
        match &options.split {
            Some(split) if split.enabled() => {
                let limit = split
                    .limit
                    .map_or(self.max_message_length, |l| l.min(self.max_message_length));
                split_content(content, limit, split)
            }
            Some(split) => vec![truncate_content(content, self.max_message_length, split)],
            None => vec![truncate_content(
                content,
                self.max_message_length,
                &SplitOptions::default(),
            )],
        }
    }
}

struct RenderContext<'a> {
    fields: &'a BTreeMap<String, String>,
    options: &'a FormatOptions,
}

impl RenderContext<'_> {
    /// Substitute placeholders, then apply markup options.
    fn text(&self, template: &str) -> String {
        let mut text =
            render_template(template, self.fields, self.options.enable_placeholder_fallback);
        if self.options.format_tables {
            text = format_tables(&text);
        }
        if self.options.strip_images {
            text = strip_images(&text);
        }
        text
    }

    /// Render a template and cap it at `limit` characters.
    fn capped(&self, template: Option<&str>, limit: usize) -> Option<String> {
        let text = self.text(template?);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(truncate_chars(text, limit).0)
    }

    /// Render a URL template; whitespace is percent-encoded.
    fn url(&self, template: Option<&str>) -> Option<String> {
        let url = render_template(template?, self.fields, self.options.enable_placeholder_fallback);
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        Some(url.split_whitespace().collect::<Vec<_>>().join("%20"))
    }

    fn embed(&self, t: &EmbedTemplate) -> Embed {
        let footer = self
            .capped(t.footer_text.as_deref(), EMBED_FOOTER_LIMIT)
            .map(|text| EmbedFooter {
                text,
                icon_url: self.url(t.footer_icon_url.as_deref()),
            });

        let author = self
            .capped(t.author_name.as_deref(), payload::EMBED_AUTHOR_LIMIT)
            .map(|name| EmbedAuthor {
                name,
                url: self.url(t.author_url.as_deref()),
                icon_url: self.url(t.author_icon_url.as_deref()),
            });

        let fields = t
            .fields
            .iter()
            .filter_map(|f| {
                Some(EmbedField {
                    name: self.capped(Some(f.name.as_str()), EMBED_FIELD_NAME_LIMIT)?,
                    value: self.capped(Some(f.value.as_str()), EMBED_FIELD_VALUE_LIMIT)?,
                    inline: f.inline,
                })
            })
            .take(payload::MAX_EMBED_FIELDS)
            .collect();

        Embed {
            title: self.capped(t.title.as_deref(), EMBED_TITLE_LIMIT),
            description: self.capped(t.description.as_deref(), EMBED_DESCRIPTION_LIMIT),
            url: self.url(t.url.as_deref()),
            color: t.color,
            footer,
            image: self.url(t.image_url.as_deref()).map(|url| EmbedMedia { url }),
            thumbnail: self.url(t.thumbnail_url.as_deref()).map(|url| EmbedMedia { url }),
            author,
            fields,
        }
    }
}
