// Platform content transformer
// Pure: (content, platform) -> payload. The only clock input is `prepared_at`.

pub mod profile;

pub use profile::{MarkupMode, PlatformProfile};

use crate::errors::TransformError;
use crate::markup::{self, Token, Truncated};
use crate::models::{ContentItem, MediaRef, Platform};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

static URL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn url_pattern() -> &'static Regex {
    URL_PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"'()]+"#).expect("Invalid URL pattern")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
}

/// Everything a transport needs to create one remote post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPayload {
    pub content_id: Uuid,
    pub platform: Platform,
    /// Standalone text message (no media, or text too long for a caption)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_media: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gallery: Vec<MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// True when any text had to be shortened
    pub truncated: bool,
    pub prepared_at: DateTime<Utc>,
}

/// Transform a content item for one platform
pub fn transform(
    item: &ContentItem,
    platform: Platform,
    now: DateTime<Utc>,
) -> Result<PlatformPayload, TransformError> {
    transform_with(item, &PlatformProfile::for_platform(platform), now)
}

/// Transform a content item using an explicit profile
pub fn transform_with(
    item: &ContentItem,
    profile: &PlatformProfile,
    now: DateTime<Utc>,
) -> Result<PlatformPayload, TransformError> {
    let platform = profile.platform;
    if profile.requires_media && item.media.is_empty() {
        return Err(TransformError::MissingRequiredMedia(platform));
    }

    let sanitized = markup::sanitize(&compose_source(item));
    let has_text = !markup::to_plain_text(&sanitized).trim().is_empty();
    if !has_text && item.media.is_empty() {
        return Err(TransformError::EmptyPayload(platform));
    }

    let rendered = match profile.markup {
        MarkupMode::Html => sanitized.clone(),
        MarkupMode::Plain => markup::to_plain_text(&sanitized),
    };
    let fit = |text: &str, limit: usize| -> Truncated {
        match profile.markup {
            MarkupMode::Html => markup::truncate(text, limit),
            MarkupMode::Plain => markup::truncate_plain(text, limit),
        }
    };

    let mut media = item.media.iter();
    let primary_media = media.next().cloned();
    let gallery: Vec<MediaRef> = media.by_ref().take(profile.gallery_max).cloned().collect();
    let dropped = media.count();
    if dropped > 0 {
        debug!(
            content_id = %item.id,
            platform = %platform,
            dropped,
            gallery_max = profile.gallery_max,
            "Media beyond the gallery limit is not sent"
        );
    }

    let mut text = None;
    let mut caption = None;
    let mut truncated = false;
    if has_text {
        let fitted = if primary_media.is_none() {
            let fitted = fit(&rendered, profile.text_limit);
            text = Some(fitted.text);
            fitted.truncated
        } else if profile.split_long_caption
            && visible_len(&rendered, profile.markup) > profile.caption_limit
        {
            let fitted = fit(&rendered, profile.text_limit);
            text = Some(fitted.text);
            fitted.truncated
        } else {
            let fitted = fit(&rendered, profile.caption_limit);
            caption = Some(fitted.text);
            fitted.truncated
        };
        truncated = fitted;
    }
    if truncated {
        debug!(content_id = %item.id, platform = %platform, "Text shortened to the platform limit");
    }

    let link = if profile.link_preview && primary_media.is_none() {
        first_link(&sanitized)
    } else {
        None
    };

    Ok(PlatformPayload {
        content_id: item.id,
        platform,
        text,
        caption,
        parse_mode: (profile.markup == MarkupMode::Html).then_some(ParseMode::Html),
        primary_media,
        gallery,
        link,
        truncated,
        prepared_at: now,
    })
}

/// Title (as a heading) followed by the body
fn compose_source(item: &ContentItem) -> String {
    match item.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => format!(
            "<h1>{}</h1>{}",
            markup::entities::escape_attr(title),
            item.body
        ),
        _ => item.body.clone(),
    }
}

fn visible_len(rendered: &str, mode: MarkupMode) -> usize {
    match mode {
        MarkupMode::Html => markup::visible_len(rendered),
        MarkupMode::Plain => rendered.chars().count(),
    }
}

/// First http(s) link target, falling back to the first bare URL in the text
fn first_link(sanitized: &str) -> Option<String> {
    let from_anchor = markup::tokenize(sanitized).into_iter().find_map(|token| match token {
        Token::Open(tag) if tag.name == "a" => markup::balancer::link_target(&tag)
            .filter(|href| href.starts_with("http://") || href.starts_with("https://")),
        _ => None,
    });
    from_anchor.or_else(|| {
        url_pattern()
            .find(&markup::to_plain_text(sanitized))
            .map(|m| {
                m.as_str()
                    .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                    .to_string()
            })
    })
}
