// Per-platform delivery limits

use crate::models::Platform;
use serde::{Deserialize, Serialize};

/// How a platform renders text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupMode {
    /// Restricted inline HTML produced by the sanitizer
    Html,
    /// No markup at all
    Plain,
}

/// Static description of what a platform accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub markup: MarkupMode,
    /// Maximum visible characters of a text post
    pub text_limit: usize,
    /// Maximum visible characters of a media caption
    pub caption_limit: usize,
    pub requires_media: bool,
    /// Media items sent after the primary one
    pub gallery_max: usize,
    /// Send text that does not fit the caption as its own message instead of truncating it
    pub split_long_caption: bool,
    /// Attach the first link of a text-only post as a link preview
    pub link_preview: bool,
}

impl PlatformProfile {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Telegram => Self {
                platform,
                markup: MarkupMode::Html,
                text_limit: 4096,
                caption_limit: 1024,
                requires_media: false,
                gallery_max: 9,
                split_long_caption: true,
                link_preview: false,
            },
            Platform::Vk => Self {
                platform,
                markup: MarkupMode::Plain,
                text_limit: 16000,
                caption_limit: 16000,
                requires_media: false,
                gallery_max: 9,
                split_long_caption: false,
                link_preview: false,
            },
            Platform::Instagram => Self {
                platform,
                markup: MarkupMode::Plain,
                text_limit: 2200,
                caption_limit: 2200,
                requires_media: true,
                gallery_max: 9,
                split_long_caption: false,
                link_preview: false,
            },
            Platform::Facebook => Self {
                platform,
                markup: MarkupMode::Plain,
                text_limit: 63206,
                caption_limit: 63206,
                requires_media: false,
                gallery_max: 9,
                split_long_caption: false,
                link_preview: true,
            },
        }
    }
}
