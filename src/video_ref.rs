// src/video_ref.rs
//! Normalizes user-supplied video links into bare 11-character video ids.

use regex::Regex;

lazy_static::lazy_static! {
    static ref BARE_ID: Regex = Regex::new(r"^[a-zA-Z0-9_-]{11}$").unwrap();
    // Watch links, youtu.be share links, embeds, shorts and live streams
    static ref URL_ID: Regex = Regex::new(r"(?:v=|be/|embed/|shorts/|live/)([\w-]{11})").unwrap();
}

/// Extract the video id from a bare id or any accepted URL shape.
/// Returns `None` when nothing recognizable is found.
pub fn extract_video_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if BARE_ID.is_match(trimmed) {
        return Some(trimmed.to_string());
    }

    URL_ID
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
