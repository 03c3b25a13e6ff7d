//! Voice profile map.
//!
//! Read-only for the life of the process. Lookups are case-insensitive on the
//! language tag and never fail: unknown tags get the multilingual default.

pub const DEFAULT_VOICE: &str = "en-US-AvaMultilingualNeural";

static VOICES: &[(&str, &str)] = &[
    ("es-ES", "es-ES-ElviraNeural"),
    ("en-US", "en-US-AndrewNeural"),
    ("fr-FR", "fr-FR-DeniseNeural"),
    ("zh-CN", "zh-CN-XiaoxiaoNeural"),
];

pub fn voice_for(language: &str) -> &'static str {
    VOICES
        .iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(language.trim()))
        .map(|(_, voice)| *voice)
        .unwrap_or(DEFAULT_VOICE)
}
