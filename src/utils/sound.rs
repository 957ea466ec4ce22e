use std::collections::HashMap;
use once_cell::sync::Lazy;

/// Chat keyword that silences whatever sound is playing.
pub const STOP_KEYWORD: &str = "ganti";

const NAMED: [&str; 2] = ["king", "fyp"];

static SOUNDS: Lazy<HashMap<String, String>> = Lazy::new(|| {
    NAMED.iter().map(|k| k.to_string())
        .chain((1..=100).map(|n| n.to_string()))
        .map(|k| { let path = format!("sounds/{k}.mp3"); (k, path) })
        .collect()
});

#[derive(Debug, PartialEq, Eq)]
pub enum Cue {
    Play(&'static str),
    Stop,
}

/// Exact match after trim + lowercase; no fuzzy matching.
pub fn resolve(comment: &str) -> Option<Cue> {
    let key = comment.trim().to_lowercase();
    if key == STOP_KEYWORD { return Some(Cue::Stop); }
    SOUNDS.get(&key).map(|p| Cue::Play(p.as_str()))
}
