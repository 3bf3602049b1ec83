/// Message tokenization.
///
/// Commands are matched word by word. Raw tokens are kept for command
/// arguments; comparisons go through `normalize`, which makes matching
/// case- and punctuation-insensitive ("Twelve?" matches "twelve").

/// Split raw message text on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Comparison key for a token: lowercased, with leading and trailing ASCII
/// punctuation removed.
pub fn normalize(token: &str) -> String {
    token
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}
