use regex::Regex;
use std::sync::OnceLock;

/// Extensions dropped before suffix stripping. Only the spreadsheet kinds the
/// watcher tracks; an arbitrary trailing `.segment` is part of the name.
const SPREADSHEET_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

/// Trailing revision-style suffixes: `_rev2`, `-v3`, `_v3`, `(4)`, `_5`.
fn suffix_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(_rev\d+|[-_]v\d+|\s*\(\d+\)|_\d+)$").unwrap())
}

/// Strip a spreadsheet extension and any trailing revision suffixes from a
/// raw filename.
///
/// Idempotent: a clean name comes back unchanged, interior dots included.
pub fn clean_revision_name(raw: &str) -> String {
    let stem = match raw.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && SPREADSHEET_EXTENSIONS
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(ext)) =>
        {
            stem
        }
        _ => raw,
    };

    let mut name = stem.trim().to_string();
    loop {
        let stripped = suffix_pattern().replace(&name, "").trim_end().to_string();
        if stripped == name {
            break;
        }
        name = stripped;
    }
    name
}

/// Derive the display name for a project revision from its two source files.
pub fn derive_display_name(name_a: &str, name_b: &str) -> String {
    format!(
        "{} vs {}",
        clean_revision_name(name_a),
        clean_revision_name(name_b)
    )
}
