//! Screening of model-authored firmware code.
//!
//! Two entry points:
//! - [`sanitize`] for logic fragments: any denylisted construct replaces the
//!   whole fragment, prose is turned into a comment.
//! - [`validate_full_firmware`] for complete model-written sketches: missing
//!   entry sections fall back to a baseline render, denylisted constructs are
//!   cut out in place, and serial initialization is injected when absent.

use crate::core::sensors::SensorSet;
use crate::firmware::template::{self, NO_LOGIC};

/// Constructs that must never reach the device.
///
/// File/library inclusion, process execution and code evaluation. Matched
/// case-sensitively, and also against a whitespace-free copy of the input.
pub const DENYLIST: &[&str] = &[
    "#include",
    "#import",
    "#pragma",
    "__import__",
    "os.system",
    "subprocess",
    "system(",
    "popen(",
    "fopen(",
    "fork(",
    "execl(",
    "execlp(",
    "execv(",
    "execvp(",
    "exec(",
    "eval(",
    "__asm__",
    "asm(",
];

/// Replacement for an empty fragment.
pub const EMPTY_FRAGMENT: &str = NO_LOGIC;

/// Replacement for a fragment that contained a denylisted construct.
pub const REMOVED_FRAGMENT: &str = "// Unsafe code removed by safety filter";

/// Inline marker left where a construct was cut out of a full sketch.
pub const REMOVED_INLINE: &str = "/* unsafe construct removed */";

/// Sketches shorter than this cannot hold both entry sections.
pub const MIN_FIRMWARE_LEN: usize = 50;

/// Denylisted tokens present in `code`, verbatim or once whitespace is removed.
pub fn denylisted_tokens(code: &str) -> Vec<&'static str> {
    let compact: String = code.chars().filter(|c| !c.is_whitespace()).collect();
    DENYLIST
        .iter()
        .copied()
        .filter(|token| code.contains(token) || compact.contains(token))
        .collect()
}

fn is_comment(code: &str) -> bool {
    let block = code.starts_with("/*") && code.ends_with("*/") && code.matches("*/").count() == 1;
    let lines = code
        .lines()
        .map(str::trim_start)
        .filter(|line| !line.is_empty())
        .all(|line| line.starts_with("//"));
    block || lines
}

fn looks_like_code(code: &str) -> bool {
    code.contains([';', '{', '}'])
}

fn comment_out(prose: &str) -> String {
    prose
        .lines()
        .map(|line| {
            let line = line.trim();
            if line.is_empty() {
                "//".to_string()
            } else {
                format!("// {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Screen a model-authored logic fragment before it is embedded.
///
/// Total and idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(fragment: &str) -> String {
    let trimmed = fragment.trim();
    if trimmed.is_empty() {
        return EMPTY_FRAGMENT.to_string();
    }

    let found = denylisted_tokens(trimmed);
    if !found.is_empty() {
        tracing::warn!(tokens = ?found, "rejected logic fragment with unsafe constructs");
        return REMOVED_FRAGMENT.to_string();
    }

    if is_comment(trimmed) || looks_like_code(trimmed) {
        return trimmed.to_string();
    }

    tracing::debug!("logic fragment has no statements, embedding as comment");
    comment_out(trimmed)
}

/// Position just past `void <name>` followed by `(`.
fn find_entry(source: &str, name: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(rel) = source[search_from..].find(name) {
        let start = search_from + rel;
        let end = start + name.len();
        let before = source[..start].trim_end();
        let after = source[end..].trim_start();
        if before.ends_with("void") && after.starts_with('(') {
            return Some(end);
        }
        search_from = end;
    }
    None
}

/// Whether `source` declares both `setup()` and `loop()`, i.e. is a whole
/// sketch rather than a fragment.
pub fn is_full_firmware(source: &str) -> bool {
    find_entry(source, "setup").is_some() && find_entry(source, "loop").is_some()
}

/// Insert the serial init call as the first statement of `setup()`.
fn inject_serial_init(source: &str) -> Option<String> {
    let setup = find_entry(source, "setup")?;
    let brace = setup + source[setup..].find('{')?;
    let mut out = String::with_capacity(source.len() + 32);
    out.push_str(&source[..=brace]);
    out.push_str("\n  ");
    out.push_str(&template::serial_init_line());
    out.push_str(&source[brace + 1..]);
    Some(out)
}

/// Screen a complete model-written sketch.
///
/// Falls back to a baseline render for `sensors` when the source is too short,
/// lacks `setup()`/`loop()`, or hides a denylisted construct behind whitespace
/// that in-place removal cannot reach.
pub fn validate_full_firmware(source: &str, sensors: &SensorSet) -> String {
    let baseline = || template::render(sensors, NO_LOGIC);
    let trimmed = source.trim();

    if trimmed.len() < MIN_FIRMWARE_LEN
        || find_entry(trimmed, "setup").is_none()
        || find_entry(trimmed, "loop").is_none()
    {
        tracing::warn!(
            len = trimmed.len(),
            "model firmware missing entry sections, using baseline"
        );
        return baseline();
    }

    let mut cleaned = trimmed.to_string();
    for token in DENYLIST {
        if cleaned.contains(token) {
            tracing::warn!(token, "removed unsafe construct from model firmware");
            cleaned = cleaned.replace(token, REMOVED_INLINE);
        }
    }

    if !denylisted_tokens(&cleaned).is_empty() {
        tracing::warn!("model firmware hides unsafe constructs, using baseline");
        return baseline();
    }

    if !cleaned.contains("Serial.begin(") {
        match inject_serial_init(&cleaned) {
            Some(injected) => cleaned = injected,
            None => return baseline(),
        }
    }

    cleaned
}
