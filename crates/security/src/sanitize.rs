//! Input sanitizer: neutralises markup, script schemes and control characters.
//!
//! Pure and idempotent: the cleaning passes repeat until the text stops
//! changing, so `sanitize(sanitize(x)) == sanitize(x)` for every input.
//! Natural-language content (including `<3`, `a < b`, and any script or
//! language) passes through untouched.

use regex_lite::Regex;
use std::sync::LazyLock;

static DANGEROUS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|object)\b[^>]*>.*?<\s*/\s*(script|style|iframe|object)\s*>")
        .expect("static regex")
});

/// HTML element names. Only these count as tags, so prose like `x<y and y>z`
/// keeps its brackets.
const ELEMENTS: &str = "a|abbr|address|applet|area|article|aside|audio|b|base|bdi|bdo|blink|\
blockquote|body|br|button|canvas|caption|center|cite|code|col|colgroup|data|datalist|dd|del|\
details|dfn|dialog|div|dl|dt|em|embed|fieldset|figcaption|figure|font|footer|form|frame|\
frameset|h[1-6]|head|header|hr|html|i|iframe|img|input|ins|kbd|label|legend|li|link|main|map|\
mark|marquee|math|meta|meter|nav|noscript|object|ol|optgroup|option|output|p|param|picture|\
pre|progress|q|s|samp|script|section|select|small|source|span|strike|strong|style|sub|\
summary|sup|svg|table|tbody|td|template|textarea|tfoot|th|thead|time|title|tr|track|u|ul|\
var|video|wbr";

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)<!--.*?-->|<[!?][a-z][^<>]*>|</?(?:{ELEMENTS})(?:[\s/][^<>]*)?>"
    ))
    .expect("static regex")
});

static SCRIPT_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(javascript|vbscript)\s*:|data\s*:\s*text/html").expect("static regex")
});

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon[a-z]{3,}\s*=").expect("static regex"));

static EXCESS_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n([ \t]*\n)+").expect("static regex"));

/// Zero-width and bidirectional-override characters used to hide payloads.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{FEFF}'
    )
}

fn strip_characters(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .map(|c| if c == '\r' { '\n' } else { c })
        .filter(|&c| c == '\n' || c == '\t' || !(c.is_control() || is_invisible(c)))
        .collect()
}

fn pass(text: &str) -> String {
    let text = DANGEROUS_BLOCK.replace_all(text, "");
    let text = TAG.replace_all(&text, "");
    let text = SCRIPT_SCHEME.replace_all(&text, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    let text = strip_characters(&text);
    let text = EXCESS_BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Clean free text before any classification or prompt assembly.
pub fn sanitize(text: &str) -> String {
    let mut current = pass(text);
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}
