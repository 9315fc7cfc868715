//! Citation scrubbing for generated answer text.
//!
//! The answer service attributes sources through the structured metadata
//! record, so any `来源:` citation the model echoes into the prose is
//! redundant and is stripped before display.

use std::sync::OnceLock;

use regex::Regex;

struct Scrubber {
    /// `（来源: 校历.pdf）` and bare `来源：...` fragments, any bracket style
    inline_citation: Regex,
    /// whole lines that begin with `来源:`, optionally after a list dash
    citation_line: Regex,
    /// bracketed document references, e.g. `【课表.docx】` or `[pdf]`
    doc_reference: Regex,
    ext_reference: Regex,
    /// full-width bracket pairs emptied by the rules above
    empty_brackets: Regex,
    excess_newlines: Regex,
}

fn scrubber() -> &'static Scrubber {
    static SCRUBBER: OnceLock<Scrubber> = OnceLock::new();
    SCRUBBER.get_or_init(|| Scrubber {
        inline_citation: Regex::new(
            r"[（(\[【〔「『{]?\s*来源[:：][^\n\]）)】〕」』}]*[\]）)】〕」』}]?",
        )
        .expect("inline citation pattern"),
        citation_line: Regex::new(r"(?m)^[ \t]*(?:-[ \t]*)?来源[:：][^\n]*\n?")
            .expect("citation line pattern"),
        doc_reference: Regex::new(
            r"(?i)[\[\{【〔「『][^\]\}】〕」』\n]*\.(?:txt|md|pdf|docx?|pptx?)[ \t]*[\]\}】〕」』]",
        )
        .expect("doc reference pattern"),
        ext_reference: Regex::new(
            r"(?i)[\[\{【〔「『][ \t]*(?:txt|md|pdf|docx?|pptx?)[ \t]*[\]\}】〕」』]",
        )
        .expect("ext reference pattern"),
        empty_brackets: Regex::new(r"【\s*】|〔\s*〕|「\s*」|『\s*』|（\s*）")
            .expect("empty bracket pattern"),
        excess_newlines: Regex::new(r"\n{3,}").expect("newline pattern"),
    })
}

/// Strip embedded citation artifacts from generated text.
///
/// Rules are applied in order: inline `来源:` annotations, `来源:` lines,
/// bracketed document references, emptied full-width bracket pairs, then
/// blank-run collapsing and a final trim. The function is pure and
/// idempotent.
pub fn scrub_citations(raw: &str) -> String {
    let s = scrubber();
    let text = s.inline_citation.replace_all(raw, "");
    let text = s.citation_line.replace_all(&text, "");
    let text = s.doc_reference.replace_all(&text, "");
    let text = s.ext_reference.replace_all(&text, "");
    let text = s.empty_brackets.replace_all(&text, "");
    let text = s.excess_newlines.replace_all(&text, "\n\n");
    text.trim().to_string()
}
