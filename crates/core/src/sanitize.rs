//! Text sanitization for speech synthesis.
//!
//! Generated text carries markdown, emoji and ASCII punctuation that read
//! badly when spoken. `clean_for_tts` rewrites a sentence into speech-safe
//! text: markup is stripped, decorative symbols are dropped, and punctuation
//! is normalized into CJK sentence marks so the synthesizer pauses naturally.
//! Sanitizing already-sanitized text is a fixed point.

use regex::Regex;
use std::sync::LazyLock;

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s*").unwrap());
static BOLD_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static BOLD_UNDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.+?)__").unwrap());
static ITALIC_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static ITALIC_UNDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(.+?)_").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static IMAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]+\)").unwrap());
static BLOCKQUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^>\s*").unwrap());
static UNORDERED_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[*+-]\s+").unwrap());
static ORDERED_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\d+\.\s+").unwrap());
static RULE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[-*_]{3,}\s*$").unwrap());

static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        "[",
        "\u{1F600}-\u{1F64F}",
        "\u{1F300}-\u{1F5FF}",
        "\u{1F680}-\u{1F6FF}",
        "\u{1F1E0}-\u{1F1FF}",
        "\u{1F900}-\u{1F9FF}",
        "\u{1FA00}-\u{1FAFF}",
        "\u{2702}-\u{27B0}",
        "\u{1F004}-\u{1F0CF}",
        "]+",
    ))
    .unwrap()
});
static DECORATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[◆◇●○■□▲△▼▽★☆♠♣♥♦→←↑↓↔↕【】「」『』〖〗]").unwrap());

static PERIOD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(\s|$)").unwrap());
static COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s|$)").unwrap());
static QUESTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\?(\s|$)").unwrap());
static EXCLAIM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!(\s|$)").unwrap());
static COLON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[：:]\s*").unwrap());
static PARENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[（(]([^）)]+)[）)]").unwrap());
static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"——|--").unwrap());
static LONG_ELLIPSIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{3,}").unwrap());
static REPEAT_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[，,]{2,}").unwrap());
static REPEAT_PERIOD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[。.]{2,}").unwrap());
static NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").unwrap());
static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());
static SPACED_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*([，。！？])\s*").unwrap());
static LEADING_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[，。！？、]+").unwrap());

/// Rewrites raw generated text into speech-safe text.
///
/// Rule order matters: markdown is stripped before punctuation is normalized,
/// otherwise list markers like `1. ` would become sentence breaks.
pub fn clean_for_tts(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Markdown structure, keeping the readable content.
    let text = CODE_BLOCK.replace_all(text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = BOLD_STAR.replace_all(&text, "$1");
    let text = BOLD_UNDER.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDER.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = IMAGE.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = UNORDERED_LIST.replace_all(&text, "");
    let text = ORDERED_LIST.replace_all(&text, "");
    let text = RULE_LINE.replace_all(&text, "");

    // Symbols a voice cannot read.
    let text = EMOJI.replace_all(&text, "");
    let text = DECORATION.replace_all(&text, "");

    // Prosody: ASCII sentence punctuation becomes its CJK counterpart, and
    // colons, parentheses and dashes become comma pauses.
    let text = PERIOD.replace_all(&text, "。");
    let text = COMMA.replace_all(&text, "，");
    let text = QUESTION.replace_all(&text, "？");
    let text = EXCLAIM.replace_all(&text, "！");
    let text = COLON.replace_all(&text, "，");
    let text = PARENS.replace_all(&text, "，$1，");
    let text = DASHES.replace_all(&text, "，");
    let text = LONG_ELLIPSIS.replace_all(&text, "...");
    let text = REPEAT_COMMA.replace_all(&text, "，");
    let text = REPEAT_PERIOD.replace_all(&text, "。");

    // Whitespace: line breaks become pauses, runs of spaces collapse, and
    // CJK punctuation sheds surrounding whitespace.
    let text = NEWLINES.replace_all(&text, "，");
    let text = MULTI_SPACE.replace_all(&text, " ");
    let text = SPACED_PUNCT.replace_all(&text, "$1");
    let text = LEADING_PUNCT.replace_all(&text, "");

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizing_is_a_fixed_point() {
        let samples = [
            "**你好**，这是 `code` 的说明。\n- 第一项\n- 第二项",
            "# 标题\n正文（补充说明）结束.",
            "先说A。再说B！",
            "结论：很重要——非常重要。",
            "",
        ];
        for raw in samples {
            let once = clean_for_tts(raw);
            assert_eq!(clean_for_tts(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn strips_markdown_keeping_content() {
        assert_eq!(clean_for_tts("**重点**内容"), "重点内容");
        assert_eq!(clean_for_tts("`let x = 1;` 是代码"), "let x = 1; 是代码");
        assert_eq!(clean_for_tts("[链接文字](https://example.com)"), "链接文字");
        assert_eq!(clean_for_tts("## 标题"), "标题");
    }

    #[test]
    fn removes_code_blocks_entirely() {
        assert_eq!(clean_for_tts("前```rust\nfn main() {}\n```后"), "前后");
    }

    #[test]
    fn normalizes_ascii_sentence_punctuation() {
        assert_eq!(clean_for_tts("好的. 明白了"), "好的。明白了");
        assert_eq!(clean_for_tts("真的吗? "), "真的吗？");
        assert_eq!(clean_for_tts("第一, 第二"), "第一，第二");
    }

    #[test]
    fn colon_and_parens_become_pauses() {
        assert_eq!(clean_for_tts("结论：如下"), "结论，如下");
        assert_eq!(clean_for_tts("模型（大语言模型）很强"), "模型，大语言模型，很强");
    }

    #[test]
    fn drops_leading_punctuation_and_list_markers() {
        assert_eq!(clean_for_tts("，接着说"), "接着说");
        assert_eq!(clean_for_tts("1. 第一点"), "第一点");
        assert_eq!(clean_for_tts("- 一个要点"), "一个要点");
    }

    #[test]
    fn collapses_whitespace_and_newlines() {
        assert_eq!(clean_for_tts("第一段\n\n第二段"), "第一段，第二段");
        assert_eq!(clean_for_tts("太多    空格"), "太多 空格");
    }

    #[test]
    fn already_clean_sentences_pass_through() {
        assert_eq!(clean_for_tts("先说A。"), "先说A。");
        assert_eq!(clean_for_tts("再说B！"), "再说B！");
    }
}
