//! Sentence segmentation for the streaming reply pipeline.
//!
//! Generated text arrives as token deltas. As soon as the accumulated buffer
//! contains a sentence-terminating character, the finished sentence is split
//! off and handed to synthesis so audio starts before generation completes.

/// Characters that terminate a sentence (or clause) for synthesis purposes.
/// Both CJK and ASCII sentence punctuation count, as does a line break.
pub const SENTENCE_DELIMITERS: [char; 9] = ['。', '！', '？', '；', '.', '!', '?', ';', '\n'];

/// Splits `buffer` at the earliest delimiter occurrence, scanning left to
/// right. Returns the sentence (delimiter included) and the remainder, or
/// `None` when no delimiter is present.
pub fn split_first_sentence(buffer: &str) -> Option<(&str, &str)> {
    buffer
        .char_indices()
        .find(|(_, c)| SENTENCE_DELIMITERS.contains(c))
        .map(|(idx, c)| buffer.split_at(idx + c.len_utf8()))
}

/// Accumulates streamed token deltas and yields completed sentences.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one delta into the buffer and drains every sentence it
    /// completes, in left-to-right order.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut sentences = Vec::new();
        while let Some((sentence, rest)) = split_first_sentence(&self.buffer) {
            sentences.push(sentence.to_string());
            self.buffer = rest.to_string();
        }
        sentences
    }

    /// Drains whatever is left after the stream ends. The remainder carries
    /// no delimiter by construction.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_earliest_delimiter() {
        let (sentence, rest) = split_first_sentence("你好。世界！").unwrap();
        assert_eq!(sentence, "你好。");
        assert_eq!(rest, "世界！");
    }

    #[test]
    fn prefix_plus_remainder_reconstructs_buffer() {
        let buffer = "first. second? third";
        let (sentence, rest) = split_first_sentence(buffer).unwrap();
        assert_eq!(sentence, "first.");
        assert_eq!(format!("{sentence}{rest}"), buffer);
    }

    #[test]
    fn earliest_wins_across_delimiter_kinds() {
        // '！' appears before '.', so the CJK mark terminates first.
        let (sentence, rest) = split_first_sentence("啊！ok.").unwrap();
        assert_eq!(sentence, "啊！");
        assert_eq!(rest, "ok.");
    }

    #[test]
    fn newline_terminates_a_sentence() {
        let (sentence, rest) = split_first_sentence("line one\nline two").unwrap();
        assert_eq!(sentence, "line one\n");
        assert_eq!(rest, "line two");
    }

    #[test]
    fn no_delimiter_means_no_split() {
        assert!(split_first_sentence("还没说完").is_none());
    }

    #[test]
    fn splitter_emits_sentences_across_deltas() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("先说A").is_empty());
        assert_eq!(splitter.push("。再说B").as_slice(), ["先说A。"]);
        assert_eq!(splitter.push("！").as_slice(), ["再说B！"]);
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn one_delta_can_complete_multiple_sentences() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("一。二！三？尾");
        assert_eq!(sentences.as_slice(), ["一。", "二！", "三？"]);
        assert_eq!(splitter.flush().as_deref(), Some("尾"));
    }

    #[test]
    fn flush_skips_whitespace_only_leftovers() {
        let mut splitter = SentenceSplitter::new();
        splitter.push("done.  ");
        assert!(splitter.flush().is_none());
    }
}
