//! Subtitle layout for YT StoryMaker
//! Splits narration into sentences, spreads them over the visual segments and
//! wraps every chunk into at most three display lines.

use crate::config::SubtitleConfig;
use crate::types::SubtitleChunk;

/// Characters that end a sentence; kept with the sentence they close
const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?'];

/// Closing quotes/brackets that stay attached to a preceding terminator
const CLOSING_MARKS: &[char] = &['」', '』', '）', ')', '"', '\'', '”', '’'];

/// A line may end right after one of these
const SEPARATORS: &[char] = &['、', '，', ',', '・', ';', '；', '：', ':', '…'];

/// Japanese particles, a weaker break point than punctuation
const PARTICLES: &[char] = &['は', 'が', 'を', 'に', 'で', 'と', 'も', 'へ', 'の', 'や'];

pub const MAX_LINES: usize = 3;
pub const DEFAULT_MAX_CHARS_PER_LINE: usize = 30;
pub const ELLIPSIS: &str = "...";

/// Wrapping parameters for one language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLayout {
    pub max_chars: usize,
    /// Words are separated by spaces (false for Japanese/Chinese)
    pub spaced: bool,
}

impl Default for LineLayout {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS_PER_LINE,
            spaced: true,
        }
    }
}

impl LineLayout {
    pub fn for_language(language: &str, config: &SubtitleConfig) -> Self {
        if is_unspaced_language(language) {
            Self {
                max_chars: config.max_chars_per_line_cjk.max(1),
                spaced: false,
            }
        } else {
            Self {
                max_chars: config.max_chars_per_line.max(1),
                spaced: true,
            }
        }
    }

    fn joiner(&self) -> &'static str {
        if self.spaced {
            " "
        } else {
            ""
        }
    }
}

fn is_unspaced_language(language: &str) -> bool {
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    matches!(primary.as_str(), "ja" | "zh")
}

/// Split narration into sentences, each keeping its terminator.
/// Text after the last terminator becomes a final sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        current.push(chars[i]);
        if is_terminator_at(&chars, i) {
            while i + 1 < chars.len()
                && (SENTENCE_TERMINATORS.contains(&chars[i + 1])
                    || CLOSING_MARKS.contains(&chars[i + 1]))
            {
                i += 1;
                current.push(chars[i]);
            }
            flush_sentence(&mut sentences, &mut current);
        }
        i += 1;
    }
    flush_sentence(&mut sentences, &mut current);

    sentences
}

fn is_terminator_at(chars: &[char], i: usize) -> bool {
    let c = chars[i];
    if !SENTENCE_TERMINATORS.contains(&c) {
        return false;
    }
    // 3.5 is a number, not two sentences
    if c == '.' {
        let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
        let next_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if prev_digit && next_digit {
            return false;
        }
    }
    true
}

fn flush_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let normalized = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        sentences.push(normalized);
    }
    current.clear();
}

/// Distribute sentences over `segment_count` buckets, `ceil(n / count)` per bucket.
/// Trailing buckets stay empty when sentences run out.
pub fn bucket_sentences(sentences: Vec<String>, segment_count: usize) -> Vec<Vec<String>> {
    if segment_count == 0 {
        return Vec::new();
    }

    let per_bucket = sentences.len().div_ceil(segment_count).max(1);
    let mut buckets = vec![Vec::new(); segment_count];
    for (i, sentence) in sentences.into_iter().enumerate() {
        buckets[i / per_bucket].push(sentence);
    }
    buckets
}

/// Turn narration into one subtitle chunk per segment
pub fn segment_narration(
    text: &str,
    segment_count: usize,
    layout: &LineLayout,
) -> Vec<SubtitleChunk> {
    bucket_sentences(split_sentences(text), segment_count)
        .into_iter()
        .enumerate()
        .map(|(segment_index, sentences)| {
            let joined = sentences.join(layout.joiner());
            let lines = cap_lines(wrap_text(&joined, layout.max_chars), layout);
            SubtitleChunk {
                text: lines.join("\n"),
                segment_index,
                sentences,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakKind {
    Separator,
    Particle,
}

/// Can a line break sit right before `chars[p]`?
fn break_before(chars: &[char], p: usize) -> Option<BreakKind> {
    let prev = chars[p - 1];
    if chars[p].is_whitespace() || prev.is_whitespace() || SEPARATORS.contains(&prev) {
        Some(BreakKind::Separator)
    } else if PARTICLES.contains(&prev) {
        Some(BreakKind::Particle)
    } else {
        None
    }
}

/// Pick the end of the line starting at `start`. Prefers separators, then
/// particles, in the back half of the window; hard-splits when nothing fits.
fn find_cut(chars: &[char], start: usize, max_chars: usize) -> usize {
    let window_end = start + max_chars;
    let min_fill = start + max_chars.div_ceil(2);

    let mut separator = None;
    let mut particle = None;
    let mut any_separator = None;

    for p in (start + 1..=window_end).rev() {
        match break_before(chars, p) {
            Some(BreakKind::Separator) => {
                if p >= min_fill && separator.is_none() {
                    separator = Some(p);
                }
                if any_separator.is_none() {
                    any_separator = Some(p);
                }
            }
            Some(BreakKind::Particle) => {
                if p >= min_fill && particle.is_none() {
                    particle = Some(p);
                }
            }
            None => {}
        }
    }

    separator
        .or(particle)
        .or(any_separator)
        .unwrap_or(window_end)
}

/// Greedy word-wrap to at most `max_chars` characters per line
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.trim().chars().collect();
    let mut lines = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= chars.len() {
            break;
        }

        if chars.len() - start <= max_chars {
            lines.push(chars[start..].iter().collect::<String>().trim_end().to_string());
            break;
        }

        let cut = find_cut(&chars, start, max_chars);
        let line: String = chars[start..cut].iter().collect();
        lines.push(line.trim_end().to_string());
        start = cut;
    }

    lines
}

/// Keep the first two lines; squash the rest into a truncated third line.
/// Narration past the third line is dropped from the subtitle.
fn cap_lines(lines: Vec<String>, layout: &LineLayout) -> Vec<String> {
    if lines.len() <= MAX_LINES {
        return lines;
    }

    let mut kept: Vec<String> = lines[..MAX_LINES - 1].to_vec();
    let rest = lines[MAX_LINES - 1..].join(layout.joiner());
    let truncated: String = rest.chars().take(layout.max_chars).collect();
    kept.push(format!("{}{}", truncated.trim_end(), ELLIPSIS));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spaced(max_chars: usize) -> LineLayout {
        LineLayout {
            max_chars,
            spaced: true,
        }
    }

    #[test]
    fn test_split_sentences_keeps_terminators() {
        let sentences = split_sentences("今日は晴れ。明日は雨！本当？ Yes. No!");
        assert_eq!(
            sentences,
            vec!["今日は晴れ。", "明日は雨！", "本当？", "Yes.", "No!"]
        );
    }

    #[test]
    fn test_split_sentences_trailing_fragment_and_runs() {
        let sentences = split_sentences("Really?! Wait... and then");
        assert_eq!(sentences, vec!["Really?!", "Wait...", "and then"]);
    }

    #[test]
    fn test_split_sentences_decimal_and_quotes() {
        let sentences = split_sentences("It costs 3.5 dollars. 「すごい。」と言った。");
        assert_eq!(
            sentences,
            vec!["It costs 3.5 dollars.", "「すごい。」", "と言った。"]
        );
    }

    #[test]
    fn test_segment_count_matches() {
        let text = "One. Two. Three. Four. Five.";
        for count in 1..8 {
            assert_eq!(segment_narration(text, count, &spaced(30)).len(), count);
        }
    }

    #[test]
    fn test_zero_segments_is_empty() {
        assert!(segment_narration("One. Two.", 0, &spaced(30)).is_empty());
    }

    #[test]
    fn test_empty_text_gives_empty_chunks() {
        let chunks = segment_narration("", 4, &spaced(30));
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.is_empty() && c.sentences.is_empty()));
        assert_eq!(chunks[3].segment_index, 3);
    }

    #[test]
    fn test_sentences_partitioned_in_order() {
        let texts = [
            "A. B. C. D. E. F. G.",
            "一。二。三。四。五。",
            "Only one sentence without terminator",
            "First! Second? Third. Fourth",
        ];
        for text in texts {
            let expected = split_sentences(text);
            for count in 1..=9 {
                let chunks = segment_narration(text, count, &spaced(30));
                let collected: Vec<String> = chunks
                    .iter()
                    .flat_map(|c| c.sentences.iter().cloned())
                    .collect();
                assert_eq!(collected, expected, "text {:?} count {}", text, count);
            }
        }
    }

    #[test]
    fn test_fewer_sentences_than_segments() {
        let chunks = segment_narration("Hello. World.", 5, &spaced(30));
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].text, "Hello.");
        assert_eq!(chunks[1].text, "World.");
        assert!(chunks[2..].iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_eight_sentences_four_segments() {
        let text = "S1. S2. S3. S4. S5. S6. S7. S8.";
        let chunks = segment_narration(text, 4, &spaced(30));
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            assert_eq!(chunk.sentences.len(), 2);
        }
        assert_eq!(chunks[2].text, "S5. S6.");
    }

    #[test]
    fn test_wrap_at_whitespace() {
        assert_eq!(wrap_text("hello world", 5), vec!["hello", "world"]);
        assert_eq!(
            wrap_text("the quick brown fox jumps", 10),
            vec!["the quick", "brown fox", "jumps"]
        );
    }

    #[test]
    fn test_wrap_hard_splits_long_token() {
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_wrap_prefers_comma() {
        let lines = wrap_text("東京の夜景、とても綺麗でした", 8);
        assert_eq!(lines[0], "東京の夜景、");
    }

    #[test]
    fn test_wrap_lines_never_exceed_limit() {
        let text = "吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。";
        for max in 3..20 {
            for line in wrap_text(text, max) {
                assert!(line.chars().count() <= max, "{:?} > {}", line, max);
            }
        }
    }

    #[test]
    fn test_more_than_three_lines_truncated_with_ellipsis() {
        let text = "aaaa bbbb cccc dddd eeee ffff";
        let layout = spaced(4);
        let lines = cap_lines(wrap_text(text, layout.max_chars), &layout);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "aaaa");
        assert_eq!(lines[1], "bbbb");
        assert_eq!(lines[2], format!("cccc{}", ELLIPSIS));
    }

    #[test]
    fn test_chunk_has_at_most_three_lines() {
        let text = "This narration sentence is long enough to need several lines of wrapping. \
                    And here is another one that keeps going for quite a while longer.";
        let chunks = segment_narration(text, 1, &spaced(20));
        assert!(chunks[0].text.lines().count() <= MAX_LINES);
        assert!(chunks[0].text.ends_with(ELLIPSIS));
    }

    #[test]
    fn test_language_layout() {
        let config = SubtitleConfig::default();
        let ja = LineLayout::for_language("ja-JP", &config);
        assert!(!ja.spaced);
        assert_eq!(ja.max_chars, 16);
        let en = LineLayout::for_language("en", &config);
        assert!(en.spaced);
        assert_eq!(en.max_chars, 30);
    }

    #[test]
    fn test_unspaced_join() {
        let layout = LineLayout {
            max_chars: 16,
            spaced: false,
        };
        let chunks = segment_narration("一。二。三。四。", 2, &layout);
        assert_eq!(chunks[0].text, "一。二。");
    }
}
