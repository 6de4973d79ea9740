//! Ethiopic script analysis: character classes, corruption scanning, quality
//! buckets and the confidence clamp applied to every recognised document.

pub mod cleanup;

use serde::Serialize;

pub use cleanup::{clean_layout_text, clean_text};

/// Ethiopic wordspace/full stop and the rest of the U+1360 block.
const ETHIOPIC_PUNCTUATION: std::ops::RangeInclusive<u32> = 0x1360..=0x1368;

/// Punctuation that may legitimately sit inside or around a word.
const WORD_PUNCTUATION: &str = ".,:;!?()[]\"'«»-–—/%…“”‘’|*#&+=@$_";

/// Characters that only ever appear in recognised text as scanner noise.
const NOISE_SYMBOLS: &[char] = &[
    '~', '^', '`', '\\', '¦', '¤', '¬', '¨', '´', '¸', '\u{FFFD}',
];

pub fn is_ethiopic(ch: char) -> bool {
    matches!(
        ch as u32,
        0x1200..=0x137F | 0x1380..=0x139F | 0x2D80..=0x2DDF | 0xAB00..=0xAB2F
    )
}

pub fn is_ethiopic_punctuation(ch: char) -> bool {
    ETHIOPIC_PUNCTUATION.contains(&(ch as u32))
}

/// Ethiopic syllables (and combining marks), excluding punctuation and numerals.
pub fn is_ethiopic_letter(ch: char) -> bool {
    is_ethiopic(ch) && !is_ethiopic_punctuation(ch) && !matches!(ch as u32, 0x1369..=0x137C)
}

pub fn is_noise_symbol(ch: char) -> bool {
    NOISE_SYMBOLS.contains(&ch) || (ch.is_control() && ch != '\n' && ch != '\t')
}

pub fn contains_target_script(text: &str) -> bool {
    text.chars().any(is_ethiopic_letter)
}

/// Share of alphabetic characters that are Ethiopic, 0.0 for letterless text.
pub fn target_script_share(text: &str) -> f64 {
    let mut ethiopic = 0usize;
    let mut letters = 0usize;
    for ch in text.chars() {
        if is_ethiopic_letter(ch) {
            ethiopic += 1;
            letters += 1;
        } else if ch.is_alphabetic() {
            letters += 1;
        }
    }
    if letters == 0 {
        0.0
    } else {
        ethiopic as f64 / letters as f64
    }
}

pub fn detect_language(text: &str) -> &'static str {
    let mut ethiopic = 0usize;
    let mut latin = 0usize;
    for ch in text.chars() {
        if is_ethiopic_letter(ch) {
            ethiopic += 1;
        } else if ch.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    if ethiopic > 0 && ethiopic >= latin {
        "am"
    } else if latin > 0 {
        "en"
    } else {
        "unknown"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Poor,
    Fair,
    Good,
    Excellent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptionLevel {
    None,
    Low,
    Medium,
    High,
}

impl CorruptionLevel {
    pub fn ceiling(&self) -> Option<f64> {
        match self {
            CorruptionLevel::None => None,
            CorruptionLevel::Low => Some(0.7),
            CorruptionLevel::Medium => Some(0.5),
            CorruptionLevel::High => Some(0.3),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptionSignals {
    pub latin_in_word: usize,
    pub digit_in_word: usize,
    pub repeated_punctuation: usize,
    pub symbol_noise: usize,
}

impl CorruptionSignals {
    pub fn total(&self) -> usize {
        self.latin_in_word + self.digit_in_word + self.repeated_punctuation + self.symbol_noise
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    pub quality: QualityLevel,
    pub corruption: CorruptionLevel,
    pub total_words: usize,
    pub ethiopic_words: usize,
    pub well_formed_words: usize,
    pub latin_words: usize,
    pub signals: CorruptionSignals,
}

pub fn assess(text: &str) -> QualityAssessment {
    let mut signals = CorruptionSignals::default();
    let mut total_words = 0usize;
    let mut ethiopic_words = 0usize;
    let mut well_formed_words = 0usize;
    let mut latin_words = 0usize;

    for token in text.split_whitespace() {
        let has_ethiopic = token.chars().any(is_ethiopic_letter);
        let has_latin = token.chars().any(|ch| ch.is_ascii_alphabetic());
        let has_letter = token.chars().any(char::is_alphabetic);
        let interleaved_digit = has_interleaved_digit(token);
        let noisy = token.chars().any(is_noise_symbol);
        let repeated = repeated_punctuation_runs(token);

        if noisy {
            signals.symbol_noise += 1;
        }
        signals.repeated_punctuation += repeated;
        if !has_letter {
            continue;
        }

        total_words += 1;
        if has_ethiopic {
            ethiopic_words += 1;
        } else if has_latin {
            latin_words += 1;
        }
        if has_ethiopic && has_latin {
            signals.latin_in_word += 1;
        }
        if interleaved_digit {
            signals.digit_in_word += 1;
        }
        if is_well_formed_word(token) {
            well_formed_words += 1;
        }
    }

    let corruption = corruption_level(signals.total(), total_words);
    let quality = quality_level(well_formed_words, total_words, corruption);

    QualityAssessment {
        quality,
        corruption,
        total_words,
        ethiopic_words,
        well_formed_words,
        latin_words,
        signals,
    }
}

/// Applies quality floors/ceilings, then corruption ceilings, and clamps to
/// `[0, 1]`. Corruption ceilings win over the excellent floor.
pub fn adjust_confidence(raw: f64, assessment: &QualityAssessment) -> f64 {
    let mut confidence = if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    };
    match assessment.quality {
        QualityLevel::Poor => confidence = confidence.min(0.4),
        QualityLevel::Excellent => confidence = confidence.max(0.9),
        QualityLevel::Fair | QualityLevel::Good => {}
    }
    if let Some(ceiling) = assessment.corruption.ceiling() {
        confidence = confidence.min(ceiling);
    }
    confidence.clamp(0.0, 1.0)
}

fn corruption_level(signal_count: usize, total_words: usize) -> CorruptionLevel {
    if signal_count == 0 {
        return CorruptionLevel::None;
    }
    if total_words == 0 {
        return CorruptionLevel::High;
    }
    let ratio = signal_count as f64 / total_words as f64;
    if ratio <= 0.05 {
        CorruptionLevel::Low
    } else if ratio <= 0.15 {
        CorruptionLevel::Medium
    } else {
        CorruptionLevel::High
    }
}

fn quality_level(well_formed: usize, total_words: usize, corruption: CorruptionLevel) -> QualityLevel {
    if total_words == 0 {
        return QualityLevel::Poor;
    }
    let ratio = well_formed as f64 / total_words as f64;
    if ratio >= 0.9 && corruption <= CorruptionLevel::Low {
        QualityLevel::Excellent
    } else if ratio >= 0.7 {
        QualityLevel::Good
    } else if ratio >= 0.4 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    }
}

/// A digit with a letter somewhere on both sides, e.g. `ሰላ3ም` or `he1lo`.
fn has_interleaved_digit(token: &str) -> bool {
    let chars: Vec<char> = token.chars().collect();
    chars.iter().enumerate().any(|(idx, ch)| {
        ch.is_ascii_digit()
            && chars[..idx].iter().any(|c| c.is_alphabetic())
            && chars[idx + 1..].iter().any(|c| c.is_alphabetic())
    })
}

fn repeated_punctuation_runs(token: &str) -> usize {
    let mut runs = 0usize;
    let mut previous: Option<char> = None;
    let mut length = 0usize;
    for ch in token.chars().chain(std::iter::once(' ')) {
        if Some(ch) == previous {
            length += 1;
            continue;
        }
        if let Some(prev) = previous
            && is_punctuation(prev)
        {
            let min_run = if prev == '.' { 4 } else { 3 };
            if length >= min_run {
                runs += 1;
            }
        }
        previous = Some(ch);
        length = 1;
    }
    runs
}

fn is_punctuation(ch: char) -> bool {
    !ch.is_alphanumeric() && !ch.is_whitespace()
}

fn is_word_punctuation(ch: char) -> bool {
    WORD_PUNCTUATION.contains(ch) || is_ethiopic_punctuation(ch)
}

/// Keyword co-occurrence check for stock templates (invoices, receipts)
/// that a vision model fabricates instead of reading the page.
#[derive(Debug, Clone)]
pub struct TemplatePolicy {
    pub keywords: Vec<String>,
    pub min_hits: usize,
    pub max_target_share: f64,
}

impl Default for TemplatePolicy {
    fn default() -> Self {
        let keywords = [
            "invoice",
            "bill to",
            "ship to",
            "subtotal",
            "total due",
            "amount due",
            "tax",
            "quantity",
            "qty",
            "unit price",
            "due date",
            "payment terms",
            "purchase order",
            "receipt",
            "lorem ipsum",
        ];
        Self {
            keywords: keywords.iter().map(|value| value.to_string()).collect(),
            min_hits: 3,
            max_target_share: 0.2,
        }
    }
}

impl TemplatePolicy {
    pub fn looks_like_stock_template(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        let hits = self
            .keywords
            .iter()
            .filter(|keyword| contains_keyword(&lower, keyword))
            .count();
        hits >= self.min_hits && target_script_share(text) <= self.max_target_share
    }
}

fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    haystack.match_indices(keyword).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// True when a token is made only of Ethiopic letters and word punctuation.
pub fn is_well_formed_word(token: &str) -> bool {
    token.chars().any(is_ethiopic_letter)
        && token
            .chars()
            .all(|ch| is_ethiopic_letter(ch) || is_word_punctuation(ch))
        && repeated_punctuation_runs(token) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_AMHARIC: &str = "ኢትዮጵያ ታሪካዊ ሀገር ናት። ህዝቦቿ በተለያዩ ቋንቋዎች ይናገራሉ። አዲስ አበባ ዋና ከተማ ናት።";

    #[test]
    fn detects_ethiopic_letters_but_not_punctuation_alone() {
        assert!(contains_target_script("ሰላም world"));
        assert!(!contains_target_script("hello ። ፣"));
        assert!(is_ethiopic_punctuation('።'));
        assert!(!is_ethiopic_letter('፩'));
    }

    #[test]
    fn detects_language_from_letter_mix() {
        assert_eq!(detect_language(CLEAN_AMHARIC), "am");
        assert_eq!(detect_language("Invoice number 42"), "en");
        assert_eq!(detect_language("12 34"), "unknown");
    }

    #[test]
    fn clean_amharic_is_excellent_without_corruption() {
        let assessment = assess(CLEAN_AMHARIC);
        assert_eq!(assessment.quality, QualityLevel::Excellent);
        assert_eq!(assessment.corruption, CorruptionLevel::None);
        assert_eq!(assessment.total_words, assessment.well_formed_words);
    }

    #[test]
    fn latin_inside_ethiopic_words_is_corruption() {
        let assessment = assess("ሰላምabc ኢትዮxጵያ ሀገር ናት");
        assert_eq!(assessment.signals.latin_in_word, 2);
        assert_eq!(assessment.corruption, CorruptionLevel::High);
        assert_eq!(assessment.quality, QualityLevel::Fair);
        assert_eq!(adjust_confidence(0.95, &assessment), 0.3);
    }

    #[test]
    fn interleaved_digits_repeated_punctuation_and_noise_are_counted() {
        let assessment = assess("ሰላ3ም ሀገር!!! ~~ ናት");
        assert_eq!(assessment.signals.digit_in_word, 1);
        assert_eq!(assessment.signals.repeated_punctuation, 1);
        assert_eq!(assessment.signals.symbol_noise, 1);
    }

    #[test]
    fn ellipsis_is_not_repeated_punctuation() {
        assert_eq!(repeated_punctuation_runs("ናት..."), 0);
        assert_eq!(repeated_punctuation_runs("ናት...."), 1);
    }

    #[test]
    fn empty_text_is_poor() {
        let assessment = assess("   ");
        assert_eq!(assessment.quality, QualityLevel::Poor);
        assert_eq!(assessment.corruption, CorruptionLevel::None);
    }

    #[test]
    fn adjusted_confidence_stays_in_unit_interval() {
        let assessment = assess(CLEAN_AMHARIC);
        for raw in [-0.2, 1.7, 0.0, 1.0, 0.55, f64::NAN, f64::INFINITY] {
            let adjusted = adjust_confidence(raw, &assessment);
            assert!((0.0..=1.0).contains(&adjusted), "{raw} -> {adjusted}");
        }
        let poor = assess("");
        assert_eq!(adjust_confidence(1.7, &poor), 0.4);
        assert_eq!(adjust_confidence(-0.2, &poor), 0.0);
    }

    #[test]
    fn high_corruption_caps_at_point_three() {
        let assessment = QualityAssessment {
            quality: QualityLevel::Excellent,
            corruption: CorruptionLevel::High,
            total_words: 10,
            ethiopic_words: 10,
            well_formed_words: 10,
            latin_words: 0,
            signals: CorruptionSignals::default(),
        };
        assert_eq!(adjust_confidence(0.99, &assessment), 0.3);
    }

    #[test]
    fn excellent_quality_raises_to_floor() {
        let assessment = assess(CLEAN_AMHARIC);
        assert_eq!(adjust_confidence(0.5, &assessment), 0.9);
        assert_eq!(adjust_confidence(0.95, &assessment), 0.95);
    }

    #[test]
    fn medium_corruption_beats_good_quality() {
        let assessment = QualityAssessment {
            quality: QualityLevel::Good,
            corruption: CorruptionLevel::Medium,
            total_words: 10,
            ethiopic_words: 8,
            well_formed_words: 8,
            latin_words: 0,
            signals: CorruptionSignals::default(),
        };
        assert_eq!(adjust_confidence(0.8, &assessment), 0.5);
    }

    #[test]
    fn stock_invoice_template_is_flagged() {
        let policy = TemplatePolicy::default();
        let text = "INVOICE\nBill To: ACME Corp\nQty 2  Unit Price 10.00\nSubtotal 20.00\nTax 2.00";
        assert!(policy.looks_like_stock_template(text));
        assert!(!policy.looks_like_stock_template(CLEAN_AMHARIC));
        assert!(!policy.looks_like_stock_template("The syntax of taxonomy"));
    }

    #[test]
    fn assess_counts_words_the_same_way_as_is_well_formed_word() {
        let text = "ናት« ሰላም2 ሀገር~ «ዓለም» ከተማ!!! ቤት።";
        let expected = text
            .split_whitespace()
            .filter(|token| is_well_formed_word(token))
            .count();
        assert_eq!(expected, 3);
        assert_eq!(assess(text).well_formed_words, expected);
    }

    #[test]
    fn well_formed_word_accepts_trailing_ethiopic_punctuation() {
        assert!(is_well_formed_word("ናት።"));
        assert!(!is_well_formed_word("ናትx"));
        assert!(!is_well_formed_word("hello"));
    }
}
