//! Named text cleanup rules. Each rule is a pure `&str -> String` function;
//! the pipelines below fix the order they run in.

use super::{is_ethiopic_letter, is_noise_symbol};

pub type CleanupRule = fn(&str) -> String;

/// Sentence-level Ethiopic punctuation that attaches to the preceding word.
const ATTACHED_PUNCTUATION: &[char] = &['።', '፣', '፤', '፥', '፦', '፧', '፨'];

pub const TEXT_PIPELINE: &[(&str, CleanupRule)] = &[
    ("normalize_line_endings", normalize_line_endings),
    ("strip_code_fences", strip_code_fences),
    ("normalize_ethiopic_punctuation", normalize_ethiopic_punctuation),
    ("collapse_repeated_punctuation", collapse_repeated_punctuation),
    ("remove_stray_symbols", remove_stray_symbols),
    ("collapse_inline_whitespace", collapse_inline_whitespace),
    ("collapse_blank_lines", collapse_blank_lines),
];

/// Layout text keeps indentation, table pipes and separator rows.
pub const LAYOUT_PIPELINE: &[(&str, CleanupRule)] = &[
    ("normalize_line_endings", normalize_line_endings),
    ("strip_code_fences", strip_code_fences),
    ("normalize_ethiopic_punctuation", normalize_ethiopic_punctuation),
    ("trim_trailing_whitespace", trim_trailing_whitespace),
    ("collapse_blank_lines", collapse_blank_lines),
];

pub fn clean_text(text: &str) -> String {
    run_pipeline(TEXT_PIPELINE, text).trim().to_string()
}

pub fn clean_layout_text(text: &str) -> String {
    run_pipeline(LAYOUT_PIPELINE, text)
        .trim_matches('\n')
        .to_string()
}

fn run_pipeline(pipeline: &[(&str, CleanupRule)], text: &str) -> String {
    pipeline
        .iter()
        .fold(text.to_string(), |current, (_, rule)| rule(&current))
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !(trimmed.starts_with("```") || trimmed.starts_with("~~~"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `፡፡` and an ASCII `::` after an Ethiopic word both become `።`; inline
/// spaces before attached punctuation are dropped.
pub fn normalize_ethiopic_punctuation(text: &str) -> String {
    let text = text.replace("፡፡", "።");
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        if ch == ':' && chars.get(idx + 1) == Some(&':') && follows_ethiopic_word(&output) {
            trim_inline_space(&mut output);
            output.push('።');
            idx += 2;
            continue;
        }
        if ATTACHED_PUNCTUATION.contains(&ch) && follows_ethiopic_word(&output) {
            trim_inline_space(&mut output);
        }
        output.push(ch);
        idx += 1;
    }
    output
}

/// Runs of three or more identical punctuation marks collapse to one mark;
/// dot runs collapse to an ellipsis.
pub fn collapse_repeated_punctuation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        let mut end = idx + 1;
        while end < chars.len() && chars[end] == ch {
            end += 1;
        }
        let run = end - idx;
        if run >= 3 && !ch.is_alphanumeric() && !ch.is_whitespace() {
            if ch == '.' {
                output.push_str("...");
            } else {
                output.push(ch);
            }
        } else {
            for _ in 0..run {
                output.push(ch);
            }
        }
        idx = end;
    }
    output
}

pub fn remove_stray_symbols(text: &str) -> String {
    text.chars().filter(|ch| !is_noise_symbol(*ch)).collect()
}

pub fn collapse_inline_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.split(|ch: char| ch == ' ' || ch == '\t' || ch == '\u{00A0}')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn trim_trailing_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// At most one blank line between paragraphs.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut lines = Vec::new();
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            lines.push("");
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn follows_ethiopic_word(output: &str) -> bool {
    output
        .chars()
        .rev()
        .find(|ch| *ch != ' ' && *ch != '\t')
        .is_some_and(is_ethiopic_letter)
}

fn trim_inline_space(output: &mut String) {
    while output.ends_with(' ') || output.ends_with('\t') {
        output.pop();
    }
}
