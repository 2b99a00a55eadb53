//! Recover a single code module from free-form backend output.
//!
//! Backends return anything from clean code to markdown essays interleaved
//! with agent tool logs. Extraction is an ordered fallback pipeline; the
//! first rule that produces something wins, and the result records which
//! rule that was.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::Language;

/// Which extraction rule produced the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    /// Fenced block tagged with the target language (or its sibling).
    LanguageTaggedBlock,
    /// Fenced block with any other tag, or none.
    AnyBlock,
    /// Declaration-like lines found in unfenced text.
    Heuristic,
    /// Nothing matched; the cleaned input itself.
    RawPassthrough,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionMethod::LanguageTaggedBlock => "language-tagged-block",
            ExtractionMethod::AnyBlock => "any-block",
            ExtractionMethod::Heuristic => "heuristic",
            ExtractionMethod::RawPassthrough => "raw-passthrough",
        };
        f.write_str(s)
    }
}

/// Code recovered from backend output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCode {
    pub code: String,
    pub method: ExtractionMethod,
}

/// Line prefixes printed by agent CLIs around their tool calls.
const TOOL_LOG_PREFIXES: &[&str] = &[
    "[tool]",
    "tool call:",
    "tool result:",
    "⚙",
    "│",
    "┃",
    "◇",
    "●",
    "─── ",
    "> build",
    "$ ",
];

/// Line openers that look like the start of a module.
const DECLARATION_PREFIXES: &[&str] = &[
    "export ",
    "import ",
    "function ",
    "async function ",
    "class ",
    "abstract class ",
    "interface ",
    "type ",
    "enum ",
    "const ",
    "let ",
    "declare ",
    "/**",
    "'use strict'",
    "\"use strict\"",
];

/// Extract a code module for `language` from raw backend output.
pub fn extract_code(raw: &str, language: Language) -> ExtractedCode {
    let cleaned = strip_tool_logs(raw);
    let blocks = fenced_blocks(&cleaned);

    let tagged: Vec<&str> = blocks
        .iter()
        .filter(|b| language.fence_tags().contains(&b.tag.as_str()) && !b.body.trim().is_empty())
        .map(|b| b.body.as_str())
        .collect();
    if !tagged.is_empty() {
        return ExtractedCode {
            code: tagged.join("\n\n"),
            method: ExtractionMethod::LanguageTaggedBlock,
        };
    }

    let sibling: Vec<&str> = blocks
        .iter()
        .filter(|b| language.sibling_fence_tags().contains(&b.tag.as_str()) && !b.body.trim().is_empty())
        .map(|b| b.body.as_str())
        .collect();
    if !sibling.is_empty() {
        return ExtractedCode {
            code: sibling.join("\n\n"),
            method: ExtractionMethod::LanguageTaggedBlock,
        };
    }

    let any: Vec<&str> = blocks
        .iter()
        .filter(|b| !b.body.trim().is_empty())
        .map(|b| b.body.as_str())
        .collect();
    if !any.is_empty() {
        return ExtractedCode {
            code: any.join("\n\n"),
            method: ExtractionMethod::AnyBlock,
        };
    }

    if let Some(start) = first_declaration_offset(&cleaned) {
        return ExtractedCode {
            code: cleaned[start..].to_string(),
            method: ExtractionMethod::Heuristic,
        };
    }

    ExtractedCode {
        code: cleaned,
        method: ExtractionMethod::RawPassthrough,
    }
}

struct FencedBlock {
    tag: String,
    body: String,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut in_block = false;
    let mut tag = String::new();
    let mut current = String::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if !in_block && trimmed.starts_with("```") {
            in_block = true;
            // "```ts title=calc.ts" → "ts"
            tag = trimmed
                .trim_start_matches('`')
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_lowercase();
            current.clear();
            continue;
        }

        if in_block && trimmed == "```" {
            in_block = false;
            blocks.push(FencedBlock {
                tag: std::mem::take(&mut tag),
                body: std::mem::take(&mut current),
            });
            continue;
        }

        if in_block {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    // Truncated output: keep what the unclosed block accumulated
    if in_block && !current.is_empty() {
        blocks.push(FencedBlock { tag, body: current });
    }

    blocks
}

/// Byte offset of the first declaration-like line, if any.
fn first_declaration_offset(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if DECLARATION_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Remove ANSI escapes and agent tool-log lines.
///
/// Lines inside fenced blocks are code and are never treated as tool logs.
/// Input without either comes back byte-for-byte unchanged.
pub fn strip_tool_logs(raw: &str) -> String {
    let without_ansi = strip_ansi(raw);
    if !without_ansi.lines().any(is_tool_log_line) {
        return without_ansi;
    }
    let mut in_fence = false;
    without_ansi
        .split_inclusive('\n')
        .filter(|line| {
            let trimmed = line.trim();
            if in_fence {
                if trimmed == "```" {
                    in_fence = false;
                }
                return true;
            }
            if trimmed.starts_with("```") {
                in_fence = true;
                return true;
            }
            !is_tool_log_line(line)
        })
        .collect()
}

fn is_tool_log_line(line: &str) -> bool {
    let trimmed = line.trim_start().to_lowercase();
    TOOL_LOG_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn strip_ansi(raw: &str) -> String {
    if !raw.contains('\u{1b}') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        // CSI: ESC [ params final-byte
        if chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
        }
    }
    out
}
