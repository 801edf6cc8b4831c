// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-description (`mcd`) parser.
//!
//! A plain-text, line-oriented grammar for the two control types the
//! interaction page can render: a buttons block and a single input line.
//! Hand-rolled rather than built on a parser-combinator crate, matching
//! the teacher's own preference for small line/token scanners over a
//! parsing dependency for grammars this size (see the `driver::claude`
//! and `driver::gemini` JSONL/screen parsers).

use serde::{Deserialize, Serialize};

/// A single button: `{label, value}`, both non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub value: String,
}

/// The optional free-text input line, with its (possibly defaulted) attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputControl {
    /// Parsed but not yet wired into the submit handler's field lookup
    /// (spec §9 Open Question) — the form field key stays hardcoded to
    /// `text` for now. Retained so a future extension can use it.
    pub name: String,
    pub label: String,
    pub submit: String,
}

impl Default for InputControl {
    fn default() -> Self {
        Self { name: "text".to_owned(), label: "Text".to_owned(), submit: "Send".to_owned() }
    }
}

/// Parsed interaction controls: an ordered list of buttons and at most one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDescription {
    pub buttons: Vec<Button>,
    pub input: Option<InputControl>,
}

/// Parse an `mcd` source block. Total: any input, including garbage or
/// empty text, produces a valid (possibly empty) description.
pub fn parse(source: &str) -> ControlDescription {
    let mut buttons = Vec::new();
    let mut input = None;
    let mut in_buttons_block = false;

    for line in source.lines() {
        let trimmed = line.trim();

        if in_buttons_block {
            if trimmed == ":::" {
                in_buttons_block = false;
                continue;
            }
            if let Some(button) = parse_button_line(trimmed) {
                buttons.push(button);
            }
            continue;
        }

        if trimmed == ":::buttons" {
            in_buttons_block = true;
            continue;
        }

        if let Some(stripped) = trimmed.strip_prefix(":::input") {
            input = Some(parse_input_line(stripped));
            continue;
        }

        // Everything else — prose, unrecognized directives, stray `:::`
        // closers outside a block — is silently ignored, not rendered.
    }

    ControlDescription { buttons, input }
}

/// Parse `- [<label>](<value>)`, whitespace-tolerant. Returns `None` if
/// either field is empty after trimming.
fn parse_button_line(line: &str) -> Option<Button> {
    let rest = line.strip_prefix('-')?.trim_start();
    let rest = rest.strip_prefix('[')?;
    let (label, rest) = rest.split_once(']')?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('(')?;
    let (value, _) = rest.split_once(')')?;

    let label = label.trim();
    let value = value.trim();
    if label.is_empty() || value.is_empty() {
        return None;
    }
    Some(Button { label: label.to_owned(), value: value.to_owned() })
}

/// Parse the attribute pairs following `:::input`: `name="value"` tokens,
/// case-insensitive attribute names, unknown attributes ignored.
fn parse_input_line(attrs: &str) -> InputControl {
    let mut input = InputControl::default();
    let mut rest = attrs;

    while let Some(eq_pos) = rest.find('=') {
        let key = rest[..eq_pos].trim();
        let after_eq = rest[eq_pos + 1..].trim_start();
        let Some(quoted) = after_eq.strip_prefix('"') else {
            // Malformed attribute (no opening quote) — stop scanning this line.
            break;
        };
        let Some(end_quote) = quoted.find('"') else {
            break;
        };
        let value = &quoted[..end_quote];
        match key.to_ascii_lowercase().as_str() {
            "name" if !value.is_empty() => input.name = value.to_owned(),
            "label" if !value.is_empty() => input.label = value.to_owned(),
            "submit" if !value.is_empty() => input.submit = value.to_owned(),
            _ => {}
        }
        rest = &quoted[end_quote + 1..];
    }

    input
}
