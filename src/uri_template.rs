//! C1 — RFC 6570 Level 1 URI template matcher (spec.md §4.1).
//!
//! Templates use `{name}` placeholders; `{+name}` (reserved expansion) is
//! the one operator beyond Level 1 this spec carries, and it is the only
//! one that matches across `/`. A template's "shape" is the template
//! string with every `{...}` replaced by a sentinel, used by conflict
//! detection to compare templates without caring about variable names.

use std::collections::HashMap;

use regex::Regex;

/// Result of matching a concrete URI against a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub matches: bool,
    pub vars: HashMap<String, String>,
}

impl MatchResult {
    fn no_match() -> Self {
        Self {
            matches: false,
            vars: HashMap::new(),
        }
    }
}

/// True if `uri` contains a `{...}` placeholder.
pub fn is_template(uri: &str) -> bool {
    uri.contains('{') && uri.contains('}')
}

/// Reject templates with unbalanced braces (checked at group-load time, §4.1 edge cases).
pub fn has_balanced_braces(uri: &str) -> bool {
    let mut depth: i32 = 0;
    for c in uri.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// One parsed segment of a template: either literal text or a named variable.
enum Segment<'a> {
    Literal(&'a str),
    Var { name: &'a str, reserved: bool },
}

/// Split a template string into literal and `{var}`/`{+var}` segments.
fn parse_segments(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            // Unbalanced; treat the remainder as a literal (load-time validation rejects this case).
            segments.push(Segment::Literal(&rest[open..]));
            return segments;
        };
        let inner = &after_open[..close];
        let (reserved, name) = match inner.strip_prefix('+') {
            Some(n) => (true, n),
            None => (false, inner),
        };
        segments.push(Segment::Var { name, reserved });
        rest = &after_open[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}

/// Escape a literal segment for inclusion in a regex pattern.
fn escape(literal: &str) -> String {
    regex::escape(literal)
}

/// Build a regex (with named capture groups) that matches exactly what the template matches.
fn compile(template: &str) -> Option<Regex> {
    let mut pattern = String::from("^");
    for segment in parse_segments(template) {
        match segment {
            Segment::Literal(text) => pattern.push_str(&escape(text)),
            Segment::Var { name, reserved } => {
                let class = if reserved { ".+" } else { "[^/]+" };
                pattern.push_str(&format!("(?P<{name}>{class})"));
            }
        }
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

/// `match(uri, template)` per §4.1: non-template inputs compare by string equality.
pub fn match_uri(uri: &str, template: &str) -> MatchResult {
    if !is_template(template) {
        return MatchResult {
            matches: uri == template,
            vars: HashMap::new(),
        };
    }

    if template.is_empty() {
        // Edge case: empty template matches iff the URI is empty.
        return MatchResult {
            matches: uri.is_empty(),
            vars: HashMap::new(),
        };
    }

    let Some(re) = compile(template) else {
        return MatchResult::no_match();
    };

    match re.captures(uri) {
        Some(caps) => {
            let vars = re
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect();
            MatchResult {
                matches: true,
                vars,
            }
        }
        None => MatchResult::no_match(),
    }
}

/// `templateCoversExact(template, exactUri)` per §4.1: escape literals, replace
/// each `{...}` with `.*`, test a full-string match.
pub fn template_covers_exact(template: &str, exact_uri: &str) -> bool {
    if !is_template(template) {
        return template == exact_uri;
    }
    let mut pattern = String::from("^");
    for segment in parse_segments(template) {
        match segment {
            Segment::Literal(text) => pattern.push_str(&escape(text)),
            Segment::Var { .. } => pattern.push_str(".*"),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map(|re| re.is_match(exact_uri))
        .unwrap_or(false)
}

/// `templatesOverlap(t1, t2)` per §4.1: equal strings trivially overlap;
/// otherwise substitute a sentinel into each and test cross-coverage.
pub fn templates_overlap(t1: &str, t2: &str) -> bool {
    if t1 == t2 {
        return true;
    }
    const SENTINEL: &str = "example";
    let sample1 = substitute_sentinel(t1, SENTINEL);
    let sample2 = substitute_sentinel(t2, SENTINEL);
    template_covers_exact(t1, &sample2) || template_covers_exact(t2, &sample1)
}

/// Replace every `{...}` placeholder with a literal sentinel value, producing
/// a concrete example URI from a template.
fn substitute_sentinel(template: &str, sentinel: &str) -> String {
    let mut out = String::new();
    for segment in parse_segments(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Var { .. } => out.push_str(sentinel),
        }
    }
    out
}

/// Produce a concrete example URI for a conflict diagnostic, numbering
/// successive placeholders `value1`, `value2`, ... when more than one is present.
pub fn example_uri(template: &str) -> String {
    let mut out = String::new();
    let mut n = 0usize;
    for segment in parse_segments(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Var { .. } => {
                n += 1;
                out.push_str(&format!("value{n}"));
            }
        }
    }
    out
}

/// Reconstruct a concrete backend URI from a (possibly different) template
/// using variables extracted from a client-side match (§4.5 "if the override
/// altered the URI template, the substitution uses the extracted variables
/// to reconstruct the backend URI").
pub fn expand(template: &str, vars: &HashMap<String, String>) -> Option<String> {
    let mut out = String::new();
    for segment in parse_segments(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Var { name, .. } => out.push_str(vars.get(name)?),
        }
    }
    Some(out)
}
