//! Query model for timegate
//!
//! A deliberately small SELECT dialect: enough structure to rewrite time
//! ranges and aggregation functions while passing everything else through
//! to the backends verbatim. `now()` arithmetic is resolved at parse time
//! against a caller-supplied clock, so a parsed query always carries
//! absolute bounds.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::error::{GateError, GateResult};
use crate::time::{format_timestamp, parse_duration, parse_timestamp};

/// Half-open time window `[min, max)` attached to a statement.
/// `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeBounds {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

impl TimeBounds {
    fn narrow_min(&mut self, t: DateTime<Utc>) {
        self.min = Some(match self.min {
            Some(m) => m.max(t),
            None => t,
        });
    }

    fn narrow_max(&mut self, t: DateTime<Utc>) {
        self.max = Some(match self.max {
            Some(m) => m.min(t),
            None => t,
        });
    }
}

/// One SELECT statement: projection, source, passthrough conditions, the
/// absorbed time window, and any trailing clauses (GROUP BY, LIMIT, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    projection: String,
    source: String,
    conditions: Vec<String>,
    bounds: TimeBounds,
    tail: Option<String>,
}

/// A parsed query: one or more statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statements: Vec<Statement>,
}

impl Query {
    /// Parse `text` against the supplied clock. `now()` arithmetic inside
    /// time predicates is resolved immediately, so rendering always emits
    /// absolute timestamp literals.
    pub fn parse(text: &str, now: DateTime<Utc>) -> GateResult<Query> {
        let mut statements = Vec::new();
        for part in split_outside_quotes(text, ';') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            statements.push(Statement::parse(trimmed, now)?);
        }
        if statements.is_empty() {
            return Err(GateError::Parse("empty query".to_string()));
        }
        Ok(Query { statements })
    }

    /// Build a query holding exactly one statement.
    pub fn single(statement: Statement) -> Query {
        Query {
            statements: vec![statement],
        }
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Constrain every statement to the intersection of its own window with
    /// `[min, max)`. An unbounded side of the original window adopts the
    /// supplied bound. Returns `None` when no statement retains a non-empty
    /// window, meaning the whole query can be skipped.
    pub fn with_time_range(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> Option<Query> {
        let mut any_live = false;
        let statements: Vec<Statement> = self
            .statements
            .iter()
            .map(|s| {
                let (clipped, live) = s.clip(min, max);
                any_live |= live;
                clipped
            })
            .collect();
        if any_live {
            Some(Query { statements })
        } else {
            None
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

impl Statement {
    fn parse(text: &str, now: DateTime<Utc>) -> GateResult<Statement> {
        let select_end = match_leading_keyword(text, "select")
            .ok_or_else(|| GateError::Parse(format!("expected SELECT: '{}'", text)))?;
        let rest = &text[select_end..];

        let (proj_end, from_end) = find_keyword(rest, "from")
            .ok_or_else(|| GateError::Parse(format!("expected FROM: '{}'", text)))?;
        let projection = rest[..proj_end].trim().to_string();
        if projection.is_empty() {
            return Err(GateError::Parse(format!("empty projection: '{}'", text)));
        }
        let rest = &rest[from_end..];

        // The source clause runs until WHERE or a trailing clause begins.
        let where_pos = find_keyword(rest, "where");
        let tail_pos = find_first_keyword(rest, TAIL_KEYWORDS);

        let (source, conditions_text, tail) = match (where_pos, tail_pos) {
            (Some((ws, we)), Some((ts, _))) if ws < ts => (
                rest[..ws].trim(),
                Some(&rest[we..ts]),
                Some(rest[ts..].trim()),
            ),
            (Some((ws, we)), None) => (rest[..ws].trim(), Some(&rest[we..]), None),
            (_, Some((ts, _))) => (rest[..ts].trim(), None, Some(rest[ts..].trim())),
            (None, None) => (rest.trim(), None, None),
        };
        if source.is_empty() {
            return Err(GateError::Parse(format!("empty FROM clause: '{}'", text)));
        }

        let mut conditions = Vec::new();
        let mut bounds = TimeBounds::default();
        if let Some(cond_text) = conditions_text {
            for cond in split_on_keyword(cond_text, "and") {
                let cond = cond.trim();
                if cond.is_empty() {
                    return Err(GateError::Parse(format!("dangling AND: '{}'", text)));
                }
                match parse_time_condition(cond, now)? {
                    Some((op, t)) => apply_time_condition(&mut bounds, op, t),
                    None => conditions.push(cond.to_string()),
                }
            }
        }

        Ok(Statement {
            projection,
            source: source.to_string(),
            conditions,
            bounds,
            tail: tail.map(|t| t.to_string()),
        })
    }

    pub fn bounds(&self) -> TimeBounds {
        self.bounds
    }

    /// The aggregation function name when the projection is a single
    /// function call, e.g. `mean` for `mean(value)`.
    pub fn aggregation_type(&self) -> Option<String> {
        self.aggregation_parts().map(|(name, _)| name.to_lowercase())
    }

    /// Rewrite a single-function projection to use `function` instead,
    /// keeping the argument list: `mean(value)` -> `sum(value)`.
    pub fn with_aggregation(&self, function: &str) -> GateResult<Statement> {
        let (_, args) = self.aggregation_parts().ok_or_else(|| {
            GateError::Parse(format!(
                "projection '{}' has no aggregation function",
                self.projection
            ))
        })?;
        let mut out = self.clone();
        out.projection = format!("{}({})", function, args);
        Ok(out)
    }

    fn aggregation_parts(&self) -> Option<(&str, &str)> {
        let p = self.projection.trim();
        let open = p.find('(')?;
        let name = &p[..open];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        if !p.ends_with(')') {
            return None;
        }
        // The opening paren must close exactly at the end of the projection.
        let mut depth = 0usize;
        for (i, c) in p.char_indices() {
            if i < open {
                continue;
            }
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && i != p.len() - 1 {
                        return None;
                    }
                }
                _ => {}
            }
        }
        Some((name, &p[open + 1..p.len() - 1]))
    }

    /// Intersect this statement's window with `[min, max)`. The returned
    /// flag is false when the intersection is empty; such a statement
    /// renders as a degenerate window so multi-statement queries keep
    /// their result slots aligned.
    fn clip(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> (Statement, bool) {
        let emin = match self.bounds.min {
            Some(m) => m.max(min),
            None => min,
        };
        let emax = match self.bounds.max {
            Some(m) => m.min(max),
            None => max,
        };
        let mut out = self.clone();
        if emin < emax {
            out.bounds = TimeBounds {
                min: Some(emin),
                max: Some(emax),
            };
            (out, true)
        } else {
            out.bounds = TimeBounds {
                min: Some(emax),
                max: Some(emax),
            };
            (out, false)
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.projection, self.source)?;
        let mut parts: Vec<String> = self.conditions.clone();
        if let Some(min) = self.bounds.min {
            parts.push(format!("time >= '{}'", format_timestamp(min)));
        }
        if let Some(max) = self.bounds.max {
            parts.push(format!("time < '{}'", format_timestamp(max)));
        }
        if !parts.is_empty() {
            write!(f, " WHERE {}", parts.join(" AND "))?;
        }
        if let Some(tail) = &self.tail {
            write!(f, " {}", tail)?;
        }
        Ok(())
    }
}

const TAIL_KEYWORDS: &[&str] = &["group", "order", "limit", "offset", "slimit", "soffset"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeOp {
    Ge,
    Gt,
    Lt,
    Le,
    Eq,
}

fn apply_time_condition(bounds: &mut TimeBounds, op: TimeOp, t: DateTime<Utc>) {
    let tick = Duration::nanoseconds(1);
    match op {
        TimeOp::Ge => bounds.narrow_min(t),
        TimeOp::Gt => bounds.narrow_min(t + tick),
        TimeOp::Lt => bounds.narrow_max(t),
        TimeOp::Le => bounds.narrow_max(t + tick),
        TimeOp::Eq => {
            bounds.narrow_min(t);
            bounds.narrow_max(t + tick);
        }
    }
}

/// Recognize `time <op> <expr>` conditions. Returns `None` for conditions
/// that do not mention the time column; those pass through verbatim.
fn parse_time_condition(
    cond: &str,
    now: DateTime<Utc>,
) -> GateResult<Option<(TimeOp, DateTime<Utc>)>> {
    let rest = match match_leading_keyword(cond, "time") {
        Some(end) => cond[end..].trim_start(),
        None => return Ok(None),
    };
    let (op, rest) = if let Some(r) = rest.strip_prefix(">=") {
        (TimeOp::Ge, r)
    } else if let Some(r) = rest.strip_prefix("<=") {
        (TimeOp::Le, r)
    } else if let Some(r) = rest.strip_prefix('>') {
        (TimeOp::Gt, r)
    } else if let Some(r) = rest.strip_prefix('<') {
        (TimeOp::Lt, r)
    } else if let Some(r) = rest.strip_prefix('=') {
        (TimeOp::Eq, r)
    } else {
        return Err(GateError::Parse(format!(
            "unsupported time condition '{}'",
            cond
        )));
    };
    Ok(Some((op, parse_time_expr(rest.trim(), now)?)))
}

/// Time expressions: `now()`, `now() - 5h`, `now() + 1h`, or a quoted
/// RFC 3339 literal.
fn parse_time_expr(expr: &str, now: DateTime<Utc>) -> GateResult<DateTime<Utc>> {
    if let Some(rest) = strip_keyword_prefix(expr, "now()") {
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(now);
        }
        let (sign, dur_text) = if let Some(r) = rest.strip_prefix('-') {
            (-1, r.trim())
        } else if let Some(r) = rest.strip_prefix('+') {
            (1, r.trim())
        } else {
            return Err(GateError::Parse(format!("invalid time expression '{}'", expr)));
        };
        let dur = parse_duration(dur_text)?;
        return Ok(if sign < 0 { now - dur } else { now + dur });
    }
    if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
        return parse_timestamp(&expr[1..expr.len() - 1]);
    }
    Err(GateError::Parse(format!("invalid time expression '{}'", expr)))
}

fn strip_keyword_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// If `text` begins with `word` as a standalone keyword, return the index
/// just past it.
fn match_leading_keyword(text: &str, word: &str) -> Option<usize> {
    let t = text.trim_start();
    let offset = text.len() - t.len();
    if !t.get(..word.len())?.eq_ignore_ascii_case(word) {
        return None;
    }
    let after = &t[word.len()..];
    if after.is_empty() || !after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        Some(offset + word.len())
    } else {
        None
    }
}

/// Scan for a standalone keyword outside quotes and parentheses. Returns
/// `(start_of_word, end_of_word)` byte offsets.
fn find_keyword(text: &str, word: &str) -> Option<(usize, usize)> {
    scan_keywords(text, &[word]).map(|(s, e, _)| (s, e))
}

fn find_first_keyword(text: &str, words: &[&str]) -> Option<(usize, usize)> {
    scan_keywords(text, words).map(|(s, e, _)| (s, e))
}

fn scan_keywords(text: &str, words: &[&str]) -> Option<(usize, usize, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' => {
                quote = Some(c);
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            _ if depth == 0 && is_word_start(bytes, i) => {
                let end = word_end(bytes, i);
                let candidate = &text[i..end];
                for (wi, word) in words.iter().enumerate() {
                    if candidate.eq_ignore_ascii_case(word) {
                        return Some((i, end, wi));
                    }
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    None
}

fn is_word_start(bytes: &[u8], i: usize) -> bool {
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    is_word(bytes[i]) && (i == 0 || !is_word(bytes[i - 1]))
}

fn word_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    end
}

/// Split on a separator character, respecting quoted strings.
fn split_outside_quotes(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == sep => {
                parts.push(std::mem::take(&mut current));
            }
            None => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Split on a standalone keyword (outside quotes and parens), e.g. AND.
fn split_on_keyword(text: &str, word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some((start, end)) = find_keyword(rest, word) {
        parts.push(rest[..start].to_string());
        rest = &rest[end..];
    }
    parts.push(rest.to_string());
    parts
}
