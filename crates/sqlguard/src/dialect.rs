//! Placeholder dialects and the quote-aware `?` scanner.
//!
//! Statements are assembled with `?` markers. [`Dialect::finalize`] rewrites them to
//! `$1, $2, …` for Postgres in one pass that skips quoted literal text: `'…'`
//! strings, `E'…'` strings with backslash escapes, `"…"` identifiers and
//! `$tag$…$tag$` dollar-quoted bodies.

use crate::value::Value;

/// Positional-argument marker family of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Dialect {
    /// `?` per argument.
    #[default]
    Generic,
    /// Numbered `$1, $2, …` markers.
    Postgres,
}

impl Dialect {
    /// Detect the dialect from a driver type name (e.g. `std::any::type_name` of the client).
    pub fn detect(driver_name: &str) -> Self {
        let lower = driver_name.to_ascii_lowercase();
        if ["postgres", "pgx", "pq"].iter().any(|s| lower.contains(s)) {
            Self::Postgres
        } else {
            Self::Generic
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Postgres => "postgres",
        }
    }

    /// Render the final statement text for this dialect.
    pub fn finalize(self, sql: &str) -> String {
        match self {
            Self::Generic => sql.to_string(),
            Self::Postgres => number_placeholders(sql),
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || !b.is_ascii()
}

/// Length of a `$tag$` opener at `start`, `$$` included. `$1` is not one.
fn dollar_tag_len(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes.get(start + 1) {
        Some(b'$') => return Some(2),
        Some(&b) if b.is_ascii_alphabetic() || b == b'_' || !b.is_ascii() => {}
        _ => return None,
    }
    let mut i = start + 2;
    while let Some(&b) = bytes.get(i) {
        if b == b'$' {
            return Some(i + 1 - start);
        }
        if !is_ident_byte(b) {
            return None;
        }
        i += 1;
    }
    None
}

/// Index just past the quoted text opened at `start`, or `None` when no literal
/// or quoted identifier starts there. An unterminated literal runs to the end.
fn literal_end(bytes: &[u8], start: usize) -> Option<usize> {
    let follows_ident = start > 0 && is_ident_byte(bytes[start - 1]);
    let (quote, escapes) = match bytes[start] {
        b'\'' => {
            let e_prefix = follows_ident
                && matches!(bytes[start - 1], b'E' | b'e')
                && !(start > 1 && is_ident_byte(bytes[start - 2]));
            (b'\'', e_prefix)
        }
        b'"' => (b'"', false),
        b'$' if !follows_ident => {
            let len = dollar_tag_len(bytes, start)?;
            let tag = &bytes[start..start + len];
            let body = start + len;
            let close = bytes[body..]
                .windows(len)
                .position(|w| w == tag)
                .map_or(bytes.len(), |at| body + at + len);
            return Some(close);
        }
        _ => return None,
    };

    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if escapes && b == b'\\' {
            i += 2;
        } else if b == quote && bytes.get(i + 1) == Some(&quote) {
            i += 2;
        } else if b == quote {
            return Some(i + 1);
        } else {
            i += 1;
        }
    }
    Some(bytes.len())
}

/// Byte offsets of every `?` outside quoted text.
fn placeholder_offsets(sql: &str) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let mut offsets = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = literal_end(bytes, i) {
            i = end;
            continue;
        }
        if bytes[i] == b'?' {
            offsets.push(i);
        }
        i += 1;
    }
    offsets
}

/// Number of placeholder markers outside quoted text.
pub fn count_placeholders(sql: &str) -> usize {
    placeholder_offsets(sql).len()
}

/// Replace the k-th unquoted `?` with a group of `widths[k]` markers wherever
/// `widths[k]` is `Some`. Markers past the end of `widths` are left alone.
pub fn expand_placeholders(sql: &str, widths: &[Option<usize>]) -> String {
    let mut out = String::with_capacity(sql.len() + widths.len() * 4);
    let mut last = 0;
    for (at, width) in placeholder_offsets(sql).into_iter().zip(widths) {
        let Some(n) = width else { continue };
        out.push_str(&sql[last..at]);
        out.push('(');
        for i in 0..*n {
            if i > 0 {
                out.push_str(", ");
            }
            out.push('?');
        }
        out.push(')');
        last = at + 1;
    }
    out.push_str(&sql[last..]);
    out
}

/// Rewrite every unquoted `?` to `$1, $2, …` in order of appearance.
pub fn number_placeholders(sql: &str) -> String {
    let offsets = placeholder_offsets(sql);
    let mut out = String::with_capacity(sql.len() + offsets.len() * 2);
    let mut last = 0;
    for (idx, at) in offsets.into_iter().enumerate() {
        out.push_str(&sql[last..at]);
        out.push('$');
        out.push_str(&(idx + 1).to_string());
        last = at + 1;
    }
    out.push_str(&sql[last..]);
    out
}

/// Render `sql` with literal argument values for human-readable logging.
///
/// Text is single-quoted with embedded quotes doubled. The output is never executed.
pub fn interpolate(sql: &str, args: &[Value], dialect: Dialect) -> String {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let bytes = sql.as_bytes();
    let mut next_arg = 0usize;
    let mut i = 0usize;
    let mut copied = 0usize;

    while i < bytes.len() {
        if let Some(end) = literal_end(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'?' if dialect == Dialect::Generic => {
                out.push_str(&sql[copied..i]);
                push_arg(&mut out, args.get(next_arg));
                next_arg += 1;
                i += 1;
                copied = i;
            }
            b'$' if dialect == Dialect::Postgres => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|d| d.is_ascii_digit())
                    .count();
                if digits == 0 {
                    i += 1;
                    continue;
                }
                let n: usize = sql[i + 1..i + 1 + digits].parse().unwrap_or(0);
                out.push_str(&sql[copied..i]);
                push_arg(&mut out, n.checked_sub(1).and_then(|k| args.get(k)));
                i += 1 + digits;
                copied = i;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

fn push_arg(out: &mut String, arg: Option<&Value>) {
    match arg {
        Some(v) => out.push_str(&v.to_literal()),
        None => out.push('?'),
    }
}
