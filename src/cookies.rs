//! Cookie header parsing and construction.
//!
//! The bridge cares about cookie *cardinality*: a browser carrying two
//! different `code_challenge` cookies (overlapping flows, sibling domains)
//! must be rejected, not silently resolved to one of them. Jar-style
//! abstractions dedupe by name, so the `Cookie` header is parsed by hand.

use axum::http::{HeaderMap, header};

use crate::{Error, Result};

/// Collect every value sent for a cookie, across all `Cookie` headers.
///
/// Values are returned raw — no unescaping, no deduplication.
#[must_use]
pub fn all_values(headers: &HeaderMap, name: &str) -> Vec<String> {
    let mut values = Vec::new();

    for header in headers.get_all(header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.split_once('=') {
                if k.trim() == name {
                    values.push(v.to_string());
                }
            }
        }
    }

    values
}

/// The value of a cookie that must have exactly one *distinct* value.
///
/// Duplicate cookies agreeing on the value are accepted. Zero cookies and
/// conflicting values are the same client error — the caller cannot tell
/// which flow a conflicting cookie belongs to, so neither can we.
pub fn single_value(headers: &HeaderMap, name: &'static str) -> Result<String> {
    let values = all_values(headers, name);

    let Some(first) = values.first() else {
        return Err(Error::AmbiguousCookie(name));
    };
    if values.iter().any(|v| v != first) {
        return Err(Error::AmbiguousCookie(name));
    }

    Ok(first.clone())
}

/// Build a `Set-Cookie` header value scoped to the whole site.
///
/// `SameSite=Lax` still admits the provider's top-level redirect back to
/// `/code`. `Secure` is dropped only for local development.
#[must_use]
pub fn set_cookie_header(name: &str, value: &str, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Whether a value survives a cookie round trip unaltered.
///
/// `;` terminates the pair and control characters get stripped or mangled
/// by user agents, so neither can be parked in a cookie.
#[must_use]
pub fn value_round_trips(value: &str) -> bool {
    !value.chars().any(|c| c == ';' || c.is_control())
}
