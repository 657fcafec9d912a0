//! Header collections and projection onto the native engine.
//!
//! The environment side of the bridge speaks in an ordered, case-insensitive
//! multimap: header name → sequence of string values. The native side (hyper)
//! speaks `http::HeaderMap`. This module owns both directions, and the
//! special treatment of the headers the transport refuses to pass through
//! verbatim.

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::error::Error;

/// Header names the native engine gives special handling instead of the
/// generic add path. `content-length` and `transfer-encoding` drive the
/// transfer mode, `connection` is normalized, `keep-alive` is a
/// transport-managed hint that is never emitted literally.
const RESTRICTED: [&str; 4] = ["content-length", "transfer-encoding", "connection", "keep-alive"];

pub(crate) fn is_restricted(name: &str) -> bool {
    RESTRICTED.iter().any(|r| name.eq_ignore_ascii_case(r))
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// An ordered multimap of header name → values, matched case-insensitively.
///
/// Insertion order is preserved, as is the multiplicity of values: a header
/// supplied as three array entries is three emitted header lines, not one
/// joined line. Absence of a name means the key is not present — there is no
/// empty-sequence state.
#[derive(Debug, Default, Clone)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive lookup of all values for `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First value for `name`, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces all values for `name`, keeping the original position when the
    /// name was already present. An empty `values` removes the entry — absence
    /// of a header means the key is not present.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        if values.is_empty() {
            self.remove(&name);
            return;
        }
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((name, values)),
        }
    }

    /// Appends one value to `name`, creating the entry if needed.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => existing.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Snapshot of a native header map, used when the listener populates the
    /// request side of the environment. Non-UTF-8 values are carried through
    /// lossily — the native parser has already bounded them to legal header
    /// octets.
    pub fn from_native(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for name in map.keys() {
            let values = map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            headers.entries.push((name.as_str().to_owned(), values));
        }
        headers
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

// ── Projection onto the native engine ─────────────────────────────────────────

/// Copies the buffered response headers into the native header map.
///
/// Generic headers pass through with name, order and multiplicity intact.
/// The restricted set does not take the generic path:
///
/// - `content-length` / `transfer-encoding` — framing, decided by the
///   transfer mode before this runs; skipped here.
/// - `connection` — token values are normalized to lowercase, the way the
///   engine itself would emit them.
/// - `keep-alive` — swallowed; HTTP/1.1 connections are persistent unless
///   `connection: close` says otherwise, and the engine owns that decision.
///
/// A name or value the native map rejects is a contract violation, not a
/// silent skip: the head is about to hit the wire and dropping a header the
/// application set would corrupt the response it described.
pub(crate) fn project_response(src: &Headers, dst: &mut HeaderMap) -> Result<(), Error> {
    for (name, values) in src.iter() {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
            || name.eq_ignore_ascii_case("keep-alive")
        {
            continue;
        }

        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(name.to_owned()))?;

        if header_name == http::header::CONNECTION {
            for value in values {
                let normalized = value.to_ascii_lowercase();
                let header_value = HeaderValue::from_str(normalized.trim())
                    .map_err(|_| Error::InvalidHeader(name.to_owned()))?;
                dst.append(&header_name, header_value);
            }
            continue;
        }

        for value in values {
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| Error::InvalidHeader(name.to_owned()))?;
            dst.append(&header_name, header_value);
        }
    }
    Ok(())
}
