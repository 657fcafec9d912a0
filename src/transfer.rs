//! Transfer framing: chunked, fixed-length, or suppressed.
//!
//! Every response gets exactly one framing mode, fixed at commit time. A
//! declared content-length selects fixed-length mode and becomes a budget the
//! body writer validates against; no declaration selects chunked mode, with
//! the native engine producing the on-wire chunk framing; a 101 status
//! suppresses the body entirely.

use http::StatusCode;

use crate::error::Error;
use crate::headers::Headers;

/// How the response body travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// No declared length; the engine emits chunk framing.
    Chunked,
    /// Declared length; every byte written is counted against it.
    Fixed { declared: u64 },
    /// The status line forbids a body (101, 204, 304). Writes are accepted
    /// and discarded.
    Suppressed,
}

/// Parses the declared content-length out of the buffered headers.
///
/// Non-numeric and negative values are faults. Duplicate values are
/// tolerated only when they agree — the transport emits a single
/// content-length, so conflicting duplicates cannot be honored.
pub(crate) fn declared_content_length(headers: &Headers) -> Result<Option<u64>, Error> {
    let Some(values) = headers.get("content-length") else {
        return Ok(None);
    };

    let mut declared: Option<u64> = None;
    for raw in values {
        let parsed: u64 = raw
            .trim()
            .parse()
            .map_err(|_| Error::InvalidContentLength(raw.clone()))?;
        match declared {
            None => declared = Some(parsed),
            Some(first) if first == parsed => {}
            Some(_) => return Err(Error::InvalidContentLength(raw.clone())),
        }
    }
    Ok(declared)
}

/// Selects the framing mode for a committed head.
///
/// An explicit `transfer-encoding` is only meaningful as the single token
/// `chunked` — the engine owns the framing and cannot emit anything else —
/// and it cannot coexist with a declared content-length.
pub(crate) fn negotiate(status: StatusCode, headers: &Headers) -> Result<TransferMode, Error> {
    if status == StatusCode::SWITCHING_PROTOCOLS
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(TransferMode::Suppressed);
    }

    let chunked_requested = match headers.get("transfer-encoding") {
        None => false,
        Some(values) => {
            let lone_chunked =
                values.len() == 1 && values[0].trim().eq_ignore_ascii_case("chunked");
            if !lone_chunked {
                return Err(Error::InvalidHeader("transfer-encoding".into()));
            }
            true
        }
    };

    match declared_content_length(headers)? {
        Some(declared) => {
            if chunked_requested {
                // Both framings declared at once — no coherent wire format.
                return Err(Error::InvalidHeader("transfer-encoding".into()));
            }
            Ok(TransferMode::Fixed { declared })
        }
        None => Ok(TransferMode::Chunked),
    }
}

/// Validates the byte count at end of body. Either direction of mismatch is
/// a fault: padding would corrupt the framing and truncation would hang the
/// client, so the connection aborts instead.
pub(crate) fn end_check(mode: TransferMode, written: u64) -> Result<(), Error> {
    match mode {
        TransferMode::Fixed { declared } if written < declared => {
            Err(Error::BodyUnderrun { declared, written })
        }
        TransferMode::Fixed { declared } if written > declared => {
            Err(Error::BodyOverrun { declared, written })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_content_length(value: &str) -> Headers {
        let mut headers = Headers::new();
        headers.set("Content-Length", vec![value.to_owned()]);
        headers
    }

    #[test]
    fn absent_length_is_chunked() {
        let mode = negotiate(StatusCode::OK, &Headers::new()).unwrap();
        assert_eq!(mode, TransferMode::Chunked);
    }

    #[test]
    fn declared_length_is_fixed() {
        let mode = negotiate(StatusCode::OK, &with_content_length("100")).unwrap();
        assert_eq!(mode, TransferMode::Fixed { declared: 100 });
    }

    #[test]
    fn negative_length_is_a_fault() {
        assert!(matches!(
            negotiate(StatusCode::OK, &with_content_length("-10")),
            Err(Error::InvalidContentLength(_))
        ));
    }

    #[test]
    fn non_numeric_length_is_a_fault() {
        assert!(matches!(
            negotiate(StatusCode::OK, &with_content_length("ten")),
            Err(Error::InvalidContentLength(_))
        ));
    }

    #[test]
    fn agreeing_duplicates_are_honored_conflicting_fault() {
        let mut headers = Headers::new();
        headers.set("content-length", vec!["5".into(), "5".into()]);
        assert_eq!(
            declared_content_length(&headers).unwrap(),
            Some(5)
        );

        headers.set("content-length", vec!["5".into(), "6".into()]);
        assert!(declared_content_length(&headers).is_err());
    }

    #[test]
    fn bodyless_statuses_suppress_framing() {
        for status in [
            StatusCode::SWITCHING_PROTOCOLS,
            StatusCode::NO_CONTENT,
            StatusCode::NOT_MODIFIED,
        ] {
            let mode = negotiate(status, &with_content_length("10")).unwrap();
            assert_eq!(mode, TransferMode::Suppressed);
        }
    }

    #[test]
    fn chunked_token_any_case_is_accepted() {
        let mut headers = Headers::new();
        headers.set("Transfer-Encoding", vec!["ChUnKed".into()]);
        assert_eq!(negotiate(StatusCode::OK, &headers).unwrap(), TransferMode::Chunked);
    }

    #[test]
    fn foreign_transfer_encoding_is_a_fault() {
        let mut headers = Headers::new();
        headers.set("transfer-encoding", vec!["gzip".into()]);
        assert!(negotiate(StatusCode::OK, &headers).is_err());
    }

    #[test]
    fn chunked_with_declared_length_is_a_fault() {
        let mut headers = Headers::new();
        headers.set("transfer-encoding", vec!["chunked".into()]);
        headers.set("content-length", vec!["10".into()]);
        assert!(negotiate(StatusCode::OK, &headers).is_err());
    }

    #[test]
    fn end_check_flags_both_directions() {
        let fixed = TransferMode::Fixed { declared: 100 };
        assert!(matches!(end_check(fixed, 95), Err(Error::BodyUnderrun { .. })));
        assert!(matches!(end_check(fixed, 105), Err(Error::BodyOverrun { .. })));
        assert!(end_check(fixed, 100).is_ok());
        assert!(end_check(TransferMode::Chunked, 3).is_ok());
    }
}
