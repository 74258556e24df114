//! `Range: bytes=start-end` header parsing and validation.

/// Upper bound on the header value length we will parse. Longer values are
/// rejected outright so abusive headers cost bounded work.
const MAX_RANGE_HEADER_LEN: usize = 256;

/// How a request's `Range` header maps onto a resource of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested: serve the whole resource with status 200.
    Full,
    /// A satisfiable window: serve `start..=end` with status 206.
    Window {
        /// First byte offset (inclusive).
        start: u64,
        /// Last byte offset (inclusive), always `< size`.
        end: u64,
    },
    /// Malformed or out-of-bounds: respond 416 with `Content-Range: bytes */size`.
    Unsatisfiable,
}

/// Resolves an optional `Range` header value against the resource size.
///
/// - absent header: [`RangeOutcome::Full`]
/// - `bytes=a-b` with `a <= b' < size` (where `b'` is `b` clamped to the
///   last byte): [`RangeOutcome::Window`]
/// - `bytes=a-` (open-ended): window through the last byte
/// - anything malformed, `start >= size`, or `start > end`:
///   [`RangeOutcome::Unsatisfiable`]
#[must_use]
pub fn resolve_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Full;
    };

    if header.len() > MAX_RANGE_HEADER_LEN {
        return RangeOutcome::Unsatisfiable;
    }

    let Some((start, requested_end)) = parse_range_header(header) else {
        return RangeOutcome::Unsatisfiable;
    };

    if size == 0 || start >= size {
        return RangeOutcome::Unsatisfiable;
    }

    let end = requested_end.map_or(size - 1, |e| e.min(size - 1));
    if start > end {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Window { start, end }
}

/// Parses a `Range: bytes=START-END` header value.
/// Returns `(start, optional_end)`.
fn parse_range_header(range: &str) -> Option<(u64, Option<u64>)> {
    let range = range.strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end.trim();
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some((start, end))
}
