//! HTTP `Range` header resolution.

/// How to answer a request for a file of a known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// No usable range; send the whole file with 200.
    Full,
    /// Inclusive byte range; send 206.
    Partial { start: u64, end: u64 },
    /// Syntactically valid but outside the file; send 416.
    Unsatisfiable,
}

impl RangeSpec {
    pub fn len(&self, total: u64) -> u64 {
        match self {
            RangeSpec::Full => total,
            RangeSpec::Partial { start, end } => end - start + 1,
            RangeSpec::Unsatisfiable => 0,
        }
    }
}

/// Resolve a `Range` header against a file of `total` bytes.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
///
/// Headers that do not parse as a single byte range (other units, multiple
/// ranges, garbage) are ignored and the full file is served.
pub fn resolve_range(header: Option<&str>, total: u64) -> RangeSpec {
    let Some(header) = header else {
        return RangeSpec::Full;
    };
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeSpec::Full;
    };
    if spec.contains(',') {
        return RangeSpec::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return RangeSpec::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        // bytes=-500
        (true, false) => {
            let Ok(suffix_len) = end.parse::<u64>() else {
                return RangeSpec::Full;
            };
            if suffix_len == 0 || total == 0 {
                return RangeSpec::Unsatisfiable;
            }
            RangeSpec::Partial {
                start: total.saturating_sub(suffix_len),
                end: total - 1,
            }
        }
        // bytes=500-
        (false, true) => {
            let Ok(start) = start.parse::<u64>() else {
                return RangeSpec::Full;
            };
            if start >= total {
                return RangeSpec::Unsatisfiable;
            }
            RangeSpec::Partial {
                start,
                end: total - 1,
            }
        }
        // bytes=0-499
        (false, false) => {
            let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) else {
                return RangeSpec::Full;
            };
            if start > end {
                return RangeSpec::Full;
            }
            if start >= total {
                return RangeSpec::Unsatisfiable;
            }
            RangeSpec::Partial {
                start,
                end: end.min(total - 1),
            }
        }
        // bytes=-
        (true, true) => RangeSpec::Full,
    }
}
