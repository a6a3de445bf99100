use crate::codec::{self, GZIP};
use crate::policy::Policy;
use http::{HeaderMap, HeaderValue, StatusCode, header};

/// Outcome of evaluating a response against a [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Gzip the body.
    Compress,
    /// Send the body as written.
    Passthrough,
    /// Not enough is known yet.
    Undecided,
}

impl Verdict {
    /// Returns `true` for [`Compress`](Self::Compress) and
    /// [`Passthrough`](Self::Passthrough).
    pub fn is_decided(self) -> bool {
        self != Verdict::Undecided
    }
}

/// What the request says about compressing its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestFacts {
    /// `Accept-Encoding` admits gzip.
    pub accepts_gzip: bool,
    /// A `Range` header is present.
    pub range_requested: bool,
}

impl RequestFacts {
    /// Extracts the facts from request headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let accepts_gzip = headers
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(codec::accepts_gzip);

        Self {
            accepts_gzip,
            range_requested: headers.contains_key(header::RANGE),
        }
    }
}

/// What is known about a response at the time of evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ResponseFacts<'a> {
    /// Status code, once set explicitly or implied by the first body byte.
    pub status: Option<StatusCode>,
    /// Response headers as set so far.
    pub headers: &'a HeaderMap,
    /// Body bytes held back so far.
    pub buffered: usize,
    /// Total body length, when known up front.
    pub expected_len: Option<u64>,
    /// No more body bytes will arrive.
    pub finished: bool,
}

/// Decides whether a response should be compressed.
///
/// Request-level rules decide immediately. Response-level rules wait for the
/// status code; until then, and until enough of the body has been seen, the
/// result is [`Verdict::Undecided`].
pub fn decide(request: &RequestFacts, response: &ResponseFacts<'_>, policy: &Policy) -> Verdict {
    if !request.accepts_gzip {
        return Verdict::Passthrough;
    }
    if request.range_requested && !policy.ignore_range() {
        return Verdict::Passthrough;
    }

    let Some(status) = response.status else {
        return Verdict::Undecided;
    };
    let headers = response.headers;
    let content_type = headers.get(header::CONTENT_TYPE);

    if content_type.is_some_and(is_precompressed_content_type)
        || headers.contains_key(header::CONTENT_ENCODING)
        || headers.contains_key(header::CONTENT_RANGE)
    {
        return Verdict::Passthrough;
    }
    if !policy.is_eligible_status(status) {
        return Verdict::Passthrough;
    }
    if !policy.is_eligible_content_type(content_type) {
        return Verdict::Passthrough;
    }

    let min_size = policy.min_size();
    if response.buffered >= min_size {
        return Verdict::Compress;
    }
    if let Some(len) = response.expected_len {
        return if len >= min_size as u64 {
            Verdict::Compress
        } else {
            Verdict::Passthrough
        };
    }
    if response.finished {
        return Verdict::Passthrough;
    }
    Verdict::Undecided
}

/// Applies a terminal verdict to the response headers.
pub fn finalize_headers(headers: &mut HeaderMap, verdict: Verdict) {
    if verdict != Verdict::Compress {
        return;
    }

    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(GZIP));

    // Remove Content-Length since compressed size is unknown
    headers.remove(header::CONTENT_LENGTH);

    // Remove Accept-Ranges since we can't support ranges on compressed content
    headers.remove(header::ACCEPT_RANGES);

    add_vary_accept_encoding(headers);
}

/// Parses `Content-Length`, if present and valid.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn is_precompressed_content_type(content_type: &HeaderValue) -> bool {
    content_type
        .to_str()
        .map(|ct| ct.to_ascii_lowercase().contains(GZIP))
        .unwrap_or(false)
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let covered = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| {
            let v = v.trim();
            v == "*" || v.eq_ignore_ascii_case("accept-encoding")
        });

    if !covered {
        headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
    }
}
