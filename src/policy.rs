use compression_core::Level;
use http::{HeaderValue, StatusCode};
use std::collections::BTreeSet;

/// Default minimum body size for compression (approximately 1 MTU).
pub const DEFAULT_MIN_SIZE: usize = 860;

/// Status codes eligible for compression unless replaced.
pub const DEFAULT_STATUS_CODES: &[u16] = &[200];

/// Content types eligible for compression unless replaced.
pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "application/javascript",
    "application/json",
    "application/x-javascript",
    "application/xml",
    "image/svg+xml",
    "text/css",
    "text/csv",
    "text/html",
    "text/javascript",
    "text/plain",
    "text/xml",
];

/// Content type assumed for responses that never set one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// A single configuration option.
///
/// Options may be applied in any order: `Only*` drops the defaults for its
/// category but keeps everything named by `Add*` as well.
#[derive(Debug, Clone)]
pub enum PolicyOption {
    /// Bodies smaller than this are never compressed.
    MinSize(usize),
    /// Extends the eligible status codes.
    AddStatusCodes(Vec<u16>),
    /// Replaces the default eligible status codes.
    OnlyStatusCodes(Vec<u16>),
    /// Extends the eligible content types.
    AddContentTypes(Vec<String>),
    /// Replaces the default eligible content types.
    OnlyContentTypes(Vec<String>),
    /// Compress even when the request carries a `Range` header.
    IgnoreRange(bool),
    /// Effort level handed to the gzip encoder.
    Level(Level),
}

#[derive(Debug, Clone)]
struct Selection<T> {
    named: BTreeSet<T>,
    replaced: bool,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            named: BTreeSet::new(),
            replaced: false,
        }
    }
}

impl<T: Ord> Selection<T> {
    fn add(&mut self, items: impl IntoIterator<Item = T>) {
        self.named.extend(items);
    }

    fn replace(&mut self, items: impl IntoIterator<Item = T>) {
        self.replaced = true;
        self.named.extend(items);
    }

    fn resolve(self, defaults: impl IntoIterator<Item = T>) -> BTreeSet<T> {
        let mut set = self.named;
        if !self.replaced {
            set.extend(defaults);
        }
        set
    }
}

/// Collects [`PolicyOption`]s and resolves them into a [`Policy`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    min_size: usize,
    status_codes: Selection<u16>,
    content_types: Selection<String>,
    ignore_range: bool,
    level: Level,
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            status_codes: Selection::default(),
            content_types: Selection::default(),
            ignore_range: false,
            level: Level::Default,
        }
    }
}

impl PolicyBuilder {
    /// Creates a builder holding the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a single option.
    pub fn option(self, option: PolicyOption) -> Self {
        match option {
            PolicyOption::MinSize(size) => self.min_size(size),
            PolicyOption::AddStatusCodes(codes) => self.add_status_codes(codes),
            PolicyOption::OnlyStatusCodes(codes) => self.only_status_codes(codes),
            PolicyOption::AddContentTypes(types) => self.add_content_types(types),
            PolicyOption::OnlyContentTypes(types) => self.only_content_types(types),
            PolicyOption::IgnoreRange(ignore) => self.ignore_range(ignore),
            PolicyOption::Level(level) => self.level(level),
        }
    }

    /// Sets the minimum body size required for compression.
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Adds status codes to the default eligible set.
    pub fn add_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes.add(codes.into_iter().map(clamp_status));
        self
    }

    /// Restricts eligible status codes to the ones given here and via
    /// [`add_status_codes`](Self::add_status_codes).
    pub fn only_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes.replace(codes.into_iter().map(clamp_status));
        self
    }

    /// Adds content types to the default eligible set.
    pub fn add_content_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.content_types
            .add(types.into_iter().filter_map(|t| normalize_content_type(t.as_ref())));
        self
    }

    /// Restricts eligible content types to the ones given here and via
    /// [`add_content_types`](Self::add_content_types).
    pub fn only_content_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.content_types
            .replace(types.into_iter().filter_map(|t| normalize_content_type(t.as_ref())));
        self
    }

    /// Keeps compressing when the request asks for a byte range.
    pub fn ignore_range(mut self, ignore: bool) -> Self {
        self.ignore_range = ignore;
        self
    }

    /// Sets the gzip effort level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Resolves the collected options.
    pub fn build(self) -> Policy {
        Policy {
            min_size: self.min_size,
            status_codes: self
                .status_codes
                .resolve(DEFAULT_STATUS_CODES.iter().copied()),
            content_types: self
                .content_types
                .resolve(DEFAULT_CONTENT_TYPES.iter().map(|t| t.to_string())),
            ignore_range: self.ignore_range,
            level: self.level,
        }
    }
}

impl From<Policy> for PolicyBuilder {
    /// Starts from a resolved policy; its sets replace the defaults.
    fn from(policy: Policy) -> Self {
        Self {
            min_size: policy.min_size,
            status_codes: Selection {
                named: policy.status_codes,
                replaced: true,
            },
            content_types: Selection {
                named: policy.content_types,
                replaced: true,
            },
            ignore_range: policy.ignore_range,
            level: policy.level,
        }
    }
}

/// Immutable compression policy shared by every response of one middleware.
#[derive(Debug, Clone)]
pub struct Policy {
    min_size: usize,
    status_codes: BTreeSet<u16>,
    content_types: BTreeSet<String>,
    ignore_range: bool,
    level: Level,
}

impl Default for Policy {
    fn default() -> Self {
        PolicyBuilder::default().build()
    }
}

impl Policy {
    /// Returns a builder holding the default settings.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Resolves a policy from options applied to the defaults.
    pub fn from_options(options: impl IntoIterator<Item = PolicyOption>) -> Self {
        options
            .into_iter()
            .fold(PolicyBuilder::default(), PolicyBuilder::option)
            .build()
    }

    /// Bodies smaller than this are sent as-is.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Whether a `Range` request header is ignored.
    pub fn ignore_range(&self) -> bool {
        self.ignore_range
    }

    /// Effort level handed to the gzip encoder.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Returns `true` if responses with this status may be compressed.
    pub fn is_eligible_status(&self, status: StatusCode) -> bool {
        self.status_codes.contains(&status.as_u16())
    }

    /// Returns `true` if responses with this `Content-Type` may be compressed.
    ///
    /// A missing header is matched as [`DEFAULT_CONTENT_TYPE`].
    pub fn is_eligible_content_type(&self, content_type: Option<&HeaderValue>) -> bool {
        let essence = match content_type {
            None => Some(DEFAULT_CONTENT_TYPE.to_string()),
            Some(value) => value.to_str().ok().and_then(normalize_content_type),
        };
        essence.is_some_and(|essence| self.content_types.contains(&essence))
    }
}

fn clamp_status(code: u16) -> u16 {
    code.clamp(100, 999)
}

/// Strips parameters from a media type and lowercases it.
fn normalize_content_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}
