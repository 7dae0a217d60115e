//! Criteria compilation.
//!
//! Every raw criterion of a search becomes one [`Check`]: a typed matcher plus
//! the inverse and mismatch flags that decide whether a match is wanted. Any
//! malformed criterion fails the whole compilation.
//!
//! | criterion | syntax                                   | matcher                 |
//! |-----------|------------------------------------------|-------------------------|
//! | content   | regex, leading `!` inverts               | per line, lossy UTF-8   |
//! | name      | regex, leading `!` inverts               | file base name          |
//! | mode      | regex, leading `!` inverts               | mode string `-rw-r--r--`|
//! | size      | `<N`, `>N`, `N` with `k/m/g/t` suffix    | byte range              |
//! | mtime     | `<N` or `>N` with `m/h/d` unit           | timestamp window        |
//! | md5..sha3 | hex digest                               | uppercase equality      |
//! | bytes     | hex signature                            | byte substring          |

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::errors::{SearchError, SearchResult};
use crate::params::{validator, SearchParams};

static SIZE_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^(<|>)?[0-9]*(k|m|g|t)?$"));
static MTIME_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^(<|>)[0-9]*(d|h|m)$"));
static HEX_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"^[A-F0-9]+$"));

/// Digest algorithms, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 9] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sha3_224,
        HashAlgorithm::Sha3_256,
        HashAlgorithm::Sha3_384,
        HashAlgorithm::Sha3_512,
    ];

    /// Name of the parameter list (and mismatch filter) this algorithm belongs to.
    pub fn family(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 | HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => "sha2",
            HashAlgorithm::Sha3_224
            | HashAlgorithm::Sha3_256
            | HashAlgorithm::Sha3_384
            | HashAlgorithm::Sha3_512 => "sha3",
        }
    }

    fn from_family(family: &str, hex_len: usize) -> Option<Self> {
        match (family, hex_len) {
            ("md5", 32) => Some(HashAlgorithm::Md5),
            ("sha1", 40) => Some(HashAlgorithm::Sha1),
            ("sha2", 64) => Some(HashAlgorithm::Sha256),
            ("sha2", 96) => Some(HashAlgorithm::Sha384),
            ("sha2", 128) => Some(HashAlgorithm::Sha512),
            ("sha3", 56) => Some(HashAlgorithm::Sha3_224),
            ("sha3", 64) => Some(HashAlgorithm::Sha3_256),
            ("sha3", 96) => Some(HashAlgorithm::Sha3_384),
            ("sha3", 128) => Some(HashAlgorithm::Sha3_512),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha3_224 => "sha3_224",
            HashAlgorithm::Sha3_256 => "sha3_256",
            HashAlgorithm::Sha3_384 => "sha3_384",
            HashAlgorithm::Sha3_512 => "sha3_512",
        };
        f.write_str(name)
    }
}

/// Kind of a check, used to group evaluation by file access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Content,
    Name,
    Size,
    Mode,
    Mtime,
    Hash(HashAlgorithm),
    Bytes,
}

impl Category {
    /// Name of this category in the `mismatch` option.
    pub fn filter_name(self) -> &'static str {
        match self {
            Category::Content => "content",
            Category::Name => "name",
            Category::Size => "size",
            Category::Mode => "mode",
            Category::Mtime => "mtime",
            Category::Hash(algorithm) => algorithm.family(),
            Category::Bytes => "bytes",
        }
    }
}

/// Compiled matcher of a check
#[derive(Debug, Clone)]
pub enum Criterion {
    Content(Regex),
    Name(Regex),
    Mode(Regex),
    Size { min: u64, max: u64 },
    Mtime {
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    },
    Hash {
        algorithm: HashAlgorithm,
        digest: String,
    },
    Bytes(Vec<u8>),
}

impl Criterion {
    pub fn category(&self) -> Category {
        match self {
            Criterion::Content(_) => Category::Content,
            Criterion::Name(_) => Category::Name,
            Criterion::Mode(_) => Category::Mode,
            Criterion::Size { .. } => Category::Size,
            Criterion::Mtime { .. } => Category::Mtime,
            Criterion::Hash { algorithm, .. } => Category::Hash(*algorithm),
            Criterion::Bytes(_) => Category::Bytes,
        }
    }
}

/// One compiled criterion of a search.
#[derive(Debug, Clone)]
pub struct Check {
    /// Index of the check within its search
    pub id: usize,
    /// The criterion as given, used when echoing results
    pub value: String,
    pub criterion: Criterion,
    pub inverse: bool,
    pub mismatch: bool,
}

/// Whether a check outcome should be recorded as a match.
///
/// `matched` is flipped once by an inverse (`!`) criterion and once more when
/// the category is listed in the `mismatch` option.
pub fn want_this(matched: bool, inverse: bool, mismatch: bool) -> bool {
    matched ^ inverse ^ mismatch
}

impl Check {
    pub fn category(&self) -> Category {
        self.criterion.category()
    }

    pub fn want_this(&self, matched: bool) -> bool {
        want_this(matched, self.inverse, self.mismatch)
    }

    /// Tests the structural criteria (name, mode, size, mtime) against metadata.
    /// Other criteria never match here.
    pub fn matches_metadata(
        &self,
        name: &str,
        mode: &str,
        size: u64,
        modified: DateTime<Utc>,
    ) -> bool {
        match &self.criterion {
            Criterion::Name(re) => re.is_match(name),
            Criterion::Mode(re) => re.is_match(mode),
            Criterion::Size { min, max } => size >= *min && size <= *max,
            Criterion::Mtime { after, before } => modified > *after && modified < *before,
            _ => false,
        }
    }

    /// Tests a content criterion against one line. Bytes that are not valid
    /// UTF-8 read as U+FFFD, so `.` still matches them.
    pub fn matches_line(&self, line: &[u8]) -> bool {
        match &self.criterion {
            Criterion::Content(re) => re.is_match(&String::from_utf8_lossy(line)),
            _ => false,
        }
    }
}

/// Compiles every criterion of a search, in category order.
pub fn compile_checks(search: &SearchParams, now: DateTime<Utc>) -> SearchResult<Vec<Check>> {
    let options = &search.options;
    let mut checks = Vec::new();
    let mut push = |value: &str, criterion: Criterion, inverse: bool| {
        let mismatch = options.mismatches(criterion.category().filter_name());
        let id = checks.len();
        checks.push(Check {
            id,
            value: value.to_string(),
            criterion,
            inverse,
            mismatch,
        });
    };

    for value in &search.contents {
        let (pattern, inverse) = split_inverse(value);
        push(value, Criterion::Content(compile_regex(value, pattern)?), inverse);
    }
    for value in &search.names {
        let (pattern, inverse) = split_inverse(value);
        push(value, Criterion::Name(compile_regex(value, pattern)?), inverse);
    }
    for value in &search.sizes {
        let (min, max) = parse_size(value)?;
        push(value, Criterion::Size { min, max }, false);
    }
    for value in &search.modes {
        let (pattern, inverse) = split_inverse(value);
        push(value, Criterion::Mode(compile_regex(value, pattern)?), inverse);
    }
    for value in &search.mtimes {
        let (after, before) = parse_mtime(value, now)?;
        push(value, Criterion::Mtime { after, before }, false);
    }
    for (family, values) in [
        ("md5", &search.md5),
        ("sha1", &search.sha1),
        ("sha2", &search.sha2),
        ("sha3", &search.sha3),
    ] {
        for value in values {
            let (algorithm, digest) = parse_hash(family, value)?;
            push(value, Criterion::Hash { algorithm, digest }, false);
        }
    }
    for value in &search.bytes {
        push(value, Criterion::Bytes(parse_bytes(value)?), false);
    }
    Ok(checks)
}

/// Strips a leading `!` from criteria longer than one character.
fn split_inverse(value: &str) -> (&str, bool) {
    match value.strip_prefix('!') {
        Some(rest) if !rest.is_empty() => (rest, true),
        _ => (value, false),
    }
}

fn non_empty(pattern: &str) -> SearchResult<&str> {
    if pattern.is_empty() {
        return Err(SearchError::invalid_pattern("empty regular expression"));
    }
    Ok(pattern)
}

fn compile_regex(value: &str, pattern: &str) -> SearchResult<Regex> {
    Regex::new(non_empty(pattern)?)
        .map_err(|e| SearchError::invalid_pattern(format!("{value}: {e}")))
}

/// Parses a size expression into an inclusive byte range.
///
/// `<N` means at most N, `>N` at least N, bare `N` exactly N. A `k`, `m`, `g`
/// or `t` suffix multiplies by the matching power of 1024.
pub fn parse_size(size: &str) -> SearchResult<(u64, u64)> {
    if !validator(&SIZE_RE)?.is_match(size) {
        return Err(SearchError::invalid_size(size));
    }
    let (bound, rest) = match size.as_bytes().first() {
        Some(b'<') | Some(b'>') => (size.get(..1), &size[1..]),
        _ => (None, size),
    };
    let (digits, multiplier) = match rest.as_bytes().last() {
        Some(b'k') => (&rest[..rest.len() - 1], 1u64 << 10),
        Some(b'm') => (&rest[..rest.len() - 1], 1u64 << 20),
        Some(b'g') => (&rest[..rest.len() - 1], 1u64 << 30),
        Some(b't') => (&rest[..rest.len() - 1], 1u64 << 40),
        _ => (rest, 1),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| SearchError::invalid_size(size))?;
    let n = n
        .checked_mul(multiplier)
        .ok_or_else(|| SearchError::invalid_size(size))?;

    Ok(match bound {
        Some("<") => (0, n),
        Some(">") => (n, i64::MAX as u64),
        _ => (n, n),
    })
}

/// Parses an mtime expression into an exclusive timestamp window relative to `now`.
///
/// `<N` selects files modified within the last N units, `>N` files older than
/// that. Units are `m` (minutes), `h` (hours) and `d` (24 hours).
pub fn parse_mtime(mtime: &str, now: DateTime<Utc>) -> SearchResult<(DateTime<Utc>, DateTime<Utc>)> {
    if !validator(&MTIME_RE)?.is_match(mtime) {
        return Err(SearchError::invalid_mtime(mtime));
    }
    let digits = &mtime[1..mtime.len() - 1];
    let n: i64 = digits
        .parse()
        .map_err(|_| SearchError::invalid_mtime(mtime))?;
    let duration = match mtime.as_bytes()[mtime.len() - 1] {
        b'd' => n.checked_mul(24).and_then(Duration::try_hours),
        b'h' => Duration::try_hours(n),
        _ => Duration::try_minutes(n),
    }
    .ok_or_else(|| SearchError::invalid_mtime(mtime))?;
    let threshold = now
        .checked_sub_signed(duration)
        .ok_or_else(|| SearchError::invalid_mtime(mtime))?;

    if mtime.starts_with('<') {
        Ok((threshold, DateTime::<Utc>::MAX_UTC))
    } else {
        Ok((DateTime::<Utc>::MIN_UTC, threshold))
    }
}

/// Upper-cases a digest and types it by family and length.
pub fn parse_hash(family: &str, value: &str) -> SearchResult<(HashAlgorithm, String)> {
    let digest = value.to_uppercase();
    if !validator(&HEX_RE)?.is_match(&digest) {
        return Err(SearchError::invalid_hash(format!("{family} '{value}'")));
    }
    let algorithm = HashAlgorithm::from_family(family, digest.len()).ok_or_else(|| {
        SearchError::invalid_hash(format!(
            "{family} '{value}' has unexpected length {}",
            digest.len()
        ))
    })?;
    Ok((algorithm, digest))
}

/// Decodes a hex byte signature.
pub fn parse_bytes(value: &str) -> SearchResult<Vec<u8>> {
    let bytes = hex::decode(value).map_err(|e| SearchError::invalid_bytes(format!("{value}: {e}")))?;
    if bytes.is_empty() {
        return Err(SearchError::invalid_bytes("empty byte pattern"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SearchOptions;

    #[test]
    fn test_want_this_table() {
        let cases = [
            (true, false, false, true),
            (true, true, false, false),
            (true, false, true, false),
            (true, true, true, true),
            (false, false, false, false),
            (false, true, false, true),
            (false, false, true, true),
            (false, true, true, false),
        ];
        for (matched, inverse, mismatch, expected) in cases {
            assert_eq!(
                want_this(matched, inverse, mismatch),
                expected,
                "matched={matched} inverse={inverse} mismatch={mismatch}"
            );
        }
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("<10m").unwrap(), (0, 10 * 1024 * 1024));
        assert_eq!(parse_size(">10").unwrap(), (10, i64::MAX as u64));
        assert_eq!(parse_size("100").unwrap(), (100, 100));
        assert_eq!(parse_size("2k").unwrap(), (2048, 2048));
        assert_eq!(parse_size(">1t").unwrap().0, 1 << 40);
        assert_eq!(parse_size("<3g").unwrap().1, 3 << 30);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for bad in ["", "<", "k", "10x", "=10", "<<10", "1.5k"] {
            assert!(
                matches!(parse_size(bad), Err(SearchError::InvalidSize(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_mtime() {
        let now = Utc::now();
        let (after, before) = parse_mtime("<1h", now).unwrap();
        assert_eq!(after, now - Duration::hours(1));
        assert_eq!(before, DateTime::<Utc>::MAX_UTC);

        let (after, before) = parse_mtime(">30m", now).unwrap();
        assert_eq!(after, DateTime::<Utc>::MIN_UTC);
        assert_eq!(before, now - Duration::minutes(30));

        assert_eq!(
            parse_mtime("<90d", now).unwrap(),
            parse_mtime("<2160h", now).unwrap()
        );
    }

    #[test]
    fn test_parse_mtime_rejects_garbage() {
        let now = Utc::now();
        for bad in ["1h", "<h", "<10s", ">10", ""] {
            assert!(
                matches!(parse_mtime(bad, now), Err(SearchError::InvalidMtime(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_hash() {
        let (algorithm, digest) = parse_hash("md5", "e5f9ad8dfc4dcf1e3a8b6c7b2e8f4a11").unwrap();
        assert_eq!(algorithm, HashAlgorithm::Md5);
        assert_eq!(digest, "E5F9AD8DFC4DCF1E3A8B6C7B2E8F4A11");

        assert_eq!(parse_hash("sha2", &"a".repeat(64)).unwrap().0, HashAlgorithm::Sha256);
        assert_eq!(parse_hash("sha2", &"a".repeat(96)).unwrap().0, HashAlgorithm::Sha384);
        assert_eq!(parse_hash("sha2", &"a".repeat(128)).unwrap().0, HashAlgorithm::Sha512);
        assert_eq!(parse_hash("sha3", &"a".repeat(56)).unwrap().0, HashAlgorithm::Sha3_224);
        assert_eq!(parse_hash("sha3", &"a".repeat(64)).unwrap().0, HashAlgorithm::Sha3_256);

        assert!(parse_hash("sha1", &"a".repeat(39)).is_err());
        assert!(parse_hash("sha2", &"a".repeat(56)).is_err());
        assert!(parse_hash("md5", &"z".repeat(32)).is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("7f454c46").unwrap(), vec![0x7f, 0x45, 0x4c, 0x46]);
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("abc").is_err());
        assert!(parse_bytes("zz").is_err());
    }

    #[test]
    fn test_compile_checks() {
        let search = SearchParams {
            paths: vec!["/tmp".to_string()],
            contents: vec!["!^FOOBAR$".to_string()],
            names: vec!["^testfile0$".to_string(), "!".to_string()],
            sizes: vec![">10k".to_string()],
            sha2: vec!["A".repeat(96)],
            bytes: vec!["cafe".to_string()],
            options: SearchOptions {
                mismatch: vec!["size".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let checks = compile_checks(&search, Utc::now()).unwrap();
        assert_eq!(checks.len(), 6);
        assert!(checks.iter().enumerate().all(|(i, c)| c.id == i));

        assert_eq!(checks[0].category(), Category::Content);
        assert!(checks[0].inverse);
        assert!(checks[0].matches_line(b"FOOBAR"));

        assert!(!checks[1].inverse);
        // a lone "!" is a literal pattern
        assert!(!checks[2].inverse);
        assert!(checks[2].matches_metadata("a!b", "", 0, Utc::now()));

        assert_eq!(checks[3].category(), Category::Size);
        assert!(checks[3].mismatch);
        assert!(!checks[1].mismatch);

        assert_eq!(checks[4].category(), Category::Hash(HashAlgorithm::Sha384));
        assert_eq!(checks[5].category(), Category::Bytes);
    }

    #[test]
    fn test_content_matches_invalid_utf8() {
        let search = SearchParams {
            paths: vec!["/tmp".to_string()],
            contents: vec!["^(.+)?$".to_string(), "^.$".to_string(), "caf".to_string()],
            ..Default::default()
        };
        let checks = compile_checks(&search, Utc::now()).unwrap();
        assert!(checks[0].matches_line(b"\xff\xfe\xfd"));
        assert!(checks[0].matches_line(b""));
        // one invalid byte is one replacement character
        assert!(checks[1].matches_line(b"\xe9"));
        assert!(checks[2].matches_line(b"caf\xe9 au lait"));
    }

    #[test]
    fn test_compile_rejects_bad_regex() {
        let search = SearchParams {
            paths: vec!["/tmp".to_string()],
            names: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            compile_checks(&search, Utc::now()),
            Err(SearchError::InvalidPattern(_))
        ));

        let search = SearchParams {
            paths: vec!["/tmp".to_string()],
            contents: vec![String::new()],
            ..Default::default()
        };
        assert!(compile_checks(&search, Utc::now()).is_err());
    }

    #[test]
    fn test_metadata_matching() {
        let now = Utc::now();
        let search = SearchParams {
            paths: vec!["/tmp".to_string()],
            modes: vec!["^-rw-r--r--$".to_string()],
            sizes: vec!["<1k".to_string()],
            mtimes: vec!["<1h".to_string()],
            ..Default::default()
        };
        let checks = compile_checks(&search, now).unwrap();
        let size = &checks[0];
        let mode = &checks[1];
        let mtime = &checks[2];

        assert!(mode.matches_metadata("f", "-rw-r--r--", 0, now));
        assert!(!mode.matches_metadata("f", "-rwxr-xr-x", 0, now));
        assert!(size.matches_metadata("f", "", 1024, now));
        assert!(!size.matches_metadata("f", "", 1025, now));
        assert!(mtime.matches_metadata("f", "", 0, now - Duration::minutes(5)));
        assert!(!mtime.matches_metadata("f", "", 0, now - Duration::hours(2)));
    }
}
