use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::errors::{SearchError, SearchResult};

static LABEL_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9_-]|.){1,64}$"));

static MISMATCH_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"^(name|size|mode|mtime|content|md5|sha1|sha2|sha3|bytes)$")
});

/// Input of one invocation: a set of searches keyed by label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub searches: BTreeMap<String, SearchParams>,
}

/// Raw criteria of one search, as received on the wire.
///
/// This is also the shape echoed back in each result entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sizes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mtimes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub md5: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sha1: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sha2: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sha3: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bytes: Vec<String>,
    #[serde(default)]
    pub options: SearchOptions,
}

/// Options of one search. Numeric limits set to 0 mean "no limit".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(rename = "maxdepth", default)]
    pub max_depth: u64,
    #[serde(rename = "maxerrors", default)]
    pub max_errors: u64,
    #[serde(rename = "matchall", default)]
    pub match_all: bool,
    #[serde(default)]
    pub macroal: bool,
    #[serde(default)]
    pub mismatch: Vec<String>,
    #[serde(rename = "matchlimit", default)]
    pub match_limit: u64,
    #[serde(rename = "returnsha256", default)]
    pub return_sha256: bool,
    #[serde(default)]
    pub decompress: bool,
}

impl Parameters {
    /// Parses parameters from JSON.
    pub fn from_reader<R: Read>(reader: R) -> SearchResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Loads parameters from a file; `.yaml` and `.yml` files are read as YAML,
    /// anything else as JSON.
    pub fn from_path(path: &Path) -> SearchResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| SearchError::from_io(path, e))?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Ok(serde_yaml::from_reader(file)?)
        } else {
            Self::from_reader(std::io::BufReader::new(file))
        }
    }

    /// Checks labels, paths and mismatch filters of every search.
    ///
    /// Criteria syntax is validated later, when checks are compiled.
    pub fn validate(&self) -> SearchResult<()> {
        let label_re = validator(&LABEL_RE)?;
        let mismatch_re = validator(&MISMATCH_RE)?;

        for (label, search) in &self.searches {
            if label.is_empty() {
                return Err(SearchError::invalid_label(label, "empty search label"));
            }
            if !label_re.is_match(label) {
                return Err(SearchError::invalid_label(
                    label,
                    "labels may contain at most 64 characters",
                ));
            }
            if search.paths.is_empty() || search.paths.iter().any(|p| p.is_empty()) {
                return Err(SearchError::invalid_search(
                    label,
                    "invalid empty search path",
                ));
            }
            for filter in &search.options.mismatch {
                if !mismatch_re.is_match(filter) {
                    return Err(SearchError::invalid_mismatch(filter));
                }
            }
        }
        Ok(())
    }

    /// Largest `maxerrors` across searches; any unlimited search lifts the bound.
    pub fn error_bound(&self) -> Option<usize> {
        let mut bound = None;
        for search in self.searches.values() {
            let max_errors = limit(search.options.max_errors)?;
            bound = bound.max(Some(max_errors as usize));
        }
        bound
    }
}

impl SearchOptions {
    /// Whether files failing criteria of `category` should be reported instead.
    pub fn mismatches(&self, category: &str) -> bool {
        self.mismatch.iter().any(|m| m == category)
    }
}

/// Borrows a lazily built validation regex.
pub(crate) fn validator(re: &'static Lazy<Result<Regex, regex::Error>>) -> SearchResult<&'static Regex> {
    Lazy::force(re)
        .as_ref()
        .map_err(|e| SearchError::invalid_pattern(e.to_string()))
}

/// Turns a "0 means unlimited" option into an optional bound.
pub(crate) fn limit(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}
