use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::aggregator::{Aggregator, MatchState};
use crate::checks::{compile_checks, Category, Check};
use crate::errors::SearchResult;
use crate::params::{limit, SearchOptions, SearchParams};

/// A search being run: compiled checks, walk state and its aggregator.
#[derive(Debug)]
pub struct SearchState {
    pub label: String,
    pub params: SearchParams,
    pub roots: Vec<PathBuf>,
    pub checks: Vec<Check>,
    pub categories: HashSet<Category>,
    pub max_depth: Option<u64>,
    pub match_limit: Option<u64>,
    /// Eligible to match files in the directory being walked
    pub active: bool,
    /// Directories entered below (and including) the search root
    pub depth: u64,
    /// Hit count last reported by the aggregator
    pub hits: u64,
    aggregator: Aggregator,
}

/// A search whose aggregator has been stopped.
#[derive(Debug)]
pub struct FinishedSearch {
    pub label: String,
    pub params: SearchParams,
    pub checks: Vec<Check>,
    pub matches: MatchState,
}

impl SearchState {
    /// Compiles the criteria of `params` and starts the search's aggregator.
    pub fn compile(label: &str, params: &SearchParams, now: DateTime<Utc>) -> SearchResult<Self> {
        let checks = compile_checks(params, now)?;
        let categories = checks.iter().map(Check::category).collect();
        let options = &params.options;
        let match_limit = limit(options.match_limit);
        let aggregator = Aggregator::spawn(label, checks.len(), options.match_all, match_limit)?;
        debug!(
            "compiled {} checks for search '{}' (matchall={}, macroal={})",
            checks.len(),
            label,
            options.match_all,
            options.macroal
        );

        Ok(Self {
            label: label.to_string(),
            params: params.clone(),
            roots: params.paths.iter().map(|p| clean_path(p)).collect(),
            checks,
            categories,
            max_depth: limit(options.max_depth),
            match_limit,
            active: false,
            depth: 0,
            hits: 0,
            aggregator,
        })
    }

    pub fn options(&self) -> &SearchOptions {
        &self.params.options
    }

    pub fn match_all(&self) -> bool {
        self.params.options.match_all
    }

    pub fn has(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Whether `path` lies under one of the search's roots.
    pub fn in_scope(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    pub fn limit_reached(&self) -> bool {
        self.match_limit.is_some_and(|limit| self.hits >= limit)
    }

    pub fn activate(&mut self) {
        if !self.active {
            trace!("search '{}' activated", self.label);
        }
        self.active = true;
    }

    pub fn deactivate(&mut self, reason: &str) {
        if self.active {
            debug!("search '{}' deactivated: {}", self.label, reason);
        }
        self.active = false;
    }

    /// Sends a match to the aggregator. Returns whether the file is recorded
    /// on the check.
    pub fn store(&mut self, check: usize, file: &Path) -> SearchResult<bool> {
        let ack = self.aggregator.store(check, file)?;
        self.hits = ack.hits;
        if ack.recorded {
            trace!(
                "search '{}' check '{}' matched {}",
                self.label,
                self.checks[check].value,
                file.display()
            );
        }
        Ok(ack.recorded)
    }

    /// Evaluates every check of `category` with `test`, storing wanted outcomes.
    ///
    /// Returns false when at least one check was not wanted.
    pub fn evaluate<F>(&mut self, category: Category, file: &Path, test: F) -> SearchResult<bool>
    where
        F: Fn(&Check) -> bool,
    {
        let mut all_wanted = true;
        for id in 0..self.checks.len() {
            let check = &self.checks[id];
            if check.category() != category {
                continue;
            }
            if check.want_this(test(check)) {
                self.store(id, file)?;
            } else {
                all_wanted = false;
            }
        }
        Ok(all_wanted)
    }

    /// Stops the aggregator and keeps what is needed to build results.
    pub fn finish(self) -> SearchResult<FinishedSearch> {
        let matches = self.aggregator.finish()?;
        Ok(FinishedSearch {
            label: self.label,
            params: self.params,
            checks: self.checks,
            matches,
        })
    }
}

/// Indices of active searches declaring `category` and reading files with
/// the given decompression mode.
pub fn participants(searches: &[SearchState], category: Category, decompress: bool) -> Vec<usize> {
    searches
        .iter()
        .enumerate()
        .filter(|(_, s)| s.active && s.has(category) && s.options().decompress == decompress)
        .map(|(i, _)| i)
        .collect()
}

/// Lexically normalizes a path: repeated and trailing separators and `.`
/// components are dropped.
pub fn clean_path(path: &str) -> PathBuf {
    Path::new(path).components().collect()
}
