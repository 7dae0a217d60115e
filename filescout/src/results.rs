//! Result types and the results builder.
//!
//! A [`ModuleResult`] is what a caller receives from one invocation: per search
//! label, the list of matched files with their metadata and the criterion that
//! matched them, plus statistics and the (bounded) error log.
//!
//! Searches with `matchall` report one entry per file that satisfied every
//! check. Other searches report one entry per (check, file) pair. A search or
//! check without any match still gets one entry, with an empty `file`, so a
//! caller can tell "nothing found" from "not searched".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::checks::{Category, Check, HashAlgorithm};
use crate::params::{SearchOptions, SearchParams};
use crate::search::evaluator::mode_string;
use crate::search::hashing::digest_file;
use crate::search::state::FinishedSearch;
use crate::stats::{RunContext, Statistics};

/// Complete output of one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    #[serde(rename = "foundanything")]
    pub found_anything: bool,
    pub success: bool,
    pub elements: BTreeMap<String, Vec<MatchedFile>>,
    pub statistics: Statistics,
    pub errors: Vec<String>,
}

/// One reported file and the criteria it matched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedFile {
    pub file: String,
    pub search: SearchParams,
    #[serde(rename = "fileinfo")]
    pub file_info: FileInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub size: u64,
    pub mode: String,
    #[serde(rename = "lastmodified")]
    pub last_modified: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

impl ModuleResult {
    /// A failed invocation: statistics and errors so far, no matches.
    pub fn failure(ctx: &mut RunContext, err: impl std::fmt::Display) -> Self {
        ctx.record_fatal(err);
        Self {
            found_anything: false,
            success: false,
            elements: BTreeMap::new(),
            statistics: ctx.finish(),
            errors: ctx.error_log(),
        }
    }

    /// Files reported for `label`, without the empty placeholder entries.
    pub fn files(&self, label: &str) -> Vec<&str> {
        self.elements
            .get(label)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| !e.file.is_empty())
                    .map(|e| e.file.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Assembles the output of finished searches.
pub fn build_results(finished: Vec<FinishedSearch>, ctx: &mut RunContext) -> ModuleResult {
    let mut elements = BTreeMap::new();
    let mut total_hits = 0;

    for search in &finished {
        total_hits += search.matches.hits;
        let entries = if search.params.options.match_all {
            match_all_entries(search, ctx)
        } else {
            per_check_entries(search, ctx)
        };
        elements.insert(search.label.clone(), entries);
    }

    ctx.stats.total_hits = total_hits;
    ModuleResult {
        found_anything: total_hits > 0,
        success: true,
        elements,
        statistics: ctx.finish(),
        errors: ctx.error_log(),
    }
}

fn match_all_entries(search: &FinishedSearch, ctx: &mut RunContext) -> Vec<MatchedFile> {
    let mut echoed = search.params.clone();
    echoed.options.match_limit = 0;
    echoed.options.max_depth = 0;
    echoed.options.max_errors = 0;

    if search.matches.all_matched.is_empty() {
        return vec![MatchedFile {
            search: echoed,
            ..Default::default()
        }];
    }
    let with_sha256 = search.params.options.return_sha256;
    search
        .matches
        .all_matched
        .iter()
        .map(|file| MatchedFile {
            file: file.display().to_string(),
            search: echoed.clone(),
            file_info: describe_file(file, with_sha256, ctx),
        })
        .collect()
}

fn per_check_entries(search: &FinishedSearch, ctx: &mut RunContext) -> Vec<MatchedFile> {
    let with_sha256 = search.params.options.return_sha256;
    let mut entries = Vec::new();
    for check in &search.checks {
        let files = &search.matches.checks[check.id].files;
        if files.is_empty() {
            entries.push(MatchedFile {
                search: echo_check(&search.params, check, search.params.paths.clone()),
                ..Default::default()
            });
            continue;
        }
        for file in files {
            let parent = file
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            entries.push(MatchedFile {
                file: file.display().to_string(),
                search: echo_check(&search.params, check, vec![parent]),
                file_info: describe_file(file, with_sha256, ctx),
            });
        }
    }
    entries
}

/// Echoes a single check as a search of its own.
fn echo_check(params: &SearchParams, check: &Check, paths: Vec<String>) -> SearchParams {
    let category = check.category();
    let mut echoed = SearchParams {
        description: params.description.clone(),
        paths,
        options: SearchOptions {
            mismatch: if check.mismatch {
                vec![category.filter_name().to_string()]
            } else {
                Vec::new()
            },
            macroal: params.options.macroal && category == Category::Content,
            ..Default::default()
        },
        ..Default::default()
    };
    let list = match category {
        Category::Content => &mut echoed.contents,
        Category::Name => &mut echoed.names,
        Category::Size => &mut echoed.sizes,
        Category::Mode => &mut echoed.modes,
        Category::Mtime => &mut echoed.mtimes,
        Category::Hash(HashAlgorithm::Md5) => &mut echoed.md5,
        Category::Hash(HashAlgorithm::Sha1) => &mut echoed.sha1,
        Category::Hash(algorithm) if algorithm.family() == "sha2" => &mut echoed.sha2,
        Category::Hash(_) => &mut echoed.sha3,
        Category::Bytes => &mut echoed.bytes,
    };
    list.push(check.value.clone());
    echoed
}

fn describe_file(file: &Path, with_sha256: bool, ctx: &mut RunContext) -> FileInfo {
    let meta = match fs::metadata(file) {
        Ok(meta) => meta,
        Err(e) => {
            ctx.record_error(format!("failed to stat '{}': {}", file.display(), e));
            return FileInfo::default();
        }
    };
    let sha256 = if with_sha256 {
        digest_file(file, HashAlgorithm::Sha256, false).unwrap_or_else(|e| {
            ctx.record_error(format!("failed to hash '{}': {}", file.display(), e));
            String::new()
        })
    } else {
        String::new()
    };
    FileInfo {
        size: meta.len(),
        mode: mode_string(&meta),
        last_modified: meta.modified().map(format_time).unwrap_or_default(),
        sha256,
    }
}

/// Formats a timestamp as `2006-01-02 15:04:05.123456789 +0000 UTC`.
pub fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%d %H:%M:%S%.f +0000 UTC")
        .to_string()
}

/// Renders a result as human-readable lines.
///
/// With `found_only`, placeholder entries, errors and statistics are omitted.
pub fn print_results(result: &ModuleResult, found_only: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for (label, entries) in &result.elements {
        for entry in entries {
            let mut out = if entry.file.is_empty() {
                if found_only {
                    continue;
                }
                format!("0 match found in search '{label}'")
            } else {
                let info = &entry.file_info;
                let mut out = format!(
                    "{} [lastmodified:{}, mode:{}, size:{}",
                    entry.file, info.last_modified, info.mode, info.size
                );
                if !info.sha256.is_empty() {
                    out.push_str(&format!(", sha256:{}", info.sha256.to_lowercase()));
                }
                out.push_str(&format!("] in search '{label}'"));
                out
            };
            if !entry.search.options.match_all {
                out.push_str(" on checks");
                let s = &entry.search;
                for (name, values) in [
                    ("name", &s.names),
                    ("size", &s.sizes),
                    ("mode", &s.modes),
                    ("mtime", &s.mtimes),
                    ("content", &s.contents),
                    ("md5", &s.md5),
                    ("sha1", &s.sha1),
                    ("sha2", &s.sha2),
                    ("sha3", &s.sha3),
                    ("bytes", &s.bytes),
                ] {
                    for value in values {
                        out.push_str(&format!(" {name}='{value}'"));
                    }
                }
            }
            lines.push(out);
        }
    }
    if !found_only {
        lines.extend(result.errors.iter().cloned());
        let stats = &result.statistics;
        lines.push(format!(
            "Statistics: {} files checked, {} failed to open, {} matched, ran in {}.",
            stats.files_count, stats.open_failed, stats.total_hits, stats.exec_time
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::compile_checks;
    use crate::search::aggregator::MatchState;
    use chrono::TimeZone;

    fn finished(params: SearchParams, matches: MatchState) -> FinishedSearch {
        FinishedSearch {
            label: "s1".to_string(),
            checks: compile_checks(&params, Utc::now()).unwrap(),
            params,
            matches,
        }
    }

    #[test]
    fn test_per_check_entries_echo_single_criterion() {
        let params = SearchParams {
            paths: vec!["/var/log".to_string()],
            names: vec!["^syslog$".to_string()],
            sizes: vec![">1k".to_string()],
            ..Default::default()
        };
        let mut matches = MatchState::new(2, false, None);
        matches.record(0, Path::new("/nonexistent/syslog"));

        let mut ctx = RunContext::new();
        let result = build_results(vec![finished(params, matches)], &mut ctx);
        let entries = &result.elements["s1"];
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].file, "/nonexistent/syslog");
        assert_eq!(entries[0].search.paths, vec!["/nonexistent"]);
        assert_eq!(entries[0].search.names, vec!["^syslog$"]);
        assert!(entries[0].search.sizes.is_empty());

        assert_eq!(entries[1].file, "");
        assert_eq!(entries[1].search.paths, vec!["/var/log"]);
        assert_eq!(entries[1].search.sizes, vec![">1k"]);

        assert!(result.found_anything);
        assert_eq!(result.statistics.total_hits, 1);
        // the matched file does not exist, so describing it failed
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_match_all_sentinel_zeroes_limits() {
        let params = SearchParams {
            paths: vec!["/tmp".to_string()],
            names: vec!["x".to_string()],
            options: SearchOptions {
                match_all: true,
                max_depth: 4,
                match_limit: 10,
                max_errors: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut ctx = RunContext::new();
        let result = build_results(
            vec![finished(params, MatchState::new(1, true, Some(10)))],
            &mut ctx,
        );
        let entries = &result.elements["s1"];
        assert_eq!(entries.len(), 1);
        assert!(entries[0].file.is_empty());
        assert_eq!(entries[0].search.options.max_depth, 0);
        assert_eq!(entries[0].search.options.match_limit, 0);
        assert_eq!(entries[0].search.options.max_errors, 0);
        assert!(entries[0].search.options.match_all);
        assert!(!result.found_anything);
        assert!(result.files("s1").is_empty());
    }

    #[test]
    fn test_format_time() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            format_time(SystemTime::from(time)),
            "2024-03-01 12:30:05 +0000 UTC"
        );
    }

    #[test]
    fn test_print_results() {
        let mut elements = BTreeMap::new();
        elements.insert(
            "s1".to_string(),
            vec![
                MatchedFile {
                    file: "/etc/passwd".to_string(),
                    search: SearchParams {
                        names: vec!["^passwd$".to_string()],
                        ..Default::default()
                    },
                    file_info: FileInfo {
                        size: 42,
                        mode: "-rw-r--r--".to_string(),
                        last_modified: "2024-03-01 12:30:05 +0000 UTC".to_string(),
                        sha256: "ABCD".to_string(),
                    },
                },
                MatchedFile::default(),
            ],
        );
        let result = ModuleResult {
            found_anything: true,
            success: true,
            elements,
            statistics: Statistics {
                files_count: 3,
                open_failed: 1,
                total_hits: 1,
                exec_time: "2ms".to_string(),
            },
            errors: vec!["failed to open '/root'".to_string()],
        };

        let lines = print_results(&result, false);
        assert_eq!(
            lines[0],
            "/etc/passwd [lastmodified:2024-03-01 12:30:05 +0000 UTC, mode:-rw-r--r--, size:42, sha256:abcd] in search 's1' on checks name='^passwd$'"
        );
        assert_eq!(lines[1], "0 match found in search 's1' on checks");
        assert_eq!(lines[2], "failed to open '/root'");
        assert_eq!(
            lines[3],
            "Statistics: 3 files checked, 1 failed to open, 1 matched, ran in 2ms."
        );

        let lines = print_results(&result, true);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_failure_result() {
        let mut ctx = RunContext::new();
        let result = ModuleResult::failure(&mut ctx, "Invalid size: <<1");
        assert!(!result.success);
        assert!(result.elements.is_empty());
        assert_eq!(result.errors, vec!["Invalid size: <<1"]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["foundanything"], false);
        assert_eq!(json["success"], false);
    }

    #[test]
    fn test_failure_keeps_error_bound() {
        let mut ctx = RunContext::with_error_bound(Some(2));
        for i in 0..5 {
            ctx.record_error(format!("failed to open '/d{i}'"));
        }
        let result = ModuleResult::failure(&mut ctx, "search aborted: boom");
        assert_eq!(
            result.errors,
            vec![
                "failed to open '/d0'",
                "failed to open '/d1'",
                "3 errors omitted",
                "search aborted: boom",
            ]
        );
    }

    #[test]
    fn test_build_results_reports_bounded_log() {
        let params = SearchParams {
            paths: vec!["/tmp".to_string()],
            names: vec!["x".to_string()],
            ..Default::default()
        };
        let mut ctx = RunContext::with_error_bound(Some(1));
        ctx.record_error("first");
        ctx.record_error("second");
        let result = build_results(
            vec![finished(params, MatchState::new(1, false, None))],
            &mut ctx,
        );
        assert!(result.success);
        assert_eq!(result.errors, vec!["first", "1 errors omitted"]);
    }
}
