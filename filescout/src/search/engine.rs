use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info};

use super::state::SearchState;
use super::walker::Walker;
use crate::errors::SearchResult;
use crate::params::Parameters;
use crate::results::{build_results, ModuleResult};
use crate::stats::RunContext;

/// Runs every search of `params` in a single walk and returns the results.
///
/// Never panics: invalid parameters and unexpected faults both produce a
/// result with `success` set to false, carrying the statistics and errors
/// gathered until then.
pub fn execute(params: &Parameters) -> ModuleResult {
    let mut ctx = RunContext::with_error_bound(params.error_bound());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_searches(params, &mut ctx)));
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => ModuleResult::failure(&mut ctx, e),
        Err(payload) => ModuleResult::failure(
            &mut ctx,
            format!("search aborted: {}", panic_message(payload.as_ref())),
        ),
    }
}

fn run_searches(params: &Parameters, ctx: &mut RunContext) -> SearchResult<ModuleResult> {
    info!("Starting {} searches", params.searches.len());
    params.validate()?;

    let now = Utc::now();
    let mut searches = params
        .searches
        .iter()
        .map(|(label, search)| SearchState::compile(label, search, now))
        .collect::<SearchResult<Vec<_>>>()?;

    Walker::new(&mut searches, ctx).run()?;
    debug!("Walk complete, stopping aggregators");

    let finished = searches
        .into_iter()
        .map(SearchState::finish)
        .collect::<SearchResult<Vec<_>>>()?;
    let result = build_results(finished, ctx);

    info!(
        "Search complete. {} hits in {} files checked",
        result.statistics.total_hits, result.statistics.files_count
    );
    Ok(result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown fault".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{SearchOptions, SearchParams};
    use tempfile::tempdir;

    #[test]
    fn test_execute_with_statistics() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "test line\ntest line 2\n").unwrap();
        std::fs::write(dir.path().join("other.txt"), "nothing here\n").unwrap();

        let mut params = Parameters::default();
        params.searches.insert(
            "s1".to_string(),
            SearchParams {
                paths: vec![dir.path().display().to_string()],
                contents: vec!["^test line 2$".to_string()],
                options: SearchOptions {
                    match_all: true,
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let result = execute(&params);
        assert!(result.success);
        assert!(result.found_anything);
        assert_eq!(result.statistics.files_count, 2);
        assert_eq!(result.statistics.total_hits, 1);
        assert_eq!(
            result.files("s1"),
            vec![dir.path().join("test.txt").display().to_string()]
        );
    }

    #[test]
    fn test_invalid_criteria_fail_fast() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "x").unwrap();

        let mut params = Parameters::default();
        params.searches.insert(
            "s1".to_string(),
            SearchParams {
                paths: vec![dir.path().display().to_string()],
                sizes: vec!["about 10k".to_string()],
                ..Default::default()
            },
        );

        let result = execute(&params);
        assert!(!result.success);
        assert!(result.elements.is_empty());
        assert_eq!(result.statistics.files_count, 0);
        assert_eq!(result.errors, vec!["Invalid size: about 10k"]);
    }

    #[test]
    fn test_errors_are_capped_at_max_errors() {
        let dir = tempdir().unwrap();
        let mut params = Parameters::default();
        params.searches.insert(
            "s1".to_string(),
            SearchParams {
                paths: ["a", "b", "c"]
                    .iter()
                    .map(|p| dir.path().join(p).display().to_string())
                    .collect(),
                names: vec!["x".to_string()],
                options: SearchOptions {
                    max_errors: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let result = execute(&params);
        assert!(result.success);
        assert_eq!(result.statistics.open_failed, 3);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("failed to open"));
        assert_eq!(result.errors[1], "2 errors omitted");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(payload.as_ref()), "unknown fault");
    }
}
