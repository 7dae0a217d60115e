pub mod checks;
pub mod config;
pub mod errors;
pub mod params;
pub mod results;
pub mod search;
pub mod stats;

use std::io::Read;

pub use config::ScoutConfig;
pub use errors::{SearchError, SearchResult};
pub use params::{Parameters, SearchOptions, SearchParams};
pub use results::{print_results, ModuleResult};
pub use search::execute;
pub use stats::{RunContext, Statistics};

/// Name under which the engine is registered with the agent
pub const MODULE_NAME: &str = "file";

/// Reads JSON parameters from `input`, runs the searches and returns the
/// results as JSON.
pub fn run<R: Read>(input: R) -> String {
    let result = match Parameters::from_reader(input) {
        Ok(params) => execute(&params),
        Err(e) => ModuleResult::failure(&mut RunContext::new(), e),
    };
    serde_json::to_string(&result).unwrap_or_else(|e| {
        serde_json::json!({
            "foundanything": false,
            "success": false,
            "elements": {},
            "statistics": result.statistics,
            "errors": [format!("failed to encode results: {e}")],
        })
        .to_string()
    })
}
