//! The search engine.
//!
//! One invocation walks the union of all search roots exactly once. The pieces,
//! from the bottom up:
//!
//! 1. **Aggregators** (`aggregator`): one thread per search receives match
//!    notifications over a single-slot channel and answers each with the
//!    search's hit count. Deduplication and match-all bookkeeping happen there.
//! 2. **Walker** (`walker`): sequential depth-first traversal. Entering a
//!    directory updates the depth and activation of every search; a directory
//!    with no active search is not opened.
//! 3. **Evaluator** (`evaluator`): per file, metadata checks first, then
//!    content (`content`), byte signatures and digests (`hashing`). A file is
//!    read once per check category, shared by every search that needs it.
//!
//! ```rust,ignore
//! let params = Parameters::from_reader(input)?;
//! let result = filescout::execute(&params);
//! for file in result.files("passwd") {
//!     println!("{file}");
//! }
//! ```

pub mod aggregator;
pub mod content;
pub mod engine;
pub mod evaluator;
pub mod hashing;
pub mod state;
pub mod walker;

pub use engine::execute;
pub use state::SearchState;
