use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::evaluator::evaluate_file;
use super::state::SearchState;
use crate::errors::SearchResult;
use crate::stats::RunContext;

/// Depth-first walk over the roots of every search.
///
/// Roots are walked in ascending order so that a root containing another one
/// is walked first; roots reached during an earlier walk are not walked again.
/// Symlinked directories are never followed.
pub struct Walker<'a> {
    searches: &'a mut [SearchState],
    ctx: &'a mut RunContext,
    roots: BTreeSet<PathBuf>,
    traversed: HashSet<PathBuf>,
}

impl<'a> Walker<'a> {
    pub fn new(searches: &'a mut [SearchState], ctx: &'a mut RunContext) -> Self {
        let roots = searches
            .iter()
            .flat_map(|s| s.roots.iter().cloned())
            .collect();
        Self {
            searches,
            ctx,
            roots,
            traversed: HashSet::new(),
        }
    }

    pub fn run(mut self) -> SearchResult<()> {
        let roots: Vec<PathBuf> = self.roots.iter().cloned().collect();
        for root in roots {
            if self.traversed.contains(&root) {
                debug!("{} already traversed, skipping", root.display());
                continue;
            }
            debug!("walking root {}", root.display());
            for search in self.searches.iter_mut() {
                search.deactivate("new root");
                search.depth = 0;
            }
            self.walk(&root)?;
        }
        Ok(())
    }

    fn walk(&mut self, path: &Path) -> SearchResult<()> {
        if self.roots.contains(path) {
            self.traversed.insert(path.to_path_buf());
        }
        let entered = self.enter(path);
        let result = self.visit(path);
        self.leave(&entered);
        result
    }

    /// Updates depth and activation of every search for `path` and returns the
    /// searches whose depth was incremented.
    fn enter(&mut self, path: &Path) -> Vec<usize> {
        let mut entered = Vec::new();
        for (i, search) in self.searches.iter_mut().enumerate() {
            if !search.in_scope(path) {
                search.active = false;
                continue;
            }
            search.depth += 1;
            entered.push(i);
            if search.max_depth.is_some_and(|max| search.depth > max) {
                search.deactivate("max depth reached");
            } else if search.limit_reached() {
                search.deactivate("match limit reached");
            } else {
                search.activate();
            }
        }
        entered
    }

    fn leave(&mut self, entered: &[usize]) {
        for &i in entered {
            let search = &mut self.searches[i];
            search.depth = search.depth.saturating_sub(1);
        }
    }

    fn visit(&mut self, path: &Path) -> SearchResult<()> {
        if !self.searches.iter().any(|s| s.active) {
            trace!("no active search in {}, skipping", path.display());
            return Ok(());
        }
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                self.ctx.record_open_failure(path, e);
                return Ok(());
            }
        };
        let file_type = meta.file_type();
        if file_type.is_dir() {
            self.walk_dir(path)
        } else if file_type.is_symlink() {
            // a symlinked root is evaluated at its target
            match self.resolve(path) {
                Some(target) => evaluate_file(self.searches, self.ctx, &target),
                None => Ok(()),
            }
        } else if file_type.is_file() {
            evaluate_file(self.searches, self.ctx, path)
        } else {
            debug!("{} is not a regular file, skipping", path.display());
            Ok(())
        }
    }

    fn walk_dir(&mut self, dir: &Path) -> SearchResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.ctx.record_open_failure(dir, e);
                return Ok(());
            }
        };
        let mut entries: Vec<fs::DirEntry> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    self.ctx
                        .record_error(format!("failed to read entry in '{}': {}", dir.display(), e));
                    None
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    self.ctx.record_open_failure(&path, e);
                    continue;
                }
            };
            if file_type.is_dir() {
                subdirs.push(path);
            } else if file_type.is_symlink() {
                if self.resolve(&path).is_some() {
                    evaluate_file(self.searches, self.ctx, &path)?;
                }
            } else if file_type.is_file() {
                evaluate_file(self.searches, self.ctx, &path)?;
            }
        }

        for subdir in subdirs {
            self.walk(&subdir)?;
        }
        Ok(())
    }

    /// Resolves a symlink, returning its target only when it is a regular file.
    fn resolve(&mut self, link: &Path) -> Option<PathBuf> {
        let target = match fs::canonicalize(link) {
            Ok(target) => target,
            Err(e) => {
                self.ctx.record_open_failure(link, e);
                return None;
            }
        };
        match fs::metadata(&target) {
            Ok(meta) if meta.is_file() => {
                trace!("{} resolves to {}", link.display(), target.display());
                Some(target)
            }
            Ok(_) => {
                self.ctx.record_open_failure(
                    link,
                    format!("link to '{}' is not a regular file, not followed", target.display()),
                );
                None
            }
            Err(e) => {
                self.ctx.record_open_failure(&target, e);
                None
            }
        }
    }
}
