use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, trace};

use super::state::{participants, SearchState};
use crate::checks::Category;
use crate::errors::{SearchError, SearchResult};
use crate::stats::RunContext;

const BUFFER_CAPACITY: usize = 65536;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens a file for scanning. With `decompress`, gzip data (recognized by
/// its magic bytes) is decompressed on the fly.
pub fn open_scan_reader(path: &Path, decompress: bool) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, File::open(path)?);
    if decompress && reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        trace!("decompressing {}", path.display());
        let decoder = GzDecoder::new(reader);
        return Ok(Box::new(BufReader::with_capacity(BUFFER_CAPACITY, decoder)));
    }
    Ok(Box::new(reader))
}

/// Content check progress of one search over one file
struct ContentTracker {
    search: usize,
    checks: Vec<usize>,
    /// The check matched at least one line
    status: Vec<bool>,
    /// The file is recorded on the check
    recorded: Vec<bool>,
    macroal: bool,
    lines_seen: bool,
    macroal_failed: bool,
}

impl ContentTracker {
    fn new(index: usize, search: &SearchState) -> Self {
        let checks: Vec<usize> = search
            .checks
            .iter()
            .filter(|c| c.category() == Category::Content)
            .map(|c| c.id)
            .collect();
        let count = checks.len();
        Self {
            search: index,
            checks,
            status: vec![false; count],
            recorded: vec![false; count],
            macroal: search.options().macroal,
            lines_seen: false,
            macroal_failed: false,
        }
    }

    /// Evaluates one line. Returns whether more lines are needed.
    fn feed(&mut self, search: &mut SearchState, line: &[u8], file: &Path) -> SearchResult<bool> {
        if self.macroal_failed {
            return Ok(false);
        }
        self.lines_seen = true;
        let mut line_ok = true;

        for k in 0..self.checks.len() {
            if self.status[k] && !self.macroal {
                continue;
            }
            let check = &search.checks[self.checks[k]];
            let inverse = check.inverse;
            if check.matches_line(line) {
                if !inverse && !self.macroal {
                    self.store_if_wanted(search, k, true, file)?;
                } else if inverse && self.macroal {
                    line_ok = false;
                    self.store_if_wanted(search, k, true, file)?;
                }
                self.status[k] = true;
            } else if !inverse && self.macroal {
                line_ok = false;
                self.store_if_wanted(search, k, false, file)?;
            }
        }

        if !line_ok {
            debug!(
                "search '{}': a line of {} fails the all-lines requirement",
                search.label,
                file.display()
            );
            self.macroal_failed = true;
            return Ok(false);
        }
        Ok(self.macroal || self.status.iter().any(|matched| !matched))
    }

    /// Applies end-of-file rules once every line has been read.
    fn finish(&mut self, search: &mut SearchState, file: &Path) -> SearchResult<()> {
        for k in 0..self.checks.len() {
            let inverse = search.checks[self.checks[k]].inverse;
            let record = if !self.macroal {
                !self.recorded[k]
            } else if self.lines_seen && !self.macroal_failed {
                true
            } else {
                inverse && !self.status[k]
            };
            if record {
                self.store_if_wanted(search, k, self.status[k], file)?;
            }
        }
        if search.match_all() && self.recorded.iter().any(|recorded| !recorded) {
            search.deactivate(&format!("content check failed on {}", file.display()));
        }
        Ok(())
    }

    fn store_if_wanted(
        &mut self,
        search: &mut SearchState,
        k: usize,
        matched: bool,
        file: &Path,
    ) -> SearchResult<()> {
        let id = self.checks[k];
        if search.checks[id].want_this(matched) && search.store(id, file)? {
            self.recorded[k] = true;
        }
        Ok(())
    }
}

/// Evaluates content checks of all active searches, reading the file once
/// per decompression mode.
pub fn scan_content(searches: &mut [SearchState], ctx: &mut RunContext, file: &Path) -> SearchResult<()> {
    for decompress in [false, true] {
        let indices = participants(searches, Category::Content, decompress);
        if indices.is_empty() {
            continue;
        }
        let reader = match open_scan_reader(file, decompress) {
            Ok(reader) => reader,
            Err(e) => {
                ctx.record_open_failure(file, e);
                continue;
            }
        };
        let mut trackers: Vec<ContentTracker> = indices
            .iter()
            .map(|&i| ContentTracker::new(i, &searches[i]))
            .collect();

        match scan_lines(reader, searches, &mut trackers, file) {
            Ok(()) => {
                for tracker in &mut trackers {
                    tracker.finish(&mut searches[tracker.search], file)?;
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                ctx.record_error(e);
                for tracker in &trackers {
                    let search = &mut searches[tracker.search];
                    if search.match_all() {
                        search.deactivate("content could not be read");
                    }
                }
            }
        }
    }
    Ok(())
}

fn scan_lines(
    mut reader: Box<dyn BufRead>,
    searches: &mut [SearchState],
    trackers: &mut [ContentTracker],
    file: &Path,
) -> SearchResult<()> {
    let mut line = Vec::with_capacity(256);
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| SearchError::from_io(file, e))?;
        if read == 0 {
            break;
        }
        let text = trim_line_ending(&line);
        let mut pending = false;
        for tracker in trackers.iter_mut() {
            pending |= tracker.feed(&mut searches[tracker.search], text, file)?;
        }
        if !pending {
            trace!("no content check left to evaluate on {}", file.display());
            break;
        }
    }
    Ok(())
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
