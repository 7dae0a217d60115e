use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

use crate::errors::{SearchError, SearchResult};

/// Files recorded on one check
#[derive(Debug, Clone, Default)]
pub struct CheckMatches {
    pub files: Vec<PathBuf>,
    pub matched: u64,
    seen: HashSet<PathBuf>,
}

/// Reply to a store request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAck {
    /// The file is on the check's list after this request
    pub recorded: bool,
    /// Hits of the search so far
    pub hits: u64,
}

/// Everything a search matched during one invocation.
#[derive(Debug, Clone, Default)]
pub struct MatchState {
    pub checks: Vec<CheckMatches>,
    /// Files that satisfied every check, for match-all searches
    pub all_matched: Vec<PathBuf>,
    pub hits: u64,
    match_all: bool,
    match_limit: Option<u64>,
}

impl MatchState {
    pub fn new(check_count: usize, match_all: bool, match_limit: Option<u64>) -> Self {
        Self {
            checks: vec![CheckMatches::default(); check_count],
            all_matched: Vec::new(),
            hits: 0,
            match_all,
            match_limit,
        }
    }

    /// Records `file` on check `check`, updating hit counters.
    pub fn record(&mut self, check: usize, file: &Path) -> StoreAck {
        let Some(entry) = self.checks.get(check) else {
            return self.ack(false);
        };
        if entry.seen.contains(file) {
            return self.ack(true);
        }
        if self.match_limit.is_some_and(|limit| self.hits >= limit) {
            trace!("match limit reached, dropping {}", file.display());
            return self.ack(false);
        }

        let entry = &mut self.checks[check];
        entry.seen.insert(file.to_path_buf());
        entry.files.push(file.to_path_buf());
        entry.matched += 1;

        if self.match_all {
            if self.checks.iter().all(|c| c.seen.contains(file)) {
                self.all_matched.push(file.to_path_buf());
                self.hits += 1;
            }
        } else {
            self.hits += 1;
        }
        self.ack(true)
    }

    fn ack(&self, recorded: bool) -> StoreAck {
        StoreAck {
            recorded,
            hits: self.hits,
        }
    }
}

enum Message {
    Store { check: usize, file: PathBuf },
    Finish,
}

enum Reply {
    Stored(StoreAck),
    Finished(Box<MatchState>),
}

/// Serializes all match notifications of one search on a dedicated thread.
///
/// The inbox holds a single message and every request waits for its reply,
/// so the evaluator never runs ahead of the aggregator.
pub struct Aggregator {
    label: String,
    inbox: Option<Sender<Message>>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
}

impl Aggregator {
    pub fn spawn(
        label: &str,
        check_count: usize,
        match_all: bool,
        match_limit: Option<u64>,
    ) -> SearchResult<Self> {
        let (inbox, requests) = bounded::<Message>(1);
        let (reply_tx, replies) = bounded::<Reply>(1);
        let mut state = MatchState::new(check_count, match_all, match_limit);

        let thread_label = label.to_string();
        let worker = thread::Builder::new()
            .name(format!("aggregator-{label}"))
            .spawn(move || {
                debug!("aggregator for search '{}' started", thread_label);
                for message in requests {
                    let reply = match message {
                        Message::Store { check, file } => Reply::Stored(state.record(check, &file)),
                        Message::Finish => Reply::Finished(Box::new(std::mem::take(&mut state))),
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                debug!("aggregator for search '{}' stopped", thread_label);
            })?;

        Ok(Self {
            label: label.to_string(),
            inbox: Some(inbox),
            replies,
            worker: Some(worker),
        })
    }

    /// Hands a match to the aggregator and waits for the acknowledgement.
    pub fn store(&self, check: usize, file: &Path) -> SearchResult<StoreAck> {
        let message = Message::Store {
            check,
            file: file.to_path_buf(),
        };
        match self.request(message)? {
            Reply::Stored(ack) => Ok(ack),
            Reply::Finished(_) => Err(SearchError::aggregator_stopped(&self.label)),
        }
    }

    /// Stops the aggregator and returns its final state.
    pub fn finish(mut self) -> SearchResult<MatchState> {
        let reply = self.request(Message::Finish);
        self.shutdown();
        match reply? {
            Reply::Finished(state) => Ok(*state),
            Reply::Stored(_) => Err(SearchError::aggregator_stopped(&self.label)),
        }
    }

    fn request(&self, message: Message) -> SearchResult<Reply> {
        let inbox = self
            .inbox
            .as_ref()
            .ok_or_else(|| SearchError::aggregator_stopped(&self.label))?;
        inbox
            .send(message)
            .map_err(|_| SearchError::aggregator_stopped(&self.label))?;
        self.replies
            .recv()
            .map_err(|_| SearchError::aggregator_stopped(&self.label))
    }

    fn shutdown(&mut self) {
        // closing the inbox ends the worker loop
        self.inbox.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("label", &self.label)
            .field("running", &self.worker.is_some())
            .finish()
    }
}
