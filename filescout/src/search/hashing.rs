use memchr::memmem;
use sha2::Digest;
use std::io::{self, Read};
use std::path::Path;
use tracing::trace;

use super::content::open_scan_reader;
use super::state::{participants, SearchState};
use crate::checks::{Category, Criterion, HashAlgorithm};
use crate::errors::SearchResult;
use crate::stats::RunContext;

/// Read size for digests and byte scans
pub const BLOCK_SIZE: usize = 4096;

enum Hasher {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
    Sha3_224(sha3::Sha3_224),
    Sha3_256(sha3::Sha3_256),
    Sha3_384(sha3::Sha3_384),
    Sha3_512(sha3::Sha3_512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            HashAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha384 => Hasher::Sha384(sha2::Sha384::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
            HashAlgorithm::Sha3_224 => Hasher::Sha3_224(sha3::Sha3_224::new()),
            HashAlgorithm::Sha3_256 => Hasher::Sha3_256(sha3::Sha3_256::new()),
            HashAlgorithm::Sha3_384 => Hasher::Sha3_384(sha3::Sha3_384::new()),
            HashAlgorithm::Sha3_512 => Hasher::Sha3_512(sha3::Sha3_512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Sha3_224(h) => h.update(data),
            Hasher::Sha3_256(h) => h.update(data),
            Hasher::Sha3_384(h) => h.update(data),
            Hasher::Sha3_512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(ctx) => hex::encode_upper(ctx.compute().0),
            Hasher::Sha1(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha256(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha384(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha512(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha3_224(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha3_256(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha3_384(h) => hex::encode_upper(h.finalize()),
            Hasher::Sha3_512(h) => hex::encode_upper(h.finalize()),
        }
    }
}

/// Streams `reader` through `algorithm` and returns the uppercase hex digest.
pub fn digest_reader<R: Read>(mut reader: R, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => hasher.update(&block[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hasher.finalize_hex())
}

pub fn digest_file(path: &Path, algorithm: HashAlgorithm, decompress: bool) -> io::Result<String> {
    digest_reader(open_scan_reader(path, decompress)?, algorithm)
}

/// Searches `reader` for every pattern in one pass and reports which were found.
///
/// Blocks overlap by the length of the longest pattern minus one byte, so
/// patterns straddling a block boundary are found.
pub fn find_patterns<R: Read>(mut reader: R, patterns: &[Vec<u8>]) -> io::Result<Vec<bool>> {
    let finders: Vec<memmem::Finder> = patterns.iter().map(memmem::Finder::new).collect();
    let carry = patterns
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .saturating_sub(1);
    let mut found = vec![false; patterns.len()];
    let mut window = Vec::with_capacity(BLOCK_SIZE + carry);
    let mut block = [0u8; BLOCK_SIZE];

    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        window.extend_from_slice(&block[..n]);
        for (i, finder) in finders.iter().enumerate() {
            if !found[i] && finder.find(&window).is_some() {
                found[i] = true;
            }
        }
        if found.iter().all(|f| *f) {
            break;
        }
        if window.len() > carry {
            window.drain(..window.len() - carry);
        }
    }
    Ok(found)
}

/// Evaluates hash checks, computing each digest at most once per file and
/// decompression mode.
pub fn check_hashes(searches: &mut [SearchState], ctx: &mut RunContext, file: &Path) -> SearchResult<()> {
    for algorithm in HashAlgorithm::ALL {
        let category = Category::Hash(algorithm);
        for decompress in [false, true] {
            let indices = participants(searches, category, decompress);
            if indices.is_empty() {
                continue;
            }
            let digest = match digest_file(file, algorithm, decompress) {
                Ok(digest) => digest,
                Err(e) => {
                    ctx.record_open_failure(file, e);
                    continue;
                }
            };
            trace!("{} {} = {}", algorithm, file.display(), digest);

            for i in indices {
                let search = &mut searches[i];
                let all_wanted = search.evaluate(category, file, |check| match &check.criterion {
                    Criterion::Hash { digest: expected, .. } => *expected == digest,
                    _ => false,
                })?;
                if !all_wanted && search.match_all() {
                    search.deactivate(&format!("{} check failed on {}", algorithm, file.display()));
                }
            }
        }
    }
    Ok(())
}

/// Evaluates byte-signature checks of all active searches in a single pass
/// over the file per decompression mode.
pub fn scan_bytes(searches: &mut [SearchState], ctx: &mut RunContext, file: &Path) -> SearchResult<()> {
    for decompress in [false, true] {
        let indices = participants(searches, Category::Bytes, decompress);
        if indices.is_empty() {
            continue;
        }
        let mut patterns: Vec<Vec<u8>> = Vec::new();
        for &i in &indices {
            for check in &searches[i].checks {
                if let Criterion::Bytes(pattern) = &check.criterion {
                    if !patterns.contains(pattern) {
                        patterns.push(pattern.clone());
                    }
                }
            }
        }

        let found = match open_scan_reader(file, decompress).and_then(|r| find_patterns(r, &patterns)) {
            Ok(found) => found,
            Err(e) => {
                ctx.record_open_failure(file, e);
                continue;
            }
        };
        let hit = |pattern: &Vec<u8>| {
            patterns
                .iter()
                .position(|p| p == pattern)
                .is_some_and(|i| found[i])
        };

        for i in indices {
            let search = &mut searches[i];
            let all_wanted = search.evaluate(Category::Bytes, file, |check| match &check.criterion {
                Criterion::Bytes(pattern) => hit(pattern),
                _ => false,
            })?;
            if !all_wanted && search.match_all() {
                search.deactivate(&format!("bytes check failed on {}", file.display()));
            }
        }
    }
    Ok(())
}
