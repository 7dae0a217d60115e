use chrono::{DateTime, Utc};
use std::fs::{self, Metadata};
use std::path::Path;

use super::content::scan_content;
use super::hashing::{check_hashes, scan_bytes};
use super::state::SearchState;
use crate::checks::Category;
use crate::errors::SearchResult;
use crate::stats::RunContext;

const METADATA_CATEGORIES: [Category; 4] = [
    Category::Name,
    Category::Mode,
    Category::Size,
    Category::Mtime,
];

/// Runs every active search against one file.
///
/// Metadata checks run first; content, byte and hash checks follow for the
/// searches still active. Activation changes made while evaluating the file
/// are undone afterwards. Only fatal errors are returned, everything else
/// lands in the run's error log.
pub fn evaluate_file(
    searches: &mut [SearchState],
    ctx: &mut RunContext,
    file: &Path,
) -> SearchResult<()> {
    ctx.stats.files_count += 1;
    let saved: Vec<bool> = searches.iter().map(|s| s.active).collect();

    let outcome = evaluate(searches, ctx, file);

    for (search, was_active) in searches.iter_mut().zip(saved) {
        search.active = was_active;
    }
    match outcome {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            ctx.record_error(e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn evaluate(searches: &mut [SearchState], ctx: &mut RunContext, file: &Path) -> SearchResult<()> {
    let meta = match fs::metadata(file) {
        Ok(meta) => meta,
        Err(e) => {
            ctx.record_open_failure(file, e);
            return Ok(());
        }
    };
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mode = mode_string(&meta);
    let size = meta.len();
    let modified: DateTime<Utc> = meta
        .modified()
        .map(DateTime::from)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    for search in searches.iter_mut().filter(|s| s.active) {
        for category in METADATA_CATEGORIES {
            if !search.has(category) {
                continue;
            }
            let all_wanted = search.evaluate(category, file, |check| {
                check.matches_metadata(&name, &mode, size, modified)
            })?;
            if !all_wanted && search.match_all() {
                search.deactivate(&format!("{} check failed on {}", category.filter_name(), file.display()));
                break;
            }
        }
    }

    scan_content(searches, ctx, file)?;
    scan_bytes(searches, ctx, file)?;
    check_hashes(searches, ctx, file)
}

/// Renders file permissions the way `ls -l` does, e.g. `-rw-r--r--` or
/// `drwxr-xr-x`. Special bits are prefixed as letters (`u` setuid, `g`
/// setgid, `t` sticky).
#[cfg(unix)]
pub fn mode_string(meta: &Metadata) -> String {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    const RWX: &[u8; 9] = b"rwxrwxrwx";
    let mode = meta.permissions().mode();
    let file_type = meta.file_type();
    let mut out = String::with_capacity(12);

    if file_type.is_dir() {
        out.push('d');
    }
    if file_type.is_symlink() {
        out.push('L');
    }
    if file_type.is_block_device() || file_type.is_char_device() {
        out.push('D');
    }
    if file_type.is_fifo() {
        out.push('p');
    }
    if file_type.is_socket() {
        out.push('S');
    }
    if mode & 0o4000 != 0 {
        out.push('u');
    }
    if mode & 0o2000 != 0 {
        out.push('g');
    }
    if file_type.is_char_device() {
        out.push('c');
    }
    if mode & 0o1000 != 0 {
        out.push('t');
    }
    if out.is_empty() {
        out.push('-');
    }
    for (i, c) in RWX.iter().enumerate() {
        if mode & (1 << (8 - i)) != 0 {
            out.push(*c as char);
        } else {
            out.push('-');
        }
    }
    out
}

#[cfg(not(unix))]
pub fn mode_string(meta: &Metadata) -> String {
    let kind = if meta.is_dir() { 'd' } else { '-' };
    let perms = if meta.permissions().readonly() {
        "r--r--r--"
    } else {
        "rw-rw-rw-"
    };
    format!("{kind}{perms}")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_mode_string() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();

        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(mode_string(&fs::metadata(&file).unwrap()), "-rw-r--r--");

        fs::set_permissions(&file, fs::Permissions::from_mode(0o4755)).unwrap();
        assert_eq!(mode_string(&fs::metadata(&file).unwrap()), "urwxr-xr-x");

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o1777)).unwrap();
        assert_eq!(mode_string(&fs::metadata(dir.path()).unwrap()), "dtrwxrwxrwx");
    }
}
