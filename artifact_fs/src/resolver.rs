//! Glob-aware listing.
//!
//! [`list`] splits a pattern into its literal prefix and glob remainder, then
//! enumerates from the prefix with the strategy the adapter's [`Layout`]
//! calls for and matches every candidate's full path client-side.

use async_stream::try_stream;
use futures::{stream::BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    glob::{split_pattern, Pattern},
    FileInfo,
    Filesystem,
    FsError,
    FsResult,
    Layout,
    Listing,
};

/// Options for a single [`list`] call.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Stop after this many entries. Hitting the cap is not an error; the
    /// listing is marked truncated instead.
    ///
    /// On flat layouts the cap bounds the keys fetched from the store, matching
    /// or not, so a selective pattern may return fewer entries than the cap.
    pub max_items: Option<usize>,

    /// Abort the listing when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl ListOptions {
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// List the entries of `fs` matching `pattern`.
///
/// Results are sorted by full path. A cancelled listing returns
/// [`FsError::Cancelled`], never a partial result.
pub async fn list<F>(fs: &F, pattern: &str, options: &ListOptions) -> FsResult<Listing>
where
    F: Filesystem + ?Sized,
{
    let work = resolve(fs, pattern, options.max_items);
    let mut listing = match &options.cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FsError::Cancelled),
                listing = work => listing?,
            }
        }
        None => work.await?,
    };
    listing
        .entries
        .sort_by(|a, b| a.full_path.cmp(&b.full_path));
    debug!(
        pattern = %pattern,
        entries = listing.entries.len(),
        truncated = listing.truncated,
        "resolved listing"
    );
    Ok(listing)
}

async fn resolve<F>(fs: &F, pattern: &str, max_items: Option<usize>) -> FsResult<Listing>
where
    F: Filesystem + ?Sized,
{
    let pattern = pattern.trim_start_matches('/');
    let (prefix, remainder) = split_pattern(pattern);
    if remainder.is_empty() {
        let entries = list_literal(fs, prefix).await?;
        return Ok(cap(entries, max_items));
    }

    let matcher = Pattern::new(pattern)?;
    match fs.layout() {
        Layout::Flat => {
            let candidates = fs.list_recursive(prefix);
            collect_matches(candidates, &matcher, max_items, max_items, |entry| {
                !entry.full_path.ends_with('/')
            })
            .await
        }
        Layout::Hierarchical => {
            let candidates = walk(fs, prefix, matcher.max_depth());
            collect_matches(candidates, &matcher, max_items, None, |_| true).await
        }
    }
}

/// Handle a pattern with no meta characters: a file yields itself, a
/// directory yields its children.
async fn list_literal<F>(fs: &F, path: &str) -> FsResult<Vec<FileInfo>>
where
    F: Filesystem + ?Sized,
{
    if path.is_empty() || path.ends_with('/') {
        return fs.list_dir(path).await;
    }
    match fs.stat(path).await {
        Ok(info) if info.is_dir => fs.list_dir(path).await,
        Ok(info) => Ok(vec![info]),
        // Flat stores have no directory objects, only shared key prefixes.
        Err(e) if e.is_not_found() && fs.layout() == Layout::Flat => {
            let children = fs.list_dir(path).await?;
            if children.is_empty() {
                Err(e)
            } else {
                Ok(children)
            }
        }
        Err(e) => Err(e),
    }
}

fn cap(mut entries: Vec<FileInfo>, max_items: Option<usize>) -> Listing {
    match max_items {
        Some(max) if entries.len() > max => {
            entries.sort_by(|a, b| a.full_path.cmp(&b.full_path));
            entries.truncate(max);
            Listing {
                entries,
                truncated: true,
            }
        }
        _ => Listing::complete(entries),
    }
}

/// Filter `candidates` through `matcher`.
///
/// `max_items` caps matched entries; `max_scanned` caps every candidate
/// pulled from the stream.
async fn collect_matches(
    mut candidates: BoxStream<'_, FsResult<FileInfo>>,
    matcher: &Pattern,
    max_items: Option<usize>,
    max_scanned: Option<usize>,
    eligible: impl Fn(&FileInfo) -> bool,
) -> FsResult<Listing> {
    let mut listing = Listing::default();
    let mut scanned = 0usize;
    while let Some(entry) = candidates.next().await {
        let entry = entry?;
        if max_scanned.is_some_and(|max| scanned >= max) {
            listing.truncated = true;
            break;
        }
        scanned += 1;
        if !eligible(&entry) || !matcher.matches(entry.full_path.trim_end_matches('/')) {
            continue;
        }
        if max_items.is_some_and(|max| listing.entries.len() >= max) {
            listing.truncated = true;
            break;
        }
        listing.entries.push(entry);
    }
    Ok(listing)
}

/// Walk a hierarchical backend from `root`, depth first.
///
/// Directories at `max_depth` segments are reported but not descended into.
/// A `root` that is missing or is a file yields nothing.
pub(crate) fn walk<'a, F>(
    fs: &'a F,
    root: &'a str,
    max_depth: Option<usize>,
) -> BoxStream<'a, FsResult<FileInfo>>
where
    F: Filesystem + ?Sized,
{
    Box::pin(try_stream! {
        let mut pending = vec![root.to_string()];
        let mut at_root = true;
        while let Some(dir) = pending.pop() {
            let entries = match fs.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if at_root => {
                    if e.is_not_found() || matches!(fs.stat(&dir).await, Ok(info) if !info.is_dir) {
                        break;
                    }
                    Err(e)?
                }
                Err(e) => Err(e)?,
            };
            at_root = false;
            for entry in entries {
                if entry.is_dir && max_depth.map_or(true, |max| entry.depth() < max) {
                    pending.push(entry.full_path.clone());
                }
                yield entry;
            }
        }
    })
}
