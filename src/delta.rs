//! Delta computation: parse the candidate list a peer sends and filter it against a catalog.
//!
//! A delta request body is newline separated text, one part identifier per line. Nothing in it
//! is trusted: every line is reduced to its final path segment, too short tokens are dropped, and
//! whatever remains must be a member of the catalog to be approved.

use std::{collections::HashSet, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

/// Part identifiers are fixed length content hashes. Anything shorter than this is garbage.
pub const MIN_PART_LEN: usize = 11;

/// Reduce one line of a request body to a candidate part identifier.
///
/// Returns `None` for tokens that can never be valid identifiers.
pub fn candidate(line: &str) -> Option<&str> {
    let token = line.trim().trim_end_matches('/');
    let token = token.rsplit('/').next().unwrap_or(token);
    (token.len() >= MIN_PART_LEN).then_some(token)
}

/// Longest request line considered. Identifiers are short hashes, and a line may carry at most a
/// path in front of one.
pub const MAX_LINE_LEN: usize = 4096;

/// A lazy, non-restartable sequence of candidate identifiers read from a byte stream.
///
/// At most [`MAX_LINE_LEN`] bytes of one line are held in memory. Longer lines and lines that are
/// not UTF-8 are skipped. The sequence ends at end of stream or at the first read error; errors
/// are not reported, whatever was read before them still counts. The last line does not need a
/// trailing newline.
#[derive(Debug)]
pub struct Candidates<R> {
    reader: R,
    line: Vec<u8>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> Candidates<R> {
    /// Read candidates from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            done: false,
        }
    }

    /// The next candidate, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<String> {
        while !self.done {
            match self.read_line().await {
                Ok(Some(LineStatus::Complete)) => match std::str::from_utf8(&self.line) {
                    Ok(line) => match candidate(line) {
                        Some(token) => return Some(token.to_string()),
                        None => trace!("DELTA: ignoring malformed line {line:?}"),
                    },
                    Err(err) => trace!("DELTA: ignoring line that is not utf-8: {err}"),
                },
                Ok(Some(LineStatus::TooLong)) => {
                    trace!("DELTA: ignoring line longer than {MAX_LINE_LEN} bytes")
                }
                Ok(None) => self.done = true,
                Err(err) => {
                    trace!("DELTA: stopping at read error: {err}");
                    self.done = true;
                }
            }
        }
        None
    }

    /// Read one line into `self.line`, without its newline.
    ///
    /// Returns `None` at end of stream if nothing was read.
    async fn read_line(&mut self) -> io::Result<Option<LineStatus>> {
        self.line.clear();
        let mut status = LineStatus::Complete;
        let mut read_any = false;
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(read_any.then_some(status));
            }
            read_any = true;
            let newline = available.iter().position(|b| *b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            if status == LineStatus::Complete {
                if chunk.len() > MAX_LINE_LEN - self.line.len() {
                    status = LineStatus::TooLong;
                    self.line.clear();
                } else {
                    self.line.extend_from_slice(chunk);
                }
            }
            let used = newline.map_or(available.len(), |i| i + 1);
            self.reader.consume(used);
            if newline.is_some() {
                return Ok(Some(status));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStatus {
    Complete,
    TooLong,
}

/// Filters candidates against the membership of one catalog.
///
/// The membership set is built once from the oracle's reply. A member is approved at most once,
/// in the order candidates arrive.
#[derive(Debug)]
pub struct DeltaFilter<'a> {
    pending: HashSet<&'a str>,
    approved: Vec<String>,
}

impl<'a> DeltaFilter<'a> {
    /// Build the membership set for a catalog.
    pub fn new(members: &'a [String]) -> Self {
        Self {
            pending: members.iter().map(String::as_str).collect(),
            approved: Vec::new(),
        }
    }

    /// Offer one candidate. Returns whether it was approved.
    pub fn offer(&mut self, candidate: String) -> bool {
        if candidate.len() < MIN_PART_LEN {
            return false;
        }
        if self.pending.remove(candidate.as_str()) {
            self.approved.push(candidate);
            true
        } else {
            trace!("DELTA: ignoring extra {candidate:?} entry, not part of set or already approved");
            false
        }
    }

    /// Drain `candidates` into the filter.
    pub async fn offer_all<R: AsyncBufRead + Unpin>(&mut self, candidates: &mut Candidates<R>) {
        while let Some(candidate) = candidates.next().await {
            self.offer(candidate);
        }
    }

    /// The approved identifiers, in arrival order.
    pub fn into_approved(self) -> Vec<String> {
        self.approved
    }
}

/// Compute the approved list for a request body against a catalog's members.
pub async fn approve<R: AsyncBufRead + Unpin>(members: &[String], body: R) -> Vec<String> {
    let mut filter = DeltaFilter::new(members);
    filter.offer_all(&mut Candidates::new(body)).await;
    filter.into_approved()
}
