//! Streaming tar-to-tar rewrite

use std::io::{self, Read, Write};

use chrono::Utc;
use tar::{Archive, Builder};

use crate::{Adjust, ArchiveError, EntryHeader};

/// Counts of entries seen by one `adjust_tar` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Entries copied to the output (the synthetic prefix directory is not counted)
    pub written: usize,
    /// Entries vetoed by an adjustment
    pub dropped: usize,
}

/// Copy every entry of `reader` into `writer` under `prefix`
///
/// A directory entry for `prefix` itself is written first. Each source header
/// is cloned and passed through `adjusts` in order; the first adjustment to
/// return `None` drops the entry and its content, and later adjustments are
/// not consulted. Surviving entries get `prefix` prepended to their name and
/// their content copied verbatim. Entries are streamed one at a time in input
/// order. The archive footer is left for the caller to write.
pub fn adjust_tar<R: Read, W: Write>(
    reader: &mut Archive<R>,
    writer: &mut Builder<W>,
    prefix: &str,
    adjusts: &[Box<dyn Adjust>],
) -> Result<TransformStats, ArchiveError> {
    if !prefix.ends_with('/') {
        return Err(ArchiveError::InvalidPrefix(prefix.to_string()));
    }

    EntryHeader::directory(prefix, now()).append(writer, io::empty())?;

    let mut stats = TransformStats::default();
    'entries: for entry in reader.entries()? {
        let mut entry = entry?;
        let mut header = EntryHeader::from_entry(&entry)?;
        for adjust in adjusts {
            match adjust.adjust(header) {
                Some(adjusted) => header = adjusted,
                None => {
                    stats.dropped += 1;
                    continue 'entries;
                }
            }
        }
        header.name = format!("{}{}", prefix, header.name);
        header.append(writer, &mut entry)?;
        stats.written += 1;
    }

    Ok(stats)
}

/// Write a regular file that has no counterpart in any source archive
pub fn write_synthetic_file<W: Write>(
    writer: &mut Builder<W>,
    name: &str,
    content: &[u8],
    mode: u32,
) -> Result<(), ArchiveError> {
    EntryHeader::file(name, content.len() as u64, mode, now()).append(writer, content)?;
    Ok(())
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
