//! Session log readers.
//!
//! [`read_conversation`] parses a whole session log. [`read_stream`] reads only
//! the bytes appended since a caller-held offset and never consumes a line
//! that does not parse yet, since the producer may still be writing it.

use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, trace};

use crate::error::Result;
use crate::types::{ConversationMessage, MessageKind, StreamChunk};

/// Reads every record of a session log.
///
/// User and assistant records keep file order. Each summary record is
/// inserted at the front, so summaries lead the result in reverse file order.
/// Unparseable lines are skipped; a missing file yields no messages.
///
/// # Errors
///
/// Returns an I/O error if the file exists but cannot be read.
pub async fn read_conversation(path: &Path) -> Result<Vec<ConversationMessage>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Session log vanished before read");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut messages = Vec::new();
    for line in content.split(|&b| b == b'\n') {
        if line.trim_ascii().is_empty() {
            continue;
        }
        match ConversationMessage::parse_line(line) {
            Ok(Some(message)) if message.kind() == MessageKind::Summary => {
                messages.insert(0, message);
            }
            Ok(Some(message)) => messages.push(message),
            Ok(None) => {}
            Err(e) => trace!(path = %path.display(), error = %e, "Skipping unparseable line"),
        }
    }

    Ok(messages)
}

/// Reads the user and assistant records appended after `offset`.
///
/// Only `[offset, size)` is read, where `size` is observed once at the start.
/// Each line consumes its length plus one delimiter byte. The first line that
/// fails to parse stops the read and is not consumed, so the next call offers
/// it again. Other record types are consumed without being returned.
///
/// The returned offset is never below `offset` and never above `size`. When
/// `offset >= size` the file is not opened.
///
/// # Errors
///
/// Returns an I/O error if the file exists but cannot be read.
pub async fn read_stream(path: &Path, offset: u64) -> Result<StreamChunk> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StreamChunk::empty(offset)),
        Err(e) => return Err(e.into()),
    };

    if offset >= size {
        return Ok(StreamChunk::empty(offset));
    }

    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StreamChunk::empty(offset)),
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(offset)).await?;

    let len = size - offset;
    let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
    file.take(len).read_to_end(&mut buf).await?;

    let (messages, consumed) = parse_appended(&buf);
    let next_offset = offset.saturating_add(consumed).min(size);

    trace!(
        path = %path.display(),
        offset,
        next_offset,
        messages = messages.len(),
        "Read appended records"
    );

    Ok(StreamChunk {
        messages,
        next_offset,
    })
}

/// Parses appended bytes, returning the turns and the number of bytes
/// consumed (which may exceed `buf.len()` by one for the final segment).
fn parse_appended(buf: &[u8]) -> (Vec<ConversationMessage>, u64) {
    let mut messages = Vec::new();
    let mut consumed: u64 = 0;

    for line in buf.split(|&b| b == b'\n') {
        let line_len = line.len() as u64 + 1;
        if line.trim_ascii().is_empty() {
            consumed += line_len;
            continue;
        }
        match ConversationMessage::parse_line(line) {
            Ok(Some(message)) if message.kind().is_turn() => messages.push(message),
            Ok(_) => {}
            // Presumed mid-write.
            Err(_) => break,
        }
        consumed += line_len;
    }

    (messages, consumed)
}
