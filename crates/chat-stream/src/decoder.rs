use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::errors::TransportError;
use crate::transport::ByteStream;

/// Lazily decoded chunk sequence. Ends on the terminator sentinel or when
/// the byte source closes; a read error is yielded once and ends it.
pub type ChunkStream = Pin<Box<dyn futures::Stream<Item = Result<Chunk, TransportError>> + Send>>;

const DONE_MARKERS: [&str; 2] = ["[DONE]", "DONE"];
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Result of decoding one complete block.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBlock {
    Chunk(Chunk),
    /// Terminator sentinel.
    Done,
}

/// Splits a byte stream into blank-line separated blocks and decodes them.
///
/// Bytes are buffered raw until a full terminator is seen, so UTF-8
/// sequences split across reads are reassembled before decoding.
#[derive(Debug, Default)]
pub struct BlockDecoder {
    buf: Vec<u8>,
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `bytes` and returns every block completed by them, in order.
    /// Malformed blocks are logged and skipped.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<DecodedBlock> {
        self.buf.extend_from_slice(bytes);
        let mut blocks = Vec::new();
        while let Some((idx, delim_len)) = find_block_delimiter(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(decoded) = decode_block(&block) {
                blocks.push(decoded);
            }
        }
        blocks
    }

    /// Decodes whatever is left in the buffer as a final block.
    pub fn finish(&mut self) -> Option<DecodedBlock> {
        let rest = std::mem::take(&mut self.buf);
        decode_block(&rest)
    }

    /// Drops buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered bytes not yet part of a complete block.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_block_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn block_payload(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut data_lines: Vec<&str> = Vec::new();
    let mut saw_field = false;
    for raw_line in trimmed.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.starts_with(':') || IGNORED_FIELDS.iter().any(|f| line.starts_with(f)) {
            saw_field = true;
        }
    }
    if !data_lines.is_empty() {
        let payload = data_lines.join("\n");
        let payload = payload.trim();
        return (!payload.is_empty()).then(|| payload.to_string());
    }
    if saw_field {
        return None;
    }
    Some(trimmed.to_string())
}

/// Decodes one block (without its terminator).
///
/// Returns `None` for empty or comment-only blocks and for blocks that do not
/// parse as a chunk; the latter are logged.
pub fn decode_block(bytes: &[u8]) -> Option<DecodedBlock> {
    let payload = block_payload(bytes)?;
    if DONE_MARKERS.contains(&payload.as_str()) {
        return Some(DecodedBlock::Done);
    }
    match serde_json::from_str::<Chunk>(&payload) {
        Ok(chunk) => Some(DecodedBlock::Chunk(chunk)),
        Err(e) => {
            warn!(error = %e, block = %preview(&payload), "skipping malformed stream block");
            None
        }
    }
}

fn preview(payload: &str) -> String {
    const MAX_CHARS: usize = 120;
    if payload.chars().count() <= MAX_CHARS {
        return payload.to_string();
    }
    let mut out: String = payload.chars().take(MAX_CHARS).collect();
    out.push('…');
    out
}

/// Turns a byte source into a lazy chunk sequence.
///
/// Dropping the returned stream drops the byte source, which closes the
/// underlying connection and discards any buffered partial block.
pub fn decode_chunks(bytes: ByteStream) -> ChunkStream {
    struct State {
        bytes: ByteStream,
        decoder: BlockDecoder,
        pending: VecDeque<Chunk>,
        done: bool,
    }

    let stream = stream::try_unfold(
        State {
            bytes,
            decoder: BlockDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Ok(Some((chunk, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(bytes)) => {
                        for block in state.decoder.push_bytes(&bytes) {
                            match block {
                                DecodedBlock::Chunk(chunk) => state.pending.push_back(chunk),
                                DecodedBlock::Done => {
                                    debug!(
                                        discarded = state.decoder.buffered_len(),
                                        "stream terminator received"
                                    );
                                    state.decoder.clear();
                                    state.done = true;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        if let Some(DecodedBlock::Chunk(chunk)) = state.decoder.finish() {
                            state.pending.push_back(chunk);
                        }
                        state.done = true;
                    }
                }
            }
        },
    );
    Box::pin(stream)
}
