use std::collections::VecDeque;
use std::sync::Arc;

use argus_core::current_unix_timestamp_ms;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

use crate::classifier::{ErrorClassifier, LineOrigin, CONTEXT_WINDOW_LINES};
use crate::dispatcher::ErrorDispatcher;
use crate::registry::ProcessEntry;
use crate::types::OutputStream;

/// Longest line kept from a pipe; bytes past it are discarded up to the next newline.
pub(crate) const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reads one pipe of a monitored process line by line until EOF, a read error, or
/// cancellation of the entry's reader token.
pub(crate) async fn run_output_reader<R>(
    reader: R,
    stream: OutputStream,
    entry: Arc<ProcessEntry>,
    dispatcher: Arc<ErrorDispatcher>,
) where
    R: AsyncRead + Unpin,
{
    let classifier = ErrorClassifier::builtin();
    let cancel = entry.reader_token().clone();
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut context = VecDeque::with_capacity(CONTEXT_WINDOW_LINES);
    let mut line_count = 0usize;

    loop {
        buffer.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_capped_line(&mut reader, &mut buffer, MAX_LINE_BYTES) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                warn!(
                    pid = entry.pid(),
                    stream = stream.as_str(),
                    %error,
                    "failed reading process output"
                );
                break;
            }
        }

        let line = decode_line(&buffer);
        line_count += 1;
        entry.append_output(stream, line.clone());

        if context.len() >= CONTEXT_WINDOW_LINES {
            context.pop_front();
        }
        context.push_back(line.clone());
        let context_lines = context.iter().cloned().collect::<Vec<_>>();

        let origin = LineOrigin {
            pid: entry.pid(),
            command: &entry.command().command,
            source: stream,
        };
        if let Some(error) = classifier.classify_output_line(
            &line,
            origin,
            &context_lines,
            entry.patterns(),
            current_unix_timestamp_ms(),
        ) {
            dispatcher.submit(error);
        }
    }

    debug!(
        pid = entry.pid(),
        stream = stream.as_str(),
        line_count,
        "output reader finished"
    );
}

/// Like `read_until(b'\n')`, but keeps at most `max_bytes` in `buffer`. Returns the
/// number of bytes consumed from the reader, so `0` still means EOF.
async fn read_capped_line<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    max_bytes: usize,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        let (used, line_done) = match available.iter().position(|byte| *byte == b'\n') {
            Some(index) => (index + 1, true),
            None => (available.len(), false),
        };
        let room = max_bytes.saturating_sub(buffer.len());
        buffer.extend_from_slice(&available[..used.min(room)]);
        reader.consume(used);
        consumed = consumed.saturating_add(used);
        if line_done {
            return Ok(consumed);
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(raw).into_owned();
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}
