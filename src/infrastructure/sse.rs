/// Incremental decoder for `text/event-stream` bodies.
///
/// Frames are delimited by a blank line. Within one frame only the last
/// `data:` line carries the payload; earlier `data:` lines are superseded.
/// Chunk boundaries are arbitrary — a frame may arrive split anywhere,
/// including in the middle of the delimiter.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
}

impl SseFrameDecoder {
    /// Feeds one chunk of bytes and returns the `data:` payloads of every
    /// frame completed by it, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some((frame_end, delimiter_len)) = find_frame_end(&self.buffer) {
            let rest = self.buffer.split_off(frame_end + delimiter_len);
            let frame = std::mem::replace(&mut self.buffer, rest);
            if let Some(payload) = extract_data(&frame[..frame_end]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Drains whatever is left after the stream closed. Well-formed streams
    /// end every frame with a blank line, but a server that closes the
    /// connection right after its last `data:` line is still readable.
    pub fn finish(self) -> Option<String> {
        extract_data(&self.buffer)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|window| window == b"\n\n");
    let crlf = buffer.windows(4).position(|window| window == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(lf), Some(crlf)) => {
            if crlf < lf {
                Some((crlf, 4))
            } else {
                Some((lf, 2))
            }
        }
        (Some(lf), None) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

fn extract_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    text.lines()
        .filter_map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            line.strip_prefix("data:")
        })
        .last()
        .map(|payload| payload.strip_prefix(' ').unwrap_or(payload).to_string())
}
