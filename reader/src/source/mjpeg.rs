use bytes::{Buf, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use visible_light_common::frame::RawFrame;

use super::{FrameSource, GrabError};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Frames buffered between the HTTP reader and the acquisition loop. When the
/// queue is full the oldest frame is evicted so the loop always sees the
/// latest images.
const QUEUE_DEPTH: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("frame receiver dropped")]
    ReceiverGone,
}

struct QueuedFrame {
    jpeg: Vec<u8>,
    captured_at_ms: i64,
    seq: u64,
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<QueuedFrame>,
    /// The reader task is gone; no more frames will arrive.
    closed: bool,
    /// The acquisition side is gone; the reader should stop.
    abandoned: bool,
}

/// Bounded latest-images queue shared by the reader task and `retrieve`.
#[derive(Default)]
struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl FrameQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the oldest of the queued frames.
    fn pop(&self, timeout: Duration) -> Result<QueuedFrame, GrabError> {
        let guard = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| s.frames.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        match state.frames.pop_front() {
            Some(frame) => Ok(frame),
            None if state.closed => Err(GrabError::Disconnected),
            None => Err(GrabError::Timeout(timeout)),
        }
    }

    fn abandon(&self) {
        self.lock().abandoned = true;
    }
}

/// Producer half of the frame queue. Dropping it closes the queue.
struct FrameSender {
    queue: Arc<FrameQueue>,
}

impl FrameSender {
    /// Queue `frame`, evicting the oldest one when full. Returns the sequence
    /// number of the evicted frame.
    fn push(&self, frame: QueuedFrame) -> Result<Option<u64>, StreamError> {
        let mut state = self.queue.lock();
        if state.abandoned {
            return Err(StreamError::ReceiverGone);
        }
        let evicted = if state.frames.len() >= QUEUE_DEPTH {
            state.frames.pop_front().map(|f| f.seq)
        } else {
            None
        };
        state.frames.push_back(frame);
        drop(state);
        self.queue.ready.notify_one();
        Ok(evicted)
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.queue.lock().closed = true;
        self.queue.ready.notify_all();
    }
}

/// Camera served as an HTTP multipart MJPEG stream.
///
/// A tokio task reads the stream and reconnects with exponential backoff;
/// `retrieve` blocks on the hand-off queue.
pub struct MjpegSource {
    frames: Arc<FrameQueue>,
    width: u32,
    height: u32,
    reader: JoinHandle<()>,
}

impl MjpegSource {
    pub fn spawn(runtime: &tokio::runtime::Handle, url: String, width: u32, height: u32) -> Self {
        let frames = Arc::new(FrameQueue::default());
        let tx = FrameSender {
            queue: Arc::clone(&frames),
        };
        let reader = runtime.spawn(async move { run_mjpeg_reader(&url, tx).await });
        Self {
            frames,
            width,
            height,
            reader,
        }
    }
}

impl FrameSource for MjpegSource {
    fn retrieve(&mut self, timeout: Duration) -> Result<RawFrame, GrabError> {
        let frame = self.frames.pop(timeout)?;
        Ok(RawFrame::jpeg(
            frame.jpeg,
            self.width,
            self.height,
            frame.captured_at_ms,
            frame.seq,
        ))
    }
}

impl Drop for MjpegSource {
    fn drop(&mut self) {
        self.frames.abandon();
        self.reader.abort();
    }
}

async fn run_mjpeg_reader(url: &str, frames: FrameSender) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut seq: u64 = 0;

    loop {
        info!(url, "connecting to MJPEG stream");
        match consume_stream(url, &frames, &mut seq).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(StreamError::ReceiverGone) => {
                debug!("acquisition loop gone, stopping MJPEG reader");
                return;
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    url: &str,
    frames: &FrameSender,
    seq: &mut u64,
) -> Result<(), StreamError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(StreamError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(StreamError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(StreamError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MultipartParser::new();
    let mut parsed = Vec::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(StreamError::HttpStream)?;
        parser.feed(&chunk, &mut parsed);

        for jpeg in parsed.drain(..) {
            *seq += 1;
            let frame = QueuedFrame {
                jpeg,
                captured_at_ms: Utc::now().timestamp_millis(),
                seq: *seq,
            };
            if let Some(evicted) = frames.push(frame)? {
                debug!(seq = evicted, "acquisition loop behind, dropping oldest frame");
            }
        }
    }

    warn!("MJPEG byte stream ended");
    Ok(())
}

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` MJPEG bodies.
struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Append `chunk` and push every JPEG completed by it onto `out`.
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<Vec<u8>>) {
        self.buffer.extend_from_slice(chunk);

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        self.buffer.advance(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let excess = self.buffer.len() - BOUNDARY.len();
                            self.buffer.advance(excess);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        self.buffer.advance(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };

                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    self.buffer.advance(jpeg_end + BOUNDARY.len());

                    if !jpeg.is_empty() {
                        out.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"preamble--frame\r\nContent-Type: image/jpeg\r\n\r\nAAAA\r\n\
--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nBBBB\r\n--frame\r\n";

    #[test]
    fn splits_whole_body() {
        let mut parser = MultipartParser::new();
        let mut out = Vec::new();
        parser.feed(STREAM, &mut out);
        assert_eq!(out, vec![b"AAAA".to_vec(), b"BBBB".to_vec()]);
    }

    #[test]
    fn splits_across_small_chunks() {
        for chunk_size in [1, 3, 5, 9, 17] {
            let mut parser = MultipartParser::new();
            let mut out = Vec::new();
            for chunk in STREAM.chunks(chunk_size) {
                parser.feed(chunk, &mut out);
            }
            assert_eq!(
                out,
                vec![b"AAAA".to_vec(), b"BBBB".to_vec()],
                "chunk size {chunk_size}"
            );
        }
    }

    #[test]
    fn incomplete_frame_is_held_back() {
        let mut parser = MultipartParser::new();
        let mut out = Vec::new();
        parser.feed(b"--frame\r\nContent-Type: image/jpeg\r\n\r\nCCCC", &mut out);
        assert!(out.is_empty());
        parser.feed(b"\r\n--frame\r\n", &mut out);
        assert_eq!(out, vec![b"CCCC".to_vec()]);
    }

    #[test]
    fn retrieve_times_out_without_frames() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        // The runtime is never driven, so the reader task delivers nothing.
        let mut source = MjpegSource::spawn(
            runtime.handle(),
            "http://127.0.0.1:9/stream".into(),
            4,
            2,
        );
        let result = source.retrieve(Duration::from_millis(20));
        assert!(matches!(result, Err(GrabError::Timeout(_))));
    }

    fn queued(seq: u64) -> QueuedFrame {
        QueuedFrame {
            jpeg: vec![seq as u8],
            captured_at_ms: 0,
            seq,
        }
    }

    #[test]
    fn full_queue_keeps_latest_frames() {
        let queue = Arc::new(FrameQueue::default());
        let tx = FrameSender {
            queue: Arc::clone(&queue),
        };
        assert_eq!(tx.push(queued(1)).unwrap(), None);
        assert_eq!(tx.push(queued(2)).unwrap(), None);
        assert_eq!(tx.push(queued(3)).unwrap(), Some(1));

        let timeout = Duration::from_millis(20);
        assert_eq!(queue.pop(timeout).unwrap().seq, 2);
        assert_eq!(queue.pop(timeout).unwrap().seq, 3);
        assert!(matches!(queue.pop(timeout), Err(GrabError::Timeout(_))));
    }

    #[test]
    fn finished_reader_reports_disconnected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let frames = Arc::new(FrameQueue::default());
        let tx = FrameSender {
            queue: Arc::clone(&frames),
        };
        tx.push(queued(7)).unwrap();
        drop(tx);

        let mut source = MjpegSource {
            frames,
            width: 1,
            height: 1,
            reader: runtime.spawn(async {}),
        };
        let timeout = Duration::from_millis(20);
        // Frames queued before the reader stopped are still delivered.
        assert_eq!(source.retrieve(timeout).unwrap().seq, 7);
        assert!(matches!(
            source.retrieve(timeout),
            Err(GrabError::Disconnected)
        ));
    }

    #[test]
    fn dropped_source_stops_producer() {
        let queue = Arc::new(FrameQueue::default());
        let tx = FrameSender {
            queue: Arc::clone(&queue),
        };
        queue.abandon();
        assert!(matches!(tx.push(queued(1)), Err(StreamError::ReceiverGone)));
    }
}
