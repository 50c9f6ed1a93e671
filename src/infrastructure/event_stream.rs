// Device push stream - line framing, decoding and reconnects
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::stream::{Stream, StreamExt};

use crate::application::dispatcher::EventDispatcher;
use crate::domain::event::EventFrame;
use crate::infrastructure::http_device::HttpDeviceApi;

/// Longest event line accepted; a full history snapshot stays well below this.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Splits the raw body into lines and decodes each into an event frame.
///
/// Handles newline-delimited JSON as well as SSE bodies: `data:` prefixes are
/// stripped, comments and `event:`/`id:`/`retry:` fields are skipped. Lines
/// longer than the limit are dropped up to their terminating newline.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes at the start of `buffer` already known to hold no newline.
    scanned: usize,
    /// Set while the rest of an oversized line is being skipped.
    discarding: bool,
    max_line: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            discarding: false,
            max_line,
        }
    }

    /// Feed one body chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<EventFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(self.scanned + pos);
            self.buffer.advance(1);
            self.scanned = 0;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if line.len() > self.max_line {
                tracing::warn!("Dropping event line of {} bytes", line.len());
                continue;
            }
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            if !self.discarding {
                tracing::warn!("Event line exceeds {} bytes, skipping to the next newline", self.max_line);
            }
            self.discarding = true;
            self.buffer.clear();
            self.scanned = 0;
        }
        frames
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Option<EventFrame> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(e) => {
            tracing::warn!("Skipping non UTF-8 event line: {}", e);
            return None;
        }
    };

    if line.is_empty() || line.starts_with(':') || is_sse_field(line) {
        return None;
    }

    match EventFrame::from_line(line) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("Skipping undecodable event line: {}", e);
            None
        }
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"].iter().any(|field| line.starts_with(field))
}

/// Turn a stream of body chunks into a stream of event frames.
/// Ends when the body ends or fails.
pub fn decode_frames<S, B, E>(body: S) -> impl Stream<Item = EventFrame>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        futures::pin_mut!(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in decoder.push(chunk.as_ref()) {
                        yield frame;
                    }
                }
                Err(e) => {
                    tracing::warn!("Event stream broke: {}", e);
                    break;
                }
            }
        }

        if decoder.buffered() > 0 {
            tracing::debug!("Discarding {} bytes of an incomplete event line", decoder.buffered());
        }
    }
}

/// Publish every frame of `frames` to the dispatcher. Returns how many were read.
pub async fn pump<S>(frames: S, dispatcher: &EventDispatcher) -> usize
where
    S: Stream<Item = EventFrame>,
{
    futures::pin_mut!(frames);

    let mut count = 0;
    while let Some(frame) = frames.next().await {
        count += 1;
        if frame.split_topic().is_none() {
            tracing::trace!("Ignoring {} frame", frame.topic);
            continue;
        }

        let topic = frame.topic.clone();
        let delivered = dispatcher.publish(frame);
        tracing::trace!("{} delivered to {} subscribers", topic, delivered);
    }
    count
}

/// Keep the push stream connected for the lifetime of the process.
///
/// `on_reconnect` runs whenever a connection is established after an earlier
/// one was lost, since pushes sent in between are gone.
pub async fn run_event_stream<F>(api: HttpDeviceApi, dispatcher: EventDispatcher, reconnect_delay: Duration, on_reconnect: F)
where
    F: Fn() + Send + 'static,
{
    let mut connected_before = false;

    loop {
        match api.open_events().await {
            Ok(body) => {
                tracing::info!("Connected to {}", api.events_url());
                if connected_before {
                    on_reconnect();
                }
                connected_before = true;

                let count = pump(decode_frames(body), &dispatcher).await;
                tracing::warn!("Event stream closed after {} frames", count);
            }
            Err(e) => {
                tracing::debug!("Event stream unavailable: {:#}", e);
            }
        }

        tokio::time::sleep(reconnect_delay).await;
    }
}
