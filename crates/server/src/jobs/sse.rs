// crates/server/src/jobs/sse.rs
//! SSE-backed event sink.
//!
//! The job task writes frames into a bounded channel whose receiver is the
//! response body. Capacity 1 means the task cannot get more than one frame
//! ahead of the client. A dropped body closes the channel and the next send
//! fails, which the transport adapter treats as a disconnect.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use jobstream_core::{EventSink, Frame, SinkError};

use crate::metrics;

/// Interval of the keep-alive comment on idle streams.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub struct SseSink {
    tx: mpsc::Sender<Event>,
}

/// Create a sink and the response stream reading from it.
pub fn channel() -> (SseSink, impl Stream<Item = Result<Event, Infallible>>) {
    let (tx, rx) = mpsc::channel(1);
    (SseSink { tx }, ReceiverStream::new(rx).map(Ok::<Event, Infallible>))
}

/// Wrap an event stream into an SSE response with keep-alive comments.
pub fn sse_response<S>(stream: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// Convert a serialized frame into an axum SSE event.
pub fn to_event(frame: &Frame) -> Event {
    Event::default().event(frame.event).data(&frame.data)
}

#[async_trait]
impl EventSink for SseSink {
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError> {
        let event = to_event(&frame);
        match self.tx.send(event).await {
            Ok(()) => {
                metrics::record_stream_event(frame.event);
                Ok(())
            }
            Err(_) => {
                metrics::record_disconnect();
                Err(SinkError(format!("stream closed before `{}` event", frame.event)))
            }
        }
    }
}
