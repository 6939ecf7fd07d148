use super::config::RuntimeConfig;
use super::consumer::{FirehoseIngestor, FrameOutcome};
use super::error_handler::ReconnectDelay;
use crate::pipeline::db::StoreError;
use futures::{Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum ClientError {
    Connection(String),
    Store(StoreError),
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        ClientError::Store(e)
    }
}

impl From<WsError> for ClientError {
    fn from(e: WsError) -> Self {
        ClientError::Connection(e.to_string())
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ClientError::Store(e) => write!(f, "Cursor store error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

/// Why a single connection stopped being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Shutdown was requested
    Cancelled,
    /// Server closed the stream or sent an error frame
    Closed,
}

/// Read messages from one connection until it ends or `token` fires.
///
/// Frames are handled to completion; cancellation is only observed
/// between frames.
pub async fn consume_stream<S>(
    stream: &mut S,
    ingestor: &mut FirehoseIngestor,
    token: &CancellationToken,
) -> Result<StreamEnd, ClientError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(StreamEnd::Cancelled),
            message = stream.next() => message,
        };

        match message {
            None => return Ok(StreamEnd::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Binary(bytes))) => {
                let now = chrono::Utc::now().timestamp();
                if ingestor.handle_frame(&bytes, now) == FrameOutcome::Close {
                    return Ok(StreamEnd::Closed);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                log::warn!("🔌 Firehose closed the connection: {:?}", frame);
                return Ok(StreamEnd::Closed);
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Subscribe to the firehose, reconnecting after a fixed delay for as long
/// as the process runs. Each attempt resumes from the highest handled seq.
/// The cursor is flushed after every connection and once more on exit.
pub async fn run_with_reconnect(
    config: &RuntimeConfig,
    ingestor: &mut FirehoseIngestor,
    token: CancellationToken,
) -> Result<(), ClientError> {
    let mut delay = ReconnectDelay::new(config.reconnect_delay());

    loop {
        let url = config.subscription_url(ingestor.resume_cursor());
        log::info!("🔗 Connecting to {}", url);

        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            connected = connect_async(url.as_str()) => connected,
        };

        match connected {
            Ok((mut stream, _)) => {
                log::info!("✅ Connected to firehose");
                delay.reset();

                match consume_stream(&mut stream, ingestor, &token).await {
                    Ok(StreamEnd::Cancelled) => {
                        let _ = stream.close(None).await;
                        break;
                    }
                    Ok(StreamEnd::Closed) => log::warn!("⚠️  Firehose stream ended"),
                    Err(e) => log::error!("❌ Firehose stream error: {}", e),
                }
            }
            Err(e) => log::error!("❌ Connection failed: {}", e),
        }

        if let Err(e) = ingestor.flush_cursor() {
            log::error!("❌ Failed to persist cursor: {}", e);
        }

        if !delay.wait(&token).await {
            break;
        }
    }

    ingestor.flush_cursor()?;
    let stats = ingestor.stats();
    log::info!("🛑 Firehose consumer stopped");
    log::info!("   ├─ Frames: {}", stats.frames);
    log::info!("   ├─ Ops applied: {}", stats.ops_applied);
    log::info!("   └─ Cursor: {:?}", ingestor.resume_cursor());
    Ok(())
}
