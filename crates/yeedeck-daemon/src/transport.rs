//! Full-duplex websocket link to the host application.
//!
//! Once started, the transport runs three tasks:
//! - reader: decodes text frames into [`InboundEvent`]s for the dispatcher
//! - writer: drains the [`HostSender`] queue onto the socket
//! - dispatcher: spawns one task per inbound event
//!
//! The reader and writer share a root cancellation token. Whichever stops
//! first cancels it, which stops the other one. There is no reconnect.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use yeedeck_types::{InboundEvent, Registration};

use crate::error::{DaemonError, Result};
use crate::handlers::Dispatcher;
use crate::host::{self, HostReceiver, HostSender};

type HostStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connected and registered host link that has not started yet
pub struct Transport {
    stream: HostStream,
    host: HostSender,
    outbound: HostReceiver,
    cancel: CancellationToken,
}

impl Transport {
    /// Open the websocket at `url` and register with the host.
    ///
    /// The registration is the first frame on the socket.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Connection` if the socket cannot be opened or
    /// the registration cannot be written.
    pub async fn connect(url: &str, registration: &Registration) -> Result<Self> {
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|e| DaemonError::Connection(format!("cannot connect to {url}: {e}")))?;

        let frame = serde_json::to_string(registration)?;
        stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| DaemonError::Connection(format!("cannot register: {e}")))?;
        info!("Registered with host at {url} as {}", registration.uuid);

        let (host, outbound) = host::channel();
        Ok(Self {
            stream,
            host,
            outbound,
            cancel: CancellationToken::new(),
        })
    }

    /// Outbound handle; events queue until [`Transport::start`] runs the writer.
    #[must_use]
    pub fn host(&self) -> HostSender {
        self.host.clone()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the reader, writer and dispatcher tasks.
    #[must_use]
    pub fn start(self, dispatcher: Dispatcher) -> RunningTransport {
        let (sink, stream) = self.stream.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(1);

        let reader = tokio::spawn(read_events(stream, inbound_tx, self.cancel.clone()));
        let writer = tokio::spawn(write_events(sink, self.outbound, self.cancel.clone()));
        let dispatcher = tokio::spawn(dispatch_events(inbound_rx, Arc::new(dispatcher)));

        RunningTransport {
            cancel: self.cancel,
            reader,
            writer,
            dispatcher,
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Handle to a started transport
#[derive(Debug)]
pub struct RunningTransport {
    cancel: CancellationToken,
    reader: JoinHandle<Result<()>>,
    writer: JoinHandle<Result<()>>,
    dispatcher: JoinHandle<()>,
}

impl RunningTransport {
    /// Ask the reader and writer to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every transport task to finish.
    ///
    /// # Errors
    ///
    /// Returns the reader's or writer's fatal error, if either had one.
    pub async fn wait(self) -> Result<()> {
        let (reader, writer, dispatcher) = tokio::join!(self.reader, self.writer, self.dispatcher);

        let mut first = None;
        for (task, result) in [("reader", reader), ("writer", writer)] {
            let err = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => DaemonError::Io(std::io::Error::other(e)),
            };
            error!("Transport {task} failed: {err}");
            first.get_or_insert(err);
        }
        if let Err(e) = dispatcher {
            first.get_or_insert(DaemonError::Io(std::io::Error::other(e)));
        }

        first.map_or(Ok(()), Err)
    }
}

fn decode(text: &str) -> Result<InboundEvent> {
    serde_json::from_str(text).map_err(DaemonError::ProtocolDecode)
}

async fn read_events(
    mut stream: SplitStream<HostStream>,
    inbound: mpsc::Sender<InboundEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();

    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let event = match decode(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Dropping inbound message: {e}");
                        continue;
                    }
                };
                trace!("<- {} on {}", event.event, event.context);

                let delivered = tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = inbound.send(event) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("Host closed the connection: {frame:?}");
                break;
            }
            Some(Ok(_)) => trace!("Ignoring non-text frame"),
            None | Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                debug!("Host connection ended");
                break;
            }
            Some(Err(e)) => {
                return Err(DaemonError::Connection(format!("read failed: {e}")));
            }
        }
    }
    Ok(())
}

async fn write_events(
    mut sink: SplitSink<HostStream, Message>,
    mut outbound: HostReceiver,
    cancel: CancellationToken,
) -> Result<()> {
    let _guard = cancel.clone().drop_guard();

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = outbound.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        trace!("-> {} {:?}", event.event, event.context);
        let frame = serde_json::to_string(&event)?;
        sink.send(Message::Text(frame))
            .await
            .map_err(|e| DaemonError::Connection(format!("write failed: {e}")))?;
    }

    // The host may already be gone
    let _ = sink.close().await;
    Ok(())
}

async fn dispatch_events(mut inbound: mpsc::Receiver<InboundEvent>, dispatcher: Arc<Dispatcher>) {
    while let Some(event) = inbound.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher.dispatch(&event).await;
        });
    }
    debug!("Inbound queue closed");
}
