#![forbid(unsafe_code)]

// WebSocket transport pump

use super::{Inbound, Wire};
use crate::channel::protocol::Packet;
use crate::error::ConnectionError;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Opens the socket and spawns its read and write loops. Both loops stop
/// when `pump` is cancelled or either side of the wire is dropped.
pub(super) async fn open(url: &Url, pump: CancellationToken) -> Result<Wire, ConnectionError> {
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| ConnectionError::Handshake(format!("websocket connect failed: {e}")))?;

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Packet>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

    let read_cancel = pump.clone();
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = read_cancel.cancelled() => break,
                msg = read.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str()) {
                    Ok(packet) => {
                        if in_tx.send(Ok(packet)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping undecodable packet: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = in_tx.send(Err("transport close".to_string()));
                    break;
                }
                // tungstenite answers websocket-level pings itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = in_tx.send(Err(format!("transport error: {e}")));
                    break;
                }
            }
        }
        debug!("WebSocket read loop ended");
    });

    let write_cancel = pump.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                packet = out_rx.recv() => match packet {
                    Some(packet) => {
                        if let Err(e) = write.send(Message::Text(packet.encode().into())).await {
                            debug!("WebSocket write failed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = write_cancel.cancelled() => break,
            }
        }
        let _ = write.send(Message::Close(None)).await;
        debug!("WebSocket write loop ended");
    });

    Ok(Wire {
        outgoing: out_tx,
        incoming: in_rx,
        pump,
    })
}
