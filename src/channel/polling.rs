#![forbid(unsafe_code)]

// HTTP long-polling transport pump

use super::{Inbound, Wire};
use crate::channel::protocol::{decode_payload, encode_payload, Packet};
use crate::error::ConnectionError;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Performs the opening GET (bounded by `open_timeout`), then spawns the
/// poll and flush loops bound to the Engine.IO session id. Every later
/// request is bounded by the server's heartbeat. The open packet is
/// re-delivered on the wire so the channel handshake is identical for every
/// transport.
pub(super) async fn open(
    client: &reqwest::Client,
    url: Url,
    open_timeout: Duration,
    pump: CancellationToken,
) -> Result<Wire, ConnectionError> {
    let body = fetch(client, &url, open_timeout)
        .await
        .map_err(ConnectionError::Handshake)?;
    let packets = decode_payload(&body).map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    let (sid, heartbeat) = match packets.first() {
        Some(Packet::Open(handshake)) => (handshake.sid.clone(), handshake.heartbeat()),
        _ => {
            return Err(ConnectionError::Handshake(
                "polling response did not open a session".to_string(),
            ))
        }
    };

    let mut session_url = url;
    session_url.query_pairs_mut().append_pair("sid", &sid);

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Packet>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();
    for packet in packets {
        let _ = in_tx.send(Ok(packet));
    }

    tokio::spawn(poll_loop(
        client.clone(),
        session_url.clone(),
        heartbeat,
        in_tx,
        pump.clone(),
    ));
    tokio::spawn(flush_loop(
        client.clone(),
        session_url,
        heartbeat,
        out_rx,
        pump.clone(),
    ));

    Ok(Wire {
        outgoing: out_tx,
        incoming: in_rx,
        pump,
    })
}

async fn fetch(client: &reqwest::Client, url: &Url, limit: Duration) -> Result<String, String> {
    let describe = |e: reqwest::Error| {
        if e.is_timeout() {
            format!("xhr poll error: timed out after {}ms", limit.as_millis())
        } else {
            format!("xhr poll error: {e}")
        }
    };
    let resp = client
        .get(url.clone())
        .timeout(limit)
        .send()
        .await
        .map_err(describe)?;
    if !resp.status().is_success() {
        return Err(format!("xhr poll error: status {}", resp.status()));
    }
    resp.text().await.map_err(describe)
}

async fn poll_loop(
    client: reqwest::Client,
    url: Url,
    heartbeat: Duration,
    in_tx: mpsc::UnboundedSender<Inbound>,
    pump: CancellationToken,
) {
    loop {
        let body = tokio::select! {
            _ = pump.cancelled() => break,
            body = fetch(&client, &url, heartbeat) => body,
        };
        let packets = match body.map(|b| decode_payload(&b)) {
            Ok(Ok(packets)) => packets,
            Ok(Err(e)) => {
                let _ = in_tx.send(Err(format!("parse error: {e}")));
                break;
            }
            Err(reason) => {
                let _ = in_tx.send(Err(reason));
                break;
            }
        };
        for packet in packets {
            if in_tx.send(Ok(packet)).is_err() {
                return;
            }
        }
    }
    debug!("Polling read loop ended");
}

/// Batches whatever is queued into one POST per round trip.
async fn flush_loop(
    client: reqwest::Client,
    url: Url,
    heartbeat: Duration,
    mut out_rx: mpsc::UnboundedReceiver<Packet>,
    pump: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            packet = out_rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
            _ = pump.cancelled() => break,
        };
        let mut batch = vec![first];
        while let Ok(packet) = out_rx.try_recv() {
            batch.push(packet);
        }

        let result = client
            .post(url.clone())
            .header("content-type", "text/plain; charset=UTF-8")
            .timeout(heartbeat)
            .body(encode_payload(&batch))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                debug!("Polling write rejected: {}", resp.status());
                break;
            }
            Err(e) => {
                debug!("Polling write failed: {}", e);
                break;
            }
        }
    }
    debug!("Polling write loop ended");
}
