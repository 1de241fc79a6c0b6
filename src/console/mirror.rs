//! Bidirectional copy between the data channel socket and the pty master.
//!
//! The two directions run as independent tasks and each reports completion
//! exactly once. The pty-read direction nudges well-behaved clients with a
//! close frame when the master drains, so the socket-read direction ends
//! shortly after; the orchestrator closes the master only once both have
//! reported.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::pty::PtyMaster;

const READ_BUFFER_SIZE: usize = 4096;

/// Starts both mirror directions. Returns the per-direction completion
/// signals: first the pty-master-read direction, then the socket-inbound
/// direction.
pub(crate) fn spawn(
    session: Uuid,
    socket: WebSocket,
    master: &Arc<PtyMaster>,
) -> (oneshot::Receiver<()>, oneshot::Receiver<()>) {
    let (read_done_tx, read_done) = oneshot::channel();
    let (write_done_tx, write_done) = oneshot::channel();

    let (sink, stream) = socket.split();

    match (master.reader(), master.writer()) {
        (Ok(reader), Ok(writer)) => {
            tokio::spawn(pump_master_to_socket(session, reader, sink, read_done_tx));
            tokio::spawn(pump_socket_to_master(session, stream, writer, write_done_tx));
        }
        (Err(err), _) | (_, Err(err)) => {
            debug!(%session, error = %err, "failed to dup pty master for mirroring");
            let _ = read_done_tx.send(());
            let _ = write_done_tx.send(());
        }
    }

    (read_done, write_done)
}

/// pty-master-read -> socket-outbound. Ends on master EOF or error (the
/// usual way: the last slave descriptor closed) or when the socket rejects
/// a send.
async fn pump_master_to_socket(
    session: Uuid,
    mut reader: File,
    mut sink: SplitSink<WebSocket, Message>,
    done: oneshot::Sender<()>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let blocking = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut buf = buf;
            let result = reader.read(&mut buf);
            (reader, buf, result)
        })
        .await;

        let (returned_reader, returned_buf, result) = match blocking {
            Ok(r) => r,
            Err(err) => {
                debug!(%session, error = %err, "pty read task panicked");
                break;
            }
        };
        reader = returned_reader;
        buf = returned_buf;

        match result {
            Ok(0) => {
                debug!(%session, "pty master eof");
                break;
            }
            Ok(n) => {
                let frame = Message::Binary(buf[..n].to_vec().into());
                if sink.send(frame).await.is_err() {
                    debug!(%session, "data socket send failed");
                    break;
                }
            }
            Err(err) => {
                // EIO is the normal end: the slave side is gone.
                debug!(%session, error = %err, "pty master read ended");
                break;
            }
        }
    }

    // Tell the client the terminal is gone so it closes its half too.
    let _ = sink.close().await;
    let _ = done.send(());
}

/// socket-inbound -> pty-master-write. Ends when the socket closes or
/// errors, or when the master stops accepting writes.
async fn pump_socket_to_master(
    session: Uuid,
    mut stream: SplitStream<WebSocket>,
    mut writer: File,
    done: oneshot::Sender<()>,
) {
    while let Some(message) = stream.next().await {
        let data: Vec<u8> = match message {
            Ok(Message::Binary(bytes)) => bytes.to_vec(),
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(%session, error = %err, "data socket read failed");
                break;
            }
        };

        let blocking = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            let result = writer.write_all(&data).and_then(|()| writer.flush());
            (writer, result)
        })
        .await;

        match blocking {
            Ok((returned_writer, Ok(()))) => writer = returned_writer,
            Ok((_, Err(err))) => {
                debug!(%session, error = %err, "pty master write ended");
                break;
            }
            Err(err) => {
                debug!(%session, error = %err, "pty write task panicked");
                break;
            }
        }
    }

    let _ = done.send(());
}
