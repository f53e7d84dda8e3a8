// WebSocket server for draft clients.

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outbound frames buffered per connection before the reader stalls.
const OUTBOUND_BUFFER: usize = 64;

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug)]
pub enum WsEvent {
    /// A client has connected.
    Connected { addr: String },
    /// A client has disconnected.
    Disconnected { addr: String },
    /// A text frame arrived. The app answers through `reply`.
    Request {
        addr: String,
        text: String,
        reply: oneshot::Sender<String>,
    },
}

/// Run the WebSocket server on the given port, forwarding events through `tx`.
///
/// Binds `127.0.0.1:{port}` and serves every connection on its own task, so
/// any number of clients can be connected at once. Runs until the task is
/// cancelled or the application side drops its receiver.
pub async fn run(port: u16, tx: mpsc::Sender<WsEvent>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        if tx.is_closed() {
            break;
        }
        let addr_str = addr.to_string();
        info!("Accepted TCP connection from {addr_str}");
        tokio::spawn(serve_connection(stream, addr_str, tx.clone()));
    }

    Ok(())
}

async fn serve_connection(stream: TcpStream, addr: String, tx: mpsc::Sender<WsEvent>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    if tx
        .send(WsEvent::Connected { addr: addr.clone() })
        .await
        .is_err()
    {
        return;
    }

    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer_addr = addr.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write.send(Message::Text(frame.into())).await {
                warn!("Failed to write to {writer_addr}: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let _ = process_message_stream(read, &tx, &out_tx, &addr).await;

    drop(out_tx);
    let _ = writer.await;
    let _ = tx.send(WsEvent::Disconnected { addr: addr.clone() }).await;
    info!("Connection from {addr} closed");
}

/// Process raw WebSocket [`Message`] items from any [`Stream`]. Each text
/// payload is handed to the app as a [`WsEvent::Request`]; the reply is
/// queued on `out` before the next frame is read, so replies keep request
/// order. Returns `Err(())` if the app side has gone away.
///
/// This is a pure-logic function that requires no I/O and is the primary
/// unit-test target.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    out: &mpsc::Sender<String>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let event = WsEvent::Request {
                    addr: addr.to_string(),
                    text: text.to_string(),
                    reply: reply_tx,
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
                match reply_rx.await {
                    Ok(reply) => {
                        if out.send(reply).await.is_err() {
                            debug!("Writer for {addr} is gone; dropping reply");
                            break;
                        }
                    }
                    Err(_) => return Err(()),
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Helper: create a stream of Message results from a vec.
    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    /// Helper: answer every request with `echo:<text>` and return what was seen.
    fn spawn_echo_app(mut rx: mpsc::Receiver<WsEvent>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                if let WsEvent::Request { text, reply, .. } = event {
                    let _ = reply.send(format!("echo:{text}"));
                    seen.push(text);
                }
            }
            seen
        })
    }

    fn drain(out_rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut replies = Vec::new();
        while let Ok(r) = out_rx.try_recv() {
            replies.push(r);
        }
        replies
    }

    #[tokio::test]
    async fn text_message_is_answered() {
        let (tx, rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let app = spawn_echo_app(rx);

        let messages = vec![Ok(Message::Text("hello".into()))];
        process_message_stream(mock_stream(messages), &tx, &out_tx, "test")
            .await
            .unwrap();
        drop(tx);

        assert_eq!(app.await.unwrap(), vec!["hello".to_string()]);
        assert_eq!(drain(&mut out_rx), vec!["echo:hello".to_string()]);
    }

    #[tokio::test]
    async fn replies_keep_request_order() {
        let (tx, rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let app = spawn_echo_app(rx);

        let messages = vec![
            Ok(Message::Text("first".into())),
            Ok(Message::Text("second".into())),
            Ok(Message::Text("third".into())),
        ];
        process_message_stream(mock_stream(messages), &tx, &out_tx, "test")
            .await
            .unwrap();
        drop(tx);
        app.await.unwrap();

        assert_eq!(
            drain(&mut out_rx),
            vec!["echo:first", "echo:second", "echo:third"]
        );
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let app = spawn_echo_app(rx);

        let messages = vec![
            Ok(Message::Text("before_close".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after_close_should_not_appear".into())),
        ];
        process_message_stream(mock_stream(messages), &tx, &out_tx, "test")
            .await
            .unwrap();
        drop(tx);

        assert_eq!(app.await.unwrap(), vec!["before_close".to_string()]);
        assert_eq!(drain(&mut out_rx), vec!["echo:before_close"]);
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let (tx, rx) = mpsc::channel(64);
        let (out_tx, _out_rx) = mpsc::channel(64);
        let app = spawn_echo_app(rx);

        let messages = vec![
            Ok(Message::Text("before_error".into())),
            Err(WsError::ConnectionClosed),
            Ok(Message::Text("after_error_should_not_appear".into())),
        ];
        process_message_stream(mock_stream(messages), &tx, &out_tx, "test")
            .await
            .unwrap();
        drop(tx);

        assert_eq!(app.await.unwrap(), vec!["before_error".to_string()]);
    }

    #[tokio::test]
    async fn binary_and_ping_messages_are_ignored() {
        let (tx, rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let app = spawn_echo_app(rx);

        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
            Ok(Message::Text("after_ignored".into())),
        ];
        process_message_stream(mock_stream(messages), &tx, &out_tx, "test")
            .await
            .unwrap();
        drop(tx);

        assert_eq!(app.await.unwrap(), vec!["after_ignored".to_string()]);
        assert_eq!(drain(&mut out_rx), vec!["echo:after_ignored"]);
    }

    #[tokio::test]
    async fn returns_err_when_app_is_gone() {
        let (tx, rx) = mpsc::channel(64);
        let (out_tx, _out_rx) = mpsc::channel(64);
        drop(rx);

        let messages = vec![Ok(Message::Text("orphan".into()))];
        let result = process_message_stream(mock_stream(messages), &tx, &out_tx, "test").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn returns_err_when_reply_is_dropped() {
        let (tx, mut rx) = mpsc::channel(64);
        let (out_tx, _out_rx) = mpsc::channel(64);
        let app = tokio::spawn(async move {
            // Take the request but never answer it.
            let _ = rx.recv().await;
        });

        let messages = vec![Ok(Message::Text("unanswered".into()))];
        let result = process_message_stream(mock_stream(messages), &tx, &out_tx, "test").await;
        assert!(result.is_err());
        app.await.unwrap();
    }

    #[tokio::test]
    async fn empty_stream_completes_normally() {
        let (tx, mut rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let messages: Vec<Result<Message, WsError>> = vec![];

        process_message_stream(mock_stream(messages), &tx, &out_tx, "test")
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert!(out_rx.try_recv().is_err());
    }
}
