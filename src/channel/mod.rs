//! Reconnecting command channel to the agent over loopback TCP
//!
//! One background task owns the stream: it connects to
//! `127.0.0.1:<port>`, forwards parsed command lines to the event loop and
//! writes queued results back as JSON lines. On close or error it waits a
//! fixed interval and tries again until the handle is closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::channel::{HOST, MAX_LINE_LEN};
use crate::error::{MarkerError, Result};

mod command;
pub use command::{Command, CommandResult, Outcome, PendingSelect, SearchHit, SearchResult};

/// Work delivered to the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A command line received from the agent
    Command(Command),

    /// A custom select whose delay has elapsed
    SelectDue(PendingSelect),
}

/// Handle to the background connection task
#[derive(Debug)]
pub struct CommandChannel {
    addr: String,
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl CommandChannel {
    /// Spawn the connection task on the current tokio runtime
    pub fn open(
        port: u16,
        reconnect_interval: Duration,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| MarkerError::ConnectionUnavailable(e.to_string()))?;

        let addr = format!("{HOST}:{port}");
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = handle.spawn(run(
            addr.clone(),
            reconnect_interval,
            inbound,
            outbound_rx,
            Arc::clone(&connected),
        ));
        info!(addr = %addr, "Command channel opened");

        Ok(Self {
            addr,
            outbound,
            connected,
            task,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a result for the agent. Dropped (returns false) while disconnected.
    pub fn send(&self, result: &CommandResult) -> bool {
        if !self.is_connected() {
            debug!("Dropping result, command channel disconnected");
            return false;
        }
        match result.to_line() {
            Ok(line) => self.outbound.send(line).is_ok(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize command result");
                false
            }
        }
    }

    /// Close the connection and cancel any reconnect wait
    pub fn close(self) {
        info!(addr = %self.addr, "Command channel closed");
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.task.abort();
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn run(
    addr: String,
    reconnect_interval: Duration,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                // results queued during a previous connection are stale
                while outbound_rx.try_recv().is_ok() {}
                connected.store(true, Ordering::SeqCst);
                info!(addr = %addr, "Command channel connected");

                let outcome = serve(stream, &inbound, &mut outbound_rx).await;
                connected.store(false, Ordering::SeqCst);
                match outcome {
                    Ok(()) => info!(addr = %addr, "Command channel connection closed"),
                    Err(e) => warn!(addr = %addr, error = %e, "Command channel connection error"),
                }
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Command channel connect failed");
            }
        }

        if inbound.is_closed() {
            info!("Event loop gone, command channel stopping");
            break;
        }
        debug!(
            interval_ms = reconnect_interval.as_millis() as u64,
            "Command channel reconnect scheduled"
        );
        tokio::time::sleep(reconnect_interval).await;
    }
}

/// One newline-terminated frame read from the agent
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    /// Line longer than `MAX_LINE_LEN`, discarded while streaming
    Oversized,
    /// Line that is not valid UTF-8
    Malformed,
}

/// Newline framing that never buffers more than `MAX_LINE_LEN` bytes of a
/// line. Every await is a `fill_buf`, so `next_frame` is cancel safe inside
/// `select!`: partial lines stay in `buf` between calls.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(read: R) -> Self {
        Self {
            reader: BufReader::new(read),
            buf: Vec::new(),
            discarding: false,
        }
    }

    /// `Ok(None)` at end of stream
    async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(None);
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            if !self.discarding {
                if self.buf.len() + chunk.len() > MAX_LINE_LEN {
                    self.discarding = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(chunk);
                }
            }
            let used = newline.map_or(available.len(), |i| i + 1);
            self.reader.consume(used);

            if newline.is_none() {
                continue;
            }
            if self.discarding {
                self.discarding = false;
                return Ok(Some(Frame::Oversized));
            }
            let mut bytes = std::mem::take(&mut self.buf);
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            return Ok(Some(match String::from_utf8(bytes) {
                Ok(line) => Frame::Line(line),
                Err(_) => Frame::Malformed,
            }));
        }
    }
}

async fn serve(
    stream: TcpStream,
    inbound: &mpsc::UnboundedSender<Inbound>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = LineReader::new(read);

    loop {
        tokio::select! {
            frame = lines.next_frame() => {
                let line = match frame? {
                    None => return Ok(()),
                    Some(Frame::Line(line)) => line,
                    Some(Frame::Oversized) => {
                        warn!(max = MAX_LINE_LEN, "Ignoring oversized command line");
                        continue;
                    }
                    Some(Frame::Malformed) => {
                        warn!("Ignoring command line that is not valid UTF-8");
                        continue;
                    }
                };
                match Command::parse(&line) {
                    Some(command) => {
                        debug!(command = %command, "Received command");
                        if inbound.send(Inbound::Command(command)).is_err() {
                            return Ok(());
                        }
                    }
                    None => debug!(line = %line.trim(), "Ignoring unrecognized command"),
                }
            }
            result = outbound_rx.recv() => {
                let Some(line) = result else {
                    return Ok(());
                };
                write.write_all(line.as_bytes()).await?;
                write.write_all(b"\n").await?;
                write.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn wait_connected(channel: &CommandChannel) {
        timeout(WAIT, async {
            while !channel.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_open_without_runtime_is_unavailable() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = CommandChannel::open(5050, Duration::from_millis(100), tx);
        assert!(matches!(result, Err(MarkerError::ConnectionUnavailable(_))));
    }

    #[tokio::test]
    async fn test_commands_in_results_out() {
        let (listener, port) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::open(port, Duration::from_millis(50), tx).unwrap();

        let (agent, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        wait_connected(&channel).await;
        let (read, mut write) = agent.into_split();
        write.write_all(b"bogus\nSEARCH:ghost\n").await.unwrap();

        let inbound = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(inbound, Inbound::Command(Command::Search("ghost".into())));

        assert!(channel.send(&SearchResult::miss("ghost").into()));
        let mut lines = BufReader::new(read).lines();
        let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
        assert_eq!(line, r#"{"found":false,"visible":false,"id":"ghost"}"#);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_connection() {
        let (listener, port) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::open(port, Duration::from_millis(50), tx).unwrap();

        let (mut agent, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        wait_connected(&channel).await;
        agent.write_all(b"search:\xff\xfe\nsearch:after\n").await.unwrap();

        let inbound = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(inbound, Inbound::Command(Command::Search("after".into())));
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped_without_buffering() {
        let (listener, port) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::open(port, Duration::from_millis(50), tx).unwrap();

        let (mut agent, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        wait_connected(&channel).await;
        let mut payload = b"search:".to_vec();
        payload.extend(std::iter::repeat_n(b'x', MAX_LINE_LEN * 4));
        payload.extend_from_slice(b"\r\nread:text:title\r\n");
        agent.write_all(&payload).await.unwrap();

        let inbound = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(inbound, Inbound::Command(Command::ReadText("title".into())));
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let (client, server) = tokio::io::duplex(8);
        let mut reader = LineReader::new(server);
        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(b"scrollto:a-long-label\nhide\n").await.unwrap();
        });

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Line("scrollto:a-long-label".into()))
        );
        assert_eq!(reader.next_frame().await.unwrap(), Some(Frame::Line("hide".into())));
        writer.await.unwrap();
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_results_dropped_while_disconnected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        // nothing listens on this port once the listener is dropped
        let port = listener().await.1;
        let channel = CommandChannel::open(port, Duration::from_millis(50), tx).unwrap();

        assert!(!channel.is_connected());
        assert!(!channel.send(&Outcome::ok().into()));
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_closes() {
        let (listener, port) = listener().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::open(port, Duration::from_millis(20), tx).unwrap();

        let (first, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        wait_connected(&channel).await;
        drop(first);

        let second = timeout(WAIT, listener.accept()).await.unwrap();
        assert!(second.is_ok());
        wait_connected(&channel).await;
    }

    #[tokio::test]
    async fn test_close_stops_reconnecting() {
        let (listener, port) = listener().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::open(port, Duration::from_millis(20), tx).unwrap();

        let (first, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        channel.close();
        drop(first);

        let again = timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(again.is_err(), "no reconnect after close");
    }
}
