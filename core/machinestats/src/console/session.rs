use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{ConsoleError, Matcher};

const PASSWORD_PROMPT: &str = "Enter password:";
const COMMAND_PROMPT: &str = "> ";

type WaitResult = Result<String, ConsoleError>;

/// A TCP session with a remote console.
///
/// The socket is closed when the session is dropped, which also stops the
/// reader task of a [`wait_until`](Self::wait_until) that is still pending.
pub struct ConsoleSession {
    reader: LineReader,
    writer: BufWriter<OwnedWriteHalf>,
    _teardown: DropGuard,
}

/// Read side of a session, shared with the reader tasks.
struct LineReader {
    stream: Arc<tokio::sync::Mutex<BufReader<OwnedReadHalf>>>,
    cancel: CancellationToken,
}

/// Outcome of a race that can be resolved only once.
///
/// The first call to [`resolve`](Self::resolve) wins, the others are no-ops.
struct Completion<T> {
    settled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Completion<T> {
    fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            settled: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
        };
        (Arc::new(completion), rx)
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Resolves the race with `value`. Returns `false` if it was already resolved.
    fn resolve(&self, value: T) -> bool {
        let mut sender = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = sender.take() else {
            return false;
        };
        self.settled.store(true, Ordering::Release);
        drop(sender);
        // The receiver may be gone if the waiting future has been dropped.
        let _ = tx.send(value);
        true
    }
}

impl ConsoleSession {
    /// Opens a TCP session with the console.
    ///
    /// `timeout` bounds the time spent establishing the connection.
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self, ConsoleError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConsoleError::Connect(io::Error::new(io::ErrorKind::TimedOut, "connection timed out")))?
            .map_err(ConsoleError::Connect)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();
        Self {
            reader: LineReader {
                stream: Arc::new(tokio::sync::Mutex::new(BufReader::new(read_half))),
                cancel: cancel.clone(),
            },
            writer: BufWriter::new(write_half),
            _teardown: cancel.drop_guard(),
        }
    }

    /// Waits until the current line satisfies `matcher`, and returns that line.
    ///
    /// Two tasks race: a reader that consumes the stream one byte at a time and
    /// tests the line after each byte, and a timer that fires after `timeout`.
    /// The first one to finish decides the result: the line, [`ConsoleError::TimedOut`],
    /// [`ConsoleError::StreamClosed`] or [`ConsoleError::Io`].
    /// Once the race is decided, the reader stops consuming the stream.
    ///
    /// Lines that do not match are discarded, the bytes that follow a match are
    /// kept for the next call.
    pub async fn wait_until(&self, matcher: &Matcher, timeout: Duration) -> WaitResult {
        self.reader.wait_until(matcher, timeout).await
    }

    /// Answers the password prompt and waits for the command prompt.
    ///
    /// The command prompt is awaited while the password is being written, so
    /// that a prompt sent right after the password is received is not missed.
    pub async fn login(&mut self, password: &str, timeout: Duration) -> Result<(), ConsoleError> {
        self.reader
            .wait_until(&Matcher::literal(PASSWORD_PROMPT), timeout)
            .await?;
        log::debug!("received password prompt");

        let command_prompt = Matcher::literal(COMMAND_PROMPT);
        tokio::try_join!(
            self.reader.wait_until(&command_prompt, timeout),
            send_line(&mut self.writer, password),
        )?;
        log::debug!("received command prompt");
        Ok(())
    }

    /// Sends a command and waits for a line of its answer that satisfies `matcher`.
    pub async fn command(&mut self, command: &str, matcher: &Matcher, timeout: Duration) -> WaitResult {
        let (line, ()) = tokio::try_join!(
            self.reader.wait_until(matcher, timeout),
            send_line(&mut self.writer, command),
        )?;
        Ok(line)
    }
}

/// Writes `line` followed by CRLF, and flushes.
async fn send_line(writer: &mut BufWriter<OwnedWriteHalf>, line: &str) -> Result<(), ConsoleError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    log::debug!("wrote line ({} bytes)", line.len() + 2);
    Ok(())
}

impl LineReader {
    async fn wait_until(&self, matcher: &Matcher, timeout: Duration) -> WaitResult {
        let (completion, result) = Completion::new();

        // Stops the reader when we return, or when this future is dropped.
        // It has already stopped if it won the race.
        let reader_cancel = self.cancel.child_token();
        let _stop_reader = reader_cancel.clone().drop_guard();

        tokio::spawn(read_until(
            self.stream.clone(),
            matcher.clone(),
            completion.clone(),
            reader_cancel,
        ));
        let timer = tokio::spawn({
            let completion = completion.clone();
            async move {
                tokio::time::sleep(timeout).await;
                if completion.resolve(Err(ConsoleError::TimedOut(timeout))) {
                    log::debug!("timed out after {timeout:?}");
                }
            }
        });

        let outcome = result.await;
        timer.abort();
        match outcome {
            Ok(res) => res,
            // Both tasks have been dropped without resolving, which only happens if the runtime shuts down.
            Err(_) => Err(ConsoleError::Io(io::Error::other("console wait aborted"))),
        }
    }
}

async fn read_until(
    stream: Arc<tokio::sync::Mutex<BufReader<OwnedReadHalf>>>,
    matcher: Matcher,
    completion: Arc<Completion<WaitResult>>,
    cancel: CancellationToken,
) {
    let mut stream = tokio::select! {
        guard = stream.lock_owned() => guard,
        _ = cancel.cancelled() => return,
    };

    let mut line = Vec::new();
    loop {
        let res = tokio::select! {
            res = stream.read_u8() => res,
            _ = cancel.cancelled() => return,
        };
        if completion.is_settled() {
            // the timer won, this byte is discarded
            return;
        }
        let byte = match res {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                completion.resolve(Err(ConsoleError::StreamClosed));
                return;
            }
            Err(e) => {
                completion.resolve(Err(ConsoleError::Io(e)));
                return;
            }
        };
        line.push(byte);
        if matcher.matches(&line, byte) {
            completion.resolve(Ok(String::from_utf8_lossy(&line).into_owned()));
            return;
        }
        if byte == b'\n' {
            log::debug!("console line: {}", String::from_utf8_lossy(&line).trim_end());
            line.clear();
        }
    }
}
