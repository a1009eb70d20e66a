//! In-memory scp receiver for tests.
//!
//! [`MockShell`] implements [`RemoteShell`]: every `exec` spawns a task that
//! speaks the sink side of the protocol over a `tokio::io::duplex` pipe and
//! records what it received. Individual acknowledgments can be scripted to
//! fail.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::transport::{ExecChannel, RemoteShell};

const PIPE_CAPACITY: usize = 16 * 1024;

/// What the receiver answers for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Warning(String),
    Fatal(String),
    /// a byte that is not a valid status
    Garbage(u8),
    /// close the connection without answering
    Hangup,
}

/// Something the receiver accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Enter { mode: u32, mtime: u64, name: String },
    Leave,
    File { mode: u32, name: String, data: Vec<u8> },
}

#[derive(Debug, Clone, Default)]
pub struct ReceivedSession {
    pub command: String,
    pub events: Vec<Event>,
    /// times `close` was called on the channel
    pub closes: usize,
    /// header lines as they arrived on the wire
    pub headers: Vec<String>,
}

impl ReceivedSession {
    /// Full slash-separated paths and contents of all received files.
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        let mut stack: Vec<&str> = Vec::new();
        let mut files = Vec::new();
        for event in &self.events {
            match event {
                Event::Enter { name, .. } => stack.push(name),
                Event::Leave => {
                    stack.pop();
                }
                Event::File { name, data, .. } => {
                    let mut path = stack.clone();
                    path.push(name);
                    files.push((path.join("/"), data.clone()));
                }
            }
        }
        files
    }

    /// Depth the receiver ended at; 0 for a balanced session.
    pub fn depth(&self) -> i64 {
        self.events.iter().fold(0, |depth, event| match event {
            Event::Enter { .. } => depth + 1,
            Event::Leave => depth - 1,
            Event::File { .. } => depth,
        })
    }
}

type ExecHook = Arc<dyn Fn(usize, &str) + Send + Sync>;

#[derive(Default)]
struct State {
    sessions: Vec<ReceivedSession>,
    // (session index, unit index, reply); unit 0 is the handshake
    script: Vec<(usize, usize, Reply)>,
    refuse_exec: Vec<usize>,
    on_exec: Option<ExecHook>,
}

#[derive(Clone, Default)]
pub struct MockShell {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockShell {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MockShell").finish_non_exhaustive()
    }
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers unit `unit` of session `session` with `reply` instead of `0x00`.
    ///
    /// Units are counted per session: 0 is the handshake, then one per header
    /// and one per file payload.
    pub fn reply_at(self, session: usize, unit: usize, reply: Reply) -> Self {
        self.state
            .lock()
            .unwrap()
            .script
            .push((session, unit, reply));
        self
    }

    /// Makes the `session`-th `exec` call fail with a connection error.
    pub fn refuse_exec(self, session: usize) -> Self {
        self.state.lock().unwrap().refuse_exec.push(session);
        self
    }

    /// Called with the session index and command on every `exec`.
    pub fn on_exec(self, hook: impl Fn(usize, &str) + Send + Sync + 'static) -> Self {
        self.state.lock().unwrap().on_exec = Some(Arc::new(hook));
        self
    }

    pub fn sessions(&self) -> Vec<ReceivedSession> {
        self.state.lock().unwrap().sessions.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sessions().into_iter().map(|s| s.command).collect()
    }

    fn record(&self, session: usize, update: impl FnOnce(&mut ReceivedSession)) {
        let mut state = self.state.lock().unwrap();
        update(&mut state.sessions[session]);
    }
}

pub struct MockChannel {
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    reader: tokio::io::ReadHalf<tokio::io::DuplexStream>,
    receiver: tokio::task::JoinHandle<()>,
    shell: MockShell,
    session: usize,
}

impl RemoteShell for MockShell {
    type Channel = MockChannel;

    async fn exec(&self, command: &str) -> Result<MockChannel> {
        let (session, script, refused, hook) = {
            let mut state = self.state.lock().unwrap();
            let session = state.sessions.len();
            state.sessions.push(ReceivedSession {
                command: command.to_string(),
                ..Default::default()
            });
            let script: Vec<(usize, Reply)> = state
                .script
                .iter()
                .filter(|(s, _, _)| *s == session)
                .map(|(_, unit, reply)| (*unit, reply.clone()))
                .collect();
            (
                session,
                script,
                state.refuse_exec.contains(&session),
                state.on_exec.clone(),
            )
        };
        if let Some(hook) = hook {
            hook(session, command);
        }
        if refused {
            return Err(Error::connection(anyhow::anyhow!(
                "exec channel for {command:?} refused"
            )));
        }
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(client);
        let receiver = tokio::spawn(receive(server, script, self.clone(), session));
        Ok(MockChannel {
            writer,
            reader,
            receiver,
            shell: self.clone(),
            session,
        })
    }
}

impl ExecChannel for MockChannel {
    type Writer = tokio::io::WriteHalf<tokio::io::DuplexStream>;
    type Reader = tokio::io::ReadHalf<tokio::io::DuplexStream>;

    fn streams(&mut self) -> (&mut Self::Writer, &mut Self::Reader) {
        (&mut self.writer, &mut self.reader)
    }

    async fn close(mut self) -> Result<()> {
        let _ = self.writer.shutdown().await;
        drop(self.writer);
        drop(self.reader);
        self.shell.record(self.session, |s| s.closes += 1);
        self.receiver
            .await
            .map_err(|error| Error::connection(anyhow::Error::new(error)))
    }
}

struct Responder {
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    script: Vec<(usize, Reply)>,
    unit: usize,
}

impl Responder {
    /// Answers the next unit; false when the receiver should stop.
    async fn answer(&mut self) -> bool {
        let unit = self.unit;
        self.unit += 1;
        let reply = self
            .script
            .iter()
            .find(|(u, _)| *u == unit)
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Reply::Ok);
        let (bytes, keep_going) = match reply {
            Reply::Ok => (vec![0u8], true),
            Reply::Warning(message) => ([&[1u8][..], message.as_bytes(), b"\n"].concat(), true),
            Reply::Fatal(message) => ([&[2u8][..], message.as_bytes(), b"\n"].concat(), false),
            Reply::Garbage(byte) => (vec![byte], false),
            Reply::Hangup => return false,
        };
        self.writer.write_all(&bytes).await.is_ok()
            && self.writer.flush().await.is_ok()
            && keep_going
    }
}

/// Sink side of the protocol, answering from `script` where scripted.
async fn receive(
    server: tokio::io::DuplexStream,
    script: Vec<(usize, Reply)>,
    shell: MockShell,
    session: usize,
) {
    let (reader, writer) = tokio::io::split(server);
    let mut reader = tokio::io::BufReader::new(reader);
    let mut responder = Responder {
        writer,
        script,
        unit: 0,
    };
    if !responder.answer().await {
        return;
    }
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&line).trim_end_matches('\n').to_string();
        shell.record(session, |s| s.headers.push(line.clone()));
        let Some(kind) = line.chars().next() else {
            return;
        };
        match kind {
            'D' | 'C' => {
                let mut fields = line[1..].splitn(3, ' ');
                let (Some(mode), Some(number), Some(name)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    return;
                };
                let (Ok(mode), Ok(number)) = (u32::from_str_radix(mode, 8), number.parse::<u64>())
                else {
                    return;
                };
                if !responder.answer().await {
                    return;
                }
                if kind == 'D' {
                    shell.record(session, |s| {
                        s.events.push(Event::Enter {
                            mode,
                            mtime: number,
                            name: name.to_string(),
                        })
                    });
                    continue;
                }
                let mut data = vec![0u8; number as usize];
                let mut status = [0u8; 1];
                if reader.read_exact(&mut data).await.is_err()
                    || reader.read_exact(&mut status).await.is_err()
                    || status[0] != 0
                    || !responder.answer().await
                {
                    return;
                }
                shell.record(session, |s| {
                    s.events.push(Event::File {
                        mode,
                        name: name.to_string(),
                        data,
                    })
                });
            }
            'E' => {
                if !responder.answer().await {
                    return;
                }
                shell.record(session, |s| s.events.push(Event::Leave));
            }
            _ => return,
        }
    }
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MockChannel")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
