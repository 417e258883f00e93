//! Piped-process transport.
//!
//! The server is spawned as a child process. Requests are written to its
//! stdin one JSON object per line; its stdout is an unframed stream that
//! goes through a [`JsonFramer`]. Stderr is captured for diagnostics and
//! never parsed as protocol data. There is no handshake: the transport is
//! connected as soon as the process is spawned.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::{ConnectOptions, Inbound, InboundSender, Transport, TransportKind};
use crate::error::{Result, WireError};
use crate::framer::JsonFramer;

/// Argument appended to the command line when not already present.
pub const DEFAULT_INVOCATION_FLAG: &str = "--stdio";

/// Environment variable that carries the credential into the subprocess.
pub const DEFAULT_CREDENTIAL_ENV: &str = "TOOL_SERVER_API_KEY";

const READ_CHUNK: usize = 8 * 1024;

/// Split a command line on whitespace into program and arguments,
/// appending `invocation_flag` unless it is empty or already present.
pub fn split_command(command: &str, invocation_flag: &str) -> Result<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| WireError::spawn_failed("empty command"))?;
    let mut args: Vec<String> = parts.collect();

    if !invocation_flag.is_empty() && !args.iter().any(|arg| arg == invocation_flag) {
        args.push(invocation_flag.to_string());
    }

    Ok((program, args))
}

/// A tool server running as a child process.
pub struct ProcessTransport {
    program: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    exited: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessTransport {
    /// OS process id of the server, if it was available at spawn.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program name that was spawned.
    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Spawn the server described by `options` and start its reader tasks.
pub fn spawn(options: &ConnectOptions, inbound: InboundSender) -> Result<ProcessTransport> {
    let (program, args) = split_command(&options.endpoint, &options.invocation_flag)?;

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(credential) = &options.credential {
        cmd.env(&options.credential_env, credential);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| WireError::spawn_failed(format!("failed to spawn '{}': {}", program, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| WireError::spawn_failed("failed to capture stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WireError::spawn_failed("failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| WireError::spawn_failed("failed to capture stderr"))?;

    let pid = child.id();
    tracing::info!(program = %program, args = ?args, pid = ?pid, "spawned tool server");

    let exited = Arc::new(AtomicBool::new(false));
    let tasks = vec![
        tokio::spawn(read_stdout(stdout, Arc::clone(&exited), inbound.clone())),
        tokio::spawn(read_stderr(stderr, inbound)),
    ];

    Ok(ProcessTransport {
        program,
        pid,
        child: Mutex::new(Some(child)),
        stdin: tokio::sync::Mutex::new(Some(stdin)),
        exited,
        tasks,
    })
}

async fn read_stdout(mut stdout: ChildStdout, exited: Arc<AtomicBool>, inbound: InboundSender) {
    let mut framer = JsonFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    let reason = loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break "tool server closed its output".to_string(),
            Ok(n) => {
                framer.feed(&buf[..n]);
                for frame in framer.frames() {
                    let item = match frame {
                        Ok(frame) => {
                            tracing::trace!(json = %frame, "received process frame");
                            Inbound::Frame(frame)
                        }
                        Err(e) => Inbound::Malformed(e.to_string()),
                    };
                    if inbound.send(item).is_err() {
                        return;
                    }
                }
            }
            Err(e) => break format!("failed to read tool server output: {}", e),
        }
    };

    if framer.is_mid_frame() {
        tracing::warn!(
            bytes = framer.buffered(),
            "discarding incomplete message at end of output"
        );
    }
    exited.store(true, Ordering::SeqCst);
    tracing::info!(reason = %reason, "tool server stopped");
    let _ = inbound.send(Inbound::Closed {
        reason: Some(reason),
    });
}

async fn read_stderr(stderr: ChildStderr, inbound: InboundSender) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(line = %line, "tool server stderr");
        if inbound.send(Inbound::Diagnostic(line)).is_err() {
            break;
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn send(&self, text: String) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(WireError::NotConnected)?;

        tracing::trace!(json = %text, "sending process message");
        let write = async {
            pipe.write_all(text.as_bytes()).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await
        };
        write
            .await
            .map_err(|e| WireError::process(format!("failed to write to tool server: {}", e)))
    }

    fn is_open(&self) -> bool {
        if self.exited.load(Ordering::SeqCst) {
            return false;
        }
        match self.child.lock().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn close(&self) {
        self.exited.store(true, Ordering::SeqCst);
        drop(self.stdin.lock().await.take());

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "tool server already exited");
            }
            tracing::info!(program = %self.program, pid = ?self.pid, "tool server stopped by client");
        }

        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
