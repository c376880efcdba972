//! Interactive child-process sessions: PTY or plain pipes.

pub mod env;
pub mod pipe;
pub mod pty;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PtyMode {
    #[default]
    Auto,
    Force,
    Disabled,
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub pty_mode: PtyMode,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitResult {
    pub code: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn session: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

/// Narrow abstraction over a running child, hiding the PTY/pipe distinction
/// from `Session` itself. Implemented by `pty::PtyChild` and `pipe::PipeChild`.
pub(crate) trait Child: Send {
    fn kill(&mut self) -> std::io::Result<()>;
    fn wait(&mut self) -> std::io::Result<Option<i32>>;
}

/// What a backend (`pty` or `pipe`) hands back to `Session::start`.
pub(crate) struct SpawnedProcess {
    pub pid: u32,
    pub writer: Box<dyn Write + Send>,
    pub reader: Box<dyn Read + Send>,
    pub resize: Option<Arc<dyn Fn(u16, u16) -> std::io::Result<()> + Send + Sync>>,
    pub child: Box<dyn Child>,
}

/// One interactive session. Cheap to share: every field is either `Arc`,
/// an atomic, or a mutex guarding a small, short-held value.
pub struct Session {
    id: String,
    pid: u32,
    writer: StdMutex<Box<dyn Write + Send>>,
    stdout_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    resize_fn: Option<Arc<dyn Fn(u16, u16) -> std::io::Result<()> + Send + Sync>>,
    exit_rx: watch::Receiver<Option<ExitResult>>,
    child: Arc<StdMutex<Box<dyn Child>>>,
    closed: AtomicBool,
}

impl Session {
    /// Spawn a new session per `cfg.pty_mode`: `Force` always uses a PTY and
    /// fails if one cannot be opened; `Disabled` always uses plain pipes;
    /// `Auto` tries a PTY first and falls back to pipes on failure.
    pub async fn start(cfg: SessionConfig) -> Result<Arc<Session>, SessionError> {
        let spawned = match cfg.pty_mode {
            PtyMode::Force => pty::spawn(&cfg).map_err(SessionError::SpawnFailed)?,
            PtyMode::Disabled => pipe::spawn(&cfg).map_err(SessionError::SpawnFailed)?,
            PtyMode::Auto => match pty::spawn(&cfg) {
                Ok(s) => s,
                Err(_) => pipe::spawn(&cfg).map_err(SessionError::SpawnFailed)?,
            },
        };

        let id = Uuid::new_v4().to_string();
        let pid = spawned.pid;

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let mut reader = spawned.reader;
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stdout_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let (exit_tx, exit_rx) = watch::channel(None);
        let child_arc: Arc<StdMutex<Box<dyn Child>>> = Arc::new(StdMutex::new(spawned.child));
        let wait_child = Arc::clone(&child_arc);
        // Exactly one task ever calls the underlying wait(); every `Session::wait`
        // caller just watches for its result, which is what makes Wait idempotent.
        tokio::task::spawn_blocking(move || {
            let code = wait_child.lock().unwrap().wait().ok().flatten();
            let _ = exit_tx.send(Some(ExitResult { code }));
        });

        Ok(Arc::new(Session {
            id,
            pid,
            writer: StdMutex::new(spawned.writer),
            stdout_rx: TokioMutex::new(Some(stdout_rx)),
            resize_fn: spawned.resize,
            exit_rx,
            child: child_arc,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn write_stdin(&self, data: &[u8]) -> std::io::Result<()> {
        let mut w = self.writer.lock().unwrap();
        w.write_all(data)?;
        w.flush()
    }

    /// Hand over the stdout/stderr channel. Returns `None` on a second call —
    /// exactly one reader (the router's forwarder task) owns it at a time.
    pub async fn take_stdout(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.stdout_rx.lock().await.take()
    }

    /// No-op when the session has no PTY (pipe mode never supports resize).
    pub fn resize(&self, cols: u16, rows: u16) -> std::io::Result<()> {
        match &self.resize_fn {
            Some(f) => f(cols, rows),
            None => Ok(()),
        }
    }

    /// Wait for process exit. Safe to call from any number of tasks
    /// concurrently or after exit already happened — every caller observes
    /// the same result.
    pub async fn wait(&self) -> ExitResult {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(r) = *rx.borrow() {
                return r;
            }
            if rx.changed().await.is_err() {
                return ExitResult { code: None };
            }
        }
    }

    /// Idempotent: a second and later call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let child = Arc::clone(&self.child);
        let _ = tokio::task::spawn_blocking(move || {
            let _ = child.lock().unwrap().kill();
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_session_echoes_and_exits_cleanly() {
        let cfg = SessionConfig {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            pty_mode: PtyMode::Disabled,
            ..Default::default()
        };
        let session = Session::start(cfg).await.unwrap();
        let mut rx = session.take_stdout().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(String::from_utf8_lossy(&collected).trim(), "hello");

        let exit = session.wait().await;
        assert_eq!(exit.code, Some(0));
    }

    #[tokio::test]
    async fn wait_is_idempotent_across_callers() {
        let cfg = SessionConfig {
            command: "true".to_string(),
            pty_mode: PtyMode::Disabled,
            ..Default::default()
        };
        let session = Session::start(cfg).await.unwrap();
        let a = session.wait().await;
        let b = session.wait().await;
        assert_eq!(a.code, b.code);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let cfg = SessionConfig {
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
            pty_mode: PtyMode::Disabled,
            ..Default::default()
        };
        let session = Session::start(cfg).await.unwrap();
        session.close().await;
        session.close().await;
        let exit = session.wait().await;
        assert_ne!(exit.code, Some(0));
    }

    #[tokio::test]
    async fn pipe_mode_resize_is_a_harmless_no_op() {
        let cfg = SessionConfig {
            command: "true".to_string(),
            pty_mode: PtyMode::Disabled,
            ..Default::default()
        };
        let session = Session::start(cfg).await.unwrap();
        assert!(session.resize(80, 24).is_ok());
    }
}
