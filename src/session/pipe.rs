//! Plain-pipe session spawning, used when a PTY is unavailable or disabled.
//! No resize support: `SpawnedProcess::resize` is `None`.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc as std_mpsc;
use std::thread;

use super::env::merge_env;
use super::{Child as ChildTrait, SessionConfig, SpawnedProcess};

struct PipeChild(std::process::Child);

impl ChildTrait for PipeChild {
    fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill()
    }

    fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.0.wait()?.code())
    }
}

/// Reads whichever of stdout/stderr produces a chunk next. Both background
/// threads feed the same channel; the reader ends at EOF on both.
struct MergedReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for MergedReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub(super) fn spawn(cfg: &SessionConfig) -> std::io::Result<SpawnedProcess> {
    let mut command = Command::new(&cfg.command);
    command.args(&cfg.args);
    if let Some(dir) = &cfg.cwd {
        command.current_dir(dir);
    }
    for (k, v) in merge_env(&cfg.env) {
        command.env(k, v);
    }
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let pid = child.id();

    let stdin = child.stdin.take().expect("piped stdin");
    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let (tx, rx) = std_mpsc::channel::<Vec<u8>>();
    let out_tx = tx.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if out_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(SpawnedProcess {
        pid,
        writer: Box::new(stdin),
        reader: Box::new(MergedReader {
            rx,
            buf: Vec::new(),
            pos: 0,
        }),
        resize: None,
        child: Box::new(PipeChild(child)),
    })
}
