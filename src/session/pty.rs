//! PTY-backed session spawning via `portable-pty`.

use std::sync::Arc;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use super::env::merge_env;
use super::{Child as ChildTrait, SessionConfig, SpawnedProcess};

struct PtyChild(Box<dyn portable_pty::Child + Send>);

impl ChildTrait for PtyChild {
    fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill().map_err(to_io_err)
    }

    fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.0.wait().map_err(to_io_err)?;
        Ok(Some(status.exit_code() as i32))
    }
}

fn to_io_err(e: anyhow::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

pub(super) fn spawn(cfg: &SessionConfig) -> std::io::Result<SpawnedProcess> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: cfg.rows.max(1),
            cols: cfg.cols.max(1),
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(to_io_err)?;

    let mut cmd = CommandBuilder::new(&cfg.command);
    cmd.args(&cfg.args);
    if let Some(dir) = &cfg.cwd {
        cmd.cwd(dir);
    }
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    for (k, v) in merge_env(&cfg.env) {
        cmd.env(k, v);
    }

    let child = pair.slave.spawn_command(cmd).map_err(to_io_err)?;
    let pid = child.process_id().unwrap_or(0);

    let writer = pair.master.take_writer().map_err(to_io_err)?;
    let reader = pair.master.try_clone_reader().map_err(to_io_err)?;

    let master: Arc<std::sync::Mutex<Box<dyn MasterPty + Send>>> =
        Arc::new(std::sync::Mutex::new(pair.master));
    let resize_master = Arc::clone(&master);
    let resize: Arc<dyn Fn(u16, u16) -> std::io::Result<()> + Send + Sync> =
        Arc::new(move |cols, rows| {
            resize_master
                .lock()
                .unwrap()
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(to_io_err)
        });

    Ok(SpawnedProcess {
        pid,
        writer,
        reader,
        resize: Some(resize),
        child: Box::new(PtyChild(child)),
    })
}
