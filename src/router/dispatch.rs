//! JSON envelope dispatch: one `ClientMessage` in, zero or more
//! `ServerMessage`s published to the connection's writer channel
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tracing::warn;

use crate::app_state::AppState;
use crate::session::{SessionConfig, PtyMode};

use super::inject;
use super::messages::{ClientMessage, ErrorCode, InjectedBlock, ServerMessage};
use super::session_table::{SessionEntry, SessionTable};

pub const SERVER_VERSION: &str = "1.0";
const FEATURES: &[&str] = &["sessions", "search", "history", "injectFiles"];

pub struct Context {
    pub state: AppState,
    pub sessions: Arc<SessionTable>,
    pub writer: mpsc::UnboundedSender<ServerMessage>,
    pub session_config: Arc<StdMutex<SessionConfig>>,
}

pub async fn dispatch(ctx: &Context, msg: ClientMessage) {
    match msg {
        ClientMessage::Hello => {
            let _ = ctx.writer.send(ServerMessage::Welcome {
                version: SERVER_VERSION.to_string(),
                features: FEATURES.iter().map(|s| s.to_string()).collect(),
            });
        }
        ClientMessage::OpenSession {
            session_id,
            command,
            args,
            cwd,
            cols,
            rows,
        } => open_session(ctx, session_id, command, args, cwd, cols, rows).await,
        ClientMessage::Stdin { session_id, data_b64 } => stdin(ctx, &session_id, &data_b64),
        ClientMessage::Resize { session_id, cols, rows } => resize(ctx, &session_id, cols, rows),
        ClientMessage::CloseSession { session_id } => close_session(ctx, &session_id).await,
        ClientMessage::SearchIndex { query, limit, opened } => {
            search_index(ctx, &query, limit, opened).await
        }
        ClientMessage::InjectFiles { paths } => inject_files(ctx, &paths),
        ClientMessage::SavePrompt { content, cwd } => save_prompt(ctx, content, cwd).await,
        ClientMessage::LoadHistory => load_history(ctx).await,
        ClientMessage::RemovePrompt { id } => remove_prompt(ctx, &id).await,
        ClientMessage::UpdateSessionConfig { command, args, cwd, env } => {
            update_session_config(ctx, command, args, cwd, env)
        }
        ClientMessage::Ping => {
            let _ = ctx.writer.send(ServerMessage::Pong);
        }
    }
}

async fn open_session(
    ctx: &Context,
    session_id: Option<String>,
    command: Option<String>,
    args: Vec<String>,
    cwd: Option<String>,
    cols: u16,
    rows: u16,
) {
    if let Some(id) = session_id.filter(|id| !id.is_empty()) {
        if let Some(entry) = ctx.sessions.get(&id) {
            if entry.is_exited() {
                // Tombstone from a past exit; drop it and fall through to
                // open a fresh session rather than adopting a dead one.
                ctx.sessions.remove(&id);
            } else {
                entry.adopt(ctx.writer.clone());
                let _ = ctx.writer.send(ServerMessage::Opened {
                    session_id: id,
                    pid: entry.session.pid(),
                });
                return;
            }
        }
    }

    let base = ctx.session_config.lock().unwrap().clone();
    let cfg = SessionConfig {
        command: command.unwrap_or(base.command),
        args: if args.is_empty() { base.args } else { args },
        cwd: cwd.map(PathBuf::from).or(base.cwd),
        env: base.env,
        pty_mode: base.pty_mode,
        cols,
        rows,
    };

    match ctx.state.sessions.start(cfg).await {
        Ok(session) => {
            let id = session.id().to_string();
            let pid = session.pid();
            let entry = Arc::new(SessionEntry::new(Arc::clone(&session), ctx.writer.clone()));
            ctx.sessions.insert(id.clone(), Arc::clone(&entry));

            let _ = ctx.writer.send(ServerMessage::Opened {
                session_id: id.clone(),
                pid,
            });

            spawn_forwarder(Arc::clone(&entry));
            spawn_exit_watcher(entry, id);
        }
        Err(e) => {
            let _ = ctx
                .writer
                .send(ServerMessage::error(ErrorCode::Internal, e.to_string()));
        }
    }
}

fn spawn_forwarder(entry: Arc<SessionEntry>) {
    tokio::spawn(async move {
        let Some(mut rx) = entry.session.take_stdout().await else {
            return;
        };
        let id = entry.session.id().to_string();
        while let Some(chunk) = rx.recv().await {
            let seq = entry.next_seq();
            entry.send(ServerMessage::Stdout {
                session_id: id.clone(),
                seq,
                data_b64: BASE64.encode(&chunk),
            });
        }
    });
}

fn spawn_exit_watcher(entry: Arc<SessionEntry>, id: String) {
    tokio::spawn(async move {
        let exit = entry.session.wait().await;
        entry.mark_exited();
        entry.send(ServerMessage::Exit {
            session_id: id.clone(),
            code: exit.code,
        });
    });
}

fn stdin(ctx: &Context, session_id: &str, data_b64: &str) {
    let Some(entry) = ctx.sessions.get(session_id) else {
        let _ = ctx
            .writer
            .send(ServerMessage::error(ErrorCode::UnknownSession, "unknown session"));
        return;
    };
    if entry.is_exited() {
        let _ = ctx
            .writer
            .send(ServerMessage::error(ErrorCode::SessionExited, "session has exited"));
        return;
    }
    let bytes = match BASE64.decode(data_b64) {
        Ok(b) => b,
        Err(_) => {
            let _ = ctx
                .writer
                .send(ServerMessage::error(ErrorCode::BadRequest, "invalid base64 payload"));
            return;
        }
    };
    if let Err(e) = entry.session.write_stdin(&bytes) {
        let _ = ctx
            .writer
            .send(ServerMessage::error(ErrorCode::SessionExited, e.to_string()));
    }
}

fn resize(ctx: &Context, session_id: &str, cols: u16, rows: u16) {
    let Some(entry) = ctx.sessions.get(session_id) else {
        let _ = ctx
            .writer
            .send(ServerMessage::error(ErrorCode::UnknownSession, "unknown session"));
        return;
    };
    if let Err(e) = entry.session.resize(cols, rows) {
        warn!(session_id, error = %e, "resize failed");
    }
}

async fn close_session(ctx: &Context, session_id: &str) {
    let Some(entry) = ctx.sessions.get(session_id) else {
        let _ = ctx
            .writer
            .send(ServerMessage::error(ErrorCode::UnknownSession, "unknown session"));
        return;
    };
    entry.session.close().await;
    // The client explicitly said it's done with this id; drop the
    // tombstone `spawn_exit_watcher` leaves behind rather than waiting on
    // something else to reclaim it.
    ctx.sessions.remove(session_id);
}

async fn search_index(ctx: &Context, query: &str, limit: i64, opened: Vec<String>) {
    ctx.state.index.request_refresh().await;
    let snapshot = ctx.state.index.snapshot().await;
    let opened_set: HashSet<String> = opened.into_iter().collect();
    let out = crate::search::search(&snapshot, query, limit, &opened_set);
    let _ = ctx.writer.send(ServerMessage::SearchResult {
        results: out.results,
        opened: out.opened,
    });
}

fn inject_files(ctx: &Context, paths: &[String]) {
    let mut blocks: Vec<InjectedBlock> = Vec::with_capacity(paths.len());
    for spec in paths {
        match inject::read_block(spec) {
            Ok(block) => blocks.push(block),
            Err(e) => {
                let _ = ctx
                    .writer
                    .send(ServerMessage::error(ErrorCode::BadRequest, e.to_string()));
                return;
            }
        }
    }
    let _ = ctx.writer.send(ServerMessage::InjectedFiles { blocks });
}

async fn save_prompt(ctx: &Context, content: String, cwd: String) {
    let entry = crate::history::PromptEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp_ms: now_millis(),
        content,
        cwd,
    };
    let id = entry.id.clone();
    match ctx.state.history.save(entry).await {
        Ok(()) => {
            let _ = ctx.writer.send(ServerMessage::Saved { id });
        }
        Err(e) => {
            let _ = ctx
                .writer
                .send(ServerMessage::error(ErrorCode::Internal, e.to_string()));
        }
    }
}

async fn load_history(ctx: &Context) {
    let entries = ctx.state.history.load().await;
    let _ = ctx.writer.send(ServerMessage::History { entries });
}

async fn remove_prompt(ctx: &Context, id: &str) {
    match ctx.state.history.remove(id).await {
        Ok(()) => {
            let _ = ctx.writer.send(ServerMessage::Removed { id: id.to_string() });
        }
        Err(_) => {
            let _ = ctx
                .writer
                .send(ServerMessage::error(ErrorCode::NotFound, "prompt not found"));
        }
    }
}

fn update_session_config(
    ctx: &Context,
    command: Option<String>,
    args: Vec<String>,
    cwd: Option<String>,
    env: Vec<(String, String)>,
) {
    let mut cfg = ctx.session_config.lock().unwrap();
    if let Some(command) = command {
        cfg.command = command;
    }
    if !args.is_empty() {
        cfg.args = args;
    }
    if let Some(cwd) = cwd {
        cfg.cwd = Some(PathBuf::from(cwd));
    }
    if !env.is_empty() {
        cfg.env = env;
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_doubles::FakeHistory;
    use crate::app_state::{AppState, HistoryBackend, IndexHost, ProductionSessionFactory, SessionFactory};
    use crate::indexer::Snapshot;
    use std::sync::Mutex;

    fn test_context() -> (Context, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let index: Arc<dyn IndexHost> = Arc::new(Mutex::new(Snapshot::empty()));
        let history: Arc<dyn HistoryBackend> = Arc::new(FakeHistory::new());
        let sessions: Arc<dyn SessionFactory> = Arc::new(ProductionSessionFactory);
        let state = AppState::new(index, sessions, history, "tok".to_string());
        let ctx = Context {
            state,
            sessions: Arc::new(SessionTable::new()),
            writer: tx,
            session_config: Arc::new(StdMutex::new(SessionConfig {
                command: "bash".to_string(),
                pty_mode: PtyMode::Disabled,
                ..Default::default()
            })),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn hello_replies_with_welcome() {
        let (ctx, mut rx) = test_context();
        dispatch(&ctx, ClientMessage::Hello).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Welcome { version, .. } => assert_eq!(version, SERVER_VERSION),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_replies_with_pong() {
        let (ctx, mut rx) = test_context();
        dispatch(&ctx, ClientMessage::Ping).await;
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::Pong));
    }

    #[tokio::test]
    async fn stdin_to_unknown_session_errors() {
        let (ctx, mut rx) = test_context();
        dispatch(
            &ctx,
            ClientMessage::Stdin {
                session_id: "ghost".to_string(),
                data_b64: "aGk=".to_string(),
            },
        )
        .await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error { code: ErrorCode::UnknownSession, .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_then_load_prompt_round_trips() {
        let (ctx, mut rx) = test_context();
        dispatch(
            &ctx,
            ClientMessage::SavePrompt {
                content: "do the thing".to_string(),
                cwd: "/tmp".to_string(),
            },
        )
        .await;
        let saved_id = match rx.recv().await.unwrap() {
            ServerMessage::Saved { id } => id,
            other => panic!("unexpected {other:?}"),
        };

        dispatch(&ctx, ClientMessage::LoadHistory).await;
        match rx.recv().await.unwrap() {
            ServerMessage::History { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].id, saved_id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_unknown_prompt_replies_not_found() {
        let (ctx, mut rx) = test_context();
        dispatch(
            &ctx,
            ClientMessage::RemovePrompt {
                id: "ghost".to_string(),
            },
        )
        .await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error { code: ErrorCode::NotFound, .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_session_lifecycle_emits_opened_stdout_and_exit() {
        let (ctx, mut rx) = test_context();
        dispatch(
            &ctx,
            ClientMessage::OpenSession {
                session_id: None,
                command: Some("echo".to_string()),
                args: vec!["hi".to_string()],
                cwd: None,
                cols: 80,
                rows: 24,
            },
        )
        .await;

        let session_id = match rx.recv().await.unwrap() {
            ServerMessage::Opened { session_id, .. } => session_id,
            other => panic!("unexpected {other:?}"),
        };

        let mut saw_stdout = false;
        loop {
            match rx.recv().await.unwrap() {
                ServerMessage::Stdout { session_id: sid, .. } => {
                    assert_eq!(sid, session_id);
                    saw_stdout = true;
                }
                ServerMessage::Exit { session_id: sid, code } => {
                    assert_eq!(sid, session_id);
                    assert_eq!(code, Some(0));
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_stdout);
    }

    #[tokio::test]
    async fn stdin_after_exit_replies_session_exited_not_unknown_session() {
        let (ctx, mut rx) = test_context();
        dispatch(
            &ctx,
            ClientMessage::OpenSession {
                session_id: None,
                command: Some("true".to_string()),
                args: vec![],
                cwd: None,
                cols: 80,
                rows: 24,
            },
        )
        .await;

        let session_id = match rx.recv().await.unwrap() {
            ServerMessage::Opened { session_id, .. } => session_id,
            other => panic!("unexpected {other:?}"),
        };

        // Drain until Exit, then give the exit watcher's mark_exited() a
        // moment to land before the post-exit stdin is dispatched.
        loop {
            match rx.recv().await.unwrap() {
                ServerMessage::Exit { session_id: sid, .. } => {
                    assert_eq!(sid, session_id);
                    break;
                }
                ServerMessage::Stdout { .. } => continue,
                other => panic!("unexpected {other:?}"),
            }
        }

        dispatch(
            &ctx,
            ClientMessage::Stdin {
                session_id: session_id.clone(),
                data_b64: "aGk=".to_string(),
            },
        )
        .await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error { code: ErrorCode::SessionExited, .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
