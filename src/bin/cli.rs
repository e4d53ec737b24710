//! `padsync-cli`: a headless stand-in for the browser UI chrome this crate
//! treats as an external collaborator (§1). Connects to a server, drives a
//! [`PlainTextEditor`] from newline-delimited stdin commands, and prints
//! connection/presence events to stdout.
use anyhow::{Context, Result};
use clap::Parser;
use padsync::client::ClientState;
use padsync::config::AppConfig;
use padsync::connection::{shutdown_guard, ConnectionEvent, ConnectionManager};
use padsync::editor::{ChangeEvent, EditRange, Editor, PlainTextEditor};
use padsync::logging;
use padsync::protocol::{CursorData, ServerMessage, UserInfo};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::parse();
    logging::init();

    info!(document_id = %config.document_id, "starting padsync-cli");

    let (outgoing_tx, outgoing_rx) = tokio::sync::mpsc::unbounded_channel();
    let editor = PlainTextEditor::new("");
    let mut client = ClientState::new(editor, outgoing_tx);
    client.set_info(UserInfo {
        name: config.name.clone(),
        hue: config.hue(),
    });

    let (_connection_handle, mut events_rx) =
        ConnectionManager::spawn(config.socket_url(), config.reconnect_interval_ms, outgoing_rx);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        if !handle_command(&mut client, &line) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        if !handle_connection_event(&mut client, event) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    if shutdown_guard(client.has_unacked_work()) {
        warn!("exiting with unsynchronized local work");
    }
    Ok(())
}

/// Applies one stdin command. Returns `false` on `quit`.
fn handle_command(client: &mut ClientState<PlainTextEditor>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("insert") => {
            let Some(offset) = parts.next().and_then(|s| s.parse::<u64>().ok()) else {
                println!("usage: insert <offset> <text>");
                return true;
            };
            let text = parts.collect::<Vec<_>>().join(" ");
            let range = EditRange {
                utf16_offset: offset,
                utf16_length: 0,
                text,
            };
            client.editor_mut().push_edit(&[range.clone()]);
            client.on_local_change(&ChangeEvent { ranges: vec![range] });
            println!("{}", client.editor().get_value());
        }
        Some("delete") => {
            let (Some(offset), Some(len)) = (
                parts.next().and_then(|s| s.parse::<u64>().ok()),
                parts.next().and_then(|s| s.parse::<u64>().ok()),
            ) else {
                println!("usage: delete <offset> <len>");
                return true;
            };
            let range = EditRange {
                utf16_offset: offset,
                utf16_length: len,
                text: String::new(),
            };
            client.editor_mut().push_edit(&[range.clone()]);
            client.on_local_change(&ChangeEvent { ranges: vec![range] });
            println!("{}", client.editor().get_value());
        }
        Some("cursor") => {
            let Some(offset) = parts.next().and_then(|s| s.parse::<u64>().ok()) else {
                println!("usage: cursor <offset>");
                return true;
            };
            let data = CursorData {
                cursors: vec![offset],
                selections: vec![],
            };
            client.send_cursor_if_allowed(data);
        }
        Some("quit") => return false,
        Some(other) => println!("unknown command: {other}"),
        None => {}
    }
    true
}

/// Applies one connection-manager event. Returns `false` when the client
/// has reached a terminal, unrecoverable state.
fn handle_connection_event(client: &mut ClientState<PlainTextEditor>, event: ConnectionEvent) -> bool {
    match event {
        ConnectionEvent::Opened => {
            client.set_connected(true);
            client.clear_peers();
            client.resend_outstanding();
            println!("connected");
        }
        ConnectionEvent::Disconnected => {
            client.set_connected(false);
            println!("disconnected");
        }
        ConnectionEvent::Desynchronized => {
            error!("desynchronized, a restart is required");
            return false;
        }
        ConnectionEvent::Error(reason) => {
            warn!(%reason, "connection error");
        }
        ConnectionEvent::Message(message) => return handle_server_message(client, message),
    }
    true
}

fn handle_server_message(client: &mut ClientState<PlainTextEditor>, message: ServerMessage) -> bool {
    match message {
        ServerMessage::Identity { id, info: _ } => {
            client.set_identity(id);
            println!("identity: {id}");
        }
        ServerMessage::History { start, operations } => {
            if let Err(err) = client.receive_history(start, operations) {
                error!(%err, "fatal history error, closing");
                return false;
            }
        }
        ServerMessage::Meta(meta) => {
            println!("meta: language={} visibility={:?}", meta.language, meta.visibility);
        }
        ServerMessage::UserInfo { id, user } => {
            client.presence_mut().upsert_info(id, user);
        }
        ServerMessage::UserDisconnect { id } => {
            client.presence_mut().remove(id);
        }
        ServerMessage::UserCursor { id, data } => {
            client.presence_mut().set_cursor(id, data);
        }
    }
    true
}
