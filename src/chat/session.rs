//! Per-connection session: admission, the active message loop, and
//! disconnect cleanup.
//!
//! One task per accepted stream. The task is the only writer of its socket;
//! everything other tasks want delivered arrives through the connection's
//! outbox channel and is drained here. Transport failures are disconnect
//! signals, contained to this session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, error, info};

use super::codec::{CodecError, LineCodec};
use super::command::Command;
use super::registry::{ConnId, Connection};
use super::server::ChatState;

/// Admission prompt, written raw: the protocol sends no newline after it.
pub const NAME_PROMPT: &str = "Введите ваше имя: ";

const UNKNOWN_COMMAND: &str = "Неизвестная команда. Используйте /help для списка команд.";
const BAD_ENCODING: &str = "Ошибка: неверная кодировка сообщения";

/// How long a client may sit on the name prompt before being dropped.
const NAME_TIMEOUT: Duration = Duration::from_secs(60);

/// Drive one client from accept to close.
///
/// Cleanup runs on every exit path after admission: the registry entry is
/// removed (idempotently) and a departure notice is broadcast if the entry
/// was still present. The socket itself is released when the framed stream
/// drops, errors included.
pub(crate) async fn handle_client(
    mut socket: TcpStream,
    addr: SocketAddr,
    state: Arc<ChatState>,
) -> Result<(), CodecError> {
    let id = state.registry.mint();

    socket.write_all(NAME_PROMPT.as_bytes()).await?;
    let mut framed = Framed::new(socket, LineCodec);

    // Admitting: one line is the proposed name. A server stop during this
    // phase just closes the connection; nothing was registered yet.
    let proposed = tokio::select! {
        _ = state.shutdown.cancelled() => return Ok(()),
        read = timeout(NAME_TIMEOUT, framed.next()) => match read {
            Err(_) => {
                info!(%id, %addr, "gave up waiting for a name");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => {
                debug!(%id, %addr, "admission read failed: {e}");
                return Ok(());
            }
            Ok(Some(Ok(line))) => line,
        },
    };
    let name = match proposed.trim() {
        "" => format!("Guest_{id}"),
        trimmed => trimmed.to_owned(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = Connection {
        id,
        name: name.clone(),
        addr,
        joined_at: Local::now(),
        outbox: tx,
    };
    if let Err(e) = state.registry.add(conn).await {
        // Unreachable by construction; a defect here costs one session,
        // never the server.
        error!(%id, %addr, "registry defect: {e}");
        return Ok(());
    }

    info!(%id, %name, %addr, "client admitted");
    state
        .broadcaster
        .broadcast(&format!(">>> {name} присоединился к чату!"), Some(id))
        .await;

    let result = active(&mut framed, &mut rx, &state, id, &name).await;

    // Closing: always runs, whatever ended the active phase.
    if let Some(conn) = state.registry.remove(id).await {
        let seconds = Local::now()
            .signed_duration_since(conn.joined_at)
            .num_seconds();
        info!(id = %conn.id, name = %conn.name, seconds, "client left");
        state
            .broadcaster
            .broadcast(&format!("<<< {} покинул чат.", conn.name), None)
            .await;
    }

    result
}

/// The welcome block sent privately to a freshly admitted client.
fn welcome_lines(name: &str, online: usize) -> Vec<String> {
    vec![
        String::new(),
        format!("Добро пожаловать в чат, {name}!"),
        format!("Сейчас в чате: {online} пользователь(ей)"),
        "Команды:".to_owned(),
        "/online - список онлайн пользователей".to_owned(),
        "/quit - выход из чата".to_owned(),
        "=".repeat(50),
    ]
}

/// The active phase: welcome, then relay lines until quit, EOF, transport
/// failure, or server shutdown.
async fn active(
    framed: &mut Framed<TcpStream, LineCodec>,
    rx: &mut mpsc::UnboundedReceiver<String>,
    state: &ChatState,
    id: ConnId,
    name: &str,
) -> Result<(), CodecError> {
    let online = state.registry.count().await;
    for line in welcome_lines(name, online) {
        framed.send(line).await?;
    }

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                None => break,
                Some(Err(CodecError::InvalidUtf8)) => {
                    framed.send(BAD_ENCODING.to_owned()).await?;
                }
                Some(Err(e)) => {
                    debug!(%id, "read failed: {e}");
                    break;
                }
                Some(Ok(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match Command::parse(text) {
                        Some(Command::Quit) => break,
                        Some(Command::ListOnline) => {
                            let names = state.registry.names().await;
                            let roster = format!(
                                "Сейчас онлайн ({}): {}",
                                names.len(),
                                names.join(", ")
                            );
                            state.broadcaster.send_to(id, &roster).await;
                        }
                        Some(Command::Unknown(_)) => {
                            framed.send(UNKNOWN_COMMAND.to_owned()).await?;
                        }
                        None => {
                            info!("{name}: {text}");
                            state
                                .broadcaster
                                .broadcast(&format!("{name}: {text}"), Some(id))
                                .await;
                        }
                    }
                }
            },

            outbound = rx.recv() => match outbound {
                Some(line) => framed.send(line).await?,
                // Our registry entry is gone: stop() cleared it or a
                // broadcast evicted us.
                None => break,
            },

            _ = state.shutdown.cancelled() => {
                // Deliver anything already queued (the shutdown notice in
                // particular) before letting the socket go.
                while let Ok(line) = rx.try_recv() {
                    framed.send(line).await?;
                }
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn welcome_names_the_client_and_counts_the_room() {
        let lines = welcome_lines("Ann", 3);
        assert_eq!(lines[1], "Добро пожаловать в чат, Ann!");
        assert_eq!(lines[2], "Сейчас в чате: 3 пользователь(ей)");
        assert!(lines.iter().any(|l| l.contains("/online")));
        assert!(lines.iter().any(|l| l.contains("/quit")));
    }
}
