use std::sync::Arc;

use log::{error, info};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::engine::Roster;
use crate::proto::command::{Fault, Message, Op, Payload, Reply, Response};
use crate::proto::Connection;
use crate::{Error, Result, RosterOps};

const MAX_CONNECTIONS: usize = 100;

pub struct Router {
    roster: Arc<Roster>,
    semaphore: Arc<Semaphore>,
}

impl Router {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self {
            roster,
            semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    /// Accept loop: one tokio task per connection, all sharing the store
    /// through its `Arc`. Connections above the capacity limit are
    /// rejected outright.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("roster store listening on {}", addr);

        loop {
            let (socket, peer) = listener.accept().await?;
            let roster = self.roster.clone();
            let sem = self.semaphore.clone();

            tokio::spawn(async move {
                let _permit = match sem.try_acquire() {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("server busy: too many concurrent connections, rejecting {peer}");
                        let mut socket = socket;
                        let _ = socket.shutdown().await;
                        return;
                    }
                };

                if let Err(e) = handle_connection(socket, roster).await {
                    error!("connection {peer}: {e}");
                }
            });
        }
    }
}

/// Per-connection loop: read frame, decode, execute, encode, send.
///
/// Command-level failures become an error reply and the loop continues;
/// codec and version errors get one best-effort error reply (token 0,
/// since the offending command's token is unknowable) and then close the
/// connection. A response too large to frame is replaced by an error
/// reply on the same token. The store lock is always released before the
/// response is written, so a slow reader never stalls other connections'
/// commands.
pub async fn handle_connection(socket: TcpStream, roster: Arc<Roster>) -> Result<()> {
    let mut conn = Connection::new(socket);

    loop {
        let msg = match conn.read_message().await {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(()),
            Err(err @ (Error::Codec(_) | Error::UnsupportedVersion(_))) => {
                let farewell = Response {
                    token: 0,
                    body: Reply::Err(Fault::from(&err)),
                };
                let _ = conn.write_message(&Message::Response(farewell)).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let cmd = match msg {
            Message::Command(cmd) => cmd,
            Message::Response(_) => {
                let err = Error::codec("expected a command, received a response");
                let farewell = Response {
                    token: 0,
                    body: Reply::Err(Fault::from(&err)),
                };
                let _ = conn.write_message(&Message::Response(farewell)).await;
                return Err(err);
            }
        };

        let token = cmd.token;
        let body = match execute(roster.as_ref(), cmd.op).await {
            Ok(payload) => Reply::Ok(payload),
            Err(err) => Reply::Err(Fault::from(&err)),
        };

        match conn
            .write_message(&Message::Response(Response { token, body }))
            .await
        {
            Ok(()) => {}
            Err(err @ Error::Codec(_)) => {
                // The encoded response outgrew the frame cap (a listing
                // over a very large collection). Report that on the same
                // token and keep the connection alive.
                let fallback = Response {
                    token,
                    body: Reply::Err(Fault::from(&err)),
                };
                conn.write_message(&Message::Response(fallback)).await?;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Maps each command variant to its collection store operation. The match
/// is exhaustive: a new `Op` variant fails compilation here until it is
/// wired up.
async fn execute(roster: &Roster, op: Op) -> Result<Payload> {
    match op {
        Op::Add(draft) => roster.add(draft).await.map(Payload::Record),
        Op::Update { id, draft } => roster.update(id, draft).await.map(Payload::Record),
        Op::RemoveById(id) => roster.remove_by_id(id).await.map(|_| Payload::None),
        Op::Clear => roster.clear().await.map(|_| Payload::None),
        Op::List => roster.list().await.map(Payload::Records),
        Op::RemoveMatching(pred) => roster.remove_matching(pred).await.map(Payload::Count),
        Op::Info => roster.info().await.map(Payload::Info),
        Op::SumOfHeight => roster.sum_of_height().await.map(Payload::Count),
        Op::FilterContainsName(needle) => roster
            .filter_contains_name(&needle)
            .await
            .map(Payload::Records),
        Op::RunScript(ops) => roster.run_script(ops).await.map(Payload::Count),
    }
}
