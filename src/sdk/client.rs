use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::data::{Person, PersonDraft};
use crate::proto::command::{
    CollectionInfo, Command, Message, Op, Payload, Predicate, Reply, Response,
};
use crate::proto::Connection;
use crate::{Error, Result, RosterOps};

/// Remote [`RosterOps`] over the binary TCP protocol.
///
/// The connection is shared behind a mutex, so the client is safe to use
/// from multiple tasks; each request gets a fresh correlation token and
/// the reader skips frames until the matching token arrives. Drafts are
/// validated locally before encoding, so obviously bad records never
/// cost a round-trip.
pub struct Client {
    conn: Mutex<Connection>,
    next_token: AtomicU64,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            conn: Mutex::new(Connection::new(stream)),
            next_token: AtomicU64::new(1),
        })
    }

    async fn round_trip(&self, op: Op) -> Result<Payload> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.conn.lock().await;

        conn.write_message(&Message::Command(Command { token, op }))
            .await?;

        loop {
            match conn.read_message().await? {
                None => return Err(Error::codec("server closed the connection mid-request")),
                Some(Message::Response(Response { token: t, body })) if t == token => {
                    return match body {
                        Reply::Ok(payload) => Ok(payload),
                        Reply::Err(fault) => Err(fault.into()),
                    };
                }
                // A frame for another token (or a stale one); keep reading.
                Some(_) => continue,
            }
        }
    }
}

fn expect_record(payload: Payload) -> Result<Person> {
    match payload {
        Payload::Record(person) => Ok(person),
        other => Err(wrong_shape(&other)),
    }
}

fn expect_records(payload: Payload) -> Result<Vec<Person>> {
    match payload {
        Payload::Records(people) => Ok(people),
        other => Err(wrong_shape(&other)),
    }
}

fn expect_count(payload: Payload) -> Result<u64> {
    match payload {
        Payload::Count(n) => Ok(n),
        other => Err(wrong_shape(&other)),
    }
}

fn wrong_shape(payload: &Payload) -> Error {
    Error::codec(format!(
        "server returned an unexpected payload shape: {payload:?}"
    ))
}

#[async_trait]
impl RosterOps for Client {
    async fn add(&self, draft: PersonDraft) -> Result<Person> {
        draft.validate()?;
        expect_record(self.round_trip(Op::Add(draft)).await?)
    }

    async fn update(&self, id: u64, draft: PersonDraft) -> Result<Person> {
        draft.validate()?;
        expect_record(self.round_trip(Op::Update { id, draft }).await?)
    }

    async fn remove_by_id(&self, id: u64) -> Result<()> {
        self.round_trip(Op::RemoveById(id)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.round_trip(Op::Clear).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Person>> {
        expect_records(self.round_trip(Op::List).await?)
    }

    async fn remove_matching(&self, predicate: Predicate) -> Result<u64> {
        expect_count(self.round_trip(Op::RemoveMatching(predicate)).await?)
    }

    async fn info(&self) -> Result<CollectionInfo> {
        match self.round_trip(Op::Info).await? {
            Payload::Info(info) => Ok(info),
            other => Err(wrong_shape(&other)),
        }
    }

    async fn sum_of_height(&self) -> Result<u64> {
        expect_count(self.round_trip(Op::SumOfHeight).await?)
    }

    async fn filter_contains_name(&self, needle: &str) -> Result<Vec<Person>> {
        expect_records(
            self.round_trip(Op::FilterContainsName(needle.to_string()))
                .await?,
        )
    }

    async fn run_script(&self, ops: Vec<Op>) -> Result<u64> {
        // Validate every embedded draft locally before shipping the batch.
        for op in &ops {
            match op {
                Op::Add(draft) | Op::Update { draft, .. } => draft.validate()?,
                _ => {}
            }
        }
        expect_count(self.round_trip(Op::RunScript(ops)).await?)
    }
}
