//! Persistence for outbound messages and sequence numbers, consumed by the session engine as a
//! [`MessageStore`] trait object so the engine never depends on a concrete backing.
//!
//! Two implementations are provided: [`SqliteStore`] (an async actor over [`tokio_rusqlite`],
//! WAL mode, used in production) and [`MemoryStore`] (a `Mutex`-guarded in-process store, used
//! for tests and ephemeral sessions). Only one session task ever touches a given store, so
//! [`MemoryStore`] needs no actor loop of its own -- a plain mutex is enough to satisfy
//! `Send + Sync` without introducing contention that can't happen.

use anyhow::Result;
use async_trait::async_trait;

use crate::fix::mem::MsgBuf;
use crate::SessionSettings;

use std::sync::Arc;
use std::time::Instant;

use chrono::offset::Utc;
use chrono::{DateTime, Duration};

/// The interface the session engine uses to persist outbound messages and sequence numbers.
///
/// `epoch` identifies the logical FIX session (see [`SessionSettings::with_epoch`]) within a
/// store that may be shared by more than one session's backing file. Implementations serialize
/// their own mutations internally; the engine calls these methods from exactly one task.
#[async_trait]
pub(super) trait MessageStore: Send + Sync {
    /// Persists an outbound message for later resend. Fire-and-forget: the call returns as soon
    /// as the request is queued, not once it is durable, matching the engine's use of this method
    /// on the hot send path.
    fn store_outgoing(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        send_instant: Instant,
        msg: Arc<MsgBuf>,
    ) -> Result<()>;

    /// Returns `(next_incoming, next_outgoing)` for this epoch.
    async fn get_sequences(&self, epoch: Arc<String>) -> Result<(u32, u32)>;

    /// Returns previously-sent messages in `[begin, end]`, newest-first, searched among the most
    /// recent `last` outgoing messages.
    async fn get_prev_messages(
        &self,
        epoch: Arc<String>,
        begin: u32,
        end: u32,
        last: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>>;

    /// Overwrites the persisted sequence numbers.
    async fn set_sequences(&self, epoch: Arc<String>, next_outgoing: u32, next_incoming: u32) -> Result<()>;

    /// The `SendingTime` of the most recently stored outgoing message, if any.
    async fn last_send_time(&self, epoch: Arc<String>) -> Result<Option<DateTime<Utc>>>;

    /// When the current logical session (the one ended by the last [`MessageStore::reset`]) began.
    async fn creation_time(&self, epoch: Arc<String>) -> Result<DateTime<Utc>>;

    /// Re-reads authoritative sequence numbers from the backing store. For these two
    /// implementations the backing store is always authoritative, so this is equivalent to
    /// [`MessageStore::get_sequences`]; a store fronted by a write-behind cache would differ.
    async fn refresh(&self, epoch: Arc<String>) -> Result<(u32, u32)> {
        self.get_sequences(epoch).await
    }

    /// Zeroes sequence numbers back to 1, discards stored message history, and stamps a fresh
    /// `creation_time`. Used by `ResetSeqNumFlag=Y` logons and `ResetOn*` configuration.
    async fn reset(&self, epoch: Arc<String>) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use rusqlite::OptionalExtension;
    use tokio::sync::{mpsc, oneshot};
    use tokio_rusqlite::Connection;

    const SQL_ENTER_WAL_MODE: &str = "PRAGMA journal_mode=WAL;";
    const SQL_VACUUM: &str = "VACUUM;";
    const SQL_CREATE_INCOMING_TABLE: &str = "CREATE TABLE IF NOT EXISTS incoming_messages (key INTEGER PRIMARY KEY AUTOINCREMENT, epoch_guid VARCHAR, msg_seq_num INT, message BLOB);";
    const SQL_CREATE_OUTGOING_TABLE: &str =
        "CREATE TABLE IF NOT EXISTS outgoing_messages (key INTEGER PRIMARY KEY AUTOINCREMENT, epoch_guid VARCHAR, msg_seq_num INT, send_time VARCHAR, message BLOB);";
    const SQL_CREATE_SEQUENCES: &str = "CREATE TABLE IF NOT EXISTS sequences (epoch_guid VARCHAR, next_incoming INTEGER, next_outgoing INTEGER, creation_time VARCHAR)";
    const SQL_ENSURE_SEQUENCE_ROW: &str = "INSERT INTO sequences(epoch_guid, next_incoming, next_outgoing, creation_time) SELECT ?1,1,1,?2 WHERE NOT EXISTS (SELECT * FROM sequences WHERE epoch_guid = ?1);";
    const SQL_INSERT_OUTGOING_MESSAGE: &str =
        "INSERT INTO outgoing_messages (epoch_guid, msg_seq_num, send_time, message) VALUES (?,?,?,?)";
    const SQL_LAST_SEND_TIME: &str =
        "SELECT send_time FROM outgoing_messages WHERE epoch_guid = ? ORDER BY send_time DESC LIMIT 1";
    const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

    enum StoreRequest {
        StoreOutgoing(Arc<String>, u32, Instant, Arc<MsgBuf>),
        #[allow(clippy::type_complexity)]
        GetPrevMessages(
            Arc<String>,
            u32,
            u32,
            u32,
            oneshot::Sender<Result<Vec<(u32, Vec<u8>)>>>,
        ),
        GetSequences(Arc<String>, oneshot::Sender<Result<(u32, u32)>>),
        SetSequences(Arc<String>, u32, u32, oneshot::Sender<Result<()>>),
        LastSendTime(Arc<String>, oneshot::Sender<Result<Option<DateTime<Utc>>>>),
        CreationTime(Arc<String>, oneshot::Sender<Result<DateTime<Utc>>>),
        Reset(Arc<String>, oneshot::Sender<Result<()>>),
        Disconnect(oneshot::Sender<Result<()>>),
    }

    /// Async, sqlite-backed [`MessageStore`] used in production. Every mutation flows through a
    /// single actor task over an unbounded channel, so the connection is never touched from more
    /// than one place at a time.
    pub(in crate::fix) struct SqliteStore {
        sender: mpsc::UnboundedSender<StoreRequest>,
    }

    impl SqliteStore {
        pub(in crate::fix) async fn build(settings: &SessionSettings) -> Result<SqliteStore> {
            let conn =
                Connection::open_with_flags(settings.store_path.clone(), rusqlite::OpenFlags::default())
                    .await?;
            let epoch = settings.epoch.clone();
            setup(&conn, epoch).await?;
            let (sender, mut receiver) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                let begin_time = Utc::now();
                let begin_instant = Instant::now();
                while let Some(req) = receiver.recv().await {
                    match req {
                        StoreRequest::StoreOutgoing(epoch, msg_seq_num, send_instant, msg) => {
                            let send_time = match Duration::from_std(send_instant.duration_since(begin_instant)) {
                                Ok(d) => begin_time + d,
                                Err(_) => Utc::now(),
                            };
                            if store_outgoing(&conn, epoch, msg_seq_num, send_time, msg)
                                .await
                                .is_err()
                            {
                                eprintln!("error storing outgoing messages");
                            }
                        }
                        StoreRequest::GetPrevMessages(epoch, begin, end, last, sender) => {
                            let resp = get_prev_messages(&conn, epoch, begin, end, last).await;
                            let _ = sender.send(resp);
                        }
                        StoreRequest::GetSequences(epoch, sender) => {
                            let resp = get_sequences(&conn, epoch).await;
                            let _ = sender.send(resp);
                        }
                        StoreRequest::SetSequences(epoch, outgoing, incoming, sender) => {
                            let resp = set_sequences(&conn, epoch, outgoing, incoming).await;
                            let _ = sender.send(resp);
                        }
                        StoreRequest::LastSendTime(epoch, sender) => {
                            let resp = last_send_time(&conn, epoch).await;
                            let _ = sender.send(resp);
                        }
                        StoreRequest::CreationTime(epoch, sender) => {
                            let resp = creation_time(&conn, epoch).await;
                            let _ = sender.send(resp);
                        }
                        StoreRequest::Reset(epoch, sender) => {
                            let resp = reset(&conn, epoch).await;
                            let _ = sender.send(resp);
                        }
                        StoreRequest::Disconnect(sender) => {
                            let resp = vacuum(&conn).await;
                            let _ = sender.send(resp);
                            drop(conn);
                            break;
                        }
                    }
                }
            });

            Ok(SqliteStore { sender })
        }
    }

    #[async_trait]
    impl MessageStore for SqliteStore {
        fn store_outgoing(
            &self,
            epoch: Arc<String>,
            msg_seq_num: u32,
            send_instant: Instant,
            msg: Arc<MsgBuf>,
        ) -> Result<()> {
            let req = StoreRequest::StoreOutgoing(epoch, msg_seq_num, send_instant, msg);
            self.sender.send(req)?;
            Ok(())
        }

        async fn get_sequences(&self, epoch: Arc<String>) -> Result<(u32, u32)> {
            let (sender, receiver) = oneshot::channel();
            self.sender.send(StoreRequest::GetSequences(epoch, sender))?;
            receiver.await?
        }

        async fn get_prev_messages(
            &self,
            epoch: Arc<String>,
            begin: u32,
            end: u32,
            last: u32,
        ) -> Result<Vec<(u32, Vec<u8>)>> {
            let (sender, receiver) = oneshot::channel();
            self.sender
                .send(StoreRequest::GetPrevMessages(epoch, begin, end, last, sender))?;
            receiver.await?
        }

        async fn set_sequences(&self, epoch: Arc<String>, next_outgoing: u32, next_incoming: u32) -> Result<()> {
            let (sender, receiver) = oneshot::channel();
            self.sender
                .send(StoreRequest::SetSequences(epoch, next_outgoing, next_incoming, sender))?;
            receiver.await?
        }

        async fn last_send_time(&self, epoch: Arc<String>) -> Result<Option<DateTime<Utc>>> {
            let (sender, receiver) = oneshot::channel();
            self.sender.send(StoreRequest::LastSendTime(epoch, sender))?;
            receiver.await?
        }

        async fn creation_time(&self, epoch: Arc<String>) -> Result<DateTime<Utc>> {
            let (sender, receiver) = oneshot::channel();
            self.sender.send(StoreRequest::CreationTime(epoch, sender))?;
            receiver.await?
        }

        async fn reset(&self, epoch: Arc<String>) -> Result<()> {
            let (sender, receiver) = oneshot::channel();
            self.sender.send(StoreRequest::Reset(epoch, sender))?;
            receiver.await?
        }

        async fn disconnect(&self) -> Result<()> {
            let (sender, receiver) = oneshot::channel();
            self.sender.send(StoreRequest::Disconnect(sender))?;
            receiver.await?
        }
    }

    async fn setup(conn: &Connection, epoch: Arc<String>) -> Result<()> {
        let now = format!("{}", Utc::now().format(TIME_FORMAT));
        conn.call(move |conn| {
            conn.query_row(SQL_ENTER_WAL_MODE, (), |_| Ok(()))?;
            conn.execute(SQL_CREATE_SEQUENCES, ())?;
            conn.execute(SQL_CREATE_INCOMING_TABLE, ())?;
            conn.execute(SQL_CREATE_OUTGOING_TABLE, ())?;
            conn.execute(SQL_ENSURE_SEQUENCE_ROW, (Arc::clone(&epoch), now))?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| err.into())
    }

    async fn vacuum(conn: &Connection) -> Result<()> {
        conn.call(move |conn| conn.execute(SQL_VACUUM, []))
            .await
            .map(|_| ())
            .map_err(|e| e.into())
    }

    async fn get_sequences(conn: &Connection, epoch: Arc<String>) -> Result<(u32, u32)> {
        conn.call(move |conn| {
            conn.query_row(
                "SELECT next_incoming, next_outgoing FROM sequences where epoch_guid = ?;",
                (Arc::clone(&epoch),),
                |r| {
                    let next_incoming: u32 = r.get(0)?;
                    let next_outgoing: u32 = r.get(1)?;
                    Ok((next_incoming, next_outgoing))
                },
            )
        })
        .await
        .map_err(|err| err.into())
    }

    async fn set_sequences(conn: &Connection, epoch: Arc<String>, new_outgoing: u32, new_incoming: u32) -> Result<()> {
        conn.call(move |conn| {
            conn.execute(
                "UPDATE sequences SET next_outgoing = ?1, next_incoming = ?2 WHERE epoch_guid = ?3",
                (new_outgoing, new_incoming, Arc::clone(&epoch)),
            )
        })
        .await
        .map(|_| ())
        .map_err(|err| err.into())
    }

    async fn store_outgoing(
        conn: &Connection,
        epoch: Arc<String>,
        msg_seq_num: u32,
        send_time: DateTime<Utc>,
        msg: Arc<MsgBuf>,
    ) -> Result<()> {
        conn.call(move |conn| {
            conn.execute(
                SQL_INSERT_OUTGOING_MESSAGE,
                (epoch, msg_seq_num, format!("{}", send_time.format(TIME_FORMAT)), &msg.as_ref()[..]),
            )
        })
        .await
        .map(|_| ())
        .map_err(|err| err.into())
    }

    async fn get_prev_messages(
        conn: &Connection,
        epoch: Arc<String>,
        begin_seq_no: u32,
        end_seq_no: u32,
        last_seq_no: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        conn.call(move |conn| -> Result<Vec<(u32, Vec<u8>)>> {
            let mut output = Vec::new();
            let mut stmt = conn.prepare("SELECT msg_seq_num, message FROM (SELECT * FROM outgoing_messages WHERE epoch_guid = ?1 ORDER BY key DESC LIMIT ?2) WHERE msg_seq_num BETWEEN ?3 AND ?4;")?;
            let rows = stmt.query_map(
                rusqlite::params![Arc::clone(&epoch), &last_seq_no, &begin_seq_no, &end_seq_no], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            for row in rows {
                output.push(row?);
            }
            Ok(output)
        }).await?
    }

    async fn last_send_time(conn: &Connection, epoch: Arc<String>) -> Result<Option<DateTime<Utc>>> {
        let send_time = conn
            .call(move |conn| -> rusqlite::Result<Option<chrono::NaiveDateTime>> {
                conn.query_row(SQL_LAST_SEND_TIME, [epoch], |row| row.get(0)).optional()
            })
            .await?;
        Ok(send_time.map(|n| n.and_utc()))
    }

    async fn creation_time(conn: &Connection, epoch: Arc<String>) -> Result<DateTime<Utc>> {
        conn.call(move |conn| -> rusqlite::Result<chrono::NaiveDateTime> {
            conn.query_row(
                "SELECT creation_time FROM sequences WHERE epoch_guid = ?;",
                [epoch],
                |row| row.get(0),
            )
        })
        .await
        .map(|n| n.and_utc())
        .map_err(|err| err.into())
    }

    async fn reset(conn: &Connection, epoch: Arc<String>) -> Result<()> {
        let now = format!("{}", Utc::now().format(TIME_FORMAT));
        conn.call(move |conn| {
            conn.execute(
                "UPDATE sequences SET next_outgoing = 1, next_incoming = 1, creation_time = ?1 WHERE epoch_guid = ?2",
                (&now, Arc::clone(&epoch)),
            )?;
            conn.execute("DELETE FROM outgoing_messages WHERE epoch_guid = ?1", (Arc::clone(&epoch),))?;
            conn.execute("DELETE FROM incoming_messages WHERE epoch_guid = ?1", (epoch,))?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| err.into())
    }
}

#[cfg(feature = "sqlite")]
pub(super) use sqlite::SqliteStore;

/// In-process [`MessageStore`] backed by a single mutex. Used for tests and sessions that don't
/// need resend history to survive a process restart. Only one session task ever calls into a
/// given store, so a plain lock (rather than an actor-over-channel) introduces no contention that
/// wouldn't already be serialized by the session's own event loop.
pub(super) struct MemoryStore {
    db: std::sync::Mutex<MemoryDb>,
    begin_time: DateTime<Utc>,
    begin_instant: Instant,
}

struct MemoryDb {
    outgoing_messages: Vec<(Instant, u32, Arc<MsgBuf>)>,
    next_outgoing: u32,
    next_incoming: u32,
    creation_time: DateTime<Utc>,
}

impl MemoryStore {
    pub(super) fn build(_settings: &SessionSettings) -> Result<MemoryStore> {
        let now = Utc::now();
        Ok(MemoryStore {
            db: std::sync::Mutex::new(MemoryDb {
                outgoing_messages: Vec::new(),
                next_outgoing: 1,
                next_incoming: 1,
                creation_time: now,
            }),
            begin_instant: Instant::now(),
            begin_time: now,
        })
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    fn store_outgoing(
        &self,
        _epoch: Arc<String>,
        msg_seq_num: u32,
        send_instant: Instant,
        msg: Arc<MsgBuf>,
    ) -> Result<()> {
        self.db
            .lock()
            .unwrap()
            .outgoing_messages
            .push((send_instant, msg_seq_num, msg));
        Ok(())
    }

    async fn get_sequences(&self, _epoch: Arc<String>) -> Result<(u32, u32)> {
        let db = self.db.lock().unwrap();
        Ok((db.next_incoming, db.next_outgoing))
    }

    async fn get_prev_messages(
        &self,
        _epoch: Arc<String>,
        begin: u32,
        end: u32,
        _last: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        let mut prev_messages: Vec<_> = {
            let db = self.db.lock().unwrap();
            db.outgoing_messages
                .iter()
                .filter(|(_, sequence, _)| (begin..=end).contains(sequence))
                .map(|(_, sequence, msg)| (*sequence, msg.0.clone()))
                .collect()
        };
        prev_messages.sort_by(|(seq1, _), (seq2, _)| seq2.cmp(seq1));
        Ok(prev_messages)
    }

    async fn set_sequences(&self, _epoch: Arc<String>, next_outgoing: u32, next_incoming: u32) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        db.next_outgoing = next_outgoing;
        db.next_incoming = next_incoming;
        Ok(())
    }

    async fn last_send_time(&self, _epoch: Arc<String>) -> Result<Option<DateTime<Utc>>> {
        Ok(self.db.lock().unwrap().outgoing_messages.last().map(|(send_instant, _, _)| {
            let since_begin = send_instant.duration_since(self.begin_instant);
            self.begin_time + since_begin
        }))
    }

    async fn creation_time(&self, _epoch: Arc<String>) -> Result<DateTime<Utc>> {
        Ok(self.db.lock().unwrap().creation_time)
    }

    async fn reset(&self, _epoch: Arc<String>) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        db.outgoing_messages.clear();
        db.next_outgoing = 1;
        db.next_incoming = 1;
        db.creation_time = Utc::now();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_sequences_and_resend() {
        let store = MemoryStore::build_for_test();
        let epoch = Arc::new("test".to_string());
        assert_eq!(store.get_sequences(epoch.clone()).await.unwrap(), (1, 1));

        store.set_sequences(epoch.clone(), 5, 3).await.unwrap();
        assert_eq!(store.get_sequences(epoch.clone()).await.unwrap(), (3, 5));

        let msg: Arc<MsgBuf> = Arc::new(b"8=FIX.4.2\x019=5\x0135=0\x0110=000\x01".to_vec().into());
        store.store_outgoing(epoch.clone(), 1, Instant::now(), msg.clone()).unwrap();
        store.store_outgoing(epoch.clone(), 2, Instant::now(), msg).unwrap();

        let prev = store.get_prev_messages(epoch.clone(), 1, 2, 10).await.unwrap();
        assert_eq!(prev.len(), 2);
    }

    #[tokio::test]
    async fn memory_store_reset_clears_history_and_sequences() {
        let store = MemoryStore::build_for_test();
        let epoch = Arc::new("test".to_string());
        store.set_sequences(epoch.clone(), 10, 10).await.unwrap();
        let msg: Arc<MsgBuf> = Arc::new(b"8=FIX.4.2\x019=5\x0135=0\x0110=000\x01".to_vec().into());
        store.store_outgoing(epoch.clone(), 9, Instant::now(), msg).unwrap();

        store.reset(epoch.clone()).await.unwrap();
        assert_eq!(store.get_sequences(epoch.clone()).await.unwrap(), (1, 1));
        assert_eq!(store.get_prev_messages(epoch.clone(), 1, 20, 20).await.unwrap().len(), 0);
    }

    impl MemoryStore {
        fn build_for_test() -> MemoryStore {
            let now = Utc::now();
            MemoryStore {
                db: std::sync::Mutex::new(MemoryDb {
                    outgoing_messages: Vec::new(),
                    next_outgoing: 1,
                    next_incoming: 1,
                    creation_time: now,
                }),
                begin_instant: Instant::now(),
                begin_time: now,
            }
        }
    }
}
