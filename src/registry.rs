//! Multi-session supervision on top of the single-connection [`crate::FixApplicationInitiator`]
//! and [`crate::FixApplicationAcceptor`].
//!
//! A [`SessionRegistry`] is an explicit, caller-held map from [`crate::SessionID`] to the
//! [`crate::FixApplicationHandle`] of whichever engine is currently servicing that session. It is
//! never global state: an application can run as many independent registries as it has distinct
//! sets of counterparties.
//!
//! [`InitiatorSupervisor`] and [`AcceptorSupervisor`] keep a registry populated across reconnects.
//! Both loop `while !cancelled`, per the supervisor lifecycle used throughout this engine.

use crate::fix::mem::MsgBuf;
use crate::{
    ApplicationError, ApplicationHandle, FixApplicationAcceptor, FixApplicationHandle,
    FixApplicationInitiator, SessionID, SessionSettings,
};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};

/// A shared map from [`SessionID`] to the handle of its currently-running FIX engine.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    handles: Arc<RwLock<HashMap<SessionID, FixApplicationHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn insert(&self, session_id: SessionID, handle: FixApplicationHandle) {
        self.handles.write().await.insert(session_id, handle);
    }

    pub async fn remove(&self, session_id: &SessionID) -> Option<FixApplicationHandle> {
        self.handles.write().await.remove(session_id)
    }

    pub async fn get(&self, session_id: &SessionID) -> Option<FixApplicationHandle> {
        self.handles.read().await.get(session_id).cloned()
    }

    pub async fn session_ids(&self) -> Vec<SessionID> {
        self.handles.read().await.keys().cloned().collect()
    }
}

/// Drives a single initiator-side session, reconnecting after every disconnect until cancelled.
///
/// The same [`ApplicationHandle`] is reused across every reconnect attempt, so `on_create` fires
/// once per TCP connection while the `Application` implementation itself persists for the life
/// of the supervisor.
pub struct InitiatorSupervisor {
    registry: SessionRegistry,
    settings: SessionSettings,
    app: ApplicationHandle,
}

impl InitiatorSupervisor {
    pub fn new(registry: SessionRegistry, settings: SessionSettings, app: ApplicationHandle) -> Self {
        InitiatorSupervisor {
            registry,
            settings,
            app,
        }
    }

    /// Spawns the reconnect loop as a background task.
    ///
    /// Returns a channel of inbound application messages that stays open across reconnects, and
    /// a `watch::Sender` used to request cancellation -- send `true` to stop the loop after the
    /// current connection attempt settles.
    pub fn spawn(self) -> (mpsc::UnboundedReceiver<Arc<MsgBuf>>, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(cancel_rx, event_tx));
        (event_rx, cancel_tx)
    }

    async fn run(
        self,
        mut cancelled: watch::Receiver<bool>,
        event_tx: mpsc::UnboundedSender<Arc<MsgBuf>>,
    ) {
        let session_id = self.settings.session_id();
        let reconnect_interval = self.settings.reconnect_interval;

        while !*cancelled.borrow() {
            let initiator = match FixApplicationInitiator::build(
                self.settings.clone(),
                Arc::clone(&self.app),
            ) {
                Ok(initiator) => initiator,
                Err(_) => {
                    if wait_or_cancelled(reconnect_interval, &mut cancelled).await {
                        break;
                    }
                    continue;
                }
            };
            let (handle, mut events) = match initiator.initiate().await {
                Ok(pair) => pair,
                Err(_) => {
                    if wait_or_cancelled(reconnect_interval, &mut cancelled).await {
                        break;
                    }
                    continue;
                }
            };

            self.registry.insert(session_id.clone(), handle.clone()).await;
            let _ = handle.start_async().await;

            while !handle.is_ended() && !*cancelled.borrow() {
                match events.pop() {
                    Ok(msg) => {
                        let _ = event_tx.send(msg);
                    }
                    Err(_) => {
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
                            _ = cancelled.changed() => break,
                        }
                    }
                }
            }
            self.registry.remove(&session_id).await;

            if *cancelled.borrow() {
                break;
            }
            if wait_or_cancelled(reconnect_interval, &mut cancelled).await {
                break;
            }
        }
    }
}

/// Accepts repeated TCP connections for a single listening address, registering a handle for
/// each one. Unlike the initiator side, a disconnected acceptor session is not reconnected --
/// the supervisor simply waits for the next inbound connection.
pub struct AcceptorSupervisor {
    registry: SessionRegistry,
    acceptor: FixApplicationAcceptor,
    session_id: SessionID,
}

impl AcceptorSupervisor {
    pub fn new(
        registry: SessionRegistry,
        settings: SessionSettings,
        app: ApplicationHandle,
    ) -> Result<Self, ApplicationError> {
        let session_id = settings.session_id();
        let acceptor = FixApplicationAcceptor::build(settings, app)?;
        Ok(AcceptorSupervisor {
            registry,
            acceptor,
            session_id,
        })
    }

    pub fn spawn(self) -> (mpsc::UnboundedReceiver<Arc<MsgBuf>>, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(cancel_rx, event_tx));
        (event_rx, cancel_tx)
    }

    async fn run(
        mut self,
        mut cancelled: watch::Receiver<bool>,
        event_tx: mpsc::UnboundedSender<Arc<MsgBuf>>,
    ) {
        while !*cancelled.borrow() {
            let (handle, mut events) = tokio::select! {
                res = self.acceptor.accept() => match res {
                    Ok(pair) => pair,
                    Err(_) => continue,
                },
                _ = cancelled.changed() => break,
            };

            self.registry
                .insert(self.session_id.clone(), handle.clone())
                .await;

            while !handle.is_ended() && !*cancelled.borrow() {
                match events.pop() {
                    Ok(msg) => {
                        let _ = event_tx.send(msg);
                    }
                    Err(_) => {
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
                            _ = cancelled.changed() => break,
                        }
                    }
                }
            }
            self.registry.remove(&self.session_id).await;
        }
    }
}

async fn wait_or_cancelled(
    interval: std::time::Duration,
    cancelled: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = cancelled.changed() => true,
    }
}
