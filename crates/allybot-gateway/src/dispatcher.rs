use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use allybot_engine::Engine;
use allybot_types::events::{PlatformEvent, RawReaction};

/// Events that may wait for a worker before ingress starts refusing them.
const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Queue is full; the bridge should redeliver later
    Busy,
    /// Event loop has stopped
    Closed,
}

/// Hands platform events to the event loop. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<PlatformEvent>,
}

impl Dispatcher {
    /// Creates the sender handle and the loop that drains it.
    pub fn new(engine: Arc<Engine>) -> (Self, EventLoop) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (Self { tx }, EventLoop { rx, engine })
    }

    /// Queues an event without waiting for room.
    pub fn dispatch(&self, event: PlatformEvent) -> Result<(), DispatchError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Busy,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

/// Receives events and runs each one in its own task, so a slow command
/// never holds up reactions and a panicking handler takes down only itself.
pub struct EventLoop {
    rx: mpsc::Receiver<PlatformEvent>,
    engine: Arc<Engine>,
}

impl EventLoop {
    /// Runs until every `Dispatcher` is dropped, then waits for in-flight work.
    pub async fn run(mut self) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        tasks.spawn(handle_event(self.engine.clone(), event));
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next() => reap(joined),
            }
        }

        info!("Event queue closed, draining {} in-flight handler(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Event handler panicked: {}", e);
        } else {
            warn!("Event handler cancelled: {}", e);
        }
    }
}

async fn handle_event(engine: Arc<Engine>, event: PlatformEvent) {
    match event {
        PlatformEvent::ReactionAdd(raw) => reconcile(&engine, raw, true).await,
        PlatformEvent::ReactionRemove(raw) => reconcile(&engine, raw, false).await,
        PlatformEvent::CommandInvoked(raw) => {
            let name = raw.name.clone();
            let user_id = raw.user_id;
            let reply = engine.router.handle(raw).await;
            debug!("/{} by {} answered: {}", name, user_id, reply);
        }
    }
}

async fn reconcile(engine: &Engine, raw: RawReaction, added: bool) {
    let message_id = raw.message_id;
    let Some(reaction) = raw.validate() else {
        debug!("Ignoring reaction on {} outside a community", message_id);
        return;
    };

    let result = if added {
        engine.reconciler.reaction_added(&reaction).await
    } else {
        engine.reconciler.reaction_removed(&reaction).await
    };
    match result {
        Ok(outcome) => debug!("Reaction {} on {}: {:?}", reaction.emoji, message_id, outcome),
        Err(e) => error!(
            "Reaction {} by {} in {} failed: {}",
            reaction.emoji, reaction.user_id, reaction.community_id, e
        ),
    }
}
