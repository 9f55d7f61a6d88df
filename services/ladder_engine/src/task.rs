//! Background ladder operations
//!
//! A [`LadderTask`] owns one spawned operation. Consumers read events in a fixed
//! order: zero or more [`TaskEvent::Progress`], exactly one [`TaskEvent::Result`],
//! then [`TaskEvent::Finished`]. Cancellation is cooperative through the shared
//! token; a join that times out cancels and then aborts the task.

use ethers::types::U256;
use futures::future::BoxFuture;
use ladder_amm::LadderSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::{BatchProgress, LadderResult};
use crate::error::{LadderError, Result};
use crate::protocol::{LadderContext, LiquidityProvider};
use crate::session::Session;

#[derive(Debug)]
pub enum TaskEvent {
    Progress(BatchProgress),
    Result(Result<LadderResult>),
    Finished,
}

pub struct LadderTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<TaskEvent>,
}

impl LadderTask {
    /// Run `operation` in the background with a fresh context
    pub fn spawn<F>(session: Arc<Session>, operation: F) -> Self
    where
        F: FnOnce(LadderContext) -> BoxFuture<'static, Result<LadderResult>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ctx = LadderContext::new(session)
            .with_cancel(cancel.clone())
            .with_progress(progress_tx);

        let handle = tokio::spawn(async move {
            let work = operation(ctx);
            tokio::pin!(work);
            let result = loop {
                tokio::select! {
                    biased;
                    Some(progress) = progress_rx.recv() => {
                        let _ = event_tx.send(TaskEvent::Progress(progress));
                    }
                    result = &mut work => break result,
                }
            };
            // progress sent just before completion must still precede the result
            while let Ok(progress) = progress_rx.try_recv() {
                let _ = event_tx.send(TaskEvent::Progress(progress));
            }
            let _ = event_tx.send(TaskEvent::Result(result));
            let _ = event_tx.send(TaskEvent::Finished);
        });

        Self {
            handle,
            cancel,
            events,
        }
    }

    pub fn spawn_create(
        session: Arc<Session>,
        provider: Arc<dyn LiquidityProvider>,
        spec: LadderSpec,
    ) -> Self {
        Self::spawn(session, move |ctx| {
            Box::pin(async move { provider.create_ladder(&spec, &ctx).await })
        })
    }

    pub fn spawn_close(
        session: Arc<Session>,
        provider: Arc<dyn LiquidityProvider>,
        token_ids: Vec<U256>,
    ) -> Self {
        Self::spawn(session, move |ctx| {
            Box::pin(async move { provider.close_positions(&token_ids, &ctx).await })
        })
    }

    pub fn cancel(&self) {
        debug!("Cancelling ladder task");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, `None` once the task is gone and all events were read
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// Wait for the result, dropping progress events
    ///
    /// On timeout the task is cancelled, then aborted, and the result is
    /// [`LadderError::Cancelled`].
    pub async fn join(mut self, timeout: Duration) -> Result<LadderResult> {
        let events = &mut self.events;
        let waited = tokio::time::timeout(timeout, async {
            while let Some(event) = events.recv().await {
                if let TaskEvent::Result(result) = event {
                    return Some(result);
                }
            }
            None
        })
        .await;

        match waited {
            Ok(Some(result)) => result,
            Ok(None) => Err(LadderError::rpc("ladder task ended without a result")),
            Err(_) => {
                warn!("⚠️ Ladder task exceeded {:?}, cancelling", timeout);
                self.cancel.cancel();
                self.handle.abort();
                Err(LadderError::Cancelled)
            }
        }
    }
}
