//! Operator control
//!
//! Operators never write release records. Commands are posted to a
//! mailbox that the worker owning the service drains on its next pass, and
//! the key is enqueued immediately.

use crate::admission::Admission;
use crate::error::{ControlError, Result};
use crate::queue::WorkQueue;
use crate::store::ReleaseStore;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use switchyard_types::{
    ArtifactRef, EventEnvelope, EventSource, Release, ReleaseId, ReleaseOutcome, ServiceKey,
    SwitchyardEvent,
};
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// A request from an operator, applied by the owning worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Divert the active release into RollingBack
    Abort { reason: String },
}

/// Pending operator commands per service
#[derive(Debug, Default)]
pub struct CommandMailbox {
    commands: DashMap<ServiceKey, Vec<OperatorCommand>>,
}

impl CommandMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, key: &ServiceKey, command: OperatorCommand) {
        self.commands.entry(key.clone()).or_default().push(command);
    }

    /// Remove and return every pending command for `key`
    pub fn take(&self, key: &ServiceKey) -> Vec<OperatorCommand> {
        self.commands
            .remove(key)
            .map(|(_, commands)| commands)
            .unwrap_or_default()
    }

    pub fn pending(&self, key: &ServiceKey) -> usize {
        self.commands.get(key).map(|c| c.len()).unwrap_or(0)
    }
}

/// What an operator rollback did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// A release was in flight and has been asked to roll back
    Aborted { release_id: ReleaseId },
    /// An earlier release's spec is the desired state again
    Resubmitted {
        from_release: ReleaseId,
        version: ArtifactRef,
        generation: u64,
    },
}

/// Abort and rollback entry points for operators
pub struct OperatorControl {
    releases: Arc<dyn ReleaseStore>,
    admission: Arc<Admission>,
    mailbox: Arc<CommandMailbox>,
    queue: Arc<WorkQueue>,
    events: broadcast::Sender<EventEnvelope>,
}

impl OperatorControl {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        admission: Arc<Admission>,
        mailbox: Arc<CommandMailbox>,
        queue: Arc<WorkQueue>,
        events: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        Self {
            releases,
            admission,
            mailbox,
            queue,
            events,
        }
    }

    /// Ask the owning worker to roll back the active release of `key`
    #[instrument(skip(self), fields(service = %key))]
    pub async fn abort(&self, key: &ServiceKey, reason: &str) -> Result<ReleaseId> {
        let active = self
            .releases
            .active(key)
            .await?
            .ok_or_else(|| ControlError::no_active_release(key))?;

        self.mailbox.post(
            key,
            OperatorCommand::Abort {
                reason: reason.to_string(),
            },
        );
        self.queue.add(key.clone());

        info!(service = %key, release_id = %active.id, reason, "Abort requested");
        let _ = self.events.send(EventEnvelope::new(
            SwitchyardEvent::AbortRequested {
                key: key.clone(),
                release_id: active.id,
            },
            EventSource::Operator,
        ));
        Ok(active.id)
    }

    /// Return `key` to an earlier release.
    ///
    /// An in-flight release is aborted. Otherwise the spec of release `to`,
    /// or of the last stable release before the current one, becomes the
    /// desired state again.
    #[instrument(skip(self), fields(service = %key))]
    pub async fn rollback(&self, key: &ServiceKey, to: Option<ReleaseId>) -> Result<RollbackOutcome> {
        if to.is_none() && self.releases.active(key).await?.is_some() {
            let release_id = self.abort(key, "operator rollback").await?;
            return Ok(RollbackOutcome::Aborted { release_id });
        }

        let target = match to {
            Some(id) => self
                .releases
                .get(key, id)
                .await?
                .ok_or_else(|| ControlError::release_not_found(key, id))?,
            None => self.previous_stable(key).await?,
        };

        let mut spec = target.spec.clone();
        spec.submitted_at = None;
        let accepted = self.admission.submit(spec).await?;

        info!(
            service = %key,
            from_release = %target.id,
            version = %accepted.version,
            generation = accepted.generation,
            "Rollback resubmitted"
        );
        let _ = self.events.send(EventEnvelope::new(
            SwitchyardEvent::RollbackRequested {
                key: key.clone(),
                target_version: accepted.version.clone(),
            },
            EventSource::Operator,
        ));

        Ok(RollbackOutcome::Resubmitted {
            from_release: target.id,
            version: accepted.version,
            generation: accepted.generation,
        })
    }

    /// The most recent stable release running a different version than the
    /// current stable one
    async fn previous_stable(&self, key: &ServiceKey) -> Result<Release> {
        let history = self.releases.history(key).await?;
        let mut stable = history
            .into_iter()
            .rev()
            .filter(|r| r.outcome == Some(ReleaseOutcome::Stable));

        let current = stable
            .next()
            .ok_or_else(|| ControlError::NoRollbackTarget(key.clone()))?;

        stable
            .find(|r| r.target_version() != current.target_version())
            .ok_or_else(|| ControlError::NoRollbackTarget(key.clone()))
    }
}
