use futures_util::future::join_all;

use crate::buttons::InteractionMetadata;
use crate::download::ImageSource;
use crate::error::{MjError, Result};
use crate::poll::{StatusPoller, StatusSource};
use crate::submit::ActionSubmitter;
use crate::types::{Action, DecodedImage};

/// Runs several follow-up actions of one parent task side by side.
///
/// Submission and polling are two phases; every sub-operation of a phase
/// finishes before the next phase starts. A failing action only empties
/// its own slot.
pub struct BatchCoordinator<'a, A, S, I> {
    submitter: &'a A,
    poller: &'a StatusPoller<S, I>,
}

impl<'a, A, S, I> BatchCoordinator<'a, A, S, I>
where
    A: ActionSubmitter,
    S: StatusSource,
    I: ImageSource,
{
    pub fn new(submitter: &'a A, poller: &'a StatusPoller<S, I>) -> Self {
        Self { submitter, poller }
    }

    /// Poll the parent task, then run `actions` against its metadata.
    ///
    /// Errors only when `actions` is empty or the parent poll fails. The
    /// result has one slot per action, in the caller's order.
    pub async fn run(
        &self,
        parent_task_id: &str,
        actions: &[Action],
    ) -> Result<Vec<Option<DecodedImage>>> {
        if actions.is_empty() {
            return Err(MjError::InvalidInput("batch needs at least one action".into()));
        }
        let parent = self.poller.poll(parent_task_id).await?;
        Ok(self
            .run_with_metadata(parent_task_id, &parent.metadata, actions)
            .await)
    }

    /// Run `actions` against metadata the caller already holds.
    pub async fn run_with_metadata(
        &self,
        parent_task_id: &str,
        metadata: &InteractionMetadata,
        actions: &[Action],
    ) -> Vec<Option<DecodedImage>> {
        tracing::info!(parent_task_id, actions = actions.len(), "Submitting batch");

        let task_ids = join_all(
            actions
                .iter()
                .map(|action| self.submit_one(parent_task_id, metadata, action)),
        )
        .await;

        let results = join_all(
            actions
                .iter()
                .zip(&task_ids)
                .map(|(action, task_id)| self.poll_one(action, task_id.as_deref())),
        )
        .await;

        let completed = results.iter().filter(|r| r.is_some()).count();
        tracing::info!(parent_task_id, completed, total = actions.len(), "Batch finished");
        results
    }

    async fn submit_one(
        &self,
        parent_task_id: &str,
        metadata: &InteractionMetadata,
        action: &Action,
    ) -> Option<String> {
        let Some(custom_id) = metadata.custom_id_for(action) else {
            tracing::warn!(parent_task_id, %action, "No custom id for action");
            return None;
        };
        match self.submitter.submit_action(parent_task_id, custom_id).await {
            Ok(task_id) => {
                tracing::debug!(parent_task_id, %action, %task_id, "Action submitted");
                Some(task_id)
            }
            Err(e) => {
                tracing::warn!(parent_task_id, %action, error = %e, "Action submission failed");
                None
            }
        }
    }

    async fn poll_one(&self, action: &Action, task_id: Option<&str>) -> Option<DecodedImage> {
        let task_id = task_id?;
        match self.poller.poll(task_id).await {
            Ok(outcome) => outcome.image,
            Err(e) => {
                tracing::warn!(task_id, %action, error = %e, "Action task failed");
                None
            }
        }
    }
}
