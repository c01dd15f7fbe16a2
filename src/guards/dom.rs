//! DOM guard — removes inserted inline frames whose source is not allowlisted
//!
//! Decision logic lives in [`DomGuard::handle_batch`] and does not care how
//! mutation batches arrive. [`DomGuard::watch`] drains any stream of
//! batches; [`mutation_channel`] gives a DOM adapter a sender to push into.

use super::{GuardContext, GuardKind, InstallMarker};
use crate::error::Result;
use crate::policy::Verdict;
use crate::types::{truncate_chars, ActivityCategory};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// ID used to address nodes in the host document
pub type NodeId = u64;

/// A node inserted anywhere in the document subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedNode {
    pub id: NodeId,
    pub tag_name: String,

    /// Resolved `src` property, falling back to the raw attribute
    pub src: Option<String>,
}

impl AddedNode {
    pub fn iframe(id: NodeId, src: impl Into<String>) -> Self {
        Self {
            id,
            tag_name: "IFRAME".to_string(),
            src: Some(src.into()),
        }
    }

    pub fn element(id: NodeId, tag_name: impl Into<String>) -> Self {
        Self {
            id,
            tag_name: tag_name.into(),
            src: None,
        }
    }

    pub fn is_inline_frame(&self) -> bool {
        self.tag_name.eq_ignore_ascii_case("iframe")
    }
}

/// One delivery of structural changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<AddedNode>,
}

impl MutationBatch {
    pub fn new(added: Vec<AddedNode>) -> Self {
        Self { added }
    }
}

/// The host document, as far as the DOM guard needs it
pub trait DocumentTree {
    fn remove_node(&mut self, id: NodeId) -> Result<()>;
}

/// Channel a DOM adapter can feed mutation batches into
pub fn mutation_channel() -> (
    mpsc::UnboundedSender<MutationBatch>,
    UnboundedReceiverStream<MutationBatch>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx))
}

/// Enforcing observer for inline-frame insertion
pub struct DomGuard {
    ctx: GuardContext,
    _marker: InstallMarker,
}

impl DomGuard {
    pub fn new(ctx: GuardContext) -> Self {
        let marker = ctx.install(GuardKind::Dom);
        Self {
            ctx,
            _marker: marker,
        }
    }

    /// Apply policy to one batch, returning the ids of removed frames
    pub fn handle_batch<D: DocumentTree>(
        &self,
        batch: &MutationBatch,
        document: &mut D,
    ) -> Vec<NodeId> {
        let mut removed = Vec::new();

        for node in batch.added.iter().filter(|n| n.is_inline_frame()) {
            let Some(src) = node.src.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };

            if let Verdict::Deny(reason) = self.ctx.decide(src) {
                let excerpt = truncate_chars(src, self.ctx.config().max_target_chars);
                tracing::error!(node = node.id, src = %excerpt, reason = %reason, "Suspicious iframe detected");
                self.ctx.ledger().record(ActivityCategory::Iframe, &excerpt);

                match document.remove_node(node.id) {
                    Ok(()) => removed.push(node.id),
                    Err(e) => {
                        tracing::warn!(node = node.id, error = %e, "Failed to remove iframe")
                    }
                }
            }
        }

        removed
    }

    /// Drain a stream of batches until it ends; returns the number of frames removed
    pub async fn watch<St, D>(&self, mut batches: St, document: &mut D) -> usize
    where
        St: Stream<Item = MutationBatch> + Unpin,
        D: DocumentTree,
    {
        let mut total = 0;
        while let Some(batch) = batches.next().await {
            total += self.handle_batch(&batch, document).len();
        }
        tracing::debug!(removed = total, "Mutation stream ended");
        total
    }
}
