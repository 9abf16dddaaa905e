//! Hash chain linking between consecutive windows of a stream.
//!
//! Each closed window records the id and Merkle root of its predecessor, so
//! removing, reordering or altering a window breaks every later link. The
//! linker only reads stored windows; persisted windows are never modified.

use std::sync::Arc;

use makoto_core::{ChainLink, WindowId, WindowStore};
use tracing::debug;

use crate::error::{IntegrityError, Result};

/// Computes and checks chain links against a window store.
#[derive(Debug, Clone)]
pub struct ChainLinker {
    store: Arc<dyn WindowStore>,
}

impl ChainLinker {
    /// Creates a linker reading from `store`.
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    /// Computes the link for `window`.
    ///
    /// Without a previous window the result is a genesis link. Otherwise the
    /// previous window's root and chain length are read from the store.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::UnknownPreviousWindow` if the previous window
    /// is not stored, `IntegrityError::BrokenChainLink` if it belongs to
    /// another stream, and `IntegrityError::Store` if the store fails.
    pub async fn link(&self, window: &WindowId, previous: Option<&WindowId>) -> Result<ChainLink> {
        let Some(previous) = previous else {
            debug!(window_id = %window, "genesis window");
            return Ok(ChainLink::genesis(window.clone()));
        };

        if previous.stream_id() != window.stream_id() {
            return Err(IntegrityError::broken_chain_link(
                window.clone(),
                format!("previous window {previous} belongs to another stream"),
            ));
        }

        let stored = self
            .store
            .get(previous)
            .await?
            .ok_or_else(|| IntegrityError::UnknownPreviousWindow { window_id: previous.clone() })?;

        let link = ChainLink {
            previous_window_id: Some(previous.clone()),
            previous_merkle_root: Some(stored.tree.root),
            chain_length: stored.chain.chain_length + 1,
            genesis_window_id: stored.chain.genesis_window_id,
        };
        debug!(
            window_id = %window,
            previous_window_id = %previous,
            chain_length = link.chain_length,
            "window linked"
        );
        Ok(link)
    }

    /// Checks a claimed link of `window` against stored state.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::BrokenChainLink` if the link is malformed or
    /// disagrees with the stored predecessor, and
    /// `IntegrityError::UnknownPreviousWindow` if the predecessor is missing.
    pub async fn check(&self, window: &WindowId, link: &ChainLink) -> Result<()> {
        if !link.is_well_formed() {
            return Err(IntegrityError::broken_chain_link(
                window.clone(),
                "link is malformed: genesis must have length 1 and no predecessor, other \
                 links need both predecessor id and root",
            ));
        }
        let (Some(previous), Some(claimed_root)) =
            (&link.previous_window_id, &link.previous_merkle_root)
        else {
            return Ok(());
        };

        let stored = self
            .store
            .get(previous)
            .await?
            .ok_or_else(|| IntegrityError::UnknownPreviousWindow { window_id: previous.clone() })?;

        if stored.tree.root != *claimed_root {
            return Err(IntegrityError::broken_chain_link(
                window.clone(),
                format!(
                    "previous merkle root {claimed_root} does not match stored root {}",
                    stored.tree.root
                ),
            ));
        }
        if link.chain_length != stored.chain.chain_length + 1 {
            return Err(IntegrityError::broken_chain_link(
                window.clone(),
                format!(
                    "chain length {} does not follow stored length {}",
                    link.chain_length, stored.chain.chain_length
                ),
            ));
        }
        if link.genesis_window_id != stored.chain.genesis_window_id {
            return Err(IntegrityError::broken_chain_link(
                window.clone(),
                "genesis window differs from predecessor's",
            ));
        }
        Ok(())
    }
}
