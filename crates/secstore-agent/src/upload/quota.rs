//! Per-account quota reservations
//!
//! The quota decision (measure usage, add pending reservations, compare) runs
//! under one async lock. Reservations are released when dropped, which
//! happens once the upload reaches a terminal state.

use secstore_core::AppError;
use secstore_services::layout::account_usage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct QuotaLedger {
    decision: tokio::sync::Mutex<()>,
    reserved: Mutex<HashMap<u64, u64>>,
}

/// Bytes held against an account's quota while an upload is in flight.
pub struct QuotaReservation {
    ledger: Arc<QuotaLedger>,
    account_id: u64,
    bytes: u64,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently reserved by in-flight uploads of `account_id`.
    pub fn pending(&self, account_id: u64) -> u64 {
        self.reserved
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&account_id)
            .copied()
            .unwrap_or(0)
    }

    /// Reserve `requested` bytes for `account_id` if on-disk usage under
    /// `store_root` plus pending reservations leaves room within `quota_bytes`.
    pub async fn reserve(
        self: &Arc<Self>,
        store_root: &Path,
        account_id: u64,
        requested: u64,
        quota_bytes: u64,
    ) -> Result<QuotaReservation, AppError> {
        let _decision = self.decision.lock().await;

        let root = store_root.to_path_buf();
        let used = tokio::task::spawn_blocking(move || account_usage(&root, account_id))
            .await
            .map_err(|e| AppError::Internal(format!("usage task failed: {}", e)))??;
        let used_bytes = used.saturating_add(self.pending(account_id));

        if used_bytes.saturating_add(requested) > quota_bytes {
            tracing::warn!(
                account_id,
                used_bytes,
                requested_bytes = requested,
                quota_bytes,
                "Upload rejected by account quota"
            );
            return Err(AppError::QuotaExceeded {
                account_id,
                used_bytes,
                requested_bytes: requested,
                quota_bytes,
            });
        }

        *self
            .reserved
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(account_id)
            .or_insert(0) += requested;

        Ok(QuotaReservation {
            ledger: self.clone(),
            account_id,
            bytes: requested,
        })
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        let mut reserved = self
            .ledger
            .reserved
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(held) = reserved.get_mut(&self.account_id) {
            *held = held.saturating_sub(self.bytes);
            if *held == 0 {
                reserved.remove(&self.account_id);
            }
        }
    }
}
