//! ConcurrencyGate - 同時実行数の上限
//!
//! # 設計原則
//! - Semaphore を Dispatcher が所有し、各 DispatchLoop へ `Arc` で共有する
//! - 受付（admit）で permit を 1 つ取得、permit の drop で 1 つ返却
//! - 成功・失敗・タイムアウト・panic のどの経路でも drop は 1 回だけなので、
//!   カウンタは必ず受付前の値に戻る

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Process-wide bound on in-flight tasks.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// Capacity held by one admitted task. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.limit
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn is_saturated(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Admit without waiting. `None` when at capacity or closed.
    pub fn try_admit(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Wait for capacity. `None` once the gate is closed.
    pub async fn admit(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Refuse further admissions. Permits already handed out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_is_bounded() {
        let gate = ConcurrencyGate::new(2);
        let a = gate.try_admit();
        let b = gate.try_admit();
        assert!(a.is_some() && b.is_some());
        assert!(gate.is_saturated());
        assert!(gate.try_admit().is_none());
        assert_eq!(gate.in_flight(), 2);
    }

    #[test]
    fn dropping_a_permit_restores_the_baseline() {
        let gate = ConcurrencyGate::new(3);
        let baseline = gate.in_flight();
        {
            let _a = gate.try_admit();
            let _b = gate.try_admit();
            assert_eq!(gate.in_flight(), baseline + 2);
        }
        assert_eq!(gate.in_flight(), baseline);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.limit(), 1);
        assert!(gate.try_admit().is_some());
    }

    #[tokio::test]
    async fn admit_waits_for_capacity() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let held = gate.try_admit().unwrap();

        let waiter = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.admit().await.is_some() }
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn closed_gate_refuses_admission() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.try_admit();
        gate.close();
        assert!(gate.admit().await.is_none());
        assert!(gate.try_admit().is_none());
        drop(held);
    }
}
