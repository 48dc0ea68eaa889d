// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The retry budget used by every dispatch site.
//!
//! A [`Backoffer`] carries a "max total sleep" budget for one user-level
//! operation. Retry sites charge named, jittered sleeps against it
//! (`regionMiss` being the common one); when the budget runs out the backoffer
//! reports the dominant backoff kind (the one that slept longest) and the
//! operation fails with a retry-exhausted classification.
//!
//! Fan-out uses [`Backoffer::fork`]: the child shares the parent's remaining
//! budget accounting but has its own cancel handle, so the first failing
//! sibling can abort the others' pending sleeps (and in-flight waits raced
//! against [`Backoffer::canceled`]) without touching the parent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

/// How much `serverBusy` sleep is tolerated beyond the ordinary budget.
const SERVER_BUSY_EXCLUDED_MAX_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Jitter {
    NoJitter,
    FullJitter,
    EqualJitter,
    DecorrJitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackoffFnCfg {
    base_ms: u64,
    cap_ms: u64,
    jitter: Jitter,
}

impl BackoffFnCfg {
    pub(crate) const fn new(base_ms: u64, cap_ms: u64, jitter: Jitter) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter,
        }
    }
}

/// The classification a backoff site reports when the budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffErrorKind {
    RegionUnavailable,
    PlacementTimeout,
    ServerBusy,
}

impl std::fmt::Display for BackoffErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackoffErrorKind::RegionUnavailable => "region unavailable",
            BackoffErrorKind::PlacementTimeout => "placement directory timeout",
            BackoffErrorKind::ServerBusy => "server busy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackofferError {
    /// The budget's context was cancelled; preserves the original error
    /// message.
    #[error("{message}")]
    Canceled { message: String },

    /// Max sleep budget exceeded. Reports the dominant backoff kind (the one
    /// with the longest cumulative sleep) and wraps the last cause.
    #[error("{kind}: {last_cause}")]
    MaxSleepExceeded {
        kind: BackoffErrorKind,
        last_cause: String,
    },

    /// Max sleep exceeded with no non-excluded sleep candidates (only
    /// `serverBusy` has slept so far).
    #[error("{message}")]
    Other { message: String },
}

impl BackofferError {
    pub fn kind(&self) -> Option<BackoffErrorKind> {
        match self {
            BackofferError::MaxSleepExceeded { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackoffConfig {
    name: &'static str,
    fn_cfg: BackoffFnCfg,
    err_kind: BackoffErrorKind,
}

impl BackoffConfig {
    pub(crate) const fn new(
        name: &'static str,
        fn_cfg: BackoffFnCfg,
        err_kind: BackoffErrorKind,
    ) -> Self {
        Self {
            name,
            fn_cfg,
            err_kind,
        }
    }
}

/// Stale routing information; the cache refreshes quickly, so the curve stays
/// short and deterministic.
pub(crate) const BO_REGION_MISS: BackoffConfig = BackoffConfig::new(
    "regionMiss",
    BackoffFnCfg::new(2, 500, Jitter::NoJitter),
    BackoffErrorKind::RegionUnavailable,
);

pub(crate) const BO_PLACEMENT_RPC: BackoffConfig = BackoffConfig::new(
    "placementRpc",
    BackoffFnCfg::new(500, 3000, Jitter::EqualJitter),
    BackoffErrorKind::PlacementTimeout,
);

pub(crate) const BO_SERVER_BUSY: BackoffConfig = BackoffConfig::new(
    "serverBusy",
    BackoffFnCfg::new(2000, 10_000, Jitter::EqualJitter),
    BackoffErrorKind::ServerBusy,
);

/// Whether sleeps for `cfg_name` go to the excluded bucket instead of the
/// ordinary budget.
fn is_excluded(cfg_name: &str) -> bool {
    cfg_name == BO_SERVER_BUSY.name
}

/// The sleep curve for one backoff reason: an exponential that doubles per
/// attempt up to the cap, shaped by the configured jitter.
#[derive(Debug)]
struct BackoffFnState {
    base_ms: u64,
    cap_ms: u64,
    jitter: Jitter,
    /// The next no-jitter sleep, doubled after every attempt (uncapped, so
    /// the doubling survives the clamp).
    uncapped_ms: u64,
    /// The previous actual sleep; feeds the decorrelated jitter.
    prev_sleep_ms: u64,
}

impl BackoffFnState {
    fn new(cfg: BackoffFnCfg) -> Self {
        // Floor the base so the jitter ranges below stay non-empty.
        let base_ms = cfg.base_ms.max(2);
        let cap_ms = cfg.cap_ms.max(base_ms);
        Self {
            base_ms,
            cap_ms,
            jitter: cfg.jitter,
            uncapped_ms: base_ms,
            prev_sleep_ms: base_ms,
        }
    }

    fn backoff_ms(&mut self) -> u64 {
        let capped_ms = self.uncapped_ms.min(self.cap_ms);
        let sleep_ms = match self.jitter {
            Jitter::NoJitter => capped_ms,
            Jitter::FullJitter => thread_rng().gen_range(0..capped_ms),
            Jitter::EqualJitter => {
                let floor_ms = capped_ms / 2;
                floor_ms + thread_rng().gen_range(0..floor_ms)
            }
            Jitter::DecorrJitter => {
                // Decorrelated from the exponential: anywhere between the
                // base and three times the previous sleep.
                let upper_ms = self
                    .prev_sleep_ms
                    .saturating_mul(3)
                    .max(self.base_ms + 1);
                thread_rng()
                    .gen_range(self.base_ms..upper_ms)
                    .min(self.cap_ms)
            }
        };
        self.uncapped_ms = self.uncapped_ms.saturating_mul(2);
        self.prev_sleep_ms = sleep_ms;
        sleep_ms
    }
}

#[derive(Debug)]
struct BackoffContextInner {
    parent: Option<Arc<BackoffContextInner>>,
    canceled: watch::Sender<bool>,
}

/// A cancellation tree node. Cancelling a node cancels its whole subtree;
/// ancestors are unaffected.
#[derive(Debug, Clone)]
pub(crate) struct BackoffContext {
    inner: Arc<BackoffContextInner>,
}

impl BackoffContext {
    pub(crate) fn new() -> (Self, BackoffCancel) {
        Self::build(None)
    }

    fn with_cancel(&self) -> (Self, BackoffCancel) {
        Self::build(Some(self.inner.clone()))
    }

    fn build(parent: Option<Arc<BackoffContextInner>>) -> (Self, BackoffCancel) {
        let (canceled, _) = watch::channel(false);
        let inner = Arc::new(BackoffContextInner { parent, canceled });
        (
            Self {
                inner: inner.clone(),
            },
            BackoffCancel { inner },
        )
    }

    /// This node and its ancestors, leaf first.
    fn lineage(&self) -> impl Iterator<Item = &BackoffContextInner> {
        std::iter::successors(Some(&*self.inner), |node| node.parent.as_deref())
    }

    fn is_canceled(&self) -> bool {
        self.lineage().any(|node| *node.canceled.borrow())
    }

    /// Resolves when this node or any of its ancestors is cancelled.
    async fn canceled(&self) {
        let mut receivers: Vec<watch::Receiver<bool>> = self
            .lineage()
            .map(|node| node.canceled.subscribe())
            .collect();
        loop {
            if receivers.iter().any(|rx| *rx.borrow()) {
                return;
            }
            let changed = receivers.iter_mut().map(|rx| Box::pin(rx.changed()));
            let (res, _, _) = futures::future::select_all(changed).await;
            if res.is_err() {
                // A dropped sender means the subtree is gone.
                return;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BackoffCancel {
    inner: Arc<BackoffContextInner>,
}

impl BackoffCancel {
    pub(crate) fn cancel(&self) {
        let _ = self.inner.canceled.send_replace(true);
    }
}

/// A backoff budget with a total-sleep cap and an "excluded sleep" bucket for
/// `serverBusy` (a busy server may legitimately need more waiting than the
/// routing budget allows).
#[derive(Debug)]
pub(crate) struct Backoffer {
    ctx: BackoffContext,
    max_sleep_ms: u64,
    excluded_max_ms: u64,
    total_sleep_ms: u64,
    excluded_sleep_ms: u64,

    errors: Vec<String>,
    configs: Vec<BackoffConfig>,
    backoff_sleep_ms: HashMap<&'static str, u64>,
    backoff_times: HashMap<&'static str, u64>,

    // Per-config sleep-curve state. Not carried into forks.
    fns: HashMap<&'static str, BackoffFnState>,
}

impl Backoffer {
    pub(crate) fn new(ctx: BackoffContext, max_sleep_ms: u64) -> Self {
        Self {
            ctx,
            max_sleep_ms,
            excluded_max_ms: SERVER_BUSY_EXCLUDED_MAX_MS,
            total_sleep_ms: 0,
            excluded_sleep_ms: 0,
            errors: Vec::new(),
            configs: Vec::new(),
            backoff_sleep_ms: HashMap::new(),
            backoff_times: HashMap::new(),
            fns: HashMap::new(),
        }
    }

    /// A child budget sharing this budget's sleep accounting, with its own
    /// cancel handle. Cancelling the child aborts pending sleeps and raced
    /// waits in the child's subtree only; cancelling the parent covers all
    /// descendants.
    pub(crate) fn fork(&self) -> (Self, BackoffCancel) {
        let (ctx, cancel) = self.ctx.with_cancel();
        (
            Self {
                ctx,
                max_sleep_ms: self.max_sleep_ms,
                excluded_max_ms: self.excluded_max_ms,
                total_sleep_ms: self.total_sleep_ms,
                excluded_sleep_ms: self.excluded_sleep_ms,
                errors: self.errors.clone(),
                configs: self.configs.clone(),
                backoff_sleep_ms: self.backoff_sleep_ms.clone(),
                backoff_times: self.backoff_times.clone(),
                fns: HashMap::new(),
            },
            cancel,
        )
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.ctx.is_canceled()
    }

    /// Resolves when this budget's subtree is cancelled. Race in-flight waits
    /// against this to honor sibling cancellation.
    pub(crate) async fn canceled(&self) {
        self.ctx.canceled().await
    }

    /// The backoff config that slept the longest so far, excluded buckets
    /// aside. Its kind is what a budget-exhaustion error reports.
    fn longest_sleep_cfg(&self) -> Option<(BackoffConfig, u64)> {
        let (&name, &sleep_ms) = self
            .backoff_sleep_ms
            .iter()
            .filter(|(name, _)| !is_excluded(name))
            .max_by_key(|(_, sleep_ms)| **sleep_ms)?;
        self.configs
            .iter()
            .find(|cfg| cfg.name == name)
            .map(|cfg| (*cfg, sleep_ms))
    }

    /// Charge one sleep for `cfg` against the budget and perform it.
    ///
    /// Returns an error when the context is cancelled (now or mid-sleep) or
    /// the budget is exhausted; the error wraps `err_message` or the dominant
    /// backoff kind.
    pub(crate) async fn backoff(
        &mut self,
        cfg: &BackoffConfig,
        err_message: impl Into<String>,
    ) -> Result<(), BackofferError> {
        let err_message = err_message.into();

        if self.ctx.is_canceled() {
            return Err(BackofferError::Canceled {
                message: err_message,
            });
        }

        let max_backoff_time_exceeded = self.max_sleep_ms > 0
            && (self.total_sleep_ms - self.excluded_sleep_ms) >= self.max_sleep_ms;
        let max_excluded_time_exceeded = is_excluded(cfg.name)
            && self.excluded_sleep_ms >= self.excluded_max_ms
            && self.excluded_sleep_ms >= self.max_sleep_ms;

        if self.max_sleep_ms > 0 && (max_backoff_time_exceeded || max_excluded_time_exceeded) {
            return match self.longest_sleep_cfg() {
                Some((cfg, _)) => Err(BackofferError::MaxSleepExceeded {
                    kind: cfg.err_kind,
                    last_cause: err_message,
                }),
                None => Err(BackofferError::Other {
                    message: err_message,
                }),
            };
        }

        self.errors.push(err_message.clone());
        self.configs.push(*cfg);

        let state = self
            .fns
            .entry(cfg.name)
            .or_insert_with(|| BackoffFnState::new(cfg.fn_cfg));
        let real_sleep_ms = state.backoff_ms();

        self.total_sleep_ms += real_sleep_ms;
        if is_excluded(cfg.name) {
            self.excluded_sleep_ms += real_sleep_ms;
        }
        *self.backoff_sleep_ms.entry(cfg.name).or_default() += real_sleep_ms;
        *self.backoff_times.entry(cfg.name).or_default() += 1;

        log::debug!(
            "backoff {} sleeps {}ms: {}",
            cfg.name,
            real_sleep_ms,
            err_message
        );
        crate::stats::observe_backoff_sleep(cfg.name, Duration::from_millis(real_sleep_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(real_sleep_ms)) => Ok(()),
            _ = self.ctx.canceled() => Err(BackofferError::Canceled {
                message: err_message,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn total_sleep_ms(&self) -> u64 {
        self.total_sleep_ms
    }

    #[cfg(test)]
    pub(crate) fn backoff_times(&self, cfg: &BackoffConfig) -> u64 {
        self.backoff_times.get(cfg.name).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn backoff_charges_budget_and_counts_attempts() {
        let (ctx, _cancel) = BackoffContext::new();
        let mut b = Backoffer::new(ctx, 2000);
        b.backoff(&BO_REGION_MISS, "region miss").await.unwrap();
        b.backoff(&BO_REGION_MISS, "region miss").await.unwrap();
        // NoJitter regionMiss sleeps are deterministic: 2ms then 4ms.
        assert_eq!(b.total_sleep_ms(), 6);
        assert_eq!(b.backoff_times(&BO_REGION_MISS), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_error_uses_longest_sleep_kind() {
        let (ctx, _cancel) = BackoffContext::new();
        let mut b = Backoffer::new(ctx, 800);

        b.backoff(&BO_REGION_MISS, "region miss").await.unwrap(); // 2ms

        // Excluded sleep does not count towards the cap.
        b.backoff(&BO_SERVER_BUSY, "server is busy").await.unwrap();

        for _ in 0..15 {
            match b.backoff(&BO_PLACEMENT_RPC, "placement timeout").await {
                Ok(()) => {}
                Err(e) => {
                    assert_eq!(e.kind(), Some(BackoffErrorKind::PlacementTimeout), "{e:?}");
                    return;
                }
            }
        }

        panic!("expected the backoff to exceed max sleep");
    }

    #[tokio::test(start_paused = true)]
    async fn forked_budget_shares_spent_sleep() {
        let (ctx, _cancel) = BackoffContext::new();
        let mut b = Backoffer::new(ctx, 10);

        for _ in 0..3 {
            b.backoff(&BO_REGION_MISS, "region miss").await.unwrap();
        }

        let (mut forked, _fork_cancel) = b.fork();
        let e = forked
            .backoff(&BO_REGION_MISS, "region miss")
            .await
            .unwrap_err();
        assert_eq!(e.kind(), Some(BO_REGION_MISS.err_kind), "{e:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_pending_sleep() {
        let (ctx, cancel) = BackoffContext::new();
        let mut b = Backoffer::new(ctx, 600_000);
        // Charge some attempts so the next sleep is long enough to observe.
        for _ in 0..9 {
            b.backoff(&BO_REGION_MISS, "region miss").await.unwrap();
        }

        let handle = tokio::spawn(async move {
            b.backoff(&BO_REGION_MISS, "region miss").await
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(BackofferError::Canceled { .. })), "{res:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_parent_covers_children_but_not_reverse() {
        let (ctx, parent_cancel) = BackoffContext::new();
        let parent = Backoffer::new(ctx, 600_000);
        let (child, child_cancel) = parent.fork();
        let (sibling, _sibling_cancel) = parent.fork();

        child_cancel.cancel();
        assert!(child.is_canceled());
        assert!(!sibling.is_canceled());
        assert!(!parent.is_canceled());

        parent_cancel.cancel();
        assert!(sibling.is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn already_canceled_context_fails_fast() {
        let (ctx, cancel) = BackoffContext::new();
        cancel.cancel();
        let mut b = Backoffer::new(ctx, 2000);
        let e = b.backoff(&BO_REGION_MISS, "region miss").await.unwrap_err();
        assert!(matches!(e, BackofferError::Canceled { .. }));
        assert_eq!(b.total_sleep_ms(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_sleep_exceeding_both_limits_errors() {
        let (ctx, _cancel) = BackoffContext::new();
        let mut b = Backoffer::new(ctx, 1);
        b.excluded_max_ms = 1;

        b.backoff(&BO_SERVER_BUSY, "server is busy").await.unwrap();
        let e = b
            .backoff(&BO_SERVER_BUSY, "server is busy")
            .await
            .unwrap_err();
        // Only excluded sleeps so far, so no dominant kind to report.
        assert!(matches!(e, BackofferError::Other { .. }), "{e:?}");
    }

    #[test]
    fn full_and_decorr_jitter_are_bounded() {
        let mut full = BackoffFnState::new(BackoffFnCfg::new(2, 7, Jitter::FullJitter));
        let d1 = full.backoff_ms();
        assert!(d1 <= 7);

        let mut decorr = BackoffFnState::new(BackoffFnCfg::new(2, 7, Jitter::DecorrJitter));
        let d2 = decorr.backoff_ms();
        assert!(d2 >= 2);
        assert!(d2 <= 7);
    }

    #[test]
    fn no_jitter_curve_is_monotone_and_capped() {
        let mut state = BackoffFnState::new(BackoffFnCfg::new(2, 500, Jitter::NoJitter));
        let mut last = 0;
        for _ in 0..12 {
            let v = state.backoff_ms();
            assert!(v >= last);
            assert!(v <= 500);
            last = v;
        }
        assert_eq!(last, 500);
    }
}
