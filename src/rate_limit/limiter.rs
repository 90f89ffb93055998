//! Per-route admission budget.
//!
//! A [`RouteLimiter`] enforces one of two policies:
//!
//! - **Concurrency-bounded**: at most `N` outstanding reservations. Releasing a
//!   reservation frees its slot.
//! - **Rate-bounded**: at most one admission per fixed interval, regardless of
//!   how many calls are still outstanding. Releasing is a no-op.
//!
//! The occupancy counter is atomic. The policy itself sits behind a per-route
//! lock that is only written on reconfiguration, so the gate's route map is
//! never locked on the admission path.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Notify;

use crate::rate_limit::RouteKey;

/// Admission policy of a single route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LimitPolicy {
    /// Never blocks on the route; only the global ceiling applies.
    #[default]
    Unbounded,
    /// At most this many outstanding reservations. Zero denies every call.
    Concurrency(usize),
    /// At most one admission per interval.
    Interval(Duration),
}

impl LimitPolicy {
    /// The fail-safe policy: no budget at all.
    pub const fn deny() -> Self {
        LimitPolicy::Concurrency(0)
    }

    /// Whether this policy refuses every call.
    pub fn is_denied(&self) -> bool {
        matches!(self, LimitPolicy::Concurrency(0))
    }
}

/// What a successful reservation holds, so it is released under the policy
/// it was made with even if the route is reconfigured meanwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// No per-route state was taken.
    Free,
    /// One concurrency slot is occupied until released.
    Slot,
    /// One interval tick was consumed; nothing to give back.
    Tick,
}

/// Why a reservation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    /// All concurrency slots are taken.
    Full,
    /// The interval has not elapsed; try again after the hint.
    NotBefore(Duration),
    /// The route is configured with zero capacity.
    Denied,
}

type Pacer = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shortest wait hint handed to a refused caller, so sub-millisecond
/// intervals do not turn the admission loop into a spin.
const MIN_WAIT_HINT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct PolicyState {
    policy: LimitPolicy,
    pacer: Option<Pacer>,
}

impl PolicyState {
    fn new(policy: LimitPolicy) -> Self {
        let pacer = match policy {
            LimitPolicy::Interval(interval) => Quota::with_period(interval)
                .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN))),
            _ => None,
        };
        Self { policy, pacer }
    }
}

/// Concurrency or rate budget of one route, plus its current occupancy.
#[derive(Debug)]
pub struct RouteLimiter {
    key: RouteKey,
    state: RwLock<PolicyState>,
    outstanding: AtomicUsize,
    admitted: AtomicU64,
    changed: Notify,
}

impl RouteLimiter {
    /// Create a limiter for `key` under `policy`.
    pub fn new(key: RouteKey, policy: LimitPolicy) -> Self {
        Self {
            key,
            state: RwLock::new(PolicyState::new(policy)),
            outstanding: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    /// The route this limiter governs.
    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    /// The current policy.
    pub fn policy(&self) -> LimitPolicy {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .policy
    }

    /// Concurrency slots currently held.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Total admissions granted since creation.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Try to reserve capacity without waiting.
    ///
    /// Returns the reservation to hand back to [`RouteLimiter::release`], or
    /// `None` if the route has no spare capacity right now.
    pub fn try_reserve(&self) -> Option<Reservation> {
        self.reserve().ok()
    }

    pub(crate) fn reserve(&self) -> Result<Reservation, Refusal> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let reservation = match state.policy {
            LimitPolicy::Unbounded => Reservation::Free,
            LimitPolicy::Concurrency(0) => return Err(Refusal::Denied),
            LimitPolicy::Concurrency(capacity) => {
                self.outstanding
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                        (held < capacity).then_some(held + 1)
                    })
                    .map_err(|_| Refusal::Full)?;
                Reservation::Slot
            }
            LimitPolicy::Interval(interval) => {
                if let Some(pacer) = state.pacer.as_ref() {
                    pacer.check().map_err(|not_until| {
                        let wait = not_until.wait_time_from(DefaultClock::default().now());
                        Refusal::NotBefore(wait.min(interval).max(MIN_WAIT_HINT))
                    })?;
                }
                Reservation::Tick
            }
        };
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(reservation)
    }

    /// Give back a reservation made by this limiter.
    pub fn release(&self, reservation: Reservation) {
        if reservation != Reservation::Slot {
            return;
        }
        // Saturate so that a stray release can never wrap the counter.
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            });
        self.changed.notify_waiters();
    }

    /// Swap the policy. Reservations made under the old policy stay valid
    /// until released.
    ///
    /// Re-applying the current policy keeps the interval pacer, so spacing
    /// already in effect is not reset.
    pub fn reconfigure(&self, policy: LimitPolicy) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.policy != policy {
                *state = PolicyState::new(policy);
            }
        }
        self.changed.notify_waiters();
    }

    /// Notified whenever a slot frees up or the policy changes.
    pub(crate) fn changed(&self) -> &Notify {
        &self.changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RouteKey {
        RouteKey::rest("POST", "/api/v1/trade/order")
    }

    #[test]
    fn test_concurrency_bound() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::Concurrency(2));

        let first = limiter.try_reserve();
        let second = limiter.try_reserve();
        assert_eq!(first, Some(Reservation::Slot));
        assert_eq!(second, Some(Reservation::Slot));
        assert_eq!(limiter.try_reserve(), None);
        assert_eq!(limiter.outstanding(), 2);

        limiter.release(Reservation::Slot);
        assert_eq!(limiter.outstanding(), 1);
        assert!(limiter.try_reserve().is_some());
    }

    #[test]
    fn test_zero_capacity_denies() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::deny());
        assert_eq!(limiter.reserve(), Err(Refusal::Denied));
        assert_eq!(limiter.outstanding(), 0);
    }

    #[test]
    fn test_unbounded_never_blocks() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::Unbounded);
        for _ in 0..1_000 {
            assert_eq!(limiter.try_reserve(), Some(Reservation::Free));
        }
        assert_eq!(limiter.outstanding(), 0);
        assert_eq!(limiter.admitted(), 1_000);
    }

    #[test]
    fn test_interval_spaces_admissions() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::Interval(Duration::from_millis(50)));

        assert_eq!(limiter.try_reserve(), Some(Reservation::Tick));
        match limiter.reserve() {
            Err(Refusal::NotBefore(wait)) => assert!(wait <= Duration::from_millis(50)),
            other => panic!("expected interval refusal, got {other:?}"),
        }

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(limiter.try_reserve(), Some(Reservation::Tick));
    }

    #[test]
    fn test_interval_release_is_noop() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::Interval(Duration::from_secs(1)));
        let reservation = limiter.try_reserve().unwrap();
        limiter.release(reservation);
        assert_eq!(limiter.outstanding(), 0);
        assert!(limiter.try_reserve().is_none());
    }

    #[test]
    fn test_reconfigure_keeps_inflight_reservations() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::Concurrency(3));
        let held: Vec<_> = (0..3).filter_map(|_| limiter.try_reserve()).collect();
        assert_eq!(held.len(), 3);

        limiter.reconfigure(LimitPolicy::Concurrency(1));
        assert_eq!(limiter.policy(), LimitPolicy::Concurrency(1));
        assert_eq!(limiter.outstanding(), 3);
        assert!(limiter.try_reserve().is_none());

        for reservation in held {
            limiter.release(reservation);
        }
        assert_eq!(limiter.outstanding(), 0);
        assert!(limiter.try_reserve().is_some());
        assert!(limiter.try_reserve().is_none());
    }

    #[test]
    fn test_sub_millisecond_interval_refusal() {
        let interval = Duration::from_secs(1) / 2000;
        let limiter = RouteLimiter::new(key(), LimitPolicy::Interval(interval));

        assert_eq!(limiter.try_reserve(), Some(Reservation::Tick));
        match limiter.reserve() {
            Err(Refusal::NotBefore(wait)) => assert_eq!(wait, MIN_WAIT_HINT),
            // The interval may already have passed on a slow machine.
            Ok(reservation) => assert_eq!(reservation, Reservation::Tick),
            Err(other) => panic!("expected interval refusal, got {other:?}"),
        }
    }

    #[test]
    fn test_reapplying_interval_keeps_spacing() {
        let policy = LimitPolicy::Interval(Duration::from_secs(60));
        let limiter = RouteLimiter::new(key(), policy);
        assert!(limiter.try_reserve().is_some());

        limiter.reconfigure(policy);
        assert!(limiter.try_reserve().is_none());

        limiter.reconfigure(LimitPolicy::Interval(Duration::from_secs(30)));
        assert!(limiter.try_reserve().is_some());
    }

    #[test]
    fn test_stray_release_saturates() {
        let limiter = RouteLimiter::new(key(), LimitPolicy::Concurrency(1));
        limiter.release(Reservation::Slot);
        assert_eq!(limiter.outstanding(), 0);
    }
}
