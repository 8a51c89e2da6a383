//! Optimistic like/follow/reshare bookkeeping.
//!
//! Sans-IO: the coordinator never talks to the network itself. `toggle` and
//! `confirm` hand back the request the caller must send; the caller reports
//! the outcome with `confirm` or `fail`. At most one request per target is
//! in flight, so the server sees a strictly alternating sequence of toggles.

use std::collections::BTreeMap;

use crate::api::ToggleOutcome;
use crate::error::SeedError;
use crate::state::{MutationKind, SocialTargetState};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub kind: MutationKind,
    pub id: String,
}

impl TargetKey {
    pub fn new(kind: MutationKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Snapshot {
    value: bool,
    count: u64,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    sent_value: bool,
    rollback: Snapshot,
}

#[derive(Clone, Debug, Default)]
struct MutationTarget {
    value: bool,
    count: u64,
    in_flight: Option<InFlight>,
    /// Latest user intent recorded while a request was in flight.
    desired: Option<bool>,
    /// Unmounted by the UI; dropped as soon as it goes idle.
    released: bool,
}

/// A toggle request the caller must send for `key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingToggle {
    pub key: TargetKey,
    /// Sent to undo a server state the user no longer wants.
    pub compensating: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetView {
    pub value: bool,
    pub count: u64,
    pub pending: bool,
    pub desired: Option<bool>,
}

#[derive(Debug, Default)]
pub struct MutationCoordinator {
    targets: BTreeMap<TargetKey, MutationTarget>,
}

fn shift(count: u64, from: bool, to: bool) -> u64 {
    match (from, to) {
        (false, true) => count + 1,
        (true, false) => count.saturating_sub(1),
        _ => count,
    }
}

impl MutationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt server state for a target the UI is showing. Rejected while a
    /// request is in flight so a pending compensation is never overwritten.
    pub fn seed(&mut self, key: TargetKey, value: bool, count: u64) -> Result<(), SeedError> {
        let target = self.targets.entry(key).or_default();
        if target.in_flight.is_some() {
            return Err(SeedError::Pending);
        }
        target.value = value;
        target.count = count;
        target.desired = None;
        target.released = false;
        Ok(())
    }

    pub fn toggle(&mut self, key: TargetKey) -> Option<PendingToggle> {
        let target = self.targets.entry(key.clone()).or_default();
        target.released = false;
        let next = !target.value;
        let before = Snapshot {
            value: target.value,
            count: target.count,
        };
        target.value = next;
        target.count = shift(target.count, before.value, next);

        if target.in_flight.is_some() {
            // Coalesce: the in-flight request settles first.
            target.desired = Some(next);
            tracing::debug!(kind = key.kind.as_str(), target_id = %key.id, desired = next, "toggle: coalesced");
            return None;
        }

        target.in_flight = Some(InFlight {
            sent_value: next,
            rollback: before,
        });
        Some(PendingToggle {
            key,
            compensating: false,
        })
    }

    /// The in-flight request for `key` succeeded. Returns a compensating
    /// request when the user changed their mind meanwhile.
    pub fn confirm(&mut self, key: &TargetKey, outcome: ToggleOutcome) -> Option<PendingToggle> {
        let Some(target) = self.targets.get_mut(key) else {
            tracing::warn!(kind = key.kind.as_str(), target_id = %key.id, "toggle: confirm for unknown target");
            return None;
        };
        let Some(flight) = target.in_flight.take() else {
            tracing::warn!(kind = key.kind.as_str(), target_id = %key.id, "toggle: confirm without request in flight");
            return None;
        };

        let server_value = outcome.active;
        let server_count = outcome
            .count
            .unwrap_or_else(|| shift(flight.rollback.count, flight.rollback.value, server_value));
        if flight.sent_value != server_value {
            tracing::info!(
                kind = key.kind.as_str(),
                target_id = %key.id,
                server_value,
                "toggle: server state differs from what was sent"
            );
        }

        match target.desired.take() {
            Some(desired) if desired != server_value => {
                target.value = desired;
                target.count = shift(server_count, server_value, desired);
                target.in_flight = Some(InFlight {
                    sent_value: desired,
                    rollback: Snapshot {
                        value: server_value,
                        count: server_count,
                    },
                });
                tracing::info!(kind = key.kind.as_str(), target_id = %key.id, desired, "toggle: compensating");
                Some(PendingToggle {
                    key: key.clone(),
                    compensating: true,
                })
            }
            _ => {
                target.value = server_value;
                target.count = server_count;
                self.drop_if_released(key);
                None
            }
        }
    }

    /// The in-flight request for `key` failed: restore the pre-request state
    /// and forget any intent recorded meanwhile.
    pub fn fail(&mut self, key: &TargetKey) -> Option<TargetView> {
        let target = self.targets.get_mut(key)?;
        let flight = target.in_flight.take()?;
        target.value = flight.rollback.value;
        target.count = flight.rollback.count;
        target.desired = None;
        let view = Self::view_of(target);
        self.drop_if_released(key);
        Some(view)
    }

    pub fn release(&mut self, key: &TargetKey) {
        let Some(target) = self.targets.get_mut(key) else {
            return;
        };
        target.released = true;
        self.drop_if_released(key);
    }

    pub fn view(&self, key: &TargetKey) -> Option<TargetView> {
        self.targets.get(key).map(Self::view_of)
    }

    pub fn is_pending(&self, key: &TargetKey) -> bool {
        self.targets
            .get(key)
            .map(|t| t.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Forget every target (identity changed). Results still in flight are
    /// ignored when they arrive.
    pub fn reset(&mut self) {
        self.targets.clear();
    }

    pub fn states(&self) -> Vec<SocialTargetState> {
        self.targets
            .iter()
            .map(|(key, t)| SocialTargetState {
                kind: key.kind,
                target_id: key.id.clone(),
                active: t.value,
                count: t.count,
                pending: t.in_flight.is_some(),
            })
            .collect()
    }

    fn view_of(target: &MutationTarget) -> TargetView {
        TargetView {
            value: target.value,
            count: target.count,
            pending: target.in_flight.is_some(),
            desired: target.desired,
        }
    }

    fn drop_if_released(&mut self, key: &TargetKey) {
        let idle_and_released = self
            .targets
            .get(key)
            .map(|t| t.released && t.in_flight.is_none())
            .unwrap_or(false);
        if idle_and_released {
            self.targets.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn like(id: &str) -> TargetKey {
        TargetKey::new(MutationKind::Like, id)
    }

    fn follow(id: &str) -> TargetKey {
        TargetKey::new(MutationKind::Follow, id)
    }

    /// Server that flips its relation on every toggle it receives.
    struct Server {
        value: bool,
        count: u64,
        calls: usize,
    }

    impl Server {
        fn handle(&mut self) -> ToggleOutcome {
            self.calls += 1;
            self.value = !self.value;
            self.count = shift(self.count, !self.value, self.value);
            ToggleOutcome {
                active: self.value,
                count: Some(self.count),
            }
        }
    }

    #[test]
    fn idle_toggle_applies_immediately_and_sends_once() {
        let mut c = MutationCoordinator::new();
        c.seed(like("42"), false, 3).unwrap();

        let req = c.toggle(like("42")).unwrap();
        assert!(!req.compensating);
        let v = c.view(&like("42")).unwrap();
        assert_eq!((v.value, v.count, v.pending), (true, 4, true));
    }

    #[test]
    fn failure_restores_pre_toggle_state() {
        let mut c = MutationCoordinator::new();
        c.seed(like("42"), false, 3).unwrap();
        c.toggle(like("42")).unwrap();

        let v = c.fail(&like("42")).unwrap();
        assert_eq!((v.value, v.count, v.pending), (false, 3, false));
    }

    #[test]
    fn failure_discards_intent_recorded_while_pending() {
        let mut c = MutationCoordinator::new();
        c.seed(like("7"), true, 10).unwrap();
        c.toggle(like("7")).unwrap();
        assert!(c.toggle(like("7")).is_none());
        assert!(c.toggle(like("7")).is_none());

        let v = c.fail(&like("7")).unwrap();
        assert_eq!((v.value, v.count, v.desired), (true, 10, None));
    }

    #[test]
    fn untap_before_response_sends_one_compensation() {
        let mut c = MutationCoordinator::new();
        let carol = follow("carol");
        c.seed(carol.clone(), false, 5).unwrap();
        let mut server = Server { value: false, count: 5, calls: 0 };

        c.toggle(carol.clone()).unwrap();
        assert!(c.toggle(carol.clone()).is_none());
        let v = c.view(&carol).unwrap();
        assert_eq!((v.value, v.count), (false, 5));

        let comp = c.confirm(&carol, server.handle()).unwrap();
        assert!(comp.compensating);
        assert!(c.is_pending(&carol));

        assert!(c.confirm(&carol, server.handle()).is_none());
        let v = c.view(&carol).unwrap();
        assert_eq!((v.value, v.count, v.pending), (false, 5, false));
        assert_eq!(server.calls, 2);
    }

    #[test]
    fn odd_rapid_toggles_coalesce_into_single_request() {
        let mut c = MutationCoordinator::new();
        let mut server = Server { value: false, count: 0, calls: 0 };
        c.toggle(like("1")).unwrap();
        c.toggle(like("1"));
        c.toggle(like("1"));

        assert!(c.confirm(&like("1"), server.handle()).is_none());
        let v = c.view(&like("1")).unwrap();
        assert_eq!((v.value, v.count), (true, 1));
        assert_eq!(server.calls, 1);
    }

    #[test]
    fn any_toggle_burst_converges_to_server_truth() {
        for taps in 1..10usize {
            let mut c = MutationCoordinator::new();
            let key = like("9");
            c.seed(key.clone(), false, 20).unwrap();
            let mut server = Server { value: false, count: 20, calls: 0 };

            let mut outgoing = c.toggle(key.clone());
            for _ in 1..taps {
                assert!(c.toggle(key.clone()).is_none());
            }
            while outgoing.is_some() {
                outgoing = c.confirm(&key, server.handle());
            }

            let v = c.view(&key).unwrap();
            let want = taps % 2 == 1;
            assert_eq!(v.value, want, "taps={taps}");
            assert_eq!((v.value, v.count), (server.value, server.count), "taps={taps}");
            assert!(server.calls <= 2, "taps={taps}");
            assert!(!v.pending);
        }
    }

    #[test]
    fn server_count_is_authoritative() {
        let mut c = MutationCoordinator::new();
        c.seed(like("42"), false, 3).unwrap();
        c.toggle(like("42")).unwrap();

        c.confirm(&like("42"), ToggleOutcome { active: true, count: Some(11) });
        let v = c.view(&like("42")).unwrap();
        assert_eq!((v.value, v.count), (true, 11));
    }

    #[test]
    fn missing_count_adjusts_pre_toggle_count_by_confirmed_change() {
        let mut c = MutationCoordinator::new();
        c.seed(follow("dave"), true, 8).unwrap();
        c.toggle(follow("dave")).unwrap();

        // Someone else already unfollowed on another device: server reports unfollowed.
        c.confirm(&follow("dave"), ToggleOutcome { active: false, count: None });
        let v = c.view(&follow("dave")).unwrap();
        assert_eq!((v.value, v.count), (false, 7));
    }

    #[test]
    fn compensation_failure_rolls_back_to_confirmed_state() {
        let mut c = MutationCoordinator::new();
        c.seed(like("5"), false, 0).unwrap();
        c.toggle(like("5")).unwrap();
        c.toggle(like("5"));

        let comp = c.confirm(&like("5"), ToggleOutcome { active: true, count: Some(1) });
        assert!(comp.is_some());
        let v = c.fail(&like("5")).unwrap();
        assert_eq!((v.value, v.count), (true, 1));
    }

    #[test]
    fn seeding_pending_target_is_rejected() {
        let mut c = MutationCoordinator::new();
        c.seed(like("42"), false, 3).unwrap();
        c.toggle(like("42")).unwrap();

        assert_eq!(c.seed(like("42"), false, 3), Err(SeedError::Pending));
        let v = c.view(&like("42")).unwrap();
        assert_eq!((v.value, v.count), (true, 4));

        c.confirm(&like("42"), ToggleOutcome { active: true, count: Some(4) });
        assert_eq!(c.seed(like("42"), true, 6), Ok(()));
    }

    #[test]
    fn unseeded_target_starts_empty() {
        let mut c = MutationCoordinator::new();
        c.toggle(follow("erin")).unwrap();
        let v = c.view(&follow("erin")).unwrap();
        assert_eq!((v.value, v.count), (true, 1));
    }

    #[test]
    fn release_waits_for_in_flight_request() {
        let mut c = MutationCoordinator::new();
        c.seed(like("3"), false, 0).unwrap();
        c.toggle(like("3")).unwrap();
        c.toggle(like("3"));

        c.release(&like("3"));
        assert!(c.view(&like("3")).is_some());

        let comp = c.confirm(&like("3"), ToggleOutcome { active: true, count: Some(1) });
        assert!(comp.is_some());
        assert!(c.view(&like("3")).is_some());

        c.confirm(&like("3"), ToggleOutcome { active: false, count: Some(0) });
        assert!(c.view(&like("3")).is_none());

        c.seed(like("4"), false, 0).unwrap();
        c.release(&like("4"));
        assert!(c.view(&like("4")).is_none());
    }

    #[test]
    fn stray_results_are_ignored() {
        let mut c = MutationCoordinator::new();
        assert!(c.confirm(&like("1"), ToggleOutcome { active: true, count: None }).is_none());
        assert!(c.fail(&like("1")).is_none());

        c.seed(like("1"), false, 0).unwrap();
        assert!(c.confirm(&like("1"), ToggleOutcome { active: true, count: None }).is_none());
        assert!(!c.view(&like("1")).unwrap().value);
    }

    #[test]
    fn states_lists_targets_for_the_ui() {
        let mut c = MutationCoordinator::new();
        c.seed(like("1"), true, 2).unwrap();
        c.toggle(follow("bob")).unwrap();

        let states = c.states();
        assert_eq!(states.len(), 2);
        let bob = states.iter().find(|s| s.kind == MutationKind::Follow).unwrap();
        assert!(bob.active && bob.pending);
        assert_eq!(bob.count, 1);
    }
}
