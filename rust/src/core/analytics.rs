// Local usage analytics, scoped to the logged-in user and gated on consent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::kv_db::KvStore;
use super::session_store::SessionStore;
use crate::state::{now_millis, AnalyticsSnapshot, LocationPreference};
use crate::updates::{CoreMsg, InternalEvent};

const RECENT_SEARCH_LIMIT: usize = 5;
const PROFILE_VIEW_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Metric {
    ScreenViews,
    ButtonStats,
    TimeSpent,
    RecentSearches,
    LocationToggle,
    ProfileViews,
    Consent,
}

impl Metric {
    fn prefix(self) -> &'static str {
        match self {
            Metric::ScreenViews => "screenViews",
            Metric::ButtonStats => "buttonStats",
            Metric::TimeSpent => "timeSpent",
            Metric::RecentSearches => "recentSearches",
            Metric::LocationToggle => "locationToggle",
            Metric::ProfileViews => "profileViews",
            Metric::Consent => "userConsent",
        }
    }

    fn key(self, username: &str) -> String {
        format!("{}-{}", self.prefix(), username)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct ConsentRecord {
    #[serde(default)]
    accepted: bool,
}

/// One async mutex per storage key. tokio's mutex hands the lock out in
/// arrival order, which gives each key a FIFO write queue.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

pub struct AnalyticsAccumulator {
    kv: KvStore,
    session: Arc<SessionStore>,
    locks: KeyedLocks,
    timer_started: Mutex<Option<Instant>>,
}

impl AnalyticsAccumulator {
    pub fn new(kv: KvStore, session: Arc<SessionStore>) -> Self {
        Self {
            kv,
            session,
            locks: KeyedLocks::default(),
            timer_started: Mutex::new(None),
        }
    }

    pub async fn record_screen_view(&self, screen: &str) {
        self.record_current(AnalyticsEvent::ScreenView(screen.to_string()))
            .await;
    }

    pub async fn increment_action(&self, action: &str) {
        self.record_current(AnalyticsEvent::Action(action.to_string()))
            .await;
    }

    pub fn start_timer(&self) {
        *self.timer() = Some(Instant::now());
    }

    pub async fn stop_timer(&self, screen: &str) {
        self.record_current(AnalyticsEvent::StopTimer(screen.to_string()))
            .await;
    }

    pub async fn record_search(&self, term: &str) {
        self.record_current(AnalyticsEvent::Search(term.to_string()))
            .await;
    }

    pub async fn set_location_preference(&self, enabled: bool) {
        self.record_current(AnalyticsEvent::Location(enabled)).await;
    }

    pub async fn record_profile_view(&self, viewed: &str) {
        self.record_current(AnalyticsEvent::ProfileView(viewed.to_string()))
            .await;
    }

    /// Needs a logged-in user but not prior consent.
    pub async fn set_consent(&self, accepted: bool) {
        self.record_current(AnalyticsEvent::Consent(accepted)).await;
    }

    pub async fn snapshot(&self) -> Option<AnalyticsSnapshot> {
        let user = self.session.username()?;
        self.snapshot_for(&user).await
    }

    async fn record_current(&self, event: AnalyticsEvent) {
        match self.session.username() {
            Some(user) => self.record(&user, event).await,
            None => tracing::debug!(?event, "analytics: no session; event dropped"),
        }
    }

    /// Apply `event` to `user`'s records, whoever is logged in now.
    pub(super) async fn record(&self, user: &str, event: AnalyticsEvent) {
        let elapsed_ms = match &event {
            AnalyticsEvent::Consent(accepted) => {
                let accepted = *accepted;
                self.update(user, Metric::Consent, |record: &mut ConsentRecord| {
                    record.accepted = accepted
                })
                .await;
                tracing::info!(accepted, "analytics: consent updated");
                return;
            }
            AnalyticsEvent::StopTimer(_) => {
                let started = self.timer().take();
                match started {
                    Some(started) => {
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
                    }
                    None => return,
                }
            }
            _ => 0,
        };
        if !self.consents(user).await {
            return;
        }

        match event {
            AnalyticsEvent::Consent(_) => {}
            AnalyticsEvent::ScreenView(screen) => {
                self.update(user, Metric::ScreenViews, |views: &mut Vec<String>| {
                    views.push(screen)
                })
                .await
            }
            AnalyticsEvent::Action(action) => {
                self.update(user, Metric::ButtonStats, |stats: &mut BTreeMap<String, u64>| {
                    *stats.entry(action).or_insert(0) += 1;
                })
                .await
            }
            AnalyticsEvent::StopTimer(screen) => {
                self.update(user, Metric::TimeSpent, |spent: &mut BTreeMap<String, u64>| {
                    let entry = spent.entry(screen).or_insert(0);
                    *entry = entry.saturating_add(elapsed_ms);
                })
                .await
            }
            AnalyticsEvent::Search(term) => {
                let term = term.trim().to_string();
                if term.is_empty() {
                    return;
                }
                self.update(user, Metric::RecentSearches, |recent: &mut Vec<String>| {
                    recent.retain(|t| *t != term);
                    recent.insert(0, term);
                    recent.truncate(RECENT_SEARCH_LIMIT);
                })
                .await
            }
            AnalyticsEvent::Location(enabled) => {
                let pref = LocationPreference {
                    enabled,
                    timestamp: now_millis(),
                };
                self.update(user, Metric::LocationToggle, |slot: &mut Option<LocationPreference>| {
                    *slot = Some(pref)
                })
                .await
            }
            AnalyticsEvent::ProfileView(viewed) => {
                if viewed.is_empty() || viewed == user {
                    return;
                }
                self.update(user, Metric::ProfileViews, |views: &mut Vec<String>| {
                    if views.first() != Some(&viewed) {
                        views.insert(0, viewed);
                        views.truncate(PROFILE_VIEW_LIMIT);
                    }
                })
                .await
            }
        }
    }

    pub(super) async fn snapshot_for(&self, user: &str) -> Option<AnalyticsSnapshot> {
        if !self.consents(user).await {
            return None;
        }
        let button_stats: BTreeMap<String, u64> = self.read(user, Metric::ButtonStats).await;
        let time_spent: BTreeMap<String, u64> = self.read(user, Metric::TimeSpent).await;
        Some(AnalyticsSnapshot {
            screen_views: self.read(user, Metric::ScreenViews).await,
            button_stats: button_stats.into_iter().collect(),
            time_spent_ms: time_spent.into_iter().collect(),
            recent_searches: self.read(user, Metric::RecentSearches).await,
            profile_views: self.read(user, Metric::ProfileViews).await,
            location: self.read(user, Metric::LocationToggle).await,
        })
    }

    async fn consents(&self, user: &str) -> bool {
        let consent: ConsentRecord = self.read(user, Metric::Consent).await;
        consent.accepted
    }

    async fn read<T: DeserializeOwned + Default>(&self, user: &str, metric: Metric) -> T {
        let key = metric.key(user);
        match self.kv.get_json::<T>(&key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(%e, key = %key, "analytics: read failed");
                T::default()
            }
        }
    }

    /// Read-modify-write of one key under that key's lock.
    async fn update<T, F>(&self, user: &str, metric: Metric, apply: F)
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let key = metric.key(user);
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock().await;

        let mut value: T = match self.kv.get_json(&key).await {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(%e, key = %key, "analytics: read failed; skipping update");
                return;
            }
        };
        apply(&mut value);
        if let Err(e) = self.kv.set_json(&key, &value).await {
            tracing::warn!(%e, key = %key, "analytics: write failed");
        }
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        match self.timer_started.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

#[derive(Debug)]
pub(super) enum AnalyticsEvent {
    Consent(bool),
    ScreenView(String),
    Action(String),
    StopTimer(String),
    Search(String),
    ProfileView(String),
    Location(bool),
}

/// Analytics work queued by the app actor, applied in dispatch order. The
/// user is captured at dispatch so a later identity change cannot redirect it.
#[derive(Debug)]
pub(super) enum AnalyticsOp {
    Record { user: String, event: AnalyticsEvent },
    StartTimer,
    Snapshot { user: String },
}

pub(super) async fn run_worker(
    acc: Arc<AnalyticsAccumulator>,
    ops: flume::Receiver<AnalyticsOp>,
    core: flume::Sender<CoreMsg>,
) {
    while let Ok(op) = ops.recv_async().await {
        match op {
            AnalyticsOp::Record { user, event } => acc.record(&user, event).await,
            AnalyticsOp::StartTimer => acc.start_timer(),
            AnalyticsOp::Snapshot { user } => {
                let stats = acc.snapshot_for(&user).await;
                let _ = core.send(CoreMsg::Internal(Box::new(
                    InternalEvent::SessionStatsLoaded { user, stats },
                )));
            }
        }
    }
    tracing::debug!("analytics worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ScriptedApi, SocialApi};

    const ALL_METRICS: [Metric; 6] = [
        Metric::ScreenViews,
        Metric::ButtonStats,
        Metric::TimeSpent,
        Metric::RecentSearches,
        Metric::LocationToggle,
        Metric::ProfileViews,
    ];

    async fn logged_in() -> (KvStore, Arc<AnalyticsAccumulator>) {
        let api: Arc<dyn SocialApi> =
            Arc::new(ScriptedApi::default().with_user("alice", "hunter22"));
        let kv = KvStore::in_memory().unwrap();
        let session = Arc::new(SessionStore::new(api, kv.clone()));
        session.login("alice@example.com", "hunter22").await.unwrap();
        let acc = Arc::new(AnalyticsAccumulator::new(kv.clone(), session));
        (kv, acc)
    }

    async fn consented() -> (KvStore, Arc<AnalyticsAccumulator>) {
        let (kv, acc) = logged_in().await;
        acc.set_consent(true).await;
        (kv, acc)
    }

    #[tokio::test]
    async fn nothing_is_written_without_consent() {
        let (kv, acc) = logged_in().await;

        acc.record_screen_view("Home").await;
        acc.increment_action("like").await;
        acc.start_timer();
        acc.stop_timer("Home").await;
        acc.record_search("rust").await;
        acc.set_location_preference(true).await;
        acc.record_profile_view("bob").await;

        for metric in ALL_METRICS {
            assert_eq!(kv.get(&metric.key("alice")).await.unwrap(), None, "{metric:?}");
        }
        assert!(acc.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn revoked_consent_stops_recording() {
        let (kv, acc) = consented().await;
        acc.record_screen_view("Home").await;
        acc.set_consent(false).await;
        acc.record_screen_view("Profile").await;

        let views: Vec<String> = kv.get_json("screenViews-alice").await.unwrap().unwrap();
        assert_eq!(views, vec!["Home".to_string()]);
        let consent: serde_json::Value = kv.get_json("userConsent-alice").await.unwrap().unwrap();
        assert_eq!(consent, serde_json::json!({"accepted": false}));
    }

    #[tokio::test]
    async fn recent_searches_dedup_most_recent_first() {
        let (_kv, acc) = consented().await;
        for term in ["a", "b", "a", "c"] {
            acc.record_search(term).await;
        }
        let snap = acc.snapshot().await.unwrap();
        assert_eq!(snap.recent_searches, vec!["c", "a", "b"]);

        for term in ["d", "e", "f", "g"] {
            acc.record_search(term).await;
        }
        let snap = acc.snapshot().await.unwrap();
        assert_eq!(snap.recent_searches, vec!["g", "f", "e", "d", "c"]);
    }

    #[tokio::test]
    async fn profile_views_skip_self_and_repeats() {
        let (_kv, acc) = consented().await;
        for viewed in ["bob", "bob", "alice", "carol", "bob"] {
            acc.record_profile_view(viewed).await;
        }
        let snap = acc.snapshot().await.unwrap();
        assert_eq!(snap.profile_views, vec!["bob", "carol", "bob"]);

        for i in 0..12 {
            acc.record_profile_view(&format!("user{i}")).await;
        }
        let snap = acc.snapshot().await.unwrap();
        assert_eq!(snap.profile_views.len(), PROFILE_VIEW_LIMIT);
        assert_eq!(snap.profile_views[0], "user11");
    }

    #[tokio::test]
    async fn stop_timer_without_start_is_a_no_op() {
        let (kv, acc) = consented().await;
        acc.stop_timer("Home").await;
        assert_eq!(kv.get("timeSpent-alice").await.unwrap(), None);

        acc.start_timer();
        acc.stop_timer("Home").await;
        acc.stop_timer("Home").await;
        let snap = acc.snapshot().await.unwrap();
        assert_eq!(snap.time_spent_ms.len(), 1);
        assert!(snap.time_spent_ms.contains_key("Home"));
    }

    #[tokio::test]
    async fn location_preference_is_overwritten() {
        let (_kv, acc) = consented().await;
        acc.set_location_preference(true).await;
        acc.set_location_preference(false).await;
        let loc = acc.snapshot().await.unwrap().location.unwrap();
        assert!(!loc.enabled);
        assert!(loc.timestamp > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let (_kv, acc) = consented().await;
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let acc = acc.clone();
            tasks.push(tokio::spawn(async move {
                acc.increment_action("like").await;
                acc.record_screen_view("Feed").await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let snap = acc.snapshot().await.unwrap();
        assert_eq!(snap.button_stats.get("like"), Some(&50));
        assert_eq!(snap.screen_views.len(), 50);
    }

    #[tokio::test]
    async fn logged_out_user_is_ignored() {
        let api: Arc<dyn SocialApi> = Arc::new(ScriptedApi::default());
        let kv = KvStore::in_memory().unwrap();
        let session = Arc::new(SessionStore::new(api, kv.clone()));
        let acc = AnalyticsAccumulator::new(kv.clone(), session);

        acc.set_consent(true).await;
        acc.increment_action("like").await;
        assert!(acc.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn queued_events_stay_with_the_user_who_dispatched_them() {
        let (kv, acc) = consented().await;
        let (ops_tx, ops_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded();

        ops_tx
            .send(AnalyticsOp::Record {
                user: "alice".into(),
                event: AnalyticsEvent::Search("rust".into()),
            })
            .unwrap();
        ops_tx
            .send(AnalyticsOp::Snapshot {
                user: "alice".into(),
            })
            .unwrap();
        drop(ops_tx);

        // Identity is gone before the worker gets to the queue.
        acc.session.logout().await.unwrap();
        run_worker(acc.clone(), ops_rx, core_tx).await;

        let recent: Vec<String> = kv.get_json("recentSearches-alice").await.unwrap().unwrap();
        assert_eq!(recent, vec!["rust".to_string()]);
        match core_rx.try_recv().unwrap() {
            CoreMsg::Internal(event) => match *event {
                InternalEvent::SessionStatsLoaded { user, stats } => {
                    assert_eq!(user, "alice");
                    assert_eq!(stats.unwrap().recent_searches, vec!["rust"]);
                }
                _ => panic!("expected session stats"),
            },
            CoreMsg::Action(_) => panic!("expected internal event"),
        }
    }

    #[tokio::test]
    async fn events_for_a_user_without_consent_are_dropped() {
        let (kv, acc) = logged_in().await;
        acc.record("bob", AnalyticsEvent::Action("like".into())).await;
        assert_eq!(kv.get("buttonStats-bob").await.unwrap(), None);
        assert!(acc.snapshot_for("bob").await.is_none());
    }
}
