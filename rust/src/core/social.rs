// Likes, follows, reyeets, and the loads that seed them. Also feed, search,
// posting and feedback.

use super::*;
use crate::api::{FeedbackSubmission, NewYeet, ToggleOutcome, ToggleRequest};
use crate::error::{ApiError, SeedError};
use crate::state::{
    FeedPost, FeedbackSentiment, FeedbackStats, MutationKind, PostLocation, UserProfile,
    UserSummary,
};

impl AppCore {
    pub(super) fn toggle_social(&mut self, key: TargetKey) {
        if !self.is_logged_in() {
            self.toast("Log in to like, follow or reyeet");
            return;
        }
        if let Some(request) = self.mutations.toggle(key) {
            self.send_toggle(request);
        }
        self.emit_state();
    }

    /// Ship a toggle for a target the coordinator just marked in flight. A
    /// request that cannot be sent fails immediately and rolls back.
    fn send_toggle(&mut self, pending: PendingToggle) {
        let key = pending.key;
        let Some(session) = self.session.current() else {
            tracing::warn!(kind = key.kind.as_str(), target_id = %key.id, "toggle: no session; rolling back");
            self.mutations.fail(&key);
            return;
        };
        // The store swaps identity before the actor hears about it; never act
        // for a user the UI is not showing.
        if self.signed_in_username() != Some(session.username.as_str()) {
            tracing::warn!(kind = key.kind.as_str(), target_id = %key.id, "toggle: identity changing; rolling back");
            self.mutations.fail(&key);
            return;
        }
        if !self.config.network_enabled() {
            tracing::warn!(kind = key.kind.as_str(), target_id = %key.id, "toggle: network disabled; rolling back");
            self.mutations.fail(&key);
            return;
        }
        tracing::info!(
            kind = key.kind.as_str(),
            target_id = %key.id,
            compensating = pending.compensating,
            "toggle: sending"
        );
        let request = ToggleRequest {
            kind: key.kind,
            target_id: key.id.clone(),
            actor: session.username,
        };
        let token = session.token;
        let api = self.api.clone();
        self.spawn_internal(async move {
            let result = api.toggle(&token, &request).await;
            InternalEvent::ToggleSettled { key, token, result }
        });
    }

    pub(super) fn handle_toggle_settled(
        &mut self,
        key: TargetKey,
        token: String,
        result: Result<ToggleOutcome, ApiError>,
    ) {
        if !self.is_current_token(&token) {
            tracing::info!(kind = key.kind.as_str(), target_id = %key.id, "toggle: result for previous session ignored");
            return;
        }
        match result {
            Ok(outcome) => {
                if let Some(next) = self.mutations.confirm(&key, outcome) {
                    self.send_toggle(next);
                }
            }
            Err(e) => {
                tracing::warn!(kind = key.kind.as_str(), target_id = %key.id, %e, "toggle failed; rolled back");
                self.mutations.fail(&key);
                if e.is_unauthorized() {
                    self.invalidate_session(token);
                }
            }
        }
        self.emit_state();
    }

    pub(super) fn seed_social(&mut self, key: TargetKey, active: bool, count: u64) {
        self.seed_target(key, active, count);
        self.emit_state();
    }

    pub(super) fn release_social(&mut self, key: TargetKey) {
        self.mutations.release(&key);
        self.emit_state();
    }

    fn seed_target(&mut self, key: TargetKey, active: bool, count: u64) {
        if let Err(SeedError::Pending) = self.mutations.seed(key.clone(), active, count) {
            tracing::debug!(kind = key.kind.as_str(), target_id = %key.id, "seed skipped: request in flight");
        }
    }

    fn seed_posts(&mut self, posts: &[FeedPost]) {
        for post in posts {
            let id = post.post_id.to_string();
            self.seed_target(
                TargetKey::new(MutationKind::Like, id.clone()),
                post.liked_by_user,
                post.like_count,
            );
            self.seed_target(
                TargetKey::new(MutationKind::Reshare, id),
                post.retweeted_by_user,
                post.retweet_count,
            );
        }
    }

    pub(super) fn search_users(&mut self, query: String) {
        let query = query.trim().to_string();
        if query.is_empty() {
            if !self.state.search_results.is_empty() {
                self.state.search_results.clear();
                self.emit_state();
            }
            return;
        }
        let Some(session) = self.require_session("search") else {
            return;
        };
        if !self.require_network() {
            return;
        }
        self.set_busy(|b| b.searching = true);
        let api = self.api.clone();
        let token = session.token;
        self.spawn_internal(async move {
            let result = api.search_users(&token, &query).await;
            InternalEvent::SearchResults {
                query,
                token,
                result,
            }
        });
    }

    pub(super) fn handle_search_results(
        &mut self,
        query: String,
        token: String,
        result: Result<Vec<UserSummary>, ApiError>,
    ) {
        self.set_busy(|b| b.searching = false);
        if !self.is_current_token(&token) {
            return;
        }
        match result {
            Ok(users) => {
                tracing::info!(query = %query, count = users.len(), "search results");
                self.state.search_results = users;
                self.emit_state();
            }
            Err(e) => self.load_failed("Search failed", token, e),
        }
    }

    pub(super) fn open_profile(&mut self, username: String) {
        let username = username.trim().to_string();
        if username.is_empty() {
            return;
        }
        let Some(session) = self.require_session("view profiles") else {
            return;
        };
        if !self.require_network() {
            return;
        }
        self.set_busy(|b| b.loading_profile = true);
        let api = self.api.clone();
        let token = session.token;
        self.spawn_internal(async move {
            let result = api.user_profile(&token, &username).await;
            InternalEvent::ProfileLoaded {
                username,
                token,
                result,
            }
        });
    }

    pub(super) fn handle_profile_loaded(
        &mut self,
        username: String,
        token: String,
        result: Result<UserProfile, ApiError>,
    ) {
        self.set_busy(|b| b.loading_profile = false);
        if !self.is_current_token(&token) {
            return;
        }
        match result {
            Ok(profile) => {
                self.seed_target(
                    TargetKey::new(MutationKind::Follow, profile.username.clone()),
                    profile.is_following,
                    profile.followers_count,
                );
                self.seed_posts(&profile.posts);
                self.seed_posts(&profile.likes);
                self.seed_posts(&profile.retweets);
                self.state.profile = Some(profile);
                self.emit_state();
            }
            Err(e) => self.load_failed(&format!("Could not load @{username}"), token, e),
        }
    }

    pub(super) fn refresh_feed(&mut self) {
        let Some(session) = self.require_session("see your feed") else {
            return;
        };
        if !self.require_network() {
            return;
        }
        let api = self.api.clone();
        self.spawn_internal(async move {
            let result = api.following_feed(&session.token, &session.username).await;
            InternalEvent::FeedLoaded {
                token: session.token,
                result,
            }
        });
    }

    pub(super) fn handle_feed_loaded(&mut self, token: String, result: Result<Vec<FeedPost>, ApiError>) {
        if !self.is_current_token(&token) {
            return;
        }
        match result {
            Ok(posts) => {
                self.seed_posts(&posts);
                self.state.feed = posts;
                self.emit_state();
            }
            Err(e) => self.load_failed("Could not refresh feed", token, e),
        }
    }

    pub(super) fn post_yeet(&mut self, content: String, location: Option<PostLocation>) {
        let content = content.trim().to_string();
        if content.is_empty() {
            self.toast("Write something first");
            return;
        }
        let Some(session) = self.require_session("post") else {
            return;
        };
        if !self.require_network() {
            return;
        }
        self.set_busy(|b| b.posting = true);
        let yeet = NewYeet {
            username: session.username,
            post_content: content,
            latitude: location.as_ref().map(|l| l.latitude),
            longitude: location.as_ref().map(|l| l.longitude),
            location_name: location.map(|l| l.name),
        };
        let api = self.api.clone();
        let token = session.token;
        self.spawn_internal(async move {
            let result = api.post_yeet(&token, &yeet).await;
            InternalEvent::YeetPosted { token, result }
        });
    }

    pub(super) fn handle_yeet_posted(&mut self, token: String, result: Result<(), ApiError>) {
        self.set_busy(|b| b.posting = false);
        match result {
            Ok(()) => {
                self.toast("Yeet posted");
                self.refresh_feed();
            }
            Err(e) => self.load_failed("Failed to post", token, e),
        }
    }

    pub(super) fn submit_feedback(&mut self, sentiment: FeedbackSentiment, option_ids: Vec<u32>) {
        if !self.require_network() {
            return;
        }
        self.set_busy(|b| b.submitting_feedback = true);
        let session = self.session.current();
        let submission = FeedbackSubmission {
            user_id: session.as_ref().and_then(|s| s.id),
            username: session.as_ref().map(|s| s.username.clone()),
            sentiment,
            selected_options: option_ids,
        };
        let token = session.map(|s| s.token);
        let api = self.api.clone();
        self.spawn_internal(async move {
            let result = api.submit_feedback(token.as_deref(), &submission).await;
            InternalEvent::FeedbackSubmitted { result }
        });
    }

    pub(super) fn handle_feedback_submitted(&mut self, result: Result<(), ApiError>) {
        self.set_busy(|b| b.submitting_feedback = false);
        match result {
            Ok(()) => {
                self.toast("Thanks for your feedback!");
                self.load_feedback_stats();
            }
            Err(e) => {
                tracing::warn!(%e, "feedback submission failed");
                self.state.alert = Some(AlertState {
                    title: "Feedback".to_string(),
                    message: "Failed to submit feedback. Please try again.".to_string(),
                    field: None,
                });
                self.emit_state();
            }
        }
    }

    pub(super) fn load_feedback_stats(&mut self) {
        if !self.require_network() {
            return;
        }
        let api = self.api.clone();
        self.spawn_internal(async move {
            InternalEvent::FeedbackStatsLoaded {
                result: api.feedback_stats().await,
            }
        });
    }

    pub(super) fn handle_feedback_stats_loaded(&mut self, result: Result<FeedbackStats, ApiError>) {
        match result {
            Ok(stats) => {
                self.state.feedback_stats = Some(stats);
                self.emit_state();
            }
            Err(e) => tracing::warn!(%e, "feedback stats unavailable"),
        }
    }

    fn load_failed(&mut self, msg: &str, token: String, e: ApiError) {
        tracing::warn!(%e, "{msg}");
        if e.is_unauthorized() {
            self.invalidate_session(token);
            return;
        }
        self.toast(msg.to_string());
    }
}
