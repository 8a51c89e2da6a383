// reqwest-backed SocialApi talking to the Y REST service.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{
    parse_toggle_reply, AuthReply, FeedbackSubmission, NewYeet, SocialApi, ToggleOutcome,
    ToggleRequest, UniquenessCheck,
};
use crate::error::ApiError;
use crate::state::{
    FederatedClaims, FeedPost, FeedbackStats, MutationKind, Registration, UserProfile,
    UserSummary,
};

#[derive(Clone)]
pub struct HttpSocialApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSocialApi {
    /// No request timeout is configured: a hung toggle keeps its target pending.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(
        &self,
        path: &str,
        token: Option<&str>,
        body: &impl serde::Serialize,
    ) -> Result<Response, ApiError> {
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    async fn get(
        &self,
        path: &str,
        token: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<Response, ApiError> {
        let mut req = self.client.get(self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let resp = check_status(resp).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

fn toggle_path(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Follow => "/follow_toggle/",
        MutationKind::Like => "/like_unlike/",
        MutationKind::Reshare => "/reyeet_unreyeet/",
    }
}

fn toggle_body(request: &ToggleRequest) -> Value {
    match request.kind {
        MutationKind::Follow => json!({ "username": request.target_id }),
        MutationKind::Like | MutationKind::Reshare => {
            // Post ids are numeric on the wire.
            let post_id = match request.target_id.parse::<u64>() {
                Ok(id) => json!(id),
                Err(_) => json!(request.target_id),
            };
            json!({ "username": request.actor, "post_id": post_id })
        }
    }
}

#[async_trait]
impl SocialApi for HttpSocialApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthReply, ApiError> {
        let body = json!({ "email": email, "password": password });
        let resp = self.post_json("/auth/login/", None, &body).await?;
        read_json(resp).await
    }

    async fn register(&self, form: &Registration) -> Result<AuthReply, ApiError> {
        let resp = self.post_json("/auth/registration/", None, form).await?;
        read_json(resp).await
    }

    async fn validate_new_user(
        &self,
        email: &str,
        username: &str,
    ) -> Result<UniquenessCheck, ApiError> {
        let body = json!({ "email": email, "username": username });
        let resp = self.post_json("/validate_new_user/", None, &body).await?;
        let status = resp.status();
        let text = resp.text().await?;
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let flag = |key: &str| parsed.get(key).and_then(Value::as_bool).unwrap_or(false);
        if flag("email_exists") {
            return Ok(UniquenessCheck::EmailTaken);
        }
        if flag("username_exists") {
            return Ok(UniquenessCheck::UsernameTaken);
        }
        if status.is_success() {
            Ok(UniquenessCheck::Available)
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    async fn federated_login(&self, claims: &FederatedClaims) -> Result<AuthReply, ApiError> {
        let resp = self.post_json("/auth/google-login/", None, claims).await?;
        read_json(resp).await
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ApiError> {
        let body = json!({ "email": email });
        let resp = self.post_json("/auth/password/reset", None, &body).await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn toggle(
        &self,
        token: &str,
        request: &ToggleRequest,
    ) -> Result<ToggleOutcome, ApiError> {
        let body = toggle_body(request);
        let resp = self
            .post_json(toggle_path(request.kind), Some(token), &body)
            .await?;
        let reply: Value = read_json(resp).await?;
        parse_toggle_reply(request.kind, &reply)
    }

    async fn search_users(&self, token: &str, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        let resp = self
            .get("/search_users/", Some(token), &[("query", query)])
            .await?;
        read_json(resp).await
    }

    async fn user_profile(&self, token: &str, username: &str) -> Result<UserProfile, ApiError> {
        let path = format!("/user_profile/{username}/");
        let resp = self.get(&path, Some(token), &[]).await?;
        read_json(resp).await
    }

    async fn following_feed(&self, token: &str, username: &str) -> Result<Vec<FeedPost>, ApiError> {
        let path = format!("/follow_feed/{username}/");
        let resp = self.get(&path, Some(token), &[]).await?;
        read_json(resp).await
    }

    async fn post_yeet(&self, token: &str, yeet: &NewYeet) -> Result<(), ApiError> {
        let resp = self.post_json("/post_yeet/", Some(token), yeet).await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn submit_feedback(
        &self,
        token: Option<&str>,
        feedback: &FeedbackSubmission,
    ) -> Result<(), ApiError> {
        let resp = self.post_json("/feedback/", token, feedback).await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn feedback_stats(&self) -> Result<FeedbackStats, ApiError> {
        let resp = self.get("/feedback/stats/", None, &[]).await?;
        read_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = HttpSocialApi::new("https://api.example.com/api/");
        assert_eq!(api.base_url(), "https://api.example.com/api");
        assert_eq!(api.url("/auth/login/"), "https://api.example.com/api/auth/login/");
    }

    #[test]
    fn like_body_sends_numeric_post_id() {
        let body = toggle_body(&ToggleRequest {
            kind: MutationKind::Like,
            target_id: "42".into(),
            actor: "alice".into(),
        });
        assert_eq!(body, json!({"username": "alice", "post_id": 42}));
    }

    #[test]
    fn follow_body_names_the_followee() {
        let body = toggle_body(&ToggleRequest {
            kind: MutationKind::Follow,
            target_id: "carol".into(),
            actor: "bob".into(),
        });
        assert_eq!(body, json!({"username": "carol"}));
    }
}
