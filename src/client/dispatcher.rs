//! AgentClient - authenticated JSON requests against the agent service

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::types::{AgentResponse, ConversationThread, ErrorResponse, SendMessageRequest, UserProfile};
use super::AgentService;
use crate::auth::Credential;
use crate::Result;
use crate::error::Error;

const SEND_PATH: &str = "/api/agent/send";
const PROFILE_PATH: &str = "/api/profile";
const CONVERSATIONS_PATH: &str = "/api/agent/conversations";

/// HTTP client for the agent service.
///
/// Holds the bearer token for the whole session. Each call is a single
/// exchange: no retries, so a lost response to a send may duplicate the
/// message if the user sends it again.
#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    token: String,
    http_client: Client,
    cancel: CancellationToken,
}

impl AgentClient {
    pub fn new(base_url: &str, credential: &Credential, timeout: Duration) -> Result<Self> {
        if credential.access_token.trim().is_empty() {
            return Err(Error::OAuth("access token is empty".to_string()));
        }

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: credential.access_token.clone(),
            http_client,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort in-flight calls with [`Error::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Perform one exchange and decode the success body into `T`.
    ///
    /// Returns `Ok(None)` for a successful response with an empty body.
    pub async fn call<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let (status, bytes) = self.exchange(method, path, body).await?;
        classify(status, &bytes)
    }

    /// Perform one exchange whose success body is ignored.
    pub async fn call_no_content<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let (status, bytes) = self.exchange(method, path, body).await?;
        check_status(status, &bytes)
    }

    async fn exchange<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<(StatusCode, Vec<u8>)>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(method = %method, url = %url, "agent service request");

        let mut request = self.http_client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");

        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let exchange = async {
            let response = request.send().await.map_err(|e| Error::transport(&e))?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(|e| Error::transport(&e))?;
            Ok::<_, Error>((status, bytes.to_vec()))
        };

        let (status, bytes) = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = exchange => result?,
        };

        tracing::debug!(status = status.as_u16(), bytes = bytes.len(), "agent service response");
        Ok((status, bytes))
    }
}

/// Map a status >= 400 to [`Error::Api`], preferring the structured message.
fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    if status.as_u16() < 400 {
        return Ok(());
    }

    let message = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(error) if !error.message.is_empty() => error.message,
        _ => String::from_utf8_lossy(body).into_owned(),
    };

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

fn classify<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<Option<T>> {
    check_status(status, body)?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| Error::Decode(e.to_string()))
}

fn expect_body<T>(value: Option<T>, path: &str) -> Result<T> {
    value.ok_or_else(|| Error::Decode(format!("empty response body from {}", path)))
}

#[async_trait]
impl AgentService for AgentClient {
    async fn send_message(&self, message: &str, thread_id: Option<&str>) -> Result<AgentResponse> {
        let request = SendMessageRequest { message, thread_id };
        let response = self.call(Method::POST, SEND_PATH, Some(&request)).await?;
        expect_body(response, SEND_PATH)
    }

    async fn get_profile(&self) -> Result<UserProfile> {
        let profile = self.call::<_, ()>(Method::GET, PROFILE_PATH, None).await?;
        expect_body(profile, PROFILE_PATH)
    }

    async fn update_profile(&self, profile: &UserProfile) -> Result<()> {
        self.call_no_content(Method::PUT, PROFILE_PATH, Some(profile)).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationThread>> {
        // an empty body and a JSON null both mean no conversations
        let conversations = self
            .call::<Option<Vec<ConversationThread>>, ()>(Method::GET, CONVERSATIONS_PATH, None)
            .await?;
        Ok(conversations.flatten().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Account;
    use crate::test_support::{StubResponse, StubServer};
    use serde_json::json;

    fn credential(token: &str) -> Credential {
        Credential {
            access_token: token.to_string(),
            account: Account {
                home_account_id: "oid.tid".to_string(),
                username: "ada@contoso.com".to_string(),
                tenant_id: None,
            },
        }
    }

    fn client(url: &str) -> AgentClient {
        AgentClient::new(url, &credential("token-123"), Duration::from_secs(5)).unwrap()
    }

    fn reply(thread_id: &str, message: &str) -> StubResponse {
        StubResponse::json(200, json!({
            "threadId": thread_id,
            "message": message,
            "timestamp": "2024-05-01T10:00:00Z"
        }))
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(AgentClient::new("http://localhost", &credential(""), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_classify_plain_text_error_body() {
        let err = classify::<serde_json::Value>(StatusCode::INTERNAL_SERVER_ERROR, b"internal error").unwrap_err();
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "internal error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_structured_error_body() {
        let body = br#"{"error":"not_found","message":"Conversation not found"}"#;
        let err = classify::<serde_json::Value>(StatusCode::NOT_FOUND, body).unwrap_err();
        assert!(matches!(err, Error::Api { status: 404, ref message } if message == "Conversation not found"));
    }

    #[test]
    fn test_classify_error_body_without_message() {
        let body = br#"{"error":"bad_request"}"#;
        let err = classify::<serde_json::Value>(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(matches!(err, Error::Api { status: 400, ref message } if message == r#"{"error":"bad_request"}"#));

        let body = br#"{"message":"Message is required"}"#;
        let err = classify::<serde_json::Value>(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(matches!(err, Error::Api { status: 400, ref message } if message == "Message is required"));
    }

    #[test]
    fn test_classify_empty_success() {
        let value = classify::<serde_json::Value>(StatusCode::NO_CONTENT, b"").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_classify_malformed_success() {
        let err = classify::<AgentResponse>(StatusCode::OK, b"<html>").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_send_message_headers_and_body() {
        let server = StubServer::start(vec![reply("t1", "Hi")]).await;

        let response = client(&server.url).send_message("Hello", None).await.unwrap();
        assert_eq!(response.thread_id, "t1");
        assert_eq!(response.message, "Hi");

        let request = &server.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/agent/send");
        assert_eq!(request.header("authorization"), Some("Bearer token-123"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.json(), json!({"message": "Hello"}));
    }

    #[tokio::test]
    async fn test_send_message_with_thread() {
        let server = StubServer::start(vec![reply("t1", "Fine")]).await;

        client(&server.url).send_message("How are you?", Some("t1")).await.unwrap();
        assert_eq!(server.requests()[0].json(), json!({"message": "How are you?", "threadId": "t1"}));
    }

    #[tokio::test]
    async fn test_server_error_plain_text() {
        let server = StubServer::start(vec![StubResponse::text(500, "internal error")]).await;

        let err = client(&server.url).send_message("Hello", None).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, ref message } if message == "internal error"));
    }

    #[tokio::test]
    async fn test_get_profile_sends_no_body() {
        let server = StubServer::start(vec![StubResponse::json(200, json!({
            "preferredAgentInstructions": "Be brief"
        }))]).await;

        let profile = client(&server.url).get_profile().await.unwrap();
        assert_eq!(profile.preferred_agent_instructions.as_deref(), Some("Be brief"));

        let request = &server.requests()[0];
        assert_eq!(request.method, "GET");
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn test_update_profile_accepts_empty_body() {
        let server = StubServer::start(vec![StubResponse::text(200, "")]).await;
        let profile = UserProfile {
            preferred_agent_instructions: Some("Answer in French".to_string()),
            custom_workflows_json: None,
        };

        client(&server.url).update_profile(&profile).await.unwrap();

        let request = &server.requests()[0];
        assert_eq!(request.method, "PUT");
        assert_eq!(request.path, "/api/profile");
        assert_eq!(request.json(), json!({"preferredAgentInstructions": "Answer in French"}));
    }

    #[tokio::test]
    async fn test_list_conversations_keeps_server_order() {
        let server = StubServer::start(vec![StubResponse::json(200, json!([
            {"id": 2, "threadId": "zz-thread", "title": "Later", "createdAt": "2024-05-02T00:00:00Z", "lastMessageAt": "2024-05-02T00:00:00Z"},
            {"id": 1, "threadId": "aa-thread", "title": "Earlier", "createdAt": "2024-05-01T00:00:00Z", "lastMessageAt": "2024-05-01T00:00:00Z"}
        ]))]).await;

        let threads = client(&server.url).list_conversations().await.unwrap();
        let ids: Vec<_> = threads.iter().map(|t| t.thread_id.as_str()).collect();
        assert_eq!(ids, vec!["zz-thread", "aa-thread"]);
    }

    #[tokio::test]
    async fn test_list_conversations_null_is_empty() {
        let server = StubServer::start(vec![
            StubResponse::text(200, "null"),
            StubResponse::text(200, ""),
        ]).await;
        let client = client(&server.url);

        assert!(client.list_conversations().await.unwrap().is_empty());
        assert!(client.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_success_is_decode_error() {
        let server = StubServer::start(vec![StubResponse::text(200, "{\"threadId\": 5}")]).await;

        let err = client(&server.url).send_message("Hello", None).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let server = StubServer::start(vec![reply("t1", "late").delayed(Duration::from_secs(3))]).await;
        let client = AgentClient::new(&server.url, &credential("t"), Duration::from_millis(200)).unwrap();

        let err = client.send_message("Hello", None).await.unwrap_err();
        assert!(matches!(err, Error::Transport { timeout: true, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&url).get_profile().await.unwrap_err();
        assert!(matches!(err, Error::Transport { timeout: false, .. }));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_call() {
        let server = StubServer::start(vec![reply("t1", "late").delayed(Duration::from_secs(3))]).await;
        let cancel = CancellationToken::new();
        let client = client(&server.url).with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = client.send_message("Hello", None).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
