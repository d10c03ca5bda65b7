//! HTTP client for the Matrix client-server API.
//!
//! This module provides the [`MatrixClient`] struct handling login, access
//! token caching, message sending and the long-poll sync call. Tokens are
//! cached in the injected [`Store`] and replaced after an authentication
//! failure; a send that hits HTTP 401 re-logs-in and retries exactly once.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::matrix::response_structs::{LoginResponse, SyncResponse};
use crate::matrix::{ClientError, UserCredentials};
use crate::store::Store;

/// Extra seconds granted to the long-poll on top of the server-side timeout.
/// The server holds the connection until new data or timeout, so the client
/// side must wait a little longer.
const SYNC_GRACE_SECS: u64 = 5;

/// Client for a single bot account on a homeserver.
///
/// Owns the credentials and performs all HTTP calls. The access token is
/// cached in the injected store, keyed per bot identity, so independent
/// client instances for the same account share one token.
pub struct MatrixClient<S: Store> {
    /// Account credentials and connection settings.
    credentials: UserCredentials,
    /// Shared store backing the token cache.
    store: Arc<S>,
    /// HTTP client.
    client: Client,
}

impl<S: Store> MatrixClient<S> {
    /// Create a new [MatrixClient].
    ///
    /// # Arguments
    ///
    /// * `credentials` - Account credentials; presence is checked at login
    ///   time, not here.
    /// * `store` - Store used for the access token cache.
    pub fn new(credentials: UserCredentials, store: Arc<S>) -> Self {
        let client = reqwest::Client::new();
        MatrixClient {
            credentials,
            store,
            client,
        }
    }

    /// The homeserver base URL without a trailing slash.
    fn homeserver(&self) -> Result<String, ClientError> {
        let url = self
            .credentials
            .homeserver_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ClientError::Config("homeserver_url"))?;
        Ok(url.trim_end_matches('/').to_string())
    }

    /// Store key of the cached token, scoped per bot identity.
    fn cache_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.credentials.username.hash(&mut hasher);
        format!("matrix_access_token_{:x}", hasher.finish())
    }

    /// Performs a password-grant login against the homeserver.
    ///
    /// # Returns
    ///
    /// The issued access token.
    ///
    /// # Errors
    ///
    /// * [`ClientError::Config`] when the homeserver URL, username or
    ///   password is missing; the transport is never touched in that case.
    /// * [`ClientError::Auth`] when the homeserver rejects the request.
    /// * [`ClientError::Decode`] when the response body is not valid JSON.
    pub async fn login(&self) -> Result<String, ClientError> {
        let homeserver = self.homeserver()?;
        let username = self
            .credentials
            .username
            .as_deref()
            .filter(|username| !username.is_empty())
            .ok_or(ClientError::Config("bot_username"))?;
        let password = self
            .credentials
            .password
            .as_deref()
            .filter(|password| !password.is_empty())
            .ok_or(ClientError::Config("bot_password"))?;

        let url = format!("{homeserver}/_matrix/client/v3/login");
        info!("login as {username}");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "type": "m.login.password",
                "identifier": {
                    "type": "m.id.user",
                    "user": username,
                },
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("login failed status={status} body={body}");
            return Err(ClientError::Auth { status, body });
        }

        let body = response.text().await?;
        let login: LoginResponse = serde_json::from_str(&body)?;
        Ok(login.access_token)
    }

    /// Returns a usable access token.
    ///
    /// A statically configured token short-circuits everything. Otherwise
    /// the cached token is returned when present and not expired; a cache
    /// miss triggers a login, and the fresh token is cached with the
    /// configured TTL.
    pub async fn access_token(&self) -> Result<String, ClientError> {
        if let Some(token) = self
            .credentials
            .access_token
            .as_deref()
            .filter(|token| !token.is_empty())
        {
            return Ok(token.to_string());
        }

        let key = self.cache_key();
        if let Some(token) = self.store.get(&key).await {
            return Ok(token);
        }

        let token = self.login().await?;
        let ttl = Duration::from_secs(self.credentials.token_ttl_hours * 3600);
        self.store.put(&key, &token, Some(ttl)).await;
        Ok(token)
    }

    /// Drops the cached token. Called after an authentication failure so the
    /// next [`Self::access_token`] performs a fresh login.
    pub async fn invalidate_token(&self) {
        self.store.forget(&self.cache_key()).await;
    }

    /// Sends a plain text message to a room.
    ///
    /// Each call uses a fresh transaction id, so a retried PUT is idempotent
    /// on the server side. On HTTP 401 the cached token is invalidated, a
    /// fresh one is fetched and the PUT is retried exactly once.
    ///
    /// # Returns
    ///
    /// `true` when the homeserver accepted the message. A failed send is an
    /// expected outcome, not an error: failures are logged with their
    /// status, URL and payload, and `false` is returned.
    pub async fn send_message(&self, room_id: &str, message: &str) -> bool {
        let Ok(token) = self.access_token().await else {
            error!("cannot send message, no access token");
            return false;
        };
        let Ok(homeserver) = self.homeserver() else {
            return false;
        };

        let txn_id = Uuid::new_v4().to_string();
        // Room ids contain reserved characters like '!' and ':', encode them
        // for use in a path segment
        let encoded_room = urlencoding::encode(room_id);
        let url = format!(
            "{homeserver}/_matrix/client/v3/rooms/{encoded_room}/send/m.room.message/{txn_id}"
        );
        let payload = json!({
            "msgtype": "m.text",
            "body": message,
        });

        let masked = &token[..token.len().min(8)];
        debug!("send request url={url} txn_id={txn_id} token={masked}...");

        let response = match self.put_message(&url, &token, &payload).await {
            Ok(response) => response,
            Err(e) => {
                error!("send request failed url={url}: {e}");
                return false;
            }
        };

        let status = response.status();
        debug!("send response status={status}");
        if status.is_success() {
            return true;
        }

        // 401 means the token expired, refresh it and retry once
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            let Ok(token) = self.access_token().await else {
                error!("cannot retry send, token refresh failed url={url}");
                return false;
            };

            debug!("send retrying after 401 url={url} txn_id={txn_id}");
            return match self.put_message(&url, &token, &payload).await {
                Ok(retry) => {
                    let status = retry.status();
                    if status.is_success() {
                        true
                    } else {
                        let body = retry.text().await.unwrap_or_default();
                        error!(
                            "send failed after retry status={status} url={url} payload={payload} body={body}"
                        );
                        false
                    }
                }
                Err(e) => {
                    error!("send retry failed url={url}: {e}");
                    false
                }
            };
        }

        let body = response.text().await.unwrap_or_default();
        error!("send failed status={status} url={url} payload={payload} body={body}");
        false
    }

    async fn put_message(
        &self,
        url: &str,
        token: &str,
        payload: &Value,
    ) -> Result<Response, reqwest::Error> {
        self.client
            .put(url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
    }

    /// Performs one long-poll sync call.
    ///
    /// The server holds the connection for up to `timeout_secs`; the
    /// client-side timeout is `timeout_secs` plus a grace period so a
    /// well-behaved server always answers first.
    ///
    /// # Arguments
    ///
    /// * `token` - Bearer token for the request.
    /// * `since` - Resumption cursor from a previous call; `None` starts
    ///   from the current state without catch-up.
    /// * `timeout_secs` - Server-side long-poll timeout in seconds.
    ///
    /// # Errors
    ///
    /// * [`ClientError::Transport`] on network failure or a non-2xx status.
    /// * [`ClientError::Decode`] when the body is not the expected JSON.
    pub async fn sync(
        &self,
        token: &str,
        since: Option<&str>,
        timeout_secs: u64,
    ) -> Result<SyncResponse, ClientError> {
        let homeserver = self.homeserver()?;
        let url = format!("{homeserver}/_matrix/client/v3/sync");
        debug!("sync request {url} since={}", since.unwrap_or("null"));

        let mut request = self
            .client
            .get(&url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(timeout_secs + SYNC_GRACE_SECS))
            .query(&[("timeout", (timeout_secs * 1000).to_string())]);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.text().await?;
        let sync: SyncResponse = serde_json::from_str(&body)?;

        debug!("sync response next_batch={:?}", sync.next_batch);
        Ok(sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mockito::Matcher;

    fn credentials(homeserver_url: &str) -> UserCredentials {
        UserCredentials {
            homeserver_url: Some(homeserver_url.to_string()),
            username: Some("@bot:example.org".to_string()),
            password: Some("secret".to_string()),
            access_token: None,
            token_ttl_hours: 6,
        }
    }

    fn client_with(
        credentials: UserCredentials,
    ) -> (MatrixClient<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (MatrixClient::new(credentials, Arc::clone(&store)), store)
    }

    fn login_mock(server: &mut mockito::ServerGuard, token: &str) -> mockito::Mock {
        server
            .mock("POST", "/_matrix/client/v3/login")
            .match_body(Matcher::PartialJson(json!({
                "type": "m.login.password",
                "identifier": {"type": "m.id.user", "user": "@bot:example.org"},
                "password": "secret",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"access_token": "{token}"}}"#))
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = login_mock(&mut server, "abc123").create_async().await;

        let (client, _store) = client_with(credentials(&server.url()));
        let token = client.login().await.unwrap();

        assert_eq!(token, "abc123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_fails_without_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/_matrix/client/v3/login")
            .expect(0)
            .create_async()
            .await;

        let mut creds = credentials(&server.url());
        creds.password = None;
        let (client, _store) = client_with(creds);

        let result = client.login().await;
        assert!(matches!(result, Err(ClientError::Config("bot_password"))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_fails_without_homeserver() {
        let (client, _store) = client_with(UserCredentials::default());

        let result = client.login().await;
        assert!(matches!(result, Err(ClientError::Config("homeserver_url"))));
    }

    #[tokio::test]
    async fn test_login_rejected_by_homeserver() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/_matrix/client/v3/login")
            .with_status(403)
            .with_body(r#"{"errcode": "M_FORBIDDEN"}"#)
            .create_async()
            .await;

        let (client, _store) = client_with(credentials(&server.url()));

        let result = client.login().await;
        assert!(matches!(result, Err(ClientError::Auth { status: 403, .. })));
    }

    #[tokio::test]
    async fn test_access_token_caches_the_login_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = login_mock(&mut server, "abc123")
            .expect(1)
            .create_async()
            .await;

        let (client, store) = client_with(credentials(&server.url()));

        assert_eq!(client.access_token().await.unwrap(), "abc123");
        assert_eq!(client.access_token().await.unwrap(), "abc123");

        // A single login backs both calls
        mock.assert_async().await;
        assert_eq!(store.get(&client.cache_key()).await, Some("abc123".into()));
    }

    #[tokio::test]
    async fn test_access_token_uses_configured_static_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/_matrix/client/v3/login")
            .expect(0)
            .create_async()
            .await;

        let mut creds = credentials(&server.url());
        creds.access_token = Some("static-token".to_string());
        let (client, _store) = client_with(creds);

        assert_eq!(client.access_token().await.unwrap(), "static-token");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalidate_token_forces_relogin() {
        let mut server = mockito::Server::new_async().await;
        let mock = login_mock(&mut server, "abc123")
            .expect(2)
            .create_async()
            .await;

        let (client, _store) = client_with(credentials(&server.url()));

        client.access_token().await.unwrap();
        client.invalidate_token().await;
        client.access_token().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "PUT",
                Matcher::Regex(
                    r"^/_matrix/client/v3/rooms/%21r%3Aexample\.org/send/m\.room\.message/[0-9a-f-]{36}$"
                        .to_string(),
                ),
            )
            .match_header("authorization", "Bearer cached")
            .match_body(Matcher::Json(json!({
                "msgtype": "m.text",
                "body": "hello",
            })))
            .with_status(200)
            .with_body(r#"{"event_id": "$sent"}"#)
            .create_async()
            .await;

        let (client, store) = client_with(credentials(&server.url()));
        store.put(&client.cache_key(), "cached", None).await;

        assert!(client.send_message("!r:example.org", "hello").await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_retries_once_after_401() {
        let mut server = mockito::Server::new_async().await;
        let path = Matcher::Regex(
            r"^/_matrix/client/v3/rooms/%21r%3Aexample\.org/send/m\.room\.message/[0-9a-f-]{36}$"
                .to_string(),
        );

        let stale_put = server
            .mock("PUT", path.clone())
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .with_body(r#"{"errcode": "M_UNKNOWN_TOKEN"}"#)
            .expect(1)
            .create_async()
            .await;
        let login = login_mock(&mut server, "fresh").expect(1).create_async().await;
        let fresh_put = server
            .mock("PUT", path)
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"event_id": "$sent"}"#)
            .expect(1)
            .create_async()
            .await;

        let (client, store) = client_with(credentials(&server.url()));
        store.put(&client.cache_key(), "stale", None).await;

        assert!(client.send_message("!r:example.org", "hello").await);

        stale_put.assert_async().await;
        login.assert_async().await;
        fresh_put.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_failed_retry_returns_false() {
        let mut server = mockito::Server::new_async().await;
        let path = Matcher::Regex(
            r"^/_matrix/client/v3/rooms/.+/send/m\.room\.message/[0-9a-f-]{36}$".to_string(),
        );

        server
            .mock("PUT", path.clone())
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let login = login_mock(&mut server, "fresh").expect(1).create_async().await;
        // The retry also fails, there must be no third attempt
        let fresh_put = server
            .mock("PUT", path)
            .match_header("authorization", "Bearer fresh")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;

        let (client, store) = client_with(credentials(&server.url()));
        store.put(&client.cache_key(), "stale", None).await;

        assert!(!client.send_message("!r:example.org", "hello").await);

        login.assert_async().await;
        fresh_put.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_message_other_failure_returns_false() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "PUT",
                Matcher::Regex(r"^/_matrix/client/v3/rooms/.+$".to_string()),
            )
            .with_status(500)
            .create_async()
            .await;

        let (client, store) = client_with(credentials(&server.url()));
        store.put(&client.cache_key(), "cached", None).await;

        assert!(!client.send_message("!r:example.org", "hello").await);
    }

    #[tokio::test]
    async fn test_sync_sends_timeout_and_since() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("timeout".to_string(), "30000".to_string()),
                Matcher::UrlEncoded("since".to_string(), "s0".to_string()),
            ]))
            .match_header("authorization", "Bearer cached")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"next_batch": "s1"}"#)
            .create_async()
            .await;

        let (client, _store) = client_with(credentials(&server.url()));
        let response = client.sync("cached", Some("s0"), 30).await.unwrap();

        assert_eq!(response.next_batch, Some("s1".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sync_omits_since_on_first_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(Matcher::UrlEncoded(
                "timeout".to_string(),
                "30000".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"next_batch": "s1"}"#)
            .create_async()
            .await;

        let (client, _store) = client_with(credentials(&server.url()));
        let response = client.sync("cached", None, 30).await.unwrap();

        assert_eq!(response.next_batch, Some("s1".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sync_non_2xx_is_a_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let (client, _store) = client_with(credentials(&server.url()));
        let result = client.sync("cached", None, 30).await;

        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_sync_malformed_body_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let (client, _store) = client_with(credentials(&server.url()));
        let result = client.sync("cached", None, 30).await;

        assert!(matches!(result, Err(ClientError::Decode(_))));
    }
}
