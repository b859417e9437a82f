use async_trait::async_trait;
use http_client::{HttpClient, Request, Response};
use listen_sync::spotify::{ApiCredentials, SpotifyClient};
use listen_sync::token::{ApiToken, TokenPersistence};
use listen_sync::{MetadataApi, PlayHistoryApi, SyncError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    url: String,
    authorization: Option<String>,
    body: String,
}

/// Answers requests from a script of `(status, body, retry_after)` replies.
#[derive(Debug, Clone, Default)]
struct ScriptedHttpClient {
    replies: Arc<Mutex<VecDeque<(u16, String, Option<String>)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedHttpClient {
    fn reply(self, status: u16, body: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back((status, body.to_string(), None));
        self
    }

    fn reply_with_retry_after(self, status: u16, retry_after: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back((status, String::new(), Some(retry_after.to_string())));
        self
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, mut req: Request) -> Result<Response, http_client::Error> {
        let body = req.body_string().await.unwrap_or_default();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: req.method().to_string(),
            url: req.url().to_string(),
            authorization: req
                .header("Authorization")
                .and_then(|h| h.get(0))
                .map(|v| v.as_str().to_string()),
            body,
        });

        let (status, body, retry_after) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((500, "script exhausted".to_string(), None));

        let mut response = Response::new(status);
        if let Some(retry_after) = retry_after {
            response.insert_header("Retry-After", retry_after.as_str());
        }
        response.set_body(body);
        Ok(response)
    }
}

const TOKEN_RESPONSE: &str =
    r#"{"access_token": "access-1", "token_type": "Bearer", "expires_in": 3600, "scope": "user-read-recently-played"}"#;

const RECENTLY_PLAYED: &str = r#"{
    "items": [
        {
            "track": {
                "id": "t1",
                "name": "Everything In Its Right Place",
                "artists": [{"id": "a1", "name": "Radiohead"}]
            },
            "played_at": "2025-03-01T12:00:00.000Z"
        }
    ],
    "next": null,
    "cursors": {"after": "1740830400000", "before": "1740830400000"}
}"#;

fn credentials() -> ApiCredentials {
    ApiCredentials {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        redirect_uri: "http://localhost:8888/callback".to_string(),
    }
}

fn client(http: &ScriptedHttpClient) -> SpotifyClient {
    SpotifyClient::with_base_urls(
        Box::new(http.clone()),
        credentials(),
        ApiToken::new("refresh-1".to_string()),
        "http://api.test/v1".to_string(),
        "http://accounts.test".to_string(),
    )
}

#[test_log::test(tokio::test)]
async fn test_refreshes_token_then_fetches_plays() {
    let http = ScriptedHttpClient::default()
        .reply(200, TOKEN_RESPONSE)
        .reply(200, RECENTLY_PLAYED);
    let api = client(&http);

    let plays = api.get_recent_plays(1_735_689_600_000, 50).await.unwrap();

    assert_eq!(plays.items.len(), 1);
    assert_eq!(plays.items[0].track_id.as_deref(), Some("t1"));
    assert_eq!(plays.items[0].artist_name.as_deref(), Some("Radiohead"));

    let requests = http.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].url, "http://accounts.test/api/token");
    assert!(requests[0].body.contains("grant_type=refresh_token"));
    assert!(requests[0].body.contains("refresh_token=refresh-1"));
    assert_eq!(requests[1].method, "GET");
    assert_eq!(
        requests[1].url,
        "http://api.test/v1/me/player/recently-played?limit=50&after=1735689600000"
    );
    assert_eq!(requests[1].authorization.as_deref(), Some("Bearer access-1"));
}

#[test_log::test(tokio::test)]
async fn test_cached_access_token_is_reused() {
    let http = ScriptedHttpClient::default()
        .reply(200, TOKEN_RESPONSE)
        .reply(200, r#"{"items": []}"#)
        .reply(200, r#"{"items": []}"#);
    let api = client(&http);

    api.get_recent_plays(0, 50).await.unwrap();
    api.get_recent_plays(0, 50).await.unwrap();

    let posts = http
        .requests()
        .iter()
        .filter(|r| r.method == "POST")
        .count();
    assert_eq!(posts, 1);
}

#[test_log::test(tokio::test)]
async fn test_rate_limit_carries_retry_after() {
    let http = ScriptedHttpClient::default()
        .reply(200, TOKEN_RESPONSE)
        .reply_with_retry_after(429, "7");
    let api = client(&http);

    match api.get_recent_plays(0, 50).await {
        Err(SyncError::RateLimit { retry_after }) => assert_eq!(retry_after, 7),
        other => panic!("Expected rate limit, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_rejected_access_token_forces_refresh() {
    let http = ScriptedHttpClient::default()
        .reply(200, TOKEN_RESPONSE)
        .reply(401, r#"{"error": {"status": 401, "message": "The access token expired"}}"#)
        .reply(200, TOKEN_RESPONSE)
        .reply(200, r#"{"items": []}"#);
    let api = client(&http);

    assert!(matches!(
        api.get_recent_plays(0, 50).await,
        Err(SyncError::TransientFetch(_))
    ));
    assert!(api.token().access_token.is_none());

    api.get_recent_plays(0, 50).await.unwrap();
    let methods: Vec<String> = http.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec!["POST", "GET", "POST", "GET"]);
}

#[test_log::test(tokio::test)]
async fn test_rejected_refresh_token_is_config_error() {
    let http = ScriptedHttpClient::default().reply(400, r#"{"error": "invalid_grant"}"#);
    let api = client(&http);

    let err = api.get_recent_plays(0, 50).await.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test_log::test(tokio::test)]
async fn test_server_error_is_transient() {
    let http = ScriptedHttpClient::default()
        .reply(200, TOKEN_RESPONSE)
        .reply(502, "Bad Gateway");
    let api = client(&http);

    let err = api.get_recent_plays(0, 50).await.unwrap_err();
    assert!(err.is_transient());
}

#[test_log::test(tokio::test)]
async fn test_rotated_refresh_token_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = TokenPersistence::new(dir.path().join("tokens/client.json"));
    let http = ScriptedHttpClient::default()
        .reply(
            200,
            r#"{"access_token": "access-2", "expires_in": 3600, "refresh_token": "refresh-2"}"#,
        )
        .reply(200, r#"{"items": []}"#);

    let api = client(&http).with_persistence(persistence.clone());
    api.get_recent_plays(0, 50).await.unwrap();

    let saved = persistence.load().unwrap().unwrap();
    assert_eq!(saved.refresh_token, "refresh-2");
    assert_eq!(saved.access_token.as_deref(), Some("access-2"));
}

#[test_log::test(tokio::test)]
async fn test_connect_without_any_token_names_authorize_url() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = TokenPersistence::new(dir.path().join("missing.json"));

    let result = SpotifyClient::connect(
        Box::new(ScriptedHttpClient::default()),
        credentials(),
        None,
        persistence,
    );

    match result {
        Err(SyncError::Config(msg)) => {
            assert!(msg.contains("/authorize?"));
            assert!(msg.contains("user-read-recently-played"));
        }
        Err(e) => panic!("Expected config error, got {e:?}"),
        Ok(_) => panic!("Expected config error"),
    }
}

#[test_log::test(tokio::test)]
async fn test_metadata_lookups() {
    let http = ScriptedHttpClient::default()
        .reply(200, TOKEN_RESPONSE)
        .reply(
            200,
            r#"{"tracks": [{"id": "t1", "name": "Idioteque", "artists": [{"id": "a1", "name": "Radiohead"}],
                "album": {"name": "Kid A", "release_date": "2000-10-02", "images": [{"url": "http://img/1"}]},
                "popularity": 70, "duration_ms": 309000, "explicit": false}, null]}"#,
        )
        .reply(
            200,
            r#"{"artists": [{"id": "a1", "name": "Radiohead", "genres": ["art rock"],
                "followers": {"href": null, "total": 9000000}, "popularity": 82, "images": []}]}"#,
        );
    let api = client(&http);

    let tracks = api
        .get_tracks(&["t1".to_string(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].album_name.as_deref(), Some("Kid A"));
    assert_eq!(tracks[0].album_image.as_deref(), Some("http://img/1"));

    let artists = api.get_artists(&["a1".to_string()]).await.unwrap();
    assert_eq!(artists[0].genres, vec!["art rock"]);
    assert_eq!(artists[0].followers, Some(9_000_000));

    let requests = http.requests();
    assert_eq!(requests[1].url, "http://api.test/v1/tracks?ids=t1%2Cmissing");
    assert_eq!(requests[2].url, "http://api.test/v1/artists?ids=a1");
}
