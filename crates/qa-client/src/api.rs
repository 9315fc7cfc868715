//! HTTP bindings for the answer service.
//!
//! One method per endpoint; every authenticated call carries the bearer
//! token and funnels non-success statuses through the shared mapping:
//! 401 becomes [`QaError::AuthExpired`], 403 becomes
//! [`QaError::PasswordRequired`], anything else surfaces the structured
//! `detail` field when the error body carries one.

use reqwest::{Client, Response, StatusCode};

use crate::error::{QaError, Result};
use crate::models::{
    HealthStatus, LoginResponse, QueryRequest, QueryResponse, SessionCreateResponse,
    SessionHistoryResponse, SessionListResponse, SessionSummary,
};
use crate::stream::{frames_from_response, QaFrameStream};

pub struct QaService {
    client: Client,
    base_url: String,
}

impl QaService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let response = self
            .client
            .post(format!("{}/api/auth/login", self.base_url))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(QaError::Api(error_detail(status, &text)));
        }
        Ok(response.json().await?)
    }

    pub async fn change_password(&self, token: &str, new_password: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/auth/change_password", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .form(&[("new_password", new_password)])
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }

    pub async fn query(&self, token: &str, request: &QueryRequest) -> Result<QueryResponse> {
        log::debug!("POST /api/query session={:?}", request.session_id);
        let response = self
            .client
            .post(format!("{}/api/query", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .json(request)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Issue a streaming query; the response body is decoded lazily into
    /// [`crate::models::StreamFrame`]s.
    pub async fn query_stream(&self, token: &str, request: &QueryRequest) -> Result<QaFrameStream> {
        log::debug!("POST /api/query/stream session={:?}", request.session_id);
        let response = self
            .client
            .post(format!("{}/api/query/stream", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .json(request)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(frames_from_response(response))
    }

    pub async fn create_session(
        &self,
        token: &str,
        title: Option<&str>,
    ) -> Result<SessionCreateResponse> {
        let response = self
            .client
            .post(format!("{}/api/session/new", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn list_sessions(&self, token: &str) -> Result<Vec<SessionSummary>> {
        let response = self
            .client
            .get(format!("{}/api/session", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        let response = check_status(response).await?;
        let list: SessionListResponse = response.json().await?;
        Ok(list.sessions)
    }

    pub async fn rename_session(
        &self,
        token: &str,
        session_id: &str,
        title: &str,
    ) -> Result<SessionSummary> {
        let response = self
            .client
            .patch(format!("{}/api/session/{session_id}", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn delete_session(&self, token: &str, session_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/api/session/{session_id}", self.base_url))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }

    pub async fn session_history(
        &self,
        token: &str,
        session_id: &str,
    ) -> Result<SessionHistoryResponse> {
        let response = self
            .client
            .get(format!(
                "{}/api/session/{session_id}/history",
                self.base_url
            ))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(QaError::Api(error_detail(status, &text)));
        }
        Ok(response.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => QaError::AuthExpired,
        StatusCode::FORBIDDEN => QaError::PasswordRequired,
        _ => QaError::Api(error_detail(status, &text)),
    })
}

fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail").and_then(|detail| detail.as_str()) {
            return detail.to_string();
        }
    }
    format!("HTTP {status}: {body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamFrame;
    use futures_util::StreamExt;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(session_id: &str, streaming: bool) -> QueryRequest {
        QueryRequest {
            query: "图书馆几点关门".to_string(),
            top_k: Some(3),
            max_tokens: None,
            streaming,
            session_id: Some(session_id.to_string()),
        }
    }

    #[tokio::test]
    async fn query_parses_answer_and_sources() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(header("Authorization", "Bearer tok-1"))
            .and(body_string_contains("图书馆几点关门"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "answer": "闭馆时间为22:00（来源: 校历.pdf）",
                "sources": [{"source": "校历.pdf", "snippet": "闭馆 22:00", "score": 0.91}],
                "latency_ms": 120.0
            })))
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let response = service.query("tok-1", &request("s-1", false)).await.unwrap();

        assert!(response.answer.contains("22:00"));
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.latency_ms, Some(120.0));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"detail": "凭证无效或已过期"})),
            )
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let error = service
            .query("stale", &request("s-1", false))
            .await
            .unwrap_err();
        assert!(matches!(error, QaError::AuthExpired));
    }

    #[tokio::test]
    async fn forbidden_maps_to_password_required() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query/stream"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({"detail": "请先修改初始密码"})),
            )
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let error = service
            .query_stream("tok-1", &request("s-1", true))
            .await
            .err()
            .unwrap();
        assert!(matches!(error, QaError::PasswordRequired));
    }

    #[tokio::test]
    async fn other_errors_surface_structured_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"detail": "知识库为空"})),
            )
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let error = service
            .query("tok-1", &request("s-1", false))
            .await
            .unwrap_err();
        match error {
            QaError::Api(detail) => assert_eq!(detail, "知识库为空"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unstructured_errors_fall_back_to_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let error = service
            .query("tok-1", &request("s-1", false))
            .await
            .unwrap_err();
        match error {
            QaError::Api(detail) => {
                assert!(detail.contains("502"));
                assert!(detail.contains("bad gateway"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_stream_decodes_frames() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain; charset=utf-8")
                    .set_body_string("你好，世界\n__META__{\"sources\":[]}"),
            )
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let mut frames = service
            .query_stream("tok-1", &request("s-1", true))
            .await
            .unwrap();

        let mut content = String::new();
        let mut meta_seen = false;
        while let Some(frame) = frames.next().await {
            match frame.unwrap() {
                StreamFrame::Content(text) => content.push_str(&text),
                StreamFrame::Meta(_) => meta_seen = true,
            }
        }
        assert_eq!(content, "你好，世界");
        assert!(meta_seen);
    }

    #[tokio::test]
    async fn login_posts_form_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_string_contains("username=20231234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tok-fresh",
                "must_change_password": true,
                "role": "student"
            })))
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let login = service.login("20231234", "secret").await.unwrap();
        assert_eq!(login.token, "tok-fresh");
        assert!(login.must_change_password);
    }

    #[tokio::test]
    async fn login_failure_surfaces_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"detail": "用户名或密码错误"})),
            )
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let error = service.login("20231234", "wrong").await.unwrap_err();
        match error {
            QaError::Api(detail) => assert_eq!(detail, "用户名或密码错误"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_endpoints_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/session/new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "s-9",
                "title": "新会话",
                "created_at": 1723800000.0
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessions": [{
                    "session_id": "s-9",
                    "title": "新会话",
                    "last_message": null,
                    "created_at": 1723800000.0,
                    "updated_at": 1723800000.0,
                    "message_count": 0
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/session/s-9"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "deleted"})),
            )
            .mount(&server)
            .await;

        let service = QaService::new(server.uri());
        let created = service.create_session("tok-1", Some("新会话")).await.unwrap();
        assert_eq!(created.session_id, "s-9");

        let sessions = service.list_sessions("tok-1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "新会话");

        service.delete_session("tok-1", "s-9").await.unwrap();
    }
}
