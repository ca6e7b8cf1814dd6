use crate::config::{ClientConfig, DEFAULT_CHAT_PATH};
use crate::diagnostics::{DiagnosticKind, DiagnosticLog};
use crate::http::{
    DiagnosticClient, EXCERPT_LIMIT, RequestError, RequestSpec, ResponseBody, TRANSPORT_HINT,
    hint_for_status,
};
use crate::llm_client::LlmClient;
use crate::types::Message;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[cfg(test)]
mod tests {
    use super::*;

    fn client(log: &DiagnosticLog) -> DiagnosticClient {
        DiagnosticClient::with_client(reqwest::Client::new(), log.clone())
    }

    #[test]
    fn test_status_hints() {
        assert_eq!(hint_for_status(0), "Network blocked or CORS preflight failed");
        assert_eq!(hint_for_status(401), "Auth/Key issue");
        assert_eq!(hint_for_status(404), "Endpoint path mismatch");
        assert_eq!(
            hint_for_status(415),
            "Content-Type not accepted (expect application/json)"
        );
        assert_eq!(hint_for_status(429), "Rate limited");
        assert_eq!(hint_for_status(500), "See response_text");
    }

    #[test]
    fn test_display_url_masks_secrets() {
        let spec = RequestSpec::get("https://search.example.com/v1")
            .query("key", "AIza-secret")
            .query("cx", "engine")
            .query("q", "IBM");
        let url = spec.display_url();

        assert!(!url.contains("AIza-secret"));
        assert!(url.contains("key=***") || url.contains("key=%2A%2A%2A"));
        assert!(url.contains("cx=engine"));
        assert!(url.contains("q=IBM"));

        let plain = RequestSpec::post("https://proxy.example.com/run").display_url();
        assert_eq!(plain, "https://proxy.example.com/run");
    }

    #[tokio::test]
    async fn test_json_response_is_parsed_and_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(query_param("q", "IBM"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [1, 2] })))
            .expect(1)
            .mount(&server)
            .await;

        let log = DiagnosticLog::default();
        let spec = RequestSpec::get(format!("{}/data", server.uri())).query("q", "IBM");
        let body = client(&log)
            .perform(spec, json!({ "tool": "web_search" }))
            .await
            .unwrap();

        assert_eq!(body, ResponseBody::Json(json!({ "items": [1, 2] })));
        let entries = log.newest_first();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, DiagnosticKind::Response);
        assert_eq!(entries[0].status, Some(200));
        assert_eq!(entries[0].context["tool"], "web_search");
        assert!(entries[0].duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_text_response_is_kept_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
            .mount(&server)
            .await;

        let log = DiagnosticLog::default();
        let body = client(&log)
            .perform(RequestSpec::post(server.uri()).json(json!({})), json!({}))
            .await
            .unwrap();

        assert_eq!(body, ResponseBody::Text("accepted".to_string()));
        assert_eq!(body.into_value(), Value::String("accepted".to_string()));
    }

    #[tokio::test]
    async fn test_http_errors_carry_status_hint_and_body() {
        for (status, hint) in [
            (401, "Auth/Key issue"),
            (429, "Rate limited"),
            (500, "See response_text"),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status).set_body_string("upstream said no"))
                .mount(&server)
                .await;

            let log = DiagnosticLog::default();
            let err = client(&log)
                .perform(RequestSpec::get(server.uri()), json!({ "kind": "chat" }))
                .await
                .unwrap_err();

            assert_eq!(err.status(), Some(status));
            assert_eq!(err.hint(), hint);
            let text = err.to_string();
            assert!(text.starts_with(&format!("HTTP {}:", status)));
            assert!(text.contains(hint));
            assert!(text.contains("upstream said no"));

            let entries = log.failures();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].kind, DiagnosticKind::HttpError);
            assert_eq!(entries[0].status, Some(status));
            assert_eq!(entries[0].hint.as_deref(), Some(hint));
            assert_eq!(entries[0].response_text.as_deref(), Some("upstream said no"));
        }
    }

    #[tokio::test]
    async fn test_error_body_excerpt_is_capped() {
        let server = MockServer::start().await;
        let huge = "x".repeat(EXCERPT_LIMIT * 3);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string(huge))
            .mount(&server)
            .await;

        let log = DiagnosticLog::default();
        let err = client(&log)
            .perform(RequestSpec::get(server.uri()), json!({}))
            .await
            .unwrap_err();

        match err {
            RequestError::Http { body_excerpt, .. } => {
                assert_eq!(body_excerpt.chars().count(), EXCERPT_LIMIT)
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
        let recorded = log.newest_first()[0].response_text.clone().unwrap();
        assert_eq!(recorded.chars().count(), EXCERPT_LIMIT);
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded() {
        let log = DiagnosticLog::default();
        let err = client(&log)
            .perform(
                RequestSpec::get("http://127.0.0.1:1/unreachable"),
                json!({ "tool": "proxy_call" }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Transport { .. }));
        assert_eq!(err.status(), None);
        assert_eq!(err.hint(), TRANSPORT_HINT);

        let entries = log.newest_first();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, DiagnosticKind::FetchError);
        assert!(entries[0].error.is_some());
        assert_eq!(entries[0].context["tool"], "proxy_call");
    }

    #[tokio::test]
    async fn test_one_entry_per_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(3)
            .mount(&server)
            .await;

        let log = DiagnosticLog::default();
        let http = client(&log);
        for _ in 0..3 {
            http.perform(RequestSpec::get(server.uri()), json!({}))
                .await
                .unwrap();
        }
        assert_eq!(log.len(), 3);
    }

    fn llm(server: &MockServer, log: &DiagnosticLog) -> LlmClient {
        LlmClient::new(
            ClientConfig {
                base_url: server.uri(),
                chat_path: DEFAULT_CHAT_PATH.to_string(),
                api_key: "sk-test".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            client(log),
        )
    }

    #[tokio::test]
    async fn test_chat_request_shape_with_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DEFAULT_CHAT_PATH))
            .and(header("Authorization", "Bearer sk-test"))
            .and(header("Content-Type", "application/json"))
            .and(header("Accept", "application/json"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "tool_choice": "auto",
                "messages": [{ "role": "user", "content": "hi" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let log = DiagnosticLog::default();
        let tools = json!([{ "type": "function", "function": { "name": "run_code" } }]);
        let body = llm(&server, &log)
            .chat_once(&[Message::user("hi")], &tools)
            .await
            .unwrap();

        assert_eq!(
            body.as_json().unwrap()["choices"][0]["message"]["content"],
            "hello"
        );
        let entry = &log.newest_first()[0];
        assert_eq!(entry.context["kind"], "chat");
        assert_eq!(entry.context["tools"], true);
    }

    #[tokio::test]
    async fn test_request_body_omits_tools_when_disabled() {
        let server = MockServer::start().await;
        let log = DiagnosticLog::default();
        let client = llm(&server, &log);
        let messages = [Message::system("sys"), Message::user("hi")];

        let without = client.request_body(&messages, &Value::Null);
        assert!(without.get("tools").is_none());
        assert!(without.get("tool_choice").is_none());
        assert_eq!(without["messages"][0]["role"], "system");

        let empty = client.request_body(&messages, &json!([]));
        assert!(empty.get("tools").is_none());

        let with = client.request_body(&messages, &json!([{ "type": "function" }]));
        assert_eq!(with["tool_choice"], "auto");
        assert_eq!(with["tools"].as_array().unwrap().len(), 1);
    }
}
