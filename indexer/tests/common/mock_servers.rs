#![allow(dead_code)]

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct MockExternalServices {
    pub bing: MockServer,
}

impl MockExternalServices {
    pub async fn start() -> Self {
        Self { bing: MockServer::start().await }
    }

    pub fn bing_url(&self) -> String {
        self.bing.uri()
    }

    pub async fn setup_bing_success(&self) {
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.bing)
            .await;
    }

    pub async fn setup_bing_quota_exceeded(&self) {
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&self.bing)
            .await;
    }

    pub async fn setup_bing_rate_limited_then_success(&self) {
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&self.bing)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.bing)
            .await;
    }

    pub fn sample_token_response(&self) -> serde_json::Value {
        json!({ "access_token": "test-access-token", "expires_in": 3600, "token_type": "Bearer" })
    }
}
