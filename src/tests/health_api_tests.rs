#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, StatusCode};

    use crate::tests::support::{body_json, body_text, error_message, get, request, TestApp};

    #[tokio::test]
    async fn test_health_is_never_cached() {
        let t = TestApp::new().await;

        let response = t.send(get("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "private, max-age=0, no-cache, no-store, must-revalidate"
        );
        assert!(response.headers().contains_key(header::EXPIRES));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");

        let body = body_json(response).await;
        assert_eq!(body["status"], "OK");
        assert!(body["latestCheck"].is_i64());
    }

    #[tokio::test]
    async fn test_readiness_and_version() {
        let t = TestApp::new().await;

        let response = t.send(get("/health/ready", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ready");

        let response = t.send(get("/health/version", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["name"], "galleria");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoints() {
        let t = TestApp::new().await;
        t.state.metrics.record_upload(2048);

        let response = t.send(get("/health/metrics", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let body = body_json(response).await;
        assert_eq!(body["uploads"], 1);
        assert_eq!(body["bytes_uploaded"], 2048);

        let response = t.send(get("/health/metrics/prometheus", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("# TYPE galleria_uploads counter"));
        assert!(text.contains("galleria_bytes_uploaded 2048"));
        assert!(text.contains("galleria_uptime_seconds"));
    }

    #[tokio::test]
    async fn test_sitemap_lists_public_albums() {
        let t = TestApp::new().await;
        let public = t.insert_album("Zebra coast", false).await;
        t.insert_album("Apple draft", true).await;
        let hidden = t.insert_album("Hidden", false).await;
        sqlx::query("UPDATE albums SET hidden = 1 WHERE id = ?").bind(&hidden).execute(t.state.db.pool()).await.unwrap();
        t.insert_album("Beach", false).await;
        t.insert_file(Some(&public), "zebra.png", 1).await;

        let response = t.send(get("/sitemap", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let entries = body_json(response).await;
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["images"].as_array().unwrap().len(), 0);
        assert_eq!(entries[1]["loc"], format!("/albums/{}", public));
        assert_eq!(entries[1]["changefreq"], "monthly");
        assert_eq!(entries[1]["images"][0]["loc"], "http://localhost:3000/files/zebra.png");
    }

    #[tokio::test]
    async fn test_analytics_unconfigured() {
        let t = TestApp::new().await;
        let (_, token) = t.member().await;

        let response = t.send(get("/analytics", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t.send(get("/analytics", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_message(response).await, "Analytics are not configured.");
    }

    #[tokio::test]
    async fn test_request_validation() {
        let t = TestApp::with_config(|cfg| cfg.storage.max_upload_bytes = 1024).await;

        let response = t.send(get("/files/%2e%2e/galleria.db", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t
            .send(
                request(Method::POST, "/files/upload", None)
                    .header(header::CONTENT_LENGTH, "4096")
                    .body(Body::from(vec![0u8; 4096]))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unknown_routes_fall_through_to_static_files() {
        let t = TestApp::new().await;

        let response = t.send(get("/does-not-exist", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
