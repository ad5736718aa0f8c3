#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::auth::GENERATED_PASSWORD_LEN;
    use crate::tests::support::{body_json, error_message, get, json as json_request, TestApp, PASSWORD};

    async fn login(t: &TestApp, email: &str, password: &str) -> axum::response::Response {
        t.send(json_request(Method::POST, "/authentication/login", None, json!({ "email": email, "password": password })))
            .await
    }

    #[tokio::test]
    async fn test_login_and_verify() {
        let t = TestApp::new().await;
        let user = t.create_user("someone@example.com", "Sam", "user").await;

        let response = login(&t, "SOMEONE@example.com", PASSWORD).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["user"]["id"], user.id.as_str());
        assert!(body["user"].get("password").is_none());
        let token = body["token"].as_str().unwrap().to_string();

        let response = t.send(get("/authentication/verify", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["email"], "someone@example.com");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let t = TestApp::new().await;
        t.create_user("someone@example.com", "Sam", "user").await;

        let response = login(&t, "someone@example.com", "wrong-password-here").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(response).await, "Invalid credentials.");

        let response = login(&t, "nobody@example.com", PASSWORD).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(response).await, "Invalid credentials.");

        let response = login(&t, "not-an-email", PASSWORD).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t
            .send(json_request(
                Method::POST,
                "/authentication/login",
                None,
                json!({ "email": "someone@example.com", "password": PASSWORD, "admin": true }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_tokens() {
        let t = TestApp::new().await;

        let response = t.send(get("/authentication/verify", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = t.send(get("/authentication/verify", Some("garbage"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(response).await, "Invalid authorization token.");

        // Signed correctly but for an account that does not exist
        let token = crate::auth::issue_token(&t.state.config.auth, "ghost").unwrap();
        let response = t.send(get("/authentication/verify", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_creates_user_with_initial_password() {
        let t = TestApp::new().await;
        let (_, admin) = t.admin().await;

        let response = t
            .send(json_request(
                Method::POST,
                "/users",
                Some(&admin),
                json!({ "firstName": "New", "lastName": "Person", "email": "new@example.com" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["role"], "user");
        let initial = created["initialPassword"].as_str().unwrap().to_string();
        assert_eq!(initial.len(), GENERATED_PASSWORD_LEN);

        let response = login(&t, "new@example.com", &initial).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = t
            .send(json_request(
                Method::POST,
                "/users",
                Some(&admin),
                json!({ "firstName": "Again", "lastName": "Person", "email": "NEW@example.com" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(error_message(response).await, "User already created.");

        let response = t
            .send(json_request(
                Method::POST,
                "/users",
                Some(&admin),
                json!({ "firstName": "Odd", "lastName": "Role", "email": "odd@example.com", "role": "owner" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_members_cannot_create_users() {
        let t = TestApp::new().await;
        let (_, member) = t.member().await;

        let response = t
            .send(json_request(
                Method::POST,
                "/users",
                Some(&member),
                json!({ "firstName": "New", "lastName": "Person", "email": "new@example.com" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(t.state.db.get_user_by_email("new@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_users_paging() {
        let t = TestApp::new().await;
        let (_, admin) = t.admin().await;
        t.create_user("b@example.com", "Bea", "user").await;
        t.create_user("c@example.com", "Cid", "user").await;

        let response = t.send(get("/users?page=2&limit=2", Some(&admin))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        assert_eq!(page["count"], 3);
        assert_eq!(page["pages"], 2);
        assert_eq!(page["data"].as_array().unwrap().len(), 1);
        assert_eq!(page["data"][0]["firstName"], "Cid");
    }

    #[tokio::test]
    async fn test_reading_users() {
        let t = TestApp::new().await;
        let (admin, admin_token) = t.admin().await;
        let (member, member_token) = t.member().await;

        let response = t.send(get("/users/@me", Some(&member_token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], member.id.as_str());

        let response = t.send(get(&format!("/users/{}", member.id), Some(&member_token))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = t.send(get(&format!("/users/{}", admin.id), Some(&member_token))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = t.send(get(&format!("/users/{}", member.id), Some(&admin_token))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["email"], "member@example.com");

        let response = t.send(get("/users/unknown", Some(&admin_token))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_message(response).await, "The user you are looking for does not exist.");
    }

    #[tokio::test]
    async fn test_current_user_is_rate_limited() {
        let t = TestApp::new().await;
        let (_, token) = t.member().await;

        for _ in 0..5 {
            let response = t.send(get("/users/@me", Some(&token))).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = t.send(get("/users/@me", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_password_update() {
        let t = TestApp::new().await;
        let (admin, _) = t.admin().await;
        let (_, token) = t.member().await;
        let new_password = "another-long-secret";

        let update = |id: &str, body: serde_json::Value| {
            json_request(Method::POST, &format!("/users/{}/password/update", id), Some(&token), body)
        };

        let response = t.send(update("@me", json!({ "password": PASSWORD }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, "Invalid body provided");

        let response = t.send(update("@me", json!({ "password": PASSWORD, "newPassword": PASSWORD }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(response).await, "Passwords have to be different");

        let response = t.send(update("@me", json!({ "password": "not-my-password", "newPassword": new_password }))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(response).await, "Current password is incorrect");

        let response = t.send(update("@me", json!({ "password": PASSWORD, "newPassword": "short" }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t.send(update(&admin.id, json!({ "password": PASSWORD, "newPassword": new_password }))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = t.send(update("@me", json!({ "password": PASSWORD, "newPassword": new_password }))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "The password was changed successfully");

        assert_eq!(login(&t, "member@example.com", PASSWORD).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(login(&t, "member@example.com", new_password).await.status(), StatusCode::OK);
    }
}
