//! # keel-api
//!
//! HTTP API server for Keel: REST routes under `/api/*` with
//! session/API-key authentication, capability-string RBAC per route,
//! organization-scoped tenancy, JSON error mapping, and OpenAPI docs.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

#[cfg(test)]
pub mod test_helpers;

pub use error::{ApiError, ErrorResponse};
pub use server::{ApiServer, ApiServerConfig};
pub use state::AppState;

#[cfg(test)]
mod integration_tests {
    //! End-to-end route tests over the in-memory app.

    use crate::test_helpers::TestApp;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use keel_core::Role;
    use serde_json::{json, Value};

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::http::Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_asset_crud_and_duplicate_tag() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/assets",
                    json!({"asset_tag": "AST-0001", "name": "MacBook", "category": "laptop"}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        // Duplicate tag within the org conflicts
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/assets",
                    json!({"asset_tag": "AST-0001", "name": "Other", "category": "monitor"}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .request_as(&manager, get_request("/api/assets"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total_items"], 1);
    }

    #[tokio::test]
    async fn test_member_cannot_write_assets() {
        let app = TestApp::new().await;
        let member = app.user(Role::Member);

        let response = app
            .request_as(
                &member,
                json_request(
                    Method::POST,
                    "/api/assets",
                    json!({"asset_tag": "AST-0002", "name": "MacBook", "category": "laptop"}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Reads are fine
        let response = app.request_as(&member, get_request("/api/assets")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_double_assignment_conflicts() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        // Person to receive the asset
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/people",
                    json!({"first_name": "Ada", "last_name": "Lovelace", "email": "ada@test.example"}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let person = body_json(response).await;
        let person_id = person["id"].as_str().unwrap().to_string();

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/assets",
                    json!({"asset_tag": "AST-0003", "name": "MacBook", "category": "laptop"}),
                ),
            )
            .await;
        let asset = body_json(response).await;
        let asset_id = asset["id"].as_str().unwrap().to_string();

        let assign_uri = format!("/api/assets/{}/assign", asset_id);
        let response = app
            .request_as(
                &manager,
                json_request(Method::POST, &assign_uri, json!({"person_id": person_id})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // At most one active assignment per asset
        let response = app
            .request_as(
                &manager,
                json_request(Method::POST, &assign_uri, json!({"person_id": person_id})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Return, then assignment works again
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    &format!("/api/assets/{}/return", asset_id),
                    json!({}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_validation_rejects_malformed_payload() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        // Empty name fails the length validator
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/assets",
                    json!({"asset_tag": "AST-0004", "name": "", "category": "laptop"}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_workflow_lifecycle_end_to_end() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/workflows/templates",
                    json!({
                        "name": "Onboarding",
                        "kind": "onboarding",
                        "steps": [
                            {"name": "Accounts", "due_in_days": 1},
                            {"name": "Laptop", "due_in_days": 3}
                        ]
                    }),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let template = body_json(response).await;
        let template_id = template["id"].as_str().unwrap().to_string();

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    &format!("/api/workflows/templates/{}/instantiate", template_id),
                    json!({"auto_start": true}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let instance = body_json(response).await;
        let instance_id = instance["id"].as_str().unwrap().to_string();
        assert_eq!(instance["status"], "in_progress");
        let step_ids: Vec<String> = instance["steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(step_ids.len(), 2);

        // Invalid transition: pending -> completed
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    &format!(
                        "/api/workflows/instances/{}/steps/{}/transition",
                        instance_id, step_ids[0]
                    ),
                    json!({"status": "completed"}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Walk both steps to terminal statuses
        for (step_id, path) in [
            (&step_ids[0], vec!["in_progress", "completed"]),
            (&step_ids[1], vec!["skipped"]),
        ] {
            for status in path {
                let response = app
                    .request_as(
                        &manager,
                        json_request(
                            Method::POST,
                            &format!(
                                "/api/workflows/instances/{}/steps/{}/transition",
                                instance_id, step_id
                            ),
                            json!({"status": status}),
                        ),
                    )
                    .await;
                assert_eq!(response.status(), StatusCode::OK);
            }
        }

        // Instance auto-completed with the last terminal step
        let response = app
            .request_as(
                &manager,
                get_request(&format!("/api/workflows/instances/{}", instance_id)),
            )
            .await;
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn test_member_cannot_cancel_instance() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);
        let member = app.user(Role::Member);

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/workflows/templates",
                    json!({"name": "T", "kind": "custom", "steps": [{"name": "Only"}]}),
                ),
            )
            .await;
        let template = body_json(response).await;
        let template_id = template["id"].as_str().unwrap().to_string();

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    &format!("/api/workflows/templates/{}/instantiate", template_id),
                    json!({}),
                ),
            )
            .await;
        let instance = body_json(response).await;
        let instance_id = instance["id"].as_str().unwrap().to_string();

        let cancel_uri = format!("/api/workflows/instances/{}/transition", instance_id);
        let response = app
            .request_as(
                &member,
                json_request(Method::POST, &cancel_uri, json!({"status": "cancelled"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .request_as(
                &manager,
                json_request(Method::POST, &cancel_uri, json!({"status": "cancelled"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rollout_acknowledgment_once() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        // A person sharing the manager's email so the manager can ack
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/people",
                    json!({"first_name": "Mgr", "last_name": "Person", "email": manager.email}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        // Published document
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/documents",
                    json!({"title": "Security Policy", "doc_type": "policy", "body": "Be safe."}),
                ),
            )
            .await;
        let document = body_json(response).await;
        let document_id = document["id"].as_str().unwrap().to_string();

        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    &format!("/api/documents/{}/publish", document_id),
                    json!({}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Rollout to the whole org
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/rollouts",
                    json!({"document_id": document_id, "target": {"kind": "organization"}}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let rollout = body_json(response).await;
        let rollout_id = rollout["id"].as_str().unwrap().to_string();
        assert_eq!(rollout["total"], 1);

        let ack_uri = format!("/api/rollouts/{}/acknowledge", rollout_id);
        let response = app
            .request_as(&manager, json_request(Method::POST, &ack_uri, json!({})))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Acknowledging twice conflicts
        let response = app
            .request_as(&manager, json_request(Method::POST, &ack_uri, json!({})))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // All acks in: rollout can complete
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    &format!("/api/rollouts/{}/complete", rollout_id),
                    json!({}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn test_org_chart_move_rejects_cycle() {
        let app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        let mut ids = Vec::new();
        for (first, last, email) in [
            ("Ceo", "One", "ceo@test.example"),
            ("Eng", "Two", "eng@test.example"),
        ] {
            let response = app
                .request_as(
                    &manager,
                    json_request(
                        Method::POST,
                        "/api/people",
                        json!({"first_name": first, "last_name": last, "email": email}),
                    ),
                )
                .await;
            let body = body_json(response).await;
            ids.push(body["id"].as_str().unwrap().to_string());
        }

        // eng reports to ceo
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/teams/chart/move",
                    json!({"person_id": ids[1], "new_manager_id": ids[0]}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // ceo under eng would loop
        let response = app
            .request_as(
                &manager,
                json_request(
                    Method::POST,
                    "/api/teams/chart/move",
                    json!({"person_id": ids[0], "new_manager_id": ids[1]}),
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_device_sync_is_idempotent() {
        use keel_connectors::{ComplianceState, ManagedDevice, MockMdmConnector};
        use std::sync::Arc;

        let mut app = TestApp::new().await;
        let manager = app.user(Role::Manager);

        let device = ManagedDevice {
            device_id: "dev-1".to_string(),
            name: "LAPTOP-42".to_string(),
            serial_number: Some("SER123".to_string()),
            manufacturer: Some("Apple".to_string()),
            model: Some("MacBook Pro".to_string()),
            operating_system: Some("macOS".to_string()),
            compliance_state: ComplianceState::Compliant,
            primary_user_email: None,
            last_sync_at: None,
        };
        app.state = app
            .state
            .clone()
            .with_mdm(Arc::new(MockMdmConnector::new(vec![device])));

        let response = app
            .request_as(
                &manager,
                json_request(Method::POST, "/api/assets/sync", json!({})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let first = body_json(response).await;
        assert_eq!(first["created"], 1);

        // Unchanged remote list: zero changes
        let response = app
            .request_as(
                &manager,
                json_request(Method::POST, "/api/assets/sync", json!({})),
            )
            .await;
        let second = body_json(response).await;
        assert_eq!(second["created"], 0);
        assert_eq!(second["updated"], 0);
        assert_eq!(second["reassigned"], 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_rejected() {
        let app = TestApp::new().await;
        let router = crate::routes::create_router(app.state.clone());
        use tower::ServiceExt;

        let response = router
            .oneshot(get_request("/api/assets"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
