//! The request/response contract an HTTP listener relies on.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dockyard::api::{self, ErrorEnvelope};
use dockyard::build::BuildRecord;
use dockyard::docker::{
    CancelToken, ContainerEngine, ContainerHandle, EngineError, Inspection, PullStream,
};
use dockyard::service::{BuildService, ServiceSettings};

struct QuickEngine;

impl ContainerEngine for QuickEngine {
    fn pull_image(&self, reference: &str, _cancel: &CancelToken) -> Result<PullStream, EngineError> {
        if reference == "nope" {
            return Err(EngineError::ImageNotFound(reference.into()));
        }
        Ok(PullStream::from_reader(Cursor::new(b"Pulling...\n".to_vec())))
    }

    fn create_container(
        &self,
        _reference: &str,
        _cancel: &CancelToken,
    ) -> Result<ContainerHandle, EngineError> {
        Ok(ContainerHandle("c".into()))
    }

    fn start_container(
        &self,
        _handle: &ContainerHandle,
        _cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn inspect_container(
        &self,
        _handle: &ContainerHandle,
        _cancel: &CancelToken,
    ) -> Result<Inspection, EngineError> {
        Ok(Inspection {
            network_address: "172.17.0.2".into(),
        })
    }
}

fn service() -> BuildService {
    BuildService::new(
        Arc::new(QuickEngine),
        ServiceSettings {
            max_concurrent_builds: 2,
            pull_timeout: Duration::from_secs(5),
        },
    )
}

fn post_build(service: &BuildService, body: &str) -> BuildRecord {
    let response = api::handle(service, "POST", "/builds", body.as_bytes());
    assert_eq!(response.status, 200, "body: {}", response.body);
    serde_json::from_str(&response.body).unwrap()
}

fn get_build(service: &BuildService, id: &str) -> serde_json::Value {
    let response = api::handle(service, "GET", &format!("/build/{id}"), b"");
    assert_eq!(response.status, 200);
    serde_json::from_str(&response.body).unwrap()
}

fn poll_done(service: &BuildService, id: &str) -> serde_json::Value {
    let start = Instant::now();
    loop {
        let value = get_build(service, id);
        if value["done"] == true {
            return value;
        }
        assert!(start.elapsed() < Duration::from_secs(20), "build never finished");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn post_returns_pending_record_then_get_shows_completion() {
    let service = service();
    let body = r#"{"docker_image":"alpine","project_id":"p1","tasks":[{"cmd":"make"}]}"#;
    let response = api::handle(&service, "POST", "/builds", body.as_bytes());
    assert_eq!(response.status, 200);

    let pending: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(pending["done"], false);
    assert_eq!(pending["ip_address"], "");
    assert_eq!(pending["docker_image"], "alpine");
    assert_eq!(pending["project_id"], "p1");
    assert_eq!(pending["tasks"], serde_json::json!([{ "cmd": "make" }]));
    let id = pending["uuid"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let done = poll_done(&service, &id);
    assert_eq!(done["ip_address"], "172.17.0.2");
    assert_eq!(done["logs"], serde_json::json!(["Pulling..."]));
    assert_eq!(done["state"], "done");
    service.shutdown();
}

#[test]
fn list_endpoints_return_arrays() {
    let service = service();

    let empty = api::handle(&service, "GET", "/builds", b"");
    assert_eq!(empty.status, 200);
    assert_eq!(empty.body, "[]");

    let a = post_build(&service, r#"{"docker_image":"alpine","project_id":"p1","tasks":[]}"#);
    let b = post_build(&service, r#"{"docker_image":"alpine","project_id":"p2","tasks":[]}"#);

    let all: Vec<BuildRecord> =
        serde_json::from_str(&api::handle(&service, "GET", "/builds", b"").body).unwrap();
    let ids: Vec<_> = all.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![a.id.clone(), b.id.clone()]);

    let p2 = api::handle(&service, "GET", "/build/project/p2", b"");
    assert_eq!(p2.status, 200);
    let p2: Vec<BuildRecord> = serde_json::from_str(&p2.body).unwrap();
    assert_eq!(p2.len(), 1);
    assert_eq!(p2[0].id, b.id);

    let none = api::handle(&service, "GET", "/build/project/unknown", b"");
    assert_eq!(none.status, 200);
    assert_eq!(none.body, "[]");
    service.shutdown();
}

#[test]
fn unknown_build_is_a_404_envelope() {
    let service = service();
    let response = api::handle(&service, "GET", "/build/does-not-exist", b"");
    assert_eq!(response.status, 404);
    let envelope: ErrorEnvelope = serde_json::from_str(&response.body).unwrap();
    assert_eq!(envelope.code, 404);
    assert!(envelope.error_message.contains("does-not-exist"));
}

#[test]
fn malformed_body_is_rejected_without_creating_a_build() {
    let service = service();
    let response = api::handle(&service, "POST", "/builds", b"{not json");
    assert_eq!(response.status, 400);
    let envelope: ErrorEnvelope = serde_json::from_str(&response.body).unwrap();
    assert_eq!(envelope.code, 400);
    assert!(service.list_all().is_empty());
}

#[test]
fn routing_errors() {
    let service = service();
    assert_eq!(api::handle(&service, "GET", "/nowhere", b"").status, 404);
    assert_eq!(api::handle(&service, "DELETE", "/builds", b"").status, 405);
    assert_eq!(api::handle(&service, "POST", "/build/abc", b"").status, 405);
    // Method names are case-insensitive.
    assert_eq!(api::handle(&service, "get", "/builds", b"").status, 200);
}

#[test]
fn failed_build_is_reported_through_get() {
    let service = service();
    let pending = post_build(&service, r#"{"docker_image":"nope","project_id":"p1"}"#);
    let failed = poll_done(&service, &pending.id);
    assert_eq!(failed["state"], "failed");
    assert_eq!(failed["logs"], serde_json::json!(["error: image not found: nope"]));

    // Other requests are still served.
    assert_eq!(api::handle(&service, "GET", "/builds", b"").status, 200);
    service.shutdown();
}

#[test]
fn submissions_after_shutdown_are_unavailable() {
    let service = service();
    service.shutdown();

    let response = api::handle(
        &service,
        "POST",
        "/builds",
        br#"{"docker_image":"alpine","project_id":"p1"}"#,
    );
    assert_eq!(response.status, 503);
    let envelope: ErrorEnvelope = serde_json::from_str(&response.body).unwrap();
    assert_eq!(envelope.code, 503);
    assert_eq!(envelope.error_message, "build service is shut down");

    // Reads keep working.
    assert_eq!(api::handle(&service, "GET", "/builds", b"").body, "[]");
}
