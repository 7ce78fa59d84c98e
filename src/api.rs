//! HTTP contract of the build service, independent of any server.
//!
//! [`handle`] maps a method, path and request body onto a facade operation
//! and returns the status code and JSON body to send back. A listener only
//! has to feed requests in and write responses out.

use serde::{Deserialize, Serialize};

use crate::build::Command;
use crate::service::{BuildService, ServiceError};

/// Body returned when serialising the real response fails.
const SERIALIZATION_FALLBACK: &str = r#"{"code":500,"error_message":"Syntax error"}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub error_message: String,
}

/// Body of `POST /builds`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub docker_image: String,
    pub project_id: String,
    #[serde(default)]
    pub tasks: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                log::error!("failed to serialise response: {e}");
                Self {
                    status: 500,
                    body: SERIALIZATION_FALLBACK.to_string(),
                }
            }
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(
            status,
            &ErrorEnvelope {
                code: status,
                error_message: message.into(),
            },
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Builds,
    Build(&'a str),
    ProjectBuilds(&'a str),
}

fn route(path: &str) -> Option<Route<'_>> {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["builds"] => Some(Route::Builds),
        ["build", "project", id] if !id.is_empty() => Some(Route::ProjectBuilds(*id)),
        ["build", id] if !id.is_empty() => Some(Route::Build(*id)),
        _ => None,
    }
}

/// Dispatch one request.
pub fn handle(service: &BuildService, method: &str, path: &str, body: &[u8]) -> Response {
    let Some(route) = route(path) else {
        return Response::error(404, format!("no route for {path}"));
    };

    match (method.to_ascii_uppercase().as_str(), route) {
        ("GET", Route::Builds) => Response::json(200, &service.list_all()),
        ("POST", Route::Builds) => submit(service, body),
        ("GET", Route::Build(id)) => match service.get_by_id(id) {
            Ok(record) => Response::json(200, &record),
            Err(e) => service_error(e),
        },
        ("GET", Route::ProjectBuilds(project_id)) => {
            Response::json(200, &service.list_by_project(project_id))
        }
        (method, _) => Response::error(405, format!("method {method} not allowed on {path}")),
    }
}

fn submit(service: &BuildService, body: &[u8]) -> Response {
    let request: SubmitRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return Response::error(400, format!("invalid build request: {e}")),
    };
    match service.submit(&request.docker_image, &request.project_id, request.tasks) {
        Ok(record) => Response::json(200, &record),
        Err(e) => service_error(e),
    }
}

fn service_error(error: ServiceError) -> Response {
    if error.is_not_found() {
        return Response::error(404, error.to_string());
    }
    if matches!(error, ServiceError::ShutDown) {
        return Response::error(503, error.to_string());
    }
    log::error!("request failed: {error}");
    Response::error(500, error.to_string())
}
