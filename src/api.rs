//! HTTP-equivalent handlers.
//!
//! No server lives here: each handler maps one endpoint to a status code and a
//! JSON body so any router can mount the engine. [`Api::handle`] is a minimal
//! dispatcher over method and path for hosts that do not want to route
//! themselves.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::SyncError;
use crate::package::PackageUpdate;
use crate::platform::{Platform, PlatformInfo, SyncTarget, default_platforms};
use crate::store::Catalog;
use crate::sync::auth::SyncRequest;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::sync::scheduler::AutoScheduler;
use crate::ui::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created<T: Serialize>(value: &T) -> Self {
        Self::json(201, value)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: json!({ "error": message.into() }),
        }
    }

    fn not_found(what: impl Into<String>) -> Self {
        Self::from(SyncError::NotFound(what.into()))
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self {
                status: 500,
                body: json!({ "error": "Failed to encode response", "details": e.to_string() }),
            },
        }
    }
}

impl From<SyncError> for ApiResponse {
    fn from(err: SyncError) -> Self {
        let status = err.status_code();
        let body = match &err {
            SyncError::Denied(reason) => {
                json!({ "error": "Sync operation not allowed", "reason": reason.to_string() })
            }
            SyncError::AlreadyRunning(target) => {
                json!({ "error": "Sync already in progress", "target": target })
            }
            SyncError::SweepRunning => json!({ "error": "Auto sync already in progress" }),
            SyncError::NotFound(_) => json!({ "error": err.to_string() }),
            SyncError::Fetch(_)
            | SyncError::Store(_)
            | SyncError::Configuration(_)
            | SyncError::Aborted(_) => {
                json!({ "error": "Internal error", "details": err.to_string() })
            }
        };
        Self { status, body }
    }
}

fn parse_target(raw: &str) -> Result<SyncTarget, ApiResponse> {
    raw.parse()
        .map_err(|_| ApiResponse::not_found(format!("Sync target '{raw}'")))
}

pub struct Api {
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: Arc<AutoScheduler>,
    catalog: Arc<dyn Catalog>,
}

impl Api {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        scheduler: Arc<AutoScheduler>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            catalog,
        }
    }

    fn authorize_write(&self, request: &SyncRequest) -> Result<(), ApiResponse> {
        self.orchestrator
            .auth()
            .is_write_allowed(request)
            .into_result()
            .map_err(ApiResponse::from)
    }

    /// GET /sync/{target}
    pub fn get_sync(&self, target: &str) -> ApiResponse {
        match parse_target(target) {
            Ok(target) => ApiResponse::json(200, &self.orchestrator.status(target)),
            Err(resp) => resp,
        }
    }

    /// POST /sync/{target}
    pub fn post_sync(&self, target: &str, request: &SyncRequest) -> ApiResponse {
        let target = match parse_target(target) {
            Ok(target) => target,
            Err(resp) => return resp,
        };
        match self.orchestrator.trigger_sync(target, request) {
            Ok(state) => ApiResponse::ok(json!({
                "message": format!("{} package sync started", target.display_name()),
                "status": state,
            })),
            Err(e) => e.into(),
        }
    }

    /// GET /auto-sync
    pub fn get_auto_sync(&self) -> ApiResponse {
        ApiResponse::json(200, &self.scheduler.status())
    }

    /// POST /auto-sync. Resolves once the sweep, if one was due, has finished.
    pub async fn post_auto_sync(&self, request: &SyncRequest) -> ApiResponse {
        match self.scheduler.maybe_run_all(request).await {
            Ok(report) => ApiResponse::json(200, &report),
            Err(e) => e.into(),
        }
    }

    /// POST /init-platforms
    pub async fn init_platforms(&self, request: &SyncRequest) -> ApiResponse {
        if let Err(resp) = self.authorize_write(request) {
            return resp;
        }
        let seeded = async {
            let inserted = self.catalog.seed_platforms(&default_platforms()).await?;
            let platforms = self.catalog.list_platforms().await?;
            Ok::<_, SyncError>((inserted, platforms))
        }
        .await;
        match seeded {
            Ok((inserted, platforms)) => {
                emit(
                    Level::Info,
                    "platforms.seeded",
                    &format!("Seeded {inserted} platform rows"),
                    Some(json!({ "inserted": inserted })),
                );
                ApiResponse::ok(json!({
                    "message": "Platforms initialized",
                    "inserted": inserted,
                    "platforms": platforms,
                }))
            }
            Err(e) => ApiResponse {
                status: 500,
                body: json!({ "error": "Failed to initialize platforms", "details": e.to_string() }),
            },
        }
    }

    /// GET /platforms
    pub async fn list_platforms(&self) -> ApiResponse {
        match self.catalog.list_platforms().await {
            Ok(platforms) => ApiResponse::json(200, &platforms),
            Err(e) => e.into(),
        }
    }

    /// POST /platforms
    pub async fn create_platform(&self, request: &SyncRequest, platform: &PlatformInfo) -> ApiResponse {
        if let Err(resp) = self.authorize_write(request) {
            return resp;
        }
        if platform.id.trim().is_empty() || platform.name.trim().is_empty() {
            return ApiResponse::bad_request("Platform id and name are required");
        }
        match self.catalog.create_platform(platform).await {
            Ok(created) => ApiResponse::created(&created),
            Err(e) => e.into(),
        }
    }

    /// GET /platforms/{id}
    pub async fn get_platform(&self, id: &str) -> ApiResponse {
        match self.catalog.get_platform(id).await {
            Ok(Some(platform)) => ApiResponse::json(200, &platform),
            Ok(None) => ApiResponse::not_found(format!("Platform '{id}'")),
            Err(e) => e.into(),
        }
    }

    /// PUT /platforms/{id}
    pub async fn update_platform(
        &self,
        request: &SyncRequest,
        id: &str,
        platform: &PlatformInfo,
    ) -> ApiResponse {
        if let Err(resp) = self.authorize_write(request) {
            return resp;
        }
        match self.catalog.update_platform(id, platform).await {
            Ok(Some(updated)) => ApiResponse::json(200, &updated),
            Ok(None) => ApiResponse::not_found(format!("Platform '{id}'")),
            Err(e) => e.into(),
        }
    }

    /// DELETE /platforms/{id}
    pub async fn delete_platform(&self, request: &SyncRequest, id: &str) -> ApiResponse {
        if let Err(resp) = self.authorize_write(request) {
            return resp;
        }
        match self.catalog.delete_platform(id).await {
            Ok(true) => ApiResponse::ok(json!({ "message": "Platform deleted", "id": id })),
            Ok(false) => ApiResponse::not_found(format!("Platform '{id}'")),
            Err(e) => e.into(),
        }
    }

    /// GET /platforms/{id}/packages
    pub async fn list_packages(&self, platform: &str) -> ApiResponse {
        let Ok(platform) = platform.parse::<Platform>() else {
            return ApiResponse::not_found(format!("Platform '{platform}'"));
        };
        match self.catalog.list_packages(platform).await {
            Ok(packages) => ApiResponse::json(200, &packages),
            Err(e) => e.into(),
        }
    }

    /// GET /packages/{id}
    pub async fn get_package(&self, id: i64) -> ApiResponse {
        match self.catalog.get_package(id).await {
            Ok(Some(package)) => ApiResponse::json(200, &package),
            Ok(None) => ApiResponse::not_found(format!("Package {id}")),
            Err(e) => e.into(),
        }
    }

    /// PUT /packages/{id}
    pub async fn update_package(
        &self,
        request: &SyncRequest,
        id: i64,
        update: &PackageUpdate,
    ) -> ApiResponse {
        if let Err(resp) = self.authorize_write(request) {
            return resp;
        }
        match self.catalog.update_package(id, update).await {
            Ok(Some(updated)) => ApiResponse::json(200, &updated),
            Ok(None) => ApiResponse::not_found(format!("Package {id}")),
            Err(e) => e.into(),
        }
    }

    /// DELETE /packages/{id}
    pub async fn delete_package(&self, request: &SyncRequest, id: i64) -> ApiResponse {
        if let Err(resp) = self.authorize_write(request) {
            return resp;
        }
        match self.catalog.delete_package(id).await {
            Ok(true) => ApiResponse::ok(json!({ "message": "Package deleted", "id": id })),
            Ok(false) => ApiResponse::not_found(format!("Package {id}")),
            Err(e) => e.into(),
        }
    }

    /// Dispatch on method and path. `body` is the decoded JSON request body.
    pub async fn handle(
        &self,
        method: &str,
        path: &str,
        request: &SyncRequest,
        body: Option<Value>,
    ) -> ApiResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let method = method.to_ascii_uppercase();

        match (method.as_str(), segments.as_slice()) {
            ("GET", ["sync", target]) => self.get_sync(target),
            ("POST", ["sync", target]) => self.post_sync(target, request),
            ("GET", ["auto-sync"]) => self.get_auto_sync(),
            ("POST", ["auto-sync"]) => self.post_auto_sync(request).await,
            ("POST", ["init-platforms"]) => self.init_platforms(request).await,
            ("GET", ["platforms"]) => self.list_platforms().await,
            ("POST", ["platforms"]) => match decode_body::<PlatformInfo>(body, "platform") {
                Ok(platform) => self.create_platform(request, &platform).await,
                Err(resp) => resp,
            },
            ("GET", ["platforms", id]) => self.get_platform(id).await,
            ("PUT", ["platforms", id]) => match decode_body::<PlatformInfo>(body, "platform") {
                Ok(platform) => self.update_platform(request, id, &platform).await,
                Err(resp) => resp,
            },
            ("DELETE", ["platforms", id]) => self.delete_platform(request, id).await,
            ("GET", ["platforms", id, "packages"]) => self.list_packages(id).await,
            ("GET", ["packages", id]) => match id.parse() {
                Ok(id) => self.get_package(id).await,
                Err(_) => ApiResponse::bad_request(format!("Invalid package id '{id}'")),
            },
            ("PUT", ["packages", id]) => match id.parse() {
                Ok(id) => match decode_body::<PackageUpdate>(body, "package update") {
                    Ok(update) => self.update_package(request, id, &update).await,
                    Err(resp) => resp,
                },
                Err(_) => ApiResponse::bad_request(format!("Invalid package id '{id}'")),
            },
            ("DELETE", ["packages", id]) => match id.parse() {
                Ok(id) => self.delete_package(request, id).await,
                Err(_) => ApiResponse::bad_request(format!("Invalid package id '{id}'")),
            },
            _ => ApiResponse::not_found(format!("Route {method} /{}", segments.join("/"))),
        }
    }
}

fn decode_body<T: DeserializeOwned>(body: Option<Value>, what: &str) -> Result<T, ApiResponse> {
    let body = body.ok_or_else(|| ApiResponse::bad_request("Request body required"))?;
    serde_json::from_value(body)
        .map_err(|e| ApiResponse::bad_request(format!("Invalid {what}: {e}")))
}
