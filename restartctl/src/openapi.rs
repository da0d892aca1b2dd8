//! OpenAPI documentation for the admin API at `/admin/api/v1/*`, served at
//! `/admin/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::{
        security::{ApiKey, ApiKeyValue, SecurityScheme},
        server::Server,
    },
};

use crate::api::{handlers::restart, models::restart as models};
use crate::lifecycle::{
    ActiveRequestSummary, FailureNotice, LifecycleState, RestartAttempt, RestartHistoryEntry, RestartStatus,
};

/// Documents the principal header the authenticating proxy is expected to set.
struct PrincipalHeaderAddon;

impl Modify for PrincipalHeaderAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![Server::new("/admin/api/v1")]);

        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Restartctl-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-restartctl-user",
                    "Principal recorded as the requestor of restart actions. Set by the proxy in front of the admin API.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        restart::request_restart,
        restart::cancel_restart,
        restart::get_restart_status,
        restart::get_restart_history,
    ),
    components(schemas(
        models::RestartCreate,
        models::RestartCreated,
        models::RestartCancel,
        models::RestartCancelled,
        models::RestartHistoryResponse,
        RestartStatus,
        RestartAttempt,
        RestartHistoryEntry,
        FailureNotice,
        ActiveRequestSummary,
        LifecycleState,
    )),
    modifiers(&PrincipalHeaderAddon),
    tags(
        (name = "restart", description = "Graceful restart orchestration"),
    ),
    info(
        title = "restartctl admin API",
        description = "Request, cancel and inspect graceful restarts of the service.",
    )
)]
pub struct ApiDoc;
