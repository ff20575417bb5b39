use serde::Serialize;
use tracing::{error, info, Level};
use worker::*;

pub mod carriers;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod store;

#[cfg(test)]
mod test_support;

use crate::clock::WorkerClock;
use crate::config::{SyncConfig, DB_BINDING};
use crate::db::D1Store;
use crate::error::{TrackingError, TrackingResult};
use crate::http::FetchClient;
use crate::models::{ErrorBody, StatusOverride};
use crate::reconcile::Reconciler;

type WorkerReconciler = Reconciler<D1Store, FetchClient, WorkerClock>;

const ALLOWED_HEADERS: [&str; 4] = ["authorization", "x-client-info", "apikey", "content-type"];

#[derive(Serialize)]
struct HealthResponse<'a> {
    service: &'a str,
    status: &'a str,
}

#[event(fetch)]
pub async fn fetch(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    console_error_panic_hook::set_once();

    if req.method() == Method::Options {
        return Response::empty()?.with_cors(&cors());
    }

    let router = Router::new();

    router
        .get("/", |_, _| Response::ok("parcel-tracking-worker online"))
        .get("/health", |_, _| {
            Response::from_json(&HealthResponse {
                service: "parcel-tracking",
                status: "ok",
            })
        })
        // batch over every active, connected carrier integration
        .post_async("/v1/tracking/sync", |_req, ctx| async move {
            let reconciler = match build_reconciler(&ctx.env) {
                Ok(r) => r,
                Err(err) => return error_response(&err),
            };
            json_or_error(reconciler.reconcile_due_batch().await)
        })
        .post_async("/v1/integrations/:id/sync", |_req, ctx| async move {
            let Some(id) = ctx.param("id").map(ToString::to_string) else {
                return error_response(&TrackingError::InvalidRequest("missing integration id".into()));
            };
            let reconciler = match build_reconciler(&ctx.env) {
                Ok(r) => r,
                Err(err) => return error_response(&err),
            };
            json_or_error(reconciler.sync_integration(&id).await)
        })
        .post_async("/v1/integrations/:id/test", |_req, ctx| async move {
            let Some(id) = ctx.param("id").map(ToString::to_string) else {
                return error_response(&TrackingError::InvalidRequest("missing integration id".into()));
            };
            let reconciler = match build_reconciler(&ctx.env) {
                Ok(r) => r,
                Err(err) => return error_response(&err),
            };
            json_or_error(reconciler.test_connection(&id).await)
        })
        // manual staff override
        .post_async("/v1/packages/:id/status", |mut req, ctx| async move {
            let Some(id) = ctx.param("id").map(ToString::to_string) else {
                return error_response(&TrackingError::InvalidRequest("missing package id".into()));
            };
            let body: StatusOverride = match req.json().await {
                Ok(body) => body,
                Err(err) => {
                    return error_response(&TrackingError::InvalidRequest(err.to_string()))
                }
            };
            let reconciler = match build_reconciler(&ctx.env) {
                Ok(r) => r,
                Err(err) => return error_response(&err),
            };
            json_or_error(reconciler.override_status(&id, body).await)
        })
        .run(req, env)
        .await?
        .with_cors(&cors())
}

#[event(scheduled)]
pub async fn scheduled(event: ScheduledEvent, env: Env, _ctx: ScheduleContext) {
    console_error_panic_hook::set_once();

    let reconciler = match build_reconciler(&env) {
        Ok(r) => r,
        Err(err) => {
            error!(cron = %event.cron(), error = %err, "cannot start scheduled tracking sync");
            return;
        }
    };

    match reconciler.reconcile_due_batch().await {
        Ok(summary) => info!(
            cron = %event.cron(),
            success = summary.success,
            updated = summary.packages_updated,
            errors = summary.errors.len(),
            "{}",
            summary.message
        ),
        Err(err) => error!(cron = %event.cron(), error = %err, "scheduled tracking sync failed"),
    }
}

/// Read config, install logging and bind the collaborators for one invocation.
fn build_reconciler(env: &Env) -> TrackingResult<WorkerReconciler> {
    let config = SyncConfig::from_env(env);
    logging::init(config.as_ref().map(|c| c.log_level).unwrap_or(Level::INFO));
    let config = config?;

    let db = env.d1(DB_BINDING)?;
    Ok(Reconciler::new(
        D1Store::new(db),
        FetchClient::new(config.request_timeout),
        WorkerClock,
        config,
    ))
}

fn cors() -> Cors {
    Cors::new()
        .with_origins(vec!["*"])
        .with_allowed_headers(ALLOWED_HEADERS)
}

fn json_or_error<T: Serialize>(result: TrackingResult<T>) -> Result<Response> {
    match result {
        Ok(body) => Response::from_json(&body),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &TrackingError) -> Result<Response> {
    let status = err.http_status();
    if status >= 500 {
        error!(kind = err.kind(), error = %err, "request failed");
    } else {
        info!(kind = err.kind(), error = %err, "request rejected");
    }
    Ok(Response::from_json(&ErrorBody {
        error: err.to_string(),
    })?
    .with_status(status))
}
