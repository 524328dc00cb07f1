use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::content::RawHtml;
use rocket::serde::json::Json;
use rocket::{get, post, put, routes, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use common::Config;

use crate::distribution::{self, DistributeOptions, DistributeOutcome};
use crate::email::{templates, unsubscribe_url, EmailKind, Mailer, OutboundEmail};
use crate::error::Error;
use crate::generator::{self, GenerateOutcome};
use crate::llm::LlmProvider;
use crate::metrics::{self, RecordOutcome, WebhookEvent};
use crate::storage::{self, StoryUpdate};

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub mailer: Arc<dyn Mailer>,
    pub llm: Option<Arc<dyn LlmProvider>>,
}

type ApiResponse = (Status, Json<Value>);

fn ok(body: Value) -> ApiResponse {
    (Status::Ok, Json(body))
}

fn api_error(status: Status, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

/// Map the domain error taxonomy onto HTTP statuses with a JSON error body.
fn from_domain(err: Error) -> ApiResponse {
    let status = match &err {
        Error::Validation(_) => Status::BadRequest,
        Error::NotFound(_) => Status::NotFound,
        Error::Precondition(_) => Status::Conflict,
        Error::Transport(_) => Status::BadGateway,
        Error::Storage(_) => Status::InternalServerError,
    };
    api_error(status, err.to_string())
}

/// Request guard for the `x-admin-key` shared-secret header.
pub struct AdminKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let secret = req
            .rocket()
            .state::<AppState>()
            .and_then(|s| s.config.admin_secret());

        match (req.headers().get_one("x-admin-key"), secret) {
            (Some(provided), Some(expected)) if provided == expected => Outcome::Success(AdminKey),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning simple JSON with uptime.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
    })
}

#[derive(Deserialize)]
struct SubscribeRequest {
    email: String,
}

/// Very small shape check; real validation happens at the transport when a
/// message is actually sent.
fn looks_like_email(s: &str) -> bool {
    let mut parts = s.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        _ => false,
    }
}

/// Subscribe endpoint: upsert-by-email, reactivating a previous unsubscribe.
#[post("/api/subscribe", data = "<body>")]
async fn subscribe(state: &State<AppState>, body: Json<SubscribeRequest>) -> ApiResponse {
    let email = body.email.trim().to_lowercase();
    if !looks_like_email(&email) {
        return api_error(Status::BadRequest, "Invalid email address");
    }

    let created = match storage::upsert_subscriber(&state.db, &email).await {
        Ok(created) => created,
        Err(e) => {
            tracing::error!("subscribe failed: {}", e);
            return api_error(Status::InternalServerError, "Internal Server Error");
        }
    };

    // The welcome email is best-effort: the subscription is already persisted.
    let unsubscribe = unsubscribe_url(&state.config.admin.app_url, &email);
    let welcome = OutboundEmail {
        to: email.clone(),
        subject: "🌙 Welcome to Bedtime Stories!".into(),
        html: templates::welcome_html(&unsubscribe),
        kind: EmailKind::Welcome,
    };
    if let Err(e) = state.mailer.send(&welcome).await {
        tracing::warn!("welcome email to {} failed: {}", email, e);
    }

    ok(json!({
        "message": "Subscribed successfully",
        "created": created,
    }))
}

/// Unsubscribe link target: idempotently deactivates the subscriber and
/// renders a small confirmation page.
#[get("/api/unsubscribe?<email>")]
async fn unsubscribe(
    state: &State<AppState>,
    email: Option<String>,
) -> std::result::Result<RawHtml<&'static str>, Status> {
    let email = match email {
        Some(e) if !e.is_empty() => e,
        _ => return Err(Status::BadRequest),
    };

    storage::deactivate_subscriber(&state.db, &email)
        .await
        .map_err(|e| {
            tracing::error!("unsubscribe failed: {}", e);
            Status::InternalServerError
        })?;

    Ok(RawHtml(templates::unsubscribed_page()))
}

/// Approval Gate read path.
#[get("/api/stories/<id>")]
async fn get_story(state: &State<AppState>, id: i64) -> ApiResponse {
    match storage::find_story_by_id(&state.db, id).await {
        Ok(Some(story)) => ok(json!(story)),
        Ok(None) => api_error(Status::NotFound, "Story not found"),
        Err(e) => from_domain(e),
    }
}

/// Approval Gate write path: full-record update, last-writer-wins.
/// Setting status APPROVED is only meaningful from DRAFT but re-approval is
/// not blocked server-side.
#[put("/api/stories/<id>", data = "<body>")]
async fn update_story(state: &State<AppState>, id: i64, body: Json<StoryUpdate>) -> ApiResponse {
    match storage::update_story(&state.db, id, &body).await {
        Ok(Some(story)) => ok(json!(story)),
        Ok(None) => api_error(Status::NotFound, "Story not found or update failed"),
        Err(e) => from_domain(e),
    }
}

/// Delivery-provider webhook receiver. Always 200 for recognized-but-ignored
/// event types, 400 for malformed payloads, 500 for storage failures.
#[post("/api/webhooks/email", data = "<body>")]
async fn email_webhook(state: &State<AppState>, body: Json<Value>) -> ApiResponse {
    let event: WebhookEvent = match serde_json::from_value(body.into_inner()) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("webhook: invalid payload structure: {}", e);
            return api_error(Status::BadRequest, "Invalid payload structure");
        }
    };

    tracing::info!("webhook: received event {}", event.event_type);

    match metrics::record_event(&state.db, &event, Utc::now().date_naive()).await {
        Ok(RecordOutcome::Recorded { .. }) => ok(json!({ "message": "Metrics updated successfully" })),
        Ok(RecordOutcome::Ignored) => ok(json!({ "message": "Event ignored" })),
        Err(e) => {
            tracing::error!("webhook: failed to record event: {}", e);
            api_error(Status::InternalServerError, "Database error")
        }
    }
}

/// Generate entry point, called by the daily trigger. Idempotent: an existing
/// story for the target date is never regenerated.
#[get("/api/cron/generate")]
async fn cron_generate(state: &State<AppState>) -> ApiResponse {
    let llm = match &state.llm {
        Some(l) => l.clone(),
        None => return api_error(Status::InternalServerError, "LLM provider not configured"),
    };

    let mut rng = StdRng::from_entropy();
    let result = generator::run_generate(
        &state.db,
        llm.as_ref(),
        state.mailer.as_ref(),
        &state.config,
        Utc::now(),
        &mut rng,
    )
    .await;

    match result {
        Ok(GenerateOutcome::Created { story_id, title }) => ok(json!({
            "created": true,
            "storyId": story_id,
            "title": title,
            "message": "Story generated successfully",
        })),
        Ok(GenerateOutcome::DraftPending { story_id, title }) => ok(json!({
            "created": false,
            "storyId": story_id,
            "title": title,
            "message": "Resent email for existing draft",
        })),
        Ok(GenerateOutcome::AlreadyPublished { story_id }) => ok(json!({
            "created": false,
            "storyId": story_id,
            "message": "Story already exists for target date",
        })),
        Err(e) => from_domain(e),
    }
}

fn distribute_response(outcome: DistributeOutcome) -> ApiResponse {
    match outcome {
        DistributeOutcome::Completed(report) => ok(json!({
            "message": "Broadcast completed",
            "totalRecipients": report.total,
            "sent": report.sent,
            "failed": report.failed,
        })),
        DistributeOutcome::NoRecipients => ok(json!({ "message": "No active subscribers" })),
        DistributeOutcome::AlreadyRunning => {
            ok(json!({ "message": "Distribution already in progress" }))
        }
    }
}

/// Scheduled distribute entry point: today's story, no re-broadcast.
#[get("/api/cron/distribute")]
async fn cron_distribute(state: &State<AppState>) -> ApiResponse {
    let opts = DistributeOptions::scheduled(&state.config);
    match distribution::distribute(&state.db, state.mailer.as_ref(), &state.config, &opts).await {
        Ok(outcome) => distribute_response(outcome),
        Err(e) => from_domain(e),
    }
}

#[derive(Deserialize)]
struct TriggerRequest {
    action: String,
    #[serde(default)]
    payload: Option<TriggerPayload>,
}

#[derive(Deserialize, Default, Clone)]
struct TriggerPayload {
    email: Option<String>,
    date: Option<NaiveDate>,
    resend: Option<bool>,
}

/// Admin trigger: on-demand actions guarded by the shared-secret header.
/// Used to recover from a missed automatic run; all retry here is manual.
#[post("/api/admin/trigger", data = "<body>")]
async fn admin_trigger(
    _key: AdminKey,
    state: &State<AppState>,
    body: Json<TriggerRequest>,
) -> ApiResponse {
    let payload = body.payload.clone().unwrap_or_default();

    match body.action.as_str() {
        "send_welcome" => {
            let email = match payload.email {
                Some(e) => e,
                None => return api_error(Status::BadRequest, "Email is required"),
            };
            let unsubscribe = unsubscribe_url(&state.config.admin.app_url, &email);
            let send = state
                .mailer
                .send(&OutboundEmail {
                    to: email.clone(),
                    subject: "🌙 Welcome to Bedtime Stories! (Test)".into(),
                    html: templates::welcome_html(&unsubscribe),
                    kind: EmailKind::Welcome,
                })
                .await;
            match send {
                Ok(()) => ok(json!({ "message": format!("Welcome email sent to {}", email) })),
                Err(e) => from_domain(Error::transport(e)),
            }
        }

        "send_story" => {
            let email = match payload.email {
                Some(e) => e,
                None => return api_error(Status::BadRequest, "Email is required"),
            };
            let today = Utc::now().date_naive();
            match distribution::send_story_to(
                &state.db,
                state.mailer.as_ref(),
                &state.config,
                &email,
                today,
            )
            .await
            {
                Ok(_) => ok(json!({ "message": format!("Story email sent to {}", email) })),
                Err(e) => from_domain(e),
            }
        }

        "resend_approval" => {
            let story = match storage::latest_draft(&state.db).await {
                Ok(Some(s)) => s,
                Ok(None) => return api_error(Status::NotFound, "No pending draft stories found"),
                Err(e) => return from_domain(e),
            };
            let review_url = generator::review_url(&state.config, story.id);
            let send = state
                .mailer
                .send(&OutboundEmail {
                    to: state.config.admin.email.clone(),
                    subject: format!("📖 Review Story: {} (Resend)", story.title),
                    html: templates::admin_review_html(
                        &story.title,
                        &review_url,
                        &story.date.to_string(),
                        true,
                    ),
                    kind: EmailKind::AdminApproval,
                })
                .await;
            match send {
                Ok(()) => ok(json!({
                    "message": format!("Approval email resent for \"{}\"", story.title)
                })),
                Err(e) => from_domain(Error::transport(e)),
            }
        }

        "distribute" => {
            let opts = DistributeOptions::admin(
                &state.config,
                payload.date,
                payload.resend.unwrap_or(false),
            );
            match distribution::distribute(&state.db, state.mailer.as_ref(), &state.config, &opts)
                .await
            {
                Ok(outcome) => distribute_response(outcome),
                Err(e) => from_domain(e),
            }
        }

        _ => api_error(Status::BadRequest, "Invalid action"),
    }
}

/// Fill NULL slugs from titles (maintenance path for rows created before the
/// slug field existed).
#[post("/api/admin/fix-slugs")]
async fn fix_slugs(_key: AdminKey, state: &State<AppState>) -> ApiResponse {
    match storage::backfill_slugs(&state.db).await {
        Ok(updated) => ok(json!({ "message": format!("Backfilled {} slugs", updated) })),
        Err(e) => from_domain(e),
    }
}

// ============================================================================
// Database Schema Management
// ============================================================================

/// Ensure the required schema exists. This runs CREATE TABLE IF NOT EXISTS
/// statements for the three core tables and is safe to call at startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    tracing::info!("server: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS stories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            title TEXT NOT NULL,
            summary_bullets TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            slug TEXT,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_stories_date ON stories(date);
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS subscribers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS email_metrics (
            date TEXT NOT NULL,
            email_type TEXT NOT NULL,
            sent_count INTEGER NOT NULL DEFAULT 0,
            delivered_count INTEGER NOT NULL DEFAULT 0,
            opened_count INTEGER NOT NULL DEFAULT 0,
            clicked_count INTEGER NOT NULL DEFAULT 0,
            bounced_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            received_count INTEGER NOT NULL DEFAULT 0,
            unsubscribe_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (date, email_type)
        );
        "#,
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| "failed to ensure schema")?;
    }

    tracing::info!("server: DB schema ensured");
    Ok(())
}

/// Build and launch a Rocket server.
///
/// The DB pool, configuration, mailer and optional LLM provider are provided
/// by the caller; the server must not re-init or migrate the database here.
/// This function blocks until Rocket shuts down.
pub async fn launch_rocket(
    db_pool: Arc<SqlitePool>,
    config: Arc<Config>,
    mailer: Arc<dyn Mailer>,
    llm: Option<Arc<dyn LlmProvider>>,
) -> Result<()> {
    let state = AppState {
        started_at: Utc::now(),
        config: config.clone(),
        db: db_pool.as_ref().clone(), // SqlitePool is already ref-counted
        mailer,
        llm,
    };

    // Apply [server] bind/port from the typed config if present.
    let mut fig = rocket::Config::figment();
    if let Some(server_cfg) = &config.server {
        if let Some(ref bind) = server_cfg.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server_cfg.port {
            fig = fig.merge(("port", port));
        }
    }

    let rocket = rocket::custom(fig).manage(state).mount(
        "/",
        routes![
            health,
            status,
            subscribe,
            unsubscribe,
            get_story,
            update_story,
            email_webhook,
            cron_generate,
            cron_distribute,
            admin_trigger,
            fix_slugs,
        ],
    );

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
