// src/main.rs

mod activity;
mod analytics;
mod app_state;
mod attendance;
mod auth;
mod chat;
mod config;
mod dashboard;
mod error;
mod leave;
mod models;
mod policy;
mod project;
mod store;
mod task;
mod time_tracking;
mod user_management;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::{info, warn};

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::error::{extractor_error, reject, stamp_path, AppError};
use crate::store::{MemoryStore, MongoStore, Store};

#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Requests without a bearer token pass through; handlers that need a
        // caller answer 401 themselves via `current_user`.
        if let Some(token) = bearer_token(&req) {
            match verify_token(&req, &token) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                }
                Err(e) => {
                    warn!("Rejected token on {}: {}", req.path(), e);
                    let resp = reject(req.request(), AppError::unauthorized("Invalid or expired token"));
                    let (req_parts, _payload) = req.into_parts();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(stamp_path(res))
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn verify_token(req: &ServiceRequest, token: &str) -> Result<auth::Claims, String> {
    let data = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| "application state is not registered".to_string())?;
    validate_jwt(token, &data.config.jwt_secret).map_err(|e| format!("Token decode error: {}", e))
}

/// Every endpoint, mounted under `/api`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| extractor_error("body", err)))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| extractor_error("query", err)))
        .app_data(web::PathConfig::default().error_handler(|err, _req| extractor_error("path", err)))
        .service(
            web::scope("/api")
                .service(
                    web::scope("/auth")
                        .route("/register", web::post().to(auth::register))
                        .route("/login", web::post().to(auth::login)),
                )
                // USERS
                .service(
                    web::scope("/users")
                        .route("", web::get().to(user_management::get_users))
                        .route("/me", web::get().to(user_management::get_me))
                        .route("/{id}", web::get().to(user_management::get_user_by_id))
                        .route("/{id}/stats", web::get().to(user_management::get_user_stats)),
                )
                // TASKS
                .service(
                    web::scope("/tasks")
                        .route("", web::post().to(task::create))
                        .route("", web::get().to(task::list))
                        .route("/search", web::get().to(task::search))
                        .route("/{id}", web::get().to(task::get))
                        .route("/{id}", web::put().to(task::update))
                        .route("/{id}", web::delete().to(task::delete))
                        .route("/{id}/complete", web::put().to(task::complete)),
                )
                .service(
                    web::scope("/dashboard")
                        .route("/summary", web::get().to(dashboard::summary))
                        .route("/enhanced", web::get().to(dashboard::enhanced))
                        .route("/personal", web::get().to(dashboard::personal)),
                )
                // PROJECTS
                .service(
                    web::scope("/projects")
                        .route("", web::post().to(project::create))
                        .route("", web::get().to(project::list))
                        .service(
                            web::scope("/{id}")
                                .route("", web::get().to(project::get))
                                .route("", web::put().to(project::update))
                                .route("", web::delete().to(project::delete))
                                .route("/financials", web::put().to(project::financials))
                                .route("/financials", web::patch().to(project::financials))
                                .service(
                                    web::scope("/members")
                                        .route("", web::get().to(project::members))
                                        .route("", web::post().to(project::add))
                                        .route("/{user_id}", web::delete().to(project::remove))
                                        .route("/{user_id}/check", web::get().to(project::check)),
                                ),
                        ),
                )
                // CHAT
                .service(
                    web::scope("/chat")
                        .route("/project/{project_id}/group", web::get().to(chat::project_group))
                        .route("/groups/{group_id}", web::get().to(chat::group))
                        .route("/groups/{group_id}/messages", web::get().to(chat::get_messages))
                        .route("/groups/{group_id}/messages", web::post().to(chat::create_message)),
                )
                // TIME TRACKING
                .service(
                    web::scope("/time-tracking")
                        .route("/start", web::post().to(time_tracking::start))
                        .route("/stop", web::post().to(time_tracking::stop))
                        .route("/manual", web::post().to(time_tracking::manual))
                        .route("/running", web::get().to(time_tracking::running))
                        .route("/team", web::get().to(time_tracking::team))
                        .route("/user/{user_id}", web::get().to(time_tracking::for_user))
                        .route("/user/{user_id}/total", web::get().to(time_tracking::total))
                        .route("/task/{task_id}", web::get().to(time_tracking::for_task))
                        .route("/{id}", web::delete().to(time_tracking::delete)),
                )
                .service(
                    web::scope("/activities")
                        .route("/team", web::get().to(activity::get_team_activities))
                        .route("/all", web::get().to(activity::get_all_activities))
                        .route("/recent", web::get().to(activity::get_recent_activities))
                        .route("/user/{user_id}", web::get().to(activity::get_user_activities))
                        .route("/user/{user_id}/range", web::get().to(activity::get_activities_in_range))
                        .route("/user/{user_id}/count", web::get().to(activity::get_activity_count)),
                )
                // LEAVE AND ATTENDANCE
                .service(
                    web::scope("/leave-requests")
                        .route("", web::post().to(leave::submit))
                        .route("", web::get().to(leave::list))
                        .route("/mine", web::get().to(leave::mine))
                        .route("/{id}/review", web::put().to(leave::review))
                        .route("/{id}/cancel", web::put().to(leave::cancel)),
                )
                .service(
                    web::scope("/attendance")
                        .route("/check-in", web::post().to(attendance::post_check_in))
                        .route("/check-out", web::post().to(attendance::post_check_out))
                        .route("/mine", web::get().to(attendance::mine))
                        .route("/user/{user_id}", web::get().to(attendance::for_user)),
                ),
        );
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let store: Arc<dyn Store> = match &config.mongo_uri {
        Some(uri) => {
            let mongo = MongoStore::init(uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Arc::new(mongo)
        }
        None => {
            warn!("MONGO_URI is not set; using the in-memory store, data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = web::Data::new(AppState {
        store,
        config: config.clone(),
    });
    let frontend_origin = config.frontend_origin.clone();

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication)
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use actix_web::http::StatusCode;
    use crate::models::RegisterRequest;
    use actix_web::test;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn state() -> web::Data<AppState> {
        let mut config = Config::new("test-secret");
        config.bcrypt_cost = 4;
        web::Data::new(AppState {
            store: Arc::new(MemoryStore::new()),
            config,
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(Authentication)
                    .app_data($state.clone())
                    .configure(configure_routes),
            )
            .await
        };
    }

    /// Registers straight into the store and signs a token, returning `(user id, token)`.
    async fn seed(state: &web::Data<AppState>, name: &str, email: &str, role: &str) -> (String, String) {
        let user = auth::register_user(
            state.store.as_ref(),
            RegisterRequest {
                name: name.to_string(),
                email: email.to_string(),
                password: "secret1".to_string(),
                role: Some(role.to_string()),
            },
            state.config.bcrypt_cost,
            Utc::now(),
        )
        .await
        .unwrap();
        let token = auth::create_jwt(&user, &state.config, Utc::now()).unwrap();
        (user.id, token)
    }

    fn bearer(token: &str) -> (http::header::HeaderName, String) {
        (http::header::AUTHORIZATION, format!("Bearer {}", token))
    }

    #[actix_web::test]
    async fn login_issues_a_token_that_resolves_the_caller() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({ "name": "Dana", "email": "Dana@Example.com", "password": "secret1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let user_id = body["data"]["userId"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "dana@example.com", "password": "secret1" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["userId"], user_id);
        assert_eq!(body["data"]["role"], "EMPLOYEE");
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/users/me")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], user_id);
        assert!(body["data"].get("passwordHash").is_none());

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "dana@example.com", "password": "wrong-one" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn bad_tokens_and_missing_tokens_get_an_error_envelope() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/tasks")
            .insert_header(bearer("not-a-jwt"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], 401);
        assert_eq!(body["path"], "/api/tasks");

        let req = test::TestRequest::get().uri("/api/dashboard/summary").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["path"], "/api/dashboard/summary");
    }

    #[actix_web::test]
    async fn malformed_bodies_are_validation_failures() {
        let state = state();
        let app = app!(state);
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .insert_header((http::header::CONTENT_TYPE, "application/json"))
            .set_payload("{ not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Validation Failed");
        assert_eq!(body["path"], "/api/auth/register");
        assert!(body["fields"]["body"].is_string());
    }

    #[actix_web::test]
    async fn project_creation_sets_up_group_and_members_and_gates_chat() {
        let state = state();
        let app = app!(state);
        let (_, manager) = seed(&state, "Mia", "mia@example.com", "MANAGER").await;
        let (member_id, member) = seed(&state, "Ola", "ola@example.com", "EMPLOYEE").await;
        let (_, outsider) = seed(&state, "Sam", "sam@example.com", "EMPLOYEE").await;

        let req = test::TestRequest::post()
            .uri("/api/projects")
            .insert_header(bearer(&manager))
            .set_json(json!({ "name": "Apollo", "memberIds": [member_id, "ghost"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let project_id = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/projects/{}/members", project_id))
            .insert_header(bearer(&manager))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let req = test::TestRequest::get()
            .uri(&format!("/api/chat/project/{}/group", project_id))
            .insert_header(bearer(&member))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["name"], "Apollo Group");
        let group_id = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/api/chat/groups/{}/messages", group_id))
            .insert_header(bearer(&member))
            .set_payload("hello team")
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::get()
            .uri(&format!("/api/chat/groups/{}/messages", group_id))
            .insert_header(bearer(&outsider))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["path"], format!("/api/chat/groups/{}/messages", group_id));
    }

    #[actix_web::test]
    async fn timer_runs_one_at_a_time() {
        let state = state();
        let app = app!(state);
        let (_, token) = seed(&state, "Tia", "tia@example.com", "EMPLOYEE").await;

        let start = || {
            test::TestRequest::post()
                .uri("/api/time-tracking/start?description=Focus")
                .insert_header(bearer(&token))
                .to_request()
        };
        let body: Value = test::call_and_read_body_json(&app, start()).await;
        assert_eq!(body["data"]["isRunning"], true);

        let resp = test::call_service(&app, start()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/time-tracking/stop")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["isRunning"], false);

        let req = test::TestRequest::get()
            .uri("/api/time-tracking/running")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["data"].is_null());
    }

    #[actix_web::test]
    async fn search_route_is_not_taken_for_a_task_id() {
        let state = state();
        let app = app!(state);
        let (_, token) = seed(&state, "Lee", "lee@example.com", "MANAGER").await;
        let req = test::TestRequest::get()
            .uri("/api/tasks/search?keyword=report")
            .insert_header(bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"], json!([]));
    }
}
