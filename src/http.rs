//! HTTP API for report submission and gamification
//!
//! Sits behind the authenticating gateway, which forwards the caller as
//! `x-actor-id` / `x-actor-role` headers.
//!
//! ## Reports
//! - `POST /api/reports/submit` - Submit a session report and accrue points
//! - `GET /api/reports/{id}` - Get one report
//! - `GET /api/reports/patient/{patient_id}?page=&per_page=` - Report history
//!
//! ## Badges
//! - `GET /api/badges` - Badge catalog, lowest threshold first
//! - `POST /api/badges` - Create a badge (therapist)
//! - `GET|PUT|DELETE /api/badges/{id}` - Read, update, delete (therapist)
//!
//! ## Standings
//! - `GET /api/leaderboard?page=&per_page=` - Patients by total points
//! - `GET /api/users/me/badges` - Calling patient's points and badges
//! - `GET /api/users/{id}/badges` - A patient's standing (self or assigned therapist)
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:5001/api/reports/submit \
//!      -H "x-actor-id: 7" -H "x-actor-role: patient" \
//!      -d '{"program_instance_id": 12, "movement_outcomes": [
//!            {"movement_id": 3, "perfect": 3, "imperfect": 2, "undetected": 1}]}'
//! ```

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::db::badges::{CreateBadgeInput, UpdateBadgeInput};
use crate::db::users::Role;
use crate::db::PageRequest;
use crate::error::{GamificationError, Result};
use crate::services::response::{
    bad_request, error_response, from_create_result, from_delete_result, from_option, from_result,
    method_not_allowed, not_found, ok, unauthorized,
};
use crate::services::{Actor, Services, SubmitReportRequest};

const ACTOR_ID_HEADER: &str = "x-actor-id";
const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Pagination query parameters
#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    default_page_size: u32,
    max_page_size: u32,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
            default_page_size: 10,
            max_page_size: 100,
        }
    }

    /// Set listing page sizes
    pub fn with_page_sizes(mut self, default_size: u32, max_size: u32) -> Self {
        self.default_page_size = default_size;
        self.max_page_size = max_size;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, hyper::Error>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route one request. Never fails; errors become JSON responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let method = req.method().clone();
        let path = req.uri().path().trim_end_matches('/').to_string();

        debug!(method = %method, path = %path, "Incoming request");

        let response = self.route(req, &method, &path).await;

        if response.status().is_server_error() {
            warn!(method = %method, path = %path, status = %response.status(), "Request failed");
        } else if response.status().is_client_error() {
            debug!(method = %method, path = %path, status = %response.status(), "Request rejected");
        }
        response
    }

    async fn route<B>(&self, req: Request<B>, method: &Method, path: &str) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        if path == "/health" {
            return match *method {
                Method::GET => self.handle_health().await,
                _ => method_not_allowed(),
            };
        }

        let actor = match actor_from_headers(req.headers()) {
            Ok(actor) => actor,
            Err(msg) => return unauthorized(msg),
        };
        let page = match self.page_request(req.uri().query()) {
            Ok(page) => page,
            Err(e) => return error_response(&e),
        };

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            // Reports
            (&Method::POST, ["api", "reports", "submit"]) => {
                let request: SubmitReportRequest = match read_json(req).await {
                    Ok(request) => request,
                    Err(e) => return error_response(&e),
                };
                let accrual = self.services.accrual.clone();
                from_create_result(blocking(move || accrual.submit(&actor, request)).await)
            }
            (&Method::GET, ["api", "reports", "patient", patient_id]) => {
                let Some(patient_id) = parse_id(patient_id) else {
                    return bad_request("invalid patient id");
                };
                let reports = self.services.reports.clone();
                from_result(
                    blocking(move || reports.list_for_patient(&actor, patient_id, page)).await,
                )
            }
            (&Method::GET, ["api", "reports", id]) => {
                let Some(id) = parse_id(id) else {
                    return bad_request("invalid report id");
                };
                let reports = self.services.reports.clone();
                from_result(blocking(move || reports.get(&actor, id)).await)
            }

            // Badge catalog
            (&Method::GET, ["api", "badges"]) => {
                let badges = self.services.badges.clone();
                from_result(blocking(move || badges.list()).await)
            }
            (&Method::POST, ["api", "badges"]) => {
                let input: CreateBadgeInput = match read_json(req).await {
                    Ok(input) => input,
                    Err(e) => return error_response(&e),
                };
                let badges = self.services.badges.clone();
                from_create_result(blocking(move || badges.create(&actor, input)).await)
            }
            (_, ["api", "badges", id]) => {
                let Some(id) = parse_id(id) else {
                    return bad_request("invalid badge id");
                };
                let badges = self.services.badges.clone();
                match *method {
                    Method::GET => {
                        from_option(blocking(move || badges.get(id)).await, "Badge not found")
                    }
                    Method::PUT => {
                        let input: UpdateBadgeInput = match read_json(req).await {
                            Ok(input) => input,
                            Err(e) => return error_response(&e),
                        };
                        from_result(blocking(move || badges.update(&actor, id, input)).await)
                    }
                    Method::DELETE => {
                        from_delete_result(blocking(move || badges.delete(&actor, id)).await)
                    }
                    _ => method_not_allowed(),
                }
            }

            // Standings
            (&Method::GET, ["api", "leaderboard"]) => {
                let standings = self.services.standings.clone();
                from_result(blocking(move || standings.leaderboard(page)).await)
            }
            (&Method::GET, ["api", "users", "me", "badges"]) => {
                let standings = self.services.standings.clone();
                from_result(blocking(move || standings.my_badges(&actor)).await)
            }
            (&Method::GET, ["api", "users", user, "badges"]) => {
                let Some(user_id) = parse_id(user) else {
                    return bad_request("invalid user id");
                };
                let standings = self.services.standings.clone();
                from_result(blocking(move || standings.standing(&actor, user_id)).await)
            }

            _ => not_found("Not found"),
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Response<Full<Bytes>> {
        let db = self.services.db.clone();
        match blocking(move || db.stats()).await {
            Ok(stats) => ok(&serde_json::json!({
                "status": "ok",
                "users": stats.user_count,
                "badges": stats.badge_count,
                "awards": stats.award_count,
                "reports": stats.report_count,
                "event_subscribers": self.services.events.subscriber_count(),
            })),
            Err(e) => error_response(&e),
        }
    }

    fn page_request(&self, query: Option<&str>) -> Result<PageRequest> {
        let query: PageQuery = serde_urlencoded::from_str(query.unwrap_or(""))
            .map_err(|e| GamificationError::Validation(format!("Invalid query string: {}", e)))?;
        Ok(PageRequest::new(
            query.page,
            query.per_page,
            self.default_page_size,
            self.max_page_size,
        ))
    }
}

/// Resolve the caller from the gateway headers
fn actor_from_headers(headers: &HeaderMap) -> std::result::Result<Actor, &'static str> {
    let user_id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_id)
        .ok_or("missing or invalid x-actor-id header")?;
    let role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Role::parse(&v.to_ascii_lowercase()))
        .ok_or("missing or invalid x-actor-role header")?;
    Ok(Actor { user_id, role })
}

fn parse_id(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().filter(|id| *id > 0)
}

async fn read_json<T, B>(req: Request<B>) -> Result<T>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Display,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| GamificationError::Validation(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

/// Run a synchronous service call off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GamificationError::Persistence(format!("Worker task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::programs::tests::program_for;
    use crate::db::users::tests::{patient, therapist};
    use crate::db::GamificationDb;
    use crate::points::PointsPolicy;
    use hyper::StatusCode;

    struct TestApp {
        server: HttpServer,
        patient_id: i64,
        other_patient_id: i64,
        therapist_id: i64,
        stranger_id: i64,
        program_id: i64,
    }

    fn app() -> TestApp {
        let db = Arc::new(GamificationDb::open_in_memory().unwrap());
        let app = db
            .with_conn(|conn| {
                let p = patient(conn, "andi");
                let other = patient(conn, "budi");
                let t = therapist(conn, "sari");
                let stranger = therapist(conn, "tono");
                let program = program_for(conn, p.id, t.id);
                Ok((p.id, other.id, t.id, stranger.id, program.id))
            })
            .unwrap();
        let services = Arc::new(Services::new(db, PointsPolicy::default()));
        TestApp {
            server: HttpServer::new(services, "127.0.0.1:0".parse().unwrap()),
            patient_id: app.0,
            other_patient_id: app.1,
            therapist_id: app.2,
            stranger_id: app.3,
            program_id: app.4,
        }
    }

    fn request(
        method: Method,
        uri: &str,
        actor: Option<(i64, &str)>,
        body: &str,
    ) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = actor {
            builder = builder
                .header(ACTOR_ID_HEADER, id.to_string())
                .header(ACTOR_ROLE_HEADER, role);
        }
        builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
    }

    impl TestApp {
        async fn as_patient(&self, method: Method, uri: &str, body: &str) -> Response<Full<Bytes>> {
            let actor = Some((self.patient_id, "patient"));
            self.server.handle(request(method, uri, actor, body)).await
        }

        async fn as_therapist(
            &self,
            method: Method,
            uri: &str,
            body: &str,
        ) -> Response<Full<Bytes>> {
            let actor = Some((self.therapist_id, "therapist"));
            self.server.handle(request(method, uri, actor, body)).await
        }
    }

    async fn json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_duplicate() {
        let app = app();
        let body = format!(
            r#"{{"program_instance_id": {}, "movement_outcomes": [
                {{"movement_id": 1, "perfect": 3, "imperfect": 2, "undetected": 1}}]}}"#,
            app.program_id
        );

        let resp = app.as_patient(Method::POST, "/api/reports/submit", &body).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let result = json(resp).await;
        assert_eq!(result["points_earned"], 41);
        assert_eq!(result["new_total_points"], 41);

        let resp = app.as_patient(Method::POST, "/api/reports/submit", &body).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json(resp).await["retryable"], false);
    }

    #[tokio::test]
    async fn test_missing_actor_is_unauthorized() {
        let app = app();
        let resp = app.server.handle(request(Method::GET, "/api/badges", None, "")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = app();
        let resp = app.as_patient(Method::POST, "/api/reports/submit", "{").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_badge_admin_requires_therapist() {
        let app = app();
        let body = r#"{"name": "Bronze", "point_threshold": 100}"#;

        let resp = app.as_patient(Method::POST, "/api/badges", body).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app.as_therapist(Method::POST, "/api/badges", body).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = json(resp).await["id"].as_i64().unwrap();

        let resp = app.as_therapist(Method::POST, "/api/badges", body).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let uri = format!("/api/badges/{}", id);
        let resp = app.as_therapist(Method::DELETE, &uri, "").await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app.as_patient(Method::GET, &uri, "").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_leaderboard_pagination() {
        let app = app();
        let resp = app.as_patient(Method::GET, "/api/leaderboard?page=1&per_page=5", "").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = json(resp).await;
        assert_eq!(page["current_page"], 1);
        assert_eq!(page["total_items"], 2);

        let resp = app.as_patient(Method::GET, "/api/leaderboard?page=abc", "").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_my_badges_is_patient_only() {
        let app = app();
        let resp = app.as_patient(Method::GET, "/api/users/me/badges", "").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["user_id"], app.patient_id);

        let resp = app.as_therapist(Method::GET, "/api/users/me/badges", "").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_user_badges_limited_to_self_and_assigned_therapist() {
        let app = app();
        let own = format!("/api/users/{}/badges", app.patient_id);

        assert_eq!(app.as_patient(Method::GET, &own, "").await.status(), StatusCode::OK);
        assert_eq!(app.as_therapist(Method::GET, &own, "").await.status(), StatusCode::OK);

        let other = format!("/api/users/{}/badges", app.other_patient_id);
        let resp = app.as_patient(Method::GET, &other, "").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = app.as_therapist(Method::GET, &other, "").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let stranger = Some((app.stranger_id, "therapist"));
        let resp = app.server.handle(request(Method::GET, &own, stranger, "")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = app();
        let resp = app.as_patient(Method::GET, "/api/nothing", "").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let resp = app.server.handle(request(Method::GET, "/health", None, "")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["users"], 4);
    }
}
