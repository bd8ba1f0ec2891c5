//! Network front end
//!
//! Serves the store as a small JSON-over-HTTP API:
//!
//! | Route            | Body                              | Reply field |
//! |------------------|-----------------------------------|-------------|
//! | `GET /ping`      |                                   | `message`   |
//! | `GET /list`      |                                   | `services`  |
//! | `POST /get`      | `{service, gpg_password?}`        | `password`  |
//! | `POST /insert`   | `{service, secret}`               |             |
//! | `POST /update`   | `{service, secret}`               |             |
//! | `POST /delete`   | `{service}`                       |             |
//! | `POST /generate` | `{service, policy?}`              | `password`  |
//!
//! Store calls run on the blocking pool since they touch the disk and may
//! spawn gpg. There is no per-service locking: concurrent writes to the same
//! service can interleave.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::protocol::{GenerateBody, GetBody, Request, Response, SecretBody, ServiceBody, Status};
use crate::pwgen;
use crate::service::ServicePath;
use crate::store::Store;

/// Handle one request against `store`
pub fn dispatch(store: &Store, request: Request) -> Response {
    match request {
        Request::Ping => Response::pong(),
        Request::List => match store.list() {
            Ok(services) => {
                let mut names: Vec<String> = services.into_iter().map(|s| s.to_string()).collect();
                names.sort();
                Response::with_services(names)
            }
            Err(e) => e.into(),
        },
        Request::Get { service, passphrase } => with_service(&service, |svc| {
            let plaintext = match passphrase {
                Some(passphrase) => store
                    .with_gateway(store.gateway().with_passphrase(&passphrase))
                    .read(&svc),
                None => store.read(&svc),
            };
            match plaintext {
                Ok(bytes) => password_response(bytes),
                Err(e) => e.into(),
            }
        }),
        Request::Insert { service, secret } => with_service(&service, |svc| {
            match store.insert(&svc, secret.as_bytes()) {
                Ok(()) => Response::ok(),
                Err(e) => e.into(),
            }
        }),
        Request::Update { service, secret } => with_service(&service, |svc| {
            match store.update(&svc, secret.as_bytes()) {
                Ok(()) => Response::ok(),
                Err(e) => e.into(),
            }
        }),
        Request::Delete { service } => with_service(&service, |svc| match store.remove(&svc) {
            Ok(true) => Response::ok(),
            Ok(false) => Response::error(Status::NotFound, format!("Service not found: {}", svc)),
            Err(e) => e.into(),
        }),
        Request::Generate { service, policy } => with_service(&service, |svc| {
            let policy = policy.unwrap_or_default();
            let password = match pwgen::generate(&policy) {
                Ok(password) => password,
                Err(e) => return Response::error(Status::BadRequest, e.to_string()),
            };
            match store.insert(&svc, password.as_bytes()) {
                Ok(()) => Response::with_password(password),
                Err(e) => e.into(),
            }
        }),
    }
}

fn with_service(raw: &str, handle: impl FnOnce(ServicePath) -> Response) -> Response {
    match ServicePath::parse(raw) {
        Ok(svc) => handle(svc),
        Err(e) => e.into(),
    }
}

fn password_response(bytes: Vec<u8>) -> Response {
    match String::from_utf8(bytes) {
        Ok(password) => Response::with_password(password),
        Err(_) => Response::error(Status::InternalError, "Secret is not valid UTF-8"),
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let code = StatusCode::from_u16(self.status.http_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (code, Json(self)).into_response()
    }
}

type SharedStore = Arc<Store>;

/// Run `request` on the blocking pool
async fn run(store: SharedStore, request: Request) -> Response {
    let name = request.name();
    let response = match tokio::task::spawn_blocking(move || dispatch(&store, request)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Request handler failed: {}", e);
            Response::error(Status::InternalError, "Request handler failed")
        }
    };
    debug!(request = name, status = ?response.status, "handled request");
    response
}

/// Answer a JSON body that did not parse
fn rejected(rejection: JsonRejection) -> Response {
    warn!("Rejected request body: {}", rejection.body_text());
    Response::error(Status::BadRequest, rejection.body_text())
}

async fn ping(State(store): State<SharedStore>) -> Response {
    run(store, Request::Ping).await
}

async fn list(State(store): State<SharedStore>) -> Response {
    run(store, Request::List).await
}

async fn get_secret(State(store): State<SharedStore>, body: Result<Json<GetBody>, JsonRejection>) -> Response {
    match body {
        Ok(Json(body)) => run(store, body.into()).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn insert(State(store): State<SharedStore>, body: Result<Json<SecretBody>, JsonRejection>) -> Response {
    match body {
        Ok(Json(SecretBody { service, secret })) => run(store, Request::Insert { service, secret }).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn update(State(store): State<SharedStore>, body: Result<Json<SecretBody>, JsonRejection>) -> Response {
    match body {
        Ok(Json(SecretBody { service, secret })) => run(store, Request::Update { service, secret }).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn delete(State(store): State<SharedStore>, body: Result<Json<ServiceBody>, JsonRejection>) -> Response {
    match body {
        Ok(Json(ServiceBody { service })) => run(store, Request::Delete { service }).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn generate(State(store): State<SharedStore>, body: Result<Json<GenerateBody>, JsonRejection>) -> Response {
    match body {
        Ok(Json(body)) => run(store, body.into()).await,
        Err(rejection) => rejected(rejection),
    }
}

/// Build the API router over `store`
pub fn router(store: Store) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/list", get(list))
        .route("/get", post(get_secret))
        .route("/insert", post(insert))
        .route("/update", post(update))
        .route("/delete", post(delete))
        .route("/generate", post(generate))
        .with_state(Arc::new(store))
}

/// HTTP server in front of a store
pub struct Server {
    store: Store,
}

impl Server {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Serve until the process exits
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!("Listening on http://{}", listener.local_addr()?);
        axum::serve(listener, router(self.store)).await?;
        Ok(())
    }
}
