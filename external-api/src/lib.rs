//! # Healthcheck & API
//!
//! This crate provides http api's for healthcheck, election status, and
//! metrics. It exposes the following endpoints:
//!
//! /health
//! /ping
//! /leader
//! /metrics
//! /metrics-text
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity, clippy::too_many_arguments)]

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, extract::Extension, routing};
use leader_election::ElectionStatus;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

pub use crate::models::{Health, State};

pub mod metrics;

/// The task runner for the [`ExternalApi`]
#[derive(Debug)]
pub struct ExternalApiGuard {
    task_handle: JoinHandle<()>,
}

impl ExternalApiGuard {
    /// Mutable access to the server task, for startup checks.
    pub fn task(&mut self) -> &mut JoinHandle<()> {
        &mut self.task_handle
    }
}

impl Drop for ExternalApiGuard {
    fn drop(&mut self) {
        trace!("ExternalApiGuard drop called");
        self.task_handle.abort();
    }
}

/// Listens to relevant channels to gather information about
/// the running election and reports this data in an HTTP API
#[derive(Debug)]
pub struct ExternalApi {
    tx: mpsc::Sender<Health>,
    rx: mpsc::Receiver<Health>,
    addr: SocketAddr,
    state: State,
    status: watch::Receiver<ElectionStatus>,
}

impl ExternalApi {
    /// Create a new ExternalApi instance
    pub fn new(addr: SocketAddr, status: watch::Receiver<ElectionStatus>) -> Self {
        trace!("starting external api");
        let (tx, rx) = mpsc::channel(10);
        let state = models::blank_health();
        Self {
            tx,
            rx,
            addr,
            state,
            status,
        }
    }

    /// clone the health sender channel
    pub fn sender(&self) -> mpsc::Sender<Health> {
        self.tx.clone()
    }

    /// Listen to Health changes over the channel
    async fn listen_status(mut rx: mpsc::Receiver<Health>, state: State) -> Result<()> {
        while let Some(health) = rx.recv().await {
            let mut guard = state.lock();
            if *guard != health {
                debug!(%health, "health changed");
                *guard = health;
            }
        }
        info!("listen health exited-- nothing listening");
        Ok(())
    }

    /// Build the router serving every endpoint
    fn router(state: State, status: watch::Receiver<ElectionStatus>) -> Router {
        Router::new()
            .route("/health", routing::get(handlers::ok))
            .route("/ping", routing::get(handlers::ping))
            .route("/leader", routing::get(handlers::leader))
            .route("/metrics", routing::get(handlers::metrics))
            .route("/metrics-text", routing::get(handlers::metrics_text))
            .layer(Extension(state))
            .layer(Extension(status))
    }

    /// serve the HTTP external api until `token` is cancelled
    async fn run(
        addr: SocketAddr,
        state: State,
        status: watch::Receiver<ElectionStatus>,
        token: CancellationToken,
    ) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        let app = Self::router(state, status);

        debug!("external API listening on {}", addr);

        axum::serve(tcp, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        Ok(())
    }

    /// Kick off the HTTP service and start listening on the health channel.
    /// Both stop once `token` is cancelled.
    pub fn start(self, token: CancellationToken) -> ExternalApiGuard {
        let Self {
            tx,
            rx,
            addr,
            state,
            status,
        } = self;
        // keep the sender alive so the health listener only stops on shutdown
        let task_handle = tokio::spawn(async move {
            let _tx = tx;
            let res = tokio::select! {
                res = ExternalApi::run(addr, state.clone(), status, token.clone()) => res,
                res = ExternalApi::listen_status(rx, state) => res,
            };
            if let Err(err) = res {
                error!(?err, "external API task returned with error");
            }
        });
        ExternalApiGuard { task_handle }
    }

    /// Start the API with a token that is never cancelled; it stops when the
    /// guard is dropped.
    pub fn serve(self) -> ExternalApiGuard {
        self.start(CancellationToken::new())
    }
}

mod handlers {
    use axum::{
        Json,
        body::Body,
        extract::Extension,
        http::header,
        http::{Response, StatusCode},
        response::IntoResponse,
    };
    use leader_election::ElectionStatus;
    use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
    use tokio::sync::watch;
    use tracing::error;

    use crate::metrics::{START_TIME, UPTIME};
    use crate::models::{Health, ServerResult, State};

    pub(crate) async fn ok(Extension(state): Extension<State>) -> ServerResult<impl IntoResponse> {
        Ok(match *state.lock() {
            Health::Good => StatusCode::OK,
            Health::Bad => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    pub(crate) async fn leader(
        Extension(status): Extension<watch::Receiver<ElectionStatus>>,
    ) -> ServerResult<impl IntoResponse> {
        let status = status.borrow().clone();
        Ok(Json(status))
    }

    pub(crate) async fn metrics() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = ProtobufEncoder::new();
        let mut buf = Vec::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error protobuf encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn metrics_text() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = String::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode_utf8(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error text encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn ping() -> impl IntoResponse {
        StatusCode::OK
    }
}

/// Various models for API responses
pub mod models {
    use axum::response::IntoResponse;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::{fmt, sync::Arc};

    /// The overall health of the system
    pub type State = Arc<Mutex<Health>>;
    /// Health is binary Good/Bad at the moment
    #[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Health {
        /// Report good health
        Good,
        /// Report bad health
        Bad,
    }

    impl fmt::Display for Health {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}",
                match *self {
                    Health::Good => "GOOD",
                    Health::Bad => "BAD",
                }
            )
        }
    }

    pub(crate) fn blank_health() -> State {
        Arc::new(Mutex::new(Health::Bad))
    }

    /// Make our own error that wraps `anyhow::Error`.
    #[derive(Debug)]
    pub struct ServerError(anyhow::Error);
    /// return error result
    pub type ServerResult<T> = Result<T, ServerError>;

    impl IntoResponse for ServerError {
        fn into_response(self) -> axum::response::Response {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}", self.0),
            )
                .into_response()
        }
    }

    impl<E> From<E> for ServerError
    where
        E: Into<anyhow::Error>,
    {
        fn from(err: E) -> Self {
            Self(err.into())
        }
    }
}
