//! TCP front end: accepts connections, frames messages, dispatches to the
//! seat manager.
//!
//! Each connection gets its own task; request handling across connections
//! is bounded by a worker pool of `numberofthreads` permits. Errors are
//! per-request: the reply carries an error code and the server keeps
//! running. `Kill` initiates a graceful shutdown.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::{LicenceError, LicenceResult};
use crate::server::manager::SeatManager;
use crate::server::protocol::{message_frames, ErrorCode, MessageType, Reply, Request};

/// The licence server's socket front end.
pub struct SeatService {
    manager: Arc<SeatManager>,
    config: Arc<ServerConfig>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl SeatService {
    pub fn new(manager: Arc<SeatManager>, config: Arc<ServerConfig>) -> Self {
        let workers = Arc::new(Semaphore::new(config.number_of_threads));
        Self {
            manager,
            config,
            workers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled when the service shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the listener and serve until shut down.
    ///
    /// Failing to bind is fatal; everything after that is per-connection.
    pub async fn run(&self) -> LicenceResult<()> {
        let address = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            LicenceError::ConfigError(format!("cannot bind licence server to {address}: {e}"))
        })?;
        info!("licence server listening on {address}");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "client connected");
                            let manager = Arc::clone(&self.manager);
                            let config = Arc::clone(&self.config);
                            let workers = Arc::clone(&self.workers);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, manager, config, workers, shutdown)
                                    .await;
                            });
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    }
                }
            }
        }

        info!("licence server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    manager: Arc<SeatManager>,
    config: Arc<ServerConfig>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    let mut frames = message_frames(stream);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };
        let bytes = match frame {
            None => break,
            Some(Err(e)) => {
                warn!("frame error, closing connection: {e}");
                break;
            }
            Some(Ok(bytes)) => bytes,
        };

        let Ok(permit) = workers.acquire().await else {
            break;
        };
        let reply = dispatch(&manager, &config, &shutdown, &bytes).await;
        drop(permit);

        let Some(reply) = reply else {
            // Kill: stop talking, the accept loop is already winding down.
            break;
        };
        let encoded = match serde_json::to_vec(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("reply serialisation failed: {e}");
                break;
            }
        };
        if let Err(e) = frames.send(encoded.into()).await {
            warn!("reply send failed: {e}");
            break;
        }
    }
}

/// Handle one framed request; `None` means the connection should close
/// without a reply.
async fn dispatch(
    manager: &SeatManager,
    config: &ServerConfig,
    shutdown: &CancellationToken,
    bytes: &[u8],
) -> Option<Reply> {
    let request: Request = match serde_json::from_slice(bytes) {
        Ok(request) => request,
        Err(e) => {
            warn!("undecodable request: {e}");
            return Some(Reply::failure(ErrorCode::UnknownError));
        }
    };

    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        request_id = %request_id,
        message_type = ?request.message_type,
        product = %request.product,
    );

    async move {
        let reply = match request.message_type {
            MessageType::TakeSeat => manager
                .take_seat(&request.product, &request.ip, &request.user, &request.host)
                .await
                .map(|granted| Reply::ok().with_granted(granted)),
            MessageType::ReleaseSeat => manager
                .release_seat(&request.product, &request.ip, &request.user)
                .await
                .map(|released| Reply::ok().with_granted(released)),
            MessageType::RefreshSeat => manager
                .refresh_seat(&request.product, &request.ip, &request.user, &request.host)
                .await
                .map(|()| Reply::ok()),
            MessageType::QueryConnections => manager
                .get_connections(&request.product)
                .await
                .map(|connections| Reply::ok().with_connections(connections)),
            MessageType::NumberOfSeats => manager
                .total_seats(&request.product)
                .await
                .map(|seats| Reply::ok().with_seats(seats)),
            MessageType::QueryLicence => manager
                .get_licence_details(&request.product)
                .await
                .map(|licence| Reply::ok().with_licence(licence)),
            MessageType::QueryProducts => manager
                .get_products()
                .await
                .map(|products| Reply::ok().with_products(products)),
            MessageType::ServerVersion => {
                Ok(Reply::ok().with_version(env!("CARGO_PKG_VERSION").to_string()))
            }
            MessageType::WebServerAddress => {
                Ok(Reply::ok().with_address(config.web_server_address()))
            }
            MessageType::Kill => {
                info!("kill message received, shutting down");
                shutdown.cancel();
                return None;
            }
            MessageType::Reply => {
                warn!("client sent a reply message");
                Ok(Reply::failure(ErrorCode::UnknownError))
            }
        };

        Some(match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("request failed: {e}");
                Reply::failure(ErrorCode::from(&e))
            }
        })
    }
    .instrument(span)
    .await
}
