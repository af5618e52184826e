use std::fs::File;
use std::io::{Read, Write};

use tracing::{debug, error, info, instrument, warn};

use crate::channel::{self, NotificationHandle};
use crate::protocol::{ChannelPaths, OpCode, Request, Response, REQUEST_FRAME_SIZE};
use crate::{KvsEngine, KvsError, Result};

/// A registered client connection.
///
/// The connection owns the client's request and response channels from the moment the acceptor
/// opens them. The notification channel is only opened by the worker that services the
/// connection. Whoever holds the connection last must call [`close`], which closes the
/// channels and removes them from the filesystem.
///
/// [`close`]: #method.close
#[derive(Debug)]
pub struct ClientConnection {
    paths: ChannelPaths,
    requests: File,
    responses: File,
}

impl ClientConnection {
    /// opens the response channel for writing and then the request channel for reading.
    /// Both channels must already exist, the client creates them before registering.
    pub fn open(paths: ChannelPaths) -> Result<Self> {
        let responses = channel::open_writer(&paths.response)?;
        let requests = channel::open_reader(&paths.request)?;
        Ok(ClientConnection {
            paths,
            requests,
            responses,
        })
    }

    /// the channel paths this connection was registered with
    pub fn paths(&self) -> &ChannelPaths {
        &self.paths
    }

    fn respond(&mut self, response: Response) -> Result<()> {
        self.responses.write_all(&response.encode())?;
        self.responses.flush()?;
        Ok(())
    }

    /// closes every channel of this connection and removes them from the filesystem
    pub fn close(self) {
        let ClientConnection {
            paths,
            requests,
            responses,
        } = self;
        drop(requests);
        drop(responses);
        channel::remove_fifo(&paths.request);
        channel::remove_fifo(&paths.response);
        channel::remove_fifo(&paths.notification);
    }
}

/// Services one client connection from its acknowledgement until it ends.
///
/// The connection is acknowledged, its notification channel is opened, and then requests are
/// read one frame at a time until the client disconnects, closes its request channel, or a
/// channel fails. However the loop ends, the client's subscriptions are removed from the
/// store before the connection is closed.
#[instrument(skip(engine, conn), fields(client = ?conn.paths().request))]
pub fn serve<E: KvsEngine>(engine: &E, mut conn: ClientConnection) {
    if let Err(e) = conn.respond(Response::success(OpCode::Connect)) {
        error!("could not acknowledge connection: {}", e);
        conn.close();
        return;
    }

    let notifications = match channel::open_writer(&conn.paths.notification) {
        Ok(file) => NotificationHandle::new(conn.paths.notification.display().to_string(), file),
        Err(e) => {
            error!("could not open notification channel: {}", e);
            conn.close();
            return;
        }
    };
    info!("client connected");

    if let Err(e) = handle_requests(engine, &mut conn, &notifications) {
        warn!("connection ended with an error: {}", e);
    }

    match engine.disconnect_all(&notifications) {
        Ok(removed) => debug!(removed, "removed subscriptions of departing client"),
        Err(e) => error!("could not remove subscriptions of departing client: {}", e),
    }
    // the store no longer holds clones of the handle, dropping it closes the channel
    drop(notifications);
    conn.close();
    info!("client disconnected");
}

fn handle_requests<E: KvsEngine>(
    engine: &E,
    conn: &mut ClientConnection,
    notifications: &NotificationHandle,
) -> Result<()> {
    let mut frame = [0u8; REQUEST_FRAME_SIZE];
    loop {
        let len = conn.requests.read(&mut frame)?;
        if len == 0 {
            debug!("client closed its request channel");
            return Ok(());
        }

        let request = match Request::decode(&frame[..len]) {
            Some(request) => request,
            None => {
                debug!(len, "ignoring malformed request");
                continue;
            }
        };
        debug!(?request, "received request");

        let outcome = match &request {
            Request::Disconnect => {
                conn.respond(Response::success(OpCode::Disconnect))?;
                return Ok(());
            }
            Request::Subscribe(key) => engine.subscribe(key, notifications),
            Request::Unsubscribe(key) => engine.unsubscribe(key, notifications),
        };

        let response = match outcome {
            Ok(()) => Response::success(request.op()),
            Err(e @ KvsError::KeyNotFound) | Err(e @ KvsError::SubscriptionNotFound) => {
                debug!(?request, "request failed: {}", e);
                Response::failure(request.op())
            }
            Err(e) => {
                error!(?request, "request failed: {}", e);
                Response::failure(request.op())
            }
        };
        conn.respond(response)?;
    }
}
