use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use crate::channel;
use crate::protocol::{ChannelPaths, OpCode, Request, Response, RESPONSE_FRAME_SIZE};
use crate::{KvsError, Result};
use tracing::debug;

/// `KvsClient` contains the functionality for communication with a [`KvsServer`]
///
/// [`KvsServer`]: ./struct.KvsServer.html
pub struct KvsClient {
    paths: ChannelPaths,
    requests: File,
    responses: File,
    notifications: Option<Notifications>,
}

impl KvsClient {
    /// creates the client's channels at `paths`, registers them on the server's registration
    /// channel at `server` and waits for the server to acknowledge the connection
    ///
    /// # Errors
    /// fails if a channel could not be created or opened, or the server refused the connection.
    /// Channels created by this call are removed again on failure.
    pub fn connect(paths: ChannelPaths, server: &Path) -> Result<Self> {
        let frame = paths.encode()?;
        create_channels(&paths)?;
        match register(&paths, server, &frame) {
            Ok(client) => Ok(client),
            Err(e) => {
                remove_channels(&paths);
                Err(e)
            }
        }
    }

    /// the channel paths of this client
    pub fn paths(&self) -> &ChannelPaths {
        &self.paths
    }

    /// subscribes to changes of `key`.
    /// Returns `Ok(false)` if the server refused, e.g. because the key does not exist.
    pub fn subscribe(&mut self, key: &str) -> Result<bool> {
        self.request(Request::Subscribe(key.to_string()))
    }

    /// cancels the subscription of `key`.
    /// Returns `Ok(false)` if the server refused, e.g. because there was no such subscription.
    pub fn unsubscribe(&mut self, key: &str) -> Result<bool> {
        self.request(Request::Unsubscribe(key.to_string()))
    }

    /// ends the connection and removes the client's channels
    pub fn disconnect(mut self) -> Result<bool> {
        let result = self.request(Request::Disconnect);
        let KvsClient { paths, .. } = self;
        remove_channels(&paths);
        result
    }

    /// takes the stream of notifications sent to this client. Can only be taken once, later
    /// calls return `None`.
    pub fn notifications(&mut self) -> Option<Notifications> {
        self.notifications.take()
    }

    fn request(&mut self, request: Request) -> Result<bool> {
        self.requests.write_all(&request.encode()?)?;
        self.requests.flush()?;
        let response = read_response(&mut self.responses)?;
        if response.op != request.op() {
            return Err(KvsError::Frame(format!(
                "expected a response to {:?}, got {:?}",
                request.op(),
                response
            )));
        }
        debug!(?request, ok = response.ok, "server responded");
        Ok(response.ok)
    }
}

/// The notifications a client receives, each one a `(key,value)` or `(key,DELETED)` message.
/// The iterator ends when the server closes the notification channel.
pub struct Notifications {
    reader: BufReader<File>,
}

impl Iterator for Notifications {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut message = Vec::new();
        match self.reader.read_until(b')', &mut message) {
            Ok(0) => None,
            Ok(_) => Some(Ok(String::from_utf8_lossy(&message).trim().to_string())),
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn create_channels(paths: &ChannelPaths) -> Result<()> {
    channel::create_fifo(&paths.request)?;
    if let Err(e) = channel::create_fifo(&paths.response) {
        channel::remove_fifo(&paths.request);
        return Err(e);
    }
    if let Err(e) = channel::create_fifo(&paths.notification) {
        channel::remove_fifo(&paths.request);
        channel::remove_fifo(&paths.response);
        return Err(e);
    }
    Ok(())
}

fn remove_channels(paths: &ChannelPaths) {
    channel::remove_fifo(&paths.request);
    channel::remove_fifo(&paths.response);
    channel::remove_fifo(&paths.notification);
}

// the open order mirrors the server's: responses first, then requests, then notifications
fn register(paths: &ChannelPaths, server: &Path, frame: &[u8]) -> Result<KvsClient> {
    let mut registrations = channel::open_writer(server)?;
    registrations.write_all(frame)?;
    drop(registrations);

    let mut responses = channel::open_reader(&paths.response)?;
    let requests = channel::open_writer(&paths.request)?;

    let ack = read_response(&mut responses)?;
    if ack != Response::success(OpCode::Connect) {
        return Err(KvsError::StringErr(format!(
            "server refused the connection: {:?}",
            ack
        )));
    }
    let notifications = channel::open_reader(&paths.notification)?;

    Ok(KvsClient {
        paths: paths.clone(),
        requests,
        responses,
        notifications: Some(Notifications {
            reader: BufReader::new(notifications),
        }),
    })
}

fn read_response(responses: &mut File) -> Result<Response> {
    let mut frame = [0u8; RESPONSE_FRAME_SIZE];
    let len = responses.read(&mut frame)?;
    if len == 0 {
        return Err(KvsError::StringErr(
            "the server closed the connection".to_string(),
        ));
    }
    Response::decode(&frame[..len])
        .ok_or_else(|| KvsError::Frame(format!("invalid response {:?}", &frame[..len])))
}
