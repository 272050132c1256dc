use super::CONNECT_TIMEOUT;
use crate::chord::types::Endpoint;
use crate::error::NetworkError;
use crate::network::messages::{codec, Message};
use crate::network::{OnFailure, Transport};
use bytes::Bytes;
use log::debug;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::time::timeout;

/// Fire-and-forget sender. Each message is written on its own connection
/// from a spawned task; the deadline covers connecting and writing.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    deadline: Duration,
}

impl TcpTransport {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl Transport for TcpTransport {
    fn send(&self, to: Endpoint, message: Message, on_failure: Option<OnFailure>) {
        let kind = message.kind();
        let frame = codec::encode(&message);
        let deadline = self.deadline;

        let report = move |err: NetworkError| match on_failure {
            Some(callback) => callback(err),
            None => debug!("{} to {} lost: {}", kind, to, err),
        };

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = deliver(to, frame, deadline).await {
                        report(err);
                    }
                });
            }
            Err(_) => report(NetworkError::ConnectionFailed(format!(
                "no async runtime to send {} to {}",
                kind, to
            ))),
        }
    }
}

async fn deliver(to: Endpoint, frame: Bytes, deadline: Duration) -> Result<(), NetworkError> {
    let mut stream = timeout(deadline, TcpStream::connect(to.socket_addr()))
        .await
        .map_err(|_| NetworkError::Timeout(to.to_string()))?
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", to, e)))?;

    timeout(deadline, async {
        stream.write_all(&frame).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| NetworkError::Timeout(to.to_string()))??;
    Ok(())
}
