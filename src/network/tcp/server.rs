use super::{MAX_FRAME_BYTES, READ_TIMEOUT};
use crate::chord::types::NodePorts;
use crate::error::{MessageError, NetworkError, VaultError};
use crate::network::messages::codec;
use crate::network::MessageHandler;
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Listeners on the four ports of one node, feeding a shared handler through
/// a bounded pool of in-flight messages.
pub struct TcpServer {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    addrs: Vec<SocketAddr>,
}

impl TcpServer {
    pub async fn bind(
        ip: IpAddr,
        ports: NodePorts,
        handler: Arc<dyn MessageHandler>,
        workers: usize,
    ) -> Result<Self, NetworkError> {
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut listeners = Vec::new();
        for port in ports.to_array() {
            let addr = SocketAddr::new(ip, port);
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| NetworkError::Bind(addr.to_string(), e))?;
            listeners.push(listener);
        }

        let mut addrs = Vec::new();
        let mut handles = Vec::new();
        for listener in listeners {
            let addr = listener.local_addr()?;
            info!("Listening on {}", addr);
            addrs.push(addr);
            handles.push(tokio::spawn(accept_loop(
                listener,
                handler.clone(),
                permits.clone(),
                shutdown_rx.clone(),
            )));
        }
        Ok(Self {
            shutdown,
            handles,
            addrs,
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Stops accepting; messages already being handled run to completion.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("TCP listeners shut down");
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        error!("Worker pool closed, stopping listener");
                        break;
                    };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = serve_connection(stream, handler).await {
                            debug!("Dropped message from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<dyn MessageHandler>) -> Result<(), VaultError> {
    let mut frame = Vec::new();
    let mut limited = stream.take(MAX_FRAME_BYTES + 1);
    timeout(READ_TIMEOUT, limited.read_to_end(&mut frame))
        .await
        .map_err(|_| NetworkError::Timeout("reading inbound frame".into()))?
        .map_err(NetworkError::from)?;
    if frame.len() as u64 > MAX_FRAME_BYTES {
        return Err(MessageError::InvalidFormat(format!("frame exceeds {} bytes", MAX_FRAME_BYTES)).into());
    }

    let message = codec::decode(Bytes::from(frame))?;
    handler.handle(message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::types::Endpoint;
    use crate::network::messages::{Body, Message};
    use crate::network::tcp::TcpTransport;
    use crate::network::testing::{id, node};
    use crate::network::Transport;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Message>);

    impl MessageHandler for Forward {
        fn handle(&self, message: Message) {
            let _ = self.0.send(message);
        }
    }

    async fn server() -> (TcpServer, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = TcpServer::bind(
            "127.0.0.1".parse().unwrap(),
            NodePorts::from_array([0, 0, 0, 0]),
            Arc::new(Forward(tx)),
            4,
        )
        .await
        .unwrap();
        (server, rx)
    }

    #[tokio::test]
    async fn messages_arrive_on_every_port() {
        let (server, mut inbox) = server().await;
        let transport = TcpTransport::default();
        for addr in server.local_addrs() {
            let to = Endpoint::new(addr.ip(), addr.port());
            transport.send(to, Message::new(id(7), Body::Notify { node: node(7) }), None);
        }
        for _ in 0..4 {
            let message = timeout(Duration::from_secs(5), inbox.recv()).await.unwrap().unwrap();
            assert_eq!(message.sender, id(7));
            assert_eq!(message.body, Body::Notify { node: node(7) });
        }
        server.shutdown().await;
    }

    #[tokio::test]
    async fn garbage_is_dropped_and_listener_keeps_going() {
        let (server, mut inbox) = server().await;
        let addr = server.local_addrs()[0];
        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"HELLO 1 2 3\r\n\r\n").await.unwrap();
        raw.shutdown().await.unwrap();
        drop(raw);

        TcpTransport::default().send(
            Endpoint::new(addr.ip(), addr.port()),
            Message::new(id(9), Body::CheckActive),
            None,
        );
        let message = timeout(Duration::from_secs(5), inbox.recv()).await.unwrap().unwrap();
        assert_eq!(message.body, Body::CheckActive);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_failure() {
        // bind and release a port so nothing listens on it
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        TcpTransport::default().send(
            Endpoint::new(addr.ip(), addr.port()),
            Message::new(id(1), Body::CheckActive),
            Some(Box::new(move |err| {
                let _ = tx.send(err.to_string());
            })),
        );
        let reason = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert!(!reason.is_empty());
    }
}
