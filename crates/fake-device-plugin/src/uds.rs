//! gRPC channels over Unix domain sockets.

use std::io;
use std::path::Path;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;

/// Connect a gRPC channel to `socket_path`, giving up after `timeout`.
///
/// The channel connects eagerly, so a returned channel has completed the
/// HTTP/2 handshake with whatever listens on the socket. Requests sent on it
/// are bounded by the same timeout.
pub async fn connect(socket_path: &Path, timeout: Duration) -> io::Result<Channel> {
    let socket_path = socket_path.to_path_buf();

    // The HTTP URL is a placeholder since we're using Unix socket connector
    let endpoint = Endpoint::from_static("http://tonic")
        .connect_timeout(timeout)
        .timeout(timeout);

    let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let socket_path = socket_path.clone();
        async move { UnixStream::connect(socket_path).await.map(TokioIo::new) }
    }));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => Err(io::Error::other(e)),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("dial timed out after {timeout:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn connect_to_missing_socket_fails_fast() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let started = Instant::now();

        let result = connect(&dir.path().join("missing.sock"), Duration::from_secs(2)).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
