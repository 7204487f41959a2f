//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound upstream connection establishment
//! - Turn an elapsed deadline into a distinct `TimedOut` I/O error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Nothing here retries; the caller decides what a timeout means

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// Run `fut` with a deadline; an elapsed deadline becomes `ErrorKind::TimedOut`.
pub async fn with_timeout<T, F>(duration: Duration, what: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} timed out after {}ms", duration.as_millis()),
        )),
    }
}

/// Open a TCP connection to `host:port` within `duration`.
pub async fn connect(host: &str, port: u16, duration: Duration) -> io::Result<TcpStream> {
    let stream = with_timeout(duration, "connect", TcpStream::connect((host, port))).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_deadline_is_timed_out() {
        let err = with_timeout(Duration::from_millis(10), "probe", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, io::Error>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().starts_with("probe timed out"));
    }

    #[tokio::test]
    async fn connects_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(connect("127.0.0.1", port, Duration::from_secs(1)).await.is_ok());
    }
}
