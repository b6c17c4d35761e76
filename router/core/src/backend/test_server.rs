//! One-shot HTTP server for exercising streaming clients

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serve a single request, sending `frames` as separate chunked-encoding
/// frames. Returns the base URL.
pub(crate) async fn serve_chunked(frames: Vec<Vec<u8>>) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let _ = respond(&mut socket, frames).await;
    });

    Ok(format!("http://{addr}"))
}

async fn respond(socket: &mut TcpStream, frames: Vec<Vec<u8>>) -> anyhow::Result<()> {
    read_request(socket).await?;

    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\n\
              content-type: application/x-ndjson\r\n\
              transfer-encoding: chunked\r\n\
              connection: close\r\n\r\n",
        )
        .await?;

    for frame in frames {
        socket.write_all(format!("{:x}\r\n", frame.len()).as_bytes()).await?;
        socket.write_all(&frame).await?;
        socket.write_all(b"\r\n").await?;
        socket.flush().await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    socket.write_all(b"0\r\n\r\n").await?;
    socket.shutdown().await?;
    Ok(())
}

/// Read headers and a `content-length` body
async fn read_request(socket: &mut TcpStream) -> anyhow::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);

        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if request.len() >= end + 4 + length {
            return Ok(());
        }
    }
}
