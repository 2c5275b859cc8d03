//! Link stream abstraction for a bridged serial device or a TCP serial bridge.

use pin_project_lite::pin_project;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

pin_project! {
    /// Byte stream to the board.
    #[project = LinkStreamProj]
    pub enum LinkStream {
        /// In-process pipe fed by a serial port bridge.
        Serial { #[pin] stream: DuplexStream },
        /// Raw TCP socket exposed by a serial-to-network bridge (ser2net, socat).
        Tcp { #[pin] stream: TcpStream },
    }
}

impl LinkStream {
    /// Connects to a TCP serial bridge.
    pub async fn connect_tcp(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(LinkStream::Tcp { stream })
    }

    pub fn serial(stream: DuplexStream) -> Self {
        LinkStream::Serial { stream }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, LinkStream::Tcp { .. })
    }
}

impl AsyncRead for LinkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_read(cx, buf),
            LinkStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LinkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_write(cx, buf),
            LinkStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_flush(cx),
            LinkStreamProj::Tcp { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_shutdown(cx),
            LinkStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
        }
    }
}
