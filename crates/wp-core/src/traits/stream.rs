//! Byte streams carried by tunnel legs

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream between the coordinator and an agent
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned, type-erased tunnel stream
pub type BoxedStream = Box<dyn TunnelStream>;
