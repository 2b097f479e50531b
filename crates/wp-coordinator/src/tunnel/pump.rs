//! Bidirectional byte pumping with cancellation and idle recycling

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PUMP_BUFFER: usize = 16 * 1024;

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// Both directions reached EOF
    Closed,
    /// The session was cancelled
    Cancelled,
    /// No bytes moved for longer than the idle timeout
    Idle,
}

/// Last time any byte moved, in ms since `base`
struct Activity {
    base: Instant,
    last: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last
            .store(self.base.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.base.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last.load(Ordering::Relaxed)))
    }
}

async fn copy_half<A, B>(
    mut reader: ReadHalf<A>,
    mut writer: WriteHalf<B>,
    activity: &Activity,
) -> std::io::Result<u64>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let mut buf = vec![0u8; PUMP_BUFFER];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // propagate the half-close
            let _ = writer.shutdown().await;
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        activity.touch();
        total += n as u64;
    }
}

async fn idle_watch(activity: &Activity, idle: Option<Duration>) {
    let Some(idle) = idle else {
        return std::future::pending().await;
    };
    let check = (idle / 4).max(Duration::from_millis(50));
    loop {
        tokio::time::sleep(check).await;
        if activity.idle_for() >= idle {
            return;
        }
    }
}

/// Pump bytes between `a` and `b` until both sides close, the token is
/// cancelled, or nothing moves for `idle`.
///
/// Both streams are dropped (and so closed) when this returns, which is
/// what unblocks the peer on cancellation.
pub async fn pump<A, B>(
    a: A,
    b: B,
    cancel: &CancellationToken,
    idle: Option<Duration>,
) -> std::io::Result<PumpEnd>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let activity = Activity::new();
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let both = async {
        tokio::try_join!(
            copy_half(a_read, b_write, &activity),
            copy_half(b_read, a_write, &activity)
        )
    };

    tokio::select! {
        _ = cancel.cancelled() => Ok(PumpEnd::Cancelled),
        _ = idle_watch(&activity, idle) => Ok(PumpEnd::Idle),
        result = both => result.map(|(up, down)| {
            tracing::trace!("Relay closed after {} bytes up, {} bytes down", up, down);
            PumpEnd::Closed
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_moves_bytes_both_ways() {
        let (mut left, left_inner) = tokio::io::duplex(1024);
        let (right_inner, mut right) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(async move { pump(left_inner, right_inner, &cancel, None).await });

        left.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        right.write_all(b"world").await.unwrap();
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(left);
        drop(right);
        assert_eq!(task.await.unwrap().unwrap(), PumpEnd::Closed);
    }

    #[tokio::test]
    async fn test_cancel_closes_both_sides() {
        let (mut left, left_inner) = tokio::io::duplex(1024);
        let (right_inner, mut right) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let task = tokio::spawn(async move { pump(left_inner, right_inner, &token, None).await });

        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap(), PumpEnd::Cancelled);

        let mut buf = [0u8; 1];
        assert_eq!(left.read(&mut buf).await.unwrap(), 0);
        assert_eq!(right.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_recycled() {
        let (_left, left_inner) = tokio::io::duplex(1024);
        let (right_inner, _right) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let end = pump(left_inner, right_inner, &cancel, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(end, PumpEnd::Idle);
    }
}
