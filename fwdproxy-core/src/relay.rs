//! Bidirectional byte relay between the client and the upstream.

use prometheus::IntCounter;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Duration, Instant, sleep_until};
use tracing::debug;

const COPY_BUFFER_SIZE: usize = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "tx",
            Direction::UpstreamToClient => "rx",
        }
    }
}

/// What moved the relay from active to closing.
#[derive(Debug)]
pub enum RelayEnd {
    Eof(Direction),
    Error(Direction, io::Error),
    IdleTimeout,
}

impl fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEnd::Eof(Direction::ClientToUpstream) => write!(f, "client closed"),
            RelayEnd::Eof(Direction::UpstreamToClient) => write!(f, "upstream closed"),
            RelayEnd::Error(dir, e) => write!(f, "{} error: {}", dir.as_str(), e),
            RelayEnd::IdleTimeout => write!(f, "idle timeout"),
        }
    }
}

#[derive(Debug)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub end: RelayEnd,
}

/// Optional per-direction byte counters.
#[derive(Clone, Default)]
pub struct RelayCounters {
    pub tx: Option<IntCounter>,
    pub rx: Option<IntCounter>,
}

/// Copies bytes both ways until the first EOF, I/O error, or idle timeout
/// in either direction.
///
/// The other direction is abandoned as soon as one ends; both write halves
/// are then shut down once and both streams dropped. A zero `idle_timeout`
/// disables the idle check.
pub async fn relay<C, U>(
    client: C,
    upstream: U,
    idle_timeout: Duration,
    counters: RelayCounters,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = io::split(client);
    let (mut upstream_read, mut upstream_write) = io::split(upstream);

    let started = Instant::now();
    let last_activity = AtomicU64::new(0);
    let mut sent = 0u64;
    let mut received = 0u64;

    let end = {
        let activity = Activity {
            started,
            last: &last_activity,
        };
        let client_to_upstream = pump(
            &mut client_read,
            &mut upstream_write,
            &mut sent,
            activity,
            counters.tx.as_ref(),
        );
        let upstream_to_client = pump(
            &mut upstream_read,
            &mut client_write,
            &mut received,
            activity,
            counters.rx.as_ref(),
        );

        tokio::select! {
            res = client_to_upstream => match res {
                Ok(()) => RelayEnd::Eof(Direction::ClientToUpstream),
                Err(e) => RelayEnd::Error(Direction::ClientToUpstream, e),
            },
            res = upstream_to_client => match res {
                Ok(()) => RelayEnd::Eof(Direction::UpstreamToClient),
                Err(e) => RelayEnd::Error(Direction::UpstreamToClient, e),
            },
            _ = idle_watchdog(activity, idle_timeout) => RelayEnd::IdleTimeout,
        }
    };

    debug!(%end, sent, received, "Relay closing");

    // Shutdown errors only mean the peer is already gone.
    let _ = upstream_write.shutdown().await;
    let _ = client_write.shutdown().await;

    RelayStats {
        client_to_upstream: sent,
        upstream_to_client: received,
        end,
    }
}

#[derive(Clone, Copy)]
struct Activity<'a> {
    started: Instant,
    last: &'a AtomicU64,
}

impl Activity<'_> {
    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last.store(elapsed, Ordering::Relaxed);
    }

    fn deadline(&self, idle: Duration) -> Instant {
        self.started + Duration::from_millis(self.last.load(Ordering::Relaxed)) + idle
    }
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: &mut u64,
    activity: Activity<'_>,
    counter: Option<&IntCounter>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        activity.touch();

        *total += n as u64;
        if let Some(counter) = counter {
            counter.inc_by(n as u64);
        }
    }
}

async fn idle_watchdog(activity: Activity<'_>, idle: Duration) {
    if idle.is_zero() {
        return std::future::pending().await;
    }
    loop {
        let deadline = activity.deadline(idle);
        if Instant::now() >= deadline {
            return;
        }
        sleep_until(deadline).await;
    }
}
