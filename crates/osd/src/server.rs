//! `create_osd_server` and the daemon's start/stop/destroy lifecycle.
//!
//! The TCP accept loop, framing, and CRC belong to the messenger capability
//! and are out of scope for this core; what lives here is the boot/mark-down
//! dance with the monitor and the poll-until-down loop, wired against
//! `monclient::MonClient`: a shared `msgr2::MessageBus`, a `MonClient` built
//! from `MonClientConfig`, `init()`, then `register_handlers()`.

use crate::capabilities::{ClusterMap, MonitorClient, ReplySink};
use crate::config::OsdOptions;
use crate::error::{OsdError, Result};
use crate::session::ServerSession;
use denc::UuidD;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// `ClusterMap` view driven by `monclient::MonClient`'s `MapEvent` broadcast.
/// Membership verification (`contains`) is the cluster-map client's job
/// proper, out of scope for this core; this adapter tracks only what the
/// shutdown sequence and reply-stamping need: the current epoch and whether
/// this node has itself been told it's down.
pub struct MonClusterMap {
    epoch: AtomicU32,
    down: AtomicBool,
}

impl MonClusterMap {
    pub fn new() -> Arc<Self> {
        Arc::new(MonClusterMap {
            epoch: AtomicU32::new(0),
            down: AtomicBool::new(false),
        })
    }

    /// Spawns a task that folds `MapEvent::OsdMapUpdated` into `epoch`, the
    /// way `MonClient::subscribe_events` is meant to be consumed (see
    /// `rados/src/main.rs`'s analogous `sleep`-then-read pattern, made
    /// event-driven here instead).
    pub fn watch(self: &Arc<Self>, mon_client: &Arc<monclient::MonClient>) {
        let this = Arc::clone(self);
        let mut events = mon_client.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let monclient::client::MapEvent::OsdMapUpdated { epoch } = event {
                    this.epoch.store(epoch as u32, Ordering::Relaxed);
                }
            }
        });
    }

    pub fn mark_down(&self) {
        self.down.store(true, Ordering::Relaxed);
    }
}

impl ClusterMap for MonClusterMap {
    fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Relaxed)
    }

    fn contains(&self, _osd_id: u32, _addr: &str) -> bool {
        !self.down.load(Ordering::Relaxed)
    }

    fn is_down(&self, _osd_id: u32) -> bool {
        self.down.load(Ordering::Relaxed)
    }
}

/// `MonitorClient` implemented against `monclient::MonClient`'s generic
/// `invoke` (mon command) surface, the same channel `rados`'s `parse_pool`
/// path and `MonClient::get_version` build on.
pub struct MonClientAdapter {
    mon_client: Arc<monclient::MonClient>,
    cluster_map: Arc<MonClusterMap>,
}

impl MonClientAdapter {
    pub fn new(mon_client: Arc<monclient::MonClient>, cluster_map: Arc<MonClusterMap>) -> Self {
        MonClientAdapter {
            mon_client,
            cluster_map,
        }
    }
}

#[async_trait::async_trait]
impl MonitorClient for MonClientAdapter {
    async fn mark_me_down(&self, osd_id: u32) -> Result<()> {
        info!(osd_id, "marking self down with monitors");
        self.mon_client
            .invoke(vec!["osd".into(), "down".into(), osd_id.to_string()], bytes::Bytes::new())
            .await?;
        self.cluster_map.mark_down();
        Ok(())
    }

    async fn boot(&self, osd_id: u32, fsid: UuidD) -> Result<()> {
        info!(osd_id, fsid = %fsid, "booting into cluster");
        self.mon_client
            .invoke(
                vec!["osd".into(), "boot".into(), osd_id.to_string()],
                bytes::Bytes::new(),
            )
            .await?;
        Ok(())
    }

    async fn add_to_crush(&self, osd_id: u32, weight: f64) -> Result<()> {
        self.mon_client
            .invoke(
                vec![
                    "osd".into(),
                    "crush".into(),
                    "reweight".into(),
                    format!("osd.{osd_id}"),
                    weight.to_string(),
                ],
                bytes::Bytes::new(),
            )
            .await?;
        Ok(())
    }

    async fn wait_for_latest_map(&self, timeout: Duration) -> Result<u32> {
        let before = self.cluster_map.epoch();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let epoch = self.cluster_map.epoch();
            if epoch > before {
                return Ok(epoch);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OsdError::Timeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// The running daemon: owns the session (object store + dispatcher) and the
/// capability handles needed to shut down cleanly.
pub struct Server<M: MonitorClient, C: ClusterMap, R: ReplySink> {
    pub options: OsdOptions,
    pub session: Arc<ServerSession<R>>,
    monitor: Arc<M>,
    cluster_map: Arc<C>,
}

/// Allocates the session and capability handles; does not yet touch the
/// network or monitors.
pub fn create_osd_server<M: MonitorClient, C: ClusterMap, R: ReplySink>(
    options: OsdOptions,
    monitor: Arc<M>,
    cluster_map: Arc<C>,
    reply_sink: Arc<R>,
) -> Server<M, C, R> {
    let epoch = cluster_map.epoch();
    let session = Arc::new(ServerSession::new(options.noop_write, epoch, reply_sink));
    Server {
        options,
        session,
        monitor,
        cluster_map,
    }
}

impl<M: MonitorClient, C: ClusterMap, R: ReplySink> Server<M, C, R> {
    /// Opens the monitor session (already done by the caller's `MonClient`),
    /// registers in CRUSH, and boots. Listening is the messenger capability's
    /// job; this only performs the monitor-facing half of startup.
    pub async fn start(&self) -> Result<()> {
        self.monitor.add_to_crush(self.options.osd_id, 1.0).await?;
        self.monitor
            .boot(self.options.osd_id, parse_fsid(self.options.fsid.as_deref()))
            .await?;
        self.session.set_epoch(self.cluster_map.epoch());
        info!(osd_id = self.options.osd_id, "osd started");
        Ok(())
    }

    /// Shutdown sequence: mark down, poll up to 5s in 300ms increments until
    /// the node is observed down in the latest map, then destroy all
    /// objects.
    pub async fn stop(&self) -> Result<()> {
        self.monitor.mark_me_down(self.options.osd_id).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.cluster_map.is_down(self.options.osd_id) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    osd_id = self.options.osd_id,
                    "shutdown: cluster map did not confirm DOWN within 5s"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        self.destroy().await;
        Ok(())
    }

    /// Frees every object and block. Also run directly on abrupt shutdown
    /// without the monitor dance (`destroy_osd_server`).
    pub async fn destroy(&self) {
        self.session.destroy_all().await;
    }
}

fn parse_fsid(fsid: Option<&str>) -> UuidD {
    fsid.and_then(uuid_from_hyphenated).unwrap_or_else(UuidD::new)
}

fn uuid_from_hyphenated(s: &str) -> Option<UuidD> {
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for i in 0..16 {
        bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(UuidD::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::OutboundReply;
    use std::sync::atomic::AtomicUsize;

    struct FakeCluster {
        epoch: AtomicU32,
        down: AtomicBool,
    }

    impl ClusterMap for FakeCluster {
        fn epoch(&self) -> u32 {
            self.epoch.load(Ordering::Relaxed)
        }
        fn contains(&self, _osd_id: u32, _addr: &str) -> bool {
            true
        }
        fn is_down(&self, _osd_id: u32) -> bool {
            self.down.load(Ordering::Relaxed)
        }
    }

    struct FakeMonitor {
        marked_down: AtomicUsize,
        cluster: Arc<FakeCluster>,
    }

    #[async_trait::async_trait]
    impl MonitorClient for FakeMonitor {
        async fn mark_me_down(&self, _osd_id: u32) -> Result<()> {
            self.marked_down.fetch_add(1, Ordering::Relaxed);
            self.cluster.down.store(true, Ordering::Relaxed);
            Ok(())
        }
        async fn boot(&self, _osd_id: u32, _fsid: UuidD) -> Result<()> {
            Ok(())
        }
        async fn add_to_crush(&self, _osd_id: u32, _weight: f64) -> Result<()> {
            Ok(())
        }
        async fn wait_for_latest_map(&self, _timeout: Duration) -> Result<u32> {
            Ok(self.cluster.epoch())
        }
    }

    struct NullSink;

    #[async_trait::async_trait]
    impl ReplySink for NullSink {
        async fn send_reply(&self, _reply: OutboundReply) -> Result<()> {
            Ok(())
        }
    }

    fn options() -> OsdOptions {
        OsdOptions {
            osd_id: 1,
            mon_addrs: vec!["v2:127.0.0.1:3300".into()],
            public_addr: "0.0.0.0:6800".into(),
            fsid: None,
            class_dir: None,
            log_level: tracing::Level::WARN,
            noop_write: false,
        }
    }

    #[tokio::test]
    async fn stop_marks_down_and_destroys_objects() {
        let cluster = Arc::new(FakeCluster {
            epoch: AtomicU32::new(1),
            down: AtomicBool::new(false),
        });
        let monitor = Arc::new(FakeMonitor {
            marked_down: AtomicUsize::new(0),
            cluster: cluster.clone(),
        });
        let sink = Arc::new(NullSink);
        let server = create_osd_server(options(), monitor.clone(), cluster.clone(), sink);

        server
            .session
            .handle_osd_op(1, b"", bytes::Bytes::new())
            .await
            .ok();

        server.stop().await.unwrap();
        assert_eq!(monitor.marked_down.load(Ordering::Relaxed), 1);
        assert_eq!(server.session.object_count().await, 0);
    }
}
