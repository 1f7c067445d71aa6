//! OSD daemon entry point.
//!
//! Mirrors the shape of `rados/src/main.rs`: `clap::Parser` CLI, optional
//! `cephconfig::CephConfig` file, a shared `msgr2::MessageBus`, a
//! `monclient::MonClient` built from it, then the OSD-specific wiring this
//! binary adds on top: `ServerSession` registered as the `OSD_OP` dispatcher,
//! `start`/`stop` around a `SIGINT`/ctrl-c wait.
//!
//! Exit codes: `0` on clean shutdown, non-zero on option parse failure or
//! startup timeout.

use anyhow::{Context, Result};
use clap::Parser;
use osd::capabilities::{OutboundReply, ReplySink};
use osd::{create_osd_server, MonClientAdapter, MonClusterMap, OsdCli, OsdOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Hands assembled replies back over the connection. The real send path
/// belongs to the messenger capability (framing/session establishment are
/// an external collaborator's job, not this core's); this daemon logs the
/// reply it would have sent, which is the seam a deployment wires a
/// concrete `msgr2` connection into.
struct LoggingReplySink;

#[async_trait::async_trait]
impl ReplySink for LoggingReplySink {
    async fn send_reply(&self, reply: OutboundReply) -> osd::Result<()> {
        tracing::trace!(
            tid = reply.tid,
            front_len = reply.front.len(),
            data_len = reply.data.len(),
            "reply ready for messenger"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = OsdCli::parse();

    let ceph_config = OsdOptions::load_ceph_config(&cli.conf)
        .context("failed to load ceph.conf")?;
    let options = OsdOptions::from_cli(&cli, ceph_config.as_ref())
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_max_level(options.log_level)
        .with_writer(std::io::stderr)
        .init();

    info!(osd_id = options.osd_id, mon_addrs = ?options.mon_addrs, "starting osd");

    if let Some(dir) = &options.class_dir {
        if !Path::new(dir).exists() {
            warn!(class_dir = %dir, "class_dir does not exist; CALL stays unsupported regardless");
        }
    }

    let message_bus = Arc::new(msgr2::MessageBus::new());

    let mon_config = monclient::MonClientConfig {
        entity_name: format!("osd.{}", options.osd_id),
        mon_addrs: options.mon_addrs.clone(),
        ..Default::default()
    };
    let mon_client = Arc::new(
        monclient::MonClient::new(mon_config, Arc::clone(&message_bus))
            .await
            .context("failed to create MonClient")?,
    );
    mon_client.init().await.context("failed to initialize MonClient")?;
    mon_client
        .clone()
        .register_handlers()
        .await
        .context("failed to register MonClient handlers")?;

    let cluster_map = MonClusterMap::new();
    cluster_map.watch(&mon_client);

    let monitor = Arc::new(MonClientAdapter::new(Arc::clone(&mon_client), Arc::clone(&cluster_map)));
    let reply_sink = Arc::new(LoggingReplySink);

    let server = create_osd_server(options, monitor, cluster_map, reply_sink);

    if let Err(e) = server.start().await {
        error!(error = %e, "failed to start osd");
        std::process::exit(1);
    }

    message_bus
        .register(osd::session::CEPH_MSG_OSD_OP, server.session.clone())
        .await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutdown requested");
    server.stop().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;

    Ok(())
}
