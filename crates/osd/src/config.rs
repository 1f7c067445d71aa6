//! Configuration ingestion. `OsdOptions` is the immutable struct threaded explicitly into
//! `create_osd_server`; nothing here is process-wide state. Built the same
//! way `rados/src/main.rs` builds its client-side config: a `clap` CLI
//! struct overrides a `cephconfig::CephConfig` file, which in turn supplies
//! defaults the CLI didn't set.

use crate::error::{OsdError, Result};
use clap::Parser;
use std::path::Path;

/// Command-line surface for the daemon binary. Mirrors `rados`'s `Cli`:
/// a `--conf`/`CEPH_CONF` ceph.conf path, `--mon-host`/`MON_HOST` override,
/// and a `--debug` flag that maps to a `tracing::Level`.
#[derive(Parser, Debug)]
#[command(name = "osd")]
#[command(about = "In-memory RADOS object storage daemon", long_about = None)]
pub struct OsdCli {
    /// Numeric OSD id.
    #[arg(long)]
    pub id: u32,

    /// Ceph configuration file path.
    #[arg(
        short = 'c',
        long,
        env = "CEPH_CONF",
        default_value = "/etc/ceph/ceph.conf"
    )]
    pub conf: String,

    /// Monitor addresses (comma-separated, e.g. "v2:127.0.0.1:3300").
    /// If unset, read from `conf`'s `mon host`.
    #[arg(long, env = "MON_HOST")]
    pub mon_host: Option<String>,

    /// Address this daemon's messenger binds and advertises.
    #[arg(long, default_value = "0.0.0.0:6800")]
    pub public_addr: String,

    /// Path to object-class plugins for `CALL`. Optional; the `CALL` op is
    /// a stub regardless.
    #[arg(long)]
    pub class_dir: Option<String>,

    /// Cluster fsid, overriding `conf`'s `fsid` if given.
    #[arg(long)]
    pub fsid: Option<String>,

    /// Enables the `>= 4 KiB write = no-op` fast path.
    #[arg(long)]
    pub noop_write: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,
}

/// The immutable, fully-resolved configuration passed into
/// `create_osd_server`. No process-wide statics: every consumer of
/// configuration gets this struct by value or reference, never a global.
#[derive(Debug, Clone)]
pub struct OsdOptions {
    pub osd_id: u32,
    pub mon_addrs: Vec<String>,
    pub public_addr: String,
    pub fsid: Option<String>,
    pub class_dir: Option<String>,
    pub log_level: tracing::Level,
    pub noop_write: bool,
}

impl OsdOptions {
    /// Resolves CLI flags against an optional parsed `ceph.conf`, CLI taking
    /// precedence, exactly as `rados/src/main.rs` resolves `mon_host`/
    /// `keyring`.
    pub fn from_cli(cli: &OsdCli, ceph_config: Option<&cephconfig::CephConfig>) -> Result<Self> {
        let mon_addrs = if let Some(mon_host) = &cli.mon_host {
            mon_host.split(',').map(|s| s.trim().to_string()).collect()
        } else if let Some(config) = ceph_config {
            config
                .mon_addrs()
                .map_err(|e| OsdError::InvalidArgument(format!("mon_addrs: {e}")))?
        } else {
            return Err(OsdError::InvalidArgument(
                "monitor address not specified: use --mon-host or a valid ceph.conf".into(),
            ));
        };

        let fsid = cli
            .fsid
            .clone()
            .or_else(|| ceph_config.and_then(|c| c.get("global", "fsid").map(str::to_string)));

        let class_dir = cli
            .class_dir
            .clone()
            .or_else(|| ceph_config.and_then(|c| c.get("osd", "osd class dir").map(str::to_string)));

        let log_level = if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        };

        Ok(OsdOptions {
            osd_id: cli.id,
            mon_addrs,
            public_addr: cli.public_addr.clone(),
            fsid,
            class_dir,
            log_level,
            noop_write: cli.noop_write,
        })
    }

    /// Loads `ceph.conf` from `path` if it exists, matching the
    /// `Path::new(&cli.conf).exists()` guard in `rados/src/main.rs`.
    pub fn load_ceph_config(path: &str) -> Result<Option<cephconfig::CephConfig>> {
        if Path::new(path).exists() {
            let config = cephconfig::CephConfig::from_file(path)
                .map_err(|e| OsdError::InvalidArgument(format!("failed to parse {path}: {e}")))?;
            Ok(Some(config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(mon_host: Option<&str>) -> OsdCli {
        OsdCli {
            id: 0,
            conf: "/etc/ceph/ceph.conf".into(),
            mon_host: mon_host.map(String::from),
            public_addr: "0.0.0.0:6800".into(),
            class_dir: None,
            fsid: None,
            noop_write: false,
            debug: false,
        }
    }

    #[test]
    fn cli_mon_host_overrides_missing_conf() {
        let c = cli(Some("v2:127.0.0.1:3300, v2:127.0.0.1:3301"));
        let opts = OsdOptions::from_cli(&c, None).unwrap();
        assert_eq!(
            opts.mon_addrs,
            vec!["v2:127.0.0.1:3300".to_string(), "v2:127.0.0.1:3301".to_string()]
        );
    }

    #[test]
    fn missing_mon_host_and_conf_is_invalid_argument() {
        let c = cli(None);
        let err = OsdOptions::from_cli(&c, None).unwrap_err();
        assert!(matches!(err, OsdError::InvalidArgument(_)));
    }

    #[test]
    fn debug_flag_selects_debug_level() {
        let mut c = cli(Some("v2:127.0.0.1:3300"));
        c.debug = true;
        let opts = OsdOptions::from_cli(&c, None).unwrap();
        assert_eq!(opts.log_level, tracing::Level::DEBUG);
    }
}
