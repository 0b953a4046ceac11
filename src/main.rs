//! csi-e2e
//!
//! Runs the Ceph CSI end-to-end suites against the cluster of the current
//! kubeconfig and exits non-zero when any case fails.
//!
//! ```text
//! csi-e2e --suite rbd --label pvc --report report.json
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csi_e2e::suite::SuiteKind;
use csi_e2e::{
    resolve_cluster_id, CaseFilter, CommandRunner, E2eConfig, Environment, Error, ProcessRunner, Result,
    RunReport, Runner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// End-to-end tests for Ceph CSI RBD and CephFS volumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Suites to run
    #[arg(
        long = "suite",
        env = "E2E_SUITES",
        value_enum,
        value_delimiter = ',',
        default_values_t = [SuiteKind::Rbd, SuiteKind::Cephfs, SuiteKind::Es]
    )]
    suites: Vec<SuiteKind>,

    /// Run only cases carrying one of these labels
    #[arg(long = "label", env = "E2E_LABELS", value_delimiter = ',')]
    labels: Vec<String>,

    /// Run only cases whose full name contains this text
    #[arg(long, env = "E2E_FOCUS")]
    focus: Option<String>,

    /// Budget for each create, delete or readiness wait, in seconds
    #[arg(long, env = "DEPLOY_TIMEOUT", default_value = "120")]
    deploy_timeout_secs: u64,

    /// Delay between polls, in seconds
    #[arg(long, env = "POLL_INTERVAL", default_value = "2")]
    poll_interval_secs: u64,

    /// Namespace the CSI drivers run in
    #[arg(long, env = "CSI_NAMESPACE", default_value = "rook-ceph")]
    csi_namespace: String,

    /// Namespace of the CSI provisioner and node secrets
    #[arg(long, env = "SECRET_NAMESPACE", default_value = "rook-ceph-external")]
    secret_namespace: String,

    /// RBD pool backing the RBD class
    #[arg(long, env = "RBD_POOL", default_value = "replicapool")]
    rbd_pool: String,

    /// RADOS namespace inside the RBD pool
    #[arg(long, env = "RADOS_NAMESPACE")]
    rados_namespace: Option<String>,

    /// CephFS filesystem backing the CephFS class
    #[arg(long, env = "CEPHFS_NAME", default_value = "myfs")]
    filesystem: String,

    /// Subvolume group the CephFS driver creates volumes in
    #[arg(long, env = "SUBVOLUME_GROUP", default_value = "csi")]
    subvolume_group: String,

    /// Directory holding the YAML fixtures
    #[arg(long, env = "MANIFEST_DIR", default_value = "manifest")]
    manifest_dir: PathBuf,

    /// Ceph cluster ID; asked from `ceph fsid` when unset
    #[arg(long, env = "CLUSTER_ID")]
    cluster_id: Option<String>,

    /// kubeconfig for the API client and kubectl
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Write the run report as JSON to this file
    #[arg(long, env = "E2E_REPORT")]
    report: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn config(&self) -> E2eConfig {
        let mut config = E2eConfig {
            deploy_timeout: Duration::from_secs(self.deploy_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            csi_namespace: self.csi_namespace.clone(),
            secret_namespace: self.secret_namespace.clone(),
            manifest_dir: self.manifest_dir.clone(),
            cluster_id: self.cluster_id.clone(),
            kubeconfig: self.kubeconfig.clone(),
            ..Default::default()
        };
        config.rbd.pool = self.rbd_pool.clone();
        config.rbd.rados_namespace = self.rados_namespace.clone();
        config.cephfs.filesystem = self.filesystem.clone();
        config.cephfs.subvolume_group = self.subvolume_group.clone();
        config
    }

    fn filter(&self) -> CaseFilter {
        CaseFilter {
            labels: self.labels.clone(),
            focus: self.focus.clone(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = Arc::new(args.config());
    info!("Starting {} {}", csi_e2e::NAME, csi_e2e::VERSION);
    info!("  Suites: {:?}", args.suites);
    info!("  CSI namespace: {}", config.csi_namespace);
    info!("  Deploy timeout: {:?}", config.deploy_timeout);
    info!("  Manifests: {}", config.manifest_dir.display());

    let client = kube_client(config.kubeconfig.as_ref()).await?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let cluster_id = resolve_cluster_id(runner.as_ref(), config.cluster_id.as_deref()).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining waits");
            on_signal.cancel();
        }
    });

    let env = Environment {
        client,
        config: config.clone(),
        cluster_id,
        runner,
        cancel,
    };
    let report = run_suites(&env, &args).await?;

    report.log_summary();
    if let Some(path) = &args.report {
        report.write_json(path)?;
        info!("Report written to {}", path.display());
    }

    if !report.is_success() {
        error!("{} case(s) failed", report.failed());
        std::process::exit(1);
    }
    Ok(())
}

async fn run_suites(env: &Environment, args: &Args) -> Result<RunReport> {
    let waiter = env.waiter()?;
    let namespaces = env.namespaces();
    let runner = Runner::new(&namespaces, waiter.clone(), args.filter())
        .with_security_level(env.config.pod_security_level.clone());

    let mut report = RunReport::default();
    for kind in &args.suites {
        let suite = kind.build();
        let suite_report = runner.run(&suite, |ns| env.framework(ns, waiter.clone())).await;
        report.merge(suite_report);
    }
    Ok(report)
}

async fn kube_client(kubeconfig: Option<&PathBuf>) -> Result<kube::Client> {
    let Some(path) = kubeconfig else {
        return Ok(kube::Client::try_default().await?);
    };

    let kubeconfig = kube::config::Kubeconfig::read_from(path)
        .map_err(|e| Error::Configuration(format!("Invalid kubeconfig {}: {}", path.display(), e)))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Configuration(format!("Invalid kubeconfig {}: {}", path.display(), e)))?;
    Ok(kube::Client::try_from(config)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
