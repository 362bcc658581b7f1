use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::PersistentVolume;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use zfs_nfs_engine::{PoolEngine, ZfsCliEngine};
use zfs_nfs_provisioner::{
    persistent_volume, DeletionInput, ProvisionerConfig, VolumeLifecycle, VolumeMetrics,
    VolumeRequest, ZfsNfsProvisioner,
};

/// Annotation the external provisioner library stamps on every volume it creates
const ANN_PROVISIONED_BY: &str = "pv.kubernetes.io/provisioned-by";

#[derive(Parser)]
#[command(name = "zfs-nfs", about = "ZFS dataset provisioner for NFS-exported volumes")]
struct Cli {
    /// Name this provisioner answers to in StorageClass.provisioner
    #[arg(long, env = "ZFS_PROVISIONER_NAME", default_value = "zfs.provisioner.io/nfs")]
    provisioner_name: String,

    /// Path to the zfs binary
    #[arg(long, env = "ZFS_BINARY", default_value = "zfs")]
    zfs_binary: String,

    /// Deadline for every zfs call, in seconds
    #[arg(long, env = "ZFS_ENGINE_TIMEOUT_SECS")]
    engine_timeout_secs: Option<u64>,

    /// Enable debug logging
    #[arg(long, env = "ZFS_DEBUG")]
    debug: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a volume and print the PersistentVolume to create
    Provision {
        /// VolumeRequest as JSON or YAML
        #[arg(long)]
        request: String,
    },
    /// Delete the dataset behind a PersistentVolume
    Delete {
        /// PersistentVolume as JSON or YAML
        #[arg(long)]
        volume: String,
    },
    /// Collect capacity and usage once and print them in Prometheus text format
    Metrics {
        /// Parent dataset whose children are reported
        #[arg(long)]
        parent: String,
        /// NFS server hostname, used as a metric label
        #[arg(long)]
        server_hostname: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    validate_provisioner_name(&cli.provisioner_name)
        .map_err(|e| miette::miette!("Invalid provisioner name '{}': {}", cli.provisioner_name, e))?;

    let engine: Arc<dyn PoolEngine> = Arc::new(ZfsCliEngine::new(&cli.zfs_binary));
    let config = ProvisionerConfig {
        engine_timeout: cli.engine_timeout_secs.map(Duration::from_secs),
    };

    match cli.command {
        Commands::Provision { request } => {
            run_provision(engine, config, &cli.provisioner_name, &request).await
        }
        Commands::Delete { volume } => run_delete(engine, config, &volume).await,
        Commands::Metrics {
            parent,
            server_hostname,
        } => run_metrics(engine, config, &parent, &server_hostname).await,
    }
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_provision(
    engine: Arc<dyn PoolEngine>,
    config: ProvisionerConfig,
    provisioner_name: &str,
    request_path: &str,
) -> miette::Result<()> {
    let request: VolumeRequest = read_document(request_path)?;
    info!("Provisioning volume {}", request.volume_name);

    let lifecycle = ZfsNfsProvisioner::new(engine, config);
    let result = lifecycle.provision(&request).await?;

    let mut pv = persistent_volume(&request, &result);
    pv.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANN_PROVISIONED_BY.to_string(), provisioner_name.to_string());

    let json = serde_json::to_string_pretty(&pv)
        .map_err(|e| miette::miette!("Failed to serialize PersistentVolume: {}", e))?;
    println!("{}", json);
    Ok(())
}

async fn run_delete(
    engine: Arc<dyn PoolEngine>,
    config: ProvisionerConfig,
    volume_path: &str,
) -> miette::Result<()> {
    let volume: PersistentVolume = read_document(volume_path)?;
    let input = DeletionInput::from_persistent_volume(&volume)?;

    let lifecycle = ZfsNfsProvisioner::new(engine, config);
    lifecycle.delete(&input).await?;
    Ok(())
}

async fn run_metrics(
    engine: Arc<dyn PoolEngine>,
    config: ProvisionerConfig,
    parent: &str,
    server_hostname: &str,
) -> miette::Result<()> {
    let registry = Registry::new();
    let metrics = VolumeMetrics::new(&registry, engine, config, parent, server_hostname)?;
    let reported = metrics.collect().await;
    debug!("Reported {} volumes", reported);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| miette::miette!("Failed to encode metrics: {}", e))?;
    print!("{}", String::from_utf8_lossy(&buffer));
    Ok(())
}

/// Read a JSON or (by extension) YAML document
fn read_document<T: DeserializeOwned>(path: &str) -> miette::Result<T> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read '{}': {}", path, e))?;

    let is_yaml = matches!(
        Path::new(path).extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&data).map_err(|e| miette::miette!("Failed to parse '{}': {}", path, e))
    } else {
        serde_json::from_str(&data).map_err(|e| miette::miette!("Failed to parse '{}': {}", path, e))
    }
}

/// Check that a provisioner name is a Kubernetes qualified name
/// (`[prefix/]name`, lowercased before checking).
fn validate_provisioner_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is required".to_string());
    }
    let lowered = name.to_lowercase();

    let (prefix, local) = match lowered.split_once('/') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, lowered.as_str()),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 {
            return Err("prefix must be a DNS subdomain of at most 253 characters".to_string());
        }
        let valid_label = |label: &str| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        };
        if !prefix.split('.').all(valid_label) {
            return Err(format!("prefix '{}' is not a valid DNS subdomain", prefix));
        }
    }

    if local.is_empty() || local.len() > 63 {
        return Err("name part must be 1-63 characters".to_string());
    }
    let alnum = |c: char| c.is_ascii_alphanumeric();
    if !local.starts_with(alnum) || !local.ends_with(alnum) {
        return Err("name part must start and end with an alphanumeric character".to_string());
    }
    if !local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("name part may only contain alphanumerics, '-', '_' and '.'".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_valid_provisioner_names() {
        for name in ["zfs.provisioner.io/nfs", "example.com/zfs", "zfs", "Example.COM/ZFS_1"] {
            assert!(validate_provisioner_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_invalid_provisioner_names() {
        for name in ["", "/zfs", "example.com/", "-bad.com/zfs", "a/b/c", "example.com/-zfs"] {
            assert!(validate_provisioner_name(name).is_err(), "{name}");
        }
        assert!(validate_provisioner_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_read_yaml_request() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "volumeName: pvc-1\ncapacityBytes: 1024\nparameters:\n  parentDataset: tank/data"
        )
        .unwrap();

        let req: VolumeRequest = read_document(file.path().to_str().unwrap()).unwrap();
        assert_eq!(req.volume_name, "pvc-1");
        assert_eq!(req.capacity_bytes, 1024);
        assert_eq!(req.parameters.get("parentDataset").unwrap(), "tank/data");
    }

    #[test]
    fn test_read_json_deletion_volume() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"apiVersion":"v1","kind":"PersistentVolume","metadata":{{"name":"pvc-1","annotations":{{"zfs.provisioner.io/dataset":"tank/data/pvc-1"}}}}}}"#
        )
        .unwrap();

        let pv: PersistentVolume = read_document(file.path().to_str().unwrap()).unwrap();
        let input = DeletionInput::from_persistent_volume(&pv).unwrap();
        assert_eq!(input.volume_name, "pvc-1");
    }

    #[test]
    fn test_read_missing_file() {
        assert!(read_document::<VolumeRequest>("/nonexistent/request.json").is_err());
    }
}
