use clap::{Args, Parser, Subcommand};
use infrabox_controller::config::{DEFAULT_DAEMON_JSON_PATH, DEFAULT_RSA_PRIVATE_KEY_PATH};
use infrabox_controller::{
    ApiClient, GcloudProvider, GerritConfig, GkeControllerConfig, GkeLifecycle, HttpStore,
    Informer, InformerConfig, JobControllerConfig, JobLifecycle, Lifecycle, LifecycleController,
};
use infrabox_core::{BatchJob, GkeCluster, Job, Secret};
use infrabox_workqueue::{Dispatcher, DispatcherConfig, WorkQueue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "infrabox", about = "InfraBox resource controllers")]
struct Cli {
    /// Log filter, overrides RUST_LOG (e.g. "debug", "infrabox_controller=trace")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Job controller
    JobController {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Run the GKECluster controller
    GcpController {
        #[command(flatten)]
        cluster: ClusterArgs,
        #[command(flatten)]
        gke: GkeArgs,
    },
}

/// Connection to the API server and worker settings
#[derive(Args)]
struct ClusterArgs {
    /// API server URL
    #[arg(long, env = "KUBERNETES_API_URL", default_value = "https://kubernetes.default.svc")]
    api_server: String,
    /// File holding the bearer token presented to the API server
    #[arg(long, env = "KUBERNETES_TOKEN_FILE")]
    token_file: Option<PathBuf>,
    /// Skip TLS verification of the API server certificate
    #[arg(long)]
    insecure_skip_tls_verify: bool,
    /// Number of concurrent workers
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Seconds between two listings of the watched resources
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,
}

#[derive(Args)]
struct JobArgs {
    #[arg(long, env = "INFRABOX_GENERAL_DONT_CHECK_CERTIFICATES")]
    dont_check_certificates: bool,
    #[arg(long, env = "INFRABOX_LOCAL_CACHE_ENABLED")]
    local_cache_enabled: bool,
    #[arg(long, env = "INFRABOX_LOCAL_CACHE_HOST_PATH")]
    local_cache_host_path: Option<String>,
    #[arg(long, env = "INFRABOX_JOB_MAX_OUTPUT_SIZE", default_value = "")]
    job_max_output_size: String,
    #[arg(long, env = "INFRABOX_JOB_MOUNT_DOCKER_SOCKET")]
    job_mount_docker_socket: bool,
    /// Public root URL of the InfraBox installation
    #[arg(long, env = "INFRABOX_ROOT_URL")]
    root_url: String,
    /// Image tag of the job images
    #[arg(long, env = "INFRABOX_VERSION")]
    version: String,
    #[arg(long, env = "INFRABOX_GENERAL_DOCKER_REGISTRY")]
    docker_registry: String,
    #[arg(long, env = "INFRABOX_GERRIT_ENABLED")]
    gerrit_enabled: bool,
    #[arg(long, env = "INFRABOX_GERRIT_HOSTNAME")]
    gerrit_hostname: Option<String>,
    #[arg(long, env = "INFRABOX_GERRIT_USERNAME")]
    gerrit_username: Option<String>,
    #[arg(long, env = "INFRABOX_GERRIT_PORT")]
    gerrit_port: Option<String>,
    /// Key used to sign job tokens
    #[arg(long, env = "INFRABOX_RSA_PRIVATE_KEY_PATH", default_value = DEFAULT_RSA_PRIVATE_KEY_PATH)]
    rsa_private_key_path: PathBuf,
    /// Docker daemon configuration handed to every job
    #[arg(long, default_value = DEFAULT_DAEMON_JSON_PATH)]
    daemon_json_path: PathBuf,
    /// Seconds between checks while services come up or go away
    #[arg(long, default_value_t = 5)]
    service_poll_interval: u64,
}

#[derive(Args)]
struct GkeArgs {
    /// Compute zone clusters are created in
    #[arg(long, default_value = "us-east1-b")]
    zone: String,
    /// gcloud binary to invoke
    #[arg(long, default_value = "gcloud")]
    gcloud: String,
    /// Seconds between checks while a cluster is provisioning or being deleted
    #[arg(long, default_value_t = 30)]
    cluster_poll_interval: u64,
}

fn required(value: Option<String>, flag: &str) -> miette::Result<String> {
    value.ok_or_else(|| miette::miette!("--{} is required when Gerrit is enabled", flag))
}

impl JobArgs {
    fn into_config(self) -> miette::Result<JobControllerConfig> {
        let local_cache_host_path = match (self.local_cache_enabled, self.local_cache_host_path) {
            (true, Some(path)) => Some(path),
            (true, None) => {
                return Err(miette::miette!(
                    "--local-cache-host-path is required when the local cache is enabled"
                ))
            }
            (false, _) => None,
        };

        let gerrit = if self.gerrit_enabled {
            Some(GerritConfig {
                hostname: required(self.gerrit_hostname, "gerrit-hostname")?,
                username: required(self.gerrit_username, "gerrit-username")?,
                port: required(self.gerrit_port, "gerrit-port")?,
            })
        } else {
            None
        };

        Ok(JobControllerConfig {
            dont_check_certificates: self.dont_check_certificates,
            local_cache_host_path,
            job_max_output_size: self.job_max_output_size,
            mount_docker_socket: self.job_mount_docker_socket,
            daemon_json: JobControllerConfig::read_daemon_json(&self.daemon_json_path)?,
            root_url: self.root_url,
            version: self.version,
            docker_registry: self.docker_registry,
            gerrit,
            rsa_private_key_path: self.rsa_private_key_path,
            poll_interval: Duration::from_secs(self.service_poll_interval),
        })
    }
}

impl GkeArgs {
    fn into_config(self) -> GkeControllerConfig {
        GkeControllerConfig {
            zone: self.zone,
            gcloud: self.gcloud,
            poll_interval: Duration::from_secs(self.cluster_poll_interval),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match &cli.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::JobController { cluster, job } => run_job_controller(cluster, job).await,
        Commands::GcpController { cluster, gke } => run_gcp_controller(cluster, gke).await,
    }
}

/// Build the API client from the connection arguments
fn connect(cluster: &ClusterArgs) -> miette::Result<Arc<ApiClient>> {
    let token = cluster
        .token_file
        .as_deref()
        .map(read_token)
        .transpose()?;

    let client = ApiClient::with_options(&cluster.api_server, token, cluster.insecure_skip_tls_verify)?;
    Ok(Arc::new(client))
}

fn read_token(path: &Path) -> miette::Result<String> {
    std::fs::read_to_string(path)
        .map(|token| token.trim().to_string())
        .map_err(|e| miette::miette!("Failed to read token file '{}': {}", path.display(), e))
}

async fn run_job_controller(cluster: ClusterArgs, args: JobArgs) -> miette::Result<()> {
    info!("Starting InfraBox job controller");

    let config = args.into_config()?;
    let client = connect(&cluster)?;

    let jobs = Arc::new(HttpStore::<Job>::new(client.clone()));
    let lifecycle = JobLifecycle::new(
        jobs.clone(),
        Arc::new(HttpStore::<BatchJob>::new(client.clone())),
        client,
        config,
    );

    run_controller(&cluster, jobs, LifecycleController::new(lifecycle)).await
}

async fn run_gcp_controller(cluster: ClusterArgs, args: GkeArgs) -> miette::Result<()> {
    info!("Starting InfraBox GCP controller");

    let config = args.into_config();
    let client = connect(&cluster)?;

    let clusters = Arc::new(HttpStore::<GkeCluster>::new(client.clone()));
    let lifecycle = GkeLifecycle::new(
        clusters.clone(),
        Arc::new(HttpStore::<Secret>::new(client)),
        Arc::new(GcloudProvider::new(config.clone())),
        config,
    );

    run_controller(&cluster, clusters, LifecycleController::new(lifecycle)).await
}

/// Wire informer, queue and dispatcher together and run until ctrl-c
async fn run_controller<L: Lifecycle>(
    cluster: &ClusterArgs,
    store: Arc<HttpStore<L::Object>>,
    controller: LifecycleController<L>,
) -> miette::Result<()> {
    let token = CancellationToken::new();
    let queue = WorkQueue::new(controller.lifecycle().name());

    let informer = Informer::new(
        store,
        queue.clone(),
        InformerConfig {
            poll_interval: Duration::from_secs(cluster.poll_interval),
            ..Default::default()
        },
    );
    let informer_handle = tokio::spawn(informer.run(token.clone()));

    let dispatcher = Dispatcher::new(
        queue,
        Arc::new(controller),
        DispatcherConfig {
            workers: cluster.workers,
        },
    );
    let dispatcher_token = token.clone();
    let mut dispatcher_handle =
        tokio::spawn(async move { dispatcher.run(dispatcher_token).await });

    // A dispatcher that stops on its own ends the process
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Shutting down gracefully...");
        }
        result = &mut dispatcher_handle => {
            token.cancel();
            result.map_err(|e| miette::miette!("Dispatcher task failed: {}", e))??;
            return Ok(());
        }
    }

    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = Duration::from_secs(5);
    let joined = tokio::time::timeout(shutdown_timeout, async {
        let (_, dispatcher) = tokio::join!(informer_handle, dispatcher_handle);
        dispatcher
    })
    .await;

    match joined {
        Ok(result) => result.map_err(|e| miette::miette!("Dispatcher task failed: {}", e))??,
        Err(_) => warn!("Workers did not stop within {:?}", shutdown_timeout),
    }

    info!("Shutdown complete");

    Ok(())
}
