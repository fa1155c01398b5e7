use crate::config::JobControllerConfig;
use crate::error::Result;
use infrabox_core::k8s_openapi::api::batch::v1::JobSpec as BatchJobSpec;
use infrabox_core::k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use infrabox_core::{BatchJob, Job, ObjectMeta, Resource, ResourceQuantities};
use std::collections::BTreeMap;

/// Secret holding the SSH key used to reach Gerrit
pub const GERRIT_SSH_SECRET: &str = "infrabox-gerrit-ssh";

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn gerrit_env(config: &JobControllerConfig) -> Vec<EnvVar> {
    config
        .gerrit
        .as_ref()
        .map(|gerrit| {
            vec![
                env("INFRABOX_GERRIT_HOSTNAME", &gerrit.hostname),
                env("INFRABOX_GERRIT_USERNAME", &gerrit.username),
                env("INFRABOX_GERRIT_PORT", &gerrit.port),
            ]
        })
        .unwrap_or_default()
}

/// Build the batch job executing `job`
///
/// Two containers share the pod: `git-clone` checks out the sources into
/// the repo volume and `run-job` executes the job against them.
pub fn batch_job(job: &Job, token: &str, config: &JobControllerConfig) -> Result<BatchJob> {
    let limits = job.spec.resources.limits.clone().unwrap_or_default();
    let quantities = ResourceQuantities::from_k8s_resource_map(&limits)?;

    let dont_check_certificates = config.dont_check_certificates.to_string();

    let mut volumes = vec![empty_dir("data-dir"), empty_dir("repo")];
    let mut run_mounts = vec![mount("data-dir", "/data"), mount("repo", "/repo")];
    let mut clone_mounts = vec![mount("repo", "/repo")];

    if let Some(path) = &config.local_cache_host_path {
        volumes.push(Volume {
            name: "local-cache".to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        run_mounts.push(mount("local-cache", "/local-cache"));
    }

    if config.gerrit.is_some() {
        volumes.push(Volume {
            name: "gerrit-ssh".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(GERRIT_SSH_SECRET.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        clone_mounts.push(mount("gerrit-ssh", "/tmp/gerrit/"));
    }

    let mut run_env = vec![
        env("INFRABOX_JOB_ID", job.name()),
        env("INFRABOX_GENERAL_DONT_CHECK_CERTIFICATES", &dont_check_certificates),
        env("INFRABOX_JOB_API_URL", format!("{}/api/job", config.root_url)),
        env("INFRABOX_JOB_GIT_URL", "http://localhost:8080"),
        env("INFRABOX_SERVICE", "job"),
        env("INFRABOX_VERSION", &config.version),
        env(
            "INFRABOX_LOCAL_CACHE_ENABLED",
            config.local_cache_enabled().to_string(),
        ),
        env("INFRABOX_JOB_MAX_OUTPUT_SIZE", &config.job_max_output_size),
        env(
            "INFRABOX_JOB_MOUNT_DOCKER_SOCKET",
            config.mount_docker_socket.to_string(),
        ),
        env("INFRABOX_JOB_DAEMON_JSON", &config.daemon_json),
        env("INFRABOX_ROOT_URL", &config.root_url),
        env("INFRABOX_JOB_TOKEN", token),
        env(
            "INFRABOX_JOB_RESOURCES_LIMITS_MEMORY",
            quantities.memory_mib().to_string(),
        ),
        env("INFRABOX_JOB_RESOURCES_LIMITS_CPU", quantities.cpu_string()),
    ];
    run_env.extend(job.spec.env.iter().cloned());
    run_env.extend(gerrit_env(config));

    let mut clone_env = vec![env(
        "INFRABOX_GENERAL_DONT_CHECK_CERTIFICATES",
        &dont_check_certificates,
    )];
    clone_env.extend(gerrit_env(config));

    // Requests restate both limits; only cpu is enforced as a limit
    let mut requests = BTreeMap::new();
    let mut enforced = BTreeMap::new();
    for name in ["cpu", "memory"] {
        if let Some(q) = limits.get(name) {
            requests.insert(name.to_string(), q.clone());
        }
    }
    if let Some(cpu) = limits.get("cpu") {
        enforced.insert("cpu".to_string(), cpu.clone());
    }

    let git_clone = Container {
        name: "git-clone".to_string(),
        image: Some(format!("{}/job-git:{}", config.docker_registry, config.version)),
        image_pull_policy: Some("Always".to_string()),
        env: Some(clone_env),
        volume_mounts: Some(clone_mounts),
        ..Default::default()
    };

    let run_job = Container {
        name: "run-job".to_string(),
        image: Some(format!("{}/job:{}", config.docker_registry, config.version)),
        image_pull_policy: Some("Always".to_string()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        env: Some(run_env),
        resources: Some(ResourceRequirements {
            requests: Some(requests),
            limits: Some(enforced),
            ..Default::default()
        }),
        volume_mounts: Some(run_mounts),
        ..Default::default()
    };

    Ok(BatchJob {
        metadata: ObjectMeta {
            name: Some(job.name().to_string()),
            namespace: Some(job.namespace().to_string()),
            owner_references: Some(vec![job.controller_ref()]),
            ..Default::default()
        },
        spec: Some(BatchJobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    automount_service_account_token: Some(false),
                    containers: vec![git_clone, run_job],
                    volumes: Some(volumes),
                    restart_policy: Some("OnFailure".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}
