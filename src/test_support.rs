//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here stand in for the compute API, the container host, and
//! host processes so the provisioning engine can be exercised end to end
//! without cloud credentials or LXC.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8Path;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::cloud::{
    ComputeApi, ComputeApiError, ComputeFuture, Disk, DiskSpec, Image, Instance, InstanceSpec,
};
use crate::command::{CommandError, CommandFuture, CommandOutput, CommandRunner};
use crate::config::MistConfig;
use crate::container::{ContainerRuntime, ContainerRuntimeError, ContainerState, RuntimeFuture};
use crate::naming::NameGenerator;

/// Configuration with every default filled in and no cloud credentials.
#[must_use]
pub fn sample_config() -> MistConfig {
    MistConfig {
        default_distro: String::from("ubuntu"),
        default_release: String::from("18"),
        instance_name: String::from("mist"),
        username: String::from("mist"),
        ssh_public_key: String::from("~/.ssh/id_rsa.pub"),
        ssh_private_key: String::from("~/.ssh/id_rsa"),
        startup_script_path: String::from("/etc/mist/startup"),
        gce_project: None,
        gce_access_token: None,
        gce_access_token_file: None,
        gce_image_projects: String::from("ubuntu-os-cloud,debian-cloud,centos-cloud"),
        zone: String::from("us-central1-a"),
        network: String::from("default"),
        subnet: None,
        machine_type: String::from("n1-standard-1"),
        use_public_ip: true,
        listen_address: String::from("0.0.0.0"),
    }
}

/// Writes startup scripts for `distros` and an operator key below `root`.
///
/// Returns a configuration pointing at the written files.
///
/// # Errors
///
/// Returns any I/O error raised while writing.
pub fn write_assets(root: &Utf8Path, distros: &[&str]) -> std::io::Result<MistConfig> {
    let scripts = root.join("startup");
    for kind in ["gce", "lxc"] {
        let dir = scripts.join(kind);
        std::fs::create_dir_all(&dir)?;
        for distro in distros {
            std::fs::write(dir.join(distro), format!("#!/bin/sh\necho {kind} {distro}\n"))?;
        }
    }
    let key = root.join("id_mist.pub");
    std::fs::write(&key, "ssh-ed25519 AAAATEST operator@mist\n")?;

    let mut config = sample_config();
    config.startup_script_path = scripts.into_string();
    config.ssh_public_key = key.into_string();
    Ok(config)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn loopback(octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, octet))
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> CommandFuture<'a> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let response = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            });
        Box::pin(async move { response })
    }
}

/// Name generator yielding `<base>-1`, `<base>-2`, ...
#[derive(Debug, Default)]
pub struct SequentialNames {
    next: AtomicUsize,
}

impl NameGenerator for SequentialNames {
    fn generate(&self, base: &str) -> String {
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{base}-{id}")
    }
}

#[derive(Clone, Debug)]
struct FakeInstance {
    disk: String,
    instance: Instance,
}

#[derive(Debug, Default)]
struct ComputeState {
    images: Vec<(String, Image)>,
    disks: BTreeMap<String, Disk>,
    instances: BTreeMap<String, FakeInstance>,
    specs: Vec<InstanceSpec>,
    next_octet: u8,
    never_running: bool,
    without_addresses: bool,
    reject_instances: bool,
    lose_instances: bool,
}

/// In-memory compute API with instantly ready disks and instances.
///
/// Instances receive distinct loopback addresses so tests can stand up a
/// listener on `0.0.0.0` and have the service probe succeed.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCompute {
    state: Arc<Mutex<ComputeState>>,
}

impl InMemoryCompute {
    /// Creates an API with no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an image called `name` in `project`.
    #[must_use]
    pub fn with_image(self, project: &str, name: &str, deprecated: bool) -> Self {
        lock(&self.state).images.push((
            project.to_owned(),
            Image {
                name: name.to_owned(),
                self_link: format!("projects/{project}/global/images/{name}"),
                deprecated,
                disk_size_gb: 10,
            },
        ));
        self
    }

    /// Makes new instances stay in `PROVISIONING` forever.
    #[must_use]
    pub fn never_running(self) -> Self {
        lock(&self.state).never_running = true;
        self
    }

    /// Makes running instances report no network addresses.
    #[must_use]
    pub fn without_addresses(self) -> Self {
        lock(&self.state).without_addresses = true;
        self
    }

    /// Makes every instance insertion fail.
    #[must_use]
    pub fn rejecting_instances(self) -> Self {
        lock(&self.state).reject_instances = true;
        self
    }

    /// Accepts every instance insertion without ever creating the instance,
    /// as when the zone drops an accepted operation.
    #[must_use]
    pub fn losing_instances(self) -> Self {
        lock(&self.state).lose_instances = true;
        self
    }

    /// Adds a running instance that was created outside the engine.
    #[must_use]
    pub fn with_running_instance(self, name: &str) -> Self {
        {
            let mut state = lock(&self.state);
            state.disks.insert(
                name.to_owned(),
                Disk {
                    status: String::from("READY"),
                },
            );
            let instance = Self::booted(&mut state);
            state.instances.insert(
                name.to_owned(),
                FakeInstance {
                    disk: name.to_owned(),
                    instance,
                },
            );
        }
        self
    }

    /// Names of existing disks.
    #[must_use]
    pub fn disk_names(&self) -> Vec<String> {
        lock(&self.state).disks.keys().cloned().collect()
    }

    /// Names of existing instances.
    #[must_use]
    pub fn instance_names(&self) -> Vec<String> {
        lock(&self.state).instances.keys().cloned().collect()
    }

    /// Every instance specification submitted so far.
    #[must_use]
    pub fn submitted_instances(&self) -> Vec<InstanceSpec> {
        lock(&self.state).specs.clone()
    }

    fn booted(state: &mut ComputeState) -> Instance {
        state.next_octet = state.next_octet.wrapping_add(1).max(1);
        let octet = state.next_octet;
        let running = !state.never_running;
        let with_addresses = running && !state.without_addresses;
        Instance {
            status: String::from(if running { "RUNNING" } else { "PROVISIONING" }),
            public_ip: with_addresses.then(|| loopback(octet).to_string()),
            private_ip: with_addresses.then(|| format!("127.0.1.{octet}")),
        }
    }

    fn conflict(name: &str) -> ComputeApiError {
        ComputeApiError::Status {
            status: 409,
            body: format!("resource {name} already exists"),
        }
    }
}

impl ComputeApi for InMemoryCompute {
    fn list_images<'a>(&'a self, project: &'a str) -> ComputeFuture<'a, Vec<Image>> {
        let images = lock(&self.state)
            .images
            .iter()
            .filter(|(owner, _)| owner == project)
            .map(|(_, image)| image.clone())
            .collect();
        Box::pin(async move { Ok(images) })
    }

    fn insert_disk<'a>(&'a self, spec: &'a DiskSpec) -> ComputeFuture<'a, ()> {
        let mut state = lock(&self.state);
        let result = if state.disks.contains_key(&spec.name) {
            Err(Self::conflict(&spec.name))
        } else {
            state.disks.insert(
                spec.name.clone(),
                Disk {
                    status: String::from("READY"),
                },
            );
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn get_disk<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, Option<Disk>> {
        let disk = lock(&self.state).disks.get(name).cloned();
        Box::pin(async move { Ok(disk) })
    }

    fn delete_disk<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()> {
        lock(&self.state).disks.remove(name);
        Box::pin(async { Ok(()) })
    }

    fn insert_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ComputeFuture<'a, ()> {
        let mut state = lock(&self.state);
        state.specs.push(spec.clone());
        let result = if state.reject_instances {
            Err(ComputeApiError::Status {
                status: 403,
                body: String::from("quota exceeded"),
            })
        } else if state.instances.contains_key(&spec.name) {
            Err(Self::conflict(&spec.name))
        } else if state.lose_instances {
            Ok(())
        } else {
            let instance = Self::booted(&mut state);
            state.instances.insert(
                spec.name.clone(),
                FakeInstance {
                    disk: spec.disk.clone(),
                    instance,
                },
            );
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn get_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, Option<Instance>> {
        let instance = lock(&self.state)
            .instances
            .get(name)
            .map(|found| found.instance.clone());
        Box::pin(async move { Ok(instance) })
    }

    fn stop_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()> {
        let result = match lock(&self.state).instances.get_mut(name) {
            Some(found) => {
                found.instance.status = String::from("TERMINATED");
                Ok(())
            }
            None => Err(ComputeApiError::Status {
                status: 404,
                body: format!("instance {name} not found"),
            }),
        };
        Box::pin(async move { result })
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> ComputeFuture<'a, ()> {
        let mut state = lock(&self.state);
        if let Some(removed) = state.instances.remove(name) {
            state.disks.remove(&removed.disk);
        }
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone, Debug)]
struct FakeContainer {
    running: bool,
    ip: Option<IpAddr>,
}

#[derive(Debug, Default)]
struct ContainerHost {
    containers: BTreeMap<String, FakeContainer>,
    built_templates: Vec<String>,
    scripts: Vec<(String, Vec<(String, String)>)>,
    next_octet: u8,
    never_start: bool,
    without_network: bool,
    failing_script: bool,
    failing_destroy: bool,
}

/// In-memory container host mirroring LXC semantics.
///
/// Destroying a running container fails, as it does with `lxc-destroy`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryContainers {
    host: Arc<Mutex<ContainerHost>>,
}

impl InMemoryContainers {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stopped container, typically a template.
    #[must_use]
    pub fn with_container(self, name: &str) -> Self {
        lock(&self.host).containers.insert(
            name.to_owned(),
            FakeContainer {
                running: false,
                ip: None,
            },
        );
        self
    }

    /// Adds a running container with an address.
    #[must_use]
    pub fn with_running_container(self, name: &str) -> Self {
        {
            let mut host = lock(&self.host);
            let ip = Self::next_ip(&mut host);
            host.containers.insert(
                name.to_owned(),
                FakeContainer {
                    running: true,
                    ip: Some(ip),
                },
            );
        }
        self
    }

    /// Makes started containers never reach the running state.
    #[must_use]
    pub fn never_start(self) -> Self {
        lock(&self.host).never_start = true;
        self
    }

    /// Makes running containers never receive an address.
    #[must_use]
    pub fn without_network(self) -> Self {
        lock(&self.host).without_network = true;
        self
    }

    /// Makes the startup script exit non-zero.
    #[must_use]
    pub fn failing_script(self) -> Self {
        lock(&self.host).failing_script = true;
        self
    }

    /// Makes every destroy call fail.
    #[must_use]
    pub fn failing_destroy(self) -> Self {
        lock(&self.host).failing_destroy = true;
        self
    }

    /// Names of all defined containers.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        lock(&self.host).containers.keys().cloned().collect()
    }

    /// Whether `name` is currently running.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.host)
            .containers
            .get(name)
            .is_some_and(|container| container.running)
    }

    /// Address assigned to `name`, if it has one.
    #[must_use]
    pub fn address_of(&self, name: &str) -> Option<IpAddr> {
        lock(&self.host)
            .containers
            .get(name)
            .and_then(|container| container.ip)
    }

    /// Templates built on demand so far.
    #[must_use]
    pub fn built_templates(&self) -> Vec<String> {
        lock(&self.host).built_templates.clone()
    }

    /// Scripts executed so far, with the container name and environment.
    #[must_use]
    pub fn script_runs(&self) -> Vec<(String, Vec<(String, String)>)> {
        lock(&self.host).scripts.clone()
    }

    fn next_ip(host: &mut ContainerHost) -> IpAddr {
        host.next_octet = host.next_octet.wrapping_add(1).max(1);
        loopback(host.next_octet)
    }

    fn failure(program: &str, stderr: String) -> ContainerRuntimeError {
        ContainerRuntimeError::Command(CommandError::Failure {
            program: program.to_owned(),
            status: Some(1),
            status_text: String::from("1"),
            stderr,
        })
    }
}

impl ContainerRuntime for InMemoryContainers {
    fn list(&self) -> RuntimeFuture<'_, Vec<String>> {
        let names = self.names();
        Box::pin(async move { Ok(names) })
    }

    fn build_template<'a>(
        &'a self,
        template: &'a str,
        distro: &'a str,
        release: &'a str,
    ) -> RuntimeFuture<'a, ()> {
        let _ = (distro, release);
        {
            let mut host = lock(&self.host);
            host.built_templates.push(template.to_owned());
            host.containers.insert(
                template.to_owned(),
                FakeContainer {
                    running: false,
                    ip: None,
                },
            );
        }
        Box::pin(async { Ok(()) })
    }

    fn clone_container<'a>(&'a self, template: &'a str, name: &'a str) -> RuntimeFuture<'a, ()> {
        let mut host = lock(&self.host);
        let result = if !host.containers.contains_key(template) {
            Err(Self::failure("lxc-copy", format!("{template} doesn't exist")))
        } else if host.containers.contains_key(name) {
            Err(Self::failure("lxc-copy", format!("{name} already exists")))
        } else {
            host.containers.insert(
                name.to_owned(),
                FakeContainer {
                    running: false,
                    ip: None,
                },
            );
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn start<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        let mut host = lock(&self.host);
        let never_start = host.never_start;
        let ip = (!host.without_network).then(|| Self::next_ip(&mut host));
        let result = match host.containers.get_mut(name) {
            Some(container) => {
                container.running = !never_start;
                container.ip = ip;
                Ok(())
            }
            None => Err(Self::failure("lxc-start", format!("{name} doesn't exist"))),
        };
        Box::pin(async move { result })
    }

    fn stop<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        let result = match lock(&self.host).containers.get_mut(name) {
            Some(container) => {
                container.running = false;
                container.ip = None;
                Ok(())
            }
            None => Err(Self::failure("lxc-stop", format!("{name} doesn't exist"))),
        };
        Box::pin(async move { result })
    }

    fn destroy<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        let mut host = lock(&self.host);
        let running = host.containers.get(name).map(|container| container.running);
        let result = match running {
            _ if host.failing_destroy => {
                Err(Self::failure("lxc-destroy", String::from("device busy")))
            }
            Some(true) => Err(Self::failure("lxc-destroy", format!("{name} is running"))),
            Some(false) => {
                host.containers.remove(name);
                Ok(())
            }
            None => Err(Self::failure("lxc-destroy", format!("{name} doesn't exist"))),
        };
        Box::pin(async move { result })
    }

    fn state<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, Option<ContainerState>> {
        let state = lock(&self.host).containers.get(name).map(|container| {
            if container.running {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            }
        });
        Box::pin(async move { Ok(state) })
    }

    fn ip_addresses<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, Vec<IpAddr>> {
        let addresses = lock(&self.host)
            .containers
            .get(name)
            .filter(|container| container.running)
            .and_then(|container| container.ip)
            .into_iter()
            .collect();
        Box::pin(async move { Ok(addresses) })
    }

    fn run_script<'a>(
        &'a self,
        name: &'a str,
        script: &'a str,
        env: &'a [(String, String)],
    ) -> RuntimeFuture<'a, ()> {
        let _ = script;
        let mut host = lock(&self.host);
        host.scripts.push((name.to_owned(), env.to_vec()));
        let result = if host.failing_script {
            Err(Self::failure("lxc-attach", String::from("script exited 1")))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
