//! [`ContainerRuntime`] over the LXC command-line tools.

use std::net::IpAddr;

use super::runtime::{ContainerRuntime, ContainerRuntimeError, ContainerState, RuntimeFuture};
use crate::command::{CommandOutput, CommandRunner, ProcessCommandRunner};

const TEMPLATE_ARCH: &str = "amd64";

/// Drives LXC through `lxc-*` commands executed by a [`CommandRunner`].
#[derive(Clone, Debug, Default)]
pub struct LxcRuntime<C = ProcessCommandRunner> {
    runner: C,
}

impl<C: CommandRunner> LxcRuntime<C> {
    /// Creates a runtime issuing commands through `runner`.
    pub const fn new(runner: C) -> Self {
        Self { runner }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<CommandOutput, ContainerRuntimeError> {
        Ok(self.runner.run(program, &args).await?.require_success(program)?)
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

fn parse_addresses(stdout: &str) -> Vec<IpAddr> {
    let mut addresses: Vec<IpAddr> = stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    addresses.sort_by_key(IpAddr::is_ipv6);
    addresses
}

impl<C: CommandRunner> ContainerRuntime for LxcRuntime<C> {
    fn list(&self) -> RuntimeFuture<'_, Vec<String>> {
        Box::pin(async move {
            let output = self.run("lxc-ls", args(["-1"])).await?;
            Ok(output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect())
        })
    }

    fn build_template<'a>(
        &'a self,
        template: &'a str,
        distro: &'a str,
        release: &'a str,
    ) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(template, distro, release, "building template");
            self.run(
                "lxc-create",
                args([
                    "-n",
                    template,
                    "-t",
                    "download",
                    "--",
                    "--dist",
                    distro,
                    "--release",
                    release,
                    "--arch",
                    TEMPLATE_ARCH,
                ]),
            )
            .await
            .map(drop)
        })
    }

    fn clone_container<'a>(&'a self, template: &'a str, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.run("lxc-copy", args(["-n", template, "-N", name]))
                .await
                .map(drop)
        })
    }

    fn start<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.run("lxc-start", args(["-n", name, "-d"]))
                .await
                .map(drop)
        })
    }

    fn stop<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.run("lxc-stop", args(["-n", name])).await.map(drop) })
    }

    fn destroy<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.run("lxc-destroy", args(["-n", name])).await.map(drop) })
    }

    fn state<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, Option<ContainerState>> {
        Box::pin(async move {
            let info_args = args(["-n", name, "-s", "-H"]);
            let output = self
                .runner
                .run("lxc-info", &info_args)
                .await
                .map_err(ContainerRuntimeError::from)?;
            if output.is_success() {
                return Ok(Some(ContainerState::parse(&output.stdout)));
            }
            // lxc-info also fails for undefined containers.
            if self.exists(name).await? {
                output.require_success("lxc-info")?;
            }
            Ok(None)
        })
    }

    fn ip_addresses<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, Vec<IpAddr>> {
        Box::pin(async move {
            let output = self.run("lxc-info", args(["-n", name, "-i", "-H"])).await?;
            Ok(parse_addresses(&output.stdout))
        })
    }

    fn run_script<'a>(
        &'a self,
        name: &'a str,
        script: &'a str,
        env: &'a [(String, String)],
    ) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut attach = args(["-n", name, "--clear-env"]);
            for (key, value) in env {
                attach.push(String::from("--set-var"));
                attach.push(format!("{key}={value}"));
            }
            attach.extend(args(["--", "/bin/sh", "-c", script]));
            tracing::info!(name, "running startup script");
            self.run("lxc-attach", attach).await.map(drop)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandError;
    use crate::test_support::{CommandInvocation, ScriptedRunner};

    fn runtime(runner: &ScriptedRunner) -> LxcRuntime<ScriptedRunner> {
        LxcRuntime::new(runner.clone())
    }

    fn first_invocation(runner: &ScriptedRunner) -> CommandInvocation {
        runner
            .invocations()
            .into_iter()
            .next()
            .unwrap_or_else(|| panic!("no command was run"))
    }

    #[tokio::test]
    async fn list_returns_trimmed_names() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "ubuntu-18-v1\nmist-a \n\n", "");

        let names = runtime(&runner)
            .list()
            .await
            .unwrap_or_else(|err| panic!("list: {err}"));

        assert_eq!(names, vec![String::from("ubuntu-18-v1"), String::from("mist-a")]);
        assert_eq!(first_invocation(&runner).command_string(), "lxc-ls -1");
    }

    #[tokio::test]
    async fn build_template_uses_download_template() {
        let runner = ScriptedRunner::new();
        runner.push_success();

        runtime(&runner)
            .build_template("ubuntu-18-v1", "ubuntu", "18")
            .await
            .unwrap_or_else(|err| panic!("build: {err}"));

        assert_eq!(
            first_invocation(&runner).command_string(),
            "lxc-create -n ubuntu-18-v1 -t download -- --dist ubuntu --release 18 --arch amd64"
        );
    }

    #[tokio::test]
    async fn failed_commands_surface_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_failure(1, "lxc-copy: mist-a already exists");

        let err = runtime(&runner)
            .clone_container("ubuntu-18-v1", "mist-a")
            .await
            .expect_err("clone should fail");

        assert_eq!(
            err,
            ContainerRuntimeError::Command(CommandError::Failure {
                program: String::from("lxc-copy"),
                status: Some(1),
                status_text: String::from("1"),
                stderr: String::from("lxc-copy: mist-a already exists"),
            })
        );
    }

    #[tokio::test]
    async fn state_of_undefined_container_is_none() {
        let runner = ScriptedRunner::new();
        runner.push_failure(1, "mist-a doesn't exist");
        runner.push_output(Some(0), "ubuntu-18-v1\n", "");

        let state = runtime(&runner)
            .state("mist-a")
            .await
            .unwrap_or_else(|err| panic!("state: {err}"));

        assert_eq!(state, None);
    }

    #[tokio::test]
    async fn state_parses_running() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "RUNNING\n", "");

        let state = runtime(&runner)
            .state("mist-a")
            .await
            .unwrap_or_else(|err| panic!("state: {err}"));

        assert_eq!(state, Some(ContainerState::Running));
        assert_eq!(
            first_invocation(&runner).command_string(),
            "lxc-info -n mist-a -s -H"
        );
    }

    #[test]
    fn addresses_prefer_ipv4() {
        let parsed = parse_addresses("fd42::5\n10.0.3.17\nnot-an-ip\n");
        let expected: Vec<IpAddr> = vec![
            "10.0.3.17".parse().unwrap_or_else(|err| panic!("ip: {err}")),
            "fd42::5".parse().unwrap_or_else(|err| panic!("ip: {err}")),
        ];
        assert_eq!(parsed, expected);
    }

    #[tokio::test]
    async fn run_script_passes_clean_environment() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let env = vec![
            (String::from("MIST_USER"), String::from("mist")),
            (String::from("MIST_KEY"), String::from("ssh-ed25519 AAAA")),
        ];

        runtime(&runner)
            .run_script("mist-a", "echo ready", &env)
            .await
            .unwrap_or_else(|err| panic!("script: {err}"));

        let invocation = first_invocation(&runner);
        assert_eq!(invocation.program, "lxc-attach");
        assert_eq!(
            invocation.args,
            vec![
                "-n",
                "mist-a",
                "--clear-env",
                "--set-var",
                "MIST_USER=mist",
                "--set-var",
                "MIST_KEY=ssh-ed25519 AAAA",
                "--",
                "/bin/sh",
                "-c",
                "echo ready",
            ]
        );
    }
}
