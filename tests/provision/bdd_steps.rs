//! BDD step definitions for provisioning behaviour.

use mist::RequestArgs;
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{Outcome, ProvisionContext};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn named(name: &str) -> RequestArgs {
    RequestArgs {
        name: Some(name.trim().to_owned()),
        ..RequestArgs::default()
    }
}

#[given("a container host with no templates")]
fn empty_host(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context
}

#[given("a container host whose containers never start")]
fn stalled_host(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.host = provision_context.host.clone().never_start();
    provision_context
}

#[given("a container host running \"{name}\"")]
fn host_running(mut provision_context: ProvisionContext, name: String) -> ProvisionContext {
    provision_context.host = provision_context
        .host
        .clone()
        .with_running_container(name.trim());
    provision_context
}

#[when("I request a container named \"{name}\"")]
fn request_container(
    mut provision_context: ProvisionContext,
    name: String,
) -> Result<ProvisionContext, StepError> {
    let runtime = Runtime::new()?;
    let handler = provision_context.handler();
    let result = runtime.block_on(handler.create(named(&name)));
    provision_context.outcome = Some(Outcome::from(result));
    Ok(provision_context)
}

#[when("I destroy the container \"{name}\"")]
fn destroy_container(
    mut provision_context: ProvisionContext,
    name: String,
) -> Result<ProvisionContext, StepError> {
    let runtime = Runtime::new()?;
    let handler = provision_context.handler();
    let result = runtime.block_on(handler.destroy(named(&name)));
    provision_context.outcome = Some(Outcome::from(result));
    Ok(provision_context)
}

#[then("the request succeeds for \"{name}\"")]
fn request_succeeds(provision_context: &ProvisionContext, name: String) -> Result<(), StepError> {
    let outcome = provision_context.outcome();
    if outcome.status && outcome.name.as_deref() == Some(name.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected success for {name}, got {outcome:?}"
        )))
    }
}

#[then("the request fails mentioning \"{text}\"")]
fn request_fails(provision_context: &ProvisionContext, text: String) -> Result<(), StepError> {
    let outcome = provision_context.outcome();
    if !outcome.status && outcome.message.contains(text.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure mentioning {text}, got {outcome:?}"
        )))
    }
}

#[then("the template \"{template}\" was built")]
fn template_built(provision_context: &ProvisionContext, template: String) {
    assert_eq!(
        provision_context.host.built_templates(),
        vec![template.trim().to_owned()]
    );
}

#[then("no container named \"{name}\" remains")]
fn container_removed(provision_context: &ProvisionContext, name: String) {
    let names = provision_context.host.names();
    assert!(
        !names.iter().any(|candidate| candidate == name.trim()),
        "{name} still present in {names:?}"
    );
}
