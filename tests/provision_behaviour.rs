//! Behavioural scenarios for container provisioning through the request
//! handler.

mod provision;
