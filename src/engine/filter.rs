//! Observed-state filtering
//!
//! Pod sandboxes create and destroy veth interfaces constantly. Reporting
//! them on the NodeNetworkState would churn the object on every pod event,
//! so interfaces matching the filter glob are dropped before the status
//! write.

use serde_json::Value;

use crate::crd::types::State;
use crate::Result;

/// The interface-name glob filtered out of reported states
pub const DEFAULT_INTERFACES_FILTER: &str = "veth*";

fn glob_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Remove interfaces whose name matches the glob. An empty glob returns the
/// state unchanged.
pub fn filter_out(state: &State, interfaces_filter: &str) -> Result<State> {
    if interfaces_filter.is_empty() {
        return Ok(state.clone());
    }

    let mut document = state.0.clone();
    if let Some(interfaces) = document.get_mut("interfaces").and_then(Value::as_array_mut) {
        interfaces.retain(|interface| {
            interface
                .get("name")
                .and_then(Value::as_str)
                .map(|name| !glob_matches(interfaces_filter, name))
                .unwrap_or(true)
        });
    }

    Ok(State(document))
}
