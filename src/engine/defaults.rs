//! Desired-state defaulting
//!
//! Linux-bridge ports that carry no explicit `vlan` section get trunked VLAN
//! filtering for the full usable range, so bridged traffic keeps flowing for
//! any tag the user forgot to enumerate.

use serde_json::{json, Value};

use crate::crd::types::State;
use crate::Result;

fn default_vlan_filtering() -> Value {
    json!({
        "mode": "trunk",
        "trunk-tags": [
            { "id-range": { "min": 2, "max": 4094 } }
        ]
    })
}

/// Add default VLAN filtering to every linux-bridge port without a `vlan`
/// section. Non-bridge interfaces and explicitly configured ports are left
/// untouched.
pub fn apply_default_vlan_filtering(desired_state: &State) -> Result<State> {
    let mut document = desired_state.0.clone();

    if let Some(interfaces) = document.get_mut("interfaces").and_then(Value::as_array_mut) {
        for interface in interfaces {
            if interface.get("type").and_then(Value::as_str) != Some("linux-bridge") {
                continue;
            }
            let Some(ports) = interface
                .get_mut("bridge")
                .and_then(|b| b.get_mut("port"))
                .and_then(Value::as_array_mut)
            else {
                continue;
            };
            for port in ports {
                if let Some(port) = port.as_object_mut() {
                    port.entry("vlan").or_insert_with(default_vlan_filtering);
                }
            }
        }
    }

    Ok(State(document))
}
