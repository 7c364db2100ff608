//! EK-PAR - JSON Command Protocol
//!
//! Inbound messages carry one command object or an array of them:
//!
//! ```json
//! {"name": "Converter.main.PID.current.kp", "value": 0.5, "version": [0, 1]}
//! ```
//!
//! Each command goes through:
//!
//! ```text
//! Received -> schema check -> major version check -> registry lookup -> typed stage
//! ```
//!
//! Every failure is a [`CommandError`] whose display text is the exact status
//! line reported back to the operator.

use crate::component::ComponentTree;
use crate::parameter::ValueError;
use crate::types::*;
use serde_json::Value;

/// Status line for a staged command
pub const UPDATE_SUCCESS: &str = "Parameter value updated successfully.\n";

/// Required command properties, in reporting order
const REQUIRED: [&str; 3] = ["name", "value", "version"];

/// Command rejection, displayed as its status line
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// Schema violation
    #[error("Command invalid: At {path} of {instance} - {reason}\n")]
    Invalid {
        /// JSON pointer to the offending instance (empty for the command itself)
        path: String,
        /// Compact JSON of the offending instance
        instance: String,
        /// What is wrong with it
        reason: String,
    },
    /// Major version differs from the interface version
    #[error("Inconsistent major version of the communication interface! Provided version: {provided}, expected version: {expected}.\n")]
    VersionMismatch {
        /// Major version from the command
        provided: i128,
        /// Major version of this build
        expected: u32,
    },
    /// No parameter under that full name
    #[error("Parameter ID: {0} not found. Command ignored.\n")]
    NotFound(String),
    /// Parameter refused the value
    #[error(transparent)]
    Value(#[from] ValueError),
    /// Message is not JSON
    #[error("Error parsing JSON: {0}\n")]
    Parse(String),
    /// Message does not fit the receive buffer
    #[error("Command message of {needed} bytes exceeds the receive buffer of {available} bytes. Command ignored.\n")]
    TooLarge {
        /// Bytes of the pending message
        needed: usize,
        /// Bytes of the receive buffer
        available: usize,
    },
}

impl CommandError {
    fn invalid(path: &str, instance: &Value, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_string(),
            instance: instance.to_string(),
            reason: reason.into(),
        }
    }
}

/// Schema-valid command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Full name of the target parameter
    pub name: String,
    /// New value (array, bool, number or string)
    pub value: Value,
    /// Interface version `[major, minor]` the sender speaks
    pub version: [i128; 2],
}

/// Commands carried by one message
///
/// Objects are a single command; arrays are a batch processed in order.
/// Anything else is yielded as-is and fails the schema check.
pub fn commands(message: &Value) -> impl Iterator<Item = &Value> {
    let batch: &[Value] = match message {
        Value::Array(items) => items,
        other => core::slice::from_ref(other),
    };
    batch.iter()
}

/// Check a command against the schema and the interface major version
pub fn validate_json_command(
    command: &Value,
    expected: Version,
) -> core::result::Result<Command, CommandError> {
    let object = command
        .as_object()
        .ok_or_else(|| CommandError::invalid("", command, "unexpected instance type"))?;

    for field in REQUIRED {
        if !object.contains_key(field) {
            return Err(CommandError::invalid(
                "",
                command,
                format!("required property '{}' not found in object", field),
            ));
        }
    }

    let name = &object["name"];
    let name = name
        .as_str()
        .ok_or_else(|| CommandError::invalid("/name", name, "unexpected instance type"))?;
    if name.is_empty() {
        return Err(CommandError::invalid(
            "/name",
            &object["name"],
            "instance is too short as per minLength:1",
        ));
    }

    let value = &object["value"];
    if !(value.is_array() || value.is_boolean() || value.is_number() || value.is_string()) {
        return Err(CommandError::invalid("/value", value, "unexpected instance type"));
    }

    let version = parse_version(&object["version"])?;
    if version[0] != i128::from(expected.major) {
        return Err(CommandError::VersionMismatch {
            provided: version[0],
            expected: expected.major,
        });
    }

    Ok(Command {
        name: name.to_string(),
        value: value.clone(),
        version,
    })
}

fn parse_version(version: &Value) -> core::result::Result<[i128; 2], CommandError> {
    let items = version
        .as_array()
        .ok_or_else(|| CommandError::invalid("/version", version, "unexpected instance type"))?;
    if items.len() < 2 {
        return Err(CommandError::invalid("/version", version, "array has too few items"));
    }
    if items.len() > 2 {
        return Err(CommandError::invalid("/version", version, "array has too many items"));
    }

    let mut parsed = [0i128; 2];
    for (index, item) in items.iter().enumerate() {
        parsed[index] = item
            .as_i64()
            .map(i128::from)
            .or_else(|| item.as_u64().map(i128::from))
            .ok_or_else(|| {
                CommandError::invalid(&format!("/version/{}", index), item, "unexpected instance type")
            })?;
    }
    Ok(parsed)
}

/// Validate one command and stage its value
///
/// On success the target's component chain is dirty; nothing is flipped.
pub fn execute_json_command(
    tree: &mut ComponentTree,
    command: &Value,
    expected: Version,
) -> core::result::Result<ComponentId, CommandError> {
    let command = validate_json_command(command, expected)?;
    let address = tree
        .registry()
        .lookup(&command.name)
        .ok_or_else(|| CommandError::NotFound(command.name.clone()))?;
    tree.stage_json(address, &command.value)?;
    Ok(address.component)
}
