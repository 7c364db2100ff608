//! EK-PAR - Parameter Map Upload
//!
//! Publishes the static shape of a component tree for the operator side:
//!
//! ```json
//! [{"version": [0, 1, 0]}, {"type": "...", "name": "...", "parameters": [...], "components": [...]}]
//! ```
//!
//! Parameter entries carry name, type label, length, limits and enum fields.
//! Values are never part of the map.

use crate::component::ComponentTree;
use crate::mailbox::Writer;
use crate::types::*;
use serde_json::{json, Value};

/// Build the versioned map of the subtree rooted at `root`
pub fn create_parameter_map(tree: &ComponentTree, root: ComponentId, version: Version) -> Result<Value> {
    let body = tree.serialize(root).ok_or(Error::NotFound)?;
    Ok(json!([
        {"version": [version.major, version.minor, version.patch]},
        body
    ]))
}

/// Uploads the parameter map over its mailbox
pub struct ParameterMap<'a> {
    writer: Writer<'a>,
    version: Version,
}

impl<'a> ParameterMap<'a> {
    /// Create an uploader writing through `writer`
    pub fn new(writer: Writer<'a>, version: Version) -> Self {
        Self { writer, version }
    }

    /// Serialize the subtree at `root` and publish it
    ///
    /// Returns the number of bytes written. A map larger than the mailbox is
    /// reported as `PayloadTooLarge` and nothing is published.
    pub fn upload_parameter_map(&mut self, tree: &ComponentTree, root: ComponentId) -> Result<usize> {
        let map = create_parameter_map(tree, root, self.version)?;
        let text = serde_json::to_vec(&map).map_err(|_| Error::Serialization)?;
        self.writer.write_bytes(&text).map_err(|e| {
            tracing::warn!(error = %e, "parameter map not uploaded");
            e
        })?;
        tracing::info!(bytes = text.len(), "parameter map uploaded");
        Ok(text.len())
    }
}
