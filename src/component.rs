//! EK-PAR - Component Tree
//!
//! Components form a static tree built at wiring time. Each owns an ordered
//! list of parameters and a verification hook; the tree owns the components
//! (arena, parent links by id) and the [`ParameterRegistry`].
//!
//! ## Naming
//!
//! ```text
//! root component      "<type>.<name>"
//! child component     "<parent full name>.<type>.<name>"
//! parameter           "<component full name>.<parameter name>"
//! ```
//!
//! ## Dirty Tracking
//!
//! Staging a parameter marks its component and every ancestor dirty. The
//! commit pass ([`ComponentTree::validate_components`]) walks only dirty
//! subtrees, verifies each component that owns staged parameters and flips
//! them if accepted. A rejected component keeps its staged values and stays
//! dirty until a later command fixes them.

use crate::parameter::{AnyParameter, ParamReader, ParamType, Parameter, ValueError};
use crate::registry::{ParameterAddress, ParameterRegistry};
use crate::types::*;
use serde_json::{json, Value};

// ============================================================================
// Verification Hook
// ============================================================================

/// Per-component validation of staged parameters
///
/// Runs on the background core during the commit pass. Must only look at the
/// component's own parameters.
pub trait Verify: Send {
    /// Check the staged configuration; `Some` rejects the whole commit
    fn verify_parameters(&self, _parameters: &ParameterSet<'_>) -> Option<Warning> {
        None
    }
}

/// Hook that accepts every configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Verify for AcceptAll {}

/// Named parameter owned by a component
pub struct ParameterEntry {
    name: String,
    parameter: Box<dyn AnyParameter>,
}

impl ParameterEntry {
    /// Parameter name within its component
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type-erased parameter
    pub fn parameter(&self) -> &dyn AnyParameter {
        self.parameter.as_ref()
    }
}

/// A component's parameters as seen by its [`Verify`] hook
#[derive(Clone, Copy)]
pub struct ParameterSet<'a> {
    entries: &'a [ParameterEntry],
}

impl<'a> ParameterSet<'a> {
    fn find<T: ParamType>(&self, name: &str) -> Option<&'a Parameter<T>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| entry.parameter.as_any().downcast_ref::<Parameter<T>>())
    }

    /// Value that would become active if the commit is accepted
    ///
    /// `None` if the name is unknown or `T` is not the parameter's type.
    pub fn staged<T: ParamType>(&self, name: &str) -> Option<T> {
        self.find::<T>(name).map(Parameter::staged)
    }

    /// Currently active value
    pub fn active<T: ParamType>(&self, name: &str) -> Option<T> {
        self.find::<T>(name).map(Parameter::read)
    }

    /// Parameter was modified since the last commit
    pub fn is_dirty(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.name == name && entry.parameter.is_dirty())
    }

    /// Every parameter has received a value
    pub fn initialized(&self) -> bool {
        self.entries.iter().all(|entry| entry.parameter.is_initialized())
    }

    /// Parameter names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &'a str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }
}

// ============================================================================
// Component
// ============================================================================

/// Node of the component tree
pub struct Component {
    component_type: String,
    name: String,
    full_name: String,
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    parameters: Vec<ParameterEntry>,
    dirty: bool,
    verifier: Box<dyn Verify>,
}

impl Component {
    /// Component type, e.g. `"PID"`
    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dot-separated path from the root
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Parent component, `None` for roots
    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    /// Own parameters in declaration order
    pub fn parameters(&self) -> &[ParameterEntry] {
        &self.parameters
    }

    /// Owns a dirty parameter or has a dirty descendant
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Every own parameter has received a value
    pub fn parameters_initialized(&self) -> bool {
        self.parameter_set().initialized()
    }

    fn parameter_set(&self) -> ParameterSet<'_> {
        ParameterSet {
            entries: &self.parameters,
        }
    }

    fn owns_dirty_parameter(&self) -> bool {
        self.parameters.iter().any(|entry| entry.parameter.is_dirty())
    }
}

impl core::fmt::Debug for Component {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Component")
            .field("full_name", &self.full_name)
            .field("parameters", &self.parameters.len())
            .field("children", &self.children)
            .field("dirty", &self.dirty)
            .finish()
    }
}

// ============================================================================
// Commit Report
// ============================================================================

/// Component whose verification hook refused its staged parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Rejecting component
    pub component: ComponentId,
    /// Its full name
    pub full_name: String,
    /// Text returned by the hook
    pub warning: Warning,
}

/// Outcome of one commit pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Components whose staged parameters were flipped
    pub committed: Vec<ComponentId>,
    /// Components that refused
    pub rejected: Vec<Rejection>,
}

impl CommitReport {
    /// Nothing was verified
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.rejected.is_empty()
    }

    /// Append the outcome of a later pass
    pub fn extend(&mut self, later: CommitReport) {
        self.committed.extend(later.committed);
        self.rejected.extend(later.rejected);
    }
}

// ============================================================================
// Component Tree
// ============================================================================

/// Static component hierarchy plus parameter registry
#[derive(Default)]
pub struct ComponentTree {
    components: Vec<Component>,
    registry: ParameterRegistry,
}

impl ComponentTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component that accepts every configuration
    pub fn add_component(
        &mut self,
        parent: Option<ComponentId>,
        component_type: &str,
        name: &str,
    ) -> Result<ComponentId> {
        self.add_component_with(parent, component_type, name, AcceptAll)
    }

    /// Add a component with its own verification hook
    ///
    /// Fails with `NotFound` for an unknown parent, `InvalidArg` for empty or
    /// dotted identifiers and `AlreadyExists` if the full name is taken.
    pub fn add_component_with<V: Verify + 'static>(
        &mut self,
        parent: Option<ComponentId>,
        component_type: &str,
        name: &str,
        verifier: V,
    ) -> Result<ComponentId> {
        if !valid_identifier(component_type) || !valid_identifier(name) {
            return Err(Error::InvalidArg);
        }

        let full_name = match parent {
            Some(parent) => {
                let parent = self.components.get(parent.0).ok_or(Error::NotFound)?;
                format!("{}.{}.{}", parent.full_name, component_type, name)
            }
            None => format!("{}.{}", component_type, name),
        };
        if self.components.iter().any(|c| c.full_name == full_name) {
            tracing::warn!(name = %full_name, "duplicate component");
            return Err(Error::AlreadyExists);
        }

        let id = ComponentId(self.components.len());
        if let Some(parent) = parent {
            self.components[parent.0].children.push(id);
        }
        tracing::debug!(name = %full_name, "component added");
        self.components.push(Component {
            component_type: component_type.to_string(),
            name: name.to_string(),
            full_name,
            parent,
            children: Vec::new(),
            parameters: Vec::new(),
            dirty: false,
            verifier: Box::new(verifier),
        });
        Ok(id)
    }

    /// Attach a parameter to a component and register its full name
    ///
    /// Returns the real-time read handle.
    pub fn add_parameter<T: ParamType>(
        &mut self,
        component: ComponentId,
        name: &str,
        parameter: Parameter<T>,
    ) -> Result<ParamReader<T>> {
        if !valid_identifier(name) {
            return Err(Error::InvalidArg);
        }
        let owner = self.components.get_mut(component.0).ok_or(Error::NotFound)?;
        let address = ParameterAddress {
            component,
            index: owner.parameters.len(),
        };
        self.registry
            .register(format!("{}.{}", owner.full_name, name), address)?;

        let reader = parameter.reader();
        owner.parameters.push(ParameterEntry {
            name: name.to_string(),
            parameter: Box::new(parameter),
        });
        Ok(reader)
    }

    /// Component by id
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0)
    }

    /// Components without a parent, in insertion order
    pub fn roots(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.parent.is_none())
            .map(|(index, _)| ComponentId(index))
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// No components
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Full-name index of all parameters
    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Parameter by full name
    pub fn lookup(&self, full_name: &str) -> Option<&dyn AnyParameter> {
        let address = self.registry.lookup(full_name)?;
        Some(self.entry(address).parameter.as_ref())
    }

    /// Typed parameter by full name
    pub fn parameter<T: ParamType>(&self, full_name: &str) -> Option<&Parameter<T>> {
        self.lookup(full_name)?.as_any().downcast_ref::<Parameter<T>>()
    }

    fn entry(&self, address: ParameterAddress) -> &ParameterEntry {
        &self.components[address.component.0].parameters[address.index]
    }

    /// Stage a command value on a registered parameter
    ///
    /// On success the owning component and its ancestors are marked dirty.
    /// On failure nothing changes.
    pub fn stage_json(
        &mut self,
        address: ParameterAddress,
        value: &Value,
    ) -> core::result::Result<(), ValueError> {
        self.components[address.component.0].parameters[address.index]
            .parameter
            .stage_json(value)?;
        self.mark_dirty(address.component);
        Ok(())
    }

    /// Mark a component and its ancestors dirty
    ///
    /// Stops at the first ancestor already marked.
    pub fn mark_dirty(&mut self, id: ComponentId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(component) = self.components.get_mut(id.0) else {
                break;
            };
            if component.dirty {
                break;
            }
            component.dirty = true;
            current = component.parent;
        }
    }

    /// Component is dirty (unknown ids are clean)
    pub fn is_dirty(&self, id: ComponentId) -> bool {
        self.components.get(id.0).is_some_and(|c| c.dirty)
    }

    /// Commit pass over every dirty subtree
    ///
    /// Post-order: children are verified before their parent. Components
    /// that only carry the dirty mark for a descendant are not verified.
    pub fn validate_components(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        let roots: Vec<ComponentId> = self.roots().collect();
        for root in roots {
            self.commit_subtree(root, &mut report);
        }
        report
    }

    /// Returns whether the subtree is still dirty afterwards
    fn commit_subtree(&mut self, id: ComponentId, report: &mut CommitReport) -> bool {
        if !self.components[id.0].dirty {
            return false;
        }

        let mut descendant_dirty = false;
        for position in 0..self.components[id.0].children.len() {
            let child = self.components[id.0].children[position];
            descendant_dirty |= self.commit_subtree(child, report);
        }

        let component = &mut self.components[id.0];
        let mut own_dirty = false;
        if component.owns_dirty_parameter() {
            match component.verifier.verify_parameters(&component.parameter_set()) {
                None => {
                    for entry in component.parameters.iter_mut() {
                        if entry.parameter.is_dirty() {
                            entry.parameter.flip();
                        }
                    }
                    tracing::debug!(name = %component.full_name, "parameters committed");
                    report.committed.push(id);
                }
                Some(warning) => {
                    tracing::info!(name = %component.full_name, %warning, "commit rejected");
                    own_dirty = true;
                    report.rejected.push(Rejection {
                        component: id,
                        full_name: component.full_name.clone(),
                        warning,
                    });
                }
            }
        }

        component.dirty = own_dirty || descendant_dirty;
        component.dirty
    }

    /// Snapshot of a component subtree: identity and parameter metadata,
    /// never values
    pub fn serialize(&self, id: ComponentId) -> Option<Value> {
        let component = self.components.get(id.0)?;
        let parameters: Vec<Value> = component
            .parameters
            .iter()
            .map(|entry| entry.parameter.describe(&entry.name))
            .collect();
        let children: Vec<Value> = component
            .children
            .iter()
            .filter_map(|child| self.serialize(*child))
            .collect();

        Some(json!({
            "type": component.component_type,
            "name": component.name,
            "parameters": parameters,
            "components": children,
        }))
    }

    /// Drop every component and registration
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&mut self) {
        self.components.clear();
        self.registry.reset();
    }
}

impl core::fmt::Debug for ComponentTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ComponentTree")
            .field("components", &self.components)
            .field("parameters", &self.registry.len())
            .finish()
    }
}

fn valid_identifier(text: &str) -> bool {
    !text.is_empty() && !text.contains('.')
}
