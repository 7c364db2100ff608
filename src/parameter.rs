//! EK-PAR - Typed Parameters
//!
//! A parameter holds two values:
//!
//! - **staged**: written by the background core when a command is applied
//! - **active**: what the real-time core reads
//!
//! The background core publishes staged into active with [`Parameter::flip`]
//! once the owning component accepts the new configuration. The real-time
//! core holds [`ParamReader`] handles and never sees a staged value.
//!
//! ## Active Slot
//!
//! The active value is double buffered. A flip writes the slot readers are
//! *not* using and then advances a generation counter; a reader only retries
//! when a flip completes while it is copying. The real-time core never waits
//! for the background core to finish a flip.

use crate::types::*;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{fence, AtomicU32, Ordering};

#[cfg(feature = "std")]
use serde_json::{json, Value};

// ============================================================================
// Type Tags
// ============================================================================

/// Value category of a parameter, used for type checking commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamKind {
    /// `true` / `false`
    Bool,
    /// Unsigned integer of any width
    Unsigned,
    /// Signed integer of any width
    Signed,
    /// IEEE-754 float
    Float,
    /// Q16.16 fixed point
    Fixed,
    /// One of a fixed set of named variants
    Enum,
}

#[cfg(feature = "std")]
impl ParamKind {
    /// Whether a scalar JSON value has the right shape for this kind
    ///
    /// Width and limits are not checked.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Unsigned => value.is_u64(),
            ParamKind::Signed => value.is_i64() || value.is_u64(),
            ParamKind::Float | ParamKind::Fixed => value.is_number(),
            ParamKind::Enum => value.is_string(),
        }
    }

    /// Shape check with the status line of the matching rejection
    pub fn check(self, value: &Value) -> core::result::Result<(), ValueError> {
        if self.accepts(value) {
            return Ok(());
        }
        let text = value.to_string();
        Err(match self {
            ParamKind::Bool => ValueError::NotBoolean(text),
            ParamKind::Unsigned => ValueError::NotUnsigned(text),
            ParamKind::Signed => ValueError::NotInteger(text),
            ParamKind::Float | ParamKind::Fixed => ValueError::NotNumber(text),
            ParamKind::Enum => ValueError::NotAVariant,
        })
    }
}

/// Types storable in a [`Parameter`]
///
/// Implemented for the integer and float primitives, `bool`, [`Fixed`],
/// fixed-length arrays of those, and enumerations declared with
/// [`param_enum!`](crate::param_enum).
///
/// The default method bodies describe an enumeration; scalar impls override
/// them.
pub trait ParamType: Copy + PartialEq + Send + Sync + 'static {
    /// Value category
    const KIND: ParamKind;
    /// Type label of a single element, e.g. `"UInt32"`
    const LABEL: &'static str;
    /// Number of elements
    const LENGTH: usize = 1;
    /// Whether the type is a fixed-length array
    const IS_ARRAY: bool = false;

    /// Allowed variant names (enumerations only)
    fn fields() -> &'static [&'static str] {
        &[]
    }

    /// Variant at `index` of [`ParamType::fields`]
    fn from_variant(_index: usize) -> Option<Self> {
        None
    }

    /// Index of this value in [`ParamType::fields`]
    fn variant(&self) -> usize {
        0
    }

    /// Numeric value used for limit checks
    fn as_f64(&self) -> Option<f64> {
        None
    }

    /// First element lying outside `[min, max]`, if any
    fn outside(&self, min: f64, max: f64) -> Option<f64> {
        self.as_f64().filter(|v| *v < min || *v > max)
    }

    /// Full type label, e.g. `"ArrayFloat64"`
    #[cfg(feature = "std")]
    fn type_label() -> String {
        if Self::IS_ARRAY {
            format!("Array{}", Self::LABEL)
        } else {
            Self::LABEL.to_string()
        }
    }

    /// Convert a command value, checking its shape against this type
    #[cfg(feature = "std")]
    fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
        value
            .as_str()
            .and_then(|name| Self::fields().iter().position(|f| *f == name))
            .and_then(Self::from_variant)
            .ok_or(ValueError::NotAVariant)
    }

    /// Convert to a JSON value
    #[cfg(feature = "std")]
    fn to_json(&self) -> Value {
        Self::fields()
            .get(self.variant())
            .map_or(Value::Null, |name| Value::from(*name))
    }
}

/// Scalar types allowed as array elements
pub trait ParamScalar: ParamType {
    /// Plural element description used in array type messages
    const ELEMENTS: &'static str;
}

// ============================================================================
// Value Errors
// ============================================================================

/// Rejection of a command value by a parameter
///
/// The display text is reported verbatim on the status mailbox.
#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// Boolean parameter, other JSON type
    #[error("The provided command value: {0} is not a boolean, while Parameter type is a boolean.\n")]
    NotBoolean(String),
    /// Unsigned parameter, negative or non-integer value
    #[error("The provided command value: {0} is not an unsigned integer, while Parameter type is an unsigned integer.\n")]
    NotUnsigned(String),
    /// Signed parameter, non-integer value
    #[error("The provided command value: {0} is not an integer, while Parameter type is an integer.\n")]
    NotInteger(String),
    /// Float or fixed-point parameter, non-numeric value
    #[error("The provided command value: {0} is not a number, while Parameter type is a floating-point number.\n")]
    NotNumber(String),
    /// Enumeration parameter, unknown variant
    #[error("The provided enum value is not one of the allowed values.\nCommand ignored.\n")]
    NotAVariant,
    /// Array parameter, non-array value
    #[error("The provided command value: {value} is not an array, while Parameter type is an array of {elements}.\n")]
    NotArray {
        /// Compact JSON of the value
        value: String,
        /// Plural element description
        elements: &'static str,
    },
    /// Array parameter, element of the wrong type
    #[error("The provided command value: {value} is not an array of {elements} with an issue at index {index}, while Parameter type is an array of {elements}.\n")]
    BadElement {
        /// Compact JSON of the value
        value: String,
        /// Plural element description
        elements: &'static str,
        /// First offending element
        index: usize,
    },
    /// Array parameter, wrong number of elements
    #[error("The provided command value: {value} has length {len}, while Parameter type is an array of length {expected}.\n")]
    WrongLength {
        /// Compact JSON of the value
        value: String,
        /// Provided length
        len: usize,
        /// Parameter length
        expected: usize,
    },
    /// Right kind of number, does not fit the parameter width
    #[error("The provided command value: {value} is out of range of Parameter type {label}.\n")]
    OutOfRange {
        /// Compact JSON of the value
        value: String,
        /// Element type label
        label: &'static str,
    },
    /// Value outside the parameter's declared limits
    #[error("Provided value: {value} is outside the limits: {min}, {max}!\n")]
    OutsideLimits {
        /// Offending value
        value: f64,
        /// Lower limit
        min: f64,
        /// Upper limit
        max: f64,
    },
}

// ============================================================================
// Primitive Implementations
// ============================================================================

macro_rules! impl_unsigned {
    ($($ty:ty => $label:literal),* $(,)?) => {$(
        impl ParamType for $ty {
            const KIND: ParamKind = ParamKind::Unsigned;
            const LABEL: &'static str = $label;

            fn as_f64(&self) -> Option<f64> {
                Some(*self as f64)
            }

            #[cfg(feature = "std")]
            fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
                let raw = value
                    .as_u64()
                    .ok_or_else(|| ValueError::NotUnsigned(value.to_string()))?;
                <$ty>::try_from(raw).map_err(|_| ValueError::OutOfRange {
                    value: value.to_string(),
                    label: $label,
                })
            }

            #[cfg(feature = "std")]
            fn to_json(&self) -> Value {
                Value::from(*self)
            }
        }

        impl ParamScalar for $ty {
            const ELEMENTS: &'static str = "unsigned integers";
        }
    )*};
}

macro_rules! impl_signed {
    ($($ty:ty => $label:literal),* $(,)?) => {$(
        impl ParamType for $ty {
            const KIND: ParamKind = ParamKind::Signed;
            const LABEL: &'static str = $label;

            fn as_f64(&self) -> Option<f64> {
                Some(*self as f64)
            }

            #[cfg(feature = "std")]
            fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
                let raw = value
                    .as_i64()
                    .map(i128::from)
                    .or_else(|| value.as_u64().map(i128::from))
                    .ok_or_else(|| ValueError::NotInteger(value.to_string()))?;
                <$ty>::try_from(raw).map_err(|_| ValueError::OutOfRange {
                    value: value.to_string(),
                    label: $label,
                })
            }

            #[cfg(feature = "std")]
            fn to_json(&self) -> Value {
                Value::from(*self)
            }
        }

        impl ParamScalar for $ty {
            const ELEMENTS: &'static str = "integers";
        }
    )*};
}

impl_unsigned!(u8 => "UInt8", u16 => "UInt16", u32 => "UInt32", u64 => "UInt64");
impl_signed!(i8 => "Int8", i16 => "Int16", i32 => "Int32", i64 => "Int64");

impl ParamType for f64 {
    const KIND: ParamKind = ParamKind::Float;
    const LABEL: &'static str = "Float64";

    fn as_f64(&self) -> Option<f64> {
        Some(*self)
    }

    #[cfg(feature = "std")]
    fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
        value
            .as_f64()
            .ok_or_else(|| ValueError::NotNumber(value.to_string()))
    }

    #[cfg(feature = "std")]
    fn to_json(&self) -> Value {
        Value::from(*self)
    }
}

impl ParamScalar for f64 {
    const ELEMENTS: &'static str = "floating-point numbers";
}

impl ParamType for f32 {
    const KIND: ParamKind = ParamKind::Float;
    const LABEL: &'static str = "Float32";

    fn as_f64(&self) -> Option<f64> {
        Some(f64::from(*self))
    }

    #[cfg(feature = "std")]
    fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
        let raw = value
            .as_f64()
            .ok_or_else(|| ValueError::NotNumber(value.to_string()))?;
        let narrowed = raw as f32;
        if raw.is_finite() && !narrowed.is_finite() {
            return Err(ValueError::OutOfRange {
                value: value.to_string(),
                label: Self::LABEL,
            });
        }
        Ok(narrowed)
    }

    #[cfg(feature = "std")]
    fn to_json(&self) -> Value {
        Value::from(f64::from(*self))
    }
}

impl ParamScalar for f32 {
    const ELEMENTS: &'static str = "floating-point numbers";
}

impl ParamType for Fixed {
    const KIND: ParamKind = ParamKind::Fixed;
    const LABEL: &'static str = "FixedI16F16";

    fn as_f64(&self) -> Option<f64> {
        Some(self.to_num::<f64>())
    }

    #[cfg(feature = "std")]
    fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
        let raw = value
            .as_f64()
            .ok_or_else(|| ValueError::NotNumber(value.to_string()))?;
        Fixed::checked_from_num(raw).ok_or_else(|| ValueError::OutOfRange {
            value: value.to_string(),
            label: Self::LABEL,
        })
    }

    #[cfg(feature = "std")]
    fn to_json(&self) -> Value {
        Value::from(self.to_num::<f64>())
    }
}

impl ParamScalar for Fixed {
    const ELEMENTS: &'static str = "floating-point numbers";
}

impl ParamType for bool {
    const KIND: ParamKind = ParamKind::Bool;
    const LABEL: &'static str = "Bool";

    fn outside(&self, _min: f64, _max: f64) -> Option<f64> {
        None
    }

    #[cfg(feature = "std")]
    fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
        value
            .as_bool()
            .ok_or_else(|| ValueError::NotBoolean(value.to_string()))
    }

    #[cfg(feature = "std")]
    fn to_json(&self) -> Value {
        Value::from(*self)
    }
}

impl ParamScalar for bool {
    const ELEMENTS: &'static str = "bool";
}

impl<T: ParamScalar, const N: usize> ParamType for [T; N] {
    const KIND: ParamKind = T::KIND;
    const LABEL: &'static str = T::LABEL;
    const LENGTH: usize = N;
    const IS_ARRAY: bool = true;

    fn outside(&self, min: f64, max: f64) -> Option<f64> {
        self.iter().find_map(|element| element.outside(min, max))
    }

    #[cfg(feature = "std")]
    fn from_json(value: &Value) -> core::result::Result<Self, ValueError> {
        let items = value.as_array().ok_or_else(|| ValueError::NotArray {
            value: value.to_string(),
            elements: T::ELEMENTS,
        })?;

        let mut elements = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let element = T::from_json(item).map_err(|_| ValueError::BadElement {
                value: value.to_string(),
                elements: T::ELEMENTS,
                index,
            })?;
            elements.push(element);
        }

        <[T; N]>::try_from(elements).map_err(|rejected| ValueError::WrongLength {
            value: value.to_string(),
            len: rejected.len(),
            expected: N,
        })
    }

    #[cfg(feature = "std")]
    fn to_json(&self) -> Value {
        Value::Array(self.iter().map(ParamType::to_json).collect())
    }
}

/// Declare an enumeration usable as a [`Parameter`] value
///
/// Variants are addressed in commands and snapshots by their identifier.
///
/// ```
/// ekpar::param_enum! {
///     /// Converter operating mode
///     pub enum Mode { Off, Standby, Run }
/// }
///
/// let mode = ekpar::parameter::Parameter::new(Mode::Off);
/// assert_eq!(mode.read(), Mode::Off);
/// ```
#[macro_export]
macro_rules! param_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::parameter::ParamType for $name {
            const KIND: $crate::parameter::ParamKind = $crate::parameter::ParamKind::Enum;
            const LABEL: &'static str = "Enum";

            fn fields() -> &'static [&'static str] {
                &[$(stringify!($variant)),+]
            }

            fn from_variant(index: usize) -> Option<Self> {
                const VARIANTS: &[$name] = &[$($name::$variant),+];
                VARIANTS.get(index).copied()
            }

            fn variant(&self) -> usize {
                *self as usize
            }
        }
    };
}

// ============================================================================
// Active Slot
// ============================================================================

/// Double-buffered value with a single publisher
struct ActiveCell<T> {
    slots: [UnsafeCell<T>; 2],
    /// Flip count; the live slot is `generation & 1`
    generation: AtomicU32,
}

// SAFETY: readers only copy out of the live slot and discard copies that
// raced with a flip; the single publisher only writes the idle slot.
unsafe impl<T: Copy + Send> Sync for ActiveCell<T> {}

impl<T: Copy> ActiveCell<T> {
    fn new(value: T) -> Self {
        Self {
            slots: [UnsafeCell::new(value), UnsafeCell::new(value)],
            generation: AtomicU32::new(0),
        }
    }

    fn load(&self) -> T {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            // SAFETY: the live slot is only rewritten two flips later, which
            // the generation re-check below detects.
            let value = unsafe { ptr::read_volatile(self.slots[(before & 1) as usize].get()) };
            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == before {
                return value;
            }
            core::hint::spin_loop();
        }
    }

    /// # Safety
    /// Only one thread may publish into a given cell.
    unsafe fn publish(&self, value: T) {
        let generation = self.generation.load(Ordering::Relaxed);
        // Readers that saw the previous flip must observe it before the idle
        // slot is overwritten.
        fence(Ordering::Release);
        let idle = (generation.wrapping_add(1) & 1) as usize;
        ptr::write_volatile(self.slots[idle].get(), value);
        self.generation
            .store(generation.wrapping_add(1), Ordering::Release);
    }
}

// ============================================================================
// Parameter
// ============================================================================

/// Inclusive numeric limits of a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Limits {
    /// Smallest accepted value
    pub min: f64,
    /// Largest accepted value
    pub max: f64,
}

/// Staged/active parameter owned by a component
///
/// Not `Clone`: the owner is the only party that can stage and flip.
pub struct Parameter<T: ParamType> {
    active: Arc<ActiveCell<T>>,
    staged: T,
    dirty: bool,
    initialized: bool,
    limits: Option<Limits>,
}

impl<T: ParamType> Parameter<T> {
    /// Create a parameter whose active and staged values are `default`
    pub fn new(default: T) -> Self {
        Self {
            active: Arc::new(ActiveCell::new(default)),
            staged: default,
            dirty: false,
            initialized: true,
            limits: None,
        }
    }

    /// Create a parameter that has not been given a value yet
    ///
    /// `placeholder` is what the real-time core reads until the first commit.
    pub fn uninitialized(placeholder: T) -> Self {
        Self {
            initialized: false,
            ..Self::new(placeholder)
        }
    }

    /// Restrict staged values to `[min, max]`
    ///
    /// Fails with `InvalidArg` if `min > max`, `OutsideLimits` if the
    /// current value lies outside the range.
    pub fn with_limits(mut self, min: f64, max: f64) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidArg);
        }
        if self.initialized && self.staged.outside(min, max).is_some() {
            return Err(Error::OutsideLimits);
        }
        self.limits = Some(Limits { min, max });
        Ok(self)
    }

    /// Value seen by the real-time core
    pub fn read(&self) -> T {
        self.active.load()
    }

    /// Value waiting for the next commit
    pub fn staged(&self) -> T {
        self.staged
    }

    /// Declared limits
    pub fn limits(&self) -> Option<Limits> {
        self.limits
    }

    /// Staged differs from active and awaits a commit
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Has received a value, by construction or by command
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Stage a value for the next commit
    ///
    /// Rejected with `OutsideLimits` if any element violates the declared
    /// limits; nothing is staged then.
    pub fn set_staged(&mut self, value: T) -> Result<()> {
        if let Some(limits) = self.limits {
            if value.outside(limits.min, limits.max).is_some() {
                return Err(Error::OutsideLimits);
            }
        }
        self.staged = value;
        self.dirty = true;
        self.initialized = true;
        Ok(())
    }

    /// Publish the staged value to the real-time core and clear dirty
    ///
    /// Called by the commit pass once the owning component has accepted.
    pub fn flip(&mut self) {
        // SAFETY: `&mut self` on the non-Clone owner makes this the only
        // publisher of the cell.
        unsafe { self.active.publish(self.staged) };
        self.dirty = false;
    }

    /// Read-only handle for the real-time core
    pub fn reader(&self) -> ParamReader<T> {
        ParamReader {
            cell: Arc::clone(&self.active),
        }
    }
}

impl<T: ParamType + core::fmt::Debug> core::fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Parameter")
            .field("active", &self.read())
            .field("staged", &self.staged)
            .field("dirty", &self.dirty)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Real-time view of a parameter's active value
pub struct ParamReader<T> {
    cell: Arc<ActiveCell<T>>,
}

impl<T: ParamType> ParamReader<T> {
    /// Current active value
    ///
    /// Never waits on the background core; only retries when a flip
    /// completes during the copy.
    pub fn read(&self) -> T {
        self.cell.load()
    }
}

impl<T> Clone for ParamReader<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

// ============================================================================
// Type-Erased Access (std)
// ============================================================================

/// Object-safe view of a [`Parameter`] used by the component tree
#[cfg(feature = "std")]
pub trait AnyParameter: Send + core::any::Any {
    /// Value category
    fn kind(&self) -> ParamKind;
    /// Awaiting commit
    fn is_dirty(&self) -> bool;
    /// Has received a value
    fn is_initialized(&self) -> bool;
    /// Type check, limit check and stage a command value
    fn stage_json(&mut self, value: &Value) -> core::result::Result<(), ValueError>;
    /// Publish the staged value
    fn flip(&mut self);
    /// Snapshot metadata; never includes the value
    fn describe(&self, name: &str) -> Value;
    /// Active value as JSON, for operator diagnostics
    fn active_json(&self) -> Value;
    /// Downcast support
    fn as_any(&self) -> &dyn core::any::Any;
}

#[cfg(feature = "std")]
impl<T: ParamType> AnyParameter for Parameter<T> {
    fn kind(&self) -> ParamKind {
        T::KIND
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn stage_json(&mut self, value: &Value) -> core::result::Result<(), ValueError> {
        if !T::IS_ARRAY {
            T::KIND.check(value)?;
        }
        let candidate = T::from_json(value)?;
        if let Some(Limits { min, max }) = self.limits {
            if let Some(value) = candidate.outside(min, max) {
                return Err(ValueError::OutsideLimits { value, min, max });
            }
        }
        self.staged = candidate;
        self.dirty = true;
        self.initialized = true;
        Ok(())
    }

    fn flip(&mut self) {
        Parameter::flip(self);
    }

    fn describe(&self, name: &str) -> Value {
        let mut entry = json!({
            "name": name,
            "type": T::type_label(),
            "length": T::LENGTH,
        });
        if let Some(limits) = self.limits {
            entry["limit_min"] = Value::from(limits.min);
            entry["limit_max"] = Value::from(limits.max);
        }
        if T::KIND == ParamKind::Enum {
            entry["fields"] = Value::from(T::fields().to_vec());
        }
        entry
    }

    fn active_json(&self) -> Value {
        self.read().to_json()
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}
