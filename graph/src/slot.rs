use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use lf_error::*;
use lf_region::{AxisTags, BlockShape, Shape};
use lf_value::{Array, DType, Scalar, ScalarType};

/// The unique ID of an operator within a [`crate::Graph`].
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OperatorId(pub(crate) u64);

impl OperatorId {
    /// A reference to the slot of this operator with the given `name`.
    pub fn slot<N: fmt::Display>(&self, name: N) -> SlotRef {
        SlotRef::new(*self, name)
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// A non-owning reference to a named slot of an operator.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SlotRef {
    op: OperatorId,
    name: Arc<str>,
}

impl SlotRef {
    pub fn new<N: fmt::Display>(op: OperatorId, name: N) -> Self {
        Self {
            op,
            name: name.to_string().into(),
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.op
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.op, self.name)
    }
}

/// Whether a slot receives data or provides it.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Debug for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// The kind of data a slot carries.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum SlotKind {
    Array,
    Scalar(ScalarType),
}

impl fmt::Debug for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Array => f.write_str("array"),
            Self::Scalar(dtype) => write!(f, "scalar {dtype}"),
        }
    }
}

/// The static declaration of a slot: its name, direction, kind, and constraints.
#[derive(Clone)]
pub struct SlotSpec {
    name: String,
    direction: Direction,
    kind: SlotKind,
    dtype: Option<DType>,
    tags: Option<AxisTags>,
    optional: bool,
    default: Option<Scalar>,
}

impl SlotSpec {
    /// An array input slot.
    pub fn input<N: fmt::Display>(name: N) -> Self {
        Self::new(name, Direction::Input, SlotKind::Array)
    }

    /// A scalar parameter input slot.
    pub fn scalar<N: fmt::Display>(name: N, dtype: ScalarType) -> Self {
        Self::new(name, Direction::Input, SlotKind::Scalar(dtype))
    }

    /// An array output slot.
    pub fn output<N: fmt::Display>(name: N) -> Self {
        Self::new(name, Direction::Output, SlotKind::Array)
    }

    fn new<N: fmt::Display>(name: N, direction: Direction, kind: SlotKind) -> Self {
        Self {
            name: name.to_string(),
            direction,
            kind,
            dtype: None,
            tags: None,
            optional: false,
            default: None,
        }
    }

    /// Require the array carried by this slot to have the given `dtype`.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Require the array carried by this slot to have the given axis `tags`.
    pub fn with_tags(mut self, tags: AxisTags) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Allow this input to be left without a value or connection.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Give this scalar input a default value.
    pub fn with_default<S: Into<Scalar>>(mut self, default: S) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn dtype(&self) -> Option<DType> {
        self.dtype
    }

    pub fn tags(&self) -> Option<&AxisTags> {
        self.tags.as_ref()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default_value(&self) -> Option<Scalar> {
        self.default
    }

    /// Return a `TypeMismatch` error if an array with the given [`Metadata`] can't flow
    /// through this slot.
    pub fn check(&self, meta: &Metadata) -> LFResult<()> {
        if let Some(dtype) = self.dtype {
            if dtype != meta.dtype() {
                return Err(type_mismatch!(
                    "slot {} requires type {dtype}, not {}",
                    self.name,
                    meta.dtype()
                ));
            }
        }

        if let Some(tags) = &self.tags {
            if tags != meta.shape().tags() {
                return Err(type_mismatch!(
                    "slot {} requires axes {tags}, not {}",
                    self.name,
                    meta.shape().tags()
                ));
            }
        }

        Ok(())
    }

    /// Return a `TypeMismatch` error if this slot can't be connected to `upstream`.
    pub fn check_compatible(&self, upstream: &Self) -> LFResult<()> {
        if self.kind != upstream.kind {
            return Err(type_mismatch!(
                "cannot connect {:?} slot {} to {:?} slot {}",
                self.kind,
                self.name,
                upstream.kind,
                upstream.name
            ));
        }

        if let (Some(this), Some(that)) = (self.dtype, upstream.dtype) {
            if this != that {
                return Err(type_mismatch!(
                    "cannot connect slot {} of type {this} to slot {} of type {that}",
                    self.name,
                    upstream.name
                ));
            }
        }

        if let (Some(this), Some(that)) = (&self.tags, &upstream.tags) {
            if this != that {
                return Err(type_mismatch!(
                    "cannot connect slot {} with axes {this} to slot {} with axes {that}",
                    self.name,
                    upstream.name
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SlotSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} {:?} slot {}", self.kind, self.direction, self.name)
    }
}

/// The fixed set of slots declared by an operator.
#[derive(Clone)]
pub struct Schema {
    slots: Vec<SlotSpec>,
}

impl Schema {
    /// Construct a new `Schema`, or return an error if any slot name is repeated.
    pub fn new<I: IntoIterator<Item = SlotSpec>>(slots: I) -> LFResult<Self> {
        let slots = slots.into_iter().collect::<Vec<_>>();

        let mut names = HashSet::with_capacity(slots.len());
        for slot in &slots {
            if !names.insert(slot.name()) {
                return Err(bad_request!("slot {} is declared twice", slot.name()));
            }
        }

        Ok(Self { slots })
    }

    pub fn get(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotSpec> {
        self.slots.iter()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &SlotSpec> {
        self.slots
            .iter()
            .filter(|slot| slot.direction == Direction::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &SlotSpec> {
        self.slots
            .iter()
            .filter(|slot| slot.direction == Direction::Output)
    }
}

/// The metadata of an array slot: its [`DType`], full [`Shape`], and an optional block hint.
#[derive(Clone, Eq, PartialEq)]
pub struct Metadata {
    dtype: DType,
    shape: Shape,
    block_hint: Option<BlockShape>,
}

impl Metadata {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape,
            block_hint: None,
        }
    }

    pub fn with_block_hint(mut self, block_shape: BlockShape) -> Self {
        self.block_hint = Some(block_shape);
        self
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn tags(&self) -> &AxisTags {
        self.shape.tags()
    }

    pub fn block_hint(&self) -> Option<&BlockShape> {
        self.block_hint.as_ref()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} array with shape {}", self.dtype, self.shape)?;

        if let Some(block_shape) = &self.block_hint {
            write!(f, " in blocks of {block_shape:?}")?;
        }

        Ok(())
    }
}

/// A static value assigned to an input slot.
#[derive(Clone)]
pub enum Value {
    Array(AxisTags, Arc<Array>),
    Scalar(Scalar),
}

impl Value {
    /// Construct an array `Value`, or return an error if `tags` does not match its shape.
    pub fn array(tags: AxisTags, array: Array) -> LFResult<Self> {
        if tags.len() == array.ndim() {
            Ok(Self::Array(tags, Arc::new(array)))
        } else {
            Err(type_mismatch!(
                "cannot tag {array:?} with axes {tags}"
            ))
        }
    }

    /// The [`Metadata`] of an array `Value`.
    pub fn metadata(&self) -> LFResult<Metadata> {
        match self {
            Self::Array(tags, array) => {
                let dims = array.shape().iter().map(|dim| *dim as u64).collect();
                let shape = Shape::new(tags.clone(), dims)?;
                Ok(Metadata::new(array.dtype(), shape))
            }
            Self::Scalar(scalar) => Err(type_mismatch!(
                "scalar {scalar} has no array metadata"
            )),
        }
    }

    /// Return `true` if this `Value` can be assigned to a slot of the given kind.
    pub fn fits(&self, kind: SlotKind) -> bool {
        match (self, kind) {
            (Self::Array(..), SlotKind::Array) => true,
            (Self::Scalar(scalar), SlotKind::Scalar(dtype)) => scalar.fits(dtype),
            _ => false,
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Self::Scalar(scalar)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Array(tags, array) => write!(f, "{array:?} with axes {tags}"),
            Self::Scalar(scalar) => write!(f, "{scalar}"),
        }
    }
}
