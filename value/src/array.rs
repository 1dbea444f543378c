use std::fmt;

use get_size::GetSize;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use safecast::AsType;

use lf_error::*;

use super::DType;

/// A primitive type which can be stored in an [`Array`].
pub trait Element:
    Copy + Default + PartialEq + PartialOrd + Send + Sync + fmt::Debug + 'static
{
    fn dtype() -> DType;

    fn to_f64(self) -> f64;

    /// Convert from an `f64`, saturating at the bounds of this type.
    fn from_f64(value: f64) -> Self;
}

macro_rules! element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            fn dtype() -> DType {
                DType::$dtype
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }
        }
    };
}

element!(f32, F32);
element!(f64, F64);
element!(i16, I16);
element!(i32, I32);
element!(i64, I64);
element!(u8, U8);
element!(u16, U16);
element!(u32, U32);
element!(u64, U64);

/// An owned N-dimensional array of a single [`DType`].
#[derive(Clone, PartialEq)]
pub enum Array {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
}

macro_rules! array_dispatch {
    ($this:expr, $var:ident, $call:expr) => {
        match $this {
            Array::F32($var) => $call,
            Array::F64($var) => $call,
            Array::I16($var) => $call,
            Array::I32($var) => $call,
            Array::I64($var) => $call,
            Array::U8($var) => $call,
            Array::U16($var) => $call,
            Array::U32($var) => $call,
            Array::U64($var) => $call,
        }
    };
}

macro_rules! array_map {
    ($this:expr, $var:ident, $call:expr) => {
        match $this {
            Array::F32($var) => Array::F32($call),
            Array::F64($var) => Array::F64($call),
            Array::I16($var) => Array::I16($call),
            Array::I32($var) => Array::I32($call),
            Array::I64($var) => Array::I64($call),
            Array::U8($var) => Array::U8($call),
            Array::U16($var) => Array::U16($call),
            Array::U32($var) => Array::U32($call),
            Array::U64($var) => Array::U64($call),
        }
    };
}

impl Array {
    /// Construct a new `Array` of the given `dtype` and `dims`, filled with zeros.
    pub fn zeros(dtype: DType, dims: &[usize]) -> Self {
        let dims = IxDyn(dims);

        match dtype {
            DType::F32 => Self::F32(ArrayD::from_elem(dims, 0.)),
            DType::F64 => Self::F64(ArrayD::from_elem(dims, 0.)),
            DType::I16 => Self::I16(ArrayD::from_elem(dims, 0)),
            DType::I32 => Self::I32(ArrayD::from_elem(dims, 0)),
            DType::I64 => Self::I64(ArrayD::from_elem(dims, 0)),
            DType::U8 => Self::U8(ArrayD::from_elem(dims, 0)),
            DType::U16 => Self::U16(ArrayD::from_elem(dims, 0)),
            DType::U32 => Self::U32(ArrayD::from_elem(dims, 0)),
            DType::U64 => Self::U64(ArrayD::from_elem(dims, 0)),
        }
    }

    /// Construct a new `Array` from a flat, row-major `Vec` of elements.
    pub fn from_vec<T>(dims: &[usize], data: Vec<T>) -> LFResult<Self>
    where
        T: Element,
        Self: From<ArrayD<T>>,
    {
        ArrayD::from_shape_vec(IxDyn(dims), data)
            .map(Self::from)
            .map_err(|cause| bad_request!("cannot construct an array with shape {dims:?}: {cause}"))
    }

    /// Construct a new `Array` of the given `dtype` from a flat, row-major `Vec` of `f64`s.
    pub fn from_f64_vec(dtype: DType, dims: &[usize], data: Vec<f64>) -> LFResult<Self> {
        fn convert<T>(dims: &[usize], data: Vec<f64>) -> LFResult<Array>
        where
            T: Element,
            Array: From<ArrayD<T>>,
        {
            let data = data.into_iter().map(T::from_f64).collect::<Vec<T>>();
            Array::from_vec(dims, data)
        }

        match dtype {
            DType::F32 => convert::<f32>(dims, data),
            DType::F64 => convert::<f64>(dims, data),
            DType::I16 => convert::<i16>(dims, data),
            DType::I32 => convert::<i32>(dims, data),
            DType::I64 => convert::<i64>(dims, data),
            DType::U8 => convert::<u8>(dims, data),
            DType::U16 => convert::<u16>(dims, data),
            DType::U32 => convert::<u32>(dims, data),
            DType::U64 => convert::<u64>(dims, data),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I16(_) => DType::I16,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::U8(_) => DType::U8,
            Self::U16(_) => DType::U16,
            Self::U32(_) => DType::U32,
            Self::U64(_) => DType::U64,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn shape(&self) -> &[usize] {
        array_dispatch!(self, this, this.shape())
    }

    /// The number of elements in this `Array`.
    pub fn size(&self) -> usize {
        array_dispatch!(self, this, this.len())
    }

    /// Copy the box with the given `offset` and `dims` out of this `Array`.
    pub fn extract(&self, offset: &[usize], dims: &[usize]) -> LFResult<Self> {
        let step = vec![1; dims.len()];
        self.extract_strided(offset, dims, &step)
    }

    /// Copy `dims` elements per axis out of this `Array`, starting at `offset` and taking
    /// every `step`th element.
    pub fn extract_strided(
        &self,
        offset: &[usize],
        dims: &[usize],
        step: &[usize],
    ) -> LFResult<Self> {
        let bounds = self.bounds(offset, dims, step)?;
        Ok(array_map!(self, this, slice(this.view(), &bounds).to_owned()))
    }

    /// Overwrite the box of this `Array` at `offset` with the contents of `other`.
    pub fn write(&mut self, offset: &[usize], other: &Self) -> LFResult<()> {
        let step = vec![1; offset.len()];
        let bounds = self.bounds(offset, other.shape(), &step)?;

        macro_rules! write_as {
            ($this:ident, $that:ident) => {{
                let mut view = $this.view_mut();
                for (axis, bound) in bounds.into_iter().enumerate() {
                    view.slice_axis_inplace(Axis(axis), bound);
                }

                view.assign($that);
                Ok(())
            }};
        }

        match (self, other) {
            (Self::F32(this), Self::F32(that)) => write_as!(this, that),
            (Self::F64(this), Self::F64(that)) => write_as!(this, that),
            (Self::I16(this), Self::I16(that)) => write_as!(this, that),
            (Self::I32(this), Self::I32(that)) => write_as!(this, that),
            (Self::I64(this), Self::I64(that)) => write_as!(this, that),
            (Self::U8(this), Self::U8(that)) => write_as!(this, that),
            (Self::U16(this), Self::U16(that)) => write_as!(this, that),
            (Self::U32(this), Self::U32(that)) => write_as!(this, that),
            (Self::U64(this), Self::U64(that)) => write_as!(this, that),
            (this, that) => Err(type_mismatch!(
                "cannot write an array of type {} into an array of type {}",
                that.dtype(),
                this.dtype()
            )),
        }
    }

    /// Apply `op` to every element, by way of `f64`, keeping this `Array`'s [`DType`].
    ///
    /// Integer values outside the range exactly representable by an `f64` lose precision.
    pub fn map_f64<F>(self, op: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        fn map<T: Element, F: Fn(f64) -> f64>(mut array: ArrayD<T>, op: &F) -> ArrayD<T> {
            array.mapv_inplace(|n| T::from_f64(op(n.to_f64())));
            array
        }

        array_map!(self, this, map(this, &op))
    }

    /// Iterate over the elements of this `Array` in row-major order, as `f64`s.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        array_dispatch!(self, this, this.iter().map(|n| n.to_f64()).collect())
    }

    fn bounds(&self, offset: &[usize], dims: &[usize], step: &[usize]) -> LFResult<Vec<Slice>> {
        let shape = self.shape();

        if offset.len() != shape.len() || dims.len() != shape.len() || step.len() != shape.len()
        {
            return Err(bad_request!(
                "cannot slice an array with shape {shape:?} at {offset:?} with dims {dims:?}"
            ));
        }

        let mut bounds = Vec::with_capacity(shape.len());
        for axis in 0..shape.len() {
            let (start, len, step) = (offset[axis], dims[axis], step[axis]);

            if step == 0 {
                return Err(bad_request!("invalid step 0 for axis {axis}"));
            }

            let stop = if len == 0 {
                start
            } else {
                start + ((len - 1) * step) + 1
            };

            if stop > shape[axis] {
                return Err(out_of_bounds!(
                    "array with shape {shape:?} does not contain {dims:?} at {offset:?}"
                ));
            }

            bounds.push(Slice::from(start..stop).step_by(step as isize));
        }

        Ok(bounds)
    }
}

fn slice<'a, T>(mut view: ArrayViewD<'a, T>, bounds: &[Slice]) -> ArrayViewD<'a, T> {
    for (axis, bound) in bounds.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), *bound);
    }

    view
}

impl GetSize for Array {
    fn get_heap_size(&self) -> usize {
        self.size() * self.dtype().size()
    }
}

macro_rules! array_from {
    ($t:ty, $var:ident) => {
        impl From<ArrayD<$t>> for Array {
            fn from(array: ArrayD<$t>) -> Self {
                Self::$var(array)
            }
        }

        impl AsType<ArrayD<$t>> for Array {
            fn as_type(&self) -> Option<&ArrayD<$t>> {
                match self {
                    Self::$var(array) => Some(array),
                    _ => None,
                }
            }

            fn as_type_mut(&mut self) -> Option<&mut ArrayD<$t>> {
                match self {
                    Self::$var(array) => Some(array),
                    _ => None,
                }
            }

            fn into_type(self) -> Option<ArrayD<$t>> {
                match self {
                    Self::$var(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

array_from!(f32, F32);
array_from!(f64, F64);
array_from!(i16, I16);
array_from!(i32, I32);
array_from!(i64, I64);
array_from!(u8, U8);
array_from!(u16, U16);
array_from!(u32, U32);
array_from!(u64, U64);

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "array of type {} with shape {:?}", self.dtype(), self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(dims: &[usize]) -> Array {
        let size = dims.iter().product::<usize>();
        Array::from_vec(dims, (0..size as u32).collect()).expect("array")
    }

    #[test]
    fn test_extract() {
        let array = range(&[4, 5]);
        let slice = array.extract(&[1, 2], &[2, 3]).expect("slice");
        assert_eq!(slice.shape(), &[2, 3]);
        assert_eq!(slice.to_f64_vec(), vec![7., 8., 9., 12., 13., 14.]);

        let strided = array.extract_strided(&[0, 0], &[2, 3], &[2, 2]).expect("slice");
        assert_eq!(strided.to_f64_vec(), vec![0., 2., 4., 10., 12., 14.]);

        assert!(array.extract(&[3, 0], &[2, 1]).is_err());
    }

    #[test]
    fn test_write() {
        let mut array = Array::zeros(DType::U32, &[3, 3]);
        array.write(&[1, 1], &range(&[2, 2])).expect("write");
        assert_eq!(
            array.to_f64_vec(),
            vec![0., 0., 0., 0., 0., 1., 0., 2., 3.]
        );

        let err = array
            .write(&[0, 0], &Array::zeros(DType::F32, &[1, 1]))
            .expect_err("dtype mismatch");

        assert_eq!(err.code(), ErrorType::TypeMismatch);
    }

    #[test]
    fn test_map_f64() {
        let array = range(&[2, 2]).map_f64(|n| if n > 1. { n } else { 0. });
        assert_eq!(array.dtype(), DType::U32);
        assert_eq!(array.to_f64_vec(), vec![0., 0., 2., 3.]);
    }

    #[test]
    fn test_heap_size() {
        let array = Array::zeros(DType::F64, &[4, 4]);
        assert_eq!(array.get_heap_size(), 128);
    }
}
