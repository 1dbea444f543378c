use std::fmt;

use safecast::TryCastFrom;

/// The type of a [`Scalar`] parameter.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
}

impl fmt::Debug for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
        })
    }
}

/// A scalar operator parameter, e.g. a threshold or a flag.
#[derive(Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn class(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Int(_) => ScalarType::Int,
            Self::Float(_) => ScalarType::Float,
        }
    }

    /// Return `true` if this `Scalar` can be assigned to a slot of the given type.
    ///
    /// An `Int` is accepted where a `Float` is expected.
    pub fn fits(&self, dtype: ScalarType) -> bool {
        match (self, dtype) {
            (Self::Int(_), ScalarType::Float) => true,
            (this, dtype) => this.class() == dtype,
        }
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl TryCastFrom<Scalar> for bool {
    fn can_cast_from(scalar: &Scalar) -> bool {
        matches!(scalar, Scalar::Bool(_))
    }

    fn opt_cast_from(scalar: Scalar) -> Option<Self> {
        match scalar {
            Scalar::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl TryCastFrom<Scalar> for i64 {
    fn can_cast_from(scalar: &Scalar) -> bool {
        matches!(scalar, Scalar::Int(_))
    }

    fn opt_cast_from(scalar: Scalar) -> Option<Self> {
        match scalar {
            Scalar::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl TryCastFrom<Scalar> for u64 {
    fn can_cast_from(scalar: &Scalar) -> bool {
        matches!(scalar, Scalar::Int(i) if *i >= 0)
    }

    fn opt_cast_from(scalar: Scalar) -> Option<Self> {
        match scalar {
            Scalar::Int(i) => i.try_into().ok(),
            _ => None,
        }
    }
}

impl TryCastFrom<Scalar> for f64 {
    fn can_cast_from(scalar: &Scalar) -> bool {
        matches!(scalar, Scalar::Int(_) | Scalar::Float(_))
    }

    fn opt_cast_from(scalar: Scalar) -> Option<Self> {
        match scalar {
            Scalar::Int(i) => Some(i as f64),
            Scalar::Float(f) => Some(f),
            Scalar::Bool(_) => None,
        }
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bool(b) => fmt::Display::fmt(b, f),
            Self::Int(i) => fmt::Display::fmt(i, f),
            Self::Float(n) => fmt::Display::fmt(n, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use safecast::TryCastInto;

    use super::*;

    #[test]
    fn test_cast() {
        let threshold: Option<f64> = Scalar::Int(3).opt_cast_into();
        assert_eq!(threshold, Some(3.));

        let flag: Option<bool> = Scalar::Float(1.).opt_cast_into();
        assert_eq!(flag, None);

        let scale: Option<u64> = Scalar::Int(-1).opt_cast_into();
        assert_eq!(scale, None);

        assert!(Scalar::Int(4).fits(ScalarType::Float));
        assert!(!Scalar::Float(4.).fits(ScalarType::Int));
    }
}
