use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use lf_error::*;

/// A dimension tag.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Axis {
    T,
    Z,
    Y,
    X,
    C,
}

impl Axis {
    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::X | Self::Y | Self::Z)
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::T => 't',
            Self::Z => 'z',
            Self::Y => 'y',
            Self::X => 'x',
            Self::C => 'c',
        }
    }
}

impl TryFrom<char> for Axis {
    type Error = LFError;

    fn try_from(tag: char) -> LFResult<Self> {
        match tag {
            't' => Ok(Self::T),
            'z' => Ok(Self::Z),
            'y' => Ok(Self::Y),
            'x' => Ok(Self::X),
            'c' => Ok(Self::C),
            other => Err(bad_request!("unknown axis tag: {other}")),
        }
    }
}

impl FromStr for Axis {
    type Err = LFError;

    fn from_str(s: &str) -> LFResult<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(tag), None) => Self::try_from(tag),
            _ => Err(bad_request!("unknown axis tag: {s}")),
        }
    }
}

impl fmt::Debug for Axis {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// An ordered set of unique [`Axis`] tags.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct AxisTags(Vec<Axis>);

impl AxisTags {
    /// Construct a new set of `AxisTags`, or return an error if any tag is repeated.
    pub fn new(tags: Vec<Axis>) -> LFResult<Self> {
        let mut unique = HashSet::with_capacity(tags.len());
        for axis in &tags {
            if !unique.insert(*axis) {
                return Err(bad_request!("axis {axis} is repeated in {tags:?}"));
            }
        }

        Ok(Self(tags))
    }

    /// Return the position of the given `axis`, if present.
    pub fn index_of(&self, axis: Axis) -> Option<usize> {
        self.0.iter().position(|tag| *tag == axis)
    }

    /// Return `true` if these tags contain the same axes as `other`, in any order.
    pub fn same_set(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|axis| other.contains(axis))
    }

    /// The spatial axes, in order.
    pub fn spatial(&self) -> Vec<Axis> {
        self.0.iter().copied().filter(Axis::is_spatial).collect()
    }
}

impl Deref for AxisTags {
    type Target = [Axis];

    fn deref(&self) -> &[Axis] {
        &self.0
    }
}

impl FromStr for AxisTags {
    type Err = LFError;

    fn from_str(s: &str) -> LFResult<Self> {
        s.chars()
            .map(Axis::try_from)
            .collect::<LFResult<Vec<Axis>>>()
            .and_then(Self::new)
    }
}

impl fmt::Debug for AxisTags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for AxisTags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for axis in &self.0 {
            write!(f, "{axis}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags: AxisTags = "tzyxc".parse().expect("tags");
        assert_eq!(tags.index_of(Axis::X), Some(3));
        assert_eq!(tags.spatial(), vec![Axis::Z, Axis::Y, Axis::X]);
        assert_eq!(tags.to_string(), "tzyxc");

        assert!("xyx".parse::<AxisTags>().is_err());
        assert!("xq".parse::<AxisTags>().is_err());
    }
}
