//! [`Key`] is a closed set of heterogeneous key types.

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::hasher::{fnv1a, nanos, sealed, MapKey};

/// [`Key`] lets a single [`HashMap`](crate::HashMap) hold keys of different scalar and
/// byte-sequence types.
///
/// Each variant hashes exactly like the corresponding plain key type, and floating point numbers
/// are hashed and compared by their IEEE-754 bit patterns, therefore `NaN` keys are usable and
/// `0.0` and `-0.0` are distinct keys. Keys of different variants are never equal, even if they
/// hash to the same value.
///
/// # Examples
///
/// ```
/// use stripemap::{HashMap, Key};
///
/// let hashmap: HashMap<Key, u32> = HashMap::new();
///
/// assert!(hashmap.set(Key::from("one"), 1).is_none());
/// assert!(hashmap.set(Key::from(1_u64), 2).is_none());
/// assert!(hashmap.set(Key::from(1.5_f64), 3).is_none());
/// assert_eq!(hashmap.get(&Key::from("one")), Some(1));
/// assert_eq!(hashmap.get(&Key::from(1_i64)), None);
/// assert_eq!(hashmap.len(), 3);
/// ```
#[derive(Clone, Debug)]
pub enum Key {
    /// A byte sequence.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    Str(String),
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// A single-precision floating point number.
    F32(f32),
    /// A double-precision floating point number.
    F64(f64),
    /// A point in monotonic time, or a time span, in nanoseconds.
    Time(Duration),
}

impl sealed::Sealed for Key {}

impl MapKey for Key {
    #[inline]
    fn hash_key(&self) -> u64 {
        match self {
            Key::Bytes(b) => fnv1a(b),
            Key::Str(s) => fnv1a(s.as_bytes()),
            Key::Bool(b) => b.hash_key(),
            Key::Int(i) => i.hash_key(),
            Key::Uint(u) => *u,
            Key::F32(f) => u64::from(f.to_bits()),
            Key::F64(f) => f.to_bits(),
            Key::Time(t) => nanos(*t),
        }
    }

    #[inline]
    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Bytes(l), Key::Bytes(r)) => l == r,
            (Key::Str(l), Key::Str(r)) => l == r,
            (Key::Bool(l), Key::Bool(r)) => l == r,
            (Key::Int(l), Key::Int(r)) => l == r,
            (Key::Uint(l), Key::Uint(r)) => l == r,
            (Key::F32(l), Key::F32(r)) => l.to_bits() == r.to_bits(),
            (Key::F64(l), Key::F64(r)) => l.to_bits() == r.to_bits(),
            (Key::Time(l), Key::Time(r)) => l == r,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        state.write_u64(self.hash_key());
    }
}

impl Display for Key {
    /// Renders the external text form of the key.
    ///
    /// Byte sequences are rendered as lossy UTF-8, and time values as their nanosecond count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Key::Str(s) => f.write_str(s),
            Key::Bool(b) => write!(f, "{b}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Uint(u) => write!(f, "{u}"),
            Key::F32(x) => write!(f, "{x}"),
            Key::F64(x) => write!(f, "{x}"),
            Key::Time(t) => write!(f, "{}", t.as_nanos()),
        }
    }
}

impl From<&str> for Key {
    #[inline]
    fn from(s: &str) -> Self {
        Key::Str(s.to_owned())
    }
}

impl From<String> for Key {
    #[inline]
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<&[u8]> for Key {
    #[inline]
    fn from(b: &[u8]) -> Self {
        Key::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    #[inline]
    fn from(b: Vec<u8>) -> Self {
        Key::Bytes(b)
    }
}

impl From<bool> for Key {
    #[inline]
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl From<f32> for Key {
    #[inline]
    fn from(f: f32) -> Self {
        Key::F32(f)
    }
}

impl From<f64> for Key {
    #[inline]
    fn from(f: f64) -> Self {
        Key::F64(f)
    }
}

impl From<Duration> for Key {
    #[inline]
    fn from(t: Duration) -> Self {
        Key::Time(t)
    }
}

macro_rules! integer_key {
    ($variant:ident, $wide:ty, $($t:ty),*) => {
        $(
            impl From<$t> for Key {
                #[inline]
                fn from(i: $t) -> Self {
                    Key::$variant(<$wide>::from(i))
                }
            }
        )*
    };
}

integer_key!(Int, i64, i8, i16, i32, i64);
integer_key!(Uint, u64, u8, u16, u32, u64);
