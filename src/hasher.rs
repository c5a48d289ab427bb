//! Key hashing and bucket placement.
//!
//! The set of key types a [`HashMap`](crate::HashMap) accepts is closed: [`MapKey`] is sealed, so
//! handing an unsupported key type to the map is a compile-time error instead of a runtime fault.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// FNV offset basis.
const FNV_OFFSET_BASIS: u32 = 2_166_136_261;

/// FNV prime.
const FNV_PRIME: u32 = 16_777_619;

/// Hash value of `true`.
const TRUE_HASH: u64 = 0;

/// Hash value of `false`.
const FALSE_HASH: u64 = 1;

pub(crate) mod sealed {
    /// Prevents [`MapKey`](super::MapKey) from being implemented outside of the crate.
    pub trait Sealed {}
}

/// Types that can be used as keys of a [`HashMap`](crate::HashMap).
///
/// The hash of a borrowed form must be identical to that of the owned form, e.g., `str` and
/// `String`, or `[u8]` and `Vec<u8>`, so that the borrowed form can be used for lookups.
///
/// # Examples
///
/// ```
/// use stripemap::MapKey;
///
/// assert_eq!("abc".hash_key(), String::from("abc").hash_key());
/// assert_eq!(true.hash_key(), 0);
/// assert_eq!((-1_i8).hash_key(), u64::MAX);
/// ```
pub trait MapKey: sealed::Sealed {
    /// Returns the 64-bit hash of the key.
    fn hash_key(&self) -> u64;

    /// Writes the external text form of the key.
    ///
    /// Byte sequences are written as lossy UTF-8, and time values as their nanosecond count;
    /// time points before the Unix epoch are negative.
    ///
    /// # Errors
    ///
    /// Returns the error of the formatter.
    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Calculates the 32-bit FNV-1a hash of the byte sequence, widened to 64 bits.
///
/// Each byte is mixed in by multiplying by the FNV prime first, and then XOR-ing the byte.
///
/// # Examples
///
/// ```
/// use stripemap::fnv1a;
///
/// assert_eq!(fnv1a(b""), 2_166_136_261);
/// assert_ne!(fnv1a(b"a"), fnv1a(b"b"));
/// ```
#[inline]
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= u32::from(*byte);
    }
    u64::from(hash)
}

/// Calculates the bucket index of the hash value in a table of `capacity` buckets.
///
/// `capacity` must be a power of two.
///
/// # Examples
///
/// ```
/// use stripemap::index_of;
///
/// assert_eq!(index_of(17, 16), 1);
/// assert_eq!(index_of(17, 32), 17);
/// ```
#[allow(clippy::cast_possible_truncation)] // Only the lower bits are used.
#[inline]
#[must_use]
pub const fn index_of(hash: u64, capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two());
    (hash as usize) & (capacity - 1)
}

/// Folds a 128-bit value into 64 bits.
#[allow(clippy::cast_possible_truncation)]
#[inline]
const fn fold(value: u128) -> u64 {
    (value as u64) ^ ((value >> 64) as u64)
}

/// Returns the nanosecond count of the [`Duration`] truncated to 64 bits.
#[allow(clippy::cast_possible_truncation)]
#[inline]
pub(crate) const fn nanos(duration: Duration) -> u64 {
    duration.as_nanos() as u64
}

impl<T: MapKey + ?Sized> sealed::Sealed for &T {}

impl<T: MapKey + ?Sized> MapKey for &T {
    #[inline]
    fn hash_key(&self) -> u64 {
        (**self).hash_key()
    }

    #[inline]
    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt_key(f)
    }
}

impl sealed::Sealed for [u8] {}

impl MapKey for [u8] {
    #[inline]
    fn hash_key(&self) -> u64 {
        fnv1a(self)
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self))
    }
}

impl sealed::Sealed for Vec<u8> {}

impl MapKey for Vec<u8> {
    #[inline]
    fn hash_key(&self) -> u64 {
        fnv1a(self)
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self))
    }
}

impl sealed::Sealed for str {}

impl MapKey for str {
    #[inline]
    fn hash_key(&self) -> u64 {
        fnv1a(self.as_bytes())
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

impl sealed::Sealed for String {}

impl MapKey for String {
    #[inline]
    fn hash_key(&self) -> u64 {
        fnv1a(self.as_bytes())
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

impl sealed::Sealed for bool {}

impl MapKey for bool {
    #[inline]
    fn hash_key(&self) -> u64 {
        if *self {
            TRUE_HASH
        } else {
            FALSE_HASH
        }
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl sealed::Sealed for char {}

impl MapKey for char {
    #[inline]
    fn hash_key(&self) -> u64 {
        u64::from(u32::from(*self))
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

macro_rules! unsigned_key {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl MapKey for $t {
                #[allow(clippy::cast_lossless)]
                #[inline]
                fn hash_key(&self) -> u64 {
                    *self as u64
                }

                fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{self}")
                }
            }
        )*
    };
}

unsigned_key!(u8, u16, u32, u64, usize);

macro_rules! signed_key {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl MapKey for $t {
                #[allow(clippy::cast_lossless, clippy::cast_sign_loss)]
                #[inline]
                fn hash_key(&self) -> u64 {
                    // Sign-extended to 64 bits, and then reinterpreted.
                    (*self as i64) as u64
                }

                fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{self}")
                }
            }
        )*
    };
}

signed_key!(i8, i16, i32, i64, isize);

impl sealed::Sealed for u128 {}

impl MapKey for u128 {
    #[inline]
    fn hash_key(&self) -> u64 {
        fold(*self)
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl sealed::Sealed for i128 {}

impl MapKey for i128 {
    #[allow(clippy::cast_sign_loss)]
    #[inline]
    fn hash_key(&self) -> u64 {
        fold(*self as u128)
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl sealed::Sealed for Duration {}

impl MapKey for Duration {
    #[inline]
    fn hash_key(&self) -> u64 {
        nanos(*self)
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_nanos())
    }
}

impl sealed::Sealed for SystemTime {}

impl MapKey for SystemTime {
    #[inline]
    fn hash_key(&self) -> u64 {
        match self.duration_since(UNIX_EPOCH) {
            Ok(since) => nanos(since),
            Err(e) => nanos(e.duration()).wrapping_neg(),
        }
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration_since(UNIX_EPOCH) {
            Ok(since) => write!(f, "{}", since.as_nanos()),
            Err(e) => write!(f, "-{}", e.duration().as_nanos()),
        }
    }
}
