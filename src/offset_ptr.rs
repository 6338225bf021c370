//! Relocatable pointer - a byte offset from the segment base
//!
//! An `OffsetPtr` carries no address, only a distance from the start of the
//! segment it points into. It stays valid when the segment is mapped at a
//! different base; the base is supplied at the moment of dereference.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;
use serde::{Serialize, Serializer};

const NULL_OFFSET: usize = usize::MAX;

/// Base-relative handle to a `T` stored inside a segment.
///
/// Arithmetic is in units of `T`, like raw pointers. Converting to a local
/// address requires the base of the segment in the current address space.
#[repr(transparent)]
pub struct OffsetPtr<T> {
    raw: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OffsetPtr<T> {
    #[inline]
    pub const fn null() -> Self {
        Self {
            raw: NULL_OFFSET,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn from_offset(offset: usize) -> Self {
        Self {
            raw: offset,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.raw == NULL_OFFSET
    }

    /// Byte offset from the segment base, `None` for null.
    #[inline]
    pub const fn offset(self) -> Option<usize> {
        if self.is_null() {
            None
        } else {
            Some(self.raw)
        }
    }

    #[inline]
    pub const fn cast<U>(self) -> OffsetPtr<U> {
        OffsetPtr {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    /// Advance by `count` elements.
    #[inline]
    pub fn add(self, count: usize) -> Self {
        debug_assert!(!self.is_null(), "arithmetic on null offset pointer");
        self.byte_add(count * size_of::<T>())
    }

    /// Step back by `count` elements.
    #[inline]
    pub fn sub(self, count: usize) -> Self {
        debug_assert!(!self.is_null(), "arithmetic on null offset pointer");
        Self::from_offset(self.raw - count * size_of::<T>())
    }

    #[inline]
    pub fn byte_add(self, bytes: usize) -> Self {
        debug_assert!(!self.is_null(), "arithmetic on null offset pointer");
        Self::from_offset(self.raw + bytes)
    }

    /// Distance in elements from `origin` to `self`.
    #[inline]
    pub fn distance(self, origin: Self) -> isize {
        debug_assert!(!self.is_null() && !origin.is_null());
        let bytes = self.raw as isize - origin.raw as isize;
        bytes / size_of::<T>().max(1) as isize
    }

    /// Local address of the pointee, given the segment base in this process.
    ///
    /// Null resolves to a null pointer. Dereferencing the result is only
    /// sound while the segment stays mapped at `base`.
    #[inline]
    pub fn resolve(self, base: NonNull<u8>) -> *mut T {
        if self.is_null() {
            core::ptr::null_mut()
        } else {
            base.as_ptr().wrapping_add(self.raw).cast()
        }
    }

    /// Inverse of [`resolve`](Self::resolve). `ptr` must lie inside the segment.
    #[inline]
    pub fn from_local(base: NonNull<u8>, ptr: *const T) -> Self {
        if ptr.is_null() {
            return Self::null();
        }
        let addr = ptr as usize;
        let base = base.as_ptr() as usize;
        debug_assert!(addr >= base, "pointer below segment base");
        Self::from_offset(addr - base)
    }
}

impl<T> Clone for OffsetPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OffsetPtr<T> {}

impl<T> Default for OffsetPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> PartialEq for OffsetPtr<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for OffsetPtr<T> {}

impl<T> PartialOrd for OffsetPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for OffsetPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for OffsetPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for OffsetPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset() {
            Some(off) => write!(f, "OffsetPtr(+{:#x})", off),
            None => f.write_str("OffsetPtr(null)"),
        }
    }
}

/// Serialized as the offset, or none for null.
impl<T> Serialize for OffsetPtr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.offset().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_from_zero_offset() {
        let null = OffsetPtr::<u32>::null();
        let zero = OffsetPtr::<u32>::from_offset(0);
        assert!(null.is_null());
        assert!(!zero.is_null());
        assert_ne!(null, zero);
        assert_eq!(zero.offset(), Some(0));
    }

    #[test]
    fn arithmetic_is_in_elements() {
        let p = OffsetPtr::<u64>::from_offset(16);
        assert_eq!(p.add(2).offset(), Some(32));
        assert_eq!(p.add(2).sub(1).offset(), Some(24));
        assert_eq!(p.add(3).distance(p), 3);
        assert_eq!(p.distance(p.add(3)), -3);
    }

    #[test]
    fn resolve_follows_the_base() {
        let mut a = [0u64; 4];
        let mut b = [0u64; 4];
        let p = OffsetPtr::<u64>::from_offset(8);

        let base_a = NonNull::new(a.as_mut_ptr().cast::<u8>()).unwrap();
        let base_b = NonNull::new(b.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            *p.resolve(base_a) = 11;
            *p.resolve(base_b) = 22;
        }
        assert_eq!(a[1], 11);
        assert_eq!(b[1], 22);
        assert_eq!(OffsetPtr::from_local(base_a, &a[1] as *const u64), p);
    }

    #[test]
    fn null_resolves_to_null() {
        let mut byte = 0u8;
        let base = NonNull::from(&mut byte);
        assert!(OffsetPtr::<u8>::null().resolve(base).is_null());
        assert!(OffsetPtr::<u8>::from_local(base, core::ptr::null()).is_null());
    }

    #[test]
    fn serializes_as_offset() {
        #[derive(Serialize)]
        struct Slot {
            at: OffsetPtr<u64>,
            empty: OffsetPtr<u64>,
        }

        let value = toml::Value::try_from(Slot {
            at: OffsetPtr::from_offset(64),
            empty: OffsetPtr::null(),
        })
        .unwrap();
        assert_eq!(value.get("at").and_then(toml::Value::as_integer), Some(64));
        assert!(value.get("empty").is_none());
    }
}
