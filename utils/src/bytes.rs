use core::mem::{size_of, size_of_val};
use core::slice;

pub use macros::Cast;

/// A marker trait indicating that a type can be used and interpreted as its raw bytes.
///
/// ### Safety
/// It is only safe to implement this trait on a type if it contains no uninitialized
/// or padding bytes and has no invalid bit patterns. It is recommended to use the
/// derive macro instead.
pub unsafe trait Cast {}

/// Cast a prefix of the value's bytes as a reference to another type.
#[inline]
pub fn cast<T: Cast, A: Cast + ?Sized>(a: &A) -> &T {
	let ptr: *const T = a as *const A as *const T;
	assert!(size_of::<T>() <= size_of_val(a) && ptr.align_offset(core::mem::align_of::<T>()) == 0);
	unsafe { &*ptr }
}

/// View the value as its raw bytes.
#[inline]
pub fn as_slice<T: Cast + ?Sized>(a: &T) -> &[u8] {
	unsafe { slice::from_raw_parts(a as *const T as *const u8, size_of_val(a)) }
}

macro_rules! impl_trait {
	( $( $ty:ty ),+ ) => {
		$( unsafe impl Cast for $ty {} )+
	};
}

unsafe impl<T: Cast> Cast for [T] {}
unsafe impl<T: Cast, const N: usize> Cast for [T; N] {}

impl_trait!((), i8, u8, i16, u16, i32, u32, i64, u64, i128, u128);

/// A cursor over captured bytes.
///
/// All reads are bounds-checked against the captured length and return `None`
/// once the buffer is exhausted, so a truncated capture degrades into a
/// partial parse instead of an error. Network byteorder is assumed; the
/// `_swapped` variants additionally undo a capture-file byteorder swap.
#[derive(Clone)]
pub struct Reader<'a> {
	buf: &'a [u8],
	at: usize,
}

impl<'a> Reader<'a> {
	#[inline]
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf, at: 0 }
	}

	/// The current offset from the start of the buffer.
	#[inline]
	pub fn offset(&self) -> usize {
		self.at
	}

	#[inline]
	pub fn remaining(&self) -> usize {
		self.buf.len() - self.at
	}

	/// The unconsumed tail of the buffer.
	#[inline]
	pub fn rest(&self) -> &'a [u8] {
		&self.buf[self.at..]
	}

	pub fn need8(&mut self) -> Option<u8> {
		let v = *self.buf.get(self.at)?;
		self.at += 1;
		Some(v)
	}

	pub fn need16(&mut self) -> Option<u16> {
		Some(u16::from_be_bytes(self.need_bytes(2)?.try_into().unwrap()))
	}

	pub fn need16_swapped(&mut self) -> Option<u16> {
		self.need16().map(u16::swap_bytes)
	}

	pub fn need32(&mut self) -> Option<u32> {
		Some(u32::from_be_bytes(self.need_bytes(4)?.try_into().unwrap()))
	}

	pub fn need32_swapped(&mut self) -> Option<u32> {
		self.need32().map(u32::swap_bytes)
	}

	pub fn need_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
		let bytes = self.buf.get(self.at..self.at + n)?;
		self.at += n;
		Some(bytes)
	}

	pub fn need_array<const N: usize>(&mut self) -> Option<[u8; N]> {
		self.need_bytes(N).map(|b| b.try_into().unwrap())
	}

	pub fn skip(&mut self, n: usize) -> Option<()> {
		if self.remaining() < n {
			return None;
		}
		self.at += n;
		Some(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reader_consumes_in_order() {
		let mut r = Reader::new(&[1, 0x12, 0x34, 0xde, 0xad, 0xbe, 0xef, 9]);

		assert_eq!(r.need8(), Some(1));
		assert_eq!(r.need16(), Some(0x1234));
		assert_eq!(r.need32(), Some(0xdeadbeef));
		assert_eq!(r.offset(), 7);
		assert_eq!(r.need16(), None);
		// A failed read consumes nothing.
		assert_eq!(r.need8(), Some(9));
		assert_eq!(r.remaining(), 0);
	}

	#[test]
	fn reader_swapped() {
		let mut r = Reader::new(&[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);

		assert_eq!(r.need16_swapped(), Some(0x1234));
		assert_eq!(r.need32_swapped(), Some(0x12345678));
	}

	#[test]
	fn cast_and_as_slice() {
		let bytes = [0x12u8, 0x34, 0x56];
		assert_eq!(*cast::<u8, _>(&bytes[..]), 0x12);
		assert_eq!(as_slice(&bytes), &bytes);
		assert_eq!(as_slice(&()).len(), 0);
	}
}
