use crate::bytes::Cast;

macro_rules! define_types {
	( $( $int:ident ($le:ident $be:ident) )* ) => {
		$(
			#[doc = concat!("A ", stringify!($int), " stored as little-endian bytes.")]
			#[derive(Clone, Copy, Default, PartialEq, Eq)]
			#[repr(transparent)]
			#[allow(non_camel_case_types)]
			pub struct $le([u8; ::core::mem::size_of::<$int>()]);

			impl $le {
				/// Retrieves a copy of the value in native byteorder.
				#[inline(always)]
				pub fn get(self) -> $int {
					$int::from_le_bytes(self.0)
				}
			}

			impl From<$int> for $le {
				#[inline(always)]
				fn from(value: $int) -> Self {
					Self(value.to_le_bytes())
				}
			}

			unsafe impl Cast for $le {}

			#[doc = concat!("A ", stringify!($int), " stored as big-endian bytes.")]
			#[derive(Clone, Copy, Default, PartialEq, Eq)]
			#[repr(transparent)]
			#[allow(non_camel_case_types)]
			pub struct $be([u8; ::core::mem::size_of::<$int>()]);

			impl $be {
				/// Retrieves a copy of the value in native byteorder.
				#[inline(always)]
				pub fn get(self) -> $int {
					$int::from_be_bytes(self.0)
				}
			}

			impl From<$int> for $be {
				#[inline(always)]
				fn from(value: $int) -> Self {
					Self(value.to_be_bytes())
				}
			}

			unsafe impl Cast for $be {}
		)*
	};
}

define_types!( u16(u16le u16be) u32(u32le u32be) u64(u64le u64be) );

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip() {
		assert_eq!(u16be::from(0x1234).get(), 0x1234);
		assert_eq!(u32le::from(0xdeadbeef).get(), 0xdeadbeef);
		assert_eq!(crate::bytes::as_slice(&u16be::from(0x1234)), &[0x12, 0x34]);
		assert_eq!(crate::bytes::as_slice(&u32le::from(1)), &[1, 0, 0, 0]);
	}
}
