/// Define an enumeration with known variants and an unknown representation.
///
/// Protocol fields rarely standardize every bit pattern; unassigned values
/// still need to round-trip through parsing and emission. This generates the
/// enum together with lossless conversions from and to the underlying
/// integer type, mapping unassigned values to an `Unknown` variant.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// A value whose interpretation was not determined.
            Unknown($ty),
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other),
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other,
                }
            }
        }
    }
}

/// Declare a dynamically sized byte wrapper.
///
/// The wrapper is a transparent view over a `[u8]` so that field accessors
/// can be defined on a type instead of loose offsets, without copying the
/// buffer. Two private conversion methods are generated:
/// `__from_macro_new_unchecked` and `__from_macro_new_unchecked_mut`.
macro_rules! byte_wrapper {
    (
        $( #[$attr:meta] )*
        pub struct $name:ident([u8]);
    ) => {
        #[allow(non_camel_case_types)]
        #[repr(transparent)]
        $( #[$attr] )*
        pub struct $name([u8]);

        impl $name {
            #[allow(dead_code)]
            fn __from_macro_new_unchecked(data: &[u8]) -> &Self {
                // SAFETY: repr(transparent) over [u8].
                unsafe { &*(data as *const _ as *const Self) }
            }

            #[allow(dead_code)]
            fn __from_macro_new_unchecked_mut(data: &mut [u8]) -> &mut Self {
                // SAFETY: repr(transparent) over [u8].
                unsafe { &mut *(data as *mut _ as *mut Self) }
            }
        }
    }
}
