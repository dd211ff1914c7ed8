//! Text-format parameter encoding.
//!
//! Every parameter is sent in text format and its type is inferred by the
//! server from the statement. Each value is written as a length-prefixed
//! buffer, or length -1 for SQL NULL.

use std::io::Write;

use crate::protocol::codec::{write_i32, write_len_bytes};

/// Trait for encoding a Rust value as one text-format parameter.
pub trait ToWireValue {
    /// Append the length-prefixed text form (or -1 for NULL).
    fn to_text(&self, buf: &mut Vec<u8>);
}

/// Trait for encoding a whole parameter list.
pub trait ToParams {
    /// Number of parameters.
    fn param_count(&self) -> usize;

    /// Encode all parameters to the buffer, in order.
    fn to_text(&self, buf: &mut Vec<u8>);
}

/// Write a value through its `Display` form, patching the length afterwards.
fn write_display(buf: &mut Vec<u8>, value: impl std::fmt::Display) {
    let start = buf.len();
    write_i32(buf, 0);
    // Writing into a Vec cannot fail.
    let _ = write!(buf, "{value}");
    let len = (buf.len() - start - 4) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
}

// === Scalars ===

impl ToWireValue for str {
    fn to_text(&self, buf: &mut Vec<u8>) {
        write_len_bytes(buf, Some(self.as_bytes()));
    }
}

impl ToWireValue for String {
    fn to_text(&self, buf: &mut Vec<u8>) {
        self.as_str().to_text(buf);
    }
}

impl ToWireValue for bool {
    fn to_text(&self, buf: &mut Vec<u8>) {
        let text: &[u8] = if *self { b"t" } else { b"f" };
        write_len_bytes(buf, Some(text));
    }
}

impl ToWireValue for char {
    fn to_text(&self, buf: &mut Vec<u8>) {
        let mut tmp = [0u8; 4];
        self.encode_utf8(&mut tmp).to_text(buf);
    }
}

macro_rules! impl_display_value {
    ($($t:ty),+) => {
        $(
            impl ToWireValue for $t {
                fn to_text(&self, buf: &mut Vec<u8>) {
                    write_display(buf, self);
                }
            }
        )+
    };
}

impl_display_value!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! impl_float_value {
    ($($t:ty),+) => {
        $(
            impl ToWireValue for $t {
                fn to_text(&self, buf: &mut Vec<u8>) {
                    if self.is_nan() {
                        write_len_bytes(buf, Some(b"NaN"));
                    } else if self.is_infinite() {
                        let text: &[u8] = if *self > 0.0 { b"Infinity" } else { b"-Infinity" };
                        write_len_bytes(buf, Some(text));
                    } else {
                        write_display(buf, self);
                    }
                }
            }
        )+
    };
}

impl_float_value!(f32, f64);

// === Option<T> - NULL handling ===

impl<T: ToWireValue> ToWireValue for Option<T> {
    fn to_text(&self, buf: &mut Vec<u8>) {
        match self {
            Some(v) => v.to_text(buf),
            None => write_len_bytes(buf, None),
        }
    }
}

// === Reference support ===

impl<T: ToWireValue + ?Sized> ToWireValue for &T {
    fn to_text(&self, buf: &mut Vec<u8>) {
        (*self).to_text(buf);
    }
}

// === ToParams implementations ===

impl ToParams for () {
    fn param_count(&self) -> usize {
        0
    }

    fn to_text(&self, _buf: &mut Vec<u8>) {}
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn param_count(&self) -> usize {
        (*self).param_count()
    }

    fn to_text(&self, buf: &mut Vec<u8>) {
        (*self).to_text(buf);
    }
}

impl<T: ToWireValue> ToParams for [T] {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn to_text(&self, buf: &mut Vec<u8>) {
        for value in self {
            value.to_text(buf);
        }
    }
}

impl<T: ToWireValue> ToParams for Vec<T> {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn to_text(&self, buf: &mut Vec<u8>) {
        self.as_slice().to_text(buf);
    }
}

impl<T: ToWireValue, const N: usize> ToParams for [T; N] {
    fn param_count(&self) -> usize {
        N
    }

    fn to_text(&self, buf: &mut Vec<u8>) {
        self.as_slice().to_text(buf);
    }
}

// Tuple implementations via macro
macro_rules! impl_to_params {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToWireValue),+> ToParams for ($($T,)+) {
            fn param_count(&self) -> usize {
                $count
            }

            fn to_text(&self, buf: &mut Vec<u8>) {
                $(self.$idx.to_text(buf);)+
            }
        }
    };
}

impl_to_params!(1, 0: T0);
impl_to_params!(2, 0: T0, 1: T1);
impl_to_params!(3, 0: T0, 1: T1, 2: T2);
impl_to_params!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);
