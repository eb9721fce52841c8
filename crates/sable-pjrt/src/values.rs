use std::fmt::Display;

use crate::arena::Arena;
use crate::{slice_from_c_api, str_from_c_api};

/// A constant value exchanged with the PJRT C API, e.g. as a client-creation option or a
/// plugin attribute.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub enum Value {
    Bool(bool),
    I64(i64),
    I64List(Vec<i64>),
    F32(f32),
    String(String),
}

impl Display for Value {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(formatter, "{value}"),
            Self::I64(value) => write!(formatter, "{value}"),
            Self::I64List(value) => write!(formatter, "{value:?}"),
            Self::F32(value) => write!(formatter, "{value}"),
            Self::String(value) => write!(formatter, "\"{value}\""),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Self::I64List(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A named [`Value`]. Client options are passed to plugins as arrays of these; unrecognized
/// keys are forwarded to the plugin unmodified.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

impl NamedValue {
    /// Creates a new [`NamedValue`].
    pub fn new<N: AsRef<str>, V: Into<Value>>(name: N, value: V) -> Self {
        Self { name: name.as_ref().to_string(), value: value.into() }
    }

    /// Constructs a [`NamedValue`] from a [`PJRT_NamedValue`](ffi::PJRT_NamedValue) that came
    /// from the PJRT C API.
    pub(crate) unsafe fn from_c_api(handle: &ffi::PJRT_NamedValue) -> Self {
        let value = match handle.value_type {
            ffi::PJRT_NamedValue_Type_kBool => unsafe { Value::Bool(handle.value.bool_value) },
            ffi::PJRT_NamedValue_Type_kInt64 => unsafe { Value::I64(handle.value.int64_value) },
            ffi::PJRT_NamedValue_Type_kInt64List => unsafe {
                Value::I64List(slice_from_c_api(handle.value.int64_array_value, handle.value_size).to_vec())
            },
            ffi::PJRT_NamedValue_Type_kFloat => unsafe { Value::F32(handle.value.float_value) },
            ffi::PJRT_NamedValue_Type_kString => unsafe {
                Value::String(
                    str_from_c_api(handle.value.string_value, handle.value_size).into_owned(),
                )
            },
            value_type => panic!("unsupported PJRT named-value type: {value_type}"),
        };
        Self { name: str_from_c_api(handle.name, handle.name_size).into_owned(), value }
    }

    /// Marshals this [`NamedValue`] into a [`PJRT_NamedValue`](ffi::PJRT_NamedValue) whose
    /// name and payload live in the provided [`Arena`], so the result stays valid for the
    /// duration of the call the arena backs.
    pub(crate) fn to_c_api(&self, arena: &Arena) -> ffi::PJRT_NamedValue {
        let name = arena.alloc_bytes(self.name.as_bytes()) as *const std::ffi::c_char;
        let name_size = self.name.len();
        let (value_type, value, value_size) = match &self.value {
            Value::Bool(value) => {
                (ffi::PJRT_NamedValue_Type_kBool, ffi::PJRT_Value { bool_value: *value }, 1)
            }
            Value::I64(value) => {
                (ffi::PJRT_NamedValue_Type_kInt64, ffi::PJRT_Value { int64_value: *value }, 1)
            }
            Value::I64List(values) => (
                ffi::PJRT_NamedValue_Type_kInt64List,
                ffi::PJRT_Value { int64_array_value: arena.alloc_copy(values) },
                values.len(),
            ),
            Value::F32(value) => {
                (ffi::PJRT_NamedValue_Type_kFloat, ffi::PJRT_Value { float_value: *value }, 1)
            }
            Value::String(value) => (
                ffi::PJRT_NamedValue_Type_kString,
                ffi::PJRT_Value {
                    string_value: arena.alloc_bytes(value.as_bytes()) as *const std::ffi::c_char,
                },
                value.len(),
            ),
        };
        ffi::PJRT_NamedValue {
            struct_size: size_of::<ffi::PJRT_NamedValue>(),
            extension_start: std::ptr::null_mut(),
            name,
            name_size,
            value_type,
            value,
            value_size,
        }
    }
}

impl Display for NamedValue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}: {}", self.name, self.value)
    }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use crate::ffi::PJRT_Extension_Base;

    pub type PJRT_NamedValue_Type = std::ffi::c_uint;
    pub const PJRT_NamedValue_Type_kString: PJRT_NamedValue_Type = 0;
    pub const PJRT_NamedValue_Type_kInt64: PJRT_NamedValue_Type = 1;
    pub const PJRT_NamedValue_Type_kInt64List: PJRT_NamedValue_Type = 2;
    pub const PJRT_NamedValue_Type_kFloat: PJRT_NamedValue_Type = 3;
    pub const PJRT_NamedValue_Type_kBool: PJRT_NamedValue_Type = 4;

    #[repr(C)]
    pub union PJRT_Value {
        pub string_value: *const std::ffi::c_char,
        pub int64_value: i64,
        pub int64_array_value: *const i64,
        pub float_value: f32,
        pub bool_value: bool,
    }

    #[repr(C)]
    pub struct PJRT_NamedValue {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub name: *const std::ffi::c_char,
        pub name_size: usize,
        pub value_type: PJRT_NamedValue_Type,
        pub value: PJRT_Value,
        pub value_size: usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::I64(42)), "42");
        assert_eq!(format!("{}", Value::I64List(vec![1, 2, 3])), "[1, 2, 3]");
        assert_eq!(format!("{}", Value::F32(3.5)), "3.5");
        assert_eq!(format!("{}", Value::String("hello".into())), "\"hello\"");
        assert_eq!(format!("{}", NamedValue::new("key", 7i64)), "key: 7");
    }

    #[test]
    fn test_named_value_round_trip() {
        let arena = Arena::new(4096);
        let values = [
            NamedValue::new("boolean", true),
            NamedValue::new("integer", 42i64),
            NamedValue::new("list", vec![1i64, 2, 3]),
            NamedValue::new("real", 0.5f32),
            NamedValue::new("string", "hello"),
        ];
        for value in &values {
            let marshalled = value.to_c_api(&arena);
            let round_tripped = unsafe { NamedValue::from_c_api(&marshalled) };
            assert_eq!(&round_tripped, value);
        }
    }
}
