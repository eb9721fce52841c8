use std::backtrace::Backtrace;

use thiserror::Error;

use crate::{Api, invoke_pjrt_api_error_fn, invoke_pjrt_api_void_fn, str_from_c_api};

/// Errors surfaced by the PJRT bridge. The status-code family mirrors the
/// [Abseil status codes](https://abseil.io/docs/cpp/guides/status-codes) PJRT uses internally
/// and is produced whenever a plugin call returns a non-zero status; the remaining variants
/// cover the bridge's own failure modes (plugin resolution and loading, use of destroyed
/// handles, and the installation file lock).
///
/// Each variant captures the call stack at creation as a [`String`] (a [`Backtrace`] field
/// would require unstable Rust).
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    #[error("no PJRT plugin named '{name}' found in {searched:?}; set PJRT_PLUGIN_LIBRARY_PATH to the directory containing the plugin")]
    PluginNotFound { name: String, searched: Vec<String>, backtrace: String },

    #[error("error while loading a PJRT plugin from '{path}': {error}")]
    PluginLoad { path: String, error: String, backtrace: String },

    #[error("use of a destroyed {kind} handle")]
    HandleInvalid { kind: String, backtrace: String },

    #[error("timed out waiting for the installation lock '{path}': either a slow installation is in progress or the lock file is stale and must be removed manually")]
    LockTimeout { path: String, backtrace: String },

    #[error("{message}")]
    Cancelled { message: String, backtrace: String },

    #[error("{message}")]
    Unknown { message: String, backtrace: String },

    #[error("{message}")]
    InvalidArgument { message: String, backtrace: String },

    #[error("{message}")]
    DeadlineExceeded { message: String, backtrace: String },

    #[error("{message}")]
    NotFound { message: String, backtrace: String },

    #[error("{message}")]
    AlreadyExists { message: String, backtrace: String },

    #[error("{message}")]
    PermissionDenied { message: String, backtrace: String },

    #[error("{message}")]
    ResourceExhausted { message: String, backtrace: String },

    #[error("{message}")]
    FailedPrecondition { message: String, backtrace: String },

    #[error("{message}")]
    Aborted { message: String, backtrace: String },

    #[error("{message}")]
    OutOfRange { message: String, backtrace: String },

    #[error("{message}")]
    Unimplemented { message: String, backtrace: String },

    #[error("{message}")]
    Internal { message: String, backtrace: String },

    #[error("{message}")]
    Unavailable { message: String, backtrace: String },

    #[error("{message}")]
    DataLoss { message: String, backtrace: String },

    #[error("{message}")]
    Unauthenticated { message: String, backtrace: String },
}

macro_rules! status_constructors {
    ($(($fn:ident, $variant:ident)),* $(,)?) => {
        impl Error {
            $(
                #[doc = concat!("Creates a new [`Error::", stringify!($variant), "`].")]
                pub fn $fn<M: Into<String>>(message: M) -> Self {
                    Self::$variant { message: message.into(), backtrace: Backtrace::capture().to_string() }
                }
            )*
        }
    };
}

status_constructors!(
    (cancelled, Cancelled),
    (unknown, Unknown),
    (invalid_argument, InvalidArgument),
    (deadline_exceeded, DeadlineExceeded),
    (not_found, NotFound),
    (already_exists, AlreadyExists),
    (permission_denied, PermissionDenied),
    (resource_exhausted, ResourceExhausted),
    (failed_precondition, FailedPrecondition),
    (aborted, Aborted),
    (out_of_range, OutOfRange),
    (unimplemented, Unimplemented),
    (internal, Internal),
    (unavailable, Unavailable),
    (data_loss, DataLoss),
    (unauthenticated, Unauthenticated),
);

impl Error {
    /// Creates a new [`Error::PluginNotFound`].
    pub fn plugin_not_found<N: Into<String>>(name: N, searched: Vec<String>) -> Self {
        Self::PluginNotFound {
            name: name.into(),
            searched,
            backtrace: Backtrace::capture().to_string(),
        }
    }

    /// Creates a new [`Error::PluginLoad`].
    pub fn plugin_load<P: Into<String>, E: Into<String>>(path: P, error: E) -> Self {
        Self::PluginLoad {
            path: path.into(),
            error: error.into(),
            backtrace: Backtrace::capture().to_string(),
        }
    }

    /// Creates a new [`Error::HandleInvalid`].
    pub fn handle_invalid<K: Into<String>>(kind: K) -> Self {
        Self::HandleInvalid { kind: kind.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Creates a new [`Error::LockTimeout`].
    pub fn lock_timeout<P: Into<String>>(path: P) -> Self {
        Self::LockTimeout { path: path.into(), backtrace: Backtrace::capture().to_string() }
    }

    /// Converts a [`PJRT_Error`](ffi::PJRT_Error) handle returned by a plugin call into an
    /// [`Error`], destroying the underlying PJRT error object. Returns [`None`] when the
    /// status code signals success.
    #[allow(non_upper_case_globals)]
    pub(crate) unsafe fn from_c_api(handle: *const ffi::PJRT_Error, api: Api) -> Result<Option<Self>, Self> {
        use ffi::*;

        if handle.is_null() {
            return Ok(None);
        }

        // Make sure the underlying PJRT error is destroyed before this function returns.
        let destroy_error = || invoke_pjrt_api_void_fn!(api, PJRT_Error_Destroy, { error = handle as *mut _ });
        let message = invoke_pjrt_api_void_fn!(api, PJRT_Error_Message, { error = handle }, { message, message_size });
        let (message, message_size) = message.inspect_err(|_: &Self| drop::<Result<(), Self>>(destroy_error()))?;
        let message = str_from_c_api(message, message_size).into_owned();
        let code = invoke_pjrt_api_error_fn!(api, PJRT_Error_GetCode, { error = handle }, { code });
        let error = match code.inspect_err(|_| drop(destroy_error()))? {
            PJRT_Error_Code_OK => {
                destroy_error()?;
                return Ok(None);
            }
            PJRT_Error_Code_CANCELLED => Self::cancelled(message),
            PJRT_Error_Code_UNKNOWN => Self::unknown(message),
            PJRT_Error_Code_INVALID_ARGUMENT => Self::invalid_argument(message),
            PJRT_Error_Code_DEADLINE_EXCEEDED => Self::deadline_exceeded(message),
            PJRT_Error_Code_NOT_FOUND => Self::not_found(message),
            PJRT_Error_Code_ALREADY_EXISTS => Self::already_exists(message),
            PJRT_Error_Code_PERMISSION_DENIED => Self::permission_denied(message),
            PJRT_Error_Code_RESOURCE_EXHAUSTED => Self::resource_exhausted(message),
            PJRT_Error_Code_FAILED_PRECONDITION => Self::failed_precondition(message),
            PJRT_Error_Code_ABORTED => Self::aborted(message),
            PJRT_Error_Code_OUT_OF_RANGE => Self::out_of_range(message),
            PJRT_Error_Code_UNIMPLEMENTED => Self::unimplemented(message),
            PJRT_Error_Code_INTERNAL => Self::internal(message),
            PJRT_Error_Code_UNAVAILABLE => Self::unavailable(message),
            PJRT_Error_Code_DATA_LOSS => Self::data_loss(message),
            PJRT_Error_Code_UNAUTHENTICATED => Self::unauthenticated(message),
            code => Self::unknown(format!("unrecognized PJRT status code {code}: {message}")),
        };
        destroy_error()?;
        Ok(Some(error))
    }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use std::marker::{PhantomData, PhantomPinned};

    use crate::ffi::PJRT_Extension_Base;

    // Opaque C types follow the convention suggested in the Rustonomicon for representing
    // opaque structs.
    #[repr(C)]
    pub struct PJRT_Error {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_Error_Message_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub error: *const PJRT_Error,
        pub message: *const std::ffi::c_char,
        pub message_size: usize,
    }

    impl PJRT_Error_Message_Args {
        pub fn new(error: *const PJRT_Error) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                error,
                message: std::ptr::null_mut(),
                message_size: 0,
            }
        }
    }

    pub type PJRT_Error_Message = unsafe extern "C" fn(args: *mut PJRT_Error_Message_Args);

    pub type PJRT_Error_Code = std::ffi::c_uint;
    pub const PJRT_Error_Code_OK: PJRT_Error_Code = 0;
    pub const PJRT_Error_Code_CANCELLED: PJRT_Error_Code = 1;
    pub const PJRT_Error_Code_UNKNOWN: PJRT_Error_Code = 2;
    pub const PJRT_Error_Code_INVALID_ARGUMENT: PJRT_Error_Code = 3;
    pub const PJRT_Error_Code_DEADLINE_EXCEEDED: PJRT_Error_Code = 4;
    pub const PJRT_Error_Code_NOT_FOUND: PJRT_Error_Code = 5;
    pub const PJRT_Error_Code_ALREADY_EXISTS: PJRT_Error_Code = 6;
    pub const PJRT_Error_Code_PERMISSION_DENIED: PJRT_Error_Code = 7;
    pub const PJRT_Error_Code_RESOURCE_EXHAUSTED: PJRT_Error_Code = 8;
    pub const PJRT_Error_Code_FAILED_PRECONDITION: PJRT_Error_Code = 9;
    pub const PJRT_Error_Code_ABORTED: PJRT_Error_Code = 10;
    pub const PJRT_Error_Code_OUT_OF_RANGE: PJRT_Error_Code = 11;
    pub const PJRT_Error_Code_UNIMPLEMENTED: PJRT_Error_Code = 12;
    pub const PJRT_Error_Code_INTERNAL: PJRT_Error_Code = 13;
    pub const PJRT_Error_Code_UNAVAILABLE: PJRT_Error_Code = 14;
    pub const PJRT_Error_Code_DATA_LOSS: PJRT_Error_Code = 15;
    pub const PJRT_Error_Code_UNAUTHENTICATED: PJRT_Error_Code = 16;

    #[repr(C)]
    pub struct PJRT_Error_GetCode_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub error: *const PJRT_Error,
        pub code: PJRT_Error_Code,
    }

    impl PJRT_Error_GetCode_Args {
        pub fn new(error: *const PJRT_Error) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), error, code: 0 }
        }
    }

    pub type PJRT_Error_GetCode = unsafe extern "C" fn(args: *mut PJRT_Error_GetCode_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Error_Destroy_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub error: *mut PJRT_Error,
    }

    impl PJRT_Error_Destroy_Args {
        pub fn new(error: *mut PJRT_Error) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), error }
        }
    }

    pub type PJRT_Error_Destroy = unsafe extern "C" fn(args: *mut PJRT_Error_Destroy_Args);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::invalid_argument("bad input");
        assert_eq!(format!("{error}"), "bad input");

        let error = Error::plugin_load("/path/to/plugin.so", "symbol missing");
        assert_eq!(
            format!("{error}"),
            "error while loading a PJRT plugin from '/path/to/plugin.so': symbol missing"
        );

        let error = Error::handle_invalid("buffer");
        assert_eq!(format!("{error}"), "use of a destroyed buffer handle");

        let error = Error::plugin_not_found("tpu", vec!["/usr/local/lib/sable".to_string()]);
        assert!(format!("{error}").contains("no PJRT plugin named 'tpu'"));
        assert!(format!("{error}").contains("PJRT_PLUGIN_LIBRARY_PATH"));
    }

    #[test]
    fn test_error_equality_ignores_backtrace_only_in_identical_cases() {
        // Two errors built at different call sites carry different backtraces, so equality is
        // only guaranteed for clones.
        let error = Error::unimplemented("missing");
        assert_eq!(error, error.clone());
        assert_ne!(Error::unimplemented("a"), Error::internal("a"));
    }
}
