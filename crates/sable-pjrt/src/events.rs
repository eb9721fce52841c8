use crate::{Api, Error, invoke_pjrt_api_error_fn, invoke_pjrt_api_void_fn};
use self::ffi::*;

/// A PJRT completion event. Buffer transfers and device executions report their completion
/// through these; awaiting an event blocks until the underlying operation finished and
/// surfaces any error it produced.
pub struct Event {
    api: Api,
    handle: *mut ffi::PJRT_Event,
}

impl Event {
    pub(crate) unsafe fn from_c_api(handle: *mut ffi::PJRT_Event, api: Api) -> Result<Self, Error> {
        if handle.is_null() {
            return Err(Error::invalid_argument("the provided PJRT event handle is a null pointer"));
        }
        Ok(Self { api, handle })
    }

    /// Whether the underlying operation has completed.
    pub fn is_ready(&self) -> Result<bool, Error> {
        invoke_pjrt_api_error_fn!(self.api, PJRT_Event_IsReady, { event = self.handle }, { is_ready })
    }

    /// Blocks until the underlying operation completes, consuming the event and returning the
    /// operation's error, if any.
    pub fn wait(self) -> Result<(), Error> {
        let result = invoke_pjrt_api_error_fn!(self.api, PJRT_Event_Await, { event = self.handle });
        // The event is destroyed by Drop.
        result
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let _ = invoke_pjrt_api_void_fn!(self.api, PJRT_Event_Destroy, { event = self.handle });
    }
}

unsafe impl Send for Event {}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use std::marker::{PhantomData, PhantomPinned};

    use crate::errors::ffi::PJRT_Error;
    use crate::ffi::PJRT_Extension_Base;

    #[repr(C)]
    pub struct PJRT_Event {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_Event_IsReady_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub event: *mut PJRT_Event,
        pub is_ready: bool,
    }

    impl PJRT_Event_IsReady_Args {
        pub fn new(event: *mut PJRT_Event) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), event, is_ready: false }
        }
    }

    pub type PJRT_Event_IsReady = unsafe extern "C" fn(args: *mut PJRT_Event_IsReady_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Event_Error_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub event: *mut PJRT_Event,
    }

    impl PJRT_Event_Error_Args {
        pub fn new(event: *mut PJRT_Event) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), event }
        }
    }

    pub type PJRT_Event_Error = unsafe extern "C" fn(args: *mut PJRT_Event_Error_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Event_Await_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub event: *mut PJRT_Event,
    }

    impl PJRT_Event_Await_Args {
        pub fn new(event: *mut PJRT_Event) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), event }
        }
    }

    pub type PJRT_Event_Await = unsafe extern "C" fn(args: *mut PJRT_Event_Await_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Event_Destroy_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub event: *mut PJRT_Event,
    }

    impl PJRT_Event_Destroy_Args {
        pub fn new(event: *mut PJRT_Event) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), event }
        }
    }

    pub type PJRT_Event_Destroy = unsafe extern "C" fn(args: *mut PJRT_Event_Destroy_Args);
}
