use crate::{Api, Error, invoke_pjrt_api_error_fn, str_from_c_api};
use self::ffi::*;

/// Read-only metadata about one device of a [`Client`](crate::Client): its global and local
/// ids, addressability from this process, and human-readable descriptions. Devices are owned
/// by their client and enumerated when the client is created.
#[derive(Clone)]
pub struct Device {
    handle: *mut ffi::PJRT_Device,
    id: i32,
    local_hardware_id: i32,
    process_index: i32,
    addressable: bool,
    kind: String,
    debug_string: String,
}

impl Device {
    pub(crate) unsafe fn from_c_api(handle: *mut ffi::PJRT_Device, api: Api) -> Result<Self, Error> {
        if handle.is_null() {
            return Err(Error::invalid_argument("the provided PJRT device handle is a null pointer"));
        }
        let addressable =
            invoke_pjrt_api_error_fn!(api, PJRT_Device_IsAddressable, { device = handle }, { is_addressable })?;
        let local_hardware_id =
            invoke_pjrt_api_error_fn!(api, PJRT_Device_LocalHardwareId, { device = handle }, { local_hardware_id })?;
        let description =
            invoke_pjrt_api_error_fn!(api, PJRT_Device_GetDescription, { device = handle }, { device_description })?;
        let id = invoke_pjrt_api_error_fn!(
            api,
            PJRT_DeviceDescription_Id,
            { device_description = description },
            { id }
        )?;
        let process_index = invoke_pjrt_api_error_fn!(
            api,
            PJRT_DeviceDescription_ProcessIndex,
            { device_description = description },
            { process_index }
        )?;
        let kind = invoke_pjrt_api_error_fn!(
            api,
            PJRT_DeviceDescription_Kind,
            { device_description = description },
            { device_kind, device_kind_size }
        )?;
        let kind = str_from_c_api(kind.0, kind.1).into_owned();
        let debug_string = invoke_pjrt_api_error_fn!(
            api,
            PJRT_DeviceDescription_DebugString,
            { device_description = description },
            { debug_string, debug_string_size }
        )?;
        let debug_string = str_from_c_api(debug_string.0, debug_string.1).into_owned();
        Ok(Self { handle, id, local_hardware_id, process_index, addressable, kind, debug_string })
    }

    pub(crate) unsafe fn to_c_api(&self) -> *mut ffi::PJRT_Device {
        self.handle
    }

    /// Global id of this device, unique across all processes sharing the platform.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Local hardware ordinal, e.g. the CUDA device ordinal.
    pub fn local_hardware_id(&self) -> i32 {
        self.local_hardware_id
    }

    /// Index of the process this device belongs to.
    pub fn process_index(&self) -> i32 {
        self.process_index
    }

    /// Whether this process can issue work to the device.
    pub fn is_addressable(&self) -> bool {
        self.addressable
    }

    /// Device kind, e.g. `"cpu"` or `"Tesla V100-SXM2-16GB"`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Verbose, platform-specific description useful in error messages.
    pub fn debug_string(&self) -> &str {
        &self.debug_string
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Device")
            .field("id", &self.id)
            .field("local_hardware_id", &self.local_hardware_id)
            .field("process_index", &self.process_index)
            .field("addressable", &self.addressable)
            .field("kind", &self.kind)
            .finish()
    }
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use std::marker::{PhantomData, PhantomPinned};

    use crate::errors::ffi::PJRT_Error;
    use crate::ffi::PJRT_Extension_Base;

    #[repr(C)]
    pub struct PJRT_Device {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_DeviceDescription {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_Device_GetDescription_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device: *mut PJRT_Device,
        pub device_description: *mut PJRT_DeviceDescription,
    }

    impl PJRT_Device_GetDescription_Args {
        pub fn new(device: *mut PJRT_Device) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device,
                device_description: std::ptr::null_mut(),
            }
        }
    }

    pub type PJRT_Device_GetDescription =
        unsafe extern "C" fn(args: *mut PJRT_Device_GetDescription_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Device_IsAddressable_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device: *mut PJRT_Device,
        pub is_addressable: bool,
    }

    impl PJRT_Device_IsAddressable_Args {
        pub fn new(device: *mut PJRT_Device) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device,
                is_addressable: false,
            }
        }
    }

    pub type PJRT_Device_IsAddressable =
        unsafe extern "C" fn(args: *mut PJRT_Device_IsAddressable_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Device_LocalHardwareId_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device: *mut PJRT_Device,
        pub local_hardware_id: std::ffi::c_int,
    }

    impl PJRT_Device_LocalHardwareId_Args {
        pub fn new(device: *mut PJRT_Device) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device,
                local_hardware_id: 0,
            }
        }
    }

    pub type PJRT_Device_LocalHardwareId =
        unsafe extern "C" fn(args: *mut PJRT_Device_LocalHardwareId_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_DeviceDescription_Id_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device_description: *mut PJRT_DeviceDescription,
        pub id: std::ffi::c_int,
    }

    impl PJRT_DeviceDescription_Id_Args {
        pub fn new(device_description: *mut PJRT_DeviceDescription) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), device_description, id: 0 }
        }
    }

    pub type PJRT_DeviceDescription_Id =
        unsafe extern "C" fn(args: *mut PJRT_DeviceDescription_Id_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_DeviceDescription_ProcessIndex_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device_description: *mut PJRT_DeviceDescription,
        pub process_index: std::ffi::c_int,
    }

    impl PJRT_DeviceDescription_ProcessIndex_Args {
        pub fn new(device_description: *mut PJRT_DeviceDescription) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device_description,
                process_index: 0,
            }
        }
    }

    pub type PJRT_DeviceDescription_ProcessIndex =
        unsafe extern "C" fn(args: *mut PJRT_DeviceDescription_ProcessIndex_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_DeviceDescription_Kind_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device_description: *mut PJRT_DeviceDescription,
        pub device_kind: *const std::ffi::c_char,
        pub device_kind_size: usize,
    }

    impl PJRT_DeviceDescription_Kind_Args {
        pub fn new(device_description: *mut PJRT_DeviceDescription) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device_description,
                device_kind: std::ptr::null(),
                device_kind_size: 0,
            }
        }
    }

    pub type PJRT_DeviceDescription_Kind =
        unsafe extern "C" fn(args: *mut PJRT_DeviceDescription_Kind_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_DeviceDescription_DebugString_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device_description: *mut PJRT_DeviceDescription,
        pub debug_string: *const std::ffi::c_char,
        pub debug_string_size: usize,
    }

    impl PJRT_DeviceDescription_DebugString_Args {
        pub fn new(device_description: *mut PJRT_DeviceDescription) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device_description,
                debug_string: std::ptr::null(),
                debug_string_size: 0,
            }
        }
    }

    pub type PJRT_DeviceDescription_DebugString =
        unsafe extern "C" fn(args: *mut PJRT_DeviceDescription_DebugString_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_DeviceDescription_ToString_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub device_description: *mut PJRT_DeviceDescription,
        pub to_string: *const std::ffi::c_char,
        pub to_string_size: usize,
    }

    impl PJRT_DeviceDescription_ToString_Args {
        pub fn new(device_description: *mut PJRT_DeviceDescription) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                device_description,
                to_string: std::ptr::null(),
                to_string_size: 0,
            }
        }
    }

    pub type PJRT_DeviceDescription_ToString =
        unsafe extern "C" fn(args: *mut PJRT_DeviceDescription_ToString_Args) -> *mut PJRT_Error;
}
