//! Safe wrapper over the PJRT C ABI: dynamic plugin discovery and loading, client, device,
//! executable, and buffer lifecycles, and a pre-allocated bump-arena pool used to marshal call
//! arguments across the FFI boundary without per-call heap churn.
//!
//! Programs are handed to a plugin either as StableHLO MLIR text (typically produced by
//! `sable-hlo`) or as opaque HLO protobuf bytes.

#![allow(clippy::missing_safety_doc)]

use std::borrow::Cow;

pub mod arena;
pub mod buffers;
pub mod clients;
pub mod devices;
pub mod errors;
pub mod events;
pub mod executables;
pub mod install;
pub mod plugins;
pub mod protos;
pub mod values;

pub use arena::{Arena, ArenaPools};
pub use buffers::{BUFFER_ALIGNMENT, Buffer, BufferElement, BufferType, SharedHostBuffer};
pub use clients::{Client, CompilationBuilder};
pub use devices::Device;
pub use errors::Error;
pub use events::Event;
pub use executables::{ExecutionBuilder, LoadedExecutable};
pub use install::{InstallLock, InstallLockStatus, acquire_install_lock};
pub use plugins::{Plugin, available_plugins, free_all, get_plugin};
pub use values::{NamedValue, Value};

pub(crate) mod macros;

pub(crate) use macros::{invoke_pjrt_api_error_fn, invoke_pjrt_api_fn_helper, invoke_pjrt_api_void_fn};

/// PJRT API version pair reported by a loaded plugin.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: usize,
    pub minor: usize,
}

impl std::fmt::Display for Version {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}.{}", self.major, self.minor)
    }
}

/// Wrapper of a [`PJRT_Api`](ffi::PJRT_Api) handle that can be used to interact with the PJRT
/// C API. Plugins are immutable after load, so this handle is freely copyable and shareable.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Api {
    /// Handle that represents this [`Api`] in the PJRT C API.
    handle: *const ffi::PJRT_Api,
}

impl Api {
    /// Constructs a new [`Api`] from the provided [`PJRT_Api`](ffi::PJRT_Api) handle that came
    /// from a plugin's `GetPjrtApi` entry point.
    pub(crate) unsafe fn from_c_api(handle: *const ffi::PJRT_Api) -> Result<Self, Error> {
        if handle.is_null() {
            Err(Error::plugin_load("<unknown>", "the plugin returned a null PJRT API handle"))
        } else {
            Ok(Self { handle })
        }
    }

    /// Returns the [`PJRT_Api`](ffi::PJRT_Api) handle for passing to PJRT C API functions.
    pub(crate) unsafe fn to_c_api(&self) -> *const ffi::PJRT_Api {
        self.handle
    }

    /// Returns the underlying PJRT [`Api`]. Helper used by the invocation macros so the same
    /// macros work for any type that can produce an [`Api`].
    pub(crate) fn api(&self) -> Api {
        *self
    }

    /// Returns the PJRT version that this [`Api`] supports.
    pub(crate) fn version(&self) -> Version {
        let handle = unsafe { &(*self.to_c_api()).pjrt_api_version };
        Version { major: handle.major_version as usize, minor: handle.minor_version as usize }
    }
}

unsafe impl Send for Api {}
unsafe impl Sync for Api {}

/// Returns an [`str`] representation for the provided C string. The returned value is a
/// [`Cow`] because a copy is only made when UTF-8 sanitization requires one.
pub(crate) fn str_from_c_api<'a>(ptr: *const std::ffi::c_char, size: usize) -> Cow<'a, str> {
    String::from_utf8_lossy(unsafe { slice_from_c_api(ptr as *const u8, size) })
}

/// Returns a slice from a C API pointer and size pair, treating null pointers and zero sizes
/// as empty slices ([`std::slice::from_raw_parts`] is undefined for those).
pub(crate) unsafe fn slice_from_c_api<'a, T>(ptr: *const T, size: usize) -> &'a [T] {
    if ptr.is_null() || size == 0 { &[] } else { unsafe { std::slice::from_raw_parts(ptr, size) } }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use crate::buffers::ffi::*;
    use crate::clients::ffi::*;
    use crate::devices::ffi::*;
    use crate::errors::ffi::*;
    use crate::events::ffi::*;
    use crate::executables::ffi::*;
    use crate::plugins::ffi::*;

    /// PJRT extension base type; extensions are identified and chained through this header.
    #[repr(C)]
    pub struct PJRT_Extension_Base {
        pub struct_size: usize,
        pub extension_type: std::ffi::c_uint,
        pub next: *mut PJRT_Extension_Base,
    }

    #[repr(C)]
    pub struct PJRT_Api_Version {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub major_version: std::ffi::c_int,
        pub minor_version: std::ffi::c_int,
    }

    /// Function-pointer slot for PJRT entry points this crate never calls. Every function
    /// pointer has the same representation, so these slots only exist to keep the field
    /// offsets identical to `pjrt_c_api.h`.
    pub type PJRT_UnusedFn = unsafe extern "C" fn();

    #[repr(C)]
    pub struct PJRT_Api {
        // Callers must use `struct_size` to guard access to fields added after the plugin
        // version they are interacting with was released.
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub pjrt_api_version: PJRT_Api_Version,

        pub PJRT_Error_Destroy: Option<PJRT_Error_Destroy>,
        pub PJRT_Error_Message: Option<PJRT_Error_Message>,
        pub PJRT_Error_GetCode: Option<PJRT_Error_GetCode>,

        pub PJRT_Plugin_Initialize: Option<PJRT_Plugin_Initialize>,
        pub PJRT_Plugin_Attributes: Option<PJRT_UnusedFn>,

        pub PJRT_Event_Destroy: Option<PJRT_Event_Destroy>,
        pub PJRT_Event_IsReady: Option<PJRT_Event_IsReady>,
        pub PJRT_Event_Error: Option<PJRT_Event_Error>,
        pub PJRT_Event_Await: Option<PJRT_Event_Await>,
        pub PJRT_Event_OnReady: Option<PJRT_UnusedFn>,

        pub PJRT_Client_Create: Option<PJRT_Client_Create>,
        pub PJRT_Client_Destroy: Option<PJRT_Client_Destroy>,
        pub PJRT_Client_PlatformName: Option<PJRT_Client_PlatformName>,
        pub PJRT_Client_ProcessIndex: Option<PJRT_UnusedFn>,
        pub PJRT_Client_PlatformVersion: Option<PJRT_Client_PlatformVersion>,
        pub PJRT_Client_Devices: Option<PJRT_Client_Devices>,
        pub PJRT_Client_AddressableDevices: Option<PJRT_Client_AddressableDevices>,
        pub PJRT_Client_LookupDevice: Option<PJRT_UnusedFn>,
        pub PJRT_Client_LookupAddressableDevice: Option<PJRT_UnusedFn>,
        pub PJRT_Client_AddressableMemories: Option<PJRT_UnusedFn>,
        pub PJRT_Client_Compile: Option<PJRT_Client_Compile>,
        pub PJRT_Client_DefaultDeviceAssignment: Option<PJRT_UnusedFn>,
        pub PJRT_Client_BufferFromHostBuffer: Option<PJRT_Client_BufferFromHostBuffer>,

        pub PJRT_DeviceDescription_Id: Option<PJRT_DeviceDescription_Id>,
        pub PJRT_DeviceDescription_ProcessIndex: Option<PJRT_DeviceDescription_ProcessIndex>,
        pub PJRT_DeviceDescription_Attributes: Option<PJRT_UnusedFn>,
        pub PJRT_DeviceDescription_Kind: Option<PJRT_DeviceDescription_Kind>,
        pub PJRT_DeviceDescription_DebugString: Option<PJRT_DeviceDescription_DebugString>,
        pub PJRT_DeviceDescription_ToString: Option<PJRT_DeviceDescription_ToString>,

        pub PJRT_Device_GetDescription: Option<PJRT_Device_GetDescription>,
        pub PJRT_Device_IsAddressable: Option<PJRT_Device_IsAddressable>,
        pub PJRT_Device_LocalHardwareId: Option<PJRT_Device_LocalHardwareId>,
        pub PJRT_Device_AddressableMemories: Option<PJRT_UnusedFn>,
        pub PJRT_Device_DefaultMemory: Option<PJRT_UnusedFn>,
        pub PJRT_Device_MemoryStats: Option<PJRT_UnusedFn>,

        pub PJRT_Memory_Id: Option<PJRT_UnusedFn>,
        pub PJRT_Memory_Kind: Option<PJRT_UnusedFn>,
        pub PJRT_Memory_DebugString: Option<PJRT_UnusedFn>,
        pub PJRT_Memory_ToString: Option<PJRT_UnusedFn>,
        pub PJRT_Memory_AddressableByDevices: Option<PJRT_UnusedFn>,

        pub PJRT_Executable_Destroy: Option<PJRT_Executable_Destroy>,
        pub PJRT_Executable_Name: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_NumReplicas: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_NumPartitions: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_NumOutputs: Option<PJRT_Executable_NumOutputs>,
        pub PJRT_Executable_SizeOfGeneratedCodeInBytes: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_GetCostAnalysis: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_OutputMemoryKinds: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_OptimizedProgram: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_Serialize: Option<PJRT_UnusedFn>,

        pub PJRT_LoadedExecutable_Destroy: Option<PJRT_LoadedExecutable_Destroy>,
        pub PJRT_LoadedExecutable_GetExecutable: Option<PJRT_LoadedExecutable_GetExecutable>,
        pub PJRT_LoadedExecutable_AddressableDevices: Option<PJRT_LoadedExecutable_AddressableDevices>,
        pub PJRT_LoadedExecutable_Delete: Option<PJRT_UnusedFn>,
        pub PJRT_LoadedExecutable_IsDeleted: Option<PJRT_UnusedFn>,
        pub PJRT_LoadedExecutable_Execute: Option<PJRT_LoadedExecutable_Execute>,
        pub PJRT_Executable_DeserializeAndLoad: Option<PJRT_UnusedFn>,
        pub PJRT_LoadedExecutable_Fingerprint: Option<PJRT_UnusedFn>,

        pub PJRT_Buffer_Destroy: Option<PJRT_Buffer_Destroy>,
        pub PJRT_Buffer_ElementType: Option<PJRT_Buffer_ElementType>,
        pub PJRT_Buffer_Dimensions: Option<PJRT_Buffer_Dimensions>,
        pub PJRT_Buffer_UnpaddedDimensions: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_DynamicDimensionIndices: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_GetMemoryLayout: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_OnDeviceSizeInBytes: Option<PJRT_Buffer_OnDeviceSizeInBytes>,
        pub PJRT_Buffer_Device: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_Memory: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_Delete: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_IsDeleted: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_CopyToDevice: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_ToHostBuffer: Option<PJRT_Buffer_ToHostBuffer>,
        pub PJRT_Buffer_IsOnCpu: Option<PJRT_Buffer_IsOnCpu>,
        pub PJRT_Buffer_ReadyEvent: Option<PJRT_Buffer_ReadyEvent>,
        pub PJRT_Buffer_UnsafePointer: Option<PJRT_Buffer_UnsafePointer>,
        pub PJRT_Buffer_IncreaseExternalReferenceCount: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_DecreaseExternalReferenceCount: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_OpaqueDeviceMemoryDataPointer: Option<PJRT_UnusedFn>,

        pub PJRT_CopyToDeviceStream_Destroy: Option<PJRT_UnusedFn>,
        pub PJRT_CopyToDeviceStream_AddChunk: Option<PJRT_UnusedFn>,
        pub PJRT_CopyToDeviceStream_TotalBytes: Option<PJRT_UnusedFn>,
        pub PJRT_CopyToDeviceStream_GranuleSize: Option<PJRT_UnusedFn>,
        pub PJRT_CopyToDeviceStream_CurrentBytes: Option<PJRT_UnusedFn>,

        pub PJRT_TopologyDescription_Create: Option<PJRT_UnusedFn>,
        pub PJRT_TopologyDescription_Destroy: Option<PJRT_UnusedFn>,
        pub PJRT_TopologyDescription_PlatformName: Option<PJRT_UnusedFn>,
        pub PJRT_TopologyDescription_PlatformVersion: Option<PJRT_UnusedFn>,
        pub PJRT_TopologyDescription_GetDeviceDescriptions: Option<PJRT_UnusedFn>,
        pub PJRT_TopologyDescription_Serialize: Option<PJRT_UnusedFn>,
        pub PJRT_TopologyDescription_Attributes: Option<PJRT_UnusedFn>,

        pub PJRT_Compile: Option<PJRT_UnusedFn>,

        pub PJRT_Executable_OutputElementTypes: Option<PJRT_UnusedFn>,
        pub PJRT_Executable_OutputDimensions: Option<PJRT_UnusedFn>,

        pub PJRT_Buffer_CopyToMemory: Option<PJRT_UnusedFn>,

        pub PJRT_Client_CreateViewOfDeviceBuffer: Option<PJRT_Client_CreateViewOfDeviceBuffer>,

        pub PJRT_Executable_Fingerprint: Option<PJRT_UnusedFn>,

        pub PJRT_Client_TopologyDescription: Option<PJRT_UnusedFn>,

        pub PJRT_Executable_GetCompiledMemoryStats: Option<PJRT_UnusedFn>,

        pub PJRT_Memory_Kind_Id: Option<PJRT_UnusedFn>,

        pub PJRT_ExecuteContext_Create: Option<PJRT_UnusedFn>,
        pub PJRT_ExecuteContext_Destroy: Option<PJRT_UnusedFn>,

        pub PJRT_Buffer_CopyRawToHost: Option<PJRT_UnusedFn>,

        pub PJRT_AsyncHostToDeviceTransferManager_Destroy: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_TransferData: Option<PJRT_UnusedFn>,
        pub PJRT_Client_CreateBuffersForAsyncHostToDevice: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_RetrieveBuffer: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_Device: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_BufferCount: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_BufferSize: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_SetBufferError: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_AddMetadata: Option<PJRT_UnusedFn>,
        pub PJRT_Client_DmaMap: Option<PJRT_UnusedFn>,
        pub PJRT_Client_DmaUnmap: Option<PJRT_UnusedFn>,

        pub PJRT_Client_CreateUninitializedBuffer: Option<PJRT_UnusedFn>,
        pub PJRT_Client_UpdateGlobalProcessInfo: Option<PJRT_UnusedFn>,

        pub PJRT_TopologyDescription_Deserialize: Option<PJRT_UnusedFn>,
        pub PJRT_Client_CreateAliasBuffer: Option<PJRT_UnusedFn>,
        pub PJRT_Client_FulfillAliasBuffer: Option<PJRT_UnusedFn>,
        pub PJRT_LoadedExecutable_GetDeviceAssignment: Option<PJRT_UnusedFn>,
        pub PJRT_Client_CreateErrorBuffer: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncHostToDeviceTransferManager_TransferLiteral: Option<PJRT_UnusedFn>,
        pub PJRT_Buffer_CopyRawToHostFuture: Option<PJRT_UnusedFn>,

        pub PJRT_Device_PoisonExecution: Option<PJRT_UnusedFn>,
        pub PJRT_Device_CreateAsyncTrackingEvent: Option<PJRT_UnusedFn>,
        pub PJRT_AsyncTrackingEvent_Destroy: Option<PJRT_UnusedFn>,

        pub PJRT_Executable_GetCompileOptions: Option<PJRT_UnusedFn>,

        pub PJRT_Buffer_DonateWithControlDependency: Option<PJRT_UnusedFn>,

        pub PJRT_Event_Create: Option<PJRT_UnusedFn>,
        pub PJRT_Event_Set: Option<PJRT_UnusedFn>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_from_c_api() {
        // A null pointer yields an empty borrowed string.
        let text = str_from_c_api(std::ptr::null(), 7);
        assert!(matches!(text, std::borrow::Cow::Borrowed("")));

        let bytes = b"cpu";
        let text = str_from_c_api(bytes.as_ptr() as *const std::ffi::c_char, bytes.len());
        assert!(matches!(text, std::borrow::Cow::Borrowed("cpu")));
        assert_eq!(text, "cpu");

        // Invalid UTF-8 is sanitized into an owned string.
        let bytes = [b'c', b'p', 0x80];
        let text = str_from_c_api(bytes.as_ptr() as *const std::ffi::c_char, bytes.len());
        assert!(matches!(text, std::borrow::Cow::Owned(_)));
        assert_eq!(text, "cp\u{fffd}");
    }

    #[test]
    fn test_slice_from_c_api() {
        assert!(unsafe { slice_from_c_api::<u8>(std::ptr::null(), 3) }.is_empty());
        let values = [1i64, 2, 3];
        assert_eq!(unsafe { slice_from_c_api(values.as_ptr(), 0) }, &[] as &[i64]);
        assert_eq!(unsafe { slice_from_c_api(values.as_ptr(), 3) }, &values);
    }

    #[test]
    fn test_api_null_handle() {
        assert!(matches!(
            unsafe { Api::from_c_api(std::ptr::null()) },
            Err(Error::PluginLoad { .. })
        ));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(format!("{}", Version { major: 0, minor: 54 }), "0.54");
    }
}
