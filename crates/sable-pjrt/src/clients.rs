use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, Weak};

use prost::Message;

use crate::arena::ArenaPools;
use crate::buffers::BufferInner;
use crate::devices::Device;
use crate::executables::{ExecutableInner, LoadedExecutable};
use crate::protos;
use crate::values::NamedValue;
use crate::{Api, Error, invoke_pjrt_api_error_fn, slice_from_c_api, str_from_c_api};
use self::ffi::*;

/// Shared state of a [`Client`]: the C handle, the arena pool used to marshal calls issued
/// through this client, and the registries of outstanding buffers and executables that client
/// destruction must release.
///
/// The handle is stored atomically so that `destroy` is an idempotent synchronizing edge:
/// buffers and executables observing a null handle treat the client as gone.
pub(crate) struct ClientInner {
    api: Api,
    handle: AtomicPtr<ffi::PJRT_Client>,
    pub(crate) pools: ArenaPools,
    buffers: Mutex<Vec<Weak<BufferInner>>>,
    executables: Mutex<Vec<Weak<ExecutableInner>>>,
}

impl ClientInner {
    pub(crate) fn api(&self) -> Api {
        self.api
    }

    /// The C handle, or [`Error::HandleInvalid`] after destruction.
    pub(crate) fn handle(&self) -> Result<*mut ffi::PJRT_Client, Error> {
        let handle = self.handle.load(Ordering::Acquire);
        if handle.is_null() { Err(Error::handle_invalid("client")) } else { Ok(handle) }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.handle.load(Ordering::Acquire).is_null()
    }

    pub(crate) fn register_buffer(&self, buffer: &Arc<BufferInner>) {
        self.buffers.lock().unwrap().push(Arc::downgrade(buffer));
    }

    pub(crate) fn register_executable(&self, executable: &Arc<ExecutableInner>) {
        self.executables.lock().unwrap().push(Arc::downgrade(executable));
    }

    /// Releases every executable and buffer still tracked by this client, then destroys the
    /// client itself. Idempotent: repeated calls are no-ops.
    pub(crate) fn destroy(&self) {
        let handle = self.handle.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if handle.is_null() {
            return;
        }
        for executable in std::mem::take(&mut *self.executables.lock().unwrap()) {
            if let Some(executable) = executable.upgrade() {
                executable.destroy();
            }
        }
        for buffer in std::mem::take(&mut *self.buffers.lock().unwrap()) {
            if let Some(buffer) = buffer.upgrade() {
                buffer.destroy();
            }
        }
        let result = invoke_pjrt_api_error_fn!(self.api, PJRT_Client_Destroy, { client = handle });
        if let Err(error) = result {
            tracing::warn!(%error, "PJRT client destruction failed");
        }
    }
}

/// A compilation/execution context on a PJRT [`Plugin`](crate::Plugin). Owns its device
/// inventory and an arena pool, and tracks outstanding buffers and executables so that
/// [`Client::destroy`] can release them in the required order.
///
/// Executions on distinct devices of one client are independent and may be issued
/// concurrently.
pub struct Client {
    inner: Arc<ClientInner>,
    platform_name: String,
    platform_version: String,
    devices: Vec<Device>,
    addressable_devices: Vec<Device>,
}

impl Client {
    /// Creates a new client, enumerating its devices and binding a fresh arena pool.
    pub(crate) fn create(api: Api, options: &[NamedValue]) -> Result<Self, Error> {
        let pools = ArenaPools::new();
        let arena = pools.get(2048);
        let marshalled =
            options.iter().map(|option| option.to_c_api(&arena)).collect::<Vec<_>>();
        let handle = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_Create,
            {
                create_options = marshalled.as_ptr(),
                num_options = marshalled.len(),
                kv_get_callback = None,
                kv_get_user_arg = std::ptr::null_mut(),
                kv_put_callback = None,
                kv_put_user_arg = std::ptr::null_mut(),
                kv_try_get_callback = None,
                kv_try_get_user_arg = std::ptr::null_mut(),
            },
            { client }
        )?;
        pools.put(arena);

        let platform_name = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_PlatformName,
            { client = handle },
            { platform_name, platform_name_size }
        )?;
        let platform_name = str_from_c_api(platform_name.0, platform_name.1).into_owned();
        let platform_version = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_PlatformVersion,
            { client = handle },
            { platform_version, platform_version_size }
        )?;
        let platform_version = str_from_c_api(platform_version.0, platform_version.1).into_owned();

        let devices = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_Devices,
            { client = handle },
            { devices, num_devices }
        )?;
        let devices = unsafe { slice_from_c_api(devices.0, devices.1) }
            .iter()
            .map(|&device| unsafe { Device::from_c_api(device, api) })
            .collect::<Result<Vec<_>, _>>()?;
        let addressable = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_AddressableDevices,
            { client = handle },
            { addressable_devices, num_addressable_devices }
        )?;
        let addressable_devices = unsafe { slice_from_c_api(addressable.0, addressable.1) }
            .iter()
            .map(|&device| unsafe { Device::from_c_api(device, api) })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(platform = %platform_name, devices = devices.len(), "created PJRT client");
        Ok(Self {
            inner: Arc::new(ClientInner {
                api,
                handle: AtomicPtr::new(handle),
                pools,
                buffers: Mutex::new(Vec::new()),
                executables: Mutex::new(Vec::new()),
            }),
            platform_name,
            platform_version,
            devices,
            addressable_devices,
        })
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    /// Platform this client runs on (e.g. `cpu`, `cuda`).
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    /// Platform-specific version string.
    pub fn platform_version(&self) -> &str {
        &self.platform_version
    }

    /// All devices visible to this client, including non-addressable ones.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Devices this process can issue work to.
    pub fn addressable_devices(&self) -> &[Device] {
        &self.addressable_devices
    }

    /// Starts configuring a compilation; see [`CompilationBuilder`].
    pub fn compile(&self) -> CompilationBuilder<'_> {
        CompilationBuilder {
            client: self,
            code: Vec::new(),
            format: ProgramFormat::StableHlo,
            device_assignment: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Destroys this client, releasing all executables and buffers it still tracks. Buffers
    /// destroyed later become no-ops. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

/// Serialization format of a program handed to [`CompilationBuilder`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ProgramFormat {
    /// StableHLO MLIR text or bytecode.
    StableHlo,
    /// Opaque serialized `HloModuleProto` bytes.
    HloProto,
}

impl ProgramFormat {
    fn token(&self) -> &'static [u8] {
        match self {
            Self::StableHlo => b"mlir",
            Self::HloProto => b"hlo",
        }
    }
}

/// Configures one compilation: the program payload (StableHLO MLIR or an opaque HLO protobuf),
/// an optional device assignment (replica-major device ids; empty means a portable executable
/// that picks its device at execution time), and compile options passed through to the plugin.
pub struct CompilationBuilder<'c> {
    client: &'c Client,
    code: Vec<u8>,
    format: ProgramFormat,
    device_assignment: Vec<i64>,
    options: Vec<NamedValue>,
}

impl CompilationBuilder<'_> {
    /// Uses StableHLO MLIR (text or bytecode) as the program payload.
    pub fn with_stablehlo<C: Into<Vec<u8>>>(mut self, code: C) -> Self {
        self.code = code.into();
        self.format = ProgramFormat::StableHlo;
        self
    }

    /// Uses serialized `HloModuleProto` bytes as the program payload. The bytes are opaque to
    /// the bridge.
    pub fn with_hlo_proto<C: Into<Vec<u8>>>(mut self, code: C) -> Self {
        self.code = code.into();
        self.format = ProgramFormat::HloProto;
        self
    }

    /// Pins the executable to the provided replica-major device ids. Without an assignment
    /// the executable is portable and a device is chosen per execution.
    pub fn with_device_assignment<D: Into<Vec<i64>>>(mut self, device_ids: D) -> Self {
        self.device_assignment = device_ids.into();
        self
    }

    /// Adds a compile option passed through to the plugin.
    pub fn with_option<N: AsRef<str>, V: Into<crate::Value>>(mut self, name: N, value: V) -> Self {
        self.options.push(NamedValue::new(name, value));
        self
    }

    /// Invokes the plugin's compile entry point and returns the loaded executable.
    pub fn done(self) -> Result<LoadedExecutable, Error> {
        if self.code.is_empty() {
            return Err(Error::invalid_argument(
                "no program was provided; call with_stablehlo or with_hlo_proto first",
            ));
        }
        let inner = &self.client.inner;
        let api = inner.api();
        let handle = inner.handle()?;
        let options = compilation_options(&self.device_assignment, &self.options).encode_to_vec();
        let format = self.format.token();
        let program = ffi::PJRT_Program {
            struct_size: size_of::<ffi::PJRT_Program>(),
            extension_start: std::ptr::null_mut(),
            code: self.code.as_ptr() as *mut std::ffi::c_char,
            code_size: self.code.len(),
            format: format.as_ptr() as *const std::ffi::c_char,
            format_size: format.len(),
        };
        let executable = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_Compile,
            {
                client = handle,
                program = &program as *const _,
                compile_options = options.as_ptr() as *const std::ffi::c_char,
                compile_options_size = options.len(),
            },
            { executable }
        )?;
        LoadedExecutable::from_c_api(executable, inner.clone(), !self.device_assignment.is_empty())
    }
}

/// Builds the `CompileOptionsProto` for a compilation: the replica-major device assignment
/// (empty = portable executable) and the caller's compile options as environment overrides.
fn compilation_options(device_assignment: &[i64], options: &[NamedValue]) -> protos::CompilationOptions {
    let replica_count = device_assignment.len().max(1) as i64;
    let assignment = if device_assignment.is_empty() {
        None
    } else {
        Some(protos::DeviceAssignment {
            replica_count: device_assignment.len() as i32,
            computation_count: 1,
            computation_devices: vec![protos::ComputationDeviceAssignment {
                replica_device_ids: device_assignment.to_vec(),
            }],
        })
    };
    let environment_option_overrides = options
        .iter()
        .map(|option| (option.name.clone(), protos::OptionOverride::from(&option.value)))
        .collect();
    protos::CompilationOptions {
        argument_layouts: Vec::new(),
        parameter_is_tupled_arguments: false,
        executable_build_options: Some(protos::ExecutableCompilationOptions {
            device_ordinal: -1,
            replica_count,
            partition_count: 1,
            device_assignment: assignment,
            ..Default::default()
        }),
        compile_portable_executable: device_assignment.is_empty(),
        profile_version: 0,
        environment_option_overrides,
    }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use std::marker::{PhantomData, PhantomPinned};

    use crate::devices::ffi::PJRT_Device;
    use crate::errors::ffi::PJRT_Error;
    use crate::ffi::PJRT_Extension_Base;
    use crate::values::ffi::PJRT_NamedValue;

    #[repr(C)]
    pub struct PJRT_Client {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    // The key-value-store callbacks allow multi-process clients to rendezvous; this bridge
    // always passes null callbacks, so only the function-pointer types are declared.
    pub type PJRT_KeyValueGetCallback = unsafe extern "C" fn(args: *mut std::ffi::c_void) -> *mut PJRT_Error;
    pub type PJRT_KeyValueTryGetCallback = unsafe extern "C" fn(args: *mut std::ffi::c_void) -> *mut PJRT_Error;
    pub type PJRT_KeyValuePutCallback = unsafe extern "C" fn(args: *mut std::ffi::c_void) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_Create_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub create_options: *const PJRT_NamedValue,
        pub num_options: usize,
        pub kv_get_callback: Option<PJRT_KeyValueGetCallback>,
        pub kv_get_user_arg: *mut std::ffi::c_void,
        pub kv_put_callback: Option<PJRT_KeyValuePutCallback>,
        pub kv_put_user_arg: *mut std::ffi::c_void,
        pub client: *mut PJRT_Client,
        pub kv_try_get_callback: Option<PJRT_KeyValueTryGetCallback>,
        pub kv_try_get_user_arg: *mut std::ffi::c_void,
    }

    impl PJRT_Client_Create_Args {
        #[allow(clippy::too_many_arguments)]
        pub fn new(
            create_options: *const PJRT_NamedValue,
            num_options: usize,
            kv_get_callback: Option<PJRT_KeyValueGetCallback>,
            kv_get_user_arg: *mut std::ffi::c_void,
            kv_put_callback: Option<PJRT_KeyValuePutCallback>,
            kv_put_user_arg: *mut std::ffi::c_void,
            kv_try_get_callback: Option<PJRT_KeyValueTryGetCallback>,
            kv_try_get_user_arg: *mut std::ffi::c_void,
        ) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                create_options,
                num_options,
                kv_get_callback,
                kv_get_user_arg,
                kv_put_callback,
                kv_put_user_arg,
                client: std::ptr::null_mut(),
                kv_try_get_callback,
                kv_try_get_user_arg,
            }
        }
    }

    pub type PJRT_Client_Create = unsafe extern "C" fn(args: *mut PJRT_Client_Create_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_Destroy_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
    }

    impl PJRT_Client_Destroy_Args {
        pub fn new(client: *mut PJRT_Client) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), client }
        }
    }

    pub type PJRT_Client_Destroy = unsafe extern "C" fn(args: *mut PJRT_Client_Destroy_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_PlatformName_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub platform_name: *const std::ffi::c_char,
        pub platform_name_size: usize,
    }

    impl PJRT_Client_PlatformName_Args {
        pub fn new(client: *mut PJRT_Client) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                platform_name: std::ptr::null(),
                platform_name_size: 0,
            }
        }
    }

    pub type PJRT_Client_PlatformName =
        unsafe extern "C" fn(args: *mut PJRT_Client_PlatformName_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_PlatformVersion_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub platform_version: *const std::ffi::c_char,
        pub platform_version_size: usize,
    }

    impl PJRT_Client_PlatformVersion_Args {
        pub fn new(client: *mut PJRT_Client) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                platform_version: std::ptr::null(),
                platform_version_size: 0,
            }
        }
    }

    pub type PJRT_Client_PlatformVersion =
        unsafe extern "C" fn(args: *mut PJRT_Client_PlatformVersion_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_Devices_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub devices: *const *mut PJRT_Device,
        pub num_devices: usize,
    }

    impl PJRT_Client_Devices_Args {
        pub fn new(client: *mut PJRT_Client) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                devices: std::ptr::null_mut(),
                num_devices: 0,
            }
        }
    }

    pub type PJRT_Client_Devices = unsafe extern "C" fn(args: *mut PJRT_Client_Devices_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_AddressableDevices_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub addressable_devices: *const *mut PJRT_Device,
        pub num_addressable_devices: usize,
    }

    impl PJRT_Client_AddressableDevices_Args {
        pub fn new(client: *mut PJRT_Client) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                addressable_devices: std::ptr::null_mut(),
                num_addressable_devices: 0,
            }
        }
    }

    pub type PJRT_Client_AddressableDevices =
        unsafe extern "C" fn(args: *mut PJRT_Client_AddressableDevices_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Program {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub code: *mut std::ffi::c_char,
        pub code_size: usize,
        pub format: *const std::ffi::c_char,
        pub format_size: usize,
    }

    #[repr(C)]
    pub struct PJRT_Client_Compile_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub program: *const PJRT_Program,
        pub compile_options: *const std::ffi::c_char,
        pub compile_options_size: usize,
        pub executable: *mut crate::executables::ffi::PJRT_LoadedExecutable,
    }

    impl PJRT_Client_Compile_Args {
        pub fn new(
            client: *mut PJRT_Client,
            program: *const PJRT_Program,
            compile_options: *const std::ffi::c_char,
            compile_options_size: usize,
        ) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                program,
                compile_options,
                compile_options_size,
                executable: std::ptr::null_mut(),
            }
        }
    }

    pub type PJRT_Client_Compile = unsafe extern "C" fn(args: *mut PJRT_Client_Compile_Args) -> *mut PJRT_Error;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_format_tokens() {
        assert_eq!(ProgramFormat::StableHlo.token(), b"mlir");
        assert_eq!(ProgramFormat::HloProto.token(), b"hlo");
    }

    #[test]
    fn test_compilation_options_portable_by_default() {
        // Without a device assignment the executable is portable with a single replica, and
        // compile options become environment overrides.
        let proto =
            compilation_options(&[], &[NamedValue::new("xla_cpu_use_thunk_runtime", false)]);
        assert!(proto.compile_portable_executable);
        let build_options = proto.executable_build_options.unwrap();
        assert_eq!(build_options.replica_count, 1);
        assert_eq!(build_options.device_ordinal, -1);
        assert!(build_options.device_assignment.is_none());
        assert!(proto.environment_option_overrides.contains_key("xla_cpu_use_thunk_runtime"));
    }

    #[test]
    fn test_compilation_options_with_device_assignment() {
        let proto = compilation_options(&[0, 1], &[]);
        assert!(!proto.compile_portable_executable);
        assert_eq!(proto.executable_build_options.as_ref().unwrap().replica_count, 2);
        let assignment = proto.executable_build_options.unwrap().device_assignment.unwrap();
        assert_eq!(assignment.replica_count, 2);
        assert_eq!(assignment.computation_count, 1);
        assert_eq!(assignment.computation_devices[0].replica_device_ids, vec![0, 1]);
    }
}
