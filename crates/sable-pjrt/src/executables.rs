use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::buffers::{Buffer, BufferInner};
use crate::clients::ClientInner;
use crate::devices::Device;
use crate::events::Event;
use crate::{Error, invoke_pjrt_api_error_fn, slice_from_c_api};
use self::ffi::*;

/// Shared state of a [`LoadedExecutable`]. Destruction swaps the handle to null so repeated
/// destroys (including the one issued by client destruction) are no-ops.
pub(crate) struct ExecutableInner {
    client: Arc<ClientInner>,
    handle: AtomicPtr<ffi::PJRT_LoadedExecutable>,
    num_outputs: usize,
    /// Whether the executable was compiled against a fixed device assignment (non-portable).
    pinned_to_devices: bool,
}

impl ExecutableInner {
    fn handle(&self) -> Result<*mut ffi::PJRT_LoadedExecutable, Error> {
        let handle = self.handle.load(Ordering::Acquire);
        if handle.is_null() { Err(Error::handle_invalid("executable")) } else { Ok(handle) }
    }

    pub(crate) fn destroy(&self) {
        let handle = self.handle.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if handle.is_null() || self.client.is_destroyed() {
            return;
        }
        let result = invoke_pjrt_api_error_fn!(
            self.client.api(),
            PJRT_LoadedExecutable_Destroy,
            { executable = handle }
        );
        if let Err(error) = result {
            tracing::warn!(%error, "PJRT executable destruction failed");
        }
    }
}

impl Drop for ExecutableInner {
    fn drop(&mut self) {
        self.destroy();
    }
}

unsafe impl Send for ExecutableInner {}
unsafe impl Sync for ExecutableInner {}

/// A compiled program loaded onto a [`Client`](crate::Client), ready for execution. Records
/// its output count and whether it is pinned to a device assignment; portable executables
/// choose their device per execution.
pub struct LoadedExecutable {
    inner: Arc<ExecutableInner>,
    addressable_devices: Vec<Device>,
}

impl LoadedExecutable {
    pub(crate) fn from_c_api(
        handle: *mut ffi::PJRT_LoadedExecutable,
        client: Arc<ClientInner>,
        pinned_to_devices: bool,
    ) -> Result<Self, Error> {
        if handle.is_null() {
            return Err(Error::invalid_argument(
                "the provided PJRT loaded executable handle is a null pointer",
            ));
        }
        let api = client.api();

        // The output count lives on the underlying (unloaded) executable; the handle returned
        // by GetExecutable is owned by the caller and destroyed right after the query.
        let executable = invoke_pjrt_api_error_fn!(
            api,
            PJRT_LoadedExecutable_GetExecutable,
            { loaded_executable = handle },
            { executable }
        )?;
        let num_outputs = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Executable_NumOutputs,
            { executable = executable },
            { num_outputs }
        );
        let destroy_result =
            invoke_pjrt_api_error_fn!(api, PJRT_Executable_Destroy, { executable = executable });
        let num_outputs = num_outputs?;
        destroy_result?;

        let devices = invoke_pjrt_api_error_fn!(
            api,
            PJRT_LoadedExecutable_AddressableDevices,
            { executable = handle },
            { addressable_devices, num_addressable_devices }
        )?;
        let addressable_devices = unsafe { slice_from_c_api(devices.0, devices.1) }
            .iter()
            .map(|&device| unsafe { Device::from_c_api(device, api) })
            .collect::<Result<Vec<_>, _>>()?;

        let inner = Arc::new(ExecutableInner {
            client: client.clone(),
            handle: AtomicPtr::new(handle),
            num_outputs,
            pinned_to_devices,
        });
        client.register_executable(&inner);
        Ok(Self { inner, addressable_devices })
    }

    /// Number of outputs the executable produces per execution.
    pub fn num_outputs(&self) -> usize {
        self.inner.num_outputs
    }

    /// Devices this executable can run on from this process.
    pub fn addressable_devices(&self) -> &[Device] {
        &self.addressable_devices
    }

    /// Starts configuring an execution over the provided input buffers. All inputs start
    /// non-donatable; see [`ExecutionBuilder::donate`].
    pub fn execute(&self, inputs: &[&Buffer]) -> ExecutionBuilder<'_> {
        ExecutionBuilder {
            executable: self,
            inputs: inputs.iter().map(|buffer| buffer.inner().clone()).collect(),
            non_donatable: (0..inputs.len() as i64).collect(),
            device_num: None,
        }
    }

    /// Destroys this executable. Idempotent; safe after client destruction.
    pub fn destroy(&self) -> Result<(), Error> {
        self.inner.destroy();
        Ok(())
    }
}

impl Drop for LoadedExecutable {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

/// Configures one execution: input donation and device selection.
///
/// Donation transfers ownership of an input buffer's device memory to the runtime so it may be
/// reused as output storage; donated buffers are considered destroyed once the execution
/// succeeds.
pub struct ExecutionBuilder<'e> {
    executable: &'e LoadedExecutable,
    inputs: Vec<Arc<BufferInner>>,
    /// Indices of inputs the runtime must not donate. Starts as the full input set.
    non_donatable: BTreeSet<i64>,
    device_num: Option<usize>,
}

impl ExecutionBuilder<'_> {
    /// Flags every input as non-donatable (the default).
    pub fn donate_none(mut self) -> Self {
        self.non_donatable = (0..self.inputs.len() as i64).collect();
        self
    }

    /// Allows the runtime to donate input `index`. Idempotent: donating the same index twice
    /// is the same as donating it once.
    pub fn donate(mut self, index: usize) -> Self {
        self.non_donatable.remove(&(index as i64));
        self
    }

    /// Runs on the `n`-th addressable device. Only valid for portable executables; executables
    /// pinned to a device assignment reject an explicit device.
    pub fn on_device_by_num(mut self, n: usize) -> Self {
        self.device_num = Some(n);
        self
    }

    /// Issues the execution and returns the output buffers. Blocks until the device reports
    /// completion so that errors surface here rather than at first use of an output.
    pub fn done(self) -> Result<Vec<Buffer>, Error> {
        let executable = self.executable;
        let inner = &executable.inner;
        let client = &inner.client;
        let api = client.api();
        let handle = inner.handle()?;

        if inner.pinned_to_devices && self.device_num.is_some() {
            return Err(Error::invalid_argument(
                "on_device_by_num is only valid for portable executables; this executable is pinned to a device assignment",
            ));
        }
        let execute_device = if inner.pinned_to_devices {
            std::ptr::null_mut()
        } else {
            let device_num = self.device_num.unwrap_or(0);
            let device = executable.addressable_devices.get(device_num).ok_or_else(|| {
                Error::invalid_argument(format!(
                    "device number {device_num} out of range: the executable has {} addressable devices",
                    executable.addressable_devices.len()
                ))
            })?;
            unsafe { device.to_c_api() }
        };

        let num_args = self.inputs.len();
        let num_outputs = inner.num_outputs;
        let non_donatable = self.non_donatable.iter().copied().collect::<Vec<_>>();

        // All pointer tables handed to the plugin are bump-allocated from the client's pool so
        // the hot path performs no per-value heap allocations.
        let arena = client.pools.get(
            size_of::<ffi::PJRT_ExecuteOptions>()
                + (num_args + num_outputs + non_donatable.len() + 8) * 8,
        );

        let argument_list = arena.alloc_slice::<*mut crate::buffers::ffi::PJRT_Buffer>(num_args.max(1));
        for (index, input) in self.inputs.iter().enumerate() {
            unsafe { *argument_list.add(index) = input.handle()? };
        }
        let argument_lists = arena.alloc::<*const *mut crate::buffers::ffi::PJRT_Buffer>();
        unsafe { *argument_lists = argument_list };

        let output_list = arena.alloc_slice::<*mut crate::buffers::ffi::PJRT_Buffer>(num_outputs.max(1));
        let output_lists = arena.alloc::<*mut *mut crate::buffers::ffi::PJRT_Buffer>();
        unsafe { *output_lists = output_list };

        let device_complete_events = arena.alloc::<*mut crate::events::ffi::PJRT_Event>();

        let options = arena.alloc::<ffi::PJRT_ExecuteOptions>();
        unsafe {
            (*options).struct_size = size_of::<ffi::PJRT_ExecuteOptions>();
            (*options).non_donatable_input_indices = arena.alloc_copy(&non_donatable);
            (*options).num_non_donatable_input_indices = non_donatable.len();
        }

        let result = invoke_pjrt_api_error_fn!(
            api,
            PJRT_LoadedExecutable_Execute,
            {
                executable = handle,
                options = options,
                argument_lists = argument_lists,
                num_devices = 1,
                num_args = num_args,
                output_lists = output_lists,
                device_complete_events = device_complete_events,
                execute_device = execute_device,
            }
        );

        let outputs = match result {
            Ok(()) => {
                let completion = unsafe { *device_complete_events };
                if !completion.is_null() {
                    unsafe { Event::from_c_api(completion, api) }?.wait()?;
                }
                let mut outputs = Vec::with_capacity(num_outputs);
                for index in 0..num_outputs {
                    let output = unsafe { *output_list.add(index) };
                    outputs.push(Buffer::wrap(output, client.clone(), None)?);
                }
                // Donated inputs now belong to the runtime and behave as destroyed.
                for (index, input) in self.inputs.iter().enumerate() {
                    if !self.non_donatable.contains(&(index as i64)) {
                        input.forget();
                    }
                }
                Ok(outputs)
            }
            Err(error) => Err(error),
        };
        client.pools.put(arena);
        outputs
    }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use std::marker::{PhantomData, PhantomPinned};

    use crate::buffers::ffi::PJRT_Buffer;
    use crate::devices::ffi::PJRT_Device;
    use crate::errors::ffi::PJRT_Error;
    use crate::events::ffi::PJRT_Event;
    use crate::ffi::PJRT_Extension_Base;

    #[repr(C)]
    pub struct PJRT_Executable {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_LoadedExecutable {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_ExecuteContext {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    // Send/receive callback tables are never populated by this bridge, so their element types
    // stay opaque.
    #[repr(C)]
    pub struct PJRT_SendCallbackInfo {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_RecvCallbackInfo {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_Executable_Destroy_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub executable: *mut PJRT_Executable,
    }

    impl PJRT_Executable_Destroy_Args {
        pub fn new(executable: *mut PJRT_Executable) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), executable }
        }
    }

    pub type PJRT_Executable_Destroy = unsafe extern "C" fn(args: *mut PJRT_Executable_Destroy_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Executable_NumOutputs_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub executable: *mut PJRT_Executable,
        pub num_outputs: usize,
    }

    impl PJRT_Executable_NumOutputs_Args {
        pub fn new(executable: *mut PJRT_Executable) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), executable, num_outputs: 0 }
        }
    }

    pub type PJRT_Executable_NumOutputs =
        unsafe extern "C" fn(args: *mut PJRT_Executable_NumOutputs_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_LoadedExecutable_Destroy_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub executable: *mut PJRT_LoadedExecutable,
    }

    impl PJRT_LoadedExecutable_Destroy_Args {
        pub fn new(executable: *mut PJRT_LoadedExecutable) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), executable }
        }
    }

    pub type PJRT_LoadedExecutable_Destroy =
        unsafe extern "C" fn(args: *mut PJRT_LoadedExecutable_Destroy_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_LoadedExecutable_GetExecutable_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub loaded_executable: *mut PJRT_LoadedExecutable,
        pub executable: *mut PJRT_Executable,
    }

    impl PJRT_LoadedExecutable_GetExecutable_Args {
        pub fn new(loaded_executable: *mut PJRT_LoadedExecutable) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                loaded_executable,
                executable: std::ptr::null_mut(),
            }
        }
    }

    pub type PJRT_LoadedExecutable_GetExecutable =
        unsafe extern "C" fn(args: *mut PJRT_LoadedExecutable_GetExecutable_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_LoadedExecutable_AddressableDevices_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub executable: *mut PJRT_LoadedExecutable,
        pub addressable_devices: *const *mut PJRT_Device,
        pub num_addressable_devices: usize,
    }

    impl PJRT_LoadedExecutable_AddressableDevices_Args {
        pub fn new(executable: *mut PJRT_LoadedExecutable) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                executable,
                addressable_devices: std::ptr::null(),
                num_addressable_devices: 0,
            }
        }
    }

    pub type PJRT_LoadedExecutable_AddressableDevices =
        unsafe extern "C" fn(args: *mut PJRT_LoadedExecutable_AddressableDevices_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_ExecuteOptions {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub send_callbacks: *mut *mut PJRT_SendCallbackInfo,
        pub recv_callbacks: *mut *mut PJRT_RecvCallbackInfo,
        pub num_send_ops: usize,
        pub num_recv_ops: usize,
        pub launch_id: std::ffi::c_int,
        pub non_donatable_input_indices: *const i64,
        pub num_non_donatable_input_indices: usize,
        pub context: *mut PJRT_ExecuteContext,
        pub call_location: *const std::ffi::c_char,
        pub num_tasks: usize,
        pub task_ids: *mut std::ffi::c_int,
        pub incarnation_ids: *mut i64,
    }

    #[repr(C)]
    pub struct PJRT_LoadedExecutable_Execute_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub executable: *mut PJRT_LoadedExecutable,
        pub options: *mut PJRT_ExecuteOptions,
        pub argument_lists: *const *const *mut PJRT_Buffer,
        pub num_devices: usize,
        pub num_args: usize,
        pub output_lists: *const *mut *mut PJRT_Buffer,
        pub device_complete_events: *mut *mut PJRT_Event,
        pub execute_device: *mut PJRT_Device,
    }

    impl PJRT_LoadedExecutable_Execute_Args {
        #[allow(clippy::too_many_arguments)]
        pub fn new(
            executable: *mut PJRT_LoadedExecutable,
            options: *mut PJRT_ExecuteOptions,
            argument_lists: *const *const *mut PJRT_Buffer,
            num_devices: usize,
            num_args: usize,
            output_lists: *const *mut *mut PJRT_Buffer,
            device_complete_events: *mut *mut PJRT_Event,
            execute_device: *mut PJRT_Device,
        ) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                executable,
                options,
                argument_lists,
                num_devices,
                num_args,
                output_lists,
                device_complete_events,
                execute_device,
            }
        }
    }

    pub type PJRT_LoadedExecutable_Execute =
        unsafe extern "C" fn(args: *mut PJRT_LoadedExecutable_Execute_Args) -> *mut PJRT_Error;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    #[test]
    fn test_donation_set_monotonicity() {
        // donate(i) twice equals donate(i) once in the non-donatable set.
        let mut non_donatable: BTreeSet<i64> = (0..4).collect();
        non_donatable.remove(&2);
        let after_one = non_donatable.clone();
        non_donatable.remove(&2);
        assert_eq!(non_donatable, after_one);
        assert_eq!(non_donatable.iter().copied().collect::<Vec<_>>(), vec![0, 1, 3]);
    }
}
