use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

use half::{bf16, f16};
use sable_hlo::{DType, pack_sub_byte, unpack_sub_byte};

use crate::clients::{Client, ClientInner};
use crate::devices::Device;
use crate::events::Event;
use crate::{Error, invoke_pjrt_api_error_fn, slice_from_c_api};
use self::ffi::*;

/// Host memory alignment required for zero-copy device views on CPU plugins.
pub const BUFFER_ALIGNMENT: usize = 64;

/// Element type of a device buffer as understood by the PJRT C API.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferType {
    Invalid,
    Token,
    Predicate,
    I2,
    I4,
    I8,
    I16,
    I32,
    I64,
    U2,
    U4,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    F32,
    F64,
    C64,
    C128,
}

impl BufferType {
    pub(crate) unsafe fn from_c_api(value: ffi::PJRT_Buffer_Type) -> Result<Self, Error> {
        Ok(match value {
            ffi::PJRT_Buffer_Type_INVALID => Self::Invalid,
            ffi::PJRT_Buffer_Type_TOKEN => Self::Token,
            ffi::PJRT_Buffer_Type_PRED => Self::Predicate,
            ffi::PJRT_Buffer_Type_S2 => Self::I2,
            ffi::PJRT_Buffer_Type_S4 => Self::I4,
            ffi::PJRT_Buffer_Type_S8 => Self::I8,
            ffi::PJRT_Buffer_Type_S16 => Self::I16,
            ffi::PJRT_Buffer_Type_S32 => Self::I32,
            ffi::PJRT_Buffer_Type_S64 => Self::I64,
            ffi::PJRT_Buffer_Type_U2 => Self::U2,
            ffi::PJRT_Buffer_Type_U4 => Self::U4,
            ffi::PJRT_Buffer_Type_U8 => Self::U8,
            ffi::PJRT_Buffer_Type_U16 => Self::U16,
            ffi::PJRT_Buffer_Type_U32 => Self::U32,
            ffi::PJRT_Buffer_Type_U64 => Self::U64,
            ffi::PJRT_Buffer_Type_F16 => Self::F16,
            ffi::PJRT_Buffer_Type_BF16 => Self::BF16,
            ffi::PJRT_Buffer_Type_F32 => Self::F32,
            ffi::PJRT_Buffer_Type_F64 => Self::F64,
            ffi::PJRT_Buffer_Type_C64 => Self::C64,
            ffi::PJRT_Buffer_Type_C128 => Self::C128,
            value => {
                return Err(Error::internal(format!("unsupported PJRT buffer type code {value}")));
            }
        })
    }

    pub(crate) fn to_c_api(self) -> ffi::PJRT_Buffer_Type {
        match self {
            Self::Invalid => ffi::PJRT_Buffer_Type_INVALID,
            Self::Token => ffi::PJRT_Buffer_Type_TOKEN,
            Self::Predicate => ffi::PJRT_Buffer_Type_PRED,
            Self::I2 => ffi::PJRT_Buffer_Type_S2,
            Self::I4 => ffi::PJRT_Buffer_Type_S4,
            Self::I8 => ffi::PJRT_Buffer_Type_S8,
            Self::I16 => ffi::PJRT_Buffer_Type_S16,
            Self::I32 => ffi::PJRT_Buffer_Type_S32,
            Self::I64 => ffi::PJRT_Buffer_Type_S64,
            Self::U2 => ffi::PJRT_Buffer_Type_U2,
            Self::U4 => ffi::PJRT_Buffer_Type_U4,
            Self::U8 => ffi::PJRT_Buffer_Type_U8,
            Self::U16 => ffi::PJRT_Buffer_Type_U16,
            Self::U32 => ffi::PJRT_Buffer_Type_U32,
            Self::U64 => ffi::PJRT_Buffer_Type_U64,
            Self::F16 => ffi::PJRT_Buffer_Type_F16,
            Self::BF16 => ffi::PJRT_Buffer_Type_BF16,
            Self::F32 => ffi::PJRT_Buffer_Type_F32,
            Self::F64 => ffi::PJRT_Buffer_Type_F64,
            Self::C64 => ffi::PJRT_Buffer_Type_C64,
            Self::C128 => ffi::PJRT_Buffer_Type_C128,
        }
    }

    /// Maps a [`DType`] to its PJRT buffer type.
    pub fn from_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Predicate,
            DType::I2 => Self::I2,
            DType::I4 => Self::I4,
            DType::I8 => Self::I8,
            DType::I16 => Self::I16,
            DType::I32 => Self::I32,
            DType::I64 => Self::I64,
            DType::U2 => Self::U2,
            DType::U4 => Self::U4,
            DType::U8 => Self::U8,
            DType::U16 => Self::U16,
            DType::U32 => Self::U32,
            DType::U64 => Self::U64,
            DType::F16 => Self::F16,
            DType::BF16 => Self::BF16,
            DType::F32 => Self::F32,
            DType::F64 => Self::F64,
            DType::C64 => Self::C64,
            DType::C128 => Self::C128,
        }
    }

    /// Maps this buffer type back to a [`DType`]; `Invalid` and `Token` have no counterpart.
    pub fn to_dtype(self) -> Option<DType> {
        Some(match self {
            Self::Invalid | Self::Token => return None,
            Self::Predicate => DType::Bool,
            Self::I2 => DType::I2,
            Self::I4 => DType::I4,
            Self::I8 => DType::I8,
            Self::I16 => DType::I16,
            Self::I32 => DType::I32,
            Self::I64 => DType::I64,
            Self::U2 => DType::U2,
            Self::U4 => DType::U4,
            Self::U8 => DType::U8,
            Self::U16 => DType::U16,
            Self::U32 => DType::U32,
            Self::U64 => DType::U64,
            Self::F16 => DType::F16,
            Self::BF16 => DType::BF16,
            Self::F32 => DType::F32,
            Self::F64 => DType::F64,
            Self::C64 => DType::C64,
            Self::C128 => DType::C128,
        })
    }
}

/// Primitive host types that transfer to and from device buffers unchanged.
pub trait BufferElement: Copy + Default {
    const DTYPE: DType;
}

macro_rules! buffer_elements {
    ($(($type:ty, $dtype:expr)),* $(,)?) => {
        $(
            impl BufferElement for $type {
                const DTYPE: DType = $dtype;
            }
        )*
    };
}

buffer_elements!(
    (bool, DType::Bool),
    (i8, DType::I8),
    (i16, DType::I16),
    (i32, DType::I32),
    (i64, DType::I64),
    (u8, DType::U8),
    (u16, DType::U16),
    (u32, DType::U32),
    (u64, DType::U64),
    (f16, DType::F16),
    (bf16, DType::BF16),
    (f32, DType::F32),
    (f64, DType::F64),
);

/// Aligned host allocation backing a zero-copy buffer. The address never changes while the
/// allocation lives, which the device view relies on.
pub(crate) struct HostBuffer {
    ptr: *mut u8,
    layout: std::alloc::Layout,
}

impl HostBuffer {
    fn new(size: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(size.max(1), BUFFER_ALIGNMENT)
            .expect("invalid host buffer layout");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Self { ptr, layout }
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

/// Shared state of a [`Buffer`]: the C handle plus the owning client and any host allocation
/// the device view borrows from. Destruction swaps the handle to null, making repeated
/// destroys no-ops.
pub(crate) struct BufferInner {
    client: Arc<ClientInner>,
    handle: AtomicPtr<ffi::PJRT_Buffer>,
    /// Keeps zero-copy host memory alive until the device buffer is destroyed.
    _host_backing: Option<Arc<HostBuffer>>,
}

impl BufferInner {
    pub(crate) fn handle(&self) -> Result<*mut ffi::PJRT_Buffer, Error> {
        let handle = self.handle.load(Ordering::Acquire);
        if handle.is_null() { Err(Error::handle_invalid("buffer")) } else { Ok(handle) }
    }

    /// Drops the handle without destroying the device memory. Used after a successful
    /// execution donated this buffer: the runtime owns the memory now, and the buffer behaves
    /// as destroyed.
    pub(crate) fn forget(&self) {
        self.handle.swap(std::ptr::null_mut(), Ordering::AcqRel);
    }

    /// Destroys the underlying device buffer. Idempotent, and a no-op after the owning client
    /// has been destroyed (the client released the buffer already).
    pub(crate) fn destroy(&self) {
        let handle = self.handle.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if handle.is_null() || self.client.is_destroyed() {
            return;
        }
        let result =
            invoke_pjrt_api_error_fn!(self.client.api(), PJRT_Buffer_Destroy, { buffer = handle });
        if let Err(error) = result {
            tracing::warn!(%error, "PJRT buffer destruction failed");
        }
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.destroy();
    }
}

unsafe impl Send for BufferInner {}
unsafe impl Sync for BufferInner {}

/// A reference to a device-resident memory region owned by a [`Client`].
///
/// Buffers may be shared across threads; [`Buffer::destroy`] is the synchronizing edge and is
/// idempotent. Destroying the client first releases its buffers, after which destroying a
/// buffer is a no-op that merely consumes the handle.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub(crate) fn wrap(
        handle: *mut ffi::PJRT_Buffer,
        client: Arc<ClientInner>,
        host_backing: Option<Arc<HostBuffer>>,
    ) -> Result<Self, Error> {
        if handle.is_null() {
            return Err(Error::invalid_argument("the provided PJRT buffer handle is a null pointer"));
        }
        let inner = Arc::new(BufferInner {
            client: client.clone(),
            handle: AtomicPtr::new(handle),
            _host_backing: host_backing,
        });
        client.register_buffer(&inner);
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &Arc<BufferInner> {
        &self.inner
    }

    /// Destroys the device buffer, releasing its memory. Idempotent; safe to call after the
    /// owning client has been destroyed.
    pub fn destroy(&self) -> Result<(), Error> {
        self.inner.destroy();
        Ok(())
    }

    /// Element type of this buffer.
    pub fn dtype(&self) -> Result<DType, Error> {
        let handle = self.inner.handle()?;
        let element_type = invoke_pjrt_api_error_fn!(
            self.inner.client.api(),
            PJRT_Buffer_ElementType,
            { buffer = handle },
            { element_type }
        )?;
        unsafe { BufferType::from_c_api(element_type) }?
            .to_dtype()
            .ok_or_else(|| Error::internal("buffer has no element dtype"))
    }

    /// Dimensions of this buffer.
    pub fn dimensions(&self) -> Result<Vec<i64>, Error> {
        let handle = self.inner.handle()?;
        let (dims, num_dims) = invoke_pjrt_api_error_fn!(
            self.inner.client.api(),
            PJRT_Buffer_Dimensions,
            { buffer = handle },
            { dims, num_dims }
        )?;
        Ok(unsafe { slice_from_c_api(dims, num_dims) }.to_vec())
    }

    /// Number of bytes the buffer occupies on device.
    pub fn on_device_size(&self) -> Result<usize, Error> {
        let handle = self.inner.handle()?;
        let size = invoke_pjrt_api_error_fn!(
            self.inner.client.api(),
            PJRT_Buffer_OnDeviceSizeInBytes,
            { buffer = handle },
            { on_device_size_in_bytes }
        )?;
        Ok(size)
    }

    /// Whether the buffer memory is host-visible (CPU plugins).
    pub fn is_on_cpu(&self) -> Result<bool, Error> {
        let handle = self.inner.handle()?;
        invoke_pjrt_api_error_fn!(
            self.inner.client.api(),
            PJRT_Buffer_IsOnCpu,
            { buffer = handle },
            { is_on_cpu }
        )
    }

    /// Blocks until the buffer contents are ready on device.
    pub fn wait_ready(&self) -> Result<(), Error> {
        let handle = self.inner.handle()?;
        let api = self.inner.client.api();
        let event =
            invoke_pjrt_api_error_fn!(api, PJRT_Buffer_ReadyEvent, { buffer = handle }, { event })?;
        unsafe { Event::from_c_api(event, api) }?.wait()
    }

    /// Copies the packed device representation into `dst`, blocking until the transfer
    /// completes. `dst` must hold exactly the packed byte length of the buffer (sub-byte
    /// element types store bit-width bits per element).
    pub fn to_host(&self, dst: &mut [u8]) -> Result<(), Error> {
        let handle = self.inner.handle()?;
        let api = self.inner.client.api();
        let event = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Buffer_ToHostBuffer,
            {
                src = handle,
                host_layout = std::ptr::null_mut(),
                dst = dst.as_mut_ptr() as *mut std::ffi::c_void,
                dst_size = dst.len(),
            },
            { event }
        )?;
        unsafe { Event::from_c_api(event, api) }?.wait()
    }

    /// Reads back the packed storage bytes of this buffer.
    pub fn raw_storage(&self) -> Result<Vec<u8>, Error> {
        let dtype = self.dtype()?;
        let count = self.dimensions()?.iter().product::<i64>() as usize;
        let mut bytes = vec![0u8; dtype.packed_byte_len(count)];
        self.to_host(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads the buffer back as a flat vector of `T`, which must match the buffer dtype.
    pub fn to_vec<T: BufferElement>(&self) -> Result<Vec<T>, Error> {
        let dtype = self.dtype()?;
        if dtype != T::DTYPE {
            return Err(Error::invalid_argument(format!(
                "buffer holds {dtype} elements, not {}",
                T::DTYPE
            )));
        }
        let count = self.dimensions()?.iter().product::<i64>() as usize;
        let mut values = vec![T::default(); count];
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(values.as_mut_ptr() as *mut u8, count * size_of::<T>())
        };
        self.to_host(bytes)?;
        Ok(values)
    }

    /// Reads the buffer back as flat data plus its dimensions.
    pub fn to_array<T: BufferElement>(&self) -> Result<(Vec<T>, Vec<i64>), Error> {
        Ok((self.to_vec()?, self.dimensions()?))
    }

    /// Raw pointer to the buffer's storage. Only meaningful for plugins whose device memory is
    /// host-visible (see [`Buffer::is_on_cpu`]); the pointer is valid until the buffer is
    /// destroyed or donated.
    pub unsafe fn unsafe_pointer(&self) -> Result<*mut std::ffi::c_void, Error> {
        let handle = self.inner.handle()?;
        let pointer = invoke_pjrt_api_error_fn!(
            self.inner.client.api(),
            PJRT_Buffer_UnsafePointer,
            { buffer = handle },
            { buffer_pointer }
        )?;
        Ok(pointer as *mut std::ffi::c_void)
    }

    /// Reads back a rank-0 buffer as a scalar of `T`.
    pub fn to_scalar<T: BufferElement>(&self) -> Result<T, Error> {
        let dimensions = self.dimensions()?;
        if !dimensions.is_empty() {
            return Err(Error::invalid_argument(format!(
                "to_scalar requires a rank-0 buffer, got dimensions {dimensions:?}"
            )));
        }
        Ok(self.to_vec::<T>()?[0])
    }

    /// Reads back a sub-byte integer buffer (`i2`/`i4`/`ui2`/`ui4`), unpacking the packed
    /// storage into one `i64` per element.
    pub fn to_sub_byte_vec(&self) -> Result<Vec<i64>, Error> {
        let dtype = self.dtype()?;
        if !dtype.is_sub_byte() {
            return Err(Error::invalid_argument(format!(
                "to_sub_byte_vec requires a sub-byte buffer, got {dtype}"
            )));
        }
        let count = self.dimensions()?.iter().product::<i64>() as usize;
        let bytes = self.raw_storage()?;
        Ok(unpack_sub_byte(dtype.bit_width(), dtype.is_signed_integer(), &bytes, count))
    }
}

/// A zero-copy buffer pair: an aligned host allocation presented simultaneously as a typed
/// host slice and as a device buffer. Writes through [`SharedHostBuffer::data_mut`] are
/// observed by subsequent executions without a re-transfer. Only valid on plugins whose device
/// memory is host memory (CPU).
pub struct SharedHostBuffer<T: BufferElement> {
    buffer: Buffer,
    host: Arc<HostBuffer>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: BufferElement> SharedHostBuffer<T> {
    /// The device-buffer view of the shared allocation.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn data(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.host.as_ptr() as *const T, self.len) }
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.host.as_ptr() as *mut T, self.len) }
    }
}

/// No-op deletion callback for device views over caller-owned host memory.
unsafe extern "C" fn no_op_delete(_device_buffer_ptr: *mut std::ffi::c_void, _user_arg: *mut std::ffi::c_void) {}

impl Client {
    fn default_device(&self, device: Option<&Device>) -> Result<*mut crate::devices::ffi::PJRT_Device, Error> {
        match device {
            Some(device) => Ok(unsafe { device.to_c_api() }),
            None => {
                let device = self.addressable_devices().first().ok_or_else(|| {
                    Error::failed_precondition("the client has no addressable devices")
                })?;
                Ok(unsafe { device.to_c_api() })
            }
        }
    }

    /// Transfers packed host bytes to a device buffer of the provided dtype and dimensions,
    /// blocking until the plugin no longer needs the host memory. `data` must hold exactly the
    /// packed byte length of the shape.
    pub fn transfer_to_device(
        &self,
        data: &[u8],
        dtype: DType,
        dimensions: &[i64],
        device: Option<&Device>,
    ) -> Result<Buffer, Error> {
        let count = dimensions.iter().product::<i64>();
        if count < 0 {
            return Err(Error::invalid_argument(format!(
                "transfer dimensions must be static, got {dimensions:?}"
            )));
        }
        let expected = dtype.packed_byte_len(count as usize);
        if data.len() != expected {
            return Err(Error::invalid_argument(format!(
                "transfer of {dimensions:?} x {dtype} requires {expected} bytes, got {}",
                data.len()
            )));
        }
        let inner = self.inner();
        let api = inner.api();
        let client = inner.handle()?;
        let device = self.default_device(device)?;

        let arena = inner.pools.get(64 + 8 * dimensions.len());
        let dims = arena.alloc_copy(dimensions);
        let (buffer, done) = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_BufferFromHostBuffer,
            {
                client = client,
                data = data.as_ptr() as *const std::ffi::c_void,
                data_type = BufferType::from_dtype(dtype).to_c_api(),
                dims = dims,
                num_dims = dimensions.len(),
                byte_strides = std::ptr::null(),
                num_byte_strides = 0,
                host_buffer_semantics = ffi::PJRT_HostBufferSemantics_kImmutableUntilTransferCompletes,
                device = device,
                memory = std::ptr::null_mut(),
                device_layout = std::ptr::null_mut(),
            },
            { buffer, done_with_host_buffer }
        )?;
        inner.pools.put(arena);
        // Block until the plugin is done reading the host memory; `data` is borrowed. Some
        // plugins complete synchronously and return no event.
        if !done.is_null() {
            unsafe { Event::from_c_api(done, api) }?.wait()?;
        }
        Buffer::wrap(buffer, inner.clone(), None)
    }

    /// Transfers a typed host slice to a device buffer with the provided dimensions.
    pub fn transfer_to_device_typed<T: BufferElement>(
        &self,
        values: &[T],
        dimensions: &[i64],
        device: Option<&Device>,
    ) -> Result<Buffer, Error> {
        let bytes = unsafe {
            std::slice::from_raw_parts(values.as_ptr() as *const u8, std::mem::size_of_val(values))
        };
        self.transfer_to_device(bytes, T::DTYPE, dimensions, device)
    }

    /// Packs host integers into a sub-byte element type (`i2`/`i4`/`ui2`/`ui4`) and transfers
    /// them to a device buffer. Element `i` occupies bits `[i*N, (i+1)*N)` of the byte stream;
    /// signed values are encoded in two's complement.
    pub fn transfer_sub_byte_to_device(
        &self,
        values: &[i64],
        dtype: DType,
        dimensions: &[i64],
        device: Option<&Device>,
    ) -> Result<Buffer, Error> {
        if !dtype.is_sub_byte() {
            return Err(Error::invalid_argument(format!(
                "transfer_sub_byte_to_device requires a sub-byte dtype, got {dtype}"
            )));
        }
        let packed = pack_sub_byte(dtype.bit_width(), values);
        self.transfer_to_device(&packed, dtype, dimensions, device)
    }

    /// Allocates aligned host memory of the exact layout and presents it simultaneously as a
    /// typed host slice and a device buffer (zero copy). Writes to the host slice are observed
    /// on subsequent execute calls without re-transfer. Requires a plugin whose device memory
    /// is host memory (CPU).
    pub fn new_shared_buffer<T: BufferElement>(
        &self,
        dimensions: &[i64],
        device: Option<&Device>,
    ) -> Result<SharedHostBuffer<T>, Error> {
        let count = dimensions.iter().product::<i64>();
        if count < 0 {
            return Err(Error::invalid_argument(format!(
                "shared buffer dimensions must be static, got {dimensions:?}"
            )));
        }
        let len = count as usize;
        let host = Arc::new(HostBuffer::new(len * size_of::<T>()));
        let buffer = unsafe {
            self.view_of_device_memory(
                host.as_ptr() as *mut std::ffi::c_void,
                T::DTYPE,
                dimensions,
                device,
                Some(host.clone()),
            )
        }?;
        Ok(SharedHostBuffer { buffer, host, len, _marker: PhantomData })
    }

    /// Presents an existing host allocation as a device buffer, for plugins whose device
    /// memory is host memory (CPU). The pointer must be aligned to [`BUFFER_ALIGNMENT`] and
    /// must outlive the returned buffer.
    pub unsafe fn view_of_host_slice<T: BufferElement>(
        &self,
        values: &[T],
        dimensions: &[i64],
        device: Option<&Device>,
    ) -> Result<Buffer, Error> {
        if values.as_ptr() as usize % BUFFER_ALIGNMENT != 0 {
            return Err(Error::invalid_argument(format!(
                "host slice views must be aligned to {BUFFER_ALIGNMENT} bytes"
            )));
        }
        unsafe {
            self.view_of_device_memory(
                values.as_ptr() as *mut std::ffi::c_void,
                T::DTYPE,
                dimensions,
                device,
                None,
            )
        }
    }

    unsafe fn view_of_device_memory(
        &self,
        data: *mut std::ffi::c_void,
        dtype: DType,
        dimensions: &[i64],
        device: Option<&Device>,
        host_backing: Option<Arc<HostBuffer>>,
    ) -> Result<Buffer, Error> {
        let inner = self.inner();
        let api = inner.api();
        let client = inner.handle()?;
        let device = self.default_device(device)?;
        let arena = inner.pools.get(64 + 8 * dimensions.len());
        let dims = arena.alloc_copy(dimensions);
        let buffer = invoke_pjrt_api_error_fn!(
            api,
            PJRT_Client_CreateViewOfDeviceBuffer,
            {
                client = client,
                device_buffer_ptr = data,
                dims = dims,
                num_dims = dimensions.len(),
                element_type = BufferType::from_dtype(dtype).to_c_api(),
                layout = std::ptr::null_mut(),
                device = device,
                memory = std::ptr::null_mut(),
                stream = 0,
                on_delete_callback = no_op_delete,
                on_delete_callback_arg = std::ptr::null_mut(),
            },
            { buffer }
        )?;
        inner.pools.put(arena);
        Buffer::wrap(buffer, inner.clone(), host_backing)
    }
}

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
pub(crate) mod ffi {
    use std::marker::{PhantomData, PhantomPinned};

    use crate::clients::ffi::PJRT_Client;
    use crate::devices::ffi::PJRT_Device;
    use crate::errors::ffi::PJRT_Error;
    use crate::events::ffi::PJRT_Event;
    use crate::ffi::PJRT_Extension_Base;

    #[repr(C)]
    pub struct PJRT_Buffer {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_Memory {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    #[repr(C)]
    pub struct PJRT_Buffer_MemoryLayout {
        _data: [u8; 0],
        _marker: PhantomData<(*mut u8, PhantomPinned)>,
    }

    pub type PJRT_Buffer_Type = std::ffi::c_uint;
    pub const PJRT_Buffer_Type_INVALID: PJRT_Buffer_Type = 0;
    pub const PJRT_Buffer_Type_PRED: PJRT_Buffer_Type = 1;
    pub const PJRT_Buffer_Type_S8: PJRT_Buffer_Type = 2;
    pub const PJRT_Buffer_Type_S16: PJRT_Buffer_Type = 3;
    pub const PJRT_Buffer_Type_S32: PJRT_Buffer_Type = 4;
    pub const PJRT_Buffer_Type_S64: PJRT_Buffer_Type = 5;
    pub const PJRT_Buffer_Type_U8: PJRT_Buffer_Type = 6;
    pub const PJRT_Buffer_Type_U16: PJRT_Buffer_Type = 7;
    pub const PJRT_Buffer_Type_U32: PJRT_Buffer_Type = 8;
    pub const PJRT_Buffer_Type_U64: PJRT_Buffer_Type = 9;
    pub const PJRT_Buffer_Type_F16: PJRT_Buffer_Type = 10;
    pub const PJRT_Buffer_Type_F32: PJRT_Buffer_Type = 11;
    pub const PJRT_Buffer_Type_F64: PJRT_Buffer_Type = 12;
    pub const PJRT_Buffer_Type_BF16: PJRT_Buffer_Type = 13;
    pub const PJRT_Buffer_Type_C64: PJRT_Buffer_Type = 14;
    pub const PJRT_Buffer_Type_C128: PJRT_Buffer_Type = 15;
    pub const PJRT_Buffer_Type_F8E5M2: PJRT_Buffer_Type = 16;
    pub const PJRT_Buffer_Type_F8E4M3FN: PJRT_Buffer_Type = 17;
    pub const PJRT_Buffer_Type_F8E4M3B11FNUZ: PJRT_Buffer_Type = 18;
    pub const PJRT_Buffer_Type_F8E5M2FNUZ: PJRT_Buffer_Type = 19;
    pub const PJRT_Buffer_Type_F8E4M3FNUZ: PJRT_Buffer_Type = 20;
    pub const PJRT_Buffer_Type_S4: PJRT_Buffer_Type = 21;
    pub const PJRT_Buffer_Type_U4: PJRT_Buffer_Type = 22;
    pub const PJRT_Buffer_Type_TOKEN: PJRT_Buffer_Type = 23;
    pub const PJRT_Buffer_Type_S2: PJRT_Buffer_Type = 24;
    pub const PJRT_Buffer_Type_U2: PJRT_Buffer_Type = 25;

    pub type PJRT_HostBufferSemantics = std::ffi::c_uint;
    pub const PJRT_HostBufferSemantics_kImmutableOnlyDuringCall: PJRT_HostBufferSemantics = 0;
    pub const PJRT_HostBufferSemantics_kImmutableUntilTransferCompletes: PJRT_HostBufferSemantics = 1;
    pub const PJRT_HostBufferSemantics_kImmutableZeroCopy: PJRT_HostBufferSemantics = 2;
    pub const PJRT_HostBufferSemantics_kMutableZeroCopy: PJRT_HostBufferSemantics = 3;

    #[repr(C)]
    pub struct PJRT_Client_BufferFromHostBuffer_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub data: *const std::ffi::c_void,
        pub data_type: PJRT_Buffer_Type,
        pub dims: *const i64,
        pub num_dims: usize,
        pub byte_strides: *const i64,
        pub num_byte_strides: usize,
        pub host_buffer_semantics: PJRT_HostBufferSemantics,
        pub device: *mut PJRT_Device,
        pub memory: *mut PJRT_Memory,
        pub device_layout: *mut PJRT_Buffer_MemoryLayout,
        pub done_with_host_buffer: *mut PJRT_Event,
        pub buffer: *mut PJRT_Buffer,
    }

    impl PJRT_Client_BufferFromHostBuffer_Args {
        #[allow(clippy::too_many_arguments)]
        pub fn new(
            client: *mut PJRT_Client,
            data: *const std::ffi::c_void,
            data_type: PJRT_Buffer_Type,
            dims: *const i64,
            num_dims: usize,
            byte_strides: *const i64,
            num_byte_strides: usize,
            host_buffer_semantics: PJRT_HostBufferSemantics,
            device: *mut PJRT_Device,
            memory: *mut PJRT_Memory,
            device_layout: *mut PJRT_Buffer_MemoryLayout,
        ) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                data,
                data_type,
                dims,
                num_dims,
                byte_strides,
                num_byte_strides,
                host_buffer_semantics,
                device,
                memory,
                device_layout,
                done_with_host_buffer: std::ptr::null_mut(),
                buffer: std::ptr::null_mut(),
            }
        }
    }

    pub type PJRT_Client_BufferFromHostBuffer =
        unsafe extern "C" fn(args: *mut PJRT_Client_BufferFromHostBuffer_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Client_CreateViewOfDeviceBuffer_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub client: *mut PJRT_Client,
        pub device_buffer_ptr: *mut std::ffi::c_void,
        pub dims: *const i64,
        pub num_dims: usize,
        pub element_type: PJRT_Buffer_Type,
        pub layout: *mut PJRT_Buffer_MemoryLayout,
        pub device: *mut PJRT_Device,
        pub on_delete_callback:
            unsafe extern "C" fn(device_buffer_ptr: *mut std::ffi::c_void, user_arg: *mut std::ffi::c_void),
        pub on_delete_callback_arg: *mut std::ffi::c_void,
        pub stream: isize,
        pub buffer: *mut PJRT_Buffer,
        pub memory: *mut PJRT_Memory,
    }

    impl PJRT_Client_CreateViewOfDeviceBuffer_Args {
        #[allow(clippy::too_many_arguments)]
        pub fn new(
            client: *mut PJRT_Client,
            device_buffer_ptr: *mut std::ffi::c_void,
            dims: *const i64,
            num_dims: usize,
            element_type: PJRT_Buffer_Type,
            layout: *mut PJRT_Buffer_MemoryLayout,
            device: *mut PJRT_Device,
            memory: *mut PJRT_Memory,
            stream: isize,
            on_delete_callback: unsafe extern "C" fn(
                device_buffer_ptr: *mut std::ffi::c_void,
                user_arg: *mut std::ffi::c_void,
            ),
            on_delete_callback_arg: *mut std::ffi::c_void,
        ) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                client,
                device_buffer_ptr,
                dims,
                num_dims,
                element_type,
                layout,
                device,
                on_delete_callback,
                on_delete_callback_arg,
                stream,
                buffer: std::ptr::null_mut(),
                memory,
            }
        }
    }

    pub type PJRT_Client_CreateViewOfDeviceBuffer =
        unsafe extern "C" fn(args: *mut PJRT_Client_CreateViewOfDeviceBuffer_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_Destroy_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
    }

    impl PJRT_Buffer_Destroy_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), buffer }
        }
    }

    pub type PJRT_Buffer_Destroy = unsafe extern "C" fn(args: *mut PJRT_Buffer_Destroy_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_ElementType_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
        pub element_type: PJRT_Buffer_Type,
    }

    impl PJRT_Buffer_ElementType_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), buffer, element_type: 0 }
        }
    }

    pub type PJRT_Buffer_ElementType =
        unsafe extern "C" fn(args: *mut PJRT_Buffer_ElementType_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_Dimensions_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
        pub dims: *const i64,
        pub num_dims: usize,
    }

    impl PJRT_Buffer_Dimensions_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                buffer,
                dims: std::ptr::null(),
                num_dims: 0,
            }
        }
    }

    pub type PJRT_Buffer_Dimensions =
        unsafe extern "C" fn(args: *mut PJRT_Buffer_Dimensions_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_OnDeviceSizeInBytes_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
        pub on_device_size_in_bytes: usize,
    }

    impl PJRT_Buffer_OnDeviceSizeInBytes_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                buffer,
                on_device_size_in_bytes: 0,
            }
        }
    }

    pub type PJRT_Buffer_OnDeviceSizeInBytes =
        unsafe extern "C" fn(args: *mut PJRT_Buffer_OnDeviceSizeInBytes_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_ToHostBuffer_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub src: *mut PJRT_Buffer,
        pub host_layout: *mut PJRT_Buffer_MemoryLayout,
        pub dst: *mut std::ffi::c_void,
        pub dst_size: usize,
        pub event: *mut PJRT_Event,
    }

    impl PJRT_Buffer_ToHostBuffer_Args {
        pub fn new(
            src: *mut PJRT_Buffer,
            host_layout: *mut PJRT_Buffer_MemoryLayout,
            dst: *mut std::ffi::c_void,
            dst_size: usize,
        ) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                src,
                host_layout,
                dst,
                dst_size,
                event: std::ptr::null_mut(),
            }
        }
    }

    pub type PJRT_Buffer_ToHostBuffer =
        unsafe extern "C" fn(args: *mut PJRT_Buffer_ToHostBuffer_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_IsOnCpu_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
        pub is_on_cpu: bool,
    }

    impl PJRT_Buffer_IsOnCpu_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self { struct_size: size_of::<Self>(), extension_start: std::ptr::null_mut(), buffer, is_on_cpu: false }
        }
    }

    pub type PJRT_Buffer_IsOnCpu = unsafe extern "C" fn(args: *mut PJRT_Buffer_IsOnCpu_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_ReadyEvent_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
        pub event: *mut PJRT_Event,
    }

    impl PJRT_Buffer_ReadyEvent_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                buffer,
                event: std::ptr::null_mut(),
            }
        }
    }

    pub type PJRT_Buffer_ReadyEvent =
        unsafe extern "C" fn(args: *mut PJRT_Buffer_ReadyEvent_Args) -> *mut PJRT_Error;

    #[repr(C)]
    pub struct PJRT_Buffer_UnsafePointer_Args {
        pub struct_size: usize,
        pub extension_start: *mut PJRT_Extension_Base,
        pub buffer: *mut PJRT_Buffer,
        pub buffer_pointer: usize,
    }

    impl PJRT_Buffer_UnsafePointer_Args {
        pub fn new(buffer: *mut PJRT_Buffer) -> Self {
            Self {
                struct_size: size_of::<Self>(),
                extension_start: std::ptr::null_mut(),
                buffer,
                buffer_pointer: 0,
            }
        }
    }

    pub type PJRT_Buffer_UnsafePointer =
        unsafe extern "C" fn(args: *mut PJRT_Buffer_UnsafePointer_Args) -> *mut PJRT_Error;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_type_dtype_mapping() {
        // Every DType maps to a buffer type and back.
        let dtypes = [
            DType::Bool,
            DType::I2,
            DType::I4,
            DType::I8,
            DType::I16,
            DType::I32,
            DType::I64,
            DType::U2,
            DType::U4,
            DType::U8,
            DType::U16,
            DType::U32,
            DType::U64,
            DType::F16,
            DType::BF16,
            DType::F32,
            DType::F64,
            DType::C64,
            DType::C128,
        ];
        for dtype in dtypes {
            assert_eq!(BufferType::from_dtype(dtype).to_dtype(), Some(dtype));
        }
        assert_eq!(BufferType::Token.to_dtype(), None);
        assert_eq!(BufferType::Invalid.to_dtype(), None);
    }

    #[test]
    fn test_buffer_type_c_api_codes() {
        assert_eq!(BufferType::Predicate.to_c_api(), ffi::PJRT_Buffer_Type_PRED);
        assert_eq!(BufferType::I2.to_c_api(), ffi::PJRT_Buffer_Type_S2);
        assert_eq!(BufferType::U4.to_c_api(), ffi::PJRT_Buffer_Type_U4);
        assert_eq!(BufferType::BF16.to_c_api(), ffi::PJRT_Buffer_Type_BF16);
        for code in 0..=25u32 {
            let buffer_type = unsafe { BufferType::from_c_api(code) };
            if let Ok(buffer_type) = buffer_type {
                assert_eq!(buffer_type.to_c_api(), code);
            }
        }
        // The float8 codes exist on the wire but have no DType counterpart here.
        assert!(unsafe { BufferType::from_c_api(ffi::PJRT_Buffer_Type_F8E5M2) }.is_err());
    }

    #[test]
    fn test_host_buffer_alignment() {
        for size in [1usize, 63, 64, 1000] {
            let host = HostBuffer::new(size);
            assert_eq!(host.as_ptr() as usize % BUFFER_ALIGNMENT, 0);
        }
    }
}
