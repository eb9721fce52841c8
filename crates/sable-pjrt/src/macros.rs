/// Low-level helper for invoking PJRT C API functions: looks up the function pointer in the
/// [`PJRT_Api`](crate::ffi::PJRT_Api) vtable, builds the matching `<Fn>_Args` struct, invokes
/// the function, and extracts the requested output fields. Availability is checked against the
/// plugin's reported `struct_size`, so calling into an older plugin yields
/// [`Error::Unimplemented`](crate::Error::Unimplemented) instead of reading past the vtable.
///
/// Not used directly; see [`invoke_pjrt_api_void_fn!`] and [`invoke_pjrt_api_error_fn!`].
macro_rules! invoke_pjrt_api_fn_helper {
    (
        $api:expr,
        $fn:ident,
        { $($input_name:ident = $input_value:expr),* $(,)? },
        { $($output_name:ident),* $(,)? } $(,)?
    ) => {
        paste::paste! {
            {
                let api_handle = unsafe { $api.to_c_api() };
                let api_fn_offset = std::mem::offset_of!(crate::ffi::PJRT_Api, $fn);
                let api_struct_size = unsafe { (*api_handle).struct_size };
                if api_struct_size <= api_fn_offset {
                    Err(crate::errors::Error::unimplemented(format!(
                        "`{}` is not available in the loaded PJRT plugin (version {})",
                        stringify!($fn),
                        $api.api().version(),
                    )))
                } else {
                    unsafe {
                        let api_fn = (*api_handle).$fn.ok_or_else(|| crate::errors::Error::unimplemented(format!(
                            "`{}` is not implemented in the loaded PJRT plugin (version {})",
                            stringify!($fn),
                            $api.api().version(),
                        )));
                        match api_fn {
                            Ok(api_fn) => {
                                let mut args = [<$fn _Args>]::new($($input_value),*);
                                let error = api_fn(&mut args as *mut _);
                                Ok((($(args.$output_name),*), error))
                            },
                            Err(error) => Err(error),
                        }
                    }
                }
            }
        }
    };
}

/// Invokes a PJRT C API function with a `void` return type. For functions returning
/// `PJRT_Error*` use [`invoke_pjrt_api_error_fn!`] instead.
macro_rules! invoke_pjrt_api_void_fn {
    (
        $api:expr,
        $fn:ident $(,)?
    ) => {
        $crate::invoke_pjrt_api_void_fn!($api, $fn, {}, {})
    };
    (
        $api:expr,
        $fn:ident,
        { $($input_name:ident = $input_value:expr),* $(,)? } $(,)?
    ) => {
        $crate::invoke_pjrt_api_void_fn!($api, $fn, { $($input_name = $input_value),* }, {})
    };
    (
        $api:expr,
        $fn:ident,
        { $($input_name:ident = $input_value:expr),* $(,)? },
        { $($output_name:ident),* $(,)? } $(,)?
    ) => {
        $crate::invoke_pjrt_api_fn_helper!(
            $api,
            $fn,
            { $($input_name = $input_value),* },
            { $($output_name),* },
        ).map(|(outputs, _)| outputs)
    };
}

/// Invokes a PJRT C API function that returns `PJRT_Error*`, converting a non-null error into
/// an [`Error`](crate::Error) carrying the plugin's message and status code.
macro_rules! invoke_pjrt_api_error_fn {
    (
        $api:expr,
        $fn:ident $(,)?
    ) => {
        $crate::invoke_pjrt_api_error_fn!($api, $fn, {}, {})
    };
    (
        $api:expr,
        $fn:ident,
        { $($input_name:ident = $input_value:expr),* $(,)? } $(,)?
    ) => {
        $crate::invoke_pjrt_api_error_fn!($api, $fn, { $($input_name = $input_value),* }, {})
    };
    (
        $api:expr,
        $fn:ident,
        { $($input_name:ident = $input_value:expr),* $(,)? },
        { $($output_name:ident),* $(,)? } $(,)?
    ) => {{
        $crate::invoke_pjrt_api_fn_helper!(
            $api,
            $fn,
            { $($input_name = $input_value),* },
            { $($output_name),* },
        ).and_then(|(outputs, error)| {
            if error.is_null() {
                Ok(outputs)
            } else {
                unsafe {
                    match $crate::Error::from_c_api(error, $api.api()) {
                        Ok(None) => Ok(outputs),
                        Ok(Some(error)) => Err(error),
                        Err(error) => Err(error),
                    }
                }
            }
        })
    }};
}

pub(crate) use {invoke_pjrt_api_error_fn, invoke_pjrt_api_fn_helper, invoke_pjrt_api_void_fn};
