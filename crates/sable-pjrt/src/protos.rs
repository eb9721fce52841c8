//! Hand-annotated Protobuf messages for the subset of the XLA `CompileOptionsProto` family the
//! bridge serializes when invoking `PJRT_Client_Compile`. Field numbers follow
//! `xla/pjrt/compile_options.proto`; fields the bridge never populates are omitted, which is
//! wire-compatible with the full schema.

use std::collections::HashMap;

use prost::{Message, Oneof};

/// Compilation options handed to the PJRT compile entry point, serialized as
/// `CompileOptionsProto` bytes.
#[derive(Clone, PartialEq, Message)]
pub struct CompilationOptions {
    /// Optional per-argument layout constraints. The bridge leaves these empty and lets the
    /// compiler pick backend-default layouts.
    #[prost(message, repeated, tag = "1")]
    pub argument_layouts: Vec<ShapeProto>,

    /// Whether the computation expects a single tuple argument containing all parameters.
    #[prost(bool, tag = "2")]
    pub parameter_is_tupled_arguments: bool,

    /// Options controlling how the executable is built.
    #[prost(message, optional, tag = "3")]
    pub executable_build_options: Option<ExecutableCompilationOptions>,

    /// Whether to produce a portable executable that picks any compatible device at execution
    /// time instead of being pinned to a device assignment.
    #[prost(bool, tag = "4")]
    pub compile_portable_executable: bool,

    /// XLA compilation profile version.
    #[prost(int64, tag = "5")]
    pub profile_version: i64,

    /// Compiler option overrides (e.g. `XLA_FLAGS`-style keys) passed through unmodified.
    #[prost(map = "string, message", tag = "7")]
    pub environment_option_overrides: HashMap<String, OptionOverride>,
}

/// Build options nested inside [`CompilationOptions`]; corresponds to
/// `ExecutableBuildOptionsProto`.
#[derive(Clone, PartialEq, Message)]
pub struct ExecutableCompilationOptions {
    /// Device ordinal to compile for; `-1` leaves the choice to the runtime.
    #[prost(int64, tag = "1")]
    pub device_ordinal: i64,

    /// Number of replicas to compile for. Defaults to 1.
    #[prost(int64, tag = "4")]
    pub replica_count: i64,

    /// Number of partitions. Defaults to 1.
    #[prost(int64, tag = "5")]
    pub partition_count: i64,

    /// Whether to use SPMD partitioning when `partition_count > 1`.
    #[prost(bool, tag = "6")]
    pub use_spmd_partitioning: bool,

    /// Whether to auto-generate shardings for the SPMD partitioner.
    #[prost(bool, tag = "7")]
    pub use_auto_spmd_partitioning: bool,

    /// Whether HLOs should be deduplicated.
    #[prost(bool, tag = "8")]
    pub deduplicate_hlo: bool,

    /// Static device assignment; absent for portable executables.
    #[prost(message, optional, tag = "9")]
    pub device_assignment: Option<DeviceAssignment>,

    /// Whether to alias input and output buffers for parameters passed through unchanged.
    #[prost(bool, tag = "10")]
    pub alias_passthrough_params: bool,
}

/// Replica-major mapping from computations to device ids; corresponds to
/// `DeviceAssignmentProto`.
#[derive(Clone, PartialEq, Message)]
pub struct DeviceAssignment {
    #[prost(int32, tag = "1")]
    pub replica_count: i32,

    #[prost(int32, tag = "2")]
    pub computation_count: i32,

    /// One entry per computation, each holding the device ids for all of its replicas.
    #[prost(message, repeated, tag = "3")]
    pub computation_devices: Vec<ComputationDeviceAssignment>,
}

/// Device ids for all replicas of one computation.
#[derive(Clone, PartialEq, Message)]
pub struct ComputationDeviceAssignment {
    #[prost(int64, repeated, tag = "1")]
    pub replica_device_ids: Vec<i64>,
}

/// A single compiler option override value.
#[derive(Clone, PartialEq, Message)]
pub struct OptionOverride {
    #[prost(oneof = "OptionValue", tags = "1, 2, 3, 4")]
    pub value: Option<OptionValue>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum OptionValue {
    #[prost(string, tag = "1")]
    StringField(String),
    #[prost(bool, tag = "2")]
    BoolField(bool),
    #[prost(int64, tag = "3")]
    IntField(i64),
    #[prost(double, tag = "4")]
    DoubleField(f64),
}

impl From<&crate::Value> for OptionOverride {
    fn from(value: &crate::Value) -> Self {
        let value = match value {
            crate::Value::Bool(value) => OptionValue::BoolField(*value),
            crate::Value::I64(value) => OptionValue::IntField(*value),
            crate::Value::F32(value) => OptionValue::DoubleField(*value as f64),
            crate::Value::String(value) => OptionValue::StringField(value.clone()),
            crate::Value::I64List(values) => OptionValue::StringField(
                values.iter().map(|value| value.to_string()).collect::<Vec<_>>().join(","),
            ),
        };
        Self { value: Some(value) }
    }
}

/// Placeholder for `ShapeProto`; the bridge never populates argument layouts, so no fields are
/// needed for wire compatibility.
#[derive(Clone, PartialEq, Message)]
pub struct ShapeProto {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let options = CompilationOptions {
            argument_layouts: Vec::new(),
            parameter_is_tupled_arguments: false,
            executable_build_options: Some(ExecutableCompilationOptions {
                device_ordinal: -1,
                replica_count: 2,
                partition_count: 1,
                device_assignment: Some(DeviceAssignment {
                    replica_count: 2,
                    computation_count: 1,
                    computation_devices: vec![ComputationDeviceAssignment {
                        replica_device_ids: vec![0, 1],
                    }],
                }),
                ..Default::default()
            }),
            compile_portable_executable: false,
            profile_version: 0,
            environment_option_overrides: HashMap::from([(
                "xla_force_host_platform_device_count".to_string(),
                OptionOverride { value: Some(OptionValue::IntField(8)) },
            )]),
        };
        let bytes = options.encode_to_vec();
        assert!(!bytes.is_empty());
        let decoded = CompilationOptions::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn test_option_override_from_value() {
        let from_bool = OptionOverride::from(&crate::Value::Bool(true));
        assert_eq!(from_bool.value, Some(OptionValue::BoolField(true)));
        let from_string = OptionOverride::from(&crate::Value::String("x".into()));
        assert_eq!(from_string.value, Some(OptionValue::StringField("x".into())));
        let from_list = OptionOverride::from(&crate::Value::I64List(vec![1, 2]));
        assert_eq!(from_list.value, Some(OptionValue::StringField("1,2".into())));
    }
}
