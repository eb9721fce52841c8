use std::fmt::Display;

use crate::{DType, Error};

/// Uniform quantization metadata for a [`Shape`](crate::Shape), rendered as a `!quant.uniform`
/// element type when the shape is emitted.
///
/// Three modes are supported, distinguished by [`Quantization::quantized_axes`] and
/// [`Quantization::block_sizes`]:
///
///   - **Per-tensor**: one scale/zero-point pair, no quantized axes.
///   - **Per-axis**: exactly one quantized axis, one scale/zero-point pair per slice.
///   - **Blockwise**: one or more quantized axes with matching block sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantization {
    /// Integer type used in memory (e.g., [`DType::I8`] or [`DType::U4`]).
    pub storage_type: DType,

    /// Floating-point range being represented (e.g., [`DType::F32`]).
    pub expressed_type: DType,

    /// Step sizes. One value for per-tensor quantization, one per slice for per-axis, and one
    /// per block for blockwise.
    pub scales: Vec<f64>,

    /// Integer values representing the real `0.0`. Must have the same length as
    /// [`Quantization::scales`].
    pub zero_points: Vec<i64>,

    /// Axes that carry their own quantization parameters. Empty for per-tensor mode.
    pub quantized_axes: Vec<i64>,

    /// Block extents along [`Quantization::quantized_axes`]. Empty for per-tensor and standard
    /// per-axis modes.
    pub block_sizes: Vec<i64>,
}

impl Quantization {
    /// Creates per-tensor quantization metadata with a single scale and zero point.
    pub fn uniform(storage_type: DType, expressed_type: DType, scale: f64, zero_point: i64) -> Self {
        Self {
            storage_type,
            expressed_type,
            scales: vec![scale],
            zero_points: vec![zero_point],
            quantized_axes: Vec::new(),
            block_sizes: Vec::new(),
        }
    }

    /// Creates per-axis quantization metadata with one scale/zero-point pair per slice along
    /// `axis`.
    pub fn per_axis(
        storage_type: DType,
        expressed_type: DType,
        axis: i64,
        scales: Vec<f64>,
        zero_points: Vec<i64>,
    ) -> Self {
        Self {
            storage_type,
            expressed_type,
            scales,
            zero_points,
            quantized_axes: vec![axis],
            block_sizes: Vec::new(),
        }
    }

    /// Checks the structural invariants of this [`Quantization`]:
    ///
    ///   - the storage type must be an integer type and the expressed type a float type;
    ///   - `scales` and `zero_points` must have the same length;
    ///   - per-tensor mode requires exactly one scale/zero-point pair;
    ///   - standard per-axis mode (empty `block_sizes`) accepts exactly one quantized axis;
    ///   - blockwise mode requires `block_sizes` aligned with `quantized_axes`.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.storage_type.is_integer() {
            return Err(Error::invalid_attribute(format!(
                "quantization storage type must be an integer type, got {}",
                self.storage_type
            )));
        }
        if !self.expressed_type.is_float() {
            return Err(Error::invalid_attribute(format!(
                "quantization expressed type must be a float type, got {}",
                self.expressed_type
            )));
        }
        if self.scales.len() != self.zero_points.len() {
            return Err(Error::invalid_attribute(format!(
                "quantization requires len(scales) == len(zero_points), got {} and {}",
                self.scales.len(),
                self.zero_points.len()
            )));
        }
        if self.quantized_axes.is_empty() {
            if self.scales.len() != 1 {
                return Err(Error::invalid_attribute(format!(
                    "per-tensor quantization requires exactly one scale/zero-point pair, got {}",
                    self.scales.len()
                )));
            }
            if !self.block_sizes.is_empty() {
                return Err(Error::invalid_attribute(
                    "per-tensor quantization cannot carry block sizes".to_string(),
                ));
            }
        } else if self.block_sizes.is_empty() {
            // Standard per-axis quantization is restricted to a single axis at a time.
            if self.quantized_axes.len() != 1 {
                return Err(Error::invalid_attribute(format!(
                    "per-axis quantization accepts exactly one quantized axis, got {}",
                    self.quantized_axes.len()
                )));
            }
        } else if self.block_sizes.len() != self.quantized_axes.len() {
            return Err(Error::invalid_attribute(format!(
                "blockwise quantization requires len(block_sizes) == len(quantized_axes), got {} and {}",
                self.block_sizes.len(),
                self.quantized_axes.len()
            )));
        }
        Ok(())
    }
}

/// Renders a scale with the shortest round-tripping decimal form (e.g., `0.1`, `2`, `1e-9`).
fn write_scale(out: &mut String, scale: f64) {
    out.push_str(&format!("{scale}"));
}

impl Display for Quantization {
    /// Renders this [`Quantization`] as a `!quant.uniform<STORAGE:EXPRESSED[:AXES], PARAMS>`
    /// MLIR type token.
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        out.push_str("!quant.uniform<");
        out.push_str(self.storage_type.mlir_token());
        out.push(':');
        out.push_str(self.expressed_type.mlir_token());
        if !self.quantized_axes.is_empty() {
            out.push(':');
            if !self.block_sizes.is_empty() {
                out.push('{');
                for (i, axis) in self.quantized_axes.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let block_size = self.block_sizes.get(i).copied().unwrap_or(1);
                    out.push_str(&format!("{axis}:{block_size}"));
                }
                out.push('}');
            } else {
                out.push_str(&format!("{}", self.quantized_axes[0]));
            }
        }
        out.push_str(", ");
        if !self.quantized_axes.is_empty() {
            out.push('{');
            for (i, scale) in self.scales.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_scale(&mut out, *scale);
                out.push_str(&format!(":{}", self.zero_points[i]));
            }
            out.push('}');
        } else {
            write_scale(&mut out, self.scales[0]);
            out.push_str(&format!(":{}", self.zero_points[0]));
        }
        out.push('>');
        formatter.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_tensor() {
        let quantization = Quantization::uniform(DType::I8, DType::F32, 0.1, 0);
        assert!(quantization.validate().is_ok());
        assert_eq!(format!("{quantization}"), "!quant.uniform<i8:f32, 0.1:0>");
    }

    #[test]
    fn test_per_axis() {
        let quantization =
            Quantization::per_axis(DType::I8, DType::F32, 0, vec![0.1, 0.5], vec![-30, -20]);
        assert!(quantization.validate().is_ok());
        assert_eq!(format!("{quantization}"), "!quant.uniform<i8:f32:0, {0.1:-30, 0.5:-20}>");
    }

    #[test]
    fn test_blockwise() {
        let quantization = Quantization {
            storage_type: DType::I4,
            expressed_type: DType::BF16,
            scales: vec![2.0, 4.0],
            zero_points: vec![0, 0],
            quantized_axes: vec![0, 1],
            block_sizes: vec![32, 16],
        };
        assert!(quantization.validate().is_ok());
        assert_eq!(format!("{quantization}"), "!quant.uniform<i4:bf16:{0:32, 1:16}, {2:0, 4:0}>");
    }

    #[test]
    fn test_validation_rejections() {
        let mut quantization = Quantization::uniform(DType::F32, DType::F32, 0.1, 0);
        assert!(quantization.validate().is_err());

        quantization = Quantization::uniform(DType::I8, DType::I32, 0.1, 0);
        assert!(quantization.validate().is_err());

        quantization = Quantization::uniform(DType::I8, DType::F32, 0.1, 0);
        quantization.zero_points.push(1);
        assert!(quantization.validate().is_err());

        // Standard per-axis mode is restricted to a single axis.
        quantization = Quantization::per_axis(DType::I8, DType::F32, 0, vec![0.1, 0.2], vec![0, 0]);
        quantization.quantized_axes.push(1);
        assert!(quantization.validate().is_err());

        // Blockwise requires block sizes to align with the quantized axes.
        quantization = Quantization::per_axis(DType::I8, DType::F32, 0, vec![0.1], vec![0]);
        quantization.block_sizes = vec![8, 16];
        assert!(quantization.validate().is_err());
    }
}
