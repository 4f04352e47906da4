//! Pixel-format converter (C5, spec §4.5): a GPU compute pass, BGRA game
//! texture in, `OutputFormat`-shaped plane textures out. The shader itself
//! and its D3D11 resource bindings are platform glue; what's modeled here
//! is the format→shader selection table and the dispatch sizing, both of
//! which spec §4.5 pins down precisely enough to test without a GPU.

use svr_shared::pixel_format::{dispatch_group_count, Colorspace, OutputFormat};

/// Selects the compute shader variant for an output format + colorspace
/// pair (spec §4.5: "A compute shader is selected at movie start based on
/// the codec's preferred input format"). Four formats times two
/// colorspaces gives eight compiled shader permutations in a real build;
/// this just names which one a given combination resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderVariant {
    pub format: OutputFormat,
    pub colorspace: Colorspace,
}

impl ShaderVariant {
    pub fn entry_point(self) -> String {
        let fmt = match self.format {
            OutputFormat::Nv12 => "nv12",
            OutputFormat::Yuv422p => "yuv422p",
            OutputFormat::Yuv444p => "yuv444p",
            OutputFormat::Bgr0 => "bgr0",
        };
        let cs = match self.colorspace {
            Colorspace::Bt601 => "bt601",
            Colorspace::Bt709 => "bt709",
        };
        format!("cs_convert_{fmt}_{cs}")
    }
}

/// The GPU operations a conversion pass drives: bind the source BGRA
/// texture and destination plane textures for `variant`, then dispatch the
/// compute shader over `(width, height)`.
pub trait ConverterDevice {
    fn bind_source(&mut self);
    fn bind_destination_planes(&mut self, variant: ShaderVariant);
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);
}

/// Runs one conversion pass (spec §4.5): binds source/destination, computes
/// the `ceil(w/8) × ceil(h/8) × 1` dispatch size, and issues it.
pub fn convert(device: &mut impl ConverterDevice, variant: ShaderVariant, width: u32, height: u32) {
    device.bind_source();
    device.bind_destination_planes(variant);
    let (gx, gy, gz) = dispatch_group_count(width, height);
    device.dispatch(gx, gy, gz);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        bound_source: bool,
        bound_variant: Option<ShaderVariant>,
        dispatched: Option<(u32, u32, u32)>,
    }

    impl ConverterDevice for Recorder {
        fn bind_source(&mut self) {
            self.bound_source = true;
        }
        fn bind_destination_planes(&mut self, variant: ShaderVariant) {
            self.bound_variant = Some(variant);
        }
        fn dispatch(&mut self, x: u32, y: u32, z: u32) {
            self.dispatched = Some((x, y, z));
        }
    }

    #[test]
    fn convert_binds_then_dispatches_at_the_right_size() {
        let mut rec = Recorder::default();
        let variant = ShaderVariant { format: OutputFormat::Nv12, colorspace: Colorspace::Bt709 };
        convert(&mut rec, variant, 1920, 1080);
        assert!(rec.bound_source);
        assert_eq!(rec.bound_variant, Some(variant));
        assert_eq!(rec.dispatched, Some((240, 135, 1)));
    }

    #[test]
    fn entry_point_names_are_distinct_per_format_and_colorspace() {
        let mut names = std::collections::HashSet::new();
        for format in [OutputFormat::Nv12, OutputFormat::Yuv422p, OutputFormat::Yuv444p, OutputFormat::Bgr0] {
            for colorspace in [Colorspace::Bt601, Colorspace::Bt709] {
                assert!(names.insert(ShaderVariant { format, colorspace }.entry_point()));
            }
        }
        assert_eq!(names.len(), 8);
    }
}
