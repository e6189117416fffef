//! CPU implementations of the edge detection entry points.
//!
//! Each kernel computes the same values as its OpenCL C source for every work item in the global
//! work size, with rows split over the rayon pool.

use bytemuck::{Pod, Zeroable};
use capture_interop::PixelFormat;
use half::f16;
use rayon::prelude::*;

use super::Memory;

pub(crate) type KernelFn = fn(&Invocation) -> Result<(), String>;

/// Every entry point a program can bind to.
pub(crate) const KERNELS: &[(&str, KernelFn)] = &[
    ("grayscale_u8", grayscale_u8),
    ("gaussian_blur_u8", gaussian_blur_u8),
    ("sobel_u8", sobel_u8),
    ("non_max_suppression_u8", non_max_suppression_u8),
    ("threshold_u8", threshold_u8),
];

pub(crate) fn lookup(name: &str) -> Option<KernelFn> {
    KERNELS
        .iter()
        .find(|(entry_point, _)| *entry_point == name)
        .map(|(_, function)| *function)
}

/// An owned kernel argument.
#[derive(Clone, Debug)]
pub(crate) enum Arg {
    Mem(Memory),
    U8(u8),
    I32(i32),
    U32(u32),
    F32(f32),
}

/// The arguments and work size of one dispatch.
pub(crate) struct Invocation {
    pub args: Vec<Arg>,
    pub global: [usize; 2],
}

impl Invocation {
    fn expect_args(&self, count: usize) -> Result<(), String> {
        if self.args.len() != count {
            return Err(format!(
                "expected {count} arguments but {} were set",
                self.args.len()
            ));
        }
        Ok(())
    }

    fn mem(&self, index: usize) -> Result<&Memory, String> {
        match &self.args[index] {
            Arg::Mem(mem) => Ok(mem),
            other => Err(format!("argument {index} must be a memory object, got {other:?}")),
        }
    }

    fn uchar(&self, index: usize) -> Result<u8, String> {
        match self.args[index] {
            Arg::U8(value) => Ok(value),
            ref other => Err(format!("argument {index} must be a uchar, got {other:?}")),
        }
    }

    /// A positive `int` image dimension.
    fn dimension(&self, index: usize) -> Result<usize, String> {
        match self.args[index] {
            Arg::I32(value) if value > 0 => Ok(value as usize),
            ref other => Err(format!(
                "argument {index} must be a positive int, got {other:?}"
            )),
        }
    }

    /// Check that the global work size fits in a `width` by `height` plane.
    fn check_global(&self, width: usize, height: usize) -> Result<[usize; 2], String> {
        let [global_width, global_height] = self.global;
        if global_width > width || global_height > height {
            return Err(format!(
                "global work size {global_width}x{global_height} exceeds {width}x{height}"
            ));
        }
        Ok(self.global)
    }
}

fn distinct(objects: &[&Memory]) -> Result<(), String> {
    for (index, object) in objects.iter().enumerate() {
        if objects[index + 1..].contains(object) {
            return Err(format!("memory object {} is bound twice", object.id()));
        }
    }
    Ok(())
}

fn check_len(object: &Memory, data: &[u8], required: usize) -> Result<(), String> {
    if data.len() < required {
        return Err(format!(
            "memory object {} holds {} bytes but {required} are accessed",
            object.id(),
            data.len()
        ));
    }
    Ok(())
}

/// `clamp(value + offset, 0, len - 1)`
fn clamped(value: usize, offset: isize, len: usize) -> usize {
    (value as isize + offset).clamp(0, len as isize - 1) as usize
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Bgra8 {
    b: u8,
    g: u8,
    r: u8,
    a: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Rgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

/// The red, green, and blue channels of a pixel as rounded 8-bit values.
fn decode(format: PixelFormat, pixel: &[u8]) -> [u32; 3] {
    match format {
        PixelFormat::Bgra8 => {
            let Bgra8 { r, g, b, .. } = *bytemuck::from_bytes(pixel);
            [r, g, b].map(u32::from)
        }
        PixelFormat::Rgba8 => {
            let Rgba8 { r, g, b, .. } = *bytemuck::from_bytes(pixel);
            [r, g, b].map(u32::from)
        }
        PixelFormat::Rgba16Float => {
            let channel = |offset: usize| {
                let value = f16::from_le_bytes([pixel[offset], pixel[offset + 1]]).to_f32();
                (value.clamp(0.0, 1.0) * 255.0).round_ties_even() as u32
            };
            [channel(0), channel(2), channel(4)]
        }
    }
}

fn luma([r, g, b]: [u32; 3]) -> u8 {
    ((r * 77 + g * 150 + b * 29) >> 8) as u8
}

/// Gradient direction quantized to 0°, 45°, 90°, or 135°.
fn quantize(gx: i32, gy: i32) -> u8 {
    let ax = gx.abs();
    let ay = gy.abs();

    if ay * 128 <= ax * 53 {
        0
    } else if ay * 128 >= ax * 309 {
        2
    } else if (gx > 0) == (gy > 0) {
        1
    } else {
        3
    }
}

fn grayscale_u8(invocation: &Invocation) -> Result<(), String> {
    invocation.expect_args(3)?;
    let input = invocation.mem(0)?;
    let output = invocation.mem(1)?;
    let width = invocation.dimension(2)?;
    distinct(&[input, output])?;

    let desc = input
        .desc()
        .ok_or_else(|| "argument 0 must be an image".to_string())?;
    let [image_width, image_height] = desc.size.map(|dimension| dimension as usize);
    if image_width == 0 || image_height == 0 {
        return Err("the input image is empty".to_string());
    }
    let [global_width, global_height] = invocation.check_global(width, usize::MAX)?;
    let bytes_per_pixel = desc.format.bytes_per_pixel();

    let source = input.read();
    let mut target = output.write();
    check_len(output, &target, width * global_height)?;

    // Reads outside the image clamp to its edge.
    target[..width * global_height]
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let row_bytes = image_width * bytes_per_pixel;
            let source_row = &source[y.min(image_height - 1) * row_bytes..][..row_bytes];

            for (x, value) in row[..global_width].iter_mut().enumerate() {
                let pixel = &source_row[x.min(image_width - 1) * bytes_per_pixel..][..bytes_per_pixel];
                *value = luma(decode(desc.format, pixel));
            }
        });

    Ok(())
}

fn gaussian_blur_u8(invocation: &Invocation) -> Result<(), String> {
    const WEIGHTS: [(isize, u32); 3] = [(-1, 1), (0, 2), (1, 1)];

    invocation.expect_args(4)?;
    let input = invocation.mem(0)?;
    let output = invocation.mem(1)?;
    let width = invocation.dimension(2)?;
    let height = invocation.dimension(3)?;
    distinct(&[input, output])?;
    let [global_width, global_height] = invocation.check_global(width, height)?;

    let source = input.read();
    let mut target = output.write();
    check_len(input, &source, width * height)?;
    check_len(output, &target, width * height)?;

    target[..width * global_height]
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row[..global_width].iter_mut().enumerate() {
                let mut sum = 0;
                for (dy, weight_y) in WEIGHTS {
                    let sy = clamped(y, dy, height);
                    for (dx, weight_x) in WEIGHTS {
                        let sx = clamped(x, dx, width);
                        sum += weight_y * weight_x * u32::from(source[sy * width + sx]);
                    }
                }

                *value = ((sum + 8) >> 4) as u8;
            }
        });

    Ok(())
}

fn sobel_u8(invocation: &Invocation) -> Result<(), String> {
    invocation.expect_args(5)?;
    let input = invocation.mem(0)?;
    let magnitude = invocation.mem(1)?;
    let direction = invocation.mem(2)?;
    let width = invocation.dimension(3)?;
    let height = invocation.dimension(4)?;
    distinct(&[input, magnitude, direction])?;
    let [global_width, global_height] = invocation.check_global(width, height)?;

    let source = input.read();
    let mut magnitude_data = magnitude.write();
    let mut direction_data = direction.write();
    check_len(input, &source, width * height)?;
    check_len(magnitude, &magnitude_data, width * height)?;
    check_len(direction, &direction_data, width * height)?;

    magnitude_data[..width * global_height]
        .par_chunks_mut(width)
        .zip(direction_data[..width * global_height].par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (magnitude_row, direction_row))| {
            for x in 0..global_width {
                let at = |dx: isize, dy: isize| {
                    i32::from(source[clamped(y, dy, height) * width + clamped(x, dx, width)])
                };

                let gx = at(1, -1) + 2 * at(1, 0) + at(1, 1)
                    - at(-1, -1)
                    - 2 * at(-1, 0)
                    - at(-1, 1);
                let gy = at(-1, 1) + 2 * at(0, 1) + at(1, 1)
                    - at(-1, -1)
                    - 2 * at(0, -1)
                    - at(1, -1);

                magnitude_row[x] = (gx.abs() + gy.abs()).min(255) as u8;
                direction_row[x] = quantize(gx, gy);
            }
        });

    Ok(())
}

fn non_max_suppression_u8(invocation: &Invocation) -> Result<(), String> {
    invocation.expect_args(5)?;
    let magnitude = invocation.mem(0)?;
    let direction = invocation.mem(1)?;
    let output = invocation.mem(2)?;
    let width = invocation.dimension(3)?;
    let height = invocation.dimension(4)?;
    distinct(&[magnitude, direction, output])?;
    let [global_width, global_height] = invocation.check_global(width, height)?;

    let magnitude_data = magnitude.read();
    let direction_data = direction.read();
    let mut target = output.write();
    check_len(magnitude, &magnitude_data, width * height)?;
    check_len(direction, &direction_data, width * height)?;
    check_len(output, &target, width * height)?;

    target[..width * global_height]
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row[..global_width].iter_mut().enumerate() {
                let index = y * width + x;
                let (step_x, step_y) = match direction_data[index] {
                    0 => (1, 0),
                    1 => (1, 1),
                    2 => (0, 1),
                    _ => (1, -1),
                };

                let m = magnitude_data[index];
                let a = magnitude_data
                    [clamped(y, step_y, height) * width + clamped(x, step_x, width)];
                let b = magnitude_data
                    [clamped(y, -step_y, height) * width + clamped(x, -step_x, width)];

                *value = if m >= a && m > b { m } else { 0 };
            }
        });

    Ok(())
}

fn threshold_u8(invocation: &Invocation) -> Result<(), String> {
    invocation.expect_args(3)?;
    let input = invocation.mem(0)?;
    let output = invocation.mem(1)?;
    let threshold = invocation.uchar(2)?;
    distinct(&[input, output])?;

    let count = invocation.global[0] * invocation.global[1];
    let source = input.read();
    let mut target = output.write();
    check_len(input, &source, count)?;
    check_len(output, &target, count)?;

    target[..count]
        .par_iter_mut()
        .zip(source[..count].par_iter())
        .for_each(|(value, &input)| *value = if input >= threshold { 255 } else { 0 });

    Ok(())
}
