//! The edge detection kernel programs.
//!
//! Every kernel takes its inputs, then its outputs, then its scalars.

/// Build options the programs are written against.
pub const DEFAULT_BUILD_OPTIONS: &str = "-cl-std=CL1.2";

/// An OpenCL C program with one entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelProgram {
    /// Name used in logs.
    pub name: &'static str,
    /// The program's entry point.
    pub entry_point: &'static str,
    /// OpenCL C source.
    pub source: &'static str,
}

/// `grayscale_u8(image2d_t input, uchar* output, int width)`
pub const GRAYSCALE: KernelProgram = KernelProgram {
    name: "grayscale",
    entry_point: "grayscale_u8",
    source: include_str!("../../kernels/grayscale.cl"),
};

/// `gaussian_blur_u8(const uchar* input, uchar* output, int width, int height)`
pub const CANNY: KernelProgram = KernelProgram {
    name: "canny",
    entry_point: "gaussian_blur_u8",
    source: include_str!("../../kernels/canny.cl"),
};

/// `sobel_u8(const uchar* input, uchar* magnitude, uchar* direction, int width, int height)`
///
/// Directions are quantized to `0` horizontal, `1` diagonal down, `2` vertical, and `3` diagonal
/// up.
pub const SOBEL: KernelProgram = KernelProgram {
    name: "sobel",
    entry_point: "sobel_u8",
    source: include_str!("../../kernels/sobel.cl"),
};

/// `non_max_suppression_u8(const uchar* magnitude, const uchar* direction, uchar* output, int
/// width, int height)`
pub const NON_MAX_SUPPRESSION: KernelProgram = KernelProgram {
    name: "non_max_suppression",
    entry_point: "non_max_suppression_u8",
    source: include_str!("../../kernels/non_max_suppression.cl"),
};

/// `threshold_u8(const uchar* input, uchar* output, uchar threshold)`
pub const THRESHOLD: KernelProgram = KernelProgram {
    name: "threshold",
    entry_point: "threshold_u8",
    source: include_str!("../../kernels/threshold.cl"),
};

/// Every program the edge pipeline needs.
pub const EDGE_PROGRAMS: [KernelProgram; 5] =
    [GRAYSCALE, CANNY, SOBEL, NON_MAX_SUPPRESSION, THRESHOLD];
