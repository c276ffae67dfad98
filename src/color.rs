//! Display color conversions.
//!
//! Converts between a packed 24-bit sRGB triplet, 8-bit device channels,
//! CIE XYZ and CIELAB. Lab is what the editing UI works in: its lightness
//! axis matches perception well enough that numeric nudges look uniform.
//! All functions are pure; every forward/inverse pair round-trips within
//! ±1 per channel after requantization to 8 bit.

/// 8-bit device-referred sRGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// CIE 1931 XYZ, scaled so that D65 white has Y = 100.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// CIELAB: lightness L in [0, 100], chroma axes a and b.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

// D65 reference white.
const REF_X: f64 = 95.047;
const REF_Y: f64 = 100.0;
const REF_Z: f64 = 108.883;

// CIELAB piecewise constants.
const LAB_EPSILON: f64 = 0.008856;
const LAB_SLOPE: f64 = 7.787;
const LAB_OFFSET: f64 = 16.0 / 116.0;

pub fn unpack(packed: u32) -> Rgb8 {
    Rgb8 {
        r: ((packed >> 16) & 0xff) as u8,
        g: ((packed >> 8) & 0xff) as u8,
        b: (packed & 0xff) as u8,
    }
}

pub fn pack(rgb: Rgb8) -> u32 {
    (u32::from(rgb.r) << 16) | (u32::from(rgb.g) << 8) | u32::from(rgb.b)
}

/// sRGB decode: gamma-encoded channel in [0, 1] to linear light.
fn srgb_to_linear(c: f64) -> f64 {
    if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

/// sRGB encode: linear light to gamma-encoded channel in [0, 1].
fn linear_to_srgb(c: f64) -> f64 {
    if c > 0.0031308 {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    } else {
        12.92 * c
    }
}

pub fn rgb_to_xyz(rgb: Rgb8) -> Xyz {
    let r = srgb_to_linear(f64::from(rgb.r) / 255.0);
    let g = srgb_to_linear(f64::from(rgb.g) / 255.0);
    let b = srgb_to_linear(f64::from(rgb.b) / 255.0);
    Xyz {
        x: (r * 0.4124 + g * 0.3576 + b * 0.1805) * 100.0,
        y: (r * 0.2126 + g * 0.7152 + b * 0.0722) * 100.0,
        z: (r * 0.0193 + g * 0.1192 + b * 0.9505) * 100.0,
    }
}

pub fn xyz_to_rgb(xyz: Xyz) -> Rgb8 {
    let x = xyz.x / 100.0;
    let y = xyz.y / 100.0;
    let z = xyz.z / 100.0;
    let r = x * 3.2406 + y * -1.5372 + z * -0.4986;
    let g = x * -0.9689 + y * 1.8758 + z * 0.0415;
    let b = x * 0.0557 + y * -0.2040 + z * 1.0570;
    Rgb8 {
        r: quantize(linear_to_srgb(r)),
        g: quantize(linear_to_srgb(g)),
        b: quantize(linear_to_srgb(b)),
    }
}

/// Clamp to [0, 1] and requantize to 8 bit.
fn quantize(c: f64) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn lab_forward(t: f64) -> f64 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        LAB_SLOPE * t + LAB_OFFSET
    }
}

fn lab_inverse(t: f64) -> f64 {
    let t3 = t * t * t;
    if t3 > LAB_EPSILON {
        t3
    } else {
        (t - LAB_OFFSET) / LAB_SLOPE
    }
}

pub fn xyz_to_lab(xyz: Xyz) -> Lab {
    let fx = lab_forward(xyz.x / REF_X);
    let fy = lab_forward(xyz.y / REF_Y);
    let fz = lab_forward(xyz.z / REF_Z);
    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

pub fn lab_to_xyz(lab: Lab) -> Xyz {
    let fy = (lab.l + 16.0) / 116.0;
    let fx = lab.a / 500.0 + fy;
    let fz = fy - lab.b / 200.0;
    Xyz {
        x: lab_inverse(fx) * REF_X,
        y: lab_inverse(fy) * REF_Y,
        z: lab_inverse(fz) * REF_Z,
    }
}

/// Packed sRGB straight to Lab, the direction the color editor reads.
pub fn packed_to_lab(packed: u32) -> Lab {
    xyz_to_lab(rgb_to_xyz(unpack(packed)))
}

/// Lab back to a packed sRGB triplet, channels clamped before packing.
pub fn lab_to_packed(lab: Lab) -> u32 {
    pack(xyz_to_rgb(lab_to_xyz(lab)))
}

/// Unpack to normalized linear-light RGB, the form the shader wants.
pub fn packed_to_linear_f32(packed: u32) -> [f32; 3] {
    let rgb = unpack(packed);
    [
        srgb_to_linear(f64::from(rgb.r) / 255.0) as f32,
        srgb_to_linear(f64::from(rgb.g) / 255.0) as f32,
        srgb_to_linear(f64::from(rgb.b) / 255.0) as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_is_lossless() {
        for packed in [0x000000, 0xffffff, 0x1a2b3c, 0xff0080] {
            assert_eq!(pack(unpack(packed)), packed);
        }
    }

    #[test]
    fn lab_round_trip_within_one_per_channel() {
        // Sweep a lattice of colors rather than all 16M.
        for r in (0..=255u16).step_by(17) {
            for g in (0..=255u16).step_by(17) {
                for b in (0..=255u16).step_by(17) {
                    let packed = (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b);
                    let back = unpack(lab_to_packed(packed_to_lab(packed)));
                    let orig = unpack(packed);
                    assert!(
                        (i16::from(back.r) - i16::from(orig.r)).abs() <= 1
                            && (i16::from(back.g) - i16::from(orig.g)).abs() <= 1
                            && (i16::from(back.b) - i16::from(orig.b)).abs() <= 1,
                        "round trip drifted: {orig:?} -> {back:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn white_is_l100_neutral() {
        let lab = packed_to_lab(0xffffff);
        assert!((lab.l - 100.0).abs() < 0.01);
        // The 4-decimal matrix rows leave a hair of chroma on the white
        // point (b is about -0.0104 against the D65 reference).
        assert!(lab.a.abs() < 0.05);
        assert!(lab.b.abs() < 0.05);
    }

    #[test]
    fn black_is_l0() {
        let lab = packed_to_lab(0x000000);
        assert!(lab.l.abs() < 0.01);
    }

    #[test]
    fn mid_gray_reads_near_l50() {
        // 0x777777 is close to the perceptual midpoint of the sRGB ramp.
        let lab = packed_to_lab(0x777777);
        assert!((lab.l - 50.0).abs() < 2.0, "L was {}", lab.l);
    }

    #[test]
    fn out_of_gamut_lab_clamps_instead_of_wrapping() {
        let loud = Lab {
            l: 150.0,
            a: 200.0,
            b: -200.0,
        };
        let rgb = unpack(lab_to_packed(loud));
        // Would overflow without the clamp; just has to stay in range.
        assert!(rgb.r == 255 || rgb.r == 0 || rgb.b == 255 || rgb.b == 0);
    }
}
