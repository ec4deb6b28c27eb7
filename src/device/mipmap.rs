//! Host-side mip chain generation.
//!
//! wgpu has no built-in equivalent of a "generate mipmaps" call, so the wgpu
//! backend keeps the last uploaded base level and derives every smaller level
//! with a 2x2 box filter here before uploading it.

use super::ElementType;

/// Number of levels in a full chain for a `width` x `height` base image.
pub fn level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Halves an image of tightly packed texels, averaging 2x2 blocks.
///
/// Odd edges reuse their last row/column. Returns the new dimensions and data.
pub fn downsample(
    data: &[u8],
    width: u32,
    height: u32,
    channels: u32,
    element: ElementType,
) -> (u32, u32, Vec<u8>) {
    let nw = (width / 2).max(1);
    let nh = (height / 2).max(1);
    let c = channels as usize;
    let es = element.size();
    let mut out = vec![0u8; nw as usize * nh as usize * c * es];
    for y in 0..nh {
        for x in 0..nw {
            let xs = [(2 * x).min(width - 1), (2 * x + 1).min(width - 1)];
            let ys = [(2 * y).min(height - 1), (2 * y + 1).min(height - 1)];
            for ch in 0..c {
                let mut acc = 0.0f64;
                for sy in ys {
                    for sx in xs {
                        let i = ((sy * width + sx) as usize * c + ch) * es;
                        acc += read_component(&data[i..i + es], element);
                    }
                }
                let o = ((y * nw + x) as usize * c + ch) * es;
                write_component(&mut out[o..o + es], element, acc / 4.0);
            }
        }
    }
    (nw, nh, out)
}

pub(super) fn read_component(bytes: &[u8], element: ElementType) -> f64 {
    match element {
        ElementType::U8 => bytes[0] as f64,
        ElementType::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
        ElementType::U32 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        ElementType::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    }
}

pub(super) fn write_component(bytes: &mut [u8], element: ElementType, value: f64) {
    match element {
        ElementType::U8 => bytes[0] = value.round().clamp(0.0, u8::MAX as f64) as u8,
        ElementType::U16 => bytes.copy_from_slice(
            &(value.round().clamp(0.0, u16::MAX as f64) as u16).to_ne_bytes(),
        ),
        ElementType::U32 => bytes.copy_from_slice(
            &(value.round().clamp(0.0, u32::MAX as f64) as u32).to_ne_bytes(),
        ),
        ElementType::F32 => bytes.copy_from_slice(&(value as f32).to_ne_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_count_covers_down_to_one_texel() {
        assert_eq!(level_count(1, 1), 1);
        assert_eq!(level_count(256, 64), 9);
        assert_eq!(level_count(300, 17), 9);
    }

    #[test]
    fn averages_blocks() {
        let data = [0u8, 255, 255, 0, 10, 10, 20, 20];
        // 4x2, one channel
        let (w, h, out) = downsample(&data, 4, 2, 1, ElementType::U8);
        assert_eq!((w, h), (2, 1));
        assert_eq!(out, vec![69, 74]);
    }

    #[test]
    fn float_levels_stay_float() {
        let texels: Vec<f32> = vec![1.0, 3.0, 5.0, 7.0];
        let bytes: Vec<u8> = bytemuck::cast_slice(&texels).to_vec();
        let (_, _, out) = downsample(&bytes, 2, 2, 1, ElementType::F32);
        let out: Vec<f32> = bytemuck::pod_collect_to_vec(&out);
        assert_eq!(out, vec![4.0]);
    }
}
