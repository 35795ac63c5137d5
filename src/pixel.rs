//! Pixel Utilities
//!
//! Channel-type-generic kernels over raw little-endian pixel buffers:
//! box-filter reductions, cross-face blending, planar/interleaved
//! conversion, difference coding and normalized float conversion.
//!
//! Buffers are byte slices; row strides are in bytes. Each kernel is
//! written once over [`Sample`] and dispatched on [`DataType`].

use half::f16;

use crate::format::DataType;

// =============================================================================
// Sample Trait
// =============================================================================

/// One channel value of a stored data type
pub trait Sample: Copy + Default + PartialEq {
    const SIZE: usize;

    fn load(b: &[u8]) -> Self;

    fn store(self, b: &mut [u8]);

    /// Raw value as f32 (no normalization)
    fn to_f32(self) -> f32;

    /// Quantize from f32; integer types truncate toward zero and saturate
    fn from_f32(v: f32) -> Self;

    /// Value scaled to the 0..1 range for integer types
    fn normalized(self) -> f32;

    fn wrapping_add(self, other: Self) -> Self;

    fn wrapping_sub(self, other: Self) -> Self;
}

impl Sample for u8 {
    const SIZE: usize = 1;

    #[inline]
    fn load(b: &[u8]) -> Self {
        b[0]
    }

    #[inline]
    fn store(self, b: &mut [u8]) {
        b[0] = self;
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as u8
    }

    #[inline]
    fn normalized(self) -> f32 {
        self as f32 / 255.0
    }

    #[inline]
    fn wrapping_add(self, other: Self) -> Self {
        u8::wrapping_add(self, other)
    }

    #[inline]
    fn wrapping_sub(self, other: Self) -> Self {
        u8::wrapping_sub(self, other)
    }
}

impl Sample for u16 {
    const SIZE: usize = 2;

    #[inline]
    fn load(b: &[u8]) -> Self {
        u16::from_le_bytes([b[0], b[1]])
    }

    #[inline]
    fn store(self, b: &mut [u8]) {
        b[..2].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as u16
    }

    #[inline]
    fn normalized(self) -> f32 {
        self as f32 / 65535.0
    }

    #[inline]
    fn wrapping_add(self, other: Self) -> Self {
        u16::wrapping_add(self, other)
    }

    #[inline]
    fn wrapping_sub(self, other: Self) -> Self {
        u16::wrapping_sub(self, other)
    }
}

impl Sample for f16 {
    const SIZE: usize = 2;

    #[inline]
    fn load(b: &[u8]) -> Self {
        f16::from_le_bytes([b[0], b[1]])
    }

    #[inline]
    fn store(self, b: &mut [u8]) {
        b[..2].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    #[inline]
    fn normalized(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn wrapping_add(self, other: Self) -> Self {
        f16::from_f32(f16::to_f32(self) + f16::to_f32(other))
    }

    #[inline]
    fn wrapping_sub(self, other: Self) -> Self {
        f16::from_f32(f16::to_f32(self) - f16::to_f32(other))
    }
}

impl Sample for f32 {
    const SIZE: usize = 4;

    #[inline]
    fn load(b: &[u8]) -> Self {
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    #[inline]
    fn store(self, b: &mut [u8]) {
        b[..4].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn normalized(self) -> f32 {
        self
    }

    #[inline]
    fn wrapping_add(self, other: Self) -> Self {
        self + other
    }

    #[inline]
    fn wrapping_sub(self, other: Self) -> Self {
        self - other
    }
}

/// Run a `Sample`-generic function with the type named by a `DataType`
macro_rules! dispatch {
    ($dt:expr, $func:ident($($arg:expr),* $(,)?)) => {
        match $dt {
            DataType::U8 => $func::<u8>($($arg),*),
            DataType::U16 => $func::<u16>($($arg),*),
            DataType::Half => $func::<f16>($($arg),*),
            DataType::F32 => $func::<f32>($($arg),*),
        }
    };
}

#[inline]
fn at<T: Sample>(buf: &[u8], offset: usize) -> T {
    T::load(&buf[offset..offset + T::SIZE])
}

#[inline]
fn put<T: Sample>(buf: &mut [u8], offset: usize, v: T) {
    v.store(&mut buf[offset..offset + T::SIZE]);
}

// =============================================================================
// Box-Filter Reductions
// =============================================================================

/// 2x2 box reduction of a `uw` x `vw` image into `uw/2` x `vw/2`
#[allow(clippy::too_many_arguments)]
pub fn reduce(
    src: &[u8],
    sstride: usize,
    uw: usize,
    vw: usize,
    dst: &mut [u8],
    dstride: usize,
    dt: DataType,
    nchan: usize,
) {
    dispatch!(dt, reduce_t(src, sstride, uw, vw, dst, dstride, nchan))
}

fn reduce_t<T: Sample>(
    src: &[u8],
    sstride: usize,
    uw: usize,
    vw: usize,
    dst: &mut [u8],
    dstride: usize,
    nchan: usize,
) {
    let ps = nchan * T::SIZE;
    for y in 0..vw / 2 {
        let r0 = 2 * y * sstride;
        let r1 = r0 + sstride;
        for x in 0..uw / 2 {
            for c in 0..nchan {
                let off = 2 * x * ps + c * T::SIZE;
                let sum = at::<T>(src, r0 + off).to_f32()
                    + at::<T>(src, r0 + off + ps).to_f32()
                    + at::<T>(src, r1 + off).to_f32()
                    + at::<T>(src, r1 + off + ps).to_f32();
                put(dst, y * dstride + x * ps + c * T::SIZE, T::from_f32(0.25 * sum));
            }
        }
    }
}

/// Horizontal 2x1 reduction into `uw/2` x `vw`
#[allow(clippy::too_many_arguments)]
pub fn reduce_u(
    src: &[u8],
    sstride: usize,
    uw: usize,
    vw: usize,
    dst: &mut [u8],
    dstride: usize,
    dt: DataType,
    nchan: usize,
) {
    dispatch!(dt, reduce_u_t(src, sstride, uw, vw, dst, dstride, nchan))
}

fn reduce_u_t<T: Sample>(
    src: &[u8],
    sstride: usize,
    uw: usize,
    vw: usize,
    dst: &mut [u8],
    dstride: usize,
    nchan: usize,
) {
    let ps = nchan * T::SIZE;
    for y in 0..vw {
        let row = y * sstride;
        for x in 0..uw / 2 {
            for c in 0..nchan {
                let off = row + 2 * x * ps + c * T::SIZE;
                let sum = at::<T>(src, off).to_f32() + at::<T>(src, off + ps).to_f32();
                put(dst, y * dstride + x * ps + c * T::SIZE, T::from_f32(0.5 * sum));
            }
        }
    }
}

/// Vertical 1x2 reduction into `uw` x `vw/2`
#[allow(clippy::too_many_arguments)]
pub fn reduce_v(
    src: &[u8],
    sstride: usize,
    uw: usize,
    vw: usize,
    dst: &mut [u8],
    dstride: usize,
    dt: DataType,
    nchan: usize,
) {
    dispatch!(dt, reduce_v_t(src, sstride, uw, vw, dst, dstride, nchan))
}

fn reduce_v_t<T: Sample>(
    src: &[u8],
    sstride: usize,
    uw: usize,
    vw: usize,
    dst: &mut [u8],
    dstride: usize,
    nchan: usize,
) {
    let ps = nchan * T::SIZE;
    for y in 0..vw / 2 {
        let r0 = 2 * y * sstride;
        let r1 = r0 + sstride;
        for x in 0..uw {
            for c in 0..nchan {
                let off = x * ps + c * T::SIZE;
                let sum = at::<T>(src, r0 + off).to_f32() + at::<T>(src, r1 + off).to_f32();
                put(dst, y * dstride + off, T::from_f32(0.5 * sum));
            }
        }
    }
}

/// Triangle reduction of a `w` x `w` face into `w/2` x `w/2`
///
/// Each output texel averages three texels of its 2x2 block with the
/// texel mirrored across the face diagonal, which keeps the filter inside
/// the triangle.
pub fn reduce_tri(
    src: &[u8],
    sstride: usize,
    w: usize,
    dst: &mut [u8],
    dstride: usize,
    dt: DataType,
    nchan: usize,
) {
    dispatch!(dt, reduce_tri_t(src, sstride, w, dst, dstride, nchan))
}

fn reduce_tri_t<T: Sample>(
    src: &[u8],
    sstride: usize,
    w: usize,
    dst: &mut [u8],
    dstride: usize,
    nchan: usize,
) {
    let ps = nchan * T::SIZE;
    for y in 0..w / 2 {
        let r0 = 2 * y * sstride;
        let r1 = r0 + sstride;
        for x in 0..w / 2 {
            let mirror = (w - 1 - 2 * x) * sstride + (w - 1 - 2 * y) * ps;
            for c in 0..nchan {
                let off = 2 * x * ps + c * T::SIZE;
                let sum = at::<T>(src, r0 + off).to_f32()
                    + at::<T>(src, r0 + off + ps).to_f32()
                    + at::<T>(src, r1 + off).to_f32()
                    + at::<T>(src, mirror + c * T::SIZE).to_f32();
                put(dst, y * dstride + x * ps + c * T::SIZE, T::from_f32(0.25 * sum));
            }
        }
    }
}

// =============================================================================
// Blending
// =============================================================================

/// Accumulate `weight * src` into `dst` over `len` pixels
///
/// With `flip` the source pixels are added in reverse order.
pub fn blend(
    src: &[u8],
    weight: f32,
    dst: &mut [u8],
    flip: bool,
    len: usize,
    dt: DataType,
    nchan: usize,
) {
    dispatch!(dt, blend_t(src, weight, dst, flip, len, nchan))
}

fn blend_t<T: Sample>(
    src: &[u8],
    weight: f32,
    dst: &mut [u8],
    flip: bool,
    len: usize,
    nchan: usize,
) {
    let ps = nchan * T::SIZE;
    for i in 0..len {
        let d = if flip { len - 1 - i } else { i };
        for c in 0..nchan {
            let s = at::<T>(src, i * ps + c * T::SIZE);
            let doff = d * ps + c * T::SIZE;
            let add = T::from_f32(weight * s.to_f32());
            let cur = at::<T>(dst, doff);
            put(dst, doff, T::from_f32(cur.to_f32() + add.to_f32()));
        }
    }
}

// =============================================================================
// Fill & Copy
// =============================================================================

/// Replicate one pixel over a `uw` x `vw` region
pub fn fill(pixel: &[u8], dst: &mut [u8], dstride: usize, uw: usize, vw: usize) {
    let ps = pixel.len();
    for y in 0..vw {
        let row = y * dstride;
        for x in 0..uw {
            let off = row + x * ps;
            dst[off..off + ps].copy_from_slice(pixel);
        }
    }
}

/// Copy `vw` rows of `rowlen` bytes between strided buffers
pub fn copy(src: &[u8], sstride: usize, dst: &mut [u8], dstride: usize, vw: usize, rowlen: usize) {
    if sstride == rowlen && dstride == rowlen {
        let n = rowlen * vw;
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }
    for y in 0..vw {
        let s = y * sstride;
        let d = y * dstride;
        dst[d..d + rowlen].copy_from_slice(&src[s..s + rowlen]);
    }
}

// =============================================================================
// Channel Layout
// =============================================================================

/// Convert channel-planar storage to interleaved pixels
pub fn interleave(src: &[u8], uw: usize, vw: usize, dst: &mut [u8], dt: DataType, nchan: usize) {
    let ds = dt.size();
    let plane = uw * vw * ds;
    let ps = nchan * ds;
    for c in 0..nchan {
        for i in 0..uw * vw {
            let s = c * plane + i * ds;
            let d = i * ps + c * ds;
            dst[d..d + ds].copy_from_slice(&src[s..s + ds]);
        }
    }
}

/// Convert interleaved pixels to channel-planar storage
pub fn deinterleave(src: &[u8], uw: usize, vw: usize, dst: &mut [u8], dt: DataType, nchan: usize) {
    let ds = dt.size();
    let plane = uw * vw * ds;
    let ps = nchan * ds;
    for c in 0..nchan {
        for i in 0..uw * vw {
            let s = i * ps + c * ds;
            let d = c * plane + i * ds;
            dst[d..d + ds].copy_from_slice(&src[s..s + ds]);
        }
    }
}

// =============================================================================
// Difference Coding
// =============================================================================

/// Undo delta prediction in place; float types are stored undifferenced
pub fn decode_difference(data: &mut [u8], dt: DataType) {
    match dt {
        DataType::U8 => decode_difference_t::<u8>(data),
        DataType::U16 => decode_difference_t::<u16>(data),
        DataType::Half | DataType::F32 => {}
    }
}

fn decode_difference_t<T: Sample>(data: &mut [u8]) {
    let mut prev = T::default();
    for off in (0..data.len() / T::SIZE).map(|i| i * T::SIZE) {
        prev = at::<T>(data, off).wrapping_add(prev);
        put(data, off, prev);
    }
}

/// Apply delta prediction in place
pub fn encode_difference(data: &mut [u8], dt: DataType) {
    match dt {
        DataType::U8 => encode_difference_t::<u8>(data),
        DataType::U16 => encode_difference_t::<u16>(data),
        DataType::Half | DataType::F32 => {}
    }
}

fn encode_difference_t<T: Sample>(data: &mut [u8]) {
    let mut prev = T::default();
    for off in (0..data.len() / T::SIZE).map(|i| i * T::SIZE) {
        let val = at::<T>(data, off);
        put(data, off, val.wrapping_sub(prev));
        prev = val;
    }
}

// =============================================================================
// Float Conversion
// =============================================================================

/// Convert `dst.len()` channel values to normalized floats
pub fn convert_to_float(src: &[u8], dst: &mut [f32], dt: DataType) {
    dispatch!(dt, convert_to_float_t(src, dst))
}

fn convert_to_float_t<T: Sample>(src: &[u8], dst: &mut [f32]) {
    for (i, out) in dst.iter_mut().enumerate() {
        *out = at::<T>(src, i * T::SIZE).normalized();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn f32_values(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_reduce_2x2_u8_truncates() {
        // 2x2 single channel: (1 + 2 + 3 + 5) / 4 = 2.75 -> 2
        let src = [1u8, 2, 3, 5];
        let mut dst = [0u8; 1];
        reduce(&src, 2, 2, 2, &mut dst, 1, DataType::U8, 1);
        assert_eq!(dst, [2]);
    }

    #[test]
    fn test_reduce_u_and_v() {
        let src = f32_bytes(&[0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0]);
        // 4 wide, 2 tall
        let mut u = vec![0u8; 4 * 4];
        reduce_u(&src, 16, 4, 2, &mut u, 8, DataType::F32, 1);
        assert_eq!(f32_values(&u), vec![1.0, 5.0, 9.0, 13.0]);

        let mut v = vec![0u8; 4 * 4];
        reduce_v(&src, 16, 4, 2, &mut v, 16, DataType::F32, 1);
        assert_eq!(f32_values(&v), vec![4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_reduce_multichannel_u16() {
        // 2x2 pixels, two channels each
        let values: [u16; 8] = [100, 1000, 200, 2000, 300, 3000, 400, 4000];
        let src: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut dst = vec![0u8; 4];
        reduce(&src, 8, 2, 2, &mut dst, 4, DataType::U16, 2);
        assert_eq!(u16::from_le_bytes([dst[0], dst[1]]), 250);
        assert_eq!(u16::from_le_bytes([dst[2], dst[3]]), 2500);
    }

    #[test]
    fn test_reduce_tri_uses_mirrored_texel() {
        // 2x2 face: texels a b / c d, output = (a + b + c + d_mirror) / 4
        // where the mirror of (0,0) is (row 1, col 1).
        let src = f32_bytes(&[1.0, 2.0, 3.0, 10.0]);
        let mut dst = vec![0u8; 4];
        reduce_tri(&src, 8, 2, &mut dst, 4, DataType::F32, 1);
        assert_eq!(f32_values(&dst), vec![4.0]);
    }

    #[test]
    fn test_reduce_tri_constant_is_identity() {
        let src = f32_bytes(&[0.5; 16]);
        let mut dst = vec![0u8; 16];
        reduce_tri(&src, 16, 4, &mut dst, 8, DataType::F32, 1);
        assert_eq!(f32_values(&dst), vec![0.5; 4]);
    }

    #[test]
    fn test_blend_accumulates_and_flips() {
        let src = f32_bytes(&[1.0, 2.0, 3.0]);
        let mut dst = f32_bytes(&[0.0, 0.0, 0.0]);
        blend(&src, 0.5, &mut dst, false, 3, DataType::F32, 1);
        assert_eq!(f32_values(&dst), vec![0.5, 1.0, 1.5]);

        blend(&src, 0.5, &mut dst, true, 3, DataType::F32, 1);
        assert_eq!(f32_values(&dst), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_blend_u8_quantizes_each_term() {
        let src = [100u8];
        let mut dst = [0u8];
        for _ in 0..3 {
            blend(&src, 1.0 / 3.0, &mut dst, false, 1, DataType::U8, 1);
        }
        assert_eq!(dst, [99]);
    }

    #[test]
    fn test_fill_strided() {
        let mut dst = vec![0u8; 8 * 2];
        fill(&[7, 9], &mut dst, 8, 3, 2);
        assert_eq!(dst, [7, 9, 7, 9, 7, 9, 0, 0, 7, 9, 7, 9, 7, 9, 0, 0]);
    }

    #[test]
    fn test_copy_strided() {
        let src = [1u8, 2, 3, 4, 5, 6];
        let mut dst = [0u8; 8];
        copy(&src, 3, &mut dst, 4, 2, 2);
        assert_eq!(dst, [1, 2, 0, 0, 4, 5, 0, 0]);
    }

    #[test]
    fn test_interleave_inverts_deinterleave() {
        let pixels: Vec<u8> = (0..24).collect();
        let mut planar = vec![0u8; 24];
        deinterleave(&pixels, 4, 2, &mut planar, DataType::U8, 3);
        assert_eq!(&planar[..4], &[0, 3, 6, 9]);

        let mut back = vec![0u8; 24];
        interleave(&planar, 4, 2, &mut back, DataType::U8, 3);
        assert_eq!(back, pixels);
    }

    #[test]
    fn test_difference_coding_wraps() {
        let original = vec![250u8, 3, 3, 200, 0];
        let mut data = original.clone();
        encode_difference(&mut data, DataType::U8);
        assert_eq!(data[1], 9);
        decode_difference(&mut data, DataType::U8);
        assert_eq!(data, original);
    }

    #[test]
    fn test_difference_coding_skips_floats() {
        let mut data = f32_bytes(&[1.0, 2.0]);
        let before = data.clone();
        decode_difference(&mut data, DataType::F32);
        assert_eq!(data, before);
    }

    #[test]
    fn test_convert_to_float() {
        let mut out = [0f32; 2];
        convert_to_float(&[255, 0], &mut out, DataType::U8);
        assert_eq!(out, [1.0, 0.0]);

        let src: Vec<u8> = [65535u16, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        convert_to_float(&src, &mut out, DataType::U16);
        assert_eq!(out, [1.0, 0.0]);

        let src: Vec<u8> = [f16::from_f32(0.5), f16::from_f32(2.0)]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        convert_to_float(&src, &mut out, DataType::Half);
        assert_eq!(out, [0.5, 2.0]);
    }
}
