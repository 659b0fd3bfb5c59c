//! Synthetic cosine-gradient RGB frames for exercising an encoder end to end.

pub(crate) const BYTES_PER_PIXEL: usize = 3;

/// Byte length of one packed RGB frame.
pub(crate) fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Fill `buffer` with the animated gradient for `frame_index`.
///
/// Phase-shifted cosines sweep across the plane over time, so the encoded
/// clip shows visible motion without any external assets.
pub(crate) fn fill_gradient(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    frame_index: u32,
    framerate: u32,
) {
    debug_assert_eq!(buffer.len(), frame_len(width, height));
    let time = frame_index as f32 / framerate.max(1) as f32;
    for y in 0..height {
        let v = y as f32 / height as f32;
        for x in 0..width {
            let u = x as f32 / width as f32;
            let offset = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
            let rgb = [
                0.5 + 0.5 * (time + u).cos(),
                0.5 + 0.5 * (time + v + 2.0).cos(),
                0.5 + 0.5 * (time + u + 4.0).cos(),
            ];
            for (slot, channel) in buffer[offset..offset + BYTES_PER_PIXEL]
                .iter_mut()
                .zip(rgb)
            {
                *slot = (channel * 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn frame_len_matches_packed_rgb() {
        assert_eq!(frame_len(640, 480), 640 * 480 * 3);
        assert_eq!(frame_len(1, 1), 3);
    }

    #[test]
    fn first_pixel_of_first_frame_is_deterministic() {
        let mut a = vec![0u8; frame_len(4, 4)];
        let mut b = vec![0u8; frame_len(4, 4)];
        fill_gradient(&mut a, 4, 4, 0, 60);
        fill_gradient(&mut b, 4, 4, 0, 60);
        assert_eq!(a, b);
        // time = 0, u = 0: red channel is cos(0) scaled, i.e. full intensity.
        assert_eq!(a[0], 255);
    }

    proptest! {
        #[test]
        fn gradient_is_deterministic_for_any_frame(
            width in 1u32..32,
            height in 1u32..32,
            frame_index in 0u32..600,
        ) {
            let mut a = vec![0u8; frame_len(width, height)];
            let mut b = vec![0u8; frame_len(width, height)];
            fill_gradient(&mut a, width, height, frame_index, 60);
            fill_gradient(&mut b, width, height, frame_index, 60);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn zero_framerate_does_not_panic(width in 1u32..16, height in 1u32..16) {
            let mut buffer = vec![0u8; frame_len(width, height)];
            fill_gradient(&mut buffer, width, height, 30, 0);
        }
    }
}
