//! Channel layout adaptation between a track and its device

use super::RenderCallback;

/// Wrap `render`, which produces `source` interleaved channels, so it fills
/// blocks laid out with `target` channels. Mono is copied to every device
/// channel, a mono device gets the average of the track channels, and
/// device channels the track lacks are silent.
#[cfg_attr(not(feature = "cpal-output"), allow(dead_code))]
pub(crate) fn adapt_channels(
    source: u16,
    target: u16,
    block_frames: usize,
    mut render: RenderCallback,
) -> RenderCallback {
    if source == target {
        return render;
    }
    let source = usize::from(source.max(1));
    let target = usize::from(target.max(1));
    let mut scratch = Vec::with_capacity(block_frames * source);

    Box::new(move |out: &mut [f32]| {
        let frames = out.len() / target;
        scratch.resize(frames * source, 0.0);
        render(&mut scratch);
        remap(&scratch, source, out, target);
    })
}

#[cfg_attr(not(feature = "cpal-output"), allow(dead_code))]
fn remap(src: &[f32], source: usize, dst: &mut [f32], target: usize) {
    for (s, d) in src.chunks_exact(source).zip(dst.chunks_exact_mut(target)) {
        if target == 1 {
            d[0] = s.iter().sum::<f32>() / source as f32;
            continue;
        }
        for (c, sample) in d.iter_mut().enumerate() {
            *sample = if source == 1 {
                s[0]
            } else {
                s.get(c).copied().unwrap_or(0.0)
            };
        }
    }
    let mapped = (src.len() / source) * target;
    let len = dst.len();
    dst[mapped.min(len)..].fill(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> RenderCallback {
        let mut next = 0.0f32;
        Box::new(move |out: &mut [f32]| {
            for s in out.iter_mut() {
                next += 0.125;
                *s = next;
            }
        })
    }

    #[test]
    fn test_same_layout_is_untouched() {
        let mut render = adapt_channels(2, 2, 4, ramp());
        let mut block = [0.0f32; 4];
        render(&mut block);
        assert_eq!(block, [0.125, 0.25, 0.375, 0.5]);
    }

    #[test]
    fn test_mono_to_stereo() {
        let mut render = adapt_channels(1, 2, 4, ramp());
        let mut block = [9.0f32; 6];
        render(&mut block);
        assert_eq!(block, [0.125, 0.125, 0.25, 0.25, 0.375, 0.375]);
    }

    #[test]
    fn test_stereo_to_mono() {
        let mut render = adapt_channels(2, 1, 4, ramp());
        let mut block = [9.0f32; 2];
        render(&mut block);
        assert_eq!(block, [0.1875, 0.4375]);
    }

    #[test]
    fn test_stereo_to_surround() {
        let mut render = adapt_channels(2, 4, 4, ramp());
        let mut block = [9.0f32; 8];
        render(&mut block);
        assert_eq!(block, [0.125, 0.25, 0.0, 0.0, 0.375, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_partial_frame_is_silenced() {
        let mut render = adapt_channels(1, 2, 4, ramp());
        let mut block = [9.0f32; 5];
        render(&mut block);
        assert_eq!(block, [0.125, 0.125, 0.25, 0.25, 0.0]);
    }
}
