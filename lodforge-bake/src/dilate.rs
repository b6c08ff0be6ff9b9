//! Gutter filling by dilation
//!
//! A breadth-first flood fill seeded with every valid texel at once, so each
//! invalid texel receives the value of its nearest valid texel (4-connected
//! distance).

use std::collections::VecDeque;

/// Fill invalid texels of every buffer from their nearest valid neighbour.
///
/// `buffers` are row-major `width x height` images sharing one `valid`
/// mask. Returns the number of texels still invalid, which is non-zero only
/// when nothing was valid to begin with.
pub fn dilate(buffers: &mut [Vec<[f32; 4]>], valid: &[bool], width: usize, height: usize) -> usize {
    let mut filled = valid.to_vec();
    let mut queue: VecDeque<usize> = (0..valid.len()).filter(|&i| valid[i]).collect();

    while let Some(i) = queue.pop_front() {
        let (x, y) = (i % width, i / width);
        let neighbours = [
            (x > 0).then(|| i - 1),
            (x + 1 < width).then(|| i + 1),
            (y > 0).then(|| i - width),
            (y + 1 < height).then(|| i + width),
        ];
        for j in neighbours.into_iter().flatten() {
            if filled[j] {
                continue;
            }
            filled[j] = true;
            for buffer in buffers.iter_mut() {
                buffer[j] = buffer[i];
            }
            queue.push_back(j);
        }
    }

    filled.iter().filter(|&&f| !f).count()
}
