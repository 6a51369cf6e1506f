//! Mixer: sums voices onto the graph's entry bus and applies the output stage.

/// Accumulates voice output for one render quantum, then applies master
/// gain and soft clipping at the end of the chain.
#[derive(Debug, Clone)]
pub struct Mixer {
    pub master_gain: f64,
    buffer: Vec<f64>,
}

impl Mixer {
    pub fn new(master_gain: f64, block_size: usize) -> Self {
        Mixer {
            master_gain,
            buffer: vec![0.0; block_size],
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }

    #[inline]
    pub fn add(&mut self, index: usize, sample: f64) {
        if let Some(slot) = self.buffer.get_mut(index) {
            *slot += sample;
        }
    }

    pub fn bus(&self) -> &[f64] {
        &self.buffer
    }

    pub fn bus_mut(&mut self) -> &mut [f64] {
        &mut self.buffer
    }

    /// Master gain and soft clip, in place.
    pub fn finish(&self, left: &mut [f32], right: &mut [f32]) {
        let gain = self.master_gain as f32;
        for s in left.iter_mut().chain(right.iter_mut()) {
            *s = soft_clip(*s * gain);
        }
    }
}

/// tanh soft clipper.
#[inline]
fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_samples() {
        let mut m = Mixer::new(1.0, 4);
        m.add(0, 0.5);
        m.add(0, 0.3);
        m.add(1, 1.0);
        m.add(9, 1.0);
        assert!((m.bus()[0] - 0.8).abs() < 1e-12);
        assert_eq!(m.bus()[1], 1.0);
        assert_eq!(m.bus()[2], 0.0);

        m.clear();
        assert!(m.bus().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn soft_clip_bounds_output() {
        let m = Mixer::new(1.0, 1);
        let mut l = [100.0_f32, 0.0];
        let mut r = [-100.0_f32, 0.25];
        m.finish(&mut l, &mut r);
        assert!(l[0] <= 1.0 && r[0] >= -1.0);
        assert_eq!(l[1], 0.0);
        assert!((r[1] - 0.25_f32.tanh()).abs() < 1e-7);
    }
}
