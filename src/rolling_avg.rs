use ndarray::Array1;
use std::collections::VecDeque;

/// Trailing mean over the last `window` samples. Until the window fills up
/// the mean covers whatever has been pushed so far.
#[derive(Debug, Clone)]
pub struct RollingAvg {
    window: usize,
    history: VecDeque<f64>,
}

impl RollingAvg {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);

        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn push(&mut self, value: f64) -> f64 {
        if self.history.len() == self.window {
            self.history.pop_front();
        }

        self.history.push_back(value);

        self.mean()
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            // summed afresh so flat stretches give exactly zero deltas
            self.history.iter().sum::<f64>() / self.history.len() as f64
        }
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        self.history.len()
    }
}

pub fn rolling_mean(series: &Array1<f64>, window: usize) -> Array1<f64> {
    let mut avg = RollingAvg::new(window);

    series.iter().map(|&v| avg.push(v)).collect()
}
