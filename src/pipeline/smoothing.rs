use std::collections::VecDeque;

use crate::types::Prediction;

/// Mode filter over the last `window` raw predictions.
///
/// The smoothed label is the most frequent one in the window; ties go to whichever of
/// the tied labels was seen most recently. Its probability is the mean probability of
/// that label's entries, and its timestamp is the newest raw timestamp. A window of 0
/// or 1 passes predictions through unchanged.
#[derive(Debug)]
pub struct PredictionSmoother {
    window: usize,
    history: VecDeque<Prediction>,
}

impl PredictionSmoother {
    pub fn new(window: Option<usize>) -> Self {
        let window = window.unwrap_or(1).max(1);
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn push(&mut self, raw: Prediction) -> Prediction {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        let fallback = raw.clone();
        self.history.push_back(raw);
        self.current().unwrap_or(fallback)
    }

    pub fn current(&self) -> Option<Prediction> {
        let newest = self.history.back()?;
        if self.window == 1 {
            return Some(newest.clone());
        }

        // (label, count, probability sum, last position)
        let mut tally: Vec<(&str, usize, f32, usize)> = Vec::new();
        for (pos, p) in self.history.iter().enumerate() {
            let seen = tally.iter().position(|entry| entry.0 == p.label);
            match seen {
                Some(idx) => {
                    let entry = &mut tally[idx];
                    entry.1 += 1;
                    entry.2 += p.probability;
                    entry.3 = pos;
                }
                None => tally.push((&p.label, 1, p.probability, pos)),
            }
        }

        let (label, count, sum, _) = tally
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(a.3.cmp(&b.3)))?;
        Some(Prediction::new(
            label,
            sum / count as f32,
            newest.timestamp,
        ))
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
