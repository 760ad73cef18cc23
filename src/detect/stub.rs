//! Stub presence provider.
//!
//! Placeholder where deployments plug a real person/identity model. It
//! reports a detection on a fixed cadence, which is enough to exercise the
//! alert path end to end.

use anyhow::Result;

use crate::detect::{BoundingBox, Detection, PerceptionProvider};
use crate::frame::Frame;

pub struct StubPresenceProvider {
    every_nth: u64,
    calls: u64,
    label: String,
    score: f32,
}

impl StubPresenceProvider {
    /// Report one detection every `every_nth` call (0 means never).
    pub fn new(every_nth: u64) -> Self {
        Self {
            every_nth,
            calls: 0,
            label: "person".to_string(),
            score: 0.9,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }
}

impl PerceptionProvider for StubPresenceProvider {
    fn name(&self) -> &'static str {
        "stub-presence"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.every_nth == 0 || self.calls % self.every_nth != 0 {
            return Ok(vec![]);
        }
        Ok(vec![Detection {
            bounds: BoundingBox {
                x: frame.width / 4,
                y: frame.height / 4,
                width: frame.width / 2,
                height: frame.height / 2,
            },
            score: self.score,
            label: self.label.clone(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_on_the_configured_cadence() {
        let mut provider = StubPresenceProvider::new(3);
        let frame = Frame::solid(8, 8, [0, 0, 0]);

        assert!(provider.detect(&frame).unwrap().is_empty());
        assert!(provider.detect(&frame).unwrap().is_empty());
        assert_eq!(provider.detect(&frame).unwrap().len(), 1);
        assert!(provider.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn zero_cadence_never_reports() {
        let mut provider = StubPresenceProvider::new(0);
        let frame = Frame::solid(8, 8, [0, 0, 0]);
        for _ in 0..10 {
            assert!(provider.detect(&frame).unwrap().is_empty());
        }
    }
}
