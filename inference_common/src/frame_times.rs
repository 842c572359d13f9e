use std::time::Duration;

/// Wall-clock spent in each stage of a single-image run.
#[derive(Debug, Default, Clone, Copy)]
pub struct InferenceTimes {
    pub model_load: Duration,
    pub image_read: Duration,
    pub preprocess: Duration,
    pub forward: Duration,
    pub postprocess: Duration,
    pub render: Duration,
    pub image_write: Duration,
}

impl InferenceTimes {
    pub fn total(&self) -> Duration {
        self.model_load
            + self.image_read
            + self.preprocess
            + self.forward
            + self.postprocess
            + self.render
            + self.image_write
    }
}
