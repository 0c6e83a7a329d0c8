/// Receives upload progress as an integer percentage.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        self(percent)
    }
}

/// Forwards only values strictly above the last one forwarded.
pub(crate) struct MonotonicProgress<'a> {
    sink: &'a dyn ProgressSink,
    last: Option<u8>,
}

impl<'a> MonotonicProgress<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink, last: None }
    }

    /// Returns whether `percent` was forwarded.
    pub(crate) fn report(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return false;
        }
        self.last = Some(percent);
        self.sink.on_progress(percent);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn drops_repeats_and_regressions() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: u8| seen.lock().unwrap().push(p);
        let mut m = MonotonicProgress::new(&sink);

        for p in [0, 20, 20, 42, 40, 55, 100, 100] {
            m.report(p);
        }

        assert_eq!(*seen.lock().unwrap(), vec![0, 20, 42, 55, 100]);
    }
}
