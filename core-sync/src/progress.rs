//! Aggregate populate progress
//!
//! Each language contributes a download half and an import half. Languages
//! are weighted by their expected song count so a large partition moves the
//! overall figure proportionally more than a small one.

use core_library::ProgressFn;
use std::collections::HashMap;
use std::sync::Mutex;

/// Share of a language's weight credited to downloading; the rest is import
pub const DOWNLOAD_SHARE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
struct LanguageProgress {
    weight: f64,
    downloaded: f64,
    imported: f64,
}

impl LanguageProgress {
    fn done(&self) -> f64 {
        self.weight * (DOWNLOAD_SHARE * self.downloaded + (1.0 - DOWNLOAD_SHARE) * self.imported)
    }
}

pub struct ProgressTracker {
    languages: Mutex<HashMap<String, LanguageProgress>>,
    total_weight: f64,
    sink: Option<ProgressFn>,
}

impl ProgressTracker {
    /// `expected` pairs each tracked language with its expected song count.
    pub fn new<I, S>(expected: I, sink: Option<ProgressFn>) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let languages: HashMap<String, LanguageProgress> = expected
            .into_iter()
            .map(|(language, count)| {
                (
                    language.into(),
                    LanguageProgress {
                        weight: count.max(1) as f64,
                        ..Default::default()
                    },
                )
            })
            .collect();
        let total_weight = languages.values().map(|p| p.weight).sum();

        Self {
            languages: Mutex::new(languages),
            total_weight,
            sink,
        }
    }

    pub fn downloaded(&self, language: &str, fraction: f64) {
        self.update(language, |p| p.downloaded = p.downloaded.max(fraction.clamp(0.0, 1.0)));
    }

    pub fn imported(&self, language: &str, fraction: f64) {
        self.update(language, |p| p.imported = p.imported.max(fraction.clamp(0.0, 1.0)));
    }

    /// Credit a language in full, whether it succeeded or was given up on
    pub fn finish(&self, language: &str) {
        self.update(language, |p| {
            p.downloaded = 1.0;
            p.imported = 1.0;
        });
    }

    /// Overall progress in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 1.0;
        }
        let done: f64 = match self.languages.lock() {
            Ok(languages) => languages.values().map(LanguageProgress::done).sum(),
            Err(_) => 0.0,
        };
        (done / self.total_weight).clamp(0.0, 1.0)
    }

    fn update(&self, language: &str, apply: impl FnOnce(&mut LanguageProgress)) {
        let changed = match self.languages.lock() {
            Ok(mut languages) => match languages.get_mut(language) {
                Some(progress) => {
                    apply(progress);
                    true
                }
                None => false,
            },
            Err(_) => false,
        };

        if changed {
            if let Some(sink) = &self.sink {
                sink(self.fraction());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weighted_blend() {
        let tracker = ProgressTracker::new([("en", 300), ("tr", 100)], None);

        tracker.downloaded("en", 1.0);
        assert!(close(tracker.fraction(), 0.375));

        tracker.imported("en", 1.0);
        assert!(close(tracker.fraction(), 0.75));

        tracker.downloaded("tr", 0.5);
        assert!(close(tracker.fraction(), 0.8125));

        tracker.finish("tr");
        assert!(close(tracker.fraction(), 1.0));
    }

    #[test]
    fn test_progress_never_moves_backwards() {
        let tracker = ProgressTracker::new([("en", 10)], None);
        tracker.downloaded("en", 0.8);
        tracker.downloaded("en", 0.2);
        assert!(close(tracker.fraction(), 0.4));
    }

    #[test]
    fn test_sink_receives_updates_for_known_languages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressFn = Arc::new(move |f| sink_seen.lock().unwrap().push(f));

        let tracker = ProgressTracker::new([("en", 0)], Some(sink));
        tracker.downloaded("de", 1.0);
        tracker.imported("en", 1.0);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(close(seen.lock().unwrap()[0], 0.5));
    }

    #[test]
    fn test_nothing_tracked_is_complete() {
        let tracker = ProgressTracker::new(Vec::<(String, u64)>::new(), None);
        assert!(close(tracker.fraction(), 1.0));
    }
}
