use chatbox_status_core::{PushRecord, PushUpdate};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Single-slot, last-write-wins store for pushed media state.
///
/// Written by the ingest connections, read by the aggregator. The lock is
/// only held to copy the record.
#[derive(Debug, Default)]
pub struct PushStore {
    record: Mutex<PushRecord>,
}

impl PushStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, update: PushUpdate, now: Instant) {
        let record = PushRecord::from_update(update, now);
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = record;
    }

    pub fn read(&self) -> PushRecord {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::PushStore;
    use chatbox_status_core::PushUpdate;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn update(title: &str, position: f64) -> PushUpdate {
        PushUpdate {
            title: title.to_string(),
            source: format!("{title}-channel"),
            duration_secs: 600.0,
            position_secs: position,
            is_live: false,
        }
    }

    #[test]
    fn starts_empty_and_stale() {
        let store = PushStore::new();
        let rec = store.read();
        assert!(rec.title.is_empty());
        assert!(!rec.is_fresh(Instant::now(), Duration::from_secs(10)));
    }

    #[test]
    fn last_write_wins() {
        let store = PushStore::new();
        let t = Instant::now();
        store.write(update("first", 1.0), t);
        store.write(update("second", 2.0), t - Duration::from_secs(1));

        let rec = store.read();
        assert_eq!(rec.title, "second");
        assert_eq!(rec.received_at, Some(t - Duration::from_secs(1)));
    }

    #[test]
    fn concurrent_reads_never_see_mixed_records() {
        let store = Arc::new(PushStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    let name = if i % 2 == 0 { "even" } else { "odd" };
                    store.write(update(name, i as f64), Instant::now());
                }
            })
        };

        for _ in 0..2_000 {
            let rec = store.read();
            if !rec.title.is_empty() {
                assert_eq!(rec.source, format!("{}-channel", rec.title));
            }
        }
        writer.join().unwrap();
    }
}
