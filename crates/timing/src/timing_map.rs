//! Append-only map from timing key to microsecond timestamp.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TimingError, TimingResult};

/// Microseconds since the UNIX epoch.
pub type TimestampUs = u64;

/// Current wall-clock time in microseconds.
pub fn current_timestamp_us() -> TimestampUs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as TimestampUs)
        .unwrap_or_default()
}

/// Convert microseconds to fractional milliseconds.
pub fn us_to_ms(us: TimestampUs) -> f64 {
    us as f64 / 1000.0
}

/// Ordered, first-writer-wins collection of timestamps.
///
/// Keys are never empty, timestamps never zero, and a key once written keeps
/// its value until the map is cleared or the key erased. Durations written
/// through [`TimingMap::set_duration`] may be zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingMap {
    entries: Vec<(String, TimestampUs)>,
}

impl TimingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `key`, reporting why a write was refused.
    pub fn try_set(&mut self, key: &str, timestamp: TimestampUs) -> TimingResult<()> {
        if key.is_empty() {
            return Err(TimingError::EmptyKey);
        }
        if timestamp == 0 {
            return Err(TimingError::ZeroTimestamp(key.to_string()));
        }
        if self.contains(key) {
            return Err(TimingError::Duplicate(key.to_string()));
        }
        self.entries.push((key.to_string(), timestamp));
        Ok(())
    }

    /// Write `key` if absent. Returns whether the value was stored.
    pub fn set(&mut self, key: &str, timestamp: TimestampUs) -> bool {
        match self.try_set(key, timestamp) {
            Ok(()) => true,
            Err(err @ TimingError::Duplicate(_)) => {
                tracing::error!(target: "timing", %err, "duplicate timestamp ignored");
                false
            }
            Err(err) => {
                tracing::error!(target: "timing", %err, "invalid timestamp");
                false
            }
        }
    }

    /// Write a derived duration in microseconds if `key` is absent.
    pub fn set_duration(&mut self, key: &str, duration: TimestampUs) -> bool {
        match self.try_set(key, duration) {
            Err(TimingError::ZeroTimestamp(_)) => {
                self.entries.push((key.to_string(), 0));
                true
            }
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: "timing", %err, "duration not recorded");
                false
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<TimestampUs> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, timestamp)| *timestamp)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == key)
    }

    /// Whether every key in `keys` is present.
    pub fn has_all(&self, keys: &[&str]) -> bool {
        keys.iter().all(|key| self.contains(key))
    }

    /// Copy keys from `other` that are missing here.
    pub fn merge(&mut self, other: &TimingMap) {
        for (key, timestamp) in &other.entries {
            if !self.contains(key) {
                self.entries.push((key.clone(), *timestamp));
            }
        }
    }

    /// New map holding only the listed keys that are present.
    pub fn sub_map(&self, keys: &[&str]) -> TimingMap {
        TimingMap {
            entries: self
                .entries
                .iter()
                .filter(|(key, _)| keys.contains(&key.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn erase(&mut self, key: &str) -> Option<TimestampUs> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TimestampUs)> {
        self.entries
            .iter()
            .map(|(key, timestamp)| (key.as_str(), *timestamp))
    }

    /// Render as a value tree.
    ///
    /// With `as_millis` every value is an integer millisecond count; otherwise
    /// each microsecond value becomes fractional milliseconds.
    pub fn to_value(&self, as_millis: bool) -> Value {
        Value::Object(self.to_object(as_millis))
    }

    pub fn to_object(&self, as_millis: bool) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(key, timestamp)| {
                let value = if as_millis {
                    Value::from(timestamp / 1000)
                } else {
                    Value::from(us_to_ms(*timestamp))
                };
                (key.clone(), value)
            })
            .collect()
    }
}

impl<'a> FromIterator<(&'a str, TimestampUs)> for TimingMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, TimestampUs)>>(iter: I) -> Self {
        let mut map = TimingMap::new();
        for (key, timestamp) in iter {
            map.set(key, timestamp);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_write_is_logged_as_error() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::ERROR)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut map = TimingMap::new();
            assert!(map.set("paint_end", 1500));
            assert!(!map.set("paint_end", 1600));
        });

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("duplicate timestamp ignored").count(), 1);
        assert!(text.contains("ERROR"));
        assert!(text.contains("paint_end"));
    }

    #[test]
    fn test_first_writer_wins() {
        let mut map = TimingMap::new();
        assert!(map.set("paint_end", 1500));
        assert!(!map.set("paint_end", 1600));
        assert_eq!(map.get("paint_end"), Some(1500));
        assert_eq!(
            map.try_set("paint_end", 1700),
            Err(TimingError::Duplicate("paint_end".to_string()))
        );
    }

    #[test]
    fn test_rejects_empty_key_and_zero() {
        let mut map = TimingMap::new();
        assert!(!map.set("", 10));
        assert!(!map.set("layout_end", 0));
        assert!(map.is_empty());
        assert_eq!(map.try_set("", 10), Err(TimingError::EmptyKey));
    }

    #[test]
    fn test_zero_duration_is_kept() {
        let mut map = TimingMap::new();
        assert!(map.set_duration("lynx_fcp", 0));
        assert!(!map.set_duration("lynx_fcp", 40));
        assert!(!map.set_duration("", 0));
        assert_eq!(map.get("lynx_fcp"), Some(0));
        assert_eq!(map.to_value(false)["lynx_fcp"], Value::from(0.0));
    }

    #[test]
    fn test_merge_keeps_existing_values() {
        let mut left: TimingMap = [("a", 1), ("b", 2)].into_iter().collect();
        let right: TimingMap = [("b", 20), ("c", 30)].into_iter().collect();
        left.merge(&right);
        assert_eq!(left.get("b"), Some(2));
        assert_eq!(left.get("c"), Some(30));
        assert_eq!(left.len(), 3);
    }

    #[test]
    fn test_sub_map_and_erase() {
        let mut map: TimingMap = [("open_time", 5), ("layout_end", 9)].into_iter().collect();
        let sub = map.sub_map(&["open_time", "prepare_template_end"]);
        assert_eq!(sub.len(), 1);
        assert!(sub.contains("open_time"));

        assert_eq!(map.erase("layout_end"), Some(9));
        assert_eq!(map.erase("layout_end"), None);
        assert!(map.has_all(&["open_time"]));
        assert!(!map.has_all(&["open_time", "layout_end"]));
    }

    #[test]
    fn test_to_value_units() {
        let map: TimingMap = [("paint_end", 1_001_400)].into_iter().collect();
        assert_eq!(map.to_value(true)["paint_end"], Value::from(1001u64));
        assert_eq!(map.to_value(false)["paint_end"], Value::from(1001.4));
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let map: TimingMap = [("z", 1), ("a", 2), ("m", 3)].into_iter().collect();
        let keys: Vec<&str> = map.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    proptest! {
        #[test]
        fn prop_values_never_change_once_set(
            writes in proptest::collection::vec(("[a-d]{0,2}", 0u64..5), 0..40)
        ) {
            let mut map = TimingMap::new();
            let mut first: std::collections::HashMap<String, u64> = Default::default();
            for (key, timestamp) in &writes {
                map.set(key, *timestamp);
                if !key.is_empty() && *timestamp != 0 {
                    first.entry(key.clone()).or_insert(*timestamp);
                }
            }
            prop_assert_eq!(map.len(), first.len());
            for (key, timestamp) in first {
                prop_assert_eq!(map.get(&key), Some(timestamp));
            }
            prop_assert!(map.iter().all(|(key, ts)| !key.is_empty() && ts != 0));
        }
    }
}
