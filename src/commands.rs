use std::time::Duration;

use tokio::time::Instant;

use crate::types::{Field, FieldMap};
use crate::{Error, Result};

/// Last values the controller reported in a zone-info response.
#[derive(Debug, Clone, Default)]
pub struct DeviceStateCache {
    values: FieldMap,
}

impl DeviceStateCache {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn values(&self) -> &FieldMap {
        &self.values
    }

    pub(crate) fn update(&mut self, field: Field, value: &str) {
        self.values.insert(field, value.to_string());
    }
}

/// Fields set by the composite `type` command.
///
/// The controller has no fan-only type: fan is `cool` with mode `fan`.
pub fn translate_type_command(payload: &str) -> Vec<(Field, &'static str)> {
    match payload {
        "off" => vec![(Field::System, "off")],
        "cool" => vec![
            (Field::System, "on"),
            (Field::Type, "cool"),
            (Field::Mode, "thermo"),
        ],
        "fan_only" => vec![
            (Field::System, "on"),
            (Field::Type, "cool"),
            (Field::Mode, "fan"),
        ],
        _ => vec![
            (Field::System, "on"),
            (Field::Type, "heat"),
            (Field::Mode, "thermo"),
        ],
    }
}

/// Accumulates command fields until the user stops editing.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queued: FieldMap,
    last_command: Option<Instant>,
}

impl CommandQueue {
    /// Queue a command. `Field::Type` is the composite command and expands
    /// through [`translate_type_command`].
    pub fn submit(&mut self, field: Field, value: &str, now: Instant) -> Result<()> {
        if !field.is_writable() {
            return Err(Error::ReadOnlyField(field));
        }
        if field == Field::Type {
            for (f, v) in translate_type_command(value) {
                self.queued.insert(f, v.to_string());
            }
        } else {
            self.queued.insert(field, value.to_string());
        }
        self.last_command = Some(now);
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.last_command.is_some()
    }

    pub fn queued(&self, field: Field) -> Option<&str> {
        self.queued.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Quiet for at least `window` since the last submission.
    pub fn is_quiet(&self, now: Instant, window: Duration) -> bool {
        matches!(self.last_command, Some(t) if now.duration_since(t) >= window)
    }

    /// Build the batched command and reset the queue. Unqueued writable fields
    /// fall back to the cache; fields with neither are left out.
    pub fn take_batch(&mut self, cache: &DeviceStateCache) -> FieldMap {
        let batch = Field::WRITABLE
            .iter()
            .filter_map(|field| {
                self.queued
                    .get(field)
                    .map(String::as_str)
                    .or_else(|| cache.get(*field))
                    .map(|v| (*field, v.to_string()))
            })
            .collect();
        self.queued.clear();
        self.last_command = None;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_translation_table() {
        assert_eq!(translate_type_command("off"), vec![(Field::System, "off")]);
        assert_eq!(
            translate_type_command("fan_only"),
            vec![(Field::System, "on"), (Field::Type, "cool"), (Field::Mode, "fan")]
        );
        assert_eq!(
            translate_type_command("cool"),
            vec![(Field::System, "on"), (Field::Type, "cool"), (Field::Mode, "thermo")]
        );
        for other in ["heat", "auto", ""] {
            assert_eq!(
                translate_type_command(other),
                vec![(Field::System, "on"), (Field::Type, "heat"), (Field::Mode, "thermo")]
            );
        }
    }

    #[test]
    fn composite_type_sets_three_fields() {
        let mut queue = CommandQueue::default();
        queue.submit(Field::Type, "fan_only", Instant::now()).unwrap();
        assert_eq!(queue.queued(Field::System), Some("on"));
        assert_eq!(queue.queued(Field::Type), Some("cool"));
        assert_eq!(queue.queued(Field::Mode), Some("fan"));
        assert!(queue.is_pending());
    }

    #[test]
    fn room_temp_cannot_be_commanded() {
        let mut queue = CommandQueue::default();
        let err = queue.submit(Field::RoomTemp, "25", Instant::now()).unwrap_err();
        assert!(matches!(err, Error::ReadOnlyField(Field::RoomTemp)));
        assert!(!queue.is_pending());
    }

    #[test]
    fn batch_prefers_queued_and_falls_back_to_cache() {
        let mut cache = DeviceStateCache::default();
        cache.update(Field::System, "on");
        cache.update(Field::Type, "heat");
        cache.update(Field::ZoneList, "1,2");
        cache.update(Field::Mode, "thermo");
        cache.update(Field::SetPoint, "20");
        cache.update(Field::RoomTemp, "18");

        let mut queue = CommandQueue::default();
        queue.submit(Field::SetPoint, "23", Instant::now()).unwrap();
        queue.submit(Field::ZoneList, "1", Instant::now()).unwrap();

        let batch = queue.take_batch(&cache);
        assert_eq!(batch.get(&Field::SetPoint).map(String::as_str), Some("23"));
        assert_eq!(batch.get(&Field::ZoneList).map(String::as_str), Some("1"));
        assert_eq!(batch.get(&Field::System).map(String::as_str), Some("on"));
        assert!(!batch.contains_key(&Field::RoomTemp));
        assert_eq!(batch.len(), 5);

        assert!(queue.is_empty());
        assert!(!queue.is_pending());
    }

    #[test]
    fn batch_skips_fields_never_reported() {
        let mut queue = CommandQueue::default();
        queue.submit(Field::Mode, "thermo", Instant::now()).unwrap();
        let batch = queue.take_batch(&DeviceStateCache::default());
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_measured_from_last_submission() {
        let mut queue = CommandQueue::default();
        let window = Duration::from_secs(5);
        assert!(!queue.is_quiet(Instant::now(), window));

        queue.submit(Field::SetPoint, "22", Instant::now()).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        queue.submit(Field::SetPoint, "23", Instant::now()).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!queue.is_quiet(Instant::now(), window));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(queue.is_quiet(Instant::now(), window));
    }
}
