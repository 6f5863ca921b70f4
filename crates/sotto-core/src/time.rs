use chrono::Utc;

/// Epoch milliseconds — the one timestamp unit used on the wire and in the store.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Fresh v4 UUID string; minted ids (push requests, transcripts, content
/// channels) all use this shape.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_ms_is_millisecond_scale() {
        let ms = epoch_ms();
        // 2020-01-01 in ms — anything modern is far beyond this.
        assert!(ms > 1_577_836_800_000);
    }

    #[test]
    fn new_id_is_uuid_shaped() {
        let id = new_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }
}
