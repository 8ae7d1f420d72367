use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2025-01-01T00:00:00Z
const PARLEY_EPOCH: u64 = 1_735_689_600_000;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a Snowflake ID.
/// Format: 42 bits timestamp | 10 bits worker | 12 bits sequence
pub fn generate(worker_id: u16) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(PARLEY_EPOCH);
    let timestamp = now.saturating_sub(PARLEY_EPOCH);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFF;
    let id = (timestamp << 22) | ((worker_id as u64 & 0x3FF) << 12) | seq;
    id as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn timestamp_millis(id: i64) -> u64 {
        ((id as u64) >> 22) + PARLEY_EPOCH
    }

    #[test]
    fn ids_are_unique_and_positive() {
        let ids: HashSet<i64> = (0..1000).map(|_| generate(3)).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| *id > 0));
    }

    #[test]
    fn timestamp_is_recoverable() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let id = generate(1);
        let ts = timestamp_millis(id);
        assert!(ts >= before && ts - before < 5_000);
    }
}
