pub(crate) mod chats;
pub(crate) mod posts;
pub(crate) mod reactions;
pub(crate) mod sessions;
pub(crate) mod users;

use std::sync::atomic::{AtomicI64, Ordering};

/// Next value of an in-memory serial, mirroring a database sequence.
pub(crate) fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;

    use super::next_id;

    #[test]
    fn ids_start_at_one_and_increase() {
        let seq = AtomicI64::new(0);
        assert_eq!(next_id(&seq), 1);
        assert_eq!(next_id(&seq), 2);
    }
}
