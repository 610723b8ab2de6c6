//! Optional per-call logging of remote operations.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CallLog {
    enabled: bool,
    seq: AtomicU64,
}

impl CallLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            seq: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log the start of a call. Returns 0 when disabled.
    pub fn start(&self, kind: &str, target: &str) -> u64 {
        if !self.enabled {
            return 0;
        }
        let id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(call_id = id, kind, target, "Remote call started");
        id
    }

    pub fn finish(&self, id: u64, outcome: &str, status: Option<u16>) {
        if !self.enabled || id == 0 {
            return;
        }
        tracing::info!(call_id = id, outcome, status, "Remote call finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_only_when_enabled() {
        let off = CallLog::new(false);
        assert_eq!(off.start("x.reply", "123"), 0);

        let on = CallLog::new(true);
        assert_eq!(on.start("x.reply", "123"), 1);
        assert_eq!(on.start("x.reply", "124"), 2);
        on.finish(2, "ok", Some(200));
    }
}
