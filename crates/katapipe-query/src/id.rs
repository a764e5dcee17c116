//! Query id generation.

use uuid::Uuid;

/// Monotonic id source: a random per-process prefix plus a counter, so ids
/// from concurrent wrapper instances sharing one engine cannot collide.
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            prefix: Uuid::new_v4().to_string(),
            next: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}_{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
