use rand::Rng;
use std::sync::Mutex;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

#[derive(Default)]
struct PushState {
    last_push_time: u64,
    last_rand_chars: [u8; 12],
}

/// Generates chronologically ordered, collision resistant record keys in the
/// Realtime Database push-id format: 8 timestamp characters followed by 12
/// random characters. Keys minted within the same millisecond increment the
/// random suffix so they still sort in creation order.
#[derive(Default)]
pub struct PushIdGenerator {
    state: Mutex<PushState>,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a key for the current wall-clock millisecond.
    pub fn next_id(&self) -> String {
        self.next_id_at(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn next_id_at(&self, mut now: u64) -> String {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let duplicate_time = now == state.last_push_time;
        state.last_push_time = now;

        let mut timestamp_chars = [0u8; 8];
        for slot in timestamp_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(now % 64) as usize];
            now /= 64;
        }

        if duplicate_time {
            increment_suffix(&mut state.last_rand_chars);
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_rand_chars.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
        }

        let mut id = String::with_capacity(20);
        id.extend(timestamp_chars.iter().map(|ch| *ch as char));
        id.extend(
            state
                .last_rand_chars
                .iter()
                .map(|index| PUSH_CHARS[*index as usize] as char),
        );
        id
    }
}

fn increment_suffix(chars: &mut [u8; 12]) {
    let mut index = chars.len();
    while index > 0 && chars[index - 1] == 63 {
        chars[index - 1] = 0;
        index -= 1;
    }
    if index > 0 {
        chars[index - 1] += 1;
    }
}
