//! Blocking iterator over a prefetched result set.

use super::prefetcher::Shared;
use crate::error::FeederError;

/// Iterator returned by [`Prefetcher::iter`](super::Prefetcher::iter).
///
/// Holds a private cursor into the shared buffer. `next` yields buffered
/// items immediately and blocks once the cursor catches up with the
/// prefetch, until more items arrive, a lane failure is queued, or the set
/// completes.
pub struct Iter<'a, T> {
    shared: &'a Shared<T>,
    cursor: usize,
}

impl<'a, T> Iter<'a, T> {
    pub(crate) fn new(shared: &'a Shared<T>) -> Self {
        Self { shared, cursor: 0 }
    }
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = Result<T, FeederError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut state = self.shared.state.lock();
        loop {
            if self.cursor < state.buffer.len() {
                let item = state.buffer[self.cursor].clone();
                self.cursor += 1;
                return Some(Ok(item));
            }
            if let Some(failure) = state.failures.pop_front() {
                // deliver the failure once, then keep iterating; surviving
                // lanes may still append items behind it
                return Some(Err(failure));
            }
            if state.done {
                return None;
            }
            self.shared.feed_me(&mut state);
        }
    }
}
