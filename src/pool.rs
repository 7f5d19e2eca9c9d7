/// Zero-copy packet reclaim pool
///
/// A bounded SPSC queue of release tokens. The packet handler retains a
/// token here after the chunk has been copied into the ring; the consumer
/// thread reclaims tokens and hands them back to the driver. The pool is a
/// coalescing optimization, never a correctness requirement: when it is
/// full the token must be released immediately instead.

use crate::driver::{PendingToken, Releaser};
use crate::ring::SpscRing;

pub const DEFAULT_POOL_CAPACITY: u64 = 1024;

pub struct PacketPool {
    pending: SpscRing<PendingToken>,
}

impl PacketPool {
    /// Capacity must be a power of two.
    pub fn new(capacity: u64) -> Self {
        PacketPool { pending: SpscRing::new(capacity) }
    }

    /// Queue a token for deferred release. Returns false when the pool is
    /// full; the caller must then release the token immediately.
    #[inline]
    pub fn try_retain(&self, token: PendingToken) -> bool {
        self.pending.try_push(token)
    }

    /// Take the next token due for release, if any.
    #[inline]
    pub fn try_reclaim(&self) -> Option<PendingToken> {
        self.pending.try_pop()
    }

    /// Release every queued token. Used on shutdown and periodically by
    /// the consumer loop.
    pub fn release_all(&self, releaser: &Releaser) -> u64 {
        let mut released = 0;
        while let Some(token) = self.try_reclaim() {
            releaser.release(token);
            released += 1;
        }
        released
    }

    pub fn len(&self) -> u64 {
        self.pending.size()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retain_reclaim_fifo() {
        let pool = PacketPool::new(8);
        for raw in 0..5 {
            assert!(pool.try_retain(PendingToken::from_raw(raw)));
        }
        for raw in 0..5 {
            assert_eq!(pool.try_reclaim(), Some(PendingToken::from_raw(raw)));
        }
        assert_eq!(pool.try_reclaim(), None);
    }

    #[test]
    fn test_full_pool_rejects() {
        let pool = PacketPool::new(4);
        for raw in 0..4 {
            assert!(pool.try_retain(PendingToken::from_raw(raw)));
        }
        // Caller must release immediately in this case
        assert!(!pool.try_retain(PendingToken::from_raw(99)));
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_every_token_released_exactly_once() {
        let released = Arc::new(AtomicU64::new(0));
        let releaser = {
            let released = Arc::clone(&released);
            Releaser::new(move |_| {
                released.fetch_add(1, Ordering::Relaxed);
            })
        };

        let pool = PacketPool::new(4);
        let mut immediate = 0u64;
        for raw in 0..10 {
            let token = PendingToken::from_raw(raw);
            if !pool.try_retain(token) {
                releaser.release(token);
                immediate += 1;
            }
        }
        let deferred = pool.release_all(&releaser);

        assert_eq!(immediate + deferred, 10);
        assert_eq!(released.load(Ordering::Relaxed), 10);
        assert!(pool.is_empty());
    }
}
