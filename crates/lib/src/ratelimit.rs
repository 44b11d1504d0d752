//! Global cap on concurrent build operations.
//!
//! A counting semaphore: [`RateLimiter::acquire`] waits for a free slot and the
//! returned [`RatePermit`] frees it when dropped. Waiters are not guaranteed to
//! be served in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum RateLimitError {
  #[error("rate limiter closed")]
  Closed,
}

/// Cloneable handle; clones share the same slots.
#[derive(Debug, Clone)]
pub struct RateLimiter {
  semaphore: Arc<Semaphore>,
  max_permits: usize,
  in_flight: Arc<AtomicUsize>,
  peak_in_flight: Arc<AtomicUsize>,
}

impl RateLimiter {
  /// A limiter with `max_concurrent` slots. Zero is treated as one.
  pub fn new(max_concurrent: usize) -> Self {
    let max_permits = max_concurrent.max(1);
    Self {
      semaphore: Arc::new(Semaphore::new(max_permits)),
      max_permits,
      in_flight: Arc::new(AtomicUsize::new(0)),
      peak_in_flight: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Wait for a free slot.
  pub async fn acquire(&self) -> Result<RatePermit, RateLimitError> {
    let permit = Arc::clone(&self.semaphore)
      .acquire_owned()
      .await
      .map_err(|_| RateLimitError::Closed)?;

    let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
    self.peak_in_flight.fetch_max(current, Ordering::Relaxed);

    Ok(RatePermit {
      _permit: permit,
      in_flight: Arc::clone(&self.in_flight),
    })
  }

  pub fn max_concurrent(&self) -> usize {
    self.max_permits
  }

  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// Highest number of slots held at once so far.
  pub fn peak_in_flight(&self) -> usize {
    self.peak_in_flight.load(Ordering::Relaxed)
  }
}

/// A held slot, released on drop.
pub struct RatePermit {
  _permit: OwnedSemaphorePermit,
  in_flight: Arc<AtomicUsize>,
}

impl Drop for RatePermit {
  fn drop(&mut self) {
    self.in_flight.fetch_sub(1, Ordering::Relaxed);
  }
}
