//! Shared connectivity signal.
//!
//! A process-wide online/offline flag fed by whatever platform event source
//! hosts the engine. Flipping offline→online is reported to the caller so it
//! can fire a resume trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Connectivity {
  online: Arc<AtomicBool>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(online)),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Relaxed)
  }

  /// Update the flag. Returns `true` when this call regained connectivity.
  pub fn set_online(&self, online: bool) -> bool {
    let was = self.online.swap(online, Ordering::Relaxed);
    online && !was
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn regaining_connectivity_is_reported_once() {
    let net = Connectivity::new(false);
    assert!(!net.is_online());

    assert!(net.set_online(true));
    assert!(!net.set_online(true));
    assert!(net.is_online());

    assert!(!net.set_online(false));
    assert!(net.set_online(true));
  }

  #[test]
  fn clones_share_the_flag() {
    let net = Connectivity::new(true);
    let other = net.clone();
    net.set_online(false);
    assert!(!other.is_online());
  }
}
