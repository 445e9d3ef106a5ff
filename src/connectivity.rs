//! Connectivity signal shared by the interceptor and the replay engine.
//!
//! The browser exposes `navigator.onLine` plus edge-triggered
//! `online`/`offline` events; this is the same shape. Current state is a
//! plain boolean, and subscribers observe offline-to-online transitions as
//! discrete events, so a reconnect is never coalesced away even if the
//! subscriber polls late.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
  Online,
  Offline,
}

/// Shared online/offline state with edge-triggered subscriptions.
#[derive(Clone)]
pub struct ConnectivityWatch {
  inner: Arc<Inner>,
}

struct Inner {
  online: AtomicBool,
  tx: broadcast::Sender<Transition>,
}

impl ConnectivityWatch {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _) = broadcast::channel(16);
    Self {
      inner: Arc::new(Inner {
        online: AtomicBool::new(initially_online),
        tx,
      }),
    }
  }

  /// Current connectivity state.
  pub fn is_online(&self) -> bool {
    self.inner.online.load(Ordering::SeqCst)
  }

  /// Record a connectivity change. Redundant updates (online while already
  /// online) fire no event.
  pub fn set_online(&self, online: bool) {
    let was = self.inner.online.swap(online, Ordering::SeqCst);
    if was == online {
      return;
    }
    let transition = if online {
      Transition::Online
    } else {
      Transition::Offline
    };
    // No receivers is fine; the state flag alone is enough for the interceptor.
    let _ = self.inner.tx.send(transition);
  }

  /// Subscribe to future connectivity transitions.
  pub fn subscribe(&self) -> ConnectivityEvents {
    ConnectivityEvents {
      rx: self.inner.tx.subscribe(),
    }
  }
}

/// Receiver half of the connectivity signal.
pub struct ConnectivityEvents {
  rx: broadcast::Receiver<Transition>,
}

impl ConnectivityEvents {
  /// Wait for the next offline-to-online transition.
  ///
  /// Returns `false` once the watch has been dropped and no further
  /// transitions can arrive. A lagged receiver skips missed events and keeps
  /// waiting; every reconnect triggers at most one replay pass anyway.
  pub async fn reconnected(&mut self) -> bool {
    loop {
      match self.rx.recv().await {
        Ok(Transition::Online) => return true,
        Ok(Transition::Offline) => continue,
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return false,
      }
    }
  }
}
