//! Process-wide key frame request flag
//!
//! A single flag for every viewer: any join (or a picture loss report from
//! the transport) marks a key frame as pending, and the encoder clears it
//! when it polls. Redundant key frames are accepted since one key frame
//! serves every viewer.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// Two-state coordinator: idle or pending
#[derive(Debug, Default)]
pub struct KeyFrameCoordinator {
    pending: AtomicBool,
}

impl KeyFrameCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key frame as needed (idempotent)
    pub fn request_key_frame(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            debug!("Key frame requested");
        }
    }

    /// Read and clear the flag; true if a key frame was pending
    pub fn consume_key_frame_request(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_consume_once() {
        let coordinator = KeyFrameCoordinator::new();
        assert!(!coordinator.consume_key_frame_request());

        coordinator.request_key_frame();
        coordinator.request_key_frame();
        assert!(coordinator.is_pending());

        assert!(coordinator.consume_key_frame_request());
        assert!(!coordinator.consume_key_frame_request());
        assert!(!coordinator.is_pending());
    }

    #[test]
    fn test_concurrent_consumers_see_one_request() {
        let coordinator = Arc::new(KeyFrameCoordinator::new());
        coordinator.request_key_frame();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                std::thread::spawn(move || coordinator.consume_key_frame_request())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&taken| taken)
            .count();
        assert_eq!(granted, 1);
    }
}
