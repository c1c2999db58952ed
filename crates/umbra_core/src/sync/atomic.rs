//! # Atomic Scalar Cells
//!
//! Consumers read entity fields while refresh loops rewrite them. Each
//! component is stored as raw bits in its own `AtomicU32`, so a reader may
//! see a vector mid-update (new x, old z) but never a torn float.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::math::{Vec2, Vec3};

/// An `f32` with atomic load/store.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// Loads the value.
    #[inline]
    #[must_use]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Stores `value`.
    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// A [`Vec3`] with per-component atomic load/store.
#[derive(Debug, Default)]
pub struct AtomicVec3 {
    x: AtomicF32,
    y: AtomicF32,
    z: AtomicF32,
}

impl AtomicVec3 {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: Vec3) -> Self {
        Self {
            x: AtomicF32::new(value.x),
            y: AtomicF32::new(value.y),
            z: AtomicF32::new(value.z),
        }
    }

    /// Loads every component.
    #[must_use]
    pub fn load(&self) -> Vec3 {
        Vec3::new(self.x.load(), self.y.load(), self.z.load())
    }

    /// Stores every component.
    pub fn store(&self, value: Vec3) {
        self.x.store(value.x);
        self.y.store(value.y);
        self.z.store(value.z);
    }
}

/// A [`Vec2`] with per-component atomic load/store.
#[derive(Debug, Default)]
pub struct AtomicVec2 {
    x: AtomicF32,
    y: AtomicF32,
}

impl AtomicVec2 {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: Vec2) -> Self {
        Self {
            x: AtomicF32::new(value.x),
            y: AtomicF32::new(value.y),
        }
    }

    /// Loads both components.
    #[must_use]
    pub fn load(&self) -> Vec2 {
        Vec2::new(self.x.load(), self.y.load())
    }

    /// Stores both components.
    pub fn store(&self, value: Vec2) {
        self.x.store(value.x);
        self.y.store(value.y);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_round_trip() {
        let cell = AtomicF32::new(1.5);
        assert_eq!(cell.load(), 1.5);
        cell.store(-0.25);
        assert_eq!(cell.load(), -0.25);

        let v = AtomicVec3::new(Vec3::new(1.0, 2.0, 3.0));
        v.store(Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(v.load(), Vec3::new(4.0, 5.0, 6.0));

        let r = AtomicVec2::default();
        r.store(Vec2::new(90.0, -10.0));
        assert_eq!(r.load(), Vec2::new(90.0, -10.0));
    }

    #[test]
    fn test_components_never_tear() {
        let cell = Arc::new(AtomicVec3::new(Vec3::new(1.0, 1.0, 1.0)));
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 0..10_000 {
                    let v = if i % 2 == 0 { 1.0 } else { 2.0 };
                    cell.store(Vec3::new(v, v, v));
                }
            })
        };
        for _ in 0..10_000 {
            let v = cell.load();
            for c in v.to_array() {
                assert!(c == 1.0 || c == 2.0, "torn component {c}");
            }
        }
        writer.join().unwrap();
    }
}
