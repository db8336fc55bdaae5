//! Shared test utilities for slalapse integration tests.
//!
//! - `TestHarness` owns a temporary timelapse root and fake collaborators
//! - `RunningController` drives a spawned controller and watches its events

pub mod fakes;
pub mod harness;

pub use fakes::{FakeEncoder, FakeSnapshotSource, FAKE_JPEG};
pub use harness::{RunningController, TestHarness};
