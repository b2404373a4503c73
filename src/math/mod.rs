//! Mathematical utilities for exercise classification.
//!
//! This module provides:
//! - [`linalg`]: planar joint geometry (angles, distances, inclination)
//! - [`activation`]: sigmoid and stable softmax
//! - [`lstm`]: LSTM cells and bidirectional layers with backpropagation

pub mod activation;
pub mod linalg;
pub mod lstm;

pub use activation::{argmax, sigmoid, softmax};
pub use linalg::{distance2, inclination, joint_angle, midpoint2};
pub use lstm::{BiLstmLayer, LstmCell};
