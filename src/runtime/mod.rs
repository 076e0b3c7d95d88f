//! Runtime system
//!
//! This module contains the worker pool with its execution contexts and the
//! task graphs that run on it.

pub mod dag;
pub mod scheduler;
