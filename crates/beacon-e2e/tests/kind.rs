//! Scenarios against a real cluster
//!
//! See [`kind_tests`] for what is covered and how to run it.

mod kind_tests;
