//! Unit tests for event_runtime

mod event_loop_test;
