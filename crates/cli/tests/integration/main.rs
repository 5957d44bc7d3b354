//! End-to-end tests driving the kiln binary against local archives.

mod common;
mod fetch_tests;
mod info_tests;
mod test_tests;
