//! End-to-end pipeline tests against synthetic hosts.

mod common;

mod build_tests;
mod fetch_tests;
mod verify_tests;
