//! Integration tests for the cache module

mod integration_tests;
