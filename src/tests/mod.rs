//! # Test Suite for the Train Sign
//!
//! Unit tests live next to the code they cover. This directory holds the
//! shared test doubles and the scenario tests that drive the whole
//! [`crate::app::App`] against a mock clock, surface, link and data source.

pub(crate) mod support;
