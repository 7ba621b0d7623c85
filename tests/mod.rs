//! Test suite for Kioku
//!
//! This module organizes all tests

pub mod integration;
