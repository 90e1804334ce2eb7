//! Property-based tests for step resolution and carry-over data
