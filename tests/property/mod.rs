//! Property-based tests for routing and fan-out guarantees

mod routing;
