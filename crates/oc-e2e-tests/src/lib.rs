//! End-to-end tests for the workspace crates live in `tests/`.
