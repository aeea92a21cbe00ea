//! Workspace root. See the `tether-core`, `tether-session`, and
//! `tether-harness` crates under `crates/`.
