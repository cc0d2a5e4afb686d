pub mod backoff;
pub mod control_loop;
pub mod state;
