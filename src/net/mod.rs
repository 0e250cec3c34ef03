//! Local UDP port leasing and socket helpers.
pub mod port_allocator;
pub mod port_error;
pub mod udp;
