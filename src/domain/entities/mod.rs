pub mod auto_config;
pub mod order;
pub mod pool;
pub mod principal;
pub mod token;
pub mod venue;
pub mod venue_order;
