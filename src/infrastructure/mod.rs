pub mod binance_client;
pub mod key_vault;
pub mod upbit_client;
pub mod venue_client;
