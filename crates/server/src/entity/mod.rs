pub mod spi_access_token;
pub mod spi_access_token_data;
